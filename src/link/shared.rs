//! Link shared between an interrupt context and the main loop.

use super::engine::{RxOutcome, WinotLink};
use super::state::LinkState;
use crate::radio::RadioService;
use log::warn;
use std::sync::{Arc, Mutex, MutexGuard};

/// Cloneable handle to a [`WinotLink`] behind a mutex.
///
/// Every method holds the lock for exactly one engine step, so the receive
/// path is never blocked for longer than one buffer copy or one tick.
pub struct SharedLink<R: RadioService> {
    inner: Arc<Mutex<WinotLink<R>>>,
}

impl<R: RadioService> SharedLink<R> {
    /// Wrap a link.
    pub fn new(link: WinotLink<R>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(link)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, WinotLink<R>> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("WiNoT link mutex was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Run `f` with exclusive access to the link.
    pub fn with<T>(&self, f: impl FnOnce(&mut WinotLink<R>) -> T) -> T {
        f(&mut self.lock())
    }

    /// Receive hook.
    pub fn on_radio_frame(&self, frame: &[u8]) -> RxOutcome {
        self.lock().on_radio_frame(frame)
    }

    /// Tick driver.
    pub fn on_tick(&self, elapsed_ms: u32) -> LinkState {
        self.lock().on_tick(elapsed_ms)
    }

    /// Current state.
    pub fn state(&self) -> LinkState {
        self.lock().state()
    }
}

impl<R: RadioService> Clone for SharedLink<R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}
