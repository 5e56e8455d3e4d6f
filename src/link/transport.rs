//! Upper-layer adapter.
//!
//! The network stack above the link sees a packet transport: `send` a frame,
//! `poll` for a received one. The link fragments on the way out and hands
//! over the reassembly buffer on the way in.

use super::engine::{LinkError, WinotLink};
use crate::radio::RadioService;

/// Packet transport over a WiNoT link.
pub trait Transport {
    /// Transmit one frame. Returns the number of bytes accepted.
    fn send(&mut self, data: &[u8]) -> Result<usize, LinkError>;

    /// Copy the pending frame into `out` and release the buffer.
    ///
    /// Returns `Ok(None)` when no frame is ready. If `out` is too small the
    /// frame stays pending and [`LinkError::BufferTooSmall`] is returned.
    fn poll(&mut self, out: &mut [u8]) -> Result<Option<usize>, LinkError>;
}

impl<R: RadioService> Transport for WinotLink<R> {
    fn send(&mut self, data: &[u8]) -> Result<usize, LinkError> {
        self.transmit_frame(data)
    }

    fn poll(&mut self, out: &mut [u8]) -> Result<Option<usize>, LinkError> {
        let Some(frame) = self.frame() else {
            return Ok(None);
        };
        let len = frame.len();
        if out.len() < len {
            return Err(LinkError::BufferTooSmall {
                needed: len,
                available: out.len(),
            });
        }
        out[..len].copy_from_slice(frame);
        self.release_frame()?;
        Ok(Some(len))
    }
}
