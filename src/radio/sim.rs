//! Simulated radio medium for host runs and tests.
//!
//! [`SimAir`] is a broadcast medium; every [`SimRadio`] attached to it sees
//! every frame transmitted by the others. Address filtering, which the real
//! radio does in hardware, is done by [`SimRadio::accepts`].
//!
//! Like the real transceiver the simulated radio is half-duplex: a
//! transmission drops it out of receive mode until it is re-armed.

use super::{RadioService, RadioTarget, RADIO_FRAME_MAX};
use log::trace;
use std::fmt;
use tokio::sync::broadcast;

/// Frames the medium buffers per receiver before old ones are overwritten.
const AIR_CAPACITY: usize = 64;

/// A frame in flight on the simulated medium.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AirFrame {
    /// Station that transmitted the frame.
    pub from: u32,
    /// Where it was transmitted.
    pub target: RadioTarget,
    /// Raw frame bytes.
    pub data: Vec<u8>,
}

/// Shared simulated medium.
#[derive(Debug, Clone)]
pub struct SimAir {
    tx: broadcast::Sender<AirFrame>,
}

impl SimAir {
    /// Create an empty medium.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(AIR_CAPACITY);
        Self { tx }
    }

    /// Attach a new radio with the given station number.
    pub fn attach(&self, station: u32) -> SimRadio {
        SimRadio {
            station,
            tx: self.tx.clone(),
            rx: None,
            tx_power: None,
            frames_sent: 0,
        }
    }

    /// Listen to everything transmitted on the medium from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<AirFrame> {
        self.tx.subscribe()
    }
}

impl Default for SimAir {
    fn default() -> Self {
        Self::new()
    }
}

/// One radio attached to a [`SimAir`].
#[derive(Debug)]
pub struct SimRadio {
    station: u32,
    tx: broadcast::Sender<AirFrame>,
    rx: Option<RadioTarget>,
    tx_power: Option<i8>,
    frames_sent: usize,
}

impl SimRadio {
    /// Station number of this radio.
    pub fn station(&self) -> u32 {
        self.station
    }

    /// Current receive target, if armed.
    pub fn receive_target(&self) -> Option<RadioTarget> {
        self.rx
    }

    /// Number of frames transmitted so far.
    pub fn frames_sent(&self) -> usize {
        self.frames_sent
    }

    /// Whether the hardware filter would deliver `frame` to this radio.
    pub fn accepts(&self, frame: &AirFrame) -> bool {
        frame.from != self.station && self.rx == Some(frame.target)
    }
}

impl RadioService for SimRadio {
    type Error = SimRadioError;

    fn init(&mut self, tx_power: i8) -> Result<(), Self::Error> {
        self.tx_power = Some(tx_power);
        self.rx = None;
        Ok(())
    }

    fn set_receive_mode(&mut self, target: RadioTarget) -> Result<(), Self::Error> {
        if self.tx_power.is_none() {
            return Err(SimRadioError::NotInitialized);
        }
        trace!("station {} rx on {}", self.station, target);
        self.rx = Some(target);
        Ok(())
    }

    fn transmit(&mut self, target: RadioTarget, frame: &[u8]) -> Result<(), Self::Error> {
        if self.tx_power.is_none() {
            return Err(SimRadioError::NotInitialized);
        }
        if frame.is_empty() {
            return Err(SimRadioError::EmptyFrame);
        }
        if frame.len() > RADIO_FRAME_MAX {
            return Err(SimRadioError::FrameTooLarge {
                size: frame.len(),
                max: RADIO_FRAME_MAX,
            });
        }

        self.rx = None;
        self.frames_sent += 1;
        // Nobody listening is not an error on a radio medium.
        let _ = self.tx.send(AirFrame {
            from: self.station,
            target,
            data: frame.to_vec(),
        });
        Ok(())
    }
}

/// Simulated radio errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimRadioError {
    /// `init` has not been called.
    NotInitialized,
    /// Zero-length frame.
    EmptyFrame,
    /// Frame longer than the radio accepts.
    FrameTooLarge { size: usize, max: usize },
}

impl fmt::Display for SimRadioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotInitialized => write!(f, "radio not initialized"),
            Self::EmptyFrame => write!(f, "empty frame"),
            Self::FrameTooLarge { size, max } => {
                write!(f, "frame too large: {} bytes (max {})", size, max)
            }
        }
    }
}

impl std::error::Error for SimRadioError {}
