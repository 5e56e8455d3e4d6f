//! Radio service abstraction.
//!
//! The link engine never talks to radio hardware directly. It depends on a
//! [`RadioService`], which on the board wraps the vendor radio driver and on
//! the host is the simulated medium in [`sim`].
//!
//! Receive events flow the other way: the radio's receive interrupt calls
//! [`WinotLink::on_radio_frame`](crate::WinotLink::on_radio_frame) with the
//! received bytes, which are only valid for the duration of that call.

mod sim;

pub use sim::{AirFrame, SimAir, SimRadio, SimRadioError};

use serde::Deserialize;
use std::fmt;

/// Largest radio frame on air: 2 header bytes plus one full fragment.
pub const RADIO_FRAME_MAX: usize = 2 + crate::config::WINOT_FRAGMENT_SIZE;

/// PHY modulation rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
pub enum PhyRate {
    /// 1 Mbit/s uncoded.
    #[serde(rename = "1M")]
    Phy1M,
    /// 2 Mbit/s uncoded.
    #[serde(rename = "2M")]
    Phy2M,
    /// Coded PHY, 2 symbols per bit.
    #[serde(rename = "S2")]
    PhyS2,
    /// Coded PHY, 8 symbols per bit.
    #[serde(rename = "S8")]
    PhyS8,
}

impl fmt::Display for PhyRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Phy1M => "1M",
            Self::Phy2M => "2M",
            Self::PhyS2 => "S2",
            Self::PhyS8 => "S8",
        };
        f.write_str(name)
    }
}

/// Where the radio listens or transmits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RadioTarget {
    /// Access address (logical network identifier).
    pub access_address: u32,
    /// Radio channel.
    pub channel: u8,
    /// PHY rate.
    pub phy_rate: PhyRate,
}

impl fmt::Display for RadioTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:08x}/ch{}/{}",
            self.access_address, self.channel, self.phy_rate
        )
    }
}

/// Services the link engine needs from the radio.
///
/// Implementations must not call back into the link from these methods.
pub trait RadioService {
    /// Driver error type.
    type Error: std::error::Error;

    /// Power up the radio at the given transmit power (dBm).
    fn init(&mut self, tx_power: i8) -> Result<(), Self::Error>;

    /// Arm receive mode on the given target. Received frames are delivered
    /// through the receive interrupt.
    fn set_receive_mode(&mut self, target: RadioTarget) -> Result<(), Self::Error>;

    /// Transmit one radio frame (at most [`RADIO_FRAME_MAX`] bytes).
    fn transmit(&mut self, target: RadioTarget, frame: &[u8]) -> Result<(), Self::Error>;
}
