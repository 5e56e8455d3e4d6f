//! WiNoT link layer.
//!
//! Carries Ethernet-sized frames between one access point and up to 32
//! clients over a low-power packet radio. The link splits frames into 250-byte
//! fragments, reassembles them in a fixed 1600-byte buffer inside the receive
//! interrupt, and tracks client liveness on the access point.
//!
//! The engine is hardware independent: it talks to the radio through
//! [`radio::RadioService`], and the host build ships a simulated medium
//! ([`radio::SimAir`]) used by the tests and the `sim-node` binary.

// Allow the crate to reference itself by name (needed for proc-macro generated code)
extern crate self as winot;

pub mod config;
pub mod link;
pub mod radio;
pub mod stats;
#[cfg(feature = "tap-tests")]
pub mod testing;

// Re-export commonly used items
pub use config::{
    ConfigError, LinkConfig, WINOT_AP_ACCESSADDRESS, WINOT_AP_CHANNEL, WINOT_AP_CLIENTS_MAX,
    WINOT_DATA_BUF_SIZE, WINOT_FRAGMENT_SIZE,
};
pub use link::{ClientId, LinkError, LinkState, Role, RxOutcome, SharedLink, Transport, WinotLink};
pub use radio::{PhyRate, RadioService, RadioTarget};
pub use stats::{LinkStats, StatsServer};

#[cfg(feature = "tap-tests")]
pub use testing::TestRunner;
