//! WiNoT link layer.
//!
//! A star network of one access point and up to
//! [`WINOT_AP_CLIENTS_MAX`](crate::WINOT_AP_CLIENTS_MAX) clients over a
//! packet radio. Upper-layer frames of up to 1600 bytes are split into
//! fragments of at most 250 bytes and reassembled into a single fixed buffer
//! on the receiving side.
//!
//! # Layout
//!
//! - [`frame`]: radio frame encoding and outbound fragmentation
//! - [`state`]: roles and the link state machine
//! - [`reassembly`]: the bounds-checked reassembly buffer
//! - [`liveness`]: the access point's client table
//! - [`engine`]: [`WinotLink`], tying the above to a radio
//! - [`transport`]: the send/poll adapter for the network stack
//! - [`shared`]: a mutex handle for split interrupt/main-loop contexts
//!
//! # Example
//!
//! ```
//! use winot::link::{ClientId, Role, Transport, WinotLink};
//! use winot::radio::SimAir;
//! use winot::LinkConfig;
//!
//! let air = SimAir::new();
//! let mut ap = WinotLink::new(air.attach(1), LinkConfig::default()).unwrap();
//! let mut client = WinotLink::new(air.attach(2), LinkConfig::default()).unwrap();
//! ap.initialize(Role::AccessPoint, 0).unwrap();
//! client.initialize(Role::Client, 0).unwrap();
//!
//! let mut air_rx = air.subscribe();
//! client.request_join(ClientId::new([1, 2, 3, 4]), 250).unwrap();
//! let join = air_rx.try_recv().unwrap();
//! ap.on_radio_frame(&join.data);
//! ap.on_tick(1);
//! ap.begin_communicating().unwrap();
//!
//! client.on_tick(1);
//! client.send(b"hello").unwrap();
//! let hello = air_rx.try_recv().unwrap();
//! ap.on_radio_frame(&hello.data);
//!
//! let mut out = [0u8; 1600];
//! assert_eq!(ap.poll(&mut out).unwrap(), Some(5));
//! assert_eq!(&out[..5], b"hello");
//! ```

pub mod engine;
pub mod frame;
pub mod liveness;
pub mod reassembly;
pub mod shared;
pub mod state;
pub mod transport;

pub use engine::{LinkError, RejectReason, RxOutcome, WinotLink};
pub use frame::{
    fragment, fragment_count, ClientId, Control, FragmentError, FragmentKind, FragmentRef,
    Fragments, JoinRequest, RadioFrame,
};
pub use liveness::{ClientLivenessTable, ClientSlot, TableFull};
pub use reassembly::{FrameLength, Overrun, ReassemblyBuffer};
pub use shared::SharedLink;
pub use state::{BufferOwner, LinkState, Role, TransitionError};
pub use transport::Transport;
