//! The WiNoT link engine.
//!
//! [`WinotLink`] owns the reassembly buffer, the state machine and the client
//! table. It has two entry points driven from outside:
//!
//! - [`WinotLink::on_radio_frame`] runs in receive-interrupt context. It never
//!   allocates, never blocks and logs at `trace` only.
//! - [`WinotLink::on_tick`] runs from the main loop and finishes the work the
//!   interrupt path deferred: negotiation, join completion and liveness scans.

use super::frame::{
    fragment, ClientId, FragmentError, FragmentKind, FragmentRef, JoinRequest, RadioFrame,
};
use super::liveness::ClientLivenessTable;
use super::reassembly::{FrameLength, Overrun, ReassemblyBuffer};
use super::state::{BufferOwner, LinkState, Role, TransitionError};
use crate::config::{ConfigError, LinkConfig, TX_POWER_RANGE};
use crate::radio::{RadioService, RadioTarget};
use crate::stats::{bump, LinkStats};
use log::{debug, info, trace, warn};
use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::Arc;

/// What a single radio receive event did.
///
/// Diagnostic only; the upper layer learns about frames through the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxOutcome {
    /// Not accepted in the current role and state.
    Ignored,
    /// A join request was captured; negotiation finishes on the next tick.
    JoinCaptured(ClientId),
    /// A leading or intermediate fragment was stored.
    FragmentStored { index: u8 },
    /// A terminal or unfragmented fragment completed a frame.
    FrameComplete { len: usize },
    /// The frame was dropped without touching buffer or state.
    Rejected(RejectReason),
}

/// Why a received frame was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Header could not be decoded.
    Malformed(FragmentError),
    /// Payload would run past the reassembly buffer.
    Overrun(Overrun),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed(e) => write!(f, "malformed: {}", e),
            Self::Overrun(e) => write!(f, "overrun: {}", e),
        }
    }
}

/// Link API errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    /// The current state does not allow the operation.
    InvalidTransition(TransitionError),
    /// The operation belongs to the other role.
    WrongRole { expected: Role },
    /// `initialize` has not been called.
    NotInitialized,
    /// `initialize` was already called.
    AlreadyInitialized,
    /// Radio driver failure.
    Radio(String),
    /// Outbound frame could not be fragmented.
    Fragment(FragmentError),
    /// Caller's buffer cannot hold the pending frame.
    BufferTooSmall { needed: usize, available: usize },
    /// Sending requires the data phase.
    NotCommunicating(LinkState),
    /// The access point has no registered client.
    NoClients,
    /// Invalid configuration.
    Config(ConfigError),
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidTransition(e) => write!(f, "invalid transition: {}", e),
            Self::WrongRole { expected } => write!(f, "operation requires role {}", expected),
            Self::NotInitialized => write!(f, "link not initialized"),
            Self::AlreadyInitialized => write!(f, "link already initialized"),
            Self::Radio(msg) => write!(f, "radio error: {}", msg),
            Self::Fragment(e) => write!(f, "fragmentation error: {}", e),
            Self::BufferTooSmall { needed, available } => write!(
                f,
                "buffer too small: frame is {} bytes, buffer holds {}",
                needed, available
            ),
            Self::NotCommunicating(state) => write!(f, "cannot send in state {}", state),
            Self::NoClients => write!(f, "no registered clients"),
            Self::Config(e) => write!(f, "config error: {}", e),
        }
    }
}

impl std::error::Error for LinkError {}

impl From<TransitionError> for LinkError {
    fn from(e: TransitionError) -> Self {
        Self::InvalidTransition(e)
    }
}

impl From<FragmentError> for LinkError {
    fn from(e: FragmentError) -> Self {
        Self::Fragment(e)
    }
}

impl From<ConfigError> for LinkError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

fn radio_error<E: std::error::Error>(e: E) -> LinkError {
    LinkError::Radio(e.to_string())
}

/// One WiNoT link endpoint bound to a radio.
pub struct WinotLink<R: RadioService> {
    config: LinkConfig,
    radio: R,
    role: Option<Role>,
    state: LinkState,
    buffer: ReassemblyBuffer,
    clients: ClientLivenessTable,
    active_client: Option<ClientId>,
    /// Frame in the buffer completed with a gap in its fragment run.
    incomplete: bool,
    /// Radio was last left in receive mode.
    rx_armed: bool,
    current_tick: u32,
    now_ms: u64,
    joined_at_ms: u64,
    stats: Arc<LinkStats>,
}

impl<R: RadioService> WinotLink<R> {
    /// Create an uninitialized link.
    pub fn new(radio: R, config: LinkConfig) -> Result<Self, LinkError> {
        Self::with_stats(radio, config, Arc::new(LinkStats::default()))
    }

    /// Create an uninitialized link reporting into `stats`.
    pub fn with_stats(
        radio: R,
        config: LinkConfig,
        stats: Arc<LinkStats>,
    ) -> Result<Self, LinkError> {
        config.validate()?;
        Ok(Self {
            config,
            radio,
            role: None,
            state: LinkState::Idle,
            buffer: ReassemblyBuffer::new(),
            clients: ClientLivenessTable::new(),
            active_client: None,
            incomplete: false,
            rx_armed: false,
            current_tick: 0,
            now_ms: 0,
            joined_at_ms: 0,
            stats,
        })
    }

    /// Power up the radio and enter the role's first state.
    ///
    /// An access point starts listening for joins on the configured target;
    /// a client stays idle until [`request_join`](Self::request_join).
    pub fn initialize(&mut self, role: Role, tx_power: i8) -> Result<LinkState, LinkError> {
        if self.role.is_some() {
            return Err(LinkError::AlreadyInitialized);
        }
        if !TX_POWER_RANGE.contains(&tx_power) {
            return Err(ConfigError::TxPowerOutOfRange(tx_power).into());
        }
        let next = self.state.on_init(role)?;

        self.radio.init(tx_power).map_err(radio_error)?;
        if role == Role::AccessPoint {
            self.radio
                .set_receive_mode(self.config.radio_target())
                .map_err(radio_error)?;
            self.rx_armed = true;
        }

        self.role = Some(role);
        self.state = next;
        info!(
            "WiNoT {} initialized on {} at {} dBm",
            role,
            self.config.radio_target(),
            tx_power
        );
        Ok(self.state)
    }

    /// Receive hook. Call once per radio receive event with the frame bytes.
    pub fn on_radio_frame(&mut self, frame: &[u8]) -> RxOutcome {
        if self.state.buffer_owner() != BufferOwner::Engine {
            return self.ignore(frame);
        }
        match (self.role, self.state) {
            (Some(Role::AccessPoint), LinkState::Listening) => self.capture_join(frame),
            (Some(_), LinkState::Communicating) => self.store_fragment(frame),
            _ => self.ignore(frame),
        }
    }

    fn ignore(&self, frame: &[u8]) -> RxOutcome {
        bump(&self.stats.rx.ignored);
        trace!("ignoring {} byte frame in state {}", frame.len(), self.state);
        RxOutcome::Ignored
    }

    fn capture_join(&mut self, frame: &[u8]) -> RxOutcome {
        let request = match JoinRequest::parse(frame) {
            Ok(request) => request,
            Err(e) => return self.reject(RejectReason::Malformed(e)),
        };
        let next = match self.state.on_join() {
            Ok(next) => next,
            Err(_) => return RxOutcome::Ignored,
        };
        if let Err(e) = self.buffer.write_at(0, &request.to_bytes()) {
            return self.reject(RejectReason::Overrun(e));
        }
        self.buffer
            .set_len(FrameLength::new(request.declared_len as usize).unwrap_or(FrameLength::UNSET));
        self.joined_at_ms = self.now_ms;
        self.state = next;
        trace!("join captured from {}", request.client_id);
        RxOutcome::JoinCaptured(request.client_id)
    }

    fn store_fragment(&mut self, frame: &[u8]) -> RxOutcome {
        let fragment = match FragmentRef::parse(frame) {
            Ok(fragment) => fragment,
            Err(e) => return self.reject(RejectReason::Malformed(e)),
        };
        let index = fragment.control.index();
        let offset = fragment.offset();
        match self.buffer.store(index, offset, fragment.payload) {
            Ok(true) => {
                bump(&self.stats.rx.discarded);
                trace!("partial frame discarded, fragment {} starts a new one", index);
            }
            Ok(false) => {}
            Err(e) => return self.reject(RejectReason::Overrun(e)),
        }
        bump(&self.stats.rx.fragments);

        if fragment.kind() == FragmentKind::Intermediate {
            trace!("fragment {} stored at {}", index, offset);
            return RxOutcome::FragmentStored { index };
        }

        // store already proved offset + len fits the buffer.
        let len = offset + fragment.payload.len();
        let Some(frame_len) = FrameLength::new(len) else {
            return self.reject(RejectReason::Overrun(Overrun {
                offset,
                len: fragment.payload.len(),
            }));
        };
        let Ok(next) = self.state.on_frame_complete() else {
            return RxOutcome::Ignored;
        };

        self.incomplete = !self.buffer.is_contiguous_to(index);
        if self.incomplete {
            bump(&self.stats.rx.incomplete);
        }
        self.buffer.set_len(frame_len);
        self.state = next;
        bump(&self.stats.rx.frames);

        if let Some(id) = self.active_client {
            self.clients.touch(id, self.current_tick, self.now_ms);
        }
        trace!("frame complete, {} bytes", len);
        RxOutcome::FrameComplete { len }
    }

    fn reject(&self, reason: RejectReason) -> RxOutcome {
        bump(&self.stats.rx.rejected);
        trace!("fragment rejected: {}", reason);
        RxOutcome::Rejected(reason)
    }

    /// Periodic driver. `elapsed_ms` is the time since the previous tick.
    ///
    /// Finishes a pending negotiation or join and runs the liveness scan
    /// every `liveness_scan_interval_ticks` ticks. A radio left out of
    /// receive mode by a failed re-arm is armed again. Failures are logged
    /// and never stop the driver.
    pub fn on_tick(&mut self, elapsed_ms: u32) -> LinkState {
        self.current_tick = self.current_tick.wrapping_add(1);
        self.now_ms = self.now_ms.saturating_add(u64::from(elapsed_ms));

        let result = match self.state {
            LinkState::Negotiating => self.complete_negotiation(),
            LinkState::Requesting => self.complete_request(),
            _ => Ok(()),
        };
        if let Err(e) = result {
            warn!("tick in state {} failed: {}", self.state, e);
        }

        if self.role == Some(Role::AccessPoint)
            && self.current_tick % self.config.liveness_scan_interval_ticks == 0
        {
            if let Err(e) = self.scan_liveness() {
                warn!("liveness scan failed: {}", e);
            }
        }

        if !self.rx_armed && self.state.expects_receive() {
            match self.arm_receive() {
                Ok(()) => debug!("receive re-armed in state {}", self.state),
                Err(e) => warn!("re-arming receive failed: {}", e),
            }
        }
        self.state
    }

    fn complete_negotiation(&mut self) -> Result<(), LinkError> {
        let waited = self.now_ms.saturating_sub(self.joined_at_ms);
        let request = JoinRequest::parse(self.buffer.identity_header())?;

        if waited > u64::from(self.config.negotiation_timeout_ms) {
            warn!(
                "negotiation with {} timed out after {} ms, discarding",
                request.client_id, waited
            );
            bump(&self.stats.clients.negotiation_timeouts);
        } else {
            info!(
                "client uuid: {}, len={}",
                request.client_id, request.declared_len
            );
            match self.clients.register(
                request.client_id,
                request.declared_len,
                self.current_tick,
                self.now_ms,
            ) {
                Ok(slot) => {
                    debug!("client {} registered in slot {}", request.client_id, slot);
                    self.active_client = Some(request.client_id);
                    bump(&self.stats.clients.joins);
                }
                Err(e) => {
                    warn!("rejecting client {}: {}", request.client_id, e);
                    bump(&self.stats.clients.joins_rejected);
                }
            }
            self.publish_client_count();
        }

        self.buffer.clear();
        self.state = self.state.on_negotiated()?;
        self.arm_receive()
    }

    fn complete_request(&mut self) -> Result<(), LinkError> {
        self.state = self.state.on_joined()?;
        self.buffer.clear();
        self.arm_receive()?;
        info!("joined access point on {}", self.config.radio_target());
        Ok(())
    }

    fn scan_liveness(&mut self) -> Result<(), LinkError> {
        let timeout_ms = u64::from(self.config.client_timeout_ms);
        let stats = &self.stats;
        let evicted = self.clients.evict_silent(self.now_ms, timeout_ms, |slot| {
            info!(
                "client {} silent since tick {}, evicting",
                slot.id, slot.last_contact_tick
            );
            bump(&stats.clients.evicted);
        });
        if evicted == 0 && !self.clients.is_empty() {
            return Ok(());
        }

        if let Some(id) = self.active_client {
            if !self.clients.contains(id) {
                self.active_client = None;
            }
        }
        self.publish_client_count();

        if self.clients.is_empty() && self.state == LinkState::Communicating {
            self.state = self.state.on_all_clients_lost()?;
            self.buffer.clear();
            self.arm_receive()?;
            info!("all clients lost, listening for joins");
        }
        Ok(())
    }

    fn publish_client_count(&self) {
        self.stats
            .clients
            .active
            .store(self.clients.len(), Ordering::Relaxed);
    }

    fn arm_receive(&mut self) -> Result<(), LinkError> {
        let result = self
            .radio
            .set_receive_mode(self.config.radio_target())
            .map_err(radio_error);
        self.rx_armed = result.is_ok();
        result
    }

    fn require_role(&self, expected: Role) -> Result<(), LinkError> {
        match self.role {
            None => Err(LinkError::NotInitialized),
            Some(role) if role == expected => Ok(()),
            Some(_) => Err(LinkError::WrongRole { expected }),
        }
    }

    /// Open the data phase on an access point with at least one client.
    pub fn begin_communicating(&mut self) -> Result<LinkState, LinkError> {
        self.require_role(Role::AccessPoint)?;
        if self.clients.is_empty() {
            return Err(LinkError::NoClients);
        }
        self.state = self.state.on_open()?;
        self.buffer.clear();
        self.arm_receive()?;
        info!("communicating with {} client(s)", self.clients.len());
        Ok(self.state)
    }

    /// Send a join request as a client. The next tick opens the data phase.
    pub fn request_join(
        &mut self,
        client_id: ClientId,
        declared_len: u8,
    ) -> Result<LinkState, LinkError> {
        self.require_role(Role::Client)?;
        let next = self.state.on_request()?;
        let request = JoinRequest {
            client_id,
            declared_len,
        };
        self.rx_armed = false;
        self.radio
            .transmit(self.config.radio_target(), RadioFrame::join(&request).as_bytes())
            .map_err(radio_error)?;
        self.state = next;
        debug!("join request sent as {}", client_id);
        Ok(self.state)
    }

    /// The pending frame, if one is ready.
    pub fn frame(&self) -> Option<&[u8]> {
        match self.state.buffer_owner() {
            BufferOwner::Adapter => self.buffer.frame(),
            _ => None,
        }
    }

    /// Hand the buffer back to the receive path after draining a frame.
    pub fn release_frame(&mut self) -> Result<LinkState, LinkError> {
        self.state = self.state.on_release()?;
        if self.incomplete {
            debug!(
                "released frame of {} bytes with missing fragments",
                self.buffer.len()
            );
            self.incomplete = false;
        }
        self.buffer.clear();
        Ok(self.state)
    }

    /// Fragment `data` and transmit it, then re-arm receive.
    pub(super) fn transmit_frame(&mut self, data: &[u8]) -> Result<usize, LinkError> {
        if !matches!(
            self.state,
            LinkState::Communicating | LinkState::FrameReady
        ) {
            return Err(LinkError::NotCommunicating(self.state));
        }
        let fragments = fragment(data)?;
        let count = fragments.len();
        let target = self.config.radio_target();

        self.rx_armed = false;
        for radio_frame in fragments {
            if let Err(e) = self.radio.transmit(target, radio_frame.as_bytes()) {
                bump(&self.stats.tx.errors);
                let err = radio_error(e);
                if let Err(rearm) = self.arm_receive() {
                    warn!("failed to re-arm receive: {}", rearm);
                }
                return Err(err);
            }
            bump(&self.stats.tx.fragments);
        }
        bump(&self.stats.tx.frames);
        self.arm_receive()?;
        debug!("sent {} bytes in {} fragment(s)", data.len(), count);
        Ok(data.len())
    }

    /// Current state.
    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Role, once initialized.
    pub fn role(&self) -> Option<Role> {
        self.role
    }

    /// Configuration in use.
    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Radio target the link listens and transmits on.
    pub fn radio_target(&self) -> RadioTarget {
        self.config.radio_target()
    }

    /// The radio.
    pub fn radio(&self) -> &R {
        &self.radio
    }

    /// The radio, mutably.
    pub fn radio_mut(&mut self) -> &mut R {
        &mut self.radio
    }

    /// Whether the radio was left in receive mode.
    pub fn receive_armed(&self) -> bool {
        self.rx_armed
    }

    /// Registered clients (access point only).
    pub fn clients(&self) -> &ClientLivenessTable {
        &self.clients
    }

    /// Most recently negotiated client.
    pub fn active_client(&self) -> Option<ClientId> {
        self.active_client
    }

    /// Statistics handle.
    pub fn stats(&self) -> &Arc<LinkStats> {
        &self.stats
    }

    /// Ticks seen so far.
    pub fn current_tick(&self) -> u32 {
        self.current_tick
    }

    /// Length recorded in the reassembly buffer.
    pub fn frame_length(&self) -> FrameLength {
        self.buffer.len()
    }
}

impl<R: RadioService> fmt::Debug for WinotLink<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WinotLink")
            .field("role", &self.role)
            .field("state", &self.state)
            .field("buffer", &self.buffer)
            .field("clients", &self.clients.len())
            .field("current_tick", &self.current_tick)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::frame::{Control, RadioFrame};
    use crate::radio::{SimAir, SimRadio, SimRadioError};

    fn data_frame(index: u8, more: bool, payload: &[u8]) -> Vec<u8> {
        RadioFrame::data(Control::new(index, more), payload)
            .unwrap()
            .as_bytes()
            .to_vec()
    }

    fn join_frame(id: [u8; 4], len: u8) -> Vec<u8> {
        RadioFrame::join(&JoinRequest {
            client_id: ClientId::new(id),
            declared_len: len,
        })
        .as_bytes()
        .to_vec()
    }

    fn test_config() -> LinkConfig {
        LinkConfig {
            negotiation_timeout_ms: 50,
            client_timeout_ms: 1_000,
            liveness_scan_interval_ticks: 10,
            ..Default::default()
        }
    }

    fn access_point() -> WinotLink<SimRadio> {
        let air = SimAir::new();
        let mut link = WinotLink::new(air.attach(1), test_config()).unwrap();
        link.initialize(Role::AccessPoint, 0).unwrap();
        link
    }

    /// Access point with one registered client, in the data phase.
    fn communicating_ap() -> WinotLink<SimRadio> {
        let mut link = access_point();
        link.on_radio_frame(&join_frame([1, 2, 3, 4], 64));
        link.on_tick(1);
        link.begin_communicating().unwrap();
        link
    }

    fn client() -> WinotLink<SimRadio> {
        let air = SimAir::new();
        let mut link = WinotLink::new(air.attach(2), test_config()).unwrap();
        link.initialize(Role::Client, 0).unwrap();
        link.request_join(ClientId::new([9, 9, 9, 9]), 250).unwrap();
        link.on_tick(1);
        link
    }

    #[test]
    fn test_initialize_by_role() {
        let air = SimAir::new();
        let mut ap = WinotLink::new(air.attach(1), LinkConfig::default()).unwrap();
        assert_eq!(ap.initialize(Role::AccessPoint, 0), Ok(LinkState::Listening));
        assert_eq!(ap.radio().receive_target(), Some(ap.radio_target()));
        assert_eq!(
            ap.initialize(Role::AccessPoint, 0),
            Err(LinkError::AlreadyInitialized)
        );

        let mut cl = WinotLink::new(air.attach(2), LinkConfig::default()).unwrap();
        assert_eq!(cl.initialize(Role::Client, 0), Ok(LinkState::Idle));
        assert_eq!(cl.radio().receive_target(), None);
    }

    #[test]
    fn test_initialize_rejects_tx_power() {
        let air = SimAir::new();
        let mut link = WinotLink::new(air.attach(1), LinkConfig::default()).unwrap();
        assert_eq!(
            link.initialize(Role::Client, 30),
            Err(LinkError::Config(ConfigError::TxPowerOutOfRange(30)))
        );
        assert_eq!(link.role(), None);
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let air = SimAir::new();
        let config = LinkConfig {
            channel: 99,
            ..Default::default()
        };
        assert!(matches!(
            WinotLink::new(air.attach(1), config),
            Err(LinkError::Config(ConfigError::ChannelOutOfRange { .. }))
        ));
    }

    #[test]
    fn test_three_fragment_frame_790() {
        let mut link = communicating_ap();
        let a = [0xA1; 250];
        let b = [0xB2; 250];
        let c = [0xC3; 40];

        assert_eq!(
            link.on_radio_frame(&data_frame(1, true, &a)),
            RxOutcome::FragmentStored { index: 1 }
        );
        assert_eq!(
            link.on_radio_frame(&data_frame(2, true, &b)),
            RxOutcome::FragmentStored { index: 2 }
        );
        assert_eq!(link.state(), LinkState::Communicating);
        assert_eq!(
            link.on_radio_frame(&data_frame(3, false, &c)),
            RxOutcome::FrameComplete { len: 790 }
        );
        assert_eq!(link.state(), LinkState::FrameReady);
        assert_eq!(link.frame_length(), FrameLength::new(790).unwrap());

        let frame = link.frame().unwrap();
        assert!(frame[..250].iter().all(|&x| x == 0));
        assert_eq!(&frame[250..500], &a[..]);
        assert_eq!(&frame[500..750], &b[..]);
        assert_eq!(&frame[750..790], &c[..]);
        // Starting at index 1 is a complete run.
        assert_eq!(link.stats().snapshot().rx.incomplete, 0);
    }

    #[test]
    fn test_unfragmented_64() {
        let mut link = communicating_ap();
        let payload: Vec<u8> = (0..64).collect();
        assert_eq!(
            link.on_radio_frame(&data_frame(0, false, &payload)),
            RxOutcome::FrameComplete { len: 64 }
        );
        assert_eq!(link.state(), LinkState::FrameReady);
        assert_eq!(link.frame(), Some(&payload[..]));
    }

    #[test]
    fn test_gap_counts_incomplete() {
        let mut link = communicating_ap();
        link.on_radio_frame(&data_frame(0, true, &[1; 250]));
        link.on_radio_frame(&data_frame(2, false, &[3; 10]));
        assert_eq!(link.state(), LinkState::FrameReady);
        assert_eq!(link.stats().snapshot().rx.incomplete, 1);
        assert_eq!(link.release_frame(), Ok(LinkState::Communicating));
    }

    #[test]
    fn test_overrun_rejected_without_write() {
        let mut link = communicating_ap();

        // Index 7 starts at 1750.
        assert!(matches!(
            link.on_radio_frame(&data_frame(7, false, &[0xEE])),
            RxOutcome::Rejected(RejectReason::Overrun(_))
        ));
        assert_eq!(link.state(), LinkState::Communicating);

        // Index 6 holds exactly 100 bytes.
        assert!(matches!(
            link.on_radio_frame(&data_frame(6, false, &[0xEE; 101])),
            RxOutcome::Rejected(RejectReason::Overrun(_))
        ));
        assert_eq!(link.state(), LinkState::Communicating);
        assert_eq!(link.frame_length(), FrameLength::UNSET);

        assert_eq!(
            link.on_radio_frame(&data_frame(6, false, &[0xEE; 100])),
            RxOutcome::FrameComplete { len: 1600 }
        );
        assert_eq!(link.stats().snapshot().rx.rejected, 2);
    }

    #[test]
    fn test_malformed_rejected() {
        let mut link = communicating_ap();
        assert_eq!(
            link.on_radio_frame(&[0x00]),
            RxOutcome::Rejected(RejectReason::Malformed(FragmentError::TooShort))
        );
        assert_eq!(
            link.on_radio_frame(&[0x00, 10, 1, 2]),
            RxOutcome::Rejected(RejectReason::Malformed(FragmentError::LengthMismatch {
                declared: 10,
                available: 2
            }))
        );
        assert_eq!(link.state(), LinkState::Communicating);
    }

    #[test]
    fn test_frames_ignored_outside_accepting_states() {
        let air = SimAir::new();
        let mut link = WinotLink::new(air.attach(1), test_config()).unwrap();
        assert_eq!(
            link.on_radio_frame(&data_frame(0, false, &[1])),
            RxOutcome::Ignored
        );

        let mut link = communicating_ap();
        link.on_radio_frame(&data_frame(0, false, &[1, 2, 3]));
        assert_eq!(link.state(), LinkState::FrameReady);
        assert_eq!(
            link.on_radio_frame(&data_frame(0, false, &[9, 9])),
            RxOutcome::Ignored
        );
        assert_eq!(link.frame(), Some(&[1u8, 2, 3][..]));

        // Idle client ignores everything, including join-shaped frames.
        let mut cl = WinotLink::new(air.attach(3), test_config()).unwrap();
        cl.initialize(Role::Client, 0).unwrap();
        assert_eq!(
            cl.on_radio_frame(&join_frame([1, 1, 1, 1], 5)),
            RxOutcome::Ignored
        );
        assert_eq!(cl.state(), LinkState::Idle);
    }

    #[test]
    fn test_join_then_tick_registers_client() {
        let mut link = access_point();
        assert_eq!(
            link.on_radio_frame(&join_frame([0xDE, 0xAD, 0xBE, 0xEF], 128)),
            RxOutcome::JoinCaptured(ClientId::new([0xDE, 0xAD, 0xBE, 0xEF]))
        );
        assert_eq!(link.state(), LinkState::Negotiating);
        assert_eq!(link.frame_length(), FrameLength::new(128).unwrap());
        assert_eq!(link.frame(), None);

        // Further frames wait for the tick.
        assert_eq!(
            link.on_radio_frame(&join_frame([1, 1, 1, 1], 1)),
            RxOutcome::Ignored
        );

        assert_eq!(link.on_tick(1), LinkState::Listening);
        let id = ClientId::new([0xDE, 0xAD, 0xBE, 0xEF]);
        assert!(link.clients().contains(id));
        assert_eq!(link.clients().get(id).unwrap().declared_len, 128);
        assert_eq!(link.active_client(), Some(id));
        assert_eq!(link.stats().snapshot().clients.active, 1);
        assert_eq!(link.radio().receive_target(), Some(link.radio_target()));
    }

    #[test]
    fn test_short_join_rejected() {
        let mut link = access_point();
        assert_eq!(
            link.on_radio_frame(&[1, 2, 3, 4]),
            RxOutcome::Rejected(RejectReason::Malformed(FragmentError::TooShort))
        );
        assert_eq!(link.state(), LinkState::Listening);
    }

    #[test]
    fn test_negotiation_timeout_discards_join() {
        let mut link = access_point();
        link.on_radio_frame(&join_frame([5, 5, 5, 5], 10));
        assert_eq!(link.on_tick(51), LinkState::Listening);
        assert!(link.clients().is_empty());
        assert_eq!(link.active_client(), None);
        assert_eq!(link.stats().snapshot().clients.negotiation_timeouts, 1);
        assert_eq!(link.begin_communicating(), Err(LinkError::NoClients));
    }

    #[test]
    fn test_begin_communicating_checks() {
        let air = SimAir::new();
        let mut link = WinotLink::new(air.attach(1), test_config()).unwrap();
        assert_eq!(link.begin_communicating(), Err(LinkError::NotInitialized));

        let mut cl = client();
        assert_eq!(
            cl.begin_communicating(),
            Err(LinkError::WrongRole {
                expected: Role::AccessPoint
            })
        );

        let mut ap = communicating_ap();
        assert!(matches!(
            ap.begin_communicating(),
            Err(LinkError::InvalidTransition(_))
        ));
    }

    #[test]
    fn test_client_join_flow() {
        let air = SimAir::new();
        let mut observer = air.subscribe();
        let mut link = WinotLink::new(air.attach(2), test_config()).unwrap();
        link.initialize(Role::Client, 0).unwrap();

        let id = ClientId::new([7, 7, 7, 7]);
        assert_eq!(link.request_join(id, 200), Ok(LinkState::Requesting));
        let sent = observer.try_recv().unwrap();
        assert_eq!(sent.data, vec![7, 7, 7, 7, 200]);
        assert_eq!(sent.target, link.radio_target());

        // Nothing is received while requesting.
        assert_eq!(
            link.on_radio_frame(&data_frame(0, false, &[1])),
            RxOutcome::Ignored
        );
        assert_eq!(link.on_tick(1), LinkState::Communicating);
        assert_eq!(link.radio().receive_target(), Some(link.radio_target()));
        assert!(matches!(
            link.request_join(id, 200),
            Err(LinkError::InvalidTransition(_))
        ));
    }

    #[test]
    fn test_request_join_requires_client_role() {
        let mut ap = access_point();
        assert_eq!(
            ap.request_join(ClientId::new([1, 1, 1, 1]), 1),
            Err(LinkError::WrongRole {
                expected: Role::Client
            })
        );
    }

    #[test]
    fn test_client_receives_frames() {
        let mut link = client();
        link.on_radio_frame(&data_frame(0, true, &[1; 250]));
        assert_eq!(
            link.on_radio_frame(&data_frame(1, false, &[2; 5])),
            RxOutcome::FrameComplete { len: 255 }
        );
        let frame = link.frame().unwrap();
        assert_eq!(&frame[..250], &[1; 250][..]);
        assert_eq!(&frame[250..], &[2; 5][..]);
    }

    #[test]
    fn test_release_frame() {
        let mut link = communicating_ap();
        assert!(matches!(
            link.release_frame(),
            Err(LinkError::InvalidTransition(_))
        ));
        link.on_radio_frame(&data_frame(0, false, &[4; 8]));
        assert_eq!(link.release_frame(), Ok(LinkState::Communicating));
        assert_eq!(link.frame(), None);
        assert_eq!(link.frame_length(), FrameLength::UNSET);
    }

    #[test]
    fn test_liveness_eviction_returns_to_listening() {
        let mut link = communicating_ap();
        assert_eq!(link.clients().len(), 1);

        // Keep the client alive for a while.
        for _ in 0..3 {
            for _ in 0..10 {
                link.on_tick(100);
            }
            link.on_radio_frame(&data_frame(0, false, &[1]));
            link.release_frame().unwrap();
        }
        assert_eq!(link.clients().len(), 1);
        assert_eq!(link.state(), LinkState::Communicating);

        // Then go quiet past the timeout.
        for _ in 0..20 {
            link.on_tick(100);
        }
        assert!(link.clients().is_empty());
        assert_eq!(link.active_client(), None);
        assert_eq!(link.state(), LinkState::Listening);
        assert_eq!(link.stats().snapshot().clients.evicted, 1);
        assert_eq!(link.radio().receive_target(), Some(link.radio_target()));

        // A fresh join works again.
        link.on_radio_frame(&join_frame([8, 8, 8, 8], 1));
        assert_eq!(link.on_tick(1), LinkState::Listening);
        assert_eq!(link.clients().len(), 1);
    }

    #[test]
    fn test_full_buffer_roundtrip() {
        let mut link = communicating_ap();
        let data: Vec<u8> = (0..1600u32).map(|i| (i * 7 % 251) as u8).collect();
        let pieces: Vec<_> = fragment(&data).unwrap().collect();
        assert_eq!(pieces.len(), 7);

        for piece in &pieces {
            link.on_radio_frame(piece.as_bytes());
        }
        assert_eq!(link.state(), LinkState::FrameReady);
        assert_eq!(link.frame(), Some(&data[..]));
        assert_eq!(link.stats().snapshot().rx.fragments, 7);
    }

    #[test]
    fn test_lost_terminal_fragment_starts_new_frame() {
        let mut link = communicating_ap();
        link.on_radio_frame(&data_frame(0, true, &[0xAA; 250]));
        link.on_radio_frame(&data_frame(1, true, &[0xAA; 250]));

        // Frame A's terminal fragment never arrives. Frame B loses index 1.
        assert_eq!(
            link.on_radio_frame(&data_frame(0, true, &[0xBB; 250])),
            RxOutcome::FragmentStored { index: 0 }
        );
        assert_eq!(
            link.on_radio_frame(&data_frame(2, false, &[0xBB; 10])),
            RxOutcome::FrameComplete { len: 510 }
        );

        let frame = link.frame().unwrap();
        assert_eq!(&frame[..250], &[0xBB; 250][..]);
        assert!(frame[250..500].iter().all(|&x| x == 0));
        assert_eq!(&frame[500..], &[0xBB; 10][..]);
        let snap = link.stats().snapshot();
        assert_eq!(snap.rx.incomplete, 1);
        assert_eq!(snap.rx.discarded, 1);
    }

    #[test]
    fn test_buffer_access_follows_owner() {
        let mut link = communicating_ap();
        link.on_radio_frame(&data_frame(0, true, &[1; 250]));
        assert_eq!(link.state().buffer_owner(), BufferOwner::Engine);
        assert_eq!(link.frame(), None);

        link.on_radio_frame(&data_frame(1, false, &[2; 3]));
        assert_eq!(link.state().buffer_owner(), BufferOwner::Adapter);
        assert_eq!(link.frame().map(<[u8]>::len), Some(253));

        // The receive path may not touch the buffer while the adapter owns it.
        assert_eq!(
            link.on_radio_frame(&data_frame(1, false, &[9; 3])),
            RxOutcome::Ignored
        );
        assert_eq!(&link.frame().unwrap()[250..], &[2; 3][..]);
        assert_eq!(link.stats().snapshot().rx.ignored, 1);
    }

    /// Radio whose next `failures` calls to `set_receive_mode` fail.
    struct FlakyRadio {
        inner: SimRadio,
        failures: usize,
        rx_calls: usize,
    }

    impl FlakyRadio {
        fn new(inner: SimRadio) -> Self {
            Self {
                inner,
                failures: 0,
                rx_calls: 0,
            }
        }
    }

    impl RadioService for FlakyRadio {
        type Error = SimRadioError;

        fn init(&mut self, tx_power: i8) -> Result<(), Self::Error> {
            self.inner.init(tx_power)
        }

        fn set_receive_mode(&mut self, target: RadioTarget) -> Result<(), Self::Error> {
            self.rx_calls += 1;
            if self.failures > 0 {
                self.failures -= 1;
                return Err(SimRadioError::NotInitialized);
            }
            self.inner.set_receive_mode(target)
        }

        fn transmit(&mut self, target: RadioTarget, frame: &[u8]) -> Result<(), Self::Error> {
            self.inner.transmit(target, frame)
        }
    }

    #[test]
    fn test_failed_rearm_retried_on_tick() {
        let air = SimAir::new();
        let mut link = WinotLink::new(FlakyRadio::new(air.attach(1)), test_config()).unwrap();
        link.initialize(Role::AccessPoint, 0).unwrap();
        assert!(link.receive_armed());
        assert_eq!(link.radio().rx_calls, 1);

        // Negotiation re-arms and fails, and so does the retry in the same tick.
        link.radio_mut().failures = 2;
        link.on_radio_frame(&join_frame([3, 3, 3, 3], 16));
        assert_eq!(link.on_tick(1), LinkState::Listening);
        assert!(!link.receive_armed());
        assert_eq!(link.radio().rx_calls, 3);

        assert_eq!(link.on_tick(1), LinkState::Listening);
        assert!(link.receive_armed());
        assert_eq!(link.radio().rx_calls, 4);

        // Armed again, so later ticks leave the radio alone.
        for _ in 0..1_001 {
            link.on_tick(1);
        }
        assert_eq!(link.radio().rx_calls, 4);
        assert_eq!(link.state(), LinkState::Listening);
    }

    #[test]
    fn test_send_rearm_failure_recovers_on_tick() {
        use crate::link::Transport;

        let air = SimAir::new();
        let mut link = WinotLink::new(FlakyRadio::new(air.attach(2)), test_config()).unwrap();
        link.initialize(Role::Client, 0).unwrap();
        link.request_join(ClientId::new([4, 4, 4, 4]), 8).unwrap();
        assert!(!link.receive_armed());
        assert_eq!(link.on_tick(1), LinkState::Communicating);
        assert!(link.receive_armed());

        link.radio_mut().failures = 1;
        assert!(matches!(link.send(b"ping"), Err(LinkError::Radio(_))));
        assert!(!link.receive_armed());
        assert_eq!(link.radio().inner.receive_target(), None);

        link.on_tick(1);
        assert!(link.receive_armed());
        assert_eq!(
            link.radio().inner.receive_target(),
            Some(link.radio_target())
        );
    }

    #[test]
    fn test_error_display() {
        assert_eq!(
            LinkError::BufferTooSmall {
                needed: 100,
                available: 10
            }
            .to_string(),
            "buffer too small: frame is 100 bytes, buffer holds 10"
        );
        assert_eq!(
            LinkError::NotCommunicating(LinkState::Listening).to_string(),
            "cannot send in state listening"
        );
    }
}

#[cfg(feature = "tap-tests")]
mod tap_tests {
    use super::*;
    use crate::radio::SimAir;
    use winot_macros::tap_test;

    #[tap_test]
    fn engine_reassembles_max_frame() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let air = SimAir::new();
        let mut link = WinotLink::new(air.attach(1), LinkConfig::default())?;
        link.initialize(Role::Client, 0)?;
        link.request_join(ClientId::new([1, 2, 3, 4]), 250)?;
        link.on_tick(1);

        let data = vec![0x5A; crate::config::WINOT_DATA_BUF_SIZE];
        for piece in fragment(&data)? {
            link.on_radio_frame(piece.as_bytes());
        }
        assert_eq!(link.frame(), Some(&data[..]));
        Ok(())
    }

    #[tap_test]
    fn engine_refuses_fragment_past_buffer_end() {
        let air = SimAir::new();
        let mut link = WinotLink::new(air.attach(1), LinkConfig::default()).unwrap();
        link.initialize(Role::Client, 0).unwrap();
        link.request_join(ClientId::new([1, 2, 3, 4]), 250).unwrap();
        link.on_tick(1);

        let outcome = link.on_radio_frame(&[0x07, 1, 0xFF]);
        assert!(matches!(outcome, RxOutcome::Rejected(RejectReason::Overrun(_))));
        assert_eq!(link.state(), LinkState::Communicating);
    }
}
