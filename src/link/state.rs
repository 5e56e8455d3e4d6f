//! Node role and link state machine.
//!
//! Every state change goes through one of the `on_*` transition functions,
//! which return the next state or refuse the event. The state value is also
//! the sole authority over who may touch the reassembly buffer; see
//! [`LinkState::buffer_owner`].

use std::fmt;

/// Node role, fixed for the lifetime of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Joins an access point.
    Client,
    /// Listens for joins and coordinates clients.
    AccessPoint,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Client => f.write_str("client"),
            Self::AccessPoint => f.write_str("access-point"),
        }
    }
}

/// Link protocol phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    /// Nothing armed.
    #[default]
    Idle,
    /// Access point waiting for a join request.
    Listening,
    /// Client has sent a join request.
    Requesting,
    /// Access point captured a client identity and will finish on the next tick.
    Negotiating,
    /// Fragments are being reassembled.
    Communicating,
    /// A complete frame waits in the reassembly buffer.
    FrameReady,
}

/// Which side may access the reassembly buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferOwner {
    /// The receive path writes into it.
    Engine,
    /// The upper layer reads from it.
    Adapter,
    /// Nobody; its contents are meaningless.
    Nobody,
}

/// A transition the current state does not allow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionError {
    /// State the link was in.
    pub from: LinkState,
    /// Event that was refused.
    pub event: &'static str,
}

impl fmt::Display for TransitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} not allowed in state {}", self.event, self.from)
    }
}

impl std::error::Error for TransitionError {}

impl LinkState {
    fn refuse(self, event: &'static str) -> Result<Self, TransitionError> {
        Err(TransitionError { from: self, event })
    }

    /// Role initialization: an access point starts listening, a client stays idle.
    pub fn on_init(self, role: Role) -> Result<Self, TransitionError> {
        match (self, role) {
            (Self::Idle, Role::AccessPoint) => Ok(Self::Listening),
            (Self::Idle, Role::Client) => Ok(Self::Idle),
            _ => self.refuse("init"),
        }
    }

    /// A join request was captured.
    pub fn on_join(self) -> Result<Self, TransitionError> {
        match self {
            Self::Listening => Ok(Self::Negotiating),
            _ => self.refuse("join"),
        }
    }

    /// The tick after a join finished the negotiation.
    pub fn on_negotiated(self) -> Result<Self, TransitionError> {
        match self {
            Self::Negotiating => Ok(Self::Listening),
            _ => self.refuse("negotiated"),
        }
    }

    /// A client sent its join request.
    pub fn on_request(self) -> Result<Self, TransitionError> {
        match self {
            Self::Idle | Self::Listening => Ok(Self::Requesting),
            _ => self.refuse("request"),
        }
    }

    /// The tick after a join request opened the data phase.
    pub fn on_joined(self) -> Result<Self, TransitionError> {
        match self {
            Self::Requesting => Ok(Self::Communicating),
            _ => self.refuse("joined"),
        }
    }

    /// The access point opened the data phase.
    pub fn on_open(self) -> Result<Self, TransitionError> {
        match self {
            Self::Listening => Ok(Self::Communicating),
            _ => self.refuse("open"),
        }
    }

    /// A terminal or unfragmented fragment completed a frame.
    pub fn on_frame_complete(self) -> Result<Self, TransitionError> {
        match self {
            Self::Communicating => Ok(Self::FrameReady),
            _ => self.refuse("frame complete"),
        }
    }

    /// The upper layer drained the frame.
    pub fn on_release(self) -> Result<Self, TransitionError> {
        match self {
            Self::FrameReady => Ok(Self::Communicating),
            _ => self.refuse("release"),
        }
    }

    /// Every client of the access point timed out.
    pub fn on_all_clients_lost(self) -> Result<Self, TransitionError> {
        match self {
            Self::Communicating => Ok(Self::Listening),
            _ => self.refuse("all clients lost"),
        }
    }

    /// Who owns the reassembly buffer in this state.
    pub fn buffer_owner(self) -> BufferOwner {
        match self {
            Self::Listening | Self::Negotiating | Self::Communicating => BufferOwner::Engine,
            Self::FrameReady => BufferOwner::Adapter,
            Self::Idle | Self::Requesting => BufferOwner::Nobody,
        }
    }

    /// Whether the radio should sit in receive mode in this state.
    pub fn expects_receive(self) -> bool {
        matches!(
            self,
            Self::Listening | Self::Communicating | Self::FrameReady
        )
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Listening => "listening",
            Self::Requesting => "requesting",
            Self::Negotiating => "negotiating",
            Self::Communicating => "communicating",
            Self::FrameReady => "frame-ready",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_by_role() {
        assert_eq!(
            LinkState::Idle.on_init(Role::AccessPoint),
            Ok(LinkState::Listening)
        );
        assert_eq!(LinkState::Idle.on_init(Role::Client), Ok(LinkState::Idle));
        assert!(LinkState::Communicating.on_init(Role::Client).is_err());
    }

    #[test]
    fn test_access_point_cycle() {
        let s = LinkState::Idle.on_init(Role::AccessPoint).unwrap();
        let s = s.on_join().unwrap();
        assert_eq!(s, LinkState::Negotiating);
        let s = s.on_negotiated().unwrap();
        assert_eq!(s, LinkState::Listening);
        let s = s.on_open().unwrap();
        let s = s.on_frame_complete().unwrap();
        assert_eq!(s, LinkState::FrameReady);
        let s = s.on_release().unwrap();
        assert_eq!(s, LinkState::Communicating);
        assert_eq!(s.on_all_clients_lost(), Ok(LinkState::Listening));
    }

    #[test]
    fn test_client_cycle() {
        let s = LinkState::Idle.on_request().unwrap();
        assert_eq!(s, LinkState::Requesting);
        assert_eq!(s.on_joined(), Ok(LinkState::Communicating));
    }

    #[test]
    fn test_refused_transitions() {
        let err = LinkState::Communicating.on_join().unwrap_err();
        assert_eq!(err.from, LinkState::Communicating);
        assert_eq!(err.event, "join");
        assert_eq!(err.to_string(), "join not allowed in state communicating");

        assert!(LinkState::Listening.on_release().is_err());
        assert!(LinkState::FrameReady.on_frame_complete().is_err());
        assert!(LinkState::FrameReady.on_all_clients_lost().is_err());
        assert!(LinkState::Negotiating.on_request().is_err());
    }

    #[test]
    fn test_buffer_owner_is_exclusive() {
        assert_eq!(LinkState::Communicating.buffer_owner(), BufferOwner::Engine);
        assert_eq!(LinkState::FrameReady.buffer_owner(), BufferOwner::Adapter);
        assert_eq!(LinkState::Idle.buffer_owner(), BufferOwner::Nobody);
    }

    #[test]
    fn test_expects_receive() {
        assert!(LinkState::Listening.expects_receive());
        assert!(LinkState::FrameReady.expects_receive());
        assert!(!LinkState::Requesting.expects_receive());
        assert!(!LinkState::Negotiating.expects_receive());
    }
}
