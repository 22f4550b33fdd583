use std::fmt;

/// §4.7 state machine, driven by `updateState(transport_state)`. Advances
/// monotonically except for the terminal `Failed`, reachable from any
/// non-terminal state; once `Finished` or `Failed`, no further
/// transitions are emitted (§3 invariant).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Initial,
    Started,
    Gathered,
    Ready,
    Finished,
    Failed,
}

impl ConnectionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ConnectionState::Finished | ConnectionState::Failed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Initial => "initial",
            ConnectionState::Started => "started",
            ConnectionState::Gathered => "gathered",
            ConnectionState::Ready => "ready",
            ConnectionState::Finished => "finished",
            ConnectionState::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Whether the local description has been applied, separate from the
/// transport-driven [`ConnectionState`] above -- mirrors the W3C
/// `RTCSignalingState` split between negotiation and connectivity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalingState {
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
    Closed,
}

impl fmt::Display for SignalingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SignalingState::Stable => "stable",
            SignalingState::HaveLocalOffer => "have-local-offer",
            SignalingState::HaveRemoteOffer => "have-remote-offer",
            SignalingState::Closed => "closed",
        };
        write!(f, "{s}")
    }
}
