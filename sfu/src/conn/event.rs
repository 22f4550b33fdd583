use crate::conn::state::ConnectionState;

/// §4.7/§7 `WebRtcConnectionEventListener::notifyEvent`: events a
/// `PeerConnection` posts upward, pulled via `poll_event` rather than
/// delivered through a callback object (§10.2 "async surfacing ...
/// realized as `PeerConnectionEvent` values pulled by `poll_event`").
pub enum PeerConnectionEvent {
    StateChange(ConnectionState),
    /// `CONN_GATHERED`/`CONN_STARTED` payload: the local SDP to hand back
    /// to the signaling channel.
    LocalDescription(String),
    /// `CONN_SDP_PROCESSED`, per negotiated mid.
    SdpProcessed(String),
    /// `CONN_CANDIDATE`: one local ICE candidate, trickled if trickle is
    /// enabled.
    LocalCandidate(String),
}
