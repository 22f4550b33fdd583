use thiserror::Error;

/// Crate-wide result alias, matching the convention used by the vendored
/// protocol crates (`shared::error::Result`).
pub type Result<T> = std::result::Result<T, Error>;

/// Flat error taxonomy surfaced to a signaling collaborator.
///
/// Variants map onto the kinds in the error handling design: most are
/// returned synchronously from a fallible call, the `*Failed`/`*Closed`
/// variants are instead wrapped into a [`crate::conn::event::PeerConnectionEvent`]
/// and delivered asynchronously once a peer reaches a terminal state.
#[derive(Error, Debug, PartialEq)]
#[non_exhaustive]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("engine already initialized")]
    AlreadyInitialized,

    #[error("unknown connection id: {0}")]
    ConnectionNotFound(String),

    #[error("unknown mid: {0}")]
    MidNotFound(String),

    #[error("unknown track: {0}")]
    TrackNotFound(String),

    #[error("ice failed after last candidate")]
    IceFailed,

    #[error("dtls handshake failed: {0}")]
    DtlsHandshakeFailed(String),

    #[error("srtp key install rejected: {0}")]
    SrtpKeyingFailed(String),

    #[error("transport closed")]
    TransportClosed,

    #[error("operation invalid in signaling state {0:?}")]
    InvalidSignalingState(crate::conn::state::SignalingState),

    #[error("operation invalid in connection state {0:?}")]
    InvalidConnectionState(crate::conn::state::ConnectionState),

    #[error("sdp parse error: {0}")]
    SdpParse(String),

    #[error("no remote description set")]
    NoRemoteDescription,

    #[error("ice component {0} send failed")]
    IceSendFailed(u16),

    /// Wraps a failure surfaced by one of the vendored protocol crates
    /// (`ice`, `dtls`, `srtp`, `sdp`, `rtp`, `rtcp`, `sctp` all share this
    /// error type).
    #[error("transport library error: {0}")]
    Shared(#[from] shared::error::Error),
}
