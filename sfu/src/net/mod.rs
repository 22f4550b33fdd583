//! L1 transport layer: one [`IceConnection`] per peer (candidate
//! gathering/pairing), layered under one [`DtlsTransport`] per media
//! component (handshake + demux), layered under a pair of
//! [`SrtpChannel`]s (protect/unprotect). Everything here is driven
//! synchronously from the owning worker; nothing blocks on I/O.

pub mod dtls_transport;
pub mod ice_connection;
pub mod srtp_channel;

pub use dtls_transport::DtlsTransport;
pub use ice_connection::IceConnection;
pub use srtp_channel::SrtpChannel;
