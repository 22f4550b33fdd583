use crate::constants::{DTLS_HANDSHAKE_MAX_RETRIES, DTLS_HANDSHAKE_RETRY_INTERVAL_MS};
use crate::error::{Error, Result};
use crate::net::srtp_channel::SrtpChannel;
use bytes::BytesMut;
use dtls::config::HandshakeConfig;
use dtls::endpoint::{Endpoint, EndpointEvent};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

/// Whether this endpoint plays the DTLS client or server role, set from
/// the negotiated `a=setup` attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DtlsRole {
    Client,
    Server,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DtlsTransportState {
    TransportInitial,
    Started,
    Gathered,
    Ready,
    Finished,
    Failed,
}

/// First byte of a demultiplexed ICE payload, per RFC7983.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemuxedKind {
    Dtls,
    Rtp,
    Rtcp,
}

fn classify(first_byte: u8) -> Option<DemuxedKind> {
    match first_byte {
        20..=63 => Some(DemuxedKind::Dtls),
        128..=191 => {
            let payload_type = first_byte & 0x7f;
            if (64..=95).contains(&payload_type) {
                Some(DemuxedKind::Rtcp)
            } else {
                Some(DemuxedKind::Rtp)
            }
        }
        _ => None,
    }
}

/// Retries the DTLS handshake up to [`DTLS_HANDSHAKE_MAX_RETRIES`] times,
/// one second apart, and surfaces `DtlsHandshakeFailed` on exhaustion
/// (§3, §4.3, §8 property 4).
pub struct TimeoutChecker {
    retries_left: u32,
}

impl TimeoutChecker {
    pub fn new() -> Self {
        TimeoutChecker {
            retries_left: DTLS_HANDSHAKE_MAX_RETRIES,
        }
    }

    pub fn retry_interval_ms() -> u64 {
        DTLS_HANDSHAKE_RETRY_INTERVAL_MS
    }

    /// Returns `true` if the caller should retry (handshake still
    /// outstanding and retries remain), `false` once exhausted.
    pub fn fire(&mut self) -> bool {
        if self.retries_left == 0 {
            return false;
        }
        self.retries_left -= 1;
        true
    }

    pub fn exhausted(&self) -> bool {
        self.retries_left == 0
    }
}

impl Default for TimeoutChecker {
    fn default() -> Self {
        Self::new()
    }
}

/// Event surfaced to the owning `PeerConnection`.
pub enum DtlsTransportEvent {
    StateChange(DtlsTransportState),
    /// Decrypted SRTP/SRTCP payload demultiplexed from the wire.
    Data(DemuxedKind, BytesMut),
    /// Bytes ready to hand to the `IceConnection` for emission.
    Transmit(BytesMut),
}

/// Wraps one (or, pre-rtcp-mux, two identical) DTLS socket context, drives
/// the handshake, demuxes inbound bytes, and protects/unprotects RTP and
/// RTCP via its `SrtpChannel` once keys are installed (§4.3).
pub struct DtlsTransport {
    role: DtlsRole,
    remote: SocketAddr,
    endpoint: Endpoint,
    state: DtlsTransportState,
    srtp: SrtpChannel,
    timeout_checker: Option<TimeoutChecker>,
    events: std::collections::VecDeque<DtlsTransportEvent>,
}

impl DtlsTransport {
    pub fn new(role: DtlsRole, remote: SocketAddr, server_config: Option<Arc<HandshakeConfig>>) -> Self {
        DtlsTransport {
            role,
            remote,
            endpoint: Endpoint::new(server_config),
            state: DtlsTransportState::TransportInitial,
            srtp: SrtpChannel::new(),
            timeout_checker: None,
            events: std::collections::VecDeque::new(),
        }
    }

    pub fn state(&self) -> DtlsTransportState {
        self.state
    }

    /// Called once the owning `IceConnection` reaches READY. If this
    /// endpoint is the client, initiates the ClientHello and arms the
    /// retransmission timer; a server-role transport is a no-op and waits
    /// for the peer's ClientHello to arrive via [`Self::handle_inbound`].
    pub fn on_ice_ready(&mut self, client_config: Arc<dtls::config::HandshakeConfig>) -> Result<()> {
        self.state = DtlsTransportState::Started;
        self.push_state_event();
        if self.role == DtlsRole::Client {
            self.endpoint.connect(self.remote, client_config, None)?;
            self.timeout_checker = Some(TimeoutChecker::new());
        }
        Ok(())
    }

    /// `onIceData(packet)`: demuxes, forwarding DTLS traffic to the DTLS
    /// library and SRTP/SRTCP traffic to the matching unprotect path.
    /// Packets shorter than a header are dropped silently.
    pub fn handle_inbound(&mut self, now: Instant, packet: BytesMut) -> Result<()> {
        if packet.len() < 12 {
            return Ok(());
        }
        match classify(packet[0]) {
            Some(DemuxedKind::Dtls) => {
                let endpoint_events = self.endpoint.read(now, self.remote, None, None, packet)?;
                self.drain_endpoint_events();
                for event in endpoint_events {
                    match event {
                        EndpointEvent::HandshakeComplete => {
                            self.complete_handshake_from_connection()?;
                        }
                        EndpointEvent::ApplicationData(_) => {
                            // DTLS application data (e.g. future SCTP over DTLS) is
                            // not part of the media path; dropped here.
                        }
                    }
                }
            }
            Some(DemuxedKind::Rtp) => {
                if self.state == DtlsTransportState::Ready {
                    let plain = self.srtp.unprotect_rtp(&packet)?;
                    self.events
                        .push_back(DtlsTransportEvent::Data(DemuxedKind::Rtp, plain));
                }
            }
            Some(DemuxedKind::Rtcp) => {
                if self.state == DtlsTransportState::Ready {
                    let plain = self.srtp.unprotect_rtcp(&packet)?;
                    self.events
                        .push_back(DtlsTransportEvent::Data(DemuxedKind::Rtcp, plain));
                }
            }
            None => {
                log::debug!("DtlsTransport: dropping unclassifiable packet");
            }
        }
        Ok(())
    }

    /// `write(buf, len)`: no-op before READY; otherwise protects in place
    /// and queues the ciphertext as an outbound transmit.
    pub fn write(&mut self, kind: DemuxedKind, plaintext: &[u8]) -> Result<()> {
        if self.state != DtlsTransportState::Ready {
            return Ok(());
        }
        let cipher = match kind {
            DemuxedKind::Rtp => self.srtp.protect_rtp(plaintext)?,
            DemuxedKind::Rtcp => self.srtp.protect_rtcp(plaintext)?,
            DemuxedKind::Dtls => BytesMut::from(plaintext),
        };
        self.events.push_back(DtlsTransportEvent::Transmit(cipher));
        Ok(())
    }

    /// Retries the handshake at the calendar-scheduled interval; on
    /// exhaustion transitions to FAILED with `SRTP_HANDSHAKE_FAILED`.
    pub fn handle_timeout(&mut self, now: Instant) -> Result<()> {
        if self.state == DtlsTransportState::Ready || self.state == DtlsTransportState::Failed {
            return Ok(());
        }
        self.endpoint.handle_timeout(self.remote, now)?;
        self.drain_endpoint_events();
        if let Some(checker) = self.timeout_checker.as_mut() {
            if !checker.fire() {
                self.fail(Error::DtlsHandshakeFailed(
                    "handshake retries exhausted".into(),
                ));
            }
        }
        Ok(())
    }

    fn drain_endpoint_events(&mut self) {
        while let Some(transmit) = self.endpoint.poll_transmit() {
            self.events
                .push_back(DtlsTransportEvent::Transmit(transmit.payload));
        }
    }

    /// `onHandshakeCompleted`: swaps client/server keys when this endpoint
    /// is the server (RFC 5764), installs the SRTP contexts, and
    /// transitions to READY once both RTP and RTCP channels are live.
    pub fn on_handshake_completed(
        &mut self,
        profile: srtp::protection_profile::ProtectionProfile,
        client_key: &[u8],
        client_salt: &[u8],
        server_key: &[u8],
        server_salt: &[u8],
    ) -> Result<()> {
        if self.srtp.is_ready() {
            return Err(Error::SrtpKeyingFailed(
                "HandshakeCompleted fired twice for the same context".into(),
            ));
        }
        let (local_key, local_salt, remote_key, remote_salt) = match self.role {
            DtlsRole::Client => (client_key, client_salt, server_key, server_salt),
            DtlsRole::Server => (server_key, server_salt, client_key, client_salt),
        };
        self.srtp
            .install(profile, local_key, local_salt, remote_key, remote_salt)?;
        self.timeout_checker = None;
        if self.srtp.is_ready() {
            self.state = DtlsTransportState::Ready;
            self.push_state_event();
        }
        Ok(())
    }

    /// Pulls the negotiated SRTP protection profile and exported keying
    /// material off the now-complete DTLS connection and installs them,
    /// per RFC 5764 (§4.3, §6 "SRTP key derivation").
    fn complete_handshake_from_connection(&mut self) -> Result<()> {
        let state = self
            .endpoint
            .get_connection_state(self.remote)
            .ok_or_else(|| Error::DtlsHandshakeFailed("connection vanished".into()))?;
        let profile = state.srtp_protection_profile();
        let keys = state.export_srtp_keying_material()?;
        self.on_handshake_completed(
            profile,
            &keys.client_key,
            &keys.client_salt,
            &keys.server_key,
            &keys.server_salt,
        )
    }

    pub fn on_handshake_failed(&mut self, reason: String) {
        self.fail(Error::DtlsHandshakeFailed(reason));
    }

    fn fail(&mut self, err: Error) {
        log::warn!("DtlsTransport failed: {err}");
        self.state = DtlsTransportState::Failed;
        self.push_state_event();
    }

    fn push_state_event(&mut self) {
        self.events
            .push_back(DtlsTransportEvent::StateChange(self.state));
    }

    pub fn poll_event(&mut self) -> Option<DtlsTransportEvent> {
        self.events.pop_front()
    }

    pub fn close(&mut self) {
        self.endpoint.close(self.remote);
        self.state = DtlsTransportState::Finished;
        self.push_state_event();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demux_classifies_rfc7983_ranges() {
        assert_eq!(classify(25), Some(DemuxedKind::Dtls));
        assert_eq!(classify(63), Some(DemuxedKind::Dtls));
        assert_eq!(classify(128 | 64), Some(DemuxedKind::Rtcp));
        assert_eq!(classify(128 | 10), Some(DemuxedKind::Rtp));
        assert_eq!(classify(2), None);
    }

    #[test]
    fn timeout_checker_exhausts_after_15() {
        let mut checker = TimeoutChecker::new();
        let mut retried = 0;
        while checker.fire() {
            retried += 1;
        }
        assert_eq!(retried, DTLS_HANDSHAKE_MAX_RETRIES);
        assert!(checker.exhausted());
    }
}
