use crate::error::Result;
use bytes::BytesMut;
use srtp::context::Context;
use srtp::protection_profile::ProtectionProfile;

/// Pure cipher state for one DTLS session: separate inbound/outbound
/// contexts for RTP and RTCP (identical context reused for both when
/// rtcp-mux is negotiated), derived from the DTLS exported keying
/// material. Keys are installed exactly once per direction (§3 invariant);
/// a second install attempt is a caller bug, not something this type
/// guards against itself -- the owning `DtlsTransport` enforces it.
pub struct SrtpChannel {
    inbound_rtp: Option<Context>,
    outbound_rtp: Option<Context>,
    inbound_rtcp: Option<Context>,
    outbound_rtcp: Option<Context>,
}

impl SrtpChannel {
    pub fn new() -> Self {
        SrtpChannel {
            inbound_rtp: None,
            outbound_rtp: None,
            inbound_rtcp: None,
            outbound_rtcp: None,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.inbound_rtp.is_some()
            && self.outbound_rtp.is_some()
            && self.inbound_rtcp.is_some()
            && self.outbound_rtcp.is_some()
    }

    /// Installs SRTP/SRTCP contexts from the keys exported by the DTLS
    /// session. `client_write_key`/`server_write_key` are swapped by the
    /// caller before this is reached when the local endpoint is the DTLS
    /// server (§4.3 "swap the keys before installing").
    pub fn install(
        &mut self,
        profile: ProtectionProfile,
        local_key: &[u8],
        local_salt: &[u8],
        remote_key: &[u8],
        remote_salt: &[u8],
    ) -> Result<()> {
        self.outbound_rtp = Some(Context::new(
            local_key, local_salt, profile, None, None,
        )?);
        self.inbound_rtp = Some(Context::new(
            remote_key, remote_salt, profile, None, None,
        )?);
        self.outbound_rtcp = Some(Context::new(
            local_key, local_salt, profile, None, None,
        )?);
        self.inbound_rtcp = Some(Context::new(
            remote_key, remote_salt, profile, None, None,
        )?);
        Ok(())
    }

    pub fn protect_rtp(&mut self, plaintext: &[u8]) -> Result<BytesMut> {
        let ctx = self
            .outbound_rtp
            .as_mut()
            .ok_or_else(|| crate::error::Error::SrtpKeyingFailed("rtp not installed".into()))?;
        Ok(ctx.encrypt_rtp(&BytesMut::from(plaintext))?)
    }

    pub fn unprotect_rtp(&mut self, ciphertext: &[u8]) -> Result<BytesMut> {
        let ctx = self
            .inbound_rtp
            .as_mut()
            .ok_or_else(|| crate::error::Error::SrtpKeyingFailed("rtp not installed".into()))?;
        Ok(ctx.decrypt_rtp(&BytesMut::from(ciphertext))?)
    }

    pub fn protect_rtcp(&mut self, plaintext: &[u8]) -> Result<BytesMut> {
        let ctx = self
            .outbound_rtcp
            .as_mut()
            .ok_or_else(|| crate::error::Error::SrtpKeyingFailed("rtcp not installed".into()))?;
        Ok(ctx.encrypt_rtcp(&BytesMut::from(plaintext))?)
    }

    pub fn unprotect_rtcp(&mut self, ciphertext: &[u8]) -> Result<BytesMut> {
        let ctx = self
            .inbound_rtcp
            .as_mut()
            .ok_or_else(|| crate::error::Error::SrtpKeyingFailed("rtcp not installed".into()))?;
        Ok(ctx.decrypt_rtcp(&BytesMut::from(ciphertext))?)
    }
}

impl Default for SrtpChannel {
    fn default() -> Self {
        Self::new()
    }
}
