pub(crate) const UNSPECIFIED_STR: &str = "Unspecified";

/// Equal to UDP MTU
pub(crate) const RECEIVE_MTU: usize = 1460;

pub(crate) const SDP_ATTRIBUTE_RID: &str = "rid";
pub(crate) const SDP_ATTRIBUTE_SIMULCAST: &str = "simulcast";
pub(crate) const GENERATED_CERTIFICATE_ORIGIN: &str = "WebRTC";
pub(crate) const SDES_REPAIR_RTP_STREAM_ID_URI: &str =
    "urn:ietf:params:rtp-hdrext:sdes:repaired-rtp-stream-id";
pub(crate) const DEFAULT_SESSION_SRTP_REPLAY_PROTECTION_WINDOW: usize = 64;
pub(crate) const DEFAULT_SESSION_SRTCP_REPLAY_PROTECTION_WINDOW: usize = 64;
pub(crate) const DEFAULT_DTLS_REPLAY_PROTECTION_WINDOW: usize = 64;

/// Max DTLS ClientHello/handshake retransmissions before a transport is
/// declared FAILED (one per second).
pub const DTLS_HANDSHAKE_MAX_RETRIES: u32 = 15;
/// Interval between DTLS handshake retransmission attempts.
pub const DTLS_HANDSHAKE_RETRY_INTERVAL_MS: u64 = 1_000;

/// Minimum interval between coalesced keyframe requests on a receive adapter.
pub const KEYFRAME_REQUEST_RETRY_INTERVAL_MS: u64 = 1_000;

/// RTCP payload types occupy [64,95] within the SRTP demux range [128,191]
/// once the leading two bits are masked off; see DtlsTransport demux.
pub(crate) const RTCP_PT_LOW: u8 = 64;
pub(crate) const RTCP_PT_HIGH: u8 = 95;

/// TimerCalendar: hashed timing wheel slot width and slot count.
pub const TIMER_SLOT_INTERVAL_MS: u64 = 30;
pub const TIMER_MAX_SLOT_COUNT: usize = 4096;

/// H.264 NALU type carrying an IDR (keyframe) slice.
pub(crate) const H264_NALU_TYPE_IDR: u8 = 5;
/// RTP clock rate assumed for video (90 kHz, per RFC 3550/6184).
pub(crate) const VIDEO_CLOCK_RATE: u64 = 90_000;
