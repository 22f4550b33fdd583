//! §4.5: the two `FrameConstructor` flavors that sit at the bottom of a
//! `WebrtcTrack`'s receive side, converting inbound RTP into [`Frame`]s.

use crate::frame::{AudioFrameInfo, Frame, FrameFormat, FrameInfo};
use rtp::packet::Packet;

/// RFC 6464 client-to-mixer audio level header extension: one byte, top
/// bit voice-activity, low 7 bits level in -dBov (0 = loudest).
const AUDIO_LEVEL_EXTENSION_LEN: usize = 1;

/// Interpolates NTP time for an RTP timestamp from the last two RTCP
/// sender report anchors (§4.5 "NTP timestamp interpolated ... by an
/// RtpToNtpEstimator"). `None` until at least one SR has arrived, at
/// which point a single anchor gives a linear estimate; a second anchor
/// refines the clock-rate-implied slope.
#[derive(Debug, Clone, Copy, Default)]
pub struct RtpToNtpEstimator {
    first: Option<(u32, f64)>,
    second: Option<(u32, f64)>,
}

impl RtpToNtpEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a sender-report anchor: the RTP timestamp and its
    /// corresponding NTP time (seconds since epoch, fractional).
    pub fn update(&mut self, rtp_timestamp: u32, ntp_seconds: f64) {
        match (self.first, self.second) {
            (None, _) => self.first = Some((rtp_timestamp, ntp_seconds)),
            (Some(first), _) if first.0 != rtp_timestamp => {
                self.second = Some((rtp_timestamp, ntp_seconds))
            }
            _ => {}
        }
    }

    /// Interpolates the NTP time for `rtp_timestamp`, or `None` if no
    /// sender report has been observed yet.
    pub fn estimate(&self, rtp_timestamp: u32, clock_rate: u64) -> Option<f64> {
        let (anchor_ts, anchor_ntp) = self.second.or(self.first)?;
        let delta_ticks = rtp_timestamp.wrapping_sub(anchor_ts) as i64;
        Some(anchor_ntp + delta_ticks as f64 / clock_rate as f64)
    }
}

/// Reads audio RTP directly rather than routing through a full
/// `RtcAdapter` receive stream, since the SFU never decodes audio (§4.5).
pub struct AudioFrameConstructor {
    clock_rate: u64,
    channels: u8,
    ntp: RtpToNtpEstimator,
}

impl AudioFrameConstructor {
    pub fn new(clock_rate: u64, channels: u8) -> Self {
        AudioFrameConstructor {
            clock_rate,
            channels,
            ntp: RtpToNtpEstimator::new(),
        }
    }

    /// Feeds a sender report anchor (RTP timestamp, NTP seconds) for
    /// interpolation; called by the owning audio receive adapter when it
    /// sees an SR.
    pub fn on_sender_report(&mut self, rtp_timestamp: u32, ntp_seconds: f64) {
        self.ntp.update(rtp_timestamp, ntp_seconds);
    }

    /// Builds a `Frame` directly from one RTP packet. The RFC 6464 audio
    /// level extension is read from the one-byte header extension if
    /// present; absent extensions leave `level_dbov`/`voice_activity` at
    /// their defaults.
    pub fn construct(&mut self, packet: &Packet, level_extension_id: Option<u8>) -> Frame {
        let (level_dbov, voice_activity) = level_extension_id
            .and_then(|id| packet.header.get_extension(id))
            .filter(|ext| ext.len() >= AUDIO_LEVEL_EXTENSION_LEN)
            .map(|ext| {
                let byte = ext[0];
                (Some(-((byte & 0x7f) as i8)), byte & 0x80 != 0)
            })
            .unwrap_or((None, false));

        Frame {
            format: FrameFormat::Opus,
            payload: packet.payload.clone(),
            rtp_timestamp: packet.header.timestamp,
            ntp_timestamp: self.ntp.estimate(packet.header.timestamp, self.clock_rate),
            info: FrameInfo::Audio(AudioFrameInfo {
                channels: self.channels,
                sample_rate: self.clock_rate as u32,
                level_dbov,
                voice_activity,
            }),
        }
    }
}

/// Placeholder the `VideoFrameConstructor` hands reference-resolved
/// frames to once the jitter buffer and reference finder are done with
/// them -- the full receive-stream machinery lives on
/// [`crate::adapter::video_receive::VideoReceiveAdapter`]; this type only
/// owns the final RTP→`Frame` conversion (§4.4, §4.5).
pub struct VideoFrameConstructor {
    format: FrameFormat,
    ntp: RtpToNtpEstimator,
}

impl VideoFrameConstructor {
    pub fn new(format: FrameFormat) -> Self {
        VideoFrameConstructor {
            format,
            ntp: RtpToNtpEstimator::new(),
        }
    }

    pub fn on_sender_report(&mut self, rtp_timestamp: u32, ntp_seconds: f64) {
        self.ntp.update(rtp_timestamp, ntp_seconds);
    }

    /// Converts one reference-resolved, fully assembled frame (already
    /// de-jittered and dependency-checked upstream) into the engine's
    /// `Frame` type.
    pub fn construct(
        &mut self,
        payload: bytes::Bytes,
        rtp_timestamp: u32,
        width: u16,
        height: u16,
        is_keyframe: bool,
    ) -> Frame {
        Frame {
            format: self.format,
            payload,
            rtp_timestamp,
            ntp_timestamp: self.ntp.estimate(rtp_timestamp, crate::constants::VIDEO_CLOCK_RATE),
            info: FrameInfo::Video(crate::frame::VideoFrameInfo {
                width,
                height,
                is_keyframe,
            }),
        }
    }
}
