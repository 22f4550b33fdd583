use crate::frame::{AudioFrameConstructor, Frame};
use rtp::packet::Packet;

/// §4.4 "Audio receive": mostly a transport-cc feedback participant; the
/// actual frame is built directly from RTP by [`AudioFrameConstructor`]
/// rather than through a jitter buffer, since the SFU never decodes
/// audio.
pub struct AudioReceiveAdapter {
    ssrc: u32,
    constructor: AudioFrameConstructor,
    level_extension_id: Option<u8>,
}

impl AudioReceiveAdapter {
    pub fn new(ssrc: u32, clock_rate: u64, channels: u8, level_extension_id: Option<u8>) -> Self {
        AudioReceiveAdapter {
            ssrc,
            constructor: AudioFrameConstructor::new(clock_rate, channels),
            level_extension_id,
        }
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    pub fn on_rtp_data(&mut self, packet: &Packet) -> Frame {
        self.constructor.construct(packet, self.level_extension_id)
    }

    pub fn on_sender_report(&mut self, rtp_timestamp: u32, ntp_seconds: f64) {
        self.constructor.on_sender_report(rtp_timestamp, ntp_seconds);
    }

    pub fn on_rtcp_data(&mut self, _rtcp: &[u8]) {
        // Transport-cc / RR feedback participation only; no media effect.
    }
}
