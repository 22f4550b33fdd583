use crate::adapter::KeyframeRequestCoalescer;
use crate::constants::{H264_NALU_TYPE_IDR, KEYFRAME_REQUEST_RETRY_INTERVAL_MS};
use crate::frame::{Frame, FrameFormat, VideoFrameConstructor};
use bytes::{Bytes, BytesMut};
use rtp::packet::Packet;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// §4.4 "Video receive": demuxes inbound RTP by SSRC into a small jitter
/// buffer (`PacketBuffer`), assembles complete frames on the marker bit,
/// and resolves a frame's keyframe-ness directly from the H.264 NALU
/// type rather than implementing the full generic-frame-descriptor /
/// frame-marking / picture-id reference finder the original delegates
/// to -- this SFU never reorders frames across dependency chains, it
/// only forwards them, so reference resolution collapses to "is this
/// NALU an IDR slice" (§4.4, §9 redesign: RtcAdapter internals
/// flattened; webrtc-library black boxes not reimplemented).
pub struct VideoReceiveAdapter {
    ssrc: u32,
    buffer: BTreeMap<u16, Packet>,
    constructor: VideoFrameConstructor,
    coalescer: KeyframeRequestCoalescer,
    keyframe_seen: bool,
}

impl VideoReceiveAdapter {
    pub fn new(ssrc: u32, format: FrameFormat) -> Self {
        VideoReceiveAdapter {
            ssrc,
            buffer: BTreeMap::new(),
            constructor: VideoFrameConstructor::new(format),
            coalescer: KeyframeRequestCoalescer::new(Duration::from_millis(
                KEYFRAME_REQUEST_RETRY_INTERVAL_MS,
            )),
            keyframe_seen: false,
        }
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    pub fn request_keyframe(&mut self) {
        self.coalescer.request();
    }

    pub fn on_sender_report(&mut self, rtp_timestamp: u32, ntp_seconds: f64) {
        self.constructor.on_sender_report(rtp_timestamp, ntp_seconds);
    }

    /// `DeliverPacket`: buffers one RTP packet and, once a
    /// marker-terminated run is present, assembles and returns the
    /// frame. Returns `None` while the buffer awaits more fragments.
    ///
    /// Also polls the keyframe-request coalescer once per inbound
    /// packet, returning whether a `REQUEST_KEYFRAME` should fire
    /// upstream this round (S3).
    pub fn on_rtp_data(&mut self, now: Instant, packet: Packet) -> (Option<Frame>, bool) {
        let marker = packet.header.marker;
        let seq = packet.header.sequence_number;
        self.buffer.insert(seq, packet);

        let request_keyframe = self.coalescer.poll(now);

        if !marker {
            return (None, request_keyframe);
        }

        let run: Vec<(u16, Packet)> = self.buffer.iter().map(|(k, v)| (*k, v.clone())).collect();
        self.buffer.clear();

        let mut payload = BytesMut::new();
        let mut is_keyframe = false;
        let mut timestamp = 0u32;
        for (_, pkt) in &run {
            if let Some(&nalu_type) = pkt.payload.first() {
                if nalu_type & 0x1f == H264_NALU_TYPE_IDR {
                    is_keyframe = true;
                }
            }
            timestamp = pkt.header.timestamp;
            payload.extend_from_slice(&pkt.payload);
        }

        if !self.keyframe_seen && !is_keyframe {
            self.coalescer.request();
            return (None, request_keyframe || self.coalescer.poll(now));
        }
        if is_keyframe {
            self.keyframe_seen = true;
            self.coalescer.on_keyframe_received();
        }

        let frame = self.constructor.construct(
            Bytes::from(payload),
            timestamp,
            0,
            0,
            is_keyframe,
        );
        (Some(frame), request_keyframe)
    }

    pub fn on_rtcp_data(&mut self, _rtcp: &[u8]) {
        // Compound RTCP parsing (SR/RR/SDES) for transport-cc/REMB
        // feedback is handled at the RtpTransport layer; this adapter
        // only needs the SR anchor, fed via on_sender_report.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtp::header::Header;

    fn packet(seq: u16, marker: bool, nalu_type: u8) -> Packet {
        Packet {
            header: Header {
                version: 2,
                payload_type: 102,
                sequence_number: seq,
                timestamp: 90_000,
                ssrc: 1111,
                marker,
                ..Default::default()
            },
            payload: Bytes::from(vec![nalu_type]),
        }
    }

    #[test]
    fn drops_leading_non_keyframe_and_requests_one() {
        let mut adapter = VideoReceiveAdapter::new(1111, FrameFormat::H264);
        let (frame, _) = adapter.on_rtp_data(Instant::now(), packet(1, true, 1));
        assert!(frame.is_none());
    }

    #[test]
    fn assembles_frame_on_marker_once_keyframe_seen() {
        let mut adapter = VideoReceiveAdapter::new(1111, FrameFormat::H264);
        let (frame, _) = adapter.on_rtp_data(Instant::now(), packet(1000, true, 5));
        assert!(frame.unwrap().is_keyframe());
    }
}
