use crate::adapter::KeyframeRequestCoalescer;
use crate::constants::KEYFRAME_REQUEST_RETRY_INTERVAL_MS;
use crate::frame::{Frame, VideoFramePacketizer};
use rtp::packet::Packet;
use std::time::Duration;

/// §4.4 "Video send": on each outbound frame, gates on
/// `keyframe_arrived` until the subscriber's stream has seen its first
/// keyframe (steps 1-3: drop-and-request, timestamp resync, NALU scan
/// into RTP -- the latter two delegated to [`VideoFramePacketizer`]).
pub struct VideoSendAdapter {
    packetizer: VideoFramePacketizer,
    keyframe_arrived: bool,
    coalescer: KeyframeRequestCoalescer,
}

impl VideoSendAdapter {
    pub fn new(ssrc: u32, payload_type: u8) -> Self {
        VideoSendAdapter {
            packetizer: VideoFramePacketizer::new(ssrc, payload_type),
            keyframe_arrived: false,
            coalescer: KeyframeRequestCoalescer::new(Duration::from_millis(
                KEYFRAME_REQUEST_RETRY_INTERVAL_MS,
            )),
        }
    }

    /// `onFrame`: returns the RTP packets to transmit, or an empty `Vec`
    /// plus `request_keyframe = true` if the frame was dropped pending a
    /// keyframe.
    pub fn on_frame(&mut self, frame: &Frame, now_ms: u64) -> (Vec<Packet>, bool) {
        if !self.keyframe_arrived && !frame.is_keyframe() {
            self.coalescer.request();
            let now = std::time::Instant::now();
            return (Vec::new(), self.coalescer.poll(now));
        }
        if frame.is_keyframe() {
            self.keyframe_arrived = true;
            self.coalescer.on_keyframe_received();
        }
        (self.packetizer.packetize(frame, now_ms), false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FrameFormat, FrameInfo, VideoFrameInfo};
    use bytes::Bytes;

    fn frame(is_keyframe: bool) -> Frame {
        Frame {
            format: FrameFormat::H264,
            payload: Bytes::from_static(&[0, 0, 0, 1, 0x65]),
            rtp_timestamp: 90_000,
            ntp_timestamp: None,
            info: FrameInfo::Video(VideoFrameInfo {
                width: 640,
                height: 480,
                is_keyframe,
            }),
        }
    }

    #[test]
    fn drops_p_frame_before_first_keyframe() {
        let mut adapter = VideoSendAdapter::new(2222, 102);
        let (packets, request) = adapter.on_frame(&frame(false), 0);
        assert!(packets.is_empty());
        assert!(request);
    }

    #[test]
    fn emits_packets_once_keyframe_arrives() {
        let mut adapter = VideoSendAdapter::new(2222, 102);
        let (packets, _) = adapter.on_frame(&frame(true), 0);
        assert!(!packets.is_empty());
        let (packets, request) = adapter.on_frame(&frame(false), 33);
        assert!(!packets.is_empty());
        assert!(!request);
    }
}
