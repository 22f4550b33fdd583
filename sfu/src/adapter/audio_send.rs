use crate::frame::packetizer::SequenceNumberSmoother;
use crate::frame::{AudioFramePacketizer, Frame};
use rtp::packet::Packet;

/// §4.4 "Audio send": every inbound frame maps 1:1 to one RTP packet.
/// When forwarding already-encoded RTP unmodified, the origin sequence
/// number is rewritten through a [`SequenceNumberSmoother`] so source
/// switches don't break the subscriber's own numbering expectations
/// (S5); frames produced locally go through the ordinary packetizer.
pub struct AudioSendAdapter {
    packetizer: AudioFramePacketizer,
    smoother: SequenceNumberSmoother,
}

impl AudioSendAdapter {
    pub fn new(ssrc: u32, payload_type: u8, clock_rate: u64) -> Self {
        AudioSendAdapter {
            packetizer: AudioFramePacketizer::new(ssrc, payload_type, clock_rate),
            smoother: SequenceNumberSmoother::new(),
        }
    }

    pub fn on_frame(&mut self, frame: &Frame, now_ms: u64) -> Packet {
        self.packetizer.packetize(frame, now_ms)
    }

    /// Forwards an already-RTP-encoded packet unmodified except for the
    /// rewritten sequence number.
    pub fn forward_rtp(&mut self, mut packet: Packet) -> Packet {
        packet.header.sequence_number = self.smoother.rewrite(packet.header.sequence_number);
        packet
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use rtp::header::Header;

    #[test]
    fn forwarded_rtp_sequence_smooths_source_switch() {
        let mut adapter = AudioSendAdapter::new(3333, 111, 48_000);
        let mut pkt = |seq: u16| Packet {
            header: Header {
                version: 2,
                payload_type: 111,
                sequence_number: seq,
                timestamp: 0,
                ssrc: 9999,
                ..Default::default()
            },
            payload: Bytes::new(),
        };
        let p1 = adapter.forward_rtp(pkt(5));
        let p2 = adapter.forward_rtp(pkt(7));
        assert_eq!(p2.header.sequence_number, p1.header.sequence_number.wrapping_add(2));
    }
}
