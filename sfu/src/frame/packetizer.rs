//! §4.5: the two `FramePacketizer` flavors that sit at the bottom of a
//! `WebrtcTrack`'s send side, turning [`Frame`]s back into RTP for
//! delivery to a subscriber's adapter.

use crate::frame::{Frame, FrameInfo};
use rtp::header::Header;
use rtp::packet::Packet;

/// §4.3 "SSRC rewriting on the send side": outbound sequence numbers
/// advance by exactly 1 per packet regardless of the origin stream's
/// numbering, and a keyframe resynchronizes the RTP timestamp offset so
/// the first packet on a fresh stream begins at a wallclock-derived
/// timestamp (§4.4 step 2, S1).
struct OutboundStream {
    ssrc: u32,
    payload_type: u8,
    seq_no: u16,
    timestamp_offset: Option<i64>,
}

impl OutboundStream {
    fn new(ssrc: u32, payload_type: u8) -> Self {
        OutboundStream {
            ssrc,
            payload_type,
            seq_no: 0,
            timestamp_offset: None,
        }
    }

    fn next_seq_no(&mut self) -> u16 {
        let seq = self.seq_no;
        self.seq_no = self.seq_no.wrapping_add(1);
        seq
    }

    /// On the first keyframe, aligns the outbound clock to wallclock
    /// time: `timeStampOffset = clock_rate * now_ms / 1000 - frame.timeStamp`.
    fn resync_on_keyframe(&mut self, frame_timestamp: u32, clock_rate: u64, now_ms: u64) {
        if self.timestamp_offset.is_none() {
            let wallclock = (clock_rate as u128 * now_ms as u128 / 1000) as i64;
            self.timestamp_offset = Some(wallclock - frame_timestamp as i64);
        }
    }

    fn outbound_timestamp(&self, frame_timestamp: u32) -> u32 {
        match self.timestamp_offset {
            Some(offset) => (frame_timestamp as i64 + offset) as u32,
            None => frame_timestamp,
        }
    }
}

pub struct AudioFramePacketizer {
    stream: OutboundStream,
    clock_rate: u64,
}

impl AudioFramePacketizer {
    pub fn new(ssrc: u32, payload_type: u8, clock_rate: u64) -> Self {
        AudioFramePacketizer {
            stream: OutboundStream::new(ssrc, payload_type),
            clock_rate,
        }
    }

    /// One frame maps to exactly one RTP packet (§4.5): no fragmentation,
    /// no RED/FEC.
    pub fn packetize(&mut self, frame: &Frame, now_ms: u64) -> Packet {
        if frame.is_keyframe() {
            self.stream.resync_on_keyframe(frame.rtp_timestamp, self.clock_rate, now_ms);
        }
        Packet {
            header: Header {
                version: 2,
                payload_type: self.stream.payload_type,
                sequence_number: self.stream.next_seq_no(),
                timestamp: self.stream.outbound_timestamp(frame.rtp_timestamp),
                ssrc: self.stream.ssrc,
                marker: true,
                ..Default::default()
            },
            payload: frame.payload.clone(),
        }
    }
}

/// §4.4: sequence-number smoothing for forwarded RTP streams whose
/// origin step is not always 1 (source switches, simulcast layer
/// changes). Steps of 1 or greater than 10 collapse to a +1 advance;
/// smaller steps (2..=10) are preserved exactly, so genuine gaps in a
/// single source's own numbering still show up downstream (S5).
#[derive(Debug, Default)]
pub struct SequenceNumberSmoother {
    last_origin_seq_no: Option<u16>,
    seq_no: u16,
}

impl SequenceNumberSmoother {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rewrite(&mut self, origin_seq_no: u16) -> u16 {
        let step = match self.last_origin_seq_no {
            None => 1,
            Some(last) => {
                let delta = origin_seq_no.wrapping_sub(last);
                if delta == 1 || delta > 10 {
                    1
                } else {
                    delta
                }
            }
        };
        self.last_origin_seq_no = Some(origin_seq_no);
        self.seq_no = self.seq_no.wrapping_add(step);
        self.seq_no
    }
}

/// Scans H.264 Annex B payload for NALU start codes (`00 00 01` or
/// `00 00 00 01`) and returns byte offsets into `payload`, used to build
/// the RTP sender's fragmentation header for non-single-NALU frames
/// (§4.4 step 3).
fn scan_nalu_offsets(payload: &[u8]) -> Vec<usize> {
    let mut offsets = Vec::new();
    let mut i = 0;
    while i + 2 < payload.len() {
        if payload[i] == 0 && payload[i + 1] == 0 {
            if payload[i + 2] == 1 {
                offsets.push(i + 3);
                i += 3;
                continue;
            }
            if i + 3 < payload.len() && payload[i + 2] == 0 && payload[i + 3] == 1 {
                offsets.push(i + 4);
                i += 4;
                continue;
            }
        }
        i += 1;
    }
    offsets
}

pub struct VideoFramePacketizer {
    stream: OutboundStream,
    clock_rate: u64,
}

impl VideoFramePacketizer {
    pub fn new(ssrc: u32, payload_type: u8) -> Self {
        VideoFramePacketizer {
            stream: OutboundStream::new(ssrc, payload_type),
            clock_rate: crate::constants::VIDEO_CLOCK_RATE,
        }
    }

    /// Emits one RTP packet per NALU found in the frame (RED/ULPFEC
    /// injection and transport-cc marking are layered on by the owning
    /// `VideoSendAdapter`; this packetizer only performs the
    /// frame→NALU→RTP conversion described in §4.5).
    pub fn packetize(&mut self, frame: &Frame, now_ms: u64) -> Vec<Packet> {
        if frame.is_keyframe() {
            self.stream.resync_on_keyframe(frame.rtp_timestamp, self.clock_rate, now_ms);
        }
        let timestamp = self.stream.outbound_timestamp(frame.rtp_timestamp);
        let offsets = scan_nalu_offsets(&frame.payload);
        let bounds: Vec<(usize, usize)> = if offsets.is_empty() {
            vec![(0, frame.payload.len())]
        } else {
            let mut b = Vec::with_capacity(offsets.len());
            for (idx, &start) in offsets.iter().enumerate() {
                let end = offsets.get(idx + 1).map(|&n| n).unwrap_or(frame.payload.len());
                b.push((start, end));
            }
            b
        };
        let last = bounds.len().saturating_sub(1);
        bounds
            .into_iter()
            .enumerate()
            .map(|(idx, (start, end))| Packet {
                header: Header {
                    version: 2,
                    payload_type: self.stream.payload_type,
                    sequence_number: self.stream.next_seq_no(),
                    timestamp,
                    ssrc: self.stream.ssrc,
                    marker: idx == last,
                    ..Default::default()
                },
                payload: frame.payload.slice(start..end),
            })
            .collect()
    }

    /// Whether `frame` still has visible `is_keyframe` info, exposed so
    /// a send adapter can decide whether to clear a pending keyframe
    /// request after this packetization.
    pub fn describes_keyframe(frame: &Frame) -> bool {
        matches!(frame.info, FrameInfo::Video(v) if v.is_keyframe)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_smoother_collapses_step_one_and_large_jumps() {
        let mut smoother = SequenceNumberSmoother::new();
        assert_eq!(smoother.rewrite(5), 1);
        assert_eq!(smoother.rewrite(7), 3); // step=2, preserved
        assert_eq!(smoother.rewrite(8), 4); // step=1, collapses to +1
        assert_eq!(smoother.rewrite(50), 5); // step=42 > 10, collapses to +1
    }

    #[test]
    fn nalu_scan_finds_three_and_four_byte_start_codes() {
        let payload = [0, 0, 0, 1, 0x67, 0, 0, 1, 0x68, 0xaa];
        let offsets = scan_nalu_offsets(&payload);
        assert_eq!(offsets, vec![4, 8]);
    }

    #[test]
    fn audio_packetizer_advances_sequence_by_one() {
        let mut packetizer = AudioFramePacketizer::new(1111, 111, 48_000);
        let frame = Frame {
            format: crate::frame::FrameFormat::Opus,
            payload: bytes::Bytes::from_static(b"abc"),
            rtp_timestamp: 1000,
            ntp_timestamp: None,
            info: FrameInfo::Audio(crate::frame::AudioFrameInfo::default()),
        };
        let p1 = packetizer.packetize(&frame, 0);
        let p2 = packetizer.packetize(&frame, 20);
        assert_eq!(p2.header.sequence_number, p1.header.sequence_number.wrapping_add(1));
    }
}
