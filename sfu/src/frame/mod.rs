//! L2/L3 frame model: the unit that crosses the packet/frame boundary
//! (§3 `DataPacket`, `Frame`) and the fan-out graph that moves frames
//! between tracks (§4.6 `FramePipeline`).

pub mod constructor;
pub mod packetizer;
pub mod pipeline;

use bytes::Bytes;
use std::time::Instant;

/// Tag dispatched on in the fan-out loop, flattening the deep
/// MediaSource/MediaSink inheritance of the original design (§9) into one
/// enum plus two capability traits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Audio,
    Video,
    Data,
}

/// §3 `DataPacket`: the unit that crosses layers up to the frame
/// boundary. `payload` is a COW buffer bounded to a 1500-byte MTU;
/// cloning a `DataPacket` is a refcount bump (`Bytes`), matching "packets
/// are shared past the demuxer".
#[derive(Debug, Clone)]
pub struct DataPacket {
    pub component_id: u8,
    pub packet_type: FrameKind,
    pub arrival: Instant,
    pub payload: Bytes,
}

impl DataPacket {
    pub const MAX_MTU: usize = 1500;

    pub fn new(component_id: u8, packet_type: FrameKind, payload: Bytes) -> Self {
        debug_assert!(payload.len() <= Self::MAX_MTU);
        DataPacket {
            component_id,
            packet_type,
            arrival: Instant::now(),
            payload,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameFormat {
    Opus,
    H264,
    Vp8,
    Vp9,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AudioFrameInfo {
    pub channels: u8,
    pub sample_rate: u32,
    pub level_dbov: Option<i8>,
    pub voice_activity: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct VideoFrameInfo {
    pub width: u16,
    pub height: u16,
    pub is_keyframe: bool,
}

#[derive(Debug, Clone, Copy)]
pub enum FrameInfo {
    Audio(AudioFrameInfo),
    Video(VideoFrameInfo),
}

/// §3 `Frame`: the unit above the packet layer, produced by a
/// `FrameConstructor` and consumed by a `FramePacketizer`.
#[derive(Debug, Clone)]
pub struct Frame {
    pub format: FrameFormat,
    pub payload: Bytes,
    pub rtp_timestamp: u32,
    /// NTP timestamp interpolated from the last two SR anchors by an
    /// `RtpToNtpEstimator`; `None` until the first sender report arrives.
    pub ntp_timestamp: Option<f64>,
    pub info: FrameInfo,
}

impl Frame {
    pub fn is_keyframe(&self) -> bool {
        matches!(self.info, FrameInfo::Video(v) if v.is_keyframe)
    }

    pub fn kind(&self) -> FrameKind {
        match self.info {
            FrameInfo::Audio(_) => FrameKind::Audio,
            FrameInfo::Video(_) => FrameKind::Video,
        }
    }
}

pub use constructor::{AudioFrameConstructor, VideoFrameConstructor};
pub use packetizer::{AudioFramePacketizer, VideoFramePacketizer};
pub use pipeline::{FrameConsumer, FrameProducer, FrameSource};
