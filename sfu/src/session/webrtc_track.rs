use crate::adapter::{AudioReceiveAdapter, AudioSendAdapter, VideoReceiveAdapter, VideoSendAdapter};
use crate::frame::pipeline::{FrameConsumer, FrameSource};
use crate::frame::Frame;
use rtp::packet::Packet;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

/// Either side of a `WebrtcTrack`: a publisher track owns the receive
/// adapter and feeds a [`FrameSource`]; a subscriber track owns the send
/// adapter and implements [`FrameConsumer`] (§3 invariant: "bound to
/// exactly one FrameSource and at most one FramePacketizer" -- modeled
/// here as an either/or rather than two optional slots, since the spec
/// never actually populates both on the same track).
enum TrackRole {
    Publisher {
        video: Option<VideoReceiveAdapter>,
        audio: Option<AudioReceiveAdapter>,
        source: FrameSource,
    },
    Subscriber {
        video: Option<VideoSendAdapter>,
        audio: Option<AudioSendAdapter>,
    },
}

/// The atomic media unit: one `mid` × one direction (§3). Owns its
/// format descriptor via the contained adapter, primary SSRC, optional
/// RTX SSRC, and the mid it is bound to; the SSRC↔mid binding itself is
/// installed by the owning `PeerConnection` on first matching packet
/// (§3 invariant).
pub struct WebrtcTrack {
    mid: String,
    kind: TrackKind,
    ssrc: u32,
    rtx_ssrc: Option<u32>,
    role: TrackRole,
    /// RTP produced by a subscriber-side `deliver_frame`, awaiting pickup
    /// by the owning `PeerConnection::flush_outbound` (§4.5/§4.7): a
    /// `FrameConsumer` has no transport of its own to write to, so
    /// packetized output is queued here rather than discarded.
    outbound: VecDeque<Packet>,
}

impl WebrtcTrack {
    pub fn new_video_publisher(mid: String, ssrc: u32, rtx_ssrc: Option<u32>, adapter: VideoReceiveAdapter) -> Self {
        WebrtcTrack {
            mid,
            kind: TrackKind::Video,
            ssrc,
            rtx_ssrc,
            role: TrackRole::Publisher {
                video: Some(adapter),
                audio: None,
                source: FrameSource::new(),
            },
            outbound: VecDeque::new(),
        }
    }

    pub fn new_audio_publisher(mid: String, ssrc: u32, adapter: AudioReceiveAdapter) -> Self {
        WebrtcTrack {
            mid,
            kind: TrackKind::Audio,
            ssrc,
            rtx_ssrc: None,
            role: TrackRole::Publisher {
                video: None,
                audio: Some(adapter),
                source: FrameSource::new(),
            },
            outbound: VecDeque::new(),
        }
    }

    pub fn new_video_subscriber(mid: String, ssrc: u32, adapter: VideoSendAdapter) -> Self {
        WebrtcTrack {
            mid,
            kind: TrackKind::Video,
            ssrc,
            rtx_ssrc: None,
            role: TrackRole::Subscriber {
                video: Some(adapter),
                audio: None,
            },
            outbound: VecDeque::new(),
        }
    }

    pub fn new_audio_subscriber(mid: String, ssrc: u32, adapter: AudioSendAdapter) -> Self {
        WebrtcTrack {
            mid,
            kind: TrackKind::Audio,
            ssrc,
            rtx_ssrc: None,
            role: TrackRole::Subscriber {
                video: None,
                audio: Some(adapter),
            },
            outbound: VecDeque::new(),
        }
    }

    pub fn mid(&self) -> &str {
        &self.mid
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    pub fn rtx_ssrc(&self) -> Option<u32> {
        self.rtx_ssrc
    }

    pub fn is_publisher(&self) -> bool {
        matches!(self.role, TrackRole::Publisher { .. })
    }

    /// Adds a subscriber to this publisher track's fan-out (§4.6). No-op
    /// when called on a subscriber track.
    pub fn add_destination(&mut self, dest: &Rc<RefCell<dyn FrameConsumer>>) {
        if let TrackRole::Publisher { source, .. } = &mut self.role {
            source.add_destination(
                match self.kind {
                    TrackKind::Audio => crate::frame::FrameKind::Audio,
                    TrackKind::Video => crate::frame::FrameKind::Video,
                },
                dest,
            );
        }
    }

    /// Feeds one inbound RTP packet through the publisher-side adapter;
    /// any resulting frame is fanned out to subscribers.
    pub fn on_rtp_data(&mut self, now: Instant, packet: Packet) {
        if let TrackRole::Publisher { video, audio, source } = &mut self.role {
            let frame = match (video, audio) {
                (Some(v), _) => v.on_rtp_data(now, packet).0,
                (_, Some(a)) => Some(a.on_rtp_data(&packet)),
                _ => None,
            };
            if let Some(frame) = frame {
                source.deliver_frame(&frame);
            }
        }
    }

    /// Packetizes one frame through the subscriber-side adapter,
    /// returning RTP ready for the `DtlsTransport`/`IceConnection` below.
    pub fn on_frame(&mut self, frame: &Frame, now_ms: u64) -> Vec<Packet> {
        match &mut self.role {
            TrackRole::Subscriber { video: Some(v), .. } => v.on_frame(frame, now_ms).0,
            TrackRole::Subscriber { audio: Some(a), .. } => vec![a.on_frame(frame, now_ms)],
            _ => Vec::new(),
        }
    }

    /// Drains the packets queued by `deliver_frame` since the last call,
    /// for the owning `PeerConnection::flush_outbound` to protect and
    /// hand to the transport.
    pub fn take_outbound(&mut self) -> Vec<Packet> {
        self.outbound.drain(..).collect()
    }
}

impl FrameConsumer for WebrtcTrack {
    /// Packetizes the forwarded frame and queues the resulting RTP on
    /// `outbound` (§4.6). Actual transmission onto the wire -- protecting
    /// with SRTP and writing through the selected ICE candidate pair --
    /// is driven by the owning `PeerConnection::flush_outbound`, since a
    /// track has no transport handle of its own to write through.
    fn deliver_frame(&mut self, frame: &Frame) {
        let packets = self.on_frame(frame, 0);
        self.outbound.extend(packets);
    }
}
