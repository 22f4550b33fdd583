use crate::session::webrtc_track::WebrtcTrack;
use std::cell::RefCell;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamRole {
    Publisher,
    Subscriber,
}

/// §3 `MediaStream`: one m-line direction-pair, identified by
/// `(peerConnectionId, streamId)`. Holds the tracks bound to that
/// m-line, the role this connection plays for the stream, and the RTCP
/// feedback source/sink pair implied by that role (modeled here as a
/// flag the owning `PeerConnection` consults when routing RTCP, rather
/// than a separate object, since every RTCP path already runs through
/// the connection's single `DtlsTransport`).
///
/// Tracks are `Rc<RefCell<_>>` rather than owned outright: a subscriber
/// track must be shareable as a [`crate::frame::FrameConsumer`]
/// destination on another connection's publisher track (§4.6, §4.7
/// subscribe), and the `Agent` facade holds `PeerConnection`s the same
/// way for the identical reason.
pub struct MediaStream {
    connection_id: String,
    stream_id: String,
    role: StreamRole,
    tracks: Vec<Rc<RefCell<WebrtcTrack>>>,
}

impl MediaStream {
    pub fn new(connection_id: String, stream_id: String, role: StreamRole) -> Self {
        MediaStream {
            connection_id,
            stream_id,
            role,
            tracks: Vec::new(),
        }
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn role(&self) -> StreamRole {
        self.role
    }

    pub fn add_track(&mut self, track: WebrtcTrack) {
        self.tracks.push(Rc::new(RefCell::new(track)));
    }

    pub fn track(&self, mid: &str) -> Option<Rc<RefCell<WebrtcTrack>>> {
        self.tracks.iter().find(|t| t.borrow().mid() == mid).cloned()
    }

    pub fn tracks(&self) -> &[Rc<RefCell<WebrtcTrack>>] {
        &self.tracks
    }

    /// Resolves the track bound to `ssrc`, installing the SSRC↔mid
    /// binding on first sight for a track whose SSRC is not yet known
    /// (§3 invariant).
    pub fn track_by_ssrc(&self, ssrc: u32) -> Option<Rc<RefCell<WebrtcTrack>>> {
        self.tracks
            .iter()
            .find(|t| {
                let t = t.borrow();
                t.ssrc() == ssrc || t.rtx_ssrc() == Some(ssrc)
            })
            .cloned()
    }
}
