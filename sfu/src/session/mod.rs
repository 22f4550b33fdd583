//! §3 `MediaStream`/`WebrtcTrack`: the L3 binding between one `mid` and
//! its adapters, and the grouping of tracks that make up one m-line
//! direction-pair.

pub mod media_stream;
pub mod webrtc_track;

pub use media_stream::{MediaStream, StreamRole};
pub use webrtc_track::{TrackKind, WebrtcTrack};
