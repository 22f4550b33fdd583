use crate::frame::{Frame, FrameKind};
use std::cell::RefCell;
use std::rc::{Rc, Weak};

/// Flattened capability interface a frame producer exposes (§9 "Flatten
/// into two capability interfaces"). A `WebrtcTrack`'s constructor side
/// implements this.
pub trait FrameProducer {
    fn add_destination(&mut self, kind: FrameKind, dest: Weak<RefCell<dyn FrameConsumer>>);
    fn remove_destination(&mut self, kind: FrameKind, dest: &Weak<RefCell<dyn FrameConsumer>>);
}

/// Flattened capability interface a frame consumer exposes. A
/// `WebrtcTrack`'s packetizer side implements this.
pub trait FrameConsumer {
    fn deliver_frame(&mut self, frame: &Frame);
}

/// §4.6 `FrameSource`: fan-out of decoded frames to N subscribers with
/// weak ownership. Subscribers hold strong references to their own
/// adapters; this type holds only [`Weak`] references, so a subscriber's
/// teardown severs its dataflow without the publisher reaching back into
/// it (§4.6, §8 property 2, scenario S4).
///
/// Single-threaded by construction: every `FrameSource` lives on exactly
/// one worker, so `Rc`/`RefCell`/`Weak` replace the original's
/// `unordered_map<T*, weak_ptr<T>>` without needing atomics.
#[derive(Default)]
pub struct FrameSource {
    audio: Vec<Weak<RefCell<dyn FrameConsumer>>>,
    video: Vec<Weak<RefCell<dyn FrameConsumer>>>,
    data: Vec<Weak<RefCell<dyn FrameConsumer>>>,
}

impl FrameSource {
    pub fn new() -> Self {
        Self::default()
    }

    fn bucket_mut(&mut self, kind: FrameKind) -> &mut Vec<Weak<RefCell<dyn FrameConsumer>>> {
        match kind {
            FrameKind::Audio => &mut self.audio,
            FrameKind::Video => &mut self.video,
            FrameKind::Data => &mut self.data,
        }
    }

    pub fn add_destination(&mut self, kind: FrameKind, dest: &Rc<RefCell<dyn FrameConsumer>>) {
        self.bucket_mut(kind).push(Rc::downgrade(dest));
    }

    /// `deliverFrame(frame)`: iterates the matching collection, pruning
    /// any destination whose weak reference has expired inline. A
    /// destination that disappears mid-iteration does not crash the
    /// source -- it is simply skipped and dropped from the bucket.
    pub fn deliver_frame(&mut self, frame: &Frame) {
        let bucket = self.bucket_mut(frame.kind());
        bucket.retain_mut(|weak| match weak.upgrade() {
            Some(strong) => {
                strong.borrow_mut().deliver_frame(frame);
                true
            }
            None => false,
        });
    }

    pub fn destination_count(&self, kind: FrameKind) -> usize {
        match kind {
            FrameKind::Audio => self.audio.len(),
            FrameKind::Video => self.video.len(),
            FrameKind::Data => self.data.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FrameFormat, FrameInfo, VideoFrameInfo};

    struct Recorder {
        count: usize,
    }

    impl FrameConsumer for Recorder {
        fn deliver_frame(&mut self, _frame: &Frame) {
            self.count += 1;
        }
    }

    fn sample_frame() -> Frame {
        Frame {
            format: FrameFormat::H264,
            payload: bytes::Bytes::new(),
            rtp_timestamp: 90_000,
            ntp_timestamp: None,
            info: FrameInfo::Video(VideoFrameInfo {
                width: 640,
                height: 480,
                is_keyframe: true,
            }),
        }
    }

    #[test]
    fn delivers_to_live_destination() {
        let recorder = Rc::new(RefCell::new(Recorder { count: 0 }));
        let mut source = FrameSource::new();
        let dest: Rc<RefCell<dyn FrameConsumer>> = recorder.clone();
        source.add_destination(FrameKind::Video, &dest);
        source.deliver_frame(&sample_frame());
        assert_eq!(recorder.borrow().count, 1);
        assert_eq!(source.destination_count(FrameKind::Video), 1);
    }

    #[test]
    fn prunes_expired_destination_without_panicking() {
        let mut source = FrameSource::new();
        {
            let dest: Rc<RefCell<dyn FrameConsumer>> =
                Rc::new(RefCell::new(Recorder { count: 0 }));
            source.add_destination(FrameKind::Audio, &dest);
            assert_eq!(source.destination_count(FrameKind::Audio), 1);
        }
        // dest dropped: the weak reference is now expired
        let mut audio_frame = sample_frame();
        audio_frame.info = FrameInfo::Audio(crate::frame::AudioFrameInfo::default());
        source.deliver_frame(&audio_frame);
        assert_eq!(source.destination_count(FrameKind::Audio), 0);
    }
}
