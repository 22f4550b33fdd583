//! §4.4 `RtcAdapter`: the per-SSRC RTP/RTCP module flattened into four
//! concrete types (video/audio × send/receive) rather than the original's
//! deep `Call`/`PacketRouter`/`ProcessThread` hierarchy (§9 redesign
//! note). Each type exposes the same four operations the spec's
//! `RtcAdapter` interface names -- `on_rtp_data`, `on_rtcp_data`,
//! `on_frame`, `ssrc` -- even though no single trait unifies them here,
//! since video and audio receive paths differ enough (jitter buffering
//! vs. none) that a shared trait would force an awkward blanket impl.

pub mod audio_receive;
pub mod audio_send;
pub mod video_receive;
pub mod video_send;

pub use audio_receive::AudioReceiveAdapter;
pub use audio_send::AudioSendAdapter;
pub use video_receive::VideoReceiveAdapter;
pub use video_send::VideoSendAdapter;

use std::time::{Duration, Instant};

/// Shared keyframe-request coalescing state (§4.4 "Requests for a key
/// frame are coalesced"): one pending flag plus a 1 s retry window, used
/// identically by the video receive and send adapters (S3).
#[derive(Debug)]
pub(crate) struct KeyframeRequestCoalescer {
    pending: bool,
    last_sent: Option<Instant>,
    retry_interval: Duration,
}

impl KeyframeRequestCoalescer {
    pub(crate) fn new(retry_interval: Duration) -> Self {
        KeyframeRequestCoalescer {
            pending: false,
            last_sent: None,
            retry_interval,
        }
    }

    /// Marks a keyframe as wanted. Multiple calls within the same window
    /// collapse to the single pending flag (S3: 5 rapid calls in 100 ms
    /// yield one emission).
    pub(crate) fn request(&mut self) {
        self.pending = true;
    }

    /// Called once per inbound frame (or once per timer tick): returns
    /// `true` exactly when a `REQUEST_KEYFRAME` should be emitted this
    /// round, clearing the pending flag and arming the retry window.
    pub(crate) fn poll(&mut self, now: Instant) -> bool {
        if !self.pending {
            return false;
        }
        if let Some(last) = self.last_sent {
            if now.duration_since(last) < self.retry_interval {
                return false;
            }
        }
        self.pending = false;
        self.last_sent = Some(now);
        true
    }

    pub(crate) fn on_keyframe_received(&mut self) {
        self.pending = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coalesces_rapid_requests_into_one_emission() {
        let mut coalescer = KeyframeRequestCoalescer::new(Duration::from_secs(1));
        let t0 = Instant::now();
        for _ in 0..5 {
            coalescer.request();
        }
        assert!(coalescer.poll(t0));
        assert!(!coalescer.poll(t0)); // same instant, already cleared
    }

    #[test]
    fn retries_at_most_once_per_second() {
        let mut coalescer = KeyframeRequestCoalescer::new(Duration::from_secs(1));
        let t0 = Instant::now();
        coalescer.request();
        assert!(coalescer.poll(t0));
        coalescer.request();
        assert!(!coalescer.poll(t0 + Duration::from_millis(500)));
        assert!(coalescer.poll(t0 + Duration::from_secs(1)));
    }
}
