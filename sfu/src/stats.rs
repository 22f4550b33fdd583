//! Minimal WebRTC-stats-shaped reporting (§10.5 "stats collection
//! carried forward from the teacher, adapted to the new
//! `PeerConnection`/`Agent` types"). Scoped to what a forwarding-only
//! SFU can meaningfully report: no decoder/encoder stats, since this
//! crate never decodes.

use serde::{Deserialize, Serialize};
use std::time::Instant;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum StatsReportType {
    #[serde(rename = "inbound-rtp")]
    InboundRtp,
    #[serde(rename = "outbound-rtp")]
    OutboundRtp,
    #[serde(rename = "candidate-pair")]
    CandidatePair,
    #[serde(rename = "peer-connection")]
    PeerConnection,
}

/// Per-SSRC packet/byte counters, collected by the owning adapter and
/// surfaced on request rather than pushed -- nothing in the hot RTP path
/// blocks on stats collection.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RtpStreamStats {
    pub ssrc: u32,
    pub packets: u64,
    pub bytes: u64,
    pub packets_lost: u64,
    pub jitter: f64,
}

#[derive(Debug, Clone)]
pub struct ConnectionStats {
    pub connection_id: String,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

/// Aggregates stats across every track of one connection, handed out to
/// callers as a snapshot rather than as a live handle.
#[derive(Default)]
pub struct StatsCollector {
    streams: Vec<RtpStreamStats>,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, ssrc: u32, bytes: usize) {
        match self.streams.iter_mut().find(|s| s.ssrc == ssrc) {
            Some(entry) => {
                entry.packets += 1;
                entry.bytes += bytes as u64;
            }
            None => self.streams.push(RtpStreamStats {
                ssrc,
                packets: 1,
                bytes: bytes as u64,
                ..Default::default()
            }),
        }
    }

    pub fn snapshot(&self) -> Vec<RtpStreamStats> {
        self.streams.clone()
    }
}

/// Timestamped wrapper matching the `RTCStats` base dictionary shape
/// (`id`, `timestamp`, `type`) without attempting the full W3C stats
/// object model, which this SFU has no consumer for.
#[derive(Debug, Clone)]
pub struct StatsReport {
    pub id: String,
    pub timestamp: Instant,
    pub report_type: StatsReportType,
}
