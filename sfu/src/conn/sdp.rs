use crate::conn::PeerConnectionOptions;
use crate::error::{Error, Result};
use crate::frame::FrameFormat;
use crate::session::TrackKind;
use sdp::description::media::MediaDescription;
use sdp::description::session::SessionDescription;
use std::io::Cursor;

/// The SDP type tag in the offer/answer model (RFC 3264), carried
/// alongside the raw text the way `rtc`'s own `RTCSessionDescription`
/// does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SdpType {
    #[default]
    Unspecified,
    Offer,
    Pranswer,
    Answer,
    Rollback,
}

/// Wraps one SDP blob, parsing it eagerly so malformed SDP is rejected
/// at the signaling boundary rather than surfacing later as a confusing
/// negotiation failure.
#[derive(Debug, Clone)]
pub struct SessionDescriptionWrapper {
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescriptionWrapper {
    pub fn offer(sdp: String) -> Result<Self> {
        Self::new(SdpType::Offer, sdp)
    }

    pub fn answer(sdp: String) -> Result<Self> {
        Self::new(SdpType::Answer, sdp)
    }

    fn new(sdp_type: SdpType, sdp: String) -> Result<Self> {
        let wrapper = SessionDescriptionWrapper { sdp_type, sdp };
        wrapper.unmarshal()?;
        Ok(wrapper)
    }

    pub fn unmarshal(&self) -> Result<SessionDescription> {
        let mut reader = Cursor::new(self.sdp.as_bytes());
        SessionDescription::unmarshal(&mut reader)
            .map_err(|e| Error::SdpParse(e.to_string()))
    }
}

/// One `m=` line's negotiated parameters, resolved from the remote
/// offer per §4.7 `signalling("offer", sdp)`: media type, direction,
/// chosen format (first intersection with local preferences), mid, and
/// the simulcast `rid`s (if any).
#[derive(Debug, Clone)]
pub struct NegotiatedMediaLine {
    pub mid: String,
    pub kind: TrackKind,
    pub payload_type: u8,
    pub codec_name: String,
    pub clock_rate: u64,
    pub channels: u8,
    pub ssrc: Option<u32>,
    pub rtx_ssrc: Option<u32>,
    pub rids: Vec<String>,
    pub rtcp_mux: bool,
    pub bundle: bool,
    pub ice_ufrag: Option<String>,
    pub ice_pwd: Option<String>,
}

/// Selects the first payload type in the remote line's format list that
/// also appears in `preferred_formats`, mirroring "chosen format (first
/// intersection with local preferences)".
pub fn negotiate_format(remote_formats: &[u8], preferred_formats: &[u8]) -> Option<u8> {
    preferred_formats
        .iter()
        .find(|pt| remote_formats.contains(pt))
        .copied()
}

/// `codecName/clockRate[/channels]` parsed from the `a=rtpmap` attribute
/// matching `payload_type`, defaulting to Opus/48000/2 when absent (the
/// only audio codec this engine forwards) so a malformed offer still
/// negotiates something playable rather than panicking.
fn rtpmap_for(media: &MediaDescription, payload_type: u8, kind: TrackKind) -> (String, u64, u8) {
    for attr in &media.attributes {
        if attr.key != "rtpmap" {
            continue;
        }
        let Some(value) = &attr.value else { continue };
        let mut parts = value.splitn(2, ' ');
        let Some(pt) = parts.next().and_then(|p| p.parse::<u8>().ok()) else {
            continue;
        };
        if pt != payload_type {
            continue;
        }
        let Some(codec) = parts.next() else { continue };
        let mut codec_parts = codec.split('/');
        let name = codec_parts.next().unwrap_or_default().to_string();
        let clock_rate = codec_parts.next().and_then(|c| c.parse().ok()).unwrap_or(match kind {
            TrackKind::Video => crate::constants::VIDEO_CLOCK_RATE,
            TrackKind::Audio => 48_000,
        });
        let channels = codec_parts.next().and_then(|c| c.parse().ok()).unwrap_or(1);
        return (name, clock_rate, channels);
    }
    match kind {
        TrackKind::Video => ("H264".to_string(), crate::constants::VIDEO_CLOCK_RATE, 1),
        TrackKind::Audio => ("opus".to_string(), 48_000, 2),
    }
}

/// Maps a negotiated video codec name onto the adapter-level
/// [`FrameFormat`] (§4.4); unrecognized names fall back to H.264 since
/// that is the only format this engine's keyframe detection implements
/// today.
pub fn frame_format_for(codec_name: &str) -> FrameFormat {
    match codec_name.to_ascii_uppercase().as_str() {
        "VP8" => FrameFormat::Vp8,
        "VP9" => FrameFormat::Vp9,
        _ => FrameFormat::H264,
    }
}

fn parse_ssrcs(media: &MediaDescription) -> Vec<u32> {
    let mut seen = Vec::new();
    for attr in &media.attributes {
        if attr.key != "ssrc" {
            continue;
        }
        if let Some(ssrc) = attr
            .value
            .as_ref()
            .and_then(|v| v.split_whitespace().next())
            .and_then(|token| token.parse::<u32>().ok())
        {
            if !seen.contains(&ssrc) {
                seen.push(ssrc);
            }
        }
    }
    seen
}

/// Negotiates every `m=` line of a parsed remote offer against this
/// connection's local format preferences (§4.7 `signalling("offer",
/// sdp)`): media type from `media_name.media`, chosen format via
/// [`negotiate_format`], simulcast `rid`s, and the per-mid ssrc(s). A
/// line with no `a=mid`, or whose formats share nothing with the local
/// preference list, is skipped -- it never becomes a `WebrtcTrack`.
pub fn negotiate_media_lines(
    parsed: &SessionDescription,
    options: &PeerConnectionOptions,
) -> Vec<NegotiatedMediaLine> {
    let mut lines = Vec::new();
    for media in &parsed.media_descriptions {
        let Some(mid) = media.attribute("mid").flatten() else {
            continue;
        };
        let kind = if media.media_name.media.eq_ignore_ascii_case("video") {
            TrackKind::Video
        } else if media.media_name.media.eq_ignore_ascii_case("audio") {
            TrackKind::Audio
        } else {
            continue;
        };

        let remote_formats: Vec<u8> = media
            .media_name
            .formats
            .iter()
            .filter_map(|f| f.parse().ok())
            .collect();
        let preferred = match kind {
            TrackKind::Video => &options.preferred_video_formats,
            TrackKind::Audio => &options.preferred_audio_formats,
        };
        let Some(payload_type) = negotiate_format(&remote_formats, preferred) else {
            continue;
        };

        let (codec_name, clock_rate, channels) = rtpmap_for(media, payload_type, kind);
        let ssrcs = parse_ssrcs(media);
        let rids = media
            .attributes
            .iter()
            .filter(|a| a.key == "rid")
            .filter_map(|a| a.value.as_deref())
            .filter_map(|v| v.split_whitespace().next())
            .map(|s| s.to_string())
            .collect();

        lines.push(NegotiatedMediaLine {
            mid: mid.to_string(),
            kind,
            payload_type,
            codec_name,
            clock_rate,
            channels,
            ssrc: ssrcs.first().copied(),
            rtx_ssrc: ssrcs.get(1).copied(),
            rids,
            rtcp_mux: media.attribute("rtcp-mux").is_some(),
            bundle: options.bundle,
            ice_ufrag: media.attribute("ice-ufrag").flatten().map(|s| s.to_string()),
            ice_pwd: media.attribute("ice-pwd").flatten().map(|s| s.to_string()),
        });
    }
    lines
}

/// Generates a fresh local ICE username fragment and password (§4.2):
/// this connection's own credentials, handed back in the answer and
/// installed on the local `ice::Agent` before the remote's checks can
/// arrive.
pub fn local_ice_credentials() -> (String, String) {
    use rand::distr::Alphanumeric;
    use rand::Rng;
    let mut rng = rand::rng();
    let ufrag: String = (&mut rng).sample_iter(&Alphanumeric).take(8).map(char::from).collect();
    let pwd: String = (&mut rng).sample_iter(&Alphanumeric).take(24).map(char::from).collect();
    (ufrag, pwd)
}

/// Builds the local answer SDP for one negotiated offer (§4.7): one
/// `m=` section per negotiated line, each carrying its mid, chosen
/// payload type, local ICE credentials, and negotiated ssrc/rid. DTLS
/// fingerprint emission is left for once certificate generation is
/// wired into `DtlsTransport`; until then the answer negotiates ICE and
/// media parameters only.
pub fn build_answer(lines: &[NegotiatedMediaLine], ice_ufrag: &str, ice_pwd: &str, setup: &str) -> String {
    let mut sdp = String::new();
    sdp.push_str("v=0\r\n");
    sdp.push_str("o=- 0 0 IN IP4 0.0.0.0\r\n");
    sdp.push_str("s=-\r\n");
    sdp.push_str("t=0 0\r\n");
    if !lines.is_empty() {
        let mids: Vec<&str> = lines.iter().map(|l| l.mid.as_str()).collect();
        sdp.push_str(&format!("a=group:BUNDLE {}\r\n", mids.join(" ")));
    }
    for line in lines {
        let media = match line.kind {
            TrackKind::Audio => "audio",
            TrackKind::Video => "video",
        };
        sdp.push_str(&format!("m={media} 9 UDP/TLS/RTP/SAVPF {}\r\n", line.payload_type));
        sdp.push_str("c=IN IP4 0.0.0.0\r\n");
        sdp.push_str(&format!("a=mid:{}\r\n", line.mid));
        sdp.push_str(&format!("a=ice-ufrag:{ice_ufrag}\r\n"));
        sdp.push_str(&format!("a=ice-pwd:{ice_pwd}\r\n"));
        sdp.push_str(&format!("a=setup:{setup}\r\n"));
        sdp.push_str("a=sendrecv\r\n");
        if line.rtcp_mux {
            sdp.push_str("a=rtcp-mux\r\n");
        }
        if let Some(ssrc) = line.ssrc {
            sdp.push_str(&format!("a=ssrc:{ssrc} cname:sfu\r\n"));
        }
        for rid in &line.rids {
            sdp.push_str(&format!("a=rid:{rid} recv\r\n"));
        }
    }
    sdp
}
