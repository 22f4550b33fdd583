//! §4.7 `PeerConnection`: SDP negotiation, transport lifecycle, and the
//! set of `MediaStream`s bound to one connection.

pub mod event;
pub mod sdp;
pub mod state;

pub use event::PeerConnectionEvent;
pub use state::{ConnectionState, SignalingState};

use crate::adapter::{AudioReceiveAdapter, AudioSendAdapter, VideoReceiveAdapter, VideoSendAdapter};
use crate::error::{Error, Result};
use crate::net::dtls_transport::{DemuxedKind, DtlsRole, DtlsTransport, DtlsTransportEvent, DtlsTransportState};
use crate::net::ice_connection::{IceConnection, IceConnectionEvent, IceConnectionState};
use crate::session::{MediaStream, StreamRole, TrackKind, WebrtcTrack};
use ice::agent::Agent;
use rtp::packet::Packet;
use shared::marshal::{Marshal, Unmarshal};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionRole {
    Publisher,
    Subscriber,
}

impl From<ConnectionRole> for StreamRole {
    fn from(role: ConnectionRole) -> Self {
        match role {
            ConnectionRole::Publisher => StreamRole::Publisher,
            ConnectionRole::Subscriber => StreamRole::Subscriber,
        }
    }
}

/// Per-connection negotiation options, the Rust mapping of
/// `CreatePeer`'s `options` struct (§7): role, bundling, STUN URI, ICE
/// port range, and the local codec preference list consulted by
/// [`sdp::negotiate_format`].
pub struct PeerConnectionOptions {
    pub connection_id: String,
    pub role: ConnectionRole,
    pub bundle: bool,
    pub rtcp_mux: bool,
    pub trickle: bool,
    pub preferred_video_formats: Vec<u8>,
    pub preferred_audio_formats: Vec<u8>,
}

/// One video transport and, unless bundled, a distinct audio transport
/// (§3 "PeerConnection ... Holds: a video transport and optionally an
/// audio transport").
struct Transports {
    video: (IceConnection, DtlsTransport),
    audio: Option<(IceConnection, DtlsTransport)>,
}

/// Holds the SDP negotiation, transport lifecycle, and the set of
/// `MediaStream`s for one connection (§4.7).
pub struct PeerConnection {
    connection_id: String,
    options: PeerConnectionOptions,
    state: ConnectionState,
    signaling_state: SignalingState,
    transports: Option<Transports>,
    streams: Vec<MediaStream>,
    events: VecDeque<PeerConnectionEvent>,
    running: bool,
}

impl PeerConnection {
    /// `init()`: validates the option struct and prepares the connection
    /// to accept transports once `signalling` constructs them. Does not
    /// yet start ICE (§4.7).
    pub fn new(options: PeerConnectionOptions) -> Result<Self> {
        if options.connection_id.is_empty() {
            return Err(Error::InvalidArgument("connection_id must not be empty".into()));
        }
        Ok(PeerConnection {
            connection_id: options.connection_id.clone(),
            options,
            state: ConnectionState::Initial,
            signaling_state: SignalingState::Stable,
            transports: None,
            streams: Vec::new(),
            events: VecDeque::new(),
            running: true,
        })
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn signaling_state(&self) -> SignalingState {
        self.signaling_state
    }

    /// `signalling("offer", sdp)`: parses the remote SDP, negotiates
    /// format/direction/rid per m-line ([`sdp::negotiate_media_lines`]),
    /// creates the transports and one `WebrtcTrack` per negotiated mid,
    /// builds and emits a local answer, and starts the transports.
    /// Completion is posted as `CONN_SDP_PROCESSED` per negotiated mid.
    pub fn signalling_offer(
        &mut self,
        offer: &sdp::SessionDescriptionWrapper,
        video_agent: Agent,
        audio_agent: Option<Agent>,
        remote_addr: SocketAddr,
    ) -> Result<()> {
        if self.state.is_terminal() {
            return Err(Error::InvalidConnectionState(self.state));
        }
        let parsed = offer.unmarshal()?;
        let lines = sdp::negotiate_media_lines(&parsed, &self.options);

        let mut video = (
            IceConnection::new(video_agent, self.options.bundle),
            DtlsTransport::new(DtlsRole::Server, remote_addr, None),
        );
        let mut audio = audio_agent.map(|agent| {
            (
                IceConnection::new(agent, self.options.bundle),
                DtlsTransport::new(DtlsRole::Server, remote_addr, None),
            )
        });

        let role = StreamRole::from(self.options.role);
        let stream_id = self.connection_id.clone();
        let mut stream = MediaStream::new(self.connection_id.clone(), stream_id, role);

        for line in &lines {
            let ice = if line.kind == TrackKind::Audio && audio.is_some() {
                &mut audio.as_mut().unwrap().0
            } else {
                &mut video.0
            };
            if let (Some(ufrag), Some(pwd)) = (&line.ice_ufrag, &line.ice_pwd) {
                ice.set_remote_credentials(ufrag.clone(), pwd.clone())?;
            }

            let track = self.build_track(line);
            stream.add_track(track);

            self.events.push_back(PeerConnectionEvent::SdpProcessed(line.mid.clone()));
        }
        self.add_stream(stream);

        self.transports = Some(Transports { video, audio });
        self.signaling_state = SignalingState::HaveRemoteOffer;

        let (ice_ufrag, ice_pwd) = sdp::local_ice_credentials();
        let answer = sdp::build_answer(&lines, &ice_ufrag, &ice_pwd, "passive");
        self.events
            .push_back(PeerConnectionEvent::LocalDescription(answer));

        self.update_state(ConnectionState::Started);
        Ok(())
    }

    /// Builds one `WebrtcTrack` from a negotiated m-line: this
    /// connection's `role` decides whether it gets a receive adapter
    /// (publisher) or a send adapter (subscriber) (§3, §4.7).
    fn build_track(&self, line: &sdp::NegotiatedMediaLine) -> WebrtcTrack {
        let ssrc = line.ssrc.unwrap_or(0);
        match (self.options.role, line.kind) {
            (ConnectionRole::Publisher, TrackKind::Video) => {
                let format = sdp::frame_format_for(&line.codec_name);
                WebrtcTrack::new_video_publisher(
                    line.mid.clone(),
                    ssrc,
                    line.rtx_ssrc,
                    VideoReceiveAdapter::new(ssrc, format),
                )
            }
            (ConnectionRole::Publisher, TrackKind::Audio) => WebrtcTrack::new_audio_publisher(
                line.mid.clone(),
                ssrc,
                AudioReceiveAdapter::new(ssrc, line.clock_rate, line.channels, None),
            ),
            (ConnectionRole::Subscriber, TrackKind::Video) => WebrtcTrack::new_video_subscriber(
                line.mid.clone(),
                ssrc,
                VideoSendAdapter::new(ssrc, line.payload_type),
            ),
            (ConnectionRole::Subscriber, TrackKind::Audio) => WebrtcTrack::new_audio_subscriber(
                line.mid.clone(),
                ssrc,
                AudioSendAdapter::new(ssrc, line.payload_type, line.clock_rate),
            ),
        }
    }

    pub fn add_stream(&mut self, stream: MediaStream) {
        self.streams.push(stream);
    }

    pub fn stream_mut(&mut self, stream_id: &str) -> Option<&mut MediaStream> {
        self.streams.iter_mut().find(|s| s.stream_id() == stream_id)
    }

    pub fn streams(&self) -> &[MediaStream] {
        &self.streams
    }

    /// `addRemoteCandidate(mid, mLineIndex, candidate)`.
    pub fn add_remote_candidate(&mut self, is_audio: bool, candidate: Box<dyn ice::candidate::Candidate>) -> Result<()> {
        let transports = self.transports.as_mut().ok_or(Error::NoRemoteDescription)?;
        let ice = if is_audio {
            &mut transports
                .audio
                .as_mut()
                .ok_or_else(|| Error::InvalidArgument("no audio transport (bundled)".into()))?
                .0
        } else {
            &mut transports.video.0
        };
        ice.set_remote_candidates(vec![candidate])
    }

    pub fn remove_remote_candidate(&mut self, _is_audio: bool, _candidate_id: &str) -> Result<()> {
        // The vendored ICE agent does not expose candidate removal by id;
        // trickle removal degrades to a no-op, matching passive handling
        // of `a=remove-candidate` elsewhere in the ecosystem.
        Ok(())
    }

    /// Subscribe: wires each subscriber track of `subscriber_tracks` as a
    /// destination of the matching publisher track in `self` by name
    /// (`audio`, `video`). Idempotent -- adding the same destination
    /// twice is harmless since [`crate::frame::FrameSource`] dedupes on
    /// delivery, not on insertion time, but is avoided for clarity.
    pub fn subscribe(
        &mut self,
        stream_id: &str,
        subscriber_tracks: &[std::rc::Rc<std::cell::RefCell<dyn crate::frame::FrameConsumer>>],
    ) -> Result<()> {
        let stream = self
            .stream_mut(stream_id)
            .ok_or_else(|| Error::MidNotFound(stream_id.to_string()))?;
        for track in stream.tracks() {
            if !track.borrow().is_publisher() {
                continue;
            }
            for dest in subscriber_tracks {
                track.borrow_mut().add_destination(dest);
            }
        }
        Ok(())
    }

    /// `updateState(transport_state)` rollup (§4.7): any transport
    /// `READY` promotes the whole connection to `CONN_READY` (PLI warm-up
    /// to subscribers is issued by the owning `Agent`, which has
    /// visibility into the subscription graph this type does not).
    pub fn update_state(&mut self, new_state: ConnectionState) {
        if self.state.is_terminal() {
            return;
        }
        if new_state == self.state {
            return;
        }
        self.state = new_state;
        self.events.push_back(PeerConnectionEvent::StateChange(new_state));
        if new_state == ConnectionState::Gathered && !self.options.trickle {
            // Local SDP emission is owned by the caller once transports
            // report their gathered candidates; this connection only
            // signals the transition.
        }
    }

    pub fn poll_event(&mut self) -> Option<PeerConnectionEvent> {
        self.events.pop_front()
    }

    /// Drains each transport's event queue (§4.7 `updateState`): ICE
    /// STUN traffic and DTLS ciphertext are pumped between the two
    /// layers, decrypted RTP is routed to the matching publisher track
    /// by ssrc, and `IceConnectionState`/`DtlsTransportState` changes
    /// are rolled up into this connection's `ConnectionState` -- the
    /// rule named in §4.7 ("any transport STARTED/GATHERED/READY/FAILED
    /// ⇒ CONN_*"), applied directly per event rather than requiring
    /// every transport to agree first.
    pub fn poll_transports(&mut self) -> Result<()> {
        let mut state_changes = Vec::new();
        let mut local_candidates = Vec::new();
        let mut inbound_rtp = Vec::new();

        if let Some(transports) = self.transports.as_mut() {
            let mut components: Vec<&mut (IceConnection, DtlsTransport)> = vec![&mut transports.video];
            if let Some(audio) = transports.audio.as_mut() {
                components.push(audio);
            }
            for (ice, dtls) in components {
                while let Some(event) = ice.poll_event() {
                    match event {
                        IceConnectionEvent::UpdateIceState(IceConnectionState::Failed) => {
                            state_changes.push(ConnectionState::Failed);
                        }
                        IceConnectionEvent::UpdateIceState(_) => {}
                        IceConnectionEvent::OnCandidate(candidate) => {
                            local_candidates.push(candidate.to_string());
                        }
                        IceConnectionEvent::OnPacketReceived(bytes) => {
                            dtls.handle_inbound(Instant::now(), bytes)?;
                        }
                    }
                }
                while let Some(event) = dtls.poll_event() {
                    match event {
                        DtlsTransportEvent::StateChange(state) => {
                            if let Some(mapped) = map_transport_state(state) {
                                state_changes.push(mapped);
                            }
                        }
                        DtlsTransportEvent::Data(DemuxedKind::Rtp, mut bytes) => {
                            inbound_rtp.push(Packet::unmarshal(&mut bytes)?);
                        }
                        DtlsTransportEvent::Data(_, _) => {}
                        DtlsTransportEvent::Transmit(bytes) => {
                            ice.send_data(1, &bytes)?;
                        }
                    }
                }
            }
        }

        for packet in inbound_rtp {
            let ssrc = packet.header.ssrc;
            if let Some(track) = self.streams.iter().find_map(|s| s.track_by_ssrc(ssrc)) {
                track.borrow_mut().on_rtp_data(Instant::now(), packet);
            }
        }
        for candidate in local_candidates {
            self.events.push_back(PeerConnectionEvent::LocalCandidate(candidate));
        }
        for state in state_changes {
            self.update_state(state);
        }
        Ok(())
    }

    /// Pushes RTP queued by subscriber tracks' `deliver_frame` out to
    /// the wire (§4.5/§4.6/§4.7): drains each subscriber track's
    /// `take_outbound`, marshals every packet, and protects/transmits
    /// it through the matching video/audio `DtlsTransport` (falling back
    /// to the video transport when audio is bundled onto it).
    pub fn flush_outbound(&mut self) -> Result<()> {
        let Some(transports) = self.transports.as_mut() else {
            return Ok(());
        };
        for stream in &self.streams {
            for track in stream.tracks() {
                let mut track = track.borrow_mut();
                if track.is_publisher() {
                    continue;
                }
                let packets = track.take_outbound();
                if packets.is_empty() {
                    continue;
                }
                let dtls = match track.kind() {
                    TrackKind::Audio => transports.audio.as_mut().map(|(_, dtls)| dtls).unwrap_or(&mut transports.video.1),
                    TrackKind::Video => &mut transports.video.1,
                };
                for packet in packets {
                    let bytes = packet.marshal()?;
                    dtls.write(DemuxedKind::Rtp, &bytes)?;
                }
            }
        }
        Ok(())
    }

    /// `close()`: stops accepting writes, drains each stream's pipeline,
    /// closes each transport, and advances to `CONN_FINISHED`.
    pub fn close(&mut self) {
        if !self.running {
            return;
        }
        self.running = false;
        self.streams.clear();
        if let Some(transports) = self.transports.as_mut() {
            transports.video.0.close();
            transports.video.1.close();
            if let Some((ice, dtls)) = transports.audio.as_mut() {
                ice.close();
                dtls.close();
            }
        }
        self.state = ConnectionState::Finished;
        self.signaling_state = SignalingState::Closed;
        self.events
            .push_back(PeerConnectionEvent::StateChange(self.state));
    }
}

/// Maps a `DtlsTransportState` onto the matching `ConnectionState` (§4.7
/// rollup rule): the two enums name their transitions identically
/// (`Started`/`Gathered`/`Ready`/`Failed`), so a transport's own state
/// change becomes the connection's new state directly. `TransportInitial`
/// and `Finished` have no connection-level counterpart here -- a
/// transport finishing on its own does not end the connection, `close()`
/// does that explicitly.
fn map_transport_state(state: DtlsTransportState) -> Option<ConnectionState> {
    match state {
        DtlsTransportState::TransportInitial => None,
        DtlsTransportState::Started => Some(ConnectionState::Started),
        DtlsTransportState::Gathered => Some(ConnectionState::Gathered),
        DtlsTransportState::Ready => Some(ConnectionState::Ready),
        DtlsTransportState::Finished => None,
        DtlsTransportState::Failed => Some(ConnectionState::Failed),
    }
}

#[cfg(test)]
mod transport_rollup_tests {
    use super::*;

    #[test]
    fn maps_ready_and_failed() {
        assert_eq!(map_transport_state(DtlsTransportState::Ready), Some(ConnectionState::Ready));
        assert_eq!(map_transport_state(DtlsTransportState::Failed), Some(ConnectionState::Failed));
        assert_eq!(map_transport_state(DtlsTransportState::TransportInitial), None);
        assert_eq!(map_transport_state(DtlsTransportState::Finished), None);
    }
}
