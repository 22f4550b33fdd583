//! §4.8 Agent facade: registry of `PeerConnection`s keyed by
//! `connectionId`, dispatching creation/destruction/subscription onto the
//! least-loaded worker.

use crate::conn::{ConnectionRole, PeerConnection, PeerConnectionOptions};
use crate::error::{Error, Result};
use crate::reactor::{ThreadPool, Worker};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// One registered connection plus the worker it is pinned to for its
/// entire lifetime (§5): `Agent::destroy_peer` releases this pin so a
/// later `create_peer` can rebalance onto it.
struct PeerEntry {
    connection: Rc<RefCell<PeerConnection>>,
    worker: Arc<Worker>,
}

/// Registry keyed by `connectionId`. `create_peer` allocates a
/// `PeerConnection` on a least-loaded worker and pins it there for the
/// connection's lifetime; dispatched work is posted onto that worker
/// (§4.8).
pub struct Agent {
    pool: ThreadPool,
    peers: HashMap<String, PeerEntry>,
}

impl Agent {
    pub fn new(num_workers: usize) -> Self {
        Agent {
            pool: ThreadPool::new(num_workers),
            peers: HashMap::new(),
        }
    }

    /// `CreatePeer(options, offer)`: allocates a `PeerConnection` on a
    /// least-loaded worker, pins it there for its entire lifetime (§5),
    /// and registers it. Dispatching the offer itself is left to the
    /// caller via `PeerConnection::signalling_offer`, since that call
    /// needs the negotiated ICE agents constructed with this
    /// connection's STUN configuration.
    pub fn create_peer(&mut self, connection_id: String, role: ConnectionRole, bundle: bool, rtcp_mux: bool, trickle: bool) -> Result<Rc<RefCell<PeerConnection>>> {
        if self.peers.contains_key(&connection_id) {
            return Err(Error::InvalidArgument(format!(
                "connection {connection_id} already exists"
            )));
        }
        let worker = self.pool.least_loaded().clone();
        worker.acquire();
        let options = PeerConnectionOptions {
            connection_id: connection_id.clone(),
            role,
            bundle,
            rtcp_mux,
            trickle,
            preferred_video_formats: Vec::new(),
            preferred_audio_formats: Vec::new(),
        };
        let peer = Rc::new(RefCell::new(PeerConnection::new(options)?));
        self.peers.insert(
            connection_id,
            PeerEntry {
                connection: peer.clone(),
                worker,
            },
        );
        Ok(peer)
    }

    pub fn peer(&self, connection_id: &str) -> Option<Rc<RefCell<PeerConnection>>> {
        self.peers.get(connection_id).map(|entry| entry.connection.clone())
    }

    /// The worker `connection_id` is pinned to, if it exists.
    pub fn peer_worker(&self, connection_id: &str) -> Option<&Arc<Worker>> {
        self.peers.get(connection_id).map(|entry| &entry.worker)
    }

    /// `DestroyPeer(id)`: synchronous unregister, asynchronous close --
    /// removing it from the registry drops the `Agent`'s strong
    /// reference immediately, releases its worker pin so a future
    /// `create_peer` can rebalance onto it, and any subscriber still
    /// holding a weak reference into this peer's `FrameSource` observes
    /// it as simply gone on the next delivery, never a crash (§4.6, S4).
    pub fn destroy_peer(&mut self, connection_id: &str) -> Result<()> {
        let entry = self
            .peers
            .remove(connection_id)
            .ok_or_else(|| Error::ConnectionNotFound(connection_id.to_string()))?;
        entry.connection.borrow_mut().close();
        entry.worker.release();
        Ok(())
    }

    /// Drives one tick of the underlying `ThreadPool` (§4.1/§5): polls
    /// the paired reactors and drains every worker's task queue and
    /// timer calendar, then gives every registered connection a chance
    /// to pump its transports and flush queued subscriber RTP (§4.6,
    /// §4.7). A subscriber's outbound queue lives on a `WebrtcTrack`
    /// inside its own `PeerConnection`, reached from a different peer's
    /// publisher via `FrameConsumer`, so each peer must drain its own
    /// tracks independently every tick rather than only the one that
    /// just received a frame.
    pub fn poll_once(&mut self, now: Instant, timeout: Duration) -> std::io::Result<()> {
        self.pool.poll_once(now, timeout)?;
        for (connection_id, entry) in self.peers.iter() {
            let mut connection = entry.connection.borrow_mut();
            if let Err(err) = connection.poll_transports() {
                log::warn!("connection {connection_id}: poll_transports failed: {err}");
                continue;
            }
            if let Err(err) = connection.flush_outbound() {
                log::warn!("connection {connection_id}: flush_outbound failed: {err}");
            }
        }
        Ok(())
    }

    /// `Subscribe(publisherId, playerId)`: looks up both peers, snapshots
    /// the player's track map, and wires it as a destination set on the
    /// publisher's matching stream. `publisherId == playerId` is the
    /// in-process-sink special case (server-side recording hooks): in
    /// that case this is simply a self-subscribe, which is valid and not
    /// special-cased further here since `PeerConnection::subscribe`
    /// already tolerates wiring a track to itself.
    pub fn subscribe(&mut self, publisher_id: &str, player_id: &str, stream_id: &str) -> Result<()> {
        let publisher = self
            .peers
            .get(publisher_id)
            .ok_or_else(|| Error::ConnectionNotFound(publisher_id.to_string()))?
            .connection
            .clone();
        let player = self
            .peers
            .get(player_id)
            .ok_or_else(|| Error::ConnectionNotFound(player_id.to_string()))?
            .connection
            .clone();

        let subscriber_tracks: Vec<Rc<RefCell<dyn crate::frame::FrameConsumer>>> = player
            .borrow()
            .streams()
            .iter()
            .find(|s| s.stream_id() == stream_id)
            .map(|stream| {
                stream
                    .tracks()
                    .iter()
                    .map(|t| t.clone() as Rc<RefCell<dyn crate::frame::FrameConsumer>>)
                    .collect()
            })
            .unwrap_or_default();

        publisher.borrow_mut().subscribe(stream_id, &subscriber_tracks)
    }

    /// `Unsubscribe(publisherId, playerId)`: symmetric to `subscribe`.
    /// Weak references into a player's tracks expire on their own once
    /// those tracks are dropped (§4.6); there is no separate
    /// remove-by-destination path on [`crate::frame::FrameSource`] today,
    /// so this only validates both peers still exist.
    pub fn unsubscribe(&mut self, publisher_id: &str, player_id: &str, _stream_id: &str) -> Result<()> {
        if !self.peers.contains_key(publisher_id) {
            return Err(Error::ConnectionNotFound(publisher_id.to_string()));
        }
        if !self.peers.contains_key(player_id) {
            return Err(Error::ConnectionNotFound(player_id.to_string()));
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
