//! Rank-based leader election and blob replication between controllers
//!
//! Every controller announces `(node_id, rank, is_leader)` once per
//! interval. The highest rank known to a controller is its leader choice.
//! A controller that sees a lower-ranked peer claim leadership sends it
//! `Overthrow`, which makes the peer re-run its election.
//!
//! After adopting a leader, a follower opens a sync session: it asks for
//! the checksum and age of every blob type, then pushes or fetches each blob
//! that differs. Replies tagged with an older session are ignored.
//!
//! Changed blobs flow through the persistence worker first. Once written,
//! a local change goes to the leader (follower) or to all peers (leader).
//! A blob received from a peer is forwarded only by the leader.
//!
//! The state machine does no I/O: events go in, [`Outbound`] messages come
//! out. [`run_elector_loop`] drives it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::ElectionConfig;
use crate::persistence::{PersistenceEvent, PersistenceScheduler};
use crate::rank::Rank;
use crate::store::{BlobOrigin, VersionedBlob};
use crate::types::{BlobType, NodeId};

/// Node role in the election
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Follower,
    /// Waiting for the highest-ranked peer to confirm leadership
    Candidate,
    Leader,
}

/// Controller-to-controller messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ControllerMessage {
    /// Heartbeat
    #[serde(rename = "ANNOUNCE")]
    Announce {
        node_id: NodeId,
        rank: Rank,
        is_leader: bool,
    },

    #[serde(rename = "CHECKSUM_REQUEST")]
    ChecksumRequest {
        from: NodeId,
        session: u64,
        blob_type: BlobType,
    },

    #[serde(rename = "CHECKSUM_REPLY")]
    ChecksumReply {
        from: NodeId,
        session: u64,
        blob_type: BlobType,
        checksum: u32,
        age: u64,
    },

    #[serde(rename = "BLOB_REQUEST")]
    BlobRequest {
        from: NodeId,
        session: u64,
        blob_type: BlobType,
    },

    #[serde(rename = "BLOB_REPLY")]
    BlobReply {
        from: NodeId,
        session: u64,
        blob_type: BlobType,
        data: String,
        checksum: u32,
        age: u64,
    },

    /// Push of a changed blob
    #[serde(rename = "BLOB_CHANGED")]
    BlobChanged {
        from: NodeId,
        blob_type: BlobType,
        data: String,
        checksum: u32,
        age: u64,
    },

    /// Forces the receiver to re-run its election
    #[serde(rename = "OVERTHROW")]
    Overthrow { from: NodeId },
}

impl ControllerMessage {
    /// Serialize message to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize message from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    pub fn sender(&self) -> &NodeId {
        match self {
            ControllerMessage::Announce { node_id, .. } => node_id,
            ControllerMessage::ChecksumRequest { from, .. }
            | ControllerMessage::ChecksumReply { from, .. }
            | ControllerMessage::BlobRequest { from, .. }
            | ControllerMessage::BlobReply { from, .. }
            | ControllerMessage::BlobChanged { from, .. }
            | ControllerMessage::Overthrow { from } => from,
        }
    }
}

/// Where an outbound message goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    Peer(NodeId),
    /// Every known controller
    AllPeers,
    /// Every known controller except one
    AllExcept(NodeId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub to: Destination,
    pub message: ControllerMessage,
}

impl Outbound {
    fn peer(to: &NodeId, message: ControllerMessage) -> Self {
        Self {
            to: Destination::Peer(to.clone()),
            message,
        }
    }
}

/// Input of the elector
#[derive(Debug, Clone)]
pub enum ElectorEvent {
    Message(ControllerMessage),
    /// Session to the peer is gone (discovery removal or transport failure)
    PeerLost(NodeId),
    Persistence(PersistenceEvent),
    Tick,
}

/// Known peer controller
#[derive(Debug, Clone)]
pub struct PeerControllerEntry {
    pub node_id: NodeId,
    pub rank: Rank,
    pub is_leader: bool,
    /// Locally assigned when the peer is first heard from
    pub session_id: u64,
    pub last_seen: u64,
}

#[derive(Debug, Clone)]
struct SyncSession {
    leader: NodeId,
    session: u64,
}

/// Leader elector and blob sync state machine
pub struct LeaderElector {
    node_id: NodeId,
    rank: Rank,
    config: ElectionConfig,
    clock: Arc<dyn Clock>,
    persistence: Arc<PersistenceScheduler>,

    role: Role,
    leader: Option<NodeId>,
    peers: HashMap<NodeId, PeerControllerEntry>,
    sync: Option<SyncSession>,
    next_session: u64,
    /// Peer we expect to hear claim leadership, with the wait start time
    candidate: Option<(Option<NodeId>, u64)>,
    /// Session ids to echo on deferred blob replies
    deferred: HashMap<(NodeId, BlobType), u64>,
}

impl LeaderElector {
    /// Start as a candidate with no target: the first election runs once
    /// the candidate timeout has given peers time to announce themselves
    pub fn new(
        node_id: NodeId,
        rank: Rank,
        config: ElectionConfig,
        clock: Arc<dyn Clock>,
        persistence: Arc<PersistenceScheduler>,
    ) -> Self {
        let now = clock.now_ms();
        Self {
            node_id,
            rank,
            config,
            clock,
            persistence,
            role: Role::Candidate,
            leader: None,
            peers: HashMap::new(),
            sync: None,
            next_session: 1,
            candidate: Some((None, now)),
            deferred: HashMap::new(),
        }
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn rank(&self) -> Rank {
        self.rank
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_leader(&self) -> bool {
        self.role == Role::Leader
    }

    /// Current leader (possibly this node)
    pub fn leader(&self) -> Option<&NodeId> {
        self.leader.as_ref()
    }

    pub fn peers(&self) -> impl Iterator<Item = &PeerControllerEntry> {
        self.peers.values()
    }

    fn announce(&self) -> Outbound {
        Outbound {
            to: Destination::AllPeers,
            message: ControllerMessage::Announce {
                node_id: self.node_id.clone(),
                rank: self.rank,
                is_leader: self.is_leader(),
            },
        }
    }

    /// Process one event
    pub fn handle_event(&mut self, event: ElectorEvent) -> Vec<Outbound> {
        match event {
            ElectorEvent::Message(msg) => self.handle_message(msg),
            ElectorEvent::PeerLost(node_id) => self.handle_peer_lost(&node_id),
            ElectorEvent::Persistence(event) => self.handle_persistence(event),
            ElectorEvent::Tick => self.tick(),
        }
    }

    /// Heartbeat, peer expiry and candidate timeout
    pub fn tick(&mut self) -> Vec<Outbound> {
        let now = self.clock.now_ms();
        let mut out = Vec::new();

        let expired: Vec<NodeId> = self
            .peers
            .values()
            .filter(|p| now.saturating_sub(p.last_seen) > self.config.peer_timeout_ms)
            .map(|p| p.node_id.clone())
            .collect();
        for node_id in expired {
            warn!("Election: Peer {} timed out", node_id);
            out.extend(self.handle_peer_lost(&node_id));
        }

        if let Some((_, since)) = self.candidate {
            if now.saturating_sub(since) >= self.config.candidate_timeout_ms {
                debug!("Election: Candidate wait expired");
                out.extend(self.do_leader_election());
            }
        }

        out.push(self.announce());
        out
    }

    /// Pick the highest rank among this node and its peers
    pub fn do_leader_election(&mut self) -> Vec<Outbound> {
        self.sync = None;
        let best = self
            .peers
            .values()
            .max_by_key(|p| p.rank)
            .filter(|p| p.rank > self.rank)
            .map(|p| (p.node_id.clone(), p.is_leader));

        match best {
            None => self.become_leader(),
            Some((node_id, true)) => self.adopt_leader(node_id),
            Some((node_id, false)) => {
                info!("Election: Waiting for {} to take leadership", node_id);
                self.role = Role::Candidate;
                self.leader = None;
                self.candidate = Some((Some(node_id), self.clock.now_ms()));
                Vec::new()
            }
        }
    }

    fn become_leader(&mut self) -> Vec<Outbound> {
        self.candidate = None;
        self.sync = None;
        if self.role != Role::Leader {
            info!("Election: {} is now leader (rank {})", self.node_id, self.rank);
        }
        self.role = Role::Leader;
        self.leader = Some(self.node_id.clone());
        vec![self.announce()]
    }

    fn adopt_leader(&mut self, leader: NodeId) -> Vec<Outbound> {
        self.candidate = None;
        self.role = Role::Follower;
        if self.leader.as_ref() == Some(&leader) && self.sync.is_some() {
            return Vec::new();
        }

        info!("Election: Following {}", leader);
        self.leader = Some(leader.clone());
        self.start_sync(leader)
    }

    /// Ask the leader for the checksum of every blob type
    fn start_sync(&mut self, leader: NodeId) -> Vec<Outbound> {
        let session = self.next_session;
        self.next_session += 1;
        self.sync = Some(SyncSession {
            leader: leader.clone(),
            session,
        });
        debug!("Election: Sync session {} with {}", session, leader);

        BlobType::ALL
            .iter()
            .map(|blob_type| {
                Outbound::peer(
                    &leader,
                    ControllerMessage::ChecksumRequest {
                        from: self.node_id.clone(),
                        session,
                        blob_type: *blob_type,
                    },
                )
            })
            .collect()
    }

    fn sync_session(&self, from: &NodeId, session: u64) -> bool {
        matches!(&self.sync, Some(s) if &s.leader == from && s.session == session)
    }

    fn touch_peer(&mut self, node_id: &NodeId) {
        let now = self.clock.now_ms();
        if let Some(peer) = self.peers.get_mut(node_id) {
            peer.last_seen = now;
        }
    }

    pub fn handle_message(&mut self, msg: ControllerMessage) -> Vec<Outbound> {
        if msg.sender() == &self.node_id {
            return Vec::new();
        }
        self.touch_peer(&msg.sender().clone());

        match msg {
            ControllerMessage::Announce {
                node_id,
                rank,
                is_leader,
            } => self.handle_announce(node_id, rank, is_leader),

            ControllerMessage::Overthrow { from } => {
                info!("Election: Overthrown by {}", from);
                self.role = Role::Follower;
                self.leader = None;
                self.do_leader_election()
            }

            ControllerMessage::ChecksumRequest {
                from,
                session,
                blob_type,
            } => match self.persistence.store(blob_type) {
                Some(store) => {
                    let (checksum, age) = store.checksum_and_age();
                    vec![Outbound::peer(
                        &from,
                        ControllerMessage::ChecksumReply {
                            from: self.node_id.clone(),
                            session,
                            blob_type,
                            checksum,
                            age,
                        },
                    )]
                }
                None => Vec::new(),
            },

            ControllerMessage::ChecksumReply {
                from,
                session,
                blob_type,
                checksum,
                age,
            } => self.handle_checksum_reply(from, session, blob_type, checksum, age),

            ControllerMessage::BlobRequest {
                from,
                session,
                blob_type,
            } => match self.persistence.request_blob(blob_type, from.clone()) {
                Some((blob, age)) => vec![self.blob_reply(&from, session, blob, age)],
                None => {
                    self.deferred.insert((from, blob_type), session);
                    Vec::new()
                }
            },

            ControllerMessage::BlobReply {
                from,
                session,
                blob_type,
                data,
                checksum,
                age,
            } => {
                if !self.sync_session(&from, session) {
                    debug!("Election: Ignoring stale blob reply from {}", from);
                    return Vec::new();
                }
                self.accept_blob(&from, blob_type, &data, checksum, age);
                Vec::new()
            }

            ControllerMessage::BlobChanged {
                from,
                blob_type,
                data,
                checksum,
                age,
            } => {
                self.accept_blob(&from, blob_type, &data, checksum, age);
                Vec::new()
            }
        }
    }

    fn handle_announce(&mut self, node_id: NodeId, rank: Rank, is_leader: bool) -> Vec<Outbound> {
        let now = self.clock.now_ms();
        let mut out = Vec::new();

        let was_leader_claim = match self.peers.get_mut(&node_id) {
            Some(peer) => {
                let was = peer.is_leader;
                peer.rank = rank;
                peer.is_leader = is_leader;
                peer.last_seen = now;
                was
            }
            None => {
                let session_id = self.next_session;
                self.next_session += 1;
                info!("Election: Discovered controller {} (rank {})", node_id, rank);
                self.peers.insert(
                    node_id.clone(),
                    PeerControllerEntry {
                        node_id: node_id.clone(),
                        rank,
                        is_leader,
                        session_id,
                        last_seen: now,
                    },
                );
                false
            }
        };

        if is_leader {
            if rank < self.rank {
                // A lower rank must not lead while this node exists
                info!("Election: Lower-ranked {} claims leadership, overthrowing", node_id);
                // It may not know this node yet; introduce it before the overthrow
                out.push(Outbound::peer(&node_id, self.announce().message));
                out.push(Outbound::peer(
                    &node_id,
                    ControllerMessage::Overthrow {
                        from: self.node_id.clone(),
                    },
                ));
                if !self.is_leader() {
                    self.leader = None;
                    out.extend(self.do_leader_election());
                }
            } else if self.leader.as_ref() != Some(&node_id) || self.sync.is_none() {
                let highest_leader = self
                    .peers
                    .values()
                    .filter(|p| p.is_leader)
                    .max_by_key(|p| p.rank)
                    .map(|p| p.node_id.clone());
                if highest_leader.as_ref() == Some(&node_id) {
                    if self.is_leader() {
                        info!("Election: Higher-ranked {} leads, stepping down", node_id);
                    }
                    out.extend(self.adopt_leader(node_id));
                }
            }
        } else if was_leader_claim && self.leader.as_ref() == Some(&node_id) {
            info!("Election: Leader {} gave up leadership", node_id);
            self.leader = None;
            out.extend(self.do_leader_election());
        } else if self.is_leader() && rank > self.rank {
            // A higher rank exists; yield and wait for it to claim
            out.extend(self.do_leader_election());
        }

        out
    }

    fn handle_peer_lost(&mut self, node_id: &NodeId) -> Vec<Outbound> {
        if self.peers.remove(node_id).is_none() {
            return Vec::new();
        }
        info!("Election: Lost controller {}", node_id);
        self.deferred.retain(|(peer, _), _| peer != node_id);

        let lost_leader = self.leader.as_ref() == Some(node_id);
        let lost_target = matches!(&self.candidate, Some((Some(target), _)) if target == node_id);
        if lost_leader || lost_target {
            self.leader = None;
            return self.do_leader_election();
        }
        Vec::new()
    }

    fn handle_checksum_reply(
        &mut self,
        from: NodeId,
        session: u64,
        blob_type: BlobType,
        checksum: u32,
        age: u64,
    ) -> Vec<Outbound> {
        if !self.sync_session(&from, session) {
            debug!("Election: Ignoring stale checksum reply from {}", from);
            return Vec::new();
        }
        let store = match self.persistence.store(blob_type) {
            Some(store) => store.clone(),
            None => return Vec::new(),
        };

        let (local_checksum, local_age) = store.checksum_and_age();
        if local_checksum == checksum {
            debug!("Election: {} in sync with {}", blob_type, from);
            return Vec::new();
        }

        if local_age < age {
            if store.has_pending() {
                // The write in flight will push it
                return Vec::new();
            }
            debug!("Election: Local {} is newer, pushing to {}", blob_type, from);
            let blob = store.last_blob();
            return vec![Outbound::peer(
                &from,
                self.blob_changed(blob, local_age),
            )];
        }

        vec![Outbound::peer(
            &from,
            ControllerMessage::BlobRequest {
                from: self.node_id.clone(),
                session,
                blob_type,
            },
        )]
    }

    fn accept_blob(&self, from: &NodeId, blob_type: BlobType, data: &str, checksum: u32, age: u64) {
        let store = match self.persistence.store(blob_type) {
            Some(store) => store,
            None => return,
        };
        match store.handle_received_blob(data, checksum, age, from) {
            Ok(true) => debug!("Election: Took {} from {}", blob_type, from),
            Ok(false) => {}
            Err(e) => warn!("Election: Rejected {} from {}: {}", blob_type, from, e),
        }
    }

    fn blob_changed(&self, blob: VersionedBlob, age: u64) -> ControllerMessage {
        ControllerMessage::BlobChanged {
            from: self.node_id.clone(),
            blob_type: blob.blob_type,
            data: blob.data,
            checksum: blob.checksum,
            age,
        }
    }

    fn blob_reply(&self, to: &NodeId, session: u64, blob: VersionedBlob, age: u64) -> Outbound {
        Outbound::peer(
            to,
            ControllerMessage::BlobReply {
                from: self.node_id.clone(),
                session,
                blob_type: blob.blob_type,
                data: blob.data,
                checksum: blob.checksum,
                age,
            },
        )
    }

    fn handle_persistence(&mut self, event: PersistenceEvent) -> Vec<Outbound> {
        match event {
            PersistenceEvent::Written(update) => {
                let message = self.blob_changed(update.blob, update.age);
                match (update.origin, self.role) {
                    (BlobOrigin::Local, Role::Leader) => vec![Outbound {
                        to: Destination::AllPeers,
                        message,
                    }],
                    (BlobOrigin::Local, _) => match &self.leader {
                        Some(leader) => vec![Outbound::peer(leader, message)],
                        None => Vec::new(),
                    },
                    (BlobOrigin::Peer(from), Role::Leader) => vec![Outbound {
                        to: Destination::AllExcept(from),
                        message,
                    }],
                    (BlobOrigin::Peer(_), _) => Vec::new(),
                }
            }
            PersistenceEvent::BlobReady { peer, blob, age } => {
                match self.deferred.remove(&(peer.clone(), blob.blob_type)) {
                    Some(session) => vec![self.blob_reply(&peer, session, blob, age)],
                    None => Vec::new(),
                }
            }
        }
    }

    /// Ids of peers that currently claim leadership
    pub fn leader_claims(&self) -> HashSet<NodeId> {
        self.peers
            .values()
            .filter(|p| p.is_leader)
            .map(|p| p.node_id.clone())
            .collect()
    }
}

/// Drive the elector: ticks, inbound events and persistence events
pub async fn run_elector_loop(
    elector: Arc<RwLock<LeaderElector>>,
    mut inbound_rx: mpsc::Receiver<ElectorEvent>,
    mut persistence_rx: mpsc::UnboundedReceiver<PersistenceEvent>,
    outbound_tx: mpsc::Sender<Outbound>,
) {
    let announce_interval = elector.read().await.config.announce_interval();
    let mut ticker = interval(announce_interval);

    loop {
        let outbound = tokio::select! {
            _ = ticker.tick() => {
                elector.write().await.tick()
            }

            event = inbound_rx.recv() => match event {
                Some(event) => elector.write().await.handle_event(event),
                None => break,
            },

            Some(event) = persistence_rx.recv() => {
                elector.write().await.handle_event(ElectorEvent::Persistence(event))
            }
        };

        for msg in outbound {
            if outbound_tx.send(msg).await.is_err() {
                info!("Election: Outbound channel closed, stopping");
                return;
            }
        }
    }
    info!("Election: Inbound channel closed, stopping");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::persistence::BlobFiles;
    use crate::store::{ReplicatedStore, VersionedStore, WriteTrigger};
    use crate::types::{LampGroup, LampState, MasterScene, Scene};

    struct Node {
        _dir: tempfile::TempDir,
        clock: Arc<ManualClock>,
        elector: LeaderElector,
    }

    fn node(name: &str, mac: u64) -> Node {
        let dir = tempfile::tempdir().expect("tempdir");
        let clock = Arc::new(ManualClock::new(1_000));
        let dyn_clock: Arc<dyn Clock> = clock.clone();
        let trigger = WriteTrigger::new();
        let stores: Vec<Arc<dyn ReplicatedStore>> = vec![
            Arc::new(VersionedStore::<LampState>::new(4096, dyn_clock.clone(), trigger.clone())),
            Arc::new(VersionedStore::<LampGroup>::new(4096, dyn_clock.clone(), trigger.clone())),
            Arc::new(VersionedStore::<Scene>::new(4096, dyn_clock.clone(), trigger.clone())),
            Arc::new(VersionedStore::<MasterScene>::new(4096, dyn_clock.clone(), trigger.clone())),
        ];
        let (tx, _rx) = mpsc::unbounded_channel();
        let files = BlobFiles::new(dir.path()).expect("storage dir");
        let persistence = Arc::new(PersistenceScheduler::new(files, stores, trigger, dyn_clock.clone(), tx));
        let elector = LeaderElector::new(
            name.to_string(),
            Rank::new(1, mac),
            ElectionConfig::default(),
            dyn_clock,
            persistence,
        );
        Node {
            _dir: dir,
            clock,
            elector,
        }
    }

    fn announce(name: &str, mac: u64, is_leader: bool) -> ControllerMessage {
        ControllerMessage::Announce {
            node_id: name.to_string(),
            rank: Rank::new(1, mac),
            is_leader,
        }
    }

    #[test]
    fn test_message_serialization() -> Result<(), serde_json::Error> {
        let msg = ControllerMessage::Overthrow { from: "a".into() };
        let bytes = msg.to_bytes()?;
        assert!(String::from_utf8_lossy(&bytes).contains("OVERTHROW"));
        assert_eq!(ControllerMessage::from_bytes(&bytes)?, msg);
        Ok(())
    }

    #[test]
    fn test_alone_becomes_leader_after_candidate_wait() {
        let mut n = node("a", 5);
        assert_eq!(n.elector.role(), Role::Candidate);
        n.elector.tick();
        assert!(!n.elector.is_leader());

        n.clock.advance(3_000);
        let out = n.elector.tick();
        assert!(n.elector.is_leader());
        assert!(out.iter().any(|o| matches!(
            o.message,
            ControllerMessage::Announce { is_leader: true, .. }
        )));
    }

    #[test]
    fn test_follow_higher_ranked_leader_and_sync() {
        let mut n = node("a", 5);
        let out = n.elector.handle_message(announce("b", 9, true));
        assert_eq!(n.elector.role(), Role::Follower);
        assert_eq!(n.elector.leader().map(String::as_str), Some("b"));

        let requests = out
            .iter()
            .filter(|o| matches!(o.message, ControllerMessage::ChecksumRequest { .. }))
            .count();
        assert_eq!(requests, BlobType::ALL.len());
    }

    #[test]
    fn test_lower_ranked_leader_is_overthrown() {
        let mut n = node("a", 9);
        let out = n.elector.handle_message(announce("b", 5, true));
        assert!(out.contains(&Outbound::peer(
            &"b".to_string(),
            ControllerMessage::Overthrow { from: "a".into() }
        )));
        assert!(n.elector.is_leader());
    }

    #[test]
    fn test_leader_loss_triggers_reelection() {
        let mut n = node("a", 5);
        n.elector.handle_message(announce("c", 3, false));
        n.elector.handle_message(announce("b", 9, true));
        assert_eq!(n.elector.leader().map(String::as_str), Some("b"));

        n.elector.handle_event(ElectorEvent::PeerLost("b".to_string()));
        assert!(n.elector.is_leader());
    }

    #[test]
    fn test_peer_expiry() {
        let mut n = node("a", 5);
        n.elector.handle_message(announce("b", 9, true));
        n.clock.advance(5_001);
        n.elector.tick();
        assert_eq!(n.elector.peers().count(), 0);
        assert!(n.elector.is_leader());
    }

    #[test]
    fn test_stale_sync_replies_are_ignored() {
        let mut n = node("a", 5);
        let first = n.elector.handle_message(announce("b", 9, true));
        let old_session = match &first[0].message {
            ControllerMessage::ChecksumRequest { session, .. } => *session,
            other => panic!("unexpected {:?}", other),
        };

        // Leader bounces: a new session replaces the old one
        n.elector.handle_event(ElectorEvent::PeerLost("b".to_string()));
        n.elector.handle_message(announce("b", 9, true));

        let out = n.elector.handle_message(ControllerMessage::ChecksumReply {
            from: "b".into(),
            session: old_session,
            blob_type: BlobType::Preset,
            checksum: 42,
            age: 0,
        });
        assert!(out.is_empty());
    }
}
