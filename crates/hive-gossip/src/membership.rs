//! Per-topic mesh membership: active/passive views, joins, failure detection.
//!
//! The engine is sans-IO: every handler mutates local view state and returns
//! the sends and events the caller should perform. All mutation for one topic
//! happens on that topic's task, so no locking is needed here.
//!
//! The active view is the bounded set of peers we gossip with directly; the
//! passive view is a larger reservoir of known peers used to repair the
//! active view after failures. A peer is never in both views at once.

use crate::config::GossipConfig;
use crate::protocol::PeerId;
use rand::seq::{IteratorRandom, SliceRandom};
use std::collections::{HashMap, HashSet};
use std::time::Instant;

/// Membership transitions observable by subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipEvent {
    /// A peer became a direct gossip neighbor.
    NeighborUp(PeerId),
    /// A direct gossip neighbor was dropped.
    NeighborDown(PeerId),
}

/// Result of handling an inbound join request.
#[derive(Debug, Clone)]
pub struct JoinOutcome {
    /// Whether the join was accepted (an ack should be sent).
    pub accepted: bool,
    /// Membership transition to emit, if any.
    pub event: Option<MembershipEvent>,
}

/// Result of removing an active neighbor.
#[derive(Debug, Clone)]
pub struct RemovalOutcome {
    /// Membership transition to emit, if any.
    pub event: Option<MembershipEvent>,
    /// Passive-view candidate promoted as a replacement; a join should be
    /// attempted to it.
    pub replacement: Option<PeerId>,
}

/// Actions produced by one periodic maintenance pass.
#[derive(Debug, Clone, Default)]
pub struct TickActions {
    /// Neighbors evicted for missing heartbeats (emit NeighborDown for each).
    pub expired: Vec<PeerId>,
    /// Peers to send join requests to (promotions and retries).
    pub join_targets: Vec<PeerId>,
    /// Neighbors due a heartbeat.
    pub heartbeat_targets: Vec<PeerId>,
    /// Shuffle exchange to initiate: partner and the offered sample.
    pub shuffle: Option<(PeerId, Vec<PeerId>)>,
}

/// Mesh membership state for a single topic.
#[derive(Debug)]
pub struct MembershipEngine {
    local: PeerId,
    config: GossipConfig,
    /// Active neighbors with the time we last heard from them.
    active: HashMap<PeerId, Instant>,
    passive: HashSet<PeerId>,
    /// Peers we have sent a join to, awaiting an ack.
    pending: HashMap<PeerId, Instant>,
    last_heartbeat: Instant,
    last_shuffle: Instant,
}

impl MembershipEngine {
    /// Creates an engine for a topic with no members yet.
    #[must_use]
    pub fn new(local: PeerId, config: GossipConfig) -> Self {
        let now = Instant::now();
        Self {
            local,
            config,
            active: HashMap::new(),
            passive: HashSet::new(),
            pending: HashMap::new(),
            last_heartbeat: now,
            last_shuffle: now,
        }
    }

    /// Returns the local peer ID.
    #[must_use]
    pub const fn local_peer_id(&self) -> PeerId {
        self.local
    }

    /// Returns the current active view.
    #[must_use]
    pub fn active_view(&self) -> Vec<PeerId> {
        self.active.keys().copied().collect()
    }

    /// Returns the current passive view.
    #[must_use]
    pub fn passive_view(&self) -> Vec<PeerId> {
        self.passive.iter().copied().collect()
    }

    /// Returns the number of active neighbors.
    #[must_use]
    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    /// Returns the number of passive-view entries.
    #[must_use]
    pub fn passive_len(&self) -> usize {
        self.passive.len()
    }

    /// Returns true if the peer is a direct gossip neighbor.
    #[must_use]
    pub fn is_neighbor(&self, peer: &PeerId) -> bool {
        self.active.contains_key(peer)
    }

    /// Returns true if the topic has no members or candidates at all.
    ///
    /// Isolation is a valid state, not an error: the topic waits for new
    /// joiners or discovery-provided peers.
    #[must_use]
    pub fn is_isolated(&self) -> bool {
        self.active.is_empty() && self.passive.is_empty() && self.pending.is_empty()
    }

    /// Starts a join, returning the peers to send join requests to.
    ///
    /// Bootstrap entries are deduplicated, the local peer is ignored, and at
    /// most the fan-out bound is attempted immediately; the rest seed the
    /// passive view.
    pub fn begin_join(&mut self, bootstrap: &[PeerId]) -> Vec<PeerId> {
        let now = Instant::now();
        let mut targets = Vec::new();
        let mut seen = HashSet::new();

        for peer in bootstrap {
            if *peer == self.local || !seen.insert(*peer) {
                continue;
            }
            if targets.len() < self.config.active_view_size {
                self.pending.insert(*peer, now);
                targets.push(*peer);
            } else {
                self.passive_insert(*peer);
            }
        }

        targets
    }

    /// Handles an inbound join request from a peer.
    ///
    /// Accepted joins move the peer into the active view; when the view is
    /// full the peer is absorbed into the passive reservoir instead and no
    /// ack is sent.
    pub fn handle_join(&mut self, from: PeerId) -> JoinOutcome {
        if from == self.local {
            return JoinOutcome {
                accepted: false,
                event: None,
            };
        }

        // Simultaneous joins: an inbound request supersedes our own pending one.
        self.pending.remove(&from);

        if self.active.contains_key(&from) {
            self.record_activity(&from);
            return JoinOutcome {
                accepted: true,
                event: None,
            };
        }

        if self.active.len() < self.config.active_view_size {
            self.add_active(from);
            JoinOutcome {
                accepted: true,
                event: Some(MembershipEvent::NeighborUp(from)),
            }
        } else {
            self.passive_insert(from);
            JoinOutcome {
                accepted: false,
                event: None,
            }
        }
    }

    /// Handles an ack for a join we sent.
    pub fn handle_join_ack(&mut self, from: PeerId) -> Option<MembershipEvent> {
        self.pending.remove(&from);

        if from == self.local || self.active.contains_key(&from) {
            return None;
        }

        if self.active.len() < self.config.active_view_size {
            self.add_active(from);
            Some(MembershipEvent::NeighborUp(from))
        } else {
            // The view filled while the ack was in flight; keep the peer as a
            // repair candidate instead.
            self.passive_insert(from);
            None
        }
    }

    /// Removes an active neighbor (prune, transport failure, or expiry).
    ///
    /// Returns the transition to emit and a promoted replacement candidate,
    /// if the passive view had one.
    pub fn remove_neighbor(&mut self, peer: &PeerId) -> RemovalOutcome {
        self.pending.remove(peer);
        self.passive.remove(peer);

        if self.active.remove(peer).is_some() {
            RemovalOutcome {
                event: Some(MembershipEvent::NeighborDown(*peer)),
                replacement: self.promote_candidate(),
            }
        } else {
            RemovalOutcome {
                event: None,
                replacement: None,
            }
        }
    }

    /// Handles an inbound shuffle offer, returning our sample for the reply.
    pub fn handle_shuffle(&mut self, from: PeerId, offered: &[PeerId]) -> Vec<PeerId> {
        self.absorb(offered);
        self.sample_excluding(&from)
    }

    /// Handles a shuffle reply, absorbing the offered peers.
    pub fn handle_shuffle_reply(&mut self, offered: &[PeerId]) {
        self.absorb(offered);
    }

    /// Records traffic from a neighbor, refreshing its liveness deadline.
    pub fn record_activity(&mut self, from: &PeerId) {
        if let Some(last_seen) = self.active.get_mut(from) {
            *last_seen = Instant::now();
        }
    }

    /// Notes a peer we heard from that is not a neighbor, as a repair candidate.
    pub fn note_peer(&mut self, peer: PeerId) {
        if !self.active.contains_key(&peer) && !self.pending.contains_key(&peer) {
            self.passive_insert(peer);
        }
    }

    /// Runs one maintenance pass: failure detection, join retries,
    /// heartbeats, and the periodic shuffle.
    pub fn tick(&mut self) -> TickActions {
        let now = Instant::now();
        let mut actions = TickActions::default();

        // Evict neighbors that have gone silent past the timeout.
        let timeout = self.config.heartbeat_timeout;
        let expired: Vec<PeerId> = self
            .active
            .iter()
            .filter(|(_, last_seen)| now.duration_since(**last_seen) > timeout)
            .map(|(peer, _)| *peer)
            .collect();
        for peer in expired {
            self.active.remove(&peer);
            actions.expired.push(peer);
            if let Some(candidate) = self.promote_candidate() {
                actions.join_targets.push(candidate);
            }
        }

        // Give up on join attempts that never got an ack; try the next candidate.
        let stale: Vec<PeerId> = self
            .pending
            .iter()
            .filter(|(_, sent)| now.duration_since(**sent) > timeout)
            .map(|(peer, _)| *peer)
            .collect();
        for peer in stale {
            self.pending.remove(&peer);
            if let Some(candidate) = self.promote_candidate() {
                actions.join_targets.push(candidate);
            }
        }

        // An isolated view with repair candidates available starts a new attempt.
        if self.active.is_empty() && self.pending.is_empty() {
            if let Some(candidate) = self.promote_candidate() {
                actions.join_targets.push(candidate);
            }
        }

        if now.duration_since(self.last_heartbeat) >= self.config.heartbeat_interval {
            self.last_heartbeat = now;
            actions.heartbeat_targets = self.active_view();
        }

        if now.duration_since(self.last_shuffle) >= self.config.shuffle_interval
            && !self.active.is_empty()
        {
            self.last_shuffle = now;
            let mut rng = rand::thread_rng();
            if let Some(partner) = self.active.keys().choose(&mut rng).copied() {
                let sample = self.sample_excluding(&partner);
                actions.shuffle = Some((partner, sample));
            }
        }

        actions
    }

    /// Moves a peer into the active view, maintaining view disjointness.
    fn add_active(&mut self, peer: PeerId) {
        self.passive.remove(&peer);
        self.pending.remove(&peer);
        self.active.insert(peer, Instant::now());
    }

    /// Inserts a peer into the passive reservoir, evicting a random entry at
    /// capacity. Peers already active or pending are skipped.
    fn passive_insert(&mut self, peer: PeerId) {
        if peer == self.local
            || self.active.contains_key(&peer)
            || self.pending.contains_key(&peer)
            || self.passive.contains(&peer)
        {
            return;
        }
        if self.passive.len() >= self.config.passive_view_cap {
            let mut rng = rand::thread_rng();
            if let Some(victim) = self.passive.iter().choose(&mut rng).copied() {
                self.passive.remove(&victim);
            }
        }
        self.passive.insert(peer);
    }

    /// Promotes a random passive-view entry to a pending join attempt.
    fn promote_candidate(&mut self) -> Option<PeerId> {
        let mut rng = rand::thread_rng();
        let candidate = self.passive.iter().choose(&mut rng).copied()?;
        self.passive.remove(&candidate);
        self.pending.insert(candidate, Instant::now());
        Some(candidate)
    }

    /// Samples known peers for a shuffle exchange, excluding the partner.
    fn sample_excluding(&self, exclude: &PeerId) -> Vec<PeerId> {
        let mut candidates: Vec<PeerId> = self
            .passive
            .iter()
            .chain(self.active.keys())
            .filter(|p| *p != exclude && **p != self.local)
            .copied()
            .collect();

        let mut rng = rand::thread_rng();
        candidates.shuffle(&mut rng);
        candidates.truncate(self.config.shuffle_sample);
        candidates
    }

    /// Absorbs offered peers into the passive reservoir.
    fn absorb(&mut self, offered: &[PeerId]) {
        for peer in offered {
            self.passive_insert(*peer);
        }
    }
}
