//! Per-topic task: the single writer over one topic's mesh state.
//!
//! All view, seen-cache, and sink mutation for a topic happens on this task.
//! Other tasks talk to it through its command queue; no lock is ever held
//! across network I/O.

use crate::config::GossipConfig;
use crate::directory::PeerDirectory;
use crate::dissemination::DisseminationEngine;
use crate::membership::{MembershipEngine, MembershipEvent};
use crate::message::{GossipMessage, MessageEnvelope};
use crate::protocol::{PeerId, TopicId};
use crate::sink::{GossipEvent, SubscriptionSink};
use crate::transport::Transport;
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// Identifier for one subscription on a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl SubscriberId {
    pub(crate) const fn new(id: u64) -> Self {
        Self(id)
    }
}

/// Lifecycle state of a joined topic.
///
/// The `Unjoined` and `Removed` states of the lifecycle are represented by
/// the absence of topic state on the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TopicStatus {
    /// Join attempts are in flight; no neighbor linked yet.
    Joining,
    /// The topic is live (possibly isolated, which is valid).
    Active,
    /// The last subscription was cancelled; the topic is tearing down.
    Draining,
}

impl TopicStatus {
    /// Returns true if the topic accepts new subscriptions.
    #[must_use]
    pub const fn accepts_subscribers(&self) -> bool {
        matches!(self, Self::Joining | Self::Active)
    }

    const fn as_u8(self) -> u8 {
        match self {
            Self::Joining => 0,
            Self::Active => 1,
            Self::Draining => 2,
        }
    }

    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Joining,
            1 => Self::Active,
            _ => Self::Draining,
        }
    }
}

/// Shared, lock-free view of a topic's status.
#[derive(Debug)]
pub(crate) struct StatusCell(AtomicU8);

impl StatusCell {
    pub(crate) fn new(status: TopicStatus) -> Self {
        Self(AtomicU8::new(status.as_u8()))
    }

    pub(crate) fn load(&self) -> TopicStatus {
        TopicStatus::from_u8(self.0.load(Ordering::Acquire))
    }

    fn store(&self, status: TopicStatus) {
        self.0.store(status.as_u8(), Ordering::Release);
    }
}

/// Commands accepted by a topic task.
#[derive(Debug)]
pub(crate) enum TopicCommand {
    /// Register a new subscriber sink.
    Subscribe {
        id: SubscriberId,
        sink: Arc<SubscriptionSink>,
    },
    /// Remove a subscriber; the last removal drains the topic.
    Unsubscribe { id: SubscriberId },
    /// Accept a locally originated broadcast.
    Broadcast { payload: Vec<u8> },
    /// A wire message arrived from a peer.
    Inbound {
        from: PeerId,
        message: GossipMessage,
    },
    /// Tear the topic down as part of node shutdown.
    Shutdown,
}

/// State machine task for one topic.
pub(crate) struct TopicTask {
    topic: TopicId,
    config: GossipConfig,
    membership: MembershipEngine,
    dissemination: DisseminationEngine,
    sinks: HashMap<SubscriberId, Arc<SubscriptionSink>>,
    status: Arc<StatusCell>,
    transport: Arc<dyn Transport>,
    directory: Arc<PeerDirectory>,
    commands: mpsc::Receiver<TopicCommand>,
}

impl TopicTask {
    pub(crate) fn new(
        topic: TopicId,
        local: PeerId,
        config: GossipConfig,
        status: Arc<StatusCell>,
        transport: Arc<dyn Transport>,
        directory: Arc<PeerDirectory>,
        commands: mpsc::Receiver<TopicCommand>,
    ) -> Self {
        Self {
            topic,
            membership: MembershipEngine::new(local, config.clone()),
            dissemination: DisseminationEngine::new(local, config.clone()),
            config,
            sinks: HashMap::new(),
            status,
            transport,
            directory,
            commands,
        }
    }

    /// Runs the topic until teardown, then invokes `on_exit`.
    pub(crate) async fn run(mut self, bootstrap: Vec<PeerId>, on_exit: Box<dyn FnOnce() + Send>) {
        debug!(topic = %self.topic, "topic task started");

        let targets = self.membership.begin_join(&bootstrap);
        if targets.is_empty() {
            // Nobody to join through: isolated but valid.
            self.status.store(TopicStatus::Active);
        }
        self.send_many(targets, GossipMessage::Join { topic: self.topic })
            .await;

        let mut tick = tokio::time::interval(self.config.heartbeat_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut summary = tokio::time::interval(self.config.summary_interval);
        summary.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(TopicCommand::Subscribe { id, sink }) => {
                        self.sinks.insert(id, sink);
                    }
                    Some(TopicCommand::Unsubscribe { id }) => {
                        self.sinks.remove(&id);
                        if self.sinks.is_empty() {
                            self.drain().await;
                            break;
                        }
                    }
                    Some(TopicCommand::Broadcast { payload }) => {
                        self.on_broadcast(payload).await;
                    }
                    Some(TopicCommand::Inbound { from, message }) => {
                        self.on_inbound(from, message).await;
                    }
                    Some(TopicCommand::Shutdown) => {
                        for sink in self.sinks.values() {
                            sink.close();
                        }
                        self.drain().await;
                        break;
                    }
                    None => {
                        // Every handle is gone without an explicit teardown.
                        self.emit(GossipEvent::Error("gossip node dropped".to_string()));
                        for sink in self.sinks.values() {
                            sink.close();
                        }
                        self.drain().await;
                        break;
                    }
                },
                _ = tick.tick() => self.on_tick().await,
                _ = summary.tick() => self.on_summary().await,
            }
        }

        debug!(topic = %self.topic, "topic task stopped");
        on_exit();
    }

    /// Leaves the mesh: notifies neighbors and marks the topic draining.
    async fn drain(&mut self) {
        self.status.store(TopicStatus::Draining);
        let message = GossipMessage::Prune { topic: self.topic };
        for peer in self.membership.active_view() {
            // Teardown notifications are best-effort; failures need no repair.
            let _ = self.try_send(peer, &message).await;
        }
    }

    async fn on_broadcast(&mut self, payload: Vec<u8>) {
        let outcome = self
            .dissemination
            .prepare_broadcast(payload, &self.membership.active_view());
        if outcome.was_duplicate {
            trace!(topic = %self.topic, "duplicate local broadcast suppressed");
            return;
        }
        let message = GossipMessage::broadcast(self.topic, &outcome.envelope);
        self.send_many(outcome.targets, message).await;
    }

    async fn on_inbound(&mut self, from: PeerId, message: GossipMessage) {
        self.membership.record_activity(&from);

        match message {
            GossipMessage::Join { .. } => {
                let outcome = self.membership.handle_join(from);
                if let Some(event) = outcome.event {
                    self.emit_membership(event);
                }
                if outcome.accepted {
                    self.send_many(vec![from], GossipMessage::JoinAck { topic: self.topic })
                        .await;
                }
            }
            GossipMessage::JoinAck { .. } => {
                if let Some(event) = self.membership.handle_join_ack(from) {
                    self.emit_membership(event);
                }
            }
            GossipMessage::Prune { .. } => {
                self.handle_removal(from).await;
            }
            GossipMessage::Shuffle { peers, .. } => {
                let reply = self.membership.handle_shuffle(from, &peers);
                self.send_many(
                    vec![from],
                    GossipMessage::ShuffleReply {
                        topic: self.topic,
                        peers: reply,
                    },
                )
                .await;
            }
            GossipMessage::ShuffleReply { peers, .. } => {
                self.membership.handle_shuffle_reply(&peers);
            }
            GossipMessage::Heartbeat { .. } => {
                // Liveness already recorded above.
            }
            GossipMessage::Broadcast {
                origin, payload, ..
            } => {
                self.membership.note_peer(from);
                let envelope = MessageEnvelope::new(origin, payload);
                let relay = GossipMessage::broadcast(self.topic, &envelope);
                let outcome = self.dissemination.handle_envelope(
                    envelope.clone(),
                    from,
                    &self.membership.active_view(),
                );
                if outcome.fresh {
                    self.emit(GossipEvent::Received {
                        content: envelope.into_payload(),
                        delivered_from: from,
                    });
                    self.send_many(outcome.targets, relay).await;
                }
            }
            GossipMessage::Summary { digests, .. } => {
                let missing = self.dissemination.missing_from(&digests);
                if !missing.is_empty() {
                    self.send_many(
                        vec![from],
                        GossipMessage::PullRequest {
                            topic: self.topic,
                            digests: missing,
                        },
                    )
                    .await;
                }
            }
            GossipMessage::PullRequest { digests, .. } => {
                for envelope in self.dissemination.envelopes_for(&digests) {
                    let message = GossipMessage::broadcast(self.topic, &envelope);
                    self.send_many(vec![from], message).await;
                }
            }
        }
    }

    async fn on_tick(&mut self) {
        let actions = self.membership.tick();

        for peer in &actions.expired {
            debug!(topic = %self.topic, peer = %peer, "neighbor expired");
            self.emit(GossipEvent::NeighborDown(*peer));
        }
        if !actions.heartbeat_targets.is_empty() {
            self.send_many(
                actions.heartbeat_targets,
                GossipMessage::heartbeat(self.topic),
            )
            .await;
        }
        if !actions.join_targets.is_empty() {
            self.send_many(actions.join_targets, GossipMessage::Join { topic: self.topic })
                .await;
        }
        if let Some((partner, peers)) = actions.shuffle {
            self.send_many(
                vec![partner],
                GossipMessage::Shuffle {
                    topic: self.topic,
                    peers,
                },
            )
            .await;
        }
    }

    async fn on_summary(&mut self) {
        let digests = self.dissemination.summary();
        if digests.is_empty() {
            return;
        }
        let neighbors = self.membership.active_view();
        let Some(partner) = neighbors.choose(&mut rand::thread_rng()).copied() else {
            return;
        };
        self.send_many(
            vec![partner],
            GossipMessage::Summary {
                topic: self.topic,
                digests,
            },
        )
        .await;
    }

    /// Sends one message to several peers, folding failures into the
    /// link-failure recovery path.
    async fn send_many(&mut self, targets: Vec<PeerId>, message: GossipMessage) {
        let mut failed = Vec::new();
        for peer in targets {
            if !self.try_send(peer, &message).await {
                failed.push(peer);
            }
        }
        for peer in failed {
            self.handle_removal(peer).await;
        }
    }

    /// Attempts a single send. Returns false on anything that counts as
    /// evidence of link failure (no address, transport error).
    async fn try_send(&self, peer: PeerId, message: &GossipMessage) -> bool {
        let Some(address) = self.directory.resolve(&peer) else {
            debug!(topic = %self.topic, peer = %peer, "no address known, dropping send");
            return false;
        };
        let frame = match message.encode_wire() {
            Ok(frame) => frame,
            Err(e) => {
                warn!(topic = %self.topic, "failed to encode {}: {e}", message.message_type());
                return true;
            }
        };
        match self.transport.send(&address, frame).await {
            Ok(()) => true,
            Err(e) => {
                debug!(topic = %self.topic, peer = %peer, "send failed: {e}");
                false
            }
        }
    }

    /// Removes a peer from the mesh (prune, failure, or expiry) and tries a
    /// replacement from the passive view.
    async fn handle_removal(&mut self, peer: PeerId) {
        let mut queue = vec![peer];
        while let Some(peer) = queue.pop() {
            let outcome = self.membership.remove_neighbor(&peer);
            if let Some(event) = outcome.event {
                self.emit_membership(event);
            }
            if let Some(candidate) = outcome.replacement {
                let join = GossipMessage::Join { topic: self.topic };
                if !self.try_send(candidate, &join).await {
                    queue.push(candidate);
                }
            }
        }
    }

    fn emit_membership(&mut self, event: MembershipEvent) {
        match event {
            MembershipEvent::NeighborUp(peer) => {
                if self.status.load() == TopicStatus::Joining {
                    self.status.store(TopicStatus::Active);
                }
                self.emit(GossipEvent::NeighborUp(peer));
            }
            MembershipEvent::NeighborDown(peer) => {
                self.emit(GossipEvent::NeighborDown(peer));
            }
        }
    }

    /// Delivers an event to every subscriber sink on this topic.
    fn emit(&self, event: GossipEvent) {
        for sink in self.sinks.values() {
            sink.push(event.clone());
        }
    }
}
