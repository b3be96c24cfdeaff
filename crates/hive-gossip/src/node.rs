//! Node-level coordination: the topic table and the subscribe surface.

use crate::config::GossipConfig;
use crate::directory::{NodeAddress, PeerDirectory};
use crate::error::GossipError;
use crate::message::GossipMessage;
use crate::protocol::{PeerId, TopicId};
use crate::sink::{EventReceiver, GossipEvent, SubscriptionSink};
use crate::topic::{StatusCell, SubscriberId, TopicCommand, TopicStatus, TopicTask};
use crate::transport::{BoxFuture, MemoryNetwork, Transport};
use ed25519_dalek::SigningKey;
use parking_lot::Mutex;
use rand::rngs::OsRng;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Callback invoked for every event on a subscription.
///
/// Each subscription owns its own handler binding; there is no process-wide
/// registration step.
pub trait GossipEventHandler: Send + Sync + 'static {
    /// Handles one event. Errors are logged, not fatal.
    fn on_event(&self, event: GossipEvent) -> BoxFuture<'_, Result<(), GossipError>>;
}

/// Per-topic bookkeeping held by the node.
struct TopicEntry {
    generation: u64,
    commands: mpsc::Sender<TopicCommand>,
    status: Arc<StatusCell>,
    task: JoinHandle<()>,
}

/// A node participating in topic-based gossip overlays.
///
/// The node owns one task per joined topic plus a router task that decodes
/// inbound transport frames and dispatches them to topic tasks. Topic state
/// is created by the first subscription and torn down when the last one
/// cancels.
pub struct GossipNode {
    local: PeerId,
    config: GossipConfig,
    transport: Arc<dyn Transport>,
    directory: Arc<PeerDirectory>,
    topics: Arc<Mutex<HashMap<TopicId, TopicEntry>>>,
    next_subscriber: AtomicU64,
    next_generation: AtomicU64,
    shut_down: AtomicBool,
    cancel: CancellationToken,
}

impl GossipNode {
    /// Spawns a node over a transport.
    ///
    /// `inbound` is the transport's receive stream; wiring it here replaces
    /// any process-global receive registration.
    #[must_use]
    pub fn spawn(
        local: PeerId,
        config: GossipConfig,
        transport: Arc<dyn Transport>,
        directory: Arc<PeerDirectory>,
        inbound: mpsc::Receiver<(PeerId, Vec<u8>)>,
    ) -> Self {
        let topics: Arc<Mutex<HashMap<TopicId, TopicEntry>>> = Arc::default();
        let cancel = CancellationToken::new();

        tokio::spawn(route_inbound(
            inbound,
            Arc::clone(&topics),
            cancel.clone(),
        ));

        Self {
            local,
            config,
            transport,
            directory,
            topics,
            next_subscriber: AtomicU64::new(0),
            next_generation: AtomicU64::new(0),
            shut_down: AtomicBool::new(false),
            cancel,
        }
    }

    /// Creates a node with a fresh identity on an in-memory network.
    #[must_use]
    pub fn memory(network: &MemoryNetwork) -> Self {
        Self::memory_with_config(network, GossipConfig::default())
    }

    /// Creates a node with a fresh identity and custom config on an
    /// in-memory network.
    #[must_use]
    pub fn memory_with_config(network: &MemoryNetwork, config: GossipConfig) -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        let local = PeerId::from_public_key(&signing_key.verifying_key());
        let (transport, inbound) = network.open(local);
        Self::spawn(
            local,
            config,
            Arc::new(transport),
            Arc::new(PeerDirectory::new()),
            inbound,
        )
    }

    /// Returns this node's peer ID.
    #[must_use]
    pub const fn peer_id(&self) -> PeerId {
        self.local
    }

    /// Returns the node's peer directory.
    #[must_use]
    pub fn directory(&self) -> Arc<PeerDirectory> {
        Arc::clone(&self.directory)
    }

    /// Adds peer addressing information obtained out of band.
    pub fn add_address_hint(&self, hint: NodeAddress) {
        self.directory.add_hint(hint);
    }

    /// Returns the topics this node currently has state for.
    #[must_use]
    pub fn topics(&self) -> Vec<TopicId> {
        self.topics.lock().keys().copied().collect()
    }

    /// Returns the lifecycle status of a topic, or `None` when the node
    /// holds no state for it (unjoined or already removed).
    #[must_use]
    pub fn topic_status(&self, topic: &TopicId) -> Option<TopicStatus> {
        self.topics.lock().get(topic).map(|entry| entry.status.load())
    }

    /// Subscribes to a topic, joining its mesh through the bootstrap peers.
    ///
    /// The topic identifier must be exactly 32 bytes; anything else fails
    /// synchronously before any state is created or any packet is sent.
    /// Bootstrap peers without a directory entry are dropped from the join
    /// attempt; an empty effective bootstrap yields an isolated (but valid)
    /// topic. Subscribing to an already-joined topic reuses its mesh state
    /// and only adds a subscription.
    ///
    /// # Errors
    ///
    /// Returns [`GossipError::InvalidTopic`] for malformed identifiers and
    /// [`GossipError::NodeShutdown`] after [`GossipNode::shutdown`].
    pub async fn subscribe(
        &self,
        topic: &[u8],
        bootstrap: Vec<PeerId>,
    ) -> Result<Subscription, GossipError> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(GossipError::NodeShutdown);
        }
        let topic = TopicId::try_from(topic)?;

        let id = SubscriberId::new(self.next_subscriber.fetch_add(1, Ordering::Relaxed));
        let sink = SubscriptionSink::new(self.config.sink_capacity);

        // A topic task can drain out between lookup and registration; retry
        // against a fresh task when that happens.
        for _ in 0..8 {
            let commands = self.get_or_create_topic(topic, &bootstrap);
            let subscribe = TopicCommand::Subscribe {
                id,
                sink: Arc::clone(&sink),
            };
            if commands.send(subscribe).await.is_ok() {
                return Ok(Subscription {
                    handle: BroadcastHandle {
                        topic,
                        id,
                        commands,
                        sink: Arc::clone(&sink),
                        max_message_size: self.config.max_message_size,
                    },
                    events: EventReceiver::new(sink),
                });
            }
        }

        Err(GossipError::Protocol(format!(
            "topic {topic} task unavailable"
        )))
    }

    /// Subscribes with a callback handler instead of a receiver.
    ///
    /// A dispatch task feeds the handler until the subscription is cancelled
    /// or the topic is torn down.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`GossipNode::subscribe`].
    pub async fn subscribe_with_handler(
        &self,
        topic: &[u8],
        bootstrap: Vec<PeerId>,
        handler: Arc<dyn GossipEventHandler>,
    ) -> Result<BroadcastHandle, GossipError> {
        let subscription = self.subscribe(topic, bootstrap).await?;
        let (handle, mut events) = subscription.split();

        tokio::spawn(async move {
            debug!("gossip dispatch task started");
            while let Some(event) = events.recv().await {
                if let Err(err) = handler.on_event(event).await {
                    warn!("handler error, gossip: {err:?}");
                }
            }
            debug!("gossip dispatch task ended");
        });

        Ok(handle)
    }

    /// Cancels every live subscription and tears down all topic state.
    ///
    /// Waits up to the configured drain timeout per topic before aborting
    /// its task.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();

        let entries: Vec<TopicEntry> = {
            let mut topics = self.topics.lock();
            topics.drain().map(|(_, entry)| entry).collect()
        };

        for entry in entries {
            let _ = entry.commands.send(TopicCommand::Shutdown).await;
            let mut task = entry.task;
            if tokio::time::timeout(self.config.drain_timeout, &mut task)
                .await
                .is_err()
            {
                warn!("topic task did not drain in time, aborting");
                task.abort();
            }
        }
    }

    /// Looks up the command queue for a topic, spawning its task if needed.
    fn get_or_create_topic(
        &self,
        topic: TopicId,
        bootstrap: &[PeerId],
    ) -> mpsc::Sender<TopicCommand> {
        let mut topics = self.topics.lock();

        if let Some(entry) = topics.get(&topic) {
            if entry.status.load().accepts_subscribers() && !entry.commands.is_closed() {
                return entry.commands.clone();
            }
        }

        // No usable task: create one, replacing any draining leftover.
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.config.command_queue_capacity);
        // An empty effective bootstrap skips Joining: isolated but valid.
        let initial = if bootstrap.iter().any(|peer| *peer != self.local) {
            TopicStatus::Joining
        } else {
            TopicStatus::Active
        };
        let status = Arc::new(StatusCell::new(initial));
        let task = TopicTask::new(
            topic,
            self.local,
            self.config.clone(),
            Arc::clone(&status),
            Arc::clone(&self.transport),
            Arc::clone(&self.directory),
            rx,
        );

        let registry = Arc::clone(&self.topics);
        let on_exit: Box<dyn FnOnce() + Send> = Box::new(move || {
            let mut topics = registry.lock();
            if topics
                .get(&topic)
                .is_some_and(|entry| entry.generation == generation)
            {
                topics.remove(&topic);
            }
        });

        let handle = tokio::spawn(task.run(bootstrap.to_vec(), on_exit));
        topics.insert(
            topic,
            TopicEntry {
                generation,
                commands: tx.clone(),
                status,
                task: handle,
            },
        );

        tx
    }
}

impl Drop for GossipNode {
    fn drop(&mut self) {
        self.cancel.cancel();
        // Dropping the entries drops their command senders; topic tasks
        // observe closure once outstanding subscriptions go away too.
        self.topics.lock().clear();
    }
}

/// Decodes inbound frames and dispatches them to topic tasks.
async fn route_inbound(
    mut inbound: mpsc::Receiver<(PeerId, Vec<u8>)>,
    topics: Arc<Mutex<HashMap<TopicId, TopicEntry>>>,
    cancel: CancellationToken,
) {
    debug!("gossip router task started");
    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!("gossip router task cancelled");
                break;
            }
            frame = inbound.recv() => {
                let Some((from, bytes)) = frame else {
                    debug!("gossip inbound stream ended");
                    break;
                };
                let message = match GossipMessage::decode_wire(&bytes) {
                    Ok(message) => message,
                    Err(e) => {
                        debug!(peer = %from, "dropping undecodable frame: {e}");
                        continue;
                    }
                };
                let topic = message.topic();
                let commands = { topics.lock().get(&topic).map(|e| e.commands.clone()) };
                match commands {
                    Some(commands) => {
                        if commands
                            .send(TopicCommand::Inbound { from, message })
                            .await
                            .is_err()
                        {
                            trace!(topic = %topic, "topic task gone, dropping message");
                        }
                    }
                    None => trace!(topic = %topic, "message for unjoined topic"),
                }
            }
        }
    }
}

/// The broadcast/cancel half of a subscription.
#[derive(Debug)]
pub struct BroadcastHandle {
    topic: TopicId,
    id: SubscriberId,
    commands: mpsc::Sender<TopicCommand>,
    sink: Arc<SubscriptionSink>,
    max_message_size: usize,
}

impl BroadcastHandle {
    /// Returns the topic this handle broadcasts to.
    #[must_use]
    pub const fn topic(&self) -> TopicId {
        self.topic
    }

    /// Broadcasts a message to the topic's swarm.
    ///
    /// Acceptance into the local dissemination queue is the only guarantee;
    /// delivery is best-effort and unacknowledged. This suspends only on
    /// enqueueing locally, never on remote delivery.
    ///
    /// # Errors
    ///
    /// Returns [`GossipError::PayloadTooLarge`] for oversized payloads and
    /// [`GossipError::SubscriptionClosed`] after cancellation.
    pub async fn broadcast(&self, payload: Vec<u8>) -> Result<(), GossipError> {
        if payload.len() > self.max_message_size {
            return Err(GossipError::PayloadTooLarge {
                len: payload.len(),
                max: self.max_message_size,
            });
        }
        if self.sink.is_closed() {
            return Err(GossipError::SubscriptionClosed);
        }
        self.commands
            .send(TopicCommand::Broadcast { payload })
            .await
            .map_err(|_| GossipError::SubscriptionClosed)
    }

    /// Cancels the subscription; it is an error to use it afterwards.
    ///
    /// Safe to call concurrently with in-flight deliveries: once this
    /// returns, no further events are observable. Cancelling the topic's
    /// last subscription releases its mesh participation.
    ///
    /// # Errors
    ///
    /// Returns [`GossipError::SubscriptionClosed`] if already cancelled.
    pub async fn cancel(&self) -> Result<(), GossipError> {
        if self.sink.is_closed() {
            return Err(GossipError::SubscriptionClosed);
        }
        self.sink.cancel();
        let _ = self
            .commands
            .send(TopicCommand::Unsubscribe { id: self.id })
            .await;
        Ok(())
    }
}

impl Drop for BroadcastHandle {
    fn drop(&mut self) {
        if !self.sink.is_closed() {
            self.sink.cancel();
            let _ = self
                .commands
                .try_send(TopicCommand::Unsubscribe { id: self.id });
        }
    }
}

/// A live subscription to a topic: broadcast handle plus event stream.
#[derive(Debug)]
pub struct Subscription {
    handle: BroadcastHandle,
    events: EventReceiver,
}

impl Subscription {
    /// Returns the subscribed topic.
    #[must_use]
    pub const fn topic(&self) -> TopicId {
        self.handle.topic()
    }

    /// Broadcasts a message to the topic's swarm.
    ///
    /// # Errors
    ///
    /// See [`BroadcastHandle::broadcast`].
    pub async fn broadcast(&self, payload: Vec<u8>) -> Result<(), GossipError> {
        self.handle.broadcast(payload).await
    }

    /// Cancels the subscription.
    ///
    /// # Errors
    ///
    /// See [`BroadcastHandle::cancel`].
    pub async fn cancel(&self) -> Result<(), GossipError> {
        self.handle.cancel().await
    }

    /// Receives the next event for this subscription.
    pub async fn recv(&mut self) -> Option<GossipEvent> {
        self.events.recv().await
    }

    /// Receives the next event without waiting.
    pub fn try_recv(&mut self) -> Option<GossipEvent> {
        self.events.try_recv()
    }

    /// Splits into the broadcast handle and the event stream.
    #[must_use]
    pub fn split(self) -> (BroadcastHandle, EventReceiver) {
        (self.handle, self.events)
    }
}
