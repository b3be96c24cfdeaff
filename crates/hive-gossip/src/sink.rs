//! Per-subscriber event delivery: bounded queues with lag coalescing.

use crate::protocol::PeerId;
use futures::Stream;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

/// Events delivered to a topic subscriber.
///
/// A closed set: consumers match exhaustively and the compiler checks
/// coverage when variants change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GossipEvent {
    /// We have a new direct neighbor in the mesh for this topic.
    NeighborUp(PeerId),
    /// We dropped a direct neighbor in the mesh for this topic.
    NeighborDown(PeerId),
    /// A gossip message was received for this topic.
    Received {
        /// The content of the message.
        content: Vec<u8>,
        /// The peer that delivered the message. This is not necessarily the
        /// original author.
        delivered_from: PeerId,
    },
    /// We missed some messages because the subscriber consumed too slowly.
    Lagged,
    /// The topic failed; no further events will follow.
    Error(String),
}

#[derive(Debug)]
struct SinkState {
    queue: VecDeque<GossipEvent>,
    /// A coalesced lag marker is pending delivery ahead of the queue.
    lagged: bool,
    closed: bool,
    waker: Option<Waker>,
}

/// The push half of a subscriber's event channel.
///
/// `push` never blocks the engine: when the queue is full the oldest
/// unconsumed events are dropped and a single [`GossipEvent::Lagged`] marker
/// takes their place. Repeated overruns within one unconsumed backlog
/// coalesce into that one marker.
#[derive(Debug)]
pub struct SubscriptionSink {
    state: Mutex<SinkState>,
    capacity: usize,
}

impl SubscriptionSink {
    /// Creates a sink with the given queue capacity (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(SinkState {
                queue: VecDeque::new(),
                lagged: false,
                closed: false,
                waker: None,
            }),
            capacity: capacity.max(1),
        })
    }

    /// Pushes an event, dropping the oldest backlog on overflow.
    pub fn push(&self, event: GossipEvent) {
        let waker = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            if state.queue.len() >= self.capacity {
                let excess = state.queue.len() + 1 - self.capacity;
                state.queue.drain(..excess);
                state.lagged = true;
            }
            state.queue.push_back(event);
            state.waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    /// Cancels the sink: clears the backlog and stops all further delivery.
    ///
    /// Safe to call concurrently with in-flight pushes; once this returns no
    /// further events are observable by the receiver.
    pub fn cancel(&self) {
        let waker = {
            let mut state = self.state.lock();
            state.closed = true;
            state.lagged = false;
            state.queue.clear();
            state.waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    /// Closes the sink: already-queued events drain, then the stream ends.
    pub fn close(&self) {
        let waker = {
            let mut state = self.state.lock();
            state.closed = true;
            state.waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    /// Returns true if the sink has been cancelled or closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    /// Returns the number of events currently queued.
    #[must_use]
    pub fn backlog(&self) -> usize {
        self.state.lock().queue.len()
    }
}

/// The receive half of a subscriber's event channel.
///
/// Events arrive in push order; a pending lag marker is delivered ahead of
/// the surviving backlog, standing in for the events that were dropped.
#[derive(Debug)]
pub struct EventReceiver {
    shared: Arc<SubscriptionSink>,
}

impl EventReceiver {
    /// Creates the receive half for a sink.
    #[must_use]
    pub fn new(shared: Arc<SubscriptionSink>) -> Self {
        Self { shared }
    }

    /// Polls for the next event.
    pub fn poll_recv(&mut self, cx: &mut Context<'_>) -> Poll<Option<GossipEvent>> {
        let mut state = self.shared.state.lock();
        if state.lagged {
            state.lagged = false;
            return Poll::Ready(Some(GossipEvent::Lagged));
        }
        if let Some(event) = state.queue.pop_front() {
            return Poll::Ready(Some(event));
        }
        if state.closed {
            return Poll::Ready(None);
        }
        state.waker = Some(cx.waker().clone());
        Poll::Pending
    }

    /// Receives the next event, waiting until one is available.
    ///
    /// Returns `None` once the subscription is cancelled (immediately) or the
    /// topic is torn down (after the backlog drains).
    pub async fn recv(&mut self) -> Option<GossipEvent> {
        futures::future::poll_fn(|cx| self.poll_recv(cx)).await
    }

    /// Receives the next event without waiting.
    pub fn try_recv(&mut self) -> Option<GossipEvent> {
        let mut state = self.shared.state.lock();
        if state.lagged {
            state.lagged = false;
            return Some(GossipEvent::Lagged);
        }
        state.queue.pop_front()
    }

    /// Returns true if the underlying sink has been cancelled or closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }
}

impl Stream for EventReceiver {
    type Item = GossipEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.poll_recv(cx)
    }
}
