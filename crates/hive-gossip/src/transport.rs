//! Transport boundary for the gossip overlay.
//!
//! Establishing real network links (holepunching, relays, session security)
//! is the concern of the transport collaborator, not this crate. The overlay
//! consumes only two things: a fire-and-forget [`Transport::send`] and an
//! inbound `(peer, bytes)` stream handed to the node at spawn. The in-memory
//! implementation here backs tests, demos, and local multi-node setups.

use crate::directory::NodeAddress;
use crate::error::GossipError;
use crate::protocol::PeerId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Boxed future type for async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Capacity of an in-memory peer mailbox.
const MAILBOX_CAPACITY: usize = 1024;

/// Fire-and-forget message transport between peers.
///
/// A send is a delivery attempt with no acknowledgment contract. An error is
/// consumed by the overlay as evidence of link failure; it never surfaces to
/// broadcasters.
pub trait Transport: Send + Sync + 'static {
    /// Attempts to deliver a wire frame to a peer.
    ///
    /// # Errors
    ///
    /// Returns an error if the peer is unreachable at this moment.
    fn send<'a>(
        &'a self,
        to: &'a NodeAddress,
        frame: Vec<u8>,
    ) -> BoxFuture<'a, Result<(), GossipError>>;
}

/// An in-process network connecting [`MemoryTransport`] endpoints.
///
/// Each peer gets a bounded mailbox; sends resolve the recipient by peer id
/// and deliver losslessly while the peer is connected. Removing a peer makes
/// subsequent sends fail, simulating link failure.
#[derive(Debug, Clone, Default)]
pub struct MemoryNetwork {
    mailboxes: Arc<Mutex<HashMap<PeerId, mpsc::Sender<(PeerId, Vec<u8>)>>>>,
}

impl MemoryNetwork {
    /// Creates a new empty network.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a peer to the network.
    ///
    /// Returns the peer's transport endpoint and the inbound stream to hand
    /// to its gossip node.
    #[must_use]
    pub fn open(&self, local: PeerId) -> (MemoryTransport, mpsc::Receiver<(PeerId, Vec<u8>)>) {
        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        self.mailboxes.lock().insert(local, tx);
        (
            MemoryTransport {
                local,
                network: self.clone(),
            },
            rx,
        )
    }

    /// Detaches a peer, making it unreachable.
    pub fn disconnect(&self, peer: &PeerId) {
        self.mailboxes.lock().remove(peer);
    }

    /// Returns true if the peer is currently attached.
    #[must_use]
    pub fn is_connected(&self, peer: &PeerId) -> bool {
        self.mailboxes.lock().contains_key(peer)
    }
}

/// A peer's endpoint on a [`MemoryNetwork`].
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    local: PeerId,
    network: MemoryNetwork,
}

impl MemoryTransport {
    /// Returns the local peer this endpoint sends as.
    #[must_use]
    pub const fn local_peer_id(&self) -> PeerId {
        self.local
    }
}

impl Transport for MemoryTransport {
    fn send<'a>(
        &'a self,
        to: &'a NodeAddress,
        frame: Vec<u8>,
    ) -> BoxFuture<'a, Result<(), GossipError>> {
        Box::pin(async move {
            let mailbox = self.network.mailboxes.lock().get(&to.peer()).cloned();
            let Some(mailbox) = mailbox else {
                return Err(GossipError::Transport(format!(
                    "no route to peer {}",
                    to.peer()
                )));
            };
            mailbox
                .try_send((self.local, frame))
                .map_err(|_| GossipError::Transport(format!("peer {} unreachable", to.peer())))
        })
    }
}
