//! Out-of-band peer address directory.
//!
//! The directory maps peer identifiers to whatever addressing information has
//! been learned for them: a relay URL and an ordered set of direct socket
//! addresses. It is the bootstrap path for mesh joins: addresses arrive as
//! explicit hints (tickets, invitation codes, configuration) rather than
//! through slower discovery mechanisms.

use crate::protocol::PeerId;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;

/// Addressing information for a single peer.
///
/// Mutable only through explicit hint calls on [`PeerDirectory`]; new hints
/// merge with existing ones for the same peer rather than overwriting them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAddress {
    peer: PeerId,
    relay_url: Option<String>,
    direct: Vec<SocketAddr>,
    last_updated: DateTime<Utc>,
}

impl NodeAddress {
    /// Creates an address record for a peer with no known addresses yet.
    #[must_use]
    pub fn new(peer: PeerId) -> Self {
        Self {
            peer,
            relay_url: None,
            direct: Vec::new(),
            last_updated: Utc::now(),
        }
    }

    /// Sets the relay URL.
    #[must_use]
    pub fn with_relay_url(mut self, url: impl Into<String>) -> Self {
        self.relay_url = Some(url.into());
        self
    }

    /// Sets the direct socket addresses, deduplicating while preserving order.
    #[must_use]
    pub fn with_direct_addresses(mut self, addrs: impl IntoIterator<Item = SocketAddr>) -> Self {
        for addr in addrs {
            self.add_direct_address(addr);
        }
        self
    }

    /// Returns the peer this record describes.
    #[must_use]
    pub const fn peer(&self) -> PeerId {
        self.peer
    }

    /// Returns the relay URL, if known.
    #[must_use]
    pub fn relay_url(&self) -> Option<&str> {
        self.relay_url.as_deref()
    }

    /// Returns the known direct addresses, in the order they were learned.
    #[must_use]
    pub fn direct_addresses(&self) -> &[SocketAddr] {
        &self.direct
    }

    /// Returns when this record was last updated.
    #[must_use]
    pub const fn last_updated(&self) -> DateTime<Utc> {
        self.last_updated
    }

    /// Returns true if no addressing information is known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.relay_url.is_none() && self.direct.is_empty()
    }

    /// Adds a direct address if it isn't already present.
    pub fn add_direct_address(&mut self, addr: SocketAddr) {
        if !self.direct.contains(&addr) {
            self.direct.push(addr);
        }
    }

    /// Merges another record for the same peer into this one.
    ///
    /// Direct addresses are unioned in order; the relay URL is replaced only
    /// when the incoming record carries one. Existing information is never
    /// silently discarded.
    pub fn merge_from(&mut self, other: &Self) {
        for addr in &other.direct {
            self.add_direct_address(*addr);
        }
        if other.relay_url.is_some() {
            self.relay_url.clone_from(&other.relay_url);
        }
        self.last_updated = Utc::now();
    }
}

/// Directory of known peer addresses, shared across topic tasks.
#[derive(Debug, Default)]
pub struct PeerDirectory {
    records: RwLock<HashMap<PeerId, NodeAddress>>,
}

impl PeerDirectory {
    /// Creates a new empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Resolves a peer to its known addressing information.
    ///
    /// Returns `None` when nothing is known about the peer. A join attempt
    /// treats that as non-fatal and drops the peer from the attempt.
    #[must_use]
    pub fn resolve(&self, peer: &PeerId) -> Option<NodeAddress> {
        self.records.read().get(peer).cloned()
    }

    /// Adds an address hint, merging with any existing record for the peer.
    ///
    /// Idempotent: applying the same hint twice leaves the record unchanged
    /// apart from its timestamp.
    pub fn add_hint(&self, hint: NodeAddress) {
        let mut records = self.records.write();
        match records.entry(hint.peer()) {
            std::collections::hash_map::Entry::Occupied(mut entry) => {
                entry.get_mut().merge_from(&hint);
            }
            std::collections::hash_map::Entry::Vacant(entry) => {
                entry.insert(hint);
            }
        }
    }

    /// Returns all peers the directory has records for.
    #[must_use]
    pub fn known_peers(&self) -> Vec<PeerId> {
        self.records.read().keys().copied().collect()
    }

    /// Returns the number of records in the directory.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns true if the directory has no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}
