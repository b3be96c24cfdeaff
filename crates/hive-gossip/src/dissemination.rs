//! Per-topic epidemic dissemination: eager push with lazy digest repair.
//!
//! Like the membership engine this is sans-IO: handlers mutate the seen-cache
//! and return the forwarding targets for the caller to act on. Duplicate
//! suppression is by content digest against a bounded recently-seen cache;
//! payloads are retained alongside their digests so gaps advertised by a
//! neighbor's summary can be backfilled on request.

use crate::config::GossipConfig;
use crate::message::{MessageDigest, MessageEnvelope};
use crate::protocol::PeerId;
use std::collections::{HashMap, VecDeque};
use std::time::Instant;

/// Result of accepting a locally originated broadcast.
#[derive(Debug, Clone)]
pub struct BroadcastOutcome {
    /// The envelope built for the payload.
    pub envelope: MessageEnvelope,
    /// Neighbors to eager-push the envelope to.
    pub targets: Vec<PeerId>,
    /// Whether this exact content was already seen (nothing to forward).
    pub was_duplicate: bool,
}

/// Result of handling an envelope received from a neighbor.
#[derive(Debug, Clone)]
pub struct RelayOutcome {
    /// Whether the envelope was new to this node.
    ///
    /// A duplicate is silently absorbed: no event, no forwarding.
    pub fresh: bool,
    /// Neighbors to relay the envelope to (the sender excluded).
    pub targets: Vec<PeerId>,
}

/// Entry in the seen cache.
#[derive(Debug, Clone)]
struct SeenEntry {
    added_at: Instant,
    envelope: MessageEnvelope,
}

/// Dissemination state for a single topic.
#[derive(Debug)]
pub struct DisseminationEngine {
    local: PeerId,
    config: GossipConfig,
    /// Digests we've already processed, with retained payloads for backfill.
    seen: HashMap<MessageDigest, SeenEntry>,
    /// Insertion order of seen digests for LRU eviction.
    seen_order: VecDeque<MessageDigest>,
    /// Most recent digests, advertised in lazy summaries.
    recent: VecDeque<MessageDigest>,
    last_cleanup: Instant,
}

impl DisseminationEngine {
    /// Creates an engine for a topic.
    #[must_use]
    pub fn new(local: PeerId, config: GossipConfig) -> Self {
        Self {
            local,
            config,
            seen: HashMap::new(),
            seen_order: VecDeque::new(),
            recent: VecDeque::new(),
            last_cleanup: Instant::now(),
        }
    }

    /// Returns the local peer ID.
    #[must_use]
    pub const fn local_peer_id(&self) -> PeerId {
        self.local
    }

    /// Checks if a digest has already been processed.
    #[must_use]
    pub fn has_seen(&self, digest: &MessageDigest) -> bool {
        self.seen.contains_key(digest)
    }

    /// Returns the number of cached digests.
    #[must_use]
    pub fn seen_len(&self) -> usize {
        self.seen.len()
    }

    /// Accepts a locally originated broadcast into the dissemination queue.
    ///
    /// Acceptance is not a delivery guarantee to any remote peer; the
    /// returned targets are this round's eager-push fan-out.
    pub fn prepare_broadcast(
        &mut self,
        payload: Vec<u8>,
        neighbors: &[PeerId],
    ) -> BroadcastOutcome {
        self.maybe_cleanup();

        let envelope = MessageEnvelope::new(self.local, payload);
        if self.has_seen(&envelope.digest()) {
            return BroadcastOutcome {
                envelope,
                targets: Vec::new(),
                was_duplicate: true,
            };
        }

        self.mark_seen(envelope.clone());

        BroadcastOutcome {
            envelope,
            targets: neighbors.to_vec(),
            was_duplicate: false,
        }
    }

    /// Handles an envelope delivered by a neighbor.
    ///
    /// The digest is recomputed by the caller when constructing the envelope,
    /// so a forged wire digest can never suppress fresh content.
    pub fn handle_envelope(
        &mut self,
        envelope: MessageEnvelope,
        from: PeerId,
        neighbors: &[PeerId],
    ) -> RelayOutcome {
        self.maybe_cleanup();

        if self.has_seen(&envelope.digest()) {
            return RelayOutcome {
                fresh: false,
                targets: Vec::new(),
            };
        }

        self.mark_seen(envelope);

        RelayOutcome {
            fresh: true,
            targets: neighbors.iter().filter(|p| **p != from).copied().collect(),
        }
    }

    /// Returns the recent digests to advertise in a lazy summary.
    #[must_use]
    pub fn summary(&self) -> Vec<MessageDigest> {
        self.recent.iter().copied().collect()
    }

    /// Returns which of the offered digests this node has not seen.
    #[must_use]
    pub fn missing_from(&self, offered: &[MessageDigest]) -> Vec<MessageDigest> {
        let mut missing = Vec::new();
        for digest in offered {
            if !self.has_seen(digest) && !missing.contains(digest) {
                missing.push(*digest);
            }
        }
        missing
    }

    /// Looks up retained envelopes to serve a pull request.
    ///
    /// Digests that have been evicted in the meantime are skipped.
    #[must_use]
    pub fn envelopes_for(&self, digests: &[MessageDigest]) -> Vec<MessageEnvelope> {
        digests
            .iter()
            .filter_map(|d| self.seen.get(d).map(|entry| entry.envelope.clone()))
            .collect()
    }

    /// Marks an envelope as seen, evicting the oldest entry at capacity.
    fn mark_seen(&mut self, envelope: MessageEnvelope) {
        if self.seen.len() >= self.config.max_seen_cache {
            if let Some(oldest) = self.seen_order.pop_front() {
                self.seen.remove(&oldest);
            }
        }

        let digest = envelope.digest();
        self.seen.insert(
            digest,
            SeenEntry {
                added_at: Instant::now(),
                envelope,
            },
        );
        self.seen_order.push_back(digest);

        if self.recent.len() >= self.config.summary_window {
            self.recent.pop_front();
        }
        self.recent.push_back(digest);
    }

    /// Runs cleanup if the interval has elapsed.
    fn maybe_cleanup(&mut self) {
        if self.last_cleanup.elapsed() < self.config.cleanup_interval {
            return;
        }
        self.cleanup();
    }

    /// Cleans up expired seen entries.
    pub fn cleanup(&mut self) {
        let now = Instant::now();
        self.last_cleanup = now;

        let ttl = self.config.seen_cache_ttl;
        self.seen
            .retain(|_, entry| now.duration_since(entry.added_at) < ttl);
        self.seen_order.retain(|d| self.seen.contains_key(d));
        self.recent.retain(|d| self.seen.contains_key(d));
    }
}
