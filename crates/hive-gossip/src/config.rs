//! Configuration for the gossip overlay.

use std::time::Duration;

/// Configuration for per-topic mesh and dissemination behavior.
///
/// The fan-out constant and view capacities are deliberately configuration
/// rather than hard-coded: the protocol itself does not prescribe them, so
/// the defaults here are the documented choice.
#[derive(Debug, Clone)]
pub struct GossipConfig {
    /// Maximum number of active gossip neighbors per topic (the fan-out `k`).
    pub active_view_size: usize,
    /// Maximum number of passive-view entries per topic (the repair reservoir).
    pub passive_view_cap: usize,
    /// Interval between heartbeats to active neighbors.
    pub heartbeat_interval: Duration,
    /// A neighbor silent for longer than this is considered failed.
    pub heartbeat_timeout: Duration,
    /// Interval between passive-view shuffle exchanges.
    pub shuffle_interval: Duration,
    /// Number of peers offered in one shuffle exchange.
    pub shuffle_sample: usize,
    /// Interval between lazy digest-summary exchanges.
    pub summary_interval: Duration,
    /// Number of recent digests advertised in one summary.
    pub summary_window: usize,
    /// How long to remember seen message digests for deduplication.
    pub seen_cache_ttl: Duration,
    /// Maximum number of seen digests (and retained payloads) to cache.
    pub max_seen_cache: usize,
    /// Interval between cleanup sweeps of the seen cache.
    pub cleanup_interval: Duration,
    /// Per-subscriber event queue capacity before lag-dropping begins.
    pub sink_capacity: usize,
    /// Per-topic command queue capacity.
    pub command_queue_capacity: usize,
    /// Maximum broadcast payload size in bytes.
    pub max_message_size: usize,
    /// How long shutdown waits for topic tasks to drain before aborting them.
    pub drain_timeout: Duration,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            active_view_size: 5,
            passive_view_cap: 30,
            heartbeat_interval: Duration::from_secs(1),
            heartbeat_timeout: Duration::from_secs(5),
            shuffle_interval: Duration::from_secs(30),
            shuffle_sample: 8,
            summary_interval: Duration::from_secs(10),
            summary_window: 128,
            seen_cache_ttl: Duration::from_secs(300),
            max_seen_cache: 10_000,
            cleanup_interval: Duration::from_secs(60),
            sink_capacity: 256,
            command_queue_capacity: 256,
            max_message_size: 64 * 1024,
            drain_timeout: Duration::from_secs(5),
        }
    }
}

impl GossipConfig {
    /// Creates a config optimized for small meshes (tests, local clusters).
    #[must_use]
    pub fn small_mesh() -> Self {
        Self {
            active_view_size: 2,
            passive_view_cap: 12,
            shuffle_sample: 4,
            summary_window: 32,
            ..Self::default()
        }
    }

    /// Creates a config optimized for large meshes.
    #[must_use]
    pub fn large_mesh() -> Self {
        Self {
            active_view_size: 8,
            passive_view_cap: 64,
            max_seen_cache: 50_000,
            ..Self::default()
        }
    }

    /// Sets the active-view size (fan-out).
    #[must_use]
    pub const fn with_active_view_size(mut self, size: usize) -> Self {
        self.active_view_size = size;
        self
    }

    /// Sets the passive-view capacity.
    #[must_use]
    pub const fn with_passive_view_cap(mut self, cap: usize) -> Self {
        self.passive_view_cap = cap;
        self
    }

    /// Sets the heartbeat interval.
    #[must_use]
    pub const fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Sets the heartbeat timeout.
    #[must_use]
    pub const fn with_heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = timeout;
        self
    }

    /// Sets the summary exchange interval.
    #[must_use]
    pub const fn with_summary_interval(mut self, interval: Duration) -> Self {
        self.summary_interval = interval;
        self
    }

    /// Sets the per-subscriber event queue capacity.
    #[must_use]
    pub const fn with_sink_capacity(mut self, capacity: usize) -> Self {
        self.sink_capacity = capacity;
        self
    }

    /// Sets the maximum broadcast payload size.
    #[must_use]
    pub const fn with_max_message_size(mut self, max: usize) -> Self {
        self.max_message_size = max;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_default() {
        let config = GossipConfig::default();
        assert_eq!(config.active_view_size, 5);
        assert_eq!(config.passive_view_cap, 30);
        assert_eq!(config.max_seen_cache, 10_000);
    }

    #[test]
    fn config_small_mesh() {
        let config = GossipConfig::small_mesh();
        assert_eq!(config.active_view_size, 2);
        assert_eq!(config.passive_view_cap, 12);
    }

    #[test]
    fn config_large_mesh() {
        let config = GossipConfig::large_mesh();
        assert_eq!(config.active_view_size, 8);
        assert_eq!(config.max_seen_cache, 50_000);
    }

    #[test]
    fn config_builder() {
        let config = GossipConfig::default()
            .with_active_view_size(3)
            .with_passive_view_cap(9)
            .with_sink_capacity(16);
        assert_eq!(config.active_view_size, 3);
        assert_eq!(config.passive_view_cap, 9);
        assert_eq!(config.sink_capacity, 16);
    }
}
