//! Error types for hive-gossip.

use thiserror::Error;

/// Errors that can occur in gossip operations.
#[derive(Debug, Error)]
pub enum GossipError {
    /// A topic identifier had the wrong length.
    #[error("topic must be exactly 32 bytes, got {len}")]
    InvalidTopic {
        /// The length that was supplied.
        len: usize,
    },

    /// A peer identifier could not be parsed.
    #[error("invalid peer id: {0}")]
    InvalidPeer(String),

    /// A broadcast payload exceeded the configured size limit.
    #[error("payload of {len} bytes exceeds the {max} byte limit")]
    PayloadTooLarge {
        /// The payload length that was supplied.
        len: usize,
        /// The configured maximum.
        max: usize,
    },

    /// Wire protocol error.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A transport send attempt failed.
    ///
    /// Never surfaced to broadcasters; consumed internally as evidence of
    /// link failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The subscription has been cancelled.
    #[error("subscription is closed")]
    SubscriptionClosed,

    /// The node has been shut down.
    #[error("node is shut down")]
    NodeShutdown,

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
