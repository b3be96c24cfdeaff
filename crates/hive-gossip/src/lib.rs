//! # hive-gossip
//!
//! Topic-based gossip broadcast overlay for the Hive mesh.
//!
//! Any number of nodes can join a named 32-byte topic, exchange arbitrary
//! opaque messages with best-effort reliable delivery, and observe membership
//! churn as a typed event stream.
//!
//! This crate provides:
//!
//! - Per-topic mesh membership with bounded active views and a passive
//!   repair reservoir
//! - Epidemic dissemination: eager push plus lazy digest exchange to heal
//!   partitions, with digest-based duplicate suppression
//! - Per-subscriber bounded event sinks that coalesce overruns into a single
//!   `Lagged` marker
//! - An explicit transport boundary with an in-memory implementation for
//!   tests and local setups
//!
//! ## Core Types
//!
//! - [`GossipNode`]: node-level coordination (subscribe, shutdown)
//! - [`Subscription`]: broadcast handle plus event stream for one subscriber
//! - [`GossipEvent`]: the sealed event set delivered to subscribers
//! - [`TopicId`] / [`PeerId`]: the identifiers everything is keyed by
//! - [`PeerDirectory`]: out-of-band address hints used to bootstrap joins
//!
//! ## Delivery semantics
//!
//! `broadcast` is fire-and-forget: acceptance into the local dissemination
//! queue, not a delivery guarantee. No global ordering exists across
//! originators; a given message is reported to each subscription at most
//! once.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod directory;
pub mod dissemination;
pub mod error;
pub mod membership;
pub mod message;
pub mod node;
pub mod protocol;
pub mod sink;
pub mod topic;
pub mod transport;

pub use config::GossipConfig;
pub use directory::{NodeAddress, PeerDirectory};
pub use dissemination::{BroadcastOutcome, DisseminationEngine, RelayOutcome};
pub use error::GossipError;
pub use membership::{JoinOutcome, MembershipEngine, MembershipEvent, RemovalOutcome, TickActions};
pub use message::{GossipMessage, MessageDigest, MessageEnvelope, WIRE_VERSION};
pub use node::{BroadcastHandle, GossipEventHandler, GossipNode, Subscription};
pub use protocol::{PeerId, TopicId};
pub use sink::{EventReceiver, GossipEvent, SubscriptionSink};
pub use topic::{SubscriberId, TopicStatus};
pub use transport::{BoxFuture, MemoryNetwork, MemoryTransport, Transport};
