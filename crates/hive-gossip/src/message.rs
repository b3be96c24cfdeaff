//! Gossip protocol message types with prost wire framing.

use crate::error::GossipError;
use crate::protocol::{PeerId, TopicId};
use prost::Message;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Content digest of a gossip message.
///
/// The BLAKE3 hash of the originating peer id concatenated with the payload.
/// Used for deduplication and for the lazy summary/pull exchange. Digests are
/// always recomputed locally from the envelope contents; a digest claimed on
/// the wire is never trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageDigest {
    bytes: [u8; 32],
}

impl MessageDigest {
    /// Computes the digest for a message originated by `origin` with `payload`.
    #[must_use]
    pub fn compute(origin: &PeerId, payload: &[u8]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(origin.as_bytes());
        hasher.update(payload);
        Self {
            bytes: *hasher.finalize().as_bytes(),
        }
    }

    /// Creates a digest from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self { bytes }
    }

    /// Returns the raw bytes of the digest.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }
}

impl fmt::Display for MessageDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", bs58::encode(&self.bytes).into_string())
    }
}

/// A broadcast message as it moves through the overlay.
///
/// Carries the opaque payload, the identity of the peer that originated the
/// broadcast, and the locally computed digest. An envelope is processed by
/// the dissemination engine at most once per topic per node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEnvelope {
    origin: PeerId,
    payload: Vec<u8>,
    digest: MessageDigest,
}

impl MessageEnvelope {
    /// Creates an envelope, computing the digest from origin and payload.
    #[must_use]
    pub fn new(origin: PeerId, payload: Vec<u8>) -> Self {
        let digest = MessageDigest::compute(&origin, &payload);
        Self {
            origin,
            payload,
            digest,
        }
    }

    /// Returns the peer that originated this broadcast.
    #[must_use]
    pub const fn origin(&self) -> PeerId {
        self.origin
    }

    /// Returns the opaque payload bytes.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Consumes the envelope, returning the payload.
    #[must_use]
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Returns the content digest.
    #[must_use]
    pub const fn digest(&self) -> MessageDigest {
        self.digest
    }
}

/// Messages exchanged in the gossip protocol.
///
/// Every variant is tagged with the topic it belongs to so the receiving node
/// can route it to the topic's task. Sender identity is supplied by the
/// transport layer, not carried on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GossipMessage {
    /// Request to become an active gossip neighbor for a topic.
    Join {
        /// The topic being joined.
        topic: TopicId,
    },

    /// Acceptance of a [`GossipMessage::Join`] request.
    JoinAck {
        /// The topic the link was accepted for.
        topic: TopicId,
    },

    /// Notice that the sender is dropping the gossip link for a topic.
    Prune {
        /// The topic being left.
        topic: TopicId,
    },

    /// Offer of known peers for the passive-view exchange.
    Shuffle {
        /// The topic this shuffle applies to.
        topic: TopicId,
        /// Peers the sender offers.
        peers: Vec<PeerId>,
    },

    /// Reply to a [`GossipMessage::Shuffle`] with the receiver's own sample.
    ShuffleReply {
        /// The topic this shuffle applies to.
        topic: TopicId,
        /// Peers offered in return.
        peers: Vec<PeerId>,
    },

    /// Liveness probe between active neighbors.
    Heartbeat {
        /// The topic the link belongs to.
        topic: TopicId,
        /// Timestamp in milliseconds since Unix epoch.
        timestamp_ms: u64,
    },

    /// Eager push of a broadcast message.
    Broadcast {
        /// The topic the message belongs to.
        topic: TopicId,
        /// The peer that originated the broadcast.
        origin: PeerId,
        /// The opaque payload.
        payload: Vec<u8>,
    },

    /// Lazy advertisement of recently seen message digests.
    Summary {
        /// The topic the digests belong to.
        topic: TopicId,
        /// Recently seen digests.
        digests: Vec<MessageDigest>,
    },

    /// Request for the payloads behind previously advertised digests.
    PullRequest {
        /// The topic the digests belong to.
        topic: TopicId,
        /// Digests the sender is missing.
        digests: Vec<MessageDigest>,
    },
}

impl GossipMessage {
    /// Creates a heartbeat message stamped with the current time.
    #[must_use]
    pub fn heartbeat(topic: TopicId) -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self::Heartbeat {
            topic,
            timestamp_ms,
        }
    }

    /// Creates an eager-push broadcast message from an envelope.
    #[must_use]
    pub fn broadcast(topic: TopicId, envelope: &MessageEnvelope) -> Self {
        Self::Broadcast {
            topic,
            origin: envelope.origin(),
            payload: envelope.payload().to_vec(),
        }
    }

    /// Returns the topic this message is addressed to.
    #[must_use]
    pub const fn topic(&self) -> TopicId {
        match self {
            Self::Join { topic }
            | Self::JoinAck { topic }
            | Self::Prune { topic }
            | Self::Shuffle { topic, .. }
            | Self::ShuffleReply { topic, .. }
            | Self::Heartbeat { topic, .. }
            | Self::Broadcast { topic, .. }
            | Self::Summary { topic, .. }
            | Self::PullRequest { topic, .. } => *topic,
        }
    }

    /// Returns the message type as a string.
    #[must_use]
    pub const fn message_type(&self) -> &'static str {
        match self {
            Self::Join { .. } => "Join",
            Self::JoinAck { .. } => "JoinAck",
            Self::Prune { .. } => "Prune",
            Self::Shuffle { .. } => "Shuffle",
            Self::ShuffleReply { .. } => "ShuffleReply",
            Self::Heartbeat { .. } => "Heartbeat",
            Self::Broadcast { .. } => "Broadcast",
            Self::Summary { .. } => "Summary",
            Self::PullRequest { .. } => "PullRequest",
        }
    }
}

// ============ Prost Wire Format ============

/// Prost-encoded wrapper for gossip messages.
#[derive(Clone, PartialEq, Message)]
pub struct WireFrame {
    /// Message type discriminator.
    #[prost(uint32, tag = "1")]
    pub msg_type: u32,
    /// JSON-encoded payload (for complex nested types).
    #[prost(bytes = "vec", tag = "2")]
    pub payload: Vec<u8>,
    /// Protocol version for forward compatibility.
    #[prost(uint32, tag = "3")]
    pub version: u32,
}

/// Current wire protocol version.
pub const WIRE_VERSION: u32 = 1;

/// Message type constants for wire encoding.
pub mod wire_types {
    /// Join message type.
    pub const JOIN: u32 = 1;
    /// JoinAck message type.
    pub const JOIN_ACK: u32 = 2;
    /// Prune message type.
    pub const PRUNE: u32 = 3;
    /// Shuffle message type.
    pub const SHUFFLE: u32 = 4;
    /// ShuffleReply message type.
    pub const SHUFFLE_REPLY: u32 = 5;
    /// Heartbeat message type.
    pub const HEARTBEAT: u32 = 6;
    /// Broadcast message type.
    pub const BROADCAST: u32 = 7;
    /// Summary message type.
    pub const SUMMARY: u32 = 8;
    /// PullRequest message type.
    pub const PULL_REQUEST: u32 = 9;
}

impl GossipMessage {
    const fn wire_type(&self) -> u32 {
        match self {
            Self::Join { .. } => wire_types::JOIN,
            Self::JoinAck { .. } => wire_types::JOIN_ACK,
            Self::Prune { .. } => wire_types::PRUNE,
            Self::Shuffle { .. } => wire_types::SHUFFLE,
            Self::ShuffleReply { .. } => wire_types::SHUFFLE_REPLY,
            Self::Heartbeat { .. } => wire_types::HEARTBEAT,
            Self::Broadcast { .. } => wire_types::BROADCAST,
            Self::Summary { .. } => wire_types::SUMMARY,
            Self::PullRequest { .. } => wire_types::PULL_REQUEST,
        }
    }

    /// Encodes the message to prost wire format.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn encode_wire(&self) -> Result<Vec<u8>, GossipError> {
        let payload = serde_json::to_vec(self)
            .map_err(|e| GossipError::Protocol(format!("Failed to serialize message: {e}")))?;

        let frame = WireFrame {
            msg_type: self.wire_type(),
            payload,
            version: WIRE_VERSION,
        };

        Ok(frame.encode_to_vec())
    }

    /// Decodes a message from prost wire format.
    ///
    /// # Errors
    ///
    /// Returns an error if the wire format is invalid, the version is
    /// unsupported, or the type discriminator disagrees with the payload.
    pub fn decode_wire(bytes: &[u8]) -> Result<Self, GossipError> {
        let frame = WireFrame::decode(bytes)
            .map_err(|e| GossipError::Protocol(format!("Failed to decode wire frame: {e}")))?;

        if frame.version > WIRE_VERSION {
            return Err(GossipError::Protocol(format!(
                "Unsupported wire version: {} (max supported: {})",
                frame.version, WIRE_VERSION
            )));
        }

        let message: Self = serde_json::from_slice(&frame.payload)
            .map_err(|e| GossipError::Protocol(format!("Failed to deserialize message: {e}")))?;

        if message.wire_type() != frame.msg_type {
            return Err(GossipError::Protocol(format!(
                "Wire type mismatch: frame says {}, payload is {}",
                frame.msg_type,
                message.message_type()
            )));
        }

        Ok(message)
    }
}
