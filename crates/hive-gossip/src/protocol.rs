//! Core identifier types for the gossip overlay.
//!
//! This module defines the two keys everything else is indexed by:
//! - [`TopicId`]: 32-byte namespace identifying one independent gossip mesh
//! - [`PeerId`]: unique identifier for peers, derived from Ed25519 public keys

use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::GossipError;

/// A 32-byte topic identifier.
///
/// A topic names one independent gossip mesh and its message stream. The
/// value is opaque to this crate; callers typically derive it by hashing a
/// human-readable name. Construction from untrusted input goes through
/// [`TryFrom`], which rejects any length other than 32 bytes before any
/// network activity takes place.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TopicId {
    bytes: [u8; 32],
}

impl TopicId {
    /// Creates a `TopicId` from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self { bytes }
    }

    /// Returns the raw bytes of the topic ID.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }
}

impl From<[u8; 32]> for TopicId {
    fn from(bytes: [u8; 32]) -> Self {
        Self::from_bytes(bytes)
    }
}

impl TryFrom<&[u8]> for TopicId {
    type Error = GossipError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        let bytes: [u8; 32] = value
            .try_into()
            .map_err(|_| GossipError::InvalidTopic { len: value.len() })?;
        Ok(Self { bytes })
    }
}

impl TryFrom<Vec<u8>> for TopicId {
    type Error = GossipError;

    fn try_from(value: Vec<u8>) -> Result<Self, Self::Error> {
        Self::try_from(value.as_slice())
    }
}

impl fmt::Display for TopicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", bs58::encode(&self.bytes).into_string())
    }
}

/// Unique identifier for a peer in the network.
///
/// A `PeerId` is derived from an Ed25519 public key. The bytes stored are the
/// raw 32-byte key, displayed as base58 for human readability. It serves both
/// as the mesh-membership key and as the `delivered_from` attribution on
/// received messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerId {
    bytes: [u8; 32],
}

impl PeerId {
    /// Creates a `PeerId` from an Ed25519 public key.
    ///
    /// This is the primary constructor for overlay peers.
    #[must_use]
    pub fn from_public_key(key: &VerifyingKey) -> Self {
        Self {
            bytes: key.to_bytes(),
        }
    }

    /// Creates a `PeerId` from raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self { bytes }
    }

    /// Returns the raw bytes of the peer ID.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", bs58::encode(&self.bytes).into_string())
    }
}

impl FromStr for PeerId {
    type Err = GossipError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let decoded = bs58::decode(s)
            .into_vec()
            .map_err(|e| GossipError::InvalidPeer(format!("{s}: {e}")))?;
        let bytes: [u8; 32] = decoded
            .try_into()
            .map_err(|v: Vec<u8>| GossipError::InvalidPeer(format!("{s}: {} bytes", v.len())))?;
        Ok(Self { bytes })
    }
}
