//! Byte key layout for the LMDB result store.
//!
//! Result keys group every entry of one content identity under a common
//! prefix, so a single prefix scan finds all candidates for a lookup.
//! History keys group a requester's records and sort them newest first.

use chrono::{DateTime, Utc};
use libro_core::{compute_content_hash, key::perspective_digest, CacheKey, ContentHash, ContentIdentity, RequesterRef};
use uuid::Uuid;

/// Separator byte between the group prefix and the rest of the key.
const SEPARATOR: u8 = 0xFF;

/// Length of a group prefix: 32-byte digest plus separator.
pub const PREFIX_LEN: usize = 33;

/// Key of one stored result.
///
/// # Binary Format
///
/// 65 bytes:
/// - Bytes 0-31: content identity
/// - Byte 32: separator (0xFF)
/// - Bytes 33-64: digest of the covered perspective set
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResultKey {
    inner: ResultKeyInner,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ResultKeyInner {
    identity: ContentIdentity,
    perspectives: ContentHash,
}

impl ResultKey {
    pub const LEN: usize = 65;

    /// Key for the entry covering exactly `key`'s perspectives.
    pub fn for_cache_key(key: &CacheKey) -> Self {
        Self {
            inner: ResultKeyInner {
                identity: key.identity(),
                perspectives: perspective_digest(key.perspectives()),
            },
        }
    }

    pub fn identity(&self) -> ContentIdentity {
        self.inner.identity
    }

    pub fn encode(&self) -> [u8; Self::LEN] {
        let mut bytes = [0u8; Self::LEN];
        bytes[0..32].copy_from_slice(self.inner.identity.as_bytes());
        bytes[32] = SEPARATOR;
        bytes[33..65].copy_from_slice(&self.inner.perspectives);
        bytes
    }

    /// Returns `None` unless `bytes` is a well-formed 65-byte key.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != Self::LEN || bytes[32] != SEPARATOR {
            return None;
        }
        let identity: ContentHash = bytes[0..32].try_into().ok()?;
        let perspectives: ContentHash = bytes[33..65].try_into().ok()?;
        Some(Self {
            inner: ResultKeyInner {
                identity: ContentIdentity::from_bytes(identity),
                perspectives,
            },
        })
    }

    /// Prefix shared by every entry of `identity`.
    pub fn identity_prefix(identity: &ContentIdentity) -> [u8; PREFIX_LEN] {
        let mut bytes = [0u8; PREFIX_LEN];
        bytes[0..32].copy_from_slice(identity.as_bytes());
        bytes[32] = SEPARATOR;
        bytes
    }
}

/// Key of one history record.
///
/// # Binary Format
///
/// 57 bytes:
/// - Bytes 0-31: SHA-256 of the requester reference
/// - Byte 32: separator (0xFF)
/// - Bytes 33-40: `u64::MAX - requested_at_millis`, big endian
/// - Bytes 41-56: bitwise complement of the record id
///
/// Complemented time and id make a forward scan return newest first.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HistoryKey {
    inner: HistoryKeyInner,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct HistoryKeyInner {
    requester: ContentHash,
    requested_at_millis: u64,
    record_id: Uuid,
}

impl HistoryKey {
    pub const LEN: usize = 57;

    pub fn new(requester: &RequesterRef, requested_at: DateTime<Utc>, record_id: Uuid) -> Self {
        Self {
            inner: HistoryKeyInner {
                requester: requester_digest(requester),
                requested_at_millis: requested_at.timestamp_millis().max(0) as u64,
                record_id,
            },
        }
    }

    pub fn record_id(&self) -> Uuid {
        self.inner.record_id
    }

    pub fn requested_at_millis(&self) -> u64 {
        self.inner.requested_at_millis
    }

    pub fn encode(&self) -> [u8; Self::LEN] {
        let mut bytes = [0u8; Self::LEN];
        bytes[0..32].copy_from_slice(&self.inner.requester);
        bytes[32] = SEPARATOR;
        bytes[33..41].copy_from_slice(&(u64::MAX - self.inner.requested_at_millis).to_be_bytes());
        for (dst, src) in bytes[41..57].iter_mut().zip(self.inner.record_id.as_bytes()) {
            *dst = !src;
        }
        bytes
    }

    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != Self::LEN || bytes[32] != SEPARATOR {
            return None;
        }
        let requester: ContentHash = bytes[0..32].try_into().ok()?;
        let reversed: [u8; 8] = bytes[33..41].try_into().ok()?;
        let mut id = [0u8; 16];
        for (dst, src) in id.iter_mut().zip(&bytes[41..57]) {
            *dst = !src;
        }
        Some(Self {
            inner: HistoryKeyInner {
                requester,
                requested_at_millis: u64::MAX - u64::from_be_bytes(reversed),
                record_id: Uuid::from_bytes(id),
            },
        })
    }

    /// Prefix shared by every record of `requester`.
    pub fn requester_prefix(requester: &RequesterRef) -> [u8; PREFIX_LEN] {
        let mut bytes = [0u8; PREFIX_LEN];
        bytes[0..32].copy_from_slice(&requester_digest(requester));
        bytes[32] = SEPARATOR;
        bytes
    }
}

fn requester_digest(requester: &RequesterRef) -> ContentHash {
    compute_content_hash(requester.as_str().as_bytes())
}
