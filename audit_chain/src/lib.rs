//! Hashing primitives for the vote audit log.
//!
//! An audit log is an ordered sequence of entries, each addressed by the
//! SHA-256 hash of its canonical encoding. A Merkle root over the sequence
//! (or any prefix of it) summarises the whole log in a single hash, so an
//! auditor holding the root can detect any change, insertion or removal of
//! an entry without trusting the server that stores the log.
//!
//! This crate is deliberately free of I/O and framework dependencies; the
//! backend server and the offline verification CLI both build on it.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use data_encoding::HEXLOWER;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Length of an entry hash in bytes.
pub const HASH_BYTES: usize = 32;

/// A SHA-256 digest identifying an audit entry or an interior Merkle node.
///
/// Serialised as lowercase hex so it is readable in database dumps, API
/// responses and log lines.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryHash([u8; HASH_BYTES]);

impl EntryHash {
    /// Construct from raw digest bytes.
    pub fn from_bytes(bytes: [u8; HASH_BYTES]) -> Self {
        Self(bytes)
    }

    /// The raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; HASH_BYTES] {
        &self.0
    }
}

impl AsRef<[u8]> for EntryHash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Display for EntryHash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", HEXLOWER.encode(&self.0))
    }
}

/// Failed to parse a hex-encoded entry hash.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseHashError {
    #[error("expected {expected} hex characters, got {got}")]
    BadLength { expected: usize, got: usize },
    #[error("invalid hex: {0}")]
    BadHex(String),
}

impl FromStr for EntryHash {
    type Err = ParseHashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != HASH_BYTES * 2 {
            return Err(ParseHashError::BadLength {
                expected: HASH_BYTES * 2,
                got: s.len(),
            });
        }
        let decoded = HEXLOWER
            .decode(s.as_bytes())
            .map_err(|e| ParseHashError::BadHex(e.to_string()))?;
        // Length already checked, so this cannot fail.
        let mut bytes = [0; HASH_BYTES];
        bytes.copy_from_slice(&decoded);
        Ok(Self(bytes))
    }
}

impl Serialize for EntryHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for EntryHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// Canonical content hash of a single audit entry:
/// `SHA-256(voter_id ‖ election_id ‖ candidate ‖ timestamp)`.
///
/// The ids are passed in their canonical string forms, the candidate as its
/// decimal ledger id, and the timestamp as RFC 3339 UTC. Callers must use
/// the same encodings everywhere or hashes will not reproduce.
pub fn entry_hash(voter_id: &str, election_id: &str, candidate: u64, timestamp: &str) -> EntryHash {
    let mut hasher = Sha256::new();
    hasher.update(voter_id.as_bytes());
    hasher.update(election_id.as_bytes());
    hasher.update(candidate.to_string().as_bytes());
    hasher.update(timestamp.as_bytes());
    EntryHash(hasher.finalize().into())
}

/// Merkle root of an ordered sequence of entry hashes.
///
/// Folds the sequence pairwise: `[h0, h1, h2, ...]` becomes
/// `[H(h0 ‖ h1), H(h2 ‖ h3), ...]` until one hash remains. A level of odd
/// length pairs its last element with itself rather than promoting it
/// unhashed. The empty sequence has no root; a single entry is its own root.
pub fn merkle_root(leaves: &[EntryHash]) -> Option<EntryHash> {
    if leaves.is_empty() {
        return None;
    }
    let mut level = leaves.to_vec();
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| match pair {
                [left, right] => hash_pair(left, right),
                [last] => hash_pair(last, last),
                _ => unreachable!("chunks(2) yields one or two elements"),
            })
            .collect();
    }
    Some(level[0])
}

/// Hash of an interior node: `SHA-256(left ‖ right)`.
fn hash_pair(left: &EntryHash, right: &EntryHash) -> EntryHash {
    let mut hasher = Sha256::new();
    hasher.update(left.0);
    hasher.update(right.0);
    EntryHash(hasher.finalize().into())
}
