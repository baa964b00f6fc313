use audit_chain::EntryHash;
use serde::{Deserialize, Serialize};

use crate::model::{
    db::audit::{canonical_timestamp, AuditEntry},
    mongodb::Id,
};

/// A compact attestation of the audit log's current contents.
///
/// The root and samples prove internal self-consistency; the anchor section
/// is only present when the log also matched the latest checkpoint published
/// to the ledger, which is what upgrades this to tamper-evidence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditReport {
    pub election_id: Id,
    /// Merkle root over all entries in sequence order; absent for an empty log.
    pub root_hash: Option<EntryHash>,
    pub total_entries: u64,
    /// Evenly spaced entry hashes for spot checks.
    pub sample_hashes: Vec<EntryHash>,
    /// The ledger checkpoint the log was verified against, if one exists.
    pub anchor: Option<AnchorReport>,
}

/// A ledger checkpoint the stored log was successfully compared against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorReport {
    /// The anchored Merkle root.
    pub root_hash: EntryHash,
    /// How many entries the anchor covers.
    pub entries: u64,
    /// The anchoring transaction, when the ledger reported it.
    pub transaction: Option<String>,
}

/// A full export of an election's audit log, as consumed by the offline
/// verification tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditDump {
    /// Election id in canonical hex.
    pub election_id: String,
    /// Merkle root the server claims for these entries.
    pub root_hash: Option<EntryHash>,
    /// Every entry, in sequence order.
    pub entries: Vec<AuditEntryDesc>,
}

/// One exported audit entry. All fields are already in the canonical string
/// forms the content hash is computed over, so verifiers need no knowledge
/// of the server's internal encodings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntryDesc {
    pub sequence: u64,
    /// Voter id in canonical hex.
    pub voter_id: String,
    pub candidate_ledger_id: u64,
    /// Canonical RFC 3339 timestamp.
    pub cast_at: String,
    pub content_hash: EntryHash,
}

impl From<&AuditEntry> for AuditEntryDesc {
    fn from(entry: &AuditEntry) -> Self {
        Self {
            sequence: entry.sequence,
            voter_id: entry.voter_id.to_hex(),
            candidate_ledger_id: entry.candidate_ledger_id,
            cast_at: canonical_timestamp(entry.cast_at),
            content_hash: entry.content_hash,
        }
    }
}
