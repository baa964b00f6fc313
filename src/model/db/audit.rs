use std::ops::Deref;

use audit_chain::{entry_hash, EntryHash};
use chrono::{DateTime, SecondsFormat, Utc};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};

use crate::model::{common::vote::Pending, db::vote::Vote, mongodb::Id};

/// The canonical timestamp encoding folded into audit entry hashes:
/// RFC 3339 UTC with millisecond precision, matching the precision the
/// database stores, so hashes reproduce after a round trip.
pub fn canonical_timestamp(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// An audit entry ready to be appended; the storage layer assigns the
/// sequence number under the same atomic insert that appends it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAuditEntry {
    /// The election this entry belongs to.
    pub election_id: Id,
    /// The voter whose vote this entry records.
    pub voter_id: Id,
    /// The ledger id of the candidate voted for.
    pub candidate_ledger_id: u64,
    /// When the vote was cast.
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub cast_at: DateTime<Utc>,
    /// Content address of this entry.
    pub content_hash: EntryHash,
}

impl NewAuditEntry {
    /// Build an entry, deriving its content hash from the canonical forms of
    /// the other fields.
    pub fn new(
        election_id: Id,
        voter_id: Id,
        candidate_ledger_id: u64,
        cast_at: DateTime<Utc>,
    ) -> Self {
        let content_hash = entry_hash(
            &voter_id.to_hex(),
            &election_id.to_hex(),
            candidate_ledger_id,
            &canonical_timestamp(cast_at),
        );
        Self {
            election_id,
            voter_id,
            candidate_ledger_id,
            cast_at,
            content_hash,
        }
    }

    /// The entry recording a reserved vote. Built from the vote row so a
    /// reconciliation retry derives a byte-identical entry.
    pub fn for_vote(vote: &Vote<Pending>) -> Self {
        Self::new(
            vote.election_id,
            vote.voter_id,
            vote.candidate_ledger_id,
            vote.cast_at,
        )
    }
}

/// An audit entry from the database: append-only, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    #[serde(rename = "_id")]
    pub id: Id,
    /// Position in the election's audit log. Monotonic, contiguous, and the
    /// authoritative ordering when timestamps collide.
    pub sequence: u64,
    /// Entry contents.
    #[serde(flatten)]
    pub entry: NewAuditEntry,
}

impl AuditEntry {
    /// Place an entry at the given position in the log.
    pub fn new(sequence: u64, entry: NewAuditEntry) -> Self {
        Self {
            id: Id::new(),
            sequence,
            entry,
        }
    }
}

impl Deref for AuditEntry {
    type Target = NewAuditEntry;

    fn deref(&self) -> &Self::Target {
        &self.entry
    }
}
