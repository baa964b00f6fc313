//! The authoritative off-chain vote store.
//!
//! Everything the coordinator needs from storage fits behind [`VoteStore`].
//! The production implementation is MongoDB, where the double-vote guard is
//! a unique index decided atomically at insert time; the in-memory
//! implementation backs unit tests and local development with the same
//! atomicity under a single lock.

mod memory;
mod mongo;

pub use memory::MemoryVoteStore;
pub use mongo::MongoVoteStore;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::model::{
    common::vote::{Finalized, LedgerRef, Pending},
    db::{
        audit::{AuditEntry, NewAuditEntry},
        candidate::Candidate,
        election::Election,
        vote::Vote,
    },
    mongodb::Id,
};

/// Outcome of attempting to reserve a vote slot.
#[derive(Debug)]
pub enum Reservation {
    /// The insert won; this voter had not voted in this election.
    Reserved(Vote<Pending>),
    /// The uniqueness constraint rejected the insert: a vote already exists.
    Duplicate,
}

/// Outcome of appending an audit entry.
#[derive(Debug)]
pub enum AuditAppend {
    /// The entry was appended at the returned position.
    Appended(AuditEntry),
    /// An entry for this vote already exists; nothing was written.
    AlreadyRecorded,
}

/// One row of the off-chain tally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CandidateCount {
    pub candidate_id: Id,
    pub votes: u64,
}

/// Storage operations backing the vote commit protocol.
///
/// Writes that decide races (reserving a vote, appending an audit entry,
/// the pending→finalized transition) must be atomic in the storage layer;
/// callers never guard them with application-level locks.
#[rocket::async_trait]
pub trait VoteStore: Send + Sync + 'static {
    /// Look up an election.
    async fn election(&self, election_id: Id) -> Result<Option<Election>>;

    /// Look up a candidate within an election.
    async fn candidate(&self, election_id: Id, candidate_id: Id) -> Result<Option<Candidate>>;

    /// All candidates standing in an election.
    async fn candidates(&self, election_id: Id) -> Result<Vec<Candidate>>;

    /// Assign a candidate's ledger id, create-once: returns false without
    /// writing if the candidate already has one.
    async fn assign_ledger_id(
        &self,
        election_id: Id,
        candidate_id: Id,
        ledger_id: u64,
    ) -> Result<bool>;

    /// Attempt to insert the vote row. This is the sole double-vote guard:
    /// concurrent attempts for the same (election, voter) have exactly one
    /// winner, decided by the storage layer.
    async fn reserve(&self, vote: Vote<Pending>) -> Result<Reservation>;

    /// Record a failed ledger submission attempt on a pending vote.
    async fn record_attempt(&self, vote_id: Id, error: &str) -> Result<()>;

    /// Move a vote pending→finalized, attaching its transaction reference.
    /// Returns `None` if the vote was not pending (already finalized by a
    /// concurrent pass, discarded, or flagged).
    async fn finalize(&self, vote_id: Id, reference: LedgerRef) -> Result<Option<Vote<Finalized>>>;

    /// Move a vote pending→needs-review with the ledger's rejection reason.
    async fn flag_for_review(&self, vote_id: Id, reason: &str) -> Result<()>;

    /// Compensating removal of a reservation the ledger terminally rejected.
    /// Only removes pending votes; returns whether a row was removed.
    async fn discard_reservation(&self, vote_id: Id) -> Result<bool>;

    /// All pending votes cast before the given instant, oldest first.
    async fn pending_votes(&self, older_than: DateTime<Utc>) -> Result<Vec<Vote<Pending>>>;

    /// Append an audit entry, assigning the election's next sequence number
    /// under the same atomic insert. Idempotent per vote: a second append
    /// for the same (election, voter) reports `AlreadyRecorded`.
    async fn append_audit(&self, entry: NewAuditEntry) -> Result<AuditAppend>;

    /// All audit entries for an election, in sequence order.
    async fn audit_entries(&self, election_id: Id) -> Result<Vec<AuditEntry>>;

    /// Elections that have at least one audit entry.
    async fn audited_elections(&self) -> Result<Vec<Id>>;

    /// Off-chain per-candidate counts for an election, pending included.
    async fn tally(&self, election_id: Id) -> Result<Vec<CandidateCount>>;

    /// How many of an election's votes still await ledger confirmation.
    async fn pending_count(&self, election_id: Id) -> Result<u64>;
}
