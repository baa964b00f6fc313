use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::mongodb::Id;

/// A vote the caller wishes to cast. The caller is an already-authenticated
/// collaborator, so the voter identity arrives validated.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRequest {
    pub voter_id: Id,
    pub candidate_id: Id,
}

/// The outcome of a successful vote submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteResponse {
    /// Whether the ledger has confirmed the vote yet.
    pub status: VoteStatus,
    /// The ledger transaction, once confirmed.
    pub transaction: Option<String>,
    /// When the vote was recorded.
    pub cast_at: DateTime<Utc>,
}

/// Caller-visible commit status of an accepted vote.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteStatus {
    /// Recorded off-chain and confirmed on the ledger.
    Committed,
    /// Recorded off-chain; ledger confirmation is still outstanding and will
    /// be completed in the background.
    Pending,
}

/// The ledger registration assigned to a candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateRegistration {
    pub candidate_id: Id,
    pub ledger_id: u64,
}
