use serde::{Deserialize, Serialize};

use crate::model::mongodb::Id;

/// Per-candidate results for an election, served from the off-chain store
/// and cross-checked against the ledger tally when it is reachable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionResults {
    pub election_id: Id,
    /// One row per candidate, including candidates with no votes yet.
    pub totals: Vec<CandidateTally>,
    /// Votes recorded off-chain that still await ledger confirmation.
    pub pending_votes: u64,
}

/// Results row for a single candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateTally {
    pub candidate_id: Id,
    pub name: String,
    /// Absent for candidates never registered on the ledger.
    pub ledger_id: Option<u64>,
    /// Authoritative off-chain count, pending votes included.
    pub votes: u64,
    /// The ledger's count, when the ledger was reachable. Trails the
    /// off-chain count by the votes still pending.
    pub ledger_votes: Option<u64>,
}
