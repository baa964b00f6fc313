use serde::{Deserialize, Serialize};

use crate::model::mongodb::Id;

/// A candidate from the database. Belongs to exactly one election.
///
/// The ledger id is assigned once, when the candidate is registered on the
/// ledger, and never changes afterwards; candidates without one cannot
/// receive votes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    #[serde(rename = "_id")]
    pub id: Id,
    /// The election this candidate stands in.
    pub election_id: Id,
    /// Candidate name, unique within the election.
    pub name: String,
    /// The identifier the external ledger uses for this candidate.
    pub ledger_id: Option<u64>,
}
