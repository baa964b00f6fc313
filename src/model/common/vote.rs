use std::fmt::Debug;

use chrono::{DateTime, Utc};
use mongodb::bson::{serde_helpers::chrono_datetime_as_bson_datetime, to_bson, Bson};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_unit_struct::{Deserialize_unit_struct, Serialize_unit_struct};

/// Trait for the ledger status of a vote, enforcing on the type level that
/// each status carries exactly the ledger evidence it can have: a pending
/// vote has only its retry bookkeeping, a finalised vote has a transaction
/// reference, and a vote under review has the reason it was flagged.
pub trait VoteState: Copy {
    /// What the ledger has told us so far about this vote.
    type Evidence: Serialize + DeserializeOwned + Debug + Clone + Send + Sync + Unpin;
}

/// Marker type for votes reserved off-chain but not yet confirmed on the ledger.
#[derive(Debug, Eq, PartialEq, Copy, Clone, Deserialize_unit_struct, Serialize_unit_struct)]
pub struct Pending;

impl From<Pending> for Bson {
    fn from(state: Pending) -> Self {
        to_bson(&state).expect("Serialisation is infallible")
    }
}

/// Pending votes carry their ledger submission bookkeeping.
impl VoteState for Pending {
    type Evidence = LedgerAttempts;
}

/// Marker type for votes confirmed on the ledger and entered in the audit log.
#[derive(Debug, Eq, PartialEq, Copy, Clone, Deserialize_unit_struct, Serialize_unit_struct)]
pub struct Finalized;

impl From<Finalized> for Bson {
    fn from(state: Finalized) -> Self {
        to_bson(&state).expect("Serialisation is infallible")
    }
}

/// Finalised votes carry the reference of the ledger transaction that
/// recorded them.
impl VoteState for Finalized {
    type Evidence = LedgerRef;
}

/// Marker type for votes the ledger refused after they were reserved;
/// these need an operator decision, never an automatic retry.
#[derive(Debug, Eq, PartialEq, Copy, Clone, Deserialize_unit_struct, Serialize_unit_struct)]
pub struct NeedsReview;

impl From<NeedsReview> for Bson {
    fn from(state: NeedsReview) -> Self {
        to_bson(&state).expect("Serialisation is infallible")
    }
}

/// Votes under review carry the operator-facing reason.
impl VoteState for NeedsReview {
    type Evidence = ReviewReason;
}

/// Ledger submission bookkeeping for a pending vote. Every failed attempt
/// is recorded here so nothing is silently dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerAttempts {
    /// Number of failed submission attempts so far.
    pub attempts: u32,
    /// The most recent failure, if any.
    pub last_error: Option<String>,
}

impl LedgerAttempts {
    /// Bookkeeping for a vote that has not been submitted yet.
    pub fn none() -> Self {
        Self {
            attempts: 0,
            last_error: None,
        }
    }
}

/// Reference to the finalised ledger transaction that recorded a vote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRef {
    /// Ledger transaction hash.
    pub transaction: String,
    /// When the transaction was confirmed final.
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub finalized_at: DateTime<Utc>,
}

/// Why a reserved vote was handed to an operator instead of retried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewReason {
    /// The ledger's rejection message.
    pub reason: String,
    /// When the vote was flagged.
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub flagged_at: DateTime<Utc>,
}
