use std::ops::{Deref, DerefMut};

use chrono::{DateTime, Utc};
use mongodb::bson::serde_helpers::chrono_datetime_as_bson_datetime;
use serde::{Deserialize, Serialize};

use crate::model::{
    common::vote::{
        Finalized, LedgerAttempts, LedgerRef, NeedsReview, Pending, ReviewReason, VoteState,
    },
    mongodb::Id,
};

/// Core vote data, as stored in the database.
///
/// Exactly one row may exist per (election, voter); the storage layer
/// enforces this with a unique index at insert time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteCore<S: VoteState> {
    /// The election voted in.
    pub election_id: Id,
    /// The voter who cast this vote.
    pub voter_id: Id,
    /// The candidate voted for.
    pub candidate_id: Id,
    /// The candidate's ledger id, captured at reservation time so the vote
    /// can be submitted and audited even if the candidate record changes.
    pub candidate_ledger_id: u64,
    /// When the vote was cast.
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub cast_at: DateTime<Utc>,
    /// Ledger evidence for the current status.
    pub ledger: S::Evidence,
    /// The current ledger status.
    pub status: S,
}

/// A vote from the database, with its unique ID.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vote<S: VoteState> {
    #[serde(rename = "_id")]
    pub id: Id,
    /// Vote contents.
    #[serde(flatten)]
    pub vote: VoteCore<S>,
}

impl Vote<Pending> {
    /// Reserve a new vote. It enters the world pending: recorded off-chain,
    /// not yet confirmed on the ledger.
    pub fn new(election_id: Id, voter_id: Id, candidate_id: Id, candidate_ledger_id: u64) -> Self {
        Self {
            id: Id::new(),
            vote: VoteCore {
                election_id,
                voter_id,
                candidate_id,
                candidate_ledger_id,
                cast_at: Utc::now(),
                ledger: LedgerAttempts::none(),
                status: Pending,
            },
        }
    }

    /// Record a failed ledger submission attempt.
    pub fn record_attempt(&mut self, error: String) {
        self.vote.ledger.attempts += 1;
        self.vote.ledger.last_error = Some(error);
    }

    /// The ledger confirmed this vote; attach the transaction reference.
    pub fn finalize(self, reference: LedgerRef) -> Vote<Finalized> {
        Vote {
            id: self.id,
            vote: VoteCore {
                election_id: self.vote.election_id,
                voter_id: self.vote.voter_id,
                candidate_id: self.vote.candidate_id,
                candidate_ledger_id: self.vote.candidate_ledger_id,
                cast_at: self.vote.cast_at,
                ledger: reference,
                status: Finalized,
            },
        }
    }

    /// The ledger refused this vote after reservation; hand it to an operator.
    pub fn flag(self, reason: ReviewReason) -> Vote<NeedsReview> {
        Vote {
            id: self.id,
            vote: VoteCore {
                election_id: self.vote.election_id,
                voter_id: self.vote.voter_id,
                candidate_id: self.vote.candidate_id,
                candidate_ledger_id: self.vote.candidate_ledger_id,
                cast_at: self.vote.cast_at,
                ledger: reason,
                status: NeedsReview,
            },
        }
    }
}

impl<S: VoteState> Deref for Vote<S> {
    type Target = VoteCore<S>;

    fn deref(&self) -> &Self::Target {
        &self.vote
    }
}

impl<S: VoteState> DerefMut for Vote<S> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.vote
    }
}

/// A vote in any ledger status.
/// With the untagged representation, `Vote<Pending>`, `Vote<Finalized>` and
/// `Vote<NeedsReview>` can all directly deserialize to this type.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum AnyVote {
    Finalized(Vote<Finalized>),
    NeedsReview(Vote<NeedsReview>),
    Pending(Vote<Pending>),
}

impl AnyVote {
    /// The election this vote belongs to.
    pub fn election_id(&self) -> Id {
        match self {
            Self::Pending(vote) => vote.election_id,
            Self::Finalized(vote) => vote.election_id,
            Self::NeedsReview(vote) => vote.election_id,
        }
    }

    /// The voter who cast this vote.
    pub fn voter_id(&self) -> Id {
        match self {
            Self::Pending(vote) => vote.voter_id,
            Self::Finalized(vote) => vote.voter_id,
            Self::NeedsReview(vote) => vote.voter_id,
        }
    }

    /// The candidate voted for.
    pub fn candidate_id(&self) -> Id {
        match self {
            Self::Pending(vote) => vote.candidate_id,
            Self::Finalized(vote) => vote.candidate_id,
            Self::NeedsReview(vote) => vote.candidate_id,
        }
    }

    /// Is this vote still awaiting ledger confirmation?
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }
}
