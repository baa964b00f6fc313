//! Client abstraction over the external vote ledger.
//!
//! The ledger is a secondary, append-only source of truth. Everything the
//! core needs from it fits behind [`LedgerClient`]; the production
//! implementation speaks JSON to a relayer gateway, and tests script a mock.

mod http;

#[cfg(test)]
pub mod mock;

pub use http::HttpLedgerClient;

use audit_chain::EntryHash;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::mongodb::Id;

pub type LedgerResult<T> = std::result::Result<T, LedgerError>;

/// Ways a ledger operation can fail. The retryable/terminal split drives the
/// whole reconciliation design: retryable failures leave a pending vote for
/// the background worker, terminal rejections never retry.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LedgerError {
    /// The ledger could not be reached or did not answer in time.
    #[error("ledger unavailable: {0}")]
    Unavailable(String),
    /// The ledger answered with something we could not decode.
    #[error("malformed ledger response: {0}")]
    BadResponse(String),
    /// The ledger processed the transaction and refused it.
    #[error("ledger rejected: {0}")]
    Rejected(String),
}

impl LedgerError {
    /// May a later identical submission succeed?
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Rejected(_))
    }
}

impl From<LedgerError> for crate::error::Error {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Rejected(reason) => Self::LedgerRejected(reason),
            other => Self::LedgerUnavailable(other.to_string()),
        }
    }
}

/// Operations the core needs from the ledger.
///
/// All submissions block until the underlying transaction reaches finality
/// or a bounded timeout expires. Reads are always safe to call concurrently;
/// submissions through a shared relayer identity are serialized internally.
#[rocket::async_trait]
pub trait LedgerClient: Send + Sync + 'static {
    /// Register a candidate, returning the ledger id it was assigned.
    /// The underlying call is not idempotent; callers guard it create-once.
    async fn register_candidate(&self, name: &str, election_id: Id) -> LedgerResult<u64>;

    /// Cast a vote for the candidate with the given ledger id.
    async fn cast_vote(&self, candidate: u64, election_id: Id)
        -> LedgerResult<TransactionReceipt>;

    /// Current per-candidate vote counts.
    async fn tally(&self, election_id: Id) -> LedgerResult<Vec<CandidateVotes>>;

    /// Number of candidates registered for the election.
    async fn candidate_count(&self, election_id: Id) -> LedgerResult<u64>;

    /// The candidate at the given registration index.
    async fn candidate(&self, election_id: Id, index: u64) -> LedgerResult<LedgerCandidate>;

    /// Publish a Merkle-root checkpoint over the first `entries` audit
    /// entries of the election.
    async fn anchor_root(
        &self,
        election_id: Id,
        root: EntryHash,
        entries: u64,
    ) -> LedgerResult<TransactionReceipt>;

    /// The most recent checkpoint for the election, if any.
    async fn latest_anchor(&self, election_id: Id) -> LedgerResult<Option<AnchorInfo>>;
}

/// A finalised ledger transaction.
///
/// Receipts are fully typed; anything we might want out of one is either a
/// field here or an event below, and absent events surface as `None` rather
/// than a runtime lookup failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionReceipt {
    /// Transaction hash.
    pub transaction: String,
    /// Final status.
    pub status: TxStatus,
    /// Events emitted by the transaction.
    #[serde(default)]
    pub events: Vec<LedgerEvent>,
    /// Failure reason, when the status is `Failed`.
    #[serde(default)]
    pub reason: Option<String>,
}

impl TransactionReceipt {
    /// The ledger id assigned by a candidate-registered event, if the
    /// transaction emitted one.
    pub fn registered_candidate(&self) -> Option<u64> {
        self.events.iter().find_map(|event| match event {
            LedgerEvent::CandidateRegistered { ledger_id } => Some(*ledger_id),
            _ => None,
        })
    }
}

/// Final status of a ledger transaction.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxStatus {
    /// Irreversibly included.
    Finalized,
    /// Included but reverted; the transaction had no effect.
    Failed,
}

/// Events a ledger transaction can emit. Unrecognised events decode to
/// `Unknown` so a gateway upgrade cannot break receipt parsing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name")]
pub enum LedgerEvent {
    CandidateRegistered { ledger_id: u64 },
    VoteCast { candidate: u64 },
    RootAnchored { entries: u64 },
    #[serde(other)]
    Unknown,
}

/// One row of the ledger's tally.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateVotes {
    pub candidate: u64,
    pub votes: u64,
}

/// A candidate as the ledger knows it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerCandidate {
    pub ledger_id: u64,
    pub name: String,
}

/// A Merkle-root checkpoint previously published to the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnchorInfo {
    /// The anchored root.
    pub root: EntryHash,
    /// How many entries it covers.
    pub entries: u64,
    /// The anchoring transaction, when known.
    #[serde(default)]
    pub transaction: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn receipt_decodes_typed_events() {
        let json = r#"{
            "transaction": "0x5e3a",
            "status": "finalized",
            "events": [
                {"name": "CandidateRegistered", "ledger_id": 4},
                {"name": "GasRefunded", "amount": 12}
            ]
        }"#;
        let receipt: TransactionReceipt = serde_json::from_str(json).unwrap();
        assert_eq!(receipt.status, TxStatus::Finalized);
        assert_eq!(receipt.registered_candidate(), Some(4));
        // The unrecognised event decodes rather than failing the receipt.
        assert_eq!(receipt.events[1], LedgerEvent::Unknown);
    }

    #[test]
    fn receipt_without_events_has_no_registration() {
        let json = r#"{"transaction": "0x01", "status": "failed", "reason": "already voted"}"#;
        let receipt: TransactionReceipt = serde_json::from_str(json).unwrap();
        assert_eq!(receipt.status, TxStatus::Failed);
        assert_eq!(receipt.registered_candidate(), None);
        assert_eq!(receipt.reason.as_deref(), Some("already voted"));
    }

    #[test]
    fn only_rejections_are_terminal() {
        assert!(LedgerError::Unavailable("timeout".into()).is_retryable());
        assert!(LedgerError::BadResponse("truncated".into()).is_retryable());
        assert!(!LedgerError::Rejected("already voted".into()).is_retryable());
    }

    #[rocket::async_test]
    async fn candidates_can_be_enumerated() {
        let ledger = mock::MockLedger::new();
        let election_id = Id::new();
        ledger
            .register_candidate("Ada Lovelace", election_id)
            .await
            .unwrap();
        ledger
            .register_candidate("Charles Babbage", election_id)
            .await
            .unwrap();

        assert_eq!(ledger.candidate_count(election_id).await.unwrap(), 2);
        let second = ledger.candidate(election_id, 1).await.unwrap();
        assert_eq!(second.name, "Charles Babbage");
        // Other elections see nothing.
        assert_eq!(ledger.candidate_count(Id::new()).await.unwrap(), 0);
    }
}
