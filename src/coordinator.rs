//! Orchestration of the vote commit protocol.
//!
//! An accepted vote is first reserved in the off-chain store, then submitted
//! to the ledger, then entered in the audit log and finalised. Rejections
//! leave nothing behind (a terminally rejected reservation is compensated
//! away); a vote that catches the ledger on a bad day stays reserved as
//! pending and the background worker finishes the job. The two systems
//! cannot be written atomically together, so the protocol commits off-chain
//! first and never rolls a reservation back for a transient failure: a
//! second vote must never be possible, while a stale pending record is
//! recoverable.

use std::collections::HashMap;
use std::sync::Arc;

use audit_chain::{merkle_root, EntryHash};
use chrono::Utc;
use mongodb::Database;
use rocket::{
    fairing::{Fairing, Info, Kind},
    Build, Rocket,
};

use crate::error::{Error, Result};
use crate::ledger::{HttpLedgerClient, LedgerClient, LedgerError};
use crate::model::{
    api::{
        audit::{AnchorReport, AuditDump, AuditEntryDesc, AuditReport},
        results::{CandidateTally, ElectionResults},
        vote::{VoteResponse, VoteStatus},
    },
    common::vote::{LedgerRef, Pending},
    db::{audit::NewAuditEntry, election::Election, vote::Vote},
    mongodb::Id,
};
use crate::store::{AuditAppend, MongoVoteStore, Reservation, VoteStore};

/// The coordinator wired up with the production store and ledger client.
pub type AppCoordinator = VoteCoordinator<MongoVoteStore, HttpLedgerClient>;

/// How many entry hashes an audit report samples.
const REPORT_SAMPLES: usize = 8;

/// What happened to a pending vote the reconciler drove forward.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Ledger confirmed; the vote is finalised and audited.
    Finalized,
    /// Another transient failure; the vote stays pending.
    StillPending,
    /// The ledger terminally rejected it; flagged for operator review.
    Flagged,
}

/// Orchestrates the dual write across the off-chain store and the ledger.
pub struct VoteCoordinator<S, L> {
    store: Arc<S>,
    ledger: Arc<L>,
}

impl<S: VoteStore, L: LedgerClient> VoteCoordinator<S, L> {
    pub fn new(store: Arc<S>, ledger: Arc<L>) -> Self {
        Self { store, ledger }
    }

    /// Cast a vote.
    ///
    /// On success the vote is durably recorded off-chain; the response says
    /// whether the ledger has confirmed it yet or confirmation is still
    /// outstanding. Preconditions fail fast with no side effects.
    pub async fn submit_vote(
        &self,
        election_id: Id,
        voter_id: Id,
        candidate_id: Id,
    ) -> Result<VoteResponse> {
        let election = self.require_election(election_id).await?;
        if !election.is_open(Utc::now()) {
            return Err(Error::ElectionNotOpen(format!(
                "election {election_id} is not accepting votes"
            )));
        }
        let candidate = self
            .store
            .candidate(election_id, candidate_id)
            .await?
            .ok_or_else(|| {
                Error::CandidateIneligible(format!(
                    "candidate {candidate_id} does not stand in election {election_id}"
                ))
            })?;
        let candidate_ledger_id = candidate.ledger_id.ok_or_else(|| {
            Error::CandidateIneligible(format!(
                "candidate {candidate_id} is not registered on the ledger"
            ))
        })?;

        // RESERVE: the storage layer's unique index decides double votes.
        let vote = Vote::new(election_id, voter_id, candidate_id, candidate_ledger_id);
        let vote = match self.store.reserve(vote).await? {
            Reservation::Reserved(vote) => vote,
            Reservation::Duplicate => {
                return Err(Error::DuplicateVote(format!(
                    "voter {voter_id} has already voted in election {election_id}"
                )))
            }
        };
        debug!("Reserved vote {} for voter {voter_id} in election {election_id}", vote.id);

        // LEDGER_SUBMIT.
        match self.ledger.cast_vote(candidate_ledger_id, election_id).await {
            Ok(receipt) => {
                let reference = LedgerRef {
                    transaction: receipt.transaction,
                    finalized_at: Utc::now(),
                };
                self.confirm(&vote, reference.clone()).await?;
                info!(
                    "Vote {} committed in ledger transaction {}",
                    vote.id, reference.transaction
                );
                Ok(VoteResponse {
                    status: VoteStatus::Committed,
                    transaction: Some(reference.transaction),
                    cast_at: vote.cast_at,
                })
            }
            Err(LedgerError::Rejected(reason)) => {
                // Terminal rejection: compensate by removing the reservation.
                // No audit entry exists yet, so the log stays consistent.
                self.store.discard_reservation(vote.id).await?;
                Err(Error::LedgerRejected(reason))
            }
            Err(err) => {
                // Transient failure. The vote stays reserved and the
                // reconciliation worker finishes the job; unwinding here
                // would let the voter re-queue while this submission may
                // still land.
                warn!("Ledger submission for vote {} failed, leaving pending: {err}", vote.id);
                self.store.record_attempt(vote.id, &err.to_string()).await?;
                Ok(VoteResponse {
                    status: VoteStatus::Pending,
                    transaction: None,
                    cast_at: vote.cast_at,
                })
            }
        }
    }

    /// Drive one pending vote forward. Called by the reconciliation worker;
    /// idempotent with respect to the vote row's state.
    pub(crate) async fn complete_pending(&self, vote: Vote<Pending>) -> Result<ReconcileOutcome> {
        match self
            .ledger
            .cast_vote(vote.candidate_ledger_id, vote.election_id)
            .await
        {
            Ok(receipt) => {
                let reference = LedgerRef {
                    transaction: receipt.transaction,
                    finalized_at: Utc::now(),
                };
                self.confirm(&vote, reference).await?;
                info!("Reconciled pending vote {}", vote.id);
                Ok(ReconcileOutcome::Finalized)
            }
            Err(LedgerError::Rejected(reason)) => {
                // Too late to compensate: the caller was told the vote was
                // recorded. An operator decides whether to reverse it.
                warn!("Ledger rejected pending vote {}, flagging for review: {reason}", vote.id);
                self.store.flag_for_review(vote.id, &reason).await?;
                Ok(ReconcileOutcome::Flagged)
            }
            Err(err) => {
                self.store.record_attempt(vote.id, &err.to_string()).await?;
                Ok(ReconcileOutcome::StillPending)
            }
        }
    }

    /// The ledger confirmed a vote: append its audit entry and finalise the
    /// row. Appending first means a crash in between is repaired by a
    /// reconciliation retry, whose re-derived entry deduplicates.
    async fn confirm(&self, vote: &Vote<Pending>, reference: LedgerRef) -> Result<()> {
        match self.store.append_audit(NewAuditEntry::for_vote(vote)).await? {
            AuditAppend::Appended(entry) => {
                debug!("Appended audit entry {} for vote {}", entry.sequence, vote.id)
            }
            AuditAppend::AlreadyRecorded => {
                debug!("Audit entry for vote {} already recorded", vote.id)
            }
        }
        if self.store.finalize(vote.id, reference).await?.is_none() {
            debug!("Vote {} already finalised by a concurrent pass", vote.id);
        }
        Ok(())
    }

    /// Register a candidate on the ledger, create-once.
    ///
    /// Idempotent from the caller's perspective: a candidate that already
    /// has a ledger id keeps it, without another ledger call.
    pub async fn register_candidate(&self, election_id: Id, candidate_id: Id) -> Result<u64> {
        self.require_election(election_id).await?;
        let candidate = self
            .store
            .candidate(election_id, candidate_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("Candidate {candidate_id}")))?;
        if let Some(ledger_id) = candidate.ledger_id {
            return Ok(ledger_id);
        }

        let ledger_id = self
            .ledger
            .register_candidate(&candidate.name, election_id)
            .await?;
        if self
            .store
            .assign_ledger_id(election_id, candidate_id, ledger_id)
            .await?
        {
            info!("Registered candidate {candidate_id} on the ledger as {ledger_id}");
            return Ok(ledger_id);
        }

        // Lost a registration race; the first assignment is authoritative.
        warn!("Candidate {candidate_id} was registered concurrently; keeping the stored id");
        let candidate = self
            .store
            .candidate(election_id, candidate_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("Candidate {candidate_id}")))?;
        candidate.ledger_id.ok_or_else(|| {
            Error::BadRequest(format!("candidate {candidate_id} lost its ledger id"))
        })
    }

    /// Per-candidate results from the off-chain store, cross-checked against
    /// the ledger tally when the ledger is reachable.
    pub async fn results(&self, election_id: Id) -> Result<ElectionResults> {
        self.require_election(election_id).await?;
        let candidates = self.store.candidates(election_id).await?;
        let counts: HashMap<Id, u64> = self
            .store
            .tally(election_id)
            .await?
            .into_iter()
            .map(|row| (row.candidate_id, row.votes))
            .collect();

        let ledger_tally: Option<HashMap<u64, u64>> =
            match self.ledger.tally(election_id).await {
                Ok(rows) => Some(rows.into_iter().map(|row| (row.candidate, row.votes)).collect()),
                Err(err) => {
                    warn!("Serving results for {election_id} without ledger tally: {err}");
                    None
                }
            };

        let totals = candidates
            .into_iter()
            .map(|candidate| CandidateTally {
                votes: counts.get(&candidate.id).copied().unwrap_or(0),
                ledger_votes: candidate.ledger_id.and_then(|ledger_id| {
                    ledger_tally
                        .as_ref()
                        .map(|tally| tally.get(&ledger_id).copied().unwrap_or(0))
                }),
                candidate_id: candidate.id,
                name: candidate.name,
                ledger_id: candidate.ledger_id,
            })
            .collect();

        Ok(ElectionResults {
            election_id,
            totals,
            pending_votes: self.store.pending_count(election_id).await?,
        })
    }

    /// The audit report: Merkle root, entry count, sample hashes, and the
    /// comparison against the latest ledger anchor.
    ///
    /// An anchor that the stored log cannot reproduce is an integrity
    /// failure, not a degraded report: someone changed, removed or reordered
    /// entries that were already checkpointed.
    pub async fn audit_report(&self, election_id: Id) -> Result<AuditReport> {
        self.require_election(election_id).await?;
        let hashes = self.entry_hashes(election_id).await?;
        let root_hash = merkle_root(&hashes);

        let anchor = match self.ledger.latest_anchor(election_id).await {
            Ok(anchor) => anchor,
            Err(err) => {
                warn!("Audit report for {election_id} served without anchor check: {err}");
                None
            }
        };
        let anchor = match anchor {
            Some(anchor) if anchor.entries > 0 => {
                let covered = usize::try_from(anchor.entries).ok().filter(|n| *n <= hashes.len());
                match covered.and_then(|n| merkle_root(&hashes[..n])) {
                    Some(prefix_root) if prefix_root == anchor.root => Some(AnchorReport {
                        root_hash: anchor.root,
                        entries: anchor.entries,
                        transaction: anchor.transaction,
                    }),
                    _ => {
                        return Err(Error::IntegrityMismatch(format!(
                            "ledger anchor covers {} entries with root {}, which the stored log does not reproduce",
                            anchor.entries, anchor.root
                        )))
                    }
                }
            }
            _ => None,
        };

        Ok(AuditReport {
            election_id,
            root_hash,
            total_entries: hashes.len() as u64,
            sample_hashes: sample_hashes(&hashes),
            anchor,
        })
    }

    /// Export the full audit log for offline verification.
    pub async fn audit_dump(&self, election_id: Id) -> Result<AuditDump> {
        self.require_election(election_id).await?;
        let entries = self.store.audit_entries(election_id).await?;
        let hashes: Vec<EntryHash> = entries.iter().map(|entry| entry.content_hash).collect();
        Ok(AuditDump {
            election_id: election_id.to_hex(),
            root_hash: merkle_root(&hashes),
            entries: entries.iter().map(AuditEntryDesc::from).collect(),
        })
    }

    async fn require_election(&self, election_id: Id) -> Result<Election> {
        self.store
            .election(election_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("Election {election_id}")))
    }

    async fn entry_hashes(&self, election_id: Id) -> Result<Vec<EntryHash>> {
        Ok(self
            .store
            .audit_entries(election_id)
            .await?
            .iter()
            .map(|entry| entry.content_hash)
            .collect())
    }
}

/// Evenly spaced spot-check hashes, first and last included.
fn sample_hashes(hashes: &[EntryHash]) -> Vec<EntryHash> {
    if hashes.len() <= REPORT_SAMPLES {
        return hashes.to_vec();
    }
    (0..REPORT_SAMPLES)
        .map(|i| hashes[i * (hashes.len() - 1) / (REPORT_SAMPLES - 1)])
        .collect()
}

/// A fairing that assembles the coordinator from the managed database and
/// ledger client and places it into managed state.
pub struct CoordinatorFairing;

#[rocket::async_trait]
impl Fairing for CoordinatorFairing {
    fn info(&self) -> Info {
        Info {
            name: "Vote coordinator",
            kind: Kind::Ignite,
        }
    }

    async fn on_ignite(&self, rocket: Rocket<Build>) -> rocket::fairing::Result {
        let db = match rocket.state::<Database>() {
            Some(db) => db.clone(),
            None => {
                error!("Coordinator fairing requires the database fairing");
                return Err(rocket);
            }
        };
        let ledger = match rocket.state::<Arc<HttpLedgerClient>>() {
            Some(ledger) => ledger.clone(),
            None => {
                error!("Coordinator fairing requires the ledger fairing");
                return Err(rocket);
            }
        };

        // The store is managed separately so the reconciliation worker can
        // scan it directly.
        let store = Arc::new(MongoVoteStore::new(db));
        let coordinator = Arc::new(VoteCoordinator::new(store.clone(), ledger));
        Ok(rocket.manage(store).manage(coordinator))
    }
}

#[cfg(test)]
mod tests {
    use audit_chain::merkle_root;

    use crate::ledger::mock::MockLedger;
    use crate::model::db::candidate::Candidate;
    use crate::store::MemoryVoteStore;

    use super::*;

    type TestCoordinator = VoteCoordinator<MemoryVoteStore, MockLedger>;

    struct Fixture {
        store: Arc<MemoryVoteStore>,
        ledger: Arc<MockLedger>,
        coordinator: TestCoordinator,
        election_id: Id,
        /// Two registered candidates (ledger ids 1 and 2) and one
        /// unregistered candidate.
        candidates: [Candidate; 3],
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryVoteStore::new());
        let ledger = Arc::new(MockLedger::new());

        let election = Election::published_example();
        let election_id = election.id;
        store.insert_election(election);

        let candidates = [
            Candidate::registered_example(election_id, "Ada Lovelace", 1),
            Candidate::registered_example(election_id, "Charles Babbage", 2),
            Candidate::unregistered_example(election_id, "Grace Hopper"),
        ];
        for candidate in &candidates {
            store.insert_candidate(candidate.clone());
        }

        let coordinator = VoteCoordinator::new(store.clone(), ledger.clone());
        Fixture {
            store,
            ledger,
            coordinator,
            election_id,
            candidates,
        }
    }

    #[rocket::async_test]
    async fn committed_vote_is_audited() {
        // This test walks the whole commit protocol, so enable logging.
        log4rs_test_utils::test_logging::init_logging_once_for(["chainvote_backend"], None, None);

        let fix = fixture();
        let voter_id = Id::new();

        let response = fix
            .coordinator
            .submit_vote(fix.election_id, voter_id, fix.candidates[0].id)
            .await
            .unwrap();
        assert_eq!(response.status, VoteStatus::Committed);
        assert!(response.transaction.is_some());

        // The ledger saw exactly one cast for ledger candidate 1.
        assert_eq!(fix.ledger.casts(), vec![(fix.election_id, 1)]);

        // One audit entry, and the root of a single-entry log is that
        // entry's content hash.
        let entries = fix.store.audit_entries(fix.election_id).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].sequence, 0);
        let report = fix.coordinator.audit_report(fix.election_id).await.unwrap();
        assert_eq!(report.total_entries, 1);
        assert_eq!(report.root_hash, Some(entries[0].content_hash));
    }

    #[rocket::async_test]
    async fn second_vote_is_rejected_without_side_effects() {
        let fix = fixture();
        let voter_id = Id::new();

        fix.coordinator
            .submit_vote(fix.election_id, voter_id, fix.candidates[0].id)
            .await
            .unwrap();
        let err = fix
            .coordinator
            .submit_vote(fix.election_id, voter_id, fix.candidates[1].id)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateVote(_)));

        // Still exactly one audit entry and one ledger cast.
        let entries = fix.store.audit_entries(fix.election_id).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(fix.ledger.casts().len(), 1);
    }

    #[rocket::async_test]
    async fn concurrent_votes_have_exactly_one_winner() {
        let fix = fixture();
        let voter_id = Id::new();
        let coordinator = Arc::new(fix.coordinator);

        let mut handles = Vec::new();
        for i in 0..8 {
            let coordinator = coordinator.clone();
            let candidate_id = fix.candidates[i % 2].id;
            let election_id = fix.election_id;
            handles.push(rocket::tokio::spawn(async move {
                coordinator.submit_vote(election_id, voter_id, candidate_id).await
            }));
        }

        let mut committed = 0;
        let mut duplicates = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(response) => {
                    assert_eq!(response.status, VoteStatus::Committed);
                    committed += 1;
                }
                Err(Error::DuplicateVote(_)) => duplicates += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(committed, 1);
        assert_eq!(duplicates, 7);

        // Exactly one row made it into the store.
        let results = coordinator.results(fix.election_id).await.unwrap();
        let total: u64 = results.totals.iter().map(|row| row.votes).sum();
        assert_eq!(total, 1);
    }

    #[rocket::async_test]
    async fn results_and_root_cover_all_votes() {
        let fix = fixture();

        fix.coordinator
            .submit_vote(fix.election_id, Id::new(), fix.candidates[0].id)
            .await
            .unwrap();
        fix.coordinator
            .submit_vote(fix.election_id, Id::new(), fix.candidates[1].id)
            .await
            .unwrap();

        let results = fix.coordinator.results(fix.election_id).await.unwrap();
        assert_eq!(results.pending_votes, 0);
        let row = |id: Id| results.totals.iter().find(|row| row.candidate_id == id).unwrap();
        assert_eq!(row(fix.candidates[0].id).votes, 1);
        assert_eq!(row(fix.candidates[1].id).votes, 1);
        // The ledger agrees.
        assert_eq!(row(fix.candidates[0].id).ledger_votes, Some(1));
        assert_eq!(row(fix.candidates[1].id).ledger_votes, Some(1));
        // The unregistered candidate appears with no votes and no ledger row.
        assert_eq!(row(fix.candidates[2].id).votes, 0);
        assert_eq!(row(fix.candidates[2].id).ledger_votes, None);

        // The root folds the two entry hashes in sequence order.
        let entries = fix.store.audit_entries(fix.election_id).await.unwrap();
        let hashes: Vec<_> = entries.iter().map(|entry| entry.content_hash).collect();
        let report = fix.coordinator.audit_report(fix.election_id).await.unwrap();
        assert_eq!(report.root_hash, merkle_root(&hashes));
        assert_ne!(report.root_hash, Some(hashes[0]));
        assert_ne!(report.root_hash, Some(hashes[1]));
    }

    #[rocket::async_test]
    async fn ledger_outage_leaves_vote_pending_not_failed() {
        let fix = fixture();
        let voter_id = Id::new();
        fix.ledger
            .fail_next_cast(LedgerError::Unavailable("gateway timed out".to_string()));

        let response = fix
            .coordinator
            .submit_vote(fix.election_id, voter_id, fix.candidates[0].id)
            .await
            .unwrap();
        assert_eq!(response.status, VoteStatus::Pending);
        assert_eq!(response.transaction, None);

        // Recorded off-chain with the failure noted; no audit entry yet.
        let pending = fix.store.pending_votes(Utc::now()).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].ledger.attempts, 1);
        assert!(pending[0].ledger.last_error.as_deref().unwrap().contains("timed out"));
        assert!(fix.store.audit_entries(fix.election_id).await.unwrap().is_empty());

        // The voter still cannot vote again while the first is pending.
        let err = fix
            .coordinator
            .submit_vote(fix.election_id, voter_id, fix.candidates[1].id)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateVote(_)));
    }

    #[rocket::async_test]
    async fn completing_a_pending_vote_is_idempotent() {
        let fix = fixture();
        fix.ledger
            .fail_next_cast(LedgerError::Unavailable("gateway timed out".to_string()));
        fix.coordinator
            .submit_vote(fix.election_id, Id::new(), fix.candidates[0].id)
            .await
            .unwrap();

        let pending = fix.store.pending_votes(Utc::now()).await.unwrap();
        let outcome = fix
            .coordinator
            .complete_pending(pending[0].clone())
            .await
            .unwrap();
        assert_eq!(outcome, ReconcileOutcome::Finalized);

        // Driving the same (stale) row again appends nothing.
        fix.coordinator
            .complete_pending(pending[0].clone())
            .await
            .unwrap();
        let entries = fix.store.audit_entries(fix.election_id).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(fix.store.pending_count(fix.election_id).await.unwrap(), 0);
    }

    #[rocket::async_test]
    async fn terminal_rejection_compensates_the_reservation() {
        let fix = fixture();
        let voter_id = Id::new();
        fix.ledger
            .fail_next_cast(LedgerError::Rejected("address already voted".to_string()));

        let err = fix
            .coordinator
            .submit_vote(fix.election_id, voter_id, fix.candidates[0].id)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::LedgerRejected(_)));

        // The reservation is gone and the log untouched, so the voter can
        // try again once the underlying cause is resolved.
        assert!(fix.store.audit_entries(fix.election_id).await.unwrap().is_empty());
        let response = fix
            .coordinator
            .submit_vote(fix.election_id, voter_id, fix.candidates[0].id)
            .await
            .unwrap();
        assert_eq!(response.status, VoteStatus::Committed);
    }

    #[rocket::async_test]
    async fn preconditions_fail_fast() {
        let fix = fixture();

        // Unknown election.
        let err = fix
            .coordinator
            .submit_vote(Id::new(), Id::new(), fix.candidates[0].id)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));

        // Draft election.
        let draft = Election::draft_example();
        let draft_id = draft.id;
        fix.store.insert_election(draft);
        let candidate = Candidate::registered_example(draft_id, "Ada Lovelace", 1);
        let candidate_id = candidate.id;
        fix.store.insert_candidate(candidate);
        let err = fix
            .coordinator
            .submit_vote(draft_id, Id::new(), candidate_id)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ElectionNotOpen(_)));

        // Window closed.
        let closed = Election::closed_example();
        let closed_id = closed.id;
        fix.store.insert_election(closed);
        let candidate = Candidate::registered_example(closed_id, "Ada Lovelace", 1);
        let candidate_id = candidate.id;
        fix.store.insert_candidate(candidate);
        let err = fix
            .coordinator
            .submit_vote(closed_id, Id::new(), candidate_id)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ElectionNotOpen(_)));

        // Candidate from another election.
        let other = Candidate::registered_example(Id::new(), "Alan Turing", 9);
        let other_id = other.id;
        fix.store.insert_candidate(other);
        let err = fix
            .coordinator
            .submit_vote(fix.election_id, Id::new(), other_id)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CandidateIneligible(_)));

        // Candidate without a ledger id.
        let err = fix
            .coordinator
            .submit_vote(fix.election_id, Id::new(), fix.candidates[2].id)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CandidateIneligible(_)));

        // None of the failures wrote anything.
        assert_eq!(fix.ledger.casts().len(), 0);
        assert!(fix.store.pending_votes(Utc::now()).await.unwrap().is_empty());
    }

    #[rocket::async_test]
    async fn candidate_registration_is_create_once() {
        let fix = fixture();
        let unregistered = fix.candidates[2].id;

        let first = fix
            .coordinator
            .register_candidate(fix.election_id, unregistered)
            .await
            .unwrap();
        let second = fix
            .coordinator
            .register_candidate(fix.election_id, unregistered)
            .await
            .unwrap();
        assert_eq!(first, second);
        // The second call never reached the ledger.
        assert_eq!(fix.ledger.registration_count(), 1);

        // The candidate can now receive votes.
        let response = fix
            .coordinator
            .submit_vote(fix.election_id, Id::new(), unregistered)
            .await
            .unwrap();
        assert_eq!(response.status, VoteStatus::Committed);
    }

    #[rocket::async_test]
    async fn failed_registration_assigns_nothing() {
        let fix = fixture();
        let unregistered = fix.candidates[2].id;
        fix.ledger
            .fail_next_registration(LedgerError::Unavailable("gateway timed out".to_string()));

        let err = fix
            .coordinator
            .register_candidate(fix.election_id, unregistered)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::LedgerUnavailable(_)));

        // Still unregistered, so still ineligible to receive votes.
        let err = fix
            .coordinator
            .submit_vote(fix.election_id, Id::new(), unregistered)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::CandidateIneligible(_)));
    }

    #[rocket::async_test]
    async fn matching_anchor_upgrades_the_report() {
        let fix = fixture();
        fix.coordinator
            .submit_vote(fix.election_id, Id::new(), fix.candidates[0].id)
            .await
            .unwrap();
        fix.coordinator
            .submit_vote(fix.election_id, Id::new(), fix.candidates[1].id)
            .await
            .unwrap();

        let entries = fix.store.audit_entries(fix.election_id).await.unwrap();
        let hashes: Vec<_> = entries.iter().map(|entry| entry.content_hash).collect();

        // Anchor covering the first entry only: a valid prefix.
        fix.ledger
            .seed_anchor(fix.election_id, merkle_root(&hashes[..1]).unwrap(), 1);
        let report = fix.coordinator.audit_report(fix.election_id).await.unwrap();
        let anchor = report.anchor.unwrap();
        assert_eq!(anchor.entries, 1);
        assert_eq!(anchor.root_hash, hashes[0]);
    }

    #[rocket::async_test]
    async fn unreproducible_anchor_is_an_integrity_failure() {
        let fix = fixture();
        fix.coordinator
            .submit_vote(fix.election_id, Id::new(), fix.candidates[0].id)
            .await
            .unwrap();

        // An anchor whose root the stored log cannot reproduce.
        let bogus = audit_chain::entry_hash("tampered", "log", 0, "whenever");
        fix.ledger.seed_anchor(fix.election_id, bogus, 1);
        let err = fix.coordinator.audit_report(fix.election_id).await.unwrap_err();
        assert!(matches!(err, Error::IntegrityMismatch(_)));

        // An anchor covering more entries than are stored means entries
        // were deleted since the checkpoint.
        let fix = fixture();
        fix.coordinator
            .submit_vote(fix.election_id, Id::new(), fix.candidates[0].id)
            .await
            .unwrap();
        let entries = fix.store.audit_entries(fix.election_id).await.unwrap();
        fix.ledger
            .seed_anchor(fix.election_id, entries[0].content_hash, 2);
        let err = fix.coordinator.audit_report(fix.election_id).await.unwrap_err();
        assert!(matches!(err, Error::IntegrityMismatch(_)));
    }

    #[rocket::async_test]
    async fn results_survive_a_ledger_outage() {
        let fix = fixture();
        fix.coordinator
            .submit_vote(fix.election_id, Id::new(), fix.candidates[0].id)
            .await
            .unwrap();

        fix.ledger.set_tally_unavailable(true);
        let results = fix.coordinator.results(fix.election_id).await.unwrap();
        let row = results
            .totals
            .iter()
            .find(|row| row.candidate_id == fix.candidates[0].id)
            .unwrap();
        // Off-chain counts stand; the ledger column is simply absent.
        assert_eq!(row.votes, 1);
        assert_eq!(row.ledger_votes, None);
    }

    #[rocket::async_test]
    async fn dump_matches_the_report() {
        let fix = fixture();
        for _ in 0..3 {
            fix.coordinator
                .submit_vote(fix.election_id, Id::new(), fix.candidates[0].id)
                .await
                .unwrap();
        }

        let report = fix.coordinator.audit_report(fix.election_id).await.unwrap();
        let dump = fix.coordinator.audit_dump(fix.election_id).await.unwrap();
        assert_eq!(dump.entries.len(), 3);
        assert_eq!(dump.root_hash, report.root_hash);
        assert_eq!(dump.election_id, fix.election_id.to_hex());
        // Entries come out in sequence order.
        let sequences: Vec<_> = dump.entries.iter().map(|entry| entry.sequence).collect();
        assert_eq!(sequences, vec![0, 1, 2]);
    }

    #[test]
    fn samples_are_bounded_and_span_the_log() {
        let hashes: Vec<_> = (0..100u64)
            .map(|i| audit_chain::entry_hash("v", "e", i, "t"))
            .collect();
        let samples = sample_hashes(&hashes);
        assert_eq!(samples.len(), REPORT_SAMPLES);
        assert_eq!(samples[0], hashes[0]);
        assert_eq!(samples[REPORT_SAMPLES - 1], hashes[99]);

        // Short logs are returned whole.
        assert_eq!(sample_hashes(&hashes[..3]), &hashes[..3]);
        assert!(sample_hashes(&[]).is_empty());
    }
}
