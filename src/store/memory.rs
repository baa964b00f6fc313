use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::model::{
    common::vote::{Finalized, LedgerRef, Pending, ReviewReason},
    db::{
        audit::{AuditEntry, NewAuditEntry},
        candidate::Candidate,
        election::Election,
        vote::{AnyVote, Vote},
    },
    mongodb::Id,
};

use super::{AuditAppend, CandidateCount, Reservation, VoteStore};

/// An in-memory [`VoteStore`].
///
/// Backs unit tests and local development. A single lock around the whole
/// state gives every operation the same atomicity the production store gets
/// from its unique indexes.
#[derive(Default)]
pub struct MemoryVoteStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    elections: HashMap<Id, Election>,
    candidates: HashMap<Id, Candidate>,
    votes: HashMap<Id, AnyVote>,
    audit: Vec<AuditEntry>,
}

impl MemoryVoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an election. Election records are owned by the administrative
    /// collaborator, so there is no trait method for this.
    pub fn insert_election(&self, election: Election) {
        let mut inner = self.inner.lock().expect("poisoned lock");
        inner.elections.insert(election.id, election);
    }

    /// Seed a candidate.
    pub fn insert_candidate(&self, candidate: Candidate) {
        let mut inner = self.inner.lock().expect("poisoned lock");
        inner.candidates.insert(candidate.id, candidate);
    }
}

impl Inner {
    fn has_vote(&self, election_id: Id, voter_id: Id) -> bool {
        self.votes
            .values()
            .any(|vote| vote.election_id() == election_id && vote.voter_id() == voter_id)
    }

    fn has_entry(&self, election_id: Id, voter_id: Id) -> bool {
        self.audit
            .iter()
            .any(|entry| entry.election_id == election_id && entry.voter_id == voter_id)
    }

    fn next_sequence(&self, election_id: Id) -> u64 {
        self.audit
            .iter()
            .filter(|entry| entry.election_id == election_id)
            .map(|entry| entry.sequence + 1)
            .max()
            .unwrap_or(0)
    }

    fn take_pending(&mut self, vote_id: Id) -> Option<Vote<Pending>> {
        match self.votes.get(&vote_id) {
            Some(AnyVote::Pending(_)) => match self.votes.remove(&vote_id) {
                Some(AnyVote::Pending(vote)) => Some(vote),
                _ => unreachable!("checked above"),
            },
            _ => None,
        }
    }
}

#[rocket::async_trait]
impl VoteStore for MemoryVoteStore {
    async fn election(&self, election_id: Id) -> Result<Option<Election>> {
        let inner = self.inner.lock().expect("poisoned lock");
        Ok(inner.elections.get(&election_id).cloned())
    }

    async fn candidate(&self, election_id: Id, candidate_id: Id) -> Result<Option<Candidate>> {
        let inner = self.inner.lock().expect("poisoned lock");
        Ok(inner
            .candidates
            .get(&candidate_id)
            .filter(|candidate| candidate.election_id == election_id)
            .cloned())
    }

    async fn candidates(&self, election_id: Id) -> Result<Vec<Candidate>> {
        let inner = self.inner.lock().expect("poisoned lock");
        let mut candidates: Vec<_> = inner
            .candidates
            .values()
            .filter(|candidate| candidate.election_id == election_id)
            .cloned()
            .collect();
        candidates.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(candidates)
    }

    async fn assign_ledger_id(
        &self,
        election_id: Id,
        candidate_id: Id,
        ledger_id: u64,
    ) -> Result<bool> {
        let mut inner = self.inner.lock().expect("poisoned lock");
        match inner.candidates.get_mut(&candidate_id) {
            Some(candidate)
                if candidate.election_id == election_id && candidate.ledger_id.is_none() =>
            {
                candidate.ledger_id = Some(ledger_id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn reserve(&self, vote: Vote<Pending>) -> Result<Reservation> {
        let mut inner = self.inner.lock().expect("poisoned lock");
        if inner.has_vote(vote.election_id, vote.voter_id) {
            return Ok(Reservation::Duplicate);
        }
        inner.votes.insert(vote.id, AnyVote::Pending(vote.clone()));
        Ok(Reservation::Reserved(vote))
    }

    async fn record_attempt(&self, vote_id: Id, error: &str) -> Result<()> {
        let mut inner = self.inner.lock().expect("poisoned lock");
        if let Some(AnyVote::Pending(vote)) = inner.votes.get_mut(&vote_id) {
            vote.record_attempt(error.to_string());
        }
        Ok(())
    }

    async fn finalize(&self, vote_id: Id, reference: LedgerRef) -> Result<Option<Vote<Finalized>>> {
        let mut inner = self.inner.lock().expect("poisoned lock");
        match inner.take_pending(vote_id) {
            Some(vote) => {
                let finalized = vote.finalize(reference);
                inner
                    .votes
                    .insert(vote_id, AnyVote::Finalized(finalized.clone()));
                Ok(Some(finalized))
            }
            None => Ok(None),
        }
    }

    async fn flag_for_review(&self, vote_id: Id, reason: &str) -> Result<()> {
        let mut inner = self.inner.lock().expect("poisoned lock");
        if let Some(vote) = inner.take_pending(vote_id) {
            let flagged = vote.flag(ReviewReason {
                reason: reason.to_string(),
                flagged_at: Utc::now(),
            });
            inner.votes.insert(vote_id, AnyVote::NeedsReview(flagged));
        }
        Ok(())
    }

    async fn discard_reservation(&self, vote_id: Id) -> Result<bool> {
        let mut inner = self.inner.lock().expect("poisoned lock");
        Ok(inner.take_pending(vote_id).is_some())
    }

    async fn pending_votes(&self, older_than: DateTime<Utc>) -> Result<Vec<Vote<Pending>>> {
        let inner = self.inner.lock().expect("poisoned lock");
        let mut pending: Vec<_> = inner
            .votes
            .values()
            .filter_map(|vote| match vote {
                AnyVote::Pending(vote) if vote.cast_at < older_than => Some(vote.clone()),
                _ => None,
            })
            .collect();
        pending.sort_by_key(|vote| vote.cast_at);
        Ok(pending)
    }

    async fn append_audit(&self, entry: NewAuditEntry) -> Result<AuditAppend> {
        let mut inner = self.inner.lock().expect("poisoned lock");
        if inner.has_entry(entry.election_id, entry.voter_id) {
            return Ok(AuditAppend::AlreadyRecorded);
        }
        let sequence = inner.next_sequence(entry.election_id);
        let entry = AuditEntry::new(sequence, entry);
        inner.audit.push(entry.clone());
        Ok(AuditAppend::Appended(entry))
    }

    async fn audit_entries(&self, election_id: Id) -> Result<Vec<AuditEntry>> {
        let inner = self.inner.lock().expect("poisoned lock");
        let mut entries: Vec<_> = inner
            .audit
            .iter()
            .filter(|entry| entry.election_id == election_id)
            .cloned()
            .collect();
        entries.sort_by_key(|entry| entry.sequence);
        Ok(entries)
    }

    async fn audited_elections(&self) -> Result<Vec<Id>> {
        let inner = self.inner.lock().expect("poisoned lock");
        let mut elections: Vec<Id> = inner.audit.iter().map(|entry| entry.election_id).collect();
        elections.sort();
        elections.dedup();
        Ok(elections)
    }

    async fn tally(&self, election_id: Id) -> Result<Vec<CandidateCount>> {
        let inner = self.inner.lock().expect("poisoned lock");
        let mut counts: HashMap<Id, u64> = HashMap::new();
        for vote in inner.votes.values() {
            if vote.election_id() == election_id {
                *counts.entry(vote.candidate_id()).or_default() += 1;
            }
        }
        Ok(counts
            .into_iter()
            .map(|(candidate_id, votes)| CandidateCount {
                candidate_id,
                votes,
            })
            .collect())
    }

    async fn pending_count(&self, election_id: Id) -> Result<u64> {
        let inner = self.inner.lock().expect("poisoned lock");
        Ok(inner
            .votes
            .values()
            .filter(|vote| vote.election_id() == election_id && vote.is_pending())
            .count() as u64)
    }
}
