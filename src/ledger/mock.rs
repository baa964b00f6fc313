//! A scriptable in-memory ledger for tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use audit_chain::EntryHash;

use crate::model::mongodb::Id;

use super::{
    AnchorInfo, CandidateVotes, LedgerCandidate, LedgerClient, LedgerError, LedgerEvent,
    LedgerResult, TransactionReceipt, TxStatus,
};

/// A fake ledger that records everything submitted to it and can be told to
/// fail upcoming operations.
#[derive(Default)]
pub struct MockLedger {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    next_ledger_id: u64,
    next_transaction: u64,
    registrations: Vec<(Id, String, u64)>,
    casts: Vec<(Id, u64)>,
    anchors: Vec<(Id, EntryHash, u64)>,
    cast_failures: VecDeque<LedgerError>,
    register_failures: VecDeque<LedgerError>,
    tally_unavailable: bool,
    anchors_unavailable: bool,
}

impl MockLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a failure for the next vote cast.
    pub fn fail_next_cast(&self, error: LedgerError) {
        self.inner.lock().unwrap().cast_failures.push_back(error);
    }

    /// Queue a failure for the next candidate registration.
    pub fn fail_next_registration(&self, error: LedgerError) {
        self.inner.lock().unwrap().register_failures.push_back(error);
    }

    /// Make tally reads fail until further notice.
    pub fn set_tally_unavailable(&self, unavailable: bool) {
        self.inner.lock().unwrap().tally_unavailable = unavailable;
    }

    /// Make anchor reads and writes fail until further notice.
    pub fn set_anchors_unavailable(&self, unavailable: bool) {
        self.inner.lock().unwrap().anchors_unavailable = unavailable;
    }

    /// Pretend an anchor was published out of band.
    pub fn seed_anchor(&self, election_id: Id, root: EntryHash, entries: u64) {
        self.inner
            .lock()
            .unwrap()
            .anchors
            .push((election_id, root, entries));
    }

    /// Every vote cast so far, in submission order.
    pub fn casts(&self) -> Vec<(Id, u64)> {
        self.inner.lock().unwrap().casts.clone()
    }

    /// Every anchor published so far, in submission order.
    pub fn anchors(&self) -> Vec<(Id, EntryHash, u64)> {
        self.inner.lock().unwrap().anchors.clone()
    }

    /// How many candidate registrations the ledger has seen.
    pub fn registration_count(&self) -> usize {
        self.inner.lock().unwrap().registrations.len()
    }
}

fn receipt(transaction: u64, events: Vec<LedgerEvent>) -> TransactionReceipt {
    TransactionReceipt {
        transaction: format!("0x{transaction:016x}"),
        status: TxStatus::Finalized,
        events,
        reason: None,
    }
}

#[rocket::async_trait]
impl LedgerClient for MockLedger {
    async fn register_candidate(&self, name: &str, election_id: Id) -> LedgerResult<u64> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(error) = inner.register_failures.pop_front() {
            return Err(error);
        }
        inner.next_ledger_id += 1;
        let ledger_id = inner.next_ledger_id;
        inner
            .registrations
            .push((election_id, name.to_string(), ledger_id));
        Ok(ledger_id)
    }

    async fn cast_vote(
        &self,
        candidate: u64,
        election_id: Id,
    ) -> LedgerResult<TransactionReceipt> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(error) = inner.cast_failures.pop_front() {
            return Err(error);
        }
        inner.next_transaction += 1;
        inner.casts.push((election_id, candidate));
        Ok(receipt(
            inner.next_transaction,
            vec![LedgerEvent::VoteCast { candidate }],
        ))
    }

    async fn tally(&self, election_id: Id) -> LedgerResult<Vec<CandidateVotes>> {
        let inner = self.inner.lock().unwrap();
        if inner.tally_unavailable {
            return Err(LedgerError::Unavailable("tally offline".to_string()));
        }
        let mut counts: Vec<CandidateVotes> = Vec::new();
        for (election, candidate) in &inner.casts {
            if *election != election_id {
                continue;
            }
            match counts.iter_mut().find(|row| row.candidate == *candidate) {
                Some(row) => row.votes += 1,
                None => counts.push(CandidateVotes {
                    candidate: *candidate,
                    votes: 1,
                }),
            }
        }
        Ok(counts)
    }

    async fn candidate_count(&self, election_id: Id) -> LedgerResult<u64> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .registrations
            .iter()
            .filter(|(election, _, _)| *election == election_id)
            .count() as u64)
    }

    async fn candidate(&self, election_id: Id, index: u64) -> LedgerResult<LedgerCandidate> {
        let inner = self.inner.lock().unwrap();
        inner
            .registrations
            .iter()
            .filter(|(election, _, _)| *election == election_id)
            .nth(index as usize)
            .map(|(_, name, ledger_id)| LedgerCandidate {
                ledger_id: *ledger_id,
                name: name.clone(),
            })
            .ok_or_else(|| LedgerError::Rejected(format!("no candidate at index {index}")))
    }

    async fn anchor_root(
        &self,
        election_id: Id,
        root: EntryHash,
        entries: u64,
    ) -> LedgerResult<TransactionReceipt> {
        let mut inner = self.inner.lock().unwrap();
        if inner.anchors_unavailable {
            return Err(LedgerError::Unavailable("anchors offline".to_string()));
        }
        inner.next_transaction += 1;
        inner.anchors.push((election_id, root, entries));
        Ok(receipt(
            inner.next_transaction,
            vec![LedgerEvent::RootAnchored { entries }],
        ))
    }

    async fn latest_anchor(&self, election_id: Id) -> LedgerResult<Option<AnchorInfo>> {
        let inner = self.inner.lock().unwrap();
        if inner.anchors_unavailable {
            return Err(LedgerError::Unavailable("anchors offline".to_string()));
        }
        Ok(inner
            .anchors
            .iter()
            .rev()
            .find(|(election, _, _)| *election == election_id)
            .map(|(_, root, entries)| AnchorInfo {
                root: *root,
                entries: *entries,
                transaction: None,
            }))
    }
}
