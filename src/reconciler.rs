//! Background reconciliation of votes stuck between the off-chain store and
//! the ledger.
//!
//! The worker scans pending votes past a grace period on a fixed interval
//! and drives each to finalised or needs-review. It is safe to run
//! concurrently with live submissions and safe to re-run after a crash:
//! every transition it makes is single-shot in the storage layer. It also
//! publishes periodic Merkle-root checkpoints to the ledger so the audit
//! log becomes tamper-evident, not just self-consistent.

use std::fmt::{self, Display, Formatter};
use std::sync::Arc;
use std::time::Duration;

use audit_chain::merkle_root;
use chrono::Utc;
use rocket::{
    fairing::{Fairing, Info, Kind},
    tokio::{
        self,
        time::{interval, MissedTickBehavior},
    },
    Orbit, Rocket, Shutdown,
};

use crate::config::Config;
use crate::coordinator::{AppCoordinator, ReconcileOutcome, VoteCoordinator};
use crate::error::Result;
use crate::ledger::{HttpLedgerClient, LedgerClient};
use crate::model::mongodb::Id;
use crate::store::{MongoVoteStore, VoteStore};

/// The reconciliation worker.
pub struct Reconciler<S, L> {
    store: Arc<S>,
    ledger: Arc<L>,
    coordinator: Arc<VoteCoordinator<S, L>>,
    run_interval: Duration,
    grace: chrono::Duration,
    escalate_after: chrono::Duration,
    anchor_batch: u64,
}

/// What one reconciliation pass did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PassStats {
    pub scanned: u64,
    pub finalized: u64,
    pub still_pending: u64,
    pub flagged: u64,
    pub anchored: u64,
}

impl PassStats {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl Display for PassStats {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} scanned, {} finalized, {} still pending, {} flagged, {} roots anchored",
            self.scanned, self.finalized, self.still_pending, self.flagged, self.anchored
        )
    }
}

impl<S: VoteStore, L: LedgerClient> Reconciler<S, L> {
    pub fn new(
        store: Arc<S>,
        ledger: Arc<L>,
        coordinator: Arc<VoteCoordinator<S, L>>,
        run_interval: Duration,
        grace: chrono::Duration,
        escalate_after: chrono::Duration,
        anchor_batch: u64,
    ) -> Self {
        Self {
            store,
            ledger,
            coordinator,
            run_interval,
            grace,
            escalate_after,
            anchor_batch,
        }
    }

    /// One reconciliation pass over every pending vote past the grace
    /// period, followed by anchor checkpointing.
    pub async fn pass(&self) -> Result<PassStats> {
        let mut stats = PassStats::default();
        let now = Utc::now();

        for vote in self.store.pending_votes(now - self.grace).await? {
            stats.scanned += 1;
            let (vote_id, cast_at) = (vote.id, vote.cast_at);
            match self.coordinator.complete_pending(vote).await? {
                ReconcileOutcome::Finalized => stats.finalized += 1,
                ReconcileOutcome::Flagged => stats.flagged += 1,
                ReconcileOutcome::StillPending => {
                    stats.still_pending += 1;
                    if now - cast_at > self.escalate_after {
                        error!(
                            "Vote {vote_id} has been pending since {cast_at}; \
                             retries exhausted past the alert window, operator attention required"
                        );
                    }
                }
            }
        }

        for election_id in self.store.audited_elections().await? {
            match self.maybe_anchor(election_id).await {
                Ok(true) => stats.anchored += 1,
                Ok(false) => {}
                Err(err) => warn!("Skipping anchor checkpoint for {election_id}: {err}"),
            }
        }

        Ok(stats)
    }

    /// Publish a checkpoint if the election's audit log has grown by at
    /// least a batch since the last one. Ledger trouble is never fatal
    /// here; the next pass tries again.
    async fn maybe_anchor(&self, election_id: Id) -> Result<bool> {
        let entries = self.store.audit_entries(election_id).await?;
        let total = entries.len() as u64;

        let anchored = match self.ledger.latest_anchor(election_id).await {
            Ok(anchor) => anchor.map(|anchor| anchor.entries).unwrap_or(0),
            Err(err) => {
                warn!("Cannot read the latest anchor for {election_id}: {err}");
                return Ok(false);
            }
        };
        if total < anchored + self.anchor_batch {
            return Ok(false);
        }

        let hashes: Vec<_> = entries.iter().map(|entry| entry.content_hash).collect();
        let root = match merkle_root(&hashes) {
            Some(root) => root,
            None => return Ok(false),
        };
        match self.ledger.anchor_root(election_id, root, total).await {
            Ok(receipt) => {
                info!(
                    "Anchored audit root for {election_id} at {total} entries \
                     in transaction {}",
                    receipt.transaction
                );
                Ok(true)
            }
            Err(err) => {
                warn!("Failed to anchor audit root for {election_id}: {err}");
                Ok(false)
            }
        }
    }

    /// Run passes on the configured interval until shutdown.
    pub async fn run(self, shutdown: Shutdown) {
        info!(
            "Reconciliation worker running every {:?} (grace {})",
            self.run_interval, self.grace
        );
        let mut ticker = interval(self.run_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Reconciliation worker stopping");
                    break;
                }
                _ = ticker.tick() => match self.pass().await {
                    Ok(stats) if stats.is_empty() => {
                        debug!("Reconciliation pass found nothing to do")
                    }
                    Ok(stats) => info!("Reconciliation pass: {stats}"),
                    Err(err) => error!("Reconciliation pass failed: {err}"),
                },
            }
        }
    }
}

/// A fairing that spawns the reconciliation worker at liftoff, wired to
/// stop on server shutdown.
pub struct ReconcilerFairing;

#[rocket::async_trait]
impl Fairing for ReconcilerFairing {
    fn info(&self) -> Info {
        Info {
            name: "Reconciliation worker",
            kind: Kind::Liftoff,
        }
    }

    async fn on_liftoff(&self, rocket: &Rocket<Orbit>) {
        let config = rocket.state::<Config>();
        let store = rocket.state::<Arc<MongoVoteStore>>();
        let ledger = rocket.state::<Arc<HttpLedgerClient>>();
        let coordinator = rocket.state::<Arc<AppCoordinator>>();
        let (config, store, ledger, coordinator) = match (config, store, ledger, coordinator) {
            (Some(config), Some(store), Some(ledger), Some(coordinator)) => {
                (config, store, ledger, coordinator)
            }
            _ => {
                // The ignite fairings either ran or aborted the launch.
                error!("Reconciliation worker missing managed state; not starting");
                return;
            }
        };

        let reconciler = Reconciler::new(
            store.clone(),
            ledger.clone(),
            coordinator.clone(),
            config.reconcile_interval(),
            config.reconcile_grace(),
            config.reconcile_escalate(),
            config.anchor_batch(),
        );
        tokio::spawn(reconciler.run(rocket.shutdown()));
    }
}
