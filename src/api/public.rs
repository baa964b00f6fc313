use std::sync::Arc;

use rocket::{serde::json::Json, Route, State};

use crate::coordinator::AppCoordinator;
use crate::error::Result;
use crate::model::{
    api::{
        audit::{AuditDump, AuditReport},
        results::ElectionResults,
    },
    mongodb::Id,
};

pub fn routes() -> Vec<Route> {
    routes![election_results, audit_report, audit_dump]
}

/// Live per-candidate results.
#[get("/elections/<election_id>/results")]
async fn election_results(
    election_id: Id,
    coordinator: &State<Arc<AppCoordinator>>,
) -> Result<Json<ElectionResults>> {
    Ok(Json(coordinator.results(election_id).await?))
}

/// The audit report: Merkle root, entry count, sample hashes, and the
/// anchor comparison when a ledger checkpoint exists.
#[get("/elections/<election_id>/audit")]
async fn audit_report(
    election_id: Id,
    coordinator: &State<Arc<AppCoordinator>>,
) -> Result<Json<AuditReport>> {
    Ok(Json(coordinator.audit_report(election_id).await?))
}

/// Full audit log export, as consumed by the offline verification tool.
#[get("/elections/<election_id>/audit/dump")]
async fn audit_dump(
    election_id: Id,
    coordinator: &State<Arc<AppCoordinator>>,
) -> Result<Json<AuditDump>> {
    Ok(Json(coordinator.audit_dump(election_id).await?))
}
