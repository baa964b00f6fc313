use std::sync::Arc;

use rocket::{serde::json::Json, Route, State};

use crate::coordinator::AppCoordinator;
use crate::error::Result;
use crate::model::{
    api::vote::{CandidateRegistration, VoteRequest, VoteResponse},
    mongodb::Id,
};

pub fn routes() -> Vec<Route> {
    routes![cast_vote, register_candidate]
}

/// Cast a vote. The caller is a trusted collaborator that has already
/// authenticated the voter and established their entitlement; malformed ids
/// never get past parameter and body parsing.
#[post("/elections/<election_id>/votes", data = "<request>", format = "json")]
async fn cast_vote(
    election_id: Id,
    request: Json<VoteRequest>,
    coordinator: &State<Arc<AppCoordinator>>,
) -> Result<Json<VoteResponse>> {
    let VoteRequest {
        voter_id,
        candidate_id,
    } = request.into_inner();
    let response = coordinator
        .submit_vote(election_id, voter_id, candidate_id)
        .await?;
    Ok(Json(response))
}

/// Assign a candidate their ledger id. Called by the administrative
/// collaborator at candidate-registration time; create-once, so repeated
/// calls return the existing assignment.
#[post("/elections/<election_id>/candidates/<candidate_id>/register")]
async fn register_candidate(
    election_id: Id,
    candidate_id: Id,
    coordinator: &State<Arc<AppCoordinator>>,
) -> Result<Json<CandidateRegistration>> {
    let ledger_id = coordinator
        .register_candidate(election_id, candidate_id)
        .await?;
    Ok(Json(CandidateRegistration {
        candidate_id,
        ledger_id,
    }))
}
