use rocket::{http::Status, response::Responder};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Db(#[from] mongodb::error::Error),
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Election not open for voting: {0}")]
    ElectionNotOpen(String),
    #[error("Candidate not eligible to receive votes: {0}")]
    CandidateIneligible(String),
    #[error("Voter has already cast a vote: {0}")]
    DuplicateVote(String),
    #[error("Ledger rejected the transaction: {0}")]
    LedgerRejected(String),
    #[error("Ledger unavailable: {0}")]
    LedgerUnavailable(String),
    #[error("Audit log does not match its ledger anchor: {0}")]
    IntegrityMismatch(String),
}

impl Error {
    pub fn not_found(what: impl std::fmt::Display) -> Self {
        Self::NotFound(format!("{} not found", what))
    }
}

impl<'r, 'o: 'r> Responder<'r, 'o> for Error {
    fn respond_to(self, _: &'r rocket::Request<'_>) -> rocket::response::Result<'o> {
        match &self {
            Self::Db(_) | Self::IntegrityMismatch(_) => error!("{self}"),
            _ => warn!("{self}"),
        }
        Err(match self {
            Self::Db(_) | Self::IntegrityMismatch(_) => Status::InternalServerError,
            Self::BadRequest(_) => Status::BadRequest,
            Self::NotFound(_) => Status::NotFound,
            Self::ElectionNotOpen(_) => Status::Forbidden,
            Self::CandidateIneligible(_) | Self::LedgerRejected(_) => Status::UnprocessableEntity,
            Self::DuplicateVote(_) => Status::Conflict,
            Self::LedgerUnavailable(_) => Status::ServiceUnavailable,
        })
    }
}
