use chrono::{DateTime, Utc};
use mongodb::bson::{self, serde_helpers::chrono_datetime_as_bson_datetime, Bson};
use serde::{Deserialize, Serialize};

/// Top-level election metadata. The administrative collaborator owns these
/// records; the core only ever reads them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionMetadata {
    /// Election name.
    pub name: String,
    /// Election state.
    pub state: ElectionState,
    /// Start of the voting window.
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub start_time: DateTime<Utc>,
    /// End of the voting window.
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub end_time: DateTime<Utc>,
}

impl ElectionMetadata {
    /// Is the election accepting votes at the given instant?
    /// True iff it is published and the instant falls within the window.
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        self.state == ElectionState::Published && self.start_time <= now && now < self.end_time
    }
}

/// States in the election lifecycle.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElectionState {
    /// Under construction, not yet accepting votes.
    Draft,
    /// Ready, in progress, or completed.
    Published,
    /// Completed and hidden by default.
    Archived,
}

impl From<ElectionState> for Bson {
    fn from(state: ElectionState) -> Self {
        bson::to_bson(&state).expect("Serialisation is infallible")
    }
}
