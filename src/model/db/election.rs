use std::ops::Deref;

use serde::{Deserialize, Serialize};

use crate::model::{common::election::ElectionMetadata, mongodb::Id};

/// An election from the database, with its unique ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Election {
    #[serde(rename = "_id")]
    pub id: Id,
    #[serde(flatten)]
    pub metadata: ElectionMetadata,
}

impl Deref for Election {
    type Target = ElectionMetadata;

    fn deref(&self) -> &Self::Target {
        &self.metadata
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use crate::model::common::election::ElectionState;

    use super::*;

    impl Election {
        /// An election currently accepting votes.
        pub fn published_example() -> Self {
            let now = Utc::now();
            Self {
                id: Id::new(),
                metadata: ElectionMetadata {
                    name: "Student Union President".to_string(),
                    state: ElectionState::Published,
                    start_time: now - Duration::hours(1),
                    end_time: now + Duration::hours(1),
                },
            }
        }

        /// An election still in draft.
        pub fn draft_example() -> Self {
            let mut example = Self::published_example();
            example.metadata.state = ElectionState::Draft;
            example
        }

        /// A published election whose window has already closed.
        pub fn closed_example() -> Self {
            let mut example = Self::published_example();
            example.metadata.start_time = example.metadata.start_time - Duration::days(10);
            example.metadata.end_time = example.metadata.end_time - Duration::days(10);
            example
        }
    }
}
