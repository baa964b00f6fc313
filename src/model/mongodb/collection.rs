use std::ops::Deref;

use mongodb::{
    bson::doc, error::Error as DbError, options::IndexOptions, Collection, Database, IndexModel,
};
use rocket::{
    request::{self, FromRequest, Request},
    State,
};

use crate::model::{
    common::vote::VoteState,
    db::{
        audit::AuditEntry,
        candidate::Candidate,
        election::Election,
        vote::{AnyVote, Vote, VoteCore},
    },
};

/// A type that can be directly inserted/read to/from the database.
pub trait MongoCollection {
    /// The name of the collection.
    const NAME: &'static str;
}

/// A database collection of the given type.
pub struct Coll<T>(Collection<T>);

impl<T> Coll<T>
where
    T: MongoCollection,
{
    /// Get a handle on this collection in the given database.
    pub fn from_db(db: &Database) -> Self {
        Self(db.collection(T::NAME))
    }
}

// `derive(Clone)` would only derive if `T: Clone`, but we don't need that bound.
impl<T> Clone for Coll<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T> Deref for Coll<T> {
    type Target = Collection<T>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[rocket::async_trait]
impl<'r, T> FromRequest<'r> for Coll<T>
where
    T: MongoCollection,
{
    type Error = ();

    /// Get the database connection from the managed state and wrap it in a collection.
    ///
    /// Panics iff the [`Database`] is not managed by [`rocket::Rocket`].
    async fn from_request(req: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        let db = req.guard::<&State<Database>>().await.unwrap();
        request::Outcome::Success(Coll::from_db(db))
    }
}

// Election collection.
const ELECTIONS: &str = "elections";
impl MongoCollection for Election {
    const NAME: &'static str = ELECTIONS;
}

// Candidate collection.
const CANDIDATES: &str = "candidates";
impl MongoCollection for Candidate {
    const NAME: &'static str = CANDIDATES;
}

// Vote collections.
const VOTES: &str = "votes";
impl<S: VoteState> MongoCollection for VoteCore<S> {
    const NAME: &'static str = VOTES;
}
impl<S: VoteState> MongoCollection for Vote<S> {
    const NAME: &'static str = VOTES;
}
impl MongoCollection for AnyVote {
    const NAME: &'static str = VOTES;
}

// Audit entry collection.
const AUDIT_ENTRIES: &str = "audit_entries";
impl MongoCollection for AuditEntry {
    const NAME: &'static str = AUDIT_ENTRIES;
}

/// Index enforcing the double-vote guard: at most one vote row per
/// (election, voter), decided atomically at insert time.
pub const ONE_VOTE_PER_VOTER: &str = "one_vote_per_voter";

/// Index enforcing contiguous per-election audit sequence numbers.
pub const AUDIT_SEQUENCE: &str = "audit_sequence";

/// Index making audit appends idempotent per vote: one vote per voter per
/// election means one audit entry per (election, voter).
pub const ONE_ENTRY_PER_VOTER: &str = "one_entry_per_voter";

/// Index guarding create-once candidate records per election.
pub const ONE_CANDIDATE_PER_NAME: &str = "one_candidate_per_name";

/// Ensure that all the required indexes exist on the given database.
///
/// This operation is idempotent.
pub async fn ensure_indexes_exist(db: &Database) -> Result<(), DbError> {
    debug!("Ensuring collection indexes exist");

    let unique = |name: &str| {
        IndexOptions::builder()
            .unique(true)
            .name(name.to_string())
            .build()
    };

    // Vote collection: the sole concurrency-control primitive for the
    // double-vote guard.
    let vote_index = IndexModel::builder()
        .keys(doc! {"election_id": 1, "voter_id": 1})
        .options(unique(ONE_VOTE_PER_VOTER))
        .build();
    Coll::<AnyVote>::from_db(db)
        .create_index(vote_index, None)
        .await?;

    // Audit entry collection: sequence numbers are assigned under the same
    // atomic insert that appends the entry, and appends deduplicate per voter.
    let sequence_index = IndexModel::builder()
        .keys(doc! {"election_id": 1, "sequence": 1})
        .options(unique(AUDIT_SEQUENCE))
        .build();
    let entry_voter_index = IndexModel::builder()
        .keys(doc! {"election_id": 1, "voter_id": 1})
        .options(unique(ONE_ENTRY_PER_VOTER))
        .build();
    let audit_entries = Coll::<AuditEntry>::from_db(db);
    audit_entries.create_index(sequence_index, None).await?;
    audit_entries.create_index(entry_voter_index, None).await?;

    // Candidate collection.
    let candidate_index = IndexModel::builder()
        .keys(doc! {"election_id": 1, "name": 1})
        .options(unique(ONE_CANDIDATE_PER_NAME))
        .build();
    Coll::<Candidate>::from_db(db)
        .create_index(candidate_index, None)
        .await?;

    Ok(())
}
