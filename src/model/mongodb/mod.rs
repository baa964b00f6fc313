mod bson;
mod collection;

pub use bson::Id;
pub use collection::{
    ensure_indexes_exist, Coll, MongoCollection, AUDIT_SEQUENCE, ONE_CANDIDATE_PER_NAME,
    ONE_ENTRY_PER_VOTER, ONE_VOTE_PER_VOTER,
};
