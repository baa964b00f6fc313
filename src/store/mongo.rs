use chrono::{DateTime, Utc};
use mongodb::{
    bson::{doc, to_bson, Bson, DateTime as BsonDateTime},
    error::{Error as DbError, ErrorKind, WriteFailure},
    options::{FindOneAndUpdateOptions, FindOneOptions, FindOptions, ReturnDocument},
    Database,
};
use rocket::futures::TryStreamExt;
use serde::Deserialize;

use crate::error::Result;
use crate::model::{
    common::vote::{Finalized, LedgerRef, NeedsReview, Pending, ReviewReason},
    db::{
        audit::{AuditEntry, NewAuditEntry},
        candidate::Candidate,
        election::Election,
        vote::{AnyVote, Vote},
    },
    mongodb::{Coll, Id, AUDIT_SEQUENCE, ONE_ENTRY_PER_VOTER},
};

use super::{AuditAppend, CandidateCount, Reservation, VoteStore};

/// The production [`VoteStore`], backed by MongoDB.
///
/// All race-deciding writes lean on the unique indexes created by
/// `ensure_indexes_exist`; nothing here ever reads before writing to decide
/// a race.
pub struct MongoVoteStore {
    db: Database,
}

impl MongoVoteStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

/// Did this write fail against the named unique index?
fn duplicate_of(err: &DbError, index: &str) -> bool {
    match &*err.kind {
        ErrorKind::Write(WriteFailure::WriteError(write_error)) => {
            write_error.code == 11000 && write_error.message.contains(index)
        }
        _ => false,
    }
}

/// Was this write rejected by any unique index?
fn is_duplicate_key(err: &DbError) -> bool {
    matches!(
        &*err.kind,
        ErrorKind::Write(WriteFailure::WriteError(write_error)) if write_error.code == 11000
    )
}

#[rocket::async_trait]
impl VoteStore for MongoVoteStore {
    async fn election(&self, election_id: Id) -> Result<Option<Election>> {
        Ok(Coll::<Election>::from_db(&self.db)
            .find_one(election_id.as_doc(), None)
            .await?)
    }

    async fn candidate(&self, election_id: Id, candidate_id: Id) -> Result<Option<Candidate>> {
        let filter = doc! {
            "_id": candidate_id,
            "election_id": election_id,
        };
        Ok(Coll::<Candidate>::from_db(&self.db)
            .find_one(filter, None)
            .await?)
    }

    async fn candidates(&self, election_id: Id) -> Result<Vec<Candidate>> {
        let options = FindOptions::builder().sort(doc! {"name": 1}).build();
        Ok(Coll::<Candidate>::from_db(&self.db)
            .find(doc! {"election_id": election_id}, options)
            .await?
            .try_collect()
            .await?)
    }

    async fn assign_ledger_id(
        &self,
        election_id: Id,
        candidate_id: Id,
        ledger_id: u64,
    ) -> Result<bool> {
        // Create-once: the filter only matches while no ledger id is set, so
        // concurrent assignments have exactly one winner.
        let filter = doc! {
            "_id": candidate_id,
            "election_id": election_id,
            "ledger_id": Bson::Null,
        };
        let update = doc! {
            "$set": { "ledger_id": ledger_id as i64 }
        };
        let updated = Coll::<Candidate>::from_db(&self.db)
            .find_one_and_update(filter, update, None)
            .await?;
        Ok(updated.is_some())
    }

    async fn reserve(&self, vote: Vote<Pending>) -> Result<Reservation> {
        match Coll::<Vote<Pending>>::from_db(&self.db)
            .insert_one(&vote, None)
            .await
        {
            Ok(_) => Ok(Reservation::Reserved(vote)),
            Err(err) if is_duplicate_key(&err) => Ok(Reservation::Duplicate),
            Err(err) => Err(err.into()),
        }
    }

    async fn record_attempt(&self, vote_id: Id, error: &str) -> Result<()> {
        let filter = doc! {
            "_id": vote_id,
            "status": Pending,
        };
        let update = doc! {
            "$inc": { "ledger.attempts": 1 },
            "$set": { "ledger.last_error": error },
        };
        Coll::<Vote<Pending>>::from_db(&self.db)
            .update_one(filter, update, None)
            .await?;
        Ok(())
    }

    async fn finalize(&self, vote_id: Id, reference: LedgerRef) -> Result<Option<Vote<Finalized>>> {
        // Filtering on the pending status makes the transition single-shot
        // under concurrent reconciliation passes.
        let filter = doc! {
            "_id": vote_id,
            "status": Pending,
        };
        let update = doc! {
            "$set": {
                "status": Finalized,
                "ledger": to_bson(&reference).expect("Serialisation is infallible"),
            }
        };
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();
        Ok(Coll::<Vote<Finalized>>::from_db(&self.db)
            .find_one_and_update(filter, update, options)
            .await?)
    }

    async fn flag_for_review(&self, vote_id: Id, reason: &str) -> Result<()> {
        let review = ReviewReason {
            reason: reason.to_string(),
            flagged_at: Utc::now(),
        };
        let filter = doc! {
            "_id": vote_id,
            "status": Pending,
        };
        let update = doc! {
            "$set": {
                "status": NeedsReview,
                "ledger": to_bson(&review).expect("Serialisation is infallible"),
            }
        };
        Coll::<Vote<Pending>>::from_db(&self.db)
            .update_one(filter, update, None)
            .await?;
        Ok(())
    }

    async fn discard_reservation(&self, vote_id: Id) -> Result<bool> {
        let filter = doc! {
            "_id": vote_id,
            "status": Pending,
        };
        let result = Coll::<Vote<Pending>>::from_db(&self.db)
            .delete_one(filter, None)
            .await?;
        Ok(result.deleted_count == 1)
    }

    async fn pending_votes(&self, older_than: DateTime<Utc>) -> Result<Vec<Vote<Pending>>> {
        let filter = doc! {
            "status": Pending,
            "cast_at": { "$lt": BsonDateTime::from_chrono(older_than) },
        };
        let options = FindOptions::builder().sort(doc! {"cast_at": 1}).build();
        Ok(Coll::<Vote<Pending>>::from_db(&self.db)
            .find(filter, options)
            .await?
            .try_collect()
            .await?)
    }

    async fn append_audit(&self, entry: NewAuditEntry) -> Result<AuditAppend> {
        let entries = Coll::<AuditEntry>::from_db(&self.db);
        loop {
            // Read the current tail, then let the unique sequence index
            // decide the race: the insert either lands at this position or
            // collides and we re-read. A sequence number is never skipped.
            let options = FindOneOptions::builder().sort(doc! {"sequence": -1}).build();
            let sequence = entries
                .find_one(doc! {"election_id": entry.election_id}, options)
                .await?
                .map(|last| last.sequence + 1)
                .unwrap_or(0);

            let appended = AuditEntry::new(sequence, entry.clone());
            match entries.insert_one(&appended, None).await {
                Ok(_) => return Ok(AuditAppend::Appended(appended)),
                Err(err) if duplicate_of(&err, ONE_ENTRY_PER_VOTER) => {
                    return Ok(AuditAppend::AlreadyRecorded)
                }
                Err(err) if duplicate_of(&err, AUDIT_SEQUENCE) => continue,
                Err(err) => return Err(err.into()),
            }
        }
    }

    async fn audit_entries(&self, election_id: Id) -> Result<Vec<AuditEntry>> {
        let options = FindOptions::builder().sort(doc! {"sequence": 1}).build();
        Ok(Coll::<AuditEntry>::from_db(&self.db)
            .find(doc! {"election_id": election_id}, options)
            .await?
            .try_collect()
            .await?)
    }

    async fn audited_elections(&self) -> Result<Vec<Id>> {
        let values = Coll::<AuditEntry>::from_db(&self.db)
            .distinct("election_id", None, None)
            .await?;
        Ok(values
            .into_iter()
            .filter_map(|value| match value {
                Bson::ObjectId(id) => Some(id.into()),
                _ => None,
            })
            .collect())
    }

    async fn tally(&self, election_id: Id) -> Result<Vec<CandidateCount>> {
        #[derive(Debug, Deserialize)]
        struct TallyRow {
            #[serde(rename = "_id")]
            candidate_id: Id,
            votes: i64,
        }

        let pipeline = vec![
            doc! { "$match": { "election_id": election_id } },
            doc! { "$group": { "_id": "$candidate_id", "votes": { "$sum": 1 } } },
        ];
        let mut cursor = Coll::<AnyVote>::from_db(&self.db)
            .aggregate(pipeline, None)
            .await?;

        let mut counts = Vec::new();
        while let Some(document) = cursor.try_next().await? {
            let row: TallyRow =
                mongodb::bson::from_document(document).map_err(DbError::from)?;
            counts.push(CandidateCount {
                candidate_id: row.candidate_id,
                votes: row.votes as u64,
            });
        }
        Ok(counts)
    }

    async fn pending_count(&self, election_id: Id) -> Result<u64> {
        let filter = doc! {
            "election_id": election_id,
            "status": Pending,
        };
        Ok(Coll::<Vote<Pending>>::from_db(&self.db)
            .count_documents(filter, None)
            .await?)
    }
}
