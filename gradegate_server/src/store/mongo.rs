//! MongoDB-backed repositories. One collection per record kind; rows carry
//! an application-assigned `id` (ObjectId hex) so the store stays swappable.
//!
//! Result lists are sorted in-process after retrieval: exam-sized
//! collections are small and timestamps round-trip as RFC 3339 strings.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::TryStreamExt;
use mongodb::bson::oid::ObjectId;
use mongodb::bson::{doc, to_bson};
use mongodb::options::{ClientOptions, ReplaceOptions, ResolverConfig};
use mongodb::{Client, Collection, Database};

use crate::error::{AppError, AppResult};
use crate::models::{
    ActionLogRecord, AlertLogRecord, AlertType, ScoreboardRecord, StudentNetworkRecord,
    ViolationLogRecord, ViolationType,
};

use super::{ActionLogRepo, AlertLogRepo, ScoreboardRepo, StudentNetworkRepo, ViolationLogRepo};

const SCOREBOARD_COLLECTION: &str = "scoreboards";
const NETWORK_COLLECTION: &str = "student_networks";
const VIOLATION_COLLECTION: &str = "violation_logs";
const ALERT_COLLECTION: &str = "alert_logs";
const ACTION_LOG_COLLECTION: &str = "action_logs";

/// Connects and selects the application database.
pub async fn connect(uri: &str, db_name: &str) -> AppResult<Database> {
    let options = ClientOptions::parse_with_resolver_config(uri, ResolverConfig::cloudflare())
        .await
        .map_err(AppError::from)?;
    let client = Client::with_options(options).map_err(AppError::from)?;
    let db = client.database(db_name);
    tracing::info!("[store] connected to mongodb database '{}'", db_name);
    Ok(db)
}

fn fresh_id() -> String {
    ObjectId::new().to_hex()
}

pub struct MongoScoreboardRepo {
    collection: Collection<ScoreboardRecord>,
}

impl MongoScoreboardRepo {
    pub fn new(db: &Database) -> Self {
        Self {
            collection: db.collection(SCOREBOARD_COLLECTION),
        }
    }
}

#[async_trait]
impl ScoreboardRepo for MongoScoreboardRepo {
    async fn bulk_upsert(&self, records: Vec<ScoreboardRecord>) -> AppResult<()> {
        let upsert = ReplaceOptions::builder().upsert(true).build();
        for record in records {
            self.collection
                .replace_one(
                    doc! { "student_id": &record.student_id },
                    &record,
                    upsert.clone(),
                )
                .await?;
        }
        Ok(())
    }

    async fn find(&self, student_id: &str) -> AppResult<Option<ScoreboardRecord>> {
        Ok(self
            .collection
            .find_one(doc! { "student_id": student_id }, None)
            .await?)
    }

    async fn all_sorted(&self) -> AppResult<Vec<ScoreboardRecord>> {
        let mut rows: Vec<ScoreboardRecord> =
            self.collection.find(doc! {}, None).await?.try_collect().await?;
        rows.sort_by(|a, b| a.student_id.cmp(&b.student_id));
        Ok(rows)
    }

    async fn apply_results(
        &self,
        student_id: &str,
        results: BTreeMap<String, bool>,
        passed: usize,
        submitted_at: DateTime<Utc>,
    ) -> AppResult<bool> {
        let update = doc! {
            "$set": {
                "puzzle_results": to_bson(&results)?,
                "passed_puzzle_amount": passed as i64,
                "last_submit_time": to_bson(&Some(submitted_at))?,
            }
        };
        let outcome = self
            .collection
            .update_one(doc! { "student_id": student_id }, update, None)
            .await?;
        Ok(outcome.matched_count > 0)
    }

    async fn truncate(&self) -> AppResult<()> {
        self.collection.delete_many(doc! {}, None).await?;
        Ok(())
    }
}

pub struct MongoStudentNetworkRepo {
    collection: Collection<StudentNetworkRecord>,
}

impl MongoStudentNetworkRepo {
    pub fn new(db: &Database) -> Self {
        Self {
            collection: db.collection(NETWORK_COLLECTION),
        }
    }
}

#[async_trait]
impl StudentNetworkRepo for MongoStudentNetworkRepo {
    async fn upsert(&self, record: StudentNetworkRecord) -> AppResult<()> {
        self.collection
            .replace_one(
                doc! { "student_id": &record.student_id },
                &record,
                ReplaceOptions::builder().upsert(true).build(),
            )
            .await?;
        Ok(())
    }

    async fn find(&self, student_id: &str) -> AppResult<Option<StudentNetworkRecord>> {
        Ok(self
            .collection
            .find_one(doc! { "student_id": student_id }, None)
            .await?)
    }

    async fn find_by_ip_excluding(
        &self,
        ip: &str,
        student_id: &str,
    ) -> AppResult<Option<StudentNetworkRecord>> {
        Ok(self
            .collection
            .find_one(
                doc! { "ip_address": ip, "student_id": { "$ne": student_id } },
                None,
            )
            .await?)
    }

    async fn find_by_mac_excluding(
        &self,
        mac: &str,
        student_id: &str,
    ) -> AppResult<Option<StudentNetworkRecord>> {
        Ok(self
            .collection
            .find_one(
                doc! { "mac_address": mac, "student_id": { "$ne": student_id } },
                None,
            )
            .await?)
    }

    async fn update(&self, record: &StudentNetworkRecord) -> AppResult<()> {
        self.collection
            .replace_one(doc! { "student_id": &record.student_id }, record, None)
            .await?;
        Ok(())
    }

    async fn truncate(&self) -> AppResult<()> {
        self.collection.delete_many(doc! {}, None).await?;
        Ok(())
    }
}

pub struct MongoViolationLogRepo {
    collection: Collection<ViolationLogRecord>,
}

impl MongoViolationLogRepo {
    pub fn new(db: &Database) -> Self {
        Self {
            collection: db.collection(VIOLATION_COLLECTION),
        }
    }
}

#[async_trait]
impl ViolationLogRepo for MongoViolationLogRepo {
    async fn insert(&self, mut record: ViolationLogRecord) -> AppResult<ViolationLogRecord> {
        record.id = fresh_id();
        self.collection.insert_one(&record, None).await?;
        Ok(record)
    }

    async fn find_open(
        &self,
        student_id: &str,
        violation_type: ViolationType,
        message: &str,
    ) -> AppResult<Option<ViolationLogRecord>> {
        Ok(self
            .collection
            .find_one(
                doc! {
                    "student_id": student_id,
                    "violation_type": to_bson(&violation_type)?,
                    "message": message,
                    "is_ok": false,
                },
                None,
            )
            .await?)
    }

    async fn refresh(
        &self,
        id: &str,
        time: DateTime<Utc>,
        ip_address: Option<String>,
    ) -> AppResult<()> {
        self.collection
            .update_one(
                doc! { "id": id },
                doc! { "$set": {
                    "time": to_bson(&time)?,
                    "ip_address": to_bson(&ip_address)?,
                } },
                None,
            )
            .await?;
        Ok(())
    }

    async fn set_ok(&self, id: &str) -> AppResult<bool> {
        let outcome = self
            .collection
            .update_one(doc! { "id": id }, doc! { "$set": { "is_ok": true } }, None)
            .await?;
        Ok(outcome.matched_count > 0)
    }

    async fn find_by_id(&self, id: &str) -> AppResult<Option<ViolationLogRecord>> {
        Ok(self.collection.find_one(doc! { "id": id }, None).await?)
    }

    async fn by_student(&self, student_id: &str) -> AppResult<Vec<ViolationLogRecord>> {
        let mut rows: Vec<ViolationLogRecord> = self
            .collection
            .find(doc! { "student_id": student_id }, None)
            .await?
            .try_collect()
            .await?;
        rows.sort_by(|a, b| b.time.cmp(&a.time));
        Ok(rows)
    }

    async fn all_desc(&self) -> AppResult<Vec<ViolationLogRecord>> {
        let mut rows: Vec<ViolationLogRecord> =
            self.collection.find(doc! {}, None).await?.try_collect().await?;
        rows.sort_by(|a, b| b.time.cmp(&a.time));
        Ok(rows)
    }

    async fn delete(&self, id: &str) -> AppResult<bool> {
        let outcome = self.collection.delete_one(doc! { "id": id }, None).await?;
        Ok(outcome.deleted_count > 0)
    }

    async fn truncate(&self) -> AppResult<()> {
        self.collection.delete_many(doc! {}, None).await?;
        Ok(())
    }
}

pub struct MongoAlertLogRepo {
    collection: Collection<AlertLogRecord>,
}

impl MongoAlertLogRepo {
    pub fn new(db: &Database) -> Self {
        Self {
            collection: db.collection(ALERT_COLLECTION),
        }
    }
}

#[async_trait]
impl AlertLogRepo for MongoAlertLogRepo {
    async fn insert(&self, mut record: AlertLogRecord) -> AppResult<AlertLogRecord> {
        record.id = fresh_id();
        self.collection.insert_one(&record, None).await?;
        Ok(record)
    }

    async fn exists(
        &self,
        student_id: &str,
        alert_type: AlertType,
        source_log_id: &str,
    ) -> AppResult<bool> {
        let count = self
            .collection
            .count_documents(
                doc! {
                    "student_id": student_id,
                    "alert_type": to_bson(&alert_type)?,
                    "source_log_id": source_log_id,
                },
                None,
            )
            .await?;
        Ok(count > 0)
    }

    async fn set_ok(&self, id: &str, is_ok: bool) -> AppResult<bool> {
        let outcome = self
            .collection
            .update_one(doc! { "id": id }, doc! { "$set": { "is_ok": is_ok } }, None)
            .await?;
        Ok(outcome.matched_count > 0)
    }

    async fn find_by_id(&self, id: &str) -> AppResult<Option<AlertLogRecord>> {
        Ok(self.collection.find_one(doc! { "id": id }, None).await?)
    }

    async fn all_desc(&self) -> AppResult<Vec<AlertLogRecord>> {
        let mut rows: Vec<AlertLogRecord> =
            self.collection.find(doc! {}, None).await?.try_collect().await?;
        rows.sort_by(|a, b| b.time.cmp(&a.time));
        Ok(rows)
    }

    async fn delete(&self, id: &str) -> AppResult<bool> {
        let outcome = self.collection.delete_one(doc! { "id": id }, None).await?;
        Ok(outcome.deleted_count > 0)
    }

    async fn truncate(&self) -> AppResult<()> {
        self.collection.delete_many(doc! {}, None).await?;
        Ok(())
    }
}

pub struct MongoActionLogRepo {
    collection: Collection<ActionLogRecord>,
}

impl MongoActionLogRepo {
    pub fn new(db: &Database) -> Self {
        Self {
            collection: db.collection(ACTION_LOG_COLLECTION),
        }
    }

    async fn collect_desc(
        &self,
        filter: mongodb::bson::Document,
    ) -> AppResult<Vec<ActionLogRecord>> {
        let mut rows: Vec<ActionLogRecord> =
            self.collection.find(filter, None).await?.try_collect().await?;
        rows.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(rows)
    }
}

#[async_trait]
impl ActionLogRepo for MongoActionLogRepo {
    async fn append(&self, mut record: ActionLogRecord) -> AppResult<ActionLogRecord> {
        record.id = fresh_id();
        self.collection.insert_one(&record, None).await?;
        Ok(record)
    }

    async fn all_desc(&self) -> AppResult<Vec<ActionLogRecord>> {
        self.collect_desc(doc! {}).await
    }

    async fn by_student(&self, student_id: &str) -> AppResult<Vec<ActionLogRecord>> {
        self.collect_desc(doc! { "student_id": student_id }).await
    }

    async fn by_ip(&self, ip: &str) -> AppResult<Vec<ActionLogRecord>> {
        self.collect_desc(doc! { "ip_address": ip }).await
    }

    async fn by_mac(&self, mac: &str) -> AppResult<Vec<ActionLogRecord>> {
        self.collect_desc(doc! { "mac_address": mac }).await
    }

    async fn last_n(&self, n: usize) -> AppResult<Vec<ActionLogRecord>> {
        let mut rows = self.all_desc().await?;
        rows.truncate(n);
        Ok(rows)
    }

    async fn truncate(&self) -> AppResult<()> {
        self.collection.delete_many(doc! {}, None).await?;
        Ok(())
    }
}
