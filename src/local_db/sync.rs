//! # Sync Queue Operations
//!
//! Queue, conflict and metadata persistence for [`LocalDatabase`].
//!
//! ## Features
//!
//! - **Operation Queue**: entries ordered by enqueue time, ties broken by
//!   append order (`seq`)
//! - **Conflicts**: at most one unresolved conflict per entity
//! - **Sync Metadata**: key/value pairs such as the last sync time
//! - **Atomic Batches**: [`SyncStore::commit`] runs every write inside one
//!   SQLite transaction

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use uuid::Uuid;

use super::entities::{delete_record, put_record};
use super::store::{QueueStore, StoreError, StoreResult, StoreWrite, SyncStore};
use super::{from_micros, from_micros_opt, to_micros, LocalDatabase};
use crate::shared::entity::EntityRecord;
use crate::shared::operation::{OperationStatus, QueuedOperation, SyncConflict};

const QUEUE_TABLE: &str = "sync_queue";
const CONFLICT_TABLE: &str = "sync_conflicts";

async fn save_operation(conn: &mut SqliteConnection, op: &QueuedOperation) -> StoreResult<()> {
    let payload = serde_json::to_string(&op.payload)
        .map_err(|e| StoreError::corrupt(QUEUE_TABLE, op.id.to_string(), e.to_string()))?;

    // seq is assigned once on insert and never changes
    sqlx::query(
        "INSERT INTO sync_queue
            (id, seq, operation_type, entity_type, entity_id, payload, assumed_version,
             enqueued_at, status, retry_count, max_retries, next_attempt_at,
             last_attempt_at, completed_at, last_error)
         VALUES (?, (SELECT COALESCE(MAX(seq), 0) + 1 FROM sync_queue), ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
            payload = excluded.payload,
            assumed_version = excluded.assumed_version,
            status = excluded.status,
            retry_count = excluded.retry_count,
            max_retries = excluded.max_retries,
            next_attempt_at = excluded.next_attempt_at,
            last_attempt_at = excluded.last_attempt_at,
            completed_at = excluded.completed_at,
            last_error = excluded.last_error",
    )
    .bind(op.id.to_string())
    .bind(op.operation_type.as_str())
    .bind(op.entity_type.as_str())
    .bind(&op.entity_id)
    .bind(payload)
    .bind(&op.assumed_version)
    .bind(to_micros(op.enqueued_at))
    .bind(op.status.as_str())
    .bind(i64::from(op.retry_count))
    .bind(i64::from(op.max_retries))
    .bind(to_micros(op.next_attempt_at))
    .bind(op.last_attempt_at.map(to_micros))
    .bind(op.completed_at.map(to_micros))
    .bind(&op.last_error)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

async fn remove_operation(conn: &mut SqliteConnection, id: Uuid) -> StoreResult<()> {
    sqlx::query("DELETE FROM sync_queue WHERE id = ?")
        .bind(id.to_string())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

fn encode_record(record: &Option<EntityRecord>, key: &str) -> StoreResult<Option<String>> {
    record
        .as_ref()
        .map(|r| serde_json::to_string(r).map_err(|e| StoreError::corrupt(CONFLICT_TABLE, key, e.to_string())))
        .transpose()
}

fn decode_record(value: Option<String>, key: &str) -> StoreResult<Option<EntityRecord>> {
    value
        .map(|v| serde_json::from_str(&v).map_err(|e| StoreError::corrupt(CONFLICT_TABLE, key, e.to_string())))
        .transpose()
}

async fn save_conflict(conn: &mut SqliteConnection, conflict: &SyncConflict) -> StoreResult<()> {
    sqlx::query(
        "INSERT OR REPLACE INTO sync_conflicts
            (entity_id, entity_type, operation_id, local_version, remote_version,
             local_record, remote_record, remote_deleted, detected_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&conflict.entity_id)
    .bind(conflict.entity_type.as_str())
    .bind(conflict.operation_id.to_string())
    .bind(&conflict.local_version)
    .bind(&conflict.remote_version)
    .bind(encode_record(&conflict.local_record, &conflict.entity_id)?)
    .bind(encode_record(&conflict.remote_record, &conflict.entity_id)?)
    .bind(conflict.remote_deleted)
    .bind(to_micros(conflict.detected_at))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn remove_conflict(conn: &mut SqliteConnection, entity_id: &str) -> StoreResult<()> {
    sqlx::query("DELETE FROM sync_conflicts WHERE entity_id = ?")
        .bind(entity_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

fn parse_column<T>(row: &SqliteRow, column: &str, table: &'static str, key: &str) -> StoreResult<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let raw: String = row.try_get(column)?;
    raw.parse::<T>()
        .map_err(|e| StoreError::corrupt(table, key, format!("{}: {}", column, e)))
}

fn row_to_operation(row: &SqliteRow) -> StoreResult<QueuedOperation> {
    let key: String = row.try_get("id")?;
    let id = parse_column::<Uuid>(row, "id", QUEUE_TABLE, &key)?;
    let payload: String = row.try_get("payload")?;
    let retry_count: i64 = row.try_get("retry_count")?;
    let max_retries: i64 = row.try_get("max_retries")?;

    Ok(QueuedOperation {
        id,
        operation_type: parse_column(row, "operation_type", QUEUE_TABLE, &key)?,
        entity_type: parse_column(row, "entity_type", QUEUE_TABLE, &key)?,
        entity_id: row.try_get("entity_id")?,
        payload: serde_json::from_str(&payload)
            .map_err(|e| StoreError::corrupt(QUEUE_TABLE, key.clone(), e.to_string()))?,
        assumed_version: row.try_get("assumed_version")?,
        enqueued_at: from_micros(row.try_get("enqueued_at")?, QUEUE_TABLE, &key)?,
        status: parse_column(row, "status", QUEUE_TABLE, &key)?,
        retry_count: u32::try_from(retry_count)
            .map_err(|e| StoreError::corrupt(QUEUE_TABLE, key.clone(), e.to_string()))?,
        max_retries: u32::try_from(max_retries)
            .map_err(|e| StoreError::corrupt(QUEUE_TABLE, key.clone(), e.to_string()))?,
        next_attempt_at: from_micros(row.try_get("next_attempt_at")?, QUEUE_TABLE, &key)?,
        last_attempt_at: from_micros_opt(row.try_get("last_attempt_at")?, QUEUE_TABLE, &key)?,
        completed_at: from_micros_opt(row.try_get("completed_at")?, QUEUE_TABLE, &key)?,
        last_error: row.try_get("last_error")?,
    })
}

fn row_to_conflict(row: &SqliteRow) -> StoreResult<SyncConflict> {
    let entity_id: String = row.try_get("entity_id")?;

    Ok(SyncConflict {
        entity_type: parse_column(row, "entity_type", CONFLICT_TABLE, &entity_id)?,
        operation_id: parse_column(row, "operation_id", CONFLICT_TABLE, &entity_id)?,
        local_version: row.try_get("local_version")?,
        remote_version: row.try_get("remote_version")?,
        local_record: decode_record(row.try_get("local_record")?, &entity_id)?,
        remote_record: decode_record(row.try_get("remote_record")?, &entity_id)?,
        remote_deleted: row.try_get("remote_deleted")?,
        detected_at: from_micros(row.try_get("detected_at")?, CONFLICT_TABLE, &entity_id)?,
        entity_id,
    })
}

#[async_trait]
impl QueueStore for LocalDatabase {
    async fn operation(&self, id: Uuid) -> StoreResult<Option<QueuedOperation>> {
        let row = sqlx::query("SELECT * FROM sync_queue WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(self.pool())
            .await?;

        row.as_ref().map(row_to_operation).transpose()
    }

    async fn operations(&self, status: Option<OperationStatus>) -> StoreResult<Vec<QueuedOperation>> {
        let rows = match status {
            Some(status) => {
                sqlx::query("SELECT * FROM sync_queue WHERE status = ? ORDER BY enqueued_at ASC, seq ASC")
                    .bind(status.as_str())
                    .fetch_all(self.pool())
                    .await?
            }
            None => {
                sqlx::query("SELECT * FROM sync_queue ORDER BY enqueued_at ASC, seq ASC")
                    .fetch_all(self.pool())
                    .await?
            }
        };

        rows.iter().map(row_to_operation).collect()
    }

    async fn conflicts(&self) -> StoreResult<Vec<SyncConflict>> {
        let rows = sqlx::query("SELECT * FROM sync_conflicts ORDER BY detected_at ASC, entity_id ASC")
            .fetch_all(self.pool())
            .await?;

        rows.iter().map(row_to_conflict).collect()
    }

    async fn conflict(&self, entity_id: &str) -> StoreResult<Option<SyncConflict>> {
        let row = sqlx::query("SELECT * FROM sync_conflicts WHERE entity_id = ?")
            .bind(entity_id)
            .fetch_optional(self.pool())
            .await?;

        row.as_ref().map(row_to_conflict).transpose()
    }

    async fn metadata(&self, key: &str) -> StoreResult<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM sync_metadata WHERE key = ?")
            .bind(key)
            .fetch_optional(self.pool())
            .await?;
        Ok(row.map(|(value,)| value))
    }

    async fn set_metadata(&self, key: &str, value: &str) -> StoreResult<()> {
        sqlx::query("INSERT OR REPLACE INTO sync_metadata (key, value, updated_at) VALUES (?, ?, ?)")
            .bind(key)
            .bind(value)
            .bind(to_micros(chrono::Utc::now()))
            .execute(self.pool())
            .await?;
        Ok(())
    }
}

#[async_trait]
impl SyncStore for LocalDatabase {
    async fn commit(&self, writes: Vec<StoreWrite>) -> StoreResult<()> {
        let mut tx = self.pool().begin().await?;

        for write in &writes {
            match write {
                StoreWrite::PutRecord(record) => put_record(&mut tx, record).await?,
                StoreWrite::DeleteRecord(id) => delete_record(&mut tx, id).await?,
                StoreWrite::SaveOperation(op) => save_operation(&mut tx, op).await?,
                StoreWrite::RemoveOperation(id) => remove_operation(&mut tx, *id).await?,
                StoreWrite::SaveConflict(conflict) => save_conflict(&mut tx, conflict).await?,
                StoreWrite::RemoveConflict(entity_id) => remove_conflict(&mut tx, entity_id).await?,
            }
        }

        tx.commit().await?;
        tracing::trace!(writes = writes.len(), "Committed store batch");
        Ok(())
    }
}
