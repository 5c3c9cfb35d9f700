//! Entity table operations for [`LocalDatabase`].

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection};

use super::store::{EntityStore, StoreError, StoreResult};
use super::{from_micros, from_micros_opt, to_micros, LocalDatabase};
use crate::shared::entity::{EntityBody, EntityFilter, EntityRecord};

const TABLE: &str = "entities";

pub(crate) async fn put_record(conn: &mut SqliteConnection, record: &EntityRecord) -> StoreResult<()> {
    let body = serde_json::to_string(&record.body)
        .map_err(|e| StoreError::corrupt(TABLE, record.id.clone(), e.to_string()))?;

    sqlx::query(
        "INSERT OR REPLACE INTO entities
            (id, entity_type, role, week, body, updated_at, synced_at, is_dirty, server_version)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&record.id)
    .bind(record.entity_type().as_str())
    .bind(record.body.role().map(|r| r.as_str()))
    .bind(record.body.week())
    .bind(body)
    .bind(to_micros(record.updated_at))
    .bind(record.synced_at.map(to_micros))
    .bind(record.is_dirty)
    .bind(&record.server_version)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub(crate) async fn delete_record(conn: &mut SqliteConnection, id: &str) -> StoreResult<()> {
    sqlx::query("DELETE FROM entities WHERE id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

fn row_to_record(row: &SqliteRow) -> StoreResult<EntityRecord> {
    let id: String = row.try_get("id")?;
    let body: String = row.try_get("body")?;
    let body: EntityBody =
        serde_json::from_str(&body).map_err(|e| StoreError::corrupt(TABLE, id.clone(), e.to_string()))?;

    Ok(EntityRecord {
        updated_at: from_micros(row.try_get("updated_at")?, TABLE, &id)?,
        synced_at: from_micros_opt(row.try_get("synced_at")?, TABLE, &id)?,
        is_dirty: row.try_get("is_dirty")?,
        server_version: row.try_get("server_version")?,
        body,
        id,
    })
}

#[async_trait]
impl EntityStore for LocalDatabase {
    async fn put(&self, record: &EntityRecord) -> StoreResult<()> {
        let mut conn = self.pool().acquire().await?;
        put_record(&mut conn, record).await
    }

    async fn get(&self, id: &str) -> StoreResult<Option<EntityRecord>> {
        let row = sqlx::query("SELECT * FROM entities WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;

        row.as_ref().map(row_to_record).transpose()
    }

    async fn get_all(&self, filter: &EntityFilter) -> StoreResult<Vec<EntityRecord>> {
        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT * FROM entities WHERE 1 = 1");

        if let Some(entity_type) = filter.entity_type {
            query.push(" AND entity_type = ").push_bind(entity_type.as_str());
        }
        if let Some(dirty) = filter.dirty {
            query.push(" AND is_dirty = ").push_bind(dirty);
        }
        if let Some(role) = filter.role {
            query.push(" AND role = ").push_bind(role.as_str());
        }
        if let Some(week) = &filter.week {
            query.push(" AND week = ").push_bind(week.clone());
        }
        query.push(" ORDER BY updated_at ASC, id ASC");

        let rows = query.build().fetch_all(self.pool()).await?;
        rows.iter().map(row_to_record).collect()
    }

    async fn delete(&self, id: &str) -> StoreResult<()> {
        let mut conn = self.pool().acquire().await?;
        delete_record(&mut conn, id).await
    }
}
