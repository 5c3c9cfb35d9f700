//! # Local Database Module
//!
//! Durable SQLite storage for the sync layer. Entity records, the operation
//! queue, unresolved conflicts and sync metadata live in one database file so
//! a single transaction can cover a record write and its queue entry.
//!
//! ## Architecture
//!
//! - **Entities**: domain records keyed by id, tagged by entity type, with
//!   role and week columns for filtered scans
//! - **Sync Queue**: pending mutations indexed by status and by enqueue time
//! - **Conflicts**: version mismatches awaiting a resolution
//! - **Metadata**: small key/value table (last sync time)
//!
//! ## Key Components
//!
//! - `LocalDatabase`: connection pool, pragmas and schema management
//! - `store.rs`: storage traits shared with the in-memory store
//! - `entities.rs`: entity table operations
//! - `sync.rs`: queue, conflict and metadata operations, atomic batches
//! - `memory.rs`: in-memory store for tests and ephemeral sessions
//!
//! ## Usage
//!
//! ```rust,no_run
//! use fintrack_sync::local_db::LocalDatabase;
//! use fintrack_sync::local_db::store::EntityStore;
//!
//! # async fn run() -> Result<(), fintrack_sync::local_db::store::StoreError> {
//! let db = LocalDatabase::open("/tmp/fintrack/sync.db").await?;
//! let record = db.get("t1").await?;
//! # Ok(())
//! # }
//! ```

pub mod entities;
pub mod memory;
pub mod schema;
pub mod store;
pub mod sync;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;

use self::schema::{get_pending_migrations, needs_migration, SCHEMA_SQL};
use self::store::{StoreError, StoreResult};

/// SQLite-backed durable store
///
/// Cheap to clone; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct LocalDatabase {
    pool: SqlitePool,
}

impl LocalDatabase {
    /// Open or create the database file at `path`
    ///
    /// Creates the parent directory and the file if they don't exist,
    /// enables WAL mode and applies pending migrations.
    pub async fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StoreError::unavailable(format!("{}: {}", parent.display(), e)))?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.init_schema().await?;

        tracing::info!(path = %path.display(), "Opened local sync database");
        Ok(db)
    }

    /// Open a private in-memory database
    ///
    /// Limited to one connection; every connection to `sqlite::memory:`
    /// would otherwise see its own empty database.
    pub async fn in_memory() -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.init_schema().await?;
        Ok(db)
    }

    /// Create all tables and run any pending migrations
    async fn init_schema(&self) -> StoreResult<()> {
        sqlx::raw_sql(SCHEMA_SQL).execute(&self.pool).await?;
        self.run_migrations().await?;
        Ok(())
    }

    /// Apply migrations newer than the recorded schema version
    async fn run_migrations(&self) -> StoreResult<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        let current_version: (i32,) =
            sqlx::query_as("SELECT COALESCE(MAX(version), 0) FROM schema_migrations")
                .fetch_one(&self.pool)
                .await?;

        if !needs_migration(current_version.0) {
            return Ok(());
        }

        for version in get_pending_migrations(current_version.0) {
            // Version 1 is the base schema applied above
            sqlx::query("INSERT INTO schema_migrations (version, applied_at) VALUES (?, ?)")
                .bind(version)
                .bind(Utc::now().to_rfc3339())
                .execute(&self.pool)
                .await?;
            tracing::debug!(version, "Applied schema migration");
        }

        Ok(())
    }

    /// Get connection pool reference
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the pool, waiting for open connections to be returned
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Row counts for diagnostics
    pub async fn get_stats(&self) -> StoreResult<DatabaseStats> {
        let entity_count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM entities")
            .fetch_one(&self.pool)
            .await?;

        let dirty_count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM entities WHERE is_dirty = 1")
            .fetch_one(&self.pool)
            .await?;

        let queued_operations: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM sync_queue WHERE status != 'completed'")
                .fetch_one(&self.pool)
                .await?;

        let conflicts: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM sync_conflicts")
            .fetch_one(&self.pool)
            .await?;

        Ok(DatabaseStats {
            entity_count: entity_count.0,
            dirty_count: dirty_count.0,
            queued_operations: queued_operations.0,
            conflicts: conflicts.0,
        })
    }
}

/// Database statistics for debugging
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatabaseStats {
    pub entity_count: i64,
    pub dirty_count: i64,
    /// Queue entries that are not yet completed
    pub queued_operations: i64,
    pub conflicts: i64,
}

pub(crate) fn to_micros(at: DateTime<Utc>) -> i64 {
    at.timestamp_micros()
}

pub(crate) fn from_micros(value: i64, table: &'static str, key: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::from_timestamp_micros(value)
        .ok_or_else(|| StoreError::corrupt(table, key, format!("timestamp out of range: {}", value)))
}

pub(crate) fn from_micros_opt(
    value: Option<i64>,
    table: &'static str,
    key: &str,
) -> StoreResult<Option<DateTime<Utc>>> {
    value.map(|v| from_micros(v, table, key)).transpose()
}
