//! SqliteSessionStore - BackingStore implementation for the durable tier

use async_trait::async_trait;
use sqlx::Row;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{SqliteStoreConfig, WriteMode};
use crate::deferred::{DeferredWriter, PendingWrite};
use stratum_core::{BackingStore, Error, Result, SessionRecord};

pub(crate) const STORE_NAME: &str = "durable";

const SCHEMA_VERSION: i32 = 1;

const UPSERT_SQL: &str = r#"
    INSERT INTO sessions (session_key, data, expiration_time, updated_at)
    VALUES (?, ?, ?, CURRENT_TIMESTAMP)
    ON CONFLICT(session_key) DO UPDATE SET
        data = excluded.data,
        expiration_time = excluded.expiration_time,
        updated_at = CURRENT_TIMESTAMP
"#;

/// Durable session tier backed by SQLite
///
/// In [`WriteMode::Deferred`] writes are acknowledged once queued; reads go
/// straight to the database and may not yet observe queued writes.
#[derive(Clone)]
pub struct SqliteSessionStore {
    pool: SqlitePool,
    deferred: Option<Arc<DeferredWriter>>,
}

impl SqliteSessionStore {
    /// Open (or create) the database described by `config`
    ///
    /// # Errors
    /// - `Error::Config` if the configuration is invalid
    /// - `Error::Io` if the parent directory cannot be created
    /// - `Error::Database` if the connection or schema setup fails
    pub async fn new(config: SqliteStoreConfig) -> Result<Self> {
        config.validate().map_err(Error::Config)?;

        if let Some(parent) = config.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(
                SqliteConnectOptions::new()
                    .filename(&config.path)
                    .create_if_missing(true)
                    .journal_mode(SqliteJournalMode::Wal)
                    .synchronous(SqliteSynchronous::Normal)
                    .busy_timeout(Duration::from_millis(config.busy_timeout_ms)),
            )
            .await
            .map_err(|e| Error::Database(format!("Failed to open session database: {}", e)))?;

        Self::initialize_schema(&pool).await?;

        let deferred = match config.write_mode {
            WriteMode::Sync => None,
            WriteMode::Deferred => Some(Arc::new(DeferredWriter::spawn(pool.clone(), &config))),
        };

        tracing::info!(
            path = %config.path.display(),
            write_mode = ?config.write_mode,
            "Opened SQLite session store"
        );

        Ok(Self { pool, deferred })
    }

    async fn initialize_schema(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY
            )
            "#,
        )
        .execute(pool)
        .await
        .map_err(map_sqlx_error)?;

        sqlx::query("INSERT OR IGNORE INTO schema_version (version) VALUES (?)")
            .bind(SCHEMA_VERSION)
            .execute(pool)
            .await
            .map_err(map_sqlx_error)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                session_key TEXT PRIMARY KEY,
                data BLOB NOT NULL,
                expiration_time INTEGER NOT NULL,
                updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(pool)
        .await
        .map_err(map_sqlx_error)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_sessions_expiration ON sessions(expiration_time)",
        )
        .execute(pool)
        .await
        .map_err(map_sqlx_error)?;

        let version: i32 = sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
            .fetch_one(pool)
            .await
            .map_err(map_sqlx_error)?;

        if version != SCHEMA_VERSION {
            return Err(Error::Database(format!(
                "Unsupported schema version: {}",
                version
            )));
        }

        Ok(())
    }

    /// Access the underlying pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Active write mode
    pub fn write_mode(&self) -> WriteMode {
        if self.deferred.is_some() {
            WriteMode::Deferred
        } else {
            WriteMode::Sync
        }
    }

    /// Wait until every queued write has reached the database
    ///
    /// A no-op in synchronous mode.
    pub async fn flush(&self) -> Result<()> {
        match &self.deferred {
            Some(writer) => writer.flush().await,
            None => Ok(()),
        }
    }

    /// Flush queued writes and stop the background writer
    pub async fn shutdown(&self) -> Result<()> {
        match &self.deferred {
            Some(writer) => writer.shutdown().await,
            None => Ok(()),
        }
    }

    /// Delete every row expired at `now`, returning how many were removed
    pub async fn purge_expired(&self, now: i64) -> Result<u64> {
        let result = sqlx::query("DELETE FROM sessions WHERE expiration_time < ?")
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        let purged = result.rows_affected();
        if purged > 0 {
            tracing::debug!(purged, "Purged expired sessions from SQLite store");
        }
        Ok(purged)
    }

    /// Number of stored sessions, expired rows included
    pub async fn count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sessions")
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(count as u64)
    }
}

#[async_trait]
impl BackingStore for SqliteSessionStore {
    fn name(&self) -> &str {
        STORE_NAME
    }

    async fn get(&self, key: &str) -> Result<Option<SessionRecord>> {
        let data: Option<Vec<u8>> =
            sqlx::query_scalar("SELECT data FROM sessions WHERE session_key = ?")
                .bind(key)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx_error)?;

        match data {
            Some(bytes) => Ok(Some(SessionRecord::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, record: &SessionRecord) -> Result<()> {
        let write = PendingWrite {
            key: key.to_string(),
            bytes: record.to_bytes()?,
            expiration_time: record.expiration_time,
        };

        match &self.deferred {
            Some(writer) => writer.enqueue(write),
            None => upsert(&self.pool, &write).await,
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        match &self.deferred {
            Some(writer) => writer.delete(key).await,
            None => delete_row(&self.pool, key).await,
        }
    }

    async fn get_all(&self) -> Result<Option<HashMap<String, SessionRecord>>> {
        let rows = sqlx::query("SELECT session_key, data FROM sessions")
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        let mut records = HashMap::with_capacity(rows.len());
        for row in rows {
            let key: String = row.try_get("session_key").map_err(map_sqlx_error)?;
            let data: Vec<u8> = row.try_get("data").map_err(map_sqlx_error)?;
            records.insert(key, SessionRecord::from_bytes(&data)?);
        }
        Ok(Some(records))
    }
}

/// Write a single row
pub(crate) async fn upsert(pool: &SqlitePool, write: &PendingWrite) -> Result<()> {
    sqlx::query(UPSERT_SQL)
        .bind(&write.key)
        .bind(&write.bytes)
        .bind(write.expiration_time)
        .execute(pool)
        .await
        .map_err(map_sqlx_error)?;
    Ok(())
}

/// Write a batch of rows in one transaction, in order
pub(crate) async fn upsert_batch(pool: &SqlitePool, writes: &[PendingWrite]) -> Result<()> {
    let mut tx = pool.begin().await.map_err(map_sqlx_error)?;
    for write in writes {
        sqlx::query(UPSERT_SQL)
            .bind(&write.key)
            .bind(&write.bytes)
            .bind(write.expiration_time)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;
    }
    tx.commit().await.map_err(map_sqlx_error)?;
    Ok(())
}

pub(crate) async fn delete_row(pool: &SqlitePool, key: &str) -> Result<()> {
    sqlx::query("DELETE FROM sessions WHERE session_key = ?")
        .bind(key)
        .execute(pool)
        .await
        .map_err(map_sqlx_error)?;
    Ok(())
}

/// Classify a driver error
///
/// Pool exhaustion, I/O failures and SQLite busy/locked conditions are
/// transient; everything else is fatal.
pub(crate) fn map_sqlx_error(e: sqlx::Error) -> Error {
    match &e {
        sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::Io(_) => Error::transient(STORE_NAME, e.to_string()),
        sqlx::Error::Database(db) if is_busy_code(db.code().as_deref()) => {
            Error::transient(STORE_NAME, e.to_string())
        }
        _ => Error::Database(e.to_string()),
    }
}

// SQLITE_BUSY, SQLITE_LOCKED and their extended codes
fn is_busy_code(code: Option<&str>) -> bool {
    matches!(code, Some("5" | "6" | "261" | "262" | "517"))
}
