//! Metadata store trait and the SQLite implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::repos::{ChunkRepo, UploadRepo};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore: UploadRepo + ChunkRepo + Send + Sync {
    /// Run database migrations.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// SQLite-based metadata store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Create a new SQLite store.
    pub async fn new(
        path: impl AsRef<Path>,
        query_timeout_secs: Option<u64>,
    ) -> MetadataResult<Self> {
        let path = path.as_ref();
        let query_timeout_secs = query_timeout_secs.unwrap_or(600);

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            // Prevent transient "database is locked" errors under concurrent access.
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            // One connection serializes every transaction, which is what makes the
            // confirm-count-transition sequence atomic on SQLite.
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;

        tracing::warn!(
            query_timeout_secs = query_timeout_secs,
            "SQLite query timeout is advisory only. \
             SQLite is recommended for testing and single-node deployments; use PostgreSQL \
             when several server processes share the metadata store."
        );

        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

mod sqlite_impl {
    use super::*;
    use crate::models::*;
    use stitch_core::{ChunkStatus, UploadStatus};
    use time::OffsetDateTime;
    use uuid::Uuid;

    #[async_trait]
    impl UploadRepo for SqliteStore {
        #[tracing::instrument(skip(self, upload), fields(upload_id = %upload.upload_id, chunks = upload.chunk_hashes.len()))]
        async fn register_upload(&self, upload: &NewUpload) -> MetadataResult<RegisteredUpload> {
            let mut tx = self.pool.begin().await?;

            // The single pooled connection makes this read and the insert below
            // one serialized unit; the unique index catches anything else.
            let latest: i64 = sqlx::query_scalar(
                "SELECT COALESCE(MAX(version), 0) FROM upload_sessions \
                 WHERE namespace = ? AND relative_path = ? AND file_name = ?",
            )
            .bind(&upload.namespace)
            .bind(&upload.relative_path)
            .bind(&upload.file_name)
            .fetch_one(&mut *tx)
            .await?;

            let session = new_session_row(upload, latest + 1);
            sqlx::query(
                r#"
                INSERT INTO upload_sessions (
                    upload_id, namespace, relative_path, file_name, file_size,
                    chunks_total, version, status, created_at, updated_at, completed_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(session.upload_id)
            .bind(&session.namespace)
            .bind(&session.relative_path)
            .bind(&session.file_name)
            .bind(session.file_size)
            .bind(session.chunks_total)
            .bind(session.version)
            .bind(&session.status)
            .bind(session.created_at)
            .bind(session.updated_at)
            .bind(session.completed_at)
            .execute(&mut *tx)
            .await
            .map_err(map_unique_violation)?;

            let chunks = new_chunk_rows(upload);
            for chunk in &chunks {
                sqlx::query(
                    r#"
                    INSERT INTO upload_chunks (
                        chunk_id, upload_id, chunk_index, chunk_hash, status,
                        created_at, updated_at
                    ) VALUES (?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(chunk.chunk_id)
                .bind(chunk.upload_id)
                .bind(chunk.chunk_index)
                .bind(&chunk.chunk_hash)
                .bind(&chunk.status)
                .bind(chunk.created_at)
                .bind(chunk.updated_at)
                .execute(&mut *tx)
                .await?;
            }

            tx.commit().await?;
            Ok(RegisteredUpload { session, chunks })
        }

        async fn get_session(&self, upload_id: Uuid) -> MetadataResult<Option<UploadSessionRow>> {
            let row = sqlx::query_as::<_, UploadSessionRow>(
                "SELECT * FROM upload_sessions WHERE upload_id = ?",
            )
            .bind(upload_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn latest_version(
            &self,
            namespace: &str,
            relative_path: &str,
            file_name: &str,
        ) -> MetadataResult<Option<i64>> {
            let version: Option<i64> = sqlx::query_scalar(
                "SELECT MAX(version) FROM upload_sessions \
                 WHERE namespace = ? AND relative_path = ? AND file_name = ?",
            )
            .bind(namespace)
            .bind(relative_path)
            .bind(file_name)
            .fetch_one(&self.pool)
            .await?;
            Ok(version)
        }
    }

    #[async_trait]
    impl ChunkRepo for SqliteStore {
        async fn get_chunks(&self, upload_id: Uuid) -> MetadataResult<Vec<UploadChunkRow>> {
            let rows = sqlx::query_as::<_, UploadChunkRow>(
                "SELECT * FROM upload_chunks WHERE upload_id = ? ORDER BY chunk_index",
            )
            .bind(upload_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn get_chunk(
            &self,
            upload_id: Uuid,
            chunk_hash: &str,
        ) -> MetadataResult<Option<UploadChunkRow>> {
            let row = sqlx::query_as::<_, UploadChunkRow>(
                "SELECT * FROM upload_chunks WHERE upload_id = ? AND chunk_hash = ? \
                 ORDER BY chunk_index LIMIT 1",
            )
            .bind(upload_id)
            .bind(chunk_hash)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn record_signed_url(
            &self,
            upload_id: Uuid,
            chunk_hash: &str,
            signed_url: &str,
            object_key: &str,
            expires_at: OffsetDateTime,
            updated_at: OffsetDateTime,
        ) -> MetadataResult<u64> {
            let result = sqlx::query(
                r#"
                UPDATE upload_chunks
                SET signed_url = ?, object_key = ?, signed_url_expires_at = ?, updated_at = ?
                WHERE upload_id = ? AND chunk_hash = ?
                "#,
            )
            .bind(signed_url)
            .bind(object_key)
            .bind(expires_at)
            .bind(updated_at)
            .bind(upload_id)
            .bind(chunk_hash)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 0 {
                return Err(chunk_not_found(upload_id, chunk_hash));
            }
            Ok(result.rows_affected())
        }

        #[tracing::instrument(skip(self), fields(upload_id = %upload_id, chunk_hash = %chunk_hash))]
        async fn confirm_chunk(
            &self,
            upload_id: Uuid,
            chunk_hash: &str,
            confirmed_at: OffsetDateTime,
        ) -> MetadataResult<ConfirmOutcome> {
            let mut tx = self.pool.begin().await?;

            let updated = sqlx::query(
                r#"
                UPDATE upload_chunks
                SET status = 'completed', updated_at = ?, completed_at = ?
                WHERE upload_id = ? AND chunk_hash = ? AND status = 'init'
                "#,
            )
            .bind(confirmed_at)
            .bind(confirmed_at)
            .bind(upload_id)
            .bind(chunk_hash)
            .execute(&mut *tx)
            .await?
            .rows_affected();

            if updated == 0 {
                let exists: i64 = sqlx::query_scalar(
                    "SELECT COUNT(*) FROM upload_chunks WHERE upload_id = ? AND chunk_hash = ?",
                )
                .bind(upload_id)
                .bind(chunk_hash)
                .fetch_one(&mut *tx)
                .await?;
                if exists == 0 {
                    return Err(chunk_not_found(upload_id, chunk_hash));
                }
            }

            let (total, completed): (i64, i64) = sqlx::query_as(
                r#"
                SELECT COUNT(*),
                       COALESCE(SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END), 0)
                FROM upload_chunks WHERE upload_id = ?
                "#,
            )
            .bind(upload_id)
            .fetch_one(&mut *tx)
            .await?;

            let mut transitioned = false;
            if completed == total {
                let result = sqlx::query(
                    r#"
                    UPDATE upload_sessions
                    SET status = 'completed', updated_at = ?, completed_at = ?
                    WHERE upload_id = ? AND status = 'init'
                    "#,
                )
                .bind(confirmed_at)
                .bind(confirmed_at)
                .bind(upload_id)
                .execute(&mut *tx)
                .await?;
                transitioned = result.rows_affected() > 0;
            }

            let session = sqlx::query_as::<_, UploadSessionRow>(
                "SELECT * FROM upload_sessions WHERE upload_id = ?",
            )
            .bind(upload_id)
            .fetch_one(&mut *tx)
            .await?;

            tx.commit().await?;

            Ok(ConfirmOutcome {
                chunk_newly_completed: updated > 0,
                completed_chunks: completed as u64,
                total_chunks: total as u64,
                session_status: session.status.parse::<UploadStatus>()?,
                transitioned,
                session,
            })
        }

        async fn count_chunks(
            &self,
            upload_id: Uuid,
            status: Option<ChunkStatus>,
        ) -> MetadataResult<u64> {
            let count: i64 = match status {
                Some(status) => {
                    sqlx::query_scalar(
                        "SELECT COUNT(*) FROM upload_chunks WHERE upload_id = ? AND status = ?",
                    )
                    .bind(upload_id)
                    .bind(status.as_str())
                    .fetch_one(&self.pool)
                    .await?
                }
                None => {
                    sqlx::query_scalar("SELECT COUNT(*) FROM upload_chunks WHERE upload_id = ?")
                        .bind(upload_id)
                        .fetch_one(&self.pool)
                        .await?
                }
            };
            Ok(count as u64)
        }
    }
}

/// Build the session row for a registration at `version`.
///
/// A manifest with no chunks has nothing left to confirm, so it is stored completed.
pub(crate) fn new_session_row(
    upload: &crate::models::NewUpload,
    version: i64,
) -> crate::models::UploadSessionRow {
    let empty = upload.chunk_hashes.is_empty();
    let status = if empty {
        stitch_core::UploadStatus::Completed
    } else {
        stitch_core::UploadStatus::Initialized
    };
    crate::models::UploadSessionRow {
        upload_id: upload.upload_id,
        namespace: upload.namespace.clone(),
        relative_path: upload.relative_path.clone(),
        file_name: upload.file_name.clone(),
        file_size: upload.file_size,
        chunks_total: upload.chunk_hashes.len() as i64,
        version,
        status: status.as_str().to_string(),
        created_at: upload.created_at,
        updated_at: upload.created_at,
        completed_at: empty.then_some(upload.created_at),
    }
}

/// Build one initialized chunk row per manifest entry, indexed by position.
pub(crate) fn new_chunk_rows(upload: &crate::models::NewUpload) -> Vec<crate::models::UploadChunkRow> {
    upload
        .chunk_hashes
        .iter()
        .enumerate()
        .map(|(index, hash)| crate::models::UploadChunkRow {
            chunk_id: uuid::Uuid::new_v4(),
            upload_id: upload.upload_id,
            chunk_index: index as i64,
            chunk_hash: hash.clone(),
            signed_url: None,
            object_key: None,
            signed_url_expires_at: None,
            status: stitch_core::ChunkStatus::Initialized.as_str().to_string(),
            created_at: upload.created_at,
            updated_at: upload.created_at,
            completed_at: None,
        })
        .collect()
}

pub(crate) fn chunk_not_found(upload_id: uuid::Uuid, chunk_hash: &str) -> MetadataError {
    MetadataError::NotFound(format!("chunk {chunk_hash} in upload {upload_id}"))
}

/// Report a lost race on the per-path version index as a constraint violation.
pub(crate) fn map_unique_violation(err: sqlx::Error) -> MetadataError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            MetadataError::Constraint(format!("concurrent registration collided: {db}"))
        }
        _ => MetadataError::Database(err),
    }
}

const SCHEMA_SQL: &str = r#"
-- Upload sessions
CREATE TABLE IF NOT EXISTS upload_sessions (
    upload_id BLOB PRIMARY KEY,
    namespace TEXT NOT NULL DEFAULT '',
    relative_path TEXT NOT NULL DEFAULT '',
    file_name TEXT NOT NULL,
    file_size INTEGER NOT NULL,
    chunks_total INTEGER NOT NULL,
    version INTEGER NOT NULL,
    status TEXT NOT NULL DEFAULT 'init',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    completed_at TEXT
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_upload_sessions_path_version
    ON upload_sessions(namespace, relative_path, file_name, version);
CREATE INDEX IF NOT EXISTS idx_upload_sessions_status ON upload_sessions(status);

-- Chunk records; duplicate hashes within a session are allowed at distinct indexes
CREATE TABLE IF NOT EXISTS upload_chunks (
    chunk_id BLOB PRIMARY KEY,
    upload_id BLOB NOT NULL REFERENCES upload_sessions(upload_id) ON DELETE CASCADE,
    chunk_index INTEGER NOT NULL,
    chunk_hash TEXT NOT NULL,
    signed_url TEXT,
    object_key TEXT,
    signed_url_expires_at TEXT,
    status TEXT NOT NULL DEFAULT 'init',
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    completed_at TEXT,
    UNIQUE(upload_id, chunk_index)
);
CREATE INDEX IF NOT EXISTS idx_upload_chunks_hash ON upload_chunks(upload_id, chunk_hash);
CREATE INDEX IF NOT EXISTS idx_upload_chunks_status ON upload_chunks(upload_id, status);
"#;
