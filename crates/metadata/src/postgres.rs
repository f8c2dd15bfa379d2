//! PostgreSQL-based metadata store implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::models::*;
use crate::repos::{ChunkRepo, UploadRepo};
use crate::store::{
    MetadataStore, chunk_not_found, map_unique_violation, new_chunk_rows, new_session_row,
};
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode as SqlxPgSslMode};
use sqlx::{Pool, Postgres};
use stitch_core::config::PgSslMode;
use stitch_core::upload::logical_path;
use stitch_core::{ChunkStatus, UploadStatus};
use std::str::FromStr;
use time::OffsetDateTime;
use uuid::Uuid;

/// PostgreSQL schema (embedded).
const POSTGRES_SCHEMA: &str = include_str!("postgres_schema.sql");

fn postgres_schema_statements(schema: &str) -> Vec<&str> {
    schema
        .split(';')
        .filter_map(|statement| {
            let trimmed = statement.trim();
            if trimmed.is_empty() {
                return None;
            }
            let has_sql = trimmed.lines().any(|line| {
                let line = line.trim();
                !line.is_empty() && !line.starts_with("--")
            });
            has_sql.then_some(trimmed)
        })
        .collect()
}

/// PostgreSQL-based metadata store.
pub struct PostgresStore {
    pool: Pool<Postgres>,
}

impl PostgresStore {
    /// Create a new PostgreSQL store from a connection URL.
    pub async fn from_url(
        url: &str,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        let opts = PgConnectOptions::from_str(url)?;
        Self::connect(opts, max_connections, statement_timeout_ms).await
    }

    /// Create a new PostgreSQL store from individual connection parameters.
    ///
    /// This allows credentials to be passed separately, enabling better
    /// secret management (e.g., passwords via environment variables).
    #[allow(clippy::too_many_arguments)]
    pub async fn from_params(
        host: &str,
        port: u16,
        username: Option<&str>,
        password: Option<&str>,
        database: &str,
        ssl_mode: Option<PgSslMode>,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        let mut opts = PgConnectOptions::new()
            .host(host)
            .port(port)
            .database(database);

        if let Some(user) = username {
            opts = opts.username(user);
        }

        if let Some(pass) = password {
            opts = opts.password(pass);
        }

        if let Some(mode) = ssl_mode {
            let sqlx_mode = match mode {
                PgSslMode::Disable => SqlxPgSslMode::Disable,
                PgSslMode::Prefer => SqlxPgSslMode::Prefer,
                PgSslMode::Require => SqlxPgSslMode::Require,
            };
            opts = opts.ssl_mode(sqlx_mode);
        }

        // Log connection info without password
        tracing::info!(
            host = host,
            port = port,
            database = database,
            username = username.unwrap_or("<none>"),
            ssl_mode = ?ssl_mode,
            "Connecting to PostgreSQL with individual parameters"
        );

        Self::connect(opts, max_connections, statement_timeout_ms).await
    }

    async fn connect(
        mut opts: PgConnectOptions,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        if let Some(timeout_ms) = statement_timeout_ms {
            opts = opts.options([("statement_timeout", format!("{}ms", timeout_ms))]);
            tracing::info!("PostgreSQL statement_timeout set to {}ms", timeout_ms);
        }

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;

        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for PostgresStore {
    async fn migrate(&self) -> MetadataResult<()> {
        // PostgreSQL doesn't allow multiple statements in a single prepared statement,
        // so we split the schema and execute each statement separately.
        for statement in postgres_schema_statements(POSTGRES_SCHEMA) {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl UploadRepo for PostgresStore {
    #[tracing::instrument(skip(self, upload), fields(upload_id = %upload.upload_id, chunks = upload.chunk_hashes.len()))]
    async fn register_upload(&self, upload: &NewUpload) -> MetadataResult<RegisteredUpload> {
        let mut tx = self.pool.begin().await?;

        // Serialize registrations of the same logical path so MAX(version) + 1
        // cannot be computed twice. Released at commit or rollback.
        let path_key = logical_path(&upload.namespace, &upload.relative_path, &upload.file_name);
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(&path_key)
            .execute(&mut *tx)
            .await?;

        let latest: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(version), 0) FROM upload_sessions \
             WHERE namespace = $1 AND relative_path = $2 AND file_name = $3",
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
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
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
        if !chunks.is_empty() {
            // One round-trip for the whole manifest.
            let chunk_ids: Vec<Uuid> = chunks.iter().map(|c| c.chunk_id).collect();
            let indexes: Vec<i64> = chunks.iter().map(|c| c.chunk_index).collect();
            let hashes: Vec<String> = chunks.iter().map(|c| c.chunk_hash.clone()).collect();
            sqlx::query(
                r#"
                INSERT INTO upload_chunks (
                    chunk_id, upload_id, chunk_index, chunk_hash, status, created_at, updated_at
                )
                SELECT t.chunk_id, $1, t.chunk_index, t.chunk_hash, 'init', $5, $5
                FROM UNNEST($2::uuid[], $3::bigint[], $4::text[])
                    AS t(chunk_id, chunk_index, chunk_hash)
                "#,
            )
            .bind(upload.upload_id)
            .bind(&chunk_ids)
            .bind(&indexes)
            .bind(&hashes)
            .bind(upload.created_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(RegisteredUpload { session, chunks })
    }

    async fn get_session(&self, upload_id: Uuid) -> MetadataResult<Option<UploadSessionRow>> {
        let row = sqlx::query_as::<_, UploadSessionRow>(
            "SELECT * FROM upload_sessions WHERE upload_id = $1",
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
             WHERE namespace = $1 AND relative_path = $2 AND file_name = $3",
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
impl ChunkRepo for PostgresStore {
    async fn get_chunks(&self, upload_id: Uuid) -> MetadataResult<Vec<UploadChunkRow>> {
        let rows = sqlx::query_as::<_, UploadChunkRow>(
            "SELECT * FROM upload_chunks WHERE upload_id = $1 ORDER BY chunk_index",
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
            "SELECT * FROM upload_chunks WHERE upload_id = $1 AND chunk_hash = $2 \
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
            SET signed_url = $1, object_key = $2, signed_url_expires_at = $3, updated_at = $4
            WHERE upload_id = $5 AND chunk_hash = $6
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

        // Lock the session row first. Concurrent confirmations of the same
        // session queue here, so each one counts after the previous committed.
        let locked = sqlx::query_as::<_, UploadSessionRow>(
            "SELECT * FROM upload_sessions WHERE upload_id = $1 FOR UPDATE",
        )
        .bind(upload_id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(mut session) = locked else {
            return Err(MetadataError::NotFound(format!("upload {upload_id}")));
        };

        let updated = sqlx::query(
            r#"
            UPDATE upload_chunks
            SET status = 'completed', updated_at = $1, completed_at = $1
            WHERE upload_id = $2 AND chunk_hash = $3 AND status = 'init'
            "#,
        )
        .bind(confirmed_at)
        .bind(upload_id)
        .bind(chunk_hash)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if updated == 0 {
            let exists: bool = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM upload_chunks WHERE upload_id = $1 AND chunk_hash = $2)",
            )
            .bind(upload_id)
            .bind(chunk_hash)
            .fetch_one(&mut *tx)
            .await?;
            if !exists {
                return Err(chunk_not_found(upload_id, chunk_hash));
            }
        }

        let (total, completed): (i64, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*), COUNT(*) FILTER (WHERE status = 'completed')
            FROM upload_chunks WHERE upload_id = $1
            "#,
        )
        .bind(upload_id)
        .fetch_one(&mut *tx)
        .await?;

        let mut transitioned = false;
        if completed == total {
            let completed_row = sqlx::query_as::<_, UploadSessionRow>(
                r#"
                UPDATE upload_sessions
                SET status = 'completed', updated_at = $1, completed_at = $1
                WHERE upload_id = $2 AND status = 'init'
                RETURNING *
                "#,
            )
            .bind(confirmed_at)
            .bind(upload_id)
            .fetch_optional(&mut *tx)
            .await?;
            if let Some(row) = completed_row {
                session = row;
                transitioned = true;
            }
        }

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
                    "SELECT COUNT(*) FROM upload_chunks WHERE upload_id = $1 AND status = $2",
                )
                .bind(upload_id)
                .bind(status.as_str())
                .fetch_one(&self.pool)
                .await?
            }
            None => {
                sqlx::query_scalar("SELECT COUNT(*) FROM upload_chunks WHERE upload_id = $1")
                    .bind(upload_id)
                    .fetch_one(&self.pool)
                    .await?
            }
        };
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::{POSTGRES_SCHEMA, postgres_schema_statements};

    #[test]
    fn postgres_schema_statements_skips_empty_and_comment_only() {
        let schema = r#"
            -- comment only

            CREATE TABLE foo (id int);
            ;
            -- another comment
            CREATE TABLE bar (id int);
        "#;

        let statements = postgres_schema_statements(schema);
        assert_eq!(statements.len(), 2);
        assert!(statements[0].contains("CREATE TABLE foo"));
        assert!(statements[1].contains("CREATE TABLE bar"));
    }

    #[test]
    fn embedded_schema_creates_both_tables() {
        let statements = postgres_schema_statements(POSTGRES_SCHEMA);
        assert!(statements.iter().any(|s| s.contains("CREATE TABLE IF NOT EXISTS upload_sessions")));
        assert!(statements.iter().any(|s| s.contains("CREATE TABLE IF NOT EXISTS upload_chunks")));
    }
}
