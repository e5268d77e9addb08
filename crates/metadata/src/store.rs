//! Metadata store trait and the SQLite implementation.

use crate::error::MetadataResult;
use crate::files::{FilePage, FileRepo, FileSearch};
use crate::models::{FileRow, NewFile};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use time::OffsetDateTime;

/// Combined metadata store trait.
#[async_trait]
pub trait MetaStore: FileRepo + Send + Sync {
    /// Run database migrations.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// Real-hash filter fragment. Synthetic hashes start with `shared_`; the
/// underscore is escaped so LIKE matches it literally.
const REAL_HASH: &str = r"file_hash NOT LIKE 'shared\_%' ESCAPE '\'";

/// SQLite-based metadata store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Open (creating if missing) and migrate a SQLite store.
    pub async fn new(path: impl AsRef<Path>) -> MetadataResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))
            .map_err(sqlx::Error::from)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            // Prevent transient "database is locked" errors under concurrent access.
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            // SQLite permits limited write concurrency; a single connection
            // avoids persistent "database is locked" failures.
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// In-memory SQLite store, for tests.
    pub async fn in_memory() -> MetadataResult<Self> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(sqlx::Error::from)?
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl MetaStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        // The global UNIQUE on file_hash is load-bearing: it forces shared
        // records onto synthetic hashes and turns the concurrent
        // create-for-same-content race into a typed conflict.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS files (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                owner_id INTEGER NOT NULL,
                file_name TEXT NOT NULL,
                file_size INTEGER NOT NULL,
                backend TEXT NOT NULL,
                object_key TEXT NOT NULL UNIQUE,
                file_hash TEXT NOT NULL UNIQUE,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_files_owner ON files(owner_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl FileRepo for SqliteStore {
    async fn create_file(&self, file: &NewFile) -> MetadataResult<FileRow> {
        let now = OffsetDateTime::now_utc();
        let result = sqlx::query(
            r#"
            INSERT INTO files (owner_id, file_name, file_size, backend, object_key, file_hash, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(file.owner_id)
        .bind(&file.file_name)
        .bind(file.file_size)
        .bind(file.backend.as_str())
        .bind(&file.object_key)
        .bind(&file.file_hash)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        Ok(FileRow {
            id,
            owner_id: file.owner_id,
            file_name: file.file_name.clone(),
            file_size: file.file_size,
            backend: file.backend.as_str().to_string(),
            object_key: file.object_key.clone(),
            file_hash: file.file_hash.clone(),
            created_at: now,
            updated_at: now,
        })
    }

    async fn find_owner_real_by_hash(
        &self,
        owner_id: i64,
        hash: &str,
    ) -> MetadataResult<Option<FileRow>> {
        let row = sqlx::query_as::<_, FileRow>(&format!(
            "SELECT * FROM files WHERE owner_id = ? AND file_hash = ? AND {REAL_HASH}"
        ))
        .bind(owner_id)
        .bind(hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn find_global_real_by_hash(&self, hash: &str) -> MetadataResult<Option<FileRow>> {
        let row = sqlx::query_as::<_, FileRow>(&format!(
            "SELECT * FROM files WHERE file_hash = ? AND {REAL_HASH}"
        ))
        .bind(hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn find_owner_shared(&self, owner_id: i64) -> MetadataResult<Vec<FileRow>> {
        let rows = sqlx::query_as::<_, FileRow>(&format!(
            "SELECT * FROM files WHERE owner_id = ? AND NOT ({REAL_HASH})"
        ))
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn count_other_real_with_hash(
        &self,
        hash: &str,
        exclude_id: i64,
    ) -> MetadataResult<u64> {
        let (count,): (i64,) = sqlx::query_as(&format!(
            "SELECT COUNT(*) FROM files WHERE file_hash = ? AND id != ? AND {REAL_HASH}"
        ))
        .bind(hash)
        .bind(exclude_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count as u64)
    }

    async fn find_by_id(&self, id: i64) -> MetadataResult<Option<FileRow>> {
        let row = sqlx::query_as::<_, FileRow>("SELECT * FROM files WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn find_by_owner_and_id(
        &self,
        owner_id: i64,
        id: i64,
    ) -> MetadataResult<Option<FileRow>> {
        let row =
            sqlx::query_as::<_, FileRow>("SELECT * FROM files WHERE id = ? AND owner_id = ?")
                .bind(id)
                .bind(owner_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row)
    }

    async fn delete_by_id(&self, id: i64) -> MetadataResult<()> {
        sqlx::query("DELETE FROM files WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_by_owner(
        &self,
        owner_id: i64,
        page: u32,
        page_size: u32,
    ) -> MetadataResult<FilePage> {
        let (total,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM files WHERE owner_id = ?")
            .bind(owner_id)
            .fetch_one(&self.pool)
            .await?;

        let offset = (page.saturating_sub(1) as i64) * page_size as i64;
        let files = sqlx::query_as::<_, FileRow>(
            "SELECT * FROM files WHERE owner_id = ? ORDER BY id LIMIT ? OFFSET ?",
        )
        .bind(owner_id)
        .bind(page_size as i64)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(FilePage {
            files,
            total: total as u64,
        })
    }

    async fn search(
        &self,
        filter: &FileSearch,
        page: u32,
        page_size: u32,
    ) -> MetadataResult<FilePage> {
        let mut conditions = Vec::new();
        if filter.name.is_some() {
            conditions.push("file_name LIKE ?");
        }
        if filter.backend.is_some() {
            conditions.push("backend = ?");
        }
        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let name_pattern = filter.name.as_ref().map(|n| format!("%{n}%"));

        let count_query = format!("SELECT COUNT(*) FROM files {where_clause}");
        let mut count = sqlx::query_as::<_, (i64,)>(&count_query);
        if let Some(pattern) = &name_pattern {
            count = count.bind(pattern);
        }
        if let Some(backend) = &filter.backend {
            count = count.bind(backend);
        }
        let (total,) = count.fetch_one(&self.pool).await?;

        let offset = (page.saturating_sub(1) as i64) * page_size as i64;
        let list_query = format!(
            "SELECT * FROM files {where_clause} ORDER BY created_at DESC LIMIT ? OFFSET ?"
        );
        let mut list = sqlx::query_as::<_, FileRow>(&list_query);
        if let Some(pattern) = &name_pattern {
            list = list.bind(pattern);
        }
        if let Some(backend) = &filter.backend {
            list = list.bind(backend);
        }
        let files = list
            .bind(page_size as i64)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        Ok(FilePage {
            files,
            total: total as u64,
        })
    }
}
