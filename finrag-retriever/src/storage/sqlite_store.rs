//! SQLite implementation of the child store.
//!
//! ## Schema
//!
//! ```sql
//! CREATE TABLE child_chunks (
//!     child_id TEXT PRIMARY KEY,       -- <parent_id>:<sequence>
//!     parent_id TEXT NOT NULL,         -- back reference for fan-out
//!     sequence INTEGER NOT NULL,
//!     relative_path TEXT NOT NULL,     -- denormalized for display
//!     char_start INTEGER NOT NULL,
//!     char_end INTEGER NOT NULL,
//!     text TEXT NOT NULL,
//!     prefix TEXT,                     -- context prefix, if any
//!     created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
//!     UNIQUE(parent_id, sequence)
//! );
//! CREATE INDEX idx_child_chunks_parent ON child_chunks(parent_id);
//! ```
//!
//! The database runs in WAL mode so queries can read while an index run
//! writes, with a busy timeout for the brief moments SQLite needs an
//! exclusive lock.

use super::{ChildChunk, ChildStore};
use crate::document::ParentId;
use crate::error::Result;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

const SELECT_COLUMNS: &str =
    "SELECT child_id, parent_id, sequence, relative_path, char_start, char_end, text, prefix FROM child_chunks";

/// SQLite-backed [`ChildStore`]
#[derive(Clone, Debug)]
pub struct SqliteChildStore {
    pool: SqlitePool,
}

impl SqliteChildStore {
    /// Opens (creating if needed) the store at `db_path`.
    pub async fn open(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let pool = SqlitePool::connect_with(
            SqliteConnectOptions::new()
                .filename(db_path)
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
                .busy_timeout(Duration::from_secs(5))
                .create_if_missing(true)
                .auto_vacuum(sqlx::sqlite::SqliteAutoVacuum::Incremental)
                .optimize_on_close(true, 1 << 10),
        )
        .await?;
        Self::new_with_pool(pool).await
    }

    /// In-memory store for tests. A single connection keeps every query on
    /// the same database.
    pub async fn open_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::new_with_pool(pool).await
    }

    async fn new_with_pool(pool: SqlitePool) -> Result<Self> {
        Self::create_tables(&pool).await?;
        Ok(Self { pool })
    }

    async fn create_tables(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS child_chunks (
                child_id TEXT PRIMARY KEY,
                parent_id TEXT NOT NULL,
                sequence INTEGER NOT NULL,
                relative_path TEXT NOT NULL,
                char_start INTEGER NOT NULL,
                char_end INTEGER NOT NULL,
                text TEXT NOT NULL,
                prefix TEXT,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                CONSTRAINT unique_sequence UNIQUE(parent_id, sequence)
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_child_chunks_parent ON child_chunks(parent_id)",
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn row_to_chunk(row: &SqliteRow) -> ChildChunk {
        let sequence: i64 = row.get("sequence");
        let char_start: i64 = row.get("char_start");
        let char_end: i64 = row.get("char_end");
        let parent_id: String = row.get("parent_id");

        ChildChunk {
            id: row.get("child_id"),
            parent_id: ParentId::from(parent_id),
            sequence: sequence as usize,
            relative_path: row.get("relative_path"),
            char_start: char_start as usize,
            char_end: char_end as usize,
            text: row.get("text"),
            prefix: row.get("prefix"),
        }
    }

    async fn insert_chunk<'e, E>(executor: E, chunk: &ChildChunk) -> Result<()>
    where
        E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
    {
        sqlx::query(
            r#"
            INSERT INTO child_chunks
                (child_id, parent_id, sequence, relative_path, char_start, char_end, text, prefix)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(child_id) DO UPDATE SET
                parent_id = excluded.parent_id,
                sequence = excluded.sequence,
                relative_path = excluded.relative_path,
                char_start = excluded.char_start,
                char_end = excluded.char_end,
                text = excluded.text,
                prefix = excluded.prefix
            "#,
        )
        .bind(&chunk.id)
        .bind(chunk.parent_id.as_str())
        .bind(chunk.sequence as i64)
        .bind(&chunk.relative_path)
        .bind(chunk.char_start as i64)
        .bind(chunk.char_end as i64)
        .bind(&chunk.text)
        .bind(chunk.prefix.as_deref())
        .execute(executor)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl ChildStore for SqliteChildStore {
    async fn put(&self, chunk: &ChildChunk) -> Result<()> {
        Self::insert_chunk(&self.pool, chunk).await
    }

    async fn get(&self, child_id: &str) -> Result<Option<ChildChunk>> {
        let row = sqlx::query(&format!("{SELECT_COLUMNS} WHERE child_id = ?1"))
            .bind(child_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(Self::row_to_chunk))
    }

    async fn children_of(&self, parent_id: &ParentId) -> Result<Vec<ChildChunk>> {
        let rows = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE parent_id = ?1 ORDER BY sequence"
        ))
        .bind(parent_id.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(Self::row_to_chunk).collect())
    }

    async fn delete_by_parent(&self, parent_id: &ParentId) -> Result<usize> {
        let result = sqlx::query("DELETE FROM child_chunks WHERE parent_id = ?1")
            .bind(parent_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn replace_children(&self, parent_id: &ParentId, chunks: &[ChildChunk]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM child_chunks WHERE parent_id = ?1")
            .bind(parent_id.as_str())
            .execute(&mut *tx)
            .await?;

        for chunk in chunks {
            Self::insert_chunk(&mut *tx, chunk).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn parent_ids(&self) -> Result<HashSet<ParentId>> {
        let ids: Vec<String> = sqlx::query_scalar("SELECT DISTINCT parent_id FROM child_chunks")
            .fetch_all(&self.pool)
            .await?;
        Ok(ids.into_iter().map(ParentId::from).collect())
    }

    async fn retain_parents(&self, live: &HashSet<ParentId>) -> Result<usize> {
        let stored = self.parent_ids().await?;
        let orphans: Vec<&ParentId> = stored.iter().filter(|id| !live.contains(*id)).collect();
        if orphans.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut removed = 0;
        for parent_id in orphans {
            let result = sqlx::query("DELETE FROM child_chunks WHERE parent_id = ?1")
                .bind(parent_id.as_str())
                .execute(&mut *tx)
                .await?;
            removed += result.rows_affected() as usize;
        }
        tx.commit().await?;

        Ok(removed)
    }

    async fn all_chunks(&self) -> Result<Vec<ChildChunk>> {
        let rows = sqlx::query(&format!("{SELECT_COLUMNS} ORDER BY parent_id, sequence"))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(Self::row_to_chunk).collect())
    }

    async fn count(&self) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM child_chunks")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }
}
