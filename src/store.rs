//! Persistent author record store.
//!
//! Records are keyed by author id and written at most once: `put` on an
//! existing id is a no-op that reports `false` (first writer wins).

use crate::author::AuthorRecord;
use crate::error::{ElibError, Result};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};

/// Default database file, relative to the working directory
pub const DEFAULT_DATABASE: &str = "authors.db";

/// Maximum pooled connections; SQLite locks the whole file anyway
const MAX_CONNECTIONS: u32 = 5;

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS authors (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    publishesCount INTEGER NOT NULL,
    zeroCittPublishesCount INTEGER NOT NULL,
    hirshIndex INTEGER NOT NULL
)";

/// Key-value access to stored author records
#[async_trait]
pub trait AuthorStore: Send + Sync {
    async fn exists(&self, author_id: u32) -> Result<bool>;

    async fn get(&self, author_id: u32) -> Result<Option<AuthorRecord>>;

    /// Insert a record; `false` when the id is already stored
    async fn put(&self, record: &AuthorRecord) -> Result<bool>;

    /// Remove a record; `false` when there was nothing to remove
    async fn delete(&self, author_id: u32) -> Result<bool>;

    /// All stored records ordered by id
    async fn list(&self) -> Result<Vec<AuthorRecord>>;
}

/// SQLite-backed store
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

type AuthorRow = (i64, String, i64, i64, i64);

fn to_u32(value: i64, column: &str) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| ElibError::Parse(format!("stored {} out of range: {}", column, value)))
}

fn from_row(row: AuthorRow) -> Result<AuthorRecord> {
    let (id, name, publishes, zero_citt, hirsh) = row;
    Ok(AuthorRecord {
        author_id: to_u32(id, "id")?,
        name,
        publishes_count: to_u32(publishes, "publishesCount")?,
        zero_citt_publishes_count: to_u32(zero_citt, "zeroCittPublishesCount")?,
        hirsh_index: to_u32(hirsh, "hirshIndex")?,
    })
}

impl SqliteStore {
    /// Open (creating if needed) the database file at `path`
    pub async fn open(path: &Path) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.create_table().await?;
        info!(path = %path.display(), "Author store opened");
        Ok(store)
    }

    /// Private database living as long as the store, for tests and dry runs
    pub async fn open_in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool };
        store.create_table().await?;
        Ok(store)
    }

    async fn create_table(&self) -> Result<()> {
        sqlx::query(CREATE_TABLE).execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl AuthorStore for SqliteStore {
    async fn exists(&self, author_id: u32) -> Result<bool> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM authors WHERE id = ?")
            .bind(i64::from(author_id))
            .fetch_one(&self.pool)
            .await?;
        Ok(count > 0)
    }

    async fn get(&self, author_id: u32) -> Result<Option<AuthorRecord>> {
        let row: Option<AuthorRow> = sqlx::query_as(
            "SELECT id, name, publishesCount, zeroCittPublishesCount, hirshIndex FROM authors WHERE id = ?",
        )
        .bind(i64::from(author_id))
        .fetch_optional(&self.pool)
        .await?;
        row.map(from_row).transpose()
    }

    async fn put(&self, record: &AuthorRecord) -> Result<bool> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO authors (id, name, publishesCount, zeroCittPublishesCount, hirshIndex) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(i64::from(record.author_id))
        .bind(&record.name)
        .bind(i64::from(record.publishes_count))
        .bind(i64::from(record.zero_citt_publishes_count))
        .bind(i64::from(record.hirsh_index))
        .execute(&self.pool)
        .await?;

        let inserted = result.rows_affected() == 1;
        if inserted {
            info!(author_id = record.author_id, "Author stored");
        } else {
            debug!(author_id = record.author_id, "Author already stored, keeping first record");
        }
        Ok(inserted)
    }

    async fn delete(&self, author_id: u32) -> Result<bool> {
        let result = sqlx::query("DELETE FROM authors WHERE id = ?")
            .bind(i64::from(author_id))
            .execute(&self.pool)
            .await?;
        let deleted = result.rows_affected() > 0;
        info!(author_id, deleted, "Author delete requested");
        Ok(deleted)
    }

    async fn list(&self) -> Result<Vec<AuthorRecord>> {
        let rows: Vec<AuthorRow> = sqlx::query_as(
            "SELECT id, name, publishesCount, zeroCittPublishesCount, hirshIndex FROM authors ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(from_row).collect()
    }
}

/// In-process store, lost on exit
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<BTreeMap<u32, AuthorRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<u32, AuthorRecord>>> {
        self.records
            .lock()
            .map_err(|_| ElibError::Config("memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl AuthorStore for MemoryStore {
    async fn exists(&self, author_id: u32) -> Result<bool> {
        Ok(self.records()?.contains_key(&author_id))
    }

    async fn get(&self, author_id: u32) -> Result<Option<AuthorRecord>> {
        Ok(self.records()?.get(&author_id).cloned())
    }

    async fn put(&self, record: &AuthorRecord) -> Result<bool> {
        let mut records = self.records()?;
        if records.contains_key(&record.author_id) {
            return Ok(false);
        }
        records.insert(record.author_id, record.clone());
        Ok(true)
    }

    async fn delete(&self, author_id: u32) -> Result<bool> {
        Ok(self.records()?.remove(&author_id).is_some())
    }

    async fn list(&self) -> Result<Vec<AuthorRecord>> {
        Ok(self.records()?.values().cloned().collect())
    }
}
