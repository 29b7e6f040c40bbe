use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde_json::Value;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers::{self, from_millis, to_millis};

/// One stored document.
#[derive(Clone, Debug, PartialEq)]
pub struct Document {
    pub key: String,
    pub body: Value,
    pub created_at: DateTime<Utc>,
}

/// Creation-time window for [`DocumentStore::count`]. Bounds are
/// `[from, before)`; `None` leaves that side open.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CreatedFilter {
    pub from: Option<DateTime<Utc>>,
    pub before: Option<DateTime<Utc>>,
}

impl CreatedFilter {
    pub fn between(from: DateTime<Utc>, before: DateTime<Utc>) -> Self {
        Self {
            from: Some(from),
            before: Some(before),
        }
    }
}

/// The document-store collaborator `StateStore` is built on.
pub trait DocumentStore: Send + Sync {
    /// Insert or replace the document at `(collection, key)`. An update
    /// keeps the original `created_at`.
    fn upsert(&self, collection: &str, key: &str, body: &Value, created_at: DateTime<Utc>) -> Result<(), StoreError>;

    fn find(&self, collection: &str, key: &str) -> Result<Option<Document>, StoreError>;

    fn count(&self, collection: &str, filter: CreatedFilter) -> Result<u64, StoreError>;

    /// Newest first.
    fn recent(&self, collection: &str, limit: usize) -> Result<Vec<Document>, StoreError>;

    /// Delete the `n` oldest documents by `created_at`; returns their keys.
    fn delete_oldest(&self, collection: &str, n: usize) -> Result<Vec<String>, StoreError>;

    /// Atomically add `by` to a named counter, creating it at zero first.
    /// Returns the new value.
    fn increment(&self, counter: &str, by: i64) -> Result<i64, StoreError>;

    /// Like [`increment`](Self::increment), but applied at most once per
    /// `token`: repeating a token leaves the counter alone and returns its
    /// current value.
    fn increment_once(&self, counter: &str, token: &str, by: i64) -> Result<i64, StoreError>;

    /// Current counter value; zero if it was never incremented.
    fn counter(&self, counter: &str) -> Result<i64, StoreError>;
}

const TABLE: &str = "documents";

const INCREMENT: &str = "INSERT INTO counters (key, value, updated_at) VALUES (?1, ?2, ?3)
     ON CONFLICT(key) DO UPDATE SET
        value = value + excluded.value,
        updated_at = excluded.updated_at
     RETURNING value";

fn row_to_document(row: &rusqlite::Row<'_>) -> Result<Document, StoreError> {
    let key: String = row_helpers::get(row, 0, TABLE, "key")?;
    let raw: String = row_helpers::get(row, 1, TABLE, "body")?;
    let created: i64 = row_helpers::get(row, 2, TABLE, "created_at")?;
    Ok(Document {
        key,
        body: row_helpers::parse_json(&raw, TABLE, "body")?,
        created_at: from_millis(created, TABLE, "created_at")?,
    })
}

/// [`DocumentStore`] over the SQLite [`Database`].
#[derive(Clone)]
pub struct SqliteDocumentStore {
    db: Database,
}

impl SqliteDocumentStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}

impl DocumentStore for SqliteDocumentStore {
    fn upsert(&self, collection: &str, key: &str, body: &Value, created_at: DateTime<Utc>) -> Result<(), StoreError> {
        let raw = serde_json::to_string(body)?;
        let now = to_millis(Utc::now());
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO documents (collection, key, body, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(collection, key) DO UPDATE SET
                    body = excluded.body,
                    updated_at = excluded.updated_at",
                params![collection, key, raw, to_millis(created_at), now],
            )
            .map_err(StoreError::write("upsert"))?;
            Ok(())
        })
    }

    fn find(&self, collection: &str, key: &str) -> Result<Option<Document>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare_cached(
                    "SELECT key, body, created_at FROM documents
                     WHERE collection = ?1 AND key = ?2",
                )
                .map_err(StoreError::read("find"))?;
            let found = stmt
                .query_row(params![collection, key], |row| Ok(row_to_document(row)))
                .optional()
                .map_err(StoreError::read("find"))?;
            found.transpose()
        })
    }

    fn count(&self, collection: &str, filter: CreatedFilter) -> Result<u64, StoreError> {
        self.db.with_conn(|conn| {
            let n: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM documents
                     WHERE collection = ?1
                       AND (?2 IS NULL OR created_at >= ?2)
                       AND (?3 IS NULL OR created_at < ?3)",
                    params![
                        collection,
                        filter.from.map(to_millis),
                        filter.before.map(to_millis)
                    ],
                    |row| row.get(0),
                )
                .map_err(StoreError::read("count"))?;
            Ok(n.max(0) as u64)
        })
    }

    fn recent(&self, collection: &str, limit: usize) -> Result<Vec<Document>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT key, body, created_at FROM documents
                     WHERE collection = ?1
                     ORDER BY created_at DESC, key DESC
                     LIMIT ?2",
                )
                .map_err(StoreError::read("recent"))?;
            let rows = stmt
                .query_map(params![collection, limit as i64], |row| Ok(row_to_document(row)))
                .map_err(StoreError::read("recent"))?
                .collect::<Result<Vec<_>, _>>()
                .map_err(StoreError::read("recent"))?;
            rows.into_iter().collect()
        })
    }

    fn delete_oldest(&self, collection: &str, n: usize) -> Result<Vec<String>, StoreError> {
        if n == 0 {
            return Ok(Vec::new());
        }
        self.db.with_tx("delete_oldest", |tx| {
            let keys: Vec<String> = {
                let mut stmt = tx
                    .prepare(
                        "SELECT key FROM documents
                         WHERE collection = ?1
                         ORDER BY created_at ASC, key ASC
                         LIMIT ?2",
                    )
                    .map_err(StoreError::read("delete_oldest"))?;
                let keys = stmt
                    .query_map(params![collection, n as i64], |row| row.get(0))
                    .map_err(StoreError::read("delete_oldest"))?
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(StoreError::read("delete_oldest"))?;
                keys
            };
            for key in &keys {
                tx.execute(
                    "DELETE FROM documents WHERE collection = ?1 AND key = ?2",
                    params![collection, key],
                )
                .map_err(StoreError::write("delete_oldest"))?;
            }
            Ok(keys)
        })
    }

    fn increment(&self, counter: &str, by: i64) -> Result<i64, StoreError> {
        let now = to_millis(Utc::now());
        self.db.with_conn(|conn| {
            conn.query_row(INCREMENT, params![counter, by, now], |row| row.get(0))
                .map_err(StoreError::write("increment"))
        })
    }

    fn increment_once(&self, counter: &str, token: &str, by: i64) -> Result<i64, StoreError> {
        let now = to_millis(Utc::now());
        self.db.with_tx("increment_once", |tx| {
            let marked = tx
                .execute(
                    "INSERT INTO counter_marks (counter, token, created_at) VALUES (?1, ?2, ?3)
                     ON CONFLICT(counter, token) DO NOTHING",
                    params![counter, token, now],
                )
                .map_err(StoreError::write("increment_once"))?;
            if marked == 1 {
                tx.query_row(INCREMENT, params![counter, by, now], |row| row.get(0))
                    .map_err(StoreError::write("increment_once"))
            } else {
                tx.query_row(
                    "SELECT COALESCE((SELECT value FROM counters WHERE key = ?1), 0)",
                    [counter],
                    |row| row.get(0),
                )
                .map_err(StoreError::read("increment_once"))
            }
        })
    }

    fn counter(&self, counter: &str) -> Result<i64, StoreError> {
        self.db.with_conn(|conn| {
            let value: Option<i64> = conn
                .query_row("SELECT value FROM counters WHERE key = ?1", [counter], |row| row.get(0))
                .optional()
                .map_err(StoreError::read("counter"))?;
            Ok(value.unwrap_or(0))
        })
    }
}
