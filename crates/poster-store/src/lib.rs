//! Persistence for posting state: a SQLite document store and the cached
//! [`StateStore`] façade the engine reads and writes through.

pub mod cache;
pub mod database;
pub mod document;
pub mod error;
pub mod row_helpers;
pub mod schema;
pub mod state;

pub use cache::{LruCache, TtlCache};
pub use database::Database;
pub use document::{CreatedFilter, Document, DocumentStore, SqliteDocumentStore};
pub use error::StoreError;
pub use state::{CacheStats, StateStore};
