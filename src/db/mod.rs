//! Database module for session transcripts and remembered facts

pub mod memory;
mod schema;
pub mod session;

use std::path::Path;

use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;

use crate::llm::ChatMessage;
use crate::{Error, Result};

pub use memory::{FACT_CAP, FactRepo, is_duplicate_fact};
pub use schema::SCHEMA_VERSION;
pub use session::{Session, SessionRepo};

/// Database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

/// Pooled database connection
pub type DbConn = PooledConnection<SqliteConnectionManager>;

/// Persists conversation exchanges
pub trait SessionStore: Send + Sync {
    /// Record one user/assistant exchange
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be written
    fn append_exchange(&self, user: &str, assistant: &str) -> Result<()>;

    /// The most recent `max` messages across sessions, oldest first
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be read
    fn load_recent(&self, max: usize) -> Result<Vec<ChatMessage>>;
}

/// Persists durable facts about the user
pub trait FactStore: Send + Sync {
    /// Append facts, skipping near-duplicates
    ///
    /// Returns how many were stored.
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be written
    fn append_facts(&self, facts: &[String]) -> Result<usize>;

    /// All stored facts, oldest first
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be read
    fn list_facts(&self) -> Result<Vec<String>>;

    /// Forget everything
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be written
    fn clear_facts(&self) -> Result<()>;
}

/// Open the database file, creating and migrating it as needed
///
/// # Errors
///
/// Returns error if database cannot be opened or initialized
pub fn init<P: AsRef<Path>>(path: P) -> Result<DbPool> {
    let pool = open(SqliteConnectionManager::file(path), 4)?;
    tracing::info!(version = SCHEMA_VERSION, "database ready");
    Ok(pool)
}

/// Single-connection in-memory database
///
/// Every pooled connection to `:memory:` would be a separate database, so
/// the pool holds exactly one.
///
/// # Errors
///
/// Returns error if database cannot be initialized
pub fn init_memory() -> Result<DbPool> {
    open(SqliteConnectionManager::memory(), 1)
}

fn open(manager: SqliteConnectionManager, max_size: u32) -> Result<DbPool> {
    let pool = Pool::builder()
        .max_size(max_size)
        .build(manager)
        .map_err(pool_error)?;
    schema::init(&*connection(&pool)?)?;
    Ok(pool)
}

pub(crate) fn connection(pool: &DbPool) -> Result<DbConn> {
    pool.get().map_err(pool_error)
}

fn pool_error(e: r2d2::Error) -> Error {
    Error::Database(e.to_string())
}
