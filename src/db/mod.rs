//! SQLite store for companies, mail accounts, messages, matching rules and schedule records.
//!
//! Each table gets its own `impl Database` block in a submodule; this module
//! owns the pool and migrations.

use std::fs;
use std::path::Path;
use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection};
use tracing::{debug, info};

use crate::config::DatabaseConfig;
use crate::error::Result;
use crate::schema::email_messages;

mod accounts;
mod companies;
mod messages;
mod patterns;
mod schedule;

// Type alias for the database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConnection = r2d2::PooledConnection<SqliteConnectionManager>;

const DEFAULT_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Pragmas applied to every pooled connection
const CONNECTION_PRAGMAS: &str =
    "PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;";

/// Database manager for handling connections and operations
#[derive(Clone)]
pub struct Database {
    pool: DbPool,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("connections", &self.pool.state().connections)
            .finish()
    }
}

impl Database {
    /// Open (creating if needed) the database at `database_url` with default pool settings
    pub fn new(database_url: &str) -> Result<Self> {
        Self::with_options(database_url, DEFAULT_MAX_CONNECTIONS, DEFAULT_CONNECTION_TIMEOUT)
    }

    /// Open the database described by the `[database]` config section
    pub fn from_config(config: &DatabaseConfig) -> Result<Self> {
        Self::with_options(
            &config.url,
            config.max_connections,
            Duration::from_secs(config.connection_timeout_secs),
        )
    }

    /// Open the database with explicit pool size and checkout timeout
    pub fn with_options(database_url: &str, max_connections: u32, timeout: Duration) -> Result<Self> {
        let path = database_path_from_url(database_url);

        // Create parent directory if it doesn't exist
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let manager = SqliteConnectionManager::file(path)
            .with_init(|conn: &mut Connection| conn.execute_batch(CONNECTION_PRAGMAS));
        let pool = Pool::builder()
            .max_size(max_connections)
            .connection_timeout(timeout)
            .build(manager)?;

        let conn = pool.get()?;
        Self::run_migrations(&conn)?;
        info!(path, max_connections, "Database ready");

        Ok(Self { pool })
    }

    /// Run database migrations
    fn run_migrations(conn: &Connection) -> Result<()> {
        conn.execute_batch(include_str!(
            "../../migrations/2026-01-10-000000_create_tables/up.sql"
        ))?;

        // ALTER TABLE has no IF NOT EXISTS form, so check for the column first
        let has_ai_columns: bool = conn.query_row(
            "SELECT COUNT(*) > 0 FROM pragma_table_info(?1) WHERE name = ?2",
            params![email_messages::TABLE, email_messages::AI_PROCESSED],
            |row| row.get(0),
        )?;
        if !has_ai_columns {
            debug!("Adding AI processing columns");
            conn.execute_batch(include_str!(
                "../../migrations/2026-02-02-000000_add_ai_processing/up.sql"
            ))?;
        }

        Ok(())
    }

    /// Get a connection from the pool
    pub fn get_connection(&self) -> Result<DbConnection> {
        Ok(self.pool.get()?)
    }

    /// Run store calls on the blocking thread pool from async code
    pub async fn run_blocking<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Self) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.clone();
        tokio::task::spawn_blocking(move || f(&db)).await?
    }
}

/// Strip the `sqlite:` / `sqlite://` scheme from a database URL.
#[must_use]
pub fn database_path_from_url(database_url: &str) -> &str {
    database_url
        .strip_prefix("sqlite://")
        .or_else(|| database_url.strip_prefix("sqlite:"))
        .unwrap_or(database_url)
}

/// Collect mapped rows into a `Vec`
fn collect_rows<T, I>(rows: I) -> Result<Vec<T>>
where
    I: Iterator<Item = rusqlite::Result<T>>,
{
    Ok(rows.collect::<rusqlite::Result<Vec<T>>>()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_path_from_url() {
        assert_eq!(database_path_from_url("sqlite://data/app.db"), "data/app.db");
        assert_eq!(database_path_from_url("sqlite:data/app.db"), "data/app.db");
        assert_eq!(database_path_from_url("/tmp/app.db"), "/tmp/app.db");
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("app.db").display());
        Database::new(&url).unwrap();
        let db = Database::new(&url).unwrap();
        let conn = db.get_connection().unwrap();
        let fk: i64 = conn.query_row("PRAGMA foreign_keys", [], |row| row.get(0)).unwrap();
        assert_eq!(fk, 1);
    }
}
