//! Opening the agent database.
//!
//! [`open_database`] is the only way the agent gets a pool: it makes sure
//! the database file's directory exists, configures every connection, and
//! applies pending migrations before the pool is handed out. Agent records
//! are read and written from several connections (provisioning, the config
//! worker), so an in-memory database is pinned to a single connection that
//! all of them share.

use std::path::Path;
use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use thiserror::Error;

use crate::migrations::{run_migrations, MigrationError};

const IN_MEMORY: &str = ":memory:";

/// Connection tunables from the `[database]` config section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbRuntimeSettings {
    /// How long a connection waits on a locked database, in milliseconds.
    pub busy_timeout_ms: u64,
    pub pool_max_size: u32,
}

impl Default for DbRuntimeSettings {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5_000,
            pool_max_size: 8,
        }
    }
}

pub type DbPool = Pool<SqliteConnectionManager>;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("failed to create database directory {path}: {source}")]
    CreateDir {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to create database connection pool: {0}")]
    PoolInit(#[from] r2d2::Error),

    #[error("failed to check out a connection for migrations: {0}")]
    Connection(r2d2::Error),

    #[error(transparent)]
    Migration(#[from] MigrationError),
}

/// Opens the agent database at `db_path` and brings its schema up to date.
///
/// # Errors
///
/// Fails if the directory cannot be created, the first connection cannot be
/// opened or configured, or a migration fails.
pub fn open_database(db_path: &str, settings: DbRuntimeSettings) -> Result<DbPool, PoolError> {
    let pool = create_pool(db_path, settings)?;
    let applied = {
        let conn = pool.get().map_err(PoolError::Connection)?;
        run_migrations(&conn)?
    };
    tracing::info!(
        path = db_path,
        applied,
        pool_max_size = pool.max_size(),
        "agent database ready"
    );
    Ok(pool)
}

fn create_pool(db_path: &str, settings: DbRuntimeSettings) -> Result<DbPool, PoolError> {
    let busy_timeout = Duration::from_millis(settings.busy_timeout_ms);
    let (manager, max_size) = if db_path == IN_MEMORY {
        (SqliteConnectionManager::memory(), 1)
    } else {
        ensure_parent_dir(db_path)?;
        (SqliteConnectionManager::file(db_path), settings.pool_max_size)
    };
    let manager = manager.with_init(move |conn| configure(conn, busy_timeout));

    Ok(Pool::builder().max_size(max_size).build(manager)?)
}

fn ensure_parent_dir(db_path: &str) -> Result<(), PoolError> {
    let Some(dir) = Path::new(db_path)
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
    else {
        return Ok(());
    };
    std::fs::create_dir_all(dir).map_err(|source| PoolError::CreateDir {
        path: dir.display().to_string(),
        source,
    })
}

/// WAL journaling, enforced foreign keys and the configured busy timeout.
fn configure(conn: &mut Connection, busy_timeout: Duration) -> rusqlite::Result<()> {
    let mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    // In-memory databases keep journal_mode=memory.
    if !mode.eq_ignore_ascii_case("wal") && mode != "memory" {
        return Err(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CANTOPEN),
            Some(format!("agent database needs WAL, journal_mode is {mode}")),
        ));
    }
    conn.pragma_update(None, "foreign_keys", true)?;
    conn.busy_timeout(busy_timeout)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pragma<T: rusqlite::types::FromSql>(conn: &Connection, name: &str) -> T {
        conn.pragma_query_value(None, name, |row| row.get(0))
            .expect("should read pragma")
    }

    #[test]
    fn file_database_is_configured_and_migrated() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let path = dir.path().join("nested").join("agent.db");
        let settings = DbRuntimeSettings {
            busy_timeout_ms: 1_500,
            pool_max_size: 2,
        };

        let pool = open_database(path.to_str().expect("utf-8 path"), settings)
            .expect("database should open");
        assert!(path.exists(), "parent directory is created on demand");
        assert_eq!(pool.max_size(), 2);

        let conn = pool.get().expect("should get a connection");
        assert_eq!(pragma::<String>(&conn, "journal_mode"), "wal");
        assert_eq!(pragma::<i32>(&conn, "foreign_keys"), 1);
        assert_eq!(pragma::<i32>(&conn, "busy_timeout"), 1_500);

        let agents: i64 = conn
            .query_row("SELECT COUNT(*) FROM agent", [], |row| row.get(0))
            .expect("agent table exists");
        assert_eq!(agents, 0);
    }

    #[test]
    fn in_memory_database_is_one_shared_connection() {
        let pool = open_database(IN_MEMORY, DbRuntimeSettings::default())
            .expect("database should open");
        assert_eq!(pool.max_size(), 1);

        let conn = pool.get().expect("should get a connection");
        assert_eq!(pragma::<String>(&conn, "journal_mode"), "memory");
        conn.execute(
            "INSERT INTO agent (agent_id, agent_name, created_at, updated_at)
             VALUES ('a1', 'Warda', '2024-01-01T00:00:00Z', '2024-01-01T00:00:00Z')",
            [],
        )
        .expect("schema was migrated on the shared connection");
    }

    #[test]
    fn reopening_applies_nothing_new() {
        let dir = tempfile::tempdir().expect("should create temp dir");
        let path = dir.path().join("agent.db");
        let path = path.to_str().expect("utf-8 path");

        drop(open_database(path, DbRuntimeSettings::default()).expect("first open"));
        let pool = open_database(path, DbRuntimeSettings::default()).expect("second open");
        let conn = pool.get().expect("should get a connection");
        assert_eq!(run_migrations(&conn).expect("already migrated"), 0);
    }
}
