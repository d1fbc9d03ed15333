//! Storage layer for the Warda agent.
//!
//! [`open_database`] returns a pooled, migrated SQLite database for the
//! configuration store. Query helpers live next to the types they load (see
//! `warda-config`), not here.

mod migrations;
mod pool;

pub use migrations::{run_migrations, MigrationError};
pub use pool::{open_database, DbPool, DbRuntimeSettings, PoolError};
