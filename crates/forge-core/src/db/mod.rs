//! Persisted orchestrator database (`spec.md` §6 "Persisted DB schema").
//!
//! fmail itself stays purely file-backed (`mail::store`); this module is
//! for the orchestrator-runtime entities that the spec requires a
//! relational store for (nodes, workspaces, agents, queue items, events,
//! loops, accounts, ...). Backed by `rusqlite` in bundled mode so no
//! external database server is required.

pub mod agents;
pub mod loops;
pub mod migrations;
pub mod queue;
pub mod schema;

use rusqlite::Connection;
use std::path::Path;

pub use migrations::{apply_migrations, schema_fingerprint, MigrationError};

/// Open (creating if absent) the orchestrator database at `path` and
/// bring it up to date.
pub fn open(path: &Path) -> Result<Connection, MigrationError> {
    let conn = Connection::open(path).map_err(|e| MigrationError::Sqlite {
        name: "open",
        source: e,
    })?;
    conn.pragma_update(None, "journal_mode", "WAL")
        .map_err(|e| MigrationError::Sqlite {
            name: "journal_mode",
            source: e,
        })?;
    conn.pragma_update(None, "foreign_keys", true)
        .map_err(|e| MigrationError::Sqlite {
            name: "foreign_keys",
            source: e,
        })?;
    apply_migrations(&conn)?;
    Ok(conn)
}

/// Open an in-memory database, migrated. Used by tests and by any
/// component that doesn't need cross-restart persistence.
pub fn open_in_memory() -> Result<Connection, MigrationError> {
    let conn = Connection::open_in_memory().map_err(|e| MigrationError::Sqlite {
        name: "open_in_memory",
        source: e,
    })?;
    apply_migrations(&conn)?;
    Ok(conn)
}
