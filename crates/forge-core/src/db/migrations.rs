//! Idempotent migration runner for the orchestrator database, grounded
//! in this workspace's "write tmp, then atomically swap into place"
//! posture (`io::atomic`) applied here to schema instead of message
//! files: every migration statement is `CREATE ... IF NOT EXISTS`, so
//! re-applying the full list against an already-migrated database is a
//! safe no-op, and a half-applied run (crash mid-migration) simply
//! resumes from whichever statement wasn't yet idempotent-applied.

use super::schema::MIGRATIONS;
use rusqlite::Connection;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("sqlite error applying migration {name}: {source}")]
    Sqlite {
        name: &'static str,
        source: rusqlite::Error,
    },
}

/// A table recording which migrations have been applied, used only to
/// log progress — the `CREATE ... IF NOT EXISTS` bodies are what make
/// this actually idempotent, not this bookkeeping table.
const TRACKING_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    name TEXT PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ','now'))
);
"#;

pub fn apply_migrations(conn: &Connection) -> Result<(), MigrationError> {
    conn.execute_batch(TRACKING_TABLE)
        .map_err(|e| MigrationError::Sqlite {
            name: "schema_migrations",
            source: e,
        })?;
    for (name, sql) in MIGRATIONS {
        conn.execute_batch(sql)
            .map_err(|e| MigrationError::Sqlite { name, source: e })?;
        conn.execute(
            "INSERT OR IGNORE INTO schema_migrations (name) VALUES (?1)",
            [name],
        )
        .map_err(|e| MigrationError::Sqlite { name, source: e })?;
    }
    Ok(())
}

/// A stable fingerprint of the current schema: the normalized (sorted,
/// whitespace-collapsed) `sqlite_master` DDL, hashed with SHA-256. Used
/// for cross-implementation parity checks (`spec.md` §6) — a
/// reimplementation in another language hashes the same normalized dump
/// with SHA-256 and compares fingerprints directly, so this deliberately
/// does not reuse `io::hash::compute_hash`'s BLAKE3 (that one has no
/// cross-language parity requirement; this one does).
pub fn schema_fingerprint(conn: &Connection) -> Result<String, MigrationError> {
    let mut stmt = conn
        .prepare(
            "SELECT sql FROM sqlite_master \
             WHERE sql IS NOT NULL AND name NOT LIKE 'sqlite_%' \
             ORDER BY name",
        )
        .map_err(|e| MigrationError::Sqlite {
            name: "fingerprint",
            source: e,
        })?;
    let rows = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .map_err(|e| MigrationError::Sqlite {
            name: "fingerprint",
            source: e,
        })?;
    let mut normalized = String::new();
    for row in rows {
        let sql = row.map_err(|e| MigrationError::Sqlite {
            name: "fingerprint",
            source: e,
        })?;
        let collapsed: String = sql.split_whitespace().collect::<Vec<_>>().join(" ");
        normalized.push_str(&collapsed);
        normalized.push('\n');
    }
    Ok(crate::io::hash::compute_sha256(normalized.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        apply_migrations(&conn).unwrap();
        apply_migrations(&conn).unwrap(); // must not error on re-apply
        let fp1 = schema_fingerprint(&conn).unwrap();
        let fp2 = schema_fingerprint(&conn).unwrap();
        assert_eq!(fp1, fp2);
    }

    #[test]
    fn schema_fingerprint_is_a_sha256_hex_digest() {
        let conn = Connection::open_in_memory().unwrap();
        apply_migrations(&conn).unwrap();
        let fp = schema_fingerprint(&conn).unwrap();
        assert_eq!(fp.len(), 64, "expected a 64-char hex SHA-256 digest, got {fp:?}");
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn all_principal_tables_exist() {
        let conn = Connection::open_in_memory().unwrap();
        apply_migrations(&conn).unwrap();
        let expected = [
            "nodes",
            "workspaces",
            "agents",
            "accounts",
            "queue_items",
            "events",
            "alerts",
            "transcripts",
            "approvals",
            "port_allocations",
            "loops",
            "loop_runs",
            "loop_kv",
            "loop_work_state",
            "teams",
            "team_members",
            "team_tasks",
            "team_task_events",
            "persistent_agents",
            "persistent_agent_events",
        ];
        for table in expected {
            let count: i64 = conn
                .query_row(
                    "SELECT count(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    [table],
                    |row| row.get(0),
                )
                .unwrap();
            assert_eq!(count, 1, "missing table {table}");
        }
    }
}
