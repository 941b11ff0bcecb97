//! Repository for the `agents` table (`spec.md` §3 "Agent", §4.8 State
//! Poller).
//!
//! Stays untyped on `state`/`state_confidence`: the state lattice itself
//! (`AgentState`, `Confidence`) lives in `forge-daemon`'s state engine, which
//! depends on this crate rather than the other way around. Callers pass
//! their `Display`-rendered strings straight through.

use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentRepoError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("agent not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, AgentRepoError>;

#[derive(Debug, Clone)]
pub struct AgentRecord {
    pub id: String,
    pub workspace_id: String,
    pub pane: String,
    pub agent_type: String,
    pub state: String,
    pub state_confidence: String,
    pub state_reason: Option<String>,
    pub state_detected_at: Option<String>,
    pub paused_until: Option<String>,
    pub account_id: Option<String>,
}

const AGENT_COLUMNS: &str = "id, workspace_id, pane, agent_type, state, state_confidence, \
     state_reason, state_detected_at, paused_until, account_id";

fn row_to_agent(row: &rusqlite::Row) -> rusqlite::Result<AgentRecord> {
    Ok(AgentRecord {
        id: row.get("id")?,
        workspace_id: row.get("workspace_id")?,
        pane: row.get("pane")?,
        agent_type: row.get("agent_type")?,
        state: row.get("state")?,
        state_confidence: row.get("state_confidence")?,
        state_reason: row.get("state_reason")?,
        state_detected_at: row.get("state_detected_at")?,
        paused_until: row.get("paused_until")?,
        account_id: row.get("account_id")?,
    })
}

pub fn register(
    conn: &Connection,
    id: &str,
    workspace_id: &str,
    pane: &str,
    agent_type: &str,
) -> Result<AgentRecord> {
    conn.execute(
        "INSERT INTO agents (id, workspace_id, pane, agent_type) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(workspace_id, pane) DO UPDATE SET agent_type = excluded.agent_type",
        params![id, workspace_id, pane, agent_type],
    )?;
    get(conn, id)?.ok_or_else(|| AgentRepoError::NotFound(id.to_string()))
}

pub fn get(conn: &Connection, id: &str) -> Result<Option<AgentRecord>> {
    Ok(conn
        .query_row(
            &format!("SELECT {AGENT_COLUMNS} FROM agents WHERE id = ?1"),
            params![id],
            row_to_agent,
        )
        .optional()?)
}

/// List every agent, ordered by id, for the poller's scan pass.
pub fn list_all(conn: &Connection) -> Result<Vec<AgentRecord>> {
    let mut stmt = conn.prepare(&format!("SELECT {AGENT_COLUMNS} FROM agents ORDER BY id"))?;
    let rows = stmt.query_map([], row_to_agent)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

/// Current state string only, for cheap dispatch-gating reads
/// (`spec.md` §4.9 "only dispatch to an `idle` agent").
pub fn get_state(conn: &Connection, id: &str) -> Result<Option<String>> {
    Ok(conn
        .query_row("SELECT state FROM agents WHERE id = ?1", params![id], |row| {
            row.get(0)
        })
        .optional()?)
}

/// Persist a freshly detected state. `detected_at` is an RFC3339 timestamp
/// supplied by the caller (never computed here, so tests stay deterministic).
pub fn update_state(
    conn: &Connection,
    id: &str,
    state: &str,
    confidence: &str,
    reason: &str,
    detected_at: &str,
) -> Result<()> {
    let n = conn.execute(
        "UPDATE agents SET state = ?1, state_confidence = ?2, state_reason = ?3, state_detected_at = ?4
         WHERE id = ?5",
        params![state, confidence, reason, detected_at, id],
    )?;
    if n == 0 {
        return Err(AgentRepoError::NotFound(id.to_string()));
    }
    Ok(())
}

pub fn set_paused_until(conn: &Connection, id: &str, paused_until: Option<&str>) -> Result<()> {
    conn.execute(
        "UPDATE agents SET paused_until = ?1 WHERE id = ?2",
        params![paused_until, id],
    )?;
    Ok(())
}
