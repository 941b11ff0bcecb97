//! Repository for `loops`, `loop_runs`, `loop_kv`, `loop_work_state`
//! (`spec.md` §3 "Loop", §4.10).

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoopRepoError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("loop not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, LoopRepoError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    Stopped,
    Waiting,
    Running,
    Failed,
}

impl LoopState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Waiting => "waiting",
            Self::Running => "running",
            Self::Failed => "failed",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "waiting" => Self::Waiting,
            "running" => Self::Running,
            "failed" => Self::Failed,
            _ => Self::Stopped,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Loop {
    pub id: String,
    pub name: String,
    pub repo_path: String,
    pub profile_id: Option<String>,
    pub pool_id: Option<String>,
    pub base_prompt: String,
    pub interval_seconds: i64,
    pub max_iterations: i64,
    pub max_runtime_seconds: i64,
    pub tags: Vec<String>,
    pub stop_config: serde_json::Value,
    pub state: LoopState,
    pub iteration_count: i64,
    pub started_at: Option<String>,
}

fn row_to_loop(row: &rusqlite::Row) -> rusqlite::Result<Loop> {
    let tags_text: String = row.get("tags")?;
    let stop_config_text: String = row.get("stop_config")?;
    Ok(Loop {
        id: row.get("id")?,
        name: row.get("name")?,
        repo_path: row.get("repo_path")?,
        profile_id: row.get("profile_id")?,
        pool_id: row.get("pool_id")?,
        base_prompt: row.get("base_prompt")?,
        interval_seconds: row.get("interval_seconds")?,
        max_iterations: row.get("max_iterations")?,
        max_runtime_seconds: row.get("max_runtime_seconds")?,
        tags: serde_json::from_str(&tags_text).unwrap_or_default(),
        stop_config: serde_json::from_str(&stop_config_text).unwrap_or(serde_json::Value::Null),
        state: LoopState::parse(&row.get::<_, String>("state")?),
        iteration_count: row.get("iteration_count")?,
        started_at: row.get("started_at")?,
    })
}

const LOOP_COLUMNS: &str = "id, name, repo_path, profile_id, pool_id, base_prompt, interval_seconds, \
     max_iterations, max_runtime_seconds, tags, stop_config, state, iteration_count, started_at";

pub struct NewLoop<'a> {
    pub id: &'a str,
    pub name: &'a str,
    pub repo_path: &'a str,
    pub profile_id: Option<&'a str>,
    pub pool_id: Option<&'a str>,
    pub base_prompt: &'a str,
    pub interval_seconds: i64,
    pub max_iterations: i64,
    pub max_runtime_seconds: i64,
    pub tags: &'a [String],
    pub stop_config: &'a serde_json::Value,
}

pub fn create(conn: &Connection, params: NewLoop<'_>) -> Result<Loop> {
    let tags_text = serde_json::to_string(params.tags)?;
    let stop_config_text = serde_json::to_string(params.stop_config)?;
    conn.execute(
        "INSERT INTO loops (id, name, repo_path, profile_id, pool_id, base_prompt,
            interval_seconds, max_iterations, max_runtime_seconds, tags, stop_config, state)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 'stopped')",
        params![
            params.id,
            params.name,
            params.repo_path,
            params.profile_id,
            params.pool_id,
            params.base_prompt,
            params.interval_seconds,
            params.max_iterations,
            params.max_runtime_seconds,
            tags_text,
            stop_config_text,
        ],
    )?;
    get(conn, params.id)?.ok_or_else(|| LoopRepoError::NotFound(params.id.to_string()))
}

pub fn get(conn: &Connection, id: &str) -> Result<Option<Loop>> {
    Ok(conn
        .query_row(
            &format!("SELECT {LOOP_COLUMNS} FROM loops WHERE id = ?1"),
            params![id],
            row_to_loop,
        )
        .optional()?)
}

pub fn list_runnable(conn: &Connection) -> Result<Vec<Loop>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {LOOP_COLUMNS} FROM loops WHERE state IN ('waiting', 'running')"
    ))?;
    let rows = stmt.query_map([], row_to_loop)?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

pub fn set_state(conn: &Connection, id: &str, state: LoopState) -> Result<()> {
    let n = conn.execute(
        "UPDATE loops SET state = ?1 WHERE id = ?2",
        params![state.as_str(), id],
    )?;
    if n == 0 {
        return Err(LoopRepoError::NotFound(id.to_string()));
    }
    Ok(())
}

pub fn mark_started(conn: &Connection, id: &str, started_at: &str) -> Result<()> {
    conn.execute(
        "UPDATE loops SET state = 'running', started_at = ?1 WHERE id = ?2",
        params![started_at, id],
    )?;
    Ok(())
}

pub fn increment_iteration(conn: &Connection, id: &str) -> Result<i64> {
    conn.execute(
        "UPDATE loops SET iteration_count = iteration_count + 1 WHERE id = ?1",
        params![id],
    )?;
    Ok(conn.query_row(
        "SELECT iteration_count FROM loops WHERE id = ?1",
        params![id],
        |row| row.get(0),
    )?)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopRunStatus {
    Running,
    Succeeded,
    Failed,
}

impl LoopRunStatus {
    fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopRun {
    pub id: String,
    pub loop_id: String,
    pub profile_id: Option<String>,
    pub prompt_source: String,
    pub status: String,
    pub exit_code: Option<i64>,
    pub stdout_tail: Option<String>,
}

pub fn start_run(
    conn: &Connection,
    run_id: &str,
    loop_id: &str,
    profile_id: Option<&str>,
    prompt_source: &str,
) -> Result<()> {
    conn.execute(
        "INSERT INTO loop_runs (id, loop_id, profile_id, prompt_source, status)
         VALUES (?1, ?2, ?3, ?4, 'running')",
        params![run_id, loop_id, profile_id, prompt_source],
    )?;
    Ok(())
}

pub fn finish_run(
    conn: &Connection,
    run_id: &str,
    status: LoopRunStatus,
    exit_code: Option<i32>,
    stdout_tail: &str,
) -> Result<()> {
    conn.execute(
        "UPDATE loop_runs SET status = ?1, exit_code = ?2, stdout_tail = ?3,
            finished_at = strftime('%Y-%m-%dT%H:%M:%fZ','now')
         WHERE id = ?4",
        params![status.as_str(), exit_code, stdout_tail, run_id],
    )?;
    Ok(())
}

/// Get or set a small piece of per-loop key/value state (injected into
/// prompts as extra context).
pub fn kv_set(conn: &Connection, loop_id: &str, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO loop_kv (loop_id, key, value) VALUES (?1, ?2, ?3)
         ON CONFLICT(loop_id, key) DO UPDATE SET value = excluded.value",
        params![loop_id, key, value],
    )?;
    Ok(())
}

pub fn kv_get(conn: &Connection, loop_id: &str, key: &str) -> Result<Option<String>> {
    Ok(conn
        .query_row(
            "SELECT value FROM loop_kv WHERE loop_id = ?1 AND key = ?2",
            params![loop_id, key],
            |row| row.get(0),
        )
        .optional()?)
}

pub fn kv_all(conn: &Connection, loop_id: &str) -> Result<Vec<(String, String)>> {
    let mut stmt = conn.prepare("SELECT key, value FROM loop_kv WHERE loop_id = ?1")?;
    let rows = stmt.query_map(params![loop_id], |row| Ok((row.get(0)?, row.get(1)?)))?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

/// Replace the current work-state pointer for `task`, demoting any prior
/// current row for the same `(loop_id, task)` (`spec.md` §3: "only one
/// LoopWorkState row per (loop, task) is current").
pub fn set_work_state(
    conn: &Connection,
    loop_id: &str,
    task: &str,
    state: &serde_json::Value,
) -> Result<()> {
    let state_text = serde_json::to_string(state)?;
    conn.execute(
        "INSERT INTO loop_work_state (loop_id, task, is_current, state)
         VALUES (?1, ?2, 1, ?3)
         ON CONFLICT(loop_id, task) DO UPDATE SET is_current = 1, state = excluded.state,
            updated_at = strftime('%Y-%m-%dT%H:%M:%fZ','now')",
        params![loop_id, task, state_text],
    )?;
    Ok(())
}

pub fn current_work_state(
    conn: &Connection,
    loop_id: &str,
    task: &str,
) -> Result<Option<serde_json::Value>> {
    let text: Option<String> = conn
        .query_row(
            "SELECT state FROM loop_work_state WHERE loop_id = ?1 AND task = ?2 AND is_current = 1",
            params![loop_id, task],
            |row| row.get(0),
        )
        .optional()?;
    Ok(text.map(|t| serde_json::from_str(&t).unwrap_or(serde_json::Value::Null)))
}
