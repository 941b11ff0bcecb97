//! Repository for the `queue_items` table (`spec.md` §3 "QueueItem", §4.9).
//!
//! Kept deliberately synchronous: `rusqlite::Connection` calls are fast
//! enough that callers hold the shared [`DbHandle`] lock for the duration of
//! one statement and never await while holding it (`spec.md` §5 "Queue: all
//! mutations go through the repository layer").

use crate::ids::Clock;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Shared handle to the orchestrator database, passed to every repository.
pub type DbHandle = Arc<Mutex<Connection>>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("queue item not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, QueueError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueItemType {
    Message,
    Pause,
    Conditional,
}

impl QueueItemType {
    fn as_str(self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::Pause => "pause",
            Self::Conditional => "conditional",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "pause" => Self::Pause,
            "conditional" => Self::Conditional,
            _ => Self::Message,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueItemStatus {
    Pending,
    Dispatched,
    Completed,
    Failed,
    Skipped,
}

impl QueueItemStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Dispatched => "dispatched",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "dispatched" => Self::Dispatched,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            "skipped" => Self::Skipped,
            _ => Self::Pending,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: String,
    pub agent_id: String,
    pub item_type: QueueItemType,
    pub position: i64,
    pub status: QueueItemStatus,
    pub payload: serde_json::Value,
    pub error: Option<String>,
    pub retry_count: i64,
    /// Earliest time this item is eligible for redispatch after a failed
    /// attempt. `None` for an item that has never failed (or that is
    /// terminally `failed`).
    pub next_retry_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Base delay for the first retry (`spec.md` §4.9 "retries with backoff").
/// Doubles per additional failure: 2s, 4s, 8s, ... capped at
/// [`MAX_RETRY_DELAY_SECS`].
const BASE_RETRY_DELAY_SECS: i64 = 2;
const MAX_RETRY_DELAY_SECS: i64 = 300;

fn backoff_delay(retry_count: i64) -> chrono::Duration {
    let secs = BASE_RETRY_DELAY_SECS.saturating_mul(1i64 << retry_count.clamp(0, 32));
    chrono::Duration::seconds(secs.min(MAX_RETRY_DELAY_SECS))
}

fn row_to_item(row: &Row) -> rusqlite::Result<(QueueItem, String)> {
    let payload_text: String = row.get("payload")?;
    let payload = serde_json::from_str(&payload_text).unwrap_or(serde_json::Value::Null);
    let next_retry_at: Option<String> = row.get("next_retry_at")?;
    let next_retry_at = next_retry_at.and_then(|s| {
        chrono::DateTime::parse_from_rfc3339(&s)
            .ok()
            .map(|dt| dt.with_timezone(&chrono::Utc))
    });
    let item = QueueItem {
        id: row.get("id")?,
        agent_id: row.get("agent_id")?,
        item_type: QueueItemType::parse(&row.get::<_, String>("item_type")?),
        position: row.get("position")?,
        status: QueueItemStatus::parse(&row.get::<_, String>("status")?),
        payload,
        error: row.get("error")?,
        retry_count: row.get("retry_count")?,
        next_retry_at,
    };
    Ok((item, row.get("id")?))
}

/// Enqueue a new item for `agent_id` at the next available position
/// (`max(position) + 1`, starting at 0). Positions are monotonic per agent
/// and never reused, so cancelled/completed items don't create gaps that
/// could be refilled.
pub fn enqueue(
    conn: &Connection,
    clock: &dyn Clock,
    agent_id: &str,
    item_type: QueueItemType,
    payload: &serde_json::Value,
) -> Result<QueueItem> {
    let next_position: i64 = conn.query_row(
        "SELECT COALESCE(MAX(position), -1) + 1 FROM queue_items WHERE agent_id = ?1",
        params![agent_id],
        |row| row.get(0),
    )?;
    let id = format!("qi-{}-{:x}", clock.now().timestamp_millis(), rand_suffix());
    let payload_text = serde_json::to_string(payload)?;
    conn.execute(
        "INSERT INTO queue_items (id, agent_id, item_type, position, status, payload)
         VALUES (?1, ?2, ?3, ?4, 'pending', ?5)",
        params![id, agent_id, item_type.as_str(), next_position, payload_text],
    )?;
    Ok(QueueItem {
        id,
        agent_id: agent_id.to_string(),
        item_type,
        position: next_position,
        status: QueueItemStatus::Pending,
        payload: payload.clone(),
        error: None,
        retry_count: 0,
        next_retry_at: None,
    })
}

fn rand_suffix() -> u32 {
    use std::sync::atomic::{AtomicU32, Ordering};
    static COUNTER: AtomicU32 = AtomicU32::new(0);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// List every agent with at least one `pending` item that is currently
/// eligible for dispatch, along with the head (lowest-position pending
/// item) of its queue. An agent whose head item is mid-backoff
/// (`next_retry_at` in the future) is omitted entirely rather than
/// surfacing a later position — the queue stays strict FIFO, so there is
/// nothing to dispatch for that agent until the head becomes eligible
/// again (`spec.md` §4.9 "re-queue with exponential backoff").
pub fn list_pending_heads(conn: &Connection, now: chrono::DateTime<chrono::Utc>) -> Result<Vec<QueueItem>> {
    let now = now.to_rfc3339();
    let mut stmt = conn.prepare(
        "SELECT q.id, q.agent_id, q.item_type, q.position, q.status, q.payload, q.error, q.retry_count, q.next_retry_at
         FROM queue_items q
         WHERE q.status = 'pending'
           AND (q.next_retry_at IS NULL OR q.next_retry_at <= ?1)
           AND q.position = (
             SELECT MIN(position) FROM queue_items
             WHERE agent_id = q.agent_id AND status = 'pending'
           )
         ORDER BY q.agent_id",
    )?;
    let rows = stmt.query_map(params![now], |row| row_to_item(row))?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?.0);
    }
    Ok(out)
}

/// All pending items for one agent, in ascending position order.
pub fn list_pending_for_agent(conn: &Connection, agent_id: &str) -> Result<Vec<QueueItem>> {
    let mut stmt = conn.prepare(
        "SELECT id, agent_id, item_type, position, status, payload, error, retry_count, next_retry_at
         FROM queue_items WHERE agent_id = ?1 AND status = 'pending' ORDER BY position ASC",
    )?;
    let rows = stmt.query_map(params![agent_id], |row| row_to_item(row))?;
    let mut out = Vec::new();
    for row in rows {
        out.push(row?.0);
    }
    Ok(out)
}

pub fn get(conn: &Connection, id: &str) -> Result<Option<QueueItem>> {
    conn.query_row(
        "SELECT id, agent_id, item_type, position, status, payload, error, retry_count, next_retry_at
         FROM queue_items WHERE id = ?1",
        params![id],
        |row| row_to_item(row),
    )
    .optional()?
    .map(|(item, _)| Ok(item))
    .transpose()
}

pub fn mark_status(conn: &Connection, id: &str, status: QueueItemStatus) -> Result<()> {
    let n = conn.execute(
        "UPDATE queue_items SET status = ?1 WHERE id = ?2",
        params![status.as_str(), id],
    )?;
    if n == 0 {
        return Err(QueueError::NotFound(id.to_string()));
    }
    Ok(())
}

/// Record a failed dispatch attempt. While `next_retry <= max_retries` the
/// item goes back to `pending` with `next_retry_at` pushed out by
/// [`backoff_delay`] so the scheduler won't redispatch it immediately
/// (`spec.md` §4.9 "re-queue with exponential backoff up to max_retries,
/// then failed terminal"); once retries are exhausted the item becomes
/// terminally `failed` and `next_retry_at` is cleared.
pub fn mark_failed(
    conn: &Connection,
    clock: &dyn Clock,
    id: &str,
    error: &str,
    max_retries: i64,
) -> Result<QueueItemStatus> {
    let retry_count: i64 = conn.query_row(
        "SELECT retry_count FROM queue_items WHERE id = ?1",
        params![id],
        |row| row.get(0),
    )?;
    let next_retry = retry_count + 1;
    let terminal = next_retry > max_retries;
    let status = if terminal {
        QueueItemStatus::Failed
    } else {
        QueueItemStatus::Pending
    };
    let next_retry_at = if terminal {
        None
    } else {
        Some(clock.now() + backoff_delay(next_retry))
    };
    let next_retry_at_str = next_retry_at.map(|dt| dt.to_rfc3339());
    conn.execute(
        "UPDATE queue_items SET status = ?1, error = ?2, retry_count = ?3, next_retry_at = ?4 WHERE id = ?5",
        params![status.as_str(), error, next_retry, next_retry_at_str, id],
    )?;
    Ok(status)
}

/// Mark every still-`pending` item for `agent_id` as `skipped` (queue
/// cancellation).
pub fn cancel_pending(conn: &Connection, agent_id: &str) -> Result<usize> {
    Ok(conn.execute(
        "UPDATE queue_items SET status = 'skipped' WHERE agent_id = ?1 AND status = 'pending'",
        params![agent_id],
    )?)
}
