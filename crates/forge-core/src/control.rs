//! Control protocol message types for live agent stdin/interrupt actions.
//!
//! These payload types are carried inside daemon socket requests (`command:
//! "control"`).  They are versioned independently from the daemon socket
//! protocol via the `v` field.

use serde::{Deserialize, Serialize};

/// Current control payload schema version.
pub const CONTROL_SCHEMA_VERSION: u32 = 1;

/// Request payload for daemon `command: "control"`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ControlRequest {
    /// Control schema version.
    pub v: u32,
    /// Stable idempotency key for this logical request.
    pub request_id: String,
    /// Control message type per protocol spec §3.1 and §3.3.
    ///
    /// - `"control.stdin.request"` for [`ControlAction::Stdin`]
    /// - `"control.interrupt.request"` for [`ControlAction::Interrupt`]
    #[serde(rename = "type")]
    pub msg_type: String,
    /// Signal field required for interrupt requests per protocol spec §3.3.
    ///
    /// Must be `"interrupt"` when `action == ControlAction::Interrupt`.
    /// `None` for all other actions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal: Option<String>,
    /// RFC3339 UTC timestamp from sender.
    pub sent_at: String,
    /// Team namespace.
    pub team: String,
    /// Claude session identifier.
    pub session_id: String,
    /// Target worker identifier.
    pub agent_id: String,
    /// Sender identity.
    pub sender: String,
    /// Control action kind.
    pub action: ControlAction,
    /// Inline stdin payload (UTF-8 text).
    ///
    /// Required for [`ControlAction::Stdin`] requests unless `content_ref` is set.
    /// Serialized as `"content"` per the control protocol spec §3.1.
    #[serde(rename = "content", skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
    /// Optional file reference for oversized stdin payloads.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_ref: Option<ContentRef>,
}

/// Control action kind.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ControlAction {
    Stdin,
    Interrupt,
}

/// Acknowledgement payload returned by the daemon for a control request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ControlAck {
    pub request_id: String,
    pub result: ControlResult,
    pub duplicate: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub acked_at: String,
}

/// Result status for control processing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ControlResult {
    Ok,
    NotLive,
    NotFound,
    Busy,
    Timeout,
    Rejected,
    InternalError,
}

/// File-backed content reference for oversize payloads.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContentRef {
    pub path: String,
    pub size_bytes: u64,
    pub sha256: String,
    pub mime: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
}
