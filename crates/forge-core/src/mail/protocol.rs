//! Wire protocol types for the Mail Server (`spec.md` §4.4, §6 "Wire
//! protocol (mail)").
//!
//! Line-delimited UTF-8 JSON: one [`Request`] per line in, one or more
//! [`Response`] lines out. `watch` and `relay` keep the connection open and
//! stream additional [`Response::Stream`] envelopes until the client closes
//! or the server sends [`Response::Closed`]. Every request carries
//! `project_id` and `req_id`; every response mirrors `req_id` so pipelined
//! clients can match replies.

use super::types::{MailTarget, Message, Priority};
use serde::{Deserialize, Serialize};

/// One line of client input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub req_id: String,
    pub project_id: String,
    #[serde(flatten)]
    pub cmd: Cmd,
}

/// The command carried by a [`Request`], tagged on the wire by `cmd`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum Cmd {
    Send {
        from: String,
        to: String,
        body: String,
        #[serde(default)]
        priority: Priority,
        #[serde(default)]
        reply_to: Option<String>,
        #[serde(default)]
        tags: Vec<String>,
    },
    Log {
        target: String,
        #[serde(default)]
        since: Option<String>,
        #[serde(default)]
        until: Option<String>,
        #[serde(default)]
        from: Option<String>,
        #[serde(default)]
        tag: Option<String>,
        #[serde(default)]
        priority: Option<Priority>,
        #[serde(default)]
        limit: Option<usize>,
    },
    Watch {
        #[serde(default)]
        topic: Option<String>,
        #[serde(default)]
        from: Option<String>,
        #[serde(default)]
        to: Option<String>,
        #[serde(default)]
        priority_min: Option<Priority>,
        #[serde(default)]
        tags: Vec<String>,
        #[serde(default)]
        since: Option<String>,
    },
    Who,
    Status,
    Topics,
    Gc {
        #[serde(default)]
        days: Option<i64>,
        #[serde(default)]
        dry_run: bool,
    },
    Register {
        name: String,
        #[serde(default)]
        host: Option<String>,
    },
    Relay {
        #[serde(default)]
        since: Option<String>,
    },
}

impl Cmd {
    pub fn name(&self) -> &'static str {
        match self {
            Cmd::Send { .. } => "send",
            Cmd::Log { .. } => "log",
            Cmd::Watch { .. } => "watch",
            Cmd::Who => "who",
            Cmd::Status => "status",
            Cmd::Topics => "topics",
            Cmd::Gc { .. } => "gc",
            Cmd::Register { .. } => "register",
            Cmd::Relay { .. } => "relay",
        }
    }
}

/// Stable machine-readable error codes (`spec.md` §4.4, §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidTopic,
    InvalidAgent,
    BodyTooLarge,
    NotFound,
    ProjectMismatch,
    RelayBusy,
    ProtocolError,
    Conflict,
    Internal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
}

/// One line of server output. A single request produces one or more of
/// these; `watch`/`relay` keep producing [`Response::Stream`] lines until
/// the connection closes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Response {
    Ack(AckBody),
    Stream(StreamBody),
    Closed { req_id: String, event: &'static str },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckBody {
    pub ok: bool,
    pub req_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<Message>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agents: Option<Vec<super::types::AgentRecord>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topics: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub removed: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl AckBody {
    pub fn ok(req_id: impl Into<String>) -> Self {
        Self {
            ok: true,
            req_id: req_id.into(),
            id: None,
            messages: None,
            total: None,
            agents: None,
            topics: None,
            removed: None,
            project_id: None,
            uptime_seconds: None,
            error: None,
        }
    }

    pub fn err(req_id: impl Into<String>, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            req_id: req_id.into(),
            id: None,
            messages: None,
            total: None,
            agents: None,
            topics: None,
            removed: None,
            project_id: None,
            uptime_seconds: None,
            error: Some(ErrorBody {
                code,
                message: message.into(),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamBody {
    pub req_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub msg: Option<Message>,
}

/// Parse a `topic` or `@agent` target string into a validated
/// [`MailTarget`], mapping validation failures to the wire error code a
/// client expects.
pub fn parse_target(raw: &str) -> Result<MailTarget, ErrorBody> {
    MailTarget::parse(raw).map_err(|e| {
        let code = if raw.starts_with('@') {
            ErrorCode::InvalidAgent
        } else {
            ErrorCode::InvalidTopic
        };
        ErrorBody {
            code,
            message: e.to_string(),
        }
    })
}
