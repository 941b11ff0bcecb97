//! Mail domain types: `Message`, `Priority`, `MailTarget`, `AgentRecord`,
//! `Project`. See `spec.md` §3 and §6 for the on-disk JSON shapes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Maximum message body size in bytes. The spec leaves the exact cap as an
/// open question and recommends 256 KiB; we pin that here (see DESIGN.md
/// "Open Question Decisions").
pub const MAX_BODY_BYTES: usize = 256 * 1024;

/// Maximum number of tags on a single message.
pub const MAX_TAGS: usize = 16;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("name must be lowercase kebab-case matching [a-z][a-z0-9-]*: {0:?}")]
    InvalidName(String),
    #[error("topic name cannot begin with '@': {0:?}")]
    TopicStartsWithAt(String),
    #[error("agent target must begin with '@': {0:?}")]
    AgentMissingAt(String),
    #[error("tag must be lowercase kebab-case matching [a-z][a-z0-9-]*: {0:?}")]
    InvalidTag(String),
    #[error("too many tags: {0} (max {max})", max = MAX_TAGS)]
    TooManyTags(usize),
    #[error("body exceeds maximum size of {max} bytes: {actual}", max = MAX_BODY_BYTES)]
    BodyTooLarge { actual: usize },
    #[error("unknown priority: {0:?}")]
    InvalidPriority(String),
}

/// Priority level of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

impl std::str::FromStr for Priority {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Priority::Low),
            "normal" => Ok(Priority::Normal),
            "high" => Ok(Priority::High),
            other => Err(ValidationError::InvalidPriority(other.to_string())),
        }
    }
}

/// Where a message is addressed: a named topic, or a direct message to
/// `@agent`. Constructed via [`MailTarget::parse`], which enforces the
/// naming rules in `spec.md` §3.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MailTarget {
    Topic(String),
    Dm(String),
}

impl MailTarget {
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        if let Some(agent) = raw.strip_prefix('@') {
            validate_name(agent)?;
            Ok(MailTarget::Dm(agent.to_string()))
        } else {
            validate_name(raw)?;
            Ok(MailTarget::Topic(raw.to_string()))
        }
    }

    /// The directory name this target is stored under, relative to
    /// `.fmail/` (`topics/<name>` or `dm/<name>`).
    pub fn store_subdir(&self) -> String {
        match self {
            MailTarget::Topic(t) => format!("topics/{t}"),
            MailTarget::Dm(a) => format!("dm/{a}"),
        }
    }

    /// The wire-format string (`topic` or `@agent`).
    pub fn display(&self) -> String {
        match self {
            MailTarget::Topic(t) => t.clone(),
            MailTarget::Dm(a) => format!("@{a}"),
        }
    }
}

/// Validate a topic or agent name: lowercase kebab, `[a-z][a-z0-9-]*`, no
/// control characters, no `@`, no underscores or spaces.
pub fn validate_name(name: &str) -> Result<(), ValidationError> {
    if name.starts_with('@') {
        return Err(ValidationError::TopicStartsWithAt(name.to_string()));
    }
    let mut chars = name.chars();
    let ok = match chars.next() {
        Some(c) if c.is_ascii_lowercase() => true,
        _ => false,
    };
    let rest_ok = chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if !ok || !rest_ok || name.is_empty() {
        return Err(ValidationError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Normalize and validate a tag set: lowercase, deduplicated, capped at
/// [`MAX_TAGS`].
pub fn normalize_tags(tags: &[String]) -> Result<Vec<String>, ValidationError> {
    if tags.len() > MAX_TAGS {
        return Err(ValidationError::TooManyTags(tags.len()));
    }
    let mut out = Vec::with_capacity(tags.len());
    for tag in tags {
        let lower = tag.to_ascii_lowercase();
        if lower.is_empty()
            || !lower
                .chars()
                .next()
                .map(|c| c.is_ascii_lowercase())
                .unwrap_or(false)
            || !lower
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(ValidationError::InvalidTag(tag.clone()));
        }
        if !out.contains(&lower) {
            out.push(lower);
        }
    }
    Ok(out)
}

/// Auto-detect whether a raw body string should be stored as a JSON value
/// or as a plain string, per `spec.md` §4.2: "trim; if first char is a
/// plausible JSON opener and the payload parses as valid JSON, store as
/// JSON; else as string."
pub fn parse_body(raw: &str) -> serde_json::Value {
    let trimmed = raw.trim();
    let looks_like_json = trimmed
        .chars()
        .next()
        .map(|c| matches!(c, '{' | '[' | '"') || c.is_ascii_digit() || c == '-')
        .unwrap_or(false)
        || trimmed == "true"
        || trimmed == "false"
        || trimmed == "null";
    if looks_like_json {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
            return value;
        }
    }
    serde_json::Value::String(raw.to_string())
}

/// A single mail message. Serialized as one JSON object per file under
/// `.fmail/topics/<topic>/<id>.json` or `.fmail/dm/<recipient>/<id>.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: String,
    pub from: String,
    pub to: String,
    pub time: DateTime<Utc>,
    pub body: serde_json::Value,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// Unknown fields are preserved verbatim on rewrite (round-trip
    /// stability, §6).
    #[serde(flatten)]
    pub unknown_fields: HashMap<String, serde_json::Value>,
}

impl Message {
    pub fn byte_len(&self) -> usize {
        serde_json::to_vec(&self.body).map(|v| v.len()).unwrap_or(0)
    }
}

/// Registry entry for an agent that has sent or registered within a
/// project.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentRecord {
    pub name: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(flatten)]
    pub unknown_fields: HashMap<String, serde_json::Value>,
}

/// The project identity file, `.fmail/project.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Project {
    pub id: String,
    pub created: DateTime<Utc>,
    #[serde(flatten)]
    pub unknown_fields: HashMap<String, serde_json::Value>,
}

/// Options accepted by [`crate::mail::store::MailStore::save_message`].
#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    pub priority: Priority,
    pub reply_to: Option<String>,
    pub tags: Vec<String>,
    pub host: Option<String>,
}
