//! Agent member schema for team configuration

use crate::model_registry::ModelId;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Backend type for an agent member.
///
/// Distinguishes between Claude Code agents, Codex agents, Gemini agents,
/// generic external agents, and human participants.  The `Human` variant
/// carries a required username.
///
/// # Serialisation
///
/// All variants serialise/deserialise via their display string so they can be
/// stored in `config.json` without schema-breaking changes.
///
/// # Examples
///
/// ```rust
/// use forge_core::schema::agent_member::BackendType;
/// use std::str::FromStr;
///
/// assert_eq!(BackendType::from_str("codex").unwrap(), BackendType::Codex);
/// assert_eq!(
///     BackendType::from_str("human:randlee").unwrap(),
///     BackendType::Human("randlee".to_string())
/// );
/// assert!(BackendType::from_str("human:").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendType {
    /// A Claude Code agent (tmux or in-process).
    ClaudeCode,
    /// A Codex (OpenAI) agent.
    Codex,
    /// A Gemini agent.
    Gemini,
    /// A generic external agent not covered by other variants.
    External,
    /// A human participant identified by username.
    ///
    /// Serialised as `"human:<username>"`.  The username is required;
    /// `"human:"` alone is rejected.
    Human(String),
}

impl fmt::Display for BackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendType::ClaudeCode => write!(f, "claude-code"),
            BackendType::Codex => write!(f, "codex"),
            BackendType::Gemini => write!(f, "gemini"),
            BackendType::External => write!(f, "external"),
            BackendType::Human(username) => write!(f, "human:{username}"),
        }
    }
}

impl FromStr for BackendType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "claude-code" => Ok(BackendType::ClaudeCode),
            "codex" => Ok(BackendType::Codex),
            "gemini" => Ok(BackendType::Gemini),
            "external" => Ok(BackendType::External),
            s if s.starts_with("human:") => {
                let username = &s["human:".len()..];
                if username.is_empty() {
                    Err("'human:' requires a username (e.g., 'human:randlee')".to_string())
                } else {
                    Ok(BackendType::Human(username.to_string()))
                }
            }
            other => Err(format!(
                "Unknown backend type '{other}'. Valid values: claude-code, codex, gemini, external, human:<username>"
            )),
        }
    }
}

impl Serialize for BackendType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for BackendType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        BackendType::from_str(&s).map_err(serde::de::Error::custom)
    }
}

/// Agent member in a team
///
/// Represents a single agent in the team's member list within the team config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentMember {
    /// Unique agent identifier (format: "{name}@{team_name}")
    pub agent_id: String,

    /// Agent instance name (unique within team)
    pub name: String,

    /// Agent capability type (e.g., "general-purpose", "Explore", "Plan")
    pub agent_type: String,

    /// Claude model identifier (legacy string; preserved for Claude Code compatibility)
    pub model: String,

    /// Custom prompt for specialization (null for team-lead)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,

    /// UI color code (e.g., "blue", "green", "yellow")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,

    /// Whether plan mode is required
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_mode_required: Option<bool>,

    /// Unix timestamp in milliseconds when agent joined
    pub joined_at: u64,

    /// Terminal pane ID (empty string if no terminal)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tmux_pane_id: Option<String>,

    /// Current working directory of agent
    pub cwd: String,

    /// Notification subscriptions (usually empty array)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subscriptions: Vec<serde_json::Value>,

    /// Backend type from the Claude Code API (e.g., "tmux", "in-process").
    ///
    /// This field is set by Claude Code itself.  For external agents added
    /// via `atm teams add-member`, use [`external_backend_type`] instead.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_type: Option<String>,

    /// Whether agent is currently running
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,

    /// Unix timestamp in milliseconds of last activity (message sent, message read)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_active: Option<u64>,

    /// Session or agent ID for external agents.
    ///
    /// Stored at `add-member` time or auto-updated by the daemon when a
    /// `session-start` hook event arrives for a matching agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    /// Typed backend for external agents (E.6 semantics).
    ///
    /// Separate from [`backend_type`] to avoid conflicting with the string
    /// values used by the Claude Code API (e.g., `"tmux"`).
    #[serde(rename = "externalBackendType", default, skip_serializing_if = "Option::is_none")]
    pub external_backend_type: Option<BackendType>,

    /// Validated model identifier for external agents.
    ///
    /// Separate from [`model`] (which is preserved for Claude Code
    /// compatibility).  Set by `add-member --model` with registry validation.
    #[serde(rename = "externalModel", default, skip_serializing_if = "Option::is_none")]
    pub external_model: Option<ModelId>,

    /// Unknown fields for forward compatibility
    #[serde(flatten)]
    pub unknown_fields: HashMap<String, serde_json::Value>,
}

impl AgentMember {
    /// Return the effective backend type for this member.
    ///
    /// Prefers [`external_backend_type`] (typed, E.6 semantics) over
    /// [`backend_type`] (legacy string from Claude Code).  If neither is set
    /// returns `None`.
    pub fn effective_backend_type(&self) -> Option<BackendType> {
        if let Some(ref bt) = self.external_backend_type {
            return Some(bt.clone());
        }
        // Fall back to parsing the legacy string field
        if let Some(ref bt_str) = self.backend_type {
            return BackendType::from_str(bt_str).ok();
        }
        None
    }
}
