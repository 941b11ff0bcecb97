//! Team configuration schema

use super::AgentMember;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Team configuration
///
/// Stored at `~/.claude/teams/{team_name}/config.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamConfig {
    /// Team name (matches directory name)
    pub name: String,

    /// Human-readable team purpose
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Unix timestamp in milliseconds when team was created
    pub created_at: u64,

    /// Lead agent ID (format: "team-lead@{team_name}")
    pub lead_agent_id: String,

    /// UUID of session that created the team
    pub lead_session_id: String,

    /// Array of team members (includes team lead as first member)
    pub members: Vec<AgentMember>,

    /// Unknown fields for forward compatibility
    #[serde(flatten)]
    pub unknown_fields: HashMap<String, serde_json::Value>,
}
