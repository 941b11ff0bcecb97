//! Settings schema for Claude Code configuration

use super::Permissions;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Claude Code settings
///
/// Stored in:
/// - User scope: `~/.claude/settings.json`
/// - Project scope: `.claude/settings.json`
/// - Local scope: `.claude/settings.local.json`
/// - Managed scope: System-specific locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingsJson {
    /// JSON schema reference
    #[serde(rename = "$schema", default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,

    /// Permissions configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<Permissions>,

    /// Environment variables
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,

    /// Unknown fields for forward compatibility
    /// Includes: hooks, model, status line, plugin settings, etc.
    #[serde(flatten)]
    pub unknown_fields: HashMap<String, serde_json::Value>,
}
