//! Permissions schema for Claude Code settings

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Permissions configuration
///
/// Controls tool access and file reads in Claude Code settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Permissions {
    /// Allowed operations (e.g., "Bash(npm run lint)", "Read(~/.zshrc)")
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow: Vec<String>,

    /// Denied operations
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deny: Vec<String>,

    /// Operations requiring user confirmation
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ask: Vec<String>,

    /// Unknown fields for forward compatibility
    #[serde(flatten)]
    pub unknown_fields: HashMap<String, serde_json::Value>,
}
