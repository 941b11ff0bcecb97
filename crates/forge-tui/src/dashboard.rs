//! Dashboard panel helpers: inbox count reads and session log path resolution.
//!
//! This module does not own any rendering code — that lives in [`crate::ui`].
//! It provides pure functions for computing the data shown in the left panel.

use std::path::{Path, PathBuf};

use forge_core::home::get_home_dir;

/// Read the number of messages in an agent's inbox file.
///
/// Returns `0` when the inbox does not exist, is empty, or cannot be parsed.
/// Never panics or propagates errors — silently returns `0` on any failure.
///
/// # Arguments
///
/// * `home` - ATM home directory (resolved via [`get_home_dir`]).
/// * `team` - Team name.
/// * `agent` - Agent name.
pub fn get_inbox_count(home: &Path, team: &str, agent: &str) -> usize {
    let inbox_path = home
        .join(".claude/teams")
        .join(team)
        .join("inboxes")
        .join(format!("{agent}.json"));

    if !inbox_path.exists() {
        return 0;
    }

    match std::fs::read_to_string(&inbox_path) {
        Ok(content) if !content.trim().is_empty() => {
            serde_json::from_str::<Vec<serde_json::Value>>(&content)
                .map(|v| v.len())
                .unwrap_or(0)
        }
        _ => 0,
    }
}

/// Construct the expected path for an agent's session log file.
///
/// Path pattern:
/// ```text
/// {ATM_HOME}/.config/atm/agent-sessions/{team}/{agent}/output.log
/// ```
///
/// `ATM_HOME` is resolved via [`get_home_dir`], which honours the `ATM_HOME`
/// environment variable before falling back to the platform home directory.
///
/// # Arguments
///
/// * `team`  - Team name.
/// * `agent` - Agent identifier.
pub fn session_log_path(team: &str, agent: &str) -> PathBuf {
    let base = get_home_dir().unwrap_or_default();
    base.join(".config/atm/agent-sessions")
        .join(team)
        .join(agent)
        .join("output.log")
}
