//! File access policy enforcement for file references

use anyhow::Result;
use forge_core::config::resolve_settings;
use std::path::Path;

/// Check if a file path is allowed for the destination team
///
/// Returns (is_allowed, rewritten_message).
/// If not allowed, copies file to share directory and returns rewritten message.
pub fn check_file_reference(
    file_path: &Path,
    message_text: &str,
    team_name: &str,
    current_dir: &Path,
    home_dir: &Path,
) -> Result<(bool, String)> {
    // Try to resolve settings for the destination repo
    let settings = resolve_settings(None, current_dir, home_dir);

    // Default policy: only files inside current repo are allowed
    let is_allowed = if let Some(ref settings) = settings {
        // Check permissions in settings
        check_permissions_allow_file(settings, file_path, current_dir)
    } else {
        // No settings found - default to checking if file is in current repo
        is_file_in_repo(file_path, current_dir)
    };

    if is_allowed {
        // File is allowed - return as-is
        Ok((true, String::new()))
    } else {
        // File is not allowed - copy to share directory
        let share_dir = home_dir.join(".config/atm/share").join(team_name);
        std::fs::create_dir_all(&share_dir)?;

        let file_name = file_path
            .file_name()
            .ok_or_else(|| anyhow::anyhow!("Invalid file path"))?;
        let copy_path = share_dir.join(file_name);

        std::fs::copy(file_path, &copy_path)?;

        // Create rewritten message with notice
        let rewritten_message = format!(
            "{}\n\n[atm] File path rewritten to a local share copy for destination access.\nOriginal: {}\nCopy: {}",
            message_text,
            file_path.display(),
            copy_path.display()
        );

        Ok((false, rewritten_message))
    }
}

/// Check if file is within the repo root
fn is_file_in_repo(file_path: &Path, repo_root: &Path) -> bool {
    file_path
        .canonicalize()
        .ok()
        .and_then(|canonical| {
            repo_root
                .canonicalize()
                .ok()
                .map(|repo| canonical.starts_with(repo))
        })
        .unwrap_or(false)
}

/// Check if settings permissions allow the file
fn check_permissions_allow_file(
    settings: &forge_core::schema::SettingsJson,
    file_path: &Path,
    _current_dir: &Path,
) -> bool {
    // If no permissions section, default to allow
    let Some(ref permissions) = settings.permissions else {
        return true;
    };

    // Check deny rules first
    if !permissions.deny.is_empty() {
        for rule in &permissions.deny {
            if file_matches_rule(file_path, rule) {
                return false;
            }
        }
    }

    // Check allow rules
    if !permissions.allow.is_empty() {
        for rule in &permissions.allow {
            if file_matches_rule(file_path, rule) {
                return true;
            }
        }
        // If allow list exists but doesn't match, deny
        return false;
    }

    // No explicit rules - allow by default
    true
}

/// Check if a file path matches a permission rule
fn file_matches_rule(file_path: &Path, rule: &str) -> bool {
    // Simple pattern matching - for MVP, just check if rule is a Read() pattern
    if let Some(inner) = rule.strip_prefix("Read(").and_then(|s| s.strip_suffix(')')) {
        // Extract path pattern from Read() rule
        let pattern = inner.trim();

        // Normalize pattern: remove leading ./
        let normalized_pattern = pattern.strip_prefix("./").unwrap_or(pattern);

        // Handle glob patterns (basic support for **)
        if normalized_pattern.contains("**") {
            // Pattern with ** - match any subdirectory
            let base = normalized_pattern.trim_end_matches("**").trim_end_matches('/');
            return file_path.to_str().map(|p| p.contains(base)).unwrap_or(false);
        }

        // Simple prefix match
        file_path
            .to_str()
            .map(|p| p.contains(normalized_pattern))
            .unwrap_or(false)
    } else {
        false
    }
}
