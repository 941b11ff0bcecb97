//! Identity alias resolution
//!
//! Aliases allow role-based names to map to actual inbox identities.
//! For example, `arch-atm` can resolve to `team-lead`.
//!
//! Aliases are configured in `.atm.toml` under the `[aliases]` section:
//!
//! ```toml
//! [aliases]
//! arch-atm = "team-lead"
//! dev = "worker-1"
//! ```

use std::collections::HashMap;

/// Resolve an identity through the alias table.
///
/// If `name` matches a key in `aliases`, returns the corresponding value.
/// Otherwise returns the original name unchanged (pass-through).
///
/// Alias resolution is case-sensitive and non-recursive: if the resolved
/// value is itself an alias key it is NOT resolved further.
///
/// # Examples
///
/// ```
/// use std::collections::HashMap;
/// use forge_core::config::aliases::resolve_alias;
///
/// let mut aliases = HashMap::new();
/// aliases.insert("arch-atm".to_string(), "team-lead".to_string());
///
/// assert_eq!(resolve_alias("arch-atm", &aliases), "team-lead");
/// assert_eq!(resolve_alias("unknown", &aliases), "unknown");
/// ```
pub fn resolve_alias(name: &str, aliases: &HashMap<String, String>) -> String {
    aliases.get(name).cloned().unwrap_or_else(|| name.to_string())
}
