//! Bridge plugin configuration types

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Bridge plugin configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Enable bridge plugin
    #[serde(default)]
    pub enabled: bool,

    /// Local hostname (defaults to system hostname if not specified)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_hostname: Option<String>,

    /// Bridge role (hub or spoke)
    #[serde(default)]
    pub role: BridgeRole,

    /// Sync interval in seconds
    #[serde(default = "default_sync_interval")]
    pub sync_interval_secs: u64,

    /// Remote hosts configuration
    #[serde(default)]
    pub remotes: Vec<RemoteConfig>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            local_hostname: None,
            role: BridgeRole::Spoke,
            sync_interval_secs: default_sync_interval(),
            remotes: Vec::new(),
        }
    }
}

fn default_sync_interval() -> u64 {
    60 // Default: sync every 60 seconds
}

/// Bridge role
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BridgeRole {
    /// Hub role - synchronization point for all spokes
    Hub,
    /// Spoke role - connects to hub for synchronization
    #[default]
    Spoke,
}

/// Remote host configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Remote hostname (canonical name)
    pub hostname: String,

    /// SSH connection string (e.g., "user@host:port" or "user@host")
    pub address: String,

    /// Path to SSH private key (optional, uses default SSH key if not specified)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_key_path: Option<String>,

    /// Aliases for this remote (optional)
    #[serde(default)]
    pub aliases: Vec<String>,
}

/// Hostname registry - manages hostname to remote mapping with alias resolution
#[derive(Debug, Clone)]
pub struct HostnameRegistry {
    /// Map of canonical hostname to RemoteConfig
    remotes: HashMap<String, RemoteConfig>,

    /// Map of alias to canonical hostname
    aliases: HashMap<String, String>,
}

impl HostnameRegistry {
    /// Create a new empty hostname registry
    pub fn new() -> Self {
        Self {
            remotes: HashMap::new(),
            aliases: HashMap::new(),
        }
    }

    /// Register a remote host
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Hostname already registered
    /// - Any alias already registered
    pub fn register(&mut self, remote: RemoteConfig) -> Result<(), String> {
        let canonical = remote.hostname.to_lowercase();

        // Check for hostname collision
        if self.remotes.contains_key(&canonical) {
            return Err(format!("Hostname already registered: {}", remote.hostname));
        }

        // Check for alias collisions
        for alias in &remote.aliases {
            let alias_lower = alias.to_lowercase();
            if self.aliases.contains_key(&alias_lower) {
                return Err(format!("Alias already registered: {alias}"));
            }
            // Also check if alias collides with an existing hostname
            if self.remotes.contains_key(&alias_lower) {
                return Err(format!("Alias '{alias}' collides with existing hostname"));
            }
        }

        // Register all aliases
        for alias in &remote.aliases {
            let alias_lower = alias.to_lowercase();
            self.aliases.insert(alias_lower, canonical.clone());
        }

        // Register the remote
        self.remotes.insert(canonical, remote);

        Ok(())
    }

    /// Resolve an alias to its canonical hostname
    ///
    /// Returns the canonical hostname if the input is an alias,
    /// or the input itself if it's already a canonical hostname.
    /// Returns None if the name is not known.
    pub fn resolve_alias(&self, name: &str) -> Option<&str> {
        let name_lower = name.to_lowercase();

        // Check if it's an alias first
        if let Some(canonical_lower) = self.aliases.get(&name_lower) {
            // Return the original hostname from the RemoteConfig (preserves case)
            return self.remotes.get(canonical_lower).map(|r| r.hostname.as_str());
        }

        // Check if it's a canonical hostname
        if let Some(remote) = self.remotes.get(&name_lower) {
            return Some(remote.hostname.as_str());
        }

        None
    }

    /// Check if a hostname (canonical or alias) is known
    pub fn is_known_hostname(&self, name: &str) -> bool {
        self.resolve_alias(name).is_some()
    }

    /// Get remote configuration by canonical hostname
    pub fn get_remote(&self, hostname: &str) -> Option<&RemoteConfig> {
        let hostname_lower = hostname.to_lowercase();
        self.remotes.get(&hostname_lower)
    }

    /// Get all registered remotes
    pub fn remotes(&self) -> impl Iterator<Item = &RemoteConfig> {
        self.remotes.values()
    }

    /// Check if registry is empty
    pub fn is_empty(&self) -> bool {
        self.remotes.is_empty()
    }

    /// Count of registered remotes
    pub fn len(&self) -> usize {
        self.remotes.len()
    }
}

impl Default for HostnameRegistry {
    fn default() -> Self {
        Self::new()
    }
}
