//! Bridge plugin configuration parsing and validation

use forge_core::config::{BridgeConfig, HostnameRegistry};
use crate::plugin::PluginError;

/// Bridge plugin configuration (daemon-specific)
#[derive(Debug, Clone)]
pub struct BridgePluginConfig {
    /// Core bridge configuration from forge-core
    pub core: BridgeConfig,

    /// Hostname registry built from remotes
    pub registry: HostnameRegistry,

    /// Resolved local hostname
    pub local_hostname: String,
}

impl BridgePluginConfig {
    /// Parse bridge plugin config from TOML table
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Config parsing fails
    /// - Hostname collisions detected
    /// - Bridge is enabled but has no remotes configured
    pub fn from_toml(table: &toml::Table, system_hostname: &str) -> Result<Self, PluginError> {
        // Parse core bridge config
        let core: BridgeConfig = table
            .clone()
            .try_into()
            .map_err(|e| PluginError::Config {
                message: format!("Failed to parse bridge config: {e}"),
            })?;

        // Resolve local hostname (use config value or system hostname)
        let local_hostname = core
            .local_hostname
            .clone()
            .unwrap_or_else(|| system_hostname.to_string());

        // Build hostname registry from remotes
        let mut registry = HostnameRegistry::new();

        for remote in &core.remotes {
            registry.register(remote.clone()).map_err(|e| {
                PluginError::Config {
                    message: format!("Hostname registry error: {e}"),
                }
            })?;
        }

        // Validate: if bridge is enabled, must have at least one remote
        if core.enabled && registry.is_empty() {
            return Err(PluginError::Config {
                message: "Bridge is enabled but no remotes configured".to_string(),
            });
        }

        Ok(Self {
            core,
            registry,
            local_hostname,
        })
    }

    /// Check if bridge is enabled
    pub fn is_enabled(&self) -> bool {
        self.core.enabled
    }
}
