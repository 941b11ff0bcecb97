//! Bridge plugin implementation

use super::config::BridgePluginConfig;
use crate::plugin::{Capability, Plugin, PluginContext, PluginError, PluginMetadata};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Bridge plugin — synchronizes agent inbox queues across machines
pub struct BridgePlugin {
    /// Plugin configuration (populated during init)
    config: Option<BridgePluginConfig>,
}

impl BridgePlugin {
    /// Create a new Bridge plugin instance
    pub fn new() -> Self {
        Self { config: None }
    }
}

impl Default for BridgePlugin {
    fn default() -> Self {
        Self::new()
    }
}

impl Plugin for BridgePlugin {
    fn metadata(&self) -> PluginMetadata {
        PluginMetadata {
            name: "bridge",
            version: "0.1.0",
            description: "Cross-computer queue synchronization via SSH/SFTP",
            capabilities: vec![Capability::EventListener],
        }
    }

    async fn init(&mut self, ctx: &PluginContext) -> Result<(), PluginError> {
        // Parse config from context
        let config_table = ctx.plugin_config("bridge");

        let config = if let Some(table) = config_table {
            BridgePluginConfig::from_toml(table, &ctx.system.hostname)?
        } else {
            // No config section - create disabled default
            let default_table: toml::Table = toml::from_str("enabled = false")
                .map_err(|e| PluginError::Config {
                    message: format!("Failed to create default config: {e}"),
                })?;
            BridgePluginConfig::from_toml(&default_table, &ctx.system.hostname)?
        };

        if !config.is_enabled() {
            info!("Bridge plugin disabled in config");
            self.config = Some(config);
            return Ok(());
        }

        // Log bridge configuration
        info!(
            "Bridge plugin initialized: hostname={}, role={:?}, remotes={}",
            config.local_hostname,
            config.core.role,
            config.registry.len()
        );

        debug!("Bridge sync interval: {} seconds", config.core.sync_interval_secs);

        // Log registered remotes
        for remote in config.registry.remotes() {
            debug!(
                "Registered remote: {} ({}) with {} alias(es)",
                remote.hostname,
                remote.address,
                remote.aliases.len()
            );
        }

        self.config = Some(config);
        Ok(())
    }

    async fn run(&mut self, cancel: CancellationToken) -> Result<(), PluginError> {
        let config = self.config.as_ref().ok_or_else(|| PluginError::Runtime {
            message: "Plugin not initialized".to_string(),
            source: None,
        })?;

        // If disabled, just wait for cancellation
        if !config.is_enabled() {
            cancel.cancelled().await;
            return Ok(());
        }

        info!("Bridge plugin running (sync logic will be implemented in Sprint 8.4)");

        // For now, just wait for cancellation
        // Sprint 8.4 will add the actual sync engine here
        cancel.cancelled().await;

        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), PluginError> {
        if let Some(config) = &self.config
            && config.is_enabled()
        {
            info!("Bridge plugin shutting down");
        }
        Ok(())
    }
}
