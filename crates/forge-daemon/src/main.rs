//! forged - background orchestrator for forge's mail hub, relay, state engine, scheduler, and loop runtime

use anyhow::{Context, Result};
use forge_daemon::daemon;
use forge_daemon::daemon::{new_launch_sender, new_pubsub_store, new_session_registry, new_state_store, StatusWriter};
use forge_daemon::plugin::{MailService, PluginContext, PluginRegistry};
use forge_daemon::roster::RosterService;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// forged - background orchestrator for forge's mail hub, relay, state engine, scheduler, and loop runtime
#[derive(Parser, Debug)]
#[command(name = "forged")]
#[command(about = "Background orchestrator for forge: mail hub/relay, state engine, scheduler, loop runtime")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Team name to monitor (default: all teams)
    #[arg(long, value_name = "NAME")]
    team: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Run in background/daemon mode (future: fork/detach)
    #[arg(short, long)]
    daemon: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    info!("forged starting...");

    if args.daemon {
        info!("Daemon mode requested (note: fork/detach not yet implemented)");
    }

    // Determine home and current directories for config resolution
    let home_dir = forge_core::home::get_home_dir()
        .context("Failed to determine home directory")?;

    let current_dir = std::env::current_dir()
        .context("Failed to get current directory")?;

    // Load configuration
    let config_overrides = forge_core::config::ConfigOverrides {
        config_path: args.config.clone(),
        team: args.team.clone(),
        ..Default::default()
    };

    let config = forge_core::config::resolve_config(&config_overrides, &current_dir, &home_dir)
        .context("Failed to resolve configuration")?;

    if let Some(config_path) = args.config {
        info!("Loaded config from: {}", config_path.display());
    } else {
        info!("Using resolved configuration");
    }

    // Build system context
    let claude_root = home_dir.join(".claude");

    let system_ctx = forge_core::context::SystemContext::new(
        hostname::get()
            .map_err(|e| anyhow::anyhow!("Failed to get hostname: {e}"))?
            .to_string_lossy()
            .to_string(),
        forge_core::context::Platform::detect(),
        claude_root.clone(),
        env!("CARGO_PKG_VERSION").to_string(),
        config.core.default_team.clone(),
    );

    let teams_root = claude_root.join("teams");

    info!("Teams root: {}", teams_root.display());

    // Create mail service and roster service
    let mail_service = MailService::new(teams_root.clone());
    let roster_service = RosterService::new(teams_root.clone());

    // Build plugin context
    let plugin_ctx = PluginContext::new(
        Arc::new(system_ctx),
        Arc::new(mail_service),
        Arc::new(config),
        Arc::new(roster_service),
    );

    // Create plugin registry
    let mut registry = PluginRegistry::new();

    // Create the shared agent state store.  When the worker adapter plugin is
    // enabled we hand the same Arc to both the plugin and the event loop so
    // that the socket server reads live state.  When the plugin is absent the
    // store stays empty; the socket server still starts but returns
    // AGENT_NOT_FOUND for all agent-state queries.
    let state_store = new_state_store();

    // Create the shared pub/sub store.  When the worker adapter plugin is
    // enabled, the plugin's internal pub/sub Arc is captured before registration
    // and used here so CLI subscribe requests and notification delivery share
    // the same registry.  When the plugin is absent an empty store is used.
    let mut pubsub_store = new_pubsub_store();

    // Create the launch channel.  When the worker adapter plugin is enabled we
    // wire the receiver into the plugin and store the sender in the shared
    // LaunchSender so the socket server can forward launch requests.  When the
    // plugin is absent, the sender stays None and the socket server returns
    // LAUNCH_UNAVAILABLE for any "launch" commands.
    let launch_tx = new_launch_sender();

    // Register Worker Adapter plugin if configured
    if let Some(workers_config) = plugin_ctx.plugin_config("workers")
        && workers_config
            .get("enabled")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    {
        let (tx, rx) = tokio::sync::mpsc::channel(16);

        // Store the sender in the shared LaunchSender so the socket server
        // can forward launch requests.
        {
            let mut guard = launch_tx.lock().await;
            *guard = Some(tx);
        }

        // Build the plugin with the shared state store, then capture its
        // internal pub/sub Arc before registering (registration moves the plugin).
        let mut worker_plugin =
            forge_daemon::plugins::worker_adapter::WorkerAdapterPlugin::with_state_store(
                Arc::clone(&state_store),
            );
        pubsub_store = worker_plugin.pubsub_store();
        worker_plugin.set_launch_receiver(rx);
        registry.register(worker_plugin);
        info!("Registered Worker Adapter plugin with launch channel");
    }

    // Register Bridge (Mail Relay) plugin if configured
    if let Some(bridge_config) = plugin_ctx.plugin_config("bridge")
        && bridge_config
            .get("enabled")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    {
        registry.register(forge_daemon::plugins::bridge::BridgePlugin::new());
        info!("Registered Bridge plugin");
    }

    info!("Registered {} plugin(s)", registry.len());

    // Cancellation token shared by the mail server/relay/loop-runtime
    // background tasks spawned below and the plugin registry's own
    // cancellation, created early so every task shares one shutdown signal.
    let cancel_token = CancellationToken::new();

    let mut background_tasks = Vec::new();

    // Mail Server: fmail's line-delimited JSON wire protocol over a Unix
    // socket (and, if configured, an allow-listed TCP listener). Enabled by
    // default since fmail is zero-config; `[mail_server] enabled = false`
    // opts a node out entirely.
    let mail_server_enabled = plugin_ctx
        .plugin_config("mail_server")
        .and_then(|t| t.get("enabled"))
        .and_then(|v| v.as_bool())
        .unwrap_or(true);

    if mail_server_enabled {
        let project_root = current_dir.clone();
        let store = forge_core::mail::MailStore::ensure_root(&project_root)
            .context("Failed to initialize the fmail project store")?;
        let hub = forge_core::mail::MailHub::new(store);
        let mail_server_config =
            forge_daemon::mail_server::MailServerConfig::default_for_project(&project_root);
        info!(
            "Starting mail server on {}",
            mail_server_config.socket_path.display()
        );
        let handle =
            forge_daemon::mail_server::serve(hub.clone(), mail_server_config, cancel_token.clone())
                .await
                .context("Failed to start the mail server")?;
        info!("Mail server listening on {}", handle.socket_path.display());

        // Mail Relay: opt-in, peer-to-peer replication layered on top of the
        // same hub. Only started when peers are actually configured.
        if let Some(relay_config) = plugin_ctx
            .plugin_config("mail_relay")
            .filter(|t| t.get("enabled").and_then(|v| v.as_bool()).unwrap_or(false))
        {
            let peers: Vec<forge_daemon::mail_relay::RelayPeer> = relay_config
                .get("peers")
                .and_then(|v| v.as_array())
                .map(|arr| {
                    arr.iter()
                        .filter_map(|p| {
                            Some(forge_daemon::mail_relay::RelayPeer {
                                id: p.get("id")?.as_str()?.to_string(),
                                addr: p.get("addr")?.as_str()?.to_string(),
                                project_id: p.get("project_id")?.as_str()?.to_string(),
                            })
                        })
                        .collect()
                })
                .unwrap_or_default();
            if peers.is_empty() {
                info!("Mail relay enabled but no peers configured; nothing to relay");
            } else {
                info!("Starting mail relay with {} peer(s)", peers.len());
                let relay_cfg = forge_daemon::mail_relay::RelayConfig {
                    peers,
                    ..Default::default()
                };
                let relay_hub = hub.clone();
                let relay_cancel = cancel_token.clone();
                let relay_root = project_root.clone();
                background_tasks.push(tokio::spawn(async move {
                    forge_daemon::mail_relay::run(relay_hub, relay_cfg, relay_root, relay_cancel).await;
                }));
            }
        }
    }

    // Loop Runtime: a driver task that polls for runnable loops and drives
    // each one to completion via `forge_daemon::loop_runtime::run_loop`.
    // Disabled by default; most nodes only host mail/workers.
    let loop_runtime_enabled = plugin_ctx
        .plugin_config("loop_runtime")
        .and_then(|t| t.get("enabled"))
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    if loop_runtime_enabled {
        let db_path = home_dir.join(".forge").join("forge.db");
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create forge data directory")?;
        }
        let conn = forge_core::db::open(&db_path).context("Failed to open the loop runtime database")?;
        let poll_interval = std::time::Duration::from_secs(5);
        let loop_cancel = cancel_token.clone();
        background_tasks.push(tokio::spawn(async move {
            loop {
                if loop_cancel.is_cancelled() {
                    return;
                }
                match forge_core::db::loops::list_runnable(&conn) {
                    Ok(runnable) => {
                        for l in runnable {
                            info!("driving loop {} ({})", l.id, l.name);
                            let executor: Arc<dyn forge_daemon::exec::Executor> =
                                Arc::new(forge_daemon::exec::LocalExecutor::new());
                            let profile = forge_daemon::loop_runtime::Profile {
                                id: l.profile_id.clone().unwrap_or_else(|| "default".to_string()),
                                harness: "generic".to_string(),
                                command_template: "cat".to_string(),
                                prompt_mode: forge_daemon::loop_runtime::PromptMode::Stdin,
                                env_var: "FORGE_PROMPT".to_string(),
                                extra_args: Vec::new(),
                                auth_home: None,
                            };
                            if let Err(e) = forge_daemon::loop_runtime::run_loop(
                                &conn,
                                &l.id,
                                executor,
                                profile,
                                forge_daemon::loop_runtime::StopConfig::default(),
                                Arc::new(forge_core::ids::SystemClock),
                                loop_cancel.clone(),
                            )
                            .await
                            {
                                tracing::warn!("loop {} exited with error: {e}", l.id);
                            }
                        }
                    }
                    Err(e) => tracing::warn!("failed to list runnable loops: {e}"),
                }
                tokio::select! {
                    _ = loop_cancel.cancelled() => return,
                    _ = tokio::time::sleep(poll_interval) => {}
                }
            }
        }));
    }

    // Create status writer
    let status_writer = Arc::new(StatusWriter::new(
        home_dir.clone(),
        env!("CARGO_PKG_VERSION").to_string(),
    ));
    info!("Status writer initialized: {}", status_writer.status_path().display());

    // Set up signal handlers
    let cancel_for_signals = cancel_token.clone();
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("Failed to create SIGTERM handler");

            tokio::select! {
                _ = ctrl_c => {
                    info!("Received SIGINT (Ctrl+C)");
                }
                _ = sigterm.recv() => {
                    info!("Received SIGTERM");
                }
            }
        }

        #[cfg(not(unix))]
        {
            ctrl_c.await.expect("Failed to listen for Ctrl+C");
            info!("Received Ctrl+C");
        }

        cancel_for_signals.cancel();
    });

    let session_registry = new_session_registry();

    // Run the daemon event loop
    daemon::run(
        &mut registry,
        &plugin_ctx,
        cancel_token,
        status_writer,
        state_store,
        pubsub_store,
        launch_tx,
        session_registry,
    )
    .await
    .context("Daemon event loop failed")?;

    for task in background_tasks {
        let _ = task.await;
    }

    info!("forged shutdown complete");
    Ok(())
}
