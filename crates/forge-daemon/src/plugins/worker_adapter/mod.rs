//! Worker Adapter Plugin — async agent teammates in tmux panes
//!
//! This plugin enables daemon-managed agent workers that can:
//! - Receive messages via inbox events
//! - Run in isolated tmux panes
//! - Respond asynchronously without blocking the user's terminal
//!
//! ## Components
//!
//! - `trait_def.rs` — WorkerAdapter trait and WorkerHandle
//! - `codex_tmux.rs` — Codex backend implementation
//! - `config.rs` — Configuration parsing from [workers] section
//! - `plugin.rs` — Plugin implementation
//! - `agent_state.rs` — per-agent state machine and tracker
//! - `activity.rs` — idle/busy activity polling
//! - `capture.rs` — pane log tailing
//! - `hook_watcher.rs` — harness hook file watcher
//! - `lifecycle.rs` — worker process lifecycle management
//! - `mock_backend.rs` — test-only backend double
//! - `nudge.rs` — stalled-worker nudge engine
//! - `pubsub.rs` — in-process event fan-out
//! - `router.rs` — message routing/concurrency policy
//! - `tmux_sender.rs` — tmux pane keystroke delivery

pub mod activity;
pub mod agent_state;
pub mod capture;
pub mod codex_tmux;
pub mod config;
pub mod hook_watcher;
pub mod lifecycle;
#[cfg(any(test, feature = "test-support"))]
pub mod mock_backend;
pub mod nudge;
pub mod plugin;
pub mod pubsub;
pub mod router;
pub mod tmux_sender;
pub mod trait_def;

pub use activity::ActivityTracker;
pub use agent_state::{AgentState, AgentStateTracker};
pub use capture::LogTailer;
pub use codex_tmux::CodexTmuxBackend;
pub use config::{AgentConfig, WorkersConfig};
pub use hook_watcher::HookWatcher;
pub use lifecycle::{LifecycleManager, WorkerState};
#[cfg(any(test, feature = "test-support"))]
pub use mock_backend::{MockCall, MockTmuxBackend};
pub use nudge::NudgeEngine;
pub use plugin::WorkerAdapterPlugin;
pub use pubsub::PubSub;
pub use router::{ConcurrencyPolicy, MessageRouter};
pub use trait_def::{WorkerAdapter, WorkerHandle};
