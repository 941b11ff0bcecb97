//! Library surface for `forged`: the plugin registry, mail hub/relay plugins,
//! worker (state engine/poller) plugins, roster tracking, and the Unix
//! socket daemon that wires them together.

pub mod daemon;
pub mod exec;
pub mod loop_runtime;
pub mod mail_relay;
pub mod mail_server;
pub mod plugin;
pub mod plugins;
pub mod roster;
pub mod scheduler;
pub mod state_poller;
