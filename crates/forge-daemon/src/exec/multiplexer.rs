//! Terminal multiplexer abstraction (`spec.md` §9, "mixed multiplexer
//! assumption").
//!
//! `worker_adapter::tmux_sender` hardcodes `tmux` `Command` invocations
//! directly inside its retry/verification logic. The Loop Runtime needs
//! the same four primitives — does a session exist, create one, inject
//! keys, capture a pane — without the per-delivery retry policy, so they
//! are pulled out behind this trait. [`TmuxMultiplexer`] is the only
//! implementation for now; a future non-tmux backend (`screen`, a
//! headless PTY) would implement the same trait.

use super::ExecError;
use async_trait::async_trait;
use std::process::Command;

#[async_trait]
pub trait Multiplexer: Send + Sync {
    async fn has_session(&self, session: &str) -> Result<bool, ExecError>;
    async fn new_session(&self, session: &str, start_dir: Option<&str>) -> Result<(), ExecError>;
    async fn send_keys(&self, pane_id: &str, keys: &str, enter: bool) -> Result<(), ExecError>;
    async fn capture_pane(&self, pane_id: &str, lines: u32) -> Result<String, ExecError>;
}

#[derive(Debug, Clone, Default)]
pub struct TmuxMultiplexer;

impl TmuxMultiplexer {
    fn run(args: &[&str]) -> Result<std::process::Output, ExecError> {
        Command::new("tmux").args(args).output().map_err(ExecError::Io)
    }

    fn require_success(output: &std::process::Output, what: &str) -> Result<(), ExecError> {
        if output.status.success() {
            return Ok(());
        }
        Err(ExecError::Command(format!(
            "{what} failed: {}",
            String::from_utf8_lossy(&output.stderr)
        )))
    }
}

#[async_trait]
impl Multiplexer for TmuxMultiplexer {
    async fn has_session(&self, session: &str) -> Result<bool, ExecError> {
        let output = Self::run(&["has-session", "-t", session])?;
        Ok(output.status.success())
    }

    async fn new_session(&self, session: &str, start_dir: Option<&str>) -> Result<(), ExecError> {
        let mut args = vec!["new-session", "-d", "-s", session];
        if let Some(dir) = start_dir {
            args.push("-c");
            args.push(dir);
        }
        let output = Self::run(&args)?;
        Self::require_success(&output, &format!("tmux new-session -s {session}"))
    }

    async fn send_keys(&self, pane_id: &str, keys: &str, enter: bool) -> Result<(), ExecError> {
        let output = Self::run(&["send-keys", "-t", pane_id, "-l", keys])?;
        Self::require_success(&output, &format!("tmux send-keys -t {pane_id}"))?;
        if enter {
            let output = Self::run(&["send-keys", "-t", pane_id, "Enter"])?;
            Self::require_success(&output, &format!("tmux send-keys Enter -t {pane_id}"))?;
        }
        Ok(())
    }

    async fn capture_pane(&self, pane_id: &str, lines: u32) -> Result<String, ExecError> {
        let history = format!("-{lines}");
        let output = Self::run(&["capture-pane", "-p", "-t", pane_id, "-S", &history])?;
        Self::require_success(&output, &format!("tmux capture-pane -t {pane_id}"))?;
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
