//! Remote execution: run commands locally, over native SSH, or by shelling
//! out to the system `ssh` binary.
//!
//! All three backends implement the same [`Executor`] trait so the scheduler
//! and loop runtime can dispatch a command without caring where the target
//! agent actually lives.

mod local;
pub mod multiplexer;
#[cfg(feature = "ssh")]
mod native_ssh;
mod ssh_config;
mod system_ssh;

pub use local::LocalExecutor;
pub use multiplexer::{Multiplexer, TmuxMultiplexer};
#[cfg(feature = "ssh")]
pub use native_ssh::{NativeSshExecutor, NativeSshPool, SshConnectConfig};
pub use ssh_config::SshConfig;
pub use system_ssh::{ControlMasterConfig, SystemSshExecutor};

use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("dial failed: {0}")]
    Dial(String),
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("command failed: {0}")]
    Command(String),
    #[error("operation cancelled")]
    Cancelled,
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ExecError>;

/// Output of a completed non-interactive command.
#[derive(Debug, Clone, Default)]
pub struct ExecOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_code: Option<i32>,
}

/// Connection context an [`Executor`] dials into. For the local backend this
/// is a no-op; for the SSH backends it identifies `user@host:port` plus an
/// optional proxy-jump hop.
#[derive(Debug, Clone, Default)]
pub struct ExecTarget {
    pub host: Option<String>,
    pub port: u16,
    pub user: Option<String>,
    pub identity_file: Option<PathBuf>,
    pub proxy_jump: Option<String>,
}

impl ExecTarget {
    pub fn local() -> Self {
        Self {
            port: 22,
            ..Default::default()
        }
    }

    /// Key used for connection pooling: `user@host:port`.
    pub fn pool_key(&self) -> String {
        format!(
            "{}@{}:{}",
            self.user.as_deref().unwrap_or(""),
            self.host.as_deref().unwrap_or("local"),
            self.port
        )
    }
}

/// A live interactive session (stdin attached), used by the Loop Runtime to
/// drive a long-lived agent process.
#[async_trait]
pub trait Session: Send + Sync {
    async fn send_input(&mut self, data: &[u8]) -> Result<()>;
    async fn read_output(&mut self) -> Result<Vec<u8>>;
    async fn close(&mut self) -> Result<()>;
}

/// Abstracted command executor over local processes, native SSH, and the
/// system `ssh` binary.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn exec(
        &self,
        target: &ExecTarget,
        cmd: &str,
        cancel: &CancellationToken,
    ) -> Result<ExecOutput>;

    async fn exec_interactive(
        &self,
        target: &ExecTarget,
        cmd: &str,
        stdin: Option<&[u8]>,
        cancel: &CancellationToken,
    ) -> Result<ExecOutput>;

    async fn start_session(
        &self,
        target: &ExecTarget,
        cmd: &str,
    ) -> Result<Box<dyn Session>>;
}
