//! Local process backend for [`super::Executor`].
//!
//! Spawns commands in the current process via `tokio::process::Command`,
//! following the subprocess-handling conventions used throughout
//! `worker_adapter::codex_tmux` (stdout/stderr captured, exit status
//! inspected, errors carry the command and stderr for diagnosis).

use super::{ExecError, ExecOutput, ExecTarget, Executor, Result, Session};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
pub struct LocalExecutor;

impl LocalExecutor {
    pub fn new() -> Self {
        Self
    }

    fn command(cmd: &str) -> Command {
        let mut c = Command::new("sh");
        c.arg("-c").arg(cmd);
        c.stdin(Stdio::piped());
        c.stdout(Stdio::piped());
        c.stderr(Stdio::piped());
        c
    }
}

#[async_trait]
impl Executor for LocalExecutor {
    async fn exec(
        &self,
        _target: &ExecTarget,
        cmd: &str,
        cancel: &CancellationToken,
    ) -> Result<ExecOutput> {
        let mut child = Self::command(cmd).spawn()?;

        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = child.kill().await;
                Err(ExecError::Cancelled)
            }
            output = child.wait_with_output() => {
                let output = output?;
                Ok(ExecOutput {
                    stdout: output.stdout,
                    stderr: output.stderr,
                    exit_code: output.status.code(),
                })
            }
        }
    }

    async fn exec_interactive(
        &self,
        target: &ExecTarget,
        cmd: &str,
        stdin: Option<&[u8]>,
        cancel: &CancellationToken,
    ) -> Result<ExecOutput> {
        if stdin.is_none() {
            return self.exec(target, cmd, cancel).await;
        }

        let mut child = Self::command(cmd).spawn()?;
        if let Some(data) = stdin
            && let Some(mut pipe) = child.stdin.take()
        {
            pipe.write_all(data).await?;
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = child.kill().await;
                Err(ExecError::Cancelled)
            }
            output = child.wait_with_output() => {
                let output = output?;
                Ok(ExecOutput {
                    stdout: output.stdout,
                    stderr: output.stderr,
                    exit_code: output.status.code(),
                })
            }
        }
    }

    async fn start_session(
        &self,
        _target: &ExecTarget,
        cmd: &str,
    ) -> Result<Box<dyn Session>> {
        let child = Self::command(cmd).spawn()?;
        Ok(Box::new(LocalSession { child }))
    }
}

struct LocalSession {
    child: Child,
}

#[async_trait]
impl Session for LocalSession {
    async fn send_input(&mut self, data: &[u8]) -> Result<()> {
        if let Some(stdin) = self.child.stdin.as_mut() {
            stdin.write_all(data).await?;
        }
        Ok(())
    }

    async fn read_output(&mut self) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; 4096];
        if let Some(stdout) = self.child.stdout.as_mut() {
            let n = stdout.read(&mut buf).await?;
            buf.truncate(n);
        } else {
            buf.clear();
        }
        Ok(buf)
    }

    async fn close(&mut self) -> Result<()> {
        let _ = self.child.kill().await;
        Ok(())
    }
}
