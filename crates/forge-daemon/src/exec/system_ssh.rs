//! System `ssh` binary backend for [`super::Executor`].
//!
//! Shells out to the platform `ssh` client instead of speaking the protocol
//! directly, so it inherits whatever multiplexing, agent forwarding, and
//! `~/.ssh/config` handling the user already has configured. Connection
//! reuse comes from OpenSSH's own `ControlMaster`/`ControlPath` machinery
//! rather than an in-process pool.

use super::ssh_config::expand_tilde;
use super::{ExecError, ExecOutput, ExecTarget, Executor, Result, Session};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

/// Controls how `ssh` argv is built for connection reuse.
#[derive(Debug, Clone)]
pub struct ControlMasterConfig {
    pub control_path: String,
    pub control_persist: String,
}

impl Default for ControlMasterConfig {
    fn default() -> Self {
        Self {
            control_path: "~/.ssh/forge-cm-%r@%h:%p".to_string(),
            control_persist: "600".to_string(),
        }
    }
}

/// [`Executor`] that runs commands via the system `ssh` binary, one process
/// per call.
pub struct SystemSshExecutor {
    control: ControlMasterConfig,
    ssh_binary: String,
}

impl SystemSshExecutor {
    pub fn new(control: ControlMasterConfig) -> Self {
        Self {
            control,
            ssh_binary: "ssh".to_string(),
        }
    }

    /// Build the `ssh` argv for `target`, honoring explicit target fields
    /// over options left to `~/.ssh/config`. Omits options that aren't set
    /// rather than passing empty flags.
    fn build_args(&self, target: &ExecTarget, remote_cmd: &str) -> Vec<String> {
        let mut args = Vec::new();

        args.push("-o".to_string());
        args.push(format!(
            "ControlPath={}",
            expand_tilde(&self.control.control_path).display()
        ));
        args.push("-o".to_string());
        args.push("ControlMaster=auto".to_string());
        args.push("-o".to_string());
        args.push(format!("ControlPersist={}", self.control.control_persist));
        args.push("-o".to_string());
        args.push("BatchMode=yes".to_string());

        if target.port != 0 && target.port != 22 {
            args.push("-p".to_string());
            args.push(target.port.to_string());
        }
        if let Some(identity) = &target.identity_file {
            args.push("-i".to_string());
            args.push(identity.display().to_string());
        }
        if let Some(proxy) = &target.proxy_jump {
            args.push("-J".to_string());
            args.push(proxy.clone());
        }

        let host = target.host.as_deref().unwrap_or("localhost");
        let destination = match &target.user {
            Some(user) => format!("{user}@{host}"),
            None => host.to_string(),
        };
        args.push(destination);
        args.push(remote_cmd.to_string());
        args
    }

    fn command(&self, target: &ExecTarget, cmd: &str) -> Command {
        let args = self.build_args(target, cmd);
        let mut c = Command::new(&self.ssh_binary);
        c.args(&args);
        c.stdin(Stdio::piped());
        c.stdout(Stdio::piped());
        c.stderr(Stdio::piped());
        c
    }
}

#[async_trait]
impl Executor for SystemSshExecutor {
    async fn exec(
        &self,
        target: &ExecTarget,
        cmd: &str,
        cancel: &CancellationToken,
    ) -> Result<ExecOutput> {
        self.exec_interactive(target, cmd, None, cancel).await
    }

    async fn exec_interactive(
        &self,
        target: &ExecTarget,
        cmd: &str,
        stdin: Option<&[u8]>,
        cancel: &CancellationToken,
    ) -> Result<ExecOutput> {
        let mut child = self.command(target, cmd).spawn()?;

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
                match output.status.code() {
                    Some(255) if output.stderr.is_empty() => {
                        Err(ExecError::Dial(format!("ssh exited 255 for {}", target.pool_key())))
                    }
                    _ => Ok(ExecOutput {
                        stdout: output.stdout,
                        stderr: output.stderr,
                        exit_code: output.status.code(),
                    }),
                }
            }
        }
    }

    async fn start_session(
        &self,
        target: &ExecTarget,
        cmd: &str,
    ) -> Result<Box<dyn Session>> {
        let child = self.command(target, cmd).spawn()?;
        Ok(Box::new(SystemSshSession { child }))
    }
}

struct SystemSshSession {
    child: Child,
}

#[async_trait]
impl Session for SystemSshSession {
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
