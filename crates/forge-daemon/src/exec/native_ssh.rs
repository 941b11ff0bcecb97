//! Native SSH backend for [`super::Executor`], built on `ssh2`.
//!
//! Follows the blocking-call-in-`spawn_blocking` pattern used by
//! [`crate::plugins::bridge::ssh::SshTransport`]: the `ssh2::Session` is not
//! `Send`-friendly across `.await` points, so every operation that touches it
//! hands off to a blocking thread and only awaits the `JoinHandle`.
//!
//! Connections are pooled by [`super::ExecTarget::pool_key`]. A pooled entry
//! is evicted once it exceeds `idle_timeout` or the pool exceeds
//! `max_pool_size`, in which case the least-recently-used idle entry is
//! dropped to make room.

use super::ssh_config::SshConfig as SshHostConfig;
use super::{ExecError, ExecOutput, ExecTarget, Executor, Result, Session};
use async_trait::async_trait;
use ssh2::Session as Ssh2Session;
use std::collections::HashMap;
use std::net::TcpStream;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Connection tuning shared by every pooled session.
#[derive(Debug, Clone)]
pub struct SshConnectConfig {
    pub connect_timeout: Duration,
    pub keep_alive_interval: Duration,
    pub max_pool_size: usize,
    pub idle_timeout: Duration,
    /// Identity file to try when the target doesn't name one explicitly.
    pub default_identity_file: Option<PathBuf>,
}

impl Default for SshConnectConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            keep_alive_interval: Duration::from_secs(30),
            max_pool_size: 16,
            idle_timeout: Duration::from_secs(600),
            default_identity_file: None,
        }
    }
}

struct PooledSession {
    session: Ssh2Session,
    last_used: Instant,
}

/// Connection pool keyed by `user@host:port`, guarded by a single mutex.
/// Blocking SSH calls run inside `spawn_blocking`, so the mutex is only ever
/// held briefly to check out/in a session.
pub struct NativeSshPool {
    config: SshConnectConfig,
    entries: Mutex<HashMap<String, PooledSession>>,
}

impl NativeSshPool {
    pub fn new(config: SshConnectConfig) -> Self {
        Self {
            config,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn evict_idle_locked(entries: &mut HashMap<String, PooledSession>, idle_timeout: Duration) {
        let now = Instant::now();
        entries.retain(|_, pooled| now.duration_since(pooled.last_used) < idle_timeout);
    }

    fn evict_lru_if_full_locked(entries: &mut HashMap<String, PooledSession>, max_size: usize) {
        if entries.len() < max_size {
            return;
        }
        if let Some(key) = entries
            .iter()
            .min_by_key(|(_, p)| p.last_used)
            .map(|(k, _)| k.clone())
        {
            entries.remove(&key);
        }
    }

    /// Dial (or reuse) a connection for `target`, resolved against
    /// `~/.ssh/config`. Blocking; call from `spawn_blocking`.
    fn checkout(&self, target: &ExecTarget) -> Result<Ssh2Session> {
        let key = target.pool_key();
        {
            let mut entries = self.entries.lock().unwrap();
            Self::evict_idle_locked(&mut entries, self.config.idle_timeout);
            if let Some(pooled) = entries.remove(&key) {
                return Ok(pooled.session);
            }
        }
        self.dial(target)
    }

    fn checkin(&self, key: String, session: Ssh2Session) {
        let mut entries = self.entries.lock().unwrap();
        Self::evict_lru_if_full_locked(&mut entries, self.config.max_pool_size);
        entries.insert(
            key,
            PooledSession {
                session,
                last_used: Instant::now(),
            },
        );
    }

    fn dial(&self, target: &ExecTarget) -> Result<Ssh2Session> {
        let resolved = resolve_target(target);

        let addr = format!("{}:{}", resolved.host, resolved.port);
        let tcp = TcpStream::connect(&addr)
            .map_err(|e| ExecError::Dial(format!("connect {addr}: {e}")))?;
        tcp.set_read_timeout(Some(self.config.connect_timeout)).ok();
        tcp.set_write_timeout(Some(self.config.connect_timeout)).ok();

        let mut session =
            Ssh2Session::new().map_err(|e| ExecError::Dial(format!("session init: {e}")))?;
        session.set_tcp_stream(tcp);
        session.set_keepalive(true, self.config.keep_alive_interval.as_secs() as u32);
        session
            .handshake()
            .map_err(|e| ExecError::Dial(format!("handshake: {e}")))?;

        authenticate(&mut session, &resolved.user, resolved.identity_file.as_deref())?;

        Ok(session)
    }
}

struct ResolvedTarget {
    host: String,
    port: u16,
    user: String,
    identity_file: Option<PathBuf>,
}

/// Merge an explicit [`ExecTarget`] with `~/.ssh/config`. Explicit fields on
/// the target always win; config fills in the rest.
fn resolve_target(target: &ExecTarget) -> ResolvedTarget {
    let requested_host = target.host.clone().unwrap_or_else(|| "localhost".to_string());
    let host_config = SshHostConfig::load_default().for_host(&requested_host);

    ResolvedTarget {
        host: host_config.hostname.unwrap_or(requested_host),
        port: if target.port != 0 && target.port != 22 {
            target.port
        } else {
            host_config.port.unwrap_or(22)
        },
        user: target
            .user
            .clone()
            .or(host_config.user)
            .unwrap_or_else(whoami_fallback),
        identity_file: target.identity_file.clone().or(host_config.identity_file),
    }
}

fn whoami_fallback() -> String {
    std::env::var("USER").unwrap_or_else(|_| "root".to_string())
}

/// Authenticate with key file (passphrase-less or via `SSH_AUTH_SOCK`
/// prompt), falling back to the agent if no key works.
fn authenticate(
    session: &mut Ssh2Session,
    user: &str,
    identity_file: Option<&std::path::Path>,
) -> Result<()> {
    if let Some(key_path) = identity_file {
        let attempt = session.userauth_pubkey_file(user, None, key_path, None);
        if attempt.is_ok() && session.authenticated() {
            return Ok(());
        }
        if let Ok(mut agent) = session.agent() {
            if agent.connect().is_ok() && agent.list_identities().is_ok() {
                for identity in agent.identities().into_iter().flatten() {
                    if agent.userauth(user, identity).is_ok() && session.authenticated() {
                        return Ok(());
                    }
                }
            }
        }
        return Err(ExecError::Auth(format!(
            "no usable credential for {user} with identity {}",
            key_path.display()
        )));
    }

    // No identity file named: try the agent directly.
    let mut agent = session
        .agent()
        .map_err(|e| ExecError::Auth(format!("agent unavailable: {e}")))?;
    agent
        .connect()
        .map_err(|e| ExecError::Auth(format!("agent connect: {e}")))?;
    agent
        .list_identities()
        .map_err(|e| ExecError::Auth(format!("agent list identities: {e}")))?;
    for identity in agent.identities().into_iter().flatten() {
        if agent.userauth(user, identity).is_ok() && session.authenticated() {
            return Ok(());
        }
    }
    Err(ExecError::Auth(format!(
        "agent had no identity accepted for {user}"
    )))
}

/// [`Executor`] backed by a pooled native SSH connection per target.
pub struct NativeSshExecutor {
    pool: Arc<NativeSshPool>,
}

impl NativeSshExecutor {
    pub fn new(config: SshConnectConfig) -> Self {
        Self {
            pool: Arc::new(NativeSshPool::new(config)),
        }
    }
}

fn run_exec(session: &Ssh2Session, cmd: &str, stdin: Option<&[u8]>) -> Result<ExecOutput> {
    let mut channel = session
        .channel_session()
        .map_err(|e| ExecError::Command(format!("channel open: {e}")))?;
    channel
        .exec(cmd)
        .map_err(|e| ExecError::Command(format!("exec: {e}")))?;

    if let Some(data) = stdin {
        use std::io::Write;
        channel
            .write_all(data)
            .map_err(|e| ExecError::Command(format!("stdin write: {e}")))?;
    }
    channel
        .send_eof()
        .map_err(|e| ExecError::Command(format!("send eof: {e}")))?;

    use std::io::Read;
    let mut stdout = Vec::new();
    channel
        .read_to_end(&mut stdout)
        .map_err(|e| ExecError::Command(format!("read stdout: {e}")))?;
    let mut stderr = Vec::new();
    channel
        .stderr()
        .read_to_end(&mut stderr)
        .map_err(|e| ExecError::Command(format!("read stderr: {e}")))?;

    channel.wait_close().ok();
    let exit_code = channel.exit_status().ok();

    Ok(ExecOutput {
        stdout,
        stderr,
        exit_code,
    })
}

#[async_trait]
impl Executor for NativeSshExecutor {
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
        let pool = self.pool.clone();
        let target = target.clone();
        let cmd = cmd.to_string();
        let stdin = stdin.map(|b| b.to_vec());

        let work = tokio::task::spawn_blocking(move || {
            let key = target.pool_key();
            let session = pool.checkout(&target)?;
            let result = run_exec(&session, &cmd, stdin.as_deref());
            pool.checkin(key, session);
            result
        });

        tokio::select! {
            _ = cancel.cancelled() => Err(ExecError::Cancelled),
            joined = work => joined.map_err(|e| ExecError::Command(format!("join error: {e}")))?,
        }
    }

    async fn start_session(
        &self,
        target: &ExecTarget,
        cmd: &str,
    ) -> Result<Box<dyn Session>> {
        let pool = self.pool.clone();
        let target = target.clone();
        let cmd = cmd.to_string();

        let channel = tokio::task::spawn_blocking(move || -> Result<(Ssh2Session, ssh2::Channel)> {
            let session = pool.dial(&target)?;
            let mut channel = session
                .channel_session()
                .map_err(|e| ExecError::Command(format!("channel open: {e}")))?;
            channel
                .exec(&cmd)
                .map_err(|e| ExecError::Command(format!("exec: {e}")))?;
            Ok((session, channel))
        })
        .await
        .map_err(|e| ExecError::Command(format!("join error: {e}")))??;

        Ok(Box::new(NativeSshSession {
            session: Arc::new(Mutex::new(channel.0)),
            channel: Arc::new(Mutex::new(channel.1)),
        }))
    }
}

/// A live interactive session over one dedicated (non-pooled) connection.
struct NativeSshSession {
    // Kept alive alongside the channel; ssh2 channels borrow their session.
    session: Arc<Mutex<Ssh2Session>>,
    channel: Arc<Mutex<ssh2::Channel>>,
}

#[async_trait]
impl Session for NativeSshSession {
    async fn send_input(&mut self, data: &[u8]) -> Result<()> {
        let channel = self.channel.clone();
        let data = data.to_vec();
        tokio::task::spawn_blocking(move || {
            use std::io::Write;
            channel
                .lock()
                .unwrap()
                .write_all(&data)
                .map_err(|e| ExecError::Command(format!("session write: {e}")))
        })
        .await
        .map_err(|e| ExecError::Command(format!("join error: {e}")))?
    }

    async fn read_output(&mut self) -> Result<Vec<u8>> {
        let channel = self.channel.clone();
        tokio::task::spawn_blocking(move || {
            use std::io::Read;
            let mut buf = vec![0u8; 4096];
            let n = channel
                .lock()
                .unwrap()
                .read(&mut buf)
                .map_err(|e| ExecError::Command(format!("session read: {e}")))?;
            buf.truncate(n);
            Ok(buf)
        })
        .await
        .map_err(|e| ExecError::Command(format!("join error: {e}")))?
    }

    async fn close(&mut self) -> Result<()> {
        let channel = self.channel.clone();
        let session = self.session.clone();
        tokio::task::spawn_blocking(move || {
            let _ = channel.lock().unwrap().close();
            let _ = session.lock().unwrap().disconnect(None, "closing", None);
        })
        .await
        .map_err(|e| ExecError::Command(format!("join error: {e}")))?;
        Ok(())
    }
}
