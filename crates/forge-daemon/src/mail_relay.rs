//! Mail Relay: opt-in, best-effort cross-host replication of one project's
//! messages between two `forged` mail servers (`spec.md` §4.5).
//!
//! For each configured peer the relay dials, issues a `relay` request
//! carrying the last id seen from that peer, and applies every streamed
//! message to the local [`MailHub`] via `ingest` — which is idempotent on
//! message id, so a message arriving twice (e.g. via two relay paths) is
//! only ever surfaced once (`spec.md` §9 "Relay loops"). `msg.host` is
//! preserved on ingest and never rewritten, and the relay never
//! re-broadcasts what it receives: it only ever writes into the local
//! store/hub, which is what keeps a 3+-host mesh from cycling forever.

use forge_core::mail::{Cmd, MailHub, MailTarget, Request};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// One peer this project relays with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayPeer {
    /// Stable identifier used for the on-disk last-seen cursor file name.
    pub id: String,
    pub addr: String,
    pub project_id: String,
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub peers: Vec<RelayPeer>,
    pub dial_timeout: Duration,
    pub retry_base: Duration,
    pub retry_max: Duration,
    pub local_host_tag: Option<String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            peers: Vec::new(),
            dial_timeout: Duration::from_secs(5),
            retry_base: Duration::from_millis(500),
            retry_max: Duration::from_secs(30),
            local_host_tag: None,
        }
    }
}

/// Persists each peer's last-seen message id to `<project_root>/.fmail/
/// relay/<peer_id>.cursor`, one file per peer so concurrent relays to
/// different peers never contend on the same file.
pub struct CursorStore {
    dir: PathBuf,
    cache: Mutex<HashMap<String, String>>,
}

impl CursorStore {
    pub fn new(project_root: &Path) -> Self {
        Self {
            dir: project_root.join(".fmail").join("relay"),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn last_seen(&self, peer_id: &str) -> Option<String> {
        if let Some(cached) = self.cache.lock().unwrap().get(peer_id).cloned() {
            return Some(cached);
        }
        let path = self.dir.join(format!("{peer_id}.cursor"));
        let value = std::fs::read_to_string(&path).ok().map(|s| s.trim().to_string());
        if let Some(v) = &value {
            self.cache.lock().unwrap().insert(peer_id.to_string(), v.clone());
        }
        value
    }

    pub fn advance(&self, peer_id: &str, id: &str) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(format!("{peer_id}.cursor"));
        let tmp = self.dir.join(format!("{peer_id}.cursor.tmp"));
        std::fs::write(&tmp, id)?;
        std::fs::rename(&tmp, &path)?;
        self.cache.lock().unwrap().insert(peer_id.to_string(), id.to_string());
        Ok(())
    }
}

/// Runs one dial/ingest/advance cycle per peer, forever, until `cancel`
/// fires. Each peer gets its own task and its own backoff; one peer being
/// unreachable never blocks replication with the others.
pub async fn run(hub: MailHub, config: RelayConfig, project_root: PathBuf, cancel: CancellationToken) {
    let cursors = Arc::new(CursorStore::new(&project_root));
    let mut tasks = Vec::new();
    for peer in config.peers.clone() {
        let hub = hub.clone();
        let cursors = Arc::clone(&cursors);
        let cancel = cancel.clone();
        let cfg = config.clone();
        tasks.push(tokio::spawn(async move {
            relay_peer_loop(hub, peer, cfg, cursors, cancel).await;
        }));
    }
    for task in tasks {
        let _ = task.await;
    }
}

async fn relay_peer_loop(
    hub: MailHub,
    peer: RelayPeer,
    config: RelayConfig,
    cursors: Arc<CursorStore>,
    cancel: CancellationToken,
) {
    let mut attempt: u32 = 0;
    loop {
        if cancel.is_cancelled() {
            return;
        }
        match relay_once(&hub, &peer, &config, &cursors, &cancel).await {
            Ok(()) => {
                attempt = 0;
            }
            Err(e) => {
                warn!("relay to peer {} failed: {e}", peer.id);
                attempt = attempt.saturating_add(1);
            }
        }
        if cancel.is_cancelled() {
            return;
        }
        let delay = backoff(config.retry_base, config.retry_max, attempt);
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// Exponential backoff with +/-25% jitter, capped at `max`.
fn backoff(base: Duration, max: Duration, attempt: u32) -> Duration {
    if attempt == 0 {
        return Duration::from_millis(0);
    }
    let scaled = base.saturating_mul(1u32 << attempt.min(10));
    let capped = scaled.min(max);
    let jitter_pct = rand::thread_rng().gen_range(75..=125);
    capped.mul_f64(jitter_pct as f64 / 100.0)
}

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("dial to {0} failed: {1}")]
    Dial(String, std::io::Error),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

async fn relay_once(
    hub: &MailHub,
    peer: &RelayPeer,
    config: &RelayConfig,
    cursors: &CursorStore,
    cancel: &CancellationToken,
) -> Result<(), RelayError> {
    let stream = tokio::time::timeout(config.dial_timeout, tokio::net::TcpStream::connect(&peer.addr))
        .await
        .map_err(|_| RelayError::Dial(peer.addr.clone(), std::io::Error::from(std::io::ErrorKind::TimedOut)))?
        .map_err(|e| RelayError::Dial(peer.addr.clone(), e))?;

    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    let since = cursors.last_seen(&peer.id);
    let request = Request {
        req_id: forge_core::ids::short_id(),
        project_id: peer.project_id.clone(),
        cmd: Cmd::Relay { since },
    };
    let mut line = serde_json::to_vec(&request).map_err(|e| RelayError::Protocol(e.to_string()))?;
    line.push(b'\n');
    writer.write_all(&line).await?;

    // First line is the ack; subsequent lines are streamed messages.
    let ack_line = lines
        .next_line()
        .await?
        .ok_or_else(|| RelayError::Protocol("connection closed before ack".into()))?;
    let ack: serde_json::Value =
        serde_json::from_str(&ack_line).map_err(|e| RelayError::Protocol(e.to_string()))?;
    if ack.get("ok").and_then(|v| v.as_bool()) != Some(true) {
        return Err(RelayError::Protocol(format!("relay request rejected: {ack_line}")));
    }

    info!("relay connected to peer {} ({})", peer.id, peer.addr);
    let mut last_ingested = cursors.last_seen(&peer.id);

    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            debug!("relay peer {} closed the connection", peer.id);
            return Ok(());
        };
        let envelope: serde_json::Value =
            serde_json::from_str(&line).map_err(|e| RelayError::Protocol(e.to_string()))?;
        if envelope.get("event").is_some() {
            return Ok(()); // server signalled "closed"/"lagged"; reconnect
        }
        let Some(msg_value) = envelope.get("msg") else {
            continue;
        };
        let msg: forge_core::mail::Message =
            serde_json::from_value(msg_value.clone()).map_err(|e| RelayError::Protocol(e.to_string()))?;
        if Some(msg.id.clone()) <= last_ingested {
            continue;
        }
        let target = MailTarget::parse(&msg.to).map_err(|e| RelayError::Protocol(e.to_string()))?;
        let id = msg.id.clone();
        if let Err(e) = hub.ingest(&target, &msg) {
            warn!("relay ingest failed for {}: {e}", id);
            continue;
        }
        last_ingested = Some(id.clone());
        if let Err(e) = cursors.advance(&peer.id, &id) {
            warn!("failed to persist relay cursor for peer {}: {e}", peer.id);
        }
    }
}
