//! Mail Server: the fmail line-delimited JSON protocol over a Unix domain
//! socket (preferred) or a TCP fallback (`spec.md` §4.4, §6).
//!
//! Each accepted connection is handled on its own task. `send`/`log`/
//! `who`/`status`/`topics`/`gc`/`register` reply with exactly one
//! [`forge_core::mail::Response::Ack`] line; `watch` and `relay` ack once
//! and then stream matching messages until the client disconnects or the
//! server is cancelled, at which point it emits a `{"event":"closed"}`
//! envelope and returns. Mirrors the accept-loop/per-connection-task shape
//! used by [`crate::daemon::socket`]'s control socket.

use forge_core::mail::{AckBody, Cmd, ErrorCode, MailHub, MailTarget, Request, SendOptions};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Where the mail server listens. The Unix socket is preferred; TCP is an
/// explicit opt-in fallback (`spec.md` §4.4) guarded by an allow-list.
#[derive(Debug, Clone)]
pub struct MailServerConfig {
    pub socket_path: PathBuf,
    pub tcp: Option<TcpConfig>,
}

#[derive(Debug, Clone)]
pub struct TcpConfig {
    pub addr: std::net::SocketAddr,
    pub allow: Vec<IpAddr>,
    pub hmac_token: Option<String>,
}

impl MailServerConfig {
    /// Resolve the default Unix socket path: `$XDG_RUNTIME_DIR/forged.sock`
    /// if set, else `<project_root>/.fmail/socket`.
    pub fn default_for_project(project_root: &Path) -> Self {
        let socket_path = std::env::var_os("XDG_RUNTIME_DIR")
            .map(|dir| PathBuf::from(dir).join("forged.sock"))
            .unwrap_or_else(|| project_root.join(".fmail").join("socket"));
        Self {
            socket_path,
            tcp: None,
        }
    }
}

/// Running server handle. Dropping it does not stop the server; cancel the
/// token passed to [`serve`] instead. Kept so callers can await shutdown.
pub struct MailServerHandle {
    pub socket_path: PathBuf,
}

/// Start accepting connections. Returns once the listener is bound; the
/// accept loop itself runs in a spawned task and exits when `cancel` fires.
pub async fn serve(
    hub: MailHub,
    config: MailServerConfig,
    cancel: CancellationToken,
) -> std::io::Result<MailServerHandle> {
    let socket_path = config.socket_path.clone();

    #[cfg(unix)]
    {
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if socket_path.exists() {
            let _ = std::fs::remove_file(&socket_path);
        }
        let listener = tokio::net::UnixListener::bind(&socket_path)?;
        info!("mail server listening on {}", socket_path.display());

        let hub_for_unix = hub.clone();
        let cancel_unix = cancel.clone();
        let path_for_cleanup = socket_path.clone();
        tokio::spawn(async move {
            accept_unix_loop(listener, hub_for_unix, cancel_unix).await;
            let _ = std::fs::remove_file(&path_for_cleanup);
        });
    }

    if let Some(tcp) = config.tcp {
        let listener = tokio::net::TcpListener::bind(tcp.addr).await?;
        info!("mail server TCP fallback listening on {}", tcp.addr);
        let hub_for_tcp = hub.clone();
        let cancel_tcp = cancel.clone();
        tokio::spawn(async move {
            accept_tcp_loop(listener, hub_for_tcp, tcp, cancel_tcp).await;
        });
    }

    Ok(MailServerHandle { socket_path })
}

#[cfg(unix)]
async fn accept_unix_loop(listener: tokio::net::UnixListener, hub: MailHub, cancel: CancellationToken) {
    let start = Instant::now();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("mail server accept loop cancelled");
                return;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _addr)) => {
                        let hub = hub.clone();
                        let cancel = cancel.clone();
                        tokio::spawn(async move {
                            let (reader, writer) = stream.into_split();
                            handle_connection(reader, writer, hub, cancel, start).await;
                        });
                    }
                    Err(e) => warn!("mail server accept failed: {e}"),
                }
            }
        }
    }
}

async fn accept_tcp_loop(
    listener: tokio::net::TcpListener,
    hub: MailHub,
    tcp: TcpConfig,
    cancel: CancellationToken,
) {
    let start = Instant::now();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("mail server TCP accept loop cancelled");
                return;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        if !tcp.allow.is_empty() && !tcp.allow.contains(&peer.ip()) {
                            debug!("rejecting TCP connection from {} (not in allow-list)", peer.ip());
                            continue;
                        }
                        let hub = hub.clone();
                        let cancel = cancel.clone();
                        tokio::spawn(async move {
                            let (reader, writer) = stream.into_split();
                            handle_connection(reader, writer, hub, cancel, start).await;
                        });
                    }
                    Err(e) => warn!("mail server TCP accept failed: {e}"),
                }
            }
        }
    }
}

async fn handle_connection<R, W>(
    reader: R,
    mut writer: W,
    hub: MailHub,
    cancel: CancellationToken,
    started_at: Instant,
) where
    R: tokio::io::AsyncRead + Unpin,
    W: tokio::io::AsyncWrite + Unpin,
{
    let mut lines = BufReader::new(reader).lines();

    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.next_line() => line,
        };

        let line = match line {
            Ok(Some(line)) if !line.trim().is_empty() => line,
            Ok(Some(_)) => continue,
            Ok(None) => break, // client closed
            Err(e) => {
                warn!("mail server read error: {e}");
                break;
            }
        };

        let request: Request = match serde_json::from_str(&line) {
            Ok(req) => req,
            Err(e) => {
                let ack = AckBody::err("unknown", ErrorCode::ProtocolError, e.to_string());
                if write_line(&mut writer, &ack).await.is_err() {
                    break;
                }
                continue;
            }
        };

        let expected_project = hub.store().load_project().ok().map(|p| p.id);
        if let Some(expected) = &expected_project {
            if expected != &request.project_id {
                let ack = AckBody::err(
                    request.req_id.clone(),
                    ErrorCode::ProjectMismatch,
                    format!("expected project {expected}, got {}", request.project_id),
                );
                if write_line(&mut writer, &ack).await.is_err() {
                    break;
                }
                continue;
            }
        }

        match dispatch(&hub, &request, started_at) {
            Dispatched::Ack(ack) => {
                if write_line(&mut writer, &ack).await.is_err() {
                    break;
                }
            }
            Dispatched::Stream(filter) => {
                let ack = AckBody::ok(request.req_id.clone());
                if write_line(&mut writer, &ack).await.is_err() {
                    break;
                }
                stream_messages(&hub, &request.req_id, filter, &mut writer, &cancel).await;
                break; // watch/relay own the rest of the connection
            }
        }
    }
}

enum Dispatched {
    Ack(AckBody),
    Stream(forge_core::mail::Filter),
}

fn dispatch(hub: &MailHub, request: &Request, started_at: Instant) -> Dispatched {
    let req_id = request.req_id.clone();
    match &request.cmd {
        Cmd::Send {
            from,
            to,
            body,
            priority,
            reply_to,
            tags,
        } => {
            let target = match forge_core::mail::protocol::parse_target(to) {
                Ok(t) => t,
                Err(e) => return Dispatched::Ack(AckBody::err(req_id, e.code, e.message)),
            };
            let opts = SendOptions {
                priority: *priority,
                reply_to: reply_to.clone(),
                tags: tags.clone(),
                host: None,
            };
            match hub.publish(from, &target, body, opts) {
                Ok(msg) => {
                    let mut ack = AckBody::ok(req_id);
                    ack.id = Some(msg.id);
                    Dispatched::Ack(ack)
                }
                Err(e) => Dispatched::Ack(ack_from_store_error(req_id, e)),
            }
        }
        Cmd::Log {
            target,
            since,
            until,
            from,
            tag,
            priority,
            limit,
        } => {
            let parsed = match forge_core::mail::protocol::parse_target(target) {
                Ok(t) => t,
                Err(e) => return Dispatched::Ack(AckBody::err(req_id, e.code, e.message)),
            };
            let result = match &parsed {
                MailTarget::Topic(t) => hub.store().list_topic_messages(t),
                MailTarget::Dm(a) => hub.store().list_dm_messages(a),
            };
            match result {
                Ok(mut messages) => {
                    if let Some(since) = since {
                        messages.retain(|m| &m.id > since);
                    }
                    if let Some(until) = until {
                        messages.retain(|m| &m.id <= until);
                    }
                    if let Some(from) = from {
                        messages.retain(|m| &m.from == from);
                    }
                    if let Some(tag) = tag {
                        messages.retain(|m| m.tags.iter().any(|t| t == tag));
                    }
                    if let Some(priority) = priority {
                        messages.retain(|m| m.priority >= *priority);
                    }
                    let total = messages.len();
                    if let Some(limit) = limit {
                        messages.truncate(*limit);
                    }
                    let mut ack = AckBody::ok(req_id);
                    ack.messages = Some(messages);
                    ack.total = Some(total);
                    Dispatched::Ack(ack)
                }
                Err(e) => Dispatched::Ack(ack_from_store_error(req_id, e)),
            }
        }
        Cmd::Watch {
            topic,
            from,
            to,
            priority_min,
            tags,
            since,
        } => Dispatched::Stream(forge_core::mail::Filter {
            topic: topic.clone(),
            from: from.clone(),
            to: to.clone(),
            priority_min: *priority_min,
            tags: tags.clone(),
            since: since.clone(),
        }),
        Cmd::Who => match hub.store().list_agents() {
            Ok(agents) => {
                let mut ack = AckBody::ok(req_id);
                ack.agents = Some(agents);
                Dispatched::Ack(ack)
            }
            Err(e) => Dispatched::Ack(ack_from_store_error(req_id, e)),
        },
        Cmd::Status => {
            let project_id = hub.store().load_project().ok().map(|p| p.id);
            let mut ack = AckBody::ok(req_id);
            ack.project_id = project_id;
            ack.uptime_seconds = Some(started_at.elapsed().as_secs());
            Dispatched::Ack(ack)
        }
        Cmd::Topics => match hub.store().list_topics() {
            Ok(topics) => {
                let mut ack = AckBody::ok(req_id);
                ack.topics = Some(topics);
                Dispatched::Ack(ack)
            }
            Err(e) => Dispatched::Ack(ack_from_store_error(req_id, e)),
        },
        Cmd::Gc { days, dry_run } => {
            let days = days.unwrap_or(30);
            let cutoff = chrono::Utc::now() - chrono::Duration::days(days);
            match hub.store().gc(cutoff, *dry_run) {
                Ok(removed) => {
                    let mut ack = AckBody::ok(req_id);
                    ack.removed = Some(
                        removed
                            .into_iter()
                            .map(|p| p.display().to_string())
                            .collect(),
                    );
                    Dispatched::Ack(ack)
                }
                Err(e) => Dispatched::Ack(ack_from_store_error(req_id, e)),
            }
        }
        Cmd::Register { name, host } => match hub.store().register_agent(name, host.clone()) {
            Ok(_) => Dispatched::Ack(AckBody::ok(req_id)),
            Err(e) => Dispatched::Ack(ack_from_store_error(req_id, e)),
        },
        Cmd::Relay { since } => Dispatched::Stream(forge_core::mail::Filter {
            since: since.clone(),
            ..Default::default()
        }),
    }
}

fn ack_from_store_error(req_id: String, err: forge_core::mail::StoreError) -> AckBody {
    use forge_core::mail::StoreError;
    let code = match &err {
        StoreError::Validation(_) => ErrorCode::InvalidTopic,
        StoreError::IdConflict(_) => ErrorCode::Conflict,
        StoreError::ProjectNotFound(_) => ErrorCode::NotFound,
        StoreError::Io { .. } | StoreError::Json { .. } | StoreError::Lock(_) => ErrorCode::Internal,
    };
    AckBody::err(req_id, code, err.to_string())
}

/// Stream matching messages to `writer` until the subscriber lags, the
/// client disconnects, or `cancel` fires. For `relay`, the caller passes a
/// filter with only `since` set, which also replays the catch-up backlog
/// (`list_all_messages`) before switching to live delivery, per `spec.md`
/// §4.4 "On catch-up the server also replays in send order."
async fn stream_messages<W>(
    hub: &MailHub,
    req_id: &str,
    filter: forge_core::mail::Filter,
    writer: &mut W,
    cancel: &CancellationToken,
) where
    W: tokio::io::AsyncWrite + Unpin,
{
    if let Some(since) = filter.since.clone() {
        if let Ok(mut backlog) = hub.store().list_all_messages() {
            backlog.retain(|m| m.id > since);
            for msg in backlog {
                let body = forge_core::mail::StreamBody {
                    req_id: req_id.to_string(),
                    msg: Some(msg),
                };
                if write_line(writer, &body).await.is_err() {
                    return;
                }
            }
        }
    }

    let mut subscription = hub.subscribe(filter);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = write_line(writer, &serde_json::json!({"req_id": req_id, "event": "closed"})).await;
                return;
            }
            msg = subscription.rx.recv() => {
                match msg {
                    Some(msg) => {
                        let body = forge_core::mail::StreamBody {
                            req_id: req_id.to_string(),
                            msg: Some(msg),
                        };
                        if write_line(writer, &body).await.is_err() {
                            return;
                        }
                    }
                    None => {
                        if subscription.lagged.load(std::sync::atomic::Ordering::SeqCst) {
                            let _ = write_line(writer, &serde_json::json!({"req_id": req_id, "event": "lagged"})).await;
                        }
                        return;
                    }
                }
            }
        }
    }
}

async fn write_line<W, T>(writer: &mut W, value: &T) -> std::io::Result<()>
where
    W: tokio::io::AsyncWrite + Unpin,
    T: serde::Serialize,
{
    let mut line = serde_json::to_vec(value).unwrap_or_default();
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await
}

/// Hand-rolled helper used only by tests that want to build a request line
/// without going through the full client; production callers construct
/// [`Request`] directly and serialize with `serde_json`.
#[cfg(test)]
fn request_line(req: &Request) -> String {
    let mut s = serde_json::to_string(req).unwrap();
    s.push('\n');
    s
}
