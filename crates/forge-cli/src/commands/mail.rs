//! fmail command implementation — the project mail bus (`spec.md` §4.2-§4.4).
//!
//! `send`/`log`/`who`/`status`/`topics`/`gc`/`init` act directly on the
//! project's `.fmail/` store, the same way the legacy [`super::send`]/
//! [`super::read`] commands act directly on team inbox files: fmail is
//! file-backed and zero-config, so none of these need a daemon running.
//! `watch` is the one command that needs a live subscription; it dials the
//! mail server's Unix socket and streams whatever arrives.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use forge_core::mail::{MailStore, MailTarget, Priority, SendOptions};
use std::path::PathBuf;

/// fmail — the project mail bus
#[derive(Args, Debug)]
pub struct MailArgs {
    #[command(subcommand)]
    command: MailCommand,
}

#[derive(Subcommand, Debug)]
enum MailCommand {
    /// Send a message to a topic or @agent
    Send(SendArgs),
    /// Print messages from a topic or @agent's DMs, chronologically
    Log(LogArgs),
    /// Subscribe and print each new matching message as a JSON line
    Watch(WatchArgs),
    /// List known agents
    Who(JsonArgs),
    /// Show project mail status
    Status(JsonArgs),
    /// List topics that currently have messages
    Topics(JsonArgs),
    /// Delete messages older than N days
    Gc(GcArgs),
    /// Initialize (or re-stamp) the project's mail store
    Init(InitArgs),
    /// Print the machine-readable protocol documentation
    RobotHelp,
}

#[derive(Args, Debug)]
struct SendArgs {
    /// Target: topic name or @agent
    target: String,

    /// Message body (omit to use --file or --stdin)
    body: Option<String>,

    /// Read the body from a file
    #[arg(long, conflicts_with = "stdin")]
    file: Option<PathBuf>,

    /// Read the body from stdin
    #[arg(long)]
    stdin: bool,

    /// Priority: low, normal, high
    #[arg(long, default_value = "normal")]
    priority: String,

    /// Message id this reply responds to
    #[arg(long)]
    reply_to: Option<String>,

    /// Comma-separated tags
    #[arg(long, value_delimiter = ',')]
    tag: Vec<String>,

    /// Override sender identity (default: FMAIL_AGENT env or "human")
    #[arg(long)]
    from: Option<String>,

    /// Output the created message as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct LogArgs {
    /// Target: topic name or @agent (omit to list every message)
    target: Option<String>,

    /// Only messages sent at or after this RFC3339 timestamp
    #[arg(long)]
    since: Option<String>,

    /// Only messages sent at or before this RFC3339 timestamp
    #[arg(long)]
    until: Option<String>,

    /// Only messages from this sender
    #[arg(long)]
    from: Option<String>,

    /// Only messages carrying this tag
    #[arg(long)]
    tag: Option<String>,

    /// Only messages at this priority
    #[arg(long)]
    priority: Option<String>,

    /// Limit to the most recent N messages
    #[arg(long)]
    limit: Option<usize>,

    /// Output as JSON lines
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct WatchArgs {
    /// Restrict to this topic
    #[arg(long)]
    topic: Option<String>,

    /// Restrict to messages from this sender
    #[arg(long)]
    from: Option<String>,

    /// Restrict to messages addressed to this target
    #[arg(long)]
    to: Option<String>,

    /// Only messages at or above this priority
    #[arg(long)]
    priority_min: Option<String>,

    /// Comma-separated tags to filter on
    #[arg(long, value_delimiter = ',')]
    tag: Vec<String>,
}

#[derive(Args, Debug)]
struct JsonArgs {
    /// Output as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct GcArgs {
    /// Delete messages older than this many days
    #[arg(long, default_value_t = 30)]
    days: i64,

    /// Show what would be removed without deleting it
    #[arg(long)]
    dry_run: bool,

    /// Output as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args, Debug)]
struct InitArgs {
    /// Explicit project id (overwrites any existing one)
    #[arg(long)]
    project: Option<String>,
}

pub fn execute(args: MailArgs) -> Result<()> {
    match args.command {
        MailCommand::Send(a) => execute_send(a),
        MailCommand::Log(a) => execute_log(a),
        MailCommand::Watch(a) => execute_watch(a),
        MailCommand::Who(a) => execute_who(a),
        MailCommand::Status(a) => execute_status(a),
        MailCommand::Topics(a) => execute_topics(a),
        MailCommand::Gc(a) => execute_gc(a),
        MailCommand::Init(a) => execute_init(a),
        MailCommand::RobotHelp => execute_robot_help(),
    }
}

/// Resolve the project root: `FMAIL_ROOT` env override, else the current
/// directory (`spec.md` §8 "Environment").
fn project_root() -> Result<PathBuf> {
    if let Ok(root) = std::env::var("FMAIL_ROOT") {
        return Ok(PathBuf::from(root));
    }
    std::env::current_dir().context("Failed to get current directory")
}

/// Resolve the sending identity: `--from`, else `FMAIL_AGENT`, else "human".
fn sender_identity(from: Option<String>) -> String {
    from.or_else(|| std::env::var("FMAIL_AGENT").ok())
        .unwrap_or_else(|| "human".to_string())
}

fn open_store() -> Result<MailStore> {
    let root = project_root()?;
    MailStore::ensure_root(&root).context("Failed to initialize the fmail project store")
}

fn parse_priority(raw: &str) -> Result<Priority> {
    raw.parse()
        .map_err(|e: forge_core::mail::ValidationError| anyhow::anyhow!(e.to_string()))
}

fn execute_send(args: SendArgs) -> Result<()> {
    let store = open_store()?;
    let target = MailTarget::parse(&args.target)
        .map_err(|e| anyhow::anyhow!("invalid target {:?}: {e}", args.target))?;
    let from = sender_identity(args.from);

    let body = if args.stdin {
        use std::io::Read;
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else if let Some(path) = args.file {
        std::fs::read_to_string(&path).with_context(|| format!("Failed to read {path:?}"))?
    } else if let Some(body) = args.body {
        body
    } else {
        anyhow::bail!("message required: provide body text, --file, or --stdin");
    };

    store.register_agent(&from, None)?;
    let opts = SendOptions {
        priority: parse_priority(&args.priority)?,
        reply_to: args.reply_to,
        tags: args.tag,
        host: None,
    };
    let msg = store.save_message(&from, &target, &body, opts)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&msg)?);
    } else {
        println!("Sent {} to {}", msg.id, msg.to);
    }
    Ok(())
}

fn execute_log(args: LogArgs) -> Result<()> {
    let store = open_store()?;
    let mut messages = match &args.target {
        Some(t) => match MailTarget::parse(t)
            .map_err(|e| anyhow::anyhow!("invalid target {:?}: {e}", t))?
        {
            MailTarget::Topic(name) => store.list_topic_messages(&name)?,
            MailTarget::Dm(name) => store.list_dm_messages(&name)?,
        },
        None => store.list_all_messages()?,
    };

    if let Some(ref since) = args.since {
        let since = parse_timestamp(since)?;
        messages.retain(|m| m.time >= since);
    }
    if let Some(ref until) = args.until {
        let until = parse_timestamp(until)?;
        messages.retain(|m| m.time <= until);
    }
    if let Some(ref from) = args.from {
        messages.retain(|m| &m.from == from);
    }
    if let Some(ref tag) = args.tag {
        messages.retain(|m| m.tags.iter().any(|t| t == tag));
    }
    if let Some(ref priority) = args.priority {
        let priority = parse_priority(priority)?;
        messages.retain(|m| m.priority == priority);
    }
    if let Some(limit) = args.limit {
        if messages.len() > limit {
            let drop = messages.len() - limit;
            messages.drain(..drop);
        }
    }

    if args.json {
        for msg in &messages {
            println!("{}", serde_json::to_string(msg)?);
        }
    } else {
        for msg in &messages {
            println!(
                "{} [{}] {} -> {}: {}",
                msg.id,
                msg.time.to_rfc3339(),
                msg.from,
                msg.to,
                msg.body
            );
        }
    }
    Ok(())
}

fn parse_timestamp(raw: &str) -> Result<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .with_context(|| format!("invalid RFC3339 timestamp: {raw:?}"))
}

fn execute_who(args: JsonArgs) -> Result<()> {
    let store = open_store()?;
    let agents = store.list_agents()?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&agents)?);
    } else {
        for agent in &agents {
            println!(
                "{} (first seen {}, last seen {})",
                agent.name,
                agent.first_seen.to_rfc3339(),
                agent.last_seen.to_rfc3339()
            );
        }
    }
    Ok(())
}

fn execute_status(args: JsonArgs) -> Result<()> {
    let store = open_store()?;
    let project = store.ensure_project(None)?;
    let agents = store.list_agents()?;
    let topics = store.list_topics()?;
    let messages = store.list_all_messages()?;

    if args.json {
        let out = serde_json::json!({
            "project_id": project.id,
            "created": project.created,
            "agents": agents.len(),
            "topics": topics.len(),
            "messages": messages.len(),
            "root": store.root(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!("project: {}", project.id);
        println!("root: {}", store.root().display());
        println!("agents: {}", agents.len());
        println!("topics: {}", topics.len());
        println!("messages: {}", messages.len());
    }
    Ok(())
}

fn execute_topics(args: JsonArgs) -> Result<()> {
    let store = open_store()?;
    let topics = store.list_topics()?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&topics)?);
    } else {
        for topic in &topics {
            println!("{topic}");
        }
    }
    Ok(())
}

fn execute_gc(args: GcArgs) -> Result<()> {
    let store = open_store()?;
    let cutoff = chrono::Utc::now() - chrono::Duration::days(args.days);
    let removed = store.gc(cutoff, args.dry_run)?;

    if args.json {
        let out = serde_json::json!({
            "dry_run": args.dry_run,
            "removed": removed.len(),
            "paths": removed,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else if args.dry_run {
        println!("Would remove {} message(s) older than {} days", removed.len(), args.days);
    } else {
        println!("Removed {} message(s) older than {} days", removed.len(), args.days);
    }
    Ok(())
}

fn execute_init(args: InitArgs) -> Result<()> {
    let store = open_store()?;
    let project_id = args.project.or_else(|| std::env::var("FMAIL_PROJECT").ok());
    let project = store.ensure_project(project_id)?;
    println!("Initialized fmail project {} at {}", project.id, store.root().display());
    Ok(())
}

/// Dial the mail server over its Unix socket and stream `watch` responses
/// until the connection closes. The daemon owns the live `MailHub`; the CLI
/// process has no in-memory access to it, so unlike every other `fmail`
/// subcommand this one cannot fall back to reading `.fmail/` directly.
fn execute_watch(args: WatchArgs) -> Result<()> {
    #[cfg(unix)]
    {
        use forge_core::mail::{Cmd, Request, Response};
        use std::io::{BufRead, BufReader, Write};
        use std::os::unix::net::UnixStream;

        let root = project_root()?;
        let store = MailStore::ensure_root(&root)?;
        let project = store.ensure_project(None)?;

        let socket_path = std::env::var_os("XDG_RUNTIME_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| root.join(".fmail"))
            .join("forged.sock");

        let stream = UnixStream::connect(&socket_path).with_context(|| {
            format!(
                "Failed to connect to the mail server at {}; is forged running?",
                socket_path.display()
            )
        })?;

        let priority_min = args
            .priority_min
            .as_deref()
            .map(parse_priority)
            .transpose()?;

        let request = Request {
            req_id: format!("fmail-watch-{}", std::process::id()),
            project_id: project.id,
            cmd: Cmd::Watch {
                topic: args.topic,
                from: args.from,
                to: args.to,
                priority_min,
                tags: args.tag,
                since: None,
            },
        };

        let mut writer = &stream;
        writer.write_all(serde_json::to_string(&request)?.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;

        let mut reader = BufReader::new(&stream);
        let mut line = String::new();
        loop {
            line.clear();
            match reader.read_line(&mut line) {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => return Err(e).context("reading from mail server"),
            }
            let response: Response = serde_json::from_str(line.trim())?;
            match response {
                Response::Stream(body) => {
                    if let Some(msg) = body.msg {
                        println!("{}", serde_json::to_string(&msg)?);
                    }
                }
                Response::Ack(ack) if !ack.ok => {
                    if let Some(err) = ack.error {
                        anyhow::bail!("{:?}: {}", err.code, err.message);
                    }
                }
                Response::Closed { .. } => break,
                Response::Ack(_) => {}
            }
        }
        Ok(())
    }

    #[cfg(not(unix))]
    {
        let _ = args;
        anyhow::bail!("fmail watch requires a Unix domain socket, unsupported on this platform")
    }
}

fn execute_robot_help() -> Result<()> {
    println!(
        r#"{{"cmds":["send","log","watch","who","status","topics","gc","init"],"wire":"line-delimited JSON, one Request per line, one or more Response lines","send":{{"target":"topic|@agent","body":"string","priority":"low|normal|high","reply_to":"id?","tags":["string"]}},"log":{{"target":"topic|@agent?","since":"rfc3339?","until":"rfc3339?","from":"string?","tag":"string?","priority":"low|normal|high?","limit":"usize?"}},"watch":{{"topic":"string?","from":"string?","to":"string?","priority_min":"low|normal|high?","tags":["string"]}},"env":["FMAIL_AGENT","FMAIL_ROOT","FMAIL_PROJECT"]}}"#
    );
    Ok(())
}
