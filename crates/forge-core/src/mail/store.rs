//! On-disk mail store: the `.fmail/` project layout (`spec.md` §4.2, §6).
//!
//! ```text
//! <project_root>/.fmail/
//!     project.json
//!     agents/<name>.json
//!     topics/<topic>/<id>.json
//!     dm/<recipient>/<id>.json
//! ```
//!
//! Every message file is written tmpfile-then-rename on the same
//! filesystem so readers never observe a torn write; listing tolerates a
//! stray `.tmp` sibling by skipping it.

use super::types::{
    normalize_tags, parse_body, validate_name, AgentRecord, MailTarget, Message, Project,
    SendOptions, ValidationError, MAX_BODY_BYTES,
};
use crate::ids::{Clock, MessageIdGenerator, SystemClock};
use crate::io::hash::compute_hash;
use crate::io::lock::acquire_lock;
use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("JSON error at {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("message id {0:?} already exists")]
    IdConflict(String),
    #[error("project not found at {0}")]
    ProjectNotFound(PathBuf),
    #[error(transparent)]
    Lock(#[from] crate::io::InboxError),
}

type Result<T> = std::result::Result<T, StoreError>;

fn io_err(path: &Path, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn json_err(path: &Path, source: serde_json::Error) -> StoreError {
    StoreError::Json {
        path: path.to_path_buf(),
        source,
    }
}

/// Write `contents` to `path` atomically: write to `<path>.tmp`, `fsync`,
/// then `rename` over the destination (same filesystem, so this is an
/// atomic replace on POSIX and Windows alike).
fn atomic_write(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    let tmp_path = path.with_extension("tmp");
    {
        let mut file = fs::File::create(&tmp_path).map_err(|e| io_err(&tmp_path, e))?;
        use std::io::Write;
        file.write_all(contents).map_err(|e| io_err(&tmp_path, e))?;
        file.sync_all().map_err(|e| io_err(&tmp_path, e))?;
    }
    fs::rename(&tmp_path, path).map_err(|e| io_err(path, e))?;
    Ok(())
}

/// Create `path` exclusively (fails if it already exists) via a
/// `.tmp`-then-rename, so a concurrent writer racing the same id never
/// observes a partial file.
fn atomic_create_new(path: &Path, contents: &[u8]) -> Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    let tmp_path = path.with_extension(format!("tmp-{}", crate::ids::short_id()));
    {
        let mut file = fs::File::create(&tmp_path).map_err(|e| io_err(&tmp_path, e))?;
        use std::io::Write;
        file.write_all(contents).map_err(|e| io_err(&tmp_path, e))?;
        file.sync_all().map_err(|e| io_err(&tmp_path, e))?;
    }
    match fs::hard_link(&tmp_path, path) {
        Ok(()) => {
            let _ = fs::remove_file(&tmp_path);
            Ok(true)
        }
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
            let _ = fs::remove_file(&tmp_path);
            Ok(false)
        }
        Err(e) => {
            let _ = fs::remove_file(&tmp_path);
            Err(io_err(path, e))
        }
    }
}

/// A project-scoped handle onto `<project_root>/.fmail/`.
pub struct MailStore {
    root: PathBuf,
    clock: Arc<dyn Clock>,
    ids: MessageIdGenerator,
}

impl MailStore {
    /// Ensure `<project_root>/.fmail/` and its subdirectories exist, and
    /// return a store bound to them.
    pub fn ensure_root(project_root: &Path) -> Result<Self> {
        Self::ensure_root_with_clock(project_root, Arc::new(SystemClock))
    }

    pub fn ensure_root_with_clock(project_root: &Path, clock: Arc<dyn Clock>) -> Result<Self> {
        let root = project_root.join(".fmail");
        for sub in ["agents", "topics", "dm"] {
            fs::create_dir_all(root.join(sub)).map_err(|e| io_err(&root.join(sub), e))?;
        }
        let ids = MessageIdGenerator::new(clock.clone());
        Ok(Self { root, clock, ids })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn project_path(&self) -> PathBuf {
        self.root.join("project.json")
    }

    /// Load or create `project.json`. If `id` is given, it overwrites
    /// whatever is on disk (`fmail init --project <id>` semantics);
    /// otherwise an absent project file is created by hashing the
    /// canonical project root path.
    pub fn ensure_project(&self, id: Option<String>) -> Result<Project> {
        let path = self.project_path();
        if let Some(id) = id {
            let project = Project {
                id,
                created: self.clock.now(),
                unknown_fields: Default::default(),
            };
            let bytes = serde_json::to_vec_pretty(&project).map_err(|e| json_err(&path, e))?;
            atomic_write(&path, &bytes)?;
            return Ok(project);
        }
        if path.exists() {
            let content = fs::read(&path).map_err(|e| io_err(&path, e))?;
            let project: Project =
                serde_json::from_slice(&content).map_err(|e| json_err(&path, e))?;
            return Ok(project);
        }
        let canonical = self
            .root
            .parent()
            .unwrap_or(&self.root)
            .canonicalize()
            .unwrap_or_else(|_| self.root.clone());
        let derived_id = compute_hash(canonical.to_string_lossy().as_bytes())[..16].to_string();
        let project = Project {
            id: derived_id,
            created: self.clock.now(),
            unknown_fields: Default::default(),
        };
        let bytes = serde_json::to_vec_pretty(&project).map_err(|e| json_err(&path, e))?;
        atomic_write(&path, &bytes)?;
        Ok(project)
    }

    pub fn load_project(&self) -> Result<Project> {
        let path = self.project_path();
        if !path.exists() {
            return Err(StoreError::ProjectNotFound(self.root.clone()));
        }
        let content = fs::read(&path).map_err(|e| io_err(&path, e))?;
        serde_json::from_slice(&content).map_err(|e| json_err(&path, e))
    }

    fn agent_path(&self, name: &str) -> PathBuf {
        self.root.join("agents").join(format!("{name}.json"))
    }

    /// Register (or touch `last_seen` on) an agent. Two concurrent
    /// first-sends racing to create the same agent file are resolved
    /// with a file lock around read-modify-write, per the "agent
    /// registry races" design note in `spec.md` §9.
    pub fn register_agent(&self, name: &str, host: Option<String>) -> Result<AgentRecord> {
        validate_name(name)?;
        let path = self.agent_path(name);
        let lock_path = path.with_extension("lock");
        let _lock = acquire_lock(&lock_path, 5)?;
        let now = self.clock.now();
        let record = if path.exists() {
            let content = fs::read(&path).map_err(|e| io_err(&path, e))?;
            let mut existing: AgentRecord =
                serde_json::from_slice(&content).map_err(|e| json_err(&path, e))?;
            existing.last_seen = now;
            if host.is_some() {
                existing.host = host;
            }
            existing
        } else {
            AgentRecord {
                name: name.to_string(),
                first_seen: now,
                last_seen: now,
                host,
                unknown_fields: Default::default(),
            }
        };
        let bytes = serde_json::to_vec_pretty(&record).map_err(|e| json_err(&path, e))?;
        atomic_write(&path, &bytes)?;
        Ok(record)
    }

    pub fn list_agents(&self) -> Result<Vec<AgentRecord>> {
        let dir = self.root.join("agents");
        let mut out = Vec::new();
        if !dir.exists() {
            return Ok(out);
        }
        let mut entries: Vec<_> = fs::read_dir(&dir)
            .map_err(|e| io_err(&dir, e))?
            .filter_map(|e| e.ok())
            .collect();
        entries.sort_by_key(|e| e.file_name());
        for entry in entries {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let content = fs::read(&path).map_err(|e| io_err(&path, e))?;
            match serde_json::from_slice::<AgentRecord>(&content) {
                Ok(record) => out.push(record),
                Err(_) => continue,
            }
        }
        Ok(out)
    }

    fn message_dir(&self, target: &MailTarget) -> PathBuf {
        self.root.join(target.store_subdir())
    }

    fn message_path(&self, target: &MailTarget, id: &str) -> PathBuf {
        self.message_dir(target).join(format!("{id}.json"))
    }

    /// Write a message using a caller-provided id (e.g. a relay delivery
    /// replaying a peer's own id). Fails with [`StoreError::IdConflict`]
    /// if a message with that id already exists under the target.
    pub fn save_message_exact(&self, target: &MailTarget, msg: &Message) -> Result<()> {
        let path = self.message_path(target, &msg.id);
        let bytes = serde_json::to_vec(msg).map_err(|e| json_err(&path, e))?;
        if !atomic_create_new(&path, &bytes)? {
            return Err(StoreError::IdConflict(msg.id.clone()));
        }
        Ok(())
    }

    /// Validate, allocate an id, and atomically persist a new message
    /// from `from` to `target` with the given raw body text.
    pub fn save_message(
        &self,
        from: &str,
        target: &MailTarget,
        raw_body: &str,
        opts: SendOptions,
    ) -> Result<Message> {
        validate_name(from)?;
        let body = parse_body(raw_body);
        let body_bytes = serde_json::to_vec(&body).map_err(|e| json_err(&self.root, e))?;
        if body_bytes.len() > MAX_BODY_BYTES {
            return Err(ValidationError::BodyTooLarge {
                actual: body_bytes.len(),
            }
            .into());
        }
        let tags = normalize_tags(&opts.tags)?;
        let id = self.ids.next_id();
        let msg = Message {
            id: id.clone(),
            from: from.to_string(),
            to: target.display(),
            time: self.clock.now(),
            body,
            priority: opts.priority,
            reply_to: opts.reply_to,
            tags,
            host: opts.host,
            unknown_fields: Default::default(),
        };
        let path = self.message_path(target, &id);
        if !atomic_create_new(&path, &msg_bytes(&msg)?)? {
            return Err(StoreError::IdConflict(id));
        }
        Ok(msg)
    }

    fn read_message_dir(&self, dir: &Path) -> Result<Vec<Message>> {
        let mut out = Vec::new();
        if !dir.exists() {
            return Ok(out);
        }
        let mut entries: Vec<_> = fs::read_dir(dir)
            .map_err(|e| io_err(dir, e))?
            .filter_map(|e| e.ok())
            .collect();
        entries.sort_by_key(|e| e.file_name());
        for entry in entries {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue; // skips .tmp / .lock siblings
            }
            let content = match fs::read(&path) {
                Ok(c) => c,
                Err(_) => continue,
            };
            if let Ok(msg) = serde_json::from_slice::<Message>(&content) {
                out.push(msg);
            }
        }
        Ok(out)
    }

    pub fn list_topic_messages(&self, topic: &str) -> Result<Vec<Message>> {
        validate_name(topic)?;
        self.read_message_dir(&self.root.join("topics").join(topic))
    }

    pub fn list_dm_messages(&self, recipient: &str) -> Result<Vec<Message>> {
        validate_name(recipient)?;
        self.read_message_dir(&self.root.join("dm").join(recipient))
    }

    /// All messages across topics and DMs, in id (send) order. Used by
    /// the relay's catch-up replay and by `fmail log` without a target.
    pub fn list_all_messages(&self) -> Result<Vec<Message>> {
        let mut out = Vec::new();
        for base in ["topics", "dm"] {
            let base_dir = self.root.join(base);
            if !base_dir.exists() {
                continue;
            }
            for entry in fs::read_dir(&base_dir)
                .map_err(|e| io_err(&base_dir, e))?
                .filter_map(|e| e.ok())
            {
                if entry.path().is_dir() {
                    out.extend(self.read_message_dir(&entry.path())?);
                }
            }
        }
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }

    /// Topic names that currently have at least one message, filtered to
    /// valid kebab names (`spec.md` §9 "lazy dir-exists topics").
    pub fn list_topics(&self) -> Result<Vec<String>> {
        let dir = self.root.join("topics");
        let mut out = Vec::new();
        if !dir.exists() {
            return Ok(out);
        }
        for entry in fs::read_dir(&dir).map_err(|e| io_err(&dir, e))?.flatten() {
            if !entry.path().is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if validate_name(&name).is_ok() {
                out.push(name);
            }
        }
        out.sort();
        Ok(out)
    }

    /// Reserve a topic for display purposes without writing any file
    /// (`spec.md` §9: "touch_topic... reserved for UI").
    pub fn touch_topic(&self, name: &str) -> Result<()> {
        validate_name(name)?;
        Ok(())
    }

    /// Delete message files older than `cutoff`. Returns the list of
    /// paths removed (or that would be removed, if `dry_run`). Ids embed
    /// their send timestamp, so age is derived from the id prefix rather
    /// than filesystem mtime.
    pub fn gc(&self, cutoff: DateTime<Utc>, dry_run: bool) -> Result<Vec<PathBuf>> {
        let mut removed = Vec::new();
        for base in ["topics", "dm"] {
            let base_dir = self.root.join(base);
            if !base_dir.exists() {
                continue;
            }
            for entry in fs::read_dir(&base_dir)
                .map_err(|e| io_err(&base_dir, e))?
                .flatten()
            {
                let sub = entry.path();
                if !sub.is_dir() {
                    continue;
                }
                for msg_entry in fs::read_dir(&sub).map_err(|e| io_err(&sub, e))?.flatten() {
                    let path = msg_entry.path();
                    if path.extension().and_then(|e| e.to_str()) != Some("json") {
                        continue;
                    }
                    let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                        continue;
                    };
                    if let Some(sent_at) = id_timestamp(stem) {
                        if sent_at < cutoff {
                            if !dry_run {
                                let _ = fs::remove_file(&path);
                            }
                            removed.push(path);
                        }
                    }
                }
                if !dry_run {
                    let _ = fs::remove_dir(&sub); // no-op unless now empty
                }
            }
        }
        Ok(removed)
    }
}

fn msg_bytes(msg: &Message) -> Result<Vec<u8>> {
    serde_json::to_vec(msg).map_err(|e| json_err(Path::new(&msg.id), e))
}

/// Parse the `YYYYMMDD-HHMMSS` prefix of a message id into a UTC instant.
fn id_timestamp(id: &str) -> Option<DateTime<Utc>> {
    let (date_part, rest) = id.split_once('-')?;
    let (time_part, _seq) = rest.split_once('-')?;
    let combined = format!("{date_part}{time_part}");
    chrono::NaiveDateTime::parse_from_str(&combined, "%Y%m%d%H%M%S")
        .ok()
        .map(|naive| naive.and_utc())
}
