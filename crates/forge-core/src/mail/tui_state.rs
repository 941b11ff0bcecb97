//! Per-user TUI state file, `.fmail/tui-state.json` (`spec.md` §3
//! "TUIState", §6 "TUI state file").
//!
//! The core only owns the on-disk format and its load/save/migrate
//! mechanics; the TUI itself decides when to read markers, set bookmarks,
//! or stash a compose draft. File-locked (`crate::io::lock`) and written
//! tmp+rename, same discipline as [`super::store::MailStore`]'s message
//! files, so a save racing a read never exposes a torn file.

use crate::io::lock::acquire_lock;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Current on-disk schema version. Bumped whenever the shape of
/// [`TuiState`] changes in a way that needs a migration step.
pub const CURRENT_VERSION: u32 = 2;

/// Bookmarks older than this are pruned on every save.
const BOOKMARK_MAX_AGE_DAYS: i64 = 30;
/// At most this many bookmarks are kept, newest first.
const BOOKMARK_MAX_COUNT: usize = 500;

#[derive(Debug, Error)]
pub enum TuiStateError {
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
    #[error(transparent)]
    Lock(#[from] crate::io::InboxError),
}

type Result<T> = std::result::Result<T, TuiStateError>;

fn io_err(path: &Path, source: std::io::Error) -> TuiStateError {
    TuiStateError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn json_err(path: &Path, source: serde_json::Error) -> TuiStateError {
    TuiStateError::Json {
        path: path.to_path_buf(),
        source,
    }
}

/// A bookmarked message, with the time it was bookmarked (used for
/// age-based pruning).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Bookmark {
    pub message_id: String,
    pub bookmarked_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// A saved compose draft, keyed by target in [`TuiState::drafts`].
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct Draft {
    pub body: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// A saved search: a name plus the raw filter query string the TUI's
/// search box parses; core treats it as opaque.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SavedSearch {
    pub name: String,
    pub query: String,
}

/// A user-defined notification rule: fire when a message matches `topic`
/// and/or carries all of `tags`.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct NotificationRule {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// A named group of DM targets the user can broadcast or filter against
/// from the TUI (e.g. "reviewers" -> `["@alice", "@bob"]`). Members are
/// normalized to the `@name` form regardless of how the user typed them.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct AgentGroup {
    pub name: String,
    #[serde(default)]
    pub members: Vec<String>,
}

fn default_true() -> bool {
    true
}

/// Versioned per-user TUI state (`spec.md` §3 "TUIState", §6).
///
/// `read_markers` maps a target's wire string (`topic` or `@agent`) to the
/// id of the last message the user has seen there; `starred_topics` is the
/// legacy-format carryover (pre-v2 files had no `version` field and only
/// these two). Everything else is additive state introduced since.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TuiState {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub read_markers: HashMap<String, String>,
    #[serde(default)]
    pub starred_topics: HashSet<String>,
    #[serde(default)]
    pub bookmarks: Vec<Bookmark>,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
    #[serde(default)]
    pub drafts: HashMap<String, Draft>,
    #[serde(default)]
    pub saved_searches: Vec<SavedSearch>,
    #[serde(default)]
    pub notification_rules: Vec<NotificationRule>,
    #[serde(default)]
    pub agent_groups: Vec<AgentGroup>,
    #[serde(default)]
    pub preferences: HashMap<String, serde_json::Value>,
    /// Unknown fields are preserved verbatim on rewrite (round-trip
    /// stability, `spec.md` §6).
    #[serde(flatten)]
    pub unknown_fields: HashMap<String, serde_json::Value>,
}

fn default_version() -> u32 {
    CURRENT_VERSION
}

impl Default for TuiState {
    fn default() -> Self {
        TuiState {
            version: CURRENT_VERSION,
            read_markers: HashMap::new(),
            starred_topics: HashSet::new(),
            bookmarks: Vec::new(),
            annotations: HashMap::new(),
            drafts: HashMap::new(),
            saved_searches: Vec::new(),
            notification_rules: Vec::new(),
            agent_groups: Vec::new(),
            preferences: HashMap::new(),
            unknown_fields: HashMap::new(),
        }
    }
}

/// Legacy (pre-version) on-disk shape: only `read_markers` and
/// `starred_topics` existed. Any file missing a top-level `version` field
/// is parsed as this shape and auto-migrated (`spec.md` §6, §8 property 13).
#[derive(Debug, Deserialize)]
struct LegacyTuiState {
    #[serde(default)]
    read_markers: HashMap<String, String>,
    #[serde(default)]
    starred_topics: HashSet<String>,
}

impl From<LegacyTuiState> for TuiState {
    fn from(legacy: LegacyTuiState) -> Self {
        TuiState {
            read_markers: legacy.read_markers,
            starred_topics: legacy.starred_topics,
            ..TuiState::default()
        }
    }
}

impl TuiState {
    pub fn path(project_root: &Path) -> PathBuf {
        project_root.join(".fmail").join("tui-state.json")
    }

    fn lock_path(project_root: &Path) -> PathBuf {
        project_root.join(".fmail").join("tui-state.lock")
    }

    /// Load and, if necessary, migrate the state file at `<project_root>/.fmail/tui-state.json`.
    /// A missing file loads as [`TuiState::default`].
    pub fn load(project_root: &Path) -> Result<Self> {
        let path = Self::path(project_root);
        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(io_err(&path, e)),
        };
        Self::parse(&path, &bytes)
    }

    fn parse(path: &Path, bytes: &[u8]) -> Result<Self> {
        let raw: serde_json::Value =
            serde_json::from_slice(bytes).map_err(|e| json_err(path, e))?;
        if raw.get("version").is_some() {
            serde_json::from_value(raw).map_err(|e| json_err(path, e))
        } else {
            let legacy: LegacyTuiState =
                serde_json::from_value(raw).map_err(|e| json_err(path, e))?;
            Ok(legacy.into())
        }
    }

    /// Normalize, prune, and atomically save under a file lock: `flock` on
    /// a sibling `.lock` file, write to `.tmp`, `rename` over the
    /// destination (`spec.md` §5 "TUI state file: flock + tmp+rename").
    pub fn save(&mut self, project_root: &Path) -> Result<()> {
        self.normalize();
        self.prune_bookmarks(Utc::now());

        let dir = project_root.join(".fmail");
        fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        let _lock = acquire_lock(&Self::lock_path(project_root), 5)?;

        let path = Self::path(project_root);
        let bytes = serde_json::to_vec_pretty(self).map_err(|e| json_err(&path, e))?;
        let tmp_path = path.with_extension("tmp");
        {
            use std::io::Write;
            let mut file = fs::File::create(&tmp_path).map_err(|e| io_err(&tmp_path, e))?;
            file.write_all(&bytes).map_err(|e| io_err(&tmp_path, e))?;
            file.sync_all().map_err(|e| io_err(&tmp_path, e))?;
        }
        fs::rename(&tmp_path, &path).map_err(|e| io_err(&path, e))?;
        Ok(())
    }

    /// De-duplicate lists/sets and uniformly `@`-prefix group members
    /// (`spec.md` §6 "All lists de-duplicated and normalized (group
    /// members uniformly `@name`-prefixed)").
    fn normalize(&mut self) {
        self.version = CURRENT_VERSION;
        self.starred_topics = self.starred_topics.drain().collect();

        let mut seen = HashSet::new();
        self.bookmarks.retain(|b| seen.insert(b.message_id.clone()));

        let mut seen_searches = HashSet::new();
        self.saved_searches
            .retain(|s| seen_searches.insert(s.name.clone()));

        let mut seen_rules = HashSet::new();
        self.notification_rules
            .retain(|r| seen_rules.insert(r.name.clone()));

        let mut seen_groups = HashSet::new();
        self.agent_groups
            .retain(|g| seen_groups.insert(g.name.clone()));
        for group in &mut self.agent_groups {
            group.members = normalize_members(&group.members);
        }
    }

    /// Drop bookmarks older than [`BOOKMARK_MAX_AGE_DAYS`], then keep at
    /// most [`BOOKMARK_MAX_COUNT`] newest.
    fn prune_bookmarks(&mut self, now: DateTime<Utc>) {
        let cutoff = now - Duration::days(BOOKMARK_MAX_AGE_DAYS);
        self.bookmarks.retain(|b| b.bookmarked_at >= cutoff);
        self.bookmarks
            .sort_by(|a, b| b.bookmarked_at.cmp(&a.bookmarked_at));
        self.bookmarks.truncate(BOOKMARK_MAX_COUNT);
    }

    /// Record that `target`'s most recent message the user has seen is
    /// `message_id`.
    pub fn mark_read(&mut self, target: &str, message_id: impl Into<String>) {
        self.read_markers.insert(target.to_string(), message_id.into());
    }

    pub fn add_bookmark(&mut self, message_id: impl Into<String>, note: Option<String>, now: DateTime<Utc>) {
        self.bookmarks.push(Bookmark {
            message_id: message_id.into(),
            bookmarked_at: now,
            note,
        });
    }
}

/// `@`-prefix any bare agent-style member names (leaves topic-looking
/// entries alone — this is applied only to fields that are documented as
/// group member lists).
fn normalize_members(members: &[String]) -> Vec<String> {
    let mut out = Vec::with_capacity(members.len());
    let mut seen = HashSet::new();
    for m in members {
        let normalized = if m.starts_with('@') {
            m.clone()
        } else {
            format!("@{m}")
        };
        if seen.insert(normalized.clone()) {
            out.push(normalized);
        }
    }
    out
}
