//! Minimal `~/.ssh/config` reader.
//!
//! Supports `Host` patterns (`*`/`?` wildcards, `!negation`) and the small
//! set of keys the executor backends care about: `HostName`, `Port`, `User`,
//! `IdentityFile`, `ProxyJump`. First matching value per key wins, matching
//! OpenSSH's "first obtained value" rule, and values already supplied by the
//! caller (explicit args) take priority over anything found here.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default)]
pub struct HostConfig {
    pub hostname: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub identity_file: Option<PathBuf>,
    pub proxy_jump: Option<String>,
}

struct Block {
    patterns: Vec<(bool, String)>, // (negated, pattern)
    entries: HashMap<String, String>,
}

/// A parsed `~/.ssh/config`.
pub struct SshConfig {
    blocks: Vec<Block>,
}

impl SshConfig {
    /// Load and parse `~/.ssh/config`. A missing file yields an empty config.
    pub fn load_default() -> Self {
        let Some(home) = dirs::home_dir() else {
            return Self { blocks: Vec::new() };
        };
        Self::load(&home.join(".ssh").join("config"))
    }

    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => Self::parse(&contents),
            Err(_) => Self { blocks: Vec::new() },
        }
    }

    fn parse(contents: &str) -> Self {
        let mut blocks = Vec::new();
        let mut current: Option<Block> = None;

        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = match line.split_once(char::is_whitespace) {
                Some((k, v)) => (k.trim(), v.trim()),
                None => continue,
            };
            let key_lower = key.to_ascii_lowercase();
            if key_lower == "host" {
                if let Some(block) = current.take() {
                    blocks.push(block);
                }
                let patterns = value
                    .split_whitespace()
                    .map(|p| {
                        if let Some(stripped) = p.strip_prefix('!') {
                            (true, stripped.to_string())
                        } else {
                            (false, p.to_string())
                        }
                    })
                    .collect();
                current = Some(Block {
                    patterns,
                    entries: HashMap::new(),
                });
            } else if let Some(block) = current.as_mut() {
                block.entries.entry(key_lower).or_insert_with(|| value.to_string());
            }
        }
        if let Some(block) = current.take() {
            blocks.push(block);
        }
        Self { blocks }
    }

    /// Resolve the merged configuration for `host`, applying every matching
    /// block in file order (first value wins per key, matching OpenSSH).
    pub fn for_host(&self, host: &str) -> HostConfig {
        let mut out = HostConfig::default();
        for block in &self.blocks {
            if !host_matches(host, &block.patterns) {
                continue;
            }
            if out.hostname.is_none()
                && let Some(v) = block.entries.get("hostname")
            {
                out.hostname = Some(v.clone());
            }
            if out.port.is_none()
                && let Some(v) = block.entries.get("port")
                && let Ok(p) = v.parse()
            {
                out.port = Some(p);
            }
            if out.user.is_none()
                && let Some(v) = block.entries.get("user")
            {
                out.user = Some(v.clone());
            }
            if out.identity_file.is_none()
                && let Some(v) = block.entries.get("identityfile")
            {
                out.identity_file = Some(expand_tilde(v));
            }
            if out.proxy_jump.is_none()
                && let Some(v) = block.entries.get("proxyjump")
            {
                out.proxy_jump = Some(v.clone());
            }
        }
        out
    }
}

fn host_matches(host: &str, patterns: &[(bool, String)]) -> bool {
    let mut matched = false;
    for (negated, pattern) in patterns {
        if glob_match(pattern, host) {
            if *negated {
                return false;
            }
            matched = true;
        }
    }
    matched
}

/// `ssh_config(5)` pattern matching: `*` and `?` wildcards, case-sensitive.
fn glob_match(pattern: &str, text: &str) -> bool {
    fn inner(p: &[u8], t: &[u8]) -> bool {
        match (p.first(), t.first()) {
            (None, None) => true,
            (Some(b'*'), _) => inner(&p[1..], t) || (!t.is_empty() && inner(p, &t[1..])),
            (Some(b'?'), Some(_)) => inner(&p[1..], &t[1..]),
            (Some(pc), Some(tc)) if pc == tc => inner(&p[1..], &t[1..]),
            _ => false,
        }
    }
    inner(pattern.as_bytes(), text.as_bytes())
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    } else if path == "~"
        && let Some(home) = dirs::home_dir()
    {
        return home;
    }
    PathBuf::from(path)
}
