//! Session registry for tracking Claude Code agent sessions.
//!
//! The registry maps agent names (e.g., `"team-lead"`) to session records
//! containing the Claude Code session ID and the OS process ID. It is shared
//! between the socket server and any component that writes session lifecycle
//! events (e.g., the hook watcher).
//!
//! ## Liveness
//!
//! Liveness is checked using `kill(pid, 0)` on Unix, which probes whether the
//! process exists without sending an actual signal. On non-Unix platforms the
//! check always returns `false` (conservative: treat as dead).
//!
//! ## Thread safety
//!
//! The registry itself is not `Sync`. Callers are expected to wrap it in
//! `Arc<Mutex<SessionRegistry>>` before sharing between tasks.

use std::collections::HashMap;

/// Lifecycle state of a tracked agent session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Session is believed to be running.
    Active,
    /// Session has been explicitly marked dead (e.g., process exited).
    Dead,
}

/// A single agent session record.
#[derive(Debug, Clone)]
pub struct SessionRecord {
    /// Claude Code session UUID (from `CLAUDE_SESSION_ID`).
    pub session_id: String,
    /// OS process ID of the agent process.
    pub process_id: u32,
    /// Current lifecycle state.
    pub state: SessionState,
}

impl SessionRecord {
    /// Return `true` if the OS process is still alive.
    ///
    /// Uses `kill(pid, 0)` on Unix. Always returns `false` on non-Unix platforms.
    pub fn is_process_alive(&self) -> bool {
        is_pid_alive(self.process_id)
    }
}

/// Registry mapping agent names to their session records.
///
/// Wrap in `Arc<Mutex<SessionRegistry>>` for concurrent access.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<String, SessionRecord>,
}

impl SessionRegistry {
    /// Create a new, empty registry.
    pub fn new() -> Self {
        Self {
            sessions: HashMap::new(),
        }
    }

    /// Insert or update the session record for `name`.
    ///
    /// If an entry already exists its `session_id`, `process_id`, and `state`
    /// are replaced. The state is reset to [`SessionState::Active`] on every
    /// upsert.
    pub fn upsert(&mut self, name: &str, session_id: &str, process_id: u32) {
        self.sessions.insert(
            name.to_string(),
            SessionRecord {
                session_id: session_id.to_string(),
                process_id,
                state: SessionState::Active,
            },
        );
    }

    /// Return an immutable reference to the session record for `name`, or
    /// `None` if the agent is not registered.
    pub fn query(&self, name: &str) -> Option<&SessionRecord> {
        self.sessions.get(name)
    }

    /// Mark the session for `name` as [`SessionState::Dead`].
    ///
    /// Does nothing if the agent is not registered.
    pub fn mark_dead(&mut self, name: &str) {
        if let Some(record) = self.sessions.get_mut(name) {
            record.state = SessionState::Dead;
        }
    }

    /// Return the number of registered sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Return `true` if no sessions are registered.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// Shared, thread-safe session registry handle.
pub type SharedSessionRegistry = std::sync::Arc<std::sync::Mutex<SessionRegistry>>;

/// Create a new empty [`SharedSessionRegistry`].
pub fn new_session_registry() -> SharedSessionRegistry {
    std::sync::Arc::new(std::sync::Mutex::new(SessionRegistry::new()))
}

// ── Platform-specific liveness check ─────────────────────────────────────────

/// Check whether an OS process with the given PID is alive.
///
/// On Unix this uses `kill(pid, 0)` — a read-only existence probe that sends
/// no signal. On non-Unix platforms this always returns `false`.
pub fn is_pid_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        pid_alive_unix(pid)
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
        false
    }
}

#[cfg(unix)]
fn pid_alive_unix(pid: u32) -> bool {
    // SAFETY: kill(pid, 0) is a read-only existence check; no signal is sent.
    unsafe extern "C" {
        fn kill(pid: libc::pid_t, sig: libc::c_int) -> libc::c_int;
    }
    let pid_t = pid as libc::pid_t;
    // SAFETY: kill with sig=0 never sends a signal; it only checks PID existence.
    let result = unsafe { kill(pid_t, 0) };
    result == 0
}

// ── Tests ─────────────────────────────────────────────────────────────────────
