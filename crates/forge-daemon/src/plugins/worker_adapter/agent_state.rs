//! Agent state engine: derives an agent's state from adapter signals,
//! screen-capture evidence, and typed event streams, then tracks it per agent.
//!
//! Generalizes the earlier turn-level machine (launching/busy/idle/killed) to
//! the full state lattice, ranked by severity:
//!
//! ```text
//! error > rate_limited > awaiting_approval > working > idle > starting|paused > stopped
//! ```
//!
//! `awaiting_approval`, `rate_limited`, and `error` are *blocking* states: they
//! dominate any non-blocking state in [`resolve`] regardless of confidence.
//! Between two non-blocking states, higher confidence wins; ties break on
//! severity. Two sources agreeing on the same state upgrade its confidence one
//! step (see [`Confidence::upgrade`]).

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Instant;
use tracing::debug;

/// State of an agent as derived by the state engine.
///
/// | State | Meaning | Blocking | Safe to Nudge? |
/// |-------|---------|----------|-----------------|
/// | `Starting` | Pane/session created, agent not yet ready | No | No |
/// | `Working` | Agent is actively processing a turn | No | No |
/// | `Idle` | Agent finished a turn and is waiting for input | No | Yes |
/// | `AwaitingApproval` | Agent is blocked on a permission/approval prompt | Yes | No |
/// | `RateLimited` | Harness reported a rate limit (e.g. HTTP 429) | Yes | No |
/// | `Error` | Harness reported a fatal/unrecoverable error | Yes | No |
/// | `Paused` | Agent was deliberately paused by the scheduler/operator | No | No |
/// | `Stopped` | Agent process has exited | No | No |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentState {
    Starting,
    Working,
    Idle,
    AwaitingApproval,
    RateLimited,
    Error,
    Paused,
    Stopped,
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Starting => write!(f, "starting"),
            Self::Working => write!(f, "working"),
            Self::Idle => write!(f, "idle"),
            Self::AwaitingApproval => write!(f, "awaiting_approval"),
            Self::RateLimited => write!(f, "rate_limited"),
            Self::Error => write!(f, "error"),
            Self::Paused => write!(f, "paused"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

impl AgentState {
    /// Severity rank used for conflict resolution. Higher wins ties.
    pub fn severity(self) -> u8 {
        match self {
            Self::Error => 6,
            Self::RateLimited => 5,
            Self::AwaitingApproval => 4,
            Self::Working => 3,
            Self::Idle => 2,
            Self::Starting | Self::Paused => 1,
            Self::Stopped => 0,
        }
    }

    /// Blocking states dominate non-blocking ones regardless of confidence.
    pub fn is_blocking(self) -> bool {
        matches!(self, Self::AwaitingApproval | Self::RateLimited | Self::Error)
    }

    /// Returns `true` if it is safe to send a nudge to the agent.
    pub fn is_safe_to_nudge(self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Returns `true` if the agent has permanently exited.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped)
    }
}

/// Confidence in a single detection, used when combining evidence from
/// multiple sources (adapter signal, transcript text, prior known state).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    /// Upgrade one step, saturating at `High`. Used when two independent
    /// sources agree on the same state.
    pub fn upgrade(self) -> Self {
        match self {
            Self::Low => Self::Medium,
            Self::Medium | Self::High => Self::High,
        }
    }
}

/// Outcome of a single state detection pass.
#[derive(Debug, Clone)]
pub struct DetectionResult {
    pub state: AgentState,
    pub confidence: Confidence,
    pub reason: String,
    pub evidence: Vec<String>,
}

impl DetectionResult {
    pub fn new(state: AgentState, confidence: Confidence, reason: impl Into<String>) -> Self {
        Self {
            state,
            confidence,
            reason: reason.into(),
            evidence: Vec::new(),
        }
    }

    pub fn with_evidence(mut self, evidence: impl Into<String>) -> Self {
        self.evidence.push(evidence.into());
        self
    }
}

/// Combine two independent detections into one, per the conflict resolution
/// rules: blocking states dominate, otherwise higher confidence wins, ties
/// break on severity, and agreement upgrades confidence.
pub fn resolve(a: DetectionResult, b: DetectionResult) -> DetectionResult {
    if a.state == b.state {
        let mut merged = a;
        merged.confidence = merged.confidence.upgrade();
        merged.evidence.extend(b.evidence);
        return merged;
    }

    match (a.state.is_blocking(), b.state.is_blocking()) {
        (true, false) => return a,
        (false, true) => return b,
        _ => {}
    }

    if a.confidence != b.confidence {
        return if a.confidence > b.confidence { a } else { b };
    }

    if a.state.severity() >= b.state.severity() {
        a
    } else {
        b
    }
}

/// Rule-based evidence pass over transcript text: looks for harness signals
/// (rate limits, permission prompts, fatal traces) that a pure adapter signal
/// might miss or lag behind.
///
/// Returns `None` when the transcript carries no recognizable evidence for a
/// blocking state.
pub fn detect_transcript_evidence(transcript: &str) -> Option<DetectionResult> {
    let lower = transcript.to_ascii_lowercase();

    if lower.contains("429") || lower.contains("rate limit") || lower.contains("rate-limited") {
        return Some(
            DetectionResult::new(
                AgentState::RateLimited,
                Confidence::Medium,
                "transcript mentions a rate limit",
            )
            .with_evidence("rate_limit_pattern"),
        );
    }

    if lower.contains("permission to") || lower.contains("allow this action") || lower.contains("approve this") {
        return Some(
            DetectionResult::new(
                AgentState::AwaitingApproval,
                Confidence::Medium,
                "transcript mentions a permission prompt",
            )
            .with_evidence("approval_prompt_pattern"),
        );
    }

    if lower.contains("panicked at") || lower.contains("fatal:") || lower.contains("traceback (most recent") {
        return Some(
            DetectionResult::new(
                AgentState::Error,
                Confidence::Low,
                "transcript contains a fatal trace",
            )
            .with_evidence("fatal_trace_pattern"),
        );
    }

    None
}

/// Pane and log file information for a running agent.
///
/// Stored in `AgentStateTracker` so the socket server can answer
/// `agent-pane` queries without direct access to worker handles.
#[derive(Debug, Clone)]
pub struct AgentPaneInfo {
    /// Backend pane identifier (e.g., tmux pane `"%42"`).
    pub pane_id: String,
    /// Absolute path to the agent's log file.
    pub log_path: PathBuf,
}

/// Tracks per-agent state.
///
/// Thread-safe via external `Arc<Mutex<AgentStateTracker>>` wrapping.
pub struct AgentStateTracker {
    states: HashMap<String, AgentState>,
    last_transition: HashMap<String, Instant>,
    /// Pane and log path information per agent, stored for socket queries.
    pane_info: HashMap<String, AgentPaneInfo>,
}

impl AgentStateTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self {
            states: HashMap::new(),
            last_transition: HashMap::new(),
            pane_info: HashMap::new(),
        }
    }

    /// Register a newly spawned agent in `Starting` state.
    pub fn register_agent(&mut self, agent_id: &str) {
        self.set_state_inner(agent_id, AgentState::Starting);
        debug!("Agent {agent_id} registered (state: starting)");
    }

    /// Remove an agent from tracking.
    pub fn unregister_agent(&mut self, agent_id: &str) {
        self.states.remove(agent_id);
        self.last_transition.remove(agent_id);
        self.pane_info.remove(agent_id);
        debug!("Agent {agent_id} unregistered from state tracker");
    }

    /// Transition an agent to a new state, logging the transition at DEBUG.
    pub fn set_state(&mut self, agent_id: &str, new_state: AgentState) {
        let old = self.states.get(agent_id).copied();
        self.set_state_inner(agent_id, new_state);
        match old {
            Some(old_state) => debug!("Agent {agent_id}: {old_state} → {new_state}"),
            None => debug!("Agent {agent_id}: (new) → {new_state}"),
        }
    }

    /// Apply a [`DetectionResult`], resolving it against the agent's current
    /// state when one is tracked (so a stale non-blocking signal cannot
    /// override a still-active blocking state).
    pub fn apply_detection(&mut self, agent_id: &str, detection: DetectionResult) {
        let resolved = match self.get_state(agent_id) {
            Some(current) if current.is_blocking() && !detection.state.is_blocking() => {
                // Keep the blocking state unless the new detection itself is
                // at least as confident a blocking signal.
                DetectionResult::new(current, Confidence::High, "retained prior blocking state")
            }
            _ => detection,
        };
        self.set_state(agent_id, resolved.state);
    }

    fn set_state_inner(&mut self, agent_id: &str, state: AgentState) {
        self.states.insert(agent_id.to_string(), state);
        self.last_transition.insert(agent_id.to_string(), Instant::now());
    }

    /// Get the current state of an agent.
    pub fn get_state(&self, agent_id: &str) -> Option<AgentState> {
        self.states.get(agent_id).copied()
    }

    /// Get the duration since the last state transition for an agent.
    pub fn time_since_transition(&self, agent_id: &str) -> Option<std::time::Duration> {
        self.last_transition.get(agent_id).map(|t| t.elapsed())
    }

    /// Snapshot of all current agent states.
    pub fn all_states(&self) -> HashMap<String, AgentState> {
        self.states.clone()
    }

    /// Store pane and log file information for an agent.
    ///
    /// Called by the worker adapter after spawning a worker so that the socket
    /// server can answer `agent-pane` queries.
    ///
    /// # Arguments
    ///
    /// * `agent_id`  - Agent name (e.g., `"arch-ctm"`)
    /// * `pane_id`   - Backend pane identifier (e.g., `"%42"`)
    /// * `log_path`  - Absolute path to the agent's log file
    pub fn set_pane_info(&mut self, agent_id: &str, pane_id: &str, log_path: &std::path::Path) {
        self.pane_info.insert(
            agent_id.to_string(),
            AgentPaneInfo {
                pane_id: pane_id.to_string(),
                log_path: log_path.to_path_buf(),
            },
        );
        debug!("Agent {agent_id} pane info stored: pane={pane_id} log={}", log_path.display());
    }

    /// Retrieve pane and log file information for an agent.
    ///
    /// Returns `None` if the agent has not been registered or no pane info has
    /// been stored for it yet.
    pub fn get_pane_info(&self, agent_id: &str) -> Option<&AgentPaneInfo> {
        self.pane_info.get(agent_id)
    }
}

impl Default for AgentStateTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state_is_starting() {
        let mut tracker = AgentStateTracker::new();
        tracker.register_agent("arch-ctm");
        assert_eq!(tracker.get_state("arch-ctm"), Some(AgentState::Starting));
    }

    #[test]
    fn test_starting_to_idle_transition() {
        let mut tracker = AgentStateTracker::new();
        tracker.register_agent("arch-ctm");
        tracker.set_state("arch-ctm", AgentState::Idle);
        assert_eq!(tracker.get_state("arch-ctm"), Some(AgentState::Idle));
    }

    #[test]
    fn test_idle_to_working_transition() {
        let mut tracker = AgentStateTracker::new();
        tracker.register_agent("arch-ctm");
        tracker.set_state("arch-ctm", AgentState::Idle);
        tracker.set_state("arch-ctm", AgentState::Working);
        assert_eq!(tracker.get_state("arch-ctm"), Some(AgentState::Working));
    }

    #[test]
    fn test_working_to_idle_transition() {
        let mut tracker = AgentStateTracker::new();
        tracker.register_agent("arch-ctm");
        tracker.set_state("arch-ctm", AgentState::Working);
        tracker.set_state("arch-ctm", AgentState::Idle);
        assert_eq!(tracker.get_state("arch-ctm"), Some(AgentState::Idle));
    }

    #[test]
    fn test_idle_to_stopped_transition() {
        let mut tracker = AgentStateTracker::new();
        tracker.register_agent("arch-ctm");
        tracker.set_state("arch-ctm", AgentState::Idle);
        tracker.set_state("arch-ctm", AgentState::Stopped);
        assert_eq!(tracker.get_state("arch-ctm"), Some(AgentState::Stopped));
    }

    #[test]
    fn test_full_lifecycle() {
        let mut tracker = AgentStateTracker::new();
        tracker.register_agent("arch-ctm");
        assert_eq!(tracker.get_state("arch-ctm"), Some(AgentState::Starting));

        tracker.set_state("arch-ctm", AgentState::Idle);
        assert_eq!(tracker.get_state("arch-ctm"), Some(AgentState::Idle));
        assert!(tracker.get_state("arch-ctm").unwrap().is_safe_to_nudge());

        tracker.set_state("arch-ctm", AgentState::Working);
        assert!(!tracker.get_state("arch-ctm").unwrap().is_safe_to_nudge());

        tracker.set_state("arch-ctm", AgentState::Idle);

        tracker.set_state("arch-ctm", AgentState::Stopped);
        assert!(tracker.get_state("arch-ctm").unwrap().is_terminal());
        assert!(!tracker.get_state("arch-ctm").unwrap().is_safe_to_nudge());
    }

    #[test]
    fn test_unregister_removes_agent() {
        let mut tracker = AgentStateTracker::new();
        tracker.register_agent("arch-ctm");
        assert!(tracker.get_state("arch-ctm").is_some());
        tracker.unregister_agent("arch-ctm");
        assert!(tracker.get_state("arch-ctm").is_none());
    }

    #[test]
    fn test_unregister_removes_pane_info() {
        let mut tracker = AgentStateTracker::new();
        tracker.register_agent("arch-ctm");
        tracker.set_pane_info("arch-ctm", "%42", std::path::Path::new("/tmp/arch-ctm.log"));
        assert!(tracker.get_pane_info("arch-ctm").is_some());
        tracker.unregister_agent("arch-ctm");
        assert!(tracker.get_pane_info("arch-ctm").is_none());
    }

    #[test]
    fn test_unknown_agent_returns_none() {
        let tracker = AgentStateTracker::new();
        assert!(tracker.get_state("unknown-agent").is_none());
    }

    #[test]
    fn test_all_states() {
        let mut tracker = AgentStateTracker::new();
        tracker.register_agent("agent-a");
        tracker.register_agent("agent-b");
        tracker.set_state("agent-b", AgentState::Idle);

        let states = tracker.all_states();
        assert_eq!(states.len(), 2);
        assert_eq!(states.get("agent-a"), Some(&AgentState::Starting));
        assert_eq!(states.get("agent-b"), Some(&AgentState::Idle));
    }

    #[test]
    fn test_display() {
        assert_eq!(AgentState::Starting.to_string(), "starting");
        assert_eq!(AgentState::Working.to_string(), "working");
        assert_eq!(AgentState::Idle.to_string(), "idle");
        assert_eq!(AgentState::AwaitingApproval.to_string(), "awaiting_approval");
        assert_eq!(AgentState::RateLimited.to_string(), "rate_limited");
        assert_eq!(AgentState::Error.to_string(), "error");
        assert_eq!(AgentState::Paused.to_string(), "paused");
        assert_eq!(AgentState::Stopped.to_string(), "stopped");
    }

    #[test]
    fn test_is_safe_to_nudge() {
        assert!(!AgentState::Starting.is_safe_to_nudge());
        assert!(!AgentState::Working.is_safe_to_nudge());
        assert!(AgentState::Idle.is_safe_to_nudge());
        assert!(!AgentState::AwaitingApproval.is_safe_to_nudge());
        assert!(!AgentState::RateLimited.is_safe_to_nudge());
        assert!(!AgentState::Error.is_safe_to_nudge());
        assert!(!AgentState::Paused.is_safe_to_nudge());
        assert!(!AgentState::Stopped.is_safe_to_nudge());
    }

    #[test]
    fn test_is_terminal() {
        assert!(!AgentState::Starting.is_terminal());
        assert!(!AgentState::Working.is_terminal());
        assert!(!AgentState::Idle.is_terminal());
        assert!(AgentState::Stopped.is_terminal());
    }

    #[test]
    fn test_severity_order() {
        assert!(AgentState::Error.severity() > AgentState::RateLimited.severity());
        assert!(AgentState::RateLimited.severity() > AgentState::AwaitingApproval.severity());
        assert!(AgentState::AwaitingApproval.severity() > AgentState::Working.severity());
        assert!(AgentState::Working.severity() > AgentState::Idle.severity());
        assert!(AgentState::Idle.severity() > AgentState::Starting.severity());
        assert_eq!(AgentState::Starting.severity(), AgentState::Paused.severity());
        assert!(AgentState::Paused.severity() > AgentState::Stopped.severity());
    }

    #[test]
    fn test_is_blocking() {
        assert!(AgentState::AwaitingApproval.is_blocking());
        assert!(AgentState::RateLimited.is_blocking());
        assert!(AgentState::Error.is_blocking());
        assert!(!AgentState::Idle.is_blocking());
        assert!(!AgentState::Working.is_blocking());
        assert!(!AgentState::Starting.is_blocking());
        assert!(!AgentState::Paused.is_blocking());
        assert!(!AgentState::Stopped.is_blocking());
    }

    #[test]
    fn test_time_since_transition() {
        let mut tracker = AgentStateTracker::new();
        tracker.register_agent("arch-ctm");
        let elapsed = tracker.time_since_transition("arch-ctm");
        assert!(elapsed.is_some());
        assert!(elapsed.unwrap().as_secs() < 1);
    }

    // ── Pane info tests ───────────────────────────────────────────────────────

    #[test]
    fn test_pane_info_set_and_get() {
        let mut tracker = AgentStateTracker::new();
        tracker.register_agent("arch-ctm");
        tracker.set_pane_info("arch-ctm", "%42", std::path::Path::new("/tmp/arch-ctm.log"));

        let info = tracker.get_pane_info("arch-ctm").expect("pane info should be set");
        assert_eq!(info.pane_id, "%42");
        assert_eq!(info.log_path, std::path::PathBuf::from("/tmp/arch-ctm.log"));
    }

    #[test]
    fn test_pane_info_not_found() {
        let tracker = AgentStateTracker::new();
        assert!(tracker.get_pane_info("unregistered-agent").is_none());
    }

    #[test]
    fn test_pane_info_overwrite() {
        let mut tracker = AgentStateTracker::new();
        tracker.register_agent("arch-ctm");
        tracker.set_pane_info("arch-ctm", "%10", std::path::Path::new("/tmp/old.log"));
        tracker.set_pane_info("arch-ctm", "%20", std::path::Path::new("/tmp/new.log"));

        let info = tracker.get_pane_info("arch-ctm").unwrap();
        assert_eq!(info.pane_id, "%20");
        assert_eq!(info.log_path, std::path::PathBuf::from("/tmp/new.log"));
    }

    // ── Detection / resolution tests ────────────────────────────────────────

    #[test]
    fn test_resolve_blocking_dominates() {
        let a = DetectionResult::new(AgentState::Working, Confidence::High, "adapter signal");
        let b = DetectionResult::new(AgentState::RateLimited, Confidence::Low, "transcript 429");
        let resolved = resolve(a, b);
        assert_eq!(resolved.state, AgentState::RateLimited);
    }

    #[test]
    fn test_resolve_confidence_breaks_ties_between_non_blocking() {
        let a = DetectionResult::new(AgentState::Idle, Confidence::High, "adapter quiet");
        let b = DetectionResult::new(AgentState::Working, Confidence::Low, "stale event");
        let resolved = resolve(a, b);
        assert_eq!(resolved.state, AgentState::Idle);
    }

    #[test]
    fn test_resolve_severity_breaks_confidence_ties() {
        let a = DetectionResult::new(AgentState::Working, Confidence::Medium, "adapter signal");
        let b = DetectionResult::new(AgentState::Idle, Confidence::Medium, "transcript quiet");
        let resolved = resolve(a, b);
        assert_eq!(resolved.state, AgentState::Working);
    }

    #[test]
    fn test_resolve_agreement_upgrades_confidence() {
        let a = DetectionResult::new(AgentState::Idle, Confidence::Low, "adapter signal");
        let b = DetectionResult::new(AgentState::Idle, Confidence::Low, "transcript quiet");
        let resolved = resolve(a, b);
        assert_eq!(resolved.state, AgentState::Idle);
        assert_eq!(resolved.confidence, Confidence::Medium);
    }

    #[test]
    fn test_detect_transcript_evidence_rate_limit() {
        let detection = detect_transcript_evidence("error: received HTTP 429 too many requests")
            .expect("should detect rate limit");
        assert_eq!(detection.state, AgentState::RateLimited);
    }

    #[test]
    fn test_detect_transcript_evidence_approval() {
        let detection = detect_transcript_evidence("I need permission to delete this file, approve this?")
            .expect("should detect approval prompt");
        assert_eq!(detection.state, AgentState::AwaitingApproval);
    }

    #[test]
    fn test_detect_transcript_evidence_fatal() {
        let detection = detect_transcript_evidence("thread 'main' panicked at 'index out of bounds'")
            .expect("should detect fatal error");
        assert_eq!(detection.state, AgentState::Error);
    }

    #[test]
    fn test_detect_transcript_evidence_none() {
        assert!(detect_transcript_evidence("all tests passed, nothing else to do").is_none());
    }

    #[test]
    fn test_apply_detection_keeps_blocking_over_stale_non_blocking() {
        let mut tracker = AgentStateTracker::new();
        tracker.register_agent("arch-ctm");
        tracker.set_state("arch-ctm", AgentState::AwaitingApproval);

        tracker.apply_detection(
            "arch-ctm",
            DetectionResult::new(AgentState::Working, Confidence::Low, "stale poll"),
        );

        assert_eq!(tracker.get_state("arch-ctm"), Some(AgentState::AwaitingApproval));
    }

    #[test]
    fn test_apply_detection_advances_non_blocking_state() {
        let mut tracker = AgentStateTracker::new();
        tracker.register_agent("arch-ctm");
        tracker.set_state("arch-ctm", AgentState::Working);

        tracker.apply_detection(
            "arch-ctm",
            DetectionResult::new(AgentState::Idle, Confidence::High, "adapter quiet"),
        );

        assert_eq!(tracker.get_state("arch-ctm"), Some(AgentState::Idle));
    }
}
