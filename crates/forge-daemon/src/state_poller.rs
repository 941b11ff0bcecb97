//! State Poller: periodically re-derives each tracked agent's state from
//! transcript evidence and persists changes (`spec.md` §4.8).
//!
//! Polls at one of three priority intervals depending on an agent's current
//! state (`active`/`idle`-or-`awaiting_approval`/everything else), driven off
//! a single ticker at the shortest interval so the poller never needs more
//! than one timer. Concurrency is bounded by a semaphore so a slow
//! transcript read for one agent can't starve the others.

use crate::plugins::worker_adapter::agent_state::{
    detect_transcript_evidence, AgentState, AgentStateTracker,
};
use forge_core::db::agents as agents_repo;
use forge_core::db::queue::DbHandle;
use forge_core::events::{Event, EventBus};
use forge_core::ids::Clock;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Reads the latest transcript tail for an agent. Implemented over the real
/// pane/log capture in production; fakeable in tests.
pub trait TranscriptSource: Send + Sync {
    fn read_tail(&self, agent_id: &str) -> Option<String>;
}

#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub active_interval: Duration,
    pub idle_interval: Duration,
    pub cold_interval: Duration,
    pub max_concurrent: usize,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            active_interval: Duration::from_millis(500),
            idle_interval: Duration::from_secs(2),
            cold_interval: Duration::from_secs(5),
            max_concurrent: 10,
        }
    }
}

impl PollerConfig {
    /// Priority interval for an agent currently in `state`.
    fn interval_for(&self, state: AgentState) -> Duration {
        match state {
            AgentState::Working => self.active_interval,
            AgentState::Idle | AgentState::AwaitingApproval => self.idle_interval,
            AgentState::Paused
            | AgentState::Stopped
            | AgentState::Error
            | AgentState::RateLimited
            | AgentState::Starting => self.cold_interval,
        }
    }

    /// Shortest configured interval, used as the driving ticker period.
    fn tick_period(&self) -> Duration {
        self.active_interval
            .min(self.idle_interval)
            .min(self.cold_interval)
    }
}

/// Decide which of `known` agents are due for a poll at `now`, given each
/// agent's last poll time and current state. Pure so the priority-interval
/// logic is testable without a ticker.
fn due_agents(
    config: &PollerConfig,
    known: &[(String, AgentState)],
    last_polled: &HashMap<String, Instant>,
    now: Instant,
) -> Vec<String> {
    known
        .iter()
        .filter(|(id, state)| {
            let interval = config.interval_for(*state);
            match last_polled.get(id) {
                Some(last) => now.duration_since(*last) >= interval,
                None => true,
            }
        })
        .map(|(id, _)| id.clone())
        .collect()
}

/// Drives periodic state detection for every agent known to `tracker`,
/// persisting transitions through `db` and publishing `state_changed`
/// events on the bus.
pub struct StatePoller {
    config: PollerConfig,
    tracker: Arc<Mutex<AgentStateTracker>>,
    transcripts: Arc<dyn TranscriptSource>,
    db: DbHandle,
    events: EventBus,
    clock: Arc<dyn Clock>,
    last_polled: Mutex<HashMap<String, Instant>>,
}

impl StatePoller {
    pub fn new(
        config: PollerConfig,
        tracker: Arc<Mutex<AgentStateTracker>>,
        transcripts: Arc<dyn TranscriptSource>,
        db: DbHandle,
        events: EventBus,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            tracker,
            transcripts,
            db,
            events,
            clock,
            last_polled: Mutex::new(HashMap::new()),
        }
    }

    /// Run until `cancel` fires, ticking at the shortest configured
    /// interval and dispatching only the agents actually due.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.tick_period());
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("state poller shutting down");
                    return;
                }
                _ = ticker.tick() => {
                    self.clone().poll_due_agents().await;
                }
            }
        }
    }

    async fn poll_due_agents(self: Arc<Self>) {
        let known: Vec<(String, AgentState)> = {
            let tracker = self.tracker.lock().unwrap();
            tracker.all_states().into_iter().collect()
        };
        let now = Instant::now();
        let due = {
            let last_polled = self.last_polled.lock().unwrap();
            due_agents(&self.config, &known, &last_polled, now)
        };
        if due.is_empty() {
            return;
        }

        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent));
        let mut tasks = Vec::with_capacity(due.len());
        for agent_id in due {
            let this = self.clone();
            let permit = semaphore.clone().acquire_owned().await;
            tasks.push(tokio::spawn(async move {
                let _permit = permit;
                this.poll_one(&agent_id).await;
            }));
        }
        for task in tasks {
            let _ = task.await;
        }
    }

    async fn poll_one(&self, agent_id: &str) {
        self.last_polled
            .lock()
            .unwrap()
            .insert(agent_id.to_string(), Instant::now());

        let Some(transcript) = self.transcripts.read_tail(agent_id) else {
            return;
        };
        let Some(detection) = detect_transcript_evidence(&transcript) else {
            return;
        };

        let before = {
            let tracker = self.tracker.lock().unwrap();
            tracker.get_state(agent_id)
        };

        {
            let mut tracker = self.tracker.lock().unwrap();
            tracker.apply_detection(agent_id, detection.clone());
        }

        let after = {
            let tracker = self.tracker.lock().unwrap();
            tracker.get_state(agent_id)
        };

        if before == after {
            return;
        }
        let Some(new_state) = after else { return };

        let detected_at = self.clock.now().to_rfc3339();
        let db = self.db.clone();
        let agent_id_owned = agent_id.to_string();
        let state_str = new_state.to_string();
        let reason = detection.reason.clone();
        let confidence = format!("{:?}", detection.confidence).to_lowercase();
        let detected_at_for_db = detected_at.clone();
        let persisted = tokio::task::spawn_blocking(move || {
            let conn = db.lock().unwrap();
            agents_repo::update_state(
                &conn,
                &agent_id_owned,
                &state_str,
                &confidence,
                &reason,
                &detected_at_for_db,
            )
        })
        .await;

        match persisted {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(agent = agent_id, error = %e, "failed to persist agent state"),
            Err(e) => warn!(agent = agent_id, error = %e, "state persistence task panicked"),
        }

        self.events.publish(Event::new(
            forge_core::ids::short_id(),
            "state_changed",
            "agent",
            agent_id,
            Some(serde_json::json!({
                "state": new_state.to_string(),
                "reason": detection.reason,
                "detected_at": detected_at,
            })),
        ));
    }
}
