//! Dispatch Queue & Scheduler (`spec.md` §4.9).
//!
//! Tick-driven: every tick looks at the pending head of each agent's FIFO
//! queue and dispatches it only when that agent is `idle`. Message items go
//! to the agent's pane via [`TmuxSender`]; pause items set `paused_until`;
//! conditional items are evaluated through an injectable predicate. Disk
//! pressure (reported by [`DiskMonitor`]) pauses the whole scheduler until
//! usage drops back under the resume threshold.

use crate::plugins::worker_adapter::agent_state::{AgentState, AgentStateTracker};
use crate::plugins::worker_adapter::tmux_sender::{DeliveryMethod, TmuxSender};
use forge_core::db::agents as agents_repo;
use forge_core::db::queue::{self, DbHandle, QueueItem, QueueItemType};
use forge_core::events::{Event, EventBus};
use forge_core::ids::Clock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Evaluates a `conditional` queue item's predicate. The predicate shape is
/// deliberately opaque to the scheduler (a shell command, a file glob, a KV
/// lookup) and left to the caller's implementation.
pub trait ConditionEvaluator: Send + Sync {
    fn evaluate(&self, predicate: &serde_json::Value) -> bool;
}

/// Reports current disk usage as a percentage (0.0-100.0) for the volume
/// backing the orchestrator database and agent workspaces.
pub trait DiskMonitor: Send + Sync {
    fn percent_used(&self) -> f64;
}

/// [`DiskMonitor`] that always reports healthy usage, used when no real
/// disk monitor is configured.
pub struct NoopDiskMonitor;

impl DiskMonitor for NoopDiskMonitor {
    fn percent_used(&self) -> f64 {
        0.0
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub tick_interval: Duration,
    pub max_retries: i64,
    pub critical_percent: f64,
    pub resume_percent: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            max_retries: 3,
            critical_percent: 95.0,
            resume_percent: 85.0,
        }
    }
}

pub struct Scheduler {
    config: SchedulerConfig,
    db: DbHandle,
    tracker: Arc<Mutex<AgentStateTracker>>,
    sender: Arc<dyn TmuxSender>,
    condition: Arc<dyn ConditionEvaluator>,
    disk: Arc<dyn DiskMonitor>,
    events: EventBus,
    clock: Arc<dyn Clock>,
    disk_paused: AtomicBool,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        db: DbHandle,
        tracker: Arc<Mutex<AgentStateTracker>>,
        sender: Arc<dyn TmuxSender>,
        condition: Arc<dyn ConditionEvaluator>,
        disk: Arc<dyn DiskMonitor>,
        events: EventBus,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            db,
            tracker,
            sender,
            condition,
            disk,
            events,
            clock,
            disk_paused: AtomicBool::new(false),
        }
    }

    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.tick_interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("scheduler shutting down");
                    return;
                }
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }
    }

    async fn tick(&self) {
        if self.check_disk_pressure() {
            return;
        }

        let heads = {
            let conn = self.db.lock().unwrap();
            match queue::list_pending_heads(&conn, self.clock.now()) {
                Ok(items) => items,
                Err(e) => {
                    warn!(error = %e, "failed to list pending queue heads");
                    return;
                }
            }
        };

        for item in heads {
            let agent_idle = {
                let tracker = self.tracker.lock().unwrap();
                tracker.get_state(&item.agent_id) == Some(AgentState::Idle)
            };
            if !agent_idle {
                continue;
            }
            self.dispatch(item).await;
        }
    }

    /// Returns `true` if the scheduler is (now, or still) paused for disk
    /// pressure and should skip dispatch this tick.
    fn check_disk_pressure(&self) -> bool {
        let used = self.disk.percent_used();
        let was_paused = self.disk_paused.load(Ordering::SeqCst);

        if !was_paused && used > self.config.critical_percent {
            self.disk_paused.store(true, Ordering::SeqCst);
            warn!(percent_used = used, "disk pressure critical, pausing dispatch");
            self.pause_all_agents("disk pressure critical");
            self.events.publish(Event::new(
                forge_core::ids::short_id(),
                "scheduler.disk_paused",
                "scheduler",
                "global",
                Some(serde_json::json!({ "percent_used": used })),
            ));
            return true;
        }

        if was_paused {
            if used < self.config.resume_percent {
                self.disk_paused.store(false, Ordering::SeqCst);
                info!(percent_used = used, "disk pressure resolved, resuming dispatch");
                self.events.publish(Event::new(
                    forge_core::ids::short_id(),
                    "scheduler.disk_resumed",
                    "scheduler",
                    "global",
                    Some(serde_json::json!({ "percent_used": used })),
                ));
                return false;
            }
            return true;
        }

        false
    }

    fn pause_all_agents(&self, reason: &str) {
        let ids: Vec<String> = {
            let tracker = self.tracker.lock().unwrap();
            tracker.all_states().into_keys().collect()
        };
        let detected_at = self.clock.now().to_rfc3339();
        let conn = self.db.lock().unwrap();
        for id in ids {
            let _ = agents_repo::update_state(&conn, &id, "paused", "high", reason, &detected_at);
            let mut tracker = self.tracker.lock().unwrap();
            tracker.set_state(&id, AgentState::Paused);
        }
    }

    async fn dispatch(&self, item: QueueItem) {
        match item.item_type {
            QueueItemType::Message => self.dispatch_message(item).await,
            QueueItemType::Pause => self.dispatch_pause(item),
            QueueItemType::Conditional => self.dispatch_conditional(item),
        }
    }

    async fn dispatch_message(&self, item: QueueItem) {
        let pane_id = {
            let tracker = self.tracker.lock().unwrap();
            tracker.get_pane_info(&item.agent_id).map(|info| info.pane_id.clone())
        };
        let Some(pane_id) = pane_id else {
            self.fail_item(&item, "agent has no known pane");
            return;
        };
        let body = item
            .payload
            .get("body")
            .and_then(|v| v.as_str())
            .unwrap_or_default();

        let result = self
            .sender
            .send_text_and_enter(&pane_id, body, DeliveryMethod::SendKeys, "scheduler dispatch")
            .await;

        match result {
            Ok(()) => {
                self.mark(&item.id, queue::QueueItemStatus::Dispatched);
                self.events.publish(Event::new(
                    forge_core::ids::short_id(),
                    "message.dispatched",
                    "queue_item",
                    &item.id,
                    Some(serde_json::json!({ "agent_id": item.agent_id })),
                ));
            }
            Err(e) => self.fail_item(&item, &e.to_string()),
        }
    }

    fn dispatch_pause(&self, item: QueueItem) {
        let until = item.payload.get("until").and_then(|v| v.as_str());
        if agents_repo::set_paused_until(&self.db.lock().unwrap(), &item.agent_id, until).is_ok() {
            self.mark(&item.id, queue::QueueItemStatus::Completed);
        }
    }

    fn dispatch_conditional(&self, item: QueueItem) {
        let predicate = item.payload.get("predicate").cloned().unwrap_or(serde_json::Value::Null);
        let status = if self.condition.evaluate(&predicate) {
            queue::QueueItemStatus::Completed
        } else {
            queue::QueueItemStatus::Skipped
        };
        self.mark(&item.id, status);
    }

    fn fail_item(&self, item: &QueueItem, error: &str) {
        let conn = self.db.lock().unwrap();
        match queue::mark_failed(&conn, &*self.clock, &item.id, error, self.config.max_retries) {
            Ok(queue::QueueItemStatus::Failed) => {
                drop(conn);
                self.events.publish(Event::new(
                    forge_core::ids::short_id(),
                    "message.failed",
                    "queue_item",
                    &item.id,
                    Some(serde_json::json!({ "error": error })),
                ));
            }
            Ok(_) => {}
            Err(e) => warn!(item = %item.id, error = %e, "failed to record queue item failure"),
        }
    }

    fn mark(&self, id: &str, status: queue::QueueItemStatus) {
        let conn = self.db.lock().unwrap();
        if let Err(e) = queue::mark_status(&conn, id, status) {
            warn!(item = id, error = %e, "failed to update queue item status");
        }
    }
}
