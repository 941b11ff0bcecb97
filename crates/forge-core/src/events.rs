//! Typed event bus and retention (`spec.md` §3, §4.6).
//!
//! The bus is deliberately small: publishers call [`EventBus::publish`],
//! which runs every matching synchronous handler inline (in publication
//! order, within that one publisher's call) and then spawns one Tokio
//! task per matching asynchronous handler (no ordering guarantee across
//! handlers or publishers, per `spec.md` §5). An optional
//! [`EventSink`] gets a write-through copy of every event; sink failures
//! are logged and never block or fail the publish.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

/// An append-only, typed event record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    /// Open vocabulary, e.g. `"agent.spawned"`, `"state_changed"`,
    /// `"message.dispatched"`, `"node.online"`.
    #[serde(rename = "type")]
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl Event {
    pub fn new(
        id: impl Into<String>,
        event_type: impl Into<String>,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        payload: Option<serde_json::Value>,
    ) -> Self {
        Self {
            id: id.into(),
            timestamp: Utc::now(),
            event_type: event_type.into(),
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            payload,
        }
    }
}

/// Subscription filter: every set field must match.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub event_types: Option<HashSet<String>>,
    pub entity_types: Option<HashSet<String>>,
    pub entity_id: Option<String>,
}

impl EventFilter {
    fn matches(&self, event: &Event) -> bool {
        if let Some(types) = &self.event_types {
            if !types.contains(&event.event_type) {
                return false;
            }
        }
        if let Some(entity_types) = &self.entity_types {
            if !entity_types.contains(&event.entity_type) {
                return false;
            }
        }
        if let Some(entity_id) = &self.entity_id {
            if &event.entity_id != entity_id {
                return false;
            }
        }
        true
    }
}

type AsyncFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

enum Handler {
    Sync(Arc<dyn Fn(&Event) + Send + Sync>),
    Async(Arc<dyn Fn(Event) -> AsyncFuture + Send + Sync>),
}

struct Subscription {
    filter: EventFilter,
    handler: Handler,
}

/// Optional durable write-through target for the bus. Implementations
/// should be cheap/non-blocking where possible; the bus treats write
/// failures as non-fatal.
pub trait EventSink: Send + Sync {
    fn write(&self, event: &Event) -> anyhow::Result<()>;
}

/// In-process typed pub/sub for [`Event`]s.
#[derive(Clone, Default)]
pub struct EventBus {
    subscriptions: Arc<Mutex<Vec<Subscription>>>,
    sink: Arc<Mutex<Option<Arc<dyn EventSink>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_sink(&self, sink: Arc<dyn EventSink>) {
        *self.sink.lock().unwrap() = Some(sink);
    }

    /// Subscribe a synchronous handler: runs inline on the publisher's
    /// call stack, in publication order relative to other sync handlers
    /// and other publishes from the same caller.
    pub fn subscribe_sync(
        &self,
        filter: EventFilter,
        handler: impl Fn(&Event) + Send + Sync + 'static,
    ) {
        self.subscriptions.lock().unwrap().push(Subscription {
            filter,
            handler: Handler::Sync(Arc::new(handler)),
        });
    }

    /// Subscribe an asynchronous handler: each matching publish spawns a
    /// new Tokio task running this handler. No ordering is guaranteed
    /// across async handlers or across publishes.
    pub fn subscribe_async<F>(
        &self,
        filter: EventFilter,
        handler: impl Fn(Event) -> F + Send + Sync + 'static,
    ) where
        F: Future<Output = ()> + Send + 'static,
    {
        let handler = Arc::new(handler);
        self.subscriptions.lock().unwrap().push(Subscription {
            filter,
            handler: Handler::Async(Arc::new(move |event| {
                let handler = handler.clone();
                Box::pin(async move { handler(event).await }) as AsyncFuture
            })),
        });
    }

    pub fn publish(&self, event: Event) {
        if let Some(sink) = self.sink.lock().unwrap().clone() {
            if let Err(e) = sink.write(&event) {
                tracing::warn!(error = %e, event_id = %event.id, "event sink write failed");
            }
        }
        let subs = self.subscriptions.lock().unwrap();
        for sub in subs.iter() {
            if !sub.filter.matches(&event) {
                continue;
            }
            match &sub.handler {
                Handler::Sync(f) => f(&event),
                Handler::Async(f) => {
                    let fut = f(event.clone());
                    tokio::spawn(fut);
                }
            }
        }
    }
}

/// Policy governing [`apply_retention`].
#[derive(Debug, Clone, Default)]
pub struct RetentionPolicy {
    pub max_age: Option<Duration>,
    pub max_count: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RetentionOutcome {
    pub kept: usize,
    pub removed: usize,
    pub archived: usize,
}

/// Apply age/count retention to an already-sorted (oldest-first) batch of
/// events, optionally archiving removed events to `<archive_dir>/<day>.jsonl`
/// before they're dropped from the caller's store. The caller is
/// responsible for actually deleting the surviving rows; this function is
/// pure over the in-memory list so it can be unit tested without a
/// database.
pub fn apply_retention(
    events: &[Event],
    policy: &RetentionPolicy,
    archive_dir: Option<&Path>,
    now: DateTime<Utc>,
) -> anyhow::Result<(Vec<Event>, RetentionOutcome)> {
    if policy.max_age.is_none() && policy.max_count.is_none() {
        return Ok((
            events.to_vec(),
            RetentionOutcome {
                kept: events.len(),
                ..Default::default()
            },
        ));
    }

    let mut sorted: Vec<&Event> = events.iter().collect();
    sorted.sort_by_key(|e| e.timestamp);

    let mut keep = vec![true; sorted.len()];

    if let Some(max_age) = policy.max_age {
        let cutoff = now - max_age;
        for (i, e) in sorted.iter().enumerate() {
            if e.timestamp < cutoff {
                keep[i] = false;
            }
        }
    }

    if let Some(max_count) = policy.max_count {
        let alive: Vec<usize> = keep
            .iter()
            .enumerate()
            .filter(|(_, k)| **k)
            .map(|(i, _)| i)
            .collect();
        if alive.len() > max_count {
            // Newest-first survival: drop the oldest of the still-alive set.
            let drop_count = alive.len() - max_count;
            for &i in alive.iter().take(drop_count) {
                keep[i] = false;
            }
        }
    }

    let mut kept = Vec::new();
    let mut removed = Vec::new();
    for (i, e) in sorted.into_iter().enumerate() {
        if keep[i] {
            kept.push(e.clone());
        } else {
            removed.push(e.clone());
        }
    }

    let archived = if let Some(dir) = archive_dir {
        archive_by_day(dir, &removed)?
    } else {
        0
    };

    let outcome = RetentionOutcome {
        kept: kept.len(),
        removed: removed.len(),
        archived,
    };
    Ok((kept, outcome))
}

/// Append removed events to `<dir>/<YYYY-MM-DD>.jsonl`, one JSON object
/// per line, grouped by the event's UTC date.
fn archive_by_day(dir: &Path, events: &[Event]) -> anyhow::Result<usize> {
    use std::collections::BTreeMap;
    use std::io::Write;

    std::fs::create_dir_all(dir)?;
    let mut by_day: BTreeMap<NaiveDate, Vec<&Event>> = BTreeMap::new();
    for e in events {
        by_day.entry(e.timestamp.date_naive()).or_default().push(e);
    }
    let mut total = 0;
    for (day, events) in by_day {
        let path = dir.join(format!("{day}.jsonl"));
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        for e in events {
            let line = serde_json::to_string(e)?;
            writeln!(file, "{line}")?;
            total += 1;
        }
    }
    Ok(total)
}
