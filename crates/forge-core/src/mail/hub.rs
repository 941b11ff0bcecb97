//! In-process pub/sub fan-out over a project's [`MailStore`] (`spec.md`
//! §4.3).
//!
//! `publish` persists through the store and then fans the message out to
//! every subscriber whose [`Filter`] matches. Delivery to an individual
//! subscriber is best-effort: each subscriber has a bounded channel, and a
//! subscriber that falls behind is dropped with a "lagged" signal rather
//! than blocking the publisher or buffering unboundedly. `ingest` is the
//! idempotent entry point used by the relay (§4.5): a message id already
//! present in the store is a no-op, which is what makes at-most-once
//! delivery and loop-free relay possible.

use super::store::{MailStore, StoreError};
use super::types::{MailTarget, Message, Priority, SendOptions};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Bound on the per-subscriber delivery channel. A subscriber that can't
/// drain messages faster than this fills up is considered lagged.
pub const SUBSCRIBER_CHANNEL_CAPACITY: usize = 256;

/// Bound on the per-subscriber "recently delivered id" set used to
/// enforce at-most-once delivery.
const SEEN_CAPACITY: usize = 4096;

/// Subscription filter. All set fields must match for a message to be
/// delivered; unset fields are wildcards.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    pub topic: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub priority_min: Option<Priority>,
    pub tags: Vec<String>,
    /// Only deliver messages with id strictly greater than this cursor.
    /// Used by reconnecting subscribers (and the relay) to catch up
    /// without re-delivering ids already seen.
    pub since: Option<String>,
}

impl Filter {
    fn matches(&self, msg: &Message) -> bool {
        if let Some(topic) = &self.topic {
            if &msg.to != topic {
                return false;
            }
        }
        if let Some(from) = &self.from {
            if &msg.from != from {
                return false;
            }
        }
        if let Some(to) = &self.to {
            if &msg.to != to {
                return false;
            }
        }
        if let Some(min) = self.priority_min {
            if msg.priority < min {
                return false;
            }
        }
        if !self.tags.is_empty() && !self.tags.iter().all(|t| msg.tags.contains(t)) {
            return false;
        }
        if let Some(since) = &self.since {
            if msg.id.as_str() <= since.as_str() {
                return false;
            }
        }
        true
    }
}

struct SeenSet {
    order: VecDeque<String>,
    set: HashSet<String>,
}

impl SeenSet {
    fn new() -> Self {
        Self {
            order: VecDeque::new(),
            set: HashSet::new(),
        }
    }

    /// Returns `true` if `id` had not been seen before (and records it).
    fn insert_if_new(&mut self, id: &str) -> bool {
        if self.set.contains(id) {
            return false;
        }
        self.set.insert(id.to_string());
        self.order.push_back(id.to_string());
        if self.order.len() > SEEN_CAPACITY {
            if let Some(oldest) = self.order.pop_front() {
                self.set.remove(&oldest);
            }
        }
        true
    }
}

struct Subscriber {
    filter: Filter,
    tx: mpsc::Sender<Message>,
    seen: Mutex<SeenSet>,
    lagged: Arc<AtomicBool>,
}

/// A handle returned by [`MailHub::subscribe`]. Dropping it cancels the
/// subscription.
pub struct Subscription {
    id: u64,
    hub: Arc<MailHubInner>,
    pub rx: mpsc::Receiver<Message>,
    pub lagged: Arc<AtomicBool>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.hub.subscribers.lock().unwrap().remove(&self.id);
    }
}

struct MailHubInner {
    store: MailStore,
    subscribers: Mutex<std::collections::HashMap<u64, Arc<Subscriber>>>,
    next_id: AtomicU64,
}

/// The hub wraps a [`MailStore`] and is the entry point both local CLI
/// sends and the mail server's `watch`/`relay` streaming use.
#[derive(Clone)]
pub struct MailHub {
    inner: Arc<MailHubInner>,
}

impl MailHub {
    pub fn new(store: MailStore) -> Self {
        Self {
            inner: Arc::new(MailHubInner {
                store,
                subscribers: Mutex::new(std::collections::HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn store(&self) -> &MailStore {
        &self.inner.store
    }

    /// Register a subscription and return a handle whose `rx` yields
    /// matching messages until the handle is dropped or the subscriber
    /// lags.
    pub fn subscribe(&self, filter: Filter) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CHANNEL_CAPACITY);
        let lagged = Arc::new(AtomicBool::new(false));
        let subscriber = Arc::new(Subscriber {
            filter,
            tx,
            seen: Mutex::new(SeenSet::new()),
            lagged: lagged.clone(),
        });
        self.inner.subscribers.lock().unwrap().insert(id, subscriber);
        Subscription {
            id,
            hub: self.inner.clone(),
            rx,
            lagged,
        }
    }

    /// Persist `raw_body` as a new message from `from` to `target`, then
    /// fan it out to matching subscribers.
    pub fn publish(
        &self,
        from: &str,
        target: &MailTarget,
        raw_body: &str,
        opts: SendOptions,
    ) -> Result<Message, StoreError> {
        self.inner.store.register_agent(from, opts.host.clone())?;
        let msg = self.inner.store.save_message(from, target, raw_body, opts)?;
        self.fan_out(&msg);
        Ok(msg)
    }

    /// Idempotently apply a message received from a relay peer: a
    /// collision on id is a no-op (`spec.md` §4.3, §4.5). Never
    /// re-delivers an id the local hub already holds.
    pub fn ingest(&self, target: &MailTarget, msg: &Message) -> Result<bool, StoreError> {
        match self.inner.store.save_message_exact(target, msg) {
            Ok(()) => {
                self.fan_out(msg);
                Ok(true)
            }
            Err(StoreError::IdConflict(_)) => Ok(false),
            Err(other) => Err(other),
        }
    }

    fn fan_out(&self, msg: &Message) {
        let subscribers = self.inner.subscribers.lock().unwrap();
        for subscriber in subscribers.values() {
            if !subscriber.filter.matches(msg) {
                continue;
            }
            let mut seen = subscriber.seen.lock().unwrap();
            if !seen.insert_if_new(&msg.id) {
                continue; // at-most-once: already delivered to this subscriber
            }
            drop(seen);
            if let Err(mpsc::error::TrySendError::Full(_)) = subscriber.tx.try_send(msg.clone()) {
                subscriber.lagged.store(true, Ordering::SeqCst);
            }
            // A Closed error means the subscriber already dropped its
            // receiver; it will be reaped when its Subscription drops.
        }
    }
}
