//! In-process topic bus connecting Wants to the clients that hold them.
//!
//! Each Want publishes on `dataevent-{want id}`. Subscribers are plain
//! closures returning `bool`; `publish_collecting` hands those answers back so
//! the aggregator can ask "is anyone still listening?" with a `Ping`.

use crate::types::SourceClass;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

/// What a Want announces to its subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    /// Liveness probe. Handlers answer `true` if they still want the data
    /// and must not treat it as an update.
    Ping,
    /// Fresh (or cached, on catch-up) data.
    Update { data: Value, wake: bool },
}

/// Event published on a want topic.
#[derive(Debug, Clone, PartialEq)]
pub struct DataEvent {
    pub class: SourceClass,
    pub source_type: String,
    pub filter: String,
    pub payload: EventPayload,
}

impl DataEvent {
    pub fn is_ping(&self) -> bool {
        matches!(self.payload, EventPayload::Ping)
    }
}

pub type Handler = Arc<dyn Fn(&DataEvent) -> bool + Send + Sync>;

/// Returned by `subscribe`; pass back to `unsubscribe`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionToken {
    topic: String,
    id: u64,
}

impl SubscriptionToken {
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

#[derive(Clone)]
struct Subscriber {
    id: u64,
    handler: Handler,
}

#[derive(Default)]
pub struct EventBus {
    topics: DashMap<String, Vec<Subscriber>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("topics", &self.topics.len())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, topic: impl Into<String>, handler: F) -> SubscriptionToken
    where
        F: Fn(&DataEvent) -> bool + Send + Sync + 'static,
    {
        let topic = topic.into();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.topics.entry(topic.clone()).or_default().push(Subscriber {
            id,
            handler: Arc::new(handler),
        });
        trace!(topic = %topic, subscriber = id, "subscribed");
        SubscriptionToken { topic, id }
    }

    /// Returns false if the token was already removed.
    pub fn unsubscribe(&self, token: &SubscriptionToken) -> bool {
        let mut removed = false;
        if let Some(mut subs) = self.topics.get_mut(&token.topic) {
            let before = subs.len();
            subs.retain(|s| s.id != token.id);
            removed = subs.len() != before;
        }
        self.topics.remove_if(&token.topic, |_, subs| subs.is_empty());
        removed
    }

    /// Deliver to every subscriber of `topic`. Returns how many were called.
    pub fn publish(&self, topic: &str, event: &DataEvent) -> usize {
        self.publish_collecting(topic, event).len()
    }

    /// Deliver to every subscriber of `topic` and collect their answers.
    pub fn publish_collecting(&self, topic: &str, event: &DataEvent) -> Vec<bool> {
        // Snapshot so handlers may (un)subscribe without holding the shard lock
        let subscribers: Vec<Subscriber> = match self.topics.get(topic) {
            Some(subs) => subs.clone(),
            None => return Vec::new(),
        };
        subscribers
            .iter()
            .map(|s| (s.handler)(event))
            .collect()
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.get(topic).map(|s| s.len()).unwrap_or(0)
    }
}
