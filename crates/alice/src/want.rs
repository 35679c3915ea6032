//! Wants: one consumer's standing request for a filtered view of a source type.

use crate::bus::{DataEvent, EventBus, EventPayload};
use crate::cache::{CacheSlot, ResultCache};
use crate::source::Source;
use crate::types::{SourceClass, WantConfig, WantId, WantUid};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Lifecycle of a want. `Evicted` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WantState {
    Created,
    Pending,
    Active,
    Evicted,
}

#[derive(Debug)]
pub struct Want {
    class: SourceClass,
    source_type: String,
    filter: String,
    uid: WantUid,
    config: Option<WantConfig>,
    source: Option<Arc<dyn Source>>,
    /// `None` until the first pull, which makes a fresh want due immediately.
    last_updated: Option<Instant>,
    state: WantState,
}

impl Want {
    pub fn new(class: SourceClass, source_type: impl Into<String>, filter: impl Into<String>) -> Self {
        Self {
            class,
            source_type: source_type.into(),
            filter: filter.into(),
            uid: WantUid::generate(),
            config: None,
            source: None,
            last_updated: None,
            state: WantState::Created,
        }
    }

    pub fn class(&self) -> SourceClass {
        self.class
    }

    pub fn source_type(&self) -> &str {
        &self.source_type
    }

    pub fn filter(&self) -> &str {
        &self.filter
    }

    pub fn uid(&self) -> WantUid {
        self.uid
    }

    pub fn config(&self) -> Option<&WantConfig> {
        self.config.as_ref()
    }

    pub fn set_config(&mut self, config: Option<WantConfig>) {
        self.config = config;
    }

    pub fn source(&self) -> Option<&Arc<dyn Source>> {
        self.source.as_ref()
    }

    pub fn set_source(&mut self, source: Arc<dyn Source>) {
        self.source = Some(source);
    }

    pub fn state(&self) -> WantState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: WantState) {
        self.state = state;
    }

    pub fn is_active(&self) -> bool {
        self.state == WantState::Active
    }

    pub fn is_ready(&self) -> bool {
        self.source.is_some() && self.config.is_some()
    }

    pub fn last_updated(&self) -> Option<Instant> {
        self.last_updated
    }

    /// Resolved id once ready, otherwise the `{type}/{filter}-pending` placeholder.
    pub fn id(&self) -> WantId {
        match (&self.source, &self.config) {
            (Some(source), Some(config)) => source.build_want_id(&self.filter, config),
            _ => WantId::pending(&self.source_type, &self.filter),
        }
    }

    pub fn topic(&self) -> String {
        self.id().topic()
    }

    fn frequency(&self) -> Duration {
        self.source
            .as_ref()
            .map(|s| s.frequency())
            .unwrap_or_default()
    }

    /// Data wants are due once a full source period has passed. Sensor wants
    /// are pushed and never due on the timer.
    pub fn should_update(&self, now: Instant) -> bool {
        if self.class != SourceClass::Data || !self.is_ready() {
            return false;
        }
        match self.last_updated {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.frequency(),
        }
    }

    /// Fetch data, or reuse the cached copy when `fresh` is false.
    ///
    /// `last_updated` advances even when the fetch fails, so a failing source
    /// is retried after a full period rather than on every tick.
    pub async fn pull_update(
        &mut self,
        fresh: bool,
        now: Instant,
        cache: &mut ResultCache,
    ) -> Option<Value> {
        self.pull(fresh, now, cache).await.map(|(data, _wake)| data)
    }

    async fn pull(
        &mut self,
        fresh: bool,
        now: Instant,
        cache: &mut ResultCache,
    ) -> Option<(Value, bool)> {
        let (Some(source), Some(config)) = (self.source.clone(), self.config.clone()) else {
            return None;
        };
        let id = source.build_want_id(&self.filter, &config);

        if !fresh {
            if let Some(cached) = cache.get(&id, CacheSlot::Data, now) {
                debug!(want.id = %id, "using cached data");
                let wake = cache
                    .get(&id, CacheSlot::Wake, now)
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                return Some((cached.clone(), wake));
            }
        }

        self.last_updated = Some(now);
        let ttl = source.frequency();
        let result = source.fetch(&self.filter, &config).await;

        let wake = source.pop_wake();
        cache.set(&id, CacheSlot::Wake, Value::Bool(wake), ttl, now);

        match result {
            Ok(data) => {
                cache.set(&id, CacheSlot::Data, data.clone(), ttl, now);
                Some((data, wake))
            }
            Err(e) => {
                debug!(want.id = %id, source.id = %source.id(), error = %e, "fetch produced no data");
                None
            }
        }
    }

    /// Publish data on this want's topic. Returns how many subscribers saw it.
    pub fn push_update(&self, data: Value, wake: bool, bus: &EventBus) -> usize {
        let event = DataEvent {
            class: self.class,
            source_type: self.source_type.clone(),
            filter: self.filter.clone(),
            payload: EventPayload::Update { data, wake },
        };
        bus.publish(&self.topic(), &event)
    }

    /// Pull then publish. Returns whether anything was published.
    pub async fn update_cycle(
        &mut self,
        fresh: bool,
        now: Instant,
        cache: &mut ResultCache,
        bus: &EventBus,
    ) -> bool {
        let Some((data, wake)) = self.pull(fresh, now, cache).await else {
            return false;
        };
        let delivered = self.push_update(data, wake, bus);
        debug!(want.id = %self.id(), delivered, "published update");
        true
    }

    /// Ping every subscriber; true if any answers.
    pub fn still_wanted(&self, bus: &EventBus) -> bool {
        let event = DataEvent {
            class: self.class,
            source_type: self.source_type.clone(),
            filter: self.filter.clone(),
            payload: EventPayload::Ping,
        };
        bus.publish_collecting(&self.topic(), &event)
            .into_iter()
            .any(|answer| answer)
    }
}

impl Drop for Want {
    fn drop(&mut self) {
        if self.state == WantState::Active {
            info!(want.id = %self.id(), "shutting down");
        }
    }
}
