//! The aggregator: source registry, active wants, pending resolution and the
//! tick that drives them.
//!
//! Everything here is single-writer. The engine service owns the one
//! `Aggregator` and feeds it commands; nothing in a tick returns an error,
//! failing wants and sources are logged and skipped.

use crate::bus::EventBus;
use crate::cache::ResultCache;
use crate::pending::{PendingQueue, PendingWant, PrepareError, WantHandler};
use crate::source::Source;
use crate::types::{SourceClass, SourceId, WantId, WantUid};
use crate::want::{Want, WantState};
use serde::Serialize;
use serde_json::Value;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum AggregatorError {
    #[error("want {0} is not ready")]
    WantNotReady(WantId),
}

/// Counts reported on `/health` and in the periodic stats log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AggregatorStats {
    pub data_sources: usize,
    pub sensor_sources: usize,
    pub active_wants: usize,
    pub pending_wants: usize,
    pub cached_results: usize,
}

pub struct Aggregator {
    bus: Arc<EventBus>,
    cache: ResultCache,
    pending_cycle: Duration,
    wanted_cycle: Duration,
    data_sources: Vec<Arc<dyn Source>>,
    sensor_sources: Vec<Arc<dyn Source>>,
    /// Live connections holding each claimed source.
    claims: HashMap<(SourceClass, SourceId), usize>,
    wants: HashMap<WantId, Want>,
    /// Insertion order of `wants`, which is refresh order.
    want_order: Vec<WantId>,
    pending: PendingQueue,
    last_pending_cycle: Instant,
    last_still_wanted_cycle: Instant,
}

impl std::fmt::Debug for Aggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Aggregator")
            .field("stats", &self.stats())
            .finish()
    }
}

impl Aggregator {
    /// Both cycle clocks start at `now`, so the first cycles run one full
    /// interval later.
    pub fn new(bus: Arc<EventBus>, pending_cycle: Duration, wanted_cycle: Duration, now: Instant) -> Self {
        Self {
            bus,
            cache: ResultCache::new(),
            pending_cycle,
            wanted_cycle,
            data_sources: Vec::new(),
            sensor_sources: Vec::new(),
            claims: HashMap::new(),
            wants: HashMap::new(),
            want_order: Vec::new(),
            pending: PendingQueue::new(),
            last_pending_cycle: now,
            last_still_wanted_cycle: now,
        }
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    fn sources(&self, class: SourceClass) -> &Vec<Arc<dyn Source>> {
        match class {
            SourceClass::Data => &self.data_sources,
            SourceClass::Sensor => &self.sensor_sources,
        }
    }

    fn sources_mut(&mut self, class: SourceClass) -> &mut Vec<Arc<dyn Source>> {
        match class {
            SourceClass::Data => &mut self.data_sources,
            SourceClass::Sensor => &mut self.sensor_sources,
        }
    }

    /// Register a source. A source with the same class and id is kept and
    /// returned instead.
    pub fn add_source(&mut self, source: Arc<dyn Source>) -> Arc<dyn Source> {
        let class = source.class();
        if let Some(existing) = self.find_source(class, source.id()) {
            debug!(source.id = %source.id(), %class, "source already registered");
            return existing;
        }
        info!(source.id = %source.id(), %class, source_type = source.source_type(), "adding source");
        self.sources_mut(class).push(source.clone());
        self.rebind_orphans(&source);
        source
    }

    /// Point active wants still bound to an unregistered source with this
    /// identity at its replacement. Wants whose id would change are left alone.
    fn rebind_orphans(&mut self, source: &Arc<dyn Source>) {
        for (id, want) in self.wants.iter_mut() {
            let Some(bound) = want.source() else {
                continue;
            };
            if Arc::ptr_eq(bound, source)
                || bound.class() != source.class()
                || bound.source_type() != source.source_type()
                || bound.id() != source.id()
            {
                continue;
            }
            let same_id = want
                .config()
                .is_some_and(|config| source.build_want_id(want.filter(), config) == *id);
            if same_id {
                debug!(want.id = %id, source.id = %source.id(), "rebinding want to re-registered source");
                want.set_source(source.clone());
            }
        }
    }

    /// Unregister a source regardless of claims. Wants already bound to it
    /// keep their reference and go inert until a source with the same
    /// identity registers again.
    pub fn remove_source(&mut self, class: SourceClass, id: &SourceId) -> Option<Arc<dyn Source>> {
        self.claims.remove(&(class, id.clone()));
        let sources = self.sources_mut(class);
        let index = sources.iter().position(|s| s.id() == id)?;
        let removed = sources.remove(index);
        info!(source.id = %id, %class, "removed source");
        Some(removed)
    }

    /// Register a source on behalf of a connection. Several connections may
    /// claim the same identity; they share the first registered source.
    pub fn claim_source(&mut self, source: Arc<dyn Source>) -> Arc<dyn Source> {
        let source = self.add_source(source);
        let claims = self
            .claims
            .entry((source.class(), source.id().clone()))
            .or_default();
        *claims += 1;
        debug!(source.id = %source.id(), claims = *claims, "source claimed");
        source
    }

    /// Drop one connection's claim. The source is removed with the last
    /// claim; an unclaimed source is left registered.
    pub fn release_source(&mut self, class: SourceClass, id: &SourceId) -> Option<Arc<dyn Source>> {
        let key = (class, id.clone());
        let remaining = {
            let claims = self.claims.get_mut(&key)?;
            *claims = claims.saturating_sub(1);
            *claims
        };
        if remaining > 0 {
            debug!(source.id = %id, claims = remaining, "source still claimed");
            return None;
        }
        self.remove_source(class, id)
    }

    pub fn have_source(&self, class: SourceClass, id: &SourceId) -> bool {
        self.find_source(class, id).is_some()
    }

    fn find_source(&self, class: SourceClass, id: &SourceId) -> Option<Arc<dyn Source>> {
        self.sources(class).iter().find(|s| s.id() == id).cloned()
    }

    /// A fresh, unresolved want.
    pub fn load_want(&self, class: SourceClass, source_type: &str, filter: &str) -> Want {
        Want::new(class, source_type, filter)
    }

    /// Track a ready want. If an equivalent want is already tracked, that one
    /// is returned and `want` is discarded.
    pub fn add_want(&mut self, want: Want) -> Result<&Want, AggregatorError> {
        if !want.is_ready() {
            return Err(AggregatorError::WantNotReady(want.id()));
        }
        Ok(self.track(want))
    }

    fn track(&mut self, mut want: Want) -> &Want {
        match self.wants.entry(want.id()) {
            Entry::Occupied(existing) => {
                debug!(want.id = %existing.key(), "want already active");
                existing.into_mut()
            }
            Entry::Vacant(slot) => {
                info!(want.id = %slot.key(), want.uid = %want.uid(), "activating want");
                want.set_state(WantState::Active);
                self.want_order.push(slot.key().clone());
                slot.insert(want)
            }
        }
    }

    /// Stop tracking the want with this want's id. False if it was not ready
    /// or not tracked.
    pub fn remove_want(&mut self, want: &Want) -> bool {
        if !want.is_ready() {
            return false;
        }
        self.take_want(&want.id()).is_some()
    }

    /// Stop tracking a want and hand it back, evicted.
    pub fn take_want(&mut self, id: &WantId) -> Option<Want> {
        let mut want = self.wants.remove(id)?;
        self.want_order.retain(|w| w != id);
        self.cache.forget(id);
        want.set_state(WantState::Evicted);
        info!(want.id = %id, "evicted want");
        Some(want)
    }

    pub fn have_want(&self, id: &WantId) -> bool {
        self.wants.contains_key(id)
    }

    pub fn want(&self, id: &WantId) -> Option<&Want> {
        self.wants.get(id)
    }

    /// Active want ids in activation order.
    pub fn want_ids(&self) -> &[WantId] {
        &self.want_order
    }

    /// Park a want until a source can serve it.
    pub fn queue_want(&mut self, mut want: Want, handler: Box<dyn WantHandler>) -> WantUid {
        want.set_state(WantState::Pending);
        debug!(want.uid = %want.uid(), want.id = %want.id(), "queued want");
        self.pending.queue(want, handler)
    }

    pub fn cancel_pending(&mut self, uid: WantUid) -> bool {
        match self.pending.cancel(uid) {
            Some(entry) => {
                debug!(want.uid = %uid, attempts = entry.attempts, "cancelled pending want");
                true
            }
            None => false,
        }
    }

    pub fn is_pending(&self, uid: WantUid) -> bool {
        self.pending.contains(uid)
    }

    pub fn pending_attempts(&self, uid: WantUid) -> Option<u32> {
        self.pending.attempts(uid)
    }

    /// Bind the first registered source that can serve the want. Data wants
    /// match on type and filter capability, sensor wants on type and id.
    pub fn resolve_source(&self, want: &mut Want) -> bool {
        let found = self.sources(want.class()).iter().find(|source| {
            source.source_type() == want.source_type()
                && match want.class() {
                    SourceClass::Data => source.can_satisfy(want.filter()),
                    SourceClass::Sensor => source.id().as_str() == want.filter(),
                }
        });
        match found {
            Some(source) => {
                want.set_source(source.clone());
                true
            }
            None => false,
        }
    }

    /// One resolution pass over every pending want. Returns the ids activated.
    pub fn cycle_pending(&mut self, now: Instant) -> Vec<WantId> {
        self.last_pending_cycle = now;
        let mut activated = Vec::new();

        for mut entry in self.pending.take_all() {
            entry.attempts += 1;
            if !self.resolve_source(&mut entry.want) {
                debug!(want.uid = %entry.want.uid(), want.id = %entry.want.id(), attempts = entry.attempts, "no source yet");
                self.pending.restore(entry);
                continue;
            }
            match self.activate(entry) {
                Ok(id) => activated.push(id),
                Err((entry, e)) => {
                    warn!(want.uid = %entry.want.uid(), want.id = %entry.want.id(), attempts = entry.attempts, error = %e, "failed to prepare");
                    self.pending.restore(entry);
                }
            }
        }
        activated
    }

    fn activate(&mut self, entry: PendingWant) -> Result<WantId, (PendingWant, PrepareError)> {
        let PendingWant {
            mut want,
            mut handler,
            attempts,
        } = entry;

        let prepared = handler.prepare(&mut want).and_then(|()| {
            if want.is_ready() {
                Ok(())
            } else {
                Err(PrepareError::NotReady)
            }
        });
        if let Err(e) = prepared {
            return Err((
                PendingWant {
                    want,
                    handler,
                    attempts,
                },
                e,
            ));
        }

        let active = self.track(want);
        handler.on_active(active);
        Ok(active.id())
    }

    /// Active data wants due for a refresh, in activation order.
    pub fn collect_ready(&self, now: Instant) -> Vec<WantId> {
        self.want_order
            .iter()
            .filter(|id| self.wants.get(*id).is_some_and(|w| w.should_update(now)))
            .cloned()
            .collect()
    }

    /// Run one update cycle for an active want. False if nothing was published.
    pub async fn refresh(&mut self, id: &WantId, fresh: bool, now: Instant) -> bool {
        let Some(want) = self.wants.get_mut(id) else {
            return false;
        };
        want.update_cycle(fresh, now, &mut self.cache, &self.bus).await
    }

    /// Buffer a sensor reading and publish it to every want bound to that
    /// sensor. Returns how many wants published.
    pub async fn push_sensor(&mut self, id: &SourceId, reading: Value, wake: bool, now: Instant) -> usize {
        let Some(source) = self.find_source(SourceClass::Sensor, id) else {
            debug!(source.id = %id, "reading for unknown sensor");
            return 0;
        };
        if !source.push(reading, wake) {
            return 0;
        }

        let bound: Vec<WantId> = self
            .want_order
            .iter()
            .filter(|wid| {
                self.wants
                    .get(*wid)
                    .and_then(Want::source)
                    .is_some_and(|s| Arc::ptr_eq(s, &source))
            })
            .cloned()
            .collect();

        let mut published = 0;
        for wid in &bound {
            if self.refresh(wid, true, now).await {
                published += 1;
            }
        }
        published
    }

    /// Ping every active want and evict those nobody answers. Returns the
    /// evicted ids.
    pub fn cycle_still_wanted(&mut self, now: Instant) -> Vec<WantId> {
        self.last_still_wanted_cycle = now;
        let unwanted: Vec<WantId> = self
            .want_order
            .iter()
            .filter(|id| self.wants.get(*id).is_some_and(|w| !w.still_wanted(&self.bus)))
            .cloned()
            .collect();

        for id in &unwanted {
            self.take_want(id);
        }
        unwanted
    }

    /// One scheduler step: pending resolution, due refreshes, the
    /// still-wanted sweep, then cache expiry.
    pub async fn tick(&mut self, now: Instant) {
        if !self.pending.is_empty()
            && now.saturating_duration_since(self.last_pending_cycle) >= self.pending_cycle
        {
            self.cycle_pending(now);
        }

        for id in self.collect_ready(now) {
            self.refresh(&id, true, now).await;
        }

        if now.saturating_duration_since(self.last_still_wanted_cycle) >= self.wanted_cycle {
            let evicted = self.cycle_still_wanted(now);
            if !evicted.is_empty() {
                info!(count = evicted.len(), "evicted unwanted wants");
            }
        }

        self.cache.purge_expired(now);
    }

    pub fn stats(&self) -> AggregatorStats {
        AggregatorStats {
            data_sources: self.data_sources.len(),
            sensor_sources: self.sensor_sources.len(),
            active_wants: self.wants.len(),
            pending_wants: self.pending.len(),
            cached_results: self.cache.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::DataEvent;
    use crate::source::fake::CountingSource;
    use crate::source::{SensorKind, SensorSource};
    use crate::types::WantConfig;
    use serde_json::json;

    const F: Duration = Duration::from_secs(60);
    const SEC: Duration = Duration::from_secs(1);

    fn aggregator(now: Instant) -> Aggregator {
        Aggregator::new(Arc::new(EventBus::new()), SEC, Duration::from_secs(300), now)
    }

    fn with_config(config: WantConfig) -> Box<dyn WantHandler> {
        Box::new(move |want: &mut Want| -> Result<(), PrepareError> {
            want.set_config(Some(config.clone()));
            Ok(())
        })
    }

    fn ready(source: &Arc<CountingSource>, filter: &str) -> Want {
        let mut want = Want::new(SourceClass::Data, source.source_type(), filter);
        want.set_source(source.clone());
        want.set_config(Some(WantConfig::new()));
        want
    }

    #[test]
    fn test_add_source_is_idempotent() {
        let mut agg = aggregator(Instant::now());
        let first: Arc<dyn Source> = Arc::new(CountingSource::new("news", "news-reddit", &["worldnews"], F));
        let again: Arc<dyn Source> = Arc::new(CountingSource::new("news", "news-reddit", &["worldnews"], F));

        agg.add_source(first.clone());
        let kept = agg.add_source(again);
        assert!(Arc::ptr_eq(&kept, &first));
        assert_eq!(agg.stats().data_sources, 1);

        let id = SourceId::new("news-reddit");
        assert!(agg.remove_source(SourceClass::Data, &id).is_some());
        assert!(agg.remove_source(SourceClass::Data, &id).is_none());
        assert!(!agg.have_source(SourceClass::Data, &id));
    }

    #[test]
    fn test_source_removed_with_last_claim() {
        let mut agg = aggregator(Instant::now());
        let id = SourceId::new("pir-1");
        let first: Arc<dyn Source> = Arc::new(SensorSource::new(SensorKind::Motion, "pir-1", None));
        let second: Arc<dyn Source> = Arc::new(SensorSource::new(SensorKind::Motion, "pir-1", None));

        let a = agg.claim_source(first.clone());
        let b = agg.claim_source(second);
        assert!(Arc::ptr_eq(&a, &first));
        assert!(Arc::ptr_eq(&b, &first));

        assert!(agg.release_source(SourceClass::Sensor, &id).is_none());
        assert!(agg.have_source(SourceClass::Sensor, &id));

        assert!(agg.release_source(SourceClass::Sensor, &id).is_some());
        assert!(!agg.have_source(SourceClass::Sensor, &id));
        assert!(agg.release_source(SourceClass::Sensor, &id).is_none());
    }

    #[test]
    fn test_unclaimed_source_survives_release() {
        let mut agg = aggregator(Instant::now());
        agg.add_source(Arc::new(CountingSource::new("news", "n", &["worldnews"], F)));
        assert!(agg.release_source(SourceClass::Data, &SourceId::new("n")).is_none());
        assert!(agg.have_source(SourceClass::Data, &SourceId::new("n")));
    }

    #[test]
    fn test_add_want_dedupes_and_requires_ready() {
        let mut agg = aggregator(Instant::now());
        let source = Arc::new(CountingSource::new("news", "n", &["worldnews"], F));

        let unready = agg.load_want(SourceClass::Data, "news", "worldnews");
        assert!(!agg.remove_want(&unready));
        assert!(matches!(agg.add_want(unready), Err(AggregatorError::WantNotReady(_))));

        let first = ready(&source, "worldnews");
        let first_uid = first.uid();
        let second = ready(&source, "worldnews");
        assert_eq!(first.id(), second.id());

        assert_eq!(agg.add_want(first).unwrap().uid(), first_uid);
        let kept = agg.add_want(second).unwrap();
        assert_eq!(kept.uid(), first_uid);
        assert!(kept.is_active());
        assert_eq!(agg.stats().active_wants, 1);

        let probe = ready(&source, "worldnews");
        assert!(agg.remove_want(&probe));
        assert!(!agg.remove_want(&probe));
    }

    #[test]
    fn test_resolution_is_first_match_in_insertion_order() {
        let mut agg = aggregator(Instant::now());
        agg.add_source(Arc::new(CountingSource::new("news", "a", &["localnews"], F)));
        agg.add_source(Arc::new(CountingSource::new("news", "b", &["worldnews"], F)));
        agg.add_source(Arc::new(CountingSource::new("news", "c", &["worldnews"], F)));

        let mut want = agg.load_want(SourceClass::Data, "news", "worldnews");
        assert!(agg.resolve_source(&mut want));
        assert_eq!(want.source().unwrap().id().as_str(), "b");

        let mut other = agg.load_want(SourceClass::Data, "weather", "worldnews");
        assert!(!agg.resolve_source(&mut other));
    }

    #[test]
    fn test_prepare_failure_keeps_want_pending() {
        let t0 = Instant::now();
        let mut agg = aggregator(t0);
        agg.add_source(Arc::new(CountingSource::new("news", "n", &["worldnews"], F)));

        let want = agg.load_want(SourceClass::Data, "news", "worldnews");
        let uid = agg.queue_want(
            want,
            Box::new(|_: &mut Want| -> Result<(), PrepareError> {
                Err(PrepareError::MissingConfig("city".into()))
            }),
        );

        for n in 1..=3u32 {
            assert!(agg.cycle_pending(t0 + SEC * n).is_empty());
            assert_eq!(agg.pending_attempts(uid), Some(n));
        }
        assert!(agg.cancel_pending(uid));
        assert!(!agg.is_pending(uid));
    }

    #[test]
    fn test_prepare_without_config_is_not_ready() {
        let t0 = Instant::now();
        let mut agg = aggregator(t0);
        agg.add_source(Arc::new(CountingSource::new("news", "n", &["worldnews"], F)));

        let want = agg.load_want(SourceClass::Data, "news", "worldnews");
        let uid = agg.queue_want(want, Box::new(|_: &mut Want| -> Result<(), PrepareError> { Ok(()) }));
        assert!(agg.cycle_pending(t0 + SEC).is_empty());
        assert!(agg.is_pending(uid));
    }

    #[tokio::test]
    async fn test_tick_order_resolves_then_refreshes() {
        let t0 = Instant::now();
        let mut agg = aggregator(t0);
        let source = Arc::new(CountingSource::new("news", "n", &["worldnews"], F));
        agg.add_source(source.clone());

        let want = agg.load_want(SourceClass::Data, "news", "worldnews");
        let uid = agg.queue_want(want, with_config(WantConfig::new()));

        agg.tick(t0 + SEC).await;
        assert!(!agg.is_pending(uid));
        assert_eq!(agg.stats().active_wants, 1);
        assert_eq!(source.fetches(), 1);

        agg.tick(t0 + SEC * 2).await;
        assert_eq!(source.fetches(), 1);
        agg.tick(t0 + SEC + F).await;
        assert_eq!(source.fetches(), 2);
    }

    #[tokio::test]
    async fn test_refresh_publishes_to_subscribers() {
        let t0 = Instant::now();
        let mut agg = aggregator(t0);
        let source = Arc::new(CountingSource::new("news", "n", &["worldnews"], F));
        let id = agg.add_want(ready(&source, "worldnews")).unwrap().id();

        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = seen.clone();
        agg.bus().subscribe(id.topic(), move |event: &DataEvent| {
            sink.lock().push(event.payload.clone());
            true
        });

        assert!(agg.refresh(&id, true, t0).await);
        assert!(!agg.refresh(&WantId::new("data:news/none-global"), true, t0).await);
        assert_eq!(seen.lock().len(), 1);

        // Cache hit publishes the same payload without fetching
        assert!(agg.refresh(&id, false, t0 + SEC).await);
        assert_eq!(source.fetches(), 1);
        let seen = seen.lock();
        assert_eq!(seen[0], seen[1]);
        assert_eq!(
            seen[0],
            crate::bus::EventPayload::Update {
                data: json!({"filter": "worldnews", "fetch": 1}),
                wake: false
            }
        );
    }

    #[test]
    fn test_still_wanted_cycle_evicts_silent_wants() {
        let t0 = Instant::now();
        let mut agg = aggregator(t0);
        let source = Arc::new(CountingSource::new("news", "n", &["worldnews", "localnews"], F));
        let kept = agg.add_want(ready(&source, "worldnews")).unwrap().id();
        let dropped = agg.add_want(ready(&source, "localnews")).unwrap().id();
        agg.bus().subscribe(kept.topic(), |event: &DataEvent| event.is_ping());

        let evicted = agg.cycle_still_wanted(t0 + Duration::from_secs(300));
        assert_eq!(evicted, vec![dropped.clone()]);
        assert!(agg.have_want(&kept));
        assert!(!agg.have_want(&dropped));
        assert_eq!(agg.want_ids(), &[kept]);
    }
}
