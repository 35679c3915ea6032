//! Wants waiting for a source, keyed by uid in queue order.

use crate::types::WantUid;
use crate::want::Want;
use std::collections::BTreeMap;
use thiserror::Error;

/// Why a resolved want could not be activated this cycle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PrepareError {
    #[error("missing config '{0}'")]
    MissingConfig(String),

    #[error("could not add connector to aggregator")]
    NotReady,

    #[error("{0}")]
    Rejected(String),
}

/// Called once a pending want has been bound to a source.
pub trait WantHandler: Send {
    /// Finish the want's config. `Err` leaves the want queued for the next cycle.
    fn prepare(&mut self, want: &mut Want) -> Result<(), PrepareError>;

    /// The want (or the equivalent one already tracked) is active.
    fn on_active(&mut self, _want: &Want) {}
}

impl<F> WantHandler for F
where
    F: FnMut(&mut Want) -> Result<(), PrepareError> + Send,
{
    fn prepare(&mut self, want: &mut Want) -> Result<(), PrepareError> {
        self(want)
    }
}

pub struct PendingWant {
    pub want: Want,
    pub handler: Box<dyn WantHandler>,
    /// Resolution attempts so far. Nothing bounds it.
    pub attempts: u32,
}

impl std::fmt::Debug for PendingWant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingWant")
            .field("want", &self.want.id())
            .field("attempts", &self.attempts)
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct PendingQueue {
    entries: BTreeMap<WantUid, PendingWant>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue(&mut self, want: Want, handler: Box<dyn WantHandler>) -> WantUid {
        let uid = want.uid();
        self.entries.insert(
            uid,
            PendingWant {
                want,
                handler,
                attempts: 0,
            },
        );
        uid
    }

    pub fn cancel(&mut self, uid: WantUid) -> Option<PendingWant> {
        self.entries.remove(&uid)
    }

    pub fn contains(&self, uid: WantUid) -> bool {
        self.entries.contains_key(&uid)
    }

    pub fn attempts(&self, uid: WantUid) -> Option<u32> {
        self.entries.get(&uid).map(|p| p.attempts)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drain every entry in queue order.
    pub(crate) fn take_all(&mut self) -> Vec<PendingWant> {
        std::mem::take(&mut self.entries).into_values().collect()
    }

    pub(crate) fn restore(&mut self, entry: PendingWant) {
        self.entries.insert(entry.want.uid(), entry);
    }
}
