//! Engine service: one task owns the aggregator, everyone else holds a handle.

use crate::aggregator::{Aggregator, AggregatorStats};
use crate::bus::EventBus;
use crate::pending::WantHandler;
use crate::source::Source;
use crate::types::{SourceClass, SourceId, WantId, WantUid};
use crate::want::Want;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("aggregator service is not running")]
    Closed,
}

impl<T> From<mpsc::error::SendError<T>> for EngineError {
    fn from(_: mpsc::error::SendError<T>) -> Self {
        EngineError::Closed
    }
}

impl From<oneshot::error::RecvError> for EngineError {
    fn from(_: oneshot::error::RecvError) -> Self {
        EngineError::Closed
    }
}

pub enum Command {
    ClaimSource {
        source: Arc<dyn Source>,
        reply: oneshot::Sender<Arc<dyn Source>>,
    },
    ReleaseSource {
        class: SourceClass,
        id: SourceId,
    },
    QueueWant {
        want: Want,
        handler: Box<dyn WantHandler>,
        reply: oneshot::Sender<WantUid>,
    },
    CancelPending {
        uid: WantUid,
    },
    Refresh {
        id: WantId,
        fresh: bool,
        reply: oneshot::Sender<bool>,
    },
    PushSensor {
        id: SourceId,
        reading: Value,
        wake: bool,
        reply: oneshot::Sender<usize>,
    },
    Stats {
        reply: oneshot::Sender<AggregatorStats>,
    },
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::ClaimSource { source, .. } => write!(f, "ClaimSource({})", source.id()),
            Command::ReleaseSource { class, id } => write!(f, "ReleaseSource({class}, {id})"),
            Command::QueueWant { want, .. } => write!(f, "QueueWant({})", want.uid()),
            Command::CancelPending { uid } => write!(f, "CancelPending({uid})"),
            Command::Refresh { id, fresh, .. } => write!(f, "Refresh({id}, fresh={fresh})"),
            Command::PushSensor { id, wake, .. } => write!(f, "PushSensor({id}, wake={wake})"),
            Command::Stats { .. } => f.write_str("Stats"),
        }
    }
}

/// Cloneable way in to the running aggregator.
#[derive(Debug, Clone)]
pub struct AggregatorHandle {
    tx: mpsc::Sender<Command>,
    bus: Arc<EventBus>,
}

impl AggregatorHandle {
    /// The bus wants publish on. Subscribing needs no round trip.
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(make(reply)).await?;
        Ok(rx.await?)
    }

    /// Register a source for a connection. Returns the source actually
    /// registered, which is an earlier claimant's if the identity is taken.
    pub async fn claim_source(&self, source: Arc<dyn Source>) -> Result<Arc<dyn Source>, EngineError> {
        self.request(|reply| Command::ClaimSource { source, reply }).await
    }

    pub async fn release_source(&self, class: SourceClass, id: SourceId) -> Result<(), EngineError> {
        self.tx.send(Command::ReleaseSource { class, id }).await?;
        Ok(())
    }

    pub async fn queue_want(&self, want: Want, handler: Box<dyn WantHandler>) -> Result<WantUid, EngineError> {
        self.request(|reply| Command::QueueWant { want, handler, reply })
            .await
    }

    pub async fn cancel_pending(&self, uid: WantUid) -> Result<(), EngineError> {
        self.tx.send(Command::CancelPending { uid }).await?;
        Ok(())
    }

    pub async fn refresh(&self, id: WantId, fresh: bool) -> Result<bool, EngineError> {
        self.request(|reply| Command::Refresh { id, fresh, reply }).await
    }

    pub async fn push_sensor(&self, id: SourceId, reading: Value, wake: bool) -> Result<usize, EngineError> {
        self.request(|reply| Command::PushSensor {
            id,
            reading,
            wake,
            reply,
        })
        .await
    }

    pub async fn stats(&self) -> Result<AggregatorStats, EngineError> {
        self.request(|reply| Command::Stats { reply }).await
    }
}

pub struct AggregatorService {
    aggregator: Aggregator,
    tick: Duration,
    rx: mpsc::Receiver<Command>,
}

impl AggregatorService {
    pub fn new(aggregator: Aggregator, tick: Duration, buffer: usize) -> (Self, AggregatorHandle) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let handle = AggregatorHandle {
            tx,
            bus: aggregator.bus().clone(),
        };
        let service = Self { aggregator, tick, rx };
        (service, handle)
    }

    /// Drive the aggregator until shutdown or until every handle is dropped.
    pub async fn run(mut self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.tick);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(tick_ms = self.tick.as_millis() as u64, "aggregator service started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("aggregator service shutting down");
                    break;
                }
                _ = interval.tick() => {
                    self.aggregator.tick(Instant::now()).await;
                }
                command = self.rx.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => {
                        info!("all handles dropped, aggregator service stopping");
                        break;
                    }
                },
            }
        }
    }

    async fn handle(&mut self, command: Command) {
        debug!(?command, "engine command");
        // A dropped reply receiver just means the caller stopped waiting
        match command {
            Command::ClaimSource { source, reply } => {
                let _ = reply.send(self.aggregator.claim_source(source));
            }
            Command::ReleaseSource { class, id } => {
                self.aggregator.release_source(class, &id);
            }
            Command::QueueWant { want, handler, reply } => {
                let _ = reply.send(self.aggregator.queue_want(want, handler));
            }
            Command::CancelPending { uid } => {
                self.aggregator.cancel_pending(uid);
            }
            Command::Refresh { id, fresh, reply } => {
                let published = self.aggregator.refresh(&id, fresh, Instant::now()).await;
                let _ = reply.send(published);
            }
            Command::PushSensor {
                id,
                reading,
                wake,
                reply,
            } => {
                let published = self
                    .aggregator
                    .push_sensor(&id, reading, wake, Instant::now())
                    .await;
                let _ = reply.send(published);
            }
            Command::Stats { reply } => {
                let _ = reply.send(self.aggregator.stats());
            }
        }
    }
}
