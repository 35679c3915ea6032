//! ALICE hub: aggregates data and sensor sources and delivers them to the
//! displays that want them.
//!
//! A display registers connectors; each becomes a [`want::Want`] queued in the
//! [`aggregator::Aggregator`] until a [`source::Source`] can serve it. Active
//! wants refresh on their source's cadence and publish on the [`bus::EventBus`];
//! wants nobody listens to any more are evicted.

pub mod aggregator;
pub mod bus;
pub mod cache;
pub mod clients;
pub mod engine;
pub mod pending;
pub mod source;
pub mod telemetry;
pub mod types;
pub mod want;
pub mod web;

pub use aggregator::{Aggregator, AggregatorError, AggregatorStats};
pub use bus::{DataEvent, EventBus, EventPayload, SubscriptionToken};
pub use engine::{AggregatorHandle, AggregatorService, EngineError};
pub use pending::{PrepareError, WantHandler};
pub use source::{FetchError, Source, SourceError, SourceRegistry};
pub use types::{SourceClass, SourceId, WantConfig, WantId, WantUid};
pub use want::{Want, WantState};
