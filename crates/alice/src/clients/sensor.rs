//! Sensor connections: each registers one sensor source and pushes readings.

use super::{reject, ClientError, Outbound};
use crate::engine::AggregatorHandle;
use crate::source::SourceRegistry;
use crate::types::{SourceClass, SourceId};
use aliceconf::SourceDefinition;
use aliceproto::{SensorMessage, SensorRegistration, ServerMessage};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct SensorClient {
    engine: AggregatorHandle,
    registry: Arc<SourceRegistry>,
    outbound: Outbound,
    source: Option<SourceId>,
}

impl SensorClient {
    pub fn new(engine: AggregatorHandle, registry: Arc<SourceRegistry>, outbound: Outbound) -> Self {
        Self {
            engine,
            registry,
            outbound,
            source: None,
        }
    }

    /// Id of the registered sensor source, once registered.
    pub fn source_id(&self) -> Option<&SourceId> {
        self.source.as_ref()
    }

    fn send(&self, message: ServerMessage) {
        let _ = self.outbound.send(message);
    }

    pub async fn handle(&mut self, message: SensorMessage) -> Result<(), ClientError> {
        match message {
            SensorMessage::Register(registration) => self.register(registration).await,
            SensorMessage::Data(reading) => {
                let Some(id) = self.source.clone() else {
                    self.send(ServerMessage::error("cannot accept data: not registered"));
                    return Ok(());
                };
                let published = self.engine.push_sensor(id.clone(), reading.data, reading.wake).await?;
                debug!(source.id = %id, wake = reading.wake, published, "sensor reading");
                Ok(())
            }
        }
    }

    async fn register(&mut self, registration: SensorRegistration) -> Result<(), ClientError> {
        if let Some(field) = registration.missing_identity() {
            return Err(reject(
                &self.outbound,
                format!("cannot register: '{field}' is required"),
            ));
        }
        if let Some(existing) = &self.source {
            warn!(source.id = %existing, "sensor registered twice");
            self.send(ServerMessage::error(format!("already registered as '{existing}'")));
            return Ok(());
        }

        let mut definition = SourceDefinition::new(registration.sensor_type.clone(), "").with_id(registration.id.clone());
        definition.configuration = registration.settings;
        if let Some(name) = registration.name {
            definition.configuration.insert("name".to_string(), Value::String(name));
        }

        let source = match self.registry.load(SourceClass::Sensor, &definition) {
            Ok(source) => source,
            Err(e) => {
                warn!(sensor_type = %registration.sensor_type, error = %e, "sensor registration refused");
                return Err(reject(&self.outbound, format!("cannot register: {e}")));
            }
        };

        let built = source.clone();
        let source = self.engine.claim_source(source).await?;
        if Arc::ptr_eq(&source, &built) {
            info!(source.id = %source.id(), sensor_type = %registration.sensor_type, "sensor registered");
        } else {
            info!(source.id = %source.id(), "sensor joined an existing registration");
        }
        self.source = Some(source.id().clone());
        self.send(ServerMessage::Registered);
        Ok(())
    }

    /// Release this connection's claim on the sensor source. The source goes
    /// away with the last connection holding it; bound wants stay until
    /// nobody answers their ping.
    pub async fn shutdown(&mut self) {
        if let Some(id) = self.source.take() {
            info!(source.id = %id, "sensor disconnected");
            if let Err(e) = self.engine.release_source(SourceClass::Sensor, id).await {
                debug!(error = %e, "engine gone before sensor cleanup");
            }
        }
    }
}
