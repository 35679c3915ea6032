//! Sensor sources: buffers for readings pushed by sensor clients.

use super::{FetchError, Source};
use crate::types::{SourceClass, SourceId, WantConfig, WantId};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorKind {
    Motion,
    Audio,
    Messages,
}

impl SensorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SensorKind::Motion => "motion",
            SensorKind::Audio => "audio",
            SensorKind::Messages => "messages",
        }
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SensorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "motion" => Ok(SensorKind::Motion),
            "audio" => Ok(SensorKind::Audio),
            "messages" => Ok(SensorKind::Messages),
            other => Err(other.to_string()),
        }
    }
}

/// One connected sensor. Keeps only the latest reading.
#[derive(Debug)]
pub struct SensorSource {
    id: SourceId,
    kind: SensorKind,
    name: Option<String>,
    satisfies: Vec<String>,
    latest: Mutex<Option<Value>>,
    wake: AtomicBool,
}

impl SensorSource {
    pub fn new(kind: SensorKind, id: impl Into<String>, name: Option<String>) -> Self {
        Self {
            id: SourceId::new(id),
            kind,
            name,
            satisfies: vec![kind.as_str().to_string()],
            latest: Mutex::new(None),
            wake: AtomicBool::new(false),
        }
    }

    pub fn kind(&self) -> SensorKind {
        self.kind
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

#[async_trait]
impl Source for SensorSource {
    fn class(&self) -> SourceClass {
        SourceClass::Sensor
    }

    fn source_type(&self) -> &str {
        self.kind.as_str()
    }

    fn id(&self) -> &SourceId {
        &self.id
    }

    fn satisfies(&self) -> &[String] {
        &self.satisfies
    }

    // Sensors are pushed, never polled
    fn frequency(&self) -> Duration {
        Duration::ZERO
    }

    fn build_want_id(&self, filter: &str, _config: &WantConfig) -> WantId {
        WantId::new(format!("{}:{}/{}", SourceClass::Sensor, self.kind, filter))
    }

    async fn fetch(&self, _filter: &str, _config: &WantConfig) -> Result<Value, FetchError> {
        self.latest.lock().clone().ok_or(FetchError::NoData)
    }

    fn pop_wake(&self) -> bool {
        self.wake.swap(false, Ordering::AcqRel)
    }

    fn push(&self, reading: Value, wake: bool) -> bool {
        *self.latest.lock() = Some(reading);
        if wake {
            self.wake.store(true, Ordering::Release);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_push_then_fetch() {
        let sensor = SensorSource::new(SensorKind::Motion, "pir-1", None);
        let config = WantConfig::new();

        assert!(matches!(
            sensor.fetch("pir-1", &config).await,
            Err(FetchError::NoData)
        ));

        assert!(sensor.push(json!({"motion": true}), true));
        assert_eq!(sensor.fetch("pir-1", &config).await.unwrap(), json!({"motion": true}));
        assert!(sensor.pop_wake());
        assert!(!sensor.pop_wake());

        sensor.push(json!({"motion": false}), false);
        assert_eq!(sensor.fetch("pir-1", &config).await.unwrap(), json!({"motion": false}));
        assert!(!sensor.pop_wake());
    }

    #[test]
    fn test_identity() {
        let sensor = SensorSource::new(SensorKind::Audio, "kitchen", Some("Kitchen mic".into()));
        assert_eq!(sensor.id().as_str(), "kitchen");
        assert_eq!(sensor.source_type(), "audio");
        assert!(sensor.can_satisfy("audio"));
        assert_eq!(sensor.frequency(), Duration::ZERO);
        assert_eq!(
            sensor.build_want_id("kitchen", &WantConfig::new()).as_str(),
            "sensor:audio/kitchen"
        );
        assert_eq!("messages".parse::<SensorKind>(), Ok(SensorKind::Messages));
        assert!("radar".parse::<SensorKind>().is_err());
    }
}
