//! Message vocabularies for the two client endpoints and the hub's replies.

use crate::ProtoError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Messages a display (UI client) sends to the hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "data", rename_all = "snake_case")]
pub enum UiMessage {
    /// Announce the client and the data it wants.
    Register(UiRegistration),
    /// Re-send the latest known value of every want the client holds.
    Catchup,
    /// The display asks to be put to sleep.
    #[serde(rename = "sleepme")]
    SleepMe,
    /// The display asks to be woken.
    #[serde(rename = "wakeme")]
    WakeMe,
}

/// Messages a sensor daemon sends to the hub.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "data", rename_all = "snake_case")]
pub enum SensorMessage {
    /// Register this connection as a sensor source.
    Register(SensorRegistration),
    /// A new reading from the sensor.
    Data(SensorReading),
}

/// Messages the hub sends to either kind of client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    Registered,
    Error {
        reason: String,
        /// The hub closes the connection after a fatal error.
        #[serde(default)]
        fatal: bool,
    },
    /// Fresh data for one of the client's data wants.
    Update {
        source: String,
        filter: String,
        data: Value,
        #[serde(default)]
        wake: bool,
    },
    /// Fresh reading from a sensor the client subscribed to.
    Sense {
        source: String,
        id: String,
        data: Value,
    },
    Sleep,
    Wake,
}

impl ServerMessage {
    pub fn error(reason: impl Into<String>) -> Self {
        ServerMessage::Error {
            reason: reason.into(),
            fatal: false,
        }
    }

    pub fn fatal(reason: impl Into<String>) -> Self {
        ServerMessage::Error {
            reason: reason.into(),
            fatal: true,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, ServerMessage::Error { fatal: true, .. })
    }
}

/// UI client registration.
///
/// Connectors are kept as raw JSON so one malformed entry can be reported
/// and skipped without rejecting the whole registration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UiRegistration {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub id: String,
    /// Client settings, e.g. `location.city`, `dimafter`.
    #[serde(default)]
    pub settings: Map<String, Value>,
    /// Data connectors: `{type, filter, config?}`.
    #[serde(default)]
    pub sources: Vec<Value>,
    /// Sensor connectors: `{type, id}`.
    #[serde(default)]
    pub sensors: Vec<Value>,
}

impl UiRegistration {
    /// The first identity field that is missing, if any.
    pub fn missing_identity(&self) -> Option<&'static str> {
        if self.name.trim().is_empty() {
            Some("name")
        } else if self.id.trim().is_empty() {
            Some("id")
        } else if self.settings.is_empty() {
            Some("settings")
        } else {
            None
        }
    }

    pub fn data_connectors(&self) -> Vec<Result<DataConnector, ProtoError>> {
        self.sources
            .iter()
            .enumerate()
            .map(|(index, raw)| DataConnector::from_value(index, raw))
            .collect()
    }

    pub fn sensor_connectors(&self) -> Vec<Result<SensorConnector, ProtoError>> {
        self.sensors
            .iter()
            .enumerate()
            .map(|(index, raw)| SensorConnector::from_value(index, raw))
            .collect()
    }
}

fn required_str(
    index: usize,
    obj: &Map<String, Value>,
    field: &'static str,
) -> Result<String, ProtoError> {
    match obj.get(field).and_then(Value::as_str) {
        Some(s) if !s.is_empty() => Ok(s.to_string()),
        _ => Err(ProtoError::MissingField { index, field }),
    }
}

fn as_object(index: usize, raw: &Value) -> Result<&Map<String, Value>, ProtoError> {
    raw.as_object().ok_or_else(|| ProtoError::Malformed {
        index,
        reason: "expected an object".to_string(),
    })
}

/// A request for data from a data source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataConnector {
    #[serde(rename = "type")]
    pub source_type: String,
    pub filter: String,
    /// Connector-level overrides for fields the source requires.
    #[serde(default)]
    pub config: Map<String, Value>,
}

impl DataConnector {
    pub fn from_value(index: usize, raw: &Value) -> Result<Self, ProtoError> {
        let obj = as_object(index, raw)?;
        let source_type = required_str(index, obj, "type")?;
        let filter = required_str(index, obj, "filter")?;
        let config = match obj.get("config") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map.clone(),
            Some(_) => {
                return Err(ProtoError::Malformed {
                    index,
                    reason: "config must be an object".to_string(),
                })
            }
        };
        Ok(Self {
            source_type,
            filter,
            config,
        })
    }
}

/// A request for readings from a specific sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorConnector {
    #[serde(rename = "type")]
    pub source_type: String,
    pub id: String,
}

impl SensorConnector {
    pub fn from_value(index: usize, raw: &Value) -> Result<Self, ProtoError> {
        let obj = as_object(index, raw)?;
        Ok(Self {
            source_type: required_str(index, obj, "type")?,
            id: required_str(index, obj, "id")?,
        })
    }
}

/// Sensor daemon registration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorRegistration {
    #[serde(rename = "type", default)]
    pub sensor_type: String,
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub settings: Map<String, Value>,
}

impl SensorRegistration {
    pub fn missing_identity(&self) -> Option<&'static str> {
        if self.sensor_type.trim().is_empty() {
            Some("type")
        } else if self.id.trim().is_empty() {
            Some("id")
        } else {
            None
        }
    }
}

/// One reading pushed by a sensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub data: Value,
    /// Ask subscribed displays to wake up.
    #[serde(default)]
    pub wake: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_missing_identity_order() {
        let mut reg = UiRegistration::default();
        assert_eq!(reg.missing_identity(), Some("name"));
        reg.name = "hall mirror".to_string();
        assert_eq!(reg.missing_identity(), Some("id"));
        reg.id = "mirror-1".to_string();
        assert_eq!(reg.missing_identity(), Some("settings"));
        reg.settings.insert("dimafter".to_string(), json!(30));
        assert_eq!(reg.missing_identity(), None);
    }

    #[test]
    fn test_connector_errors_are_per_entry() {
        let reg = UiRegistration {
            sources: vec![
                json!({"type": "weather", "filter": "geo"}),
                json!({"type": "news"}),
                json!("weather"),
                json!({"type": "news", "filter": "worldnews", "config": {"limit": 3}}),
            ],
            ..UiRegistration::default()
        };

        let parsed = reg.data_connectors();
        assert_eq!(parsed.len(), 4);
        assert!(parsed[0].is_ok());
        assert!(matches!(
            parsed[1],
            Err(ProtoError::MissingField { index: 1, field: "filter" })
        ));
        assert!(matches!(parsed[2], Err(ProtoError::Malformed { index: 2, .. })));

        let news = parsed[3].as_ref().unwrap();
        assert_eq!(news.config.get("limit"), Some(&json!(3)));
    }

    #[test]
    fn test_sensor_connector_requires_id() {
        let err = SensorConnector::from_value(0, &json!({"type": "motion"})).unwrap_err();
        assert_eq!(err.to_string(), "connector 0 is missing 'id'");
    }
}
