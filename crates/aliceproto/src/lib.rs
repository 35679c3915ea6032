//! aliceproto - wire types for the ALICE hub
//!
//! Displays (UI clients) and sensor daemons talk to the hub over websockets
//! using JSON text frames shaped `{"method": ..., "data": ...}`. Each side's
//! vocabulary is a closed enum, so dispatch is an exhaustive `match` and an
//! unknown method is a decode error rather than a silently ignored string.
//!
//! ```
//! use aliceproto::{decode, UiMessage};
//!
//! let msg: UiMessage = decode(r#"{"method":"catchup"}"#).unwrap();
//! assert_eq!(msg, UiMessage::Catchup);
//! ```

pub mod messages;

pub use messages::{
    DataConnector, SensorConnector, SensorMessage, SensorReading, SensorRegistration,
    ServerMessage, UiMessage, UiRegistration,
};

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// The two kinds of source a Want can bind to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceClass {
    /// Pulled on a timer from an upstream service.
    Data,
    /// Pushed by a connected sensor client.
    Sensor,
}

impl SourceClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceClass::Data => "data",
            SourceClass::Sensor => "sensor",
        }
    }
}

impl fmt::Display for SourceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceClass {
    type Err = ProtoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "data" => Ok(SourceClass::Data),
            "sensor" => Ok(SourceClass::Sensor),
            other => Err(ProtoError::UnknownClass(other.to_string())),
        }
    }
}

/// Errors decoding or validating wire messages.
#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("could not decode message: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("unknown source class '{0}'")]
    UnknownClass(String),

    #[error("connector {index} is missing '{field}'")]
    MissingField { index: usize, field: &'static str },

    #[error("connector {index} is malformed: {reason}")]
    Malformed { index: usize, reason: String },
}

/// Decode one text frame.
pub fn decode<T: DeserializeOwned>(text: &str) -> Result<T, ProtoError> {
    Ok(serde_json::from_str(text)?)
}

/// Encode one text frame.
pub fn encode<T: Serialize>(msg: &T) -> Result<String, ProtoError> {
    Ok(serde_json::to_string(msg)?)
}
