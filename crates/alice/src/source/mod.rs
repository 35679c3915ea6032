//! Sources: the things Wants bind to.
//!
//! A data source pulls from an upstream service when a Want's refresh is due.
//! A sensor source holds whatever its sensor client last pushed. Both sit
//! behind the same trait so a bound Want never needs to know which it has.

pub mod news;
pub mod registry;
pub mod sensor;
pub mod weather;

#[cfg(test)]
pub(crate) mod fake;

pub use registry::{SourceContext, SourceRegistry};
pub use sensor::{SensorKind, SensorSource};

use crate::types::{SourceClass, SourceId, WantConfig, WantId};
use aliceconf::SourceDefinition;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

/// Errors constructing a source.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("no {class} source type '{source_type}'")]
    UnknownType {
        class: SourceClass,
        source_type: String,
    },

    #[error("{source_type} source has no backend '{backend}'")]
    UnknownBackend { source_type: String, backend: String },

    #[error("{source_type} source definition is missing '{field}'")]
    MissingField {
        source_type: String,
        field: &'static str,
    },
}

/// Errors from a single fetch. Never escape a tick; the want just publishes nothing.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("upstream returned HTTP {0}")]
    Status(u16),

    #[error("unexpected response: {0}")]
    Malformed(String),

    #[error("missing setting '{0}'")]
    MissingSetting(String),

    #[error("filter '{0}' is not supported")]
    UnsupportedFilter(String),

    #[error("no reading available")]
    NoData,
}

#[async_trait]
pub trait Source: Send + Sync + std::fmt::Debug {
    fn class(&self) -> SourceClass;

    fn source_type(&self) -> &str;

    fn id(&self) -> &SourceId;

    /// Filters this source declares it can serve.
    fn satisfies(&self) -> &[String];

    fn can_satisfy(&self, filter: &str) -> bool {
        self.satisfies().iter().any(|f| f == filter)
    }

    /// Refresh period for bound wants and TTL for their cached results.
    fn frequency(&self) -> Duration;

    /// Config fields a want with `filter` must carry before activation.
    fn required_fields(&self, _filter: &str) -> Vec<String> {
        Vec::new()
    }

    /// Deduplication key for a want. Pure in (filter, config).
    fn build_want_id(&self, filter: &str, config: &WantConfig) -> WantId;

    async fn fetch(&self, filter: &str, config: &WantConfig) -> Result<Value, FetchError>;

    /// Take the "wake the display" flag raised since the last fetch.
    fn pop_wake(&self) -> bool {
        false
    }

    /// Accept a pushed reading. Only sensor sources take pushes.
    fn push(&self, _reading: Value, _wake: bool) -> bool {
        false
    }
}

/// Base and per-filter config fields a source requires.
#[derive(Debug, Clone, Default)]
pub struct Requirements {
    base: Vec<String>,
    per_filter: HashMap<String, Vec<String>>,
}

impl Requirements {
    pub fn new(base: &[&str]) -> Self {
        Self {
            base: base.iter().map(|s| s.to_string()).collect(),
            per_filter: HashMap::new(),
        }
    }

    pub fn with_filter(mut self, filter: &str, fields: &[&str]) -> Self {
        self.per_filter.insert(
            filter.to_string(),
            fields.iter().map(|s| s.to_string()).collect(),
        );
        self
    }

    /// Base fields then filter fields, without duplicates.
    pub fn fields_for(&self, filter: &str) -> Vec<String> {
        let mut fields = self.base.clone();
        if let Some(extra) = self.per_filter.get(filter) {
            for field in extra {
                if !fields.contains(field) {
                    fields.push(field.clone());
                }
            }
        }
        fields
    }
}

/// Identity and cadence shared by every data source.
#[derive(Debug, Clone)]
pub struct DataSourceBase {
    pub id: SourceId,
    pub source_type: String,
    pub backend: String,
    pub satisfies: Vec<String>,
    pub frequency: Duration,
    pub definition: SourceDefinition,
}

impl DataSourceBase {
    pub fn from_definition(def: &SourceDefinition, default_frequency: Duration) -> Result<Self, SourceError> {
        if def.source.is_empty() {
            return Err(SourceError::MissingField {
                source_type: def.source_type.clone(),
                field: "source",
            });
        }
        Ok(Self {
            id: SourceId::new(format!("{}-{}", def.source_type, def.source)),
            source_type: def.source_type.clone(),
            backend: def.source.clone(),
            satisfies: def.satisfies.clone(),
            frequency: def
                .frequency
                .map(Duration::from_secs)
                .unwrap_or(default_frequency),
            definition: def.clone(),
        })
    }

    /// Resolved id for a data want: `data:{type}/{filter}-{suffix}`.
    pub fn want_id(&self, filter: &str, suffix: &str) -> WantId {
        WantId::new(format!("{}:{}/{}-{}", SourceClass::Data, self.source_type, filter, suffix))
    }
}

/// Fetch a JSON document, mapping non-2xx to `FetchError::Status`.
pub(crate) async fn get_json(request: reqwest::RequestBuilder) -> Result<Value, FetchError> {
    let response = request.send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::Status(status.as_u16()));
    }
    Ok(response.json::<Value>().await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requirements_union() {
        let req = Requirements::new(&["city", "units"])
            .with_filter("geo", &["latitude", "longitude", "city"]);
        assert_eq!(req.fields_for("geo"), vec!["city", "units", "latitude", "longitude"]);
        assert_eq!(req.fields_for("other"), vec!["city", "units"]);
    }

    #[test]
    fn test_base_identity_and_frequency() {
        let def = SourceDefinition::new("weather", "forecast").with_satisfies(["geo"]);
        let base = DataSourceBase::from_definition(&def, Duration::from_secs(60)).unwrap();
        assert_eq!(base.id.as_str(), "weather-forecast");
        assert_eq!(base.frequency, Duration::from_secs(60));
        assert_eq!(base.want_id("geo", "abc").as_str(), "data:weather/geo-abc");

        let mut def = def;
        def.frequency = Some(5);
        let base = DataSourceBase::from_definition(&def, Duration::from_secs(60)).unwrap();
        assert_eq!(base.frequency, Duration::from_secs(5));
    }

    #[test]
    fn test_base_requires_backend() {
        let def = SourceDefinition::new("news", "");
        let err = DataSourceBase::from_definition(&def, Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, SourceError::MissingField { field: "source", .. }));
    }
}
