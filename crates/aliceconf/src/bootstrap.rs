//! Bootstrap configuration - seeds the engine at startup, then the engine owns it.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// A statically configured source.
///
/// Data sources come from the config file. Sensor sources are described the
/// same way, but by the sensor client that registers them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDefinition {
    /// Source type, e.g. `weather` or `motion`.
    #[serde(rename = "type")]
    pub source_type: String,

    /// Backend name for data sources (`forecast`, `reddit`, `nyt`).
    #[serde(default)]
    pub source: String,

    /// Explicit identity. Sensors use the registering client's id; data
    /// sources leave this empty and derive `{type}-{source}`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Filters this source can satisfy.
    #[serde(default)]
    pub satisfies: Vec<String>,

    /// Refresh period in seconds, overriding the type default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency: Option<u64>,

    /// Backend specific settings (hosts, keys, per-filter paths).
    #[serde(default)]
    pub configuration: Map<String, Value>,
}

impl SourceDefinition {
    pub fn new(source_type: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            source_type: source_type.into(),
            source: source.into(),
            id: None,
            satisfies: Vec::new(),
            frequency: None,
            configuration: Map::new(),
        }
    }

    pub fn with_satisfies<I, S>(mut self, filters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.satisfies = filters.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Look up a string setting in `configuration`.
    pub fn setting(&self, key: &str) -> Option<&str> {
        self.configuration.get(key).and_then(Value::as_str)
    }

    /// Look up a string setting under `configuration.filters.<filter>`.
    pub fn filter_setting(&self, filter: &str, key: &str) -> Option<&str> {
        self.configuration
            .get("filters")
            .and_then(|filters| filters.get(filter))
            .and_then(|f| f.get(key))
            .and_then(Value::as_str)
    }
}

/// Static source definitions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourcesConfig {
    /// Data sources registered at startup.
    #[serde(default)]
    pub data: Vec<SourceDefinition>,
}

/// Settings applied to every connected client session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientsConfig {
    /// Maps a field a source requires to a dotted path in the client's
    /// registration settings, e.g. `city -> location.city`.
    #[serde(default = "ClientsConfig::default_field_aliases")]
    pub field_aliases: BTreeMap<String, String>,

    /// User agent for outbound HTTP made by data sources.
    #[serde(default = "ClientsConfig::default_user_agent")]
    pub user_agent: String,
}

impl ClientsConfig {
    pub fn default_field_aliases() -> BTreeMap<String, String> {
        ["city", "units", "latitude", "longitude"]
            .into_iter()
            .map(|field| (field.to_string(), format!("location.{field}")))
            .collect()
    }

    fn default_user_agent() -> String {
        concat!("alice-hub/", env!("CARGO_PKG_VERSION")).to_string()
    }
}

impl Default for ClientsConfig {
    fn default() -> Self {
        Self {
            field_aliases: Self::default_field_aliases(),
            user_agent: Self::default_user_agent(),
        }
    }
}

/// Bootstrap configuration - seeds runtime state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BootstrapConfig {
    #[serde(default)]
    pub sources: SourcesConfig,

    #[serde(default)]
    pub clients: ClientsConfig,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_aliases() {
        let clients = ClientsConfig::default();
        assert_eq!(clients.field_aliases.len(), 4);
        assert_eq!(
            clients.field_aliases.get("latitude").map(String::as_str),
            Some("location.latitude")
        );
        assert!(clients.user_agent.starts_with("alice-hub/"));
    }

    #[test]
    fn test_filter_setting() {
        let mut def = SourceDefinition::new("weather", "forecast").with_satisfies(["geo"]);
        def.configuration = json!({
            "host": "https://api.example.test",
            "filters": { "geo": { "path": "/forecast/{api}/{latitude},{longitude}" } }
        })
        .as_object()
        .cloned()
        .unwrap();

        assert_eq!(def.setting("host"), Some("https://api.example.test"));
        assert_eq!(
            def.filter_setting("geo", "path"),
            Some("/forecast/{api}/{latitude},{longitude}")
        );
        assert_eq!(def.filter_setting("local", "path"), None);
        assert_eq!(def.satisfies, vec!["geo".to_string()]);
    }
}
