//! Factory mapping `(class, type)` to a source constructor.

use super::news::NewsSource;
use super::sensor::{SensorKind, SensorSource};
use super::weather::WeatherSource;
use super::{Source, SourceError};
use crate::types::SourceClass;
use aliceconf::SourceDefinition;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Shared resources handed to every constructor.
#[derive(Debug, Clone)]
pub struct SourceContext {
    pub http: reqwest::Client,
}

impl SourceContext {
    pub fn new(user_agent: &str) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self { http })
    }
}

type Constructor =
    Box<dyn Fn(&SourceDefinition, &SourceContext) -> Result<Arc<dyn Source>, SourceError> + Send + Sync>;

pub struct SourceRegistry {
    constructors: HashMap<(SourceClass, String), Constructor>,
    context: SourceContext,
}

impl std::fmt::Debug for SourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<String> = self
            .constructors
            .keys()
            .map(|(class, ty)| format!("{class}/{ty}"))
            .collect();
        types.sort();
        f.debug_struct("SourceRegistry").field("types", &types).finish()
    }
}

fn sensor_constructor(kind: SensorKind) -> Constructor {
    Box::new(move |def: &SourceDefinition, _ctx: &SourceContext| {
        let id = def.id.clone().filter(|id| !id.is_empty()).ok_or(SourceError::MissingField {
            source_type: def.source_type.clone(),
            field: "id",
        })?;
        let name = def
            .configuration
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_string);
        Ok(Arc::new(SensorSource::new(kind, id, name)) as Arc<dyn Source>)
    })
}

impl SourceRegistry {
    /// A registry with no source types.
    pub fn empty(context: SourceContext) -> Self {
        Self {
            constructors: HashMap::new(),
            context,
        }
    }

    /// Weather and news data sources plus motion, audio and messages sensors.
    pub fn with_builtin(context: SourceContext) -> Self {
        let mut registry = Self::empty(context);
        registry.register(SourceClass::Data, "weather", |def, ctx| {
            Ok(Arc::new(WeatherSource::new(def, ctx.http.clone())?) as Arc<dyn Source>)
        });
        registry.register(SourceClass::Data, "news", |def, ctx| {
            Ok(Arc::new(NewsSource::new(def, ctx.http.clone())?) as Arc<dyn Source>)
        });
        for kind in [SensorKind::Motion, SensorKind::Audio, SensorKind::Messages] {
            registry
                .constructors
                .insert((SourceClass::Sensor, kind.as_str().to_string()), sensor_constructor(kind));
        }
        registry
    }

    pub fn register<F>(&mut self, class: SourceClass, source_type: &str, constructor: F)
    where
        F: Fn(&SourceDefinition, &SourceContext) -> Result<Arc<dyn Source>, SourceError>
            + Send
            + Sync
            + 'static,
    {
        self.constructors
            .insert((class, source_type.to_string()), Box::new(constructor));
    }

    pub fn knows(&self, class: SourceClass, source_type: &str) -> bool {
        self.constructors
            .contains_key(&(class, source_type.to_string()))
    }

    /// Build a source. Unknown `(class, type)` is an error, never a panic.
    pub fn load(&self, class: SourceClass, def: &SourceDefinition) -> Result<Arc<dyn Source>, SourceError> {
        let constructor = self
            .constructors
            .get(&(class, def.source_type.clone()))
            .ok_or_else(|| SourceError::UnknownType {
                class,
                source_type: def.source_type.clone(),
            })?;
        constructor(def, &self.context)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> SourceRegistry {
        SourceRegistry::with_builtin(SourceContext {
            http: reqwest::Client::new(),
        })
    }

    #[test]
    fn test_builtin_types() {
        let reg = registry();
        assert!(reg.knows(SourceClass::Data, "weather"));
        assert!(reg.knows(SourceClass::Data, "news"));
        assert!(reg.knows(SourceClass::Sensor, "motion"));
        assert!(!reg.knows(SourceClass::Data, "motion"));
    }

    #[test]
    fn test_unknown_type_is_error() {
        let def = SourceDefinition::new("calendar", "google");
        let err = registry().load(SourceClass::Data, &def).unwrap_err();
        assert!(matches!(err, SourceError::UnknownType { class: SourceClass::Data, .. }));
        assert_eq!(err.to_string(), "no data source type 'calendar'");
    }

    #[test]
    fn test_loads_data_and_sensor_sources() {
        let reg = registry();

        let weather = reg
            .load(
                SourceClass::Data,
                &SourceDefinition::new("weather", "forecast").with_satisfies(["geo"]),
            )
            .unwrap();
        assert_eq!(weather.id().as_str(), "weather-forecast");
        assert_eq!(weather.class(), SourceClass::Data);

        let motion = reg
            .load(SourceClass::Sensor, &SourceDefinition::new("motion", "").with_id("pir-1"))
            .unwrap();
        assert_eq!(motion.id().as_str(), "pir-1");
        assert_eq!(motion.class(), SourceClass::Sensor);
    }

    #[test]
    fn test_sensor_requires_id() {
        let err = registry()
            .load(SourceClass::Sensor, &SourceDefinition::new("audio", ""))
            .unwrap_err();
        assert!(matches!(err, SourceError::MissingField { field: "id", .. }));
    }
}
