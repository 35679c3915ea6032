//! Weather data source backed by a forecast.io style API.

use super::{get_json, DataSourceBase, FetchError, Requirements, Source, SourceError};
use crate::types::{short_hash, value_text, SourceClass, SourceId, WantConfig, WantId};
use aliceconf::SourceDefinition;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{debug, info};

pub const FREQUENCY: Duration = Duration::from_secs(60);

#[derive(Debug)]
pub struct WeatherSource {
    base: DataSourceBase,
    requirements: Requirements,
    http: reqwest::Client,
}

impl WeatherSource {
    pub fn new(def: &SourceDefinition, http: reqwest::Client) -> Result<Self, SourceError> {
        let base = DataSourceBase::from_definition(def, FREQUENCY)?;
        if base.backend != "forecast" {
            return Err(SourceError::UnknownBackend {
                source_type: base.source_type,
                backend: base.backend,
            });
        }
        Ok(Self {
            base,
            requirements: Requirements::new(&["city", "units"])
                .with_filter("geo", &["latitude", "longitude"]),
            http,
        })
    }

    /// Source settings overlaid with the want's config; the want wins.
    fn unified(&self, config: &WantConfig) -> Map<String, Value> {
        let mut unified = self.base.definition.configuration.clone();
        for (k, v) in config {
            unified.insert(k.clone(), v.clone());
        }
        unified
    }
}

/// forecast.io unit family for a client unit preference.
pub fn api_units(units: &str) -> &'static str {
    match units {
        "metric" => "ca",
        "imperial" => "us",
        _ => "auto",
    }
}

/// Substitute `{name}` placeholders.
pub(crate) fn fill_template(template: &str, values: &[(&str, String)]) -> String {
    let mut out = template.to_string();
    for (name, value) in values {
        out = out.replace(&format!("{{{name}}}"), value);
    }
    out
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

fn trim_period(value: Option<&Value>) -> Value {
    Value::String(
        value
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim_end_matches('.')
            .to_string(),
    )
}

/// Reduce a forecast response to what a display renders.
pub fn summarize_forecast(body: &Value) -> Result<Value, FetchError> {
    let current = body
        .get("currently")
        .and_then(Value::as_object)
        .ok_or_else(|| FetchError::Malformed("no 'currently' block".to_string()))?;
    let today = body
        .pointer("/daily/data/0")
        .ok_or_else(|| FetchError::Malformed("no daily forecast".to_string()))?;

    let time = current.get("time").and_then(Value::as_i64).unwrap_or_default();
    let sunrise = today.get("sunriseTime").and_then(Value::as_i64).unwrap_or_default();
    let sunset = today.get("sunsetTime").and_then(Value::as_i64).unwrap_or_default();
    let sky = if time > sunrise && time < sunset { "day" } else { "night" };

    let mut weather = current.clone();
    weather.insert("sky".to_string(), Value::from(sky));
    weather.insert("summary".to_string(), trim_period(current.get("summary")));
    weather.insert("now".to_string(), trim_period(body.pointer("/minutely/summary")));
    weather.insert("today".to_string(), trim_period(body.pointer("/hourly/summary")));

    for (key, places) in [
        ("temperature", 0),
        ("apparentTemperature", 0),
        ("dewPoint", 0),
        ("visibility", 1),
    ] {
        if let Some(v) = weather.get(key).and_then(Value::as_f64) {
            weather.insert(key.to_string(), Value::from(round_to(v, places)));
        }
    }

    for key in ["humidity", "cloudCover", "precipProbability"] {
        if let Some(v) = weather.get(key).and_then(Value::as_f64) {
            weather.insert(key.to_string(), Value::from((v * 100.0).round()));
        }
    }

    Ok(Value::Object(weather))
}

#[async_trait]
impl Source for WeatherSource {
    fn class(&self) -> SourceClass {
        SourceClass::Data
    }

    fn source_type(&self) -> &str {
        &self.base.source_type
    }

    fn id(&self) -> &SourceId {
        &self.base.id
    }

    fn satisfies(&self) -> &[String] {
        &self.base.satisfies
    }

    fn frequency(&self) -> Duration {
        self.base.frequency
    }

    fn required_fields(&self, filter: &str) -> Vec<String> {
        self.requirements.fields_for(filter)
    }

    fn build_want_id(&self, filter: &str, config: &WantConfig) -> WantId {
        let identity: Vec<String> = match filter {
            "geo" => ["city", "latitude", "longitude"]
                .iter()
                .map(|k| value_text(config.get(*k)))
                .collect(),
            _ => vec![value_text(config.get("city"))],
        };
        let parts: Vec<&str> = identity.iter().map(String::as_str).collect();
        self.base.want_id(filter, &short_hash(&parts))
    }

    async fn fetch(&self, filter: &str, config: &WantConfig) -> Result<Value, FetchError> {
        let unified = self.unified(config);
        let setting = |key: &str| {
            unified
                .get(key)
                .map(|v| value_text(Some(v)))
                .filter(|s| !s.is_empty())
                .ok_or_else(|| FetchError::MissingSetting(key.to_string()))
        };

        let host = setting("host")?;
        let key = setting("key")?;
        let path = self
            .base
            .definition
            .filter_setting(filter, "path")
            .ok_or_else(|| FetchError::UnsupportedFilter(filter.to_string()))?;
        let path = fill_template(
            path,
            &[
                ("api", key),
                ("latitude", value_text(unified.get("latitude"))),
                ("longitude", value_text(unified.get("longitude"))),
            ],
        );
        let units = api_units(&value_text(unified.get("units")));

        info!(
            source.id = %self.base.id,
            city = %value_text(unified.get("city")),
            "requesting updated weather data"
        );

        let url = format!("{}{}", host.trim_end_matches('/'), path);
        let body = get_json(self.http.get(&url).query(&[("units", units)])).await?;
        let weather = summarize_forecast(&body)?;

        debug!(
            source.id = %self.base.id,
            temperature = %value_text(weather.get("temperature")),
            now = %value_text(weather.get("now")),
            "weather updated"
        );
        Ok(weather)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn source() -> WeatherSource {
        let def = SourceDefinition::new("weather", "forecast").with_satisfies(["geo"]);
        WeatherSource::new(&def, reqwest::Client::new()).unwrap()
    }

    fn geo_config(city: &str) -> WantConfig {
        json!({"city": city, "units": "metric", "latitude": 45.42, "longitude": -75.69})
            .as_object()
            .cloned()
            .unwrap()
    }

    #[test]
    fn test_required_fields() {
        assert_eq!(
            source().required_fields("geo"),
            vec!["city", "units", "latitude", "longitude"]
        );
    }

    #[test]
    fn test_want_id_depends_on_identity_fields_only() {
        let src = source();
        let a = src.build_want_id("geo", &geo_config("Ottawa"));
        let mut with_units = geo_config("Ottawa");
        with_units.insert("units".to_string(), json!("imperial"));
        let b = src.build_want_id("geo", &with_units);
        let c = src.build_want_id("geo", &geo_config("Gatineau"));

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.as_str().starts_with("data:weather/geo-"));
        assert_eq!(a.as_str().len(), "data:weather/geo-".len() + 16);
    }

    #[test]
    fn test_unknown_backend_rejected() {
        let def = SourceDefinition::new("weather", "wunderground");
        assert!(matches!(
            WeatherSource::new(&def, reqwest::Client::new()),
            Err(SourceError::UnknownBackend { .. })
        ));
    }

    #[test]
    fn test_template_and_units() {
        let path = fill_template(
            "/forecast/{api}/{latitude},{longitude}",
            &[("api", "k".into()), ("latitude", "1.5".into()), ("longitude", "-2".into())],
        );
        assert_eq!(path, "/forecast/k/1.5,-2");
        assert_eq!(api_units("metric"), "ca");
        assert_eq!(api_units("imperial"), "us");
        assert_eq!(api_units(""), "auto");
    }

    #[test]
    fn test_summarize_forecast() {
        let body = json!({
            "currently": {
                "time": 1_000,
                "summary": "Light Snow.",
                "temperature": -4.6,
                "apparentTemperature": -9.4,
                "dewPoint": -7.2,
                "visibility": 9.87,
                "humidity": 0.81,
                "cloudCover": 0.954,
                "precipProbability": 0.3
            },
            "minutely": {"summary": "Snow for the hour."},
            "hourly": {"summary": "Flurries until evening."},
            "daily": {"data": [{"sunriseTime": 500, "sunsetTime": 2_000}]}
        });

        let w = summarize_forecast(&body).unwrap();
        assert_eq!(w["sky"], json!("day"));
        assert_eq!(w["summary"], json!("Light Snow"));
        assert_eq!(w["now"], json!("Snow for the hour"));
        assert_eq!(w["today"], json!("Flurries until evening"));
        assert_eq!(w["temperature"], json!(-5.0));
        assert_eq!(w["visibility"], json!(9.9));
        assert_eq!(w["humidity"], json!(81.0));
        assert_eq!(w["cloudCover"], json!(95.0));
    }

    #[test]
    fn test_summarize_night_and_malformed() {
        let body = json!({
            "currently": {"time": 3_000, "summary": "Clear"},
            "daily": {"data": [{"sunriseTime": 500, "sunsetTime": 2_000}]}
        });
        assert_eq!(summarize_forecast(&body).unwrap()["sky"], json!("night"));

        assert!(matches!(
            summarize_forecast(&json!({"daily": {}})),
            Err(FetchError::Malformed(_))
        ));
    }
}
