//! Infrastructure configuration - fixed for the life of the process.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Network bind settings for the hub's HTTP/websocket listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BindConfig {
    /// Interface to listen on.
    /// Default: 0.0.0.0
    #[serde(default = "BindConfig::default_address")]
    pub address: String,

    /// Port for the websocket endpoints and /health.
    /// Default: 8090
    #[serde(default = "BindConfig::default_http_port")]
    pub http_port: u16,
}

impl BindConfig {
    fn default_address() -> String {
        "0.0.0.0".to_string()
    }

    fn default_http_port() -> u16 {
        8090
    }
}

impl Default for BindConfig {
    fn default() -> Self {
        Self {
            address: Self::default_address(),
            http_port: Self::default_http_port(),
        }
    }
}

/// Telemetry and observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// OTLP gRPC endpoint for OpenTelemetry. Empty disables export.
    /// Default: empty
    #[serde(default)]
    pub otlp_endpoint: String,

    /// Log filter (trace, debug, info, warn, error, or an EnvFilter directive).
    /// Default: info
    #[serde(default = "TelemetryConfig::default_log_level")]
    pub log_level: String,
}

impl TelemetryConfig {
    fn default_log_level() -> String {
        "info".to_string()
    }

    /// True when spans, logs and metrics should be shipped to a collector.
    pub fn otlp_enabled(&self) -> bool {
        !self.otlp_endpoint.trim().is_empty()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            otlp_endpoint: String::new(),
            log_level: Self::default_log_level(),
        }
    }
}

/// Aggregation engine timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// How often the engine loop runs a tick.
    /// Default: 1000
    #[serde(default = "EngineConfig::default_tick_ms")]
    pub tick_ms: u64,

    /// Minimum seconds between pending-resolution cycles.
    /// Default: 1
    #[serde(default = "EngineConfig::default_pending_cycle_secs")]
    pub pending_cycle_secs: u64,

    /// Minimum seconds between still-wanted (eviction) cycles.
    /// Default: 300
    #[serde(default = "EngineConfig::default_wanted_cycle_secs")]
    pub wanted_cycle_secs: u64,

    /// Capacity of the engine command channel.
    /// Default: 256
    #[serde(default = "EngineConfig::default_command_buffer")]
    pub command_buffer: usize,
}

impl EngineConfig {
    fn default_tick_ms() -> u64 {
        1000
    }

    fn default_pending_cycle_secs() -> u64 {
        1
    }

    fn default_wanted_cycle_secs() -> u64 {
        300
    }

    fn default_command_buffer() -> usize {
        256
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }

    pub fn pending_cycle(&self) -> Duration {
        Duration::from_secs(self.pending_cycle_secs)
    }

    pub fn wanted_cycle(&self) -> Duration {
        Duration::from_secs(self.wanted_cycle_secs)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_ms: Self::default_tick_ms(),
            pending_cycle_secs: Self::default_pending_cycle_secs(),
            wanted_cycle_secs: Self::default_wanted_cycle_secs(),
            command_buffer: Self::default_command_buffer(),
        }
    }
}

/// Infrastructure configuration - cannot change at runtime.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InfraConfig {
    /// Listener settings.
    #[serde(default)]
    pub bind: BindConfig,

    /// Telemetry settings.
    #[serde(default)]
    pub telemetry: TelemetryConfig,

    /// Engine timing.
    #[serde(default)]
    pub engine: EngineConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_defaults() {
        let bind = BindConfig::default();
        assert_eq!(bind.http_port, 8090);
        assert_eq!(bind.address, "0.0.0.0");
    }

    #[test]
    fn test_telemetry_defaults() {
        let telemetry = TelemetryConfig::default();
        assert!(telemetry.otlp_endpoint.is_empty());
        assert!(!telemetry.otlp_enabled());
        assert_eq!(telemetry.log_level, "info");
    }

    #[test]
    fn test_engine_defaults() {
        let engine = EngineConfig::default();
        assert_eq!(engine.pending_cycle(), Duration::from_secs(1));
        assert_eq!(engine.wanted_cycle(), Duration::from_secs(300));
        assert_eq!(engine.tick_interval(), Duration::from_millis(1000));
    }

    #[test]
    fn test_zero_tick_is_clamped() {
        let engine = EngineConfig {
            tick_ms: 0,
            ..EngineConfig::default()
        };
        assert_eq!(engine.tick_interval(), Duration::from_millis(1));
    }
}
