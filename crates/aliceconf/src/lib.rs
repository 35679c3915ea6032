//! Minimal configuration loading for the ALICE hub.
//!
//! Configuration is split into two categories:
//!
//! - **Infrastructure** (`InfraConfig`): listener, telemetry and engine timing.
//!   Fixed once the process starts.
//!
//! - **Bootstrap** (`BootstrapConfig`): data sources registered at startup and
//!   per-client settings. After startup the engine owns this state.
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins):
//! 1. `/etc/alice/config.toml` (system)
//! 2. `~/.config/alice/config.toml` (user)
//! 3. `./alice.toml` or the `--config` path (local override)
//! 4. Environment variables (`ALICE_*`)
//!
//! # Example Config
//!
//! ```toml
//! [bind]
//! http_port = 8090
//!
//! [telemetry]
//! otlp_endpoint = "127.0.0.1:4317"
//! log_level = "info"
//!
//! [engine]
//! pending_cycle_secs = 1
//! wanted_cycle_secs = 300
//!
//! [[bootstrap.sources.data]]
//! type = "weather"
//! source = "forecast"
//! satisfies = ["geo"]
//!
//! [bootstrap.sources.data.configuration]
//! host = "https://api.darksky.net"
//! key = "..."
//!
//! [bootstrap.sources.data.configuration.filters.geo]
//! path = "/forecast/{api}/{latitude},{longitude}"
//! ```

pub mod bootstrap;
pub mod infra;
pub mod loader;

pub use bootstrap::{BootstrapConfig, ClientsConfig, SourceDefinition, SourcesConfig};
pub use infra::{BindConfig, EngineConfig, InfraConfig, TelemetryConfig};
pub use loader::{discover_config_files_with_override, ConfigSources};

use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::PathBuf;
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Complete hub configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AliceConfig {
    /// Infrastructure - cannot change at runtime.
    #[serde(flatten)]
    pub infra: InfraConfig,

    /// Bootstrap - seeds runtime state.
    #[serde(default)]
    pub bootstrap: BootstrapConfig,
}

impl AliceConfig {
    /// Load configuration from all sources.
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration with an explicit file taking the place of `./alice.toml`.
    pub fn load_from(config_path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration and report which files and env vars contributed.
    pub fn load_with_sources_from(
        config_path: Option<&std::path::Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut config = AliceConfig::default();

        for path in loader::discover_config_files_with_override(config_path) {
            loader::overlay_file(&mut config, &path)?;
            sources.files.push(path);
        }

        loader::apply_env_overrides(&mut config, &mut sources);

        Ok((config, sources))
    }

    /// Render the effective config as TOML.
    pub fn to_toml(&self) -> String {
        let mut output = String::new();

        output.push_str("# ALICE hub configuration\n\n");

        output.push_str("[bind]\n");
        let _ = writeln!(output, "address = \"{}\"", self.infra.bind.address);
        let _ = writeln!(output, "http_port = {}", self.infra.bind.http_port);

        output.push_str("\n[telemetry]\n");
        let _ = writeln!(
            output,
            "otlp_endpoint = \"{}\"",
            self.infra.telemetry.otlp_endpoint
        );
        let _ = writeln!(output, "log_level = \"{}\"", self.infra.telemetry.log_level);

        output.push_str("\n[engine]\n");
        let engine = &self.infra.engine;
        let _ = writeln!(output, "tick_ms = {}", engine.tick_ms);
        let _ = writeln!(output, "pending_cycle_secs = {}", engine.pending_cycle_secs);
        let _ = writeln!(output, "wanted_cycle_secs = {}", engine.wanted_cycle_secs);
        let _ = writeln!(output, "command_buffer = {}", engine.command_buffer);

        if !self.bootstrap.sources.data.is_empty() {
            // Definitions carry free-form tables, so let toml lay those out
            let rendered = toml::Value::try_from(&self.bootstrap.sources).and_then(|sources| {
                let mut bootstrap = toml::Table::new();
                bootstrap.insert("sources".to_string(), sources);
                let mut doc = toml::Table::new();
                doc.insert("bootstrap".to_string(), toml::Value::Table(bootstrap));
                toml::to_string(&doc)
            });
            match rendered {
                Ok(body) => {
                    output.push('\n');
                    output.push_str(&body);
                }
                Err(e) => {
                    let _ = writeln!(output, "\n# could not render bootstrap.sources: {e}");
                }
            }
        }

        output.push_str("\n[bootstrap.clients]\n");
        let _ = writeln!(
            output,
            "user_agent = \"{}\"",
            self.bootstrap.clients.user_agent
        );
        output.push_str("\n[bootstrap.clients.field_aliases]\n");
        for (field, target) in &self.bootstrap.clients.field_aliases {
            let _ = writeln!(output, "{field} = \"{target}\"");
        }

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AliceConfig::default();
        assert_eq!(config.infra.bind.http_port, 8090);
        assert!(config.bootstrap.sources.data.is_empty());
        assert!(!config.bootstrap.clients.field_aliases.is_empty());
    }

    #[test]
    fn test_to_toml_round_trips() {
        let mut config = AliceConfig::default();
        config
            .bootstrap
            .sources
            .data
            .push(SourceDefinition::new("news", "reddit").with_satisfies(["worldnews"]));

        let rendered = config.to_toml();
        assert!(rendered.contains("[bind]"));
        assert!(rendered.contains("[engine]"));

        let reparsed = loader::parse_toml(&rendered, std::path::Path::new("rendered.toml")).unwrap();
        assert_eq!(reparsed.infra.bind.http_port, 8090);
        assert_eq!(reparsed.bootstrap.sources.data.len(), 1);
        assert_eq!(reparsed.bootstrap.sources.data[0].source, "reddit");
    }

    #[test]
    fn test_load_from_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alice.toml");
        std::fs::write(&path, "[engine]\nwanted_cycle_secs = 42\n").unwrap();

        let (config, sources) = AliceConfig::load_with_sources_from(Some(&path)).unwrap();
        assert_eq!(config.infra.engine.wanted_cycle_secs, 42);
        assert!(sources.files.contains(&path));
    }

    #[test]
    fn test_load_from_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[bind\nhttp_port = ").unwrap();

        let err = AliceConfig::load_from(Some(&path)).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
