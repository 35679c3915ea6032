//! Config file discovery, loading, and environment variable overlay.

use crate::{AliceConfig, ConfigError, SourceDefinition};
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files in standard locations.
///
/// Returns paths in load order (system, user, local). Only returns files that exist.
pub fn discover_config_files() -> Vec<PathBuf> {
    discover_config_files_with_override(None)
}

/// Discover config files, optionally with a CLI override path.
///
/// If `cli_path` is provided and exists, it replaces the local override.
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    let system = PathBuf::from("/etc/alice/config.toml");
    if system.exists() {
        files.push(system);
    }

    // XDG_CONFIG_HOME or ~/.config
    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("alice/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    let local = PathBuf::from("alice.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Apply a TOML file on top of `config`. Only keys the file sets change.
pub fn overlay_file(config: &mut AliceConfig, path: &Path) -> Result<(), ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    overlay_toml(config, &contents, path)
}

fn parse_error(path: &Path, message: impl ToString) -> ConfigError {
    ConfigError::Parse {
        path: path.to_path_buf(),
        message: message.to_string(),
    }
}

/// Parse config from a TOML string, on top of the compiled defaults.
pub(crate) fn parse_toml(contents: &str, path: &Path) -> Result<AliceConfig, ConfigError> {
    let mut config = AliceConfig::default();
    overlay_toml(&mut config, contents, path)?;
    Ok(config)
}

/// Set every key present in `contents` on `config`. A key set explicitly
/// wins even when it equals the compiled default.
pub(crate) fn overlay_toml(config: &mut AliceConfig, contents: &str, path: &Path) -> Result<(), ConfigError> {
    let table: toml::Table = contents
        .parse()
        .map_err(|e: toml::de::Error| parse_error(path, e))?;

    let infra = &mut config.infra;

    if let Some(bind) = table.get("bind").and_then(|v| v.as_table()) {
        if let Some(v) = bind.get("address").and_then(|v| v.as_str()) {
            infra.bind.address = v.to_string();
        }
        if let Some(v) = bind.get("http_port").and_then(|v| v.as_integer()) {
            infra.bind.http_port = u16::try_from(v)
                .map_err(|_| parse_error(path, format!("bind.http_port {v} is not a valid port")))?;
        }
    }

    if let Some(telemetry) = table.get("telemetry").and_then(|v| v.as_table()) {
        if let Some(v) = telemetry.get("otlp_endpoint").and_then(|v| v.as_str()) {
            infra.telemetry.otlp_endpoint = v.to_string();
        }
        if let Some(v) = telemetry.get("log_level").and_then(|v| v.as_str()) {
            infra.telemetry.log_level = v.to_string();
        }
    }

    if let Some(engine) = table.get("engine").and_then(|v| v.as_table()) {
        if let Some(v) = engine.get("tick_ms").and_then(|v| v.as_integer()) {
            infra.engine.tick_ms = v.max(0) as u64;
        }
        if let Some(v) = engine.get("pending_cycle_secs").and_then(|v| v.as_integer()) {
            infra.engine.pending_cycle_secs = v.max(0) as u64;
        }
        if let Some(v) = engine.get("wanted_cycle_secs").and_then(|v| v.as_integer()) {
            infra.engine.wanted_cycle_secs = v.max(0) as u64;
        }
        if let Some(v) = engine.get("command_buffer").and_then(|v| v.as_integer()) {
            infra.engine.command_buffer = v.max(1) as usize;
        }
    }

    let bootstrap = &mut config.bootstrap;

    if let Some(section) = table.get("bootstrap") {
        // A file that lists sources replaces the earlier list wholesale
        if let Some(data) = section
            .get("sources")
            .and_then(|v| v.get("data"))
            .and_then(|v| v.as_array())
        {
            let mut definitions = Vec::with_capacity(data.len());
            for (index, entry) in data.iter().enumerate() {
                let def: SourceDefinition = entry.clone().try_into().map_err(|e| {
                    parse_error(path, format!("bootstrap.sources.data[{index}]: {e}"))
                })?;
                definitions.push(def);
            }
            bootstrap.sources.data = definitions;
        }

        if let Some(clients) = section.get("clients").and_then(|v| v.as_table()) {
            if let Some(aliases) = clients.get("field_aliases").and_then(|v| v.as_table()) {
                for (field, target) in aliases {
                    if let Some(target) = target.as_str() {
                        bootstrap
                            .clients
                            .field_aliases
                            .insert(field.clone(), target.to_string());
                    }
                }
            }
            if let Some(v) = clients.get("user_agent").and_then(|v| v.as_str()) {
                bootstrap.clients.user_agent = v.to_string();
            }
        }
    }

    Ok(())
}

fn env_override<T: std::str::FromStr>(
    name: &str,
    sources: &mut ConfigSources,
    apply: impl FnOnce(T),
) {
    if let Some(value) = env::var(name).ok().and_then(|v| v.parse().ok()) {
        apply(value);
        sources.env_overrides.push(name.to_string());
    }
}

/// Apply environment variable overrides to config.
pub fn apply_env_overrides(config: &mut AliceConfig, sources: &mut ConfigSources) {
    env_override("ALICE_BIND_ADDRESS", sources, |v| config.infra.bind.address = v);
    env_override("ALICE_HTTP_PORT", sources, |v| config.infra.bind.http_port = v);

    env_override("ALICE_OTLP_ENDPOINT", sources, |v| {
        config.infra.telemetry.otlp_endpoint = v
    });
    // Standard OTEL variable wins over ours
    env_override("OTEL_EXPORTER_OTLP_ENDPOINT", sources, |v| {
        config.infra.telemetry.otlp_endpoint = v
    });
    env_override("ALICE_LOG_LEVEL", sources, |v| config.infra.telemetry.log_level = v);
    env_override("RUST_LOG", sources, |v| config.infra.telemetry.log_level = v);

    env_override("ALICE_TICK_MS", sources, |v| config.infra.engine.tick_ms = v);
    env_override("ALICE_PENDING_CYCLE_SECS", sources, |v| {
        config.infra.engine.pending_cycle_secs = v
    });
    env_override("ALICE_WANTED_CYCLE_SECS", sources, |v| {
        config.infra.engine.wanted_cycle_secs = v
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discover_config_files() {
        // Just verify it doesn't panic
        let _files = discover_config_files();
    }

    #[test]
    fn test_parse_minimal_toml() {
        let toml = r#"
[bind]
http_port = 9100
"#;
        let config = parse_toml(toml, Path::new("test.toml")).unwrap();
        assert_eq!(config.infra.bind.http_port, 9100);
        assert_eq!(config.infra.engine.wanted_cycle_secs, 300);
        assert!(config.bootstrap.sources.data.is_empty());
    }

    #[test]
    fn test_parse_full_toml() {
        let toml = r#"
[bind]
address = "127.0.0.1"
http_port = 9000

[telemetry]
otlp_endpoint = "127.0.0.1:4317"
log_level = "debug"

[engine]
tick_ms = 250
wanted_cycle_secs = 60

[[bootstrap.sources.data]]
type = "weather"
source = "forecast"
satisfies = ["geo"]
frequency = 120

[bootstrap.sources.data.configuration]
host = "https://api.example.test"
key = "secret"

[bootstrap.sources.data.configuration.filters.geo]
path = "/forecast/{api}/{latitude},{longitude}"

[[bootstrap.sources.data]]
type = "news"
source = "reddit"
satisfies = ["worldnews", "localnews"]

[bootstrap.clients.field_aliases]
city = "home.city"
"#;
        let config = parse_toml(toml, Path::new("test.toml")).unwrap();

        assert_eq!(config.infra.bind.address, "127.0.0.1");
        assert_eq!(config.infra.bind.http_port, 9000);
        assert_eq!(config.infra.telemetry.log_level, "debug");
        assert!(config.infra.telemetry.otlp_enabled());
        assert_eq!(config.infra.engine.tick_ms, 250);
        assert_eq!(config.infra.engine.wanted_cycle_secs, 60);
        assert_eq!(config.infra.engine.pending_cycle_secs, 1);

        let sources = &config.bootstrap.sources.data;
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].source_type, "weather");
        assert_eq!(sources[0].frequency, Some(120));
        assert_eq!(sources[0].setting("key"), Some("secret"));
        assert_eq!(
            sources[0].filter_setting("geo", "path"),
            Some("/forecast/{api}/{latitude},{longitude}")
        );
        assert_eq!(sources[1].satisfies, vec!["worldnews", "localnews"]);

        let aliases = &config.bootstrap.clients.field_aliases;
        assert_eq!(aliases.get("city").map(String::as_str), Some("home.city"));
        assert_eq!(aliases.get("units").map(String::as_str), Some("location.units"));
    }

    #[test]
    fn test_bad_port_is_parse_error() {
        let err = parse_toml("[bind]\nhttp_port = 70000\n", Path::new("bad.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("bad.toml"));
    }

    #[test]
    fn test_source_without_type_is_parse_error() {
        let toml = r#"
[[bootstrap.sources.data]]
source = "forecast"
"#;
        let err = parse_toml(toml, Path::new("test.toml")).unwrap_err();
        assert!(err.to_string().contains("bootstrap.sources.data[0]"));
    }

    #[test]
    fn test_overlay_keeps_keys_the_file_does_not_set() {
        let mut config = parse_toml(
            r#"
[bind]
http_port = 9001

[[bootstrap.sources.data]]
type = "news"
source = "nyt"
"#,
            Path::new("system.toml"),
        )
        .unwrap();
        overlay_toml(&mut config, "[telemetry]\nlog_level = \"trace\"\n", Path::new("user.toml")).unwrap();

        assert_eq!(config.infra.bind.http_port, 9001);
        assert_eq!(config.infra.telemetry.log_level, "trace");
        assert_eq!(config.bootstrap.sources.data.len(), 1);
    }

    #[test]
    fn test_overlay_can_restore_a_default() {
        let mut config = parse_toml(
            "[bind]\nhttp_port = 9001\n\n[engine]\nwanted_cycle_secs = 60\n",
            Path::new("system.toml"),
        )
        .unwrap();
        let defaults = AliceConfig::default();
        let local = format!(
            "[bind]\nhttp_port = {}\n\n[engine]\nwanted_cycle_secs = {}\n",
            defaults.infra.bind.http_port, defaults.infra.engine.wanted_cycle_secs
        );
        overlay_toml(&mut config, &local, Path::new("alice.toml")).unwrap();

        assert_eq!(config.infra.bind.http_port, defaults.infra.bind.http_port);
        assert_eq!(config.infra.engine.wanted_cycle_secs, defaults.infra.engine.wanted_cycle_secs);
    }

    #[test]
    fn test_overlay_source_list_replaces_earlier_list() {
        let mut config = parse_toml(
            "[[bootstrap.sources.data]]\ntype = \"news\"\nsource = \"nyt\"\n",
            Path::new("system.toml"),
        )
        .unwrap();
        overlay_toml(
            &mut config,
            "[[bootstrap.sources.data]]\ntype = \"weather\"\nsource = \"forecast\"\n",
            Path::new("user.toml"),
        )
        .unwrap();

        let sources = &config.bootstrap.sources.data;
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].source_type, "weather");
    }
}
