use std::path::Path;
use std::sync::Once;

use serde::Deserialize;

use crate::{DebugError, QueryId, Result};

static TRACING_INIT: Once = Once::new();

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    /// Name of the remote debug service this client talks to.
    #[serde(default = "ClientConfig::default_service_name")]
    pub service_name: String,

    /// First query id handed out by a new session.
    #[serde(default = "ClientConfig::default_first_query_id")]
    pub first_query_id: QueryId,

    /// Capacity of the session's event broadcast channel. Slow subscribers
    /// that fall further behind miss events.
    #[serde(default = "ClientConfig::default_event_channel_size")]
    pub event_channel_size: usize,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ClientConfig {
    fn default_service_name() -> String {
        "QmlDebugger".to_owned()
    }

    fn default_first_query_id() -> QueryId {
        1
    }

    fn default_event_channel_size() -> usize {
        64
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| DebugError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    fn validate(&self) -> Result<()> {
        if self.first_query_id == 0 {
            return Err(DebugError::Config(
                "first_query_id must be non-zero; 0 marks unsolicited messages".to_owned(),
            ));
        }
        if self.event_channel_size == 0 {
            return Err(DebugError::Config(
                "event_channel_size must be at least 1".to_owned(),
            ));
        }
        Ok(())
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            service_name: Self::default_service_name(),
            first_query_id: Self::default_first_query_id(),
            event_channel_size: Self::default_event_channel_size(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Simple level (`info`, `debug`, ...) or a full `EnvFilter` directive.
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,

    /// Emit logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_owned()
    }

    pub(crate) fn normalize_level_directives(input: &str) -> String {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Self::default_level();
        }

        match trimmed.to_ascii_lowercase().as_str() {
            "trace" => "trace".to_owned(),
            "debug" => "debug".to_owned(),
            "info" => "info".to_owned(),
            "warn" | "warning" => "warn".to_owned(),
            "error" => "error".to_owned(),
            _ => trimmed.to_owned(),
        }
    }

    /// Effective filter: the configured directives merged with `RUST_LOG`.
    pub fn env_filter(&self) -> tracing_subscriber::EnvFilter {
        let config_directives = Self::normalize_level_directives(&self.level);
        let fallback = || {
            tracing_subscriber::EnvFilter::try_new(&config_directives).unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::default()
                    .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into())
            })
        };

        match std::env::var("RUST_LOG")
            .ok()
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty())
        {
            Some(env_directives) => {
                tracing_subscriber::EnvFilter::try_new(format!("{config_directives},{env_directives}"))
                    .unwrap_or_else(|_| fallback())
            }
            None => fallback(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            json: false,
        }
    }
}

/// Installs the global tracing subscriber. Later calls are no-ops.
pub fn init_tracing(config: &LoggingConfig) {
    TRACING_INIT.call_once(|| {
        let builder = tracing_subscriber::fmt()
            .with_env_filter(config.env_filter())
            .with_writer(std::io::stderr);
        let installed = if config.json {
            builder.json().try_init()
        } else {
            builder.try_init()
        };
        if let Err(err) = installed {
            eprintln!("qml-debug: tracing subscriber already installed: {err}");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.service_name, "QmlDebugger");
        assert_eq!(config.first_query_id, 1);
        assert_eq!(config.event_channel_size, 64);
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json);
    }

    #[test]
    fn empty_toml_yields_defaults() {
        assert_eq!(ClientConfig::from_toml_str("").unwrap(), ClientConfig::default());
    }

    #[test]
    fn parses_overrides() {
        let config = ClientConfig::from_toml_str(
            r#"
            service_name = "V8Debugger"
            first_query_id = 100

            [logging]
            level = "qml_debug=trace"
            json = true
            "#,
        )
        .unwrap();
        assert_eq!(config.service_name, "V8Debugger");
        assert_eq!(config.first_query_id, 100);
        assert_eq!(config.event_channel_size, 64);
        assert_eq!(config.logging.level, "qml_debug=trace");
        assert!(config.logging.json);
    }

    #[test]
    fn rejects_unknown_keys_and_zero_ids() {
        assert!(matches!(
            ClientConfig::from_toml_str("colour = 1"),
            Err(DebugError::Config(_))
        ));
        assert!(matches!(
            ClientConfig::from_toml_str("first_query_id = 0"),
            Err(DebugError::Config(msg)) if msg.contains("non-zero")
        ));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "event_channel_size = 8").unwrap();

        let config = ClientConfig::load(file.path()).unwrap();
        assert_eq!(config.event_channel_size, 8);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ClientConfig::load(dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, DebugError::Io(_)));
    }

    #[test]
    fn level_synonyms_are_normalized() {
        assert_eq!(LoggingConfig::normalize_level_directives(" WARNING "), "warn");
        assert_eq!(LoggingConfig::normalize_level_directives(""), "info");
        assert_eq!(
            LoggingConfig::normalize_level_directives("qml_debug=debug"),
            "qml_debug=debug"
        );
    }
}
