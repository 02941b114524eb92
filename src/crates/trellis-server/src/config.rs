//! Server configuration
//!
//! Loads `trellis.toml` (path overridable via `TRELLIS_CONFIG`) and applies
//! `HOST`/`PORT` environment overrides. Every section has defaults so the
//! server starts with no config file at all.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default aggregate document location
pub const DEFAULT_PERSIST_PATH: &str = ".trellis_ops.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Bind address configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Host to bind
    pub host: String,
    /// Port to bind
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 2024,
        }
    }
}

/// Aggregate-document persistence configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Path of the aggregate JSON document
    pub path: PathBuf,
    /// Seconds between background flushes of a dirty document
    pub flush_interval_secs: u64,
    /// Consecutive flush failures tolerated before escalating to fatal
    pub max_flush_failures: u32,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_PERSIST_PATH),
            flush_interval_secs: 5,
            max_flush_failures: 3,
        }
    }
}

/// Run-executor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Maximum delivery attempts before a transient failure becomes final
    pub max_attempts: u32,
    /// Initial retry backoff in milliseconds
    pub backoff_initial_ms: u64,
    /// Retry backoff cap in milliseconds
    pub backoff_max_ms: u64,
    /// Grace period granted to a cancelled run before it is abandoned
    pub cancellation_grace_secs: u64,
    /// Milliseconds between picker sweeps when the queue is idle
    pub picker_interval_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_initial_ms: 500,
            backoff_max_ms: 30_000,
            cancellation_grace_secs: 30,
            picker_interval_ms: 500,
        }
    }
}

/// Top-level server configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// HTTP bind settings
    pub server: HttpConfig,
    /// Aggregate persistence settings
    pub persistence: PersistenceConfig,
    /// Executor settings
    pub executor: ExecutorConfig,
    /// Graph registry seed: `graph_id -> builtin factory name`
    pub graphs: HashMap<String, String>,
}

impl ServerConfig {
    /// Load configuration from the default location.
    ///
    /// Reads the file named by `TRELLIS_CONFIG` (default `trellis.toml`).
    /// A missing file yields the default configuration; a present but
    /// unreadable or unparsable file is an error.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("TRELLIS_CONFIG").unwrap_or_else(|_| "trellis.toml".to_string());
        Self::load_from(Path::new(&path))
    }

    /// Load configuration from an explicit path, falling back to defaults
    /// when the file does not exist.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(path).map_err(ConfigError::Read)?;
            toml::from_str(&raw)?
        } else {
            tracing::info!(path = %path.display(), "No config file found, using defaults");
            Self::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("HOST") {
            self.server.host = host;
        }
        if let Ok(port) = std::env::var("PORT") {
            if let Ok(port) = port.parse::<u16>() {
                self.server.port = port;
            } else {
                tracing::warn!(port = %port, "Ignoring non-numeric PORT override");
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.persistence.flush_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "persistence.flush_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.executor.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "executor.max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Socket address string for the HTTP listener
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.server.port, 2024);
        assert_eq!(config.persistence.flush_interval_secs, 5);
        assert_eq!(config.executor.max_attempts, 3);
        assert!(config.graphs.is_empty());
    }

    #[test]
    fn test_parse_toml() {
        let raw = r#"
            [server]
            host = "0.0.0.0"
            port = 9123

            [persistence]
            path = "/tmp/ops.json"
            flush_interval_secs = 2

            [graphs]
            agent = "echo"
        "#;
        let config: ServerConfig = toml::from_str(raw).unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 9123);
        assert_eq!(config.persistence.path, PathBuf::from("/tmp/ops.json"));
        assert_eq!(config.graphs.get("agent"), Some(&"echo".to_string()));
        // Unspecified sections keep defaults.
        assert_eq!(config.executor.max_attempts, 3);
    }

    #[test]
    fn test_validation_rejects_zero_flush_interval() {
        let config = ServerConfig {
            persistence: PersistenceConfig {
                flush_interval_secs: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = ServerConfig::load_from(Path::new("/nonexistent/trellis.toml")).unwrap();
        assert_eq!(config.server.port, 2024);
    }
}
