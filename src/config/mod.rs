use crate::error::ProxyError;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level proxy configuration. Deserialized from TOML; every field
/// has a default so a config file only needs to override what it changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default = "default_listen")]
    pub listen: String,

    #[serde(default = "default_metrics_listen")]
    pub metrics_listen: String,

    pub upstreams: Vec<UpstreamConfig>,

    #[serde(default)]
    pub timeouts: TimeoutsConfig,

    #[serde(default)]
    pub limits: LimitsConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            metrics_listen: default_metrics_listen(),
            upstreams: Vec::new(),
            timeouts: TimeoutsConfig::default(),
            limits: LimitsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_metrics_listen() -> String {
    "0.0.0.0:9090".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    #[serde(default = "default_connect_ms")]
    pub connect_ms: u64,
    #[serde(default = "default_read_ms")]
    pub read_ms: u64,
    #[serde(default = "default_write_ms")]
    pub write_ms: u64,
    #[serde(default = "default_total_ms")]
    pub total_ms: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            connect_ms: default_connect_ms(),
            read_ms: default_read_ms(),
            write_ms: default_write_ms(),
            total_ms: default_total_ms(),
        }
    }
}

fn default_connect_ms() -> u64 {
    1000
}

fn default_read_ms() -> u64 {
    15000
}

fn default_write_ms() -> u64 {
    15000
}

fn default_total_ms() -> u64 {
    30000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_client_conns")]
    pub max_client_conns: usize,
    #[serde(default = "default_max_conns_per_upstream")]
    pub max_conns_per_upstream: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_client_conns: default_max_client_conns(),
            max_conns_per_upstream: default_max_conns_per_upstream(),
        }
    }
}

fn default_max_client_conns() -> usize {
    1000
}

fn default_max_conns_per_upstream() -> usize {
    100
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl ProxyConfig {
    /// Load configuration from a TOML file. Falls back to defaults (with an
    /// empty upstream list, which will fail `validate`) when the file does
    /// not exist, so local runs need no config file to start.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config: ProxyConfig = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str(&content)?
        } else {
            tracing::info!(
                "config file not found at {}, using defaults",
                path.display()
            );
            ProxyConfig::default()
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("PROXY_LISTEN") {
            self.listen = v;
        }
        if let Ok(v) = std::env::var("PROXY_METRICS_LISTEN") {
            self.metrics_listen = v;
        }
        if let Ok(v) = std::env::var("PROXY_LOG_LEVEL") {
            self.logging.level = v;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.upstreams.is_empty() {
            return Err(ProxyError::ConfigError("upstreams must be a non-empty list".to_string()).into());
        }
        for u in &self.upstreams {
            if u.host.is_empty() {
                return Err(ProxyError::ConfigError("upstream host must not be empty".to_string()).into());
            }
            if u.port == 0 {
                return Err(ProxyError::ConfigError("upstream port must not be zero".to_string()).into());
            }
        }
        if self.limits.max_client_conns == 0 {
            return Err(
                ProxyError::ConfigError("limits.max_client_conns must be greater than zero".to_string()).into(),
            );
        }
        if self.limits.max_conns_per_upstream == 0 {
            return Err(ProxyError::ConfigError(
                "limits.max_conns_per_upstream must be greater than zero".to_string(),
            )
            .into());
        }
        match self.logging.level.as_str() {
            "debug" | "info" | "warning" | "error" => {}
            other => return Err(ProxyError::ConfigError(format!("unknown logging.level '{other}'")).into()),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fail_validation_without_upstreams() {
        let cfg = ProxyConfig::default();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_minimal_toml() {
        let toml_str = r#"
            [[upstreams]]
            host = "127.0.0.1"
            port = 9001
        "#;
        let cfg: ProxyConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.listen, "0.0.0.0:8080");
        assert_eq!(cfg.metrics_listen, "0.0.0.0:9090");
        assert_eq!(cfg.upstreams.len(), 1);
        assert_eq!(cfg.timeouts.connect_ms, 1000);
        assert_eq!(cfg.timeouts.read_ms, 15000);
        assert_eq!(cfg.timeouts.write_ms, 15000);
        assert_eq!(cfg.timeouts.total_ms, 30000);
        assert_eq!(cfg.limits.max_client_conns, 1000);
        assert_eq!(cfg.limits.max_conns_per_upstream, 100);
        assert_eq!(cfg.logging.level, "info");
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_full_toml() {
        let toml_str = r#"
            listen = "127.0.0.1:8081"
            metrics_listen = "127.0.0.1:9999"

            [[upstreams]]
            host = "10.0.0.1"
            port = 9001

            [[upstreams]]
            host = "10.0.0.2"
            port = 9002

            [timeouts]
            connect_ms = 100
            read_ms = 200
            write_ms = 300
            total_ms = 400

            [limits]
            max_client_conns = 5
            max_conns_per_upstream = 2

            [logging]
            level = "debug"
        "#;
        let cfg: ProxyConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(cfg.listen, "127.0.0.1:8081");
        assert_eq!(cfg.upstreams.len(), 2);
        assert_eq!(cfg.timeouts.connect_ms, 100);
        assert_eq!(cfg.limits.max_conns_per_upstream, 2);
        assert_eq!(cfg.logging.level, "debug");
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_host() {
        let mut cfg = ProxyConfig::default();
        cfg.upstreams.push(UpstreamConfig {
            host: String::new(),
            port: 80,
        });
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_port() {
        let mut cfg = ProxyConfig::default();
        cfg.upstreams.push(UpstreamConfig {
            host: "h".to_string(),
            port: 0,
        });
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_limits() {
        let mut cfg = ProxyConfig::default();
        cfg.upstreams.push(UpstreamConfig {
            host: "h".to_string(),
            port: 80,
        });
        cfg.limits.max_client_conns = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unknown_log_level() {
        let mut cfg = ProxyConfig::default();
        cfg.upstreams.push(UpstreamConfig {
            host: "h".to_string(),
            port: 80,
        });
        cfg.logging.level = "verbose".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_load_missing_file_uses_defaults_and_fails_validation() {
        let path = Path::new("/nonexistent/path/to/config.toml");
        let err = ProxyConfig::load(path).unwrap_err();
        assert!(err.to_string().contains("upstreams"));
    }
}
