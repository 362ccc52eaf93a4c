//! Configuration module for statusboard.
//!
//! Loads the server list and tunables from a JSON file, then applies
//! environment overrides for secrets and deployment settings.

use regex::Regex;
use chrono::Duration as ChronoDuration;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

/// Configuration error types.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// A notification group mentioned when a server reaches a player count.
#[derive(Debug, Clone, Deserialize)]
pub struct PingConfig {
    pub threshold: u32,
    pub role: String,
}

/// One monitored game server.
#[derive(Debug, Clone, Deserialize)]
pub struct TargetConfig {
    /// Literal IPv4 address, or a Steam ID when it contains no `.`
    pub ip: String,
    #[serde(default = "default_game_port")]
    pub port: u16,
    /// Stable identifier; also the redirect path under `/tf2/`
    pub url_path: String,
    #[serde(default)]
    pub connect_string: Option<String>,
    #[serde(default)]
    pub description: String,
    pub channel_id: String,
    #[serde(default = "default_graph_density")]
    pub graph_density: u8,
    #[serde(default = "default_true")]
    pub supports_direct_connect: bool,
    #[serde(default)]
    pub mod_name: Option<String>,
    #[serde(default = "default_app_id")]
    pub app_id: u32,
    #[serde(default)]
    pub pings: Vec<PingConfig>,
}

impl TargetConfig {
    /// Whether the configured address must be resolved through the directory.
    pub fn is_indirect(&self) -> bool {
        !self.ip.contains('.')
    }
}

/// Outage alert settings.
#[derive(Debug, Clone, Deserialize)]
pub struct AlertConfig {
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default = "default_alert_threshold")]
    pub threshold: u32,
    #[serde(default = "default_decay_rate")]
    pub decay_rate: f64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            channel_id: None,
            threshold: default_alert_threshold(),
            decay_rate: default_decay_rate(),
        }
    }
}

/// A link shown on the status page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalLink {
    pub title: String,
    pub description: String,
    pub url: String,
}

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub discord_token: String,
    #[serde(default)]
    pub connect_url_base: String,
    #[serde(default = "default_web_port")]
    pub web_port: u16,
    #[serde(default)]
    pub steam_api_key: Option<String>,
    #[serde(default)]
    pub fastdl_path: Option<PathBuf>,
    /// Base URL for relay connect links, e.g. `https://example.com/connect`
    #[serde(default)]
    pub relay_connect_base: Option<String>,
    /// URL returning the host that relay connect links go through
    #[serde(default)]
    pub relay_redirect_url: Option<String>,
    #[serde(default = "default_query_interval_secs")]
    pub query_interval_secs: u64,
    #[serde(default = "default_samples_per_interval")]
    pub samples_per_interval: u32,
    /// Number of query intervals between full archive resets (0 disables)
    #[serde(default)]
    pub archive_reset_intervals: u32,
    #[serde(default = "default_result_archive_limit")]
    pub result_archive_limit: usize,
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,
    #[serde(default = "default_query_retries")]
    pub query_retries: u32,
    #[serde(default = "default_ping_cooldown_secs")]
    pub ping_cooldown_secs: u64,
    #[serde(default = "default_ping_hysteresis")]
    pub ping_hysteresis: u32,
    #[serde(default)]
    pub alert: AlertConfig,
    #[serde(default)]
    pub external_links: Vec<ExternalLink>,
    #[serde(default)]
    pub servers: Vec<TargetConfig>,
}

fn default_game_port() -> u16 { 27015 }
fn default_graph_density() -> u8 { 4 }
fn default_true() -> bool { true }
fn default_app_id() -> u32 { 440 }
fn default_alert_threshold() -> u32 { 5 }
fn default_decay_rate() -> f64 { 0.5 }
fn default_web_port() -> u16 { 3000 }
fn default_query_interval_secs() -> u64 { 60 }
fn default_samples_per_interval() -> u32 { 1 }
fn default_result_archive_limit() -> usize { 100 }
fn default_query_timeout_ms() -> u64 { 5000 }
fn default_query_retries() -> u32 { 3 }
fn default_ping_cooldown_secs() -> u64 { 2 * 60 * 60 }
fn default_ping_hysteresis() -> u32 { 3 }

impl Default for Config {
    fn default() -> Self {
        Self {
            discord_token: String::new(),
            connect_url_base: String::new(),
            web_port: default_web_port(),
            steam_api_key: None,
            fastdl_path: None,
            relay_connect_base: None,
            relay_redirect_url: None,
            query_interval_secs: default_query_interval_secs(),
            samples_per_interval: default_samples_per_interval(),
            archive_reset_intervals: 0,
            result_archive_limit: default_result_archive_limit(),
            query_timeout_ms: default_query_timeout_ms(),
            query_retries: default_query_retries(),
            ping_cooldown_secs: default_ping_cooldown_secs(),
            ping_hysteresis: default_ping_hysteresis(),
            alert: AlertConfig::default(),
            external_links: Vec::new(),
            servers: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from the file named by `STATUSBOARD_CONFIG`
    /// (default: "config.json"), then apply environment overrides.
    ///
    /// Environment variables:
    /// - `STATUSBOARD_DISCORD_TOKEN`: bot token
    /// - `STATUSBOARD_WEB_PORT`: HTTP port
    /// - `STATUSBOARD_STEAM_API_KEY`: Steam Web API key
    /// - `STATUSBOARD_FASTDL_PATH`: root directory for asset downloads
    pub fn load() -> Result<Self, ConfigError> {
        let path = env::var("STATUSBOARD_CONFIG").unwrap_or_else(|_| "config.json".to_string());
        let mut cfg = Self::from_file(&path)?;
        cfg.apply_env();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parse a configuration file without environment overrides.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_str(&raw)?)
    }

    fn apply_env(&mut self) {
        if let Ok(token) = env::var("STATUSBOARD_DISCORD_TOKEN") {
            self.discord_token = token;
        }

        if let Ok(port_str) = env::var("STATUSBOARD_WEB_PORT") {
            if let Ok(port) = port_str.parse() {
                self.web_port = port;
            }
        }

        if let Ok(key) = env::var("STATUSBOARD_STEAM_API_KEY") {
            self.steam_api_key = Some(key).filter(|k| !k.is_empty());
        }

        if let Ok(path) = env::var("STATUSBOARD_FASTDL_PATH") {
            self.fastdl_path = Some(PathBuf::from(path));
        }
    }

    /// Check invariants the rest of the service relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        static URL_PATH: OnceLock<Regex> = OnceLock::new();
        let url_path = URL_PATH.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]+$").unwrap());

        if self.servers.is_empty() {
            return Err(ConfigError::Invalid("no servers configured".to_string()));
        }
        if self.query_interval_secs == 0 {
            return Err(ConfigError::Invalid("query_interval_secs must be positive".to_string()));
        }
        if self.samples_per_interval == 0 {
            return Err(ConfigError::Invalid("samples_per_interval must be positive".to_string()));
        }
        if self.result_archive_limit == 0 {
            return Err(ConfigError::Invalid("result_archive_limit must be positive".to_string()));
        }
        if self.query_retries == 0 {
            return Err(ConfigError::Invalid("query_retries must be positive".to_string()));
        }
        if self.alert.threshold == 0 {
            return Err(ConfigError::Invalid("alert threshold must be at least 1".to_string()));
        }
        if ChronoDuration::from_std(self.ping_cooldown()).is_err() {
            return Err(ConfigError::Invalid("ping_cooldown_secs is out of range".to_string()));
        }
        if !(self.alert.decay_rate >= 0.0) {
            return Err(ConfigError::Invalid("alert decay_rate cannot be negative".to_string()));
        }

        let mut seen = HashSet::new();
        for server in &self.servers {
            if !url_path.is_match(&server.url_path) {
                return Err(ConfigError::Invalid(format!(
                    "url_path {:?} may only contain letters, digits, '-' and '_'",
                    server.url_path
                )));
            }
            if !seen.insert(server.url_path.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate url_path {:?}",
                    server.url_path
                )));
            }
        }

        Ok(())
    }

    /// Length of one tick: the query interval split into equal samples.
    pub fn tick_duration(&self) -> Duration {
        Duration::from_millis(
            self.query_interval_secs * 1000 / u64::from(self.samples_per_interval.max(1)),
        )
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    pub fn ping_cooldown(&self) -> Duration {
        Duration::from_secs(self.ping_cooldown_secs)
    }

    /// Find a target by its `url_path`.
    pub fn target(&self, url_path: &str) -> Option<&TargetConfig> {
        self.servers.iter().find(|s| s.url_path == url_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_json() -> &'static str {
        r#"{
            "discord_token": "abc",
            "connect_url_base": "https://example.com/tf2",
            "servers": [
                {
                    "ip": "203.0.113.7",
                    "port": 27015,
                    "url_path": "main",
                    "channel_id": "123",
                    "pings": [{ "threshold": 12, "role": "r12" }, { "threshold": 6, "role": "r6" }]
                }
            ]
        }"#
    }

    #[test]
    fn test_default_config() {
        let cfg = Config::default();
        assert_eq!(cfg.web_port, 3000);
        assert_eq!(cfg.result_archive_limit, 100);
        assert_eq!(cfg.ping_hysteresis, 3);
        assert_eq!(cfg.ping_cooldown(), Duration::from_secs(7200));
        assert_eq!(cfg.alert.threshold, 5);
    }

    #[test]
    fn test_parse_with_defaults() {
        let cfg: Config = serde_json::from_str(sample_json()).unwrap();
        assert_eq!(cfg.servers.len(), 1);
        let server = &cfg.servers[0];
        assert_eq!(server.graph_density, 4);
        assert_eq!(server.app_id, 440);
        assert!(server.supports_direct_connect);
        assert!(!server.is_indirect());
        assert_eq!(cfg.query_interval_secs, 60);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_from_file() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(sample_json().as_bytes()).unwrap();
        let cfg = Config::from_file(tmp.path()).unwrap();
        assert_eq!(cfg.discord_token, "abc");
        assert!(cfg.target("main").is_some());
        assert!(cfg.target("other").is_none());
    }

    #[test]
    fn test_missing_file() {
        let err = Config::from_file("/nonexistent/statusboard.json").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_validate_rejects_bad_paths() {
        let mut cfg: Config = serde_json::from_str(sample_json()).unwrap();
        let mut dup = cfg.servers[0].clone();
        dup.ip = "90123456789".to_string();
        cfg.servers.push(dup);
        assert!(cfg.validate().is_err());

        cfg.servers.truncate(1);
        cfg.servers[0].url_path = "../etc".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_samples() {
        let mut cfg: Config = serde_json::from_str(sample_json()).unwrap();
        cfg.samples_per_interval = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_tick_duration() {
        let mut cfg = Config::default();
        cfg.samples_per_interval = 4;
        assert_eq!(cfg.tick_duration(), Duration::from_secs(15));
    }

    #[test]
    fn test_validate_rejects_huge_cooldown() {
        let mut cfg: Config = serde_json::from_str(sample_json()).unwrap();
        cfg.ping_cooldown_secs = u64::MAX;
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_apply_env() {
        let mut cfg: Config = serde_json::from_str(sample_json()).unwrap();
        env::set_var("STATUSBOARD_DISCORD_TOKEN", "from-env");
        env::set_var("STATUSBOARD_WEB_PORT", "8081");
        env::set_var("STATUSBOARD_STEAM_API_KEY", "steam-key");
        env::set_var("STATUSBOARD_FASTDL_PATH", "/srv/fastdl");
        cfg.apply_env();
        env::remove_var("STATUSBOARD_DISCORD_TOKEN");
        env::remove_var("STATUSBOARD_WEB_PORT");
        env::remove_var("STATUSBOARD_STEAM_API_KEY");
        env::remove_var("STATUSBOARD_FASTDL_PATH");

        assert_eq!(cfg.discord_token, "from-env");
        assert_eq!(cfg.web_port, 8081);
        assert_eq!(cfg.steam_api_key.as_deref(), Some("steam-key"));
        assert_eq!(cfg.fastdl_path, Some(PathBuf::from("/srv/fastdl")));

        // Unparseable ports are ignored and an empty key clears the setting
        env::set_var("STATUSBOARD_WEB_PORT", "not-a-port");
        env::set_var("STATUSBOARD_STEAM_API_KEY", "");
        cfg.apply_env();
        env::remove_var("STATUSBOARD_WEB_PORT");
        env::remove_var("STATUSBOARD_STEAM_API_KEY");
        assert_eq!(cfg.web_port, 8081);
        assert_eq!(cfg.steam_api_key, None);
    }
}
