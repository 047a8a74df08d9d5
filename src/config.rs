//! Runtime configuration.
//!
//! Values come from three layers, later layers winning:
//! 1. built-in defaults,
//! 2. an optional TOML file,
//! 3. environment variables (`COHERE_API_KEY`, `PORT`, `CACHE_SIZE`, ...).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{ChatError, Result};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    pub throttle: ThrottleConfig,
    pub knowledge: KnowledgeConfig,
    pub delivery: DeliveryConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "0.0.0.0".to_string(), port: 5000 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub endpoint: String,
    pub model: String,
    /// Bearer token for the chat API. `None` disables the LLM path.
    pub api_key: Option<String>,
    pub max_connections: usize,
    pub temperature: f32,
    pub p: f32,
    pub max_tokens: u32,
    pub retry_attempts: u32,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.cohere.ai/v1/chat".to_string(),
            model: "command-r-plus".to_string(),
            api_key: None,
            max_connections: 20,
            temperature: 0.65,
            p: 0.8,
            max_tokens: 800,
            retry_attempts: 2,
        }
    }
}

/// Capacity and refill rate of one token bucket.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct BucketConfig {
    pub capacity: f64,
    pub refill_per_sec: f64,
}

impl BucketConfig {
    pub const fn new(capacity: f64, refill_per_sec: f64) -> Self {
        Self { capacity, refill_per_sec }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
    pub enabled: bool,
    pub chat: BucketConfig,
    pub knowledge: BucketConfig,
    pub embedding: BucketConfig,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            chat: BucketConfig::new(20.0, 10.0),
            knowledge: BucketConfig::new(50.0, 30.0),
            embedding: BucketConfig::new(10.0, 5.0),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KnowledgeConfig {
    pub cache_size: usize,
    pub cache_ttl_secs: u64,
    pub refresh_interval_secs: u64,
    /// JSON file with an array of entries replacing the built-in table.
    pub data_path: Option<PathBuf>,
}

impl Default for KnowledgeConfig {
    fn default() -> Self {
        Self {
            cache_size: 500,
            cache_ttl_secs: 120 * 60,
            refresh_interval_secs: 60 * 60,
            data_path: None,
        }
    }
}

impl KnowledgeConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    pub base_delay_ms: u64,
    pub batch_size: usize,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self { base_delay_ms: 20, batch_size: 5 }
    }
}

impl DeliveryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}

impl Config {
    /// Load defaults, then the TOML file at `path` (if any), then the
    /// process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.apply_env_with(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ChatError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| ChatError::Config(e.to_string()))
    }

    /// Apply environment overrides through `lookup`, so tests can feed a
    /// fake environment without touching the process one.
    pub fn apply_env_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let present = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        if let Some(key) = present("COHERE_API_KEY").or_else(|| present("COHERE_KEY")) {
            self.upstream.api_key = Some(key);
        }
        if let Some(host) = lookup("HOST") {
            self.server.host = host;
        }
        set_parsed(&lookup, "PORT", &mut self.server.port);
        set_parsed(&lookup, "CACHE_SIZE", &mut self.knowledge.cache_size);
        if let Some(minutes) = lookup("CACHE_TTL_MINUTES").and_then(|v| v.parse::<u64>().ok()) {
            self.knowledge.cache_ttl_secs = minutes.saturating_mul(60);
        }
        set_parsed(&lookup, "MAX_CONNECTIONS", &mut self.upstream.max_connections);
        set_parsed(&lookup, "THROTTLE_CHAT_TOKENS", &mut self.throttle.chat.capacity);
        set_parsed(&lookup, "THROTTLE_CHAT_REFILL", &mut self.throttle.chat.refill_per_sec);
        if let Some(flag) = lookup("ENABLE_THROTTLING") {
            self.throttle.enabled = flag != "false";
        }
    }
}

fn set_parsed<F, T>(lookup: &F, key: &str, slot: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    if let Some(raw) = lookup(key) {
        match raw.parse::<T>() {
            Ok(v) => *slot = v,
            Err(_) => tracing::warn!(key, value = %raw, "ignoring unparsable environment override"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn test_defaults() {
        let c = Config::default();
        assert_eq!(c.server.port, 5000);
        assert_eq!(c.upstream.max_connections, 20);
        assert_eq!(c.upstream.retry_attempts, 2);
        assert!((c.upstream.temperature - 0.65).abs() < f32::EPSILON);
        assert_eq!(c.throttle.chat, BucketConfig::new(20.0, 10.0));
        assert_eq!(c.throttle.knowledge, BucketConfig::new(50.0, 30.0));
        assert_eq!(c.throttle.embedding, BucketConfig::new(10.0, 5.0));
        assert_eq!(c.knowledge.cache_size, 500);
        assert_eq!(c.knowledge.cache_ttl(), Duration::from_secs(7200));
        assert_eq!(c.delivery.batch_size, 5);
        assert!(c.upstream.api_key.is_none());
    }

    #[test]
    fn test_partial_toml_keeps_other_defaults() {
        let c = Config::from_toml_str(
            r#"
            [server]
            port = 8080

            [throttle.chat]
            capacity = 5.0
            refill_per_sec = 1.0
            "#,
        )
        .unwrap();
        assert_eq!(c.server.port, 8080);
        assert_eq!(c.server.host, "0.0.0.0");
        assert_eq!(c.throttle.chat, BucketConfig::new(5.0, 1.0));
        assert_eq!(c.throttle.knowledge, BucketConfig::new(50.0, 30.0));
    }

    #[test]
    fn test_bad_toml_is_config_error() {
        let err = Config::from_toml_str("server = 3").unwrap_err();
        assert!(matches!(err, ChatError::Config(_)));
    }

    #[test]
    fn test_env_overrides() {
        let mut c = Config::default();
        c.apply_env_with(env(&[
            ("COHERE_KEY", "legacy"),
            ("PORT", "7000"),
            ("CACHE_SIZE", "42"),
            ("CACHE_TTL_MINUTES", "3"),
            ("MAX_CONNECTIONS", "4"),
            ("THROTTLE_CHAT_TOKENS", "7"),
            ("ENABLE_THROTTLING", "false"),
        ]));
        assert_eq!(c.upstream.api_key.as_deref(), Some("legacy"));
        assert_eq!(c.server.port, 7000);
        assert_eq!(c.knowledge.cache_size, 42);
        assert_eq!(c.knowledge.cache_ttl_secs, 180);
        assert_eq!(c.upstream.max_connections, 4);
        assert_eq!(c.throttle.chat.capacity, 7.0);
        assert!(!c.throttle.enabled);
    }

    #[test]
    fn test_primary_key_wins_over_legacy() {
        let mut c = Config::default();
        c.apply_env_with(env(&[("COHERE_API_KEY", "primary"), ("COHERE_KEY", "legacy")]));
        assert_eq!(c.upstream.api_key.as_deref(), Some("primary"));
    }

    #[test]
    fn test_blank_key_is_ignored() {
        let mut c = Config::default();
        c.apply_env_with(env(&[("COHERE_API_KEY", "  ")]));
        assert!(c.upstream.api_key.is_none());
    }

    #[test]
    fn test_empty_primary_key_falls_back_to_legacy() {
        let mut c = Config::default();
        c.apply_env_with(env(&[("COHERE_API_KEY", ""), ("COHERE_KEY", "legacy")]));
        assert_eq!(c.upstream.api_key.as_deref(), Some("legacy"));
    }

    #[test]
    fn test_huge_ttl_minutes_saturates() {
        let mut c = Config::default();
        c.apply_env_with(env(&[("CACHE_TTL_MINUTES", &u64::MAX.to_string())]));
        assert_eq!(c.knowledge.cache_ttl_secs, u64::MAX);
    }

    #[test]
    fn test_unparsable_env_value_keeps_previous() {
        let mut c = Config::default();
        c.apply_env_with(env(&[("PORT", "not-a-port")]));
        assert_eq!(c.server.port, 5000);
    }

    #[test]
    fn test_from_file() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "[delivery]\nbase_delay_ms = 0\nbatch_size = 3").unwrap();
        let c = Config::from_file(f.path()).unwrap();
        assert_eq!(c.delivery.base_delay(), Duration::ZERO);
        assert_eq!(c.delivery.batch_size, 3);
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = Config::from_file(Path::new("/nonexistent/qala.toml")).unwrap_err();
        assert!(matches!(err, ChatError::Config(_)));
    }
}
