use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use cs_backend::RetryPolicy;

use crate::cache::DEFAULT_TTL;

const API_KEY_ENV: &str = "CHATSTREAM_API_KEY";

#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub stream: StreamConfig,
    pub cache: CacheConfig,
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// API root, e.g. `http://localhost:8080/api`.
    pub base_url: String,
    /// Command to run to get the API key (e.g., "pass show chat/api-key").
    /// The command is run via `sh -c`.
    pub api_key_cmd: Option<String>,
    /// Persona used when a new chat session is created.
    pub persona_id: i64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/api".to_string(),
            api_key_cmd: None,
            persona_id: 0,
        }
    }
}

impl ServerConfig {
    /// Resolve the API key from api_key_cmd or the CHATSTREAM_API_KEY env var.
    /// `None` means requests go out unauthenticated.
    pub fn resolve_api_key(&self) -> Option<String> {
        if let Some(cmd) = &self.api_key_cmd {
            match Command::new("sh").arg("-c").arg(cmd).output() {
                Ok(output) if output.status.success() => {
                    let key = String::from_utf8_lossy(&output.stdout).trim().to_string();
                    if !key.is_empty() {
                        return Some(key);
                    }
                    log::warn!("api_key_cmd printed nothing");
                }
                Ok(output) => log::warn!("api_key_cmd exited with {}", output.status),
                Err(e) => log::warn!("failed to run api_key_cmd: {e}"),
            }
        }

        std::env::var(API_KEY_ENV)
            .ok()
            .filter(|key| !key.trim().is_empty())
    }
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct StreamConfig {
    /// Ask the server to emit citation packets.
    pub include_citations: bool,
    /// Total attempts per request, including the first.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            include_citations: true,
            max_attempts: 3,
            base_delay_ms: 1000,
        }
    }
}

impl StreamConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, Duration::from_millis(self.base_delay_ms))
    }
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Custom cache directory. Defaults to ~/.cache/chatstream/sessions/.
    pub dir: Option<String>,
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: None,
            ttl_secs: DEFAULT_TTL.as_secs(),
        }
    }
}

impl CacheConfig {
    /// Resolve the cache directory, using the configured path or the XDG default.
    pub fn resolve_dir(&self) -> PathBuf {
        if let Some(ref custom) = self.dir {
            return PathBuf::from(custom);
        }

        let base = std::env::var("XDG_CACHE_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
                PathBuf::from(home).join(".cache")
            });
        base.join("chatstream").join("sessions")
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Config {
    pub fn load_or_default() -> Self {
        Self::load_from(&config_path())
    }

    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                log::warn!("failed to parse {}: {e}", path.display());
                Config::default()
            }),
            Err(_) => Config::default(),
        }
    }
}

fn config_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("chatstream").join("config.toml")
}
