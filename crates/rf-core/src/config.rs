//! Application configuration types.
//!
//! The top-level [`Config`] struct is deserialized from TOML and carries all
//! sub-configs for server, storage, tiers, inference, voice, webhook, and
//! media. Every section defaults sensibly so a completely empty file is
//! valid.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;
use crate::Error;

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub tiers: TierConfig,
    pub inference: InferenceConfig,
    pub voice: VoiceConfig,
    pub webhook: WebhookConfig,
    pub media: MediaConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            tiers: TierConfig::default(),
            inference: InferenceConfig::default(),
            voice: VoiceConfig::default(),
            webhook: WebhookConfig::default(),
            media: MediaConfig::default(),
        }
    }
}

impl Config {
    /// Deserialize a `Config` from a TOML string.
    ///
    /// This is intentionally string-based so the caller can read the file
    /// however it sees fit (async, embedded, etc.).
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| Error::Validation(format!("config parse error: {e}")))
    }

    /// Load configuration from a file path, falling back to defaults if the
    /// path is `None` or the file does not exist.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_toml(&contents).unwrap_or_else(|e| {
                tracing::warn!("Failed to parse config file {}: {e}", path.display());
                Self::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config file at {}; using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Return a list of validation warnings (non-fatal issues).
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.server.port == 0 {
            warnings.push("server.port is 0; a random port will be assigned".into());
        }

        if self.tiers.default_limit == 0 {
            warnings.push("tiers.default_limit is 0; all submissions will be rejected".into());
        }
        for (owner, limit) in &self.tiers.overrides {
            if *limit == 0 {
                warnings.push(format!(
                    "tiers.overrides.{owner} is 0; submissions from this owner will be rejected"
                ));
            }
        }

        if self.inference.max_attempts == 0 {
            warnings.push("inference.max_attempts is 0; every activity will fail".into());
        }
        if self.inference.base_url.is_empty() {
            warnings.push("inference.base_url is empty".into());
        }
        if self.voice.base_url.is_empty() {
            warnings.push("voice.base_url is empty".into());
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
        }
    }
}

/// Durable storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding the SQLite database and generated artifacts.
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
        }
    }
}

/// Per-owner concurrency tier settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TierConfig {
    /// Concurrency limit applied to owners without an override.
    pub default_limit: u32,
    /// Per-owner limit overrides, keyed by owner identifier.
    pub overrides: HashMap<String, u32>,
}

impl Default for TierConfig {
    fn default() -> Self {
        Self {
            default_limit: 1,
            overrides: HashMap::new(),
        }
    }
}

/// Image/video inference backend settings and retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    pub base_url: String,
    /// Seconds between status polls for a submitted generation.
    pub poll_interval_secs: u64,
    /// Overall per-activity deadline, submit to result.
    pub overall_deadline_secs: u64,
    /// Maximum attempts per activity, first attempt included.
    pub max_attempts: u32,
    /// Initial retry backoff in seconds; doubles per attempt.
    pub backoff_base_secs: u64,
    /// Cap on the computed backoff delay.
    pub backoff_cap_secs: u64,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8188".into(),
            poll_interval_secs: 2,
            overall_deadline_secs: 900,
            max_attempts: 3,
            backoff_base_secs: 10,
            backoff_cap_secs: 300,
        }
    }
}

impl InferenceConfig {
    /// Poll interval as a [`Duration`].
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Overall activity deadline as a [`Duration`].
    #[must_use]
    pub fn overall_deadline(&self) -> Duration {
        Duration::from_secs(self.overall_deadline_secs)
    }
}

/// Voiceover synthesis backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    pub base_url: String,
    /// Voice preset passed to the synthesis backend.
    pub voice: String,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8880".into(),
            voice: "af_heart".into(),
        }
    }
}

/// Completion webhook settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Target URL for terminal-run notifications; `None` disables delivery.
    pub url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            url: None,
            timeout_secs: 30,
        }
    }
}

/// Media assembly (stitch and subtitle) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    pub ffmpeg_bin: PathBuf,
    pub width: u32,
    pub height: u32,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            ffmpeg_bin: PathBuf::from("ffmpeg"),
            width: 1080,
            height: 1920,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let cfg = Config::default();
        assert_eq!(cfg.server.host, "0.0.0.0");
        assert_eq!(cfg.server.port, 8080);
        assert_eq!(cfg.tiers.default_limit, 1);
        assert_eq!(cfg.inference.max_attempts, 3);
        assert_eq!(cfg.inference.backoff_base_secs, 10);
        assert_eq!(cfg.media.width, 1080);
        assert_eq!(cfg.media.height, 1920);
    }

    #[test]
    fn default_config_no_warnings() {
        let cfg = Config::default();
        let warnings = cfg.validate();
        assert!(warnings.is_empty(), "unexpected warnings: {:?}", warnings);
    }

    #[test]
    fn parse_toml_config() {
        let toml = r#"
            [server]
            port = 9090

            [tiers]
            default_limit = 3

            [tiers.overrides]
            "studio-a" = 8
        "#;
        let cfg = Config::from_toml(toml).unwrap();
        assert_eq!(cfg.server.port, 9090);
        assert_eq!(cfg.tiers.default_limit, 3);
        assert_eq!(cfg.tiers.overrides.get("studio-a"), Some(&8));
    }

    #[test]
    fn parse_empty_toml_uses_defaults() {
        let cfg = Config::from_toml("").unwrap();
        assert_eq!(cfg.server.host, "0.0.0.0");
        assert_eq!(cfg.inference.poll_interval_secs, 2);
    }

    #[test]
    fn load_or_default_with_none() {
        let cfg = Config::load_or_default(None);
        assert_eq!(cfg.server.port, 8080);
    }

    #[test]
    fn load_or_default_with_missing_file() {
        let cfg = Config::load_or_default(Some(Path::new("/nonexistent/reelforge.toml")));
        assert_eq!(cfg.server.port, 8080);
    }

    #[test]
    fn zero_tier_limit_warns() {
        let mut cfg = Config::default();
        cfg.tiers.default_limit = 0;
        let warnings = cfg.validate();
        assert!(warnings.iter().any(|w| w.contains("default_limit")));
    }

    #[test]
    fn zero_attempts_warns() {
        let mut cfg = Config::default();
        cfg.inference.max_attempts = 0;
        let warnings = cfg.validate();
        assert!(warnings.iter().any(|w| w.contains("max_attempts")));
    }

    #[test]
    fn durations_from_secs() {
        let cfg = InferenceConfig::default();
        assert_eq!(cfg.poll_interval(), Duration::from_secs(2));
        assert_eq!(cfg.overall_deadline(), Duration::from_secs(900));
    }
}
