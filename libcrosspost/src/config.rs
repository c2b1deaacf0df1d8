//! Configuration management for Crosspost

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::adapt::PlatformProfile;
use crate::error::{ConfigError, Result};
use crate::types::PlatformName;
use crate::workflow::RetryConfig;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub publishing: PublishingConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub images: ImagesConfig,
    /// Per-platform adapter settings; a platform missing here is "not configured"
    #[serde(default)]
    pub platforms: BTreeMap<PlatformName, PlatformConfig>,
    /// Custom caption templates by name, alongside the built-in ones
    #[serde(default)]
    pub templates: BTreeMap<String, TemplateConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateConfig {
    /// Body with `{variable}` placeholders
    pub template: String,
    #[serde(default = "default_template_category")]
    pub category: String,
}

fn default_template_category() -> String {
    "custom".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "~/.local/share/crosspost/schedule.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishingConfig {
    /// Concurrent adapter calls
    pub max_workers: usize,
    /// Pending units the worker pool buffers before `publish` waits
    pub queue_capacity: usize,
    pub max_attempts: u32,
    #[serde(with = "humantime_duration")]
    pub retry_delay: Duration,
    pub backoff_multiplier: f64,
}

impl Default for PublishingConfig {
    fn default() -> Self {
        Self {
            max_workers: 3,
            queue_capacity: 32,
            max_attempts: 3,
            retry_delay: Duration::from_secs(5),
            backoff_multiplier: 1.0,
        }
    }
}

impl PublishingConfig {
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts,
            retry_delay: self.retry_delay,
            backoff_multiplier: self.backoff_multiplier,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// How often the daemon re-reads the store for posts written by other processes
    #[serde(with = "humantime_duration")]
    pub poll_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImagesConfig {
    /// External resize command, e.g. `["convert", "{input}", "-resize", "{width}x{height}>", "{output}"]`
    pub resize_command: Option<Vec<String>>,
    /// Largest local image accepted for publishing
    pub max_size_mb: u64,
    /// Accepted formats by file extension name ("jpg", "png", ...)
    pub supported_formats: Vec<String>,
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            resize_command: None,
            max_size_mb: 10,
            supported_formats: ["jpg", "jpeg", "png", "webp"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Share command with `{image}`, `{caption}` and `{platform}` placeholders
    pub command: Vec<String>,
    #[serde(default)]
    pub max_caption_length: Option<usize>,
    #[serde(default)]
    pub max_hashtags: Option<usize>,
    #[serde(default)]
    pub max_image_dimension: Option<u32>,
}

fn default_enabled() -> bool {
    true
}

impl Config {
    /// Load configuration from the default location
    ///
    /// A missing file is not an error: every platform is then "not configured".
    pub fn load() -> Result<Self> {
        let config_path = resolve_config_path()?;
        if !config_path.exists() {
            tracing::debug!(
                "No config file at {}, using defaults",
                config_path.display()
            );
            return Ok(Self::default_config());
        }
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        let config: Config = toml::from_str(&content).map_err(ConfigError::ParseError)?;
        config.validate()?;
        Ok(config)
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self::default()
    }

    /// Reject values the orchestrator and retry engine cannot run with
    pub fn validate(&self) -> Result<()> {
        let invalid = |field: &str, reason: &str| ConfigError::InvalidValue {
            field: field.to_string(),
            reason: reason.to_string(),
        };

        if self.publishing.max_workers == 0 {
            return Err(invalid("publishing.max_workers", "must be at least 1").into());
        }
        if self.publishing.queue_capacity == 0 {
            return Err(invalid("publishing.queue_capacity", "must be at least 1").into());
        }
        if self.publishing.max_attempts == 0 {
            return Err(invalid("publishing.max_attempts", "must be at least 1").into());
        }
        if !self.publishing.backoff_multiplier.is_finite()
            || self.publishing.backoff_multiplier < 1.0
        {
            return Err(invalid("publishing.backoff_multiplier", "must be >= 1.0").into());
        }
        if self.images.max_size_mb == 0 {
            return Err(invalid("images.max_size_mb", "must be at least 1").into());
        }
        if self.images.supported_formats.is_empty() {
            return Err(invalid("images.supported_formats", "must list at least one format").into());
        }
        for (platform, platform_config) in &self.platforms {
            if platform_config.enabled && platform_config.command.is_empty() {
                return Err(ConfigError::MissingField(format!("platforms.{}.command", platform)).into());
            }
            // truncation keeps room for the "..." marker
            if platform_config.max_caption_length.map_or(false, |max| max < 3) {
                return Err(invalid(
                    &format!("platforms.{}.max_caption_length", platform),
                    "must be at least 3",
                )
                .into());
            }
        }
        for (name, template) in &self.templates {
            if template.template.trim().is_empty() {
                return Err(ConfigError::MissingField(format!("templates.{}.template", name)).into());
            }
        }
        Ok(())
    }

    /// Platforms with an enabled adapter
    pub fn configured_platforms(&self) -> Vec<PlatformName> {
        self.platforms
            .iter()
            .filter(|(_, c)| c.enabled)
            .map(|(name, _)| *name)
            .collect()
    }

    /// Adaptation limits for a platform: built-in defaults, then config overrides
    pub fn profile(&self, platform: PlatformName) -> PlatformProfile {
        let mut profile = PlatformProfile::for_platform(platform);
        if let Some(overrides) = self.platforms.get(&platform) {
            if overrides.max_caption_length.is_some() {
                profile.max_caption_length = overrides.max_caption_length;
            }
            if overrides.max_hashtags.is_some() {
                profile.max_hashtags = overrides.max_hashtags;
            }
            if overrides.max_image_dimension.is_some() {
                profile.max_image_dimension = overrides.max_image_dimension;
            }
        }
        profile
    }
}

/// Resolve the configuration file path following XDG Base Directory spec
pub fn resolve_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var("CROSSPOST_CONFIG") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("crosspost").join("config.toml"))
}

/// Resolve the data directory path following XDG Base Directory spec
pub fn resolve_data_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
        .ok_or_else(|| ConfigError::MissingField("data directory".to_string()))?;

    Ok(data_dir.join("crosspost"))
}

/// Resolve the database path: `CROSSPOST_DB_PATH`, then the configured path, then the data dir
pub fn resolve_db_path(configured: Option<&str>) -> Result<PathBuf> {
    if let Ok(path) = std::env::var("CROSSPOST_DB_PATH") {
        return Ok(PathBuf::from(shellexpand::tilde(&path).to_string()));
    }

    match configured {
        Some(path) => Ok(PathBuf::from(shellexpand::tilde(path).to_string())),
        None => Ok(resolve_data_path()?.join("schedule.db")),
    }
}

/// Serde adapter for human-readable durations ("5s", "1m 30s")
mod humantime_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}
