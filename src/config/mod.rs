//! Configuration for the chat-to-speech orchestrator.
//!
//! Configuration is layered: built-in defaults, then an optional YAML file,
//! then environment variables. Environment variables always win. The merged
//! result is validated before use.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::filter::FilterConfig;
use crate::core::language::DetectorConfig;
use crate::core::queue::QueueConfig;
use crate::core::tts::{Engine, PerformanceMode};

#[derive(Debug, Clone)]
pub struct CrierConfig {
    /// Kill-switch value assumed when the durable flag is unset
    pub enabled_default: bool,
    /// Minimum team level for chat-sourced requests with no explicit grant
    pub min_team_level: u8,
    pub default_engine: Engine,
    pub default_voice: String,
    /// System default language (ISO 639-1)
    pub default_language: String,
    /// Auto-detect message language when no voice is resolved
    pub auto_detect_language: bool,
    /// Walk the engine fallback chain on synthesis failure
    pub auto_fallback: bool,
    /// Strip emoji from chat text before synthesis
    pub strip_emoji: bool,
    /// Hard truncation limit; over-length text is cut, never rejected
    pub max_text_length: usize,
    /// Base playback volume, multiplied by each user's gain
    pub base_volume: f32,
    /// Speaking rate (0.25 to 4.0)
    pub speed: f32,
    pub performance_mode: PerformanceMode,

    // Engine credentials; an engine without a key is skipped
    pub elevenlabs_api_key: Option<String>,
    pub deepgram_api_key: Option<String>,
    pub google_api_key: Option<String>,

    /// Record-store file; in-memory when unset
    pub store_path: Option<PathBuf>,

    pub filter: FilterConfig,
    pub detector: DetectorConfig,
    pub queue: QueueConfig,
}

impl Default for CrierConfig {
    fn default() -> Self {
        Self {
            enabled_default: true,
            min_team_level: 0,
            default_engine: Engine::Deepgram,
            default_voice: "aura-asteria-en".to_string(),
            default_language: "en".to_string(),
            auto_detect_language: true,
            auto_fallback: true,
            strip_emoji: true,
            max_text_length: 400,
            base_volume: 1.0,
            speed: 1.0,
            performance_mode: PerformanceMode::Balanced,
            elevenlabs_api_key: None,
            deepgram_api_key: None,
            google_api_key: None,
            store_path: None,
            filter: FilterConfig::default(),
            detector: DetectorConfig::default(),
            queue: QueueConfig::default(),
        }
    }
}

/// YAML-file shape: everything optional, merged over the defaults.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct YamlConfig {
    pub enabled: Option<bool>,
    pub min_team_level: Option<u8>,
    pub default_engine: Option<Engine>,
    pub default_voice: Option<String>,
    pub default_language: Option<String>,
    pub auto_detect_language: Option<bool>,
    pub auto_fallback: Option<bool>,
    pub strip_emoji: Option<bool>,
    pub max_text_length: Option<usize>,
    pub base_volume: Option<f32>,
    pub speed: Option<f32>,
    pub performance_mode: Option<PerformanceMode>,
    pub elevenlabs_api_key: Option<String>,
    pub deepgram_api_key: Option<String>,
    pub google_api_key: Option<String>,
    pub store_path: Option<PathBuf>,
    pub filter: Option<FilterConfig>,
    pub detector: Option<DetectorConfig>,
    pub queue: Option<QueueConfig>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed config file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },
}

fn invalid(key: &'static str, message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        key,
        message: message.into(),
    }
}

/// Parse an environment variable if present.
fn env_parse<T: FromStr>(key: &'static str) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| invalid(key, e.to_string())),
        Err(_) => Ok(None),
    }
}

fn env_string(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

impl CrierConfig {
    /// Load configuration from environment variables over the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::merge(YamlConfig::default())
    }

    /// Load configuration from a YAML file, then apply environment variable
    /// overrides, then validate.
    pub fn from_file(path: &PathBuf) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let yaml: YamlConfig = serde_yaml::from_str(&raw)?;
        Self::merge(yaml)
    }

    fn merge(yaml: YamlConfig) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let mut config = Self {
            enabled_default: yaml.enabled.unwrap_or(defaults.enabled_default),
            min_team_level: yaml.min_team_level.unwrap_or(defaults.min_team_level),
            default_engine: yaml.default_engine.unwrap_or(defaults.default_engine),
            default_voice: yaml.default_voice.unwrap_or(defaults.default_voice),
            default_language: yaml.default_language.unwrap_or(defaults.default_language),
            auto_detect_language: yaml
                .auto_detect_language
                .unwrap_or(defaults.auto_detect_language),
            auto_fallback: yaml.auto_fallback.unwrap_or(defaults.auto_fallback),
            strip_emoji: yaml.strip_emoji.unwrap_or(defaults.strip_emoji),
            max_text_length: yaml.max_text_length.unwrap_or(defaults.max_text_length),
            base_volume: yaml.base_volume.unwrap_or(defaults.base_volume),
            speed: yaml.speed.unwrap_or(defaults.speed),
            performance_mode: yaml.performance_mode.unwrap_or(defaults.performance_mode),
            elevenlabs_api_key: yaml.elevenlabs_api_key,
            deepgram_api_key: yaml.deepgram_api_key,
            google_api_key: yaml.google_api_key,
            store_path: yaml.store_path,
            filter: yaml.filter.unwrap_or(defaults.filter),
            detector: yaml.detector.unwrap_or(defaults.detector),
            queue: yaml.queue.unwrap_or(defaults.queue),
        };

        // Environment overrides
        if let Some(v) = env_parse::<bool>("CRIER_ENABLED")? {
            config.enabled_default = v;
        }
        if let Some(v) = env_parse::<u8>("CRIER_MIN_TEAM_LEVEL")? {
            config.min_team_level = v;
        }
        if let Some(v) = env_parse::<Engine>("CRIER_DEFAULT_ENGINE")? {
            config.default_engine = v;
        }
        if let Some(v) = env_string("CRIER_DEFAULT_VOICE") {
            config.default_voice = v;
        }
        if let Some(v) = env_string("CRIER_DEFAULT_LANGUAGE") {
            config.default_language = v;
        }
        if let Some(v) = env_parse::<bool>("CRIER_AUTO_DETECT_LANGUAGE")? {
            config.auto_detect_language = v;
        }
        if let Some(v) = env_parse::<bool>("CRIER_AUTO_FALLBACK")? {
            config.auto_fallback = v;
        }
        if let Some(v) = env_parse::<bool>("CRIER_STRIP_EMOJI")? {
            config.strip_emoji = v;
        }
        if let Some(v) = env_parse::<usize>("CRIER_MAX_TEXT_LENGTH")? {
            config.max_text_length = v;
        }
        if let Some(v) = env_parse::<f32>("CRIER_BASE_VOLUME")? {
            config.base_volume = v;
        }
        if let Some(v) = env_parse::<f32>("CRIER_SPEED")? {
            config.speed = v;
        }
        if let Some(v) = env_string("ELEVENLABS_API_KEY") {
            config.elevenlabs_api_key = Some(v);
        }
        if let Some(v) = env_string("DEEPGRAM_API_KEY") {
            config.deepgram_api_key = Some(v);
        }
        if let Some(v) = env_string("GOOGLE_TTS_API_KEY") {
            config.google_api_key = Some(v);
        }
        if let Some(v) = env_string("CRIER_STORE_PATH") {
            config.store_path = Some(PathBuf::from(v));
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(0.25..=4.0).contains(&self.speed) {
            return Err(invalid("speed", "must be between 0.25 and 4.0"));
        }
        if !(0.0..=2.0).contains(&self.base_volume) {
            return Err(invalid("base_volume", "must be between 0.0 and 2.0"));
        }
        if self.max_text_length < 10 {
            return Err(invalid("max_text_length", "must be at least 10"));
        }
        if self.default_language.is_empty() {
            return Err(invalid("default_language", "must not be empty"));
        }
        if !(0.0..=1.0).contains(&self.detector.confidence_threshold) {
            return Err(invalid(
                "detector.confidence_threshold",
                "must be between 0.0 and 1.0",
            ));
        }
        if self.queue.max_size == 0 {
            return Err(invalid("queue.max_size", "must be at least 1"));
        }
        if self.queue.rate_limit_max == 0 {
            return Err(invalid("queue.rate_limit_max", "must be at least 1"));
        }
        Ok(())
    }
}
