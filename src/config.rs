//! Application constants and layered settings.
//!
//! Settings sources (highest wins):
//! 1. Environment variables (`TRACKIT_*` prefix, `__` between sections,
//!    e.g. `TRACKIT_LLM__PROVIDER=openai_compatible`)
//! 2. `./trackit.toml`
//! 3. `<config dir>/trackit/config.toml`
//! 4. Built-in defaults

use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::llm::PricingTable;

/// Application-level constants
pub const APP_NAME: &str = "Trackit";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const ENV_PREFIX: &str = "TRACKIT_";

/// Longest analysis window accepted from settings or the command line.
pub const MAX_WINDOW_WEEKS: u32 = 520;

pub const DEFAULT_EXTRACTION_MODEL: &str = "claude-3-5-haiku-20241022";
pub const DEFAULT_REPORT_MODEL: &str = "claude-3-5-sonnet-20241022";

/// Get the application data directory
pub fn app_data_dir() -> PathBuf {
    dirs::data_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("trackit")
}

/// Default location of the habit database
pub fn default_database_path() -> PathBuf {
    app_data_dir().join("habits.db")
}

/// User-global config file, if a config directory exists on this platform
pub fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("trackit").join("config.toml"))
}

/// Log filter used when `RUST_LOG` is unset
pub fn default_log_filter() -> &'static str {
    "trackit=info,trackit_lib=info,warn"
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Figment(#[from] figment::Error),

    #[error("Invalid configuration value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Anthropic,
    OpenaiCompatible,
}

impl ProviderKind {
    /// Conventional variable holding this provider's key.
    pub fn api_key_env_var(&self) -> &'static str {
        match self {
            ProviderKind::Anthropic => "ANTHROPIC_API_KEY",
            ProviderKind::OpenaiCompatible => "OPENAI_API_KEY",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub path: PathBuf,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub provider: ProviderKind,
    pub api_key: Option<String>,
    /// Custom endpoint; provider default when unset.
    pub base_url: Option<String>,
    pub extraction_model: String,
    pub classification_model: String,
    pub report_model: String,
    /// Total attempts per call, including the first.
    pub max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub timeout_secs: u64,
    pub max_tokens: u32,
    pub temperature: f32,
    pub pricing: PricingTable,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Anthropic,
            api_key: None,
            base_url: None,
            extraction_model: DEFAULT_EXTRACTION_MODEL.into(),
            classification_model: DEFAULT_EXTRACTION_MODEL.into(),
            report_model: DEFAULT_REPORT_MODEL.into(),
            max_attempts: 3,
            retry_base_delay_ms: 1000,
            timeout_secs: 60,
            max_tokens: 1024,
            temperature: 0.0,
            pricing: PricingTable::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionSettings {
    /// Follow-up prompts allowed after an unusable response.
    pub max_corrections: u32,
    pub cache_enabled: bool,
    pub cache_max_entries: usize,
    pub cache_ttl_secs: u64,
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            max_corrections: 2,
            cache_enabled: true,
            cache_max_entries: 1000,
            cache_ttl_secs: 24 * 60 * 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisSettings {
    pub trend_weeks: u32,
    pub moving_average_window: usize,
    /// Ask the report model for a narrative section.
    pub narrative: bool,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            trend_weeks: 4,
            moving_average_window: 7,
            narrative: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub llm: LlmSettings,
    pub extraction: ExtractionSettings,
    pub analysis: AnalysisSettings,
    pub log_filter: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database: DatabaseSettings::default(),
            llm: LlmSettings::default(),
            extraction: ExtractionSettings::default(),
            analysis: AnalysisSettings::default(),
            log_filter: default_log_filter().into(),
        }
    }
}

impl Settings {
    /// Load from TOML files and environment. Does not read `.env`.
    pub fn load() -> Result<Self, ConfigError> {
        let mut settings: Settings = Self::figment().extract()?;
        settings.apply_api_key_fallback();
        settings.validate()?;
        Ok(settings)
    }

    /// Load `.env` from the working directory first, then [`Settings::load`].
    pub fn load_with_dotenv() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::load()
    }

    /// Build the provider chain. Public so callers can layer more on top.
    pub fn figment() -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(global_path) = global_config_path() {
            if global_path.exists() {
                figment = figment.merge(Toml::file(global_path));
            }
        }

        let local_path = Path::new("trackit.toml");
        if local_path.exists() {
            figment = figment.merge(Toml::file(local_path));
        }

        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    fn apply_api_key_fallback(&mut self) {
        if self.llm.api_key.as_deref().map_or(true, |k| k.trim().is_empty()) {
            self.llm.api_key = std::env::var(self.llm.provider.api_key_env_var())
                .ok()
                .filter(|k| !k.trim().is_empty());
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.extraction.cache_max_entries == 0 && self.extraction.cache_enabled {
            return Err(ConfigError::InvalidValue {
                field: "extraction.cache_max_entries".into(),
                reason: "must be at least 1 when the cache is enabled".into(),
            });
        }
        if self.analysis.moving_average_window == 0 {
            return Err(ConfigError::InvalidValue {
                field: "analysis.moving_average_window".into(),
                reason: "must be at least 1".into(),
            });
        }
        if !(1..=MAX_WINDOW_WEEKS).contains(&self.analysis.trend_weeks) {
            return Err(ConfigError::InvalidValue {
                field: "analysis.trend_weeks".into(),
                reason: format!("must be between 1 and {MAX_WINDOW_WEEKS}"),
            });
        }
        Ok(())
    }
}
