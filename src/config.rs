//! Harvester configuration.
//!
//! Values come from built-in defaults, an optional TOML file named by
//! `HARVESTER_CONFIG`, and environment overrides (a `.env` file is honoured
//! via `dotenvy`).

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvesterConfig {
    pub provider: ProviderConfig,
    pub window: WindowConfig,
    pub pacing: PacingConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
}

/// Remote provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Portal root; serves both the directory page and the search API.
    pub base_url: String,
    pub user_agent: String,
    pub request_timeout_secs: u64,
    /// Page size of the single windowed query per source.
    pub page_size: u32,
    /// Program filters tried in order until one yields records.
    pub program_variants: Vec<String>,
    /// Sources used when the directory page cannot be scraped.
    pub fallback_sources: Vec<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://inspections.myhealthdepartment.com/".to_string(),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/110.0.0.0 Safari/537.36".to_string(),
            request_timeout_secs: 30,
            page_size: 500,
            program_variants: vec![String::new(), "Food".to_string()],
            fallback_sources: ["tennessee", "alabama", "arizona", "florida"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    /// Days back from today covered by each query.
    pub days: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self { days: 30 }
    }
}

/// Randomized delay between sources.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            min_ms: 2_000,
            max_ms: 4_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://inspections.db".to_string(),
            max_connections: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

impl HarvesterConfig {
    /// Loads configuration from `.env`, the optional TOML file and the
    /// environment, then validates it.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the config file is unreadable or invalid,
    /// or if the merged values fail [`HarvesterConfig::validate`].
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let mut config = match std::env::var("HARVESTER_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        debug!(path = %path.display(), "Loading config file");
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(url) = std::env::var("DATABASE_URL") {
            self.database.url = url;
        }
        if let Ok(url) = std::env::var("HARVESTER_BASE_URL") {
            self.provider.base_url = url;
        }
        if let Ok(days) = std::env::var("HARVESTER_WINDOW_DAYS") {
            self.window.days = days.parse().map_err(|_| {
                ConfigError::Invalid(format!("HARVESTER_WINDOW_DAYS is not a number: {}", days))
            })?;
        }
        if let Ok(filter) = std::env::var("HARVESTER_LOG") {
            self.logging.filter = filter;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window.days == 0 {
            return Err(ConfigError::Invalid("window.days must be positive".into()));
        }
        if self.provider.page_size == 0 {
            return Err(ConfigError::Invalid("provider.page_size must be positive".into()));
        }
        if self.provider.program_variants.is_empty() {
            return Err(ConfigError::Invalid(
                "provider.program_variants needs at least one entry".into(),
            ));
        }
        if self.pacing.min_ms > self.pacing.max_ms {
            return Err(ConfigError::Invalid(format!(
                "pacing.min_ms ({}) exceeds pacing.max_ms ({})",
                self.pacing.min_ms, self.pacing.max_ms
            )));
        }
        if self.database.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "database.max_connections must be positive".into(),
            ));
        }
        Ok(())
    }
}
