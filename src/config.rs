//! Configuration for the embedding indexer.
//!
//! Settings are layered:
//! - Default values
//! - TOML configuration file
//! - Environment variable overrides
//!
//! # Environment Variables
//!
//! Environment variables must be prefixed with `SEMINDEX_` and use double
//! underscores to separate nested levels:
//! - `SEMINDEX_EMBEDDING__PASS_SIZE=20` sets `embedding.pass_size`
//! - `SEMINDEX_DATABASE__PATH=/data/texts.db` sets `database.path`
//! - `SEMINDEX_LOGGING__LEVEL=debug` sets `logging.level`
//!
//! The raw [`EmbeddingConfig`] section is turned into a validated
//! [`EmbedderConfig`] before the embedder is built.

use crate::error::{EmbedderError, EmbedderResult};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default file name looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "semindex.toml";

/// Shortest accepted idle interval between indexing cycles.
pub const MIN_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Settings {
    /// Version of the configuration schema
    #[serde(default = "default_version")]
    pub version: u32,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub embedding: EmbeddingConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct DatabaseConfig {
    /// SQLite database file
    #[serde(default = "default_database_path")]
    pub path: PathBuf,

    /// Idle connections kept open
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct EmbeddingConfig {
    /// Model to load
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Texts fetched per pass
    #[serde(default = "default_pass_size")]
    pub pass_size: usize,

    #[serde(default = "default_sleep_between_passes_ms")]
    pub sleep_between_passes_ms: u64,

    /// Idle time between cycles. 0 runs a single cycle.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Download the model when it is not cached
    #[serde(default)]
    pub force_pull: bool,

    /// Prepended to every chunk before embedding
    #[serde(default)]
    pub document_prefix: String,

    /// Prepended to every search query before embedding
    #[serde(default)]
    pub query_prefix: String,

    /// Sub-batch size inside the local backend
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default)]
    pub wait_between_batches_ms: u64,

    /// Model cache directory for the local backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,

    /// Text whose embedding marks a query as meaningless to the model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unreliable_probe: Option<String>,

    #[serde(default = "default_unreliable_threshold")]
    pub unreliable_threshold: f32,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct LoggingConfig {
    /// Default filter when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default value functions
fn default_version() -> u32 {
    1
}
fn default_database_path() -> PathBuf {
    PathBuf::from("semindex.db")
}
fn default_pool_size() -> usize {
    4
}
fn default_embedding_model() -> String {
    "AllMiniLML6V2".to_string()
}
fn default_pass_size() -> usize {
    10
}
fn default_sleep_between_passes_ms() -> u64 {
    500
}
fn default_interval_secs() -> u64 {
    60
}
fn default_batch_size() -> usize {
    10
}
fn default_unreliable_threshold() -> f32 {
    0.85
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: default_version(),
            database: DatabaseConfig::default(),
            embedding: EmbeddingConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            pool_size: default_pool_size(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
            pass_size: default_pass_size(),
            sleep_between_passes_ms: default_sleep_between_passes_ms(),
            interval_secs: default_interval_secs(),
            force_pull: false,
            document_prefix: String::new(),
            query_prefix: String::new(),
            batch_size: default_batch_size(),
            wait_between_batches_ms: 0,
            cache_dir: None,
            unreliable_probe: None,
            unreliable_threshold: default_unreliable_threshold(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Settings {
    /// Load configuration from all sources.
    ///
    /// With no explicit path, `semindex.toml` in the working directory is
    /// used when present.
    pub fn load(path: Option<&Path>) -> Result<Self, Box<figment::Error>> {
        let config_path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        Self::figment(&config_path).extract().map_err(Box::new)
    }

    fn figment(config_path: &Path) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Settings::default()))
            .merge(Toml::file(config_path))
            // Double underscore separates nested levels, single underscores stay
            .merge(Env::prefixed("SEMINDEX_").map(|key| {
                key.as_str().to_lowercase().replace("__", ".").into()
            }))
    }

    /// Write the default settings to `path`.
    pub fn write_default(path: impl AsRef<Path>, force: bool) -> Result<PathBuf, Box<dyn std::error::Error>> {
        let path = path.as_ref();
        if !force && path.exists() {
            return Err(format!(
                "Configuration file {} already exists. Use --force to overwrite",
                path.display()
            )
            .into());
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let body = toml::to_string_pretty(&Settings::default())?;
        std::fs::write(path, format!("# semindex configuration\n\n{body}"))?;
        Ok(path.to_path_buf())
    }
}

/// Validated runtime configuration of the embedder.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbedderConfig {
    pub model: String,
    pub pass_size: usize,
    pub sleep_between_passes: Duration,
    /// `Duration::ZERO` runs one cycle and returns.
    pub interval: Duration,
    pub force_pull: bool,
    pub document_prefix: String,
    pub query_prefix: String,
    pub unreliable_probe: Option<String>,
    pub unreliable_threshold: f32,
}

impl EmbedderConfig {
    /// Configuration with defaults for everything but the model.
    pub fn new(model: impl Into<String>) -> Self {
        let defaults = EmbeddingConfig::default();
        Self {
            model: model.into(),
            pass_size: defaults.pass_size,
            sleep_between_passes: Duration::from_millis(defaults.sleep_between_passes_ms),
            interval: Duration::from_secs(defaults.interval_secs),
            force_pull: false,
            document_prefix: String::new(),
            query_prefix: String::new(),
            unreliable_probe: None,
            unreliable_threshold: defaults.unreliable_threshold,
        }
    }

    pub fn validate(&self) -> EmbedderResult<()> {
        if self.model.trim().is_empty() {
            return Err(config_error("model name must not be empty"));
        }
        if self.pass_size == 0 {
            return Err(config_error("pass_size must be positive"));
        }
        if !self.interval.is_zero() && self.interval < MIN_INTERVAL {
            return Err(config_error(format!(
                "interval must be 0 (run once) or at least {}s, got {:?}",
                MIN_INTERVAL.as_secs(),
                self.interval
            )));
        }
        if self.unreliable_probe.is_some()
            && !(self.unreliable_threshold > 0.0 && self.unreliable_threshold <= 1.0)
        {
            return Err(config_error(format!(
                "unreliable_threshold must be in (0, 1], got {}",
                self.unreliable_threshold
            )));
        }
        Ok(())
    }

    pub fn runs_once(&self) -> bool {
        self.interval.is_zero()
    }
}

impl TryFrom<&EmbeddingConfig> for EmbedderConfig {
    type Error = EmbedderError;

    fn try_from(section: &EmbeddingConfig) -> Result<Self, Self::Error> {
        let config = Self {
            model: section.model.clone(),
            pass_size: section.pass_size,
            sleep_between_passes: Duration::from_millis(section.sleep_between_passes_ms),
            interval: Duration::from_secs(section.interval_secs),
            force_pull: section.force_pull,
            document_prefix: section.document_prefix.clone(),
            query_prefix: section.query_prefix.clone(),
            unreliable_probe: section.unreliable_probe.clone(),
            unreliable_threshold: section.unreliable_threshold,
        };
        config.validate()?;
        Ok(config)
    }
}

fn config_error(reason: impl Into<String>) -> EmbedderError {
    EmbedderError::Config {
        reason: reason.into(),
    }
}
