//! Configuration for the training and prediction dispatchers.
//!
//! This module provides [`MontanteConfig`] and its builder.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use montante::MontanteConfig;
//!
//! let config = MontanteConfig::builder()
//!     .model_dir("/var/lib/montante/models")
//!     .training_timeout(Duration::from_secs(120))
//!     .random_seed(7)
//!     .build()
//!     .expect("valid config");
//! assert_eq!(config.default_engine, "caret");
//! ```

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{MontanteError, Result};

/// Environment variable naming the model storage directory.
pub const ENV_MODEL_DIR: &str = "MONTANTE_MODEL_DIR";
/// Environment variable holding the training timeout in seconds.
pub const ENV_TRAINING_TIMEOUT_SECS: &str = "MONTANTE_TRAINING_TIMEOUT_SECS";
/// Environment variable holding the random seed.
pub const ENV_SEED: &str = "MONTANTE_SEED";
/// Environment variable enabling strict prediction column checks.
pub const ENV_STRICT_COLUMNS: &str = "MONTANTE_STRICT_COLUMNS";

/// Configuration shared by the dispatchers and the model store.
#[derive(Debug, Clone)]
pub struct MontanteConfig {
    /// Engine used when a training payload omits `engine` (default: `caret`).
    pub default_engine: String,

    /// Directory where trained models are stored (default: the system temp dir).
    pub model_dir: PathBuf,

    /// Upper bound for a training call, including the wait for the runtime
    /// guard (default: none).
    pub training_timeout: Option<Duration>,

    /// Seed for resampling (default: 42).
    ///
    /// Same seed, same data and same payload give the same model.
    pub random_seed: u64,

    /// Check prediction columns against the model signature before calling
    /// the runtime (default: false).
    ///
    /// When enabled, mismatches raise
    /// [`MissingColumns`](MontanteError::MissingColumns) or
    /// [`UnexpectedColumns`](MontanteError::UnexpectedColumns) instead of the
    /// runtime's own [`ForeignRuntime`](MontanteError::ForeignRuntime) error.
    pub strict_prediction_columns: bool,
}

impl Default for MontanteConfig {
    fn default() -> Self {
        Self {
            default_engine: "caret".to_string(),
            model_dir: env::temp_dir(),
            training_timeout: None,
            random_seed: 42,
            strict_prediction_columns: false,
        }
    }
}

impl MontanteConfig {
    /// Create a new builder for `MontanteConfig`.
    #[must_use]
    pub fn builder() -> MontanteConfigBuilder {
        MontanteConfigBuilder::default()
    }

    /// Builds a configuration from `MONTANTE_*` environment variables,
    /// falling back to defaults for unset ones.
    ///
    /// # Errors
    ///
    /// Returns [`MontanteError::InvalidConfig`] if a variable is set but
    /// cannot be parsed.
    pub fn from_env() -> Result<Self> {
        let mut builder = Self::builder();

        if let Ok(dir) = env::var(ENV_MODEL_DIR) {
            builder = builder.model_dir(dir);
        }
        if let Ok(raw) = env::var(ENV_TRAINING_TIMEOUT_SECS) {
            let secs: u64 = raw.trim().parse().map_err(|_| {
                MontanteError::InvalidConfig(format!(
                    "{ENV_TRAINING_TIMEOUT_SECS} must be a whole number of seconds, got '{raw}'"
                ))
            })?;
            builder = builder.training_timeout(Duration::from_secs(secs));
        }
        if let Ok(raw) = env::var(ENV_SEED) {
            let seed: u64 = raw.trim().parse().map_err(|_| {
                MontanteError::InvalidConfig(format!("{ENV_SEED} must be an unsigned integer, got '{raw}'"))
            })?;
            builder = builder.random_seed(seed);
        }
        if let Ok(raw) = env::var(ENV_STRICT_COLUMNS) {
            builder = builder.strict_prediction_columns(parse_flag(&raw)?);
        }

        builder.build()
    }
}

fn parse_flag(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(MontanteError::InvalidConfig(format!(
            "{ENV_STRICT_COLUMNS} must be a boolean, got '{other}'"
        ))),
    }
}

/// Builder for [`MontanteConfig`].
///
/// # Validation
///
/// [`build()`](Self::build) rejects:
/// - an empty `default_engine`
/// - an empty `model_dir`
/// - a zero `training_timeout`
#[derive(Debug, Clone, Default)]
pub struct MontanteConfigBuilder {
    config: MontanteConfig,
}

impl MontanteConfigBuilder {
    /// Engine used when the payload has no `engine` field.
    #[must_use]
    pub fn default_engine(mut self, engine: impl Into<String>) -> Self {
        self.config.default_engine = engine.into();
        self
    }

    /// Directory for stored models.
    #[must_use]
    pub fn model_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.model_dir = dir.into();
        self
    }

    /// Upper bound for training calls.
    #[must_use]
    pub fn training_timeout(mut self, timeout: Duration) -> Self {
        self.config.training_timeout = Some(timeout);
        self
    }

    /// Removes any training timeout.
    #[must_use]
    pub fn no_training_timeout(mut self) -> Self {
        self.config.training_timeout = None;
        self
    }

    /// Seed for resampling.
    #[must_use]
    pub fn random_seed(mut self, seed: u64) -> Self {
        self.config.random_seed = seed;
        self
    }

    /// Enables the typed prediction column pre-check.
    #[must_use]
    pub fn strict_prediction_columns(mut self, strict: bool) -> Self {
        self.config.strict_prediction_columns = strict;
        self
    }

    /// Validates and returns the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`MontanteError::InvalidConfig`] when a constraint is violated.
    pub fn build(self) -> Result<MontanteConfig> {
        let config = self.config;

        if config.default_engine.trim().is_empty() {
            return Err(MontanteError::InvalidConfig(
                "default_engine must not be empty".to_string(),
            ));
        }
        if config.model_dir.as_os_str().is_empty() {
            return Err(MontanteError::InvalidConfig(
                "model_dir must not be empty".to_string(),
            ));
        }
        if config.training_timeout == Some(Duration::ZERO) {
            return Err(MontanteError::InvalidConfig(
                "training_timeout must be greater than zero".to_string(),
            ));
        }

        Ok(config)
    }
}
