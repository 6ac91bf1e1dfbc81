//! Configuration Loader
//!
//! Environment-aware configuration loading. Sources are layered with the
//! `config` crate, later layers overriding earlier ones:
//!
//! 1. `config/provisioner.yaml` (optional base file)
//! 2. `config/environments/{environment}.yaml` (optional override)
//! 3. `PROVISIONER__SECTION__FIELD` environment variables

use super::error::{ConfigResult, ConfigurationError};
use super::ProvisionerConfig;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const BASE_FILE_NAME: &str = "provisioner.yaml";
const ENV_PREFIX: &str = "PROVISIONER";
const ENV_SEPARATOR: &str = "__";

/// Loaded, validated configuration plus the context it was loaded in
#[derive(Debug)]
pub struct ConfigManager {
    config: ProvisionerConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    /// Load configuration from a specific directory
    pub fn load_from_directory(config_dir: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load configuration from a specific directory with explicit environment.
    /// Tests use this to avoid touching process-wide environment variables.
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(|| PathBuf::from("config"));

        debug!(
            environment = %environment,
            directory = %config_directory.display(),
            "Loading provisioner configuration"
        );

        let config = Self::build(&config_directory, environment)?;
        config.validate()?;

        info!(
            environment = %environment,
            capacity = config.scheduler.capacity,
            max_entity_retries = config.scheduler.max_entity_retries,
            reconciliation_enabled = config.reconciliation.enabled,
            "⚙️ CONFIG: Provisioner configuration loaded"
        );
        debug!(config = %Self::sanitize_for_logging(&config), "Effective configuration");

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    /// Wrap an already-built configuration (embedding and tests)
    pub fn from_config(config: ProvisionerConfig) -> ConfigResult<Arc<ConfigManager>> {
        config.validate()?;
        Ok(Arc::new(ConfigManager {
            config,
            environment: Self::detect_environment(),
            config_directory: PathBuf::from("config"),
        }))
    }

    fn build(config_directory: &Path, environment: &str) -> ConfigResult<ProvisionerConfig> {
        let base_file = config_directory.join(BASE_FILE_NAME);
        let env_file = config_directory
            .join("environments")
            .join(format!("{environment}.yaml"));

        let layered = config::Config::builder()
            .add_source(config::File::from(base_file).required(false))
            .add_source(config::File::from(env_file).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator(ENV_SEPARATOR)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ConfigurationError::load_error(environment, e))?;

        layered
            .try_deserialize::<ProvisionerConfig>()
            .map_err(ConfigurationError::deserialize_error)
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &ProvisionerConfig {
        &self.config
    }

    /// Get the current environment
    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// Get the configuration directory
    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    /// Sanitized JSON view of the configuration, safe to log
    pub fn debug_config(&self) -> serde_json::Value {
        Self::sanitize_for_logging(&self.config)
    }

    /// Detect current environment from environment variables
    pub fn detect_environment() -> String {
        env::var("PROVISIONER_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase()
    }

    fn sanitize_for_logging(config: &ProvisionerConfig) -> serde_json::Value {
        let mut value = serde_json::to_value(config).unwrap_or(serde_json::Value::Null);
        Self::mask_sensitive(&mut value, &["password", "secret", "token", "url"]);
        value
    }

    fn mask_sensitive(value: &mut serde_json::Value, patterns: &[&str]) {
        match value {
            serde_json::Value::Object(map) => {
                for (key, val) in map.iter_mut() {
                    let key_lower = key.to_lowercase();
                    if patterns.iter().any(|p| key_lower.contains(p)) {
                        if !val.is_null() {
                            *val = serde_json::Value::String("[MASKED]".to_string());
                        }
                    } else {
                        Self::mask_sensitive(val, patterns);
                    }
                }
            }
            serde_json::Value::Array(items) => {
                for item in items.iter_mut() {
                    Self::mask_sensitive(item, patterns);
                }
            }
            _ => {}
        }
    }
}
