//! Configuration Loader
//!
//! Environment-aware layering with the `config` crate:
//!
//! 1. built-in defaults
//! 2. `<dir>/dispatch.toml` (optional)
//! 3. `<dir>/dispatch.<environment>.toml` (optional)
//! 4. `DISPATCH__<SECTION>__<KEY>` environment variables

use config::{Config, Environment, File};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use super::error::{ConfigResult, ConfigurationError};
use super::DispatchConfig;

const ENV_PREFIX: &str = "DISPATCH";
const ENV_SEPARATOR: &str = "__";

#[derive(Debug)]
pub struct ConfigManager {
    config: DispatchConfig,
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

    /// Load configuration from a specific directory with explicit environment,
    /// without touching process-wide environment detection
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(|| PathBuf::from("config"));

        debug!(
            environment = %environment,
            directory = %config_directory.display(),
            "Loading dispatch configuration"
        );

        let config = Self::build(&config_directory, environment)?;
        config.validate()?;

        info!(
            environment = %environment,
            tenant = %config.tenant.name,
            batch_size = config.processing.batch_size,
            persistent_store = config.database.url.is_some(),
            "Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    /// Wrap an already built configuration, validating it
    pub fn from_config(config: DispatchConfig, environment: &str) -> ConfigResult<Arc<ConfigManager>> {
        config.validate()?;
        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory: PathBuf::from("config"),
        }))
    }

    fn build(config_directory: &Path, environment: &str) -> ConfigResult<DispatchConfig> {
        let defaults = Config::try_from(&DispatchConfig::default())
            .map_err(|e| ConfigurationError::load_error(environment, e))?;

        Config::builder()
            .add_source(defaults)
            .add_source(File::from(config_directory.join("dispatch.toml")).required(false))
            .add_source(
                File::from(config_directory.join(format!("dispatch.{environment}.toml")))
                    .required(false),
            )
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true),
            )
            .build()
            .and_then(|built| built.try_deserialize::<DispatchConfig>())
            .map_err(|e| ConfigurationError::load_error(environment, e))
    }

    pub fn detect_environment() -> String {
        env::var("DISPATCH_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase()
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }
}
