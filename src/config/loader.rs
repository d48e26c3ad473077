//! Configuration Loader
//!
//! Environment-aware configuration loading: YAML file discovery, environment
//! detection and overlay merging.

use super::error::{ConfigResult, ConfigurationError};
use super::GridloadConfig;
use serde_yaml::Value as YamlValue;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const CONFIG_FILE_NAMES: [&str; 2] = ["gridload-config.yaml", "gridload-config.yml"];
const ENVIRONMENT_SECTIONS: [&str; 4] = ["development", "test", "staging", "production"];

pub struct ConfigManager {
    config: GridloadConfig,
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

    /// Load configuration from a specific directory with explicit environment
    ///
    /// Useful for testing without modifying global environment variables.
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(Self::default_config_directory);

        debug!(
            "Loading configuration for environment '{}' from directory: {}",
            environment,
            config_directory.display()
        );

        let config = Self::load_and_merge_config(&config_directory, environment)?;
        config.validate()?;

        let sanitized_config = Self::sanitize_config_for_logging(&config);
        debug!(
            "Configuration loaded successfully: {}",
            serde_json::to_string_pretty(&sanitized_config)
                .unwrap_or_else(|_| "[serialization error]".to_string())
        );

        info!(
            environment = environment,
            inline_threshold_mb = config.router.inline_threshold_mb,
            load_batch_size = config.load.batch_size,
            load_concurrency = config.load.concurrency,
            "⚙️ Configuration loaded"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    /// Wrap an already built configuration (tests, embedding services)
    pub fn from_config(config: GridloadConfig, environment: &str) -> ConfigResult<Arc<Self>> {
        config.validate()?;
        Ok(Arc::new(Self {
            config,
            environment: environment.to_string(),
            config_directory: PathBuf::from("config"),
        }))
    }

    pub fn config(&self) -> &GridloadConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    /// Configuration as JSON with sensitive-looking fields masked
    pub fn debug_config(&self) -> serde_json::Value {
        Self::sanitize_config_for_logging(&self.config)
    }

    /// Detect current environment: GRIDLOAD_ENV || APP_ENV || 'development'
    pub fn detect_environment() -> String {
        env::var("GRIDLOAD_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase()
    }

    fn default_config_directory() -> PathBuf {
        if let Ok(dir) = env::var("GRIDLOAD_CONFIG_DIR") {
            return PathBuf::from(dir);
        }
        if let Ok(manifest_dir) = env::var("CARGO_MANIFEST_DIR") {
            let candidate = PathBuf::from(manifest_dir).join("config");
            if candidate.exists() {
                return candidate;
            }
        }
        PathBuf::from("config")
    }

    /// Read a configuration file with a size limit
    fn read_config_file_safely(path: &Path) -> ConfigResult<String> {
        const MAX_CONFIG_FILE_SIZE: u64 = 10 * 1024 * 1024; // 10MB limit

        let metadata = std::fs::metadata(path)
            .map_err(|e| ConfigurationError::file_read_error(path.display().to_string(), e))?;

        if metadata.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigurationError::invalid_value(
                "file_size",
                metadata.len().to_string(),
                format!(
                    "Configuration file too large ({}MB > {}MB limit)",
                    metadata.len() / (1024 * 1024),
                    MAX_CONFIG_FILE_SIZE / (1024 * 1024)
                ),
            ));
        }

        if !metadata.is_file() {
            return Err(ConfigurationError::invalid_value(
                "file_type",
                "directory or special file",
                "Configuration path must point to a regular file",
            ));
        }

        std::fs::read_to_string(path)
            .map_err(|e| ConfigurationError::file_read_error(path.display().to_string(), e))
    }

    fn sanitize_config_for_logging(config: &GridloadConfig) -> serde_json::Value {
        let mut config_json = serde_json::json!(config);
        let sensitive_patterns = ["password", "secret", "token", "credential", "auth"];
        Self::sanitize_json_recursive(&mut config_json, &sensitive_patterns);
        config_json
    }

    fn sanitize_json_recursive(value: &mut serde_json::Value, sensitive_patterns: &[&str]) {
        match value {
            serde_json::Value::Object(map) => {
                for (key, val) in map.iter_mut() {
                    let key_lower = key.to_lowercase();
                    let is_sensitive = sensitive_patterns
                        .iter()
                        .any(|pattern| key_lower.contains(pattern));

                    if is_sensitive {
                        *val = serde_json::Value::String("[MASKED]".to_string());
                    } else {
                        Self::sanitize_json_recursive(val, sensitive_patterns);
                    }
                }
            }
            serde_json::Value::Array(arr) => {
                for item in arr.iter_mut() {
                    Self::sanitize_json_recursive(item, sensitive_patterns);
                }
            }
            _ => {}
        }
    }

    fn find_config_file(config_directory: &Path) -> ConfigResult<PathBuf> {
        let mut searched_paths = Vec::new();

        for name in CONFIG_FILE_NAMES {
            let config_path = config_directory.join(name);
            searched_paths.push(config_path.clone());

            if config_path.exists() {
                debug!("Found configuration file: {}", config_path.display());
                return Ok(config_path);
            }
        }

        Err(ConfigurationError::config_file_not_found(searched_paths))
    }

    /// Load and merge configuration with environment-specific overrides
    fn load_and_merge_config(
        config_directory: &Path,
        environment: &str,
    ) -> ConfigResult<GridloadConfig> {
        let config_file = Self::find_config_file(config_directory)?;
        let yaml_content = Self::read_config_file_safely(&config_file)?;

        let mut yaml_data: YamlValue = serde_yaml::from_str(&yaml_content)
            .map_err(|e| ConfigurationError::invalid_yaml(config_file.display().to_string(), e))?;

        // An empty file parses as null; treat it as all defaults
        if yaml_data.is_null() {
            yaml_data = YamlValue::Mapping(serde_yaml::Mapping::new());
        }

        if let Some(env_overrides) = yaml_data
            .get(YamlValue::String(environment.to_string()))
            .cloned()
        {
            debug!(
                "Applying environment-specific overrides for: {}",
                environment
            );
            Self::merge_yaml_values(&mut yaml_data, env_overrides)?;
        }

        if let YamlValue::Mapping(ref mut map) = yaml_data {
            for section in ENVIRONMENT_SECTIONS {
                map.remove(YamlValue::String(section.to_string()));
            }
            map.remove(YamlValue::String(environment.to_string()));
        }

        serde_yaml::from_value(yaml_data).map_err(|e| {
            ConfigurationError::invalid_yaml(
                config_file.display().to_string(),
                format!("Failed to deserialize configuration: {e}"),
            )
        })
    }

    /// Recursively merge YAML values (environment overrides into base config)
    fn merge_yaml_values(base: &mut YamlValue, override_value: YamlValue) -> ConfigResult<()> {
        match (&mut *base, override_value) {
            (YamlValue::Mapping(base_map), YamlValue::Mapping(override_map)) => {
                for (key, value) in override_map {
                    if let Some(existing_value) = base_map.get_mut(&key) {
                        Self::merge_yaml_values(existing_value, value)?;
                    } else {
                        base_map.insert(key, value);
                    }
                }
            }
            (YamlValue::Mapping(_), other) if !other.is_mapping() && !other.is_null() => {
                return Err(ConfigurationError::ConfigMergeError {
                    error: format!("cannot override a section with a scalar value: {other:?}"),
                });
            }
            (base_ref, override_val) => {
                *base_ref = override_val;
            }
        }
        Ok(())
    }
}
