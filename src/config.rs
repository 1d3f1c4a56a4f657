use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError};

use crate::services::configurator::RuleMatchPolicy;

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_MAX_DEPTH: u32 = 64;
const DEFAULT_BOM_TYPE: &str = "MANUF_COMPONENT";
const CONFIG_DIR: &str = "config";
const ENV_PREFIX: &str = "BOM";

/// Engine configuration with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Application environment
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Deepest level the tree builder will expand before stopping
    #[serde(default = "default_max_depth")]
    #[validate(range(min = 1, max = 1000))]
    pub max_depth: u32,

    /// Tie-break used when several manufacturing rules match the selected features
    #[serde(default)]
    pub rule_match_policy: RuleMatchPolicy,

    /// Association type used when a caller does not name one
    #[serde(default = "default_bom_type")]
    #[validate(length(min = 1))]
    pub default_bom_type: String,

    /// Facility used for production requests when neither the caller nor the
    /// source order/shipment supplies one
    #[serde(default)]
    pub default_facility_id: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            environment: default_environment(),
            log_level: default_log_level(),
            log_json: false,
            max_depth: default_max_depth(),
            rule_match_policy: RuleMatchPolicy::default(),
            default_bom_type: default_bom_type(),
            default_facility_id: None,
        }
    }
}

impl EngineConfig {
    /// Gets log level reference
    pub fn log_level(&self) -> &str {
        &self.log_level
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum EngineConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

fn default_environment() -> String {
    DEFAULT_ENV.to_string()
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_max_depth() -> u32 {
    DEFAULT_MAX_DEPTH
}

fn default_bom_type() -> String {
    DEFAULT_BOM_TYPE.to_string()
}

/// Validates log level values
fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if valid_levels.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some("Must be one of: trace, debug, info, warn, error".into());
        Err(err)
    }
}

/// Initializes tracing on stderr using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("stateset_bom={}", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .with_writer(std::io::stderr)
            .json()
            .try_init();
    } else {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .with_writer(std::io::stderr)
            .try_init();
    }
}

/// Loads engine configuration from the working directory.
pub fn load_config() -> Result<EngineConfig, EngineConfigError> {
    load_config_from(Path::new(CONFIG_DIR))
}

/// Loads engine configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. `{dir}/default.toml`
/// 3. `{dir}/{RUN_ENV}.toml`
/// 4. Environment variables (`BOM__*`)
pub fn load_config_from(dir: &Path) -> Result<EngineConfig, EngineConfigError> {
    let run_env = env::var("RUN_ENV").unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !dir.exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            dir.display()
        );
    }

    let config = Config::builder()
        .set_default("environment", run_env.as_str())?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .set_default("max_depth", DEFAULT_MAX_DEPTH as i64)?
        .set_default("default_bom_type", DEFAULT_BOM_TYPE)?
        .add_source(File::from(dir.join("default")).required(false))
        .add_source(File::from(dir.join(&run_env)).required(false))
        .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
        .build()?;

    let engine_config: EngineConfig = config.try_deserialize()?;

    engine_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        EngineConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(engine_config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File as StdFile;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, name: &str, content: &str) {
        let mut file = StdFile::create(dir.path().join(name)).unwrap();
        writeln!(file, "{}", content).unwrap();
    }

    #[test]
    fn defaults_are_valid() {
        let cfg = EngineConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.max_depth, 64);
        assert_eq!(cfg.rule_match_policy, RuleMatchPolicy::FirstMatch);
        assert_eq!(cfg.default_bom_type, "MANUF_COMPONENT");
    }

    #[test]
    fn rejects_unknown_log_level() {
        let cfg = EngineConfig {
            log_level: "chatty".into(),
            ..EngineConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_zero_max_depth() {
        let cfg = EngineConfig {
            max_depth: 0,
            ..EngineConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn missing_directory_falls_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        let cfg = load_config_from(&dir.path().join("absent")).unwrap();
        assert_eq!(cfg.log_level, "info");
        assert_eq!(cfg.max_depth, 64);
    }

    #[test]
    fn reads_default_file() {
        let dir = TempDir::new().unwrap();
        write_config(
            &dir,
            "default.toml",
            r#"
            log_level = "debug"
            max_depth = 12
            rule_match_policy = "priority"
            default_facility_id = "WebStoreWarehouse"
            "#,
        );

        let cfg = load_config_from(dir.path()).unwrap();
        assert_eq!(cfg.log_level, "debug");
        assert_eq!(cfg.max_depth, 12);
        assert_eq!(cfg.rule_match_policy, RuleMatchPolicy::Priority);
        assert_eq!(cfg.default_facility_id.as_deref(), Some("WebStoreWarehouse"));
    }

    #[test]
    fn invalid_file_values_fail_validation() {
        let dir = TempDir::new().unwrap();
        write_config(&dir, "default.toml", "max_depth = 5000");

        let result = load_config_from(dir.path());
        assert!(matches!(result, Err(EngineConfigError::Validation(_))));
    }
}
