//! Configuration Loader
//!
//! Environment-aware loading: a base TOML file, an optional
//! `<stem>.<environment>.toml` overlay next to it, then `BOOM_WALKER__*`
//! environment variables (`BOOM_WALKER__WALK__MIN_POINTS=5`).

use super::error::{ConfigResult, ConfigurationError};
use super::WalkerConfig;
use config::{Config, Environment, File, FileFormat};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const ENV_PREFIX: &str = "BOOM_WALKER";
const ENV_SEPARATOR: &str = "__";

#[derive(Debug)]
pub struct ConfigManager {
    config: WalkerConfig,
    environment: String,
    config_path: PathBuf,
}

impl ConfigManager {
    /// Load configuration from `path`, detecting the environment when none is given
    pub fn load_from_file(path: &Path, environment: Option<&str>) -> ConfigResult<Arc<Self>> {
        let environment = environment
            .map(str::to_lowercase)
            .unwrap_or_else(Self::detect_environment);

        if !path.is_file() {
            return Err(ConfigurationError::ConfigFileNotFound(path.to_path_buf()));
        }

        let overlay = Self::overlay_path(path, &environment);
        debug!(
            "Loading configuration for environment '{}' from {} (overlay {})",
            environment,
            path.display(),
            overlay.display()
        );

        let settings = Config::builder()
            .add_source(File::from(path).format(FileFormat::Toml).required(true))
            .add_source(
                File::from(overlay.as_path())
                    .format(FileFormat::Toml)
                    .required(false),
            )
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator(ENV_SEPARATOR)
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ConfigurationError::file_read_error(path.display().to_string(), e))?;

        let config: WalkerConfig = settings
            .try_deserialize()
            .map_err(|e| ConfigurationError::parse_error(path.display().to_string(), e))?;

        Self::finish(config, environment, path.to_path_buf())
    }

    /// Load from TOML text without overlays or environment variables
    pub fn from_toml_str(contents: &str) -> ConfigResult<Arc<Self>> {
        let config: WalkerConfig = Config::builder()
            .add_source(File::from_str(contents, FileFormat::Toml))
            .build()
            .and_then(Config::try_deserialize::<WalkerConfig>)
            .map_err(|e| ConfigurationError::parse_error("<inline>", e))?;

        Self::finish(config, "test".to_string(), PathBuf::from("<inline>"))
    }

    fn finish(
        config: WalkerConfig,
        environment: String,
        config_path: PathBuf,
    ) -> ConfigResult<Arc<Self>> {
        config.validate()?;

        let manager = Self {
            config,
            environment,
            config_path,
        };
        debug!(
            "Configuration loaded successfully: {}",
            serde_json::to_string_pretty(&manager.debug_config())
                .unwrap_or_else(|_| "[serialization error]".to_string())
        );
        info!(
            environment = %manager.environment,
            archive = %manager.config.archive.name,
            user_id = %manager.config.archive.user_id,
            datasource = manager.config.datasource.kind_name(),
            "Configuration loaded"
        );
        Ok(Arc::new(manager))
    }

    pub fn config(&self) -> &WalkerConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Configuration as JSON with the database password masked
    pub fn debug_config(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(&self.config).unwrap_or(serde_json::Value::Null);
        if let Some(url) = value
            .pointer_mut("/database/url")
            .and_then(|v| v.as_str().map(str::to_string))
        {
            if let Some(slot) = value.pointer_mut("/database/url") {
                *slot = serde_json::Value::String(mask_url_password(&url));
            }
        }
        value
    }

    pub fn detect_environment() -> String {
        env::var("BOOM_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase()
    }

    /// `config/walker.toml` + `test` -> `config/walker.test.toml`
    fn overlay_path(path: &Path, environment: &str) -> PathBuf {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        path.with_file_name(format!("{stem}.{environment}.toml"))
    }
}

fn mask_url_password(url: &str) -> String {
    let Some(scheme_end) = url.find("://") else {
        return url.to_string();
    };
    let authority_start = scheme_end + 3;
    let Some(at) = url[authority_start..].find('@').map(|i| i + authority_start) else {
        return url.to_string();
    };
    match url[authority_start..at].find(':') {
        Some(colon) => format!("{}:***{}", &url[..authority_start + colon], &url[at..]),
        None => url.to_string(),
    }
}
