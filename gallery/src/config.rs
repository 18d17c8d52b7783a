use gallery_api::config::Config as ApiConfig;
use serde::Deserialize;
use settings_store::config::SettingsStoreConfig;
use std::fs::File;

const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Deserialize, Debug)]
pub struct MetricsConfig {
    pub statsd_host: String,
    pub statsd_port: u16,
}

#[derive(Deserialize, Debug)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub level: String,
    pub sentry_dsn: Option<String>,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

#[derive(Deserialize, Debug)]
pub struct CommonConfig {
    pub metrics: Option<MetricsConfig>,
    pub logging: Option<LoggingConfig>,
}

#[derive(Deserialize, Debug)]
pub struct Config {
    #[serde(flatten)]
    pub common: CommonConfig,
    pub settings_store: SettingsStoreConfig,
    pub api: Option<ApiConfig>,
}

impl Config {
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let config: Config = serde_yaml::from_reader(file)?;
        config.validate()?;

        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.settings_store.validate()?;
        if let Some(api) = &self.api {
            api.validate()?;
        }
        Ok(())
    }

    pub fn log_level(&self) -> &str {
        self.common
            .logging
            .as_ref()
            .map_or(DEFAULT_LOG_LEVEL, |logging| logging.level.as_str())
    }

    pub fn sentry_dsn(&self) -> Option<&str> {
        self.common
            .logging
            .as_ref()
            .and_then(|logging| logging.sentry_dsn.as_deref())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    LoadError(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
    #[error("invalid settings store config: {0}")]
    SettingsStore(#[from] settings_store::config::ValidationError),
    #[error("invalid api config: {0}")]
    Api(#[from] gallery_api::config::ValidationError),
}
