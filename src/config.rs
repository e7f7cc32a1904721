//! Collector configuration.
//!
//! Loaded from an optional `telemetry-collector.{toml,yaml,json}` file in the
//! working directory, overridden by `TELEMETRY_COLLECTOR__*` environment
//! variables (`__` separates nested keys):
//!
//! ```text
//! TELEMETRY_COLLECTOR__ENV_TYPE=production
//! TELEMETRY_COLLECTOR__FOUNDATION_NICKNAME=east
//! TELEMETRY_COLLECTOR__OPSMANAGER__URL=https://opsman.example.com
//! TELEMETRY_COLLECTOR__OPSMANAGER__CLIENT_ID=telemetry
//! TELEMETRY_COLLECTOR__OPSMANAGER__CLIENT_SECRET=...
//! ```
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

pub const ENV_PREFIX: &str = "TELEMETRY_COLLECTOR";
pub const CONFIG_FILE_STEM: &str = "telemetry-collector";

/// Environment labels accepted for `env_type`.
pub const ENV_TYPES: [&str; 4] = ["development", "qa", "pre-production", "production"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid env_type {0:?}: expected one of development, qa, pre-production, production")]
    InvalidEnvType(String),

    #[error("missing required setting: {0}")]
    Missing(&'static str),

    #[error("invalid URL for {field}: {source}")]
    InvalidUrl {
        field: &'static str,
        #[source]
        source: url::ParseError,
    },

    #[error("request_timeout_secs must be greater than zero")]
    ZeroTimeout,

    #[error("failed to read .env file: {0}")]
    DotEnv(#[source] dotenvy::Error),
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct OpsManagerConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
}

impl OpsManagerConfig {
    /// Ops Manager serves its UAA under `/uaa`.
    pub fn uaa_url(&self) -> String {
        format!("{}/uaa", self.url.trim_end_matches('/'))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CredhubConfig {
    pub url: String,
    pub uaa_url: String,
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UsageConfig {
    pub cf_api_url: String,
    pub usage_service_url: String,
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CollectorConfig {
    #[serde(default)]
    pub env_type: String,

    #[serde(default)]
    pub foundation_nickname: String,

    /// Directory the archive is written into.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Withhold the Ops Manager manifest.
    #[serde(default)]
    pub operational_data_only: bool,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_json: bool,

    #[serde(default)]
    pub insecure_skip_tls_verify: bool,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub opsmanager: OpsManagerConfig,

    #[serde(default)]
    pub credhub: Option<CredhubConfig>,

    #[serde(default)]
    pub usage: Option<UsageConfig>,

    #[serde(default = "default_true")]
    pub collect_core_consumption: bool,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            env_type: String::new(),
            foundation_nickname: String::new(),
            output_dir: default_output_dir(),
            operational_data_only: false,
            log_level: default_log_level(),
            log_json: false,
            insecure_skip_tls_verify: false,
            request_timeout_secs: default_request_timeout_secs(),
            opsmanager: OpsManagerConfig::default(),
            credhub: None,
            usage: None,
            collect_core_consumption: default_true(),
        }
    }
}

impl CollectorConfig {
    /// Load from `.env`, the optional config file, and the environment.
    pub fn load() -> Result<Self, ConfigError> {
        accept_dotenv(dotenvy::dotenv().map(|_| ()))?;

        let builder = config::Config::builder()
            .add_source(config::File::with_name(CONFIG_FILE_STEM).required(false))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"));

        let config: CollectorConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !ENV_TYPES.contains(&self.env_type.as_str()) {
            return Err(ConfigError::InvalidEnvType(self.env_type.clone()));
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout);
        }

        require_url("opsmanager.url", &self.opsmanager.url)?;
        require("opsmanager.client_id", &self.opsmanager.client_id)?;
        require("opsmanager.client_secret", &self.opsmanager.client_secret)?;

        if let Some(credhub) = &self.credhub {
            require_url("credhub.url", &credhub.url)?;
            require_url("credhub.uaa_url", &credhub.uaa_url)?;
            require("credhub.client_id", &credhub.client_id)?;
            require("credhub.client_secret", &credhub.client_secret)?;
        }

        if let Some(usage) = &self.usage {
            require_url("usage.cf_api_url", &usage.cf_api_url)?;
            require_url("usage.usage_service_url", &usage.usage_service_url)?;
            require("usage.client_id", &usage.client_id)?;
            require("usage.client_secret", &usage.client_secret)?;
        }

        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Version stamped into every manifest.
    pub fn collector_version(&self) -> &'static str {
        env!("CARGO_PKG_VERSION")
    }
}

/// A missing `.env` is normal; any other failure to read it is not.
fn accept_dotenv(result: Result<(), dotenvy::Error>) -> Result<(), ConfigError> {
    match result {
        Ok(()) => Ok(()),
        Err(dotenvy::Error::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(ConfigError::DotEnv(err)),
    }
}

fn require(field: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::Missing(field));
    }
    Ok(())
}

fn require_url(field: &'static str, value: &str) -> Result<(), ConfigError> {
    require(field, value)?;
    Url::parse(value).map_err(|source| ConfigError::InvalidUrl { field, source })?;
    Ok(())
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}
