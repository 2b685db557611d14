//! Gateway configuration management.
//!
//! Consolidates all environment variable reads and provides validated configuration.

use crate::logging::LogFormat;
use std::{fmt, net::SocketAddr, path::PathBuf, str::FromStr, sync::Arc, time::Duration};
use valkyrie::{
    Lifecycle,
    pam::{BackendArgs, HttpCall},
    pipeline::Pipeline,
    plugin::DataWarehouseConfig,
};

const DEFAULT_BACKEND: &str = "generic";
const DEFAULT_CALL_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 10;

/// Values given on the command line. They win over the environment.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub backend: Option<String>,
    pub pam_url: Option<String>,
    pub plugin_path: Option<PathBuf>,
    pub metrics_bind: Option<SocketAddr>,
}

/// Complete gateway configuration loaded from environment variables
#[derive(Clone)]
pub struct GatewayConfig {
    /// Registry key of the PAM backend
    pub backend: String,
    pub pam_url: String,
    pub api_key: String,
    pub call_timeout: Duration,
    pub plugin_name: String,
    /// Required when the backend is `plugin`
    pub plugin_path: Option<PathBuf>,
    /// Reporting database handed to plugins
    pub warehouse: Option<DataWarehouseConfig>,
    pub shutdown_timeout: Duration,
    /// Prometheus exporter address; no exporter when unset
    pub metrics_bind: Option<SocketAddr>,
    pub log_format: LogFormat,
}

impl GatewayConfig {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns error if required variables are missing or invalid
    pub fn from_env(overrides: CliOverrides) -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok(), overrides)
    }

    /// Load configuration through `lookup`, which returns the value of a
    /// variable if it is set.
    pub fn from_lookup<F>(lookup: F, overrides: CliOverrides) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let required = |key: &str, hint: &str| {
            var(key).ok_or_else(|| ConfigError::MissingRequired {
                var: key.to_string(),
                hint: hint.to_string(),
            })
        };

        let backend = overrides
            .backend
            .or_else(|| var("PAM_BACKEND"))
            .unwrap_or_else(|| DEFAULT_BACKEND.to_string());
        let pam_url = match overrides.pam_url {
            Some(url) => url,
            None => required("PAM_URL", "Base url of the operator's PAM, e.g. https://pam.example.com/api")?,
        };
        let api_key = required("PAM_API_KEY", "API key issued by the PAM operator")?;

        let call_timeout = Duration::from_millis(parse_or(&var, "PAM_CALL_TIMEOUT_MS", DEFAULT_CALL_TIMEOUT_MS)?);
        let shutdown_timeout =
            Duration::from_secs(parse_or(&var, "SHUTDOWN_TIMEOUT_SECS", DEFAULT_SHUTDOWN_TIMEOUT_SECS)?);

        let metrics_bind = match overrides.metrics_bind {
            Some(addr) => Some(addr),
            None => var("METRICS_BIND").map(|v| parse("METRICS_BIND", &v)).transpose()?,
        };
        let log_format = var("LOG_FORMAT")
            .map(|v| parse("LOG_FORMAT", &v))
            .transpose()?
            .unwrap_or_default();

        let warehouse = match var("DW_URL") {
            Some(url) => Some(DataWarehouseConfig {
                url,
                database: required("DW_DATABASE", "Required when DW_URL is set")?,
                user: required("DW_USER", "Required when DW_URL is set")?,
                password: lookup("DW_PASSWORD").unwrap_or_default(),
            }),
            None => None,
        };

        let config = GatewayConfig {
            backend,
            pam_url,
            api_key,
            call_timeout,
            plugin_name: var("PLUGIN_NAME").unwrap_or_default(),
            plugin_path: overrides.plugin_path.or_else(|| var("PLUGIN_PATH").map(PathBuf::from)),
            warehouse,
            shutdown_timeout,
            metrics_bind,
            log_format,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.call_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                var: "PAM_CALL_TIMEOUT_MS".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }

        if self.shutdown_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                var: "SHUTDOWN_TIMEOUT_SECS".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }

        if self.backend == valkyrie::plugin::client::BACKEND_KEY && self.plugin_path.is_none() {
            return Err(ConfigError::MissingRequired {
                var: "PLUGIN_PATH".to_string(),
                hint: "Path of the plugin executable, required by the plugin backend".to_string(),
            });
        }

        Ok(())
    }

    /// Arguments for the registry constructor of the configured backend.
    pub fn backend_args(&self, lifecycle: Lifecycle, http_pipeline: Arc<Pipeline<HttpCall>>) -> BackendArgs {
        BackendArgs {
            call_timeout: self.call_timeout,
            plugin_path: self.plugin_path.clone(),
            plugin_name: self.plugin_name.clone(),
            warehouse: self.warehouse.clone(),
            http_pipeline,
            ..BackendArgs::new(&self.pam_url, &self.api_key, lifecycle)
        }
    }
}

impl fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("backend", &self.backend)
            .field("pam_url", &self.pam_url)
            .field("api_key", &"<redacted>")
            .field("call_timeout", &self.call_timeout)
            .field("plugin_name", &self.plugin_name)
            .field("plugin_path", &self.plugin_path)
            .field("warehouse", &self.warehouse)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .field("metrics_bind", &self.metrics_bind)
            .field("log_format", &self.log_format)
            .finish()
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {var}\nHint: {hint}")]
    MissingRequired { var: String, hint: String },

    #[error("Invalid configuration for {var}: {reason}")]
    Invalid { var: String, reason: String },
}

fn parse<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        var: key.to_string(),
        reason: format!("{value:?}: {e}"),
    })
}

/// Parse `key` if it is set, else fall back to `default`.
fn parse_or<T, F>(var: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        Some(value) => parse(key, &value),
        None => Ok(default),
    }
}
