use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use runservice_client::RunServiceClientConfig;
use thiserror::Error;

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8000";
const DEFAULT_LOG_FILTER: &str = "info";
const DEFAULT_RUNSERVICE_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_RUNSERVICE_REQUEST_ATTEMPTS: usize = 2;

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub log_filter: String,
    pub log_json: bool,
    pub runservice_url: String,
    pub runservice_timeout_ms: u64,
    pub runservice_request_attempts: usize,
    pub authz_policy_path: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid GATEWAY_BIND_ADDR value '{value}': {source}")]
    InvalidBindAddr {
        value: String,
        source: std::net::AddrParseError,
    },
    #[error("GATEWAY_RUNSERVICE_URL is required")]
    MissingRunServiceUrl,
    #[error("invalid {name} value '{value}'")]
    InvalidNumber { name: &'static str, value: String },
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from an arbitrary variable source. Blank values
    /// count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let bind_addr_raw =
            read("GATEWAY_BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_addr = bind_addr_raw
            .parse()
            .map_err(|source| ConfigError::InvalidBindAddr {
                value: bind_addr_raw,
                source,
            })?;

        let log_filter =
            read("GATEWAY_LOG_FILTER").unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());

        let log_json = read("GATEWAY_LOG_JSON")
            .map(|value| matches!(value.to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        let runservice_url =
            read("GATEWAY_RUNSERVICE_URL").ok_or(ConfigError::MissingRunServiceUrl)?;

        let runservice_timeout_ms = match read("GATEWAY_RUNSERVICE_TIMEOUT_MS") {
            Some(value) => value.parse().map_err(|_| ConfigError::InvalidNumber {
                name: "GATEWAY_RUNSERVICE_TIMEOUT_MS",
                value,
            })?,
            None => DEFAULT_RUNSERVICE_TIMEOUT_MS,
        };

        let runservice_request_attempts = match read("GATEWAY_RUNSERVICE_REQUEST_ATTEMPTS") {
            Some(value) => value.parse().map_err(|_| ConfigError::InvalidNumber {
                name: "GATEWAY_RUNSERVICE_REQUEST_ATTEMPTS",
                value,
            })?,
            None => DEFAULT_RUNSERVICE_REQUEST_ATTEMPTS,
        };

        let authz_policy_path = read("GATEWAY_AUTHZ_POLICY_PATH").map(PathBuf::from);

        Ok(Self {
            bind_addr,
            log_filter,
            log_json,
            runservice_url,
            runservice_timeout_ms,
            runservice_request_attempts,
            authz_policy_path,
        })
    }

    #[must_use]
    pub fn runservice_client_config(&self) -> RunServiceClientConfig {
        let mut config = RunServiceClientConfig::new(self.runservice_url.clone());
        config.timeout_ms = self.runservice_timeout_ms;
        config.request_attempts = self.runservice_request_attempts;
        config
    }
}
