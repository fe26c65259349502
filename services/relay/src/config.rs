use gemini_realtime::{DEFAULT_ENDPOINT, DEFAULT_MODEL, LiveEndpoint};
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Longest accepted reconnect delay, in milliseconds (one hour).
pub const MAX_RECONNECT_DELAY_MS: u64 = 60 * 60 * 1000;

/// Bounds on lazy upstream reconnection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectSettings {
    /// Consecutive failed reconnects tolerated before the session ends.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(8),
        }
    }
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub gemini_api_key: String,
    pub gemini_model: String,
    pub gemini_ws_url: String,
    pub log_level: Level,
    pub reconnect: ReconnectSettings,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address_str =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8000".to_string());
        let bind_address = bind_address_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string()))?;

        let gemini_api_key = std::env::var("GEMINI_API_KEY")
            .map_err(|_| ConfigError::MissingVar("GEMINI_API_KEY".to_string()))?;
        let gemini_model =
            std::env::var("GEMINI_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        let gemini_ws_url =
            std::env::var("GEMINI_WS_URL").unwrap_or_else(|_| DEFAULT_ENDPOINT.to_string());

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let defaults = ReconnectSettings::default();
        let reconnect = ReconnectSettings {
            max_attempts: env_or("RECONNECT_MAX_ATTEMPTS", defaults.max_attempts)?,
            base_delay: delay_ms("RECONNECT_BASE_DELAY_MS", defaults.base_delay)?,
            max_delay: delay_ms("RECONNECT_MAX_DELAY_MS", defaults.max_delay)?,
        };

        Ok(Self {
            bind_address,
            gemini_api_key,
            gemini_model,
            gemini_ws_url,
            log_level,
            reconnect,
        })
    }

    /// The upstream endpoint new sessions connect to.
    pub fn live_endpoint(&self) -> LiveEndpoint {
        LiveEndpoint {
            url: self.gemini_ws_url.clone(),
            api_key: self.gemini_api_key.clone(),
            model: self.gemini_model.clone(),
        }
    }
}

fn env_or<T>(var: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(var) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(var.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}

fn delay_ms(var: &str, default: Duration) -> Result<Duration, ConfigError> {
    let millis = env_or(var, default.as_millis() as u64)?;
    if millis > MAX_RECONNECT_DELAY_MS {
        return Err(ConfigError::InvalidValue(
            var.to_string(),
            format!("{millis} exceeds the {MAX_RECONNECT_DELAY_MS} ms limit"),
        ));
    }
    Ok(Duration::from_millis(millis))
}
