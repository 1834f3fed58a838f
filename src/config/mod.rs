//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::util::rate_limit::INBOUND_RATE_LIMIT;
use crate::util::time::{BROADCAST_INTERVAL_MS, REAPER_INTERVAL_MS, STALE_TIMEOUT_MS};

/// Default listening port
pub const DEFAULT_PORT: u16 = 3001;

/// Default proximity radius, in the same units as player positions (meters)
pub const DEFAULT_VISIBILITY_RADIUS: f64 = 500.0;

/// Default outbound queue depth per connection
pub const DEFAULT_OUTBOUND_BUFFER: usize = 64;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Emit JSON log lines instead of the human format
    pub log_json: bool,

    /// Certificate chain used when serving wss://
    pub tls_cert_path: PathBuf,
    /// Private key matching `tls_cert_path`
    pub tls_key_path: PathBuf,

    /// Allowed client origins for CORS (None = permissive)
    pub client_origin: Option<String>,

    /// Relay tuning
    pub relay: RelayConfig,
}

/// Relay tuning values. Both client and server assume these out of band.
#[derive(Clone, Debug, PartialEq)]
pub struct RelayConfig {
    pub visibility_radius: f64,
    pub broadcast_interval: Duration,
    pub stale_timeout: Duration,
    pub reaper_interval: Duration,
    pub max_messages_per_second: u32,
    pub outbound_buffer: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            visibility_radius: DEFAULT_VISIBILITY_RADIUS,
            broadcast_interval: Duration::from_millis(BROADCAST_INTERVAL_MS),
            stale_timeout: Duration::from_millis(STALE_TIMEOUT_MS),
            reaper_interval: Duration::from_millis(REAPER_INTERVAL_MS),
            max_messages_per_second: INBOUND_RATE_LIMIT,
            outbound_buffer: DEFAULT_OUTBOUND_BUFFER,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // PORT wins, fall back to SERVER_ADDR or the default port
        let server_addr = if let Some(port) = lookup("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            lookup("SERVER_ADDR").unwrap_or_else(|| format!("0.0.0.0:{}", DEFAULT_PORT))
        };

        let log_json = match lookup("LOG_FORMAT").as_deref() {
            None | Some("pretty") => false,
            Some("json") => true,
            Some(_) => return Err(ConfigError::Invalid("LOG_FORMAT")),
        };

        let defaults = RelayConfig::default();
        let relay = RelayConfig {
            visibility_radius: parse_positive_f64(&lookup, "VISIBILITY_RADIUS")?
                .unwrap_or(defaults.visibility_radius),
            broadcast_interval: parse_millis(&lookup, "BROADCAST_INTERVAL_MS")?
                .unwrap_or(defaults.broadcast_interval),
            stale_timeout: parse_millis(&lookup, "STALE_TIMEOUT_MS")?
                .unwrap_or(defaults.stale_timeout),
            reaper_interval: parse_millis(&lookup, "REAPER_INTERVAL_MS")?
                .unwrap_or(defaults.reaper_interval),
            max_messages_per_second: parse_positive::<u32, _>(&lookup, "MAX_MESSAGES_PER_SECOND")?
                .unwrap_or(defaults.max_messages_per_second),
            outbound_buffer: parse_positive::<usize, _>(&lookup, "OUTBOUND_BUFFER")?
                .unwrap_or(defaults.outbound_buffer),
        };

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            log_json,

            tls_cert_path: lookup("TLS_CERT_PATH")
                .unwrap_or_else(|| "cert.pem".to_string())
                .into(),
            tls_key_path: lookup("TLS_KEY_PATH")
                .unwrap_or_else(|| "key.pem".to_string())
                .into(),

            client_origin: lookup("CLIENT_ORIGIN").filter(|s| !s.trim().is_empty()),

            relay,
        })
    }
}

fn parse_positive<T, F>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr + PartialOrd + Default,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => match raw.trim().parse::<T>() {
            Ok(value) if value > T::default() => Ok(Some(value)),
            _ => Err(ConfigError::Invalid(key)),
        },
    }
}

fn parse_positive_f64<F>(lookup: &F, key: &'static str) -> Result<Option<f64>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match parse_positive::<f64, _>(lookup, key)? {
        Some(value) if !value.is_finite() => Err(ConfigError::Invalid(key)),
        other => Ok(other),
    }
}

fn parse_millis<F>(lookup: &F, key: &'static str) -> Result<Option<Duration>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    Ok(parse_positive::<u64, _>(lookup, key)?.map(Duration::from_millis))
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}
