//! Gateway configuration loaded from environment variables.
//!
//! All settings come from environment variables (or a `.env` file via
//! `dotenvy`). Invalid numbers fall back to their defaults; only an
//! unparsable `LISTEN_ADDR` is an error.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::bridge::BridgeSettings;
use crate::domain::TimestampPrecision;
use crate::service::{ConnectionSettings, RetryPolicy};
use crate::sink::SinkKind;

/// Log line format of the binary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

/// Top-level gateway configuration.
///
/// Loaded once at startup via [`GatewayConfig::from_env`].
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Socket address to bind the HTTP server to (e.g. `0.0.0.0:8001`).
    pub listen_addr: SocketAddr,

    /// Connect attempt budget.
    pub connect_max_attempts: u32,

    /// First backoff delay in milliseconds.
    pub connect_backoff_base_ms: u64,

    /// Backoff cap in milliseconds.
    pub connect_backoff_max_ms: u64,

    /// Whether to make one failover attempt after the budget is spent.
    pub connect_failover: bool,

    /// Application name in the session identity.
    pub client_application_name: String,

    /// Publishing interval of event subscriptions in milliseconds.
    pub subscription_publishing_interval_ms: u64,

    /// Server-side queue size per event subscription.
    pub subscription_queue_size: u32,

    /// Settle delay before disconnect in milliseconds.
    pub terminate_grace_ms: u64,

    /// Disconnect bound in milliseconds.
    pub disconnect_timeout_ms: u64,

    /// Bound on one session clock read in milliseconds.
    pub session_clock_timeout_ms: u64,

    /// Per-bridge ring capacity.
    pub bridge_queue_capacity: usize,

    /// Where events go.
    pub event_sink: SinkKind,

    /// Directory of the durable file adapter.
    pub result_log_dir: PathBuf,

    /// Directory of the settings and connection-point documents.
    pub resources_dir: PathBuf,

    /// Fractional digits of diagnostic timestamps.
    pub log_timestamp_precision: TimestampPrecision,

    /// Log line format.
    pub log_format: LogFormat,

    /// Auto-emission interval of the simulated controller in
    /// milliseconds; `0` disables it.
    pub simulation_event_interval_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8001)),
            connect_max_attempts: 3,
            connect_backoff_base_ms: 2_000,
            connect_backoff_max_ms: 30_000,
            connect_failover: false,
            client_application_name: "IJT:WebClient".to_string(),
            subscription_publishing_interval_ms: 100,
            subscription_queue_size: 200,
            terminate_grace_ms: 500,
            disconnect_timeout_ms: 2_000,
            session_clock_timeout_ms: 1_000,
            bridge_queue_capacity: 1_024,
            event_sink: SinkKind::Stream,
            result_log_dir: PathBuf::from("result_logs"),
            resources_dir: PathBuf::from("Resources"),
            log_timestamp_precision: TimestampPrecision::Millis,
            log_format: LogFormat::Text,
            simulation_event_interval_ms: 0,
        }
    }
}

impl GatewayConfig {
    /// Loads configuration from environment variables.
    ///
    /// Falls back to the [`Default`] values when a variable is not set.
    /// Calls `dotenvy::dotenv().ok()` to optionally load a `.env` file.
    ///
    /// # Errors
    ///
    /// Returns an error if `LISTEN_ADDR` is set but cannot be parsed as
    /// a [`SocketAddr`].
    pub fn from_env() -> Result<Self, std::net::AddrParseError> {
        dotenvy::dotenv().ok();
        let d = Self::default();

        let listen_addr = match std::env::var("LISTEN_ADDR") {
            Ok(addr) => addr.parse()?,
            Err(_) => d.listen_addr,
        };

        Ok(Self {
            listen_addr,
            connect_max_attempts: parse_env("CONNECT_MAX_ATTEMPTS", d.connect_max_attempts),
            connect_backoff_base_ms: parse_env("CONNECT_BACKOFF_BASE_MS", d.connect_backoff_base_ms),
            connect_backoff_max_ms: parse_env("CONNECT_BACKOFF_MAX_MS", d.connect_backoff_max_ms),
            connect_failover: parse_env_bool("CONNECT_FAILOVER", d.connect_failover),
            client_application_name: std::env::var("CLIENT_APPLICATION_NAME")
                .unwrap_or(d.client_application_name),
            subscription_publishing_interval_ms: parse_env(
                "SUBSCRIPTION_PUBLISHING_INTERVAL_MS",
                d.subscription_publishing_interval_ms,
            ),
            subscription_queue_size: parse_env("SUBSCRIPTION_QUEUE_SIZE", d.subscription_queue_size),
            terminate_grace_ms: parse_env("TERMINATE_GRACE_MS", d.terminate_grace_ms),
            disconnect_timeout_ms: parse_env("DISCONNECT_TIMEOUT_MS", d.disconnect_timeout_ms),
            session_clock_timeout_ms: parse_env(
                "SESSION_CLOCK_TIMEOUT_MS",
                d.session_clock_timeout_ms,
            ),
            bridge_queue_capacity: parse_env("BRIDGE_QUEUE_CAPACITY", d.bridge_queue_capacity),
            event_sink: parse_env("EVENT_SINK", d.event_sink),
            result_log_dir: parse_env("RESULT_LOG_DIR", d.result_log_dir),
            resources_dir: parse_env("RESOURCES_DIR", d.resources_dir),
            log_timestamp_precision: parse_env(
                "LOG_TIMESTAMP_PRECISION",
                d.log_timestamp_precision,
            ),
            log_format: parse_env("LOG_FORMAT", d.log_format),
            simulation_event_interval_ms: parse_env(
                "SIMULATION_EVENT_INTERVAL_MS",
                d.simulation_event_interval_ms,
            ),
        })
    }

    /// Per-connection settings derived from this configuration.
    #[must_use]
    pub fn connection_settings(&self) -> ConnectionSettings {
        ConnectionSettings {
            retry: RetryPolicy {
                max_attempts: self.connect_max_attempts,
                base_delay: Duration::from_millis(self.connect_backoff_base_ms),
                max_delay: Duration::from_millis(self.connect_backoff_max_ms),
                failover: self.connect_failover,
            },
            application_name: self.client_application_name.clone(),
            publishing_interval: Duration::from_millis(self.subscription_publishing_interval_ms),
            queue_size: self.subscription_queue_size,
            terminate_grace: Duration::from_millis(self.terminate_grace_ms),
            disconnect_timeout: Duration::from_millis(self.disconnect_timeout_ms),
            bridge: BridgeSettings {
                capacity: self.bridge_queue_capacity,
                precision: self.log_timestamp_precision,
                clock_timeout: Duration::from_millis(self.session_clock_timeout_ms),
            },
        }
    }

    /// Auto-emission interval of the simulated controller, if enabled.
    #[must_use]
    pub fn simulation_interval(&self) -> Option<Duration> {
        (self.simulation_event_interval_ms > 0)
            .then(|| Duration::from_millis(self.simulation_event_interval_ms))
    }
}

/// Parses an environment variable as `T`, returning `default` on missing
/// or invalid values.
fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    parse_value(std::env::var(key).ok().as_deref(), default)
}

fn parse_value<T: std::str::FromStr>(raw: Option<&str>, default: T) -> T {
    raw.and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

/// Parses an environment variable as a boolean. Accepts `"true"`, `"1"`,
/// `"false"`, `"0"` (case-insensitive). Returns `default` otherwise.
fn parse_env_bool(key: &str, default: bool) -> bool {
    parse_bool(std::env::var(key).ok().as_deref(), default)
}

fn parse_bool(raw: Option<&str>, default: bool) -> bool {
    match raw.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
        Some("true" | "1") => true,
        Some("false" | "0") => false,
        _ => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_numbers_fall_back() {
        assert_eq!(parse_value(Some("12"), 3u32), 12);
        assert_eq!(parse_value(Some(" 12 "), 3u32), 12);
        assert_eq!(parse_value(Some("twelve"), 3u32), 3);
        assert_eq!(parse_value::<u32>(None, 3), 3);
        assert_eq!(parse_value(Some("file"), SinkKind::Stream), SinkKind::File);
        assert_eq!(parse_value(Some("us"), TimestampPrecision::Millis), TimestampPrecision::Micros);
    }

    #[test]
    fn booleans_accept_common_spellings() {
        assert!(parse_bool(Some("TRUE"), false));
        assert!(parse_bool(Some("1"), false));
        assert!(!parse_bool(Some("False"), true));
        assert!(parse_bool(Some("yes"), true));
    }

    #[test]
    fn connection_settings_follow_config() {
        let config = GatewayConfig {
            connect_max_attempts: 5,
            connect_backoff_base_ms: 100,
            connect_failover: true,
            bridge_queue_capacity: 8,
            ..GatewayConfig::default()
        };
        let settings = config.connection_settings();
        assert_eq!(settings.retry.total_attempts(), 6);
        assert_eq!(settings.retry.delay_after(2), Duration::from_millis(200));
        assert_eq!(settings.bridge.capacity, 8);
        assert_eq!(settings.application_name, "IJT:WebClient");
        assert_eq!(config.simulation_interval(), None);
    }
}
