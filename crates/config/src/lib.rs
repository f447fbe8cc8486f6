//! Environment-resolved settings for the worker process (§4.1, §6).
//!
//! There is no config file in scope here — every value comes from an environment
//! variable, with a documented default and a graceful, logged fallback for
//! malformed numeric values.

pub const ENV_AGENT_URL: &str = "EASE_AGENT_URL";
pub const ENV_HEARTBEAT_INTERVAL: &str = "EASE_HEARTBEAT_INTERVAL";
pub const ENV_LOG_LEVEL: &str = "EASE_LOG_LEVEL";
pub const ENV_TEST_MODE: &str = "EASE_TEST_MODE";
pub const ENV_TEST_PORT: &str = "EASE_TEST_PORT";

const DEFAULT_AGENT_URL: &str = "http://localhost:8087";
const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 5;
const DEFAULT_LOG_LEVEL: &str = "INFO";
const DEFAULT_TEST_PORT: u16 = 8080;

const TRUTHY_VALUES: [&str; 5] = ["True", "true", "1", "yes", "y"];

/// Resolved worker settings. Built once at process start and threaded through to
/// every component that needs it rather than read from a global (§9).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub agent_url: String,
    pub heartbeat_interval_secs: u64,
    pub log_level: String,
    pub test_mode: bool,
    pub test_port: u16,
}

impl Settings {
    /// Resolves every field from the environment, applying documented defaults and
    /// logging a warning for any value that fails to parse.
    pub fn from_env() -> Self {
        Settings {
            agent_url: std::env::var(ENV_AGENT_URL).unwrap_or_else(|_| DEFAULT_AGENT_URL.to_string()),
            heartbeat_interval_secs: parse_env_u64(
                ENV_HEARTBEAT_INTERVAL,
                DEFAULT_HEARTBEAT_INTERVAL_SECS,
            ),
            log_level: std::env::var(ENV_LOG_LEVEL).unwrap_or_else(|_| DEFAULT_LOG_LEVEL.to_string()),
            test_mode: std::env::var(ENV_TEST_MODE)
                .map(|v| TRUTHY_VALUES.contains(&v.as_str()))
                .unwrap_or(false),
            test_port: parse_env_u16(ENV_TEST_PORT, DEFAULT_TEST_PORT),
        }
    }
}

fn parse_env_u64(key: &str, default: u64) -> u64 {
    match std::env::var(key) {
        Ok(raw) => match raw.parse::<u64>() {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!(env = key, value = raw, default, "failed to parse integer env var, using default");
                default
            }
        },
        Err(_) => default,
    }
}

fn parse_env_u16(key: &str, default: u16) -> u16 {
    match std::env::var(key) {
        Ok(raw) => match raw.parse::<u16>() {
            Ok(v) => v,
            Err(_) => {
                tracing::warn!(env = key, value = raw, default, "failed to parse integer env var, using default");
                default
            }
        },
        Err(_) => default,
    }
}
