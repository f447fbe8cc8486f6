use std::sync::Arc;

use ease_core::{ConcurrencyModifier, ConfigError};
use ease_handler::Handler;
use ease_proxy::CheckStartFn;
use url::Url;

/// The two mutually exclusive operating modes selected at startup (§4.9).
pub enum HandlersConfig {
    Handler {
        handler: Arc<Handler>,
        concurrency_modifier: Option<ConcurrencyModifier>,
    },
    Proxy {
        base_url: Url,
        check_start: CheckStartFn,
    },
}

impl HandlersConfig {
    pub fn handler(handler: Arc<Handler>, concurrency_modifier: Option<ConcurrencyModifier>) -> Self {
        HandlersConfig::Handler {
            handler,
            concurrency_modifier,
        }
    }

    pub fn proxy(base_url: Url, check_start: CheckStartFn) -> Self {
        HandlersConfig::Proxy {
            base_url,
            check_start,
        }
    }

    /// Validates a config assembled from optional, dynamically-resolved pieces
    /// (e.g. CLI flag parsing), producing the exact §7 category-1 error.
    pub fn try_handler(
        handler: Option<Arc<Handler>>,
        concurrency_modifier: Option<ConcurrencyModifier>,
    ) -> Result<Self, ConfigError> {
        let handler = handler.ok_or(ConfigError::MissingHandler)?;
        Ok(HandlersConfig::Handler {
            handler,
            concurrency_modifier,
        })
    }

    pub fn try_proxy(
        base_url: Option<Url>,
        check_start: Option<CheckStartFn>,
    ) -> Result<Self, ConfigError> {
        let base_url = base_url.ok_or_else(|| ConfigError::InvalidProxyBaseUrl(String::new()))?;
        let check_start = check_start.ok_or(ConfigError::MissingCheckStart)?;
        Ok(HandlersConfig::Proxy {
            base_url,
            check_start,
        })
    }

    /// Proxy mode requires a non-empty scheme and host; proxy mode is mutually
    /// exclusive with test mode (§4.9, §4.10).
    pub fn validate(&self, test_mode: bool) -> Result<(), ConfigError> {
        match self {
            HandlersConfig::Handler { .. } => Ok(()),
            HandlersConfig::Proxy { base_url, .. } => {
                if test_mode {
                    return Err(ConfigError::TestModeUnsupportedForProxy);
                }
                if base_url.scheme().is_empty() || base_url.host_str().is_none() {
                    return Err(ConfigError::InvalidProxyBaseUrl(base_url.to_string()));
                }
                Ok(())
            }
        }
    }
}

/// Everything `run` needs to start the loop, heartbeat, and agent client.
pub struct WorkerConfig {
    pub agent_url: String,
    pub heartbeat_interval_secs: u64,
    pub handlers: HandlersConfig,
    pub test_mode: bool,
}
