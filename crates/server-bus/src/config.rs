//! Bus configuration.
//!
//! Read once when the bus is built. Values come from defaults, the process
//! environment, or a property map handed over by an external configurator.

use std::collections::HashMap;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Default capacity of a message queue.
pub const DEFAULT_QUEUE_SIZE: usize = 250;

/// Property key for the queue size.
pub const PROP_QUEUE_SIZE: &str = "bus.queuesize";
/// Property key enabling/disabling long polling.
pub const PROP_LONG_POLL: &str = "bus.do_long_poll";
/// Property key for hosted-mode testing.
pub const PROP_HOSTED_MODE_TESTING: &str = "bus.hosted_mode_testing";

/// Configuration errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A value could not be parsed.
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: String, value: String },

    /// Queues must hold at least one message.
    #[error("queue size must be greater than zero")]
    ZeroQueueSize,

    /// The housekeeper needs a non-zero period.
    #[error("housekeeping interval must be greater than zero")]
    ZeroHousekeepingInterval,
}

/// Fixed-delay bounded retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay before each retry.
    pub interval: Duration,
    /// Retries scheduled before the terminal failure is raised.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(250),
            max_attempts: 3,
        }
    }
}

impl RetryPolicy {
    /// Fail on the first miss.
    #[must_use]
    pub fn fail_fast() -> Self {
        Self {
            interval: Duration::ZERO,
            max_attempts: 0,
        }
    }
}

/// Complete bus configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusConfig {
    /// Capacity of every message queue.
    pub queue_size: usize,
    /// Inactivity after which a queue is stale.
    pub stale_window: Duration,
    /// Housekeeper period.
    pub housekeeping_interval: Duration,
    /// Retry policy for ordinary messages.
    pub retry: RetryPolicy,
    /// Retry policy for messages carrying the priority part.
    pub priority_retry: RetryPolicy,
    /// Whether long polling is offered to peers.
    pub long_polling: bool,
    /// Hosted-mode testing; disables long polling and shortens polling.
    pub hosted_mode_testing: bool,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            queue_size: DEFAULT_QUEUE_SIZE,
            stale_window: Duration::from_secs(30),
            housekeeping_interval: Duration::from_secs(10),
            retry: RetryPolicy::default(),
            priority_retry: RetryPolicy::default(),
            long_polling: true,
            hosted_mode_testing: false,
        }
    }
}

impl BusConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `COURIER_QUEUE_SIZE`: queue capacity (default: 250)
    /// - `COURIER_LONG_POLL`: offer long polling (default: true)
    /// - `COURIER_HOSTED_MODE_TESTING`: hosted-mode testing (default: false)
    /// - `COURIER_STALE_WINDOW_SECS`: stale window (default: 30)
    /// - `COURIER_HOUSEKEEPING_SECS`: housekeeper period (default: 10)
    /// - `COURIER_RETRY_INTERVAL_MS`: retry delay (default: 250)
    /// - `COURIER_RETRY_MAX_ATTEMPTS`: retry bound (default: 3)
    /// - `COURIER_PRIORITY_RETRY_INTERVAL_MS`: retry delay for priority
    ///   messages (default: 250)
    /// - `COURIER_PRIORITY_RETRY_MAX_ATTEMPTS`: retry bound for priority
    ///   messages (default: 3)
    ///
    /// # Errors
    ///
    /// `ConfigError::InvalidValue` for unparsable numbers,
    /// `ConfigError::ZeroQueueSize` for a zero queue size.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary variable source.
    ///
    /// # Errors
    ///
    /// See [`from_env`](Self::from_env).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(size) = parse_var(&lookup, "COURIER_QUEUE_SIZE")? {
            config.queue_size = size;
        }
        if let Some(secs) = parse_var(&lookup, "COURIER_STALE_WINDOW_SECS")? {
            config.stale_window = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var(&lookup, "COURIER_HOUSEKEEPING_SECS")? {
            config.housekeeping_interval = Duration::from_secs(secs);
        }
        if let Some(ms) = parse_var(&lookup, "COURIER_RETRY_INTERVAL_MS")? {
            config.retry.interval = Duration::from_millis(ms);
        }
        if let Some(attempts) = parse_var(&lookup, "COURIER_RETRY_MAX_ATTEMPTS")? {
            config.retry.max_attempts = attempts;
        }
        if let Some(ms) = parse_var(&lookup, "COURIER_PRIORITY_RETRY_INTERVAL_MS")? {
            config.priority_retry.interval = Duration::from_millis(ms);
        }
        if let Some(attempts) = parse_var(&lookup, "COURIER_PRIORITY_RETRY_MAX_ATTEMPTS")? {
            config.priority_retry.max_attempts = attempts;
        }

        config.hosted_mode_testing = lookup("COURIER_HOSTED_MODE_TESTING")
            .is_some_and(|v| is_truthy(&v));
        let long_poll = lookup("COURIER_LONG_POLL").map_or(true, |v| !is_falsy(&v));
        config.long_polling = long_poll && !config.hosted_mode_testing;

        config.validate()?;
        Ok(config)
    }

    /// Apply a configurator's property map on top of the defaults.
    ///
    /// # Errors
    ///
    /// `ConfigError::InvalidValue` if `bus.queuesize` is not a number,
    /// `ConfigError::ZeroQueueSize` if it is zero.
    pub fn from_properties(properties: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(raw) = properties.get(PROP_QUEUE_SIZE) {
            config.queue_size = raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: PROP_QUEUE_SIZE.to_string(),
                value: raw.clone(),
            })?;
        }

        config.hosted_mode_testing = properties
            .get(PROP_HOSTED_MODE_TESTING)
            .is_some_and(|v| is_truthy(v));
        let long_poll = properties
            .get(PROP_LONG_POLL)
            .map_or(true, |v| !is_falsy(v));
        config.long_polling = long_poll && !config.hosted_mode_testing;

        config.validate()?;
        Ok(config)
    }

    /// Check invariants.
    ///
    /// # Errors
    ///
    /// `ConfigError::ZeroQueueSize` for a zero queue size,
    /// `ConfigError::ZeroHousekeepingInterval` for a zero housekeeper period.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_size == 0 {
            return Err(ConfigError::ZeroQueueSize);
        }
        if self.housekeeping_interval.is_zero() {
            return Err(ConfigError::ZeroHousekeepingInterval);
        }
        Ok(())
    }

    /// Poll interval advertised when long polling is off.
    #[must_use]
    pub fn poll_frequency(&self) -> Duration {
        if self.hosted_mode_testing {
            Duration::from_millis(50)
        } else {
            Duration::from_millis(250)
        }
    }

    /// Retry policy that applies to a message.
    #[must_use]
    pub fn retry_policy_for(&self, priority: bool) -> RetryPolicy {
        if priority {
            self.priority_retry
        } else {
            self.retry
        }
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, ConfigError> {
    lookup(key)
        .map(|raw| {
            raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value: raw.clone(),
            })
        })
        .transpose()
}

fn is_truthy(v: &str) -> bool {
    v.eq_ignore_ascii_case("true") || v == "1"
}

fn is_falsy(v: &str) -> bool {
    v.eq_ignore_ascii_case("false") || v == "0"
}
