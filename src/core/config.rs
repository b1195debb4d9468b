//! Client and server configuration.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use super::constants;
use super::error::ConfigError;
use super::metrics::Reporter;

/// Parameters of the AIMD congestion window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CongestionConfig {
    /// Window on a fresh connection.
    pub initial_window: usize,
    /// Lower bound of the window.
    pub min_window: usize,
    /// Upper bound of the window.
    pub max_window: usize,
    /// Weight of a new RTT sample, in `(0, 1]`.
    pub rtt_factor: f64,
    /// Multiplicative decrease factor, in `(0, 1)`.
    pub backoff_factor: f64,
}

impl Default for CongestionConfig {
    fn default() -> Self {
        Self {
            initial_window: constants::DEFAULT_INITIAL_WINDOW,
            min_window: constants::DEFAULT_MIN_WINDOW,
            max_window: constants::DEFAULT_MAX_WINDOW,
            rtt_factor: constants::DEFAULT_RTT_FACTOR,
            backoff_factor: constants::DEFAULT_BACKOFF_FACTOR,
        }
    }
}

impl CongestionConfig {
    /// Check the window ordering and factor ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_window == 0 {
            return Err(ConfigError::Invalid("min_window must be at least 1".into()));
        }
        if !(self.min_window <= self.initial_window && self.initial_window <= self.max_window) {
            return Err(ConfigError::Invalid(format!(
                "window bounds out of order: min {} <= initial {} <= max {} does not hold",
                self.min_window, self.initial_window, self.max_window
            )));
        }
        if !(self.rtt_factor > 0.0 && self.rtt_factor <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "rtt_factor {} not in (0, 1]",
                self.rtt_factor
            )));
        }
        if !(self.backoff_factor > 0.0 && self.backoff_factor < 1.0) {
            return Err(ConfigError::Invalid(format!(
                "backoff_factor {} not in (0, 1)",
                self.backoff_factor
            )));
        }
        Ok(())
    }
}

/// Retry behaviour of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Additional attempts after the first.
    pub retries: u32,
    /// Pause between attempts.
    pub retry_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retries: constants::DEFAULT_RETRIES,
            retry_delay: constants::DEFAULT_RETRY_DELAY,
        }
    }
}

/// Options shared by [`Client`](crate::client::Client) and
/// [`Server`](crate::server::Server).
#[derive(Clone)]
pub struct Config {
    /// Dial timeout, also bounding each client receive attempt.
    pub timeout: Duration,
    /// Additional attempts after the first.
    pub retries: u32,
    /// Pause between attempts.
    pub retry_delay: Duration,
    /// Congestion window parameters, instantiated per connection.
    pub congestion: CongestionConfig,
    /// Optional cap on frame payloads. `None` accepts any `u32` length.
    pub max_frame_len: Option<u32>,
    /// Called once per client `send` with its outcome.
    pub reporter: Option<Reporter>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timeout: constants::DEFAULT_TIMEOUT,
            retries: constants::DEFAULT_RETRIES,
            retry_delay: constants::DEFAULT_RETRY_DELAY,
            congestion: CongestionConfig::default(),
            max_frame_len: None,
            reporter: None,
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("timeout", &self.timeout)
            .field("retries", &self.retries)
            .field("retry_delay", &self.retry_delay)
            .field("congestion", &self.congestion)
            .field("max_frame_len", &self.max_frame_len)
            .field("reporter", &self.reporter.as_ref().map(|_| "[callback]"))
            .finish()
    }
}

impl Config {
    /// Start building a configuration from the defaults.
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    /// The retry part of this configuration.
    pub fn retry(&self) -> RetryConfig {
        RetryConfig {
            retries: self.retries,
            retry_delay: self.retry_delay,
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout.is_zero() {
            return Err(ConfigError::Invalid("timeout must be non-zero".into()));
        }
        if self.max_frame_len == Some(u32::MAX) {
            return Err(ConfigError::Invalid(format!(
                "max_frame_len must be below {}",
                u32::MAX
            )));
        }
        self.congestion.validate()
    }

    /// Read overrides from the process environment.
    ///
    /// Recognised variables:
    /// - `TCPZAP_TIMEOUT_MS`
    /// - `TCPZAP_RETRIES`
    /// - `TCPZAP_RETRY_DELAY_MS`
    /// - `TCPZAP_INITIAL_WINDOW`, `TCPZAP_MIN_WINDOW`, `TCPZAP_MAX_WINDOW`
    /// - `TCPZAP_MAX_FRAME_LEN`
    ///
    /// Unset variables keep their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable does not parse or the result is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) but with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(ms) = parse_var::<u64, _>(&lookup, "TCPZAP_TIMEOUT_MS")? {
            config.timeout = Duration::from_millis(ms);
        }
        if let Some(retries) = parse_var(&lookup, "TCPZAP_RETRIES")? {
            config.retries = retries;
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "TCPZAP_RETRY_DELAY_MS")? {
            config.retry_delay = Duration::from_millis(ms);
        }
        if let Some(window) = parse_var(&lookup, "TCPZAP_INITIAL_WINDOW")? {
            config.congestion.initial_window = window;
        }
        if let Some(window) = parse_var(&lookup, "TCPZAP_MIN_WINDOW")? {
            config.congestion.min_window = window;
        }
        if let Some(window) = parse_var(&lookup, "TCPZAP_MAX_WINDOW")? {
            config.congestion.max_window = window;
        }
        if let Some(cap) = parse_var(&lookup, "TCPZAP_MAX_FRAME_LEN")? {
            config.max_frame_len = Some(cap);
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::Env {
                key: key.to_string(),
                reason: e.to_string(),
            }),
    }
}

/// Builder for [`Config`].
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a builder holding the default configuration.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    /// Set the dial / receive timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set the number of additional attempts.
    pub fn retries(mut self, retries: u32) -> Self {
        self.config.retries = retries;
        self
    }

    /// Set the pause between attempts.
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.config.retry_delay = delay;
        self
    }

    /// Set the congestion window parameters.
    pub fn congestion(mut self, congestion: CongestionConfig) -> Self {
        self.config.congestion = congestion;
        self
    }

    /// Cap frame payloads at `len` bytes.
    pub fn max_frame_len(mut self, len: u32) -> Self {
        self.config.max_frame_len = Some(len);
        self
    }

    /// Install an outcome reporter.
    pub fn reporter(mut self, reporter: Reporter) -> Self {
        self.config.reporter = Some(reporter);
        self
    }

    /// Validate and return the configuration.
    pub fn build(self) -> Result<Config, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
