//! Configuration types.

use std::time::Duration;

use crate::error::ConfigError;

/// Default voip.ms REST endpoint.
pub const DEFAULT_API_URL: &str = "https://voip.ms/api/v1/rest.php";

/// Which provider method the poller uses to list messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMethod {
    /// `getSMS`: plain SMS only.
    Sms,
    /// `getMMS` with `all_messages=1`: SMS and MMS together.
    Mms,
}

impl FetchMethod {
    /// Provider API method name.
    pub fn api_method(self) -> &'static str {
        match self {
            FetchMethod::Sms => "getSMS",
            FetchMethod::Mms => "getMMS",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sms" | "getsms" => Some(FetchMethod::Sms),
            "mms" | "getmms" => Some(FetchMethod::Mms),
            _ => None,
        }
    }
}

/// Provider client settings.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// REST endpoint (overridable for tests and proxies).
    pub api_url: String,
    /// Per-request timeout. A timed-out call is a failed call.
    pub request_timeout: Duration,
    /// Fetch variant used by the poller.
    pub fetch_method: FetchMethod,
    /// Bodies longer than this (in UTF-16 units) go out as MMS.
    pub long_message_threshold: usize,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            request_timeout: Duration::from_secs(15),
            fetch_method: FetchMethod::Mms,
            long_message_threshold: 160,
        }
    }
}

/// Poller timing.
#[derive(Debug, Clone, Copy)]
pub struct PollerConfig {
    /// Time between poll cycles.
    pub interval: Duration,
    /// How far back each cycle looks. Must be at least twice `interval`
    /// so one generation of remembered ids covers every overlap.
    pub lookback: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            lookback: Duration::from_secs(60),
        }
    }
}

impl PollerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interval.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "VOIPMS_POLL_INTERVAL_SECS".into(),
                message: "must be greater than zero".into(),
            });
        }
        if self.lookback < self.interval * 2 {
            return Err(ConfigError::InvalidValue {
                key: "VOIPMS_LOOKBACK_SECS".into(),
                message: format!(
                    "lookback {:?} must be at least twice the poll interval {:?}",
                    self.lookback, self.interval
                ),
            });
        }
        Ok(())
    }
}

/// Full bridge configuration.
#[derive(Debug, Clone, Default)]
pub struct BridgeConfig {
    pub provider: ProviderConfig,
    pub poller: PollerConfig,
}

impl BridgeConfig {
    /// Build config from environment variables, falling back to defaults
    /// for anything unset or unparsable.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let api_url = std::env::var("VOIPMS_API_URL").unwrap_or(defaults.provider.api_url);

        let request_timeout = env_secs("VOIPMS_REQUEST_TIMEOUT_SECS")
            .unwrap_or(defaults.provider.request_timeout);

        let fetch_method = std::env::var("VOIPMS_FETCH_METHOD")
            .ok()
            .and_then(|s| FetchMethod::parse(&s))
            .unwrap_or(defaults.provider.fetch_method);

        let long_message_threshold: usize = std::env::var("VOIPMS_LONG_MESSAGE_THRESHOLD")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.provider.long_message_threshold);

        let interval = env_secs("VOIPMS_POLL_INTERVAL_SECS").unwrap_or(defaults.poller.interval);
        let lookback = env_secs("VOIPMS_LOOKBACK_SECS").unwrap_or(defaults.poller.lookback);

        let config = Self {
            provider: ProviderConfig {
                api_url,
                request_timeout,
                fetch_method,
                long_message_threshold,
            },
            poller: PollerConfig { interval, lookback },
        };
        config.poller.validate()?;
        Ok(config)
    }
}

fn env_secs(key: &str) -> Option<Duration> {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}
