use std::{env, time::Duration};

use iw_common::helpers::{parse_duration_secs, parse_limit};
use log::*;

use crate::{
    errors::ConfigError,
    retry::{RetryPolicy, DEFAULT_RETRY_BACKOFF},
};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WatcherConfig {
    /// How often every pending invoice is re-enqueued, in case a trigger event was missed.
    pub poll_interval: Duration,
    /// How failed reconciliation passes are retried.
    pub retry: RetryPolicy,
    /// The maximum number of invoices reconciled at the same time. `None` means no limit.
    pub max_concurrent_invoices: Option<usize>,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self { poll_interval: DEFAULT_POLL_INTERVAL, retry: RetryPolicy::default(), max_concurrent_invoices: None }
    }
}

impl WatcherConfig {
    /// Reads the configuration from `IW_POLL_INTERVAL`, `IW_RETRY_BACKOFF` (both in seconds), `IW_MAX_RETRIES` and
    /// `IW_MAX_CONCURRENT_INVOICES`. Missing or invalid values fall back to their defaults.
    pub fn from_env_or_default() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Like [`Self::from_env_or_default`], but reads variables through `lookup` instead of the process environment.
    pub fn from_lookup<F>(lookup: F) -> Self
    where F: Fn(&str) -> Option<String> {
        let mut config = Self::default();
        let poll_interval = parse_duration_secs(lookup("IW_POLL_INTERVAL"))
            .map_err(|reason| ConfigError::InvalidValue { name: "IW_POLL_INTERVAL", reason })
            .and_then(|d| match d {
                Some(d) if d.is_zero() => Err(ConfigError::InvalidValue {
                    name: "IW_POLL_INTERVAL",
                    reason: "The poll interval must be at least one second".into(),
                }),
                d => Ok(d),
            });
        match poll_interval {
            Ok(Some(d)) => config.poll_interval = d,
            Ok(None) => {},
            Err(e) => {
                warn!("🪛️ {e}. Using the default poll interval of {}s instead.", DEFAULT_POLL_INTERVAL.as_secs())
            },
        }
        match parse_duration_secs(lookup("IW_RETRY_BACKOFF")) {
            Ok(Some(d)) => config.retry.backoff = d,
            Ok(None) => {},
            Err(reason) => {
                let e = ConfigError::InvalidValue { name: "IW_RETRY_BACKOFF", reason };
                warn!("🪛️ {e}. Using the default backoff of {}s instead.", DEFAULT_RETRY_BACKOFF.as_secs());
            },
        }
        match parse_limit(lookup("IW_MAX_RETRIES")) {
            Ok(limit) => config.retry.max_attempts = limit.map(|n| u32::try_from(n).unwrap_or(u32::MAX)),
            Err(reason) => {
                let e = ConfigError::InvalidValue { name: "IW_MAX_RETRIES", reason };
                warn!("🪛️ {e}. Failed passes will be retried indefinitely.");
            },
        }
        match parse_limit(lookup("IW_MAX_CONCURRENT_INVOICES")) {
            Ok(limit) => config.max_concurrent_invoices = limit,
            Err(reason) => {
                let e = ConfigError::InvalidValue { name: "IW_MAX_CONCURRENT_INVOICES", reason };
                warn!("🪛️ {e}. The number of concurrent invoices will not be limited.");
            },
        }
        debug!("🪛️ Watcher configuration: {config:?}");
        config
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_max_concurrent_invoices(mut self, max: Option<usize>) -> Self {
        self.max_concurrent_invoices = max;
        self
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn defaults() {
        let config = WatcherConfig::from_lookup(lookup(&[]));
        assert_eq!(config, WatcherConfig::default());
        assert_eq!(config.poll_interval, Duration::from_secs(60));
        assert_eq!(config.retry.backoff, Duration::from_secs(10));
        assert_eq!(config.retry.max_attempts, None);
        assert_eq!(config.max_concurrent_invoices, None);
    }

    #[test]
    fn values_are_read() {
        let config = WatcherConfig::from_lookup(lookup(&[
            ("IW_POLL_INTERVAL", "15"),
            ("IW_RETRY_BACKOFF", "2"),
            ("IW_MAX_RETRIES", "5"),
            ("IW_MAX_CONCURRENT_INVOICES", "32"),
        ]));
        assert_eq!(config.poll_interval, Duration::from_secs(15));
        assert_eq!(config.retry, RetryPolicy::new(Duration::from_secs(2), Some(5)));
        assert_eq!(config.max_concurrent_invoices, Some(32));
    }

    #[test]
    fn invalid_values_fall_back_to_defaults() {
        let config = WatcherConfig::from_lookup(lookup(&[
            ("IW_POLL_INTERVAL", "0"),
            ("IW_RETRY_BACKOFF", "soon"),
            ("IW_MAX_RETRIES", "-3"),
            ("IW_MAX_CONCURRENT_INVOICES", "unlimited"),
        ]));
        assert_eq!(config, WatcherConfig::default());
    }
}
