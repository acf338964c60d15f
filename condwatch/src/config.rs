use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Environment variable overriding [`WatcherConfig::poll_interval_ms`].
pub const POLL_INTERVAL_ENV: &str = "CONDWATCH_POLL_INTERVAL_MS";
/// Environment variable overriding [`WatcherConfig::error_capacity`].
pub const ERROR_CAPACITY_ENV: &str = "CONDWATCH_ERROR_CAPACITY";

/// Knobs for a single [`Watcher`](crate::Watcher).
///
/// All fields carry defaults so a partial JSON payload or a sparse
/// environment still yields a usable configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// Delay between condition attempts (ms). Detection latency is bounded
    /// by this value plus the query execution time.
    pub poll_interval_ms: u64,
    /// Number of attempt errors buffered for the consumer. Once full, newer
    /// errors are dropped and counted.
    pub error_capacity: usize,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            error_capacity: 4,
        }
    }
}

impl WatcherConfig {
    /// Set the poll interval. The interval is kept in whole milliseconds;
    /// fractions round up, so any non-zero interval stays non-zero
    /// (`500µs` becomes `1ms`, `1.2ms` becomes `2ms`).
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms =
            u64::try_from(interval.as_nanos().div_ceil(1_000_000))
                .unwrap_or(u64::MAX);
        self
    }

    /// Set the error channel capacity.
    pub fn with_error_capacity(mut self, capacity: usize) -> Self {
        self.error_capacity = capacity;
        self
    }

    /// Poll interval as used by the loop. Tokio rejects zero periods, so
    /// zero is raised to one millisecond.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    /// Error channel capacity as used by the loop (never zero).
    pub fn effective_error_capacity(&self) -> usize {
        self.error_capacity.max(1)
    }

    /// Load overrides from `$CONDWATCH_POLL_INTERVAL_MS` and
    /// `$CONDWATCH_ERROR_CAPACITY`, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a caller-supplied lookup.
    /// Blank values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(POLL_INTERVAL_ENV)
            && !raw.trim().is_empty()
        {
            config.poll_interval_ms = parse_var(POLL_INTERVAL_ENV, &raw)?;
        }

        if let Some(raw) = lookup(ERROR_CAPACITY_ENV)
            && !raw.trim().is_empty()
        {
            config.error_capacity = parse_var(ERROR_CAPACITY_ENV, &raw)?;
        }

        Ok(config)
    }

    /// Parse an inline JSON configuration; missing fields take defaults.
    pub fn parse_json(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }
}

fn parse_var<T>(key: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|err| ConfigError::InvalidValue {
            key,
            value: raw.to_string(),
            reason: err.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(
        pairs: &[(&str, &str)],
    ) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = WatcherConfig::default();
        assert_eq!(config.poll_interval(), Duration::from_millis(500));
        assert_eq!(config.error_capacity, 4);
    }

    #[test]
    fn lookup_overrides_defaults() {
        let config = WatcherConfig::from_lookup(lookup_from(&[
            (POLL_INTERVAL_ENV, "250"),
            (ERROR_CAPACITY_ENV, " 16 "),
        ]))
        .expect("valid overrides");

        assert_eq!(config.poll_interval_ms, 250);
        assert_eq!(config.error_capacity, 16);
    }

    #[test]
    fn blank_values_are_ignored() {
        let config = WatcherConfig::from_lookup(lookup_from(&[(
            POLL_INTERVAL_ENV,
            "   ",
        )]))
        .expect("blank is unset");

        assert_eq!(config, WatcherConfig::default());
    }

    #[test]
    fn unparseable_value_names_the_variable() {
        let err = WatcherConfig::from_lookup(lookup_from(&[(
            ERROR_CAPACITY_ENV,
            "lots",
        )]))
        .expect_err("non-numeric capacity");

        match err {
            ConfigError::InvalidValue { key, value, .. } => {
                assert_eq!(key, ERROR_CAPACITY_ENV);
                assert_eq!(value, "lots");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn partial_json_keeps_remaining_defaults() {
        let config = WatcherConfig::parse_json(r#"{"poll_interval_ms": 50}"#)
            .expect("valid json");

        assert_eq!(config.poll_interval(), Duration::from_millis(50));
        assert_eq!(config.error_capacity, 4);
    }

    #[test]
    fn sub_millisecond_intervals_round_up() {
        let config = WatcherConfig::default()
            .with_poll_interval(Duration::from_micros(500));
        assert_eq!(config.poll_interval_ms, 1);

        let config = WatcherConfig::default()
            .with_poll_interval(Duration::from_micros(1_200));
        assert_eq!(config.poll_interval(), Duration::from_millis(2));

        let config = WatcherConfig::default()
            .with_poll_interval(Duration::from_millis(250));
        assert_eq!(config.poll_interval_ms, 250);
    }

    #[test]
    fn zero_values_are_clamped() {
        let config = WatcherConfig::default()
            .with_poll_interval(Duration::ZERO)
            .with_error_capacity(0);

        assert_eq!(config.poll_interval(), Duration::from_millis(1));
        assert_eq!(config.effective_error_capacity(), 1);
    }
}
