//! HeraldConfig - 実行時設定
//!
//! Every field has a default; `from_env()` overrides them from `HERALD_*`
//! variables. A variable that is set but does not parse is an error rather
//! than a silent fallback.

use std::env;
use std::time::Duration;

pub const DEFAULT_DESTINATION: &str = "email_queue";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var} must be {expected}, got {value:?}")]
    Invalid {
        var: &'static str,
        expected: &'static str,
        value: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeraldConfig {
    /// Queue name the dispatcher publishes to and the consumer reads from.
    pub destination: String,
    /// Time between two dispatch sweeps in live mode.
    pub sweep_interval: Duration,
    /// Wall-clock budget of one sweep; becomes its deadline.
    pub sweep_budget: Duration,
    /// Bound on each store/provider call made while delivering one message.
    pub item_timeout: Duration,
    /// How far in the future a message may be scheduled and still be
    /// delivered now.
    pub schedule_tolerance: Duration,
    pub batch_size: usize,
    /// Receives after which a still-failing message is given up.
    pub max_receives: u32,
    /// Long-poll wait of one consumer receive.
    pub receive_wait: Duration,
}

impl Default for HeraldConfig {
    fn default() -> Self {
        Self {
            destination: DEFAULT_DESTINATION.to_string(),
            sweep_interval: Duration::from_secs(60),
            sweep_budget: Duration::from_secs(55),
            item_timeout: Duration::from_secs(30),
            schedule_tolerance: Duration::from_secs(30),
            batch_size: 10,
            max_receives: 5,
            receive_wait: Duration::from_millis(1000),
        }
    }
}

impl HeraldConfig {
    /// Build the configuration from the process environment.
    ///
    /// # Environment Variables
    ///
    /// - `HERALD_DESTINATION` (default: email_queue)
    /// - `HERALD_SWEEP_INTERVAL_SECS` (default: 60)
    /// - `HERALD_SWEEP_BUDGET_SECS` (default: 55)
    /// - `HERALD_ITEM_TIMEOUT_SECS` (default: 30)
    /// - `HERALD_SCHEDULE_TOLERANCE_SECS` (default: 30)
    /// - `HERALD_BATCH_SIZE` (default: 10)
    /// - `HERALD_MAX_RECEIVES` (default: 5)
    /// - `HERALD_RECEIVE_WAIT_MS` (default: 1000)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Same as `from_env`, reading variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let secs = |var: &'static str, default: Duration| {
            parse_or(&lookup, var, "a whole number of seconds", default.as_secs())
                .map(Duration::from_secs)
        };

        Ok(Self {
            destination: lookup("HERALD_DESTINATION")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.destination),
            sweep_interval: secs("HERALD_SWEEP_INTERVAL_SECS", defaults.sweep_interval)?,
            sweep_budget: secs("HERALD_SWEEP_BUDGET_SECS", defaults.sweep_budget)?,
            item_timeout: secs("HERALD_ITEM_TIMEOUT_SECS", defaults.item_timeout)?,
            schedule_tolerance: secs(
                "HERALD_SCHEDULE_TOLERANCE_SECS",
                defaults.schedule_tolerance,
            )?,
            batch_size: parse_or(
                &lookup,
                "HERALD_BATCH_SIZE",
                "a positive integer",
                defaults.batch_size,
            )?,
            max_receives: parse_or(
                &lookup,
                "HERALD_MAX_RECEIVES",
                "a positive integer",
                defaults.max_receives,
            )?,
            receive_wait: parse_or(
                &lookup,
                "HERALD_RECEIVE_WAIT_MS",
                "a whole number of milliseconds",
                defaults.receive_wait.as_millis() as u64,
            )
            .map(Duration::from_millis)?,
        })
    }
}

fn parse_or<F, T>(
    lookup: &F,
    var: &'static str,
    expected: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(var) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid {
            var,
            expected,
            value,
        }),
    }
}
