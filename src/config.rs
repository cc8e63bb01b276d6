//! Lifecycle configuration resolved from the environment.

use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::wait::POLL_INTERVAL;

/// Grace period given to a container's main process before it is killed.
pub const DEFAULT_STOP_GRACE_PERIOD: Duration = Duration::from_secs(1);

/// Per-attempt connection timeout used by the port-open check.
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_millis(50);

/// Settings shared by every container a [`Launcher`](crate::Launcher) starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleConfig {
    /// Grace period passed to the engine's stop call during shutdown.
    pub stop_grace_period: Duration,
    /// Interval between readiness predicate evaluations.
    pub poll_interval: Duration,
    /// Connection timeout for each port-open attempt.
    pub dial_timeout: Duration,
    /// Host interface published ports bind to. `None` binds all interfaces.
    pub host_ip: Option<String>,
    /// Pull every image before launch, even when present locally.
    pub pull_always: bool,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            stop_grace_period: DEFAULT_STOP_GRACE_PERIOD,
            poll_interval: POLL_INTERVAL,
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            host_ip: None,
            pull_always: false,
        }
    }
}

impl LifecycleConfig {
    /// Resolve from `TEMPDOCK_*` environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::resolve(|key| std::env::var(key).ok())
    }

    /// Resolve using an arbitrary variable lookup.
    pub fn resolve<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        Ok(Self {
            stop_grace_period: optional_millis(
                &lookup,
                "TEMPDOCK_STOP_GRACE_MS",
                defaults.stop_grace_period,
            )?,
            poll_interval: positive_millis(
                &lookup,
                "TEMPDOCK_POLL_INTERVAL_MS",
                defaults.poll_interval,
            )?,
            dial_timeout: positive_millis(
                &lookup,
                "TEMPDOCK_DIAL_TIMEOUT_MS",
                defaults.dial_timeout,
            )?,
            host_ip: optional_env(&lookup, "TEMPDOCK_HOST_IP").or(defaults.host_ip),
            pull_always: optional_env(&lookup, "TEMPDOCK_PULL_ALWAYS")
                .map(|s| s.parse())
                .transpose()
                .map_err(|e| ConfigError::InvalidValue {
                    key: "TEMPDOCK_PULL_ALWAYS".to_string(),
                    message: format!("must be 'true' or 'false': {e}"),
                })?
                .unwrap_or(defaults.pull_always),
        })
    }
}

/// Read a variable, treating empty values as unset.
fn optional_env<F>(lookup: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_optional_env<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    optional_env(lookup, key)
        .map(|s| {
            s.parse().map_err(|e| ConfigError::InvalidValue {
                key: key.to_string(),
                message: format!("{e}"),
            })
        })
        .transpose()
        .map(|v| v.unwrap_or(default))
}

fn optional_millis<F>(lookup: &F, key: &str, default: Duration) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let default_ms = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
    parse_optional_env(lookup, key, default_ms).map(Duration::from_millis)
}

fn positive_millis<F>(lookup: &F, key: &str, default: Duration) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let value = optional_millis(lookup, key, default)?;
    if value.is_zero() {
        return Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "must be a positive number of milliseconds".to_string(),
        });
    }
    Ok(value)
}
