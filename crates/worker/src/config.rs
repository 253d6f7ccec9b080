use std::time::Duration;

use courier_core::streams::{consumer_identity, StreamSettings};
use courier_events::consumer::{
    DEFAULT_BATCH_SIZE, DEFAULT_MAX_IN_FLIGHT, DEFAULT_QUEUE_CAPACITY, DEFAULT_SHUTDOWN_GRACE,
};
use courier_events::coordinator::{DEFAULT_BLOCK, MAX_CLAIM_BATCH};
use courier_events::processor::DEFAULT_IO_TIMEOUT;
use courier_events::reclaim::{
    DEFAULT_MAX_ATTEMPTS, DEFAULT_RECLAIM_BATCH, DEFAULT_RECLAIM_INTERVAL, DEFAULT_STALE_AFTER,
};
use courier_events::{ConsumerConfig, ReclaimConfig};

/// A worker configuration variable was malformed or out of range.
#[derive(Debug, thiserror::Error)]
#[error("{name} has invalid value '{value}': {reason}")]
pub struct ConfigError {
    pub name: &'static str,
    pub value: String,
    pub reason: String,
}

/// Worker configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    pub streams: StreamSettings,
    pub consumer_id: String,
    pub batch_size: usize,
    pub block: Duration,
    pub concurrency: usize,
    pub queue_capacity: usize,
    pub handler_timeout: Duration,
    pub reclaim_interval: Duration,
    pub stale_after: Duration,
    pub max_attempts: u32,
    pub shutdown_grace: Duration,
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                 | Default           |
    /// |-------------------------|-------------------|
    /// | `CONSUMER_ID`           | `<hostname>-<pid>`|
    /// | `CLAIM_BATCH_SIZE`      | `10`              |
    /// | `CLAIM_BLOCK_MS`        | `5000`            |
    /// | `WORKER_CONCURRENCY`    | `4`               |
    /// | `WORKER_QUEUE_CAPACITY` | `32`              |
    /// | `HANDLER_TIMEOUT_SECS`  | `10`              |
    /// | `RECLAIM_INTERVAL_SECS` | `15`              |
    /// | `RECLAIM_STALE_SECS`    | `60`              |
    /// | `MAX_DELIVERY_ATTEMPTS` | `5`               |
    /// | `SHUTDOWN_GRACE_SECS`   | `30`              |
    ///
    /// Stream and group names come from [`StreamSettings::from_env`].
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::from_lookup(|name| std::env::var(name).ok())?;
        config.streams = StreamSettings::from_env();
        config.consumer_id = consumer_identity();
        Ok(config)
    }

    /// Build the numeric settings from an arbitrary variable source.
    ///
    /// Stream names and the consumer id keep their defaults here.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &'static str, default: u64| parse_var(&lookup, name, default);

        let batch_size = var("CLAIM_BATCH_SIZE", DEFAULT_BATCH_SIZE as u64)?;
        if batch_size as usize > MAX_CLAIM_BATCH {
            return Err(ConfigError {
                name: "CLAIM_BATCH_SIZE",
                value: batch_size.to_string(),
                reason: format!("must be at most {MAX_CLAIM_BATCH}"),
            });
        }

        let max_attempts = var("MAX_DELIVERY_ATTEMPTS", u64::from(DEFAULT_MAX_ATTEMPTS))?;
        let max_attempts = u32::try_from(max_attempts).map_err(|e| ConfigError {
            name: "MAX_DELIVERY_ATTEMPTS",
            value: max_attempts.to_string(),
            reason: e.to_string(),
        })?;

        let config = Self {
            streams: StreamSettings::default(),
            consumer_id: String::from("worker"),
            batch_size: batch_size as usize,
            block: Duration::from_millis(var("CLAIM_BLOCK_MS", DEFAULT_BLOCK.as_millis() as u64)?),
            concurrency: var("WORKER_CONCURRENCY", DEFAULT_MAX_IN_FLIGHT as u64)? as usize,
            queue_capacity: var("WORKER_QUEUE_CAPACITY", DEFAULT_QUEUE_CAPACITY as u64)? as usize,
            handler_timeout: Duration::from_secs(var(
                "HANDLER_TIMEOUT_SECS",
                DEFAULT_IO_TIMEOUT.as_secs(),
            )?),
            reclaim_interval: Duration::from_secs(var(
                "RECLAIM_INTERVAL_SECS",
                DEFAULT_RECLAIM_INTERVAL.as_secs(),
            )?),
            stale_after: Duration::from_secs(var(
                "RECLAIM_STALE_SECS",
                DEFAULT_STALE_AFTER.as_secs(),
            )?),
            max_attempts,
            shutdown_grace: Duration::from_secs(var(
                "SHUTDOWN_GRACE_SECS",
                DEFAULT_SHUTDOWN_GRACE.as_secs(),
            )?),
        };
        config.validate()?;
        Ok(config)
    }

    /// A handler may use up to three I/O timeouts (lookup, dispatch,
    /// persist), so an entry must not look stale before that budget is spent.
    fn validate(&self) -> Result<(), ConfigError> {
        let budget = self.handler_timeout.saturating_mul(3);
        if self.stale_after <= budget {
            return Err(ConfigError {
                name: "RECLAIM_STALE_SECS",
                value: self.stale_after.as_secs().to_string(),
                reason: format!(
                    "must exceed three handler timeouts ({}s)",
                    budget.as_secs()
                ),
            });
        }
        Ok(())
    }

    /// Settings for the consumer runtime.
    pub fn consumer_config(&self) -> ConsumerConfig {
        ConsumerConfig {
            consumer_id: self.consumer_id.clone(),
            batch_size: self.batch_size,
            max_in_flight: self.concurrency,
            queue_capacity: self.queue_capacity,
            shutdown_grace: self.shutdown_grace,
            reclaim: ReclaimConfig {
                interval: self.reclaim_interval,
                stale_after: self.stale_after,
                max_attempts: self.max_attempts,
                batch: DEFAULT_RECLAIM_BATCH,
            },
        }
    }
}

/// Parse a positive integer variable, falling back to `default` when unset.
fn parse_var<F>(lookup: &F, name: &'static str, default: u64) -> Result<u64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(name) else {
        return Ok(default);
    };
    let value: u64 = raw.trim().parse().map_err(|e: std::num::ParseIntError| ConfigError {
        name,
        value: raw.clone(),
        reason: e.to_string(),
    })?;
    if value == 0 {
        return Err(ConfigError {
            name,
            value: raw,
            reason: "must be greater than zero".into(),
        });
    }
    Ok(value)
}
