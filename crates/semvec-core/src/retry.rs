//! Bounded exponential backoff and call timeouts.
//!
//! Every call to an external collaborator (inference service, storage engine)
//! goes through [`RetryPolicy::run`], which retries only
//! [transient](crate::FaultCategory::Transient) errors and gives up after
//! `max_attempts` total attempts, and through [`with_timeout`], which turns a
//! stalled call into [`Error::Timeout`].

use backon::{ExponentialBuilder, Retryable};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::{Error, Result};

/// Retry settings for one external dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one (minimum 1).
    pub max_attempts: u32,

    /// Delay before the first retry.
    #[serde(with = "millis")]
    pub initial_delay: Duration,

    /// Upper bound on any single delay.
    #[serde(with = "millis")]
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    /// Default settings:
    /// - Max attempts: 3
    /// - Initial delay: 100 milliseconds
    /// - Max delay: 5 seconds
    /// - Multiplier: 2.0 (exponential backoff)
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Sets the maximum number of attempts.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Sets the initial delay between retries.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay between retries.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.initial_delay)
            .with_max_delay(self.max_delay.max(self.initial_delay))
            .with_max_times(self.max_attempts.saturating_sub(1) as usize)
    }

    /// Run `operation`, retrying transient failures.
    ///
    /// Non-transient errors are returned immediately. Once attempts are
    /// exhausted the last transient error is returned.
    pub async fn run<T, F, Fut>(&self, operation: &str, f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        f.retry(self.backoff())
            .when(Error::is_retryable)
            .notify(|err: &Error, delay: Duration| {
                warn!(
                    "{} failed ({}), retrying in {}ms",
                    operation,
                    err,
                    delay.as_millis()
                );
            })
            .await
    }
}

/// Await `fut`, failing with [`Error::Timeout`] once `limit` elapses.
pub async fn with_timeout<T, Fut>(service: &str, limit: Duration, fut: Fut) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::timeout(
            service,
            u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
        )),
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
