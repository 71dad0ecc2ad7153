//! Retry utility for handling transient errors in async operations
//!
//! Used by connection establishment: the retry loop runs inside the single
//! memoized connection factory, so every dependent observes only the final
//! outcome.

use crate::core::cancellation::{CancellationContext, Cancelled};
use serde::Deserialize;
use std::time::Duration;

/// Configurable retry policy for async operations
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    #[serde(with = "millis")]
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// A policy that tries exactly once
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            delay: Duration::ZERO,
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Execute an async operation with retry logic for transient errors
///
/// Gives up early, returning `E::from(Cancelled)`, once `ctx` is cancelled.
///
/// # Examples
/// ```rust
/// use artemis_host::core::cancellation::{CancellationContext, Cancelled};
/// use artemis_host::core::retry::{retry_async, RetryPolicy};
///
/// # #[derive(Debug)]
/// # struct ConnectError(String);
/// # impl std::fmt::Display for ConnectError {
/// #     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str(&self.0) }
/// # }
/// # impl From<Cancelled> for ConnectError {
/// #     fn from(_: Cancelled) -> Self { ConnectError("cancelled".to_string()) }
/// # }
/// # async fn example() -> Result<String, ConnectError> {
/// let ctx = CancellationContext::new();
/// let result = retry_async("broker_connect", &RetryPolicy::default(), &ctx, || async {
///     Ok::<String, ConnectError>("connected".to_string())
/// })
/// .await?;
/// # Ok(result)
/// # }
/// ```
pub async fn retry_async<F, T, E, Fut>(
    operation_name: &str,
    policy: &RetryPolicy,
    ctx: &CancellationContext,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display + From<Cancelled>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        let error = match ctx.run_until_cancelled(operation()).await {
            Ok(Ok(result)) => return Ok(result),
            Ok(Err(error)) => error,
            Err(cancelled) => return Err(E::from(cancelled)),
        };

        if attempt >= max_attempts {
            return Err(error);
        }

        log::debug!(
            "Operation '{}' failed on attempt {}/{}, retrying in {:?}: {}",
            operation_name,
            attempt,
            max_attempts,
            policy.delay,
            error
        );

        if let Err(cancelled) = ctx
            .run_until_cancelled(tokio::time::sleep(policy.delay))
            .await
        {
            return Err(E::from(cancelled));
        }
    }
}
