//! Bounded retry for broker lookups.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use lagscale_broker::{BrokerError, BrokerResult, Lookup};
use lagscale_core::{DaemonSettings, RetryConfig};

/// Per-lookup budget: attempt timeout plus retry schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationOptions {
    pub retry: RetryConfig,
    /// Budget for one attempt of one lookup.
    pub request_timeout: Duration,
}

impl Default for EvaluationOptions {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            request_timeout: DaemonSettings::default().request_timeout,
        }
    }
}

/// Run `op` until it succeeds, fails with a non-transient error, or the
/// attempt budget is spent. An attempt exceeding `request_timeout` counts as
/// a transient [`BrokerError::Timeout`].
pub async fn with_retry<T, F, Fut>(
    options: &EvaluationOptions,
    lookup: Lookup,
    target: &str,
    mut op: F,
) -> BrokerResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = BrokerResult<T>>,
{
    let attempts = options.retry.attempts.max(1);
    let mut attempt = 1;
    loop {
        let result = match tokio::time::timeout(options.request_timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(BrokerError::Timeout(format!(
                "{lookup} for {target} exceeded {:?}",
                options.request_timeout
            ))),
        };

        match result {
            Ok(value) => return Ok(value),
            Err(error) if error.is_transient() && attempt < attempts => {
                let delay = options.retry.delay_for(attempt);
                warn!(
                    %lookup,
                    target,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    %error,
                    "transient broker error, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}
