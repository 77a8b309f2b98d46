use std::time::Duration;
use tokio::time::sleep;

// ============================================================================
// Exponential Backoff for Transient Contention
// ============================================================================
//
// Used by backends whose atomic primitives are built from compare-and-set
// loops (e.g. lightweight transactions). Only errors that report themselves
// as transient are retried; everything else is returned on first sight.
//
// ============================================================================

#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(500),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    fn next_delay(&self, current: Duration) -> Duration {
        let scaled = Duration::from_secs_f64(current.as_secs_f64() * self.multiplier);
        scaled.min(self.max_delay)
    }
}

#[derive(Debug)]
pub enum RetryResult<T, E> {
    Success(T),
    /// Every attempt failed with a transient error; carries the last one.
    Exhausted(E),
    /// A non-transient error stopped the loop.
    PermanentFailure(E),
}

pub trait IsTransient {
    fn is_transient(&self) -> bool;
}

pub async fn retry_on_transient<F, Fut, T, E>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> RetryResult<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display + IsTransient,
{
    let max_attempts = config.max_attempts.max(1);
    let mut delay = config.initial_delay;
    let mut attempt = 0;

    loop {
        attempt += 1;
        let error = match operation(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::debug!(operation = operation_name, attempt, "Succeeded after retry");
                }
                return RetryResult::Success(value);
            }
            Err(error) => error,
        };

        if !error.is_transient() {
            return RetryResult::PermanentFailure(error);
        }

        if attempt == max_attempts {
            tracing::warn!(
                operation = operation_name,
                attempts = attempt,
                error = %error,
                "Giving up after transient failures"
            );
            return RetryResult::Exhausted(error);
        }

        tracing::debug!(
            operation = operation_name,
            attempt,
            error = %error,
            delay_ms = delay.as_millis() as u64,
            "Transient failure, backing off"
        );
        sleep(delay).await;
        delay = config.next_delay(delay);
    }
}
