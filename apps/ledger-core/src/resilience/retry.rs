//! Retry with Exponential Backoff
//! Handles transient connection failures with a configurable policy

use crate::observability::metrics::Metrics;

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Startup connections: more patience, the broker may still be booting.
    pub fn connect() -> Self {
        Self {
            max_attempts: 10,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
            ..Self::default()
        }
    }

    /// Backoff after `delay`, capped at `max_delay`
    pub fn next_delay(&self, delay: Duration) -> Duration {
        let next = Duration::from_millis((delay.as_millis() as f64 * self.multiplier) as u64);
        next.min(self.max_delay)
    }
}

/// Run `f` until it succeeds or `config.max_attempts` is exhausted.
/// Attempts are counted in `retry_attempts_total{operation, outcome}` when metrics are given.
pub async fn with_retry_async<F, Fut, T, E>(
    operation: &str,
    config: &RetryConfig,
    metrics: Option<&Metrics>,
    mut f: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;
    let mut delay = config.initial_delay;
    let record = |outcome: &str| {
        if let Some(metrics) = metrics {
            metrics
                .retry_attempts_total
                .with_label_values(&[operation, outcome])
                .inc();
        }
    };

    loop {
        attempt += 1;

        match f().await {
            Ok(result) => {
                record("success");
                if attempt > 1 {
                    debug!(operation = operation, attempt = attempt, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) => {
                record("failure");
                if attempt >= config.max_attempts.max(1) {
                    warn!(
                        operation = operation,
                        attempt = attempt,
                        error = %e,
                        "Operation failed after all retries"
                    );
                    return Err(e);
                }

                warn!(
                    operation = operation,
                    attempt = attempt,
                    max_attempts = config.max_attempts,
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "Operation failed, retrying"
                );

                let actual_delay = if config.jitter {
                    let jitter = (rand_jitter() * delay.as_millis() as f64 * 0.3) as u64;
                    delay + Duration::from_millis(jitter)
                } else {
                    delay
                };

                sleep(actual_delay).await;
                delay = config.next_delay(delay);
            }
        }
    }
}

/// Sub-second clock noise in [0, 1)
fn rand_jitter() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    (nanos % 1000) as f64 / 1000.0
}
