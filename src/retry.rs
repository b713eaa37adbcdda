//! Bounded exponential backoff with jitter
//!
//! Wraps every exchange and account call. The decision-maker call is
//! not routed through here.
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

use crate::config::AppConfig;

#[derive(Debug, Error)]
pub enum RetryError<E: std::error::Error + 'static> {
    #[error("after {retries} retries, last error: {last}")]
    Exhausted {
        retries: u32,
        #[source]
        last: E,
    },
}

impl<E: std::error::Error + 'static> RetryError<E> {
    /// The failure from the final attempt
    pub fn last_error(&self) -> &E {
        match self {
            RetryError::Exhausted { last, .. } => last,
        }
    }

    pub fn into_last_error(self) -> E {
        match self {
            RetryError::Exhausted { last, .. } => last,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
        }
    }

    pub fn from_config(cfg: &AppConfig) -> Self {
        Self::with_signed_retries(cfg.max_retries, cfg.retry_base_delay(), cfg.retry_max_delay())
    }

    /// Build a policy from a possibly negative retry count; negatives mean a single attempt
    pub fn with_signed_retries(retries: i64, base_delay: Duration, max_delay: Duration) -> Self {
        let max_retries = u32::try_from(retries.max(0)).unwrap_or(u32::MAX);
        Self::new(max_retries, base_delay, max_delay)
    }

    /// Single attempt, never sleeps
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Upper bound of the backoff window: min(max_delay, base_delay * 2^attempt)
    pub fn backoff_ceiling(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Sleep duration for a given attempt, uniform in [ceiling/2, ceiling]
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let ceiling = self.backoff_ceiling(attempt);
        let half = ceiling / 2;
        let spread = (ceiling - half).as_millis() as u64;
        let jitter = rand::thread_rng().gen_range(0..=spread);
        half + Duration::from_millis(jitter)
    }

    /// Run `op` until it succeeds or the retry budget is spent
    pub async fn retry<T, E, F, Fut>(&self, mut op: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + 'static,
    {
        let mut attempt = 0u32;

        loop {
            match op().await {
                Ok(value) => {
                    if attempt > 0 {
                        tracing::debug!(attempts = attempt + 1, "Succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) => {
                    if attempt >= self.max_retries {
                        return Err(RetryError::Exhausted {
                            retries: self.max_retries,
                            last: e,
                        });
                    }

                    let delay = self.jittered_delay(attempt);
                    tracing::debug!(
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Attempt failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
