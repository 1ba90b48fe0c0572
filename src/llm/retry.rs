//! Caller-side retry policy for pipeline operations.
//!
//! The invoker makes exactly one model call; whoever calls it decides whether a
//! failure is worth another attempt. A policy carries attempt count, backoff
//! bounds, jitter and an abort predicate.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::error::PipelineError;

// ── Defaults ────────────────────────────────────────────────────────────

/// Default attempt count for scheduled triage passes.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
/// Default base delay.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(500);
/// Default delay cap.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(10);
/// Default jitter factor (0.0–1.0).
pub const DEFAULT_JITTER: f64 = 0.2;

type AbortPredicate = Arc<dyn Fn(&PipelineError) -> bool + Send + Sync>;

/// Retry configuration with an abort predicate.
#[derive(Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: f64,
    should_retry: AbortPredicate,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("jitter", &self.jitter)
            .finish_non_exhaustive()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            jitter: DEFAULT_JITTER,
            should_retry: Arc::new(PipelineError::is_retryable),
        }
    }
}

impl RetryPolicy {
    /// Exactly one attempt.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_backoff(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self.max_delay = max_delay;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Replace the predicate deciding whether an error is worth retrying.
    pub fn with_abort_predicate<F>(mut self, should_retry: F) -> Self
    where
        F: Fn(&PipelineError) -> bool + Send + Sync + 'static,
    {
        self.should_retry = Arc::new(should_retry);
        self
    }

    /// Delay before retry number `attempt` (zero-based).
    ///
    /// `min(max_delay, base * 2^attempt)` scaled by `1 ± jitter`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponential = self
            .base_delay
            .saturating_mul(1u32 << attempt.min(16));
        let capped = exponential.min(self.max_delay);
        if self.jitter <= 0.0 {
            return capped;
        }
        let random: f64 = rand::thread_rng().gen_range(0.0..1.0);
        let factor = 1.0 + (random * 2.0 - 1.0) * self.jitter;
        capped.mul_f64(factor.max(0.0))
    }

    /// Run `op` until it succeeds, the predicate rejects its error, or the
    /// attempts run out. Returns the last error on failure.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, PipelineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, PipelineError>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    attempt += 1;
                    if attempt >= self.max_attempts || !(self.should_retry)(&e) {
                        return Err(e);
                    }
                    let delay = self.backoff_delay(attempt - 1);
                    warn!(
                        op = label,
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "Retrying after failure"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
