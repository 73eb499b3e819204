//! Retry policy
//!
//! Exponential backoff with jitter around any fallible async operation
//! that reports [`TransportError`]s. Retry decisions come from the
//! classifier; server errors get their own, usually tighter, retry cap.

use crate::classifier::{classify, AgentError, ErrorCategory};
use crate::config::ConfigError;
use crate::transport::TransportError;
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicyOptions {
    /// Maximum number of retries after the first attempt (default: 3)
    pub max_retries: u32,
    /// Delay before the first retry (default: 1s)
    pub initial_delay: Duration,
    /// Upper bound for computed delays (default: 30s)
    pub max_delay: Duration,
    /// Growth factor between retries, must be > 1.0 (default: 2.0)
    pub backoff_multiplier: f64,
    /// Whether to randomize computed delays (default: true)
    pub use_jitter: bool,
    /// Jitter range as a fraction of the delay, 0.0-1.0 (default: 0.1)
    pub jitter_fraction: f64,
    /// Whether server errors are retried at all (default: true)
    pub retry_server_errors: bool,
    /// Cap on server-error retries within one call (default: 2)
    pub max_server_error_retries: u32,
}

impl Default for RetryPolicyOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            use_jitter: true,
            jitter_fraction: 0.1,
            retry_server_errors: true,
            max_server_error_retries: 2,
        }
    }
}

impl RetryPolicyOptions {
    /// Never retry
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// More attempts and a shorter initial delay, for interactive use
    pub fn aggressive() -> Self {
        Self {
            max_retries: 5,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(15),
            max_server_error_retries: 3,
            ..Default::default()
        }
    }

    /// Check the numeric constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backoff_multiplier.is_nan() || self.backoff_multiplier <= 1.0 {
            return Err(ConfigError::Invalid(format!(
                "backoff_multiplier must be greater than 1.0, got {}",
                self.backoff_multiplier
            )));
        }
        if !(0.0..=1.0).contains(&self.jitter_fraction) {
            return Err(ConfigError::Invalid(format!(
                "jitter_fraction must be between 0.0 and 1.0, got {}",
                self.jitter_fraction
            )));
        }
        if self.initial_delay > self.max_delay {
            return Err(ConfigError::Invalid(
                "initial_delay must not exceed max_delay".to_string(),
            ));
        }
        Ok(())
    }

    /// Total attempts one call may make
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Bookkeeping for a single [`RetryPolicy::execute`] call
#[derive(Debug, Clone)]
pub struct RetryContext {
    /// Attempts made so far
    pub attempt_count: u32,
    /// Server errors retried so far
    pub server_error_count: u32,
    /// `max_retries + 1`
    pub max_attempts: u32,
    /// Every classified failure, oldest first
    pub errors: Vec<AgentError>,
}

impl RetryContext {
    fn new(max_attempts: u32) -> Self {
        Self {
            attempt_count: 0,
            server_error_count: 0,
            max_attempts,
            errors: Vec::new(),
        }
    }
}

/// Information about a scheduled retry
#[derive(Debug, Clone)]
pub struct RetryInfo {
    /// Which attempt just failed (1-based)
    pub attempt: u32,
    /// Maximum attempts configured
    pub max_attempts: u32,
    /// How long we'll wait before retrying
    pub delay: Duration,
    /// The classified error that triggered the retry
    pub error: AgentError,
}

/// Callback type for retry events
pub type RetryCallback = Arc<dyn Fn(&RetryInfo) + Send + Sync>;

/// Outcome of a call that did not succeed
#[derive(Debug, Clone, thiserror::Error)]
pub enum RetryError {
    /// The caller cancelled the operation; never retried
    #[error("Operation cancelled")]
    Cancelled,

    /// The operation failed for good
    #[error("Operation failed after {attempts} attempt(s): {error}")]
    Failed {
        /// The last classified failure
        error: AgentError,
        /// Total attempts made
        attempts: u32,
    },
}

impl RetryError {
    /// The final classified error, if the operation actually failed
    pub fn agent_error(&self) -> Option<&AgentError> {
        match self {
            RetryError::Cancelled => None,
            RetryError::Failed { error, .. } => Some(error),
        }
    }
}

/// Retries fallible async operations
///
/// # Example
///
/// ```ignore
/// let policy = RetryPolicy::new(RetryPolicyOptions::default());
/// let completion = policy
///     .execute(
///         |cancel| transport.complete(messages.clone(), None, cancel),
///         &cancel,
///     )
///     .await?;
/// ```
#[derive(Clone)]
pub struct RetryPolicy {
    options: RetryPolicyOptions,
    on_retry: Option<RetryCallback>,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("options", &self.options)
            .field("on_retry", &self.on_retry.is_some())
            .finish()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryPolicyOptions::default())
    }
}

impl RetryPolicy {
    pub fn new(options: RetryPolicyOptions) -> Self {
        Self {
            options,
            on_retry: None,
        }
    }

    /// Call `callback` before every backoff sleep
    pub fn on_retry(mut self, callback: impl Fn(&RetryInfo) + Send + Sync + 'static) -> Self {
        self.on_retry = Some(Arc::new(callback));
        self
    }

    pub fn options(&self) -> &RetryPolicyOptions {
        &self.options
    }

    /// Backoff delay before the `retry`-th retry (0-based), without jitter
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        let exponent = retry.min(i32::MAX as u32) as i32;
        let factor = self.options.backoff_multiplier.powi(exponent);
        let secs = self.options.initial_delay.as_secs_f64() * factor;
        let max = self.options.max_delay;
        if !secs.is_finite() || secs >= max.as_secs_f64() {
            max
        } else {
            Duration::try_from_secs_f64(secs.max(0.0)).map_or(max, |delay| delay.min(max))
        }
    }

    /// Delay to wait after `error` before the `retry`-th retry
    ///
    /// An explicit retry-after on the error wins over computed backoff.
    pub fn delay_for(&self, retry: u32, error: &AgentError) -> Duration {
        if let Some(retry_after) = error.retry_after() {
            return retry_after;
        }
        let delay = self.backoff_delay(retry);
        if self.options.use_jitter {
            apply_jitter(delay, self.options.jitter_fraction)
        } else {
            delay
        }
    }

    /// Run `op` until it succeeds, fails permanently, or runs out of attempts
    ///
    /// `op` receives a clone of `cancel`. Cancellation is never retried, and
    /// cancelling during a backoff sleep aborts the whole loop.
    pub async fn execute<F, Fut, T>(
        &self,
        mut op: F,
        cancel: &CancellationToken,
    ) -> Result<T, RetryError>
    where
        F: FnMut(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        let mut context = RetryContext::new(self.options.max_attempts());

        loop {
            if cancel.is_cancelled() {
                return Err(RetryError::Cancelled);
            }

            context.attempt_count += 1;
            let fault = match op(cancel.clone()).await {
                Ok(value) => return Ok(value),
                Err(fault) => fault,
            };

            let error = classify(&fault, Some(cancel));
            if error.category() == ErrorCategory::Cancelled {
                return Err(RetryError::Cancelled);
            }
            context.errors.push(error.clone());

            if !self.should_retry(&mut context, &error) {
                log::debug!(
                    "giving up after {} attempt(s): {}",
                    context.attempt_count,
                    error
                );
                return Err(RetryError::Failed {
                    error,
                    attempts: context.attempt_count,
                });
            }

            let delay = self.delay_for(context.attempt_count - 1, &error);
            log::warn!(
                "attempt {}/{} failed ({}), retrying in {:?}",
                context.attempt_count,
                context.max_attempts,
                error.category(),
                delay
            );

            if let Some(callback) = &self.on_retry {
                callback(&RetryInfo {
                    attempt: context.attempt_count,
                    max_attempts: context.max_attempts,
                    delay,
                    error,
                });
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    fn should_retry(&self, context: &mut RetryContext, error: &AgentError) -> bool {
        if !error.is_retryable() || context.attempt_count >= context.max_attempts {
            return false;
        }
        if error.category() == ErrorCategory::ServerError {
            if !self.options.retry_server_errors
                || context.server_error_count >= self.options.max_server_error_retries
            {
                return false;
            }
            context.server_error_count += 1;
        }
        true
    }
}

/// Perturb `delay` uniformly by up to ±`fraction`, floored at zero
///
/// A NaN fraction means no jitter; results past `Duration::MAX` saturate.
fn apply_jitter(delay: Duration, fraction: f64) -> Duration {
    let fraction = if fraction.is_nan() { 0.0 } else { fraction.clamp(0.0, 1.0) };
    let base = delay.as_secs_f64();
    let range = base * fraction;
    if !range.is_finite() || range <= 0.0 {
        return delay;
    }
    let jitter = rand::thread_rng().gen_range(-range..=range);
    Duration::try_from_secs_f64((base + jitter).max(0.0)).unwrap_or(Duration::MAX)
}
