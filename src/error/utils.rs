use super::{is_transient_status, ErrorKind, SwapError};
use rand::Rng;
use tokio::time::{sleep, Duration};
use tracing::{error, info, warn};

/// Bounded exponential backoff shared by balance queries and broadcast.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Adds up to this fraction of the delay as random jitter.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay,
            ..Self::default()
        }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exp = self.multiplier.powi(retry.saturating_sub(1) as i32);
        let base = self.initial_delay.mul_f64(exp).min(self.max_delay);
        if self.jitter > 0.0 && !base.is_zero() {
            let extra = rand::thread_rng().gen_range(0.0..=self.jitter);
            base.mul_f64(1.0 + extra).min(self.max_delay)
        } else {
            base
        }
    }

    /// Runs `operation` until it succeeds, fails with an error that
    /// `is_retryable` rejects, or the attempt budget is exhausted.
    pub async fn run_with<F, Fut, T, P>(&self, operation: F, is_retryable: P) -> Result<T, SwapError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, SwapError>>,
        P: Fn(&SwapError) -> bool,
    {
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if attempt >= self.max_attempts || !is_retryable(&e) {
                        return Err(e);
                    }
                    let delay = self.delay_for(attempt);
                    warn!(attempt, max_attempts = self.max_attempts, delay = ?delay, error = %e, "Operation failed, retrying");
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    /// [`RetryPolicy::run_with`] using [`SwapError::is_retryable`].
    pub async fn run<F, Fut, T>(&self, operation: F) -> Result<T, SwapError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, SwapError>>,
    {
        self.run_with(operation, SwapError::is_retryable).await
    }
}

/// Logs an error with a severity matching its kind.
pub fn log_error(error: &SwapError, context: &str) {
    match error.kind() {
        ErrorKind::UserRejection => info!(kind = %error.kind(), "{} - {}", context, error),
        ErrorKind::InvalidInput | ErrorKind::InsufficientBalance | ErrorKind::InvalidState => {
            info!(kind = %error.kind(), "{} - rejected: {}", context, error)
        }
        ErrorKind::NoRouteFound | ErrorKind::QuoteExpired | ErrorKind::SlippageExceeded => {
            warn!(kind = %error.kind(), "{} - {}", context, error)
        }
        ErrorKind::UpstreamError if error.is_retryable() => {
            warn!(kind = %error.kind(), "{} - transient: {}", context, error)
        }
        ErrorKind::NetworkTimeout => {
            error!(kind = %error.kind(), signature = ?error.signature(), "{} - outcome unknown, verify on-chain: {}", context, error)
        }
        _ => error!(kind = %error.kind(), "{} - {}", context, error),
    }
}

/// Converts a reqwest error to a SwapError with additional context.
pub fn handle_reqwest_error(error: reqwest::Error, context: &str) -> SwapError {
    if error.is_timeout() {
        SwapError::Network(format!("{}: Request timed out - {}", context, error))
    } else if let Some(status) = error.status() {
        let code = status.as_u16();
        if is_transient_status(status) {
            SwapError::api(context, error.to_string(), Some(code))
        } else {
            SwapError::api(context, format!("HTTP {}: {}", code, error), Some(code))
        }
    } else if error.is_decode() {
        SwapError::Serialization(format!("{}: {}", context, error))
    } else {
        SwapError::Network(format!("{}: {}", context, error))
    }
}
