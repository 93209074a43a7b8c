//! Retry policy and eligibility.
//!
//! An error is retried only when every check passes, in order: the
//! combined signal has not aborted, attempts remain, the verb is
//! allowed, an HTTP error's status is in the configured list (an empty
//! list admits any HTTP error), and the custom condition (when set)
//! agrees. Delays are deterministic (fixed, linear or exponential with
//! a cap) unless jitter is explicitly enabled.

use crate::error::CallError;
use crate::signal::AbortSignal;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Backoff growth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryStrategy {
    /// The same delay every attempt.
    #[default]
    Linear,
    /// `delay * 2^(attempt-1)`, clipped at `max_delay_ms`.
    Exponential,
}

/// Base delay: fixed milliseconds or computed per attempt.
#[derive(Clone)]
pub enum RetryDelay {
    Fixed(u64),
    Fn(Arc<dyn Fn(u32) -> u64 + Send + Sync>),
}

impl std::fmt::Debug for RetryDelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fixed(ms) => write!(f, "Fixed({ms})"),
            Self::Fn(_) => f.write_str("Fn(..)"),
        }
    }
}

/// What a custom retry condition inspects.
pub struct RetryContext<'a> {
    pub error: &'a CallError,
    /// Zero-based attempt count of the failed try.
    pub attempt: u32,
    pub method: &'a str,
}

/// Custom veto over retry eligibility. May be async (e.g. consult a
/// circuit breaker).
#[async_trait]
pub trait RetryCondition: Send + Sync {
    async fn should_retry(&self, ctx: &RetryContext<'_>) -> bool;
}

/// The verbs retried by default: the idempotent set.
pub const DEFAULT_RETRY_METHODS: &[&str] = &["GET", "HEAD", "OPTIONS", "PUT", "DELETE"];

/// Retry configuration.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Maximum retries after the original try. `0` disables retry.
    pub attempts: u32,
    /// HTTP statuses eligible for retry; empty admits any HTTP error.
    pub status_codes: Vec<u16>,
    /// Verbs eligible for retry; empty admits any verb.
    pub methods: Vec<String>,
    pub delay: RetryDelay,
    pub max_delay_ms: u64,
    pub strategy: RetryStrategy,
    pub condition: Option<Arc<dyn RetryCondition>>,
    /// Randomize delays by up to `jitter_factor`. Off by default so
    /// backoff stays deterministic.
    pub use_jitter: bool,
    pub jitter_factor: f64,
}

impl std::fmt::Debug for dyn RetryCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RetryCondition")
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 0,
            status_codes: Vec::new(),
            methods: DEFAULT_RETRY_METHODS.iter().map(|m| m.to_string()).collect(),
            delay: RetryDelay::Fixed(1000),
            max_delay_ms: 10_000,
            strategy: RetryStrategy::Linear,
            condition: None,
            use_jitter: false,
            jitter_factor: 0.1,
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32) -> Self {
        Self {
            attempts,
            ..Self::default()
        }
    }

    pub fn with_status_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.status_codes = codes.into_iter().collect();
        self
    }

    pub fn with_methods(
        mut self,
        methods: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.methods = methods
            .into_iter()
            .map(|m| m.into().to_ascii_uppercase())
            .collect();
        self
    }

    pub fn with_delay_ms(mut self, ms: u64) -> Self {
        self.delay = RetryDelay::Fixed(ms);
        self
    }

    pub fn with_delay_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(u32) -> u64 + Send + Sync + 'static,
    {
        self.delay = RetryDelay::Fn(Arc::new(f));
        self
    }

    pub fn with_max_delay_ms(mut self, ms: u64) -> Self {
        self.max_delay_ms = ms;
        self
    }

    pub fn with_strategy(mut self, strategy: RetryStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_condition(mut self, condition: impl RetryCondition + 'static) -> Self {
        self.condition = Some(Arc::new(condition));
        self
    }

    pub fn with_jitter(mut self, use_jitter: bool) -> Self {
        self.use_jitter = use_jitter;
        self
    }

    /// Delay before retry number `next_attempt` (1-based).
    pub fn delay_for(&self, next_attempt: u32) -> Duration {
        let base = match &self.delay {
            RetryDelay::Fn(f) => return Duration::from_millis(f(next_attempt)),
            RetryDelay::Fixed(ms) => *ms,
        };
        let ms = match self.strategy {
            RetryStrategy::Linear => base,
            RetryStrategy::Exponential => {
                let factor = 2u64.saturating_pow(next_attempt.saturating_sub(1));
                base.saturating_mul(factor).min(self.max_delay_ms)
            }
        };
        let ms = if self.use_jitter { jitter(ms, self.jitter_factor) } else { ms };
        Duration::from_millis(ms)
    }

    /// Evaluate the five eligibility checks for an error raised on the
    /// given (zero-based) attempt.
    pub async fn eligible(
        &self,
        signal: &AbortSignal,
        attempt: u32,
        method: &str,
        error: &CallError,
    ) -> bool {
        if signal.is_aborted() {
            return false;
        }
        if attempt >= self.attempts {
            return false;
        }
        if !self.methods.is_empty()
            && !self
                .methods
                .iter()
                .any(|m| m.eq_ignore_ascii_case(method))
        {
            return false;
        }
        if let Some(status) = error.status() {
            if !self.status_codes.is_empty() && !self.status_codes.contains(&status) {
                return false;
            }
        }
        if let Some(condition) = &self.condition {
            let ctx = RetryContext {
                error,
                attempt,
                method,
            };
            if !condition.should_retry(&ctx).await {
                return false;
            }
        }
        true
    }
}

fn jitter(ms: u64, factor: f64) -> u64 {
    use rand::Rng;
    let range = ms as f64 * factor.clamp(0.0, 1.0);
    if range <= 0.0 {
        return ms;
    }
    let offset = rand::thread_rng().gen_range(-range..=range);
    (ms as f64 + offset).max(0.0) as u64
}

/// Sleep through the retry delay, bailing out early if the signal
/// aborts.
pub(crate) async fn wait_for_retry(
    policy: &RetryPolicy,
    next_attempt: u32,
    signal: &AbortSignal,
) -> Result<(), CallError> {
    let delay = policy.delay_for(next_attempt);
    tracing::debug!(
        target: "callwire::retry",
        next_attempt,
        delay_ms = delay.as_millis() as u64,
        "waiting before retry"
    );
    tokio::select! {
        _ = signal.aborted() => Err(signal.abort_error()),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::BufferedResponse;
    use crate::signal::AbortController;
    use bytes::Bytes;
    use reqwest::StatusCode;
    use reqwest::header::HeaderMap;

    fn http_error(status: u16) -> CallError {
        CallError::Http {
            status,
            message: "err".into(),
            error_data: None,
            response: BufferedResponse::new(
                StatusCode::from_u16(status).unwrap(),
                HeaderMap::new(),
                "https://x/y".into(),
                Bytes::new(),
            ),
        }
    }

    #[test]
    fn exponential_delays_double_and_clip() {
        let policy = RetryPolicy::new(5)
            .with_delay_ms(100)
            .with_strategy(RetryStrategy::Exponential)
            .with_max_delay_ms(350);
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(350));
        assert_eq!(policy.delay_for(4), Duration::from_millis(350));
    }

    #[test]
    fn linear_delay_is_constant() {
        let policy = RetryPolicy::new(3).with_delay_ms(250);
        assert_eq!(policy.delay_for(1), Duration::from_millis(250));
        assert_eq!(policy.delay_for(3), Duration::from_millis(250));
    }

    #[test]
    fn delay_fn_overrides_strategy() {
        let policy = RetryPolicy::new(3)
            .with_delay_fn(|attempt| u64::from(attempt) * 7)
            .with_strategy(RetryStrategy::Exponential);
        assert_eq!(policy.delay_for(2), Duration::from_millis(14));
    }

    #[tokio::test]
    async fn attempts_bound_eligibility() {
        let policy = RetryPolicy::new(2);
        let signal = AbortController::new().signal();
        let err = http_error(500);
        assert!(policy.eligible(&signal, 0, "GET", &err).await);
        assert!(policy.eligible(&signal, 1, "GET", &err).await);
        assert!(!policy.eligible(&signal, 2, "GET", &err).await);
    }

    #[tokio::test]
    async fn aborted_signal_blocks_retry() {
        let controller = AbortController::new();
        controller.abort(crate::signal::AbortReason::user("stop"));
        let policy = RetryPolicy::new(3);
        assert!(
            !policy
                .eligible(&controller.signal(), 0, "GET", &http_error(500))
                .await
        );
    }

    #[tokio::test]
    async fn method_list_filters_verbs() {
        let policy = RetryPolicy::new(3);
        let signal = AbortController::new().signal();
        let err = http_error(500);
        assert!(!policy.eligible(&signal, 0, "POST", &err).await);

        let open = RetryPolicy::new(3).with_methods(Vec::<String>::new());
        assert!(open.eligible(&signal, 0, "POST", &err).await);
    }

    #[tokio::test]
    async fn status_list_filters_http_errors() {
        let policy = RetryPolicy::new(3).with_status_codes([503]);
        let signal = AbortController::new().signal();
        assert!(policy.eligible(&signal, 0, "GET", &http_error(503)).await);
        assert!(!policy.eligible(&signal, 0, "GET", &http_error(500)).await);

        // Empty list admits any HTTP error.
        let open = RetryPolicy::new(3);
        assert!(open.eligible(&signal, 0, "GET", &http_error(418)).await);
    }

    #[tokio::test]
    async fn non_http_errors_skip_the_status_check() {
        let policy = RetryPolicy::new(3).with_status_codes([503]);
        let signal = AbortController::new().signal();
        assert!(
            policy
                .eligible(&signal, 0, "GET", &CallError::network("reset"))
                .await
        );
    }

    #[tokio::test]
    async fn custom_condition_has_the_last_word() {
        struct Never;
        #[async_trait]
        impl RetryCondition for Never {
            async fn should_retry(&self, _ctx: &RetryContext<'_>) -> bool {
                false
            }
        }
        let policy = RetryPolicy::new(3).with_condition(Never);
        let signal = AbortController::new().signal();
        assert!(!policy.eligible(&signal, 0, "GET", &http_error(500)).await);
    }

    #[tokio::test]
    async fn wait_for_retry_is_cancellation_aware() {
        let controller = AbortController::new();
        let policy = RetryPolicy::new(1).with_delay_ms(60_000);
        let signal = controller.signal();
        let waiter = tokio::spawn(async move { wait_for_retry(&policy, 1, &signal).await });
        tokio::task::yield_now().await;
        controller.abort(crate::signal::AbortReason::user("give up"));
        let result = tokio::time::timeout(Duration::from_millis(500), waiter)
            .await
            .expect("abort should wake the sleeper")
            .expect("task ok");
        assert_eq!(result.unwrap_err().name(), "AbortError");
    }
}
