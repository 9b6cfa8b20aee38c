//! Retry engine
//!
//! Wraps a single invocation attempt with idempotency-aware retry logic.
//! Idempotency is declared per capability, never inferred from the error:
//! a non-idempotent capability is attempted at most once no matter what
//! failed, because re-running a side-effecting action on a transient error
//! can duplicate the side effect.

use crate::error::{ErrorKind, InvokeError};
use crate::invocation::{ContentBlock, InvocationResult};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, sleep, timeout_at};
use tracing::{debug, warn};

/// Per-capability retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum attempts including the first
    pub max_attempts: u32,
    /// Delay before the first retry
    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,
    /// Exponential multiplier between retries
    pub backoff_multiplier: f64,
    /// Cap on the inter-attempt delay
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
    /// Whether the capability is safe to execute more than once
    pub idempotent: bool,
    /// Error kinds eligible for retry (idempotent capabilities only)
    #[serde(default)]
    pub retryable_error_kinds: HashSet<ErrorKind>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::conservative()
    }
}

impl RetryPolicy {
    /// The default for unregistered capabilities: one attempt, not idempotent
    pub fn conservative() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::from_millis(500),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            idempotent: false,
            retryable_error_kinds: HashSet::new(),
        }
    }

    /// A policy for idempotent capabilities retrying timeouts and
    /// transport failures
    pub fn idempotent(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            idempotent: true,
            retryable_error_kinds: [ErrorKind::Timeout, ErrorKind::Transport]
                .into_iter()
                .collect(),
            ..Self::conservative()
        }
    }

    /// Set max attempts
    pub fn with_max_attempts(mut self, max: u32) -> Self {
        self.max_attempts = max;
        self
    }

    /// Set the initial delay
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the backoff multiplier
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Set the delay cap
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Add an error kind to the retryable set
    pub fn retry_on(mut self, kind: ErrorKind) -> Self {
        self.retryable_error_kinds.insert(kind);
        self
    }

    /// Delay before retrying after the given attempt (1-indexed):
    /// `min(initial * multiplier^(attempt-1), max)`
    pub fn delay_after_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let raw = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent as i32);
        Duration::from_secs_f64(raw.min(self.max_delay.as_secs_f64()))
    }

    fn should_retry(&self, error: &InvokeError, attempts_made: u32) -> bool {
        self.idempotent
            && attempts_made < self.max_attempts
            && self.retryable_error_kinds.contains(&error.kind())
            && error.permits_retry()
    }
}

/// Hook producing a degraded-but-successful result once retries are spent
pub type FallbackFn = Arc<dyn Fn(&InvokeError) -> Vec<ContentBlock> + Send + Sync>;

struct PolicyEntry {
    policy: RetryPolicy,
    fallback: Option<FallbackFn>,
}

/// Policy table plus the attempt loop
pub struct RetryEngine {
    policies: DashMap<String, PolicyEntry>,
    default_policy: RetryPolicy,
}

impl RetryEngine {
    /// Create an engine with the conservative default policy
    pub fn new() -> Self {
        Self {
            policies: DashMap::new(),
            default_policy: RetryPolicy::conservative(),
        }
    }

    /// Override the policy used for unregistered capabilities
    pub fn with_default_policy(mut self, policy: RetryPolicy) -> Self {
        self.default_policy = policy;
        self
    }

    /// Register a policy for a capability
    pub fn set_policy(&self, capability: impl Into<String>, policy: RetryPolicy) {
        self.policies.insert(
            capability.into(),
            PolicyEntry {
                policy,
                fallback: None,
            },
        );
    }

    /// Register a policy together with a fallback hook
    pub fn set_policy_with_fallback(
        &self,
        capability: impl Into<String>,
        policy: RetryPolicy,
        fallback: FallbackFn,
    ) {
        self.policies.insert(
            capability.into(),
            PolicyEntry {
                policy,
                fallback: Some(fallback),
            },
        );
    }

    /// The policy that applies to a capability
    pub fn policy_for(&self, capability: &str) -> RetryPolicy {
        self.policies
            .get(capability)
            .map(|e| e.policy.clone())
            .unwrap_or_else(|| self.default_policy.clone())
    }

    fn fallback_for(&self, capability: &str) -> Option<FallbackFn> {
        self.policies
            .get(capability)
            .and_then(|e| e.fallback.clone())
    }

    /// Run `attempt_fn` under the capability's policy until success,
    /// exhaustion, or the deadline.
    ///
    /// Each call of `attempt_fn` performs exactly one try. Attempts are
    /// strictly sequential; deadline expiry during an attempt or a backoff
    /// sleep becomes a `Timeout` failure subject to the same retry rules.
    pub async fn execute<F, Fut>(
        &self,
        capability: &str,
        deadline: Instant,
        mut attempt_fn: F,
    ) -> InvocationResult
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Vec<ContentBlock>, InvokeError>>,
    {
        let policy = self.policy_for(capability);
        let fallback = self.fallback_for(capability);
        let mut attempts = 0u32;

        loop {
            attempts += 1;

            let outcome = if Instant::now() >= deadline {
                Err(InvokeError::Timeout)
            } else {
                match timeout_at(deadline, attempt_fn()).await {
                    Ok(result) => result,
                    Err(_) => Err(InvokeError::Timeout),
                }
            };

            let error = match outcome {
                Ok(content) => return InvocationResult::success(content, attempts),
                Err(error) => error,
            };

            if !policy.should_retry(&error, attempts) {
                return self.finish_failure(capability, error, attempts, fallback);
            }

            let delay = policy.delay_after_attempt(attempts);
            debug!(
                capability,
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "retrying after failure"
            );
            if timeout_at(deadline, sleep(delay)).await.is_err() {
                return self.finish_failure(capability, InvokeError::Timeout, attempts, fallback);
            }
        }
    }

    fn finish_failure(
        &self,
        capability: &str,
        error: InvokeError,
        attempts: u32,
        fallback: Option<FallbackFn>,
    ) -> InvocationResult {
        if let Some(fallback) = fallback {
            warn!(capability, attempts, error = %error, "retries spent, using fallback");
            return InvocationResult::success(fallback(&error), attempts);
        }
        InvocationResult::failure(error, attempts)
    }
}

impl Default for RetryEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invocation::InvocationStatus;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(60)
    }

    fn fast(policy: RetryPolicy) -> RetryPolicy {
        policy
            .with_initial_delay(Duration::from_millis(1))
            .with_max_delay(Duration::from_millis(5))
    }

    #[tokio::test]
    async fn test_success_first_try() {
        let engine = RetryEngine::new();
        let result = engine
            .execute("echo", far_deadline(), || async {
                Ok(vec![ContentBlock::text("hi")])
            })
            .await;

        assert!(result.is_success());
        assert_eq!(result.attempts, 1);
    }

    #[tokio::test]
    async fn test_non_idempotent_single_attempt_even_for_retryable_kind() {
        let engine = RetryEngine::new();
        engine.set_policy(
            "write_file",
            RetryPolicy::conservative().with_max_attempts(5),
        );
        let calls = AtomicU32::new(0);

        let result = engine
            .execute("write_file", far_deadline(), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(InvokeError::transport("connection reset")) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.attempts, 1);
        assert_eq!(result.error_kind(), Some(ErrorKind::Transport));
    }

    #[tokio::test]
    async fn test_unregistered_capability_uses_conservative_default() {
        let engine = RetryEngine::new();
        let calls = AtomicU32::new(0);

        let result = engine
            .execute("unknown_cap", far_deadline(), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(InvokeError::Timeout) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.attempts, 1);
    }

    #[tokio::test]
    async fn test_idempotent_exhausts_all_attempts() {
        let engine = RetryEngine::new();
        engine.set_policy("web_fetch", fast(RetryPolicy::idempotent(4)));
        let calls = AtomicU32::new(0);

        let result = engine
            .execute("web_fetch", far_deadline(), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(InvokeError::Timeout) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(result.status, InvocationStatus::Failure);
        assert_eq!(result.attempts, 4);
        assert_eq!(result.error_kind(), Some(ErrorKind::Timeout));
    }

    #[tokio::test]
    async fn test_succeeds_on_third_attempt() {
        let engine = RetryEngine::new();
        engine.set_policy("web_fetch", fast(RetryPolicy::idempotent(3)));
        let calls = AtomicU32::new(0);

        let result = engine
            .execute("web_fetch", far_deadline(), || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(InvokeError::Timeout)
                    } else {
                        Ok(vec![ContentBlock::text("fetched")])
                    }
                }
            })
            .await;

        assert!(result.is_success());
        assert_eq!(result.attempts, 3);
    }

    #[tokio::test]
    async fn test_non_retryable_kind_returns_immediately() {
        let engine = RetryEngine::new();
        engine.set_policy("web_fetch", fast(RetryPolicy::idempotent(5)));
        let calls = AtomicU32::new(0);

        let result = engine
            .execute("web_fetch", far_deadline(), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(InvokeError::remote_execution("file not found")) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.attempts, 1);
    }

    #[tokio::test]
    async fn test_remote_retryable_tag_respected() {
        let engine = RetryEngine::new();
        engine.set_policy(
            "web_fetch",
            fast(RetryPolicy::idempotent(3).retry_on(ErrorKind::RemoteExecution)),
        );
        let calls = AtomicU32::new(0);

        let result = engine
            .execute("web_fetch", far_deadline(), || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(InvokeError::remote_execution_retryable("upstream 503")) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(result.attempts, 3);
    }

    #[tokio::test]
    async fn test_deadline_cuts_backoff_sleep() {
        let engine = RetryEngine::new();
        engine.set_policy(
            "web_fetch",
            RetryPolicy::idempotent(5).with_initial_delay(Duration::from_secs(30)),
        );

        let deadline = Instant::now() + Duration::from_millis(50);
        let result = engine
            .execute("web_fetch", deadline, || async {
                Err(InvokeError::transport("flaky"))
            })
            .await;

        assert_eq!(result.error_kind(), Some(ErrorKind::Timeout));
        assert_eq!(result.attempts, 1);
    }

    #[tokio::test]
    async fn test_fallback_turns_exhaustion_into_degraded_success() {
        let engine = RetryEngine::new();
        engine.set_policy_with_fallback(
            "weather",
            fast(RetryPolicy::idempotent(2)),
            Arc::new(|_err| vec![ContentBlock::text("cached forecast")]),
        );

        let result = engine
            .execute("weather", far_deadline(), || async {
                Err(InvokeError::Timeout)
            })
            .await;

        assert!(result.is_success());
        assert_eq!(result.attempts, 2);
        assert_eq!(result.text(), "cached forecast");
    }

    #[test]
    fn test_delay_schedule_capped() {
        let policy = RetryPolicy::idempotent(10)
            .with_initial_delay(Duration::from_millis(100))
            .with_backoff_multiplier(2.0)
            .with_max_delay(Duration::from_millis(400));

        assert_eq!(policy.delay_after_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_after_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_after_attempt(3), Duration::from_millis(400));
        assert_eq!(policy.delay_after_attempt(4), Duration::from_millis(400));
    }
}
