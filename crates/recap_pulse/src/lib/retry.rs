use std::{future::Future, path::PathBuf, sync::Arc, time::Duration};

use crate::{error::StepError, keypool::KeyPool, llm::Generator};

/// Retry policy for remote calls: bounded attempts with linear
/// backoff. This module is the single place failure policy lives;
/// stages never roll their own retry loops.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            backoff: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    /// Linear backoff: attempt × fixed delay.
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(attempt)
    }
}

/// Run a remote call with retry and credential rotation.
///
/// - `Transient` errors are retried in place, up to the attempt
///   ceiling, surfacing the last error once exhausted.
/// - `RateLimited` with a pool attached cools the current key and
///   immediately rotates to the next one, without sleeping, until the
///   pool reports none available. Without a pool there is nothing to
///   rotate, so the error is treated like a transient one.
/// - `Invalid` aborts at once.
///
/// The key passed to `op` is incremented only after a successful call;
/// calls that fail never consume quota.
pub async fn call_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    pool: Option<&KeyPool>,
    mut op: F,
) -> Result<T, StepError>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<T, StepError>>,
{
    let mut transient_attempts = 0u32;

    loop {
        let key = match pool {
            Some(pool) => match pool.get_available_key() {
                Some(key) => Some(key),
                None => {
                    return Err(StepError::rate_limited(anyhow::anyhow!(
                        "credential pool exhausted: every key is cooling down or at its daily cap"
                    )))
                }
            },
            None => None,
        };

        match op(key.clone()).await {
            Ok(value) => {
                if let (Some(pool), Some(key)) = (pool, key.as_deref()) {
                    pool.increment_count(key);
                }
                return Ok(value);
            }
            Err(StepError::RateLimited(e)) => match (pool, key.as_deref()) {
                (Some(pool), Some(key)) => {
                    tracing::warn!(error = %e, "Rate limited, rotating to next key");
                    pool.mark_rate_limited(key);
                }
                _ => {
                    transient_attempts += 1;
                    if transient_attempts >= policy.max_attempts {
                        return Err(StepError::RateLimited(e));
                    }
                    tokio::time::sleep(policy.delay_for_attempt(transient_attempts)).await;
                }
            },
            Err(StepError::Transient(e)) => {
                transient_attempts += 1;
                if transient_attempts >= policy.max_attempts {
                    return Err(StepError::Transient(e));
                }
                tracing::warn!(
                    error = %e,
                    attempt = transient_attempts,
                    "Transient failure, backing off"
                );
                tokio::time::sleep(policy.delay_for_attempt(transient_attempts)).await;
            }
            Err(fatal @ StepError::Invalid(_)) => return Err(fatal),
        }
    }
}

/// Placeholder secondary for a [`Resilient`] stack configured without
/// a fallback provider. Never invoked.
pub struct NoSecondary;

impl Generator for NoSecondary {
    const GENERATION_MODEL: &'static str = "none";

    async fn generate(
        &self,
        _prompt: &str,
        _attachments: &[PathBuf],
        _api_key: Option<&str>,
    ) -> Result<String, StepError> {
        Err(StepError::invalid(anyhow::anyhow!(
            "no secondary provider configured"
        )))
    }
}

/// A generative provider stack: primary provider with retry and
/// credential rotation, plus at most one attempt against a secondary
/// provider when the primary is fatal or the pool is exhausted.
pub struct Resilient<P, S = NoSecondary> {
    primary: P,
    secondary: Option<S>,
    pool: Option<Arc<KeyPool>>,
    policy: RetryPolicy,
}

impl<P: Generator> Resilient<P> {
    pub fn new(primary: P) -> Self {
        Resilient {
            primary,
            secondary: None,
            pool: None,
            policy: RetryPolicy::default(),
        }
    }
}

impl<P: Generator, S: Generator> Resilient<P, S> {
    pub fn with_pool(mut self, pool: Arc<KeyPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_fallback<S2: Generator>(self, secondary: S2) -> Resilient<P, S2> {
        self.with_optional_fallback(Some(secondary))
    }

    pub fn with_optional_fallback<S2: Generator>(self, secondary: Option<S2>) -> Resilient<P, S2> {
        Resilient {
            primary: self.primary,
            secondary,
            pool: self.pool,
            policy: self.policy,
        }
    }
}

impl<P, S> Generator for Resilient<P, S>
where
    P: Generator + Send + Sync,
    S: Generator + Send + Sync,
{
    const GENERATION_MODEL: &'static str = P::GENERATION_MODEL;

    async fn generate(
        &self,
        prompt: &str,
        attachments: &[PathBuf],
        api_key: Option<&str>,
    ) -> Result<String, StepError> {
        // An explicit per-call key bypasses the pool.
        let pool = match api_key {
            Some(_) => None,
            None => self.pool.as_deref(),
        };

        let primary_result = call_with_retry(&self.policy, pool, |key| {
            let key = key.or_else(|| api_key.map(str::to_string));
            async move {
                self.primary
                    .generate(prompt, attachments, key.as_deref())
                    .await
            }
        })
        .await;

        let primary_err = match primary_result {
            Ok(text) => return Ok(text),
            Err(e) => e,
        };

        let Some(secondary) = &self.secondary else {
            return Err(primary_err);
        };

        tracing::warn!(
            error = %primary_err,
            fallback_model = S::GENERATION_MODEL,
            "Primary provider failed, trying secondary once"
        );
        secondary.generate(prompt, attachments, None).await
    }
}
