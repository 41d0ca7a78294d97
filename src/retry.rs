//! Exponential backoff for transient classifier failures.
//!
//! [`RetryingClassifier`] wraps any [`Classifier`] and repeats a batch call
//! when the error is transient (rate limit, timeout, transport, HTTP 5xx).
//! Each attempt may be bounded by its own timeout, so a slow attempt is
//! retried like any other transient failure.

use async_trait::async_trait;
use std::time::Duration;
use tokio::time::timeout;

use crate::engine::{Classifier, ClassifierError};
use crate::types::{Batch, ClassificationResult, TableContext};

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Up to this fraction of the delay is added as jitter.
    pub jitter_fraction: f64,
    /// Limit for a single call to the inner classifier. Expiry counts as a
    /// transient failure of that attempt.
    pub attempt_timeout: Option<Duration>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter_fraction: 0.25,
            attempt_timeout: None,
        }
    }
}

impl RetryConfig {
    /// Backoff before retry number `attempt + 1`: the base delay doubled per
    /// attempt, stretched by a random jitter and capped at `max_delay`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let delay = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay);
        if self.jitter_fraction <= 0.0 {
            return delay;
        }
        delay
            .mul_f64(1.0 + rand::random::<f64>() * self.jitter_fraction)
            .min(self.max_delay)
    }
}

pub struct RetryingClassifier<C> {
    inner: C,
    config: RetryConfig,
}

impl<C: Classifier> RetryingClassifier<C> {
    pub fn new(inner: C, config: RetryConfig) -> Self {
        Self { inner, config }
    }

    async fn attempt(
        &self,
        context: &TableContext,
        batch: &Batch<'_>,
    ) -> Result<Vec<ClassificationResult>, ClassifierError> {
        match self.config.attempt_timeout {
            Some(limit) => timeout(limit, self.inner.classify(context, batch))
                .await
                .unwrap_or(Err(ClassifierError::Timeout)),
            None => self.inner.classify(context, batch).await,
        }
    }
}

#[async_trait]
impl<C: Classifier> Classifier for RetryingClassifier<C> {
    #[tracing::instrument(skip_all, fields(batch = batch.number, rows = batch.len()))]
    async fn classify(
        &self,
        context: &TableContext,
        batch: &Batch<'_>,
    ) -> Result<Vec<ClassificationResult>, ClassifierError> {
        let mut attempt = 0;
        loop {
            match self.attempt(context, batch).await {
                Ok(results) => {
                    if attempt > 0 {
                        tracing::debug!(attempt, "Batch classified after retry");
                    }
                    return Ok(results);
                }
                Err(err) if err.is_transient() && attempt < self.config.max_retries => {
                    let delay = self.config.backoff(attempt);
                    tracing::warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Retrying batch after transient error"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
