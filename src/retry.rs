//! Wraps a [`Store`] so retryable operations are re-attempted under
//! exponential backoff.
//!
//! The delay function is attempt-indexed exponential growth with a hard
//! cap: base, multiply by a growth factor per attempt, clamp to a maximum.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Classifier, DefaultClassifier, ErrorClass, MigrationError};
use crate::store::{Kind, Payload, Store};

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            factor: 2.0,
        }
    }
}

impl BackoffPolicy {
    /// Delay before attempt `k` (k >= 1): min(MaxDelay, InitialDelay * Factor^(k-1)).
    pub fn delay_for_attempt(&self, k: u32) -> Duration {
        debug_assert!(k >= 1);
        let base = self.initial_delay.as_secs_f64() * self.factor.powi(k as i32 - 1);
        let secs = base.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(secs)
    }
}

/// Wraps a `Store` and retries retryable-classified errors under backoff.
/// Non-retryable errors fail fast on the first attempt.
pub struct RetryStore<S> {
    inner: S,
    policy: BackoffPolicy,
    classifier: Arc<dyn Classifier>,
}

impl<S: Store> RetryStore<S> {
    pub fn new(inner: S, policy: BackoffPolicy) -> Self {
        Self {
            inner,
            policy,
            classifier: Arc::new(DefaultClassifier),
        }
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn Classifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Runs `op` under the retry policy, returning a fully-classified
    /// [`MigrationError`] on final failure.
    async fn run_retryable<T, F, Fut>(&self, operation: &str, key: Option<&str>, mut op: F) -> Result<T, MigrationError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, String>>,
    {
        let mut attempt: u32 = 1;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(message) => {
                    let class = self.classifier.classify(&message);
                    let retryable = class.is_retryable();
                    let exhausted = attempt > self.policy.max_attempts;

                    if !retryable || exhausted {
                        let mut err = MigrationError::new(operation, message, class).with_attempt(attempt);
                        if let Some(k) = key {
                            err = err.with_key(k);
                        }
                        return Err(err);
                    }

                    let delay = self.policy.delay_for_attempt(attempt);
                    tracing::warn!(
                        operation,
                        key = key.unwrap_or(""),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        class = %class,
                        "retrying after transient failure"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[async_trait]
impl<S: Store> Store for RetryStore<S> {
    async fn connect(&self) -> Result<(), String> {
        self.run_retryable("connect", None, || self.inner.connect())
            .await
            .map_err(|e| e.message)
    }

    async fn ping(&self) -> Result<(), String> {
        self.run_retryable("ping", None, || self.inner.ping())
            .await
            .map_err(|e| e.message)
    }

    async fn enumerate(&self) -> Result<Vec<String>, String> {
        self.run_retryable("enumerate", None, || self.inner.enumerate())
            .await
            .map_err(|e| e.message)
    }

    async fn type_of(&self, key: &str) -> Result<Kind, String> {
        self.run_retryable("type_of", Some(key), || self.inner.type_of(key))
            .await
            .map_err(|e| e.message)
    }

    async fn read(&self, key: &str, kind: Kind) -> Result<Payload, String> {
        self.run_retryable("read", Some(key), || self.inner.read(key, kind))
            .await
            .map_err(|e| e.message)
    }

    async fn write(&self, key: &str, payload: &Payload) -> Result<(), String> {
        self.run_retryable("write", Some(key), || self.inner.write(key, payload))
            .await
            .map_err(|e| e.message)
    }

    async fn exists(&self, key: &str) -> Result<bool, String> {
        self.run_retryable("exists", Some(key), || self.inner.exists(key))
            .await
            .map_err(|e| e.message)
    }

    async fn ttl(&self, key: &str) -> Result<Option<std::time::Duration>, String> {
        self.run_retryable("ttl", Some(key), || self.inner.ttl(key))
            .await
            .map_err(|e| e.message)
    }

    async fn set_ttl(&self, key: &str, ttl: std::time::Duration) -> Result<(), String> {
        self.run_retryable("set_ttl", Some(key), || self.inner.set_ttl(key, ttl))
            .await
            .map_err(|e| e.message)
    }
}

impl<S: Store> RetryStore<S> {
    /// Like the `Store` methods above, but surfaces the fully classified
    /// [`MigrationError`] (with attempt count) instead of collapsing to a
    /// bare message. Used by the dispatcher/verifier, which need the
    /// class to decide fatal-vs-per-key handling.
    pub async fn read_classified(&self, key: &str, kind: Kind) -> Result<Payload, MigrationError> {
        self.run_retryable("read", Some(key), || self.inner.read(key, kind)).await
    }

    pub async fn write_classified(&self, key: &str, payload: &Payload) -> Result<(), MigrationError> {
        self.run_retryable("write", Some(key), || self.inner.write(key, payload)).await
    }

    pub async fn type_of_classified(&self, key: &str) -> Result<Kind, MigrationError> {
        self.run_retryable("type_of", Some(key), || self.inner.type_of(key)).await
    }

    pub async fn ttl_classified(&self, key: &str) -> Result<Option<Duration>, MigrationError> {
        self.run_retryable("ttl", Some(key), || self.inner.ttl(key)).await
    }

    pub async fn set_ttl_classified(&self, key: &str, ttl: Duration) -> Result<(), MigrationError> {
        self.run_retryable("set_ttl", Some(key), || self.inner.set_ttl(key, ttl)).await
    }

    pub async fn connect_classified(&self) -> Result<(), MigrationError> {
        self.run_retryable("connect", None, || self.inner.connect()).await
    }

    pub async fn ping_classified(&self) -> Result<(), MigrationError> {
        self.run_retryable("ping", None, || self.inner.ping()).await
    }

    pub async fn enumerate_classified(&self) -> Result<Vec<String>, MigrationError> {
        self.run_retryable("enumerate", None, || self.inner.enumerate()).await
    }
}
