//! The Type Dispatcher (Processor): per-key transfer procedure, driven
//! concurrently over a bounded worker pool.
//!
//! A `futures::stream::iter(...).for_each_concurrent(...)` loop, atomic
//! stats, and `Mutex<Vec<_>>` accumulators for per-item outcomes.

use futures::stream::{self, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::config::TimeoutConfig;
use crate::error::{ErrorClass, MigrationError};
use crate::logging::Logger;
use crate::monitor::ProgressCounters;
use crate::resume::ResumeState;
use crate::retry::RetryStore;
use crate::store::{Kind, Store};

/// Outcome of transferring a single key, used by the engine to decide how
/// to update counters, the resume checkpoint, and the error aggregator.
#[derive(Debug)]
pub enum KeyOutcome {
    /// `TypeOf` reported `none`: the key no longer exists. Not a failure.
    Gone,
    Transferred { bytes_estimate: u64 },
    Failed(MigrationError),
}

fn element_count(payload: &crate::store::Payload) -> usize {
    match payload {
        crate::store::Payload::String(v) => v.len(),
        crate::store::Payload::Hash(v) => v.len(),
        crate::store::Payload::List(v) => v.len(),
        crate::store::Payload::Set(v) => v.len(),
        crate::store::Payload::SortedSet(v) => v.len(),
        crate::store::Payload::None => 0,
    }
}

fn estimate_bytes(payload: &crate::store::Payload) -> u64 {
    match payload {
        crate::store::Payload::String(v) => v.len() as u64,
        crate::store::Payload::Hash(v) => v.iter().map(|(k, val)| (k.len() + val.len()) as u64).sum(),
        crate::store::Payload::List(v) | crate::store::Payload::Set(v) => v.iter().map(|e| e.len() as u64).sum(),
        crate::store::Payload::SortedSet(v) => v.iter().map(|m| m.member.len() as u64 + 8).sum(),
        crate::store::Payload::None => 0,
    }
}

/// The single-key transfer procedure: query type, read, write, propagate TTL, log.
pub async fn transfer_key<S1: Store, S2: Store>(
    source: &RetryStore<S1>,
    target: &RetryStore<S2>,
    timeouts: &TimeoutConfig,
    logger: &dyn Logger,
    key: &str,
) -> KeyOutcome {
    let start = Instant::now();

    // Step 1: query type.
    let kind = match source.type_of_classified(key).await {
        Ok(Kind::None) => {
            logger.log_key_transfer(key, "none", 0, true, start.elapsed(), None);
            return KeyOutcome::Gone;
        }
        Ok(k) => k,
        Err(e) => {
            logger.log_key_transfer(key, "unknown", 0, false, start.elapsed(), Some(&e.message));
            return KeyOutcome::Failed(e);
        }
    };

    // Step 2/3: the element count isn't known before the read, so the read
    // itself runs under the unscaled base deadline for its kind.
    let read_deadline = timeouts.deadline_for(kind, 0);
    let payload = match tokio::time::timeout(read_deadline, source.read_classified(key, kind)).await {
        Ok(Ok(p)) => p,
        Ok(Err(e)) => {
            logger.log_key_transfer(key, kind.as_str(), 0, false, start.elapsed(), Some(&e.message));
            return KeyOutcome::Failed(e);
        }
        Err(_) => {
            let e = MigrationError::new("read", "operation timed out", ErrorClass::Network).with_key(key.to_string());
            logger.log_key_transfer(key, kind.as_str(), 0, false, start.elapsed(), Some(&e.message));
            return KeyOutcome::Failed(e);
        }
    };

    let bytes_estimate = estimate_bytes(&payload);

    // Now that the element count is known, the write deadline is scaled
    // per the large-data threshold/multiplier.
    let write_deadline = timeouts.deadline_for(kind, element_count(&payload));
    let write_result = tokio::time::timeout(write_deadline, target.write_classified(key, &payload)).await;
    if let Err(e) = match write_result {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(MigrationError::new("write", "operation timed out", ErrorClass::Network).with_key(key.to_string())),
    } {
        logger.log_key_transfer(key, kind.as_str(), bytes_estimate, false, start.elapsed(), Some(&e.message));
        return KeyOutcome::Failed(e);
    }

    // Step 5: propagate TTL. A TTL read failure is a warning, not a
    // per-key failure — we proceed without setting a TTL.
    match source.ttl_classified(key).await {
        Ok(Some(ttl)) if ttl > Duration::ZERO => {
            if let Err(e) = target.set_ttl_classified(key, ttl).await {
                tracing::warn!(key, error = %e.message, "failed to propagate ttl; continuing without it");
            }
        }
        Ok(_) => {}
        Err(e) => {
            tracing::warn!(key, error = %e.message, "failed to read source ttl; continuing without it");
        }
    }

    // Step 6: per-key transfer record.
    logger.log_key_transfer(key, kind.as_str(), bytes_estimate, true, start.elapsed(), None);

    KeyOutcome::Transferred { bytes_estimate }
}

/// Counts specific to this dispatch pass, kept separate from
/// [`ProgressCounters`] (which is shared with the monitor and only tracks
/// the total/processed/failed triple).
#[derive(Debug, Default)]
pub struct DispatchStats {
    pub processed: AtomicUsize,
    pub failed: AtomicUsize,
    pub skipped_already_done: AtomicUsize,
    pub skipped_gone: AtomicUsize,
}

/// What the engine should do once a dispatch pass ends.
pub enum DispatchResult {
    Completed,
    /// A Critical error, or a non-Critical error under a
    /// non-continue-on-error policy, aborted the pool.
    AbortedByError { reason: String },
    /// The shared cancellation token was cancelled externally (signal or
    /// engine-initiated shutdown) without any dispatcher error.
    AbortedByCancellation,
}

/// Drives the bounded-concurrency worker pool over `keys`, skipping ones
/// already in the Resume State's completed set. Marks completion and
/// flushes the checkpoint every `flush_every` completions.
#[allow(clippy::too_many_arguments)]
pub async fn run_transfer_pool<S1: Store, S2: Store>(
    source: Arc<RetryStore<S1>>,
    target: Arc<RetryStore<S2>>,
    timeouts: TimeoutConfig,
    logger: Arc<dyn Logger>,
    keys: Vec<String>,
    resume: Arc<RwLock<ResumeState>>,
    resume_file: std::path::PathBuf,
    flush_every: usize,
    max_concurrency: usize,
    continue_on_error: bool,
    cancel: CancellationToken,
    progress: Arc<ProgressCounters>,
) -> (DispatchStats, Vec<MigrationError>, DispatchResult) {
    let stats = Arc::new(DispatchStats::default());
    let errors = Arc::new(Mutex::new(Vec::<MigrationError>::new()));
    let completions_since_flush = Arc::new(AtomicUsize::new(0));
    let abort_reason: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));

    let pending: Vec<String> = {
        let guard = resume.read().await;
        keys.into_iter().filter(|k| !guard.is_completed(k)).collect()
    };

    stream::iter(pending)
        .for_each_concurrent(max_concurrency, |key| {
            let source = source.clone();
            let target = target.clone();
            let timeouts = timeouts.clone();
            let logger = logger.clone();
            let stats = stats.clone();
            let errors = errors.clone();
            let resume = resume.clone();
            let resume_file = resume_file.clone();
            let completions_since_flush = completions_since_flush.clone();
            let abort_reason = abort_reason.clone();
            let cancel = cancel.clone();
            let progress = progress.clone();

            async move {
                if cancel.is_cancelled() {
                    return;
                }
                if abort_reason.lock().await.is_some() && !continue_on_error {
                    return;
                }

                // transfer_key applies its own per-operation deadlines for
                // the read and write steps; here we only race against
                // cancellation.
                let outcome = tokio::select! {
                    _ = cancel.cancelled() => {
                        return;
                    }
                    o = transfer_key(&source, &target, &timeouts, logger.as_ref(), &key) => o,
                };

                match outcome {
                    KeyOutcome::Gone => {
                        stats.skipped_gone.fetch_add(1, Ordering::Relaxed);
                    }
                    KeyOutcome::Transferred { .. } => {
                        {
                            let mut guard = resume.write().await;
                            guard.mark_completed(&key);
                        }
                        stats.processed.fetch_add(1, Ordering::Relaxed);
                        progress.increment_processed();

                        let n = completions_since_flush.fetch_add(1, Ordering::SeqCst) + 1;
                        if n % flush_every == 0 {
                            let guard = resume.read().await;
                            if let Err(e) = guard.save(&resume_file) {
                                tracing::error!(error = %e, "failed to flush resume checkpoint");
                            }
                        }
                    }
                    KeyOutcome::Failed(err) => {
                        stats.failed.fetch_add(1, Ordering::Relaxed);
                        progress.increment_failed();
                        let class = err.class;
                        errors.lock().await.push(err.clone());

                        if class.is_fatal_to_engine() || (!continue_on_error && class != ErrorClass::Critical) {
                            let mut reason = abort_reason.lock().await;
                            if reason.is_none() {
                                *reason = Some(format!("{class} error on key {key}: {}", err.message));
                            }
                            cancel.cancel();
                        }
                    }
                }
            }
        })
        .await;

    // Final flush, regardless of the M-completion cadence.
    {
        let guard = resume.read().await;
        if let Err(e) = guard.save(&resume_file) {
            tracing::error!(error = %e, "failed to flush resume checkpoint at end of pass");
        }
    }

    let stats = Arc::try_unwrap(stats).unwrap_or_default();
    let errors = Arc::try_unwrap(errors).map(|m| m.into_inner()).unwrap_or_default();
    let result = match Arc::try_unwrap(abort_reason).ok().and_then(|m| m.into_inner()) {
        Some(reason) => DispatchResult::AbortedByError { reason },
        None if cancel.is_cancelled() => DispatchResult::AbortedByCancellation,
        None => DispatchResult::Completed,
    };

    (stats, errors, result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::NullLogger;
    use crate::retry::BackoffPolicy;
    use crate::store::mock::MockStore;
    use crate::store::{Payload, ScoredMember};
    use tempfile::tempdir;

    fn timeouts() -> TimeoutConfig {
        TimeoutConfig::default()
    }

    #[tokio::test]
    async fn transfers_a_string_with_ttl() {
        let source = MockStore::new();
        source.seed("a", Payload::String(b"x".to_vec()), None);
        source.seed("b", Payload::String(b"y".to_vec()), Some(Duration::from_secs(300)));
        let target = MockStore::new();

        let source = RetryStore::new(source, BackoffPolicy::default());
        let target = RetryStore::new(target, BackoffPolicy::default());
        let logger = NullLogger;

        let outcome_a = transfer_key(&source, &target, &timeouts(), &logger, "a").await;
        assert!(matches!(outcome_a, KeyOutcome::Transferred { .. }));
        let outcome_b = transfer_key(&source, &target, &timeouts(), &logger, "b").await;
        assert!(matches!(outcome_b, KeyOutcome::Transferred { .. }));
    }

    #[tokio::test]
    async fn none_kind_is_gone_not_failure() {
        let source = MockStore::new();
        let target = MockStore::new();
        let source = RetryStore::new(source, BackoffPolicy::default());
        let target = RetryStore::new(target, BackoffPolicy::default());
        let logger = NullLogger;

        let outcome = transfer_key(&source, &target, &timeouts(), &logger, "ghost").await;
        assert!(matches!(outcome, KeyOutcome::Gone));
    }

    #[tokio::test]
    async fn list_order_is_preserved() {
        let source_store = MockStore::new();
        let list = Payload::List(vec![b"item1".to_vec(), b"item2".to_vec(), b"item3".to_vec()]);
        source_store.seed("l", list.clone(), None);
        let target_store = MockStore::new();

        let source = RetryStore::new(source_store, BackoffPolicy::default());
        let target = RetryStore::new(target_store, BackoffPolicy::default());
        let logger = NullLogger;

        let outcome = transfer_key(&source, &target, &timeouts(), &logger, "l").await;
        assert!(matches!(outcome, KeyOutcome::Transferred { .. }));

        let written = target.read_classified("l", Kind::List).await.unwrap();
        assert_eq!(written, list);
    }

    #[tokio::test]
    async fn sorted_set_scores_round_trip_bit_exact() {
        let source = MockStore::new();
        source.seed(
            "z",
            Payload::SortedSet(vec![
                ScoredMember { member: b"m1".to_vec(), score: 1.0 },
                ScoredMember { member: b"m2".to_vec(), score: 2.0 },
            ]),
            None,
        );
        let target = MockStore::new();
        let source = RetryStore::new(source, BackoffPolicy::default());
        let target = RetryStore::new(target, BackoffPolicy::default());
        let logger = NullLogger;

        let outcome = transfer_key(&source, &target, &timeouts(), &logger, "z").await;
        assert!(matches!(outcome, KeyOutcome::Transferred { .. }));
    }

    #[tokio::test]
    async fn run_transfer_pool_skips_already_completed_keys() {
        let dir = tempdir().unwrap();
        let resume_path = dir.path().join("resume.json");

        let source = MockStore::new();
        source.seed("a", Payload::String(b"1".to_vec()), None);
        source.seed("b", Payload::String(b"2".to_vec()), None);
        let target = MockStore::new();

        let source = Arc::new(RetryStore::new(source, BackoffPolicy::default()));
        let target = Arc::new(RetryStore::new(target, BackoffPolicy::default()));
        let logger: Arc<dyn Logger> = Arc::new(NullLogger);

        let mut resume_state = ResumeState::load_or_init(&resume_path, 2);
        resume_state.mark_completed("a");
        let resume = Arc::new(RwLock::new(resume_state));

        let (stats, errors, _result) = run_transfer_pool(
            source,
            target,
            timeouts(),
            logger,
            vec!["a".to_string(), "b".to_string()],
            resume.clone(),
            resume_path,
            100,
            4,
            true,
            CancellationToken::new(),
            Arc::new(ProgressCounters::new(2)),
        )
        .await;

        assert_eq!(stats.processed.load(Ordering::Relaxed), 1);
        assert!(errors.is_empty());
        assert!(resume.read().await.is_completed("b"));
    }

    #[tokio::test]
    async fn critical_error_aborts_the_pool() {
        let dir = tempdir().unwrap();
        let resume_path = dir.path().join("resume.json");

        let source = MockStore::new();
        source.seed("a", Payload::String(b"1".to_vec()), None);
        source.fail_next_read_with("totally unexpected failure");
        let target = MockStore::new();

        let source = Arc::new(RetryStore::new(source, BackoffPolicy::default()));
        let target = Arc::new(RetryStore::new(target, BackoffPolicy::default()));
        let logger: Arc<dyn Logger> = Arc::new(NullLogger);
        let resume = Arc::new(RwLock::new(ResumeState::load_or_init(&resume_path, 1)));

        let (stats, errors, result) = run_transfer_pool(
            source,
            target,
            timeouts(),
            logger,
            vec!["a".to_string()],
            resume,
            resume_path,
            100,
            4,
            true,
            CancellationToken::new(),
            Arc::new(ProgressCounters::new(1)),
        )
        .await;

        assert_eq!(stats.failed.load(Ordering::Relaxed), 1);
        assert_eq!(errors.len(), 1);
        assert!(matches!(result, DispatchResult::AbortedByError { .. }));
    }
}
