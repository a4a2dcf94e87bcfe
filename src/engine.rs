//! The Migration Engine: orchestrates Connecting → Scanning →
//! Transferring → Verifying → Succeeded (with FailedFast/Terminated/
//! CompletedWithVerificationErrors branches), owning the Resume State,
//! the shutdown manager, and the error aggregator.
//!
//! The overall shape — connect once, do the work, always clean up
//! regardless of outcome — mirrors a long-lived service's top-level run
//! loop: open connections once, run to completion or failure, tear down
//! on exit.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::config::MigrationConfig;
use crate::dispatcher::{self, DispatchResult};
use crate::error::{MigrationError, MultiError};
use crate::logging::Logger;
use crate::monitor::{ProgressCounters, ProgressMonitor};
use crate::resume::ResumeState;
use crate::retry::{BackoffPolicy, RetryStore};
use crate::scanner;
use crate::shutdown::{self, ShutdownManager};
use crate::store::Store;
use crate::verifier;

const CHECKPOINT_EVERY: usize = 100;
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(30);

#[derive(Debug)]
pub enum EngineOutcome {
    Succeeded { processed: usize, failed: usize },
    FailedFast { reason: String },
    Terminated,
    /// The transfer pool ran to completion, but one or more per-key
    /// errors were collected along the way (continue-on-error tolerated
    /// them rather than aborting). Carries the aggregate so callers can
    /// inspect every failure, not just a count.
    CompletedWithErrors { transfer_failures: MultiError },
    CompletedWithVerificationErrors { verification_failures: Vec<MigrationError> },
}

impl EngineOutcome {
    /// Exit codes are not contractual across versions; 0 only for a clean
    /// success.
    pub fn exit_code(&self) -> i32 {
        match self {
            EngineOutcome::Succeeded { .. } => 0,
            EngineOutcome::FailedFast { .. } => 1,
            EngineOutcome::Terminated => 2,
            EngineOutcome::CompletedWithVerificationErrors { .. } => 3,
            EngineOutcome::CompletedWithErrors { .. } => 4,
        }
    }
}

pub struct MigrationEngine<S1, S2> {
    config: MigrationConfig,
    source: Arc<RetryStore<S1>>,
    target: Arc<RetryStore<S2>>,
    logger: Arc<dyn Logger>,
    shutdown: Arc<ShutdownManager>,
}

impl<S1, S2> MigrationEngine<S1, S2>
where
    S1: Store + 'static,
    S2: Store + 'static,
{
    pub fn new(config: MigrationConfig, source: S1, target: S2, logger: Arc<dyn Logger>) -> Self {
        let policy = BackoffPolicy {
            max_attempts: config.retry_attempts,
            ..BackoffPolicy::default()
        };
        Self {
            source: Arc::new(RetryStore::new(source, policy)),
            target: Arc::new(RetryStore::new(target, policy)),
            shutdown: Arc::new(ShutdownManager::new(SHUTDOWN_DEADLINE)),
            logger,
            config,
        }
    }

    async fn connect_and_ping(&self) -> Result<(), MigrationError> {
        self.source.connect_classified().await?;
        self.source.ping_classified().await?;
        self.target.connect_classified().await?;
        self.target.ping_classified().await?;
        Ok(())
    }

    pub async fn run(&self) -> EngineOutcome {
        let connect_start = Instant::now();
        if let Err(e) = self.connect_and_ping().await {
            self.logger.log_error("connect", None, &e.message, e.trace.as_deref(), e.attempt);
            self.logger.log_connection(
                "connect",
                &self.config.source.host,
                self.config.source.port,
                self.config.source.database,
                false,
                connect_start.elapsed(),
            );
            return EngineOutcome::FailedFast { reason: e.message };
        }
        self.logger.log_connection(
            "connect",
            &self.config.source.host,
            self.config.source.port,
            self.config.source.database,
            true,
            connect_start.elapsed(),
        );

        let (keys, _scan_counters) = match scanner::scan_keys(&self.source, &self.config.patterns).await {
            Ok(v) => v,
            Err(message) => return EngineOutcome::FailedFast { reason: message },
        };

        if self.config.dry_run {
            self.logger.log_summary(keys.len(), 0, 0, connect_start.elapsed());
            self.cleanup().await;
            return EngineOutcome::Succeeded { processed: 0, failed: 0 };
        }

        let resume = Arc::new(RwLock::new(ResumeState::load_or_init(&self.config.resume_file, keys.len())));
        let progress = Arc::new(ProgressCounters::new(keys.len()));

        let monitor = ProgressMonitor::new(progress.clone(), self.config.progress_interval);
        let monitor_handle = tokio::spawn(monitor.run(self.logger.clone(), self.shutdown.token()));
        let signal_handle = tokio::spawn(shutdown::install_signal_handlers(self.shutdown.clone()));

        let (stats, transfer_errors, result) = dispatcher::run_transfer_pool(
            self.source.clone(),
            self.target.clone(),
            self.config.timeouts.clone(),
            self.logger.clone(),
            keys.clone(),
            resume.clone(),
            self.config.resume_file.clone(),
            CHECKPOINT_EVERY,
            self.config.max_concurrency,
            self.config.continue_on_error,
            self.shutdown.token(),
            progress,
        )
        .await;

        signal_handle.abort();
        self.shutdown.token().cancel();
        let _ = monitor_handle.await;

        for err in &transfer_errors {
            self.logger.log_error("transfer", err.key.as_deref(), &err.message, err.trace.as_deref(), err.attempt);
        }

        let outcome = match result {
            DispatchResult::AbortedByError { reason } => {
                self.shutdown.trigger().await;
                EngineOutcome::FailedFast { reason }
            }
            DispatchResult::AbortedByCancellation => {
                self.shutdown.trigger().await;
                EngineOutcome::Terminated
            }
            DispatchResult::Completed if !transfer_errors.is_empty() => {
                EngineOutcome::CompletedWithErrors {
                    transfer_failures: MultiError { errors: transfer_errors },
                }
            }
            DispatchResult::Completed => {
                if self.config.verify {
                    let to_verify: Vec<String> = {
                        let guard = resume.read().await;
                        keys.iter().filter(|k| guard.is_completed(k)).cloned().collect()
                    };
                    let verification_failures =
                        verifier::verify_keys(self.source.clone(), self.target.clone(), to_verify, self.config.max_concurrency).await;

                    for err in &verification_failures {
                        self.logger.log_error("verify", err.key.as_deref(), &err.message, err.trace.as_deref(), err.attempt);
                    }

                    if verification_failures.is_empty() {
                        EngineOutcome::Succeeded {
                            processed: stats.processed.load(Ordering::Relaxed),
                            failed: stats.failed.load(Ordering::Relaxed),
                        }
                    } else {
                        EngineOutcome::CompletedWithVerificationErrors { verification_failures }
                    }
                } else {
                    EngineOutcome::Succeeded {
                        processed: stats.processed.load(Ordering::Relaxed),
                        failed: stats.failed.load(Ordering::Relaxed),
                    }
                }
            }
        };

        let succeeded = matches!(outcome, EngineOutcome::Succeeded { .. });
        if succeeded {
            if let Err(e) = ResumeState::delete(&self.config.resume_file) {
                tracing::warn!(error = %e, "failed to delete resume file after a successful run");
            }
        } else {
            let guard = resume.read().await;
            if let Err(e) = guard.save(&self.config.resume_file) {
                tracing::error!(error = %e, "failed to save resume checkpoint during cleanup");
            }
        }

        self.cleanup().await;

        match &outcome {
            EngineOutcome::Succeeded { processed, failed } => {
                self.logger.log_summary(keys.len(), *processed, *failed, connect_start.elapsed());
            }
            EngineOutcome::CompletedWithVerificationErrors { .. } | EngineOutcome::CompletedWithErrors { .. } => {
                self.logger
                    .log_summary(keys.len(), stats.processed.load(Ordering::Relaxed), stats.failed.load(Ordering::Relaxed), connect_start.elapsed());
            }
            _ => {}
        }

        outcome
    }

    /// Cleanup always runs regardless of outcome. The Store Port has no
    /// explicit disconnect operation; both endpoints close their
    /// connections implicitly when the engine's `Arc` handles are
    /// dropped. This hook exists for the resume-file decision already
    /// made by the caller, and as the place to close the logging port if
    /// a future `Logger` implementation grows a flush/close method.
    async fn cleanup(&self) {
        tracing::debug!("engine cleanup complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EndpointConfig, LogLevel, TimeoutConfig};
    use crate::logging::NullLogger;
    use crate::store::mock::MockStore;
    use crate::store::Payload;
    use std::path::PathBuf;

    fn test_config(resume_file: PathBuf) -> MigrationConfig {
        MigrationConfig {
            source: EndpointConfig { host: "source".into(), port: 6379, password: None, database: 0 },
            target: EndpointConfig { host: "target".into(), port: 6380, password: None, database: 0 },
            batch_size: 1000,
            retry_attempts: 3,
            max_concurrency: 4,
            progress_interval: Duration::from_millis(50),
            verify: true,
            continue_on_error: true,
            resume_file,
            patterns: vec![],
            timeouts: TimeoutConfig::default(),
            log_level: LogLevel::Info,
            dry_run: false,
        }
    }

    #[tokio::test]
    async fn end_to_end_migration_of_a_few_keys_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let resume_file = dir.path().join("resume.json");

        let source = MockStore::new();
        source.seed("a", Payload::String(b"x".to_vec()), None);
        source.seed("b", Payload::String(b"y".to_vec()), Some(Duration::from_secs(120)));
        let target = MockStore::new();

        let engine = MigrationEngine::new(test_config(resume_file.clone()), source, target, Arc::new(NullLogger));
        let outcome = engine.run().await;

        assert!(matches!(outcome, EngineOutcome::Succeeded { processed: 2, failed: 0 }));
        assert!(!resume_file.exists());
    }

    #[tokio::test]
    async fn dry_run_transfers_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let resume_file = dir.path().join("resume.json");

        let source = MockStore::new();
        source.seed("a", Payload::String(b"x".to_vec()), None);
        let target = MockStore::new();

        let mut config = test_config(resume_file);
        config.dry_run = true;
        let engine = MigrationEngine::new(config, source, target, Arc::new(NullLogger));
        let outcome = engine.run().await;

        assert!(matches!(outcome, EngineOutcome::Succeeded { processed: 0, failed: 0 }));
        assert!(engine.target.enumerate_classified().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn non_fatal_per_key_errors_surface_as_completed_with_errors() {
        let dir = tempfile::tempdir().unwrap();
        let resume_file = dir.path().join("resume.json");

        let source = MockStore::new();
        source.seed("a", Payload::String(b"x".to_vec()), None);
        source.seed("b", Payload::String(b"y".to_vec()), None);
        // Data-classified, non-retryable: fails exactly one read and is
        // tolerated under continue-on-error rather than aborting the pool.
        source.fail_next_read_with("corrupt payload");
        let target = MockStore::new();

        let mut config = test_config(resume_file);
        config.verify = false;
        let engine = MigrationEngine::new(config, source, target, Arc::new(NullLogger));
        let outcome = engine.run().await;

        assert_eq!(outcome.exit_code(), 4);
        match outcome {
            EngineOutcome::CompletedWithErrors { transfer_failures } => {
                assert_eq!(transfer_failures.len(), 1);
            }
            other => panic!("expected CompletedWithErrors, got {other:?}"),
        }
    }
}
