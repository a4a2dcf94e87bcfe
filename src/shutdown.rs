//! Graceful Shutdown Manager: a shared cancellation token plus a registry
//! of idempotent handlers run concurrently under a bounded deadline.
//!
//! Grounded in the pack's `CancellationToken`-based pipeline shutdown
//! (`otap-dataflow`'s controller/admin use of `tokio_util::sync::
//! CancellationToken`) generalized here to an explicit handler list, and
//! in the ctrlc-signal-flag idiom used elsewhere in the pack for
//! operator-triggered shutdown — adapted to `tokio::signal` so the whole
//! path stays async.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

type Handler = Box<dyn Fn() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// Owns the cancellation token shared by every task in the engine, plus a
/// list of cleanup handlers run once shutdown is triggered.
pub struct ShutdownManager {
    token: CancellationToken,
    handlers: std::sync::Mutex<Vec<Handler>>,
    triggered: AtomicBool,
    deadline: Duration,
}

impl ShutdownManager {
    pub fn new(deadline: Duration) -> Self {
        Self {
            token: CancellationToken::new(),
            handlers: std::sync::Mutex::new(Vec::new()),
            triggered: AtomicBool::new(false),
            deadline,
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Registers a handler. Handlers must be idempotent: a handler may run
    /// zero times (if shutdown never triggers) but never more than once.
    pub fn register<F, Fut>(&self, handler: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.handlers.lock().unwrap().push(Box::new(move || Box::pin(handler())));
    }

    /// Cancels the token and runs every registered handler concurrently,
    /// bounded by `deadline`. Idempotent: a second call is a no-op, even
    /// if invoked concurrently from a different task (CAS on `triggered`
    /// ensures exactly one call proceeds past the guard).
    pub async fn trigger(&self) {
        if self.triggered.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_err() {
            return;
        }

        self.token.cancel();

        let handlers = std::mem::take(&mut *self.handlers.lock().unwrap());
        let futures = handlers.into_iter().map(|h| h());

        if tokio::time::timeout(self.deadline, futures::future::join_all(futures)).await.is_err() {
            tracing::warn!(deadline_s = self.deadline.as_secs(), "shutdown handlers did not complete within the deadline");
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }
}

/// Waits for either SIGINT or SIGTERM (unix) / Ctrl-C (other platforms)
/// and triggers shutdown on the manager.
pub async fn install_signal_handlers(manager: Arc<ShutdownManager>) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = sigint.recv() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    tracing::info!("shutdown signal received");
    manager.trigger().await;
}
