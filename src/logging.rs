//! The Logging Port: a trait the core depends on, with a `tracing`-backed
//! default implementation. No method accepts a password — connection
//! events are logged by host/port/db only, never the credential.

use std::time::Duration;

/// Required of any injected logger. The core never assumes a particular
/// sink; `TracingLogger` is the concrete default wired in `main.rs`.
pub trait Logger: Send + Sync {
    fn debug(&self, msg: &str);
    fn info(&self, msg: &str);
    fn warn(&self, msg: &str);
    fn error(&self, msg: &str);
    fn fatal(&self, msg: &str);

    fn log_connection(&self, op: &str, host: &str, port: u16, db: i64, success: bool, duration: Duration);

    fn log_key_transfer(&self, key: &str, kind: &str, bytes: u64, success: bool, duration: Duration, error: Option<&str>);

    fn log_progress(&self, total: usize, processed: usize, failed: usize, throughput: f64);

    fn log_error(&self, op: &str, key: Option<&str>, msg: &str, trace: Option<&str>, attempt: u32);

    fn log_summary(&self, total: usize, processed: usize, failed: usize, elapsed: Duration);
}

/// Default implementation, built on `tracing`'s structured fields.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn debug(&self, msg: &str) {
        tracing::debug!("{msg}");
    }

    fn info(&self, msg: &str) {
        tracing::info!("{msg}");
    }

    fn warn(&self, msg: &str) {
        tracing::warn!("{msg}");
    }

    fn error(&self, msg: &str) {
        tracing::error!("{msg}");
    }

    fn fatal(&self, msg: &str) {
        tracing::error!(fatal = true, "{msg}");
    }

    fn log_connection(&self, op: &str, host: &str, port: u16, db: i64, success: bool, duration: Duration) {
        tracing::info!(
            op,
            host,
            port,
            db,
            success,
            duration_ms = duration.as_millis() as u64,
            "connection event"
        );
    }

    fn log_key_transfer(&self, key: &str, kind: &str, bytes: u64, success: bool, duration: Duration, error: Option<&str>) {
        if success {
            tracing::debug!(key, kind, bytes, duration_ms = duration.as_millis() as u64, "key transferred");
        } else {
            tracing::warn!(
                key,
                kind,
                bytes,
                duration_ms = duration.as_millis() as u64,
                error = error.unwrap_or(""),
                "key transfer failed"
            );
        }
    }

    fn log_progress(&self, total: usize, processed: usize, failed: usize, throughput: f64) {
        tracing::info!(total, processed, failed, throughput_per_sec = throughput, "progress");
    }

    fn log_error(&self, op: &str, key: Option<&str>, msg: &str, trace: Option<&str>, attempt: u32) {
        match trace {
            Some(trace) => tracing::error!(op, key = key.unwrap_or(""), attempt, trace, "{msg}"),
            None => tracing::error!(op, key = key.unwrap_or(""), attempt, "{msg}"),
        }
    }

    fn log_summary(&self, total: usize, processed: usize, failed: usize, elapsed: Duration) {
        tracing::info!(
            total,
            processed,
            failed,
            elapsed_s = elapsed.as_secs_f64(),
            "migration summary"
        );
    }
}

/// A logger that discards everything. Used by tests that exercise the
/// dispatcher/engine without wanting tracing output.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullLogger;

impl Logger for NullLogger {
    fn debug(&self, _msg: &str) {}
    fn info(&self, _msg: &str) {}
    fn warn(&self, _msg: &str) {}
    fn error(&self, _msg: &str) {}
    fn fatal(&self, _msg: &str) {}
    fn log_connection(&self, _op: &str, _host: &str, _port: u16, _db: i64, _success: bool, _duration: Duration) {}
    fn log_key_transfer(&self, _key: &str, _kind: &str, _bytes: u64, _success: bool, _duration: Duration, _error: Option<&str>) {}
    fn log_progress(&self, _total: usize, _processed: usize, _failed: usize, _throughput: f64) {}
    fn log_error(&self, _op: &str, _key: Option<&str>, _msg: &str, _trace: Option<&str>, _attempt: u32) {}
    fn log_summary(&self, _total: usize, _processed: usize, _failed: usize, _elapsed: Duration) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_logger_does_not_panic_on_any_call() {
        let logger = NullLogger;
        logger.info("hello");
        logger.log_connection("connect", "localhost", 6379, 0, true, Duration::from_millis(5));
        logger.log_key_transfer("k", "string", 10, true, Duration::from_millis(1), None);
        logger.log_progress(10, 5, 0, 2.5);
        logger.log_error("read", Some("k"), "boom", None, 1);
        logger.log_error("read", Some("k"), "boom", Some("at foo.rs:1"), 1);
        logger.log_summary(10, 10, 0, Duration::from_secs(1));
    }
}
