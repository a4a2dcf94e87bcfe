//! Error taxonomy shared by every component of the migration engine.
//!
//! Classification is string-pattern based over the underlying cause's
//! message, mirroring how flaky upstream wire protocols report failures.
//! The table is intentionally stable; extend it via [`Classifier`] rather
//! than editing [`DefaultClassifier`] in place.

use std::fmt;

/// The seven error classes the engine reasons about.
///
/// `Multi` is not produced by the classifier; it only appears on the
/// aggregate error returned once a phase has collected more than one
/// per-key failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    Connection,
    Network,
    Authentication,
    Data,
    Configuration,
    Critical,
    Multi,
}

impl ErrorClass {
    /// Connection/Network errors are retried by the [`crate::retry::RetryStore`];
    /// everything else fails fast on the first attempt.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorClass::Connection | ErrorClass::Network)
    }

    /// Critical errors abort the engine; everything else is a per-key
    /// outcome that the engine may choose to tolerate under
    /// `continue-on-error`.
    pub fn is_fatal_to_engine(self) -> bool {
        matches!(self, ErrorClass::Critical)
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorClass::Connection => "connection",
            ErrorClass::Network => "network",
            ErrorClass::Authentication => "authentication",
            ErrorClass::Data => "data",
            ErrorClass::Configuration => "configuration",
            ErrorClass::Critical => "critical",
            ErrorClass::Multi => "multi",
        };
        f.write_str(s)
    }
}

/// Strategy for turning a raw error message into an [`ErrorClass`].
///
/// Exposed as a trait so operators can extend classification; the default
/// table must remain available as a fallback.
pub trait Classifier: Send + Sync {
    fn classify(&self, message: &str) -> ErrorClass;
}

/// The default classification table: case-insensitive substring match,
/// first match wins.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultClassifier;

const CONNECTION_PATTERNS: &[&str] = &[
    "connection refused",
    "connection reset",
    "connection lost",
    "dial",
    "no connection",
];

const NETWORK_PATTERNS: &[&str] = &["timeout", "i/o timeout", "broken pipe", "unreachable", "network"];

const AUTH_PATTERNS: &[&str] = &["auth", "unauthorized", "permission denied", "access denied"];

const CONFIG_PATTERNS: &[&str] = &["config", "invalid host", "invalid port"];

const DATA_PATTERNS: &[&str] = &[
    "corrupt",
    "parse",
    "invalid format",
    "unsupported type",
    "serialization",
];

impl Classifier for DefaultClassifier {
    fn classify(&self, message: &str) -> ErrorClass {
        let lower = message.to_lowercase();
        let matches_any = |patterns: &[&str]| patterns.iter().any(|p| lower.contains(p));

        if matches_any(CONNECTION_PATTERNS) {
            ErrorClass::Connection
        } else if matches_any(NETWORK_PATTERNS) {
            ErrorClass::Network
        } else if matches_any(AUTH_PATTERNS) {
            ErrorClass::Authentication
        } else if matches_any(CONFIG_PATTERNS) {
            ErrorClass::Configuration
        } else if matches_any(DATA_PATTERNS) {
            ErrorClass::Data
        } else {
            ErrorClass::Critical
        }
    }
}

/// A single operation-level failure, carried with enough context to be
/// logged and aggregated without losing the key it happened on.
#[derive(Debug, Clone)]
pub struct MigrationError {
    pub operation: String,
    pub key: Option<String>,
    pub message: String,
    pub class: ErrorClass,
    pub attempt: u32,
    /// Captured at construction time for `Critical`-classified errors only,
    /// so it can be surfaced via `Logger::log_error`'s `trace` parameter
    /// before the engine shuts down. `None` for every other class.
    pub trace: Option<String>,
}

impl MigrationError {
    pub fn new(operation: impl Into<String>, message: impl Into<String>, class: ErrorClass) -> Self {
        let trace = (class == ErrorClass::Critical).then(|| std::backtrace::Backtrace::force_capture().to_string());
        Self {
            operation: operation.into(),
            key: None,
            message: message.into(),
            class,
            attempt: 1,
            trace,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    /// Classify a raw message using the default table, without an
    /// existing `MigrationError` to fall back on.
    pub fn from_message(operation: impl Into<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        let class = DefaultClassifier.classify(&message);
        Self::new(operation, message, class)
    }

    fn key_suffix(&self) -> String {
        match &self.key {
            Some(k) => format!(" (key={k})"),
            None => String::new(),
        }
    }
}

impl fmt::Display for MigrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} failed{}: {} ({}, attempt {})",
            self.operation,
            self.key_suffix(),
            self.message,
            self.class,
            self.attempt
        )
    }
}

impl std::error::Error for MigrationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        None
    }
}

/// Aggregate error returned when a phase (transfer or verification)
/// collects one or more per-key failures under `continue-on-error`.
#[derive(Debug, Clone, Default)]
pub struct MultiError {
    pub errors: Vec<MigrationError>,
}

impl MultiError {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, err: MigrationError) {
        self.errors.push(err);
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }
}

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error(s) occurred:", self.errors.len())?;
        for e in &self.errors {
            write!(f, "\n  - {e}")?;
        }
        Ok(())
    }
}

impl std::error::Error for MultiError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_connection_errors() {
        let c = DefaultClassifier;
        assert_eq!(c.classify("connection refused by peer"), ErrorClass::Connection);
        assert_eq!(c.classify("dial tcp: no route"), ErrorClass::Connection);
    }

    #[test]
    fn classifies_network_errors() {
        let c = DefaultClassifier;
        assert_eq!(c.classify("i/o timeout"), ErrorClass::Network);
        assert_eq!(c.classify("host unreachable"), ErrorClass::Network);
    }

    #[test]
    fn classifies_auth_and_config() {
        let c = DefaultClassifier;
        assert_eq!(c.classify("unauthorized access"), ErrorClass::Authentication);
        assert_eq!(c.classify("invalid port specified"), ErrorClass::Configuration);
    }

    #[test]
    fn classifies_data_errors() {
        let c = DefaultClassifier;
        assert_eq!(c.classify("corrupt payload"), ErrorClass::Data);
        assert_eq!(c.classify("unsupported type tag"), ErrorClass::Data);
    }

    #[test]
    fn default_class_is_critical() {
        let c = DefaultClassifier;
        assert_eq!(c.classify("something utterly unexpected"), ErrorClass::Critical);
    }

    #[test]
    fn first_match_wins_for_overlapping_patterns() {
        // "timeout" could also be read loosely as network-ish auth text; ensure
        // connection patterns are checked first in table order.
        let c = DefaultClassifier;
        assert_eq!(c.classify("connection reset while waiting, timeout"), ErrorClass::Connection);
    }

    #[test]
    fn only_connection_and_network_are_retryable() {
        assert!(ErrorClass::Connection.is_retryable());
        assert!(ErrorClass::Network.is_retryable());
        assert!(!ErrorClass::Authentication.is_retryable());
        assert!(!ErrorClass::Data.is_retryable());
        assert!(!ErrorClass::Critical.is_retryable());
    }

    #[test]
    fn critical_errors_capture_a_trace_others_do_not() {
        let critical = MigrationError::new("write", "something utterly unexpected", ErrorClass::Critical);
        assert!(critical.trace.is_some());

        let data = MigrationError::new("write", "corrupt payload", ErrorClass::Data);
        assert!(data.trace.is_none());
    }

    #[test]
    fn multi_error_formats_each_entry() {
        let mut multi = MultiError::new();
        multi.push(MigrationError::new("write", "boom", ErrorClass::Data).with_key("a"));
        multi.push(MigrationError::new("write", "boom2", ErrorClass::Data).with_key("b"));
        let s = multi.to_string();
        assert!(s.contains("2 error(s)"));
        assert!(s.contains("key=a"));
        assert!(s.contains("key=b"));
    }
}
