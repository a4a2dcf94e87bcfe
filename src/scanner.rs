//! The Key Scanner: enumerates source keys, applies the glob filter set,
//! deduplicates, and tracks discovery progress.
//!
//! Enumerate from the source, accumulate into a dedup set, report counts
//! via `tracing`.

use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::retry::RetryStore;
use crate::store::Store;

/// Compiles the glob filter set. An empty pattern list matches everything.
/// Invalid patterns are logged and contribute no matches rather than
/// aborting the scan.
pub fn compile_patterns(patterns: &[String]) -> GlobSet {
    let mut builder = GlobSetBuilder::new();
    for p in patterns {
        match Glob::new(p) {
            Ok(g) => {
                builder.add(g);
            }
            Err(err) => {
                tracing::warn!(pattern = %p, error = %err, "invalid glob pattern; it will match nothing");
            }
        }
    }
    // An empty builder's GlobSet matches nothing, which is wrong for the
    // "empty pattern list means match all" rule; callers must consult
    // `matches_key` which special-cases that.
    builder.build().unwrap_or_else(|_| GlobSetBuilder::new().build().unwrap())
}

/// A key matches the filter iff the pattern list is empty, or it matches
/// at least one compiled pattern.
pub fn matches_key(patterns: &[String], compiled: &GlobSet, key: &str) -> bool {
    patterns.is_empty() || compiled.is_match(key)
}

#[derive(Debug, Default, Clone)]
pub struct ScanProgress {
    pub total_discovered: usize,
    pub scanned: usize,
}

impl ScanProgress {
    pub fn percent(&self) -> f64 {
        if self.total_discovered == 0 {
            100.0
        } else {
            (self.scanned as f64 / self.total_discovered as f64) * 100.0
        }
    }

    pub fn is_complete(&self) -> bool {
        self.scanned >= self.total_discovered
    }
}

/// Tracks scan progress behind atomics so a monitor task can poll it
/// concurrently with the scan itself.
#[derive(Default)]
pub struct ScanCounters {
    total_discovered: AtomicUsize,
    scanned: AtomicUsize,
}

impl ScanCounters {
    pub fn snapshot(&self) -> ScanProgress {
        ScanProgress {
            total_discovered: self.total_discovered.load(Ordering::Relaxed),
            scanned: self.scanned.load(Ordering::Relaxed),
        }
    }
}

/// Enumerates the source, filters by pattern, and deduplicates. Returns
/// the final key list (order is not significant downstream) plus the
/// counters used to report discovery progress.
pub async fn scan_keys<S: Store>(
    source: &RetryStore<S>,
    patterns: &[String],
) -> Result<(Vec<String>, Arc<ScanCounters>), String> {
    let counters = Arc::new(ScanCounters::default());
    let compiled = compile_patterns(patterns);

    let raw = source.enumerate_classified().await.map_err(|e| e.message)?;
    counters.total_discovered.store(raw.len(), Ordering::Relaxed);

    let mut seen = HashSet::with_capacity(raw.len());
    let mut out = Vec::new();
    for key in raw {
        counters.scanned.fetch_add(1, Ordering::Relaxed);
        if !matches_key(patterns, &compiled, &key) {
            continue;
        }
        if seen.insert(key.clone()) {
            out.push(key);
        }
    }

    tracing::info!(
        discovered = counters.total_discovered.load(Ordering::Relaxed),
        matched = out.len(),
        "scan complete"
    );

    Ok((out, counters))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::BackoffPolicy;
    use crate::store::mock::MockStore;
    use crate::store::Payload;

    fn seeded_store(keys: &[&str]) -> MockStore {
        let store = MockStore::new();
        for k in keys {
            store.seed(*k, Payload::String(b"v".to_vec()), None);
        }
        store
    }

    #[test]
    fn empty_pattern_list_matches_everything() {
        let compiled = compile_patterns(&[]);
        assert!(matches_key(&[], &compiled, "anything:at:all"));
    }

    #[test]
    fn invalid_pattern_matches_nothing_but_does_not_error() {
        let patterns = vec!["[".to_string()];
        let compiled = compile_patterns(&patterns);
        assert!(!matches_key(&patterns, &compiled, "user:1"));
    }

    #[tokio::test]
    async fn discovery_completeness_with_empty_pattern_list() {
        let store = seeded_store(&["a", "b", "c"]);
        let retry = RetryStore::new(store, BackoffPolicy::default());
        let (keys, counters) = scan_keys(&retry, &[]).await.unwrap();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(sorted, vec!["a", "b", "c"]);
        assert_eq!(counters.snapshot().total_discovered, 3);
    }

    #[tokio::test]
    async fn multiple_patterns_match_with_no_duplicates() {
        let store = seeded_store(&["user:1", "user:2", "session:a", "other:x"]);
        let retry = RetryStore::new(store, BackoffPolicy::default());
        let patterns = vec!["user:*".to_string(), "session:*".to_string()];
        let (mut keys, _) = scan_keys(&retry, &patterns).await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["session:a", "user:1", "user:2"]);
    }

    #[tokio::test]
    async fn dedup_even_with_overlapping_patterns() {
        let store = seeded_store(&["user:1"]);
        let retry = RetryStore::new(store, BackoffPolicy::default());
        let patterns = vec!["user:*".to_string(), "u*".to_string(), "*1".to_string()];
        let (keys, _) = scan_keys(&retry, &patterns).await.unwrap();
        assert_eq!(keys, vec!["user:1".to_string()]);
    }
}
