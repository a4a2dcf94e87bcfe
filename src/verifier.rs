//! The Verifier: after transfer, independently re-reads both stores for
//! every key the engine believes it migrated and asserts equivalence.
//!
//! Concurrency shape mirrors `dispatcher.rs`'s bounded
//! `for_each_concurrent` pool; verification failures accumulate into their
//! own aggregate, distinct from the transfer phase's.

use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::{ErrorClass, MigrationError};
use crate::retry::RetryStore;
use crate::store::{payloads_equivalent, Kind, Store};

/// Outcome of verifying a single key.
#[derive(Debug)]
enum VerifyOutcome {
    Ok,
    Mismatch(String),
}

async fn verify_key<S1: Store, S2: Store>(source: &RetryStore<S1>, target: &RetryStore<S2>, key: &str) -> Result<VerifyOutcome, MigrationError> {
    let source_kind = source.type_of_classified(key).await?;
    let target_kind = target.type_of_classified(key).await?;

    if source_kind == Kind::None && target_kind == Kind::None {
        return Ok(VerifyOutcome::Ok);
    }
    if source_kind != target_kind {
        return Ok(VerifyOutcome::Mismatch(format!(
            "kind mismatch: source={} target={}",
            source_kind.as_str(),
            target_kind.as_str()
        )));
    }

    let source_payload = source.read_classified(key, source_kind).await?;
    let target_payload = target.read_classified(key, target_kind).await?;

    if !payloads_equivalent(&source_payload, &target_payload) {
        return Ok(VerifyOutcome::Mismatch("payload mismatch".to_string()));
    }

    // TTL "close enough": a finite source TTL must map to a finite target
    // TTL; exact equality is not required since the write took time.
    let source_ttl = source.ttl_classified(key).await?;
    let target_ttl = target.ttl_classified(key).await?;
    match (source_ttl, target_ttl) {
        (Some(s), _) if s > std::time::Duration::ZERO => {
            if target_ttl.is_none() {
                return Ok(VerifyOutcome::Mismatch("source has a positive ttl but target has none".to_string()));
            }
        }
        _ => {}
    }

    Ok(VerifyOutcome::Ok)
}

/// Verifies every key in `keys` concurrently, returning the list of
/// mismatches/errors found. An empty result means verification passed.
pub async fn verify_keys<S1: Store, S2: Store>(
    source: Arc<RetryStore<S1>>,
    target: Arc<RetryStore<S2>>,
    keys: Vec<String>,
    max_concurrency: usize,
) -> Vec<MigrationError> {
    let failures = Arc::new(Mutex::new(Vec::<MigrationError>::new()));

    stream::iter(keys)
        .for_each_concurrent(max_concurrency, |key| {
            let source = source.clone();
            let target = target.clone();
            let failures = failures.clone();
            async move {
                match verify_key(&source, &target, &key).await {
                    Ok(VerifyOutcome::Ok) => {}
                    Ok(VerifyOutcome::Mismatch(reason)) => {
                        failures
                            .lock()
                            .await
                            .push(MigrationError::new("verify", reason, ErrorClass::Data).with_key(key));
                    }
                    Err(e) => {
                        failures.lock().await.push(e);
                    }
                }
            }
        })
        .await;

    Arc::try_unwrap(failures).map(|m| m.into_inner()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::BackoffPolicy;
    use crate::store::mock::MockStore;
    use crate::store::Payload;

    #[tokio::test]
    async fn identical_stores_verify_clean() {
        let source = MockStore::new();
        let target = MockStore::new();
        source.seed("a", Payload::String(b"x".to_vec()), None);
        target.seed("a", Payload::String(b"x".to_vec()), None);

        let source = Arc::new(RetryStore::new(source, BackoffPolicy::default()));
        let target = Arc::new(RetryStore::new(target, BackoffPolicy::default()));

        let failures = verify_keys(source, target, vec!["a".to_string()], 4).await;
        assert!(failures.is_empty());
    }

    #[tokio::test]
    async fn payload_divergence_is_reported() {
        let source = MockStore::new();
        let target = MockStore::new();
        source.seed("a", Payload::String(b"x".to_vec()), None);
        target.seed("a", Payload::String(b"different".to_vec()), None);

        let source = Arc::new(RetryStore::new(source, BackoffPolicy::default()));
        let target = Arc::new(RetryStore::new(target, BackoffPolicy::default()));

        let failures = verify_keys(source, target, vec!["a".to_string()], 4).await;
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].key.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn both_absent_is_accepted_as_equivalent() {
        let source = MockStore::new();
        let target = MockStore::new();
        let source = Arc::new(RetryStore::new(source, BackoffPolicy::default()));
        let target = Arc::new(RetryStore::new(target, BackoffPolicy::default()));

        let failures = verify_keys(source, target, vec!["ghost".to_string()], 4).await;
        assert!(failures.is_empty());
    }

    #[tokio::test]
    async fn missing_target_ttl_for_a_ttl_bearing_source_is_a_mismatch() {
        let source = MockStore::new();
        let target = MockStore::new();
        source.seed("a", Payload::String(b"x".to_vec()), Some(std::time::Duration::from_secs(60)));
        target.seed("a", Payload::String(b"x".to_vec()), None);

        let source = Arc::new(RetryStore::new(source, BackoffPolicy::default()));
        let target = Arc::new(RetryStore::new(target, BackoffPolicy::default()));

        let failures = verify_keys(source, target, vec!["a".to_string()], 4).await;
        assert_eq!(failures.len(), 1);
    }
}
