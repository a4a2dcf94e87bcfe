//! The Store Port: the abstract operations the engine requires from either
//! the source or the target key-value store.
//!
//! Modeled as a tagged variant (`Kind`/`Payload`) rather than a generic
//! opaque container, per the closed union in the data model — each write
//! path is type-specific and ordering semantics differ between kinds.

pub mod mock;
pub mod redis_store;

use async_trait::async_trait;
use std::time::Duration;

/// The closed set of value kinds a store can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    String,
    Hash,
    List,
    Set,
    SortedSet,
    /// Sentinel: the key no longer exists at read time.
    None,
}

impl Kind {
    pub fn as_str(self) -> &'static str {
        match self {
            Kind::String => "string",
            Kind::Hash => "hash",
            Kind::List => "list",
            Kind::Set => "set",
            Kind::SortedSet => "sorted_set",
            Kind::None => "none",
        }
    }
}

/// A scored member of a sorted set. Score is carried as a raw `f64` so it
/// round-trips bit-for-bit through IEEE-754 double encoding.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredMember {
    pub member: Vec<u8>,
    pub score: f64,
}

/// The payload appropriate to a given [`Kind`].
///
/// `List` preserves head-to-tail order as a `Vec`; `Hash` and `Set` carry
/// no observable order (modeled with `Vec<(K, V)>`/`Vec<T>` rather than a
/// `HashMap`/`HashSet` purely to avoid an unnecessary intermediate
/// allocation shape change on the read path — equality for these kinds is
/// defined as multiset/mapping equality, not positional equality).
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    String(Vec<u8>),
    Hash(Vec<(Vec<u8>, Vec<u8>)>),
    List(Vec<Vec<u8>>),
    Set(Vec<Vec<u8>>),
    SortedSet(Vec<ScoredMember>),
    None,
}

impl Payload {
    pub fn kind(&self) -> Kind {
        match self {
            Payload::String(_) => Kind::String,
            Payload::Hash(_) => Kind::Hash,
            Payload::List(_) => Kind::List,
            Payload::Set(_) => Kind::Set,
            Payload::SortedSet(_) => Kind::SortedSet,
            Payload::None => Kind::None,
        }
    }

    /// True for the collection kinds that a target store cannot represent
    /// empty: writing these should be skipped entirely rather than create
    /// an empty key.
    pub fn is_empty_collection(&self) -> bool {
        match self {
            Payload::Hash(v) => v.is_empty(),
            Payload::List(v) => v.is_empty(),
            Payload::Set(v) => v.is_empty(),
            Payload::SortedSet(v) => v.is_empty(),
            Payload::String(_) | Payload::None => false,
        }
    }
}

/// Per-kind equivalence used by the Verifier and by round-trip tests.
///
/// `list` equivalence is positional; `hash`/`set` equivalence is as a
/// multiset/mapping; `sorted_set` requires bit-exact score equality.
pub fn payloads_equivalent(a: &Payload, b: &Payload) -> bool {
    match (a, b) {
        (Payload::String(x), Payload::String(y)) => x == y,
        (Payload::List(x), Payload::List(y)) => x == y,
        (Payload::Hash(x), Payload::Hash(y)) => {
            if x.len() != y.len() {
                return false;
            }
            let mut xs = x.clone();
            let mut ys = y.clone();
            xs.sort();
            ys.sort();
            xs == ys
        }
        (Payload::Set(x), Payload::Set(y)) => {
            if x.len() != y.len() {
                return false;
            }
            let mut xs = x.clone();
            let mut ys = y.clone();
            xs.sort();
            ys.sort();
            xs == ys
        }
        (Payload::SortedSet(x), Payload::SortedSet(y)) => {
            if x.len() != y.len() {
                return false;
            }
            let mut xs = x.clone();
            let mut ys = y.clone();
            xs.sort_by(|a, b| a.member.cmp(&b.member));
            ys.sort_by(|a, b| a.member.cmp(&b.member));
            xs.len() == ys.len()
                && xs
                    .iter()
                    .zip(ys.iter())
                    .all(|(a, b)| a.member == b.member && a.score.to_bits() == b.score.to_bits())
        }
        // Both-absent is accepted as equivalent to "no source key" per the
        // empty-collection edge case.
        (Payload::None, Payload::None) => true,
        _ => false,
    }
}

/// A discovered key's metadata, used by the scanner for progress
/// estimation. Transfer recomputes type/TTL at copy time to avoid TOCTOU
/// against a live source.
#[derive(Debug, Clone)]
pub struct KeyRecord {
    pub key: String,
    pub kind: Kind,
    pub estimated_size: u64,
    pub ttl: Option<Duration>,
}

/// The operations the engine requires of either store. All may fail with
/// a transport-classified error; implementations should surface raw
/// messages so [`crate::error::Classifier`] can do its job.
#[async_trait]
pub trait Store: Send + Sync {
    async fn connect(&self) -> Result<(), String>;
    async fn ping(&self) -> Result<(), String>;

    /// Enumerate all currently existing keys. Duplicates are permitted;
    /// the scanner deduplicates upstream.
    async fn enumerate(&self) -> Result<Vec<String>, String>;

    async fn type_of(&self, key: &str) -> Result<Kind, String>;

    /// Read the payload for `key`, asserting it matches `kind`. Fails with
    /// a data-classified error if the observed kind disagrees (defensive
    /// against a race with a live source).
    async fn read(&self, key: &str, kind: Kind) -> Result<Payload, String>;

    /// Write `payload` to `key`. Implementations MUST first delete any
    /// pre-existing value at `key` to avoid merge semantics with a
    /// previous run.
    async fn write(&self, key: &str, payload: &Payload) -> Result<(), String>;

    async fn exists(&self, key: &str) -> Result<bool, String>;
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, String>;
    async fn set_ttl(&self, key: &str, ttl: Duration) -> Result<(), String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_equivalence_ignores_order() {
        let a = Payload::Hash(vec![(b"f1".to_vec(), b"v1".to_vec()), (b"f2".to_vec(), b"v2".to_vec())]);
        let b = Payload::Hash(vec![(b"f2".to_vec(), b"v2".to_vec()), (b"f1".to_vec(), b"v1".to_vec())]);
        assert!(payloads_equivalent(&a, &b));
    }

    #[test]
    fn list_equivalence_is_positional() {
        let a = Payload::List(vec![b"a".to_vec(), b"b".to_vec()]);
        let b = Payload::List(vec![b"b".to_vec(), b"a".to_vec()]);
        assert!(!payloads_equivalent(&a, &b));
    }

    #[test]
    fn sorted_set_requires_bit_exact_scores() {
        let a = Payload::SortedSet(vec![ScoredMember { member: b"m".to_vec(), score: 1.0 }]);
        let b = Payload::SortedSet(vec![ScoredMember {
            member: b"m".to_vec(),
            score: f64::from_bits(1.0f64.to_bits() + 1),
        }]);
        assert!(!payloads_equivalent(&a, &b));
    }

    #[test]
    fn none_equals_none() {
        assert!(payloads_equivalent(&Payload::None, &Payload::None));
    }

    #[test]
    fn empty_collections_are_detected() {
        assert!(Payload::List(vec![]).is_empty_collection());
        assert!(!Payload::String(vec![]).is_empty_collection());
    }
}
