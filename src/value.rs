//! Tagged value variants for stored data plus the memory-cost estimator.
//!
//! Generalizes the teacher's `obj::RedisObject` (a struct with one of many
//! optional fields populated) into the sum type `9.` of spec.md calls for.

use bytes::Bytes;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

/// A field inside a hash, carrying its own optional expiry (`HEXPIRE`).
#[derive(Debug, Clone, PartialEq)]
pub struct HashField {
    pub data: Bytes,
    pub expire_at: Option<i64>,
}

impl HashField {
    pub fn new(data: Bytes) -> Self {
        HashField {
            data,
            expire_at: None,
        }
    }

    pub fn is_expired(&self, now_ms: i64) -> bool {
        matches!(self.expire_at, Some(t) if t <= now_ms)
    }

    pub fn approx_size(&self) -> usize {
        self.data.len() + 16
    }
}

/// Ordered member/score pairs. `by_score` mirrors `scores` and is kept in
/// sync on every mutation so range queries don't re-sort; it replaces the
/// teacher's bespoke skip list (`skiplist.rs`) with `BTreeSet`, since the
/// spec only requires derived ordering, not a particular structure.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ZSet {
    pub scores: HashMap<Bytes, f64>,
    by_score: BTreeSet<ScoreKey>,
}

#[derive(Debug, Clone, PartialEq)]
struct ScoreKey(f64, Bytes);

impl Eq for ScoreKey {}
impl PartialOrd for ScoreKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for ScoreKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0
            .partial_cmp(&other.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| self.1.cmp(&other.1))
    }
}

impl ZSet {
    pub fn insert(&mut self, member: Bytes, score: f64) -> bool {
        let is_new = if let Some(old) = self.scores.get(&member) {
            self.by_score.remove(&ScoreKey(*old, member.clone()));
            false
        } else {
            true
        };
        self.by_score.insert(ScoreKey(score, member.clone()));
        self.scores.insert(member, score);
        is_new
    }

    pub fn remove(&mut self, member: &[u8]) -> bool {
        if let Some(score) = self.scores.remove(member) {
            self.by_score.remove(&ScoreKey(score, Bytes::copy_from_slice(member)));
            true
        } else {
            false
        }
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// Ascending (score, member) order.
    pub fn iter_ascending(&self) -> impl DoubleEndedIterator<Item = (&Bytes, f64)> {
        self.by_score.iter().map(|k| (&k.1, k.0))
    }

    pub fn rank_ascending(&self, member: &[u8]) -> Option<usize> {
        let score = *self.scores.get(member)?;
        let key = ScoreKey(score, Bytes::copy_from_slice(member));
        Some(self.by_score.range(..&key).count())
    }

    pub fn approx_size(&self) -> usize {
        self.scores
            .iter()
            .map(|(m, _)| m.len() + 24)
            .sum::<usize>()
    }
}

/// Tagged variants over the storable kinds of spec.md §3.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(Bytes),
    List(VecDeque<Bytes>),
    Set(HashSet<Bytes>),
    Hash(HashMap<Bytes, HashField>),
    ZSet(ZSet),
    HyperLogLog(Vec<u8>),
    Bitmap(Vec<u8>),
}

/// The kind tag used for `WRONGTYPE` checks and the `TYPE` command, kept
/// separate from `Value` so handlers can compare kinds without matching on
/// payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Str,
    List,
    Set,
    Hash,
    ZSet,
    HyperLogLog,
    Bitmap,
}

impl Value {
    pub fn kind(&self) -> Kind {
        match self {
            Value::Str(_) => Kind::Str,
            Value::List(_) => Kind::List,
            Value::Set(_) => Kind::Set,
            Value::Hash(_) => Kind::Hash,
            Value::ZSet(_) => Kind::ZSet,
            Value::HyperLogLog(_) => Kind::HyperLogLog,
            Value::Bitmap(_) => Kind::Bitmap,
        }
    }

    /// Deterministic approximate byte cost, consistent across identical
    /// states (spec.md §3's memory cost estimator).
    pub fn approx_size(&self) -> usize {
        match self {
            Value::Str(b) => b.len(),
            Value::List(l) => l.iter().map(|e| e.len() + 8).sum(),
            Value::Set(s) => s.iter().map(|e| e.len() + 8).sum(),
            Value::Hash(h) => h
                .iter()
                .map(|(k, v)| k.len() + v.approx_size() + 8)
                .sum(),
            Value::ZSet(z) => z.approx_size(),
            Value::HyperLogLog(b) | Value::Bitmap(b) => b.len(),
        }
    }
}

impl Kind {
    pub fn name(&self) -> &'static str {
        match self {
            Kind::Str => "string",
            Kind::List => "list",
            Kind::Set => "set",
            Kind::Hash => "hash",
            Kind::ZSet => "zset",
            Kind::HyperLogLog => "string",
            Kind::Bitmap => "string",
        }
    }
}

/// Fixed per-entry bookkeeping overhead counted on top of `Value::approx_size`.
pub const ENTRY_OVERHEAD: usize = 32;

/// A stored entry: tagged value plus expiry/LRU/LFU metadata (spec.md §3).
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub value: Value,
    pub expire_at: Option<i64>,
    pub last_access: i64,
    pub access_count: u32,
}

impl Entry {
    pub fn new(value: Value, now_ms: i64) -> Self {
        Entry {
            value,
            expire_at: None,
            last_access: now_ms,
            access_count: 0,
        }
    }

    pub fn is_expired(&self, now_ms: i64) -> bool {
        matches!(self.expire_at, Some(t) if t <= now_ms)
    }

    pub fn touch_access(&mut self, now_ms: i64) {
        self.last_access = now_ms;
        self.access_count = self.access_count.saturating_add(1);
    }

    /// Cost used by the byte counter: key length (caller adds it) plus the
    /// value cost plus fixed per-entry overhead.
    pub fn approx_size(&self, key_len: usize) -> usize {
        key_len + self.value.approx_size() + ENTRY_OVERHEAD
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zset_orders_by_score_then_member() {
        let mut z = ZSet::default();
        z.insert(Bytes::from("b"), 2.0);
        z.insert(Bytes::from("a"), 1.0);
        z.insert(Bytes::from("c"), 2.0);
        let order: Vec<_> = z.iter_ascending().map(|(m, _)| m.clone()).collect();
        assert_eq!(order, vec![Bytes::from("a"), Bytes::from("b"), Bytes::from("c")]);
    }

    #[test]
    fn zset_rank_reflects_reinsertion() {
        let mut z = ZSet::default();
        z.insert(Bytes::from("a"), 5.0);
        z.insert(Bytes::from("b"), 1.0);
        assert_eq!(z.rank_ascending(b"a"), Some(1));
        z.insert(Bytes::from("a"), 0.0);
        assert_eq!(z.rank_ascending(b"a"), Some(0));
    }

    #[test]
    fn entry_expiry_is_strict() {
        let e = Entry {
            value: Value::Str(Bytes::from("x")),
            expire_at: Some(100),
            last_access: 0,
            access_count: 0,
        };
        assert!(!e.is_expired(99));
        assert!(e.is_expired(100));
        assert!(e.is_expired(101));
    }
}
