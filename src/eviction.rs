//! Sampled-key eviction on `maxmemory` breach (spec.md §4.2). Runs entirely
//! against an already-locked `DbInner`: it never acquires the store latch
//! itself (spec.md §5's ordering rule), since callers invoke it from inside
//! their own single exclusive-latch critical section.

use crate::db::DbInner;
use crate::error::CommandError;
use bytes::Bytes;
use rand::seq::IteratorRandom;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionPolicy {
    NoEviction,
    AllKeysRandom,
    AllKeysLru,
    AllKeysLfu,
    VolatileRandom,
    VolatileLru,
    VolatileLfu,
}

impl EvictionPolicy {
    pub fn parse(s: &str) -> Option<EvictionPolicy> {
        match s {
            "no-eviction" => Some(EvictionPolicy::NoEviction),
            "allkeys-random" => Some(EvictionPolicy::AllKeysRandom),
            "allkeys-lru" => Some(EvictionPolicy::AllKeysLru),
            "allkeys-lfu" => Some(EvictionPolicy::AllKeysLfu),
            "volatile-random" => Some(EvictionPolicy::VolatileRandom),
            "volatile-lru" => Some(EvictionPolicy::VolatileLru),
            "volatile-lfu" => Some(EvictionPolicy::VolatileLfu),
            _ => None,
        }
    }

    fn only_volatile(&self) -> bool {
        matches!(
            self,
            EvictionPolicy::VolatileRandom | EvictionPolicy::VolatileLru | EvictionPolicy::VolatileLfu
        )
    }
}

/// Ensures that after this call, `inner.bytes + extra_bytes < maxmemory`
/// (when `maxmemory > 0`), evicting up to `samples` random keys per the
/// configured policy. Returns `MaxMemory` if eviction could not free enough.
pub fn ensure_capacity(
    inner: &mut DbInner,
    maxmemory: usize,
    extra_bytes: usize,
    policy: EvictionPolicy,
    samples: usize,
) -> Result<(), CommandError> {
    if maxmemory == 0 || inner.projected_total(extra_bytes) < maxmemory {
        return Ok(());
    }
    if policy == EvictionPolicy::NoEviction {
        return Err(CommandError::MaxMemory);
    }

    let mut rng = rand::thread_rng();
    let mut candidates: Vec<(Bytes, i64, u32, bool)> = inner
        .map
        .iter()
        .choose_multiple(&mut rng, samples)
        .into_iter()
        .map(|(k, e)| (k.clone(), e.last_access, e.access_count, e.expire_at.is_some()))
        .collect();

    if policy.only_volatile() {
        candidates.retain(|(_, _, _, has_ttl)| *has_ttl);
    }

    match policy {
        EvictionPolicy::AllKeysLru | EvictionPolicy::VolatileLru => {
            candidates.sort_by_key(|(_, last_access, _, _)| *last_access);
        }
        EvictionPolicy::AllKeysLfu | EvictionPolicy::VolatileLfu => {
            candidates.sort_by_key(|(_, _, access_count, _)| *access_count);
        }
        EvictionPolicy::AllKeysRandom | EvictionPolicy::VolatileRandom => {}
        EvictionPolicy::NoEviction => unreachable!(),
    }

    for (key, _, _, _) in candidates {
        if inner.projected_total(extra_bytes) < maxmemory {
            break;
        }
        inner.remove(&key);
    }

    if inner.projected_total(extra_bytes) >= maxmemory {
        return Err(CommandError::MaxMemory);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Entry, Value};

    #[test]
    fn evicts_least_recently_used_first() {
        let mut inner = DbInner::new();
        for i in 0..10 {
            let mut e = Entry::new(Value::Str(Bytes::from(vec![0u8; 50])), i);
            e.last_access = i;
            inner.set(Bytes::from(format!("k{i}")), e);
        }
        let before = inner.bytes;
        ensure_capacity(&mut inner, before - 10, 0, EvictionPolicy::AllKeysLru, 10).unwrap();
        assert!(inner.bytes < before);
        assert!(!inner.map.contains_key(b"k0" as &[u8]));
    }

    #[test]
    fn no_eviction_policy_fails_immediately() {
        let mut inner = DbInner::new();
        inner.set(Bytes::from("k"), Entry::new(Value::Str(Bytes::from(vec![0u8; 50])), 0));
        let err = ensure_capacity(&mut inner, 1, 100, EvictionPolicy::NoEviction, 10).unwrap_err();
        assert_eq!(err, CommandError::MaxMemory);
    }

    #[test]
    fn eviction_terminates_with_error_when_insufficient() {
        let mut inner = DbInner::new();
        inner.set(Bytes::from("k"), Entry::new(Value::Str(Bytes::from(vec![0u8; 5])), 0));
        let err = ensure_capacity(&mut inner, 1, 1000, EvictionPolicy::AllKeysRandom, 10).unwrap_err();
        assert_eq!(err, CommandError::MaxMemory);
    }
}
