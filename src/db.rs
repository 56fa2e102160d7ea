//! The logical database: keyed map, memory counters, watch registry, and the
//! latches that guard them (spec.md §3, §5). Generalizes the teacher's
//! single global database pointer (`redis/db.rs`) into an explicit,
//! independently latchable unit addressed through a `ServerContext` handle
//! rather than a module-level global (spec.md §9's redesign directive).

use crate::error::CommandError;
use crate::value::{Entry, Kind, Value};
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockWriteGuard};

/// A lightweight per-client flag, shared between the connection task and
/// every database's watch registry, set by `touch` to abort a transaction
/// (spec.md §4.6).
pub type WatchFlag = Arc<AtomicBool>;

/// The guarded contents of a database: the key map and its memory counters.
/// Kept together so a single lock acquisition can enforce spec.md §9's "one
/// exclusive latch for existence check + memory decision + eviction +
/// insertion" rule for mutating commands.
#[derive(Clone)]
pub struct DbInner {
    pub map: HashMap<Bytes, Entry>,
    pub bytes: usize,
    pub peak_bytes: usize,
}

impl DbInner {
    pub fn new() -> Self {
        DbInner {
            map: HashMap::new(),
            bytes: 0,
            peak_bytes: 0,
        }
    }

    fn note_peak(&mut self) {
        if self.bytes > self.peak_bytes {
            self.peak_bytes = self.bytes;
        }
    }

    /// Removes `key` if its entry is expired as of `now_ms`. Returns true if
    /// something was removed.
    pub fn expire_if_due(&mut self, key: &[u8], now_ms: i64) -> bool {
        let expired = matches!(self.map.get(key), Some(e) if e.is_expired(now_ms));
        if expired {
            self.remove(key);
        }
        expired
    }

    /// Inserts or replaces `key`'s entry, keeping `bytes`/`peak_bytes`
    /// correct (old cost subtracted, new cost added).
    pub fn set(&mut self, key: Bytes, entry: Entry) {
        let key_len = key.len();
        if let Some(old) = self.map.get(&key) {
            self.bytes = self.bytes.saturating_sub(old.approx_size(key_len));
        }
        self.bytes += entry.approx_size(key_len);
        self.map.insert(key, entry);
        self.note_peak();
    }

    pub fn remove(&mut self, key: &[u8]) -> Option<Entry> {
        let removed = self.map.remove(key);
        if let Some(ref e) = removed {
            self.bytes = self.bytes.saturating_sub(e.approx_size(key.len()));
        }
        removed
    }

    /// Recomputes and applies the cost delta after an in-place mutation of
    /// `key`'s value (append, list push, etc). `before` is the value's
    /// `approx_size()` captured prior to the mutation.
    pub fn adjust_for_mutation(&mut self, key: &[u8], before: usize) {
        if let Some(entry) = self.map.get(key) {
            let after = entry.value.approx_size();
            if after >= before {
                self.bytes += after - before;
            } else {
                self.bytes = self.bytes.saturating_sub(before - after);
            }
            self.note_peak();
        }
    }

    pub fn projected_total(&self, extra: usize) -> usize {
        self.bytes + extra
    }

    /// Looks up `key`, lazily expiring it first, and enforces that an
    /// existing entry matches `want`'s kind (spec.md §4.2 step 2).
    pub fn get_checked(&mut self, key: &[u8], now_ms: i64, want: Kind) -> Result<Option<&Entry>, CommandError> {
        self.expire_if_due(key, now_ms);
        match self.map.get(key) {
            None => Ok(None),
            Some(e) if e.value.kind() != want => Err(CommandError::WrongType),
            Some(e) => Ok(Some(e)),
        }
    }

    pub fn get_checked_mut(
        &mut self,
        key: &[u8],
        now_ms: i64,
        want: Kind,
    ) -> Result<Option<&mut Entry>, CommandError> {
        self.expire_if_due(key, now_ms);
        match self.map.get_mut(key) {
            None => Ok(None),
            Some(e) if e.value.kind() != want => Err(CommandError::WrongType),
            Some(e) => Ok(Some(e)),
        }
    }
}

/// One logical database (spec.md §3). Identifier, guarded contents, watch
/// registry, transaction latch, and this database's append-only log handle
/// (if enabled) and snapshot trackers.
pub struct Database {
    pub id: usize,
    inner: RwLock<DbInner>,
    /// Watch-registry latch (mutex): key -> clients currently watching it.
    watchers: Mutex<HashMap<Bytes, Vec<WatchFlag>>>,
    /// Transaction latch (RW): shared by normal commands, exclusive by EXEC.
    tx_latch: RwLock<()>,
}

impl Database {
    pub fn new(id: usize) -> Self {
        Database {
            id,
            inner: RwLock::new(DbInner::new()),
            watchers: Mutex::new(HashMap::new()),
            tx_latch: RwLock::new(()),
        }
    }

    /// Acquires the store latch shared, for pure queries. Lazily-expired
    /// entries are filtered out of view but only removed via `read_removing_expired`
    /// or the active expiry sweep, keeping this path lock-cheap.
    pub fn read<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&DbInner) -> R,
    {
        let guard = self.inner.read().unwrap();
        f(&guard)
    }

    /// Acquires the store latch exclusively for mutation.
    pub fn write<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut DbInner) -> R,
    {
        let mut guard = self.inner.write().unwrap();
        f(&mut guard)
    }

    /// Looks up `key`, lazily deleting it first if expired. This is the
    /// canonical read-with-lazy-expiry path: it always takes the exclusive
    /// latch because lazy expiry is itself a mutation, but callers that only
    /// read (no further mutation) still go through here to honor "an
    /// expired entry is never returned to a caller; it is removed on
    /// access".
    pub fn get_live(&self, key: &[u8], now_ms: i64) -> Option<Entry> {
        let mut guard = self.inner.write().unwrap();
        if guard.expire_if_due(key, now_ms) {
            return None;
        }
        guard.map.get(key).cloned()
    }

    pub fn exclusive(&self) -> RwLockWriteGuard<'_, DbInner> {
        self.inner.write().unwrap()
    }

    pub fn dbsize(&self) -> usize {
        self.read(|d| d.map.len())
    }

    pub fn flush(&self) {
        let mut guard = self.inner.write().unwrap();
        guard.map.clear();
        guard.bytes = 0;
        // peak_bytes stays monotonic per spec.md §3.
        let mut w = self.watchers.lock().unwrap();
        for (_, flags) in w.drain() {
            for f in flags {
                f.store(true, Ordering::SeqCst);
            }
        }
    }

    /// `WATCH k`: registers `flag` against `key`.
    pub fn watch(&self, key: Bytes, flag: WatchFlag) {
        self.watchers.lock().unwrap().entry(key).or_default().push(flag);
    }

    /// Removes every watch entry belonging to `flag` (used by `UNWATCH`,
    /// `DISCARD`, and after `EXEC`).
    pub fn unwatch_all(&self, flag: &WatchFlag) {
        let mut w = self.watchers.lock().unwrap();
        w.retain(|_, flags| {
            flags.retain(|f| !Arc::ptr_eq(f, flag));
            !flags.is_empty()
        });
    }

    /// `touch(k)`: marks every watcher of `key` as failed and drops the
    /// registry entry. Called by every mutating handler while holding the
    /// store write latch (the watch-registry latch is always acquired
    /// inside the store latch, per spec.md §5's ordering rule).
    pub fn touch(&self, key: &[u8]) {
        let mut w = self.watchers.lock().unwrap();
        if let Some(flags) = w.remove(key) {
            for f in flags {
                f.store(true, Ordering::SeqCst);
            }
        }
    }

    /// `touch_all()`: used by `FLUSHDB`/`FLUSHALL` in addition to `flush`.
    pub fn touch_all(&self) {
        let mut w = self.watchers.lock().unwrap();
        for (_, flags) in w.drain() {
            for f in flags {
                f.store(true, Ordering::SeqCst);
            }
        }
    }

    /// Normal commands hold this shared for their duration; `EXEC` holds it
    /// exclusive so no other command interleaves with a transaction body.
    pub fn tx_read(&self) -> std::sync::RwLockReadGuard<'_, ()> {
        self.tx_latch.read().unwrap()
    }

    pub fn tx_write(&self) -> std::sync::RwLockWriteGuard<'_, ()> {
        self.tx_latch.write().unwrap()
    }

    /// Active expiry worker: sample up to `sample_size` keys, delete any
    /// that are expired. Intentionally cheap and unbounded-scan-free per
    /// spec.md §4.2.
    pub fn active_expire_cycle(&self, sample_size: usize, now_ms: i64) -> usize {
        use rand::seq::IteratorRandom;
        let mut guard = self.inner.write().unwrap();
        let candidates: Vec<Bytes> = {
            let mut rng = rand::thread_rng();
            guard
                .map
                .keys()
                .cloned()
                .choose_multiple(&mut rng, sample_size)
        };
        let mut removed = 0;
        for key in candidates {
            if guard.expire_if_due(&key, now_ms) {
                removed += 1;
            }
        }
        removed
    }
}

/// All logical databases plus the index currently selected by a connection
/// (spec.md §9: the selected index lives on the client, not a global).
pub struct DatabaseSet {
    dbs: Vec<Arc<Database>>,
}

impl DatabaseSet {
    pub fn new(count: usize) -> Self {
        DatabaseSet {
            dbs: (0..count).map(Database::new).map(Arc::new).collect(),
        }
    }

    pub fn get(&self, index: usize) -> Option<&Arc<Database>> {
        self.dbs.get(index)
    }

    pub fn len(&self) -> usize {
        self.dbs.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Database>> {
        self.dbs.iter()
    }
}

pub fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_remove_keep_bytes_nonnegative_and_peak_monotonic() {
        let db = Database::new(0);
        db.write(|d| d.set(Bytes::from("a"), Entry::new(Value::Str(Bytes::from("hello")), 0)));
        let bytes_after_set = db.read(|d| d.bytes);
        assert!(bytes_after_set > 0);
        db.write(|d| {
            d.remove(b"a");
        });
        db.read(|d| {
            assert_eq!(d.bytes, 0);
            assert!(d.peak_bytes >= bytes_after_set);
        });
    }

    #[test]
    fn get_live_removes_expired_entries() {
        let db = Database::new(0);
        db.write(|d| {
            let mut e = Entry::new(Value::Str(Bytes::from("v")), 0);
            e.expire_at = Some(10);
            d.set(Bytes::from("k"), e);
        });
        assert!(db.get_live(b"k", 20).is_none());
        db.read(|d| assert!(!d.map.contains_key(b"k" as &[u8])));
    }

    #[test]
    fn touch_clears_registry_and_sets_flags() {
        let db = Database::new(0);
        let flag: WatchFlag = Arc::new(AtomicBool::new(false));
        db.watch(Bytes::from("k"), flag.clone());
        db.touch(b"k");
        assert!(flag.load(Ordering::SeqCst));
        db.watch(Bytes::from("k"), flag.clone());
        db.touch(b"other");
        // not touched: flag already true from before, registry entry for k remains
    }
}
