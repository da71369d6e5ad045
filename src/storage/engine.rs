//! Thread-Safe Keyspace with Expiry Support
//!
//! This module implements the key table: a flat namespace mapping keys to
//! [`Entry`] values, split across sharded locks.
//!
//! ## Design Decisions
//!
//! 1. **Sharded Locks**: 64 shards, each behind its own `RwLock`.
//! 2. **Lock Views**: commands never touch shards directly. They ask for a
//!    [`Keyspace`] holding the write guards of every shard their keys live
//!    in, acquired in ascending shard order so two views can never deadlock.
//! 3. **Lazy Expiry**: every access through a `Keyspace` drops an expired
//!    entry before looking at it, so an expired key is never observed.
//! 4. **Journal**: a script run records the prior state of each key it
//!    touches and can roll the whole run back.
//!
//! ## Concurrency Model
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     StorageEngine                           │
//! │  ┌─────────┐ ┌─────────┐ ┌─────────┐ ┌─────────┐            │
//! │  │ Shard 0 │ │ Shard 1 │ │ Shard 2 │ │ Shard N │            │
//! │  │ RwLock  │ │ RwLock  │ │ RwLock  │ │ RwLock  │            │
//! │  └────▲────┘ └─────────┘ └────▲────┘ └─────────┘            │
//! │       └──── Keyspace (guards of 0 and 2, locked in order)   │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use super::expiry::Ttl;
use crate::error::CommandError;
use crate::types::Value;
use bytes::Bytes;
use rand::Rng;
use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockWriteGuard};
use std::time::{Duration, Instant};

/// Number of shards for the storage engine.
pub const NUM_SHARDS: usize = 64;

/// A stored value with an optional expiry instant.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub value: Value,
    /// When this entry expires (None = never expires)
    pub expires_at: Option<Instant>,
}

impl Entry {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    pub fn with_ttl(value: Value, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Some(Instant::now() + ttl),
        }
    }

    /// Checks if this entry has expired.
    #[inline]
    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|exp| Instant::now() >= exp)
    }

    /// Remaining time to live, or None if the entry never expires.
    pub fn ttl(&self) -> Option<Duration> {
        self.expires_at
            .map(|exp| exp.saturating_duration_since(Instant::now()))
    }
}

/// A single shard containing a portion of the keyspace.
#[derive(Debug, Default)]
pub struct Shard {
    entries: HashMap<Bytes, Entry>,
}

/// Determines which shard a key belongs to.
#[inline]
pub fn shard_index(key: &[u8]) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    (hasher.finish() as usize) % NUM_SHARDS
}

/// The key table shared by every connection.
///
/// # Example
///
/// ```
/// use tidekv::storage::StorageEngine;
/// use tidekv::types::Value;
/// use bytes::Bytes;
///
/// let engine = StorageEngine::new();
/// engine.set(Bytes::from("name"), Value::String(Bytes::from("tide")), None);
/// assert_eq!(engine.key_type(b"name"), "string");
/// ```
pub struct StorageEngine {
    shards: Vec<RwLock<Shard>>,

    /// Statistics: expired keys reclaimed (lazily or by the sweeper)
    expired_count: AtomicU64,
}

impl std::fmt::Debug for StorageEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageEngine")
            .field("shards", &self.shards.len())
            .field("expired_count", &self.expired_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl Default for StorageEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageEngine {
    pub fn new() -> Self {
        Self {
            shards: (0..NUM_SHARDS).map(|_| RwLock::new(Shard::default())).collect(),
            expired_count: AtomicU64::new(0),
        }
    }

    /// Locks the shards owning `keys` and returns a view over them.
    pub fn lock<'k, I>(&self, keys: I) -> Keyspace<'_>
    where
        I: IntoIterator<Item = &'k [u8]>,
    {
        let mut indices: Vec<usize> = keys.into_iter().map(shard_index).collect();
        indices.sort_unstable();
        indices.dedup();
        self.lock_shards(indices)
    }

    /// Locks every shard, for keyspace-wide commands and scripts.
    pub fn lock_all(&self) -> Keyspace<'_> {
        self.lock_shards((0..NUM_SHARDS).collect())
    }

    /// `indices` must be sorted and deduplicated.
    fn lock_shards(&self, indices: Vec<usize>) -> Keyspace<'_> {
        let guards = indices
            .into_iter()
            .map(|i| (i, self.shards[i].write().unwrap_or_else(PoisonError::into_inner)))
            .collect();
        Keyspace {
            engine: self,
            guards,
            journal: None,
        }
    }

    /// Number of stored entries, including expired ones not yet reclaimed.
    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.read().unwrap_or_else(PoisonError::into_inner).entries.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> StorageStats {
        let mut stats = StorageStats {
            expired: self.expired_count.load(Ordering::Relaxed),
            ..Default::default()
        };
        for shard in &self.shards {
            let shard = shard.read().unwrap_or_else(PoisonError::into_inner);
            stats.keys += shard.entries.len() as u64;
            stats.expires += shard.entries.values().filter(|e| e.expires_at.is_some()).count() as u64;
        }
        stats
    }

    /// Removes expired entries from every shard, one shard at a time.
    ///
    /// Called by the background sweeper. Returns the number removed.
    pub fn cleanup_expired(&self) -> u64 {
        let mut cleaned = 0u64;

        for shard in &self.shards {
            let mut shard = shard.write().unwrap_or_else(PoisonError::into_inner);
            let before = shard.entries.len();
            shard.entries.retain(|_, entry| !entry.is_expired());
            cleaned += (before - shard.entries.len()) as u64;
        }

        if cleaned > 0 {
            self.expired_count.fetch_add(cleaned, Ordering::Relaxed);
        }
        cleaned
    }

    // ========================================================================
    // KEY TABLE CONVENIENCE API
    // ========================================================================
    //
    // Each call locks the shards it needs for the duration of one operation.

    pub fn get(&self, key: &[u8]) -> Option<Value> {
        self.lock([key]).value(key).cloned()
    }

    pub fn set(&self, key: Bytes, value: Value, ttl: Option<Duration>) {
        let entry = match ttl {
            Some(ttl) => Entry::with_ttl(value, ttl),
            None => Entry::new(value),
        };
        let mut keyspace = self.lock([key.as_ref()]);
        keyspace.insert(key, entry);
    }

    pub fn delete(&self, keys: &[Bytes]) -> usize {
        let mut keyspace = self.lock(keys.iter().map(|k| k.as_ref()));
        keys.iter().filter(|k| keyspace.remove(k).is_some()).count()
    }

    pub fn exists(&self, key: &[u8]) -> bool {
        self.lock([key]).contains(key)
    }

    pub fn expire(&self, key: &[u8], ttl: Duration) -> bool {
        self.lock([key]).expire(key, ttl)
    }

    pub fn persist(&self, key: &[u8]) -> bool {
        self.lock([key]).persist(key)
    }

    pub fn ttl(&self, key: &[u8]) -> Ttl {
        self.lock([key]).ttl(key)
    }

    pub fn rename(&self, src: &[u8], dst: Bytes) -> Result<(), CommandError> {
        self.lock([src, dst.as_ref()]).rename(src, dst.clone())
    }

    pub fn rename_nx(&self, src: &[u8], dst: Bytes) -> Result<bool, CommandError> {
        self.lock([src, dst.as_ref()]).rename_nx(src, dst.clone())
    }

    pub fn key_type(&self, key: &[u8]) -> &'static str {
        self.lock([key]).value(key).map_or("none", Value::type_name)
    }

    pub fn random_key(&self) -> Option<Bytes> {
        self.lock_all().random_key()
    }

    pub fn flush(&self) {
        self.lock_all().clear();
    }
}

/// Database statistics.
#[derive(Debug, Clone, Default)]
pub struct StorageStats {
    /// Stored entries (including expired ones not yet reclaimed)
    pub keys: u64,
    /// Entries carrying a TTL
    pub expires: u64,
    /// Expired entries reclaimed so far
    pub expired: u64,
}

/// Prior state of every key touched since the journal was opened.
type Journal = HashMap<Bytes, Option<Entry>>;

/// A locked view over some or all shards.
///
/// Every read and write of a command goes through one `Keyspace`, so the
/// command observes and mutates its keys atomically. Dropping the view
/// releases the locks.
pub struct Keyspace<'a> {
    engine: &'a StorageEngine,
    guards: Vec<(usize, RwLockWriteGuard<'a, Shard>)>,
    journal: Option<Journal>,
}

impl std::fmt::Debug for Keyspace<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keyspace")
            .field("shards", &self.guards.len())
            .field("journaling", &self.journal.is_some())
            .finish()
    }
}

impl<'a> Keyspace<'a> {
    fn shard_at(&mut self, index: usize) -> &mut Shard {
        let pos = self
            .guards
            .binary_search_by_key(&index, |(i, _)| *i)
            .unwrap_or_else(|_| panic!("shard {} is not locked by this keyspace view", index));
        &mut self.guards[pos].1
    }

    fn shard_mut(&mut self, key: &[u8]) -> &mut Shard {
        self.shard_at(shard_index(key))
    }

    /// Drops `key` if its entry has expired.
    fn purge_expired(&mut self, key: &[u8]) {
        let shard = self.shard_mut(key);
        if shard.entries.get(key).is_some_and(Entry::is_expired) {
            shard.entries.remove(key);
            self.engine.expired_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Saves the current state of `key` the first time it is about to change.
    fn record(&mut self, key: &[u8]) {
        if self.journal.as_ref().map_or(true, |j| j.contains_key(key)) {
            return;
        }
        let prior = self.shard_mut(key).entries.get(key).cloned();
        if let Some(journal) = self.journal.as_mut() {
            journal.insert(Bytes::copy_from_slice(key), prior);
        }
    }

    pub fn get(&mut self, key: &[u8]) -> Option<&Entry> {
        self.purge_expired(key);
        self.shard_mut(key).entries.get(key)
    }

    pub fn value(&mut self, key: &[u8]) -> Option<&Value> {
        self.get(key).map(|e| &e.value)
    }

    pub fn contains(&mut self, key: &[u8]) -> bool {
        self.get(key).is_some()
    }

    pub fn entry_mut(&mut self, key: &[u8]) -> Option<&mut Entry> {
        self.purge_expired(key);
        self.record(key);
        self.shard_mut(key).entries.get_mut(key)
    }

    pub fn value_mut(&mut self, key: &[u8]) -> Option<&mut Value> {
        self.entry_mut(key).map(|e| &mut e.value)
    }

    /// Returns the value under `key`, creating it with `make` if absent.
    ///
    /// Callers type-check the result before mutating it, so a key holding
    /// another type is left untouched.
    pub fn value_or_insert_with(&mut self, key: &Bytes, make: impl FnOnce() -> Value) -> &mut Value {
        self.purge_expired(key);
        self.record(key);
        &mut self
            .shard_mut(key)
            .entries
            .entry(key.clone())
            .or_insert_with(|| Entry::new(make()))
            .value
    }

    /// Stores an entry, returning the live entry it replaced.
    pub fn insert(&mut self, key: Bytes, entry: Entry) -> Option<Entry> {
        self.purge_expired(&key);
        self.record(&key);
        self.shard_mut(&key).entries.insert(key, entry)
    }

    /// Replaces the value under `key` and clears any TTL.
    pub fn set_value(&mut self, key: Bytes, value: Value) {
        self.insert(key, Entry::new(value));
    }

    /// Replaces the value under `key`, keeping its TTL if it has one.
    pub fn replace_value(&mut self, key: Bytes, value: Value) {
        match self.entry_mut(&key) {
            Some(entry) => entry.value = value,
            None => self.set_value(key, value),
        }
    }

    pub fn remove(&mut self, key: &[u8]) -> Option<Entry> {
        self.purge_expired(key);
        self.record(key);
        self.shard_mut(key).entries.remove(key)
    }

    /// Removes `key` if it holds a collection that has become empty.
    pub fn prune(&mut self, key: &[u8]) {
        let empty = self
            .shard_mut(key)
            .entries
            .get(key)
            .is_some_and(|e| e.value.is_empty_collection());
        if empty {
            self.remove(key);
        }
    }

    /// RENAME: moves the entry (and its TTL), overwriting `dst`.
    pub fn rename(&mut self, src: &[u8], dst: Bytes) -> Result<(), CommandError> {
        let entry = self.remove(src).ok_or(CommandError::NoSuchKey)?;
        self.insert(dst, entry);
        Ok(())
    }

    /// RENAMENX: like rename, but a no-op returning false if `dst` exists.
    pub fn rename_nx(&mut self, src: &[u8], dst: Bytes) -> Result<bool, CommandError> {
        if !self.contains(src) {
            return Err(CommandError::NoSuchKey);
        }
        if self.contains(&dst) {
            return Ok(false);
        }
        self.rename(src, dst)?;
        Ok(true)
    }

    /// Indices of the shards this view holds.
    pub fn shard_indices(&self) -> Vec<usize> {
        self.guards.iter().map(|(i, _)| *i).collect()
    }

    /// Drops expired entries of one locked shard and returns its live keys
    /// with their type tags.
    pub fn keys_in_shard(&mut self, index: usize) -> Vec<(Bytes, &'static str)> {
        let engine = self.engine;
        let shard = self.shard_at(index);
        let before = shard.entries.len();
        shard.entries.retain(|_, e| !e.is_expired());
        let expired = before - shard.entries.len();
        if expired > 0 {
            engine.expired_count.fetch_add(expired as u64, Ordering::Relaxed);
        }
        shard
            .entries
            .iter()
            .map(|(k, e)| (k.clone(), e.value.type_name()))
            .collect()
    }

    /// Live keys across every locked shard.
    pub fn keys(&mut self) -> Vec<Bytes> {
        self.shard_indices()
            .into_iter()
            .flat_map(|i| self.keys_in_shard(i).into_iter().map(|(k, _)| k).collect::<Vec<_>>())
            .collect()
    }

    /// Number of live keys across every locked shard.
    pub fn len(&mut self) -> usize {
        self.shard_indices()
            .into_iter()
            .map(|i| self.keys_in_shard(i).len())
            .sum()
    }

    pub fn is_empty(&mut self) -> bool {
        self.len() == 0
    }

    /// Statistics over the locked shards, after dropping expired entries.
    ///
    /// Commands holding every shard use this instead of
    /// [`StorageEngine::stats`], which would wait on their own locks.
    pub fn stats(&mut self) -> StorageStats {
        let mut stats = StorageStats::default();
        for index in self.shard_indices() {
            self.keys_in_shard(index);
            let shard = self.shard_at(index);
            stats.keys += shard.entries.len() as u64;
            stats.expires += shard.entries.values().filter(|e| e.expires_at.is_some()).count() as u64;
        }
        stats.expired = self.engine.expired_count.load(Ordering::Relaxed);
        stats
    }

    /// A uniformly random live key among the locked shards.
    pub fn random_key(&mut self) -> Option<Bytes> {
        let keys = self.keys();
        if keys.is_empty() {
            return None;
        }
        let pick = rand::thread_rng().gen_range(0..keys.len());
        keys.into_iter().nth(pick)
    }

    /// Removes every key in the locked shards.
    pub fn clear(&mut self) {
        for key in self.keys() {
            self.remove(&key);
        }
    }

    // ========================================================================
    // JOURNAL
    // ========================================================================

    /// Starts recording prior states so the changes can be rolled back.
    pub fn begin_journal(&mut self) {
        self.journal = Some(Journal::new());
    }

    /// Keeps every change made since [`Keyspace::begin_journal`].
    pub fn commit_journal(&mut self) {
        self.journal = None;
    }

    /// Restores every key touched since [`Keyspace::begin_journal`].
    ///
    /// Returns how many keys were restored.
    pub fn rollback_journal(&mut self) -> usize {
        let Some(journal) = self.journal.take() else {
            return 0;
        };
        let restored = journal.len();
        for (key, prior) in journal {
            let shard = self.shard_mut(&key);
            match prior {
                Some(entry) => {
                    shard.entries.insert(key, entry);
                }
                None => {
                    shard.entries.remove(&key);
                }
            }
        }
        restored
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn string(s: &str) -> Value {
        Value::String(Bytes::from(s.to_string()))
    }

    #[test]
    fn test_set_and_get() {
        let engine = StorageEngine::new();
        engine.set(Bytes::from("key"), string("value"), None);
        assert_eq!(engine.get(b"key"), Some(string("value")));
        assert_eq!(engine.get(b"nonexistent"), None);
    }

    #[test]
    fn test_delete_counts_existing() {
        let engine = StorageEngine::new();
        engine.set(Bytes::from("a"), string("1"), None);
        engine.set(Bytes::from("b"), string("2"), None);
        let keys = vec![Bytes::from("a"), Bytes::from("b"), Bytes::from("c")];
        assert_eq!(engine.delete(&keys), 2);
        assert!(!engine.exists(b"a"));
    }

    #[test]
    fn test_lazy_expiry() {
        let engine = StorageEngine::new();
        engine.set(Bytes::from("key"), string("value"), Some(Duration::from_millis(30)));
        assert!(engine.exists(b"key"));

        std::thread::sleep(Duration::from_millis(60));

        assert_eq!(engine.get(b"key"), None);
        assert_eq!(engine.stats().expired, 1);
    }

    #[test]
    fn test_rename() {
        let engine = StorageEngine::new();
        engine.set(Bytes::from("src"), string("v"), Some(Duration::from_secs(100)));
        engine.set(Bytes::from("dst"), string("old"), None);

        assert!(engine.rename(b"src", Bytes::from("dst")).is_ok());
        assert_eq!(engine.get(b"dst"), Some(string("v")));
        assert!(matches!(engine.ttl(b"dst"), Ttl::Remaining(_)));
        assert_eq!(
            engine.rename(b"src", Bytes::from("x")),
            Err(CommandError::NoSuchKey)
        );
    }

    #[test]
    fn test_rename_nx() {
        let engine = StorageEngine::new();
        engine.set(Bytes::from("a"), string("1"), None);
        engine.set(Bytes::from("b"), string("2"), None);

        assert_eq!(engine.rename_nx(b"a", Bytes::from("b")), Ok(false));
        assert_eq!(engine.get(b"a"), Some(string("1")));
        assert_eq!(engine.rename_nx(b"a", Bytes::from("c")), Ok(true));
        assert!(!engine.exists(b"a"));
    }

    #[test]
    fn test_key_type_and_random_key() {
        let engine = StorageEngine::new();
        assert_eq!(engine.key_type(b"missing"), "none");
        assert_eq!(engine.random_key(), None);

        engine.set(Bytes::from("list"), Value::empty_list(), None);
        assert_eq!(engine.key_type(b"list"), "list");
        assert_eq!(engine.random_key(), Some(Bytes::from("list")));
    }

    #[test]
    fn test_random_key_skips_expired() {
        let engine = StorageEngine::new();
        engine.set(Bytes::from("gone"), string("x"), Some(Duration::from_millis(10)));
        engine.set(Bytes::from("kept"), string("y"), None);
        std::thread::sleep(Duration::from_millis(30));
        for _ in 0..20 {
            assert_eq!(engine.random_key(), Some(Bytes::from("kept")));
        }
    }

    #[test]
    fn test_cleanup_expired() {
        let engine = StorageEngine::new();
        engine.set(Bytes::from("key1"), string("v"), Some(Duration::from_millis(10)));
        engine.set(Bytes::from("key2"), string("v"), Some(Duration::from_millis(10)));
        engine.set(Bytes::from("key3"), string("v"), None);

        std::thread::sleep(Duration::from_millis(50));

        assert_eq!(engine.cleanup_expired(), 2);
        assert_eq!(engine.len(), 1);
        assert!(engine.exists(b"key3"));
    }

    #[test]
    fn test_flush() {
        let engine = StorageEngine::new();
        engine.set(Bytes::from("key1"), string("v"), None);
        engine.set(Bytes::from("key2"), string("v"), None);
        assert_eq!(engine.len(), 2);
        engine.flush();
        assert!(engine.is_empty());
    }

    #[test]
    fn test_multi_key_view_locks_in_order() {
        let engine = StorageEngine::new();
        let keys: Vec<Bytes> = (0..20).map(|i| Bytes::from(format!("k{}", i))).collect();
        let view = engine.lock(keys.iter().rev().map(|k| k.as_ref()));
        let indices = view.shard_indices();
        let mut sorted = indices.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(indices, sorted);
    }

    #[test]
    fn test_journal_rollback_restores_prior_state() {
        let engine = StorageEngine::new();
        engine.set(Bytes::from("kept"), string("before"), None);

        {
            let mut view = engine.lock_all();
            view.begin_journal();
            view.set_value(Bytes::from("kept"), string("after"));
            view.set_value(Bytes::from("created"), string("new"));
            view.remove(b"kept");
            assert_eq!(view.rollback_journal(), 2);
        }

        assert_eq!(engine.get(b"kept"), Some(string("before")));
        assert!(!engine.exists(b"created"));
    }

    #[test]
    fn test_journal_commit_keeps_changes() {
        let engine = StorageEngine::new();
        {
            let mut view = engine.lock_all();
            view.begin_journal();
            view.set_value(Bytes::from("k"), string("v"));
            view.commit_journal();
            assert_eq!(view.rollback_journal(), 0);
        }
        assert_eq!(engine.get(b"k"), Some(string("v")));
    }

    #[test]
    fn test_prune_removes_empty_collections() {
        let engine = StorageEngine::new();
        let mut view = engine.lock_all();
        view.set_value(Bytes::from("l"), Value::empty_list());
        view.set_value(Bytes::from("s"), string(""));
        view.prune(b"l");
        view.prune(b"s");
        assert!(!view.contains(b"l"));
        assert!(view.contains(b"s"));
    }

    #[test]
    fn test_concurrent_access() {
        use std::sync::Arc;
        use std::thread;

        let engine = Arc::new(StorageEngine::new());
        let mut handles = vec![];

        for i in 0..10 {
            let engine = Arc::clone(&engine);
            handles.push(thread::spawn(move || {
                for j in 0..100 {
                    let key = Bytes::from(format!("key-{}-{}", i, j));
                    engine.set(key.clone(), string("value"), None);
                    engine.get(&key);
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(engine.len(), 1000);
    }
}
