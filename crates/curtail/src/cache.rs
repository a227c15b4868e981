use crate::{StoreError, TimeSource, WallClock};
use parking_lot::{Mutex, RwLock};
use std::{
    collections::HashMap,
    sync::{
        Arc,
        mpsc::{RecvTimeoutError, Sender, channel},
    },
    thread::{self, JoinHandle},
    time::Duration,
};
use tracing::warn;

/// Cached metadata for one short code.
///
/// `value` is the opaque payload the cache exists to serve (the original
/// resource reference); `usage_count` and `last_used_at` track reads
/// recorded through [`EntryCache::increment_usage`]. `dirty` marks state
/// that has diverged from durable storage and is due for the next flush.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CacheEntry<V> {
    pub value: V,
    pub usage_count: u64,
    /// Milliseconds since the Unix epoch.
    pub last_used_at: u64,
    pub dirty: bool,
}

impl<V> CacheEntry<V> {
    /// A fresh, clean entry with no recorded usage.
    pub fn new(value: V) -> Self {
        Self {
            value,
            usage_count: 0,
            last_used_at: 0,
            dirty: false,
        }
    }
}

/// Callback applied to a batch of dirty entries during a flush pass.
///
/// Receives clones of every entry dirty at the start of the pass and
/// reports a single result for the whole batch: on `Ok` the batch is
/// marked clean, on `Err` it stays dirty and is retried on the next tick.
pub type SyncFn<V> =
    dyn Fn(&HashMap<String, CacheEntry<V>>) -> core::result::Result<(), StoreError> + Send + Sync;

struct SyncHandle {
    stop_tx: Sender<()>,
    worker: JoinHandle<()>,
}

/// Thread-safe in-memory cache of short-code metadata with dirty tracking
/// and periodic write-back.
///
/// Reads take a shared lock; writes an exclusive one. Every value crossing
/// the API boundary is a clone, so callers can never mutate cache-owned
/// state through something the cache returned. The background flush runs
/// on its own timer thread and contends with callers only for the brief
/// duration of a map lock, never for the duration of the sync callback.
///
/// The clock parameter exists so tests can pin `last_used_at`; production
/// use is just [`EntryCache::new`].
///
/// # Example
///
/// ```
/// use curtail::{CacheEntry, EntryCache};
///
/// let cache: EntryCache<String> = EntryCache::new();
/// cache.set("x7Kp2Qa", CacheEntry::new("https://example.com/a".to_owned()));
/// cache.increment_usage("x7Kp2Qa");
///
/// let entry = cache.get("x7Kp2Qa").unwrap();
/// assert_eq!(entry.usage_count, 1);
/// assert!(entry.dirty);
/// ```
pub struct EntryCache<V, T = WallClock> {
    entries: Arc<RwLock<HashMap<String, CacheEntry<V>>>>,
    clock: T,
    sync_ctl: Mutex<Option<SyncHandle>>,
}

impl<V: Clone> EntryCache<V, WallClock> {
    /// Creates an empty cache stamping usage times from the system clock.
    pub fn new() -> Self {
        Self::with_clock(WallClock)
    }
}

impl<V: Clone> Default for EntryCache<V, WallClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone, T: TimeSource<u64>> EntryCache<V, T> {
    /// Creates an empty cache with an explicit time source.
    pub fn with_clock(clock: T) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            clock,
            sync_ctl: Mutex::new(None),
        }
    }

    /// Returns a copy of the entry for `key`, if present.
    pub fn get(&self, key: &str) -> Option<CacheEntry<V>> {
        self.entries.read().get(key).cloned()
    }

    /// Stores `entry` under `key`, replacing any previous entry.
    pub fn set(&self, key: &str, entry: CacheEntry<V>) {
        self.entries.write().insert(key.to_owned(), entry);
    }

    /// Removes the entry for `key`. Silent if absent.
    pub fn delete(&self, key: &str) {
        self.entries.write().remove(key);
    }

    /// Records one use of `key`: bumps the count, refreshes the
    /// timestamp, and marks the entry dirty. No-op if the key is absent.
    pub fn increment_usage(&self, key: &str) {
        let now = self.clock.current_millis();
        if let Some(entry) = self.entries.write().get_mut(key) {
            entry.usage_count += 1;
            entry.last_used_at = now;
            entry.dirty = true;
        }
    }

    /// Returns copies of every entry currently marked dirty.
    pub fn dirty_entries(&self) -> HashMap<String, CacheEntry<V>> {
        self.entries
            .read()
            .iter()
            .filter(|(_, entry)| entry.dirty)
            .map(|(key, entry)| (key.clone(), entry.clone()))
            .collect()
    }

    /// Clears the dirty flag for `key`. No-op if absent.
    pub fn mark_clean(&self, key: &str) {
        if let Some(entry) = self.entries.write().get_mut(key) {
            entry.dirty = false;
        }
    }

    /// Replaces the entire cache contents with `data`.
    ///
    /// Bulk-loaded entries start clean regardless of the flags they
    /// arrive with: a bulk load is by definition what durable storage
    /// already holds.
    pub fn load_data(&self, data: HashMap<String, CacheEntry<V>>) {
        let mut entries = self.entries.write();
        entries.clear();
        for (key, mut entry) in data {
            entry.dirty = false;
            entries.insert(key, entry);
        }
    }
}

impl<V, T> EntryCache<V, T> {
    /// Starts the background flush loop if it is not already running
    /// (idempotent start).
    ///
    /// Every `interval`, dirty entries are collected and handed to
    /// `sync_fn`; on success the batch is marked clean, on failure it is
    /// left dirty, logged, and retried on the next tick. Empty batches
    /// skip the callback entirely.
    pub fn start_background_sync<F>(&self, interval: Duration, sync_fn: F)
    where
        V: Clone + Send + Sync + 'static,
        F: Fn(&HashMap<String, CacheEntry<V>>) -> core::result::Result<(), StoreError>
            + Send
            + 'static,
    {
        let mut ctl = self.sync_ctl.lock();
        if ctl.is_some() {
            return;
        }

        let (stop_tx, stop_rx) = channel();
        let entries = Arc::clone(&self.entries);
        let worker = thread::spawn(move || {
            loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => flush(&entries, &sync_fn),
                    // Stop signal (or the cache itself is gone): one
                    // final pass so trailing writes are not lost.
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                        flush(&entries, &sync_fn);
                        break;
                    }
                }
            }
        });

        *ctl = Some(SyncHandle { stop_tx, worker });
    }

    /// Signals the flush loop to run one final pass and terminate, then
    /// waits for it. Idempotent if not running.
    pub fn stop_background_sync(&self) {
        let handle = self.sync_ctl.lock().take();
        let Some(SyncHandle { stop_tx, worker }) = handle else {
            return;
        };
        let _ = stop_tx.send(());
        if worker.join().is_err() {
            warn!("background sync worker panicked");
        }
    }

    /// Stops background synchronization and releases the cache's worker.
    /// Equivalent to [`stop_background_sync`]; also runs on drop.
    ///
    /// [`stop_background_sync`]: EntryCache::stop_background_sync
    pub fn close(&self) {
        self.stop_background_sync();
    }
}

impl<V, T> Drop for EntryCache<V, T> {
    fn drop(&mut self) {
        self.stop_background_sync();
    }
}

/// One flush pass: snapshot the dirty set, call `sync_fn` without holding
/// any lock, and mark the batch clean on success.
fn flush<V, F>(entries: &RwLock<HashMap<String, CacheEntry<V>>>, sync_fn: &F)
where
    V: Clone,
    F: Fn(&HashMap<String, CacheEntry<V>>) -> core::result::Result<(), StoreError>,
{
    let batch: HashMap<String, CacheEntry<V>> = entries
        .read()
        .iter()
        .filter(|(_, entry)| entry.dirty)
        .map(|(key, entry)| (key.clone(), entry.clone()))
        .collect();

    if batch.is_empty() {
        return;
    }

    match sync_fn(&batch) {
        Ok(()) => {
            let mut entries = entries.write();
            for key in batch.keys() {
                if let Some(entry) = entries.get_mut(key) {
                    entry.dirty = false;
                }
            }
        }
        Err(err) => {
            // Whole-batch failure: nothing is marked clean; the next
            // tick retries the same entries.
            warn!(batch = batch.len(), error = %err, "dirty entry flush failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

    struct MockTime {
        millis: AtomicU64,
    }

    impl MockTime {
        fn at(millis: u64) -> Self {
            Self {
                millis: AtomicU64::new(millis),
            }
        }
    }

    impl TimeSource<u64> for &MockTime {
        fn current_millis(&self) -> u64 {
            self.millis.load(Ordering::Relaxed)
        }
    }

    fn entry(value: &str) -> CacheEntry<String> {
        CacheEntry::new(value.to_owned())
    }

    #[test]
    fn set_then_get_returns_an_equal_copy() {
        let cache: EntryCache<String> = EntryCache::new();
        let original = entry("https://example.com/a");
        cache.set("abc", original.clone());
        assert_eq!(cache.get("abc"), Some(original));
    }

    #[test]
    fn mutating_a_returned_copy_does_not_touch_the_cache() {
        let cache: EntryCache<String> = EntryCache::new();
        cache.set("abc", entry("https://example.com/a"));

        let mut copy = cache.get("abc").unwrap();
        copy.value = "https://evil.example".to_owned();
        copy.usage_count = 999;

        let fresh = cache.get("abc").unwrap();
        assert_eq!(fresh.value, "https://example.com/a");
        assert_eq!(fresh.usage_count, 0);
    }

    #[test]
    fn get_missing_returns_none() {
        let cache: EntryCache<String> = EntryCache::new();
        assert_eq!(cache.get("nope"), None);
    }

    #[test]
    fn delete_is_silent_for_absent_keys() {
        let cache: EntryCache<String> = EntryCache::new();
        cache.set("abc", entry("x"));
        cache.delete("abc");
        cache.delete("abc");
        assert_eq!(cache.get("abc"), None);
    }

    #[test]
    fn increment_usage_updates_count_timestamp_and_dirty() {
        let clock = MockTime::at(1_000);
        let cache: EntryCache<String, _> = EntryCache::with_clock(&clock);
        cache.set("abc", entry("x"));

        clock.millis.store(2_000, Ordering::Relaxed);
        cache.increment_usage("abc");

        let got = cache.get("abc").unwrap();
        assert_eq!(got.usage_count, 1);
        assert_eq!(got.last_used_at, 2_000);
        assert!(got.dirty);
    }

    #[test]
    fn increment_usage_on_absent_key_leaves_the_cache_unchanged() {
        let cache: EntryCache<String> = EntryCache::new();
        cache.increment_usage("ghost");
        assert!(cache.dirty_entries().is_empty());
        assert_eq!(cache.get("ghost"), None);
    }

    #[test]
    fn dirty_entries_and_mark_clean() {
        let cache: EntryCache<String> = EntryCache::new();
        cache.set("a", entry("x"));
        cache.set("b", entry("y"));
        cache.increment_usage("a");

        let dirty = cache.dirty_entries();
        assert_eq!(dirty.len(), 1);
        assert!(dirty.contains_key("a"));

        cache.mark_clean("a");
        cache.mark_clean("ghost");
        assert!(cache.dirty_entries().is_empty());
    }

    #[test]
    fn load_data_replaces_contents_and_forces_entries_clean() {
        let cache: EntryCache<String> = EntryCache::new();
        cache.set("old", entry("gone"));

        let mut incoming = HashMap::new();
        let mut carried = entry("kept");
        carried.dirty = true;
        incoming.insert("new".to_owned(), carried);
        cache.load_data(incoming);

        assert_eq!(cache.get("old"), None);
        let loaded = cache.get("new").unwrap();
        assert_eq!(loaded.value, "kept");
        assert!(!loaded.dirty);
        assert!(cache.dirty_entries().is_empty());
    }

    #[test]
    fn background_sync_flushes_dirty_entries_and_marks_them_clean() {
        let cache: EntryCache<String> = EntryCache::new();
        let mut dirty = entry("https://example.com/a");
        dirty.dirty = true;
        cache.set("abc", dirty);

        let (tx, rx) = std::sync::mpsc::channel();
        cache.start_background_sync(Duration::from_millis(50), move |batch| {
            tx.send(batch.keys().cloned().collect::<Vec<_>>()).ok();
            Ok(())
        });

        // Within roughly two intervals the batch must have flushed.
        let keys = rx.recv_timeout(Duration::from_millis(500)).unwrap();
        assert!(keys.contains(&"abc".to_owned()));

        // The flush marks the entry clean shortly after the callback.
        let deadline = std::time::Instant::now() + Duration::from_millis(500);
        while !cache.dirty_entries().is_empty() {
            assert!(std::time::Instant::now() < deadline, "entry never marked clean");
            thread::sleep(Duration::from_millis(5));
        }

        cache.stop_background_sync();
    }

    #[test]
    fn failed_flushes_keep_the_batch_dirty_and_retry() {
        let cache: EntryCache<String> = EntryCache::new();
        let mut dirty = entry("x");
        dirty.dirty = true;
        cache.set("abc", dirty);

        let fail = Arc::new(AtomicBool::new(true));
        let calls = Arc::new(AtomicU64::new(0));
        let fail_in_sync = Arc::clone(&fail);
        let calls_in_sync = Arc::clone(&calls);
        cache.start_background_sync(Duration::from_millis(20), move |_batch| {
            calls_in_sync.fetch_add(1, Ordering::SeqCst);
            if fail_in_sync.load(Ordering::SeqCst) {
                Err("record store offline".into())
            } else {
                Ok(())
            }
        });

        // Let at least one failing tick happen; the entry must stay dirty.
        let deadline = std::time::Instant::now() + Duration::from_millis(1_000);
        while calls.load(Ordering::SeqCst) < 2 {
            assert!(std::time::Instant::now() < deadline, "sync_fn never invoked");
            thread::sleep(Duration::from_millis(5));
        }
        assert!(!cache.dirty_entries().is_empty());

        // Recovery: the next tick succeeds and cleans the batch.
        fail.store(false, Ordering::SeqCst);
        let deadline = std::time::Instant::now() + Duration::from_millis(1_000);
        while !cache.dirty_entries().is_empty() {
            assert!(std::time::Instant::now() < deadline, "entry never marked clean");
            thread::sleep(Duration::from_millis(5));
        }

        cache.stop_background_sync();
    }

    #[test]
    fn stop_runs_a_final_flush_for_trailing_writes() {
        let cache: EntryCache<String> = EntryCache::new();

        let flushed = Arc::new(Mutex::new(Vec::new()));
        let flushed_in_sync = Arc::clone(&flushed);
        // Interval far longer than the test: only the final pass can
        // observe the entry.
        cache.start_background_sync(Duration::from_secs(3_600), move |batch| {
            flushed_in_sync.lock().extend(batch.keys().cloned());
            Ok(())
        });

        let mut dirty = entry("x");
        dirty.dirty = true;
        cache.set("late", dirty);

        cache.stop_background_sync();
        assert!(flushed.lock().contains(&"late".to_owned()));
        assert!(cache.dirty_entries().is_empty());
    }

    #[test]
    fn start_is_idempotent_and_stop_without_start_is_a_no_op() {
        let cache: EntryCache<String> = EntryCache::new();
        cache.stop_background_sync();

        let calls = Arc::new(AtomicU64::new(0));
        let first = Arc::clone(&calls);
        let second = Arc::clone(&calls);
        cache.start_background_sync(Duration::from_secs(3_600), move |_| {
            first.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        // Second start: ignored, the first loop keeps running.
        cache.start_background_sync(Duration::from_millis(1), move |_| {
            second.fetch_add(1_000_000, Ordering::SeqCst);
            Ok(())
        });

        let mut dirty = entry("x");
        dirty.dirty = true;
        cache.set("abc", dirty);
        cache.close();

        // Only the first callback ever ran (exactly once, at stop).
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn cache_entry_roundtrips_through_json() {
        let mut e = entry("https://example.com/a");
        e.usage_count = 3;
        e.last_used_at = 1_700_000_000_000;
        e.dirty = true;

        let json = serde_json::to_string(&e).unwrap();
        let back: CacheEntry<String> = serde_json::from_str(&json).unwrap();
        assert_eq!(e, back);
    }
}
