use crate::{CounterStore, Error, Result};
use parking_lot::Mutex;
use std::{
    collections::HashMap,
    sync::{
        Arc,
        mpsc::{Receiver, SyncSender, TrySendError, sync_channel},
    },
    thread::{self, JoinHandle},
};
use tracing::{debug, warn};

/// Capacity of the write-back queue. A full queue drops the enqueue: only
/// the latest ceiling per key matters, and the terminal [`sync`] covers
/// anything still dirty.
///
/// [`sync`]: CounterAllocator::sync
const WRITEBACK_QUEUE_CAP: usize = 100;

/// Per-key allocation state.
///
/// Invariants: `current <= ceiling` at all times, and `ceiling` never
/// decreases for the life of the allocator. States are created lazily on
/// first allocation and never removed.
#[derive(Clone, Copy, Debug)]
struct CounterState {
    /// Last value issued.
    current: u64,
    /// Upper bound already persisted or pending persistence.
    ceiling: u64,
    /// Whether `ceiling` has diverged from what the store last confirmed.
    dirty: bool,
}

struct Writeback {
    key: String,
    ceiling: u64,
}

/// Issues strictly increasing, never-repeating integers per key while
/// persisting far less often than once per issuance.
///
/// Each persistence write reserves a batch of `step` values ("jump-ahead"
/// allocation): the durable store only ever holds a *ceiling*, an upper
/// bound on everything issued so far. Ceiling bumps are pushed onto a
/// bounded queue served by a single background worker, so the hot path
/// never performs I/O.
///
/// A crash between an in-memory bump and its persistence wastes at most
/// `2 * step` values on restart — a fresh allocator resumes from the last
/// *persisted* ceiling, which is always at or above every value actually
/// handed out — but can never cause duplicate issuance.
///
/// All methods other than [`close`] take `&self`; share the allocator
/// across threads behind an [`Arc`].
///
/// [`close`]: CounterAllocator::close
pub struct CounterAllocator<S: CounterStore> {
    store: Arc<S>,
    step: u64,
    counters: Mutex<HashMap<String, CounterState>>,
    tx: Option<SyncSender<Writeback>>,
    worker: Option<JoinHandle<()>>,
}

impl<S: CounterStore + 'static> CounterAllocator<S> {
    /// Creates an allocator over `store`, reserving `step` values per
    /// ceiling write, and starts the write-back worker.
    ///
    /// # Panics
    ///
    /// Panics if `step` is zero: a zero step could never lift `current`
    /// above the ceiling, so no value would ever be issuable.
    pub fn new(store: Arc<S>, step: u64) -> Self {
        assert!(step > 0, "step must be at least 1");

        let (tx, rx) = sync_channel(WRITEBACK_QUEUE_CAP);
        let worker = Self::spawn_worker(Arc::clone(&store), rx);

        Self {
            store,
            step,
            counters: Mutex::new(HashMap::new()),
            tx: Some(tx),
            worker: Some(worker),
        }
    }

    /// Issues the next value for `key`.
    ///
    /// On first sight of a key, the persisted ceiling is read from the
    /// store (absent keys start at 0) and a fresh batch of `step` values
    /// is reserved. A read failure is fatal to this call: without a
    /// baseline there is no safe value to issue. Once a key is resident,
    /// this never blocks on I/O.
    ///
    /// Concurrent callers within one process never observe duplicate or
    /// decreasing values for the same key.
    pub fn next(&self, key: &str) -> Result<u64> {
        let mut counters = self.counters.lock();

        if !counters.contains_key(key) {
            let baseline = self
                .store
                .read(key)
                .map_err(|source| Error::CounterLoad {
                    key: key.to_owned(),
                    source,
                })?
                .unwrap_or(0);
            let state = CounterState {
                current: baseline,
                ceiling: baseline + self.step,
                dirty: true,
            };
            self.enqueue(key, state.ceiling);
            counters.insert(key.to_owned(), state);
        }

        let state = counters
            .get_mut(key)
            .expect("counter state inserted above");

        if state.current == state.ceiling {
            state.ceiling += self.step;
            state.dirty = true;
            let ceiling = state.ceiling;
            self.enqueue(key, ceiling);
        }

        state.current += 1;
        Ok(state.current)
    }

    /// Administrative override: restarts `key` at `value`.
    ///
    /// The next call to [`next`] for this key returns `value + 1`. A new
    /// ceiling of `value + step` is reserved and queued for persistence.
    ///
    /// [`next`]: CounterAllocator::next
    pub fn set(&self, key: &str, value: u64) -> Result<()> {
        let state = CounterState {
            current: value,
            ceiling: value + self.step,
            dirty: true,
        };
        self.counters.lock().insert(key.to_owned(), state);
        self.enqueue(key, state.ceiling);
        Ok(())
    }

    /// Synchronously persists the ceiling of every dirty key.
    ///
    /// The first write failure aborts with [`Error::CounterPersist`];
    /// keys already written stay clean, the rest stay dirty. Intended for
    /// shutdown, where the write-back queue may still have been dropping
    /// bumps.
    pub fn sync(&self) -> Result<()> {
        let dirty: Vec<(String, u64)> = self
            .counters
            .lock()
            .iter()
            .filter(|(_, state)| state.dirty)
            .map(|(key, state)| (key.clone(), state.ceiling))
            .collect();

        for (key, ceiling) in dirty {
            self.store
                .write(&key, ceiling)
                .map_err(|source| Error::CounterPersist {
                    key: key.clone(),
                    ceiling,
                    source,
                })?;

            let mut counters = self.counters.lock();
            if let Some(state) = counters.get_mut(&key) {
                // A bump that raced this write leaves the key dirty.
                if state.ceiling == ceiling {
                    state.dirty = false;
                }
            }
        }

        Ok(())
    }

    /// Stops the write-back worker, drains the queue, then performs one
    /// final [`sync`]. Idempotent.
    ///
    /// [`sync`]: CounterAllocator::sync
    pub fn close(&mut self) -> Result<()> {
        // Dropping the producer disconnects the channel; the worker
        // drains whatever is queued and exits.
        drop(self.tx.take());
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("write-back worker panicked");
            }
        }
        self.sync()
    }

    /// Non-blocking enqueue of a ceiling persist. Dropped when the queue
    /// is full: a later bump or the terminal sync supersedes it.
    fn enqueue(&self, key: &str, ceiling: u64) {
        let Some(tx) = self.tx.as_ref() else {
            return;
        };
        match tx.try_send(Writeback {
            key: key.to_owned(),
            ceiling,
        }) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                debug!(key, ceiling, "write-back queue full; dropping superseded ceiling");
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    fn spawn_worker(store: Arc<S>, rx: Receiver<Writeback>) -> JoinHandle<()> {
        thread::spawn(move || {
            // Runs until every sender is dropped, then drains and exits.
            while let Ok(req) = rx.recv() {
                if let Err(err) = store.write(&req.key, req.ceiling) {
                    warn!(
                        key = %req.key,
                        ceiling = req.ceiling,
                        error = %err,
                        "async ceiling persist failed",
                    );
                }
            }
        })
    }
}

impl<S: CounterStore> Drop for CounterAllocator<S> {
    fn drop(&mut self) {
        drop(self.tx.take());
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
