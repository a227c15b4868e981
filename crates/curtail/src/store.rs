use crate::StoreError;

/// The durable counter contract: read and write an integer ceiling by
/// string key.
///
/// This is the only thing the allocator knows about persistence. The
/// original system backed it with a single-row-per-key SQL table; tests
/// back it with an in-memory map. Implementations are responsible for
/// bounding their own I/O (deadlines, retries) — the allocator's hot path
/// never calls into this trait, and its background worker treats every
/// write as best-effort.
pub trait CounterStore: Send + Sync {
    /// Returns the last persisted ceiling for `key`, or `Ok(None)` if the
    /// key has never been written.
    fn read(&self, key: &str) -> core::result::Result<Option<u64>, StoreError>;

    /// Persists `value` as the ceiling for `key`, replacing any previous
    /// value.
    fn write(&self, key: &str, value: u64) -> core::result::Result<(), StoreError>;
}
