use thiserror::Error;

/// A convenient result alias for fallible `curtail` operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Opaque error produced by a durable store implementation.
///
/// The library never inspects these; it wraps them with enough context
/// (key, value) to make the failing operation identifiable.
pub type StoreError = Box<dyn core::error::Error + Send + Sync + 'static>;

/// Unified error type for the allocation and caching subsystem.
///
/// Only the synchronous entry points surface errors: the initial baseline
/// load in [`CounterAllocator::next`], and [`CounterAllocator::sync`] /
/// [`CounterAllocator::close`]. Best-effort asynchronous paths (the
/// write-back queue, the cache's background flush) log and swallow their
/// failures by design.
///
/// [`CounterAllocator::next`]: crate::CounterAllocator::next
/// [`CounterAllocator::sync`]: crate::CounterAllocator::sync
/// [`CounterAllocator::close`]: crate::CounterAllocator::close
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Reading the persisted baseline for a previously unseen counter key
    /// failed. Without a baseline there is no safe value to issue.
    #[error("failed to load baseline for counter {key:?}")]
    CounterLoad {
        key: String,
        #[source]
        source: StoreError,
    },

    /// A synchronous ceiling write failed during `sync` or `close`.
    #[error("failed to persist ceiling {ceiling} for counter {key:?}")]
    CounterPersist {
        key: String,
        ceiling: u64,
        #[source]
        source: StoreError,
    },

    /// A short code could not be decoded.
    #[error("base62 decode failed")]
    Base62(#[from] Base62Error),
}

/// Errors produced when decoding base62 input.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Base62Error {
    /// The input was not a valid length (e.g. empty).
    #[error("invalid length: {len}")]
    DecodeInvalidLen { len: usize },

    /// The input contained a byte outside the base62 alphabet.
    #[error("invalid base62 byte {byte:#04x} at index {index}")]
    DecodeInvalidAscii { byte: u8, index: usize },

    /// The decoded value does not fit in a `u64`.
    #[error("decoded value overflows u64")]
    DecodeOverflow,
}
