use std::time::{SystemTime, UNIX_EPOCH};

/// A trait for time sources that return a wall-clock or mocked timestamp.
///
/// The timestamp type `T` is generic (typically `u64`), and the unit is
/// expected to be **milliseconds** since the Unix epoch. The cache stamps
/// `last_used_at` through this trait so tests can substitute a fixed or
/// stepping clock.
///
/// # Example
///
/// ```
/// use curtail::TimeSource;
///
/// struct FixedTime;
/// impl TimeSource<u64> for FixedTime {
///     fn current_millis(&self) -> u64 {
///         1234
///     }
/// }
///
/// let time = FixedTime;
/// assert_eq!(time.current_millis(), 1234);
/// ```
pub trait TimeSource<T> {
    /// Returns the current time in milliseconds since the Unix epoch.
    fn current_millis(&self) -> T;
}

/// A [`TimeSource`] backed by the system wall clock.
///
/// Usage timestamps only need to be coarse and comparable across process
/// restarts, so wall-clock time is the right origin here; entries carrying
/// them round-trip through durable storage.
#[derive(Clone, Copy, Debug, Default)]
pub struct WallClock;

impl TimeSource<u64> for WallClock {
    /// Returns the number of milliseconds since the Unix epoch.
    ///
    /// # Panics
    ///
    /// Panics if the system clock is set before the Unix epoch.
    fn current_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("System clock before UNIX_EPOCH")
            .as_millis() as u64
    }
}
