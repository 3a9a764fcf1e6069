//! Environment abstraction for deterministic testing.
//!
//! Decouples the client from the system clock. Production uses the runtime's
//! monotonic clock; tests drive a manual clock so deadlines, backoff and the
//! rejoin delay can be exercised without sleeping.

use std::{
    fmt::Debug,
    ops::{Add, Sub},
    time::Duration,
};

/// Abstract environment providing time.
///
/// # Invariants
///
/// - `now()` never goes backwards within a single execution context.
pub trait Environment: Clone + Send + Sync + 'static {
    /// The specific instant type used by this environment.
    ///
    /// Production uses `tokio::time::Instant` so paused-clock tests work;
    /// the manual test clock uses `std::time::Instant` plus an offset.
    type Instant: Copy
        + Ord
        + Debug
        + Send
        + Sync
        + Sub<Output = Duration>
        + Add<Duration, Output = Self::Instant>;

    /// Current time (monotonic).
    fn now(&self) -> Self::Instant;
}
