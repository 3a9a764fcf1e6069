//! Manual clock for deterministic tests.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use huddle_core::Environment;

/// Environment whose time only moves when told to.
///
/// Clones share the same clock.
#[derive(Debug, Clone)]
pub struct SimEnv {
    base: Instant,
    offset_micros: Arc<AtomicU64>,
}

impl SimEnv {
    /// Create a clock at offset zero.
    pub fn new() -> Self {
        Self { base: Instant::now(), offset_micros: Arc::new(AtomicU64::new(0)) }
    }

    /// Move time forward.
    pub fn advance(&self, by: Duration) {
        self.offset_micros.fetch_add(by.as_micros() as u64, Ordering::SeqCst);
    }

    /// Time elapsed since creation.
    pub fn elapsed(&self) -> Duration {
        Duration::from_micros(self.offset_micros.load(Ordering::SeqCst))
    }
}

impl Default for SimEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment for SimEnv {
    type Instant = Instant;

    fn now(&self) -> Instant {
        self.base + self.elapsed()
    }
}
