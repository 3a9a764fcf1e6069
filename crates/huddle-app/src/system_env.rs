//! Production environment.
//!
//! Uses tokio's clock rather than `std::time` so that runtime tests can pause
//! and advance time deterministically.

use huddle_core::Environment;

/// Production environment backed by the tokio clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    type Instant = tokio::time::Instant;

    fn now(&self) -> Self::Instant {
        tokio::time::Instant::now()
    }
}
