//! Session store errors.

use thiserror::Error;

/// Persisted store failure.
///
/// Never fatal: the runtime logs it and carries on without persistence.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Underlying database or filesystem failure.
    #[error("store I/O failed: {0}")]
    Io(String),
}
