//! Client error types.

use huddle_core::{PreconditionError, SessionError};
use thiserror::Error;

/// Errors returned to callers of the session client.
///
/// Transport failures never appear here: they surface only as a non-ready
/// connection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// The operation was refused before anything was sent.
    #[error(transparent)]
    Precondition(#[from] PreconditionError),

    /// A create/join request failed after it was sent.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The client or its runtime has shut down.
    #[error("session client has shut down")]
    ShutDown,
}
