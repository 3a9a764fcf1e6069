//! Persisted session storage.
//!
//! Holds the two keys that let a restarted process rejoin its room: `roomId`
//! and `nickname`. Written on entering a room, cleared on leaving, read once at
//! startup. Access is synchronous; the runtime owns the store exclusively.

mod error;
mod memory;
mod redb;

pub use error::StoreError;
use huddle_core::PersistedSession;
pub use memory::MemorySessionStore;

pub use self::redb::RedbSessionStore;

/// Key holding the last joined room id.
pub const ROOM_ID_KEY: &str = "roomId";

/// Key holding the last used nickname.
pub const NICKNAME_KEY: &str = "nickname";

/// Storage for the persisted session.
///
/// Must be Clone + Send + Sync; clones share the same underlying storage.
pub trait SessionStore: Clone + Send + Sync + 'static {
    /// Read the stored session. Missing keys come back as `None`.
    fn load(&self) -> Result<PersistedSession, StoreError>;

    /// Overwrite the stored session. `None` fields remove their key.
    fn save(&self, session: &PersistedSession) -> Result<(), StoreError>;

    /// Remove both keys.
    fn clear(&self) -> Result<(), StoreError>;
}
