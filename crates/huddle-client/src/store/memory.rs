use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use huddle_core::{PersistedSession, RoomId};

use super::{NICKNAME_KEY, ROOM_ID_KEY, SessionStore, StoreError};

/// In-memory session store.
///
/// Lives as long as the process, like a browser tab's session storage.
/// Clones share state.
#[derive(Clone, Default)]
pub struct MemorySessionStore {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl MemorySessionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with a session.
    pub fn with_session(session: &PersistedSession) -> Self {
        let store = Self::new();
        store.write(session);
        store
    }

    /// Raw value for a key.
    pub fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).get(key).cloned()
    }

    fn write(&self, session: &PersistedSession) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);

        match &session.room_id {
            Some(room_id) => entries.insert(ROOM_ID_KEY.to_owned(), room_id.as_str().to_owned()),
            None => entries.remove(ROOM_ID_KEY),
        };
        match &session.nickname {
            Some(nickname) => entries.insert(NICKNAME_KEY.to_owned(), nickname.clone()),
            None => entries.remove(NICKNAME_KEY),
        };
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self) -> Result<PersistedSession, StoreError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);

        Ok(PersistedSession {
            room_id: entries.get(ROOM_ID_KEY).map(|id| RoomId::new(id.as_str())),
            nickname: entries.get(NICKNAME_KEY).cloned(),
        })
    }

    fn save(&self, session: &PersistedSession) -> Result<(), StoreError> {
        self.write(session);
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(ROOM_ID_KEY);
        entries.remove(NICKNAME_KEY);
        Ok(())
    }
}
