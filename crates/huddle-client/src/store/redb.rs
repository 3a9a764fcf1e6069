//! Redb-backed durable session store.
//!
//! Survives process restarts. One table of string keys to string values,
//! mirroring the key-value shape of browser session storage.

use std::{path::Path, sync::Arc};

use huddle_core::{PersistedSession, RoomId};
use redb::{Database, ReadableTable, TableDefinition};

use super::{NICKNAME_KEY, ROOM_ID_KEY, SessionStore, StoreError};

/// Table: session
/// Key: `roomId` or `nickname`
/// Value: UTF-8 string
const SESSION: TableDefinition<&str, &str> = TableDefinition::new("session");

/// Durable session store backed by Redb.
///
/// Thread-safe through Redb's internal locking. Clone is cheap (Arc).
#[derive(Clone)]
pub struct RedbSessionStore {
    db: Arc<Database>,
}

impl RedbSessionStore {
    /// Open or create a database at the given path.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Io` if the database cannot be opened or created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = Database::create(path.as_ref()).map_err(|e| StoreError::Io(e.to_string()))?;

        let txn = db.begin_write().map_err(|e| StoreError::Io(e.to_string()))?;
        {
            let _ = txn.open_table(SESSION).map_err(|e| StoreError::Io(e.to_string()))?;
        }
        txn.commit().map_err(|e| StoreError::Io(e.to_string()))?;

        Ok(Self { db: Arc::new(db) })
    }
}

fn read_key<T: ReadableTable<&'static str, &'static str>>(
    table: &T,
    key: &str,
) -> Result<Option<String>, StoreError> {
    let value = table.get(key).map_err(|e| StoreError::Io(e.to_string()))?;
    Ok(value.map(|v| v.value().to_owned()))
}

impl SessionStore for RedbSessionStore {
    fn load(&self) -> Result<PersistedSession, StoreError> {
        let txn = self.db.begin_read().map_err(|e| StoreError::Io(e.to_string()))?;
        let table = txn.open_table(SESSION).map_err(|e| StoreError::Io(e.to_string()))?;

        let room_id = read_key(&table, ROOM_ID_KEY)?;
        let nickname = read_key(&table, NICKNAME_KEY)?;

        Ok(PersistedSession { room_id: room_id.map(RoomId::new), nickname })
    }

    fn save(&self, session: &PersistedSession) -> Result<(), StoreError> {
        let txn = self.db.begin_write().map_err(|e| StoreError::Io(e.to_string()))?;
        {
            let mut table = txn.open_table(SESSION).map_err(|e| StoreError::Io(e.to_string()))?;

            match &session.room_id {
                Some(room_id) => {
                    table
                        .insert(ROOM_ID_KEY, room_id.as_str())
                        .map_err(|e| StoreError::Io(e.to_string()))?;
                },
                None => {
                    table.remove(ROOM_ID_KEY).map_err(|e| StoreError::Io(e.to_string()))?;
                },
            }

            match &session.nickname {
                Some(nickname) => {
                    table
                        .insert(NICKNAME_KEY, nickname.as_str())
                        .map_err(|e| StoreError::Io(e.to_string()))?;
                },
                None => {
                    table.remove(NICKNAME_KEY).map_err(|e| StoreError::Io(e.to_string()))?;
                },
            }
        }
        txn.commit().map_err(|e| StoreError::Io(e.to_string()))?;

        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        let txn = self.db.begin_write().map_err(|e| StoreError::Io(e.to_string()))?;
        {
            let mut table = txn.open_table(SESSION).map_err(|e| StoreError::Io(e.to_string()))?;
            table.remove(ROOM_ID_KEY).map_err(|e| StoreError::Io(e.to_string()))?;
            table.remove(NICKNAME_KEY).map_err(|e| StoreError::Io(e.to_string()))?;
        }
        txn.commit().map_err(|e| StoreError::Io(e.to_string()))?;

        Ok(())
    }
}
