// ============================================================================
// StatusStore — Embedded Database (redb)
// ============================================================================
// Persistent verification records, one per user.
// Default path: ~/.joingate/status.redb (override via JOINGATE_DB_PATH env var)
// ============================================================================

pub mod types;

pub use types::{DbStats, StatusField, StatusUpdate, StoreError, VerificationRecord};

use redb::{Database, ReadableTable, TableDefinition};
use std::fmt::Display;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::types::UserId;

// Table definitions
const VERIFICATION: TableDefinition<&str, &[u8]> = TableDefinition::new("verification");

fn record_key(user_id: UserId) -> String {
    format!("users:{}", user_id)
}

fn storage_err<E: Display>(context: &'static str) -> impl FnOnce(E) -> StoreError {
    move |e| StoreError::Storage(format!("{}: {}", context, e))
}

fn encode(record: &VerificationRecord) -> Result<Vec<u8>, StoreError> {
    bincode::serialize(record)
        .map_err(|e| StoreError::Codec(format!("Failed to serialize record: {}", e)))
}

fn decode(bytes: &[u8]) -> Result<VerificationRecord, StoreError> {
    bincode::deserialize(bytes)
        .map_err(|e| StoreError::Codec(format!("Failed to deserialize record: {}", e)))
}

/// Verification status store.
///
/// redb admits a single write transaction at a time, so every mutation here is
/// an atomic read-modify-write and concurrent first access for one user can
/// never create two records.
pub struct StatusStore {
    db: Database,
    path: PathBuf,
}

impl StatusStore {
    /// Open (or create) the database at the given path.
    /// If `path` is None, uses JOINGATE_DB_PATH env var or ~/.joingate/status.redb
    pub fn open(path: Option<&str>) -> Result<Self, StoreError> {
        let db_path = if let Some(p) = path {
            PathBuf::from(p)
        } else if let Ok(env_path) = std::env::var("JOINGATE_DB_PATH") {
            PathBuf::from(env_path)
        } else {
            let home = dirs::home_dir()
                .ok_or_else(|| StoreError::Storage("Cannot determine home directory".into()))?;
            let dir = home.join(".joingate");
            std::fs::create_dir_all(&dir)
                .map_err(storage_err("Failed to create .joingate directory"))?;
            dir.join("status.redb")
        };

        info!("Opening status store at: {}", db_path.display());

        let db = Database::create(&db_path).map_err(storage_err("Failed to open database"))?;

        // Ensure the table exists
        let write_txn = db.begin_write().map_err(storage_err("Failed to begin write"))?;
        {
            let _ = write_txn
                .open_table(VERIFICATION)
                .map_err(storage_err("Failed to create verification table"))?;
        }
        write_txn.commit().map_err(storage_err("Failed to commit init"))?;

        info!("Status store ready");

        Ok(Self { db, path: db_path })
    }

    /// Get the database file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Look up a record without creating it
    pub fn get(&self, user_id: UserId) -> Result<Option<VerificationRecord>, StoreError> {
        let key = record_key(user_id);

        let read_txn = self.db.begin_read().map_err(storage_err("Failed to begin read"))?;
        let table = read_txn
            .open_table(VERIFICATION)
            .map_err(storage_err("Failed to open verification table"))?;

        let found = table.get(key.as_str()).map_err(storage_err("Failed to get record"))?;
        let record = match found {
            Some(value) => Some(decode(value.value())?),
            None => None,
        };
        Ok(record)
    }

    /// Return the user's record, creating the default one if absent.
    /// An existing record is served from a read transaction, with no write.
    pub fn get_or_init(&self, user_id: UserId) -> Result<VerificationRecord, StoreError> {
        if let Some(record) = self.get(user_id)? {
            return Ok(record);
        }

        let key = record_key(user_id);
        let write_txn = self.db.begin_write().map_err(storage_err("Failed to begin write"))?;
        let record;
        {
            let mut table = write_txn
                .open_table(VERIFICATION)
                .map_err(storage_err("Failed to open verification table"))?;

            // Another caller may have created it between our read and this write
            let existing = match table.get(key.as_str()).map_err(storage_err("Failed to get record"))? {
                Some(value) => Some(decode(value.value())?),
                None => None,
            };

            record = match existing {
                Some(r) => r,
                None => {
                    let fresh = VerificationRecord::new(user_id, chrono::Utc::now().timestamp());
                    table
                        .insert(key.as_str(), encode(&fresh)?.as_slice())
                        .map_err(storage_err("Failed to insert record"))?;
                    debug!("Initialized verification record for user {}", user_id);
                    fresh
                }
            };
        }
        write_txn.commit().map_err(storage_err("Failed to commit"))?;

        Ok(record)
    }

    /// Apply a partial update and refresh `updated_at`.
    /// Fails with [`StoreError::NotFound`] if the user has no record yet.
    pub fn update(
        &self,
        user_id: UserId,
        update: &StatusUpdate,
    ) -> Result<VerificationRecord, StoreError> {
        let key = record_key(user_id);

        let write_txn = self.db.begin_write().map_err(storage_err("Failed to begin write"))?;
        let record;
        {
            let mut table = write_txn
                .open_table(VERIFICATION)
                .map_err(storage_err("Failed to open verification table"))?;

            let current = match table.get(key.as_str()).map_err(storage_err("Failed to get record"))? {
                Some(value) => decode(value.value())?,
                None => return Err(StoreError::NotFound(user_id)),
            };

            let mut next = current;
            next.apply(update, chrono::Utc::now().timestamp());
            table
                .insert(key.as_str(), encode(&next)?.as_slice())
                .map_err(storage_err("Failed to write record"))?;
            record = next;
        }
        write_txn.commit().map_err(storage_err("Failed to commit"))?;

        debug!("Updated verification record for user {}: {:?}", user_id, update);
        Ok(record)
    }

    /// List records, optionally filtered by verified flag
    pub fn list(&self, verified: Option<bool>) -> Result<Vec<VerificationRecord>, StoreError> {
        let read_txn = self.db.begin_read().map_err(storage_err("Failed to begin read"))?;
        let table = read_txn
            .open_table(VERIFICATION)
            .map_err(storage_err("Failed to open verification table"))?;

        let mut results = Vec::new();
        let iter = table
            .range::<&str>(..)
            .map_err(storage_err("Failed to iterate records"))?;
        for entry in iter {
            let (_key, value) = entry.map_err(storage_err("Failed to read entry"))?;
            let record = decode(value.value())?;

            if verified.map_or(true, |v| record.verified == v) {
                results.push(record);
            }
        }
        results.sort_by_key(|r| r.user_id);
        Ok(results)
    }

    pub fn stats(&self) -> Result<DbStats, StoreError> {
        let all = self.list(None)?;
        let verified_users = all.iter().filter(|r| r.verified).count();
        let prompted_users = all
            .iter()
            .filter(|r| !r.verified && r.prompt_message_ref.is_some())
            .count();

        Ok(DbStats {
            total_users: all.len(),
            verified_users,
            pending_users: all.len() - verified_users,
            prompted_users,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MessageRef;
    use std::sync::Arc;

    fn temp_store() -> (tempfile::TempDir, StatusStore) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.redb");
        let store = StatusStore::open(Some(path.to_str().unwrap())).unwrap();
        (dir, store)
    }

    #[test]
    fn test_get_or_init_creates_default() {
        let (_dir, store) = temp_store();
        let before = chrono::Utc::now().timestamp();

        let record = store.get_or_init(1001).unwrap();
        assert_eq!(record.user_id, 1001);
        assert!(!record.has_joined_channel);
        assert!(!record.has_joined_group);
        assert!(!record.verified);
        assert_eq!(record.prompt_message_ref, None);
        assert!(record.created_at >= before);
        assert_eq!(record.created_at, record.updated_at);

        assert_eq!(store.get(1001).unwrap(), Some(record));
    }

    #[test]
    fn test_get_or_init_returns_existing() {
        let (_dir, store) = temp_store();
        store.get_or_init(5).unwrap();
        store.update(5, &StatusUpdate::memberships(true, false)).unwrap();

        let record = store.get_or_init(5).unwrap();
        assert!(record.has_joined_channel);
        assert_eq!(store.list(None).unwrap().len(), 1);
    }

    #[test]
    fn test_get_does_not_create() {
        let (_dir, store) = temp_store();
        assert_eq!(store.get(42).unwrap(), None);
        assert!(store.list(None).unwrap().is_empty());
    }

    #[test]
    fn test_update_missing_record() {
        let (_dir, store) = temp_store();
        let err = store.update(9, &StatusUpdate::verified()).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(9)));
        assert_eq!(store.get(9).unwrap(), None);
    }

    #[test]
    fn test_update_is_partial() {
        let (_dir, store) = temp_store();
        store.get_or_init(3).unwrap();
        let prompt = MessageRef {
            chat_id: 3,
            message_id: 77,
        };

        store.update(3, &StatusUpdate::prompt(prompt)).unwrap();
        let record = store.update(3, &StatusUpdate::memberships(false, true)).unwrap();

        assert_eq!(record.prompt_message_ref, Some(prompt));
        assert!(!record.has_joined_channel);
        assert!(record.has_joined_group);
        assert!(!record.verified);
        assert!(record.updated_at >= record.created_at);
    }

    #[test]
    fn test_invalid_field_leaves_record_unmodified() {
        let (_dir, store) = temp_store();
        let before = store.get_or_init(11).unwrap();

        let mut update = StatusUpdate::default();
        let err = update.set("invalid_field", "1").unwrap_err();
        assert!(matches!(err, StoreError::InvalidField(_)));

        assert_eq!(store.get(11).unwrap(), Some(before));
    }

    #[test]
    fn test_concurrent_first_access_single_record() {
        let (_dir, store) = temp_store();
        let store = Arc::new(store);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || store.get_or_init(500).unwrap())
            })
            .collect();
        let records: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(store.list(None).unwrap().len(), 1);
        let first = &records[0];
        assert!(records.iter().all(|r| r.created_at == first.created_at));
    }

    #[test]
    fn test_list_and_stats() {
        let (_dir, store) = temp_store();
        for id in [1, 2, 3] {
            store.get_or_init(id).unwrap();
        }
        store.update(2, &StatusUpdate::memberships(true, true)).unwrap();
        store.update(2, &StatusUpdate::verified()).unwrap();
        store
            .update(
                3,
                &StatusUpdate::prompt(MessageRef {
                    chat_id: 3,
                    message_id: 1,
                }),
            )
            .unwrap();

        let verified: Vec<_> = store.list(Some(true)).unwrap();
        assert_eq!(verified.len(), 1);
        assert_eq!(verified[0].user_id, 2);

        let pending_ids: Vec<_> = store
            .list(Some(false))
            .unwrap()
            .iter()
            .map(|r| r.user_id)
            .collect();
        assert_eq!(pending_ids, vec![1, 3]);

        let stats = store.stats().unwrap();
        assert_eq!(stats.total_users, 3);
        assert_eq!(stats.verified_users, 1);
        assert_eq!(stats.pending_users, 2);
        assert_eq!(stats.prompted_users, 1);
    }

    #[test]
    fn test_reopen_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.redb");
        let path = path.to_str().unwrap();

        {
            let store = StatusStore::open(Some(path)).unwrap();
            store.get_or_init(8).unwrap();
            store.update(8, &StatusUpdate::memberships(true, true)).unwrap();
        }

        let store = StatusStore::open(Some(path)).unwrap();
        let record = store.get(8).unwrap().unwrap();
        assert!(record.has_joined_channel && record.has_joined_group);
    }
}
