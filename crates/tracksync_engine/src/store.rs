//! The local store boundary.
//!
//! The engine never owns record storage; the host app does (a mobile
//! app keeps these in its on-device database and serves UI reads from
//! it directly, untouched by sync activity). [`LocalStore`] is the
//! contract the engine needs, and [`MemoryStore`] is a reference
//! implementation used by tests and by hosts that keep everything in
//! memory.

use crate::error::{SyncError, SyncResult};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracksync_protocol::{EntityType, SyncCursor, SyncRecord, SyncScope};

/// Durable per-record storage with pending-change tracking.
///
/// # Contract
///
/// - A record with `pending_sync = true` is never purged until the
///   server acknowledges it or a conflict resolution discards it.
/// - [`mark_synced`](LocalStore::mark_synced) must never lower an
///   existing `server_version` (out-of-order responses).
/// - [`set_cursor`](LocalStore::set_cursor) must never regress, and
///   cursors must survive process restarts.
pub trait LocalStore: Send + Sync {
    /// Returns all records pending sync for the entity type, oldest
    /// mutation first.
    fn get_pending(&self, entity: EntityType) -> SyncResult<Vec<SyncRecord>>;

    /// Looks up a single record.
    fn get(&self, entity: EntityType, id: &str) -> SyncResult<Option<SyncRecord>>;

    /// Inserts or replaces records wholesale (used for pulled remote
    /// records and resolved conflicts).
    fn upsert_all(&self, records: Vec<SyncRecord>) -> SyncResult<()>;

    /// Acknowledges records: clears their pending flag and records
    /// the server version (monotonically).
    fn mark_synced(&self, entity: EntityType, ids: &[String], server_version: u64)
        -> SyncResult<()>;

    /// Soft-deletes a record (tombstone, re-marked pending).
    fn mark_deleted(&self, entity: EntityType, id: &str) -> SyncResult<()>;

    /// The persisted pull cursor for a scope (0 if never synced).
    fn cursor(&self, scope: &SyncScope) -> SyncResult<u64>;

    /// Advances the persisted pull cursor. Stale versions are
    /// ignored, never written backwards.
    fn set_cursor(&self, scope: &SyncScope, version: u64) -> SyncResult<()>;
}

/// An in-memory store, with optional file-backed cursor persistence.
pub struct MemoryStore {
    records: RwLock<HashMap<EntityType, BTreeMap<String, SyncRecord>>>,
    cursors: RwLock<HashMap<SyncScope, u64>>,
    cursor_path: Option<PathBuf>,
}

impl MemoryStore {
    /// Creates an empty store. Cursors live in memory only.
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            cursors: RwLock::new(HashMap::new()),
            cursor_path: None,
        }
    }

    /// Creates a store that persists cursors to a JSON file, loading
    /// any cursors already recorded there. This is what lets a sync
    /// pass resume from `last_sync_version` after a restart.
    pub fn with_cursor_path(path: impl AsRef<Path>) -> SyncResult<Self> {
        let path = path.as_ref().to_path_buf();
        let cursors = if path.exists() {
            let bytes = std::fs::read(&path)
                .map_err(|e| SyncError::QueryFailed(format!("cursor file: {e}")))?;
            let persisted: Vec<SyncCursor> = serde_json::from_slice(&bytes)?;
            persisted
                .into_iter()
                .map(|c| (c.scope, c.last_sync_version))
                .collect()
        } else {
            HashMap::new()
        };

        Ok(Self {
            records: RwLock::new(HashMap::new()),
            cursors: RwLock::new(cursors),
            cursor_path: Some(path),
        })
    }

    /// Inserts a single record as-is.
    pub fn insert(&self, record: SyncRecord) {
        self.records
            .write()
            .entry(record.entity_type())
            .or_default()
            .insert(record.id.clone(), record);
    }

    /// A snapshot of all records of an entity type, in id order.
    /// This is the UI's read path; it never blocks on sync activity.
    pub fn records(&self, entity: EntityType) -> Vec<SyncRecord> {
        self.records
            .read()
            .get(&entity)
            .map(|m| m.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of records still pending for an entity type.
    pub fn pending_count(&self, entity: EntityType) -> usize {
        self.records
            .read()
            .get(&entity)
            .map(|m| m.values().filter(|r| r.pending_sync).count())
            .unwrap_or(0)
    }

    fn save_cursors(&self, cursors: &HashMap<SyncScope, u64>) -> SyncResult<()> {
        let Some(path) = &self.cursor_path else {
            return Ok(());
        };

        let mut persisted: Vec<SyncCursor> = cursors
            .iter()
            .map(|(scope, &version)| SyncCursor {
                scope: scope.clone(),
                last_sync_version: version,
            })
            .collect();
        persisted.sort_by(|a, b| {
            (&a.scope.user_id, &a.scope.device_id)
                .cmp(&(&b.scope.user_id, &b.scope.device_id))
                .then(a.scope.entity_type.path_segment().cmp(b.scope.entity_type.path_segment()))
        });

        let bytes = serde_json::to_vec_pretty(&persisted)?;
        std::fs::write(path, bytes)
            .map_err(|e| SyncError::WriteFailed(format!("cursor file: {e}")))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalStore for MemoryStore {
    fn get_pending(&self, entity: EntityType) -> SyncResult<Vec<SyncRecord>> {
        let records = self.records.read();
        let mut pending: Vec<SyncRecord> = records
            .get(&entity)
            .map(|m| m.values().filter(|r| r.pending_sync).cloned().collect())
            .unwrap_or_default();
        pending.sort_by_key(|r| r.last_modified);
        Ok(pending)
    }

    fn get(&self, entity: EntityType, id: &str) -> SyncResult<Option<SyncRecord>> {
        Ok(self
            .records
            .read()
            .get(&entity)
            .and_then(|m| m.get(id))
            .cloned())
    }

    fn upsert_all(&self, records: Vec<SyncRecord>) -> SyncResult<()> {
        let mut map = self.records.write();
        for record in records {
            map.entry(record.entity_type())
                .or_default()
                .insert(record.id.clone(), record);
        }
        Ok(())
    }

    fn mark_synced(
        &self,
        entity: EntityType,
        ids: &[String],
        server_version: u64,
    ) -> SyncResult<()> {
        let mut map = self.records.write();
        if let Some(records) = map.get_mut(&entity) {
            for id in ids {
                if let Some(record) = records.get_mut(id) {
                    record.apply_server_ack(server_version);
                }
            }
        }
        Ok(())
    }

    fn mark_deleted(&self, entity: EntityType, id: &str) -> SyncResult<()> {
        let mut map = self.records.write();
        let record = map
            .get_mut(&entity)
            .and_then(|m| m.get_mut(id))
            .ok_or_else(|| SyncError::WriteFailed(format!("no such record: {id}")))?;
        record.tombstone();
        Ok(())
    }

    fn cursor(&self, scope: &SyncScope) -> SyncResult<u64> {
        Ok(self.cursors.read().get(scope).copied().unwrap_or(0))
    }

    fn set_cursor(&self, scope: &SyncScope, version: u64) -> SyncResult<()> {
        let mut cursors = self.cursors.write();
        let current = cursors.entry(scope.clone()).or_insert(0);
        if version <= *current {
            return Ok(());
        }
        *current = version;
        // Persist under the lock so concurrent advances cannot write
        // the file out of order.
        self.save_cursors(&cursors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracksync_protocol::RecordPayload;

    fn location(ts: i64) -> SyncRecord {
        let mut record = SyncRecord::new_local(
            RecordPayload::Location {
                timestamp: ts,
                latitude: 0.0,
                longitude: 0.0,
                accuracy: None,
                altitude: None,
                speed: None,
                bearing: None,
            },
            "device-1",
        );
        record.last_modified = ts;
        record
    }

    fn scope() -> SyncScope {
        SyncScope::new("user-1", "device-1", EntityType::Location)
    }

    #[test]
    fn pending_records_sorted_by_mutation_time() {
        let store = MemoryStore::new();
        store.insert(location(300));
        store.insert(location(100));
        store.insert(location(200));

        let pending = store.get_pending(EntityType::Location).unwrap();
        assert_eq!(pending.len(), 3);
        assert!(pending.windows(2).all(|w| w[0].last_modified <= w[1].last_modified));
    }

    #[test]
    fn mark_synced_clears_pending_and_sets_version() {
        let store = MemoryStore::new();
        let record = location(1);
        let id = record.id.clone();
        store.insert(record);

        store
            .mark_synced(EntityType::Location, &[id.clone()], 42)
            .unwrap();

        let stored = store.get(EntityType::Location, &id).unwrap().unwrap();
        assert!(!stored.pending_sync);
        assert_eq!(stored.server_version, Some(42));

        // Out-of-order ack with a smaller version leaves it alone
        store.mark_synced(EntityType::Location, &[id.clone()], 17).unwrap();
        let stored = store.get(EntityType::Location, &id).unwrap().unwrap();
        assert_eq!(stored.server_version, Some(42));
    }

    #[test]
    fn mark_deleted_leaves_a_pending_tombstone() {
        let store = MemoryStore::new();
        let mut record = location(1);
        record.apply_server_ack(5);
        let id = record.id.clone();
        store.insert(record);

        store.mark_deleted(EntityType::Location, &id).unwrap();

        let stored = store.get(EntityType::Location, &id).unwrap().unwrap();
        assert!(stored.deleted);
        assert!(stored.pending_sync);
    }

    #[test]
    fn mark_deleted_unknown_record_fails() {
        let store = MemoryStore::new();
        let result = store.mark_deleted(EntityType::Location, "missing");
        assert!(matches!(result, Err(SyncError::WriteFailed(_))));
    }

    #[test]
    fn cursor_never_regresses() {
        let store = MemoryStore::new();
        let scope = scope();

        assert_eq!(store.cursor(&scope).unwrap(), 0);
        store.set_cursor(&scope, 10).unwrap();
        store.set_cursor(&scope, 7).unwrap();
        assert_eq!(store.cursor(&scope).unwrap(), 10);
    }

    #[test]
    fn cursors_survive_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cursors.json");

        {
            let store = MemoryStore::with_cursor_path(&path).unwrap();
            store.set_cursor(&scope(), 99).unwrap();
        }

        // "Restart": a fresh store reads the same file
        let store = MemoryStore::with_cursor_path(&path).unwrap();
        assert_eq!(store.cursor(&scope()).unwrap(), 99);
    }

    #[test]
    fn upsert_replaces_by_id() {
        let store = MemoryStore::new();
        let mut record = location(1);
        let id = record.id.clone();
        store.insert(record.clone());

        record.pending_sync = false;
        record.server_version = Some(3);
        store.upsert_all(vec![record]).unwrap();

        let stored = store.get(EntityType::Location, &id).unwrap().unwrap();
        assert!(!stored.pending_sync);
        assert_eq!(store.records(EntityType::Location).len(), 1);
    }
}
