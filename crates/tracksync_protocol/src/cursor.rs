//! Sync scopes and cursors.

use crate::record::EntityType;
use serde::{Deserialize, Serialize};

/// The key a sync pass runs under.
///
/// At most one sync pass per scope may be in flight at any time; the
/// coordinator's single-flight lock is keyed by this triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyncScope {
    /// The authenticated user.
    pub user_id: String,
    /// The device running the engine.
    pub device_id: String,
    /// The entity type being synced.
    pub entity_type: EntityType,
}

impl SyncScope {
    /// Creates a new scope.
    pub fn new(
        user_id: impl Into<String>,
        device_id: impl Into<String>,
        entity_type: EntityType,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            device_id: device_id.into(),
            entity_type,
        }
    }
}

/// Per-scope pull position.
///
/// `last_sync_version` is the highest server-assigned global version
/// already pulled for the scope. It is persisted so sync resumes
/// correctly after a process restart, and it never regresses: a pull
/// response observed out of order cannot move the cursor backwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCursor {
    /// The scope this cursor tracks.
    pub scope: SyncScope,
    /// Highest server version already pulled.
    pub last_sync_version: u64,
}

impl SyncCursor {
    /// Creates a cursor at the start of the server's history.
    pub fn new(scope: SyncScope) -> Self {
        Self {
            scope,
            last_sync_version: 0,
        }
    }

    /// Advances the cursor to `version` if it is ahead of the
    /// current position. Returns true if the cursor moved.
    pub fn advance(&mut self, version: u64) -> bool {
        if version > self.last_sync_version {
            self.last_sync_version = version;
            true
        } else {
            false
        }
    }
}
