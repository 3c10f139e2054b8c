//! Wire messages for the sync protocol.
//!
//! All messages serialize to JSON. Field names are the wire contract;
//! behavior notes on each type are the authoritative part.

use crate::conflict::ResolutionKind;
use crate::record::{EntityType, SyncRecord};
use serde::{Deserialize, Serialize};

/// One record inside a push batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushRecord {
    /// Client-generated record id (the server's dedup key).
    pub id: String,
    /// The client's local mutation counter.
    pub local_version: u64,
    /// The server version the client last saw for this record, if
    /// any. A stale value here is what triggers a version conflict.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_version: Option<u64>,
    /// Timestamp of the client's last mutation (Unix millis).
    pub last_modified: i64,
    /// Soft-delete tombstone.
    pub deleted: bool,
    /// The entity payload.
    pub payload: crate::record::RecordPayload,
}

impl From<&SyncRecord> for PushRecord {
    fn from(record: &SyncRecord) -> Self {
        Self {
            id: record.id.clone(),
            local_version: record.local_version,
            server_version: record.server_version,
            last_modified: record.last_modified,
            deleted: record.deleted,
            payload: record.payload.clone(),
        }
    }
}

/// A batch of pending records pushed to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushBatchRequest {
    /// Records in submission order.
    pub records: Vec<PushRecord>,
    /// The device originating the batch.
    pub device_id: String,
}

impl PushBatchRequest {
    /// Creates a new push batch.
    pub fn new(records: Vec<PushRecord>, device_id: impl Into<String>) -> Self {
        Self {
            records,
            device_id: device_id.into(),
        }
    }
}

/// The server's answer to a push batch.
///
/// The server processes and reports **in submission order**: the
/// first `accepted` records of the batch were newly stored, the next
/// `duplicates` records were already known (a no-op the client must
/// still treat as acknowledged), and the remaining `rejected` records
/// failed validation and stay pending on the client. This ordering is
/// a design contract, not an accident.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushBatchResponse {
    /// Number of newly accepted records.
    pub accepted: u32,
    /// Number of records rejected (validation failures).
    pub rejected: u32,
    /// Number of records the server already knew by id.
    pub duplicates: u32,
    /// The server's post-batch version counter. Accepted records are
    /// acknowledged at this version.
    pub sync_version: u64,
    /// Records whose declared `server_version` was stale.
    #[serde(default)]
    pub conflicts: Vec<VersionConflict>,
}

impl PushBatchResponse {
    /// Creates a response accepting the whole batch.
    pub fn accepted(count: u32, sync_version: u64) -> Self {
        Self {
            accepted: count,
            rejected: 0,
            duplicates: 0,
            sync_version,
            conflicts: Vec::new(),
        }
    }

    /// Adds version conflicts to the response.
    pub fn with_conflicts(mut self, conflicts: Vec<VersionConflict>) -> Self {
        self.conflicts = conflicts;
        self
    }
}

/// A version mismatch reported by the server during push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionConflict {
    /// The conflicted record.
    pub record_id: String,
    /// The local version the client submitted.
    pub local_version: u64,
    /// The version the server currently holds.
    pub server_version: u64,
    /// When the server's copy was last modified (Unix millis).
    pub server_last_modified: i64,
    /// The server's current copy, when the server includes it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_record: Option<SyncRecord>,
}

/// A request for changes since the client's cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullDeltaRequest {
    /// Return records with server version greater than this.
    pub since_version: u64,
    /// Maximum number of records to return.
    pub limit: u32,
}

impl PullDeltaRequest {
    /// Creates a new pull request.
    pub fn new(since_version: u64, limit: u32) -> Self {
        Self {
            since_version,
            limit,
        }
    }
}

/// A page of remote changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullDeltaResponse {
    /// Records changed since the requested version, each carrying
    /// its server-assigned version in `server_version`.
    pub records: Vec<SyncRecord>,
    /// The highest server version in this page (the client's next
    /// cursor position).
    pub latest_version: u64,
    /// Whether more changes are available past this page.
    pub has_more: bool,
}

impl PullDeltaResponse {
    /// Creates a new pull response.
    pub fn new(records: Vec<SyncRecord>, latest_version: u64, has_more: bool) -> Self {
        Self {
            records,
            latest_version,
            has_more,
        }
    }

    /// An empty delta: nothing changed since the cursor.
    pub fn empty(latest_version: u64) -> Self {
        Self::new(Vec::new(), latest_version, false)
    }
}

/// A request to record a conflict resolution with the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolveConflictRequest {
    /// The conflicted record.
    pub record_id: String,
    /// Its entity type.
    pub entity_type: EntityType,
    /// The chosen resolution.
    pub resolution: ResolutionKind,
    /// The winning record contents for `KeepLocal` and `Merge`;
    /// absent for `KeepRemote` (the server already holds the winner).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved: Option<PushRecord>,
}

/// The server's confirmation of a conflict resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolveConflictResponse {
    /// The new authoritative state of the record.
    pub record: SyncRecord,
    /// The server's version counter after the resolution.
    pub sync_version: u64,
}

/// A token refresh request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshRequest {
    /// The stored refresh token.
    pub refresh_token: String,
}

/// A fresh token pair from the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshResponse {
    /// The new access token.
    pub access_token: String,
    /// The new refresh token.
    pub refresh_token: String,
    /// Access token lifetime in seconds.
    pub expires_in: u64,
}
