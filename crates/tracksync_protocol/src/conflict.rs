//! Conflict types shared between the engine and the server.

use crate::record::{RecordPayload, ResolutionCategory, SyncRecord};
use serde::{Deserialize, Serialize};

/// A detected conflict between a local pending edit and the server's
/// copy of the same record.
///
/// Conflicts arise two ways: a push reports a stale declared
/// `server_version`, or a pull delivers a remote update for a record
/// that still has an unacknowledged local edit.
#[derive(Debug, Clone, PartialEq)]
pub struct Conflict {
    /// The conflicted record id.
    pub record_id: String,
    /// The local copy, still pending.
    pub local: SyncRecord,
    /// The server's copy.
    pub remote: SyncRecord,
}

impl Conflict {
    /// Creates a new conflict.
    pub fn new(local: SyncRecord, remote: SyncRecord) -> Self {
        Self {
            record_id: local.id.clone(),
            local,
            remote,
        }
    }

    /// How this conflict is resolved, by entity category.
    pub fn category(&self) -> ResolutionCategory {
        self.local.entity_type().category()
    }

    /// Returns true if one side is a tombstone and the other a live
    /// edit.
    pub fn is_edit_delete(&self) -> bool {
        self.local.deleted != self.remote.deleted
    }
}

/// The resolution chosen for a conflict.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Keep the local pending edit; it is re-queued for push.
    KeepLocal,
    /// Accept the server's copy; the local edit is discarded.
    KeepRemote,
    /// Replace both with a merged payload; the merge is re-queued
    /// for push.
    Merge(RecordPayload),
}

impl Resolution {
    /// The wire discriminant for this resolution.
    pub fn kind(&self) -> ResolutionKind {
        match self {
            Resolution::KeepLocal => ResolutionKind::KeepLocal,
            Resolution::KeepRemote => ResolutionKind::KeepRemote,
            Resolution::Merge(_) => ResolutionKind::Merge,
        }
    }
}

/// Wire discriminant of a [`Resolution`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionKind {
    /// The local edit wins.
    KeepLocal,
    /// The server's copy wins.
    KeepRemote,
    /// A merged record wins.
    Merge,
}
