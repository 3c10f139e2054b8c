//! # tracksync Protocol
//!
//! Data model and wire messages for the tracksync offline-first
//! synchronization engine.
//!
//! This crate provides:
//! - The [`SyncRecord`] envelope with versioning and tombstone fields
//! - Entity types and their conflict-resolution categories
//! - Sync scopes and monotone sync cursors
//! - JSON wire messages for push, pull, conflict resolution, and
//!   token refresh
//! - Conflict types shared between client and server
//!
//! ## Key Invariants
//!
//! - Record ids are client-generated and stable across sync (the
//!   server dedups by id)
//! - `server_version` and `last_sync_version` only ever increase
//! - Deletions are soft tombstones, propagated rather than dropped
//! - Batch responses are reported in submission order

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod conflict;
mod cursor;
mod messages;
mod record;

pub use conflict::{Conflict, Resolution, ResolutionKind};
pub use cursor::{SyncCursor, SyncScope};
pub use messages::{
    PullDeltaRequest, PullDeltaResponse, PushBatchRequest, PushBatchResponse, PushRecord,
    RefreshRequest, RefreshResponse, ResolveConflictRequest, ResolveConflictResponse,
    VersionConflict,
};
pub use record::{EntityType, RecordPayload, ResolutionCategory, SyncRecord};
