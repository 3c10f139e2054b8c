//! Conflict detection and resolution.
//!
//! Conflicts on raw location samples resolve automatically by
//! last-writer-wins. Conflicts on user-curated entities (place
//! visits, trips) are held as pending and surfaced to the host app
//! for an explicit choice. The split is by entity category and is
//! deliberate policy, not an implementation shortcut.

use tracksync_protocol::{Conflict, Resolution, ResolutionCategory, SyncRecord};

/// What to do with a remote update that collides with a local
/// pending edit.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteOutcome {
    /// The winner, ready to upsert into the local store.
    Apply(SyncRecord),
    /// Resolution requires an explicit choice; nothing is
    /// overwritten.
    Pending(Conflict),
}

/// Resolves a remote update against a local pending edit for the
/// same record.
pub fn resolve_remote(local: SyncRecord, remote: SyncRecord) -> RemoteOutcome {
    match local.entity_type().category() {
        ResolutionCategory::Automatic => {
            if local.last_modified > remote.last_modified {
                // Local edit is newer: keep it pending so the next
                // push supersedes the remote copy, but absorb the
                // server's version so that push declares it.
                let mut kept = local;
                kept.server_version = max_version(kept.server_version, remote.server_version);
                RemoteOutcome::Apply(kept)
            } else {
                // Remote is newer, or a tie: the server's copy wins.
                let mut winner = remote;
                winner.pending_sync = false;
                RemoteOutcome::Apply(winner)
            }
        }
        ResolutionCategory::Curated => RemoteOutcome::Pending(Conflict::new(local, remote)),
    }
}

/// Produces the record that a chosen resolution leaves in the local
/// store.
///
/// `KeepLocal` and `Merge` leave the record pending so the next sync
/// pass pushes it; `KeepRemote` installs the server's copy as
/// acknowledged. All three absorb the server's version so the next
/// push does not immediately re-conflict.
pub fn apply_resolution(conflict: &Conflict, resolution: &Resolution) -> SyncRecord {
    let server_version = max_version(
        conflict.local.server_version,
        conflict.remote.server_version,
    );

    match resolution {
        Resolution::KeepLocal => {
            let mut record = conflict.local.clone();
            record.pending_sync = true;
            record.server_version = server_version;
            record
        }
        Resolution::KeepRemote => {
            let mut record = conflict.remote.clone();
            record.pending_sync = false;
            record.server_version = server_version;
            record
        }
        Resolution::Merge(payload) => {
            let mut record = conflict.local.clone();
            record.payload = payload.clone();
            record.touch();
            record.server_version = server_version;
            record
        }
    }
}

fn max_version(a: Option<u64>, b: Option<u64>) -> Option<u64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, b) => a.or(b),
    }
}
