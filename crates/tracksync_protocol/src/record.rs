//! Syncable records and entity types.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// The kinds of records the engine synchronizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    /// Raw GPS sample.
    Location,
    /// A visit to a place, with user-curated flags.
    PlaceVisit,
    /// A trip assembled from location samples, with a user-curated name.
    Trip,
}

impl EntityType {
    /// All entity types, in the order the coordinator syncs them.
    pub const ALL: [EntityType; 3] = [
        EntityType::Location,
        EntityType::PlaceVisit,
        EntityType::Trip,
    ];

    /// The URL path segment for this entity's endpoints.
    pub fn path_segment(&self) -> &'static str {
        match self {
            EntityType::Location => "locations",
            EntityType::PlaceVisit => "place-visits",
            EntityType::Trip => "trips",
        }
    }

    /// How conflicts on this entity are resolved.
    ///
    /// Raw location samples are high-volume and low-stakes, so
    /// conflicts resolve automatically by last-writer-wins. Place
    /// visits and trips carry user-curated fields (names, favorite
    /// and visibility flags) and require explicit resolution. This
    /// split is per entity category, not a blanket rule.
    pub fn category(&self) -> ResolutionCategory {
        match self {
            EntityType::Location => ResolutionCategory::Automatic,
            EntityType::PlaceVisit | EntityType::Trip => ResolutionCategory::Curated,
        }
    }
}

/// How conflicts are resolved for an entity category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionCategory {
    /// Resolved automatically by last-writer-wins.
    Automatic,
    /// Surfaced for explicit resolution before the scope resumes.
    Curated,
}

/// The typed payload of a [`SyncRecord`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecordPayload {
    /// A raw GPS sample.
    Location {
        /// Sample timestamp (Unix millis).
        timestamp: i64,
        /// Latitude in degrees.
        latitude: f64,
        /// Longitude in degrees.
        longitude: f64,
        /// Horizontal accuracy in meters, if reported.
        accuracy: Option<f64>,
        /// Altitude in meters, if reported.
        altitude: Option<f64>,
        /// Speed in meters per second, if reported.
        speed: Option<f64>,
        /// Bearing in degrees, if reported.
        bearing: Option<f64>,
    },
    /// A visit to a place.
    PlaceVisit {
        /// Display name of the place.
        place_name: String,
        /// Latitude in degrees.
        latitude: f64,
        /// Longitude in degrees.
        longitude: f64,
        /// Arrival time (Unix millis).
        arrival: i64,
        /// Departure time (Unix millis), if the visit has ended.
        departure: Option<i64>,
        /// User-curated favorite flag.
        favorite: bool,
        /// User-curated visibility flag.
        visible: bool,
    },
    /// A trip.
    Trip {
        /// User-curated trip name.
        name: String,
        /// Trip start (Unix millis).
        start_time: i64,
        /// Trip end (Unix millis), if the trip has ended.
        end_time: Option<i64>,
        /// Total distance in meters.
        distance_meters: f64,
        /// Ids of the location samples that make up the trip.
        location_ids: Vec<String>,
    },
}

impl RecordPayload {
    /// Returns the entity type of this payload.
    pub fn entity_type(&self) -> EntityType {
        match self {
            RecordPayload::Location { .. } => EntityType::Location,
            RecordPayload::PlaceVisit { .. } => EntityType::PlaceVisit,
            RecordPayload::Trip { .. } => EntityType::Trip,
        }
    }
}

/// A record tracked by the sync engine.
///
/// `SyncRecord` wraps an entity payload in the versioning envelope
/// the engine needs: a stable client-generated id, local and server
/// version counters, a pending flag, and a soft-delete tombstone.
///
/// # Lifecycle
///
/// A record is created locally pending with no `server_version`.
/// Every local mutation bumps `local_version` and re-marks it
/// pending. A server acknowledgment clears the flag and records the
/// server's version. Records pulled from remote arrive non-pending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRecord {
    /// Globally unique id, client-generated, stable across sync.
    pub id: String,
    /// Monotonically incrementing local mutation counter.
    pub local_version: u64,
    /// Last server-acknowledged version, if any.
    pub server_version: Option<u64>,
    /// Timestamp of last mutation, local or remote (Unix millis).
    pub last_modified: i64,
    /// True until the server acknowledges the current local state.
    pub pending_sync: bool,
    /// Soft-delete tombstone, propagated through sync.
    pub deleted: bool,
    /// Origin device of the mutation.
    pub device_id: String,
    /// The entity payload.
    pub payload: RecordPayload,
}

impl SyncRecord {
    /// Creates a new locally-originated record, pending sync.
    pub fn new_local(payload: RecordPayload, device_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            local_version: 1,
            server_version: None,
            last_modified: now_millis(),
            pending_sync: true,
            deleted: false,
            device_id: device_id.into(),
            payload,
        }
    }

    /// Returns the entity type of this record.
    pub fn entity_type(&self) -> EntityType {
        self.payload.entity_type()
    }

    /// Records a local mutation: bumps `local_version`, updates
    /// `last_modified`, and re-marks the record pending.
    pub fn touch(&mut self) {
        self.local_version += 1;
        self.last_modified = now_millis();
        self.pending_sync = true;
    }

    /// Soft-deletes the record. The tombstone is propagated through
    /// sync like any other mutation.
    pub fn tombstone(&mut self) {
        self.deleted = true;
        self.touch();
    }

    /// Applies a server acknowledgment: clears the pending flag and
    /// records the server's version.
    ///
    /// `server_version` only increases; an acknowledgment carrying a
    /// smaller version (an out-of-order response) leaves the stored
    /// value untouched.
    pub fn apply_server_ack(&mut self, version: u64) {
        self.pending_sync = false;
        match self.server_version {
            Some(current) if current >= version => {}
            _ => self.server_version = Some(version),
        }
    }

    /// Returns true if this record still has unacknowledged local
    /// state.
    pub fn is_pending(&self) -> bool {
        self.pending_sync
    }
}

/// Current wall-clock time as Unix millis.
pub(crate) fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
