//! # TrackSync Engine
//!
//! Offline-first sync engine for location, place-visit, and trip
//! records.
//!
//! This crate provides:
//! - Pending-change tracking over a pluggable local store
//! - Authenticated batch push with idempotent de-duplication
//! - Cursor-based delta pull
//! - Version-based conflict detection with per-entity resolution
//!   policy (last-write-wins for automatic data, explicit resolution
//!   for curated data)
//! - Retry with exponential backoff and jitter
//! - HTTP transport abstraction with token refresh
//!
//! ## Architecture
//!
//! The engine implements a **push-then-pull** synchronization model:
//! 1. Push pending local changes in batches (conflicts are detected
//!    here, never silently overwritten)
//! 2. Pull remote deltas since the stored cursor
//! 3. Reconcile collisions per entity policy
//!
//! A [`SyncCoordinator`] sits on top, guaranteeing at most one
//! in-flight pass per (user, device, entity type) and coalescing
//! overlapping requests.
//!
//! ## Key Invariants
//!
//! - A record stays pending until the server acknowledges it
//! - Server versions and cursors only move forward
//! - Conflicting curated records are never auto-merged
//! - Cancellation stops between batches; acknowledged work is kept

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod auth;
mod config;
mod coordinator;
mod engine;
mod error;
mod http;
mod resolver;
mod retry;
mod store;
mod transport;

pub use auth::{AuthExecutor, TokenPair, TokenStore};
pub use config::{RetryConfig, SyncConfig};
pub use coordinator::{EntityOutcome, SyncCoordinator, SyncReport, SyncState};
pub use engine::{DeltaSyncEngine, PullOutcome, PushOutcome};
pub use error::{SyncError, SyncResult};
pub use http::{HttpClient, HttpError, HttpResponse, HttpTransport};
pub use resolver::{apply_resolution, resolve_remote, RemoteOutcome};
pub use retry::RetryPolicy;
pub use store::{LocalStore, MemoryStore};
pub use transport::{MockTransport, SyncTransport};
