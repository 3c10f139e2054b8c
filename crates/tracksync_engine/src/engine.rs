//! The delta sync engine: batch push and cursor-driven pull.

use crate::auth::AuthExecutor;
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::resolver::{resolve_remote, RemoteOutcome};
use crate::retry::RetryPolicy;
use crate::store::LocalStore;
use crate::transport::SyncTransport;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use tracksync_protocol::{
    Conflict, EntityType, PullDeltaRequest, PushBatchRequest, PushRecord, SyncScope,
};

/// Counters from a push phase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushOutcome {
    /// Records newly acknowledged by the server.
    pub pushed: u64,
    /// Records the server already knew (acknowledged as no-ops).
    pub duplicates: u64,
    /// Records the server rejected; they stay pending.
    pub rejected: u64,
}

/// Counters and conflicts from a pull phase.
#[derive(Debug, Clone, Default)]
pub struct PullOutcome {
    /// Remote records applied locally.
    pub pulled: u64,
    /// Conflicts that need explicit resolution.
    pub conflicts: Vec<Conflict>,
}

/// Exchanges only changes since the last known cursor with the
/// server, instead of full datasets.
///
/// One engine instance serves one (user, device); the coordinator
/// drives it per entity type, always completing push before starting
/// pull for the same entity type so a pull can never clobber data an
/// in-flight push invalidated.
pub struct DeltaSyncEngine<T: SyncTransport, S: LocalStore> {
    config: SyncConfig,
    executor: Arc<AuthExecutor<T>>,
    store: Arc<S>,
    retry: RetryPolicy,
    cancelled: Arc<AtomicBool>,
}

impl<T: SyncTransport, S: LocalStore> DeltaSyncEngine<T, S> {
    /// Creates a new engine.
    pub fn new(
        config: SyncConfig,
        executor: Arc<AuthExecutor<T>>,
        store: Arc<S>,
        cancelled: Arc<AtomicBool>,
    ) -> Self {
        let retry = RetryPolicy::new(config.retry.clone());
        Self {
            config,
            executor,
            store,
            retry,
            cancelled,
        }
    }

    /// The store this engine reconciles.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    fn check_cancelled(&self) -> SyncResult<()> {
        if self.cancelled.load(Ordering::SeqCst) {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Pushes all pending records of an entity type, in batches.
    ///
    /// Each batch is an independent network call with its own retry
    /// budget; a batch acknowledged by the server stays acknowledged
    /// even if a later batch fails or the pass is cancelled. Version
    /// conflicts reported by the push are collected for resolution.
    pub fn push(&self, entity: EntityType) -> SyncResult<(PushOutcome, Vec<Conflict>)> {
        let pending = self.store.get_pending(entity)?;
        let mut outcome = PushOutcome::default();
        let mut conflicts = Vec::new();

        if pending.is_empty() {
            return Ok((outcome, conflicts));
        }
        debug!(entity = entity.path_segment(), pending = pending.len(), "starting push");

        for chunk in pending.chunks(self.config.push_batch_size) {
            self.check_cancelled()?;

            let request = PushBatchRequest::new(
                chunk.iter().map(PushRecord::from).collect(),
                self.config.device_id.clone(),
            );

            let response = self.retry.run(&self.cancelled, || {
                self.executor
                    .execute(|transport, token| transport.push_batch(entity, &request, token))
            })?;

            // The server reports in submission order: the first
            // `accepted` records, then `duplicates`, then `rejected`.
            let acked = (response.accepted as usize + response.duplicates as usize)
                .min(chunk.len());
            let conflicted: Vec<&str> = response
                .conflicts
                .iter()
                .map(|c| c.record_id.as_str())
                .collect();

            let acked_ids: Vec<String> = chunk[..acked]
                .iter()
                .filter(|r| !conflicted.contains(&r.id.as_str()))
                .map(|r| r.id.clone())
                .collect();
            self.store
                .mark_synced(entity, &acked_ids, response.sync_version)?;

            if response.rejected > 0 {
                let rejected_ids: Vec<&str> =
                    chunk[acked..].iter().map(|r| r.id.as_str()).collect();
                warn!(
                    entity = entity.path_segment(),
                    ?rejected_ids,
                    "server rejected records; they remain pending"
                );
            }

            for version_conflict in response.conflicts {
                let Some(local) = self.store.get(entity, &version_conflict.record_id)? else {
                    continue;
                };
                match version_conflict.server_record {
                    Some(remote) => match resolve_remote(local, remote) {
                        RemoteOutcome::Apply(winner) => self.store.upsert_all(vec![winner])?,
                        RemoteOutcome::Pending(conflict) => conflicts.push(conflict),
                    },
                    // Without the server's copy we cannot build a
                    // conflict yet; the record stays pending and the
                    // pull that follows this push delivers the copy.
                    None => debug!(
                        record_id = %version_conflict.record_id,
                        "push conflict without server record, deferring to pull"
                    ),
                }
            }

            outcome.pushed += response.accepted as u64;
            outcome.duplicates += response.duplicates as u64;
            outcome.rejected += response.rejected as u64;
        }

        info!(
            entity = entity.path_segment(),
            pushed = outcome.pushed,
            duplicates = outcome.duplicates,
            rejected = outcome.rejected,
            "push complete"
        );
        Ok((outcome, conflicts))
    }

    /// Pulls remote changes past the scope's cursor, page by page.
    ///
    /// Pulled records without a local pending edit are upserted
    /// directly; collisions with pending edits go through the
    /// conflict resolver instead of overwriting. The cursor advances
    /// to the highest version observed, never backwards, so an
    /// unchanged cursor re-pulls an empty delta.
    pub fn pull(&self, scope: &SyncScope) -> SyncResult<PullOutcome> {
        let entity = scope.entity_type;
        let mut outcome = PullOutcome::default();

        loop {
            self.check_cancelled()?;

            let since = self.store.cursor(scope)?;
            let request = PullDeltaRequest::new(since, self.config.pull_batch_size);

            let response = self.retry.run(&self.cancelled, || {
                self.executor
                    .execute(|transport, token| transport.pull_changes(entity, &request, token))
            })?;

            let mut max_seen = response.latest_version;
            let mut to_upsert = Vec::new();

            for remote in response.records {
                if let Some(v) = remote.server_version {
                    max_seen = max_seen.max(v);
                }

                match self.store.get(entity, &remote.id)? {
                    Some(local) if local.pending_sync => {
                        match resolve_remote(local, remote) {
                            RemoteOutcome::Apply(winner) => to_upsert.push(winner),
                            RemoteOutcome::Pending(conflict) => outcome.conflicts.push(conflict),
                        }
                    }
                    _ => {
                        let mut record = remote;
                        record.pending_sync = false;
                        to_upsert.push(record);
                    }
                }
                outcome.pulled += 1;
            }

            self.store.upsert_all(to_upsert)?;
            self.store.set_cursor(scope, max_seen)?;
            debug!(
                entity = entity.path_segment(),
                cursor = max_seen,
                has_more = response.has_more,
                "pull page applied"
            );

            if !response.has_more {
                break;
            }
        }

        info!(
            entity = entity.path_segment(),
            pulled = outcome.pulled,
            conflicts = outcome.conflicts.len(),
            "pull complete"
        );
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{TokenPair, TokenStore};
    use crate::config::RetryConfig;
    use crate::store::MemoryStore;
    use crate::transport::MockTransport;
    use std::time::Duration;
    use tracksync_protocol::{
        PullDeltaResponse, PushBatchResponse, RecordPayload, SyncRecord, VersionConflict,
    };

    fn location(last_modified: i64) -> SyncRecord {
        let mut record = SyncRecord::new_local(
            RecordPayload::Location {
                timestamp: last_modified,
                latitude: 0.0,
                longitude: 0.0,
                accuracy: None,
                altitude: None,
                speed: None,
                bearing: None,
            },
            "device-1",
        );
        record.last_modified = last_modified;
        record
    }

    fn trip(name: &str, last_modified: i64) -> SyncRecord {
        let mut record = SyncRecord::new_local(
            RecordPayload::Trip {
                name: name.into(),
                start_time: 0,
                end_time: None,
                distance_meters: 0.0,
                location_ids: vec![],
            },
            "device-1",
        );
        record.last_modified = last_modified;
        record
    }

    fn engine(
        transport: Arc<MockTransport>,
        store: Arc<MemoryStore>,
    ) -> DeltaSyncEngine<MockTransport, MemoryStore> {
        let config = SyncConfig::new("user-1", "device-1", "https://sync.example.com").with_retry(
            RetryConfig::new(3)
                .with_initial_delay(Duration::from_millis(1))
                .without_jitter(),
        );
        let tokens = Arc::new(TokenStore::with_tokens(TokenPair {
            access_token: "at-1".into(),
            refresh_token: "rt-1".into(),
            expires_in: 3600,
        }));
        let executor = Arc::new(AuthExecutor::new(transport, tokens));
        DeltaSyncEngine::new(config, executor, store, Arc::new(AtomicBool::new(false)))
    }

    fn scope() -> SyncScope {
        SyncScope::new("user-1", "device-1", EntityType::Location)
    }

    #[test]
    fn push_acknowledges_accepted_records() {
        // Scenario: 3 records created offline, server accepts all
        let transport = Arc::new(MockTransport::new());
        transport.enqueue_push(Ok(PushBatchResponse::accepted(3, 42)));

        let store = Arc::new(MemoryStore::new());
        for ts in [1, 2, 3] {
            store.insert(location(ts));
        }

        let engine = engine(Arc::clone(&transport), Arc::clone(&store));
        let (outcome, conflicts) = engine.push(EntityType::Location).unwrap();

        assert_eq!(outcome.pushed, 3);
        assert!(conflicts.is_empty());
        assert_eq!(store.pending_count(EntityType::Location), 0);
        for record in store.records(EntityType::Location) {
            assert_eq!(record.server_version, Some(42));
        }
    }

    #[test]
    fn push_chunks_large_pending_sets() {
        let transport = Arc::new(MockTransport::new());
        transport.enqueue_push(Ok(PushBatchResponse::accepted(2, 10)));
        transport.enqueue_push(Ok(PushBatchResponse::accepted(1, 11)));

        let store = Arc::new(MemoryStore::new());
        for ts in [1, 2, 3] {
            store.insert(location(ts));
        }

        let config = SyncConfig::new("user-1", "device-1", "url").with_push_batch_size(2);
        let tokens = Arc::new(TokenStore::with_tokens(TokenPair {
            access_token: "at-1".into(),
            refresh_token: "rt-1".into(),
            expires_in: 3600,
        }));
        let executor = Arc::new(AuthExecutor::new(Arc::clone(&transport), tokens));
        let engine = DeltaSyncEngine::new(
            config,
            executor,
            Arc::clone(&store),
            Arc::new(AtomicBool::new(false)),
        );

        let (outcome, _) = engine.push(EntityType::Location).unwrap();
        assert_eq!(outcome.pushed, 3);

        let pushes = transport.pushes();
        assert_eq!(pushes.len(), 2);
        assert_eq!(pushes[0].1.records.len(), 2);
        assert_eq!(pushes[1].1.records.len(), 1);
    }

    #[test]
    fn duplicates_still_clear_pending() {
        // Re-running an unacknowledged push: the server reports the
        // records as duplicates, and the client converges to synced
        let transport = Arc::new(MockTransport::new());
        transport.enqueue_push(Ok(PushBatchResponse {
            accepted: 0,
            rejected: 0,
            duplicates: 2,
            sync_version: 50,
            conflicts: vec![],
        }));

        let store = Arc::new(MemoryStore::new());
        store.insert(location(1));
        store.insert(location(2));

        let engine = engine(transport, Arc::clone(&store));
        let (outcome, _) = engine.push(EntityType::Location).unwrap();

        assert_eq!(outcome.duplicates, 2);
        assert_eq!(store.pending_count(EntityType::Location), 0);
    }

    #[test]
    fn rejected_records_stay_pending() {
        let transport = Arc::new(MockTransport::new());
        transport.enqueue_push(Ok(PushBatchResponse {
            accepted: 2,
            rejected: 1,
            duplicates: 0,
            sync_version: 60,
            conflicts: vec![],
        }));

        let store = Arc::new(MemoryStore::new());
        for ts in [1, 2, 3] {
            store.insert(location(ts));
        }

        let engine = engine(transport, Arc::clone(&store));
        let (outcome, _) = engine.push(EntityType::Location).unwrap();

        assert_eq!(outcome.pushed, 2);
        assert_eq!(outcome.rejected, 1);
        // Partial success, not all-or-nothing
        assert_eq!(store.pending_count(EntityType::Location), 1);
    }

    #[test]
    fn push_retries_transient_failures() {
        let transport = Arc::new(MockTransport::new());
        transport.enqueue_push(Err(SyncError::ServerError("502".into())));
        transport.enqueue_push(Ok(PushBatchResponse::accepted(1, 5)));

        let store = Arc::new(MemoryStore::new());
        store.insert(location(1));

        let engine = engine(Arc::clone(&transport), Arc::clone(&store));
        let (outcome, _) = engine.push(EntityType::Location).unwrap();

        assert_eq!(outcome.pushed, 1);
        assert_eq!(transport.pushes().len(), 2);
    }

    #[test]
    fn exhausted_retries_leave_records_pending() {
        // Scenario: three consecutive timeouts exceed the retry
        // budget; nothing is partially marked
        let transport = Arc::new(MockTransport::new());
        for _ in 0..3 {
            transport.enqueue_push(Err(SyncError::Timeout));
        }

        let store = Arc::new(MemoryStore::new());
        for ts in [1, 2, 3] {
            store.insert(location(ts));
        }

        let engine = engine(Arc::clone(&transport), Arc::clone(&store));
        let result = engine.push(EntityType::Location);

        assert!(matches!(result, Err(SyncError::Timeout)));
        assert_eq!(transport.pushes().len(), 3);
        assert_eq!(store.pending_count(EntityType::Location), 3);
    }

    #[test]
    fn push_conflict_on_curated_record_is_surfaced() {
        let store = Arc::new(MemoryStore::new());
        let local = trip("mine", 200);
        let id = local.id.clone();
        store.insert(local);

        let mut server_copy = trip("theirs", 100);
        server_copy.id = id.clone();
        server_copy.pending_sync = false;
        server_copy.server_version = Some(9);

        let transport = Arc::new(MockTransport::new());
        transport.enqueue_push(Ok(PushBatchResponse {
            accepted: 0,
            rejected: 0,
            duplicates: 0,
            sync_version: 9,
            conflicts: vec![VersionConflict {
                record_id: id.clone(),
                local_version: 1,
                server_version: 9,
                server_last_modified: 100,
                server_record: Some(server_copy),
            }],
        }));

        let engine = engine(transport, Arc::clone(&store));
        let (_, conflicts) = engine.push(EntityType::Trip).unwrap();

        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].record_id, id);
        // The local edit is untouched
        let stored = store.get(EntityType::Trip, &id).unwrap().unwrap();
        assert!(stored.pending_sync);
    }

    #[test]
    fn pull_upserts_remote_records_and_advances_cursor() {
        let transport = Arc::new(MockTransport::new());
        let mut remote = location(500);
        remote.pending_sync = false;
        remote.server_version = Some(7);
        transport.enqueue_pull(Ok(PullDeltaResponse::new(vec![remote.clone()], 7, false)));

        let store = Arc::new(MemoryStore::new());
        let engine = engine(transport, Arc::clone(&store));

        let outcome = engine.pull(&scope()).unwrap();
        assert_eq!(outcome.pulled, 1);
        assert!(outcome.conflicts.is_empty());

        let stored = store.get(EntityType::Location, &remote.id).unwrap().unwrap();
        assert!(!stored.pending_sync);
        assert_eq!(store.cursor(&scope()).unwrap(), 7);
    }

    #[test]
    fn pull_pages_until_no_more() {
        let transport = Arc::new(MockTransport::new());
        let mut a = location(1);
        a.pending_sync = false;
        a.server_version = Some(1);
        let mut b = location(2);
        b.pending_sync = false;
        b.server_version = Some(2);
        transport.enqueue_pull(Ok(PullDeltaResponse::new(vec![a], 1, true)));
        transport.enqueue_pull(Ok(PullDeltaResponse::new(vec![b], 2, false)));

        let store = Arc::new(MemoryStore::new());
        let engine = engine(Arc::clone(&transport), Arc::clone(&store));

        let outcome = engine.pull(&scope()).unwrap();
        assert_eq!(outcome.pulled, 2);
        assert_eq!(store.cursor(&scope()).unwrap(), 2);

        // The second page asked from the advanced cursor
        let pulls = transport.pulls();
        assert_eq!(pulls[0].1.since_version, 0);
        assert_eq!(pulls[1].1.since_version, 1);
    }

    #[test]
    fn pull_routes_pending_collisions_through_resolver() {
        let store = Arc::new(MemoryStore::new());
        let local = trip("mine", 200);
        let id = local.id.clone();
        store.insert(local);

        let mut remote = trip("theirs", 300);
        remote.id = id.clone();
        remote.pending_sync = false;
        remote.server_version = Some(4);

        let transport = Arc::new(MockTransport::new());
        transport.enqueue_pull(Ok(PullDeltaResponse::new(vec![remote], 4, false)));

        let engine = engine(transport, Arc::clone(&store));
        let outcome = engine.pull(&SyncScope::new("user-1", "device-1", EntityType::Trip)).unwrap();

        // Curated entity: held for explicit resolution, not overwritten
        assert_eq!(outcome.conflicts.len(), 1);
        let stored = store.get(EntityType::Trip, &id).unwrap().unwrap();
        assert!(stored.pending_sync);
        match stored.payload {
            RecordPayload::Trip { ref name, .. } => assert_eq!(name, "mine"),
            _ => unreachable!(),
        }
    }

    #[test]
    fn stale_pull_response_does_not_regress_cursor() {
        let store = Arc::new(MemoryStore::new());
        store.set_cursor(&scope(), 100).unwrap();

        let transport = Arc::new(MockTransport::new());
        transport.enqueue_pull(Ok(PullDeltaResponse::empty(40)));

        let engine = engine(transport, Arc::clone(&store));
        engine.pull(&scope()).unwrap();

        assert_eq!(store.cursor(&scope()).unwrap(), 100);
    }

    #[test]
    fn cancelled_engine_stops_before_network() {
        let transport = Arc::new(MockTransport::new());
        let store = Arc::new(MemoryStore::new());
        store.insert(location(1));

        let config = SyncConfig::new("user-1", "device-1", "url");
        let tokens = Arc::new(TokenStore::with_tokens(TokenPair {
            access_token: "at-1".into(),
            refresh_token: "rt-1".into(),
            expires_in: 3600,
        }));
        let executor = Arc::new(AuthExecutor::new(Arc::clone(&transport), tokens));
        let cancelled = Arc::new(AtomicBool::new(true));
        let engine = DeltaSyncEngine::new(config, executor, store, cancelled);

        let result = engine.push(EntityType::Location);
        assert!(matches!(result, Err(SyncError::Cancelled)));
        assert!(transport.pushes().is_empty());
    }
}
