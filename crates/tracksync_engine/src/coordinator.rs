//! The sync coordinator: scheduling, single-flight, and conflict
//! gating.

use crate::auth::AuthExecutor;
use crate::config::SyncConfig;
use crate::engine::{DeltaSyncEngine, PushOutcome};
use crate::error::{SyncError, SyncResult};
use crate::resolver::apply_resolution;
use crate::retry::RetryPolicy;
use crate::store::LocalStore;
use crate::transport::SyncTransport;
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, info, warn};
use tracksync_protocol::{
    Conflict, EntityType, PushRecord, Resolution, ResolutionKind, ResolveConflictRequest,
    SyncScope,
};

/// The per-scope state of the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// No sync in flight.
    Idle,
    /// A push-then-pull pass is running.
    Syncing,
    /// The last pass failed; the scope is eligible for the next
    /// trigger.
    Error,
    /// Unresolved curated-entity conflicts block this scope until
    /// [`SyncCoordinator::resolve_conflict`] is called.
    ConflictPending,
}

/// The outcome of one entity type within a sync report.
#[derive(Debug, Clone)]
pub enum EntityOutcome {
    /// Push and pull both completed.
    Completed {
        /// Push-phase counters.
        push: PushOutcome,
        /// Records pulled and applied.
        pulled: u64,
    },
    /// Conflicts were detected (or already pending); the scope waits
    /// for explicit resolution.
    ConflictPending(usize),
    /// A pass was already in flight for this scope; this request was
    /// folded into a re-run after it completes.
    Coalesced,
    /// The pass failed after exhausting its retry budget.
    Failed(SyncError),
}

/// Per-entity-type results of one [`SyncCoordinator::sync`] call.
///
/// Partial success is the norm: each entity type reports its own
/// outcome, never all-or-nothing.
#[derive(Debug, Clone)]
pub struct SyncReport {
    /// One entry per requested entity type, in request order.
    pub results: Vec<(EntityType, EntityOutcome)>,
}

impl SyncReport {
    /// Returns true if every entity type completed (coalesced counts
    /// as completed: the work is owned by the in-flight pass).
    pub fn is_success(&self) -> bool {
        self.results.iter().all(|(_, outcome)| {
            matches!(
                outcome,
                EntityOutcome::Completed { .. } | EntityOutcome::Coalesced
            )
        })
    }

    /// Returns the first failure, if any.
    pub fn first_error(&self) -> Option<&SyncError> {
        self.results.iter().find_map(|(_, outcome)| match outcome {
            EntityOutcome::Failed(error) => Some(error),
            _ => None,
        })
    }
}

#[derive(Debug, Default)]
struct ScopeSlot {
    in_flight: bool,
    rerun: bool,
    state: Option<SyncState>,
}

/// Top-level orchestrator for sync passes.
///
/// Guarantees at most one pass in flight per (user, device, entity
/// type); a request arriving while one is running is coalesced into
/// a re-run instead of a second concurrent pass. Runs on the
/// caller's thread for [`sync`](Self::sync), or on a background
/// worker woken by [`mark_sync_needed`](Self::mark_sync_needed).
pub struct SyncCoordinator<T: SyncTransport, S: LocalStore> {
    config: SyncConfig,
    engine: DeltaSyncEngine<T, S>,
    executor: Arc<AuthExecutor<T>>,
    store: Arc<S>,
    retry: RetryPolicy,
    slots: Mutex<HashMap<SyncScope, ScopeSlot>>,
    conflicts: Mutex<HashMap<String, Conflict>>,
    cancelled: Arc<AtomicBool>,
    wake: Mutex<bool>,
    wake_cv: Condvar,
    shutdown: AtomicBool,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<T: SyncTransport + 'static, S: LocalStore + 'static> SyncCoordinator<T, S> {
    /// Creates a coordinator over a transport and local store.
    pub fn new(config: SyncConfig, executor: Arc<AuthExecutor<T>>, store: Arc<S>) -> Self {
        let cancelled = Arc::new(AtomicBool::new(false));
        let engine = DeltaSyncEngine::new(
            config.clone(),
            Arc::clone(&executor),
            Arc::clone(&store),
            Arc::clone(&cancelled),
        );
        let retry = RetryPolicy::new(config.retry.clone());

        Self {
            config,
            engine,
            executor,
            store,
            retry,
            slots: Mutex::new(HashMap::new()),
            conflicts: Mutex::new(HashMap::new()),
            cancelled,
            wake: Mutex::new(false),
            wake_cv: Condvar::new(),
            shutdown: AtomicBool::new(false),
            worker: Mutex::new(None),
        }
    }

    /// The store this coordinator reconciles.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Current state for an entity type's scope.
    pub fn state(&self, entity: EntityType) -> SyncState {
        if self.conflict_count(entity) > 0 {
            return SyncState::ConflictPending;
        }
        let scope = self.scope(entity);
        self.slots
            .lock()
            .get(&scope)
            .and_then(|slot| {
                if slot.in_flight {
                    Some(SyncState::Syncing)
                } else {
                    slot.state
                }
            })
            .unwrap_or(SyncState::Idle)
    }

    /// All conflicts awaiting explicit resolution.
    pub fn pending_conflicts(&self) -> Vec<Conflict> {
        self.conflicts.lock().values().cloned().collect()
    }

    /// Requests a sync without blocking the caller.
    ///
    /// Fire-and-forget and idempotent: repeated calls before the
    /// worker wakes coalesce into one pass. Safe from any thread.
    pub fn mark_sync_needed(&self) {
        let mut needed = self.wake.lock();
        *needed = true;
        self.wake_cv.notify_one();
    }

    /// Starts the background worker.
    ///
    /// The worker runs a full sync whenever
    /// [`mark_sync_needed`](Self::mark_sync_needed) is called, and on
    /// every `sync_interval` tick when one is configured. Call
    /// [`stop`](Self::stop) to shut it down; the worker keeps the
    /// coordinator alive until then.
    pub fn start(self: &Arc<Self>) {
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return;
        }

        let coordinator = Arc::clone(self);
        *worker = Some(std::thread::spawn(move || coordinator.worker_loop()));
    }

    /// Stops the background worker, waiting for an in-progress pass
    /// to finish its current batch.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.cancel();
        // The wake flag must be set under the lock before notifying:
        // a worker that has already checked the flag but not yet
        // parked would otherwise miss the notification and park with
        // nothing left to wake it.
        {
            let mut needed = self.wake.lock();
            *needed = true;
            self.wake_cv.notify_one();
        }

        if let Some(handle) = self.worker.lock().take() {
            let _ = handle.join();
        }
    }

    /// Cancels any in-flight pass between batches. Batches already
    /// acknowledged by the server stay marked synced; nothing rolls
    /// back.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn worker_loop(&self) {
        debug!("sync worker started");
        loop {
            {
                let mut needed = self.wake.lock();
                if !*needed && !self.shutdown.load(Ordering::SeqCst) {
                    match self.config.sync_interval {
                        Some(interval) => {
                            // Timing out is the periodic-sync trigger
                            let _ = self.wake_cv.wait_for(&mut needed, interval);
                        }
                        None => self.wake_cv.wait(&mut needed),
                    }
                }
                *needed = false;
            }

            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }

            let report = self.sync(&EntityType::ALL);
            if let Some(error) = report.first_error() {
                warn!(%error, "background sync pass failed, will retry on next trigger");
            }
        }
        debug!("sync worker stopped");
    }

    fn scope(&self, entity: EntityType) -> SyncScope {
        SyncScope::new(
            self.config.user_id.clone(),
            self.config.device_id.clone(),
            entity,
        )
    }

    fn conflict_count(&self, entity: EntityType) -> usize {
        self.conflicts
            .lock()
            .values()
            .filter(|c| c.local.entity_type() == entity)
            .count()
    }

    /// Performs a full push-then-pull cycle for the given entity
    /// types, returning per-entity outcomes.
    pub fn sync(&self, entities: &[EntityType]) -> SyncReport {
        self.cancelled.store(false, Ordering::SeqCst);

        let results = entities
            .iter()
            .map(|&entity| (entity, self.sync_entity(entity)))
            .collect();
        SyncReport { results }
    }

    fn sync_entity(&self, entity: EntityType) -> EntityOutcome {
        // Unresolved curated conflicts gate the scope: nothing moves
        // until the host resolves them.
        let gated = self.conflict_count(entity);
        if gated > 0 {
            return EntityOutcome::ConflictPending(gated);
        }

        let scope = self.scope(entity);

        {
            let mut slots = self.slots.lock();
            let slot = slots.entry(scope.clone()).or_default();
            if slot.in_flight {
                slot.rerun = true;
                debug!(entity = entity.path_segment(), "sync already in flight, coalescing");
                return EntityOutcome::Coalesced;
            }
            slot.in_flight = true;
        }

        let outcome = loop {
            let outcome = self.run_pass(&scope);

            let mut slots = self.slots.lock();
            let slot = slots.entry(scope.clone()).or_default();
            slot.state = Some(match &outcome {
                EntityOutcome::Completed { .. } => SyncState::Idle,
                EntityOutcome::ConflictPending(_) => SyncState::ConflictPending,
                EntityOutcome::Failed(_) => SyncState::Error,
                EntityOutcome::Coalesced => SyncState::Idle,
            });

            // A request that arrived mid-pass re-runs now instead of
            // having spawned a second concurrent pass.
            if slot.rerun && matches!(outcome, EntityOutcome::Completed { .. }) {
                slot.rerun = false;
                continue;
            }
            slot.rerun = false;
            slot.in_flight = false;
            break outcome;
        };

        outcome
    }

    fn run_pass(&self, scope: &SyncScope) -> EntityOutcome {
        let entity = scope.entity_type;

        // Push completes (success or terminal failure) before pull
        // begins, so a pull cannot clobber data an in-flight push
        // invalidated, and push-reported conflicts are registered
        // before pulled deltas are applied.
        let (push, mut conflicts) = match self.engine.push(entity) {
            Ok(result) => result,
            Err(error) => return self.fail(entity, error),
        };

        let pulled = match self.engine.pull(scope) {
            Ok(outcome) => {
                conflicts.extend(outcome.conflicts);
                outcome.pulled
            }
            Err(error) => return self.fail(entity, error),
        };

        if conflicts.is_empty() {
            info!(
                entity = entity.path_segment(),
                pushed = push.pushed,
                pulled,
                "sync pass complete"
            );
            EntityOutcome::Completed { push, pulled }
        } else {
            // Push and pull can each report the same record; dedup by
            // id before counting
            {
                let mut pending = self.conflicts.lock();
                for conflict in conflicts {
                    pending.insert(conflict.record_id.clone(), conflict);
                }
            }
            let count = self.conflict_count(entity);
            info!(
                entity = entity.path_segment(),
                conflicts = count,
                "sync pass needs conflict resolution"
            );
            EntityOutcome::ConflictPending(count)
        }
    }

    fn fail(&self, entity: EntityType, error: SyncError) -> EntityOutcome {
        if error.is_auth() {
            // Fatal for the pass: the executor already spent its one
            // refresh. The host must re-authenticate.
            warn!(entity = entity.path_segment(), %error, "sync pass failed: authentication");
        } else {
            warn!(entity = entity.path_segment(), %error, "sync pass failed");
        }
        EntityOutcome::Failed(error)
    }

    /// Resolves a pending conflict and unblocks its scope.
    ///
    /// The resolution is confirmed with the server first; only then
    /// is the winning record written locally and the conflict
    /// cleared. `KeepLocal` and `Merge` leave the record pending so
    /// the next pass pushes it; `KeepRemote` installs the server's
    /// copy as acknowledged.
    pub fn resolve_conflict(&self, record_id: &str, resolution: Resolution) -> SyncResult<()> {
        let conflict = self
            .conflicts
            .lock()
            .get(record_id)
            .cloned()
            .ok_or_else(|| SyncError::InvalidInput(format!("no pending conflict: {record_id}")))?;

        let mut resolved = apply_resolution(&conflict, &resolution);
        let entity = resolved.entity_type();

        let request = ResolveConflictRequest {
            record_id: record_id.to_string(),
            entity_type: entity,
            resolution: resolution.kind(),
            resolved: match resolution.kind() {
                ResolutionKind::KeepRemote => None,
                _ => Some(PushRecord::from(&resolved)),
            },
        };

        let response = self.retry.run(&self.cancelled, || {
            self.executor
                .execute(|transport, token| transport.resolve_conflict(&request, token))
        })?;

        if resolved.pending_sync {
            // KeepLocal and Merge stay pending, but the next push must
            // declare the post-resolution version as its base or the
            // server would report the same conflict again.
            let base = resolved.server_version.unwrap_or(0);
            resolved.server_version = Some(base.max(response.sync_version));
        } else {
            // KeepRemote: acknowledged at the server's post-resolution
            // version.
            resolved.apply_server_ack(response.sync_version);
        }
        self.store.upsert_all(vec![resolved])?;
        self.conflicts.lock().remove(record_id);

        info!(record_id, resolution = ?resolution.kind(), "conflict resolved");
        Ok(())
    }
}
