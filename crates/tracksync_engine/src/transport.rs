//! Transport layer abstraction for sync operations.

use crate::error::{SyncError, SyncResult};
use parking_lot::Mutex;
use std::collections::VecDeque;
use tracksync_protocol::{
    EntityType, PullDeltaRequest, PullDeltaResponse, PushBatchRequest, PushBatchResponse,
    RefreshRequest, RefreshResponse, ResolveConflictRequest, ResolveConflictResponse,
};

/// A sync transport handles network communication with the sync
/// server.
///
/// This trait abstracts the network layer, allowing for different
/// implementations (HTTP, loopback, mock for testing). Authenticated
/// calls take the bearer token as a parameter; the authenticated
/// request executor owns token lifetime and refresh.
pub trait SyncTransport: Send + Sync {
    /// Pushes a batch of pending records.
    fn push_batch(
        &self,
        entity: EntityType,
        request: &PushBatchRequest,
        token: &str,
    ) -> SyncResult<PushBatchResponse>;

    /// Pulls changes since the client's cursor.
    fn pull_changes(
        &self,
        entity: EntityType,
        request: &PullDeltaRequest,
        token: &str,
    ) -> SyncResult<PullDeltaResponse>;

    /// Records a conflict resolution with the server.
    fn resolve_conflict(
        &self,
        request: &ResolveConflictRequest,
        token: &str,
    ) -> SyncResult<ResolveConflictResponse>;

    /// Exchanges a refresh token for a new token pair. The only
    /// unauthenticated call.
    fn refresh_token(&self, request: &RefreshRequest) -> SyncResult<RefreshResponse>;
}

/// A mock transport for testing.
///
/// Responses are scripted per endpoint as FIFO queues (so a test can
/// express "fail once, then succeed"), and every request is recorded
/// for assertions.
#[derive(Default)]
pub struct MockTransport {
    push_responses: Mutex<VecDeque<SyncResult<PushBatchResponse>>>,
    pull_responses: Mutex<VecDeque<SyncResult<PullDeltaResponse>>>,
    resolve_responses: Mutex<VecDeque<SyncResult<ResolveConflictResponse>>>,
    refresh_responses: Mutex<VecDeque<SyncResult<RefreshResponse>>>,
    pushes: Mutex<Vec<(EntityType, PushBatchRequest, String)>>,
    pulls: Mutex<Vec<(EntityType, PullDeltaRequest, String)>>,
    resolves: Mutex<Vec<(ResolveConflictRequest, String)>>,
    refreshes: Mutex<Vec<RefreshRequest>>,
}

impl MockTransport {
    /// Creates a new mock transport with no scripted responses.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a push response (or error).
    pub fn enqueue_push(&self, response: SyncResult<PushBatchResponse>) {
        self.push_responses.lock().push_back(response);
    }

    /// Queues a pull response (or error).
    pub fn enqueue_pull(&self, response: SyncResult<PullDeltaResponse>) {
        self.pull_responses.lock().push_back(response);
    }

    /// Queues a resolve-conflict response (or error).
    pub fn enqueue_resolve(&self, response: SyncResult<ResolveConflictResponse>) {
        self.resolve_responses.lock().push_back(response);
    }

    /// Queues a token refresh response (or error).
    pub fn enqueue_refresh(&self, response: SyncResult<RefreshResponse>) {
        self.refresh_responses.lock().push_back(response);
    }

    /// All recorded push requests, with the tokens they carried.
    pub fn pushes(&self) -> Vec<(EntityType, PushBatchRequest, String)> {
        self.pushes.lock().clone()
    }

    /// All recorded pull requests, with the tokens they carried.
    pub fn pulls(&self) -> Vec<(EntityType, PullDeltaRequest, String)> {
        self.pulls.lock().clone()
    }

    /// All recorded resolve requests.
    pub fn resolves(&self) -> Vec<(ResolveConflictRequest, String)> {
        self.resolves.lock().clone()
    }

    /// All recorded refresh requests.
    pub fn refreshes(&self) -> Vec<RefreshRequest> {
        self.refreshes.lock().clone()
    }

    fn next<T>(queue: &Mutex<VecDeque<SyncResult<T>>>, endpoint: &str) -> SyncResult<T> {
        queue
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(SyncError::Protocol(format!("no scripted {endpoint} response"))))
    }
}

impl SyncTransport for MockTransport {
    fn push_batch(
        &self,
        entity: EntityType,
        request: &PushBatchRequest,
        token: &str,
    ) -> SyncResult<PushBatchResponse> {
        self.pushes
            .lock()
            .push((entity, request.clone(), token.to_string()));
        Self::next(&self.push_responses, "push")
    }

    fn pull_changes(
        &self,
        entity: EntityType,
        request: &PullDeltaRequest,
        token: &str,
    ) -> SyncResult<PullDeltaResponse> {
        self.pulls.lock().push((entity, *request, token.to_string()));
        Self::next(&self.pull_responses, "pull")
    }

    fn resolve_conflict(
        &self,
        request: &ResolveConflictRequest,
        token: &str,
    ) -> SyncResult<ResolveConflictResponse> {
        self.resolves
            .lock()
            .push((request.clone(), token.to_string()));
        Self::next(&self.resolve_responses, "resolve")
    }

    fn refresh_token(&self, request: &RefreshRequest) -> SyncResult<RefreshResponse> {
        self.refreshes.lock().push(request.clone());
        Self::next(&self.refresh_responses, "refresh")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripted_responses_are_fifo() {
        let transport = MockTransport::new();
        transport.enqueue_push(Err(SyncError::Timeout));
        transport.enqueue_push(Ok(PushBatchResponse::accepted(1, 10)));

        let request = PushBatchRequest::new(vec![], "device-1");

        let first = transport.push_batch(EntityType::Location, &request, "tok");
        assert!(matches!(first, Err(SyncError::Timeout)));

        let second = transport
            .push_batch(EntityType::Location, &request, "tok")
            .unwrap();
        assert_eq!(second.accepted, 1);

        assert_eq!(transport.pushes().len(), 2);
    }

    #[test]
    fn unscripted_endpoint_errors() {
        let transport = MockTransport::new();
        let request = PullDeltaRequest::new(0, 10);

        let result = transport.pull_changes(EntityType::Trip, &request, "tok");
        assert!(matches!(result, Err(SyncError::Protocol(_))));
    }

    #[test]
    fn records_tokens() {
        let transport = MockTransport::new();
        transport.enqueue_pull(Ok(PullDeltaResponse::empty(0)));

        let request = PullDeltaRequest::new(5, 10);
        transport
            .pull_changes(EntityType::Location, &request, "bearer-1")
            .unwrap();

        let pulls = transport.pulls();
        assert_eq!(pulls[0].1.since_version, 5);
        assert_eq!(pulls[0].2, "bearer-1");
    }
}
