//! HTTP transport implementation.
//!
//! The actual HTTP client is abstracted via a trait so hosts can plug
//! in whichever HTTP library they ship (reqwest, ureq, a platform
//! client behind FFI). [`HttpTransport`] layers the sync protocol's
//! JSON bodies and status-code mapping on top.

use crate::error::{SyncError, SyncResult};
use crate::transport::SyncTransport;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracksync_protocol::{
    EntityType, PullDeltaRequest, PullDeltaResponse, PushBatchRequest, PushBatchResponse,
    RefreshRequest, RefreshResponse, ResolveConflictRequest, ResolveConflictResponse,
};

/// A transport-level HTTP failure (no response arrived).
#[derive(Error, Debug, Clone)]
pub enum HttpError {
    /// The request exceeded the configured timeout.
    #[error("request timed out")]
    Timeout,
    /// The connection could not be established or was dropped.
    #[error("connection failed: {0}")]
    Connect(String),
}

/// An HTTP response as seen by the transport.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Response body bytes.
    pub body: Vec<u8>,
}

/// HTTP client abstraction.
///
/// Implementations own connection pooling and the request timeout
/// (configure it from [`crate::SyncConfig::request_timeout`]).
pub trait HttpClient: Send + Sync {
    /// Executes a request and returns the response, however the
    /// server answered. `Err` is reserved for transport-level
    /// failures where no response arrived.
    fn execute(
        &self,
        method: &str,
        url: &str,
        bearer: Option<&str>,
        body: Option<&[u8]>,
    ) -> Result<HttpResponse, HttpError>;
}

/// JSON-over-HTTP sync transport.
pub struct HttpTransport<C: HttpClient> {
    base_url: String,
    client: C,
}

impl<C: HttpClient> HttpTransport<C> {
    /// Creates a new transport against the given base URL.
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self { base_url, client }
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request<Res: DeserializeOwned>(
        &self,
        method: &str,
        url: &str,
        bearer: Option<&str>,
        body: Option<Vec<u8>>,
    ) -> SyncResult<Res> {
        let response = self
            .client
            .execute(method, url, bearer, body.as_deref())
            .map_err(|e| match e {
                HttpError::Timeout => SyncError::Timeout,
                HttpError::Connect(message) => SyncError::RequestFailed(message),
            })?;

        check_status(&response)?;
        Ok(serde_json::from_slice(&response.body)?)
    }

    fn post_json<Req: Serialize, Res: DeserializeOwned>(
        &self,
        path: &str,
        request: &Req,
        bearer: Option<&str>,
    ) -> SyncResult<Res> {
        let body = serde_json::to_vec(request)?;
        let url = format!("{}{}", self.base_url, path);
        self.request("POST", &url, bearer, Some(body))
    }
}

/// Maps a response status to the engine's error taxonomy.
///
/// 401 is its own variant because the authenticated request executor
/// is its sole handler; generic retry never touches it.
fn check_status(response: &HttpResponse) -> SyncResult<()> {
    let body_text = || String::from_utf8_lossy(&response.body).into_owned();
    match response.status {
        200..=299 => Ok(()),
        401 => Err(SyncError::Unauthorized),
        408 => Err(SyncError::Timeout),
        400..=499 => Err(SyncError::InvalidInput(body_text())),
        500..=599 => Err(SyncError::ServerError(body_text())),
        other => Err(SyncError::Protocol(format!(
            "unexpected status {other}: {}",
            body_text()
        ))),
    }
}

impl<C: HttpClient> SyncTransport for HttpTransport<C> {
    fn push_batch(
        &self,
        entity: EntityType,
        request: &PushBatchRequest,
        token: &str,
    ) -> SyncResult<PushBatchResponse> {
        let path = format!("/{}/batch", entity.path_segment());
        self.post_json(&path, request, Some(token))
    }

    fn pull_changes(
        &self,
        entity: EntityType,
        request: &PullDeltaRequest,
        token: &str,
    ) -> SyncResult<PullDeltaResponse> {
        let url = format!(
            "{}/{}/changes?since_version={}&limit={}",
            self.base_url,
            entity.path_segment(),
            request.since_version,
            request.limit
        );
        self.request("GET", &url, Some(token), None)
    }

    fn resolve_conflict(
        &self,
        request: &ResolveConflictRequest,
        token: &str,
    ) -> SyncResult<ResolveConflictResponse> {
        self.post_json("/sync/resolve-conflict", request, Some(token))
    }

    fn refresh_token(&self, request: &RefreshRequest) -> SyncResult<RefreshResponse> {
        self.post_json("/auth/refresh", request, None)
    }
}
