//! Token storage and the authenticated request executor.

use crate::error::{SyncError, SyncResult};
use crate::transport::SyncTransport;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};
use tracksync_protocol::{RefreshRequest, RefreshResponse};

/// An access/refresh token pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
    /// Bearer token attached to authenticated requests.
    pub access_token: String,
    /// Token exchanged for a new pair when the access token expires.
    pub refresh_token: String,
    /// Access token lifetime in seconds, as reported by the server.
    pub expires_in: u64,
}

impl From<RefreshResponse> for TokenPair {
    fn from(response: RefreshResponse) -> Self {
        Self {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            expires_in: response.expires_in,
        }
    }
}

/// Explicitly owned, lock-guarded token storage.
///
/// The token pair is the only cross-request shared mutable state in
/// the engine. It is passed to the executor rather than living as
/// ambient global state.
#[derive(Debug, Default)]
pub struct TokenStore {
    tokens: Mutex<Option<TokenPair>>,
}

impl TokenStore {
    /// Creates an empty store (not authenticated).
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store holding the given pair.
    pub fn with_tokens(pair: TokenPair) -> Self {
        Self {
            tokens: Mutex::new(Some(pair)),
        }
    }

    /// Replaces the stored pair.
    pub fn set(&self, pair: TokenPair) {
        *self.tokens.lock() = Some(pair);
    }

    /// Clears the stored pair. Done when a refresh fails, so the
    /// host app knows to re-authenticate.
    pub fn clear(&self) {
        *self.tokens.lock() = None;
    }

    /// The current access token, if any.
    pub fn access_token(&self) -> Option<String> {
        self.tokens.lock().as_ref().map(|p| p.access_token.clone())
    }

    /// The current refresh token, if any.
    pub fn refresh_token(&self) -> Option<String> {
        self.tokens.lock().as_ref().map(|p| p.refresh_token.clone())
    }

    /// Returns true if a token pair is stored.
    pub fn is_authenticated(&self) -> bool {
        self.tokens.lock().is_some()
    }
}

/// Executes authenticated calls with a single refresh-and-retry on
/// 401.
///
/// On `Unauthorized` the executor refreshes the token pair exactly
/// once and retries the original call once with the new token. A 401
/// on the retried call surfaces as [`SyncError::RefreshFailed`]; a
/// failed refresh clears the stored tokens. There is deliberately no
/// path that refreshes twice for one call (no token-refresh storms).
///
/// The refresh itself is single-flight: concurrent callers that
/// observe an expired token wait on the in-progress refresh and then
/// reuse its result instead of each initiating their own.
pub struct AuthExecutor<T: SyncTransport> {
    transport: Arc<T>,
    tokens: Arc<TokenStore>,
    refresh_lock: Mutex<()>,
}

impl<T: SyncTransport> AuthExecutor<T> {
    /// Creates a new executor.
    pub fn new(transport: Arc<T>, tokens: Arc<TokenStore>) -> Self {
        Self {
            transport,
            tokens,
            refresh_lock: Mutex::new(()),
        }
    }

    /// The token store this executor guards.
    pub fn tokens(&self) -> &Arc<TokenStore> {
        &self.tokens
    }

    /// The underlying transport.
    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Runs `call` with the current access token, refreshing once on
    /// 401.
    pub fn execute<R>(&self, call: impl Fn(&T, &str) -> SyncResult<R>) -> SyncResult<R> {
        let token = self
            .tokens
            .access_token()
            .ok_or(SyncError::NotAuthenticated)?;

        match call(&self.transport, &token) {
            Err(SyncError::Unauthorized) => {
                let fresh = self.refresh(&token)?;
                match call(&self.transport, &fresh) {
                    Err(SyncError::Unauthorized) => Err(SyncError::RefreshFailed(
                        "still unauthorized after refresh".into(),
                    )),
                    other => other,
                }
            }
            other => other,
        }
    }

    /// Refreshes the token pair, single-flight.
    ///
    /// `stale` is the token the caller just failed with; if the
    /// stored token already differs, another caller's refresh won
    /// the race and its result is reused.
    fn refresh(&self, stale: &str) -> SyncResult<String> {
        let _guard = self.refresh_lock.lock();

        if let Some(current) = self.tokens.access_token() {
            if current != stale {
                debug!("token already refreshed by a concurrent caller");
                return Ok(current);
            }
        }

        let refresh_token = self
            .tokens
            .refresh_token()
            .ok_or(SyncError::NotAuthenticated)?;

        debug!("access token rejected, refreshing");
        match self
            .transport
            .refresh_token(&RefreshRequest { refresh_token })
        {
            Ok(response) => {
                let access = response.access_token.clone();
                self.tokens.set(TokenPair::from(response));
                Ok(access)
            }
            Err(error) => {
                warn!(%error, "token refresh failed, clearing stored tokens");
                self.tokens.clear();
                Err(SyncError::RefreshFailed(error.to_string()))
            }
        }
    }
}
