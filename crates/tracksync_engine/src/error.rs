//! Error types for the sync engine.

use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug, Clone)]
pub enum SyncError {
    /// A network call exceeded the request timeout.
    #[error("request timed out")]
    Timeout,

    /// The network call failed before a response arrived
    /// (connection refused, DNS failure, dropped connection).
    #[error("request failed: {0}")]
    RequestFailed(String),

    /// The server answered with a 5xx status.
    #[error("server error: {0}")]
    ServerError(String),

    /// The server answered 401. Handled exclusively by the
    /// authenticated request executor, never by generic retry.
    #[error("unauthorized")]
    Unauthorized,

    /// The token refresh flow failed. Stored tokens have been
    /// cleared; the caller must re-authenticate.
    #[error("token refresh failed: {0}")]
    RefreshFailed(String),

    /// No token pair is stored.
    #[error("not authenticated")]
    NotAuthenticated,

    /// The server rejected the request as invalid (4xx other than
    /// 401). Terminal for the current pass.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A request or response body could not be encoded or decoded.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A local store read failed.
    #[error("local store query failed: {0}")]
    QueryFailed(String),

    /// A local store write failed.
    #[error("local store write failed: {0}")]
    WriteFailed(String),

    /// The sync pass was cancelled between batches.
    #[error("sync cancelled")]
    Cancelled,
}

impl SyncError {
    /// Returns true if this error is transient and the retry policy
    /// may try again.
    ///
    /// 401 is deliberately not retryable here: the refresh flow in
    /// the request executor is its only handler.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::Timeout | SyncError::RequestFailed(_) | SyncError::ServerError(_)
        )
    }

    /// Returns true if this error means the caller must
    /// re-authenticate before syncing again.
    pub fn is_auth(&self) -> bool {
        matches!(
            self,
            SyncError::Unauthorized | SyncError::RefreshFailed(_) | SyncError::NotAuthenticated
        )
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Protocol(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::Timeout.is_retryable());
        assert!(SyncError::RequestFailed("connection reset".into()).is_retryable());
        assert!(SyncError::ServerError("internal error".into()).is_retryable());

        assert!(!SyncError::Unauthorized.is_retryable());
        assert!(!SyncError::InvalidInput("bad latitude".into()).is_retryable());
        assert!(!SyncError::Cancelled.is_retryable());
        assert!(!SyncError::RefreshFailed("expired".into()).is_retryable());
    }

    #[test]
    fn auth_errors() {
        assert!(SyncError::Unauthorized.is_auth());
        assert!(SyncError::RefreshFailed("expired".into()).is_auth());
        assert!(SyncError::NotAuthenticated.is_auth());
        assert!(!SyncError::Timeout.is_auth());
    }

    #[test]
    fn error_display() {
        let err = SyncError::RefreshFailed("refresh token revoked".into());
        assert_eq!(err.to_string(), "token refresh failed: refresh token revoked");

        let err = SyncError::ServerError("internal error".into());
        assert_eq!(err.to_string(), "server error: internal error");
    }
}
