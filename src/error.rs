//! Service error taxonomy
//!
//! Every fallible core operation returns a `ServiceError` tagged with the
//! kind a caller must act on:
//! - `Validation`: bad inputs, quota exceeded at admission, chunk-hash mismatch
//! - `Authentication` / `Authorization`: missing or insufficient principal
//! - `NotFound`: file, session, user, or folder does not exist
//! - `Conflict`: concurrent finalization, state-machine violations
//! - `RateLimited`: token bucket exhausted, carries a retry hint
//! - `Storage`: upstream blob-store failure (retried by workers, not handlers)
//! - `Internal`: everything else; details never leak to clients

use thiserror::Error;

use crate::storage::StorageError;

/// Result type for core service operations
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Error kinds surfaced by the core services
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Invalid request input or failed precondition
    #[error("{0}")]
    Validation(String),

    /// Missing or invalid credentials
    #[error("authentication required")]
    Authentication,

    /// Principal is known but not allowed to perform the operation
    #[error("{0}")]
    Authorization(String),

    /// Referenced entity does not exist (or is deleted/expired)
    #[error("{0} not found")]
    NotFound(String),

    /// Concurrent or out-of-order state transition
    #[error("{0}")]
    Conflict(String),

    /// Requested byte range cannot be satisfied
    #[error("range not satisfiable for object of {size} bytes")]
    RangeNotSatisfiable {
        /// Total object size in bytes
        size: u64,
    },

    /// Token bucket exhausted for the subject/action pair
    #[error("rate limit exceeded, retry after {retry_after} seconds")]
    RateLimited {
        /// Seconds until the bucket refills enough to admit the request
        retry_after: u64,
    },

    /// Upstream blob-store failure
    #[error("storage failure: {0}")]
    Storage(StorageError),

    /// Unexpected internal failure; message is logged, never surfaced
    #[error("internal error")]
    Internal(String),
}

impl ServiceError {
    /// Invalid-input error with a client-readable message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Authorization failure with a client-readable message
    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Authorization(msg.into())
    }

    /// Missing-entity error; `what` names the entity kind ("file", "session", ...)
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// State-transition conflict with a client-readable message
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Internal failure; `msg` is for the log line only
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Stable machine-readable error code for the JSON envelope
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION",
            Self::Authentication => "AUTHENTICATION",
            Self::Authorization(_) => "FORBIDDEN",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Conflict(_) => "CONFLICT",
            Self::RangeNotSatisfiable { .. } => "RANGE_NOT_SATISFIABLE",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::Storage(_) => "STORAGE_UNAVAILABLE",
            Self::Internal(_) => "INTERNAL",
        }
    }

    /// HTTP status the edge maps this error to
    pub fn status(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::Authentication => 401,
            Self::Authorization(_) => 403,
            Self::NotFound(_) => 404,
            Self::Conflict(_) => 409,
            Self::RangeNotSatisfiable { .. } => 416,
            Self::RateLimited { .. } => 429,
            Self::Storage(_) => 502,
            Self::Internal(_) => 500,
        }
    }

    /// Message safe to expose to clients
    pub fn public_message(&self) -> String {
        match self {
            // Storage and internal details stay in the logs.
            Self::Storage(_) => "upstream storage unavailable".to_string(),
            Self::Internal(_) => "internal error".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<StorageError> for ServiceError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound { .. } => Self::not_found("object"),
            other => Self::Storage(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_follows_taxonomy() {
        assert_eq!(ServiceError::validation("bad").status(), 400);
        assert_eq!(ServiceError::Authentication.status(), 401);
        assert_eq!(ServiceError::forbidden("no").status(), 403);
        assert_eq!(ServiceError::not_found("file").status(), 404);
        assert_eq!(ServiceError::conflict("busy").status(), 409);
        assert_eq!(ServiceError::RangeNotSatisfiable { size: 10 }.status(), 416);
        assert_eq!(ServiceError::RateLimited { retry_after: 3 }.status(), 429);
        assert_eq!(ServiceError::internal("boom").status(), 500);
    }

    #[test]
    fn storage_not_found_becomes_not_found() {
        let err: ServiceError = StorageError::not_found("hot/u/x").into();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[test]
    fn internal_details_do_not_leak() {
        let err = ServiceError::internal("sled tree corrupted at offset 42");
        assert_eq!(err.public_message(), "internal error");
    }
}
