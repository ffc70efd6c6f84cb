/// Error types for engagement-service
use thiserror::Error;
use uuid::Uuid;

use crate::domain::EdgeKind;

/// Errors raised by the store layer (PostgreSQL or in-memory)
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Duplicate {kind} edge: {subject_id} -> {object_id}")]
    DuplicateEdge {
        kind: EdgeKind,
        subject_id: Uuid,
        object_id: Uuid,
    },

    #[error("Self-referencing {0} edge for {1}")]
    SelfReference(EdgeKind, Uuid),

    #[error("No {kind} edge: {subject_id} -> {object_id}")]
    EdgeNotFound {
        kind: EdgeKind,
        subject_id: Uuid,
        object_id: Uuid,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Database error: {0}")]
    Database(#[source] sqlx::Error),
}

/// SQLSTATE codes after which the whole unit of work can be retried:
/// statement timeout, deadlock, serialization failure, lock not available
fn is_transient_sqlstate(code: Option<&str>) -> bool {
    matches!(code, Some("57014" | "40P01" | "40001" | "55P03"))
}

impl StoreError {
    /// Classify a sqlx error: connectivity failures, timeouts and lock
    /// conflicts are transient, the rest are not
    pub fn from_sqlx(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                StoreError::Unavailable(err.to_string())
            }
            sqlx::Error::Database(ref db) if is_transient_sqlstate(db.code().as_deref()) => {
                StoreError::Unavailable(err.to_string())
            }
            other => StoreError::Database(other),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Self action not allowed: {0}")]
    SelfAction(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Only transient store failures may be retried; everything else reflects state
    pub fn is_retryable(&self) -> bool {
        matches!(self, ServiceError::StoreUnavailable(_))
    }

    /// Short label used for metrics
    pub fn label(&self) -> &'static str {
        match self {
            ServiceError::NotFound(_) => "not_found",
            ServiceError::AlreadyExists(_) => "already_exists",
            ServiceError::SelfAction(_) => "self_action",
            ServiceError::Forbidden(_) => "forbidden",
            ServiceError::InvalidInput(_) => "invalid_input",
            ServiceError::StoreUnavailable(_) => "store_unavailable",
            ServiceError::Internal(_) => "internal",
        }
    }
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            e @ StoreError::DuplicateEdge { .. } => ServiceError::AlreadyExists(e.to_string()),
            e @ StoreError::SelfReference(..) => ServiceError::SelfAction(e.to_string()),
            e @ StoreError::EdgeNotFound { .. } => ServiceError::NotFound(e.to_string()),
            StoreError::NotFound(msg) => ServiceError::NotFound(msg),
            StoreError::Conflict(msg) => ServiceError::AlreadyExists(msg),
            StoreError::Unavailable(msg) => ServiceError::StoreUnavailable(msg),
            StoreError::Database(e) => ServiceError::Internal(format!("Database error: {}", e)),
        }
    }
}

/// Result type alias for service operations
pub type ServiceResult<T> = Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::error::{DatabaseError, ErrorKind};
    use std::borrow::Cow;

    /// Database error carrying only a SQLSTATE code
    #[derive(Debug)]
    struct PgCodeError(&'static str);

    impl std::fmt::Display for PgCodeError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "database error {}", self.0)
        }
    }

    impl std::error::Error for PgCodeError {}

    impl DatabaseError for PgCodeError {
        fn message(&self) -> &str {
            "database error"
        }

        fn code(&self) -> Option<Cow<'_, str>> {
            Some(Cow::Borrowed(self.0))
        }

        fn as_error(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
            self
        }

        fn as_error_mut(&mut self) -> &mut (dyn std::error::Error + Send + Sync + 'static) {
            self
        }

        fn into_error(self: Box<Self>) -> Box<dyn std::error::Error + Send + Sync + 'static> {
            self
        }

        fn kind(&self) -> ErrorKind {
            ErrorKind::Other
        }
    }

    fn classify(code: &'static str) -> ServiceError {
        StoreError::from_sqlx(sqlx::Error::Database(Box::new(PgCodeError(code)))).into()
    }

    #[test]
    fn statement_timeout_and_lock_conflicts_are_retryable() {
        for code in ["57014", "40P01", "40001", "55P03"] {
            let err = classify(code);
            assert!(
                matches!(err, ServiceError::StoreUnavailable(_)),
                "{} classified as {:?}",
                code,
                err
            );
            assert!(err.is_retryable());
        }
    }

    #[test]
    fn other_database_errors_stay_internal() {
        let err = classify("23503");
        assert!(matches!(err, ServiceError::Internal(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn duplicate_edge_surfaces_as_already_exists() {
        let err: ServiceError = StoreError::DuplicateEdge {
            kind: EdgeKind::Follow,
            subject_id: Uuid::nil(),
            object_id: Uuid::nil(),
        }
        .into();
        assert!(matches!(err, ServiceError::AlreadyExists(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn pool_timeout_is_retryable() {
        let err: ServiceError = StoreError::from_sqlx(sqlx::Error::PoolTimedOut).into();
        assert!(matches!(err, ServiceError::StoreUnavailable(_)));
        assert!(err.is_retryable());
        assert_eq!(err.label(), "store_unavailable");
    }

    #[test]
    fn missing_edge_is_not_found() {
        let err: ServiceError = StoreError::EdgeNotFound {
            kind: EdgeKind::Like,
            subject_id: Uuid::nil(),
            object_id: Uuid::nil(),
        }
        .into();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }
}
