//! Error taxonomy for the routing and claim engine.

use thiserror::Error;

use crate::db::DbError;
use crate::models::CaseId;

/// Stable developer codes attached to forbidden responses.
pub mod codes {
    /// Another provider holds the temporary or permanent claim.
    pub const CASE_CLAIMED_BY_OTHER_PROVIDER: &str = "case_claimed_by_other_provider";
    /// The caller's temporary claim lapsed past its grace period.
    pub const CLAIM_EXPIRED: &str = "claim_expired";
    /// The caller is not on the case's care team.
    pub const NOT_CASE_PROVIDER: &str = "not_case_provider";
}

/// Error classification surfaced to the request layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    AlreadyClaimed,
    Forbidden,
    ConstraintViolation,
    Conflict,
    Transient,
    InvalidInput,
}

/// Engine errors.
#[derive(Error, Debug)]
pub enum RoutingError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Case {case_id} is already claimed by another provider")]
    AlreadyClaimed { case_id: CaseId },

    #[error("Forbidden ({code}): {message}")]
    Forbidden { code: &'static str, message: String },

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Deadline exceeded")]
    DeadlineExceeded,

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

pub type RoutingResult<T> = Result<T, RoutingError>;

impl RoutingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RoutingError::NotFound(_) => ErrorKind::NotFound,
            RoutingError::AlreadyClaimed { .. } => ErrorKind::AlreadyClaimed,
            RoutingError::Forbidden { .. } => ErrorKind::Forbidden,
            RoutingError::ConstraintViolation(_) => ErrorKind::ConstraintViolation,
            RoutingError::Conflict(_) => ErrorKind::Conflict,
            RoutingError::Transient(_) | RoutingError::DeadlineExceeded => ErrorKind::Transient,
            RoutingError::InvalidInput(_) => ErrorKind::InvalidInput,
        }
    }

    /// Developer code for forbidden errors.
    pub fn code(&self) -> Option<&'static str> {
        match self {
            RoutingError::Forbidden { code, .. } => Some(code),
            _ => None,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    pub(crate) fn forbidden(code: &'static str, message: impl Into<String>) -> Self {
        RoutingError::Forbidden {
            code,
            message: message.into(),
        }
    }
}

impl From<DbError> for RoutingError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::NotFound(what) => RoutingError::NotFound(what),
            DbError::Constraint(msg) => RoutingError::ConstraintViolation(msg),
            DbError::Conflict(msg) => RoutingError::Conflict(msg),
            DbError::Json(e) => RoutingError::Transient(format!("corrupt stored JSON: {}", e)),
            DbError::Sqlite(e) => classify_sqlite(e),
        }
    }
}

fn classify_sqlite(e: rusqlite::Error) -> RoutingError {
    use rusqlite::ErrorCode;

    match &e {
        rusqlite::Error::SqliteFailure(failure, _) => match failure.code {
            ErrorCode::ConstraintViolation => RoutingError::ConstraintViolation(e.to_string()),
            _ => RoutingError::Transient(e.to_string()),
        },
        rusqlite::Error::QueryReturnedNoRows => RoutingError::NotFound(e.to_string()),
        _ => RoutingError::Transient(e.to_string()),
    }
}
