//! Error types for Kriti operations

use crate::EntityPrefix;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// ============================================================================
// ERROR KIND
// ============================================================================

/// Coded error category surfaced to callers.
///
/// The API layer translates these into protocol responses; this crate never
/// maps them to HTTP status codes itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Put, update, batch-write or transactional write failed
    WriteError,
    /// Query, scan or batch-get failed
    QueryError,
    /// Delete failed
    DeleteError,
    /// Continuation token could not be decoded
    PaginationTokenInvalid,
    /// A required entity does not exist
    NotFound,
    /// Caller supplied a malformed value
    InvalidInput,
    /// Configuration is missing or invalid
    ConfigError,
}

impl ErrorKind {
    /// The wire code for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::WriteError => "WRITE_ERROR",
            ErrorKind::QueryError => "QUERY_ERROR",
            ErrorKind::DeleteError => "DELETE_ERROR",
            ErrorKind::PaginationTokenInvalid => "PAGINATION_TOKEN_INVALID",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::InvalidInput => "INVALID_INPUT",
            ErrorKind::ConfigError => "CONFIG_ERROR",
        }
    }

    /// Whether a caller bug produced this error (never worth retrying).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ErrorKind::PaginationTokenInvalid | ErrorKind::InvalidInput | ErrorKind::NotFound
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// CONCERN ERRORS
// ============================================================================

/// Storage layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Write failed during {operation}: {reason}")]
    WriteFailed { operation: String, reason: String },

    #[error("Query failed during {operation}: {reason}")]
    QueryFailed { operation: String, reason: String },

    #[error("Delete failed for {key}: {reason}")]
    DeleteFailed { key: String, reason: String },

    #[error("Transaction of {count} items exceeds the limit of {max}")]
    TransactionTooLarge { count: usize, max: usize },

    #[error("{remaining} items still unprocessed after {attempts} attempts")]
    RetriesExhausted { attempts: u32, remaining: usize },

    #[error("Condition check failed: {reason}")]
    ConditionFailed { reason: String },

    #[error("No key condition: a query must be anchored to a partition key")]
    NoKeyCondition,
}

/// Continuation token errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PaginationError {
    #[error("Invalid pagination token: {reason}")]
    InvalidToken { reason: String },
}

/// Versioned entity errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VersionError {
    #[error("Entity not found: {prefix} with id {id}")]
    EntityNotFound { prefix: EntityPrefix, id: String },

    #[error("Invalid version label: {value}")]
    InvalidVersion { value: String },

    #[error("Version conflict on {id}: expected {expected}, found {actual:?}")]
    Conflict {
        id: String,
        expected: String,
        actual: Option<String>,
    },
}

/// Validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all Kriti errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KritiError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Pagination error: {0}")]
    Pagination(#[from] PaginationError),

    #[error("Version error: {0}")]
    Version(#[from] VersionError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Serialization error: {reason}")]
    Serialization { reason: String },
}

impl KritiError {
    /// The coded category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            KritiError::Storage(e) => match e {
                StorageError::QueryFailed { .. } | StorageError::NoKeyCondition => {
                    ErrorKind::QueryError
                }
                StorageError::DeleteFailed { .. } => ErrorKind::DeleteError,
                StorageError::WriteFailed { .. }
                | StorageError::TransactionTooLarge { .. }
                | StorageError::RetriesExhausted { .. }
                | StorageError::ConditionFailed { .. } => ErrorKind::WriteError,
            },
            KritiError::Pagination(_) => ErrorKind::PaginationTokenInvalid,
            KritiError::Version(e) => match e {
                VersionError::EntityNotFound { .. } => ErrorKind::NotFound,
                VersionError::InvalidVersion { .. } => ErrorKind::InvalidInput,
                VersionError::Conflict { .. } => ErrorKind::WriteError,
            },
            KritiError::Validation(_) | KritiError::Serialization { .. } => {
                ErrorKind::InvalidInput
            }
            KritiError::Config(_) => ErrorKind::ConfigError,
        }
    }

    /// Wrap a store write failure.
    pub fn write(operation: impl Into<String>, reason: impl fmt::Display) -> Self {
        KritiError::Storage(StorageError::WriteFailed {
            operation: operation.into(),
            reason: reason.to_string(),
        })
    }

    /// Wrap a store read failure.
    pub fn query(operation: impl Into<String>, reason: impl fmt::Display) -> Self {
        KritiError::Storage(StorageError::QueryFailed {
            operation: operation.into(),
            reason: reason.to_string(),
        })
    }

    /// Wrap a store delete failure.
    pub fn delete(key: impl Into<String>, reason: impl fmt::Display) -> Self {
        KritiError::Storage(StorageError::DeleteFailed {
            key: key.into(),
            reason: reason.to_string(),
        })
    }
}

impl From<serde_json::Error> for KritiError {
    fn from(e: serde_json::Error) -> Self {
        KritiError::Serialization {
            reason: e.to_string(),
        }
    }
}

/// Result type alias for Kriti operations.
pub type KritiResult<T> = Result<T, KritiError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_wire_codes() {
        assert_eq!(ErrorKind::WriteError.as_str(), "WRITE_ERROR");
        assert_eq!(ErrorKind::QueryError.as_str(), "QUERY_ERROR");
        assert_eq!(ErrorKind::DeleteError.as_str(), "DELETE_ERROR");
        assert_eq!(
            ErrorKind::PaginationTokenInvalid.as_str(),
            "PAGINATION_TOKEN_INVALID"
        );

        let json = serde_json::to_string(&ErrorKind::PaginationTokenInvalid).unwrap();
        assert_eq!(json, "\"PAGINATION_TOKEN_INVALID\"");
    }

    #[test]
    fn test_storage_error_kinds() {
        let too_large = KritiError::from(StorageError::TransactionTooLarge { count: 26, max: 25 });
        assert_eq!(too_large.kind(), ErrorKind::WriteError);

        let exhausted = KritiError::from(StorageError::RetriesExhausted {
            attempts: 3,
            remaining: 4,
        });
        assert_eq!(exhausted.kind(), ErrorKind::WriteError);

        assert_eq!(
            KritiError::from(StorageError::NoKeyCondition).kind(),
            ErrorKind::QueryError
        );
        assert_eq!(
            KritiError::delete("ARTIST#1", "boom").kind(),
            ErrorKind::DeleteError
        );
    }

    #[test]
    fn test_wrapped_message_carries_cause() {
        let err = KritiError::write("transact_write", "throughput exceeded");
        let msg = err.to_string();
        assert!(msg.contains("transact_write"));
        assert!(msg.contains("throughput exceeded"));
    }

    #[test]
    fn test_pagination_error_is_client_error() {
        let err = KritiError::from(PaginationError::InvalidToken {
            reason: "bad base64".to_string(),
        });
        assert_eq!(err.kind(), ErrorKind::PaginationTokenInvalid);
        assert!(err.kind().is_client_error());
        assert!(err.to_string().contains("Invalid pagination token"));
    }

    #[test]
    fn test_version_error_kinds() {
        let missing = KritiError::from(VersionError::EntityNotFound {
            prefix: EntityPrefix::Raga,
            id: "r1".to_string(),
        });
        assert_eq!(missing.kind(), ErrorKind::NotFound);
        assert!(missing.to_string().contains("RAGA"));

        let conflict = KritiError::from(VersionError::Conflict {
            id: "r1".to_string(),
            expected: "v2".to_string(),
            actual: Some("v3".to_string()),
        });
        assert_eq!(conflict.kind(), ErrorKind::WriteError);
        assert!(!conflict.kind().is_client_error());
    }
}
