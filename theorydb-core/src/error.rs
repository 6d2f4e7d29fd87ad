//! Error types for TheoryDB operations.
//!
//! One flat error enum covers the whole library; every entry point returns
//! [`TheoryResult`]. Variant payloads carry enough structure to reconstruct
//! which inputs failed, and [`TheoryError::kind`] gives callers a stable
//! identifier to match on. Error text never contains plaintext of encrypted
//! attributes, data-key bytes, or credentials.

use crate::key::Key;
use crate::value::Item;
use thiserror::Error;

/// Stable error kind identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidModel,
    MissingPrimaryKey,
    InvalidOperator,
    AmbiguousIndex,
    ItemNotFound,
    ConditionFailed,
    EncryptedFieldNotQueryable,
    EncryptionNotConfigured,
    InvalidEncryptedEnvelope,
    ResourceNotFound,
    ThroughputExceeded,
    Throttled,
    TransactCanceled,
    Canceled,
    InternalStoreError,
}

/// Per-operation reason attached to a canceled transaction, in input order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancellationReason {
    /// Store reason code (`ConditionalCheckFailed`, `None`, …)
    pub code: String,
    pub message: Option<String>,
}

impl CancellationReason {
    /// Whether this slot actually failed (the store reports `None` for
    /// operations that were fine but rolled back with the transaction).
    pub fn is_failure(&self) -> bool {
        self.code != "None"
    }
}

/// A batch write the coordinator gave up on after exhausting retries.
#[derive(Debug, Clone, PartialEq)]
pub struct UnprocessedWrite {
    pub table: String,
    /// Item of a put request
    pub put: Option<Item>,
    /// Key of a delete request
    pub delete: Option<Key>,
}

/// Master error type for all TheoryDB operations.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TheoryError {
    #[error("invalid model {model}: {reason}")]
    InvalidModel { model: String, reason: String },

    #[error("operation on {model} is missing key attribute {attribute}")]
    MissingPrimaryKey { model: String, attribute: String },

    #[error("invalid operator {operator} on {path}: {reason}")]
    InvalidOperator {
        operator: String,
        path: String,
        reason: String,
    },

    #[error("query on {model} matches indexes {candidates:?}; name one explicitly")]
    AmbiguousIndex {
        model: String,
        candidates: Vec<String>,
    },

    #[error("item not found in {table}")]
    ItemNotFound { table: String },

    #[error("{operation} condition failed on {table}")]
    ConditionFailed { table: String, operation: String },

    #[error("encrypted attribute {attribute} cannot appear in a {context}")]
    EncryptedFieldNotQueryable { attribute: String, context: String },

    #[error("model {model} has encrypted attributes but no key reference is configured")]
    EncryptionNotConfigured { model: String },

    #[error("encrypted envelope for attribute {attribute} is malformed or failed authentication")]
    InvalidEncryptedEnvelope { attribute: String },

    #[error("resource not found: {resource}")]
    ResourceNotFound { resource: String },

    #[error("throughput exceeded on {table} after {attempts} attempts ({unprocessed_count} unprocessed)")]
    ThroughputExceeded {
        table: String,
        attempts: u32,
        unprocessed_count: usize,
        /// Keys the coordinator could not read
        unprocessed_keys: Vec<Key>,
        /// Writes the coordinator could not apply
        unprocessed_writes: Vec<UnprocessedWrite>,
    },

    #[error("store throttled the request to {table}")]
    Throttled { table: String },

    #[error("transaction canceled: {}", summarize_reasons(.reasons))]
    TransactCanceled { reasons: Vec<CancellationReason> },

    #[error("operation canceled{}", deadline_suffix(*.deadline_elapsed))]
    Canceled { deadline_elapsed: bool },

    #[error("store error{}: {message}", code_suffix(.code))]
    InternalStoreError {
        code: Option<String>,
        message: String,
    },
}

fn summarize_reasons(reasons: &[CancellationReason]) -> String {
    reasons
        .iter()
        .map(|r| r.code.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

fn deadline_suffix(deadline_elapsed: bool) -> &'static str {
    if deadline_elapsed {
        " (deadline elapsed)"
    } else {
        ""
    }
}

fn code_suffix(code: &Option<String>) -> String {
    match code {
        Some(code) => format!(" ({code})"),
        None => String::new(),
    }
}

impl TheoryError {
    /// The stable kind identifier of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            TheoryError::InvalidModel { .. } => ErrorKind::InvalidModel,
            TheoryError::MissingPrimaryKey { .. } => ErrorKind::MissingPrimaryKey,
            TheoryError::InvalidOperator { .. } => ErrorKind::InvalidOperator,
            TheoryError::AmbiguousIndex { .. } => ErrorKind::AmbiguousIndex,
            TheoryError::ItemNotFound { .. } => ErrorKind::ItemNotFound,
            TheoryError::ConditionFailed { .. } => ErrorKind::ConditionFailed,
            TheoryError::EncryptedFieldNotQueryable { .. } => ErrorKind::EncryptedFieldNotQueryable,
            TheoryError::EncryptionNotConfigured { .. } => ErrorKind::EncryptionNotConfigured,
            TheoryError::InvalidEncryptedEnvelope { .. } => ErrorKind::InvalidEncryptedEnvelope,
            TheoryError::ResourceNotFound { .. } => ErrorKind::ResourceNotFound,
            TheoryError::ThroughputExceeded { .. } => ErrorKind::ThroughputExceeded,
            TheoryError::Throttled { .. } => ErrorKind::Throttled,
            TheoryError::TransactCanceled { .. } => ErrorKind::TransactCanceled,
            TheoryError::Canceled { .. } => ErrorKind::Canceled,
            TheoryError::InternalStoreError { .. } => ErrorKind::InternalStoreError,
        }
    }

    /// Whether the library retries this fault internally before surfacing it.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Throttled)
    }
}

/// Result type alias for TheoryDB operations.
pub type TheoryResult<T> = Result<T, TheoryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable() {
        let err = TheoryError::ItemNotFound {
            table: "users".into(),
        };
        assert_eq!(err.kind(), ErrorKind::ItemNotFound);
        assert!(!err.is_retryable());
        assert!(TheoryError::Throttled {
            table: "users".into()
        }
        .is_retryable());
    }

    #[test]
    fn transact_message_lists_reason_codes() {
        let err = TheoryError::TransactCanceled {
            reasons: vec![
                CancellationReason {
                    code: "None".into(),
                    message: None,
                },
                CancellationReason {
                    code: "ConditionalCheckFailed".into(),
                    message: Some("condition failed".into()),
                },
            ],
        };
        let text = err.to_string();
        assert!(text.contains("None, ConditionalCheckFailed"));
    }
}
