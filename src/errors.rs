//! Error handling module
//!
//! Structured error types for graph queries, traversals and post-processing
//! passes. Traversals propagate these with `?`; the pipeline collects pass
//! failures instead of aborting the run.

use thiserror::Error;

/// Main error type for graph analysis operations
#[derive(Error, Debug)]
pub enum AnalysisError {
    /// Store-layer query failure
    #[error("Graph query failed: {0}")]
    QueryError(String),

    /// Criteria evaluated against a target it cannot address
    #[error("Malformed criteria: {0}")]
    MalformedCriteria(String),

    /// Node, relationship or row not found
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Property exists but holds a different variant
    #[error("Property '{key}' has type {found}, expected {expected}")]
    TypeMismatch {
        key: String,
        expected: &'static str,
        found: &'static str,
    },

    /// Property is absent from the bag
    #[error("Property missing: {0}")]
    PropertyMissing(String),

    /// Transaction could not begin or commit
    #[error("Transaction failed: {0}")]
    TransactionError(String),

    /// Cancellation token was triggered
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    /// Analysis deadline elapsed
    #[error("Deadline exceeded: {0}")]
    DeadlineExceeded(String),

    /// Relational store error
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Parse error
    #[error("Failed to parse data: {0}")]
    ParseError(String),

    /// Internal error
    #[error("Internal error: {0}")]
    InternalError(String),

    /// A post-processing pass failed
    #[error("Pass {pass} failed: {reason}")]
    PassFailed { pass: String, reason: String },
}

impl AnalysisError {
    /// True for errors raised by the cancellation context
    pub fn is_cancellation(&self) -> bool {
        matches!(self, AnalysisError::Cancelled(_) | AnalysisError::DeadlineExceeded(_))
    }

    /// Short category label safe to surface to API consumers
    pub fn category(&self) -> &'static str {
        match self {
            AnalysisError::QueryError(_) | AnalysisError::MalformedCriteria(_) => "query",
            AnalysisError::NotFound(_) => "not_found",
            AnalysisError::TypeMismatch { .. } | AnalysisError::PropertyMissing(_) => "data_quality",
            AnalysisError::TransactionError(_) => "transaction",
            AnalysisError::Cancelled(_) | AnalysisError::DeadlineExceeded(_) => "cancelled",
            AnalysisError::DatabaseError(_) => "database",
            AnalysisError::ConfigError(_) => "config",
            AnalysisError::ParseError(_) => "parse",
            AnalysisError::InternalError(_) => "internal",
            AnalysisError::PassFailed { .. } => "pass",
        }
    }
}

impl From<anyhow::Error> for AnalysisError {
    fn from(err: anyhow::Error) -> Self {
        AnalysisError::InternalError(err.to_string())
    }
}

impl From<std::io::Error> for AnalysisError {
    fn from(err: std::io::Error) -> Self {
        AnalysisError::InternalError(format!("I/O error: {}", err))
    }
}

impl From<serde_json::Error> for AnalysisError {
    fn from(err: serde_json::Error) -> Self {
        AnalysisError::ParseError(format!("JSON parse error: {}", err))
    }
}

impl From<toml::de::Error> for AnalysisError {
    fn from(err: toml::de::Error) -> Self {
        AnalysisError::ConfigError(format!("TOML parse error: {}", err))
    }
}

impl From<rusqlite::Error> for AnalysisError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::QueryReturnedNoRows => {
                AnalysisError::NotFound("Query returned no rows".to_string())
            }
            _ => AnalysisError::DatabaseError(err.to_string()),
        }
    }
}

/// Result type alias for analysis operations
pub type Result<T> = std::result::Result<T, AnalysisError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AnalysisError::QueryError("test".to_string());
        assert_eq!(err.to_string(), "Graph query failed: test");

        let err = AnalysisError::TypeMismatch {
            key: "enforced".to_string(),
            expected: "bool",
            found: "string",
        };
        assert_eq!(err.to_string(), "Property 'enforced' has type string, expected bool");

        let err = AnalysisError::PassFailed {
            pass: "PostDCSync".to_string(),
            reason: "boom".to_string(),
        };
        assert_eq!(err.to_string(), "Pass PostDCSync failed: boom");
    }

    #[test]
    fn test_cancellation_classification() {
        assert!(AnalysisError::Cancelled("x".to_string()).is_cancellation());
        assert!(AnalysisError::DeadlineExceeded("x".to_string()).is_cancellation());
        assert!(!AnalysisError::NotFound("x".to_string()).is_cancellation());
        assert_eq!(AnalysisError::PropertyMissing("objectid".to_string()).category(), "data_quality");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: AnalysisError = io_err.into();
        assert!(matches!(err, AnalysisError::InternalError(_)));
    }

    #[test]
    fn test_anyhow_error_conversion() {
        let anyhow_err = anyhow::anyhow!("something went wrong");
        let err: AnalysisError = anyhow_err.into();
        assert!(matches!(err, AnalysisError::InternalError(_)));
    }

    #[test]
    fn test_rusqlite_no_rows_maps_to_not_found() {
        let err: AnalysisError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, AnalysisError::NotFound(_)));
    }
}
