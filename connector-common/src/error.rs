//! Standardized error handling for the payment connector
//!
//! This module defines the error type every connector surface returns. Each
//! adapter crate keeps its own precise error enum (node RPC failures, crafting
//! failures, lightning failures) and converts into [`ConnectorError`] at the
//! capability-interface boundary, so the platform can reason about a single
//! taxonomy: what category a failure belongs to and whether it is worth
//! retrying.
//!
//! # Usage
//!
//! ```
//! use connector_common::error::{ConnectorError, ConnectorResult, node_error};
//!
//! fn list_something() -> ConnectorResult<()> {
//!     Err(node_error("listunspent failed"))
//! }
//!
//! let err = list_something().unwrap_err();
//! assert!(err.is_retryable());
//! ```

use std::error::Error as StdError;
use std::io;
use thiserror::Error;

type BoxedSource = Box<dyn StdError + Send + Sync>;

/// The main error type of the connector surface
///
/// This enum categorizes all failures an adapter can report to the platform,
/// keeping the node-facing cause available through `source()`.
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// Selection cannot cover the amount plus fee
    #[error("Insufficient funds: need {needed} only have {available} available")]
    InsufficientFunds { needed: u64, available: u64 },

    /// A node RPC failed
    #[error("Node query error: {context}")]
    NodeQuery {
        context: String,
        #[source]
        source: Option<BoxedSource>,
    },

    /// Locking a selected output at the node failed
    #[error("Lock error: {context}")]
    Lock {
        context: String,
        #[source]
        source: Option<BoxedSource>,
    },

    /// The operation ran past its deadline
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Malformed or out of range amount
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Malformed address or address for another network
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Malformed, expired or mismatching lightning invoice
    #[error("Invalid invoice: {0}")]
    InvalidInvoice(String),

    /// Any other validation failure of caller supplied data
    #[error("Validation error: {0}")]
    Validation(String),

    /// Payment could not be delivered
    #[error("Payment error: {0}")]
    Payment(String),

    /// Configuration errors
    #[error("Configuration error: {context}")]
    Config {
        context: String,
        #[source]
        source: Option<BoxedSource>,
    },

    /// I/O errors
    #[error("I/O error: {context}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    /// Serialization/deserialization errors
    #[error("Serialization error: {context}")]
    Serialization {
        context: String,
        #[source]
        source: Option<BoxedSource>,
    },

    /// Unexpected errors that don't fit other categories
    #[error("Unexpected error: {context}")]
    Unexpected {
        context: String,
        #[source]
        source: Option<BoxedSource>,
    },
}

/// Error category for logging purposes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Funds,
    Node,
    Lock,
    Timeout,
    Validation,
    Payment,
    Config,
    Io,
    Serialization,
    Unexpected,
}

impl ErrorCategory {
    /// Convert the error category to a string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Funds => "Funds",
            ErrorCategory::Node => "Node",
            ErrorCategory::Lock => "Lock",
            ErrorCategory::Timeout => "Timeout",
            ErrorCategory::Validation => "Validation",
            ErrorCategory::Payment => "Payment",
            ErrorCategory::Config => "Config",
            ErrorCategory::Io => "Io",
            ErrorCategory::Serialization => "Serialization",
            ErrorCategory::Unexpected => "Unexpected",
        }
    }
}

impl ConnectorError {
    /// Get the category of this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            ConnectorError::InsufficientFunds { .. } => ErrorCategory::Funds,
            ConnectorError::NodeQuery { .. } => ErrorCategory::Node,
            ConnectorError::Lock { .. } => ErrorCategory::Lock,
            ConnectorError::Timeout(_) => ErrorCategory::Timeout,
            ConnectorError::InvalidAmount(_)
            | ConnectorError::InvalidAddress(_)
            | ConnectorError::InvalidInvoice(_)
            | ConnectorError::Validation(_) => ErrorCategory::Validation,
            ConnectorError::Payment(_) => ErrorCategory::Payment,
            ConnectorError::Config { .. } => ErrorCategory::Config,
            ConnectorError::Io { .. } => ErrorCategory::Io,
            ConnectorError::Serialization { .. } => ErrorCategory::Serialization,
            ConnectorError::Unexpected { .. } => ErrorCategory::Unexpected,
        }
    }

    /// Whether the caller may retry the same request unchanged
    ///
    /// Node, lock and timeout failures depend on transient node state.
    /// Insufficient funds and validation failures do not heal by retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Node | ErrorCategory::Lock | ErrorCategory::Timeout | ErrorCategory::Io
        )
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        ConnectorError::Validation(message.into())
    }
}

/// Create a new node query error with context
pub fn node_error<S: Into<String>>(context: S) -> ConnectorError {
    ConnectorError::NodeQuery {
        context: context.into(),
        source: None,
    }
}

/// Create a new node query error with context and source
pub fn node_error_with_source<S: Into<String>, E: StdError + Send + Sync + 'static>(
    context: S,
    source: E,
) -> ConnectorError {
    ConnectorError::NodeQuery {
        context: context.into(),
        source: Some(Box::new(source)),
    }
}

/// Create a new lock error with context and source
pub fn lock_error_with_source<S: Into<String>, E: StdError + Send + Sync + 'static>(
    context: S,
    source: E,
) -> ConnectorError {
    ConnectorError::Lock {
        context: context.into(),
        source: Some(Box::new(source)),
    }
}

/// Create a new configuration error with context
pub fn config_error<S: Into<String>>(context: S) -> ConnectorError {
    ConnectorError::Config {
        context: context.into(),
        source: None,
    }
}

/// Type alias for a Result with ConnectorError
pub type ConnectorResult<T> = Result<T, ConnectorError>;

impl From<io::Error> for ConnectorError {
    fn from(err: io::Error) -> Self {
        ConnectorError::Io {
            context: err.to_string(),
            source: err,
        }
    }
}

impl From<serde_json::Error> for ConnectorError {
    fn from(err: serde_json::Error) -> Self {
        ConnectorError::Serialization {
            context: format!("JSON serialization error: {}", err),
            source: Some(Box::new(err)),
        }
    }
}

impl From<bitcoin::consensus::encode::Error> for ConnectorError {
    fn from(err: bitcoin::consensus::encode::Error) -> Self {
        ConnectorError::Serialization {
            context: format!("Transaction serialization error: {}", err),
            source: Some(Box::new(err)),
        }
    }
}

impl From<bitcoin::address::Error> for ConnectorError {
    fn from(err: bitcoin::address::Error) -> Self {
        ConnectorError::InvalidAddress(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_categories() {
        assert!(node_error("down").is_retryable());
        assert!(ConnectorError::Timeout("lock".into()).is_retryable());
        assert!(!ConnectorError::InsufficientFunds { needed: 2, available: 1 }.is_retryable());
        assert!(!ConnectorError::InvalidAmount("x".into()).is_retryable());
    }

    #[test]
    fn test_source_is_preserved() {
        let io_err = io::Error::new(io::ErrorKind::Other, "connection reset");
        let err = node_error_with_source("listunspent", io_err);
        assert_eq!(err.category(), ErrorCategory::Node);
        assert!(err.source().is_some());
        assert_eq!(err.to_string(), "Node query error: listunspent");
    }

    #[test]
    fn test_insufficient_funds_message() {
        let err = ConnectorError::InsufficientFunds { needed: 600, available: 500 };
        assert_eq!(err.to_string(), "Insufficient funds: need 600 only have 500 available");
        assert_eq!(err.category().as_str(), "Funds");
    }
}
