//! Error types for update trees, transactions and backends.

use crate::location::Location;
use std::time::Duration;
use thiserror::Error;

/// Structural errors raised by update-tree operations.
///
/// Inside a [`Transaction`](crate::Transaction) these are programmer errors and
/// abort the offending call. The mirror store reports them as
/// [`CanopyError::Tree`] instead, because its input comes from a backend call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    #[error("Insert value higher than earlier written values at {0}")]
    InsertAboveSubtree(Location),

    #[error("Insert lower than an earlier written single value at {0}")]
    InsertBelowValue(Location),

    #[error("Cannot merge a value node with a branch node at {0}")]
    KindMismatch(Location),

    #[error("Maximum depth {max} exceeded at {location}")]
    DepthExceeded { location: Location, max: usize },

    #[error("{location} is not a descendant of {ancestor}")]
    UnrelatedLocation { location: Location, ancestor: Location },

    #[error("Location must be rooted: {0}")]
    NotRooted(Location),
}

/// Main error type for recoverable failures.
#[derive(Debug, Error)]
pub enum CanopyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Load of {location} timed out after {timeout:?}")]
    Timeout { location: Location, timeout: Duration },

    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("Preconditions failed: {0:?}")]
    Preconditions(Vec<CanopyError>),

    #[error("Precondition dropped without being resolved")]
    PreconditionAbandoned,

    #[error("Commit of empty transaction")]
    EmptyTransaction,

    #[error("Observer removed from {0}")]
    Unobserved(Location),

    #[error("Tree error: {0}")]
    Tree(#[from] TreeError),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Invalid snapshot format: {0}")]
    InvalidFormat(String),
}

impl CanopyError {
    /// Convenience constructor for precondition failures.
    pub fn precondition(message: impl Into<String>) -> Self {
        CanopyError::Precondition(message.into())
    }

    /// Convenience constructor for backend failures.
    pub fn backend(message: impl Into<String>) -> Self {
        CanopyError::Backend(message.into())
    }
}

impl From<serde_json::Error> for CanopyError {
    fn from(e: serde_json::Error) -> Self {
        CanopyError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for CanopyError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        CanopyError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for CanopyError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        CanopyError::Deserialization(e.to_string())
    }
}

/// Result type for fallible canopy operations.
pub type Result<T> = std::result::Result<T, CanopyError>;
