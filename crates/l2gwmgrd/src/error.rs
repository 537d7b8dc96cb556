//! Error types for l2gwmgrd operations.

use sonic_l2gw_common::JobError;
use sonic_l2gw_types::{DeviceId, ParseError};
use std::io;
use thiserror::Error;

/// Result type alias for l2gwmgrd operations.
pub type Result<T> = std::result::Result<T, L2gwError>;

/// Errors raised by collaborators and local state handling.
#[derive(Debug, Error)]
pub enum L2gwError {
    /// Data store read or write failed.
    #[error("Data store operation failed: {operation}: {message}")]
    Store {
        /// The operation that failed (e.g. "read", "write_batch").
        operation: String,
        /// Error message.
        message: String,
    },

    /// Tunnel/egress resolution RPC failed.
    #[error("RPC failed: {operation}: {message}")]
    Rpc {
        /// The RPC that failed.
        operation: String,
        /// Error message.
        message: String,
    },

    /// Flow or group programming failed.
    #[error("Flow programming failed: {operation}: {message}")]
    Flow {
        /// The operation that failed.
        operation: String,
        /// Error message.
        message: String,
    },

    /// Configuration could not be loaded or is invalid.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// HA relationship rejected by the topology index.
    #[error("Invalid HA relationship {parent} -> {child}: {reason}")]
    InvalidHaRelationship {
        /// Parent device.
        parent: DeviceId,
        /// Child device.
        child: DeviceId,
        /// Why the relationship was refused.
        reason: String,
    },

    /// Identifier parsing failed.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// File I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON encoding or decoding failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error (unexpected state).
    #[error("Internal error: {message}")]
    Internal {
        /// Error message.
        message: String,
    },
}

impl L2gwError {
    /// Creates a data store error.
    pub fn store(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Store {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Creates an RPC error.
    pub fn rpc(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Rpc {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Creates a flow programming error.
    pub fn flow(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Flow {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid HA relationship error.
    pub fn invalid_ha(parent: &DeviceId, child: &DeviceId, reason: impl Into<String>) -> Self {
        Self::InvalidHaRelationship {
            parent: parent.clone(),
            child: child.clone(),
            reason: reason.into(),
        }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this error comes from a remote collaborator and may
    /// succeed on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            L2gwError::Store { .. } | L2gwError::Rpc { .. } | L2gwError::Flow { .. }
        )
    }
}

impl From<L2gwError> for JobError {
    fn from(err: L2gwError) -> Self {
        match err {
            L2gwError::Store { operation, message }
            | L2gwError::Rpc { operation, message }
            | L2gwError::Flow { operation, message } => JobError::Remote { operation, message },
            other => JobError::internal(other.to_string()),
        }
    }
}
