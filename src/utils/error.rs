//! Error handling for the control plane
//!
//! This module defines all error types used throughout the control plane.

use thiserror::Error;

/// Result type alias for the control plane
pub type Result<T> = std::result::Result<T, ControlPlaneError>;

/// Main error type for the control plane
#[derive(Error, Debug)]
pub enum ControlPlaneError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Validation errors (malformed request, rejected before any state mutation)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Conflict errors (wrong current state for the requested transition)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Not found errors (resource absent, distinct from validation/conflict)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Lock contention (another lifecycle operation holds the lock)
    #[error("Lock contention: {0}")]
    LockContention(String),

    /// Optimistic concurrency mismatch (etag precondition or value re-check failed)
    #[error("Concurrency error: {0}")]
    Concurrency(String),

    /// Deployment controller errors (remote call failure, timeout, protocol violation)
    #[error("Controller error: {0}")]
    Controller(String),

    /// Blob storage errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Redis errors
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// HTTP client errors
    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ControlPlaneError {
    /// Validation error from any displayable message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Conflict error from any displayable message
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Not-found error for a resource URL
    pub fn not_found(url: impl Into<String>) -> Self {
        Self::NotFound(url.into())
    }

    /// True for errors that indicate the resource does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
