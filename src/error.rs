//! Central error types for the cloud node operator
//!
//! Uses `thiserror` for ergonomic, type-safe error handling with
//! automatic `Display` and `Error` trait implementations.

use thiserror::Error;

use crate::cloud::CloudError;

/// Central error type for the operator
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error from kube-rs
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Error surfaced by a cloud provider lookup
    #[error("Cloud provider error: {0}")]
    CloudError(#[from] CloudError),

    /// The node has no providerID, so cloud enrichment cannot proceed
    #[error("node {0} does not have a providerID set")]
    MissingProviderId(String),

    /// The taint annotation on a node could not be decoded
    #[error("could not decode taints for node {node}: {reason}")]
    TaintDecode { node: String, reason: String },

    /// A write was attempted against a node snapshot without a revision
    #[error("node {node} carries no resourceVersion; refusing blind overwrite")]
    MissingResourceVersion { node: String },

    /// The operator-supplied node IP was not found among cloud addresses
    #[error("no cloud address for node {node} matches the provided IP {ip}")]
    ProvidedIpNotFound { node: String, ip: String },

    /// Configuration validation error
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Result type alias for operator operations
pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Check if this error type should trigger a retry
    ///
    /// Update conflicts and transient API failures are retried without
    /// being distinguished from each other. Cloud lookup failures and
    /// per-node validation failures are not; the next tick or add-event
    /// retries those naturally.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Error::KubeError(_))
    }
}
