//! Errors surfaced by the orchestration API seam.

use thiserror::Error;

/// Failure of a single list/create/delete/read call against the cluster.
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("{kind} {namespace}/{name} already exists")]
    AlreadyExists { kind: String, namespace: String, name: String },

    #[error("{kind} {namespace}/{name} not found")]
    NotFound { kind: String, namespace: String, name: String },

    #[error("api error: {0}")]
    Api(String),
}

impl ClusterError {
    pub fn is_already_exists(&self) -> bool { matches!(self, ClusterError::AlreadyExists { .. }) }

    pub fn is_not_found(&self) -> bool { matches!(self, ClusterError::NotFound { .. }) }

    pub fn already_exists(kind: &str, namespace: &str, name: &str) -> Self {
        ClusterError::AlreadyExists { kind: kind.to_string(), namespace: namespace.to_string(), name: name.to_string() }
    }

    pub fn not_found(kind: &str, namespace: &str, name: &str) -> Self {
        ClusterError::NotFound { kind: kind.to_string(), namespace: namespace.to_string(), name: name.to_string() }
    }
}
