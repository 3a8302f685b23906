// Workflow Control Plane
// Lifecycle, streaming and authentication layer on top of a cluster workflow engine

//! # Control Plane Library
//!
//! This is the library root for the workflow control plane. It sits between
//! API callers and the cluster's workflow engine: every request is
//! authenticated by the [`AuthInterceptor`], which builds a request-scoped
//! [`AuthenticatedSession`]; the session's [`WorkflowClient`] then performs the
//! lifecycle operation against the engine.
//!
//! ## Core Components
//!
//! ### Domain Models (`models`)
//! - [`Workflow`], [`WorkflowTemplate`], [`WorkflowParameter`]: API-facing types
//! - [`WorkflowResource`]: the engine's declarative workflow manifest
//! - [`LogEntry`] / [`Metric`]: streamed log lines and decoded step metrics
//!
//! ### Engine Layer (`engine`)
//! - Narrow collaborator traits: [`WorkflowEngine`], [`ClusterCore`],
//!   [`ObjectStorage`], [`TemplateStore`]
//! - [`ManifestFieldInjector`]: deployment defaults applied before submission
//! - [`WorkflowClient`]: create/get/list/watch/control operations, log and
//!   metrics retrieval
//! - [`KubeClient`] / [`S3Client`]: HTTP implementations of the collaborators
//! - [`InMemoryCluster`]: in-process collaborators for development and tests
//!
//! ### API Layer (`api`)
//! - [`AuthInterceptor`]: token extraction, login check, authorization check
//! - [`ControlPlaneServer`]: axum router exposing the workflow RPCs
//!
//! ## Error Model
//!
//! Every failure that reaches a caller is classified into one of the
//! [`ErrorCode`] kinds. Call sites log the underlying error with
//! namespace/name context and return only the kind with a generic message.

pub mod api;
pub mod config;
pub mod engine;
pub mod models;

pub use models::{
    LogEntry, Metric, Workflow, WorkflowOptions, WorkflowParameter, WorkflowPhase,
    WorkflowResource, WorkflowTemplate,
};

pub use engine::{
    ClusterCore, ClusterError, InMemoryCluster, InMemoryTemplateStore, KubeClient,
    ManifestFieldInjector, ObjectStorage, S3Client, StorageError, TemplateStore, WorkflowClient,
    WorkflowClientConfig, WorkflowEngine,
};

pub use api::{
    auth::{AuthInterceptor, AuthenticatedSession},
    ControlPlaneServer, ControlPlaneServerBuilder, ServerConfig,
};

pub use config::Settings;

use serde::Serialize;
use thiserror::Error;

/// Classified outcome kinds surfaced to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorCode {
    NotFound,
    InvalidArgument,
    PermissionDenied,
    Unauthenticated,
    Unknown,
}

impl ErrorCode {
    /// Generic message used when an unclassified error reaches a caller
    pub fn generic_message(self) -> &'static str {
        match self {
            ErrorCode::NotFound => "Resource not found.",
            ErrorCode::InvalidArgument => "Invalid argument.",
            ErrorCode::PermissionDenied => "Permission denied.",
            ErrorCode::Unauthenticated => "Unauthenticated.",
            ErrorCode::Unknown => "Unknown error.",
        }
    }
}

/// Error type for control plane operations
///
/// The first five variants are already classified: their message is safe to
/// return to callers. The wrapped variants carry downstream failures that are
/// classified through [`ControlPlaneError::code`] and never shown verbatim.
#[derive(Error, Debug)]
pub enum ControlPlaneError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    InvalidArgument(String),

    #[error("{0}")]
    PermissionDenied(String),

    #[error("{0}")]
    Unauthenticated(String),

    #[error("{0}")]
    Unknown(String),

    /// Cluster API failures (workflow engine or core API)
    #[error("Cluster error: {0}")]
    Cluster(#[from] ClusterError),

    /// Object storage failures
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Manifest (YAML) parsing errors
    #[error("Manifest error: {0}")]
    Manifest(#[from] serde_yaml::Error),

    /// Template store errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl ControlPlaneError {
    /// The classified kind of this error
    pub fn code(&self) -> ErrorCode {
        match self {
            ControlPlaneError::NotFound(_) => ErrorCode::NotFound,
            ControlPlaneError::InvalidArgument(_) => ErrorCode::InvalidArgument,
            ControlPlaneError::PermissionDenied(_) => ErrorCode::PermissionDenied,
            ControlPlaneError::Unauthenticated(_) => ErrorCode::Unauthenticated,
            ControlPlaneError::Unknown(_) => ErrorCode::Unknown,
            ControlPlaneError::Cluster(err) => err.code(),
            ControlPlaneError::Storage(err) => err.code(),
            ControlPlaneError::Serialization(_) | ControlPlaneError::Manifest(_) => {
                ErrorCode::InvalidArgument
            }
            ControlPlaneError::Database(_) => ErrorCode::Unknown,
        }
    }

    /// Message that may be returned to a caller
    pub fn public_message(&self) -> String {
        match self {
            ControlPlaneError::NotFound(message)
            | ControlPlaneError::InvalidArgument(message)
            | ControlPlaneError::PermissionDenied(message)
            | ControlPlaneError::Unauthenticated(message)
            | ControlPlaneError::Unknown(message) => message.clone(),
            other => other.code().generic_message().to_string(),
        }
    }
}

/// Type alias for Results that use the control plane error type
pub type Result<T> = std::result::Result<T, ControlPlaneError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classified_errors_keep_their_message() {
        let err = ControlPlaneError::NotFound("Workflow not found.".to_string());
        assert_eq!(err.code(), ErrorCode::NotFound);
        assert_eq!(err.public_message(), "Workflow not found.");
    }

    #[test]
    fn test_cluster_errors_are_not_passed_through() {
        let err: ControlPlaneError =
            ClusterError::new(403, "Forbidden", "workflows is forbidden: user x").into();
        assert_eq!(err.code(), ErrorCode::PermissionDenied);
        assert_eq!(err.public_message(), "Permission denied.");
    }
}
