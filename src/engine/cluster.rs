// Collaborator interfaces for the cluster APIs

//! # Cluster Interfaces
//!
//! The control plane talks to two cluster APIs, each behind a narrow async
//! trait so it can be replaced independently:
//! - [`WorkflowEngine`]: the workflow engine's custom resources
//! - [`ClusterCore`]: secrets, config maps, pod logs, service accounts and
//!   access reviews
//!
//! Both return [`ClusterError`], which keeps the HTTP status reported by the
//! cluster so callers can tell "not found" from other failures.

use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::io::AsyncRead;

use crate::models::{ObjectMeta, WorkflowResource};
use crate::ErrorCode;

/// Error reported by a cluster API
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason} ({status}): {message}")]
pub struct ClusterError {
    /// HTTP status of the failed call; 0 when the call never got a response
    pub status: u16,
    pub reason: String,
    pub message: String,
}

impl ClusterError {
    pub fn new(status: u16, reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            reason: reason.into(),
            message: message.into(),
        }
    }

    pub fn not_found(kind: &str, name: &str) -> Self {
        Self::new(404, "NotFound", format!("{} \"{}\" not found", kind, name))
    }

    pub fn already_exists(kind: &str, name: &str) -> Self {
        Self::new(409, "AlreadyExists", format!("{} \"{}\" already exists", kind, name))
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(422, "Invalid", message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(400, "BadRequest", message)
    }

    /// The request never produced a cluster response
    pub fn transport(err: impl std::fmt::Display) -> Self {
        Self::new(0, "Transport", err.to_string())
    }

    /// The cluster responded with something we could not decode
    pub fn decode(err: impl std::fmt::Display) -> Self {
        Self::new(0, "Decode", err.to_string())
    }

    pub fn is_not_found(&self) -> bool {
        self.status == 404 || self.reason == "NotFound"
    }

    pub fn code(&self) -> ErrorCode {
        match self.status {
            404 => ErrorCode::NotFound,
            403 => ErrorCode::PermissionDenied,
            401 => ErrorCode::Unauthenticated,
            400 | 422 => ErrorCode::InvalidArgument,
            _ => ErrorCode::Unknown,
        }
    }
}

pub type ClusterResult<T> = std::result::Result<T, ClusterError>;

/// A change to a watched workflow
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "object", rename_all = "UPPERCASE")]
pub enum WatchEvent {
    Added(WorkflowResource),
    Modified(WorkflowResource),
    Deleted(WorkflowResource),
    Bookmark(Value),
    /// The watch failed server-side; the payload is a status object
    Error(Value),
}

impl WatchEvent {
    /// The workflow carried by the event, if any
    pub fn into_resource(self) -> Option<WorkflowResource> {
        match self {
            WatchEvent::Added(resource)
            | WatchEvent::Modified(resource)
            | WatchEvent::Deleted(resource) => Some(resource),
            WatchEvent::Bookmark(_) | WatchEvent::Error(_) => None,
        }
    }
}

pub type WatchStream = BoxStream<'static, ClusterResult<WatchEvent>>;

/// Byte stream of a container's log
pub type LogReader = Box<dyn AsyncRead + Send + Unpin>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Secret {
    #[serde(default)]
    pub metadata: ObjectMeta,
    /// Base64-encoded values, as served by the cluster
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

impl Secret {
    /// Build a secret from plain values
    pub fn from_plain<K, V>(name: &str, values: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: AsRef<[u8]>,
    {
        Self {
            metadata: ObjectMeta {
                name: name.to_string(),
                ..Default::default()
            },
            data: values
                .into_iter()
                .map(|(key, value)| (key.into(), STANDARD.encode(value)))
                .collect(),
        }
    }

    pub fn decoded(&self, key: &str) -> Option<std::result::Result<Vec<u8>, base64::DecodeError>> {
        self.data.get(key).map(|value| STANDARD.decode(value))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigMap {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectReference {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceAccount {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub secrets: Vec<ObjectReference>,
}

/// The subject of an access review
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceAttributes {
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub verb: String,
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub resource: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PodLogOptions {
    pub container: String,
    pub follow: bool,
    pub timestamps: bool,
}

/// Operations on the workflow engine's resources
#[async_trait::async_trait]
pub trait WorkflowEngine: Send + Sync {
    async fn create_workflow(
        &self,
        namespace: &str,
        workflow: &WorkflowResource,
    ) -> ClusterResult<WorkflowResource>;

    async fn get_workflow(&self, namespace: &str, name: &str) -> ClusterResult<WorkflowResource>;

    /// List workflows matching a label selector; an empty selector lists all
    async fn list_workflows(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> ClusterResult<Vec<WorkflowResource>>;

    /// Watch a single workflow by name
    async fn watch_workflow(&self, namespace: &str, name: &str) -> ClusterResult<WatchStream>;

    async fn validate_workflow(&self, namespace: &str, workflow: &WorkflowResource)
        -> ClusterResult<()>;

    async fn retry_workflow(&self, namespace: &str, name: &str) -> ClusterResult<WorkflowResource>;

    async fn resubmit_workflow(&self, namespace: &str, name: &str)
        -> ClusterResult<WorkflowResource>;

    async fn resume_workflow(&self, namespace: &str, name: &str) -> ClusterResult<WorkflowResource>;

    async fn suspend_workflow(&self, namespace: &str, name: &str) -> ClusterResult<()>;

    async fn terminate_workflow(&self, namespace: &str, name: &str) -> ClusterResult<()>;
}

/// Core cluster API operations
#[async_trait::async_trait]
pub trait ClusterCore: Send + Sync {
    async fn get_secret(&self, namespace: &str, name: &str) -> ClusterResult<Secret>;

    async fn get_config_map(&self, namespace: &str, name: &str) -> ClusterResult<ConfigMap>;

    async fn pod_logs(
        &self,
        namespace: &str,
        pod: &str,
        options: &PodLogOptions,
    ) -> ClusterResult<LogReader>;

    /// Ask whether the calling identity may perform the described action
    async fn self_subject_access_review(&self, attributes: &ResourceAttributes)
        -> ClusterResult<bool>;

    async fn list_service_accounts(&self, namespace: &str) -> ClusterResult<Vec<ServiceAccount>>;
}
