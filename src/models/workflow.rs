// Workflow execution types exposed to API callers

//! # Workflow Execution Types
//!
//! The API-facing view of a workflow run. A [`Workflow`] is a projection of the
//! engine's [`WorkflowResource`]: identity, timestamps, phase and (for detailed
//! reads) the full serialized resource as `manifest`.
//!
//! A workflow remembers the template version that produced it through two
//! labels stamped at creation time:
//! - [`WORKFLOW_TEMPLATE_UID_LABEL`]
//! - [`WORKFLOW_TEMPLATE_VERSION_LABEL`]

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::manifest::WorkflowResource;

/// Label carrying the UID of the template a workflow was created from
pub const WORKFLOW_TEMPLATE_UID_LABEL: &str = "onepanel.io/workflow-template-uid";

/// Label carrying the template version a workflow was created from
pub const WORKFLOW_TEMPLATE_VERSION_LABEL: &str = "onepanel.io/workflow-template-version";

/// Execution phase reported by the workflow engine
///
/// Phases the engine may add later are kept verbatim in `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum WorkflowPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Error,
    Other(String),
}

impl WorkflowPhase {
    pub fn as_str(&self) -> &str {
        match self {
            WorkflowPhase::Pending => "Pending",
            WorkflowPhase::Running => "Running",
            WorkflowPhase::Succeeded => "Succeeded",
            WorkflowPhase::Failed => "Failed",
            WorkflowPhase::Error => "Error",
            WorkflowPhase::Other(phase) => phase,
        }
    }

    /// Failed and Error are the only phases a workflow can be retried from
    pub fn is_retryable(&self) -> bool {
        matches!(self, WorkflowPhase::Failed | WorkflowPhase::Error)
    }
}

impl From<String> for WorkflowPhase {
    fn from(phase: String) -> Self {
        match phase.as_str() {
            "Pending" => WorkflowPhase::Pending,
            "Running" => WorkflowPhase::Running,
            "Succeeded" => WorkflowPhase::Succeeded,
            "Failed" => WorkflowPhase::Failed,
            "Error" => WorkflowPhase::Error,
            _ => WorkflowPhase::Other(phase),
        }
    }
}

impl From<WorkflowPhase> for String {
    fn from(phase: WorkflowPhase) -> Self {
        match phase {
            WorkflowPhase::Other(phase) => phase,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for WorkflowPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored, versioned workflow template
///
/// Templates are immutable per version and referenced by UID + version.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowTemplate {
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: i32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub manifest: String,
}

/// A name/value pair passed to a workflow at submission
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowParameter {
    pub name: String,
    #[serde(default)]
    pub value: String,
}

impl WorkflowParameter {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A workflow run as returned to API callers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<WorkflowPhase>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub manifest: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<WorkflowParameter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_template: Option<WorkflowTemplate>,
}

impl Workflow {
    /// Identity, phase and timestamps of a resource, without its manifest
    pub fn summary(resource: &WorkflowResource) -> Self {
        let status = resource.status.as_ref();
        Self {
            uid: resource.metadata.uid.clone(),
            name: resource.metadata.name.clone(),
            created_at: resource.metadata.creation_timestamp,
            started_at: status.and_then(|s| s.started_at),
            finished_at: status.and_then(|s| s.finished_at),
            phase: status.and_then(|s| s.phase.clone()),
            ..Default::default()
        }
    }

    /// Summary of a resource with the serialized resource attached
    pub fn with_manifest(resource: &WorkflowResource) -> serde_json::Result<Self> {
        let manifest = serde_json::to_string(resource)?;
        Ok(Self {
            manifest,
            ..Self::summary(resource)
        })
    }

    /// The snapshot emitted while watching: UID, name and serialized resource
    pub fn snapshot(resource: &WorkflowResource) -> serde_json::Result<Self> {
        Ok(Self {
            uid: resource.metadata.uid.clone(),
            name: resource.metadata.name.clone(),
            manifest: serde_json::to_string(resource)?,
            ..Default::default()
        })
    }
}

/// Per-submission overrides applied to a parsed workflow definition
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkflowOptions {
    pub name: Option<String>,
    pub generate_name: Option<String>,
    pub entrypoint: Option<String>,
    pub service_account: Option<String>,
    pub pod_gc_strategy: Option<String>,
    pub labels: Option<BTreeMap<String, String>>,
    pub parameters: Vec<WorkflowParameter>,
}

/// One line of container output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    pub content: String,
}

impl LogEntry {
    /// Split a raw log line into an optional RFC3339 timestamp and content
    ///
    /// The timestamp is only recognised as the first space-separated token;
    /// anything else keeps the whole line as content.
    pub fn parse(line: &str) -> Self {
        let (head, rest) = line.split_once(' ').unwrap_or((line, ""));
        match DateTime::parse_from_rfc3339(head) {
            Ok(timestamp) => Self {
                timestamp: Some(timestamp.with_timezone(&Utc)),
                content: rest.to_string(),
            },
            Err(_) => Self {
                timestamp: None,
                content: line.to_string(),
            },
        }
    }
}

/// A single metric recorded by a workflow step
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub value: f64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub format: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}
