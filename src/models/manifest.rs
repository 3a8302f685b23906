// Workflow manifests in the engine's declarative format

//! # Workflow Manifests
//!
//! Typed view of the workflow engine's resource format (`argoproj.io/v1alpha1`
//! `Workflow`). Only the fields the control plane reads or mutates are typed;
//! every other field is carried through untouched in a flattened `extra` map,
//! so a manifest survives a parse/serialize cycle without losing content.
//!
//! ## Parsing
//!
//! [`parse_workflows`] accepts a single JSON document or a multi-document YAML
//! stream. In strict mode, keys the engine does not define are rejected for
//! the resource root, its metadata, its spec, every template and every
//! template container.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::workflow::{WorkflowParameter, WorkflowPhase};
use crate::{ControlPlaneError, Result};

/// Kind of the engine's workflow resource
pub const WORKFLOW_KIND: &str = "Workflow";

/// Label marking a workflow the engine has finished processing
pub const COMPLETED_LABEL: &str = "workflows.argoproj.io/completed";

/// Label mirroring the workflow phase
pub const PHASE_LABEL: &str = "workflows.argoproj.io/phase";

/// Label recording the workflow a resubmission was formulated from
pub const RESUBMITTED_FROM_LABEL: &str = "workflows.argoproj.io/resubmitted-from-workflow";

const ROOT_FIELDS: &[&str] = &["apiVersion", "kind", "metadata", "spec", "status"];

const METADATA_FIELDS: &[&str] = &[
    "name",
    "generateName",
    "namespace",
    "selfLink",
    "uid",
    "resourceVersion",
    "generation",
    "creationTimestamp",
    "deletionTimestamp",
    "deletionGracePeriodSeconds",
    "labels",
    "annotations",
    "ownerReferences",
    "finalizers",
    "clusterName",
    "managedFields",
];

const SPEC_FIELDS: &[&str] = &[
    "templates",
    "entrypoint",
    "arguments",
    "serviceAccountName",
    "automountServiceAccountToken",
    "executor",
    "volumes",
    "volumeClaimTemplates",
    "parallelism",
    "artifactRepositoryRef",
    "suspend",
    "nodeSelector",
    "affinity",
    "tolerations",
    "imagePullSecrets",
    "hostNetwork",
    "dnsPolicy",
    "dnsConfig",
    "onExit",
    "ttlSecondsAfterFinished",
    "ttlStrategy",
    "activeDeadlineSeconds",
    "priority",
    "schedulerName",
    "podGC",
    "podPriorityClassName",
    "podPriority",
    "hostAliases",
    "securityContext",
    "podSpecPatch",
    "podDisruptionBudget",
    "metrics",
    "shutdown",
    "workflowTemplateRef",
    "synchronization",
    "volumeClaimGC",
    "retryStrategy",
];

const TEMPLATE_FIELDS: &[&str] = &[
    "name",
    "template",
    "arguments",
    "templateRef",
    "inputs",
    "outputs",
    "nodeSelector",
    "affinity",
    "metadata",
    "daemon",
    "steps",
    "container",
    "script",
    "resource",
    "dag",
    "suspend",
    "volumes",
    "initContainers",
    "sidecars",
    "archiveLocation",
    "activeDeadlineSeconds",
    "retryStrategy",
    "parallelism",
    "tolerations",
    "schedulerName",
    "priorityClassName",
    "priority",
    "serviceAccountName",
    "automountServiceAccountToken",
    "executor",
    "hostAliases",
    "securityContext",
    "podSpecPatch",
    "resubmitPendingPods",
    "metrics",
    "timeout",
    "synchronization",
    "data",
    "http",
    "containerSet",
    "memoize",
    "failFast",
];

const CONTAINER_FIELDS: &[&str] = &[
    "name",
    "image",
    "command",
    "args",
    "workingDir",
    "ports",
    "envFrom",
    "env",
    "resources",
    "volumeMounts",
    "volumeDevices",
    "livenessProbe",
    "readinessProbe",
    "startupProbe",
    "lifecycle",
    "terminationMessagePath",
    "terminationMessagePolicy",
    "imagePullPolicy",
    "securityContext",
    "stdin",
    "stdinOnce",
    "tty",
];

/// The engine's workflow resource
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowResource {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: WorkflowSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<WorkflowStatus>,
}

impl WorkflowResource {
    pub fn phase(&self) -> Option<&WorkflowPhase> {
        self.status.as_ref().and_then(|status| status.phase.as_ref())
    }

    /// A workflow is finished once the engine has stamped its finish time
    pub fn is_finished(&self) -> bool {
        self.status
            .as_ref()
            .map_or(false, |status| status.finished_at.is_some())
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.metadata.labels.get(key).map(String::as_str)
    }

    /// Whether the named node has reached a completed phase
    pub fn node_completed(&self, node: &str) -> bool {
        self.status
            .as_ref()
            .and_then(|status| status.nodes.get(node))
            .map_or(false, NodeStatus::completed)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub generate_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uid: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub resource_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creation_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSpec {
    #[serde(default)]
    pub templates: Vec<Template>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub entrypoint: String,
    #[serde(default, skip_serializing_if = "Arguments::is_empty")]
    pub arguments: Arguments,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub service_account_name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<Volume>,
    #[serde(rename = "podGC", default, skip_serializing_if = "Option::is_none")]
    pub pod_gc: Option<PodGc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suspend: Option<bool>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub shutdown: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PodGc {
    #[serde(default)]
    pub strategy: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Arguments {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<Parameter>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Arguments {
    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty() && self.extra.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl From<&WorkflowParameter> for Parameter {
    fn from(param: &WorkflowParameter) -> Self {
        Self {
            name: param.name.clone(),
            value: Some(param.value.clone()),
            extra: BTreeMap::new(),
        }
    }
}

/// A workflow volume; the source (`emptyDir`, `secret`, ...) stays untyped
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Volume {
    pub name: String,
    #[serde(flatten)]
    pub source: BTreeMap<String, Value>,
}

impl Volume {
    /// An `emptyDir` volume backed by memory
    pub fn memory_backed(name: impl Into<String>) -> Self {
        let mut source = BTreeMap::new();
        source.insert(
            "emptyDir".to_string(),
            serde_json::json!({ "medium": "Memory" }),
        );
        Self {
            name: name.into(),
            source,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub metadata: TemplateMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<Container>,
    #[serde(default, skip_serializing_if = "Outputs::is_empty")]
    pub outputs: Outputs,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<Vec<WorkflowStep>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dag: Option<DagTemplate>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemplateMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Container {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub image: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volume_mounts: Vec<VolumeMount>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub value: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeMount {
    pub name: String,
    pub mount_path: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Outputs {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<Artifact>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Outputs {
    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty() && self.extra.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub optional: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive: Option<Value>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// One entry of a `steps` template
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub template: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DagTemplate {
    #[serde(default)]
    pub tasks: Vec<DagTask>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DagTask {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub template: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<WorkflowPhase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub nodes: BTreeMap<String, NodeStatus>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// Status of one node of a running workflow, keyed by node ID (the pod name)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStatus {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(rename = "type", default, skip_serializing_if = "String::is_empty")]
    pub node_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub phase: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl NodeStatus {
    pub fn completed(&self) -> bool {
        matches!(
            self.phase.as_str(),
            "Succeeded" | "Failed" | "Error" | "Skipped" | "Omitted"
        )
    }

    pub fn succeeded(&self) -> bool {
        matches!(self.phase.as_str(), "Succeeded" | "Skipped" | "Omitted")
    }
}

/// Parse one or more workflow definitions from a manifest
///
/// JSON is tried first; otherwise the input is read as a YAML stream. YAML
/// documents that are empty or declare a kind other than `Workflow` are
/// skipped.
pub fn parse_workflows(manifest: &[u8], strict: bool) -> Result<Vec<WorkflowResource>> {
    if let Ok(value) = serde_json::from_slice::<Value>(manifest) {
        return Ok(vec![resource_from_value(value, strict)?]);
    }

    let mut workflows = Vec::new();
    for document in serde_yaml::Deserializer::from_slice(manifest) {
        let value = Value::deserialize(document)?;
        if value.is_null() {
            continue;
        }
        let kind = value.get("kind").and_then(Value::as_str).unwrap_or_default();
        if !kind.is_empty() && kind != WORKFLOW_KIND {
            continue;
        }
        workflows.push(resource_from_value(value, strict)?);
    }

    if workflows.is_empty() {
        return Err(ControlPlaneError::InvalidArgument(
            "No workflows found in manifest.".to_string(),
        ));
    }
    Ok(workflows)
}

fn resource_from_value(value: Value, strict: bool) -> Result<WorkflowResource> {
    if strict {
        check_known_fields(&value)?;
    }
    Ok(serde_json::from_value(value)?)
}

/// Reject keys the engine does not define at the checked levels
pub fn check_known_fields(value: &Value) -> Result<()> {
    check_object(value, ROOT_FIELDS, "")?;

    if let Some(metadata) = value.get("metadata") {
        check_object(metadata, METADATA_FIELDS, "metadata")?;
    }

    let Some(spec) = value.get("spec") else {
        return Ok(());
    };
    check_object(spec, SPEC_FIELDS, "spec")?;

    let templates = spec
        .get("templates")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    for (index, template) in templates.iter().enumerate() {
        let path = format!("spec.templates[{}]", index);
        check_object(template, TEMPLATE_FIELDS, &path)?;
        if let Some(container) = template.get("container") {
            check_object(container, CONTAINER_FIELDS, &format!("{}.container", path))?;
        }
    }

    Ok(())
}

fn check_object(value: &Value, known: &[&str], path: &str) -> Result<()> {
    let Some(object) = value.as_object() else {
        return Ok(());
    };
    for key in object.keys() {
        if !known.contains(&key.as_str()) {
            let field = if path.is_empty() {
                key.clone()
            } else {
                format!("{}.{}", path, key)
            };
            return Err(ControlPlaneError::InvalidArgument(format!(
                "unknown field \"{}\"",
                field
            )));
        }
    }
    Ok(())
}

/// Submitted parameters first, then template parameters they don't override
pub fn merge_parameters(submitted: &[WorkflowParameter], template: &[Parameter]) -> Vec<Parameter> {
    let mut merged: Vec<Parameter> = submitted.iter().map(Parameter::from).collect();
    for param in template {
        if submitted.iter().any(|p| p.name == param.name) {
            continue;
        }
        merged.push(param.clone());
    }
    merged
}
