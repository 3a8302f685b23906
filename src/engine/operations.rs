// Engine-side formulation of workflow control operations

//! Retry, resubmit and resume are computed from the current resource and then
//! written back by an engine implementation. Keeping the formulation here lets
//! the HTTP client and the in-memory engine behave the same way.

use chrono::Utc;
use serde_json::{json, Map, Value};

use super::cluster::{ClusterError, ClusterResult};
use crate::models::manifest::{COMPLETED_LABEL, PHASE_LABEL, RESUBMITTED_FROM_LABEL};
use crate::models::{ObjectMeta, WorkflowPhase, WorkflowResource};

/// Value of `spec.shutdown` that stops a workflow immediately
pub const SHUTDOWN_TERMINATE: &str = "Terminate";

/// Node type of a suspend step
const SUSPEND_NODE: &str = "Suspend";

/// Node type backed by a pod
const POD_NODE: &str = "Pod";

/// A retried workflow and the pods of the nodes that will run again
#[derive(Debug, Clone)]
pub struct RetryPlan {
    pub workflow: WorkflowResource,
    pub pods_to_delete: Vec<String>,
}

/// Reset a failed workflow so its unsuccessful nodes run again
pub fn formulate_retry(workflow: &WorkflowResource) -> ClusterResult<RetryPlan> {
    let retryable = workflow.phase().map_or(false, WorkflowPhase::is_retryable);
    if !retryable {
        return Err(ClusterError::bad_request(format!(
            "workflow must be Failed/Error to retry, phase is {}",
            workflow
                .phase()
                .map(WorkflowPhase::as_str)
                .unwrap_or("unknown")
        )));
    }

    let mut retried = workflow.clone();
    retried.metadata.labels.remove(COMPLETED_LABEL);
    retried.metadata.labels.remove(PHASE_LABEL);
    retried.spec.shutdown.clear();

    let mut pods_to_delete = Vec::new();
    if let Some(status) = retried.status.as_mut() {
        status.phase = Some(WorkflowPhase::Running);
        status.finished_at = None;
        status.extra.remove("message");
        status.nodes.retain(|id, node| {
            if node.succeeded() {
                return true;
            }
            if node.node_type == POD_NODE {
                pods_to_delete.push(id.clone());
            }
            false
        });
    }

    Ok(RetryPlan {
        workflow: retried,
        pods_to_delete,
    })
}

/// A fresh workflow with the same spec as `workflow`
pub fn formulate_resubmit(workflow: &WorkflowResource) -> WorkflowResource {
    let generate_name = if workflow.metadata.generate_name.is_empty() {
        format!("{}-", workflow.metadata.name)
    } else {
        workflow.metadata.generate_name.clone()
    };

    let mut labels = workflow.metadata.labels.clone();
    labels.remove(COMPLETED_LABEL);
    labels.remove(PHASE_LABEL);
    labels.insert(
        RESUBMITTED_FROM_LABEL.to_string(),
        workflow.metadata.name.clone(),
    );

    let mut spec = workflow.spec.clone();
    spec.shutdown.clear();

    WorkflowResource {
        api_version: workflow.api_version.clone(),
        kind: workflow.kind.clone(),
        metadata: ObjectMeta {
            generate_name,
            labels,
            annotations: workflow.metadata.annotations.clone(),
            ..Default::default()
        },
        spec,
        status: None,
    }
}

/// Merge patch that clears the suspend flag and completes running suspend steps
pub fn resume_patch(workflow: &WorkflowResource) -> Value {
    let mut nodes = Map::new();
    if let Some(status) = &workflow.status {
        for (id, node) in &status.nodes {
            if node.node_type == SUSPEND_NODE && node.phase == "Running" {
                nodes.insert(
                    id.clone(),
                    json!({ "phase": "Succeeded", "finishedAt": Utc::now() }),
                );
            }
        }
    }

    if nodes.is_empty() {
        json!({ "spec": { "suspend": null } })
    } else {
        json!({ "spec": { "suspend": null }, "status": { "nodes": nodes } })
    }
}

/// Apply a JSON merge patch to a JSON document
pub fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(target) = target {
        for (key, value) in patch {
            if value.is_null() {
                target.remove(key);
            } else {
                merge_patch(target.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}
