// Domain models for the workflow control plane

//! # Domain Models
//!
//! Pure data types shared by the engine and API layers:
//! - `workflow`: API-facing workflow, template, parameter, log and metric types
//! - `manifest`: the engine's workflow resource format and manifest parsing

pub mod manifest;

pub mod workflow;

pub use manifest::{
    merge_parameters, parse_workflows, Artifact, Container, EnvVar, NodeStatus, ObjectMeta,
    Parameter, PodGc, Template, Volume, VolumeMount, WorkflowResource, WorkflowSpec,
    WorkflowStatus,
};

pub use workflow::{
    LogEntry, Metric, Workflow, WorkflowOptions, WorkflowParameter, WorkflowPhase,
    WorkflowTemplate, WORKFLOW_TEMPLATE_UID_LABEL, WORKFLOW_TEMPLATE_VERSION_LABEL,
};
