// Workflow lifecycle operations
// Create, validate, inspect, list, watch and control workflow runs

//! # Workflow Lifecycle Client
//!
//! [`WorkflowClient`] is the request-scoped entry point for every workflow
//! operation. It is built per request from collaborators bound to the
//! caller's identity, so every cluster call it makes is authorized as the
//! caller.
//!
//! ## Template Association
//!
//! Workflows are created from a stored [`WorkflowTemplate`] version. The
//! template's UID and version are stamped on the workflow as labels, and
//! every detailed read resolves them back to the template. A workflow whose
//! labels no longer resolve cannot be read.
//!
//! ## Error Reporting
//!
//! Each failure is logged here with its namespace/name context and returned
//! as a classified [`ControlPlaneError`] with a generic message. Control
//! operations (retry, resubmit, resume, suspend, terminate) return engine
//! errors unchanged; they are classified by cluster status at the API layer.

use std::collections::BTreeMap;
use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;
use tracing::{error, info};

use super::cluster::{ClusterCore, WorkflowEngine};
use super::injector::ManifestFieldInjector;
use super::storage::StorageProvider;
use super::stream::TaskStream;
use super::templates::TemplateStore;
use super::watcher::watch_status;
use crate::models::{
    merge_parameters, parse_workflows, Workflow, WorkflowOptions, WorkflowResource,
    WorkflowTemplate, WORKFLOW_TEMPLATE_UID_LABEL, WORKFLOW_TEMPLATE_VERSION_LABEL,
};
use crate::{ControlPlaneError, Result};

lazy_static! {
    static ref NAME_INVALID_CHARS: Regex = Regex::new(r"[^a-zA-Z0-9-]+").unwrap();
}

/// Generated-name prefix for workflows created from a template
///
/// Every run of characters outside `[a-zA-Z0-9-]` becomes a single `-`, the
/// result is lower-cased and a trailing `-` is appended.
pub fn generate_name_prefix(template_name: &str) -> String {
    format!(
        "{}-",
        NAME_INVALID_CHARS
            .replace_all(template_name, "-")
            .to_lowercase()
    )
}

/// Deployment settings consumed by lifecycle operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowClientConfig {
    /// Pod GC strategy for workflows that don't declare one
    pub pod_gc_strategy: String,
    /// End offset of archived log reads; negative reads the trailing bytes
    pub artifact_object_range: String,
}

impl Default for WorkflowClientConfig {
    fn default() -> Self {
        Self {
            pod_gc_strategy: "OnPodCompletion".to_string(),
            artifact_object_range: "-102400".to_string(),
        }
    }
}

/// Workflow operations on behalf of one caller
#[derive(Clone)]
pub struct WorkflowClient {
    pub(crate) engine: Arc<dyn WorkflowEngine>,
    pub(crate) core: Arc<dyn ClusterCore>,
    pub(crate) templates: Arc<dyn TemplateStore>,
    pub(crate) storage: Arc<dyn StorageProvider>,
    pub(crate) config: WorkflowClientConfig,
    injector: ManifestFieldInjector,
}

impl WorkflowClient {
    pub fn new(
        engine: Arc<dyn WorkflowEngine>,
        core: Arc<dyn ClusterCore>,
        templates: Arc<dyn TemplateStore>,
        storage: Arc<dyn StorageProvider>,
        config: WorkflowClientConfig,
    ) -> Self {
        let injector = ManifestFieldInjector::new(core.clone(), config.pod_gc_strategy.clone());
        Self {
            engine,
            core,
            templates,
            storage,
            config,
            injector,
        }
    }

    pub fn config(&self) -> &WorkflowClientConfig {
        &self.config
    }

    /// Apply submission overrides and deployment defaults, then submit
    async fn submit(
        &self,
        namespace: &str,
        mut workflow: WorkflowResource,
        options: &WorkflowOptions,
    ) -> Result<WorkflowResource> {
        if let Some(name) = &options.name {
            workflow.metadata.name = name.clone();
        }
        if let Some(generate_name) = &options.generate_name {
            workflow.metadata.generate_name = generate_name.clone();
        }
        if let Some(entrypoint) = &options.entrypoint {
            workflow.spec.entrypoint = entrypoint.clone();
        }
        if let Some(service_account) = &options.service_account {
            workflow.spec.service_account_name = service_account.clone();
        }
        if !options.parameters.is_empty() {
            workflow.spec.arguments.parameters =
                merge_parameters(&options.parameters, &workflow.spec.arguments.parameters);
        }
        if let Some(labels) = &options.labels {
            workflow.metadata.labels = labels.clone();
        }

        self.injector.inject(namespace, &mut workflow, options).await?;

        Ok(self.engine.create_workflow(namespace, &workflow).await?)
    }

    async fn find_template(
        &self,
        namespace: &str,
        uid: &str,
        version: i32,
    ) -> Result<Option<WorkflowTemplate>> {
        self.templates
            .get_workflow_template(namespace, uid, version)
            .await
    }

    /// Create workflows from the template version referenced by `workflow`
    ///
    /// Every definition in the template manifest is submitted in order. The
    /// first failure fails the call; definitions already submitted stay.
    pub async fn create_workflow(&self, namespace: &str, mut workflow: Workflow) -> Result<Workflow> {
        let reference = workflow.workflow_template.clone().unwrap_or_default();
        let template = match self
            .find_template(namespace, &reference.uid, reference.version)
            .await
        {
            Ok(Some(template)) => template,
            Ok(None) => {
                error!(
                    namespace = %namespace,
                    template_uid = %reference.uid,
                    template_version = reference.version,
                    "Error with getting workflow template."
                );
                return Err(ControlPlaneError::NotFound(
                    "Error with getting workflow template.".to_string(),
                ));
            }
            Err(err) => {
                error!(
                    namespace = %namespace,
                    template_uid = %reference.uid,
                    template_version = reference.version,
                    error = %err,
                    "Error with getting workflow template."
                );
                return Err(ControlPlaneError::NotFound(
                    "Error with getting workflow template.".to_string(),
                ));
            }
        };

        let mut labels = BTreeMap::new();
        labels.insert(WORKFLOW_TEMPLATE_UID_LABEL.to_string(), template.uid.clone());
        labels.insert(
            WORKFLOW_TEMPLATE_VERSION_LABEL.to_string(),
            template.version.to_string(),
        );
        let options = WorkflowOptions {
            generate_name: Some(generate_name_prefix(&template.name)),
            labels: Some(labels),
            parameters: workflow.parameters.clone(),
            ..Default::default()
        };

        let definitions = parse_workflows(template.manifest.as_bytes(), true).map_err(|err| {
            error!(namespace = %namespace, template_uid = %template.uid, error = %err, "Error parsing workflow.");
            err
        })?;

        let mut created = Vec::with_capacity(definitions.len());
        for definition in definitions {
            let resource = self
                .submit(namespace, definition, &options)
                .await
                .map_err(|err| {
                    error!(namespace = %namespace, template_uid = %template.uid, error = %err, "Error submitting workflow.");
                    err
                })?;
            created.push(resource);
        }

        let first = created.first().ok_or_else(|| {
            ControlPlaneError::InvalidArgument("No workflows found in manifest.".to_string())
        })?;
        info!(
            namespace = %namespace,
            name = %first.metadata.name,
            submitted = created.len(),
            "Workflow created"
        );

        workflow.name = first.metadata.name.clone();
        workflow.uid = first.metadata.uid.clone();
        workflow.created_at = first.metadata.creation_timestamp;
        workflow.workflow_template = Some(WorkflowTemplate {
            manifest: String::new(),
            ..template
        });
        Ok(workflow)
    }

    /// Check that a manifest would be accepted
    pub async fn validate_workflow(&self, namespace: &str, manifest: &str) -> Result<()> {
        let definitions = parse_workflows(manifest.as_bytes(), true)?;
        let options = WorkflowOptions::default();
        for definition in definitions {
            let mut scratch = definition.clone();
            self.injector.inject(namespace, &mut scratch, &options).await?;
            self.engine.validate_workflow(namespace, &scratch).await?;
        }
        Ok(())
    }

    /// A workflow with its template and full serialized resource
    pub async fn get_workflow(&self, namespace: &str, name: &str) -> Result<Workflow> {
        let resource = self.engine.get_workflow(namespace, name).await.map_err(|err| {
            error!(namespace = %namespace, name = %name, error = %err, "Workflow not found.");
            ControlPlaneError::NotFound("Workflow not found.".to_string())
        })?;

        let uid = resource.label(WORKFLOW_TEMPLATE_UID_LABEL).unwrap_or_default();
        let version: i32 = resource
            .label(WORKFLOW_TEMPLATE_VERSION_LABEL)
            .unwrap_or_default()
            .parse()
            .map_err(|err| {
                error!(namespace = %namespace, name = %name, error = %err, "Invalid version number.");
                ControlPlaneError::InvalidArgument("Invalid version number.".to_string())
            })?;

        let template = match self.find_template(namespace, uid, version).await {
            Ok(Some(template)) => template,
            Ok(None) => {
                error!(namespace = %namespace, name = %name, template_uid = %uid, "Cannot get Workflow Template.");
                return Err(ControlPlaneError::NotFound(
                    "Cannot get Workflow Template.".to_string(),
                ));
            }
            Err(err) => {
                error!(namespace = %namespace, name = %name, error = %err, "Cannot get Workflow Template.");
                return Err(ControlPlaneError::NotFound(
                    "Cannot get Workflow Template.".to_string(),
                ));
            }
        };

        let mut workflow = Workflow::with_manifest(&resource).map_err(|err| {
            error!(namespace = %namespace, name = %name, error = %err, "Invalid status.");
            ControlPlaneError::InvalidArgument("Invalid status.".to_string())
        })?;
        workflow.workflow_template = Some(template);
        Ok(workflow)
    }

    /// Workflows of a namespace, most recently created first
    ///
    /// With a template UID only that template's workflows are listed, further
    /// narrowed to one version when `template_version` is given.
    pub async fn list_workflows(
        &self,
        namespace: &str,
        template_uid: &str,
        template_version: &str,
    ) -> Result<Vec<Workflow>> {
        let mut selector = String::new();
        if !template_uid.is_empty() {
            selector = format!("{}={}", WORKFLOW_TEMPLATE_UID_LABEL, template_uid);
            if !template_version.is_empty() {
                selector = format!(
                    "{},{}={}",
                    selector, WORKFLOW_TEMPLATE_VERSION_LABEL, template_version
                );
            }
        }

        let mut resources = self
            .engine
            .list_workflows(namespace, &selector)
            .await
            .map_err(|err| {
                error!(
                    namespace = %namespace,
                    template_uid = %template_uid,
                    template_version = %template_version,
                    error = %err,
                    "Workflows not found."
                );
                ControlPlaneError::NotFound("Workflows not found.".to_string())
            })?;

        resources.sort_by(|a, b| {
            b.metadata
                .creation_timestamp
                .cmp(&a.metadata.creation_timestamp)
        });
        Ok(resources.iter().map(Workflow::summary).collect())
    }

    /// Stream status snapshots of a workflow until it finishes
    pub async fn watch_workflow(&self, namespace: &str, name: &str) -> Result<TaskStream<Workflow>> {
        self.get_workflow(namespace, name).await.map_err(|err| {
            error!(namespace = %namespace, name = %name, error = %err, "Workflow not found.");
            ControlPlaneError::NotFound("Workflow not found.".to_string())
        })?;

        let events = self
            .engine
            .watch_workflow(namespace, name)
            .await
            .map_err(|err| {
                error!(namespace = %namespace, name = %name, error = %err, "Watch Workflow error.");
                ControlPlaneError::Unknown("Error with watching workflow.".to_string())
            })?;

        Ok(watch_status(namespace, name, events))
    }

    pub async fn retry_workflow(&self, namespace: &str, name: &str) -> Result<Workflow> {
        let resource = self.engine.retry_workflow(namespace, name).await?;
        Ok(Workflow::with_manifest(&resource)?)
    }

    /// Submit a fresh copy of a workflow; every call creates a new run
    pub async fn resubmit_workflow(&self, namespace: &str, name: &str) -> Result<Workflow> {
        let resource = self.engine.resubmit_workflow(namespace, name).await?;
        Ok(Workflow::with_manifest(&resource)?)
    }

    pub async fn resume_workflow(&self, namespace: &str, name: &str) -> Result<Workflow> {
        let resource = self.engine.resume_workflow(namespace, name).await?;
        Ok(Workflow::with_manifest(&resource)?)
    }

    pub async fn suspend_workflow(&self, namespace: &str, name: &str) -> Result<()> {
        Ok(self.engine.suspend_workflow(namespace, name).await?)
    }

    pub async fn terminate_workflow(&self, namespace: &str, name: &str) -> Result<()> {
        Ok(self.engine.terminate_workflow(namespace, name).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::memory::InMemoryCluster;
    use crate::engine::templates::InMemoryTemplateStore;
    use crate::models::manifest::RESUBMITTED_FROM_LABEL;
    use crate::models::{WorkflowParameter, WorkflowPhase, WorkflowStatus};
    use crate::ErrorCode;
    use chrono::{Duration, Utc};
    use futures::StreamExt;

    const MANIFEST: &str = r#"
apiVersion: argoproj.io/v1alpha1
kind: Workflow
metadata:
  generateName: ignored-
spec:
  entrypoint: main
  arguments:
    parameters:
    - name: epochs
      value: "10"
    - name: batch-size
      value: "32"
  templates:
  - name: main
    container:
      image: alpine
"#;

    async fn setup() -> (InMemoryCluster, Arc<InMemoryTemplateStore>, WorkflowClient) {
        let cluster = InMemoryCluster::new();
        let templates = Arc::new(InMemoryTemplateStore::new());
        templates
            .insert(
                "team-a",
                WorkflowTemplate {
                    uid: "tpl-1".to_string(),
                    name: "Train Model (GPU)".to_string(),
                    version: 3,
                    manifest: MANIFEST.to_string(),
                },
            )
            .await;
        let client = cluster.workflow_client(templates.clone(), WorkflowClientConfig::default());
        (cluster, templates, client)
    }

    fn request(uid: &str, version: i32, parameters: Vec<WorkflowParameter>) -> Workflow {
        Workflow {
            parameters,
            workflow_template: Some(WorkflowTemplate {
                uid: uid.to_string(),
                version,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_generate_name_prefix() {
        assert_eq!(generate_name_prefix("Train Model (GPU)"), "train-model-gpu--");
        assert_eq!(generate_name_prefix("hello_world"), "hello-world-");
        assert_eq!(generate_name_prefix("a--b"), "a--b-");
        assert_eq!(generate_name_prefix("MNIST"), "mnist-");
    }

    #[tokio::test]
    async fn test_create_stamps_labels_and_merges_parameters() {
        let (cluster, _, client) = setup().await;
        let created = client
            .create_workflow(
                "team-a",
                request("tpl-1", 3, vec![WorkflowParameter::new("epochs", "50")]),
            )
            .await
            .unwrap();

        assert!(created.name.starts_with("train-model-gpu--"));
        assert!(!created.uid.is_empty());
        assert!(created.created_at.is_some());
        let template = created.workflow_template.as_ref().unwrap();
        assert_eq!(template.name, "Train Model (GPU)");
        assert!(template.manifest.is_empty());
        assert_eq!(created.parameters.len(), 1);

        let stored = cluster.workflow("team-a", &created.name).await.unwrap();
        assert_eq!(stored.label(WORKFLOW_TEMPLATE_UID_LABEL), Some("tpl-1"));
        assert_eq!(stored.label(WORKFLOW_TEMPLATE_VERSION_LABEL), Some("3"));
        let params: Vec<(&str, &str)> = stored
            .spec
            .arguments
            .parameters
            .iter()
            .map(|p| (p.name.as_str(), p.value.as_deref().unwrap_or_default()))
            .collect();
        assert_eq!(params, vec![("epochs", "50"), ("batch-size", "32")]);
        // Injected defaults reached the engine
        assert_eq!(stored.spec.volumes[0].name, "sys-dshm");
    }

    #[tokio::test]
    async fn test_create_with_unknown_template() {
        let (_, _, client) = setup().await;
        let err = client
            .create_workflow("team-a", request("tpl-404", 1, vec![]))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);
        assert_eq!(err.public_message(), "Error with getting workflow template.");
    }

    #[tokio::test]
    async fn test_create_multi_document_keeps_earlier_submissions() {
        let (cluster, templates, client) = setup().await;
        let broken = MANIFEST.replace("image: alpine", "image: alpine\n    bogus: true");
        templates
            .insert(
                "team-a",
                WorkflowTemplate {
                    uid: "tpl-2".to_string(),
                    name: "pair".to_string(),
                    version: 1,
                    manifest: format!("{}\n---\n{}", MANIFEST, MANIFEST),
                },
            )
            .await;
        let created = client
            .create_workflow("team-a", request("tpl-2", 1, vec![]))
            .await
            .unwrap();
        assert!(created.name.starts_with("pair-"));
        assert_eq!(cluster.workflow_count("team-a").await, 2);

        // Submission failure after the first definition leaves the first in place
        cluster.fail_creates_after("team-a", 1).await;
        templates
            .insert(
                "team-a",
                WorkflowTemplate {
                    uid: "tpl-3".to_string(),
                    name: "pair".to_string(),
                    version: 1,
                    manifest: format!("{}\n---\n{}", MANIFEST, MANIFEST),
                },
            )
            .await;
        assert!(client
            .create_workflow("team-a", request("tpl-3", 1, vec![]))
            .await
            .is_err());
        assert_eq!(cluster.workflow_count("team-a").await, 3);

        // Strict parsing rejects the whole batch before submission
        templates
            .insert(
                "team-a",
                WorkflowTemplate {
                    uid: "tpl-4".to_string(),
                    name: "broken".to_string(),
                    version: 1,
                    manifest: broken,
                },
            )
            .await;
        let err = client
            .create_workflow("team-a", request("tpl-4", 1, vec![]))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
    }

    #[tokio::test]
    async fn test_get_round_trips_template_labels() {
        let (_, _, client) = setup().await;
        let created = client
            .create_workflow("team-a", request("tpl-1", 3, vec![]))
            .await
            .unwrap();

        let fetched = client.get_workflow("team-a", &created.name).await.unwrap();
        assert_eq!(fetched.uid, created.uid);
        let template = fetched.workflow_template.unwrap();
        assert_eq!(template.uid, "tpl-1");
        assert_eq!(template.version, 3);
        let resource: WorkflowResource = serde_json::from_str(&fetched.manifest).unwrap();
        assert_eq!(resource.metadata.name, created.name);
    }

    #[tokio::test]
    async fn test_get_with_corrupted_version_label() {
        let (cluster, _, client) = setup().await;
        let created = client
            .create_workflow("team-a", request("tpl-1", 3, vec![]))
            .await
            .unwrap();
        cluster
            .modify_workflow("team-a", &created.name, |wf| {
                wf.metadata.labels.insert(
                    WORKFLOW_TEMPLATE_VERSION_LABEL.to_string(),
                    "three".to_string(),
                );
            })
            .await
            .unwrap();

        let err = client.get_workflow("team-a", &created.name).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
        assert_eq!(err.public_message(), "Invalid version number.");

        let err = client.get_workflow("team-a", "missing").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);
        assert_eq!(err.public_message(), "Workflow not found.");
    }

    #[tokio::test]
    async fn test_get_with_unresolvable_template() {
        let (cluster, _, client) = setup().await;
        let created = client
            .create_workflow("team-a", request("tpl-1", 3, vec![]))
            .await
            .unwrap();
        cluster
            .modify_workflow("team-a", &created.name, |wf| {
                wf.metadata
                    .labels
                    .insert(WORKFLOW_TEMPLATE_VERSION_LABEL.to_string(), "9".to_string());
            })
            .await
            .unwrap();

        let err = client.get_workflow("team-a", &created.name).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);
        assert_eq!(err.public_message(), "Cannot get Workflow Template.");
    }

    #[tokio::test]
    async fn test_list_filters_and_orders_newest_first() {
        let (cluster, templates, client) = setup().await;
        templates
            .insert(
                "team-a",
                WorkflowTemplate {
                    uid: "tpl-1".to_string(),
                    name: "Train Model (GPU)".to_string(),
                    version: 4,
                    manifest: MANIFEST.to_string(),
                },
            )
            .await;

        let mut names = Vec::new();
        for (offset, version) in [(30, 3), (10, 4), (20, 3)] {
            let created = client
                .create_workflow("team-a", request("tpl-1", version, vec![]))
                .await
                .unwrap();
            cluster
                .modify_workflow("team-a", &created.name, |wf| {
                    wf.metadata.creation_timestamp = Some(Utc::now() - Duration::minutes(offset));
                })
                .await
                .unwrap();
            names.push(created.name);
        }

        let all = client.list_workflows("team-a", "tpl-1", "").await.unwrap();
        let listed: Vec<&str> = all.iter().map(|w| w.name.as_str()).collect();
        assert_eq!(listed, vec![names[1].as_str(), names[2].as_str(), names[0].as_str()]);
        assert!(all.iter().all(|w| w.manifest.is_empty() && w.workflow_template.is_none()));

        let v3 = client.list_workflows("team-a", "tpl-1", "3").await.unwrap();
        assert_eq!(v3.len(), 2);

        // Without a template UID the version is ignored
        let unfiltered = client.list_workflows("team-a", "", "3").await.unwrap();
        assert_eq!(unfiltered.len(), 3);

        assert!(client.list_workflows("team-b", "tpl-1", "").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_validate_manifest() {
        let (_, _, client) = setup().await;
        assert!(client.validate_workflow("team-a", MANIFEST).await.is_ok());

        let err = client
            .validate_workflow("team-a", &MANIFEST.replace("entrypoint: main", "entrypoint: nope"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);

        let err = client
            .validate_workflow("team-a", &MANIFEST.replace("entrypoint: main", "entrypont: main"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_until_finished() {
        let (cluster, _, client) = setup().await;
        let created = client
            .create_workflow("team-a", request("tpl-1", 3, vec![]))
            .await
            .unwrap();

        let mut stream = client.watch_workflow("team-a", &created.name).await.unwrap();
        cluster
            .modify_workflow("team-a", &created.name, |wf| {
                wf.status = Some(WorkflowStatus {
                    phase: Some(WorkflowPhase::Running),
                    ..Default::default()
                });
            })
            .await
            .unwrap();
        let running = stream.next().await.unwrap();
        assert_eq!(running.uid, created.uid);

        cluster
            .modify_workflow("team-a", &created.name, |wf| {
                wf.status = Some(WorkflowStatus {
                    phase: Some(WorkflowPhase::Succeeded),
                    finished_at: Some(Utc::now()),
                    ..Default::default()
                });
            })
            .await
            .unwrap();
        let mut last = None;
        while let Some(snapshot) = stream.next().await {
            last = Some(snapshot);
        }
        let finished: WorkflowResource = serde_json::from_str(&last.unwrap().manifest).unwrap();
        assert_eq!(finished.phase(), Some(&WorkflowPhase::Succeeded));

        let err = client
            .watch_workflow("team-a", "missing")
            .await
            .err()
            .unwrap();
        assert_eq!(err.code(), ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn test_control_operations() {
        let (cluster, _, client) = setup().await;
        let created = client
            .create_workflow("team-a", request("tpl-1", 3, vec![]))
            .await
            .unwrap();

        client.suspend_workflow("team-a", &created.name).await.unwrap();
        assert_eq!(
            cluster.workflow("team-a", &created.name).await.unwrap().spec.suspend,
            Some(true)
        );
        let resumed = client.resume_workflow("team-a", &created.name).await.unwrap();
        assert_eq!(resumed.name, created.name);
        assert_eq!(
            cluster.workflow("team-a", &created.name).await.unwrap().spec.suspend,
            None
        );

        client.terminate_workflow("team-a", &created.name).await.unwrap();
        assert_eq!(
            cluster.workflow("team-a", &created.name).await.unwrap().spec.shutdown,
            "Terminate"
        );

        // Retry is rejected until the workflow has failed
        let err = client.retry_workflow("team-a", &created.name).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);

        let first = client.resubmit_workflow("team-a", &created.name).await.unwrap();
        let second = client.resubmit_workflow("team-a", &created.name).await.unwrap();
        assert_ne!(first.name, second.name);
        let resubmitted = cluster.workflow("team-a", &first.name).await.unwrap();
        assert_eq!(
            resubmitted.label(RESUBMITTED_FROM_LABEL),
            Some(created.name.as_str())
        );

        let err = client.suspend_workflow("team-a", "missing").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFound);
    }
}
