// In-memory cluster for local development and tests

//! # In-Memory Cluster
//!
//! [`InMemoryCluster`] implements every collaborator trait the control plane
//! depends on ([`WorkflowEngine`], [`ClusterCore`], [`ObjectStorage`] and
//! [`StorageProvider`]) over shared in-process state. Clones share the same
//! state, so a test can hold one handle to seed and inspect the cluster while
//! the client under test holds another.
//!
//! Workflow changes are published on a broadcast channel and served to
//! watchers, and control operations use the same formulation as the HTTP
//! client.

use std::collections::{BTreeMap, HashMap};
use std::io::Cursor;
use std::sync::Arc;

use chrono::Utc;
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::sync::{broadcast, RwLock};
use tokio_stream::wrappers::BroadcastStream;
use tracing::debug;
use uuid::Uuid;

use super::cluster::{
    ClusterCore, ClusterError, ClusterResult, ConfigMap, LogReader, PodLogOptions,
    ResourceAttributes, Secret, ServiceAccount, WatchEvent, WatchStream, WorkflowEngine,
};
use super::lifecycle::{WorkflowClient, WorkflowClientConfig};
use super::operations;
use super::storage::{
    ArtifactRepository, ByteRange, ObjectReader, ObjectStorage, StorageError, StorageProvider,
};
use super::templates::TemplateStore;
use super::validation;
use crate::models::{ObjectMeta, WorkflowResource};

const WATCH_BUFFER: usize = 256;

#[derive(Default)]
struct State {
    workflows: HashMap<String, BTreeMap<String, WorkflowResource>>,
    resource_version: u64,
    create_budget: HashMap<String, usize>,
    deleted_pods: HashMap<String, Vec<String>>,
    secrets: HashMap<(String, String), Secret>,
    secret_failures: HashMap<String, u16>,
    config_maps: HashMap<(String, String), ConfigMap>,
    service_accounts: HashMap<String, Vec<ServiceAccount>>,
    pod_logs: HashMap<(String, String, String), Vec<u8>>,
    objects: HashMap<(String, String), Vec<u8>>,
    grants: Vec<ResourceAttributes>,
}

impl State {
    fn next_resource_version(&mut self) -> String {
        self.resource_version += 1;
        self.resource_version.to_string()
    }
}

struct Inner {
    state: RwLock<State>,
    events: broadcast::Sender<(String, WatchEvent)>,
}

/// A cluster held entirely in memory
#[derive(Clone)]
pub struct InMemoryCluster {
    inner: Arc<Inner>,
}

impl Default for InMemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCluster {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(WATCH_BUFFER);
        Self {
            inner: Arc::new(Inner {
                state: RwLock::new(State::default()),
                events,
            }),
        }
    }

    /// A lifecycle client whose collaborators are all this cluster
    pub fn workflow_client(
        &self,
        templates: Arc<dyn TemplateStore>,
        config: WorkflowClientConfig,
    ) -> WorkflowClient {
        WorkflowClient::new(
            Arc::new(self.clone()),
            Arc::new(self.clone()),
            templates,
            Arc::new(self.clone()),
            config,
        )
    }

    fn publish(&self, namespace: &str, event: WatchEvent) {
        // No receivers just means nobody is watching
        let _ = self.inner.events.send((namespace.to_string(), event));
    }

    /// Store a workflow as-is, replacing any workflow with the same name
    pub async fn insert_workflow(&self, namespace: &str, mut workflow: WorkflowResource) {
        let mut state = self.inner.state.write().await;
        workflow.metadata.namespace = namespace.to_string();
        workflow.metadata.resource_version = state.next_resource_version();
        if workflow.metadata.uid.is_empty() {
            workflow.metadata.uid = Uuid::new_v4().to_string();
        }
        state
            .workflows
            .entry(namespace.to_string())
            .or_default()
            .insert(workflow.metadata.name.clone(), workflow.clone());
        drop(state);
        self.publish(namespace, WatchEvent::Added(workflow));
    }

    /// Apply `change` to a stored workflow and notify watchers
    pub async fn modify_workflow<F>(
        &self,
        namespace: &str,
        name: &str,
        change: F,
    ) -> ClusterResult<WorkflowResource>
    where
        F: FnOnce(&mut WorkflowResource),
    {
        let mut state = self.inner.state.write().await;
        let resource_version = state.next_resource_version();
        let workflow = state
            .workflows
            .get_mut(namespace)
            .and_then(|workflows| workflows.get_mut(name))
            .ok_or_else(|| ClusterError::not_found("workflows", name))?;
        change(workflow);
        workflow.metadata.resource_version = resource_version;
        let updated = workflow.clone();
        drop(state);

        self.publish(namespace, WatchEvent::Modified(updated.clone()));
        Ok(updated)
    }

    pub async fn workflow(&self, namespace: &str, name: &str) -> Option<WorkflowResource> {
        let state = self.inner.state.read().await;
        state
            .workflows
            .get(namespace)
            .and_then(|workflows| workflows.get(name))
            .cloned()
    }

    pub async fn workflow_count(&self, namespace: &str) -> usize {
        let state = self.inner.state.read().await;
        state.workflows.get(namespace).map_or(0, BTreeMap::len)
    }

    /// Let `count` more creates succeed in `namespace`, then fail the rest
    pub async fn fail_creates_after(&self, namespace: &str, count: usize) {
        let mut state = self.inner.state.write().await;
        state.create_budget.insert(namespace.to_string(), count);
    }

    /// Pods deleted by retries in `namespace`, in deletion order
    pub async fn deleted_pods(&self, namespace: &str) -> Vec<String> {
        let state = self.inner.state.read().await;
        state.deleted_pods.get(namespace).cloned().unwrap_or_default()
    }

    pub async fn put_secret(&self, namespace: &str, secret: Secret) {
        let mut state = self.inner.state.write().await;
        state
            .secrets
            .insert((namespace.to_string(), secret.metadata.name.clone()), secret);
    }

    /// Make every secret read in `namespace` fail with `status`
    pub async fn fail_secret_reads(&self, namespace: &str, status: u16) {
        let mut state = self.inner.state.write().await;
        state.secret_failures.insert(namespace.to_string(), status);
    }

    pub async fn put_config_map<K, V>(
        &self,
        namespace: &str,
        name: &str,
        data: impl IntoIterator<Item = (K, V)>,
    ) where
        K: Into<String>,
        V: Into<String>,
    {
        let config_map = ConfigMap {
            metadata: ObjectMeta {
                name: name.to_string(),
                namespace: namespace.to_string(),
                ..Default::default()
            },
            data: data
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        };
        let mut state = self.inner.state.write().await;
        state
            .config_maps
            .insert((namespace.to_string(), name.to_string()), config_map);
    }

    pub async fn put_service_account(&self, namespace: &str, account: ServiceAccount) {
        let mut state = self.inner.state.write().await;
        let accounts = state
            .service_accounts
            .entry(namespace.to_string())
            .or_default();
        accounts.retain(|existing| existing.metadata.name != account.metadata.name);
        accounts.push(account);
    }

    pub async fn put_pod_log(&self, namespace: &str, pod: &str, container: &str, log: &str) {
        let mut state = self.inner.state.write().await;
        state.pod_logs.insert(
            (namespace.to_string(), pod.to_string(), container.to_string()),
            log.as_bytes().to_vec(),
        );
    }

    pub async fn put_object(&self, bucket: &str, key: &str, data: Vec<u8>) {
        let mut state = self.inner.state.write().await;
        state
            .objects
            .insert((bucket.to_string(), key.to_string()), data);
    }

    /// Allow the action described by `attributes`
    ///
    /// A grant with an empty name covers every resource name.
    pub async fn grant(&self, attributes: ResourceAttributes) {
        let mut state = self.inner.state.write().await;
        state.grants.push(attributes);
    }

    async fn patch_workflow(
        &self,
        namespace: &str,
        name: &str,
        patch: Value,
    ) -> ClusterResult<WorkflowResource> {
        let current = WorkflowEngine::get_workflow(self, namespace, name).await?;
        let mut document = serde_json::to_value(&current).map_err(ClusterError::decode)?;
        operations::merge_patch(&mut document, &patch);
        let patched: WorkflowResource =
            serde_json::from_value(document).map_err(|err| ClusterError::invalid(err.to_string()))?;
        self.modify_workflow(namespace, name, move |workflow| *workflow = patched)
            .await
    }
}

fn matches_selector(workflow: &WorkflowResource, selector: &str) -> bool {
    selector
        .split(',')
        .filter(|requirement| !requirement.is_empty())
        .all(|requirement| match requirement.split_once('=') {
            Some((key, value)) => workflow.label(key.trim()) == Some(value.trim()),
            None => workflow.label(requirement.trim()).is_some(),
        })
}

fn random_suffix() -> String {
    Uuid::new_v4().simple().to_string()[..5].to_string()
}

#[async_trait::async_trait]
impl WorkflowEngine for InMemoryCluster {
    async fn create_workflow(
        &self,
        namespace: &str,
        workflow: &WorkflowResource,
    ) -> ClusterResult<WorkflowResource> {
        let mut state = self.inner.state.write().await;
        if let Some(budget) = state.create_budget.get_mut(namespace) {
            if *budget == 0 {
                return Err(ClusterError::new(
                    500,
                    "InternalError",
                    "workflow creation is failing",
                ));
            }
            *budget -= 1;
        }

        let mut created = workflow.clone();
        let existing = state.workflows.entry(namespace.to_string()).or_default();
        if created.metadata.name.is_empty() {
            if created.metadata.generate_name.is_empty() {
                return Err(ClusterError::invalid(
                    "name or generateName is required",
                ));
            }
            created.metadata.name = loop {
                let candidate = format!("{}{}", created.metadata.generate_name, random_suffix());
                if !existing.contains_key(&candidate) {
                    break candidate;
                }
            };
        } else if existing.contains_key(&created.metadata.name) {
            return Err(ClusterError::already_exists(
                "workflows",
                &created.metadata.name,
            ));
        }

        created.metadata.namespace = namespace.to_string();
        created.metadata.uid = Uuid::new_v4().to_string();
        created.metadata.creation_timestamp = Some(Utc::now());
        created.metadata.resource_version = state.next_resource_version();
        state
            .workflows
            .entry(namespace.to_string())
            .or_default()
            .insert(created.metadata.name.clone(), created.clone());
        drop(state);

        debug!(namespace = %namespace, name = %created.metadata.name, "Workflow stored");
        self.publish(namespace, WatchEvent::Added(created.clone()));
        Ok(created)
    }

    async fn get_workflow(&self, namespace: &str, name: &str) -> ClusterResult<WorkflowResource> {
        self.workflow(namespace, name)
            .await
            .ok_or_else(|| ClusterError::not_found("workflows", name))
    }

    async fn list_workflows(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> ClusterResult<Vec<WorkflowResource>> {
        let state = self.inner.state.read().await;
        Ok(state
            .workflows
            .get(namespace)
            .map(|workflows| {
                workflows
                    .values()
                    .filter(|workflow| matches_selector(workflow, label_selector))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn watch_workflow(&self, namespace: &str, name: &str) -> ClusterResult<WatchStream> {
        // Subscribe before reading the current state so no change is missed
        let receiver = self.inner.events.subscribe();
        let initial = self
            .workflow(namespace, name)
            .await
            .map(|workflow| Ok(WatchEvent::Added(workflow)));

        let namespace = namespace.to_string();
        let name = name.to_string();
        let changes = BroadcastStream::new(receiver).filter_map(move |received| {
            let selected = match received {
                Ok((event_namespace, event)) if event_namespace == namespace => {
                    let matches = match &event {
                        WatchEvent::Added(workflow)
                        | WatchEvent::Modified(workflow)
                        | WatchEvent::Deleted(workflow) => workflow.metadata.name == name,
                        WatchEvent::Bookmark(_) | WatchEvent::Error(_) => true,
                    };
                    matches.then_some(Ok(event))
                }
                Ok(_) => None,
                Err(err) => Some(Err(ClusterError::transport(err))),
            };
            futures::future::ready(selected)
        });

        Ok(futures::stream::iter(initial).chain(changes).boxed())
    }

    async fn validate_workflow(
        &self,
        _namespace: &str,
        workflow: &WorkflowResource,
    ) -> ClusterResult<()> {
        validation::validate_workflow(workflow)
    }

    async fn retry_workflow(&self, namespace: &str, name: &str) -> ClusterResult<WorkflowResource> {
        let workflow = WorkflowEngine::get_workflow(self, namespace, name).await?;
        let plan = operations::formulate_retry(&workflow)?;
        {
            let mut state = self.inner.state.write().await;
            state
                .deleted_pods
                .entry(namespace.to_string())
                .or_default()
                .extend(plan.pods_to_delete.iter().cloned());
        }
        let retried = plan.workflow;
        self.modify_workflow(namespace, name, move |current| *current = retried)
            .await
    }

    async fn resubmit_workflow(
        &self,
        namespace: &str,
        name: &str,
    ) -> ClusterResult<WorkflowResource> {
        let workflow = WorkflowEngine::get_workflow(self, namespace, name).await?;
        let resubmitted = operations::formulate_resubmit(&workflow);
        WorkflowEngine::create_workflow(self, namespace, &resubmitted).await
    }

    async fn resume_workflow(&self, namespace: &str, name: &str) -> ClusterResult<WorkflowResource> {
        let workflow = WorkflowEngine::get_workflow(self, namespace, name).await?;
        self.patch_workflow(namespace, name, operations::resume_patch(&workflow))
            .await
    }

    async fn suspend_workflow(&self, namespace: &str, name: &str) -> ClusterResult<()> {
        self.patch_workflow(namespace, name, json!({ "spec": { "suspend": true } }))
            .await?;
        Ok(())
    }

    async fn terminate_workflow(&self, namespace: &str, name: &str) -> ClusterResult<()> {
        self.patch_workflow(
            namespace,
            name,
            json!({ "spec": { "shutdown": operations::SHUTDOWN_TERMINATE } }),
        )
        .await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl ClusterCore for InMemoryCluster {
    async fn get_secret(&self, namespace: &str, name: &str) -> ClusterResult<Secret> {
        let state = self.inner.state.read().await;
        if let Some(status) = state.secret_failures.get(namespace) {
            return Err(ClusterError::new(
                *status,
                "Forbidden",
                format!("secrets \"{}\" is forbidden", name),
            ));
        }
        state
            .secrets
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| ClusterError::not_found("secrets", name))
    }

    async fn get_config_map(&self, namespace: &str, name: &str) -> ClusterResult<ConfigMap> {
        let state = self.inner.state.read().await;
        state
            .config_maps
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
            .ok_or_else(|| ClusterError::not_found("configmaps", name))
    }

    async fn pod_logs(
        &self,
        namespace: &str,
        pod: &str,
        options: &PodLogOptions,
    ) -> ClusterResult<LogReader> {
        let state = self.inner.state.read().await;
        let log = state
            .pod_logs
            .get(&(
                namespace.to_string(),
                pod.to_string(),
                options.container.clone(),
            ))
            .cloned()
            .ok_or_else(|| ClusterError::not_found("pods", pod))?;
        Ok(Box::new(Cursor::new(log)))
    }

    async fn self_subject_access_review(
        &self,
        attributes: &ResourceAttributes,
    ) -> ClusterResult<bool> {
        let state = self.inner.state.read().await;
        Ok(state.grants.iter().any(|grant| {
            grant.namespace == attributes.namespace
                && grant.verb == attributes.verb
                && grant.group == attributes.group
                && grant.resource == attributes.resource
                && (grant.name.is_empty() || grant.name == attributes.name)
        }))
    }

    async fn list_service_accounts(&self, namespace: &str) -> ClusterResult<Vec<ServiceAccount>> {
        let state = self.inner.state.read().await;
        Ok(state
            .service_accounts
            .get(namespace)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait::async_trait]
impl ObjectStorage for InMemoryCluster {
    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        range: Option<ByteRange>,
    ) -> Result<ObjectReader, StorageError> {
        let state = self.inner.state.read().await;
        let data = state
            .objects
            .get(&(bucket.to_string(), key.to_string()))
            .ok_or_else(|| StorageError::NotFound {
                bucket: bucket.to_string(),
                key: key.to_string(),
            })?;
        let selected = match range {
            Some(range) => range.slice(data).to_vec(),
            None => data.clone(),
        };
        Ok(Box::new(Cursor::new(selected)))
    }
}

#[async_trait::async_trait]
impl StorageProvider for InMemoryCluster {
    async fn connect(
        &self,
        _repository: &ArtifactRepository,
    ) -> Result<Arc<dyn ObjectStorage>, StorageError> {
        Ok(Arc::new(self.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NodeStatus, WorkflowPhase, WorkflowStatus};
    use tokio::io::AsyncReadExt;

    fn named(generate_name: &str) -> WorkflowResource {
        let mut wf = WorkflowResource::default();
        wf.metadata.generate_name = generate_name.to_string();
        wf
    }

    #[tokio::test]
    async fn test_create_generates_unique_names() {
        let cluster = InMemoryCluster::new();
        let first = cluster.create_workflow("team-a", &named("train-")).await.unwrap();
        let second = cluster.create_workflow("team-a", &named("train-")).await.unwrap();
        assert!(first.metadata.name.starts_with("train-"));
        assert_eq!(first.metadata.name.len(), "train-".len() + 5);
        assert_ne!(first.metadata.name, second.metadata.name);
        assert_ne!(first.metadata.uid, second.metadata.uid);

        let mut fixed = WorkflowResource::default();
        fixed.metadata.name = first.metadata.name.clone();
        let err = cluster.create_workflow("team-a", &fixed).await.unwrap_err();
        assert_eq!(err.status, 409);

        let err = cluster
            .create_workflow("team-a", &WorkflowResource::default())
            .await
            .unwrap_err();
        assert_eq!(err.status, 422);
    }

    #[tokio::test]
    async fn test_label_selector() {
        let cluster = InMemoryCluster::new();
        for (team, tier) in [("vision", "gpu"), ("vision", "cpu"), ("nlp", "gpu")] {
            let mut wf = named("wf-");
            wf.metadata.labels.insert("team".to_string(), team.to_string());
            wf.metadata.labels.insert("tier".to_string(), tier.to_string());
            cluster.create_workflow("team-a", &wf).await.unwrap();
        }

        assert_eq!(cluster.list_workflows("team-a", "").await.unwrap().len(), 3);
        assert_eq!(cluster.list_workflows("team-a", "team=vision").await.unwrap().len(), 2);
        assert_eq!(
            cluster
                .list_workflows("team-a", "team=vision,tier=gpu")
                .await
                .unwrap()
                .len(),
            1
        );
        assert!(cluster.list_workflows("team-b", "").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_watch_sees_current_state_then_changes() {
        let cluster = InMemoryCluster::new();
        let created = cluster.create_workflow("team-a", &named("wf-")).await.unwrap();
        cluster.create_workflow("team-a", &named("other-")).await.unwrap();

        let mut events = cluster
            .watch_workflow("team-a", &created.metadata.name)
            .await
            .unwrap();
        let initial = events.next().await.unwrap().unwrap();
        assert!(matches!(initial, WatchEvent::Added(_)));

        cluster.create_workflow("team-a", &named("noise-")).await.unwrap();
        cluster
            .modify_workflow("team-a", &created.metadata.name, |wf| {
                wf.spec.entrypoint = "main".to_string();
            })
            .await
            .unwrap();

        match events.next().await.unwrap().unwrap() {
            WatchEvent::Modified(wf) => assert_eq!(wf.spec.entrypoint, "main"),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_retry_deletes_pods_of_failed_nodes() {
        let cluster = InMemoryCluster::new();
        let mut wf = WorkflowResource::default();
        wf.metadata.name = "train-abc12".to_string();
        let mut status = WorkflowStatus {
            phase: Some(WorkflowPhase::Failed),
            finished_at: Some(Utc::now()),
            ..Default::default()
        };
        for (id, phase) in [("train-abc12-1", "Succeeded"), ("train-abc12-2", "Error")] {
            status.nodes.insert(
                id.to_string(),
                NodeStatus {
                    id: id.to_string(),
                    node_type: "Pod".to_string(),
                    phase: phase.to_string(),
                    ..Default::default()
                },
            );
        }
        wf.status = Some(status);
        cluster.insert_workflow("team-a", wf).await;

        let retried = cluster.retry_workflow("team-a", "train-abc12").await.unwrap();
        assert_eq!(retried.phase(), Some(&WorkflowPhase::Running));
        assert!(!retried.is_finished());
        assert_eq!(cluster.deleted_pods("team-a").await, vec!["train-abc12-2".to_string()]);
    }

    #[tokio::test]
    async fn test_access_review_grants() {
        let cluster = InMemoryCluster::new();
        let mut attributes = ResourceAttributes {
            namespace: "team-a".to_string(),
            verb: "get".to_string(),
            group: "argoproj.io".to_string(),
            resource: "workflows".to_string(),
            name: String::new(),
        };
        cluster.grant(attributes.clone()).await;

        attributes.name = "train-abc12".to_string();
        assert!(cluster.self_subject_access_review(&attributes).await.unwrap());
        attributes.verb = "delete".to_string();
        assert!(!cluster.self_subject_access_review(&attributes).await.unwrap());
    }

    #[tokio::test]
    async fn test_objects_and_secrets() {
        let cluster = InMemoryCluster::new();
        cluster.put_object("bucket", "key", b"0123456789".to_vec()).await;

        let mut tail = String::new();
        cluster
            .get_object("bucket", "key", Some(ByteRange::new(0, -4).unwrap()))
            .await
            .unwrap()
            .read_to_string(&mut tail)
            .await
            .unwrap();
        assert_eq!(tail, "6789");
        assert!(matches!(
            cluster.get_object("bucket", "missing", None).await,
            Err(StorageError::NotFound { .. })
        ));

        assert!(cluster.get_secret("team-a", "s").await.unwrap_err().is_not_found());
        cluster.fail_secret_reads("team-a", 403).await;
        assert_eq!(cluster.get_secret("team-a", "s").await.unwrap_err().status, 403);
    }
}
