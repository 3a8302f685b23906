// HTTP client for the cluster API server
// Implements both the workflow engine and the core cluster interfaces

//! # Cluster API Client
//!
//! [`KubeClient`] speaks the cluster's REST API directly with `reqwest`:
//! - workflow custom resources under `apis/argoproj.io/v1alpha1`
//! - secrets, config maps, pod logs and service accounts under `api/v1`
//! - self-subject access reviews under `apis/authorization.k8s.io/v1`
//!
//! A client is bound to one identity: the bearer token inside its
//! [`ClusterConfig`]. Requests on behalf of a caller use a client built from
//! [`ClusterConfig::with_bearer_token`], a copy of the base configuration.
//!
//! Control operations (suspend, resume, terminate) are JSON merge patches on
//! the workflow resource. Retry and resubmit are formulated locally and
//! written back, see [`super::operations`].

use futures::{StreamExt, TryStreamExt};
use reqwest::{header, Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tokio::io::AsyncBufReadExt;
use tokio_stream::wrappers::LinesStream;
use tokio_util::io::StreamReader;
use tracing::{debug, warn};

use super::cluster::{
    ClusterCore, ClusterError, ClusterResult, ConfigMap, LogReader, PodLogOptions,
    ResourceAttributes, Secret, ServiceAccount, WatchEvent, WatchStream, WorkflowEngine,
};
use super::operations;
use super::validation;
use crate::models::WorkflowResource;

const WORKFLOW_API_VERSION: &str = "argoproj.io/v1alpha1";
const MERGE_PATCH: &str = "application/merge-patch+json";

/// Connection settings for the cluster API server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterConfig {
    /// Base URL of the API server, e.g. `https://kubernetes.default.svc`
    pub api_server: String,
    pub bearer_token: Option<String>,
    /// Skip TLS verification of the API server certificate
    pub insecure: bool,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            api_server: "https://kubernetes.default.svc".to_string(),
            bearer_token: None,
            insecure: false,
        }
    }
}

impl ClusterConfig {
    /// A copy of this configuration that authenticates as `token`
    pub fn with_bearer_token(&self, token: &str) -> Self {
        Self {
            bearer_token: Some(token.to_string()),
            ..self.clone()
        }
    }
}

/// Status object returned by the API server on failure
#[derive(Debug, Default, Deserialize)]
struct StatusBody {
    #[serde(default)]
    reason: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct ItemList<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Debug, Default, Deserialize)]
struct AccessReviewStatus {
    #[serde(default)]
    allowed: bool,
}

#[derive(Debug, Deserialize)]
struct AccessReview {
    #[serde(default)]
    status: AccessReviewStatus,
}

/// Cluster API client bound to one identity
#[derive(Clone)]
pub struct KubeClient {
    http: Client,
    config: ClusterConfig,
}

impl KubeClient {
    pub fn new(config: ClusterConfig) -> ClusterResult<Self> {
        let http = Client::builder()
            .danger_accept_invalid_certs(config.insecure)
            .build()
            .map_err(ClusterError::transport)?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_server.trim_end_matches('/'), path)
    }

    fn workflows_path(namespace: &str) -> String {
        format!(
            "/apis/{}/namespaces/{}/workflows",
            WORKFLOW_API_VERSION, namespace
        )
    }

    fn workflow_path(namespace: &str, name: &str) -> String {
        format!("{}/{}", Self::workflows_path(namespace), name)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.config.bearer_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Send a request and turn non-success statuses into [`ClusterError`]
    async fn send(&self, request: RequestBuilder) -> ClusterResult<Response> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(ClusterError::transport)?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body: StatusBody = response.json().await.unwrap_or_default();
        Err(ClusterError::new(
            status.as_u16(),
            if body.reason.is_empty() {
                status.canonical_reason().unwrap_or("Unknown").to_string()
            } else {
                body.reason
            },
            body.message,
        ))
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> ClusterResult<T> {
        self.send(request)
            .await?
            .json()
            .await
            .map_err(ClusterError::decode)
    }

    async fn patch_workflow(
        &self,
        namespace: &str,
        name: &str,
        patch: serde_json::Value,
    ) -> ClusterResult<WorkflowResource> {
        let request = self
            .http
            .patch(self.url(&Self::workflow_path(namespace, name)))
            .header(header::CONTENT_TYPE, MERGE_PATCH)
            .body(patch.to_string());
        self.send_json(request).await
    }

    async fn update_workflow(
        &self,
        namespace: &str,
        workflow: &WorkflowResource,
    ) -> ClusterResult<WorkflowResource> {
        let request = self
            .http
            .put(self.url(&Self::workflow_path(namespace, &workflow.metadata.name)))
            .json(workflow);
        self.send_json(request).await
    }

    /// Delete a pod; a pod that is already gone is not an error
    pub async fn delete_pod(&self, namespace: &str, name: &str) -> ClusterResult<()> {
        let request = self
            .http
            .delete(self.url(&format!("/api/v1/namespaces/{}/pods/{}", namespace, name)));
        match self.send(request).await {
            Ok(_) => Ok(()),
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(err),
        }
    }
}

#[async_trait::async_trait]
impl WorkflowEngine for KubeClient {
    async fn create_workflow(
        &self,
        namespace: &str,
        workflow: &WorkflowResource,
    ) -> ClusterResult<WorkflowResource> {
        let mut workflow = workflow.clone();
        if workflow.api_version.is_empty() {
            workflow.api_version = WORKFLOW_API_VERSION.to_string();
        }
        if workflow.kind.is_empty() {
            workflow.kind = crate::models::manifest::WORKFLOW_KIND.to_string();
        }
        let request = self
            .http
            .post(self.url(&Self::workflows_path(namespace)))
            .json(&workflow);
        self.send_json(request).await
    }

    async fn get_workflow(&self, namespace: &str, name: &str) -> ClusterResult<WorkflowResource> {
        let request = self.http.get(self.url(&Self::workflow_path(namespace, name)));
        self.send_json(request).await
    }

    async fn list_workflows(
        &self,
        namespace: &str,
        label_selector: &str,
    ) -> ClusterResult<Vec<WorkflowResource>> {
        let mut request = self.http.get(self.url(&Self::workflows_path(namespace)));
        if !label_selector.is_empty() {
            request = request.query(&[("labelSelector", label_selector)]);
        }
        let list: ItemList<WorkflowResource> = self.send_json(request).await?;
        Ok(list.items)
    }

    async fn watch_workflow(&self, namespace: &str, name: &str) -> ClusterResult<WatchStream> {
        let field_selector = format!("metadata.name={}", name);
        let request = self
            .http
            .get(self.url(&Self::workflows_path(namespace)))
            .query(&[("watch", "true"), ("fieldSelector", field_selector.as_str())]);
        let response = self.send(request).await?;

        let body = response
            .bytes_stream()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
        let lines = LinesStream::new(StreamReader::new(Box::pin(body)).lines());
        let events = lines
            .try_filter(|line| futures::future::ready(!line.trim().is_empty()))
            .map(|line| -> ClusterResult<WatchEvent> {
                let line = line.map_err(ClusterError::transport)?;
                serde_json::from_str::<WatchEvent>(&line).map_err(ClusterError::decode)
            });
        Ok(events.boxed())
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
        for pod in &plan.pods_to_delete {
            debug!(namespace = %namespace, pod = %pod, "Deleting pod of failed node");
            self.delete_pod(namespace, pod).await?;
        }
        self.update_workflow(namespace, &plan.workflow).await
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
impl ClusterCore for KubeClient {
    async fn get_secret(&self, namespace: &str, name: &str) -> ClusterResult<Secret> {
        let request = self
            .http
            .get(self.url(&format!("/api/v1/namespaces/{}/secrets/{}", namespace, name)));
        self.send_json(request).await
    }

    async fn get_config_map(&self, namespace: &str, name: &str) -> ClusterResult<ConfigMap> {
        let request = self
            .http
            .get(self.url(&format!("/api/v1/namespaces/{}/configmaps/{}", namespace, name)));
        self.send_json(request).await
    }

    async fn pod_logs(
        &self,
        namespace: &str,
        pod: &str,
        options: &PodLogOptions,
    ) -> ClusterResult<LogReader> {
        let follow = options.follow.to_string();
        let timestamps = options.timestamps.to_string();
        let mut query = vec![("follow", follow.as_str()), ("timestamps", timestamps.as_str())];
        if !options.container.is_empty() {
            query.push(("container", options.container.as_str()));
        }
        let request = self
            .http
            .get(self.url(&format!("/api/v1/namespaces/{}/pods/{}/log", namespace, pod)))
            .query(&query);
        let response = self.send(request).await?;

        let body = response
            .bytes_stream()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
        Ok(Box::new(StreamReader::new(Box::pin(body))))
    }

    async fn self_subject_access_review(
        &self,
        attributes: &ResourceAttributes,
    ) -> ClusterResult<bool> {
        let review = json!({
            "apiVersion": "authorization.k8s.io/v1",
            "kind": "SelfSubjectAccessReview",
            "spec": { "resourceAttributes": attributes },
        });
        let request = self
            .http
            .post(self.url("/apis/authorization.k8s.io/v1/selfsubjectaccessreviews"))
            .json(&review);
        let review: AccessReview = self.send_json(request).await?;
        if !review.status.allowed {
            warn!(
                namespace = %attributes.namespace,
                verb = %attributes.verb,
                resource = %attributes.resource,
                "Access review denied"
            );
        }
        Ok(review.status.allowed)
    }

    async fn list_service_accounts(&self, namespace: &str) -> ClusterResult<Vec<ServiceAccount>> {
        let request = self
            .http
            .get(self.url(&format!("/api/v1/namespaces/{}/serviceaccounts", namespace)));
        let list: ItemList<ServiceAccount> = self.send_json(request).await?;
        Ok(list.items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bearer_token_binding_copies_config() {
        let base = ClusterConfig {
            api_server: "https://cluster.local:6443".to_string(),
            bearer_token: None,
            insecure: true,
        };
        let bound = base.with_bearer_token("abc");
        assert_eq!(bound.bearer_token.as_deref(), Some("abc"));
        assert_eq!(bound.api_server, base.api_server);
        assert!(bound.insecure);
        // The base configuration is untouched
        assert!(base.bearer_token.is_none());
    }

    #[test]
    fn test_resource_paths() {
        let client = KubeClient::new(ClusterConfig {
            api_server: "https://cluster.local:6443/".to_string(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(
            client.url(&KubeClient::workflow_path("team-a", "train-x7")),
            "https://cluster.local:6443/apis/argoproj.io/v1alpha1/namespaces/team-a/workflows/train-x7"
        );
    }

    #[test]
    fn test_list_body_decoding() {
        let list: ItemList<ServiceAccount> = serde_json::from_str(
            r#"{"items":[{"metadata":{"name":"admin"},"secrets":[{"name":"admin-token-abcde"}]}]}"#,
        )
        .unwrap();
        assert_eq!(list.items[0].secrets[0].name, "admin-token-abcde");

        let review: AccessReview =
            serde_json::from_str(r#"{"status":{"allowed":true}}"#).unwrap();
        assert!(review.status.allowed);
    }
}
