// Metrics recorded by completed workflow steps

use tokio::io::AsyncReadExt;
use tracing::error;

use super::lifecycle::WorkflowClient;
use super::storage::ArtifactRepository;
use crate::models::Metric;
use crate::{ControlPlaneError, Result};

impl WorkflowClient {
    /// Metrics a step wrote to its `sys-metrics` artifact
    ///
    /// The artifact is a JSON array of metrics read from the namespace's
    /// artifact repository; a step that wrote none reports "not found".
    pub async fn get_workflow_metrics(
        &self,
        namespace: &str,
        name: &str,
        pod_name: &str,
    ) -> Result<Vec<Metric>> {
        self.get_workflow(namespace, name).await?;

        let repository = ArtifactRepository::load(self.core.as_ref(), namespace)
            .await
            .map_err(|err| {
                error!(namespace = %namespace, name = %name, pod_name = %pod_name, error = %err, "Can't get configuration.");
                ControlPlaneError::PermissionDenied("Can't get configuration.".to_string())
            })?;
        let storage = self.storage.connect(&repository).await.map_err(|err| {
            error!(namespace = %namespace, name = %name, pod_name = %pod_name, error = %err, "Can't connect to S3 storage.");
            ControlPlaneError::PermissionDenied("Can't connect to S3 storage.".to_string())
        })?;

        let key = ArtifactRepository::metrics_key(namespace, name, pod_name);
        let mut reader = storage
            .get_object(&repository.bucket, &key, None)
            .await
            .map_err(|err| {
                if err.is_not_found() {
                    error!(namespace = %namespace, name = %name, pod_name = %pod_name, error = %err, "Metrics do not exist.");
                    ControlPlaneError::NotFound("Metrics do not exist.".to_string())
                } else {
                    error!(namespace = %namespace, name = %name, pod_name = %pod_name, error = %err, "Can't connect to S3 storage.");
                    ControlPlaneError::PermissionDenied("Can't connect to S3 storage.".to_string())
                }
            })?;

        let mut content = Vec::new();
        reader.read_to_end(&mut content).await.map_err(|err| {
            error!(namespace = %namespace, name = %name, pod_name = %pod_name, error = %err, "Unknown.");
            ControlPlaneError::Unknown("Unknown error.".to_string())
        })?;

        serde_json::from_slice(&content).map_err(|err| {
            error!(namespace = %namespace, name = %name, pod_name = %pod_name, error = %err, "Error parsing metrics.");
            ControlPlaneError::InvalidArgument("Error parsing metrics.".to_string())
        })
    }
}
