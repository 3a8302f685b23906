// Log retrieval for workflow steps

//! # Log Stream Router
//!
//! A step's logs come from one of two places:
//! - **live**: the running pod's container log, followed with timestamps
//! - **archived**: once the step node has completed, the tail of the log
//!   object the engine archived to the namespace's artifact repository
//!
//! Both sources are split into lines and parsed into [`LogEntry`] values on a
//! producer task; the returned stream closes when the source is exhausted or
//! fails.

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error};

use super::cluster::PodLogOptions;
use super::lifecycle::WorkflowClient;
use super::storage::{ArtifactRepository, ByteRange, ObjectReader};
use super::stream::TaskStream;
use crate::models::LogEntry;
use crate::{ControlPlaneError, Result};

impl WorkflowClient {
    /// Stream the log of `container_name` in step `pod_name` of a workflow
    pub async fn get_workflow_logs(
        &self,
        namespace: &str,
        name: &str,
        pod_name: &str,
        container_name: &str,
    ) -> Result<TaskStream<LogEntry>> {
        let workflow = self.engine.get_workflow(namespace, name).await.map_err(|err| {
            error!(
                namespace = %namespace,
                name = %name,
                pod_name = %pod_name,
                container_name = %container_name,
                error = %err,
                "Workflow not found."
            );
            ControlPlaneError::NotFound("Workflow not found.".to_string())
        })?;

        let source = if workflow.node_completed(pod_name) {
            self.archived_log(namespace, name, pod_name, container_name)
                .await?
        } else {
            let options = PodLogOptions {
                container: container_name.to_string(),
                follow: true,
                timestamps: true,
            };
            self.core
                .pod_logs(namespace, pod_name, &options)
                .await
                .map_err(|err| {
                    error!(
                        namespace = %namespace,
                        name = %name,
                        pod_name = %pod_name,
                        container_name = %container_name,
                        error = %err,
                        "Error with logs."
                    );
                    ControlPlaneError::NotFound("Log not found.".to_string())
                })?
        };

        Ok(stream_log_lines(source))
    }

    async fn archived_log(
        &self,
        namespace: &str,
        name: &str,
        pod_name: &str,
        container_name: &str,
    ) -> Result<ObjectReader> {
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

        let range = self
            .config
            .artifact_object_range
            .trim()
            .parse::<i64>()
            .ok()
            .and_then(|end| ByteRange::new(0, end).ok())
            .ok_or_else(|| {
                error!(
                    namespace = %namespace,
                    name = %name,
                    range = %self.config.artifact_object_range,
                    "Invalid range."
                );
                ControlPlaneError::InvalidArgument("Invalid range.".to_string())
            })?;

        let key = ArtifactRepository::log_key(namespace, name, pod_name, container_name);
        debug!(namespace = %namespace, bucket = %repository.bucket, key = %key, "Reading archived log");
        storage
            .get_object(&repository.bucket, &key, Some(range))
            .await
            .map_err(|err| {
                error!(
                    namespace = %namespace,
                    name = %name,
                    pod_name = %pod_name,
                    container_name = %container_name,
                    error = %err,
                    "Error with logs."
                );
                if err.is_not_found() {
                    ControlPlaneError::NotFound("Log not found.".to_string())
                } else {
                    ControlPlaneError::PermissionDenied("Can't connect to S3 storage.".to_string())
                }
            })
    }
}

/// Parse `source` line by line on a producer task
fn stream_log_lines(source: ObjectReader) -> TaskStream<LogEntry> {
    TaskStream::spawn(move |sender, cancel| async move {
        let mut lines = BufReader::new(source).lines();
        loop {
            let line = tokio::select! {
                _ = cancel.cancelled() => break,
                line = lines.next_line() => line,
            };
            match line {
                Ok(Some(line)) => {
                    if sender.send(LogEntry::parse(&line)).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    error!(error = %err, "Error reading log stream");
                    break;
                }
            }
        }
    })
}
