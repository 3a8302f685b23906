// Deployment defaults applied to every workflow before submission

//! # Manifest Field Injector
//!
//! Every workflow submitted through the control plane is adjusted for the
//! deployment environment before it reaches the engine:
//!
//! 1. **Pod GC**: a caller override wins; otherwise a definition without a
//!    policy gets the configured default.
//! 2. **Shared memory**: a memory-backed `sys-dshm` volume, mounted at
//!    `/dev/shm` in every container template.
//! 3. **No sidecars**: every template is annotated to opt out of sidecar
//!    injection.
//! 4. **Metrics**: every container template exports an optional
//!    `sys-metrics` artifact from `/tmp/sys-metrics.json`.
//! 5. **Default environment**: each key of the namespace secret
//!    `onepanel-default-env` becomes an env var of every container template
//!    that doesn't already declare it.

use std::sync::Arc;

use serde_json::json;
use tracing::{debug, error};

use super::cluster::ClusterCore;
use crate::models::{Artifact, EnvVar, PodGc, Volume, VolumeMount, WorkflowOptions, WorkflowResource};
use crate::Result;

/// Secret whose entries become env vars of every container template
pub const DEFAULT_ENV_SECRET: &str = "onepanel-default-env";

pub const SHM_VOLUME_NAME: &str = "sys-dshm";
pub const SHM_MOUNT_PATH: &str = "/dev/shm";

pub const METRICS_ARTIFACT_NAME: &str = "sys-metrics";
pub const METRICS_ARTIFACT_PATH: &str = "/tmp/sys-metrics.json";

pub const SIDECAR_INJECT_ANNOTATION: &str = "sidecar.istio.io/inject";

/// Applies deployment defaults to workflow definitions
#[derive(Clone)]
pub struct ManifestFieldInjector {
    core: Arc<dyn ClusterCore>,
    default_pod_gc_strategy: String,
}

impl ManifestFieldInjector {
    pub fn new(core: Arc<dyn ClusterCore>, default_pod_gc_strategy: impl Into<String>) -> Self {
        Self {
            core,
            default_pod_gc_strategy: default_pod_gc_strategy.into(),
        }
    }

    /// Mutate `workflow` in place for submission into `namespace`
    ///
    /// Fails only when the default-env secret exists but cannot be read; a
    /// missing secret just skips the env injection.
    pub async fn inject(
        &self,
        namespace: &str,
        workflow: &mut WorkflowResource,
        options: &WorkflowOptions,
    ) -> Result<()> {
        match &options.pod_gc_strategy {
            Some(strategy) => {
                workflow.spec.pod_gc = Some(PodGc {
                    strategy: strategy.clone(),
                });
            }
            None if workflow.spec.pod_gc.is_none() => {
                workflow.spec.pod_gc = Some(PodGc {
                    strategy: self.default_pod_gc_strategy.clone(),
                });
            }
            None => {}
        }

        let default_env: Vec<(String, String)> = match self.core.get_secret(namespace, DEFAULT_ENV_SECRET).await {
            Ok(secret) => secret
                .data
                .keys()
                .map(|key| {
                    // Undecodable values are injected empty
                    let value = secret
                        .decoded(key)
                        .and_then(|decoded| decoded.ok())
                        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                        .unwrap_or_default();
                    (key.clone(), value)
                })
                .collect(),
            Err(err) if err.is_not_found() => {
                debug!(namespace = %namespace, "No default env secret");
                Vec::new()
            }
            Err(err) => {
                error!(
                    namespace = %namespace,
                    secret = DEFAULT_ENV_SECRET,
                    error = %err,
                    "Failed to read default env secret"
                );
                return Err(err.into());
            }
        };

        workflow
            .spec
            .volumes
            .push(Volume::memory_backed(SHM_VOLUME_NAME));

        for template in workflow.spec.templates.iter_mut() {
            template
                .metadata
                .annotations
                .get_or_insert_with(Default::default)
                .insert(SIDECAR_INJECT_ANNOTATION.to_string(), "false".to_string());

            let Some(container) = template.container.as_mut() else {
                continue;
            };

            container.volume_mounts.push(VolumeMount {
                name: SHM_VOLUME_NAME.to_string(),
                mount_path: SHM_MOUNT_PATH.to_string(),
                ..Default::default()
            });

            template.outputs.artifacts.push(Artifact {
                name: METRICS_ARTIFACT_NAME.to_string(),
                path: METRICS_ARTIFACT_PATH.to_string(),
                optional: true,
                archive: Some(json!({ "none": {} })),
                ..Default::default()
            });

            for (name, value) in &default_env {
                if container.env.iter().any(|env| &env.name == name) {
                    continue;
                }
                container.env.push(EnvVar {
                    name: name.clone(),
                    value: value.clone(),
                    ..Default::default()
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::cluster::Secret;
    use crate::engine::memory::InMemoryCluster;
    use crate::models::parse_workflows;

    const MANIFEST: &str = r#"
metadata:
  generateName: train-
spec:
  entrypoint: main
  templates:
  - name: main
    steps:
    - - name: run
        template: work
  - name: work
    metadata:
      annotations:
        owner: vision
    container:
      image: alpine
      env:
      - name: API_HOST
        value: user-defined
"#;

    fn workflow() -> WorkflowResource {
        parse_workflows(MANIFEST.as_bytes(), true).unwrap().remove(0)
    }

    fn injector(cluster: &InMemoryCluster) -> ManifestFieldInjector {
        ManifestFieldInjector::new(Arc::new(cluster.clone()), "OnPodCompletion")
    }

    #[tokio::test]
    async fn test_injects_defaults_without_secret() {
        let cluster = InMemoryCluster::new();
        let mut wf = workflow();
        injector(&cluster)
            .inject("team-a", &mut wf, &WorkflowOptions::default())
            .await
            .unwrap();

        assert_eq!(wf.spec.pod_gc.as_ref().unwrap().strategy, "OnPodCompletion");
        assert_eq!(wf.spec.volumes.len(), 1);
        assert_eq!(wf.spec.volumes[0].name, SHM_VOLUME_NAME);
        assert_eq!(
            wf.spec.volumes[0].source["emptyDir"],
            json!({ "medium": "Memory" })
        );

        // Annotations on every template, including the steps template
        for template in &wf.spec.templates {
            let annotations = template.metadata.annotations.as_ref().unwrap();
            assert_eq!(annotations[SIDECAR_INJECT_ANNOTATION], "false");
        }
        let work = &wf.spec.templates[1];
        assert_eq!(work.metadata.annotations.as_ref().unwrap()["owner"], "vision");

        // Mounts and artifacts only on the container template
        let main = &wf.spec.templates[0];
        assert!(main.outputs.artifacts.is_empty());
        let container = work.container.as_ref().unwrap();
        assert_eq!(container.volume_mounts[0].mount_path, SHM_MOUNT_PATH);
        let artifact = &work.outputs.artifacts[0];
        assert_eq!(artifact.name, METRICS_ARTIFACT_NAME);
        assert_eq!(artifact.path, METRICS_ARTIFACT_PATH);
        assert!(artifact.optional);
        assert_eq!(artifact.archive, Some(json!({ "none": {} })));
        assert_eq!(container.env.len(), 1);
    }

    #[tokio::test]
    async fn test_gc_override_and_existing_policy() {
        let cluster = InMemoryCluster::new();

        let mut wf = workflow();
        wf.spec.pod_gc = Some(PodGc {
            strategy: "OnWorkflowSuccess".to_string(),
        });
        injector(&cluster)
            .inject("team-a", &mut wf, &WorkflowOptions::default())
            .await
            .unwrap();
        assert_eq!(wf.spec.pod_gc.unwrap().strategy, "OnWorkflowSuccess");

        let mut wf = workflow();
        wf.spec.pod_gc = Some(PodGc {
            strategy: "OnWorkflowSuccess".to_string(),
        });
        let options = WorkflowOptions {
            pod_gc_strategy: Some("OnPodSuccess".to_string()),
            ..Default::default()
        };
        injector(&cluster)
            .inject("team-a", &mut wf, &options)
            .await
            .unwrap();
        assert_eq!(wf.spec.pod_gc.unwrap().strategy, "OnPodSuccess");
    }

    #[tokio::test]
    async fn test_default_env_does_not_override_template_env() {
        let cluster = InMemoryCluster::new();
        let mut secret = Secret::from_plain(
            DEFAULT_ENV_SECRET,
            [("API_HOST", "cluster-default"), ("BUCKET", "datasets")],
        );
        secret
            .data
            .insert("BROKEN".to_string(), "%%not-base64%%".to_string());
        cluster.put_secret("team-a", secret).await;

        let mut wf = workflow();
        injector(&cluster)
            .inject("team-a", &mut wf, &WorkflowOptions::default())
            .await
            .unwrap();

        let env = &wf.spec.templates[1].container.as_ref().unwrap().env;
        let pairs: Vec<(&str, &str)> = env
            .iter()
            .map(|e| (e.name.as_str(), e.value.as_str()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("API_HOST", "user-defined"),
                ("BROKEN", ""),
                ("BUCKET", "datasets"),
            ]
        );
    }

    #[tokio::test]
    async fn test_secret_read_failure_aborts() {
        let cluster = InMemoryCluster::new();
        cluster.fail_secret_reads("team-a", 403).await;

        let mut wf = workflow();
        let before = wf.clone();
        let err = injector(&cluster)
            .inject("team-a", &mut wf, &WorkflowOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), crate::ErrorCode::PermissionDenied);
        assert!(wf.spec.volumes.is_empty());
        assert_eq!(wf.spec.templates, before.spec.templates);
    }
}
