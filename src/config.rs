// Deployment settings loaded from the environment

use anyhow::{Context, Result};
use config::{Config, Environment};
use serde::{Deserialize, Serialize};

use crate::engine::{ClusterConfig, WorkflowClientConfig};

/// Control plane settings
///
/// Every field is read from the upper-cased environment variable of the same
/// name, e.g. `ARGO_POD_GC_STRATEGY`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Pod GC strategy for workflows that don't declare one
    pub argo_pod_gc_strategy: String,
    /// End offset of archived log reads, parsed per request
    pub artifact_repository_object_range: String,
    pub kube_api_server: String,
    /// Skip TLS verification of the API server certificate
    pub kube_ca_insecure: bool,
    /// Postgres DSN of the workflow template store
    #[serde(default)]
    pub db_datasource_name: Option<String>,
    pub system_namespace: String,
    /// Identity used for login checks
    #[serde(default)]
    pub system_token: Option<String>,
    pub server_host: String,
    pub server_port: u16,
    /// Include file and line in log records
    pub logging_enable_caller_trace: bool,
}

impl Settings {
    /// Load settings from the process environment
    pub fn load() -> Result<Self> {
        Self::from_environment(Environment::default())
    }

    fn from_environment(environment: Environment) -> Result<Self> {
        let defaults = WorkflowClientConfig::default();
        let cluster = ClusterConfig::default();

        Config::builder()
            .set_default("argo_pod_gc_strategy", defaults.pod_gc_strategy)?
            .set_default(
                "artifact_repository_object_range",
                defaults.artifact_object_range,
            )?
            .set_default("kube_api_server", cluster.api_server)?
            .set_default("kube_ca_insecure", cluster.insecure)?
            .set_default("system_namespace", "onepanel")?
            .set_default("server_host", "0.0.0.0")?
            .set_default("server_port", 8888)?
            .set_default("logging_enable_caller_trace", false)?
            .add_source(environment.try_parsing(true))
            .build()
            .context("failed to build configuration")?
            .try_deserialize()
            .context("failed to deserialize configuration")
    }

    pub fn client_config(&self) -> WorkflowClientConfig {
        WorkflowClientConfig {
            pod_gc_strategy: self.argo_pod_gc_strategy.clone(),
            artifact_object_range: self.artifact_repository_object_range.clone(),
        }
    }

    /// Base cluster configuration, without a caller identity
    pub fn cluster_config(&self) -> ClusterConfig {
        ClusterConfig {
            api_server: self.kube_api_server.clone(),
            bearer_token: None,
            insecure: self.kube_ca_insecure,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(vars: &[(&str, &str)]) -> Settings {
        let source: HashMap<String, String> = vars
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        Settings::from_environment(Environment::default().source(Some(source))).unwrap()
    }

    #[test]
    fn test_defaults() {
        let settings = settings(&[]);
        assert_eq!(settings.argo_pod_gc_strategy, "OnPodCompletion");
        assert_eq!(settings.artifact_repository_object_range, "-102400");
        assert_eq!(settings.system_namespace, "onepanel");
        assert_eq!(settings.server_port, 8888);
        assert!(settings.db_datasource_name.is_none());
        assert!(!settings.kube_ca_insecure);
    }

    #[test]
    fn test_environment_overrides() {
        let settings = settings(&[
            ("ARGO_POD_GC_STRATEGY", "OnWorkflowSuccess"),
            ("ARTIFACT_REPOSITORY_OBJECT_RANGE", "-2048"),
            ("KUBE_CA_INSECURE", "true"),
            ("SERVER_PORT", "9090"),
            ("DB_DATASOURCE_NAME", "postgres://localhost/onepanel"),
        ]);
        assert_eq!(settings.client_config().pod_gc_strategy, "OnWorkflowSuccess");
        assert_eq!(settings.client_config().artifact_object_range, "-2048");
        assert!(settings.cluster_config().insecure);
        assert_eq!(settings.server_port, 9090);
        assert_eq!(
            settings.db_datasource_name.as_deref(),
            Some("postgres://localhost/onepanel")
        );
    }
}
