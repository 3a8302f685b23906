// Request and response bodies of the control plane API

use serde::{Deserialize, Serialize};

use crate::engine::ResourceAttributes;
use crate::models::{Metric, Workflow};
use crate::ErrorCode;

/// Query of `ListWorkflows`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListWorkflowsQuery {
    #[serde(default)]
    pub workflow_template_uid: String,
    #[serde(default)]
    pub workflow_template_version: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListWorkflowsResponse {
    pub count: usize,
    pub workflows: Vec<Workflow>,
}

/// Body of `ValidateWorkflow`: a manifest in YAML or JSON
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidateWorkflowRequest {
    #[serde(default)]
    pub manifest: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetWorkflowMetricsResponse {
    pub metrics: Vec<Metric>,
}

/// Empty body of operations without a result
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Empty {}

/// Login check: a service account name and the digest of its token
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IsValidTokenRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub token: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IsValidTokenResponse {
    pub username: String,
    /// The raw token to use as bearer token from now on
    pub token: String,
}

/// The action an authorization check asks about
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IsAuthorized {
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub verb: String,
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub resource: String,
    #[serde(default)]
    pub resource_name: String,
}

impl From<&IsAuthorized> for ResourceAttributes {
    fn from(request: &IsAuthorized) -> Self {
        Self {
            namespace: request.namespace.clone(),
            verb: request.verb.clone(),
            group: request.group.clone(),
            resource: request.resource.clone(),
            name: request.resource_name.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IsAuthorizedRequest {
    #[serde(default)]
    pub is_authorized: IsAuthorized,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IsAuthorizedResponse {
    pub authorized: bool,
}

/// Error body returned for every failed call
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub code: ErrorCode,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authorization_request_shape() {
        let request: IsAuthorizedRequest = serde_json::from_str(
            r#"{"isAuthorized":{"namespace":"team-a","verb":"get","group":"onepanel.io","resource":"workspaces","resourceName":"notebook"}}"#,
        )
        .unwrap();
        let attributes = ResourceAttributes::from(&request.is_authorized);
        assert_eq!(attributes.namespace, "team-a");
        assert_eq!(attributes.name, "notebook");
    }

    #[test]
    fn test_error_body() {
        let body = serde_json::to_value(ErrorResponse {
            code: ErrorCode::NotFound,
            message: "Workflow not found.".to_string(),
        })
        .unwrap();
        assert_eq!(body["code"], "NotFound");
        assert_eq!(body["message"], "Workflow not found.");
    }
}
