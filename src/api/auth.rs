// Request authentication and authorization
// Every API call runs as the identity of the caller's bearer token

//! # Auth Interceptor
//!
//! [`AuthInterceptor`] runs in front of every handler. It finds the caller's
//! token in the request metadata and builds an [`AuthenticatedSession`]:
//! fresh cluster clients bound to that token, so every downstream call is
//! authorized by the cluster as the caller.
//!
//! ## Token Sources
//!
//! In order of precedence:
//! 1. `authorization: Bearer <token>`
//! 2. the `auth-token` cookie
//! 3. the `onepanel-auth-token` metadata entry
//!
//! An `authorization` entry that isn't a bearer token ends the search.
//!
//! ## Special Calls
//!
//! - **Login check** (`IsValidToken`): verified against the service account
//!   token on record using the system identity; the verified raw token then
//!   authenticates the call.
//! - **Authorization check** (`IsAuthorized`): requests proxied for a
//!   workspace carry `x-original-authority: <workspace>--<namespace>.<host>`,
//!   which turns the check into "may the caller get that workspace".

use std::sync::Arc;

use md5::{Digest, Md5};
use tracing::{debug, error, warn};

use super::metadata::{RequestMetadata, COOKIE_METADATA_KEY};
use super::types::{IsAuthorized, IsAuthorizedRequest, IsValidTokenRequest, ValidateWorkflowRequest};
use crate::engine::{
    ClusterConfig, ClusterCore, InMemoryCluster, KubeClient, ResourceAttributes, S3Provider,
    TemplateStore, WorkflowClient, WorkflowClientConfig,
};
use crate::models::Workflow;
use crate::{ControlPlaneError, Result};

pub const IS_VALID_TOKEN_METHOD: &str = "/api.AuthService/IsValidToken";
pub const IS_AUTHORIZED_METHOD: &str = "/api.AuthService/IsAuthorized";

pub const AUTHORIZATION_METADATA_KEY: &str = "authorization";
pub const AUTH_TOKEN_METADATA_KEY: &str = "onepanel-auth-token";
pub const ORIGINAL_AUTHORITY_METADATA_KEY: &str = "x-original-authority";
pub const AUTH_TOKEN_COOKIE: &str = "auth-token";

/// Namespace holding the service accounts that may log in
pub const DEFAULT_SYSTEM_NAMESPACE: &str = "onepanel";

const BEARER_PREFIX: &str = "Bearer ";
const SERVICE_ACCOUNT_TOKEN_MARKER: &str = "-token-";
const MISSING_TOKEN_MESSAGE: &str = "Missing or invalid \"authorization\" header.";

/// The caller's token found in request metadata
pub fn extract_bearer_token(metadata: &RequestMetadata) -> Option<String> {
    if let Some(value) = metadata.first(AUTHORIZATION_METADATA_KEY) {
        if !value.starts_with(BEARER_PREFIX) {
            return None;
        }
        let token = value.replace(BEARER_PREFIX, "");
        if token == "null" {
            return None;
        }
        return Some(token);
    }

    if let Some(token) = metadata
        .get(COOKIE_METADATA_KEY)
        .iter()
        .find_map(|header| cookie_value(header, AUTH_TOKEN_COOKIE))
    {
        return Some(token);
    }

    metadata.first(AUTH_TOKEN_METADATA_KEY).map(str::to_string)
}

/// Value of cookie `name` in a `Cookie` header, without surrounding quotes
fn cookie_value(header: &str, name: &str) -> Option<String> {
    header.split(';').find_map(|pair| {
        let (key, value) = pair.trim().split_once('=')?;
        if key.trim() != name {
            return None;
        }
        let value = value.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .unwrap_or(value);
        Some(value.to_string())
    })
}

/// Point an authorization check at the workspace named by the original authority
///
/// Only `<workspace>--<namespace>.<rest>` is recognised; anything else leaves
/// the request unchanged.
pub fn rewrite_authorization(metadata: &RequestMetadata, request: &mut IsAuthorized) {
    let Some(authority) = metadata.first(ORIGINAL_AUTHORITY_METADATA_KEY) else {
        return;
    };
    let Some((workspace_and_namespace, _)) = authority.split_once('.') else {
        return;
    };
    let pieces: Vec<&str> = workspace_and_namespace.split("--").collect();
    if pieces.len() < 2 {
        return;
    }

    request.namespace = pieces[1].to_string();
    request.resource = "workspaces".to_string();
    request.group = "onepanel.io".to_string();
    request.resource_name = pieces[0].to_string();
    request.verb = "get".to_string();
}

/// Ask the cluster whether the identity behind `core` may perform an action
///
/// A failed review counts as a denial.
pub async fn is_authorized(core: &dyn ClusterCore, attributes: &ResourceAttributes) -> Result<bool> {
    let denied = || {
        ControlPlaneError::PermissionDenied(format!(
            "Permission denied. Namespace: '{}', Verb: '{}', Group: '{}', Resource '{}', Name: '{}'",
            attributes.namespace,
            attributes.verb,
            attributes.group,
            attributes.resource,
            attributes.name
        ))
    };

    match core.self_subject_access_review(attributes).await {
        Ok(true) => Ok(true),
        Ok(false) => {
            debug!(namespace = %attributes.namespace, verb = %attributes.verb, resource = %attributes.resource, name = %attributes.name, "Access denied");
            Err(denied())
        }
        Err(err) => {
            error!(namespace = %attributes.namespace, verb = %attributes.verb, resource = %attributes.resource, error = %err, "Access review failed");
            Err(denied())
        }
    }
}

/// Clients bound to one caller for the lifetime of one call
#[derive(Clone)]
pub struct AuthenticatedSession {
    pub token: String,
    pub client: WorkflowClient,
    pub core: Arc<dyn ClusterCore>,
}

impl AuthenticatedSession {
    pub async fn is_authorized(&self, attributes: &ResourceAttributes) -> Result<bool> {
        is_authorized(self.core.as_ref(), attributes).await
    }
}

/// Builds sessions for tokens
pub trait SessionFactory: Send + Sync {
    /// Fresh clients authenticated as `token`
    fn create_session(&self, token: &str) -> Result<AuthenticatedSession>;

    /// Core client authenticated as the control plane itself
    fn system_core(&self) -> Result<Arc<dyn ClusterCore>>;
}

/// Sessions backed by the cluster API server
pub struct KubeSessionFactory {
    base: ClusterConfig,
    system_token: Option<String>,
    templates: Arc<dyn TemplateStore>,
    client_config: WorkflowClientConfig,
}

impl KubeSessionFactory {
    pub fn new(
        base: ClusterConfig,
        system_token: Option<String>,
        templates: Arc<dyn TemplateStore>,
        client_config: WorkflowClientConfig,
    ) -> Self {
        Self {
            base,
            system_token,
            templates,
            client_config,
        }
    }
}

impl SessionFactory for KubeSessionFactory {
    fn create_session(&self, token: &str) -> Result<AuthenticatedSession> {
        let kube = Arc::new(KubeClient::new(self.base.with_bearer_token(token))?);
        let client = WorkflowClient::new(
            kube.clone(),
            kube.clone(),
            self.templates.clone(),
            Arc::new(S3Provider),
            self.client_config.clone(),
        );
        Ok(AuthenticatedSession {
            token: token.to_string(),
            client,
            core: kube,
        })
    }

    fn system_core(&self) -> Result<Arc<dyn ClusterCore>> {
        let config = match &self.system_token {
            Some(token) => self.base.with_bearer_token(token),
            None => self.base.clone(),
        };
        Ok(Arc::new(KubeClient::new(config)?))
    }
}

/// Sessions over an in-memory cluster; every token sees the same cluster
pub struct InMemorySessionFactory {
    cluster: InMemoryCluster,
    templates: Arc<dyn TemplateStore>,
    client_config: WorkflowClientConfig,
}

impl InMemorySessionFactory {
    pub fn new(
        cluster: InMemoryCluster,
        templates: Arc<dyn TemplateStore>,
        client_config: WorkflowClientConfig,
    ) -> Self {
        Self {
            cluster,
            templates,
            client_config,
        }
    }
}

impl SessionFactory for InMemorySessionFactory {
    fn create_session(&self, token: &str) -> Result<AuthenticatedSession> {
        Ok(AuthenticatedSession {
            token: token.to_string(),
            client: self
                .cluster
                .workflow_client(self.templates.clone(), self.client_config.clone()),
            core: Arc::new(self.cluster.clone()),
        })
    }

    fn system_core(&self) -> Result<Arc<dyn ClusterCore>> {
        Ok(Arc::new(self.cluster.clone()))
    }
}

/// Request bodies the interceptor may need to inspect or rewrite
pub trait InterceptedRequest {
    fn login(&self) -> Option<&IsValidTokenRequest> {
        None
    }

    fn authorization_mut(&mut self) -> Option<&mut IsAuthorized> {
        None
    }
}

impl InterceptedRequest for () {}

impl InterceptedRequest for Workflow {}

impl InterceptedRequest for ValidateWorkflowRequest {}

impl InterceptedRequest for IsValidTokenRequest {
    fn login(&self) -> Option<&IsValidTokenRequest> {
        Some(self)
    }
}

impl InterceptedRequest for IsAuthorizedRequest {
    fn authorization_mut(&mut self) -> Option<&mut IsAuthorized> {
        Some(&mut self.is_authorized)
    }
}

/// Authenticates calls and builds their sessions
#[derive(Clone)]
pub struct AuthInterceptor {
    sessions: Arc<dyn SessionFactory>,
    system_namespace: String,
}

impl AuthInterceptor {
    pub fn new(sessions: Arc<dyn SessionFactory>) -> Self {
        Self {
            sessions,
            system_namespace: DEFAULT_SYSTEM_NAMESPACE.to_string(),
        }
    }

    pub fn with_system_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.system_namespace = namespace.into();
        self
    }

    /// Authenticate a unary call to `method`
    pub async fn authorize_unary<R: InterceptedRequest>(
        &self,
        method: &str,
        metadata: &mut RequestMetadata,
        request: &mut R,
    ) -> Result<AuthenticatedSession> {
        match method {
            IS_VALID_TOKEN_METHOD => {
                let login = request.login().ok_or_else(|| {
                    ControlPlaneError::Unknown(
                        "Login request does not have the correct type.".to_string(),
                    )
                })?;
                let raw_token = self.verify_login(login).await?;
                metadata.set(AUTH_TOKEN_METADATA_KEY, raw_token.clone());
                return self.create_session(&raw_token);
            }
            IS_AUTHORIZED_METHOD => {
                if let Some(authorization) = request.authorization_mut() {
                    rewrite_authorization(metadata, authorization);
                }
            }
            _ => {}
        }

        self.authorize_stream(metadata)
    }

    /// Authenticate a call from its metadata alone
    pub fn authorize_stream(&self, metadata: &RequestMetadata) -> Result<AuthenticatedSession> {
        let token = extract_bearer_token(metadata).ok_or_else(|| {
            debug!("Request without a usable token");
            ControlPlaneError::Unauthenticated(MISSING_TOKEN_MESSAGE.to_string())
        })?;
        self.create_session(&token)
    }

    fn create_session(&self, token: &str) -> Result<AuthenticatedSession> {
        self.sessions.create_session(token).map_err(|err| {
            error!(error = %err, "Failed to build session clients");
            err
        })
    }

    /// Check a login against the service account token on record
    ///
    /// Returns the raw token when the submitted MD5 hex digest matches.
    pub async fn verify_login(&self, request: &IsValidTokenRequest) -> Result<String> {
        let core = self.sessions.system_core()?;
        let accounts = core.list_service_accounts(&self.system_namespace).await?;

        let secret_name = accounts
            .iter()
            .filter(|account| account.metadata.name == request.username)
            .flat_map(|account| account.secrets.iter())
            .find(|secret| secret.name.contains(SERVICE_ACCOUNT_TOKEN_MARKER))
            .map(|secret| secret.name.clone())
            .ok_or_else(|| {
                warn!(username = %request.username, "Login for unknown service account");
                ControlPlaneError::InvalidArgument(format!(
                    "unknown service account '{}'",
                    request.username
                ))
            })?;

        let secret = core.get_secret(&self.system_namespace, &secret_name).await?;
        let token = secret
            .decoded("token")
            .transpose()
            .map_err(|err| {
                error!(secret = %secret_name, error = %err, "Undecodable service account token");
                ControlPlaneError::Unknown("Unknown error.".to_string())
            })?
            .unwrap_or_default();

        let digest = format!("{:x}", Md5::digest(&token));
        if request.token != digest {
            warn!(username = %request.username, "Login token mismatch");
            return Err(ControlPlaneError::InvalidArgument(
                "token doesn't match what's on record".to_string(),
            ));
        }

        Ok(String::from_utf8_lossy(&token).into_owned())
    }
}
