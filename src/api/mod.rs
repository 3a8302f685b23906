// Workflow control plane HTTP API
// Exposes the workflow and auth services over axum

pub mod auth;
pub mod handlers;
pub mod metadata;
pub mod types;

use std::sync::Arc;

use axum::{
    routing::{get, post, put},
    Router,
};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use auth::{AuthInterceptor, InMemorySessionFactory, SessionFactory, DEFAULT_SYSTEM_NAMESPACE};
use handlers::{
    create_workflow, get_workflow, get_workflow_logs, get_workflow_metrics, handle_panic,
    health_check, is_authorized, is_valid_token, list_workflows, not_found, resubmit_workflow,
    resume_workflow, retry_workflow, suspend_workflow, terminate_workflow, validate_workflow,
    watch_workflow, ApiState,
};
use crate::engine::{InMemoryCluster, InMemoryTemplateStore, WorkflowClientConfig};

/// Control plane server configuration
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    pub cors_enabled: bool,
    /// Namespace of the service accounts checked at login
    pub system_namespace: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8888,
            host: "0.0.0.0".to_string(),
            cors_enabled: true,
            system_namespace: DEFAULT_SYSTEM_NAMESPACE.to_string(),
        }
    }
}

/// Control plane API server
pub struct ControlPlaneServer {
    config: ServerConfig,
    state: ApiState,
}

impl ControlPlaneServer {
    pub fn new(config: ServerConfig, sessions: Arc<dyn SessionFactory>) -> Self {
        let interceptor =
            AuthInterceptor::new(sessions).with_system_namespace(config.system_namespace.clone());
        Self {
            config,
            state: ApiState::new(interceptor),
        }
    }

    /// Create the Axum router with all workflow and auth routes
    pub fn create_router(&self) -> Router {
        let executions = "/apis/v1beta1/:namespace/workflow_executions";
        let api_router = Router::new()
            // Workflow service
            .route(executions, get(list_workflows).post(create_workflow))
            .route(&format!("{}/:name", executions), get(get_workflow))
            .route(&format!("{}/:name/watch", executions), get(watch_workflow))
            .route(
                &format!(
                    "{}/:name/pods/:pod_name/containers/:container_name/logs",
                    executions
                ),
                get(get_workflow_logs),
            )
            .route(
                &format!("{}/:name/pods/:pod_name/metrics", executions),
                get(get_workflow_metrics),
            )
            .route(&format!("{}/:name/retry", executions), put(retry_workflow))
            .route(&format!("{}/:name/resubmit", executions), put(resubmit_workflow))
            .route(&format!("{}/:name/resume", executions), put(resume_workflow))
            .route(&format!("{}/:name/suspend", executions), put(suspend_workflow))
            .route(&format!("{}/:name/terminate", executions), put(terminate_workflow))
            .route(
                "/apis/v1beta1/:namespace/workflow_validations",
                post(validate_workflow),
            )
            // Auth service
            .route("/apis/auth/v1beta1/is_valid_token", post(is_valid_token))
            .route("/apis/auth/v1beta1/is_authorized", post(is_authorized))
            // Health check
            .route("/health", get(health_check))
            // Fallback for unknown routes
            .fallback(not_found)
            .with_state(self.state.clone())
            .layer(CatchPanicLayer::custom(handle_panic))
            .layer(TraceLayer::new_for_http());

        if self.config.cors_enabled {
            api_router.layer(CorsLayer::permissive())
        } else {
            api_router
        }
    }

    /// Run the server
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let app = self.create_router();
        let addr = format!("{}:{}", self.config.host, self.config.port);

        info!("🚀 Workflow control plane starting");
        info!("📡 Server address: http://{}", addr);
        info!("🔗 API endpoints:");
        info!("   GET/POST http://{}/apis/v1beta1/{{namespace}}/workflow_executions", addr);
        info!("   POST     http://{}/apis/auth/v1beta1/is_valid_token", addr);
        info!("   GET      http://{}/health", addr);
        info!("📋 Configuration:");
        info!("   CORS enabled: {}", self.config.cors_enabled);
        info!("   System namespace: {}", self.config.system_namespace);

        axum::Server::bind(&addr.parse()?)
            .serve(app.into_make_service())
            .await?;

        Ok(())
    }
}

/// Builder pattern for the control plane server
pub struct ControlPlaneServerBuilder {
    config: ServerConfig,
    sessions: Option<Arc<dyn SessionFactory>>,
}

impl ControlPlaneServerBuilder {
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
            sessions: None,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn with_host(mut self, host: String) -> Self {
        self.config.host = host;
        self
    }

    pub fn with_cors(mut self, enabled: bool) -> Self {
        self.config.cors_enabled = enabled;
        self
    }

    pub fn with_system_namespace(mut self, namespace: String) -> Self {
        self.config.system_namespace = namespace;
        self
    }

    pub fn with_sessions(mut self, sessions: Arc<dyn SessionFactory>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    /// Build the server; without a session factory it serves an empty in-memory cluster
    pub fn build(self) -> ControlPlaneServer {
        let sessions = self.sessions.unwrap_or_else(|| {
            Arc::new(InMemorySessionFactory::new(
                InMemoryCluster::new(),
                Arc::new(InMemoryTemplateStore::new()),
                WorkflowClientConfig::default(),
            ))
        });
        ControlPlaneServer::new(self.config, sessions)
    }
}

impl Default for ControlPlaneServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::cluster::{ObjectReference, Secret, ServiceAccount};
    use crate::engine::ResourceAttributes;
    use crate::models::{ObjectMeta, WorkflowTemplate};
    use axum::body::Body;
    use axum::http::{header, Method, Request, StatusCode};
    use axum::response::Response;
    use md5::{Digest, Md5};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    const MANIFEST: &str = r#"
kind: Workflow
metadata:
  generateName: ignored-
spec:
  entrypoint: main
  templates:
  - name: main
    container:
      image: alpine
"#;

    async fn test_app() -> (InMemoryCluster, Router) {
        let cluster = InMemoryCluster::new();
        let templates = Arc::new(InMemoryTemplateStore::new());
        templates
            .insert(
                "team-a",
                WorkflowTemplate {
                    uid: "tpl-1".to_string(),
                    name: "hello".to_string(),
                    version: 1,
                    manifest: MANIFEST.to_string(),
                },
            )
            .await;
        let server = ControlPlaneServerBuilder::new()
            .with_sessions(Arc::new(InMemorySessionFactory::new(
                cluster.clone(),
                templates,
                WorkflowClientConfig::default(),
            )))
            .build();
        (cluster, server.create_router())
    }

    fn request(method: Method, uri: &str, body: Option<Value>) -> Request<Body> {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, "Bearer test-token")
            .header(header::CONTENT_TYPE, "application/json");
        match body {
            Some(body) => builder.body(Body::from(body.to_string())).unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    // Extract JSON body from response
    async fn json_body(response: Response) -> Value {
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_builder_pattern() {
        let server = ControlPlaneServerBuilder::new()
            .with_port(9000)
            .with_cors(false)
            .with_system_namespace("platform".to_string())
            .build();

        assert_eq!(server.config.port, 9000);
        assert!(!server.config.cors_enabled);
        assert_eq!(server.config.system_namespace, "platform");
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (_, app) = test_app().await;
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_create_get_and_list() {
        let (_, app) = test_app().await;

        let response = app
            .clone()
            .oneshot(request(
                Method::POST,
                "/apis/v1beta1/team-a/workflow_executions",
                Some(json!({ "workflowTemplate": { "uid": "tpl-1", "version": 1 } })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let created = json_body(response).await;
        let name = created["name"].as_str().unwrap().to_string();
        assert!(name.starts_with("hello-"));

        let response = app
            .clone()
            .oneshot(request(
                Method::GET,
                &format!("/apis/v1beta1/team-a/workflow_executions/{}", name),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let fetched = json_body(response).await;
        assert_eq!(fetched["workflowTemplate"]["uid"], "tpl-1");
        assert!(fetched["manifest"].as_str().unwrap().contains(&name));

        let response = app
            .oneshot(request(
                Method::GET,
                "/apis/v1beta1/team-a/workflow_executions?workflowTemplateUid=tpl-1",
                None,
            ))
            .await
            .unwrap();
        let listed = json_body(response).await;
        assert_eq!(listed["count"], 1);
        assert_eq!(listed["workflows"][0]["name"], name.as_str());
    }

    #[tokio::test]
    async fn test_errors_render_code_and_message() {
        let (_, app) = test_app().await;

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/apis/v1beta1/team-a/workflow_executions/missing")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(response).await["code"], "Unauthenticated");

        let response = app
            .clone()
            .oneshot(request(
                Method::GET,
                "/apis/v1beta1/team-a/workflow_executions/missing",
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = json_body(response).await;
        assert_eq!(body["code"], "NotFound");
        assert_eq!(body["message"], "Workflow not found.");

        let response = app
            .oneshot(request(
                Method::PUT,
                "/apis/v1beta1/team-a/workflow_executions/missing/suspend",
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(json_body(response).await["message"], "Resource not found.");
    }

    #[tokio::test]
    async fn test_validate_endpoint() {
        let (_, app) = test_app().await;
        let response = app
            .clone()
            .oneshot(request(
                Method::POST,
                "/apis/v1beta1/team-a/workflow_validations",
                Some(json!({ "manifest": MANIFEST })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(request(
                Method::POST,
                "/apis/v1beta1/team-a/workflow_validations",
                Some(json!({ "manifest": MANIFEST.replace("entrypoint: main", "entrypoint: other") })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_watch_streams_server_sent_events() {
        let (cluster, app) = test_app().await;
        let mut wf = crate::models::WorkflowResource::default();
        wf.metadata.name = "done".to_string();
        wf.status = Some(crate::models::WorkflowStatus {
            finished_at: Some(chrono::Utc::now()),
            ..Default::default()
        });
        wf.metadata
            .labels
            .insert(crate::models::WORKFLOW_TEMPLATE_UID_LABEL.to_string(), "tpl-1".to_string());
        wf.metadata.labels.insert(
            crate::models::WORKFLOW_TEMPLATE_VERSION_LABEL.to_string(),
            "1".to_string(),
        );
        cluster.insert_workflow("team-a", wf).await;

        let response = app
            .oneshot(request(
                Method::GET,
                "/apis/v1beta1/team-a/workflow_executions/done/watch",
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/event-stream"
        );
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        let body = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(body.starts_with("data: "));
        assert!(body.contains("\"name\":\"done\""));
    }

    #[tokio::test]
    async fn test_login_and_authorization_check() {
        let (cluster, app) = test_app().await;
        cluster
            .put_service_account(
                DEFAULT_SYSTEM_NAMESPACE,
                ServiceAccount {
                    metadata: ObjectMeta {
                        name: "admin".to_string(),
                        ..Default::default()
                    },
                    secrets: vec![ObjectReference {
                        name: "admin-token-x9".to_string(),
                    }],
                },
            )
            .await;
        cluster
            .put_secret(
                DEFAULT_SYSTEM_NAMESPACE,
                Secret::from_plain("admin-token-x9", [("token", "raw")]),
            )
            .await;

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/apis/auth/v1beta1/is_valid_token")
                    .header(header::AUTHORIZATION, "Bearer expired-session")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(
                        json!({ "username": "admin", "token": format!("{:x}", Md5::digest(b"raw")) })
                            .to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["token"], "raw");

        let authorization_check = |authority: &'static str| {
            Request::builder()
                .method(Method::POST)
                .uri("/apis/auth/v1beta1/is_authorized")
                .header(header::AUTHORIZATION, "Bearer raw")
                .header(header::CONTENT_TYPE, "application/json")
                .header("x-original-authority", authority)
                .body(Body::from(json!({ "isAuthorized": {} }).to_string()))
                .unwrap()
        };

        let response = app
            .clone()
            .oneshot(authorization_check("notebook--team-a.example.com"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        cluster
            .grant(ResourceAttributes {
                namespace: "team-a".to_string(),
                verb: "get".to_string(),
                group: "onepanel.io".to_string(),
                resource: "workspaces".to_string(),
                name: "notebook".to_string(),
            })
            .await;
        let response = app
            .oneshot(authorization_check("notebook--team-a.example.com"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["authorized"], true);
    }
}
