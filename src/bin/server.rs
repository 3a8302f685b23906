// Workflow control plane server
// Run with: cargo run --bin server

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use dotenv::dotenv;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use control_plane::api::auth::{InMemorySessionFactory, KubeSessionFactory, SessionFactory};
use control_plane::engine::{InMemoryCluster, InMemoryTemplateStore, PgTemplateStore, TemplateStore};
use control_plane::{ControlPlaneServerBuilder, Settings};

/// Command line flags; each falls back to its environment variable, then to settings
#[derive(Debug, Parser)]
#[command(name = "server", about = "Workflow control plane API server")]
struct Cli {
    #[arg(long, env = "SERVER_HOST")]
    host: Option<String>,

    #[arg(long, env = "SERVER_PORT")]
    port: Option<u16>,

    /// Serve an in-memory cluster instead of connecting to the API server
    #[arg(long)]
    in_memory: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = dotenv() {
        eprintln!("Warning: Could not load .env file: {}", e);
    }

    let cli = Cli::parse();
    let settings = Settings::load()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_file(settings.logging_enable_caller_trace)
        .with_line_number(settings.logging_enable_caller_trace)
        .init();

    info!("🚀 Starting workflow control plane...");
    info!("=====================================");
    info!("Cluster API server: {}", settings.kube_api_server);
    info!("Default pod GC strategy: {}", settings.argo_pod_gc_strategy);
    info!("Archived log range: {}", settings.artifact_repository_object_range);

    let sessions: Arc<dyn SessionFactory> = if cli.in_memory {
        warn!("⚠️  Serving an in-memory cluster; nothing is persisted");
        Arc::new(InMemorySessionFactory::new(
            InMemoryCluster::new(),
            Arc::new(InMemoryTemplateStore::new()),
            settings.client_config(),
        ))
    } else {
        let dsn = settings
            .db_datasource_name
            .as_deref()
            .context("DB_DATASOURCE_NAME is required unless --in-memory is set")?;
        let templates: Arc<dyn TemplateStore> = Arc::new(PgTemplateStore::connect(dsn).await?);
        info!("✅ Template store connected");
        if settings.system_token.is_none() {
            warn!("SYSTEM_TOKEN is not set; login checks use the base cluster identity");
        }
        Arc::new(KubeSessionFactory::new(
            settings.cluster_config(),
            settings.system_token.clone(),
            templates,
            settings.client_config(),
        ))
    };

    ControlPlaneServerBuilder::new()
        .with_host(cli.host.unwrap_or_else(|| settings.server_host.clone()))
        .with_port(cli.port.unwrap_or(settings.server_port))
        .with_system_namespace(settings.system_namespace.clone())
        .with_sessions(sessions)
        .build()
        .run()
        .await
        .map_err(|e| anyhow::anyhow!(e))?;

    Ok(())
}
