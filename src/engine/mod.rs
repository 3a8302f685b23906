// Workflow control plane engine
// Collaborator interfaces, their implementations and the lifecycle client

//! # Engine Module
//!
//! The layer between the API handlers and the cluster. Handlers only ever
//! talk to a [`WorkflowClient`]; the client reaches the cluster through
//! narrow collaborator traits so every dependency can be swapped out.
//!
//! ## Collaborators
//!
//! - `cluster`: [`WorkflowEngine`] and [`ClusterCore`] traits, the resource
//!   types they exchange and [`ClusterError`]
//! - `storage`: [`ObjectStorage`], [`StorageProvider`] and the namespace's
//!   [`ArtifactRepository`] settings
//! - `templates`: [`TemplateStore`] for versioned workflow templates
//!
//! ## Implementations
//!
//! - `kube`: [`KubeClient`], the cluster REST API over `reqwest`
//! - `s3`: [`S3Client`], SigV4-signed object reads
//! - `templates`: [`PgTemplateStore`] backed by Postgres via `sqlx`
//! - `memory`: [`InMemoryCluster`] and [`InMemoryTemplateStore`] for local
//!   development and tests
//!
//! ## Operations
//!
//! - `injector`: [`ManifestFieldInjector`], deployment defaults applied to
//!   every submitted workflow
//! - `lifecycle`: [`WorkflowClient`] create/validate/get/list/watch/control
//! - `watcher`: the status snapshot stream behind watch
//! - `logs` / `metrics`: live and archived step output
//! - `operations` / `validation`: engine-side formulation shared by the
//!   implementations
//! - `stream`: [`TaskStream`], a cancellable producer-task stream

pub mod cluster;
pub mod injector;
pub mod kube;
pub mod lifecycle;
pub mod logs;
pub mod memory;
pub mod metrics;
pub mod operations;
pub mod s3;
pub mod storage;
pub mod stream;
pub mod templates;
pub mod validation;
pub mod watcher;

pub use cluster::{
    ClusterCore, ClusterError, ClusterResult, ConfigMap, PodLogOptions, ResourceAttributes,
    Secret, ServiceAccount, WatchEvent, WatchStream, WorkflowEngine,
};
pub use injector::ManifestFieldInjector;
pub use kube::{ClusterConfig, KubeClient};
pub use lifecycle::{generate_name_prefix, WorkflowClient, WorkflowClientConfig};
pub use memory::InMemoryCluster;
pub use s3::{S3Client, S3Provider};
pub use storage::{ArtifactRepository, ByteRange, ObjectStorage, StorageError, StorageProvider};
pub use stream::TaskStream;
pub use templates::{InMemoryTemplateStore, PgTemplateStore, TemplateStore};
