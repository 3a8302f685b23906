// Object storage abstraction for archived workflow artifacts
// Logs and metrics of completed steps are read back from the artifact repository

//! # Artifact Storage
//!
//! Completed workflow steps leave their logs and metrics in an object store.
//! This module defines how the control plane reaches it:
//! - [`ObjectStorage`]: byte-range reads of one object by bucket + key
//! - [`ArtifactRepository`]: a namespace's storage settings, loaded from the
//!   namespace config map and secret
//! - [`StorageProvider`]: turns repository settings into a connected client
//!
//! ## Key Layout
//!
//! ```text
//! artifacts/<namespace>/<workflow>/<pod>/<container>.log
//! artifacts/<namespace>/<workflow>/<pod>/sys-metrics.json
//! ```

use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use tokio::io::AsyncRead;

use super::cluster::ClusterCore;
use crate::ErrorCode;

/// Config map and secret holding a namespace's storage settings
pub const NAMESPACE_CONFIG_NAME: &str = "onepanel";

/// Config map key with the artifact repository document (YAML)
pub const ARTIFACT_REPOSITORY_KEY: &str = "artifactRepository";

pub const ACCESS_KEY_SECRET_KEY: &str = "artifactRepositoryS3AccessKey";
pub const SECRET_KEY_SECRET_KEY: &str = "artifactRepositoryS3SecretKey";

/// File name of the metrics artifact written by each step
pub const METRICS_FILE_NAME: &str = "sys-metrics.json";

/// Storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Object {bucket}/{key} not found")]
    NotFound { bucket: String, key: String },

    #[error("Invalid range: start {start}, end {end}")]
    InvalidRange { start: i64, end: i64 },

    #[error("Storage configuration error: {0}")]
    Configuration(String),

    #[error("Storage request failed ({status}): {message}")]
    Status { status: u16, message: String },

    #[error("Storage transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    pub fn code(&self) -> ErrorCode {
        match self {
            StorageError::NotFound { .. } => ErrorCode::NotFound,
            StorageError::InvalidRange { .. } => ErrorCode::InvalidArgument,
            StorageError::Configuration(_) => ErrorCode::PermissionDenied,
            StorageError::Status { status: 403, .. } => ErrorCode::PermissionDenied,
            _ => ErrorCode::Unknown,
        }
    }

    /// The object itself is missing, as opposed to the store being unreachable
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StorageError::NotFound { .. } | StorageError::Status { status: 404, .. }
        )
    }
}

/// Body of an object read
pub type ObjectReader = Box<dyn AsyncRead + Send + Unpin>;

/// An inclusive byte range in object-store conventions
///
/// `[0, -N]` selects the trailing `N` bytes and `[S, 0]` everything from `S`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: i64,
    pub end: i64,
}

impl ByteRange {
    pub fn new(start: i64, end: i64) -> Result<Self, StorageError> {
        let valid = (start == 0 && end < 0) || (start > 0 && end == 0) || (0 <= start && start <= end);
        if !valid {
            return Err(StorageError::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// Value of the HTTP `Range` header
    pub fn header_value(&self) -> String {
        match (self.start, self.end) {
            (0, end) if end < 0 => format!("bytes={}", end),
            (start, 0) if start > 0 => format!("bytes={}-", start),
            (start, end) => format!("bytes={}-{}", start, end),
        }
    }

    /// The part of `data` this range selects
    pub fn slice<'a>(&self, data: &'a [u8]) -> &'a [u8] {
        let len = data.len() as i64;
        let (from, to) = match (self.start, self.end) {
            (0, end) if end < 0 => ((len + end).max(0), len),
            (start, 0) if start > 0 => (start.min(len), len),
            (start, end) => (start.min(len), (end + 1).min(len)),
        };
        if from >= to {
            return &[];
        }
        &data[from as usize..to as usize]
    }
}

/// Byte-range reads from an object store
#[async_trait::async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        range: Option<ByteRange>,
    ) -> Result<ObjectReader, StorageError>;
}

/// Storage settings of one namespace
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactRepository {
    pub bucket: String,
    pub endpoint: String,
    pub region: String,
    pub insecure: bool,
    pub access_key: String,
    pub secret_key: String,
}

#[derive(Debug, Deserialize)]
struct RepositoryDocument {
    s3: Option<S3Settings>,
}

#[derive(Debug, Deserialize)]
struct S3Settings {
    #[serde(default)]
    bucket: String,
    #[serde(default)]
    endpoint: String,
    #[serde(default)]
    region: String,
    #[serde(default)]
    insecure: bool,
}

impl ArtifactRepository {
    /// Load the repository settings of a namespace from the cluster
    pub async fn load(core: &dyn ClusterCore, namespace: &str) -> Result<Self, StorageError> {
        let config_map = core
            .get_config_map(namespace, NAMESPACE_CONFIG_NAME)
            .await
            .map_err(|e| StorageError::Configuration(e.to_string()))?;
        let document = config_map.data.get(ARTIFACT_REPOSITORY_KEY).ok_or_else(|| {
            StorageError::Configuration(format!(
                "config map {} has no {}",
                NAMESPACE_CONFIG_NAME, ARTIFACT_REPOSITORY_KEY
            ))
        })?;
        let document: RepositoryDocument = serde_yaml::from_str(document)
            .map_err(|e| StorageError::Configuration(e.to_string()))?;
        let s3 = document
            .s3
            .ok_or_else(|| StorageError::Configuration("no s3 artifact repository".to_string()))?;

        let secret = core
            .get_secret(namespace, NAMESPACE_CONFIG_NAME)
            .await
            .map_err(|e| StorageError::Configuration(e.to_string()))?;
        let credential = |key: &str| -> Result<String, StorageError> {
            let bytes = secret
                .decoded(key)
                .ok_or_else(|| StorageError::Configuration(format!("secret has no {}", key)))?
                .map_err(|e| StorageError::Configuration(format!("{}: {}", key, e)))?;
            Ok(String::from_utf8_lossy(&bytes).trim().to_string())
        };

        Ok(Self {
            bucket: s3.bucket,
            endpoint: s3.endpoint,
            region: s3.region,
            insecure: s3.insecure,
            access_key: credential(ACCESS_KEY_SECRET_KEY)?,
            secret_key: credential(SECRET_KEY_SECRET_KEY)?,
        })
    }

    pub fn log_key(namespace: &str, workflow: &str, pod: &str, container: &str) -> String {
        format!("artifacts/{}/{}/{}/{}.log", namespace, workflow, pod, container)
    }

    pub fn metrics_key(namespace: &str, workflow: &str, pod: &str) -> String {
        format!(
            "artifacts/{}/{}/{}/{}",
            namespace, workflow, pod, METRICS_FILE_NAME
        )
    }
}

/// Connects to the object store described by repository settings
#[async_trait::async_trait]
pub trait StorageProvider: Send + Sync {
    async fn connect(
        &self,
        repository: &ArtifactRepository,
    ) -> Result<Arc<dyn ObjectStorage>, StorageError>;
}

/// Object store that refuses every connection
#[cfg(test)]
pub(crate) struct UnreachableStorage;

#[cfg(test)]
#[async_trait::async_trait]
impl ObjectStorage for UnreachableStorage {
    async fn get_object(
        &self,
        _bucket: &str,
        _key: &str,
        _range: Option<ByteRange>,
    ) -> Result<ObjectReader, StorageError> {
        Err(StorageError::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "connection refused",
        )))
    }
}

#[cfg(test)]
#[async_trait::async_trait]
impl StorageProvider for UnreachableStorage {
    async fn connect(
        &self,
        _repository: &ArtifactRepository,
    ) -> Result<Arc<dyn ObjectStorage>, StorageError> {
        Ok(Arc::new(UnreachableStorage))
    }
}
