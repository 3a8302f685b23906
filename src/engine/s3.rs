// S3-compatible object storage client

//! Ranged `GetObject` against an S3-compatible endpoint (AWS, MinIO, GCS
//! interop), signed with AWS Signature Version 4.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use hmac::{Hmac, Mac};
use reqwest::{header, Client, StatusCode};
use sha2::{Digest, Sha256};
use tokio_util::io::StreamReader;
use tracing::debug;

use super::storage::{
    ArtifactRepository, ByteRange, ObjectReader, ObjectStorage, StorageError, StorageProvider,
};

type HmacSha256 = Hmac<Sha256>;

const DEFAULT_REGION: &str = "us-east-1";

/// Payload hash of a request without a body
const EMPTY_PAYLOAD_SHA256: &str =
    "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// Client for one S3-compatible endpoint
#[derive(Clone)]
pub struct S3Client {
    http: Client,
    base_url: String,
    host: String,
    region: String,
    access_key: String,
    secret_key: String,
}

impl S3Client {
    pub fn new(repository: &ArtifactRepository) -> Result<Self, StorageError> {
        let endpoint = repository
            .endpoint
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .trim_end_matches('/')
            .to_string();
        if endpoint.is_empty() {
            return Err(StorageError::Configuration("empty s3 endpoint".to_string()));
        }
        let scheme = if repository.insecure { "http" } else { "https" };
        let region = if repository.region.is_empty() {
            DEFAULT_REGION.to_string()
        } else {
            repository.region.clone()
        };

        Ok(Self {
            http: Client::builder().build()?,
            base_url: format!("{}://{}", scheme, endpoint),
            host: endpoint,
            region,
            access_key: repository.access_key.clone(),
            secret_key: repository.secret_key.clone(),
        })
    }

    /// Path-style URI of an object, each segment percent-encoded
    fn canonical_uri(bucket: &str, key: &str) -> String {
        let mut uri = format!("/{}", urlencoding::encode(bucket));
        for segment in key.split('/') {
            uri.push('/');
            uri.push_str(&urlencoding::encode(segment));
        }
        uri
    }

    fn hmac(key: &[u8], data: &str) -> Result<Vec<u8>, StorageError> {
        let mut mac = HmacSha256::new_from_slice(key)
            .map_err(|e| StorageError::Configuration(e.to_string()))?;
        mac.update(data.as_bytes());
        Ok(mac.finalize().into_bytes().to_vec())
    }

    /// `Authorization` header for a GET of `canonical_uri` at `now`
    fn authorization(&self, canonical_uri: &str, now: DateTime<Utc>) -> Result<String, StorageError> {
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let date = now.format("%Y%m%d").to_string();
        let signed_headers = "host;x-amz-content-sha256;x-amz-date";
        let canonical_headers = format!(
            "host:{}\nx-amz-content-sha256:{}\nx-amz-date:{}\n",
            self.host, EMPTY_PAYLOAD_SHA256, amz_date
        );
        let canonical_request = format!(
            "GET\n{}\n\n{}\n{}\n{}",
            canonical_uri, canonical_headers, signed_headers, EMPTY_PAYLOAD_SHA256
        );

        let scope = format!("{}/{}/s3/aws4_request", date, self.region);
        let string_to_sign = format!(
            "AWS4-HMAC-SHA256\n{}\n{}\n{:x}",
            amz_date,
            scope,
            Sha256::digest(canonical_request.as_bytes())
        );

        let date_key = Self::hmac(format!("AWS4{}", self.secret_key).as_bytes(), &date)?;
        let region_key = Self::hmac(&date_key, &self.region)?;
        let service_key = Self::hmac(&region_key, "s3")?;
        let signing_key = Self::hmac(&service_key, "aws4_request")?;
        let signature: String = Self::hmac(&signing_key, &string_to_sign)?
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect();

        Ok(format!(
            "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
            self.access_key, scope, signed_headers, signature
        ))
    }
}

#[async_trait::async_trait]
impl ObjectStorage for S3Client {
    async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        range: Option<ByteRange>,
    ) -> Result<ObjectReader, StorageError> {
        let now = Utc::now();
        let canonical_uri = Self::canonical_uri(bucket, key);
        let url = format!("{}{}", self.base_url, canonical_uri);
        debug!(bucket = %bucket, key = %key, "Reading object");

        let mut request = self
            .http
            .get(&url)
            .header(header::AUTHORIZATION, self.authorization(&canonical_uri, now)?)
            .header("x-amz-content-sha256", EMPTY_PAYLOAD_SHA256)
            .header("x-amz-date", now.format("%Y%m%dT%H%M%SZ").to_string());
        if let Some(range) = range {
            request = request.header(header::RANGE, range.header_value());
        }

        let response = request.send().await?;
        match response.status() {
            status if status.is_success() => {}
            StatusCode::NOT_FOUND => {
                return Err(StorageError::NotFound {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                })
            }
            status => {
                let message = response.text().await.unwrap_or_default();
                return Err(StorageError::Status {
                    status: status.as_u16(),
                    message,
                });
            }
        }

        let body = response
            .bytes_stream()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e));
        Ok(Box::new(StreamReader::new(Box::pin(body))))
    }
}

/// Connects to the S3 endpoint named in a namespace's settings
#[derive(Debug, Clone, Default)]
pub struct S3Provider;

#[async_trait::async_trait]
impl StorageProvider for S3Provider {
    async fn connect(
        &self,
        repository: &ArtifactRepository,
    ) -> Result<Arc<dyn ObjectStorage>, StorageError> {
        Ok(Arc::new(S3Client::new(repository)?))
    }
}
