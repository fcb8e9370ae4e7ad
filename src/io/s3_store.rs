use async_trait::async_trait;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;

use super::blob_store::{validate_key, BlobStore};
use crate::error::StorageError;

/// S3-backed implementation of BlobStore.
///
/// Stores objects in S3 or S3-compatible storage (MinIO, GCS, etc.) under an
/// optional key prefix inside a single bucket.
#[derive(Clone)]
pub struct S3BlobStore {
    client: Client,
    bucket: String,
    prefix: String,
}

impl S3BlobStore {
    pub fn new(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            prefix: String::new(),
        }
    }

    /// Place every key under `prefix` inside the bucket.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into().trim_matches('/').to_string();
        self
    }

    /// Get the bucket name.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    fn object_key(&self, key: &str) -> Result<String, StorageError> {
        validate_key(key)?;
        Ok(if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}/{}", self.prefix, key)
        })
    }

    fn uri(&self, object_key: &str) -> String {
        format!("s3://{}/{}", self.bucket, object_key)
    }
}

/// Map an SDK error to a storage error, recognising missing objects.
///
/// Not-found is detected from the modeled error code, then from a 404 status
/// in the raw response, and finally from the rendered error message.
fn storage_error<E>(uri: String, error: SdkError<E, HttpResponse>) -> StorageError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
{
    let code_not_found = error
        .as_service_error()
        .and_then(|se| se.code())
        .map(|code| code == "NoSuchKey" || code == "NotFound")
        .unwrap_or(false);

    if code_not_found {
        return StorageError::NotFound(uri);
    }

    let status_is_404 = error
        .raw_response()
        .map(|r| r.status().as_u16() == 404)
        .unwrap_or(false);

    if status_is_404 {
        return StorageError::NotFound(uri);
    }

    let message = error.to_string();
    if message.contains("NotFound") || message.contains("NoSuchKey") || message.contains("404") {
        return StorageError::NotFound(uri);
    }

    StorageError::Unavailable(format!("{}: {}", uri, message))
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn put(&self, key: &str, data: Bytes) -> Result<String, StorageError> {
        let object_key = self.object_key(key)?;
        let uri = self.uri(&object_key);

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| StorageError::Unavailable(format!("{}: {}", uri, e)))?;

        Ok(uri)
    }

    async fn get(&self, key: &str) -> Result<Bytes, StorageError> {
        let object_key = self.object_key(key)?;
        let uri = self.uri(&object_key);

        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .send()
            .await
            .map_err(|e| storage_error(uri.clone(), e))?;

        let data = resp
            .body
            .collect()
            .await
            .map_err(|e| StorageError::Unavailable(format!("{}: {}", uri, e)))?
            .into_bytes();

        Ok(data)
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let object_key = self.object_key(key)?;
        let uri = self.uri(&object_key);

        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => match storage_error(uri, e) {
                StorageError::NotFound(_) => Ok(false),
                other => Err(other),
            },
        }
    }
}

/// Create an S3 client with optional custom endpoint and region.
///
/// Use a custom endpoint for S3-compatible services like MinIO:
/// ```ignore
/// let client = create_s3_client(Some("http://localhost:9000"), "us-east-1").await;
/// ```
pub async fn create_s3_client(endpoint_url: Option<&str>, region: &str) -> Client {
    let region = aws_config::Region::new(region.to_string());
    let mut config_loader =
        aws_config::defaults(aws_config::BehaviorVersion::latest()).region(region);

    if let Some(endpoint) = endpoint_url {
        config_loader = config_loader.endpoint_url(endpoint);
    }

    let sdk_config = config_loader.load().await;

    // S3-compatible services need path-style addressing
    let s3_config = if endpoint_url.is_some() {
        aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(true)
            .build()
    } else {
        aws_sdk_s3::config::Builder::from(&sdk_config).build()
    };

    Client::from_conf(s3_config)
}
