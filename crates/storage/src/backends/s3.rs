//! S3-compatible storage backend using AWS SDK.
//!
//! Every save becomes a multipart upload to `{prefix}/objects/{uuid}{ext}`. Parts are
//! flushed once [`MIN_PART_SIZE`] bytes accumulate, so memory stays bounded no matter
//! how large the object is.

use crate::error::{StorageError, StorageResult};
use crate::traits::{ByteStream, ObjectMeta, ObjectStore, SaveOptions, SavedObject};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::Client;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use std::time::Duration;
use tokio_util::io::ReaderStream;
use tracing::instrument;
use trove_core::{ContentHash, ContentHasher};
use uuid::Uuid;

/// Minimum part size for S3 multipart uploads (5 MiB).
/// S3 requires all parts except the last to be at least 5 MB.
const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// Key namespace for stored objects, below the configured prefix.
const OBJECTS_DIR: &str = "objects";

/// Upper bound for the bucket probe in `health_check`.
const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

fn map_s3_operation_error<E>(err: SdkError<E>) -> StorageError
where
    E: std::error::Error + Send + Sync + 'static,
{
    StorageError::S3(Box::new(err))
}

fn is_not_found<E>(err: &SdkError<E>) -> bool {
    matches!(err, SdkError::ServiceError(service_err) if service_err.raw().status().as_u16() == 404)
}

/// S3-compatible object store using AWS SDK.
pub struct S3Backend {
    client: Client,
    bucket: String,
    prefix: Option<String>,
}

impl std::fmt::Debug for S3Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Backend")
            .field("bucket", &self.bucket)
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

/// Endpoint as given, or with `http://` prepended for bare `host:port` values.
fn normalize_endpoint(endpoint: &str) -> String {
    let lower = endpoint.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        endpoint.to_string()
    } else {
        format!("http://{endpoint}")
    }
}

/// Prefix without surrounding slashes; `None` when nothing remains.
fn normalize_prefix(prefix: Option<String>) -> Option<String> {
    prefix
        .map(|p| p.trim_matches('/').to_string())
        .filter(|p| !p.is_empty())
}

impl S3Backend {
    /// Create a new S3 backend.
    ///
    /// # Arguments
    /// * `force_path_style` - Use path-style URLs (`endpoint/bucket/key`) instead of
    ///   virtual-hosted style. Required for MinIO and some S3-compatible services.
    pub async fn new(
        bucket: &str,
        endpoint: Option<String>,
        region: Option<String>,
        prefix: Option<String>,
        access_key_id: Option<String>,
        secret_access_key: Option<String>,
        force_path_style: bool,
    ) -> StorageResult<Self> {
        if access_key_id.is_some() ^ secret_access_key.is_some() {
            return Err(StorageError::Config(
                "s3 config requires both access_key_id and secret_access_key when either is set"
                    .to_string(),
            ));
        }

        let region = aws_config::Region::new(region.unwrap_or_else(|| "us-east-1".to_string()));
        let mut builder = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(region.clone());

        if let (Some(key_id), Some(secret)) = (access_key_id, secret_access_key) {
            let credentials =
                aws_sdk_s3::config::Credentials::new(key_id, secret, None, None, "trove-config");
            builder = builder.credentials_provider(credentials);
        } else {
            let chain = aws_config::default_provider::credentials::DefaultCredentialsChain::builder()
                .region(region)
                .build()
                .await;
            builder = builder.credentials_provider(chain);
        }

        if let Some(endpoint) = endpoint.as_deref() {
            builder = builder.endpoint_url(normalize_endpoint(endpoint));
        }
        if force_path_style {
            builder = builder.force_path_style(true);
        }

        Ok(Self {
            client: Client::from_conf(builder.build()),
            bucket: bucket.to_string(),
            prefix: normalize_prefix(prefix),
        })
    }

    /// Get the full object key for a key (applies prefix if configured).
    fn full_key(&self, key: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}/{key}"),
            None => key.to_string(),
        }
    }

    /// Fresh caller-visible key for a save.
    fn new_object_key(ext: &str) -> String {
        format!("{OBJECTS_DIR}/{}{ext}", Uuid::new_v4())
    }

    /// Convert an AWS SDK error to StorageError, mapping 404 to `NotFound`.
    fn map_sdk_error<E>(err: SdkError<E>, key: &str) -> StorageError
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        if is_not_found(&err) {
            return StorageError::NotFound(key.to_string());
        }
        map_s3_operation_error(err)
    }

    async fn abort_upload(&self, full_key: &str, upload_id: &str) {
        if let Err(e) = self
            .client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(full_key)
            .upload_id(upload_id)
            .send()
            .await
        {
            tracing::warn!(
                key = %full_key,
                upload_id = %upload_id,
                error = %e,
                "Failed to abort multipart upload, orphaned parts may remain"
            );
        }
    }

    /// Drive the multipart upload. The caller aborts on error.
    async fn upload_parts(
        &self,
        full_key: &str,
        upload_id: &str,
        mut stream: ByteStream,
        hasher: &mut ContentHasher,
    ) -> StorageResult<Vec<CompletedPart>> {
        let mut parts = Vec::new();
        let mut buffer = BytesMut::with_capacity(MIN_PART_SIZE);

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            hasher.update(&chunk);
            buffer.extend_from_slice(&chunk);
            while buffer.len() >= MIN_PART_SIZE {
                let part = buffer.split_to(MIN_PART_SIZE).freeze();
                let index = parts.len();
                parts.push(self.upload_part(full_key, upload_id, index, part).await?);
            }
        }
        if !buffer.is_empty() {
            let index = parts.len();
            parts.push(self.upload_part(full_key, upload_id, index, buffer.freeze()).await?);
        }
        Ok(parts)
    }

    async fn upload_part(
        &self,
        full_key: &str,
        upload_id: &str,
        index: usize,
        data: Bytes,
    ) -> StorageResult<CompletedPart> {
        let part_number = i32::try_from(index + 1)
            .map_err(|_| StorageError::Config("too many multipart parts".to_string()))?;
        let output = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(full_key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(data.into())
            .send()
            .await
            .map_err(map_s3_operation_error)?;

        Ok(CompletedPart::builder()
            .e_tag(output.e_tag().unwrap_or_default())
            .part_number(part_number)
            .build())
    }
}

#[async_trait]
impl ObjectStore for S3Backend {
    #[instrument(skip(self, stream), fields(backend = "s3"))]
    async fn save(&self, stream: ByteStream, options: &SaveOptions) -> StorageResult<SavedObject> {
        let key = Self::new_object_key(&options.key_extension());
        let full_key = self.full_key(&key);

        let mut request = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(&full_key);
        if !options.content_type.is_empty() {
            request = request.content_type(&options.content_type);
        }
        let created = request.send().await.map_err(map_s3_operation_error)?;
        let upload_id = created
            .upload_id()
            .ok_or_else(|| StorageError::Config("S3 did not return upload_id".to_string()))?
            .to_string();

        let mut hasher = ContentHash::hasher();
        let parts = match self
            .upload_parts(&full_key, &upload_id, stream, &mut hasher)
            .await
        {
            Ok(parts) => parts,
            Err(e) => {
                self.abort_upload(&full_key, &upload_id).await;
                return Err(e);
            }
        };

        if parts.is_empty() {
            // Multipart uploads need at least one non-empty part.
            self.abort_upload(&full_key, &upload_id).await;
            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(&full_key)
                .body(Bytes::new().into())
                .send()
                .await
                .map_err(map_s3_operation_error)?;
        } else {
            let completed = CompletedMultipartUpload::builder()
                .set_parts(Some(parts))
                .build();
            if let Err(e) = self
                .client
                .complete_multipart_upload()
                .bucket(&self.bucket)
                .key(&full_key)
                .upload_id(&upload_id)
                .multipart_upload(completed)
                .send()
                .await
            {
                self.abort_upload(&full_key, &upload_id).await;
                return Err(map_s3_operation_error(e));
            }
        }

        let size = hasher.len();
        let hash = hasher.finalize();
        tracing::debug!(key = %key, size, hash = %hash, "Object saved");
        Ok(SavedObject {
            path: key,
            size,
            hash,
        })
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn open(&self, path: &str) -> StorageResult<ByteStream> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.full_key(path))
            .send()
            .await
            .map_err(|e| Self::map_sdk_error(e, path))?;

        let reader = ReaderStream::new(output.body.into_async_read());
        Ok(Box::pin(reader.map(|r| r.map_err(StorageError::Io))))
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn stat(&self, path: &str) -> StorageResult<ObjectMeta> {
        let output = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(self.full_key(path))
            .send()
            .await
            .map_err(|e| Self::map_sdk_error(e, path))?;

        let last_modified = output
            .last_modified()
            .and_then(|dt| time::OffsetDateTime::from_unix_timestamp(dt.secs()).ok());

        Ok(ObjectMeta {
            size: output.content_length().unwrap_or(0).max(0) as u64,
            last_modified,
        })
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn delete(&self, path: &str) -> StorageResult<()> {
        // DeleteObject succeeds for absent keys.
        match self
            .client
            .delete_object()
            .bucket(&self.bucket)
            .key(self.full_key(path))
            .send()
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(map_s3_operation_error(e)),
        }
    }

    fn backend_name(&self) -> &'static str {
        "s3"
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn health_check(&self) -> StorageResult<()> {
        let probe = self.client.head_bucket().bucket(&self.bucket).send();
        tokio::time::timeout(HEALTH_CHECK_TIMEOUT, probe)
            .await
            .map_err(|_| {
                StorageError::Io(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    "S3 health check timed out",
                ))
            })?
            .map_err(map_s3_operation_error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_endpoint() {
        assert_eq!(normalize_endpoint("minio:9000"), "http://minio:9000");
        assert_eq!(normalize_endpoint("https://s3.example"), "https://s3.example");
        assert_eq!(normalize_endpoint("HTTP://Upper"), "HTTP://Upper");
    }

    #[test]
    fn test_normalize_prefix() {
        assert_eq!(normalize_prefix(Some("trove/".into())), Some("trove".into()));
        assert_eq!(normalize_prefix(Some("/a/b/".into())), Some("a/b".into()));
        assert_eq!(normalize_prefix(Some("/".into())), None);
        assert_eq!(normalize_prefix(None), None);
    }

    #[test]
    fn test_new_object_keys_are_unique() {
        let a = S3Backend::new_object_key(".txt");
        let b = S3Backend::new_object_key(".txt");
        assert_ne!(a, b);
        assert!(a.starts_with("objects/"));
        assert!(a.ends_with(".txt"));
    }

    #[tokio::test]
    async fn test_new_requires_complete_credentials() {
        let err = S3Backend::new(
            "bucket",
            None,
            Some("us-east-1".to_string()),
            None,
            Some("access".to_string()),
            None,
            false,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, StorageError::Config(_)));
    }
}
