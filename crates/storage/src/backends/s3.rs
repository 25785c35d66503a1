//! S3-compatible storage gateway using the AWS SDK.

use crate::error::{StorageError, StorageResult};
use crate::traits::{ByteStream, Metadata, ObjectGateway, ObjectMeta, normalize_metadata};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::provider::ProvideCredentials;
use aws_credential_types::provider::error::CredentialsError;
use aws_credential_types::provider::future::ProvideCredentials as ProvideCredentialsFuture;
use aws_sdk_s3::Client;
use aws_smithy_http_client::Builder as SmithyHttpClientBuilder;
use bytes::Bytes;
use depot_core::config::StoreConfig;
use futures::StreamExt;
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio_util::io::ReaderStream;
use tracing::instrument;

/// Minimum part size for S3 multipart uploads (5 MiB).
/// S3 requires all parts except the last to be at least 5 MB.
const MIN_PART_SIZE: usize = 5 * 1024 * 1024;

/// Marker included in lazy-credentials initialization errors so we can map
/// them to actionable storage config errors instead of generic transport
/// failures.
const CREDENTIALS_INIT_ERROR_MARKER: &str = "depot-s3-lazy-credentials-init";
const CREDENTIALS_RESOLVE_ERROR_MARKER: &str = "depot-s3-lazy-credentials-resolve";

/// Lazily initializes the AWS default credentials chain on first signed request.
///
/// This avoids constructor-time side effects (notably TLS/native-root
/// initialization) in environments where no root certificates are available.
#[derive(Debug)]
struct LazyDefaultCredentialsProvider {
    region: String,
    chain: OnceCell<aws_config::default_provider::credentials::DefaultCredentialsChain>,
}

impl LazyDefaultCredentialsProvider {
    fn new(region: String) -> Self {
        Self {
            region,
            chain: OnceCell::new(),
        }
    }

    async fn build_chain(
        &self,
    ) -> Result<aws_config::default_provider::credentials::DefaultCredentialsChain, CredentialsError>
    {
        let region = aws_config::Region::new(self.region.clone());

        tokio::task::spawn(async move {
            aws_config::default_provider::credentials::DefaultCredentialsChain::builder()
                .region(region)
                .build()
                .await
        })
        .await
        .map_err(|join_err| {
            CredentialsError::provider_error(format!(
                "{CREDENTIALS_INIT_ERROR_MARKER}: failed to initialize AWS default credential chain: {join_err}"
            ))
        })
    }

    async fn chain(
        &self,
    ) -> Result<&aws_config::default_provider::credentials::DefaultCredentialsChain, CredentialsError>
    {
        self.chain
            .get_or_try_init(|| async { self.build_chain().await })
            .await
    }

    async fn credentials(&self) -> aws_credential_types::provider::Result {
        let chain = self.chain().await?;
        chain.provide_credentials().await.map_err(|err| {
            CredentialsError::provider_error(format!(
                "{CREDENTIALS_RESOLVE_ERROR_MARKER}: default AWS credentials resolution failed: {err}"
            ))
        })
    }
}

impl ProvideCredentials for LazyDefaultCredentialsProvider {
    fn provide_credentials<'a>(&'a self) -> ProvideCredentialsFuture<'a>
    where
        Self: 'a,
    {
        ProvideCredentialsFuture::new(self.credentials())
    }
}

fn map_s3_operation_error<E>(err: aws_sdk_s3::error::SdkError<E>) -> StorageError
where
    E: std::error::Error + Send + Sync + 'static,
{
    let err_text = err.to_string();
    if err_text.contains(CREDENTIALS_INIT_ERROR_MARKER)
        || err_text.contains(CREDENTIALS_RESOLVE_ERROR_MARKER)
    {
        return StorageError::Config(
            "S3 credential initialization failed. Configure credentials explicitly or ensure ambient AWS credentials and trust roots are available."
                .to_string(),
        );
    }

    StorageError::S3(Box::new(err))
}

/// Whether an SDK error is worth retrying: network failures and 5xx
/// responses on idempotent verbs.
fn is_transient<E>(err: &aws_sdk_s3::error::SdkError<E>) -> bool
where
    E: std::error::Error + Send + Sync + 'static,
{
    use aws_sdk_s3::error::SdkError;
    match err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            true
        }
        SdkError::ServiceError(service_err) => service_err.raw().status().as_u16() >= 500,
        _ => false,
    }
}

/// Run an idempotent S3 operation, retrying once on transient failure.
async fn with_retry<T, E, F, Fut>(op: &'static str, mut f: F) -> Result<T, aws_sdk_s3::error::SdkError<E>>
where
    E: std::error::Error + Send + Sync + 'static,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, aws_sdk_s3::error::SdkError<E>>>,
{
    match f().await {
        Ok(output) => Ok(output),
        Err(err) if is_transient(&err) => {
            tracing::warn!(operation = op, error = %err, "transient S3 failure, retrying once");
            f().await
        }
        Err(err) => Err(err),
    }
}

/// S3-compatible object gateway.
///
/// One gateway serves all buckets of a single endpoint; the bucket is passed
/// per operation.
pub struct S3Gateway {
    client: Client,
    /// Stored endpoint for logging (normalized).
    endpoint: String,
    region: String,
}

impl std::fmt::Debug for S3Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Gateway")
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

impl S3Gateway {
    /// Create a new S3 gateway from store configuration.
    pub async fn new(config: &StoreConfig) -> StorageResult<Self> {
        config.validate().map_err(StorageError::Config)?;

        let resolved_region = config.region.clone();
        let mut s3_config_builder = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(aws_config::Region::new(resolved_region.clone()));

        // Apply credentials: explicit config or ambient AWS credential chain.
        if let (Some(key_id), Some(secret)) =
            (config.access_key_id.clone(), config.secret_access_key.clone())
        {
            let credentials =
                aws_sdk_s3::config::Credentials::new(key_id, secret, None, None, "depot-config");
            s3_config_builder = s3_config_builder.credentials_provider(credentials);
        } else {
            // Use a lazy provider so chain construction happens on first
            // signed request instead of gateway construction.
            s3_config_builder = s3_config_builder
                .credentials_provider(LazyDefaultCredentialsProvider::new(resolved_region.clone()));
        }

        let normalized_endpoint = config.endpoint.as_ref().map(|endpoint_url| {
            // Handle bare host:port endpoints (e.g., "minio:9000") by
            // prepending the scheme chosen by use_ssl.
            let endpoint_lower = endpoint_url.to_lowercase();
            if endpoint_lower.starts_with("http://") || endpoint_lower.starts_with("https://") {
                endpoint_url.clone()
            } else if config.use_ssl {
                format!("https://{}", endpoint_url)
            } else {
                format!("http://{}", endpoint_url)
            }
        });

        if let Some(endpoint_url) = &normalized_endpoint {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);

            // For explicit HTTP endpoints (e.g. local MinIO), use an
            // HTTP-only client so SDK initialization doesn't depend on
            // native trust roots.
            if endpoint_url.to_ascii_lowercase().starts_with("http://") {
                s3_config_builder =
                    s3_config_builder.http_client(SmithyHttpClientBuilder::new().build_http());
            }
        }

        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = Client::from_conf(s3_config_builder.build());

        let stored_endpoint = match &normalized_endpoint {
            Some(url) => url.clone(),
            None => format!("s3.{}.amazonaws.com", resolved_region),
        };

        Ok(Self {
            client,
            endpoint: stored_endpoint,
            region: resolved_region,
        })
    }

    /// Convert an AWS SDK error to StorageError, mapping NotFound.
    fn map_sdk_error<E>(err: aws_sdk_s3::error::SdkError<E>, key: &str) -> StorageError
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        if let aws_sdk_s3::error::SdkError::ServiceError(ref service_err) = err {
            let raw = service_err.raw();
            if raw.status().as_u16() == 404 {
                return StorageError::NotFound(key.to_string());
            }
        }
        map_s3_operation_error(err)
    }

    async fn object_exists(&self, bucket: &str, key: &str) -> StorageResult<bool> {
        match with_retry("head_object", || {
            self.client.head_object().bucket(bucket).key(key).send()
        })
        .await
        {
            Ok(_) => Ok(true),
            Err(err) => {
                if let aws_sdk_s3::error::SdkError::ServiceError(ref service_err) = err
                    && service_err.raw().status().as_u16() == 404
                {
                    return Ok(false);
                }
                Err(map_s3_operation_error(err))
            }
        }
    }
}

#[async_trait]
impl ObjectGateway for S3Gateway {
    #[instrument(skip(self), fields(backend = "s3"))]
    async fn ensure_bucket(&self, bucket: &str) -> StorageResult<()> {
        let head = self.client.head_bucket().bucket(bucket).send().await;
        if head.is_ok() {
            return Ok(());
        }

        match self.client.create_bucket().bucket(bucket).send().await {
            Ok(_) => Ok(()),
            Err(err) => {
                // Concurrent creators race; converging on an existing bucket
                // is success.
                let text = err.to_string();
                if text.contains("BucketAlreadyOwnedByYou") || text.contains("BucketAlreadyExists")
                {
                    return Ok(());
                }
                Err(map_s3_operation_error(err))
            }
        }
    }

    #[instrument(skip(self, body, metadata), fields(backend = "s3", size = body.len()))]
    async fn put_bytes(
        &self,
        bucket: &str,
        key: &str,
        body: Bytes,
        content_type: &str,
        metadata: &Metadata,
    ) -> StorageResult<()> {
        let user_metadata = normalize_metadata(metadata);
        with_retry("put_object", || {
            self.client
                .put_object()
                .bucket(bucket)
                .key(key)
                .body(body.clone().into())
                .content_type(content_type)
                .set_metadata(Some(user_metadata.clone()))
                .send()
        })
        .await
        .map_err(map_s3_operation_error)?;
        Ok(())
    }

    #[instrument(skip(self, body, metadata), fields(backend = "s3", expected_size = size))]
    async fn put_stream(
        &self,
        bucket: &str,
        key: &str,
        body: ByteStream,
        size: u64,
        content_type: &str,
        metadata: &Metadata,
    ) -> StorageResult<u64> {
        let create_output = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .content_type(content_type)
            .set_metadata(Some(normalize_metadata(metadata)))
            .send()
            .await
            .map_err(map_s3_operation_error)?;

        let upload_id = create_output
            .upload_id()
            .ok_or_else(|| StorageError::Config("S3 did not return upload_id".to_string()))?
            .to_string();

        let mut upload = MultipartUpload {
            client: self.client.clone(),
            bucket: bucket.to_string(),
            key: key.to_string(),
            upload_id,
            parts: Vec::new(),
            part_number: 1,
            bytes_written: 0,
            buffer: Vec::with_capacity(MIN_PART_SIZE),
        };

        let mut body = body;
        let result = async {
            while let Some(frame) = body.next().await {
                upload.write(frame?).await?;
            }
            upload.finish().await
        }
        .await;

        match result {
            Ok(written) => {
                if written != size {
                    tracing::debug!(
                        key = %key,
                        expected = size,
                        actual = written,
                        "streamed object size differs from declared size"
                    );
                }
                Ok(written)
            }
            Err(err) => {
                upload.abort().await;
                Err(err)
            }
        }
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn get(&self, bucket: &str, key: &str) -> StorageResult<(Bytes, Option<String>)> {
        let output = with_retry("get_object", || {
            self.client.get_object().bucket(bucket).key(key).send()
        })
        .await
        .map_err(|e| Self::map_sdk_error(e, key))?;

        let content_type = output.content_type().map(|s| s.to_string());
        let bytes = output
            .body
            .collect()
            .await
            .map_err(|e| StorageError::S3(Box::new(e)))?
            .into_bytes();

        Ok((bytes, content_type))
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn get_stream(&self, bucket: &str, key: &str) -> StorageResult<(ByteStream, u64)> {
        let output = with_retry("get_object", || {
            self.client.get_object().bucket(bucket).key(key).send()
        })
        .await
        .map_err(|e| Self::map_sdk_error(e, key))?;

        let size = output.content_length().unwrap_or(0) as u64;

        // Convert the SDK body to AsyncRead, then wrap with ReaderStream for
        // true streaming.
        let async_read = output.body.into_async_read();
        let reader_stream = ReaderStream::new(async_read);
        let stream = reader_stream.map(|result| result.map_err(StorageError::Io));

        Ok((Box::pin(stream), size))
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn head(&self, bucket: &str, key: &str) -> StorageResult<ObjectMeta> {
        let output = with_retry("head_object", || {
            self.client.head_object().bucket(bucket).key(key).send()
        })
        .await
        .map_err(|e| Self::map_sdk_error(e, key))?;

        let last_modified = output.last_modified().and_then(|dt| {
            time::OffsetDateTime::from_unix_timestamp(dt.secs())
                .inspect_err(|e| {
                    tracing::warn!(
                        key = %key,
                        timestamp = dt.secs(),
                        error = %e,
                        "failed to convert S3 timestamp"
                    );
                })
                .ok()
        });

        Ok(ObjectMeta {
            size: output.content_length().unwrap_or(0) as u64,
            content_type: output.content_type().map(|s| s.to_string()),
            last_modified,
            metadata: output
                .metadata()
                .map(|m| {
                    m.iter()
                        .map(|(k, v)| (k.to_ascii_lowercase(), v.clone()))
                        .collect()
                })
                .unwrap_or_default(),
        })
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn delete(&self, bucket: &str, key: &str) -> StorageResult<()> {
        // S3 delete_object doesn't error on missing keys, so head first to
        // surface NotFound.
        if !self.object_exists(bucket, key).await? {
            return Err(StorageError::NotFound(key.to_string()));
        }

        with_retry("delete_object", || {
            self.client.delete_object().bucket(bucket).key(key).send()
        })
        .await
        .map_err(map_s3_operation_error)?;

        Ok(())
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn list(&self, bucket: &str, prefix: &str) -> StorageResult<Vec<String>> {
        let mut results = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let token = continuation_token.take();
            let output = with_retry("list_objects_v2", || {
                let mut request = self
                    .client
                    .list_objects_v2()
                    .bucket(bucket)
                    .prefix(prefix);
                if let Some(token) = &token {
                    request = request.continuation_token(token);
                }
                request.send()
            })
            .await
            .map_err(map_s3_operation_error)?;

            for obj in output.contents() {
                if let Some(obj_key) = obj.key() {
                    results.push(obj_key.to_string());
                }
            }

            if output.is_truncated() == Some(true) {
                continuation_token = output.next_continuation_token().map(|s| s.to_string());
            } else {
                break;
            }
        }

        Ok(results)
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn copy(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> StorageResult<()> {
        // CopySource format: bucket/key. The key portion must be URL-encoded
        // for special characters; the bucket name and separator are not.
        let encoded_key = utf8_percent_encode(src_key, NON_ALPHANUMERIC).to_string();
        let copy_source = format!("{}/{}", src_bucket, encoded_key);

        with_retry("copy_object", || {
            self.client
                .copy_object()
                .bucket(dst_bucket)
                .key(dst_key)
                .copy_source(&copy_source)
                .send()
        })
        .await
        .map_err(|e| Self::map_sdk_error(e, src_key))?;

        Ok(())
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn create_folder_marker(&self, bucket: &str, path: &str) -> StorageResult<()> {
        let marker_key = if path.ends_with('/') {
            path.to_string()
        } else {
            format!("{path}/")
        };

        if self.object_exists(bucket, &marker_key).await? {
            return Ok(());
        }

        with_retry("put_object", || {
            self.client
                .put_object()
                .bucket(bucket)
                .key(&marker_key)
                .body(Bytes::new().into())
                .content_length(0)
                .content_type("application/x-directory")
                .send()
        })
        .await
        .map_err(map_s3_operation_error)?;

        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "s3"
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn health_check(&self) -> StorageResult<()> {
        const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(10);

        let probe = self.client.list_buckets().send();
        match tokio::time::timeout(HEALTH_CHECK_TIMEOUT, probe).await {
            Ok(result) => {
                result.map_err(map_s3_operation_error)?;
                Ok(())
            }
            Err(_) => Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "S3 health check timed out after 10 seconds",
            ))),
        }
    }
}

/// In-flight multipart upload.
///
/// Buffers incoming data to meet S3's 5 MB minimum part size requirement;
/// the last part may be any size.
struct MultipartUpload {
    client: Client,
    bucket: String,
    key: String,
    upload_id: String,
    parts: Vec<aws_sdk_s3::types::CompletedPart>,
    part_number: i32,
    bytes_written: u64,
    buffer: Vec<u8>,
}

impl MultipartUpload {
    async fn write(&mut self, data: Bytes) -> StorageResult<()> {
        self.bytes_written += data.len() as u64;
        self.buffer.extend_from_slice(&data);

        while self.buffer.len() >= MIN_PART_SIZE {
            let part_data: Vec<u8> = self.buffer.drain(..MIN_PART_SIZE).collect();
            self.upload_part(Bytes::from(part_data)).await?;
        }

        Ok(())
    }

    async fn upload_part(&mut self, data: Bytes) -> StorageResult<()> {
        let upload_output = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(&self.upload_id)
            .part_number(self.part_number)
            .body(data.into())
            .send()
            .await
            .map_err(map_s3_operation_error)?;

        let completed_part = aws_sdk_s3::types::CompletedPart::builder()
            .e_tag(upload_output.e_tag().unwrap_or_default())
            .part_number(self.part_number)
            .build();

        self.parts.push(completed_part);
        self.part_number += 1;

        Ok(())
    }

    async fn finish(&mut self) -> StorageResult<u64> {
        if !self.buffer.is_empty() {
            let final_data = std::mem::take(&mut self.buffer);
            self.upload_part(Bytes::from(final_data)).await?;
        }

        // Zero-byte uploads: S3 multipart requires at least one part, so
        // abort the multipart upload and use a plain PutObject instead.
        if self.parts.is_empty() {
            self.abort().await;
            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(&self.key)
                .body(Bytes::new().into())
                .send()
                .await
                .map_err(map_s3_operation_error)?;
            return Ok(self.bytes_written);
        }

        let completed_upload = aws_sdk_s3::types::CompletedMultipartUpload::builder()
            .set_parts(Some(self.parts.clone()))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(&self.upload_id)
            .multipart_upload(completed_upload)
            .send()
            .await
            .map_err(map_s3_operation_error)?;

        Ok(self.bytes_written)
    }

    /// Best-effort abort; orphaned parts are reported but not fatal.
    async fn abort(&mut self) {
        if let Err(e) = self
            .client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(&self.upload_id)
            .send()
            .await
        {
            tracing::warn!(
                key = %self.key,
                upload_id = %self.upload_id,
                error = %e,
                "failed to abort multipart upload, orphaned parts may remain"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn make_gateway(endpoint: Option<&str>, use_ssl: bool) -> S3Gateway {
        S3Gateway::new(&StoreConfig {
            endpoint: endpoint.map(String::from),
            region: "us-east-1".to_string(),
            access_key_id: Some("access".to_string()),
            secret_access_key: Some("secret".to_string()),
            use_ssl,
            force_path_style: true,
        })
        .await
        .expect("gateway should construct for unit tests")
    }

    #[tokio::test]
    async fn test_new_normalizes_bare_endpoint() {
        let gateway = make_gateway(Some("minio:9000"), false).await;
        assert_eq!(gateway.endpoint, "http://minio:9000");

        let gateway = make_gateway(Some("minio:9000"), true).await;
        assert_eq!(gateway.endpoint, "https://minio:9000");

        let gateway = make_gateway(Some("https://s3.example"), false).await;
        assert_eq!(gateway.endpoint, "https://s3.example");
    }

    #[tokio::test]
    async fn test_new_defaults_to_aws_endpoint() {
        let gateway = make_gateway(None, false).await;
        assert_eq!(gateway.endpoint, "s3.us-east-1.amazonaws.com");
        assert_eq!(gateway.backend_name(), "s3");
    }

    #[tokio::test]
    async fn test_new_requires_complete_credentials() {
        let err = S3Gateway::new(&StoreConfig {
            access_key_id: Some("access".to_string()),
            ..Default::default()
        })
        .await
        .unwrap_err();

        assert!(matches!(err, StorageError::Config(_)));
    }
}
