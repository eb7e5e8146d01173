use crate::config::RemoteConfig;
use crate::error::SyncError;
use crate::media::{is_thumbnail_key, thumbnail_key, content_type_for_key, MediaKind, MediaRecord};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

/// Metadata of a single remote object, as returned by a list call.
#[derive(Debug, Clone)]
pub struct RemoteObject {
    pub key: String,
    pub size_bytes: i64,
    pub last_modified: Option<DateTime<Utc>>,
}

/// Raw operations against the remote object store.
///
/// The production implementation is [`S3Transport`]; tests substitute a
/// mock to count calls and inject failures. Implementations receive the
/// config per call because it is editable at runtime.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectTransport: Send + Sync {
    async fn put_object(
        &self,
        config: &RemoteConfig,
        key: &str,
        content_type: &str,
        body: Vec<u8>,
        metadata: Vec<(String, String)>,
    ) -> Result<(), SyncError>;

    async fn list_objects(&self, config: &RemoteConfig) -> Result<Vec<RemoteObject>, SyncError>;

    async fn presign_get(
        &self,
        config: &RemoteConfig,
        key: &str,
        expires_in: Duration,
    ) -> Result<String, SyncError>;

    async fn delete_object(&self, config: &RemoteConfig, key: &str) -> Result<(), SyncError>;
}

/// S3-compatible transport built on the AWS SDK.
///
/// Forces path-style addressing and honors a custom endpoint so MinIO,
/// R2 and LocalStack work out of the box. The SDK client is cached and
/// rebuilt only when the remote config changes.
pub struct S3Transport {
    cache: RwLock<Option<(RemoteConfig, S3Client)>>,
}

impl S3Transport {
    pub fn new() -> Self {
        Self {
            cache: RwLock::new(None),
        }
    }

    async fn client_for(&self, config: &RemoteConfig) -> S3Client {
        {
            let cache = self.cache.read().await;
            if let Some((cached, client)) = cache.as_ref() {
                if cached == config {
                    return client.clone();
                }
            }
        }

        let client = build_client(config).await;
        let mut cache = self.cache.write().await;
        *cache = Some((config.clone(), client.clone()));
        client
    }
}

impl Default for S3Transport {
    fn default() -> Self {
        Self::new()
    }
}

async fn build_client(config: &RemoteConfig) -> S3Client {
    let credentials = Credentials::new(
        config.access_key.trim(),
        config.secret_key.trim(),
        None,
        None,
        "snapvault-remote-config",
    );

    let sdk_config = aws_config::defaults(BehaviorVersion::latest())
        .region(aws_config::Region::new(config.region_or_default().to_string()))
        .credentials_provider(credentials)
        .load()
        .await;

    let s3_config = S3ConfigBuilder::from(&sdk_config)
        .endpoint_url(config.endpoint.trim())
        .force_path_style(true)
        .build();

    info!(
        endpoint = %config.endpoint.trim(),
        bucket = %config.bucket.trim(),
        "S3 transport client built"
    );

    S3Client::from_conf(s3_config)
}

#[async_trait]
impl ObjectTransport for S3Transport {
    async fn put_object(
        &self,
        config: &RemoteConfig,
        key: &str,
        content_type: &str,
        body: Vec<u8>,
        metadata: Vec<(String, String)>,
    ) -> Result<(), SyncError> {
        let client = self.client_for(config).await;

        client
            .put_object()
            .bucket(config.bucket.trim())
            .key(key)
            .body(ByteStream::from(body))
            .content_type(content_type)
            .set_metadata(Some(metadata.into_iter().collect()))
            .send()
            .await
            .map_err(SyncError::transport)?;

        Ok(())
    }

    async fn list_objects(&self, config: &RemoteConfig) -> Result<Vec<RemoteObject>, SyncError> {
        let client = self.client_for(config).await;
        let mut objects = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let mut request = client.list_objects_v2().bucket(config.bucket.trim());
            if let Some(token) = &continuation {
                request = request.continuation_token(token);
            }

            let response = request.send().await.map_err(SyncError::transport)?;

            objects.extend(response.contents().iter().filter_map(|obj| {
                let key = obj.key()?.to_string();
                Some(RemoteObject {
                    key,
                    size_bytes: obj.size().unwrap_or(0),
                    last_modified: obj
                        .last_modified()
                        .and_then(|t| DateTime::from_timestamp(t.secs(), t.subsec_nanos())),
                })
            }));

            if response.is_truncated() == Some(true) {
                continuation = response.next_continuation_token().map(String::from);
                if continuation.is_none() {
                    break;
                }
            } else {
                break;
            }
        }

        Ok(objects)
    }

    async fn presign_get(
        &self,
        config: &RemoteConfig,
        key: &str,
        expires_in: Duration,
    ) -> Result<String, SyncError> {
        let client = self.client_for(config).await;

        let presigning_config =
            PresigningConfig::expires_in(expires_in).map_err(SyncError::transport)?;

        let presigned = client
            .get_object()
            .bucket(config.bucket.trim())
            .key(key)
            .presigned(presigning_config)
            .await
            .map_err(SyncError::transport)?;

        Ok(presigned.uri().to_string())
    }

    async fn delete_object(&self, config: &RemoteConfig, key: &str) -> Result<(), SyncError> {
        let client = self.client_for(config).await;

        client
            .delete_object()
            .bucket(config.bucket.trim())
            .key(key)
            .send()
            .await
            .map_err(SyncError::transport)?;

        Ok(())
    }
}

/// Remote media metadata returned by [`UploadGateway::list_records`].
/// No payload: content is fetched lazily through the signed URL.
#[derive(Debug, Clone, Serialize)]
pub struct RemoteMedia {
    pub key: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub last_modified: Option<DateTime<Utc>>,
    pub is_video: bool,
    /// Time-limited signed read URL for the primary object.
    pub url: String,
    /// Signed URL for the paired thumbnail object, if one exists.
    pub thumbnail_url: Option<String>,
}

/// Outcome detail of a successful upload.
#[derive(Debug, Clone, Copy, Default)]
pub struct UploadReport {
    /// The video thumbnail was attempted but failed; the payload itself
    /// uploaded fine.
    pub thumbnail_failed: bool,
}

/// Capability layer over the remote store used by both the capture path
/// and reconciliation.
///
/// Every operation validates config completeness before touching the
/// transport, so an unconfigured store never causes a network call.
pub struct UploadGateway<T: ObjectTransport> {
    transport: T,
    presign_expiry: Duration,
}

impl<T: ObjectTransport> UploadGateway<T> {
    pub fn new(transport: T, presign_expiry: Duration) -> Self {
        Self {
            transport,
            presign_expiry,
        }
    }

    /// Upload a record's payload, preceded for videos by a best-effort
    /// thumbnail upload under the derived thumbnail key.
    ///
    /// Thumbnail-then-payload ordering keeps a listed payload always
    /// discoverable with its thumbnail. A thumbnail failure never fails
    /// the record: it is reported in the [`UploadReport`] and logged.
    /// Re-uploading the same key overwrites the same remote object, so
    /// retries are idempotent.
    #[instrument(skip(self, record, config), fields(key = %record.key, size_bytes = record.size_bytes))]
    pub async fn upload_record(
        &self,
        record: &MediaRecord,
        config: &RemoteConfig,
    ) -> Result<UploadReport, SyncError> {
        config.ensure_complete()?;

        let mut report = UploadReport::default();

        if let MediaKind::Video {
            thumbnail: Some(thumbnail),
            ..
        } = &record.kind
        {
            let thumb_key = thumbnail_key(&record.key);
            if let Err(e) = self
                .transport
                .put_object(config, &thumb_key, "image/jpeg", thumbnail.clone(), Vec::new())
                .await
            {
                warn!(error = %e, thumb_key = %thumb_key, "Thumbnail upload failed, continuing with payload");
                report.thumbnail_failed = true;
            }
        }

        let mut metadata = vec![
            ("media-date".to_string(), record.captured_at.to_rfc3339()),
            ("media-type".to_string(), record.content_type.clone()),
        ];
        if let Some(duration) = record.duration_seconds() {
            metadata.push(("video-duration".to_string(), duration.to_string()));
        }

        self.transport
            .put_object(
                config,
                &record.key,
                &record.content_type,
                record.payload.clone(),
                metadata,
            )
            .await?;

        metrics::counter!("snapvault.uploads.completed").increment(1);
        debug!("Record uploaded");

        Ok(report)
    }

    /// List remote media: primary objects paired with their thumbnails
    /// by naming convention, each resolved to a time-limited signed URL.
    #[instrument(skip(self, config))]
    pub async fn list_records(&self, config: &RemoteConfig) -> Result<Vec<RemoteMedia>, SyncError> {
        config.ensure_complete()?;

        let objects = self.transport.list_objects(config).await?;

        let thumbnails: HashSet<&str> = objects
            .iter()
            .filter(|o| is_thumbnail_key(&o.key))
            .map(|o| o.key.as_str())
            .collect();

        let mut records = Vec::new();
        for object in objects.iter().filter(|o| !is_thumbnail_key(&o.key)) {
            let url = self
                .transport
                .presign_get(config, &object.key, self.presign_expiry)
                .await?;

            let thumb_key = thumbnail_key(&object.key);
            let thumbnail_url = if thumbnails.contains(thumb_key.as_str()) {
                match self
                    .transport
                    .presign_get(config, &thumb_key, self.presign_expiry)
                    .await
                {
                    Ok(url) => Some(url),
                    Err(e) => {
                        // Thumbnail resolution is secondary; the record
                        // stays listable without it.
                        warn!(error = %e, thumb_key = %thumb_key, "Failed to presign thumbnail");
                        None
                    }
                }
            } else {
                None
            };

            let content_type = content_type_for_key(&object.key);
            let is_video = content_type.starts_with("video/");

            records.push(RemoteMedia {
                key: object.key.clone(),
                content_type,
                size_bytes: object.size_bytes,
                last_modified: object.last_modified,
                is_video,
                url,
                thumbnail_url,
            });
        }

        debug!(count = records.len(), "Listed remote media");
        Ok(records)
    }

    /// Delete the primary object; for videos, best-effort-delete the
    /// derived thumbnail afterwards. A thumbnail failure is logged and
    /// swallowed, never escalated into a failure of the primary delete.
    #[instrument(skip(self, config))]
    pub async fn delete_record(
        &self,
        key: &str,
        is_video: bool,
        config: &RemoteConfig,
    ) -> Result<(), SyncError> {
        config.ensure_complete()?;

        self.transport.delete_object(config, key).await?;

        if is_video {
            let thumb_key = thumbnail_key(key);
            if let Err(e) = self.transport.delete_object(config, &thumb_key).await {
                warn!(error = %e, thumb_key = %thumb_key, "Thumbnail delete failed; primary object deleted");
            }
        }

        info!(key, "Remote record deleted");
        Ok(())
    }

    /// Validate that the store is reachable with this config by issuing
    /// a list call. Used to confirm connectivity after a config change.
    pub async fn verify(&self, config: &RemoteConfig) -> Result<(), SyncError> {
        config.ensure_complete()?;
        self.transport.list_objects(config).await?;
        Ok(())
    }
}
