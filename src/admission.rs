use crate::config::RemoteConfig;
use crate::error::SyncError;
use crate::gateway::{ObjectTransport, UploadGateway};
use crate::media::MediaRecord;
use crate::queue::MediaQueue;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Where a freshly captured record ended up.
///
/// The two pending variants back the user-visible notice: buffered
/// because we were offline versus buffered because an online attempt
/// failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionOutcome {
    /// Uploaded directly; nothing persisted locally.
    Uploaded,
    /// Offline or unconfigured; buffered until a connection is available.
    PendingOffline,
    /// Online upload attempt failed; buffered for retry.
    PendingRetry,
}

/// The single routing point for freshly captured media.
///
/// One upload attempt at most, never an inline retry loop: capture
/// latency is never blocked on network backoff. Retries happen only in
/// the reconciliation driver.
pub struct AdmissionPolicy<T: ObjectTransport> {
    gateway: Arc<UploadGateway<T>>,
    queue: Arc<MediaQueue>,
}

impl<T: ObjectTransport> AdmissionPolicy<T> {
    pub fn new(gateway: Arc<UploadGateway<T>>, queue: Arc<MediaQueue>) -> Self {
        Self { gateway, queue }
    }

    /// Route a captured record: upload now when connected with a
    /// complete config, otherwise buffer it in the durable queue.
    #[instrument(skip(self, record, config), fields(key = %record.key))]
    pub async fn admit(
        &self,
        record: MediaRecord,
        online: bool,
        config: &RemoteConfig,
    ) -> Result<AdmissionOutcome, SyncError> {
        if online && config.is_complete() {
            match self.gateway.upload_record(&record, config).await {
                Ok(_) => {
                    info!("Captured record uploaded directly");
                    return Ok(AdmissionOutcome::Uploaded);
                }
                Err(e) => {
                    warn!(error = %e, "Direct upload failed, buffering for retry");
                    self.queue.enqueue(&record).await?;
                    return Ok(AdmissionOutcome::PendingRetry);
                }
            }
        }

        debug!(online, "Offline or unconfigured, buffering capture");
        self.queue.enqueue(&record).await?;
        Ok(AdmissionOutcome::PendingOffline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::MockObjectTransport;
    use chrono::Utc;
    use std::time::Duration;

    fn complete_config() -> RemoteConfig {
        RemoteConfig {
            endpoint: "http://localhost:9000".to_string(),
            bucket: "media".to_string(),
            region: String::new(),
            access_key: "ak".to_string(),
            secret_key: "sk".to_string(),
        }
    }

    fn photo() -> MediaRecord {
        MediaRecord::photo(
            "photo_1000.jpeg",
            "image/jpeg",
            Utc::now(),
            vec![0u8; 200],
        )
    }

    async fn policy(transport: MockObjectTransport) -> (AdmissionPolicy<MockObjectTransport>, Arc<MediaQueue>) {
        let queue = Arc::new(MediaQueue::open_in_memory().await.unwrap());
        let gateway = Arc::new(UploadGateway::new(transport, Duration::from_secs(3600)));
        (AdmissionPolicy::new(gateway, queue.clone()), queue)
    }

    #[tokio::test]
    async fn test_offline_capture_is_buffered_without_gateway_call() {
        let mut transport = MockObjectTransport::new();
        transport.expect_put_object().times(0);

        let (policy, queue) = policy(transport).await;
        let outcome = policy.admit(photo(), false, &complete_config()).await.unwrap();

        assert_eq!(outcome, AdmissionOutcome::PendingOffline);
        let all = queue.list_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].key, "photo_1000.jpeg");
        assert_eq!(all[0].size_bytes, 200);
    }

    #[tokio::test]
    async fn test_incomplete_config_buffers_without_gateway_call() {
        let mut transport = MockObjectTransport::new();
        transport.expect_put_object().times(0);

        let (policy, queue) = policy(transport).await;
        let outcome = policy
            .admit(photo(), true, &RemoteConfig::default())
            .await
            .unwrap();

        assert_eq!(outcome, AdmissionOutcome::PendingOffline);
        assert_eq!(queue.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_online_success_is_not_persisted() {
        let mut transport = MockObjectTransport::new();
        transport
            .expect_put_object()
            .times(1)
            .returning(|_, _, _, _, _| Ok(()));

        let (policy, queue) = policy(transport).await;
        let outcome = policy.admit(photo(), true, &complete_config()).await.unwrap();

        assert_eq!(outcome, AdmissionOutcome::Uploaded);
        assert_eq!(queue.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_online_failure_buffers_for_retry() {
        let mut transport = MockObjectTransport::new();
        transport.expect_put_object().times(1).returning(|_, _, _, _, _| {
            Err(SyncError::transport(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "timed out",
            )))
        });

        let (policy, queue) = policy(transport).await;
        let outcome = policy.admit(photo(), true, &complete_config()).await.unwrap();

        assert_eq!(outcome, AdmissionOutcome::PendingRetry);
        assert_eq!(queue.count().await.unwrap(), 1);
    }
}
