use crate::config::RemoteConfig;
use crate::connectivity::Connectivity;
use crate::error::SyncError;
use crate::gateway::{ObjectTransport, UploadGateway};
use crate::queue::MediaQueue;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify, RwLock};
use tracing::{debug, error, info, instrument, warn};

/// Aggregate result of one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Records in the snapshot the pass attempted.
    pub attempted: usize,
    /// Uploaded and removed from the queue.
    pub uploaded: usize,
    /// Left in the queue for a future pass.
    pub failed: usize,
}

impl ReconcileReport {
    pub fn fully_drained(&self) -> bool {
        self.failed == 0
    }
}

/// Drains the durable queue opportunistically, on connectivity or
/// config triggers.
///
/// Passes are serialized: a trigger that fires while a pass is running
/// is a no-op, and records enqueued mid-pass wait for the next trigger.
/// Each successful upload removes its record immediately, so a crash
/// mid-pass loses nothing already confirmed.
pub struct Reconciler<T: ObjectTransport> {
    queue: Arc<MediaQueue>,
    gateway: Arc<UploadGateway<T>>,
    pass_guard: Mutex<()>,
}

impl<T: ObjectTransport> Reconciler<T> {
    pub fn new(queue: Arc<MediaQueue>, gateway: Arc<UploadGateway<T>>) -> Self {
        Self {
            queue,
            gateway,
            pass_guard: Mutex::new(()),
        }
    }

    /// Run one pass over a snapshot of the queue.
    ///
    /// A failure of one record never aborts the pass; failed records
    /// stay queued and the pass reports a single aggregate result.
    /// Retried uploads reuse the record's key, so the remote store sees
    /// the same object, never a duplicate.
    #[instrument(skip_all)]
    pub async fn run_pass(
        &self,
        online: bool,
        config: &RemoteConfig,
    ) -> Result<ReconcileReport, SyncError> {
        if !online || !config.is_complete() {
            debug!(online, "Reconciliation skipped: not connected or unconfigured");
            return Ok(ReconcileReport::default());
        }

        let Ok(_guard) = self.pass_guard.try_lock() else {
            debug!("Reconciliation pass already in progress");
            return Ok(ReconcileReport::default());
        };

        let snapshot = self.queue.list_all().await?;
        if snapshot.is_empty() {
            debug!("Nothing buffered, reconciliation done");
            return Ok(ReconcileReport::default());
        }

        info!(pending = snapshot.len(), "Starting reconciliation pass");
        let mut report = ReconcileReport {
            attempted: snapshot.len(),
            ..Default::default()
        };

        for record in &snapshot {
            match self.gateway.upload_record(record, config).await {
                Ok(_) => {
                    // Remove immediately, not batched: a crash after this
                    // point can only re-lose records not yet attempted.
                    self.queue.remove(&record.key).await?;
                    report.uploaded += 1;
                }
                Err(e) => {
                    warn!(error = %e, key = %record.key, "Upload failed, leaving record buffered");
                    report.failed += 1;
                }
            }
        }

        if report.failed > 0 {
            // One aggregated notice for the whole pass, not one per item.
            warn!(
                failed = report.failed,
                uploaded = report.uploaded,
                "Failed to upload some buffered items"
            );
            metrics::counter!("snapvault.reconcile.failed_items").increment(report.failed as u64);
        } else {
            info!(uploaded = report.uploaded, "Queue drained");
        }
        metrics::counter!("snapvault.reconcile.passes").increment(1);

        Ok(report)
    }
}

/// Long-running driver: fires a reconciliation pass on start-up, on
/// offline-to-online transitions, and on explicit triggers (a complete
/// remote config being saved).
pub async fn run_driver<T: ObjectTransport>(
    reconciler: Arc<Reconciler<T>>,
    connectivity: Arc<Connectivity>,
    remote_config: Arc<RwLock<RemoteConfig>>,
    trigger: Arc<Notify>,
) {
    let mut online_rx = connectivity.subscribe();

    // Start-up pass: a complete config may already be on disk.
    run_once(&reconciler, &connectivity, &remote_config).await;

    loop {
        tokio::select! {
            changed = online_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                if *online_rx.borrow_and_update() {
                    run_once(&reconciler, &connectivity, &remote_config).await;
                }
            }
            _ = trigger.notified() => {
                run_once(&reconciler, &connectivity, &remote_config).await;
            }
        }
    }
}

async fn run_once<T: ObjectTransport>(
    reconciler: &Reconciler<T>,
    connectivity: &Connectivity,
    remote_config: &RwLock<RemoteConfig>,
) {
    let config = remote_config.read().await.clone();
    if let Err(e) = reconciler.run_pass(connectivity.is_online(), &config).await {
        error!(error = %e, "Reconciliation pass failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::MockObjectTransport;
    use crate::media::MediaRecord;
    use chrono::Utc;
    use mockall::Sequence;
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

    fn photo(key: &str) -> MediaRecord {
        MediaRecord::photo(key, "image/jpeg", Utc::now(), vec![0u8; 8])
    }

    fn transport_failure() -> SyncError {
        SyncError::transport(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "connection reset",
        ))
    }

    async fn reconciler(
        transport: MockObjectTransport,
    ) -> (Reconciler<MockObjectTransport>, Arc<MediaQueue>) {
        let queue = Arc::new(MediaQueue::open_in_memory().await.unwrap());
        let gateway = Arc::new(UploadGateway::new(transport, Duration::from_secs(3600)));
        (Reconciler::new(queue.clone(), gateway), queue)
    }

    #[tokio::test]
    async fn test_offline_pass_is_a_noop() {
        let mut transport = MockObjectTransport::new();
        transport.expect_put_object().times(0);

        let (reconciler, queue) = reconciler(transport).await;
        queue.enqueue(&photo("a.jpeg")).await.unwrap();

        let report = reconciler.run_pass(false, &complete_config()).await.unwrap();
        assert_eq!(report, ReconcileReport::default());
        assert_eq!(queue.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_incomplete_config_pass_is_a_noop() {
        let mut transport = MockObjectTransport::new();
        transport.expect_put_object().times(0);

        let (reconciler, queue) = reconciler(transport).await;
        queue.enqueue(&photo("a.jpeg")).await.unwrap();

        let report = reconciler
            .run_pass(true, &RemoteConfig::default())
            .await
            .unwrap();
        assert_eq!(report.attempted, 0);
        assert_eq!(queue.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_connected_pass_drains_queue() {
        let mut transport = MockObjectTransport::new();
        transport
            .expect_put_object()
            .times(2)
            .returning(|_, _, _, _, _| Ok(()));

        let (reconciler, queue) = reconciler(transport).await;
        queue.enqueue(&photo("a.jpeg")).await.unwrap();
        queue.enqueue(&photo("b.jpeg")).await.unwrap();

        let report = reconciler.run_pass(true, &complete_config()).await.unwrap();
        assert_eq!(report.attempted, 2);
        assert_eq!(report.uploaded, 2);
        assert!(report.fully_drained());
        assert!(queue.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_exactly_the_failed_records() {
        let mut transport = MockObjectTransport::new();
        transport
            .expect_put_object()
            .returning(|_, key, _, _, _| {
                if key == "b.jpeg" {
                    Err(transport_failure())
                } else {
                    Ok(())
                }
            });

        let (reconciler, queue) = reconciler(transport).await;
        queue.enqueue(&photo("a.jpeg")).await.unwrap();
        queue.enqueue(&photo("b.jpeg")).await.unwrap();
        queue.enqueue(&photo("c.jpeg")).await.unwrap();

        let report = reconciler.run_pass(true, &complete_config()).await.unwrap();
        assert_eq!(report.attempted, 3);
        assert_eq!(report.uploaded, 2);
        assert_eq!(report.failed, 1);

        let remaining: Vec<String> = queue
            .list_all()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.key)
            .collect();
        assert_eq!(remaining, vec!["b.jpeg"]);
    }

    #[tokio::test]
    async fn test_retry_after_partial_failure_reuses_same_key() {
        let mut transport = MockObjectTransport::new();
        let mut seq = Sequence::new();

        // Pass 1: A succeeds, B fails.
        transport
            .expect_put_object()
            .withf(|_, key, _, _, _| key == "a.jpeg")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _, _, _| Ok(()));
        transport
            .expect_put_object()
            .withf(|_, key, _, _, _| key == "b.jpeg")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _, _, _| Err(transport_failure()));
        // Pass 2: B succeeds under the same key. Exactly two calls for
        // B's key in total.
        transport
            .expect_put_object()
            .withf(|_, key, _, _, _| key == "b.jpeg")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _, _, _| Ok(()));

        let (reconciler, queue) = reconciler(transport).await;
        queue.enqueue(&photo("a.jpeg")).await.unwrap();
        queue.enqueue(&photo("b.jpeg")).await.unwrap();

        let first = reconciler.run_pass(true, &complete_config()).await.unwrap();
        assert_eq!((first.uploaded, first.failed), (1, 1));
        let remaining: Vec<String> = queue
            .list_all()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.key)
            .collect();
        assert_eq!(remaining, vec!["b.jpeg"]);

        let second = reconciler.run_pass(true, &complete_config()).await.unwrap();
        assert_eq!((second.uploaded, second.failed), (1, 0));
        assert!(queue.list_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_queue_pass_makes_no_calls() {
        let mut transport = MockObjectTransport::new();
        transport.expect_put_object().times(0);

        let (reconciler, _queue) = reconciler(transport).await;
        let report = reconciler.run_pass(true, &complete_config()).await.unwrap();
        assert_eq!(report, ReconcileReport::default());
    }

    async fn drained(queue: &MediaQueue) -> bool {
        for _ in 0..50 {
            if queue.count().await.unwrap() == 0 {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_driver_runs_pass_on_reconnect() {
        let mut transport = MockObjectTransport::new();
        transport
            .expect_put_object()
            .returning(|_, _, _, _, _| Ok(()));

        let queue = Arc::new(MediaQueue::open_in_memory().await.unwrap());
        let gateway = Arc::new(UploadGateway::new(transport, Duration::from_secs(3600)));
        let reconciler = Arc::new(Reconciler::new(queue.clone(), gateway));
        queue.enqueue(&photo("a.jpeg")).await.unwrap();
        queue.enqueue(&photo("b.jpeg")).await.unwrap();

        let connectivity = Arc::new(Connectivity::new(false));
        let remote_config = Arc::new(RwLock::new(complete_config()));
        let trigger = Arc::new(Notify::new());

        let driver = tokio::spawn(run_driver(
            reconciler,
            connectivity.clone(),
            remote_config,
            trigger,
        ));

        // Offline at start-up: nothing should drain.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(queue.count().await.unwrap(), 2);

        connectivity.set_online(true);
        assert!(drained(&queue).await);

        driver.abort();
    }

    #[tokio::test]
    async fn test_driver_runs_pass_when_complete_config_saved() {
        let mut transport = MockObjectTransport::new();
        transport
            .expect_put_object()
            .returning(|_, _, _, _, _| Ok(()));

        let queue = Arc::new(MediaQueue::open_in_memory().await.unwrap());
        let gateway = Arc::new(UploadGateway::new(transport, Duration::from_secs(3600)));
        let reconciler = Arc::new(Reconciler::new(queue.clone(), gateway));
        queue.enqueue(&photo("a.jpeg")).await.unwrap();
        queue.enqueue(&photo("b.jpeg")).await.unwrap();

        let connectivity = Arc::new(Connectivity::new(true));
        let remote_config = Arc::new(RwLock::new(RemoteConfig::default()));
        let trigger = Arc::new(Notify::new());

        let driver = tokio::spawn(run_driver(
            reconciler,
            connectivity,
            remote_config.clone(),
            trigger.clone(),
        ));

        // Online but unconfigured: the start-up pass must not drain.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(queue.count().await.unwrap(), 2);

        // Saving a complete config fires the trigger.
        *remote_config.write().await = complete_config();
        trigger.notify_one();
        assert!(drained(&queue).await);

        driver.abort();
    }

    #[tokio::test]
    async fn test_driver_startup_pass_drains_backlog() {
        let mut transport = MockObjectTransport::new();
        transport
            .expect_put_object()
            .returning(|_, _, _, _, _| Ok(()));

        let queue = Arc::new(MediaQueue::open_in_memory().await.unwrap());
        let gateway = Arc::new(UploadGateway::new(transport, Duration::from_secs(3600)));
        let reconciler = Arc::new(Reconciler::new(queue.clone(), gateway));
        queue.enqueue(&photo("a.jpeg")).await.unwrap();
        queue.enqueue(&photo("b.jpeg")).await.unwrap();

        // Online with a persisted complete config: no external trigger,
        // the start-up pass alone drains the backlog.
        let connectivity = Arc::new(Connectivity::new(true));
        let remote_config = Arc::new(RwLock::new(complete_config()));
        let trigger = Arc::new(Notify::new());

        let driver = tokio::spawn(run_driver(
            reconciler,
            connectivity,
            remote_config,
            trigger,
        ));

        assert!(drained(&queue).await);

        driver.abort();
    }
}
