//! Photo submission: geotag, upload, and fall back to the retry queue.

use std::future::Future;
use std::sync::Arc;

use photo_capture::NormalizeError;
use uuid::Uuid;

use crate::models::{BatchProgress, DrainReport, PhotoItem, UploadedPhoto};
use crate::services::position_sampler::{PositionSampler, SamplerOptions};
use crate::services::upload_queue::{QueueError, UploadQueue};
use crate::services::uplink::{UplinkError, UploadFailure};

/// Something that can deliver a single photo to the collector
pub trait PhotoDelivery: Send + Sync {
    fn deliver(
        &self,
        item: &PhotoItem,
    ) -> impl Future<Output = Result<UploadedPhoto, UploadFailure>> + Send;
}

impl<T: PhotoDelivery> PhotoDelivery for Arc<T> {
    fn deliver(
        &self,
        item: &PhotoItem,
    ) -> impl Future<Output = Result<UploadedPhoto, UploadFailure>> + Send {
        self.as_ref().deliver(item)
    }
}

/// What happened to a submitted photo
#[derive(Debug)]
pub enum SubmitOutcome {
    Delivered(UploadedPhoto),
    /// Transport failed; the photo waits in the retry queue
    Queued { id: Uuid, reason: UplinkError },
    /// The photo can never be delivered as is and was not queued
    Rejected(UploadFailure),
}

/// Attaches the current position to a photo. A sampling failure leaves the
/// photo without geotag.
pub async fn geotag(
    item: PhotoItem,
    sampler: &PositionSampler,
    options: &SamplerOptions,
) -> PhotoItem {
    match sampler.get_once(options).await {
        Ok(position) => item.with_geotag(Some(position)),
        Err(e) => {
            log::warn!("Photo {} left without geotag: {}", item.id, e);
            item
        }
    }
}

pub struct CaptureService<D> {
    delivery: D,
    queue: Arc<UploadQueue>,
}

impl<D: PhotoDelivery> CaptureService<D> {
    pub fn new(delivery: D, queue: Arc<UploadQueue>) -> Self {
        Self { delivery, queue }
    }

    pub fn queue(&self) -> &Arc<UploadQueue> {
        &self.queue
    }

    /// Uploads one photo, queueing it when the collector is unreachable.
    ///
    /// Queued photos carry their own copy of the image bytes, so moving or
    /// deleting the source file afterwards does not affect the retry.
    pub async fn submit_photo(&self, item: PhotoItem) -> Result<SubmitOutcome, QueueError> {
        match self.delivery.deliver(&item).await {
            Ok(uploaded) => Ok(SubmitOutcome::Delivered(uploaded)),
            Err(UploadFailure::Transport(reason)) => {
                log::warn!("Upload of photo {} failed, queueing: {}", item.id, reason);
                let id = item.id;
                let item = match item.into_inline() {
                    Ok(item) => item,
                    Err(e) => {
                        log::warn!("Photo {} could not be read for queueing: {}", id, e);
                        return Ok(SubmitOutcome::Rejected(UploadFailure::Unprocessable(
                            NormalizeError::Io(e),
                        )));
                    }
                };
                let entry = self.queue.enqueue(item).await?;
                Ok(SubmitOutcome::Queued {
                    id: entry.id(),
                    reason,
                })
            }
            Err(failure) => {
                log::warn!("Photo {} rejected: {}", item.id, failure);
                Ok(SubmitOutcome::Rejected(failure))
            }
        }
    }

    /// Submits photos one after the other, reporting progress after each.
    ///
    /// A failing item never aborts the batch; every item gets its own result.
    pub async fn submit_photos<P>(
        &self,
        items: Vec<PhotoItem>,
        mut on_progress: P,
    ) -> Vec<Result<SubmitOutcome, QueueError>>
    where
        P: FnMut(BatchProgress),
    {
        let total = items.len();
        let mut results = Vec::with_capacity(total);
        on_progress(BatchProgress { current: 0, total });

        for (index, item) in items.into_iter().enumerate() {
            results.push(self.submit_photo(item).await);
            on_progress(BatchProgress {
                current: index + 1,
                total,
            });
        }

        results
    }

    /// Retries every queued photo through the delivery channel
    pub async fn retry_pending(&self) -> Result<DrainReport, QueueError> {
        let delivery = &self.delivery;
        self.queue
            .drain(|item| async move { delivery.deliver(&item).await.map(|_| ()) })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PhotoSource, Position};
    use crate::services::key_value_store::MemoryKeyValueStore;
    use crate::services::location_provider::{PermissionState, SimulatedProvider};
    use photo_capture::validate;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct FakeCollector {
        offline: AtomicBool,
        attempts: Mutex<Vec<Uuid>>,
        delivered: Mutex<Vec<Uuid>>,
    }

    impl FakeCollector {
        fn set_offline(&self, offline: bool) {
            self.offline.store(offline, Ordering::SeqCst);
        }
    }

    impl PhotoDelivery for FakeCollector {
        fn deliver(
            &self,
            item: &PhotoItem,
        ) -> impl Future<Output = Result<UploadedPhoto, UploadFailure>> + Send {
            self.attempts.lock().unwrap().push(item.id);
            let errors = validate(item);
            let result = if !errors.is_empty() {
                Err(UploadFailure::Invalid(errors))
            } else if self.offline.load(Ordering::SeqCst) {
                Err(UploadFailure::Transport(UplinkError::Network(
                    "offline".to_string(),
                )))
            } else if let Err(e) = item.source.load_bytes() {
                Err(UploadFailure::Unprocessable(NormalizeError::Io(e)))
            } else {
                self.delivered.lock().unwrap().push(item.id);
                Ok(UploadedPhoto {
                    photo_id: item.id.to_string(),
                    url: format!("https://collector.test/{}.jpg", item.id),
                    thumbnail_url: None,
                })
            };
            std::future::ready(result)
        }
    }

    fn service() -> (Arc<FakeCollector>, CaptureService<Arc<FakeCollector>>) {
        let collector = Arc::new(FakeCollector::default());
        let queue = Arc::new(UploadQueue::new(MemoryKeyValueStore::new()));
        (collector.clone(), CaptureService::new(collector, queue))
    }

    fn jpeg() -> PhotoItem {
        PhotoItem::from_bytes(vec![0; 2 * 1024 * 1024], "image/jpeg", "s", "r", "u")
    }

    fn gif() -> PhotoItem {
        PhotoItem::from_bytes(vec![0; 128], "image/gif", "s", "r", "u")
    }

    #[tokio::test]
    async fn test_online_submit_is_delivered() {
        let (_, service) = service();
        let outcome = service.submit_photo(jpeg()).await.unwrap();
        assert!(matches!(outcome, SubmitOutcome::Delivered(_)));
        assert_eq!(service.queue().size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_offline_submit_is_queued_and_retried() {
        let (collector, service) = service();
        collector.set_offline(true);

        let item = jpeg();
        let id = item.id;
        match service.submit_photo(item).await.unwrap() {
            SubmitOutcome::Queued { id: queued, reason } => {
                assert_eq!(queued, id);
                assert!(matches!(reason, UplinkError::Network(_)));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(service.queue().size().await.unwrap(), 1);

        let report = service.retry_pending().await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.remaining, 1);

        collector.set_offline(false);
        let report = service.retry_pending().await.unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(report.remaining, 0);
        assert_eq!(*collector.delivered.lock().unwrap(), vec![id]);
    }

    #[tokio::test]
    async fn test_queued_file_photo_survives_source_removal() {
        let (collector, service) = service();
        collector.set_offline(true);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shot.jpg");
        std::fs::write(&path, vec![0xFFu8; 64]).unwrap();
        let item = PhotoItem::from_file(&path, "s", "r", "u").unwrap();
        let id = item.id;

        let outcome = service.submit_photo(item).await.unwrap();
        assert!(matches!(outcome, SubmitOutcome::Queued { .. }));

        let entries = service.queue().entries().await.unwrap();
        assert_eq!(
            entries[0].item.source,
            PhotoSource::Inline {
                data: vec![0xFF; 64]
            }
        );

        std::fs::remove_file(&path).unwrap();
        collector.set_offline(false);

        let report = service.retry_pending().await.unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(report.remaining, 0);
        assert_eq!(*collector.delivered.lock().unwrap(), vec![id]);
    }

    #[tokio::test]
    async fn test_invalid_photo_is_rejected_not_queued() {
        let (collector, service) = service();
        collector.set_offline(true);

        let outcome = service.submit_photo(gif()).await.unwrap();
        assert!(matches!(
            outcome,
            SubmitOutcome::Rejected(UploadFailure::Invalid(_))
        ));
        assert_eq!(service.queue().size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_batch_is_sequential_with_progress() {
        let (collector, service) = service();
        collector.set_offline(true);
        let items = vec![jpeg(), gif(), jpeg()];
        let ids: Vec<_> = items.iter().map(|i| i.id).collect();

        let mut progress = Vec::new();
        let results = service
            .submit_photos(items, |p| progress.push((p.current, p.total)))
            .await;

        assert_eq!(progress, vec![(0, 3), (1, 3), (2, 3), (3, 3)]);
        assert_eq!(*collector.attempts.lock().unwrap(), ids);
        assert!(matches!(results[0], Ok(SubmitOutcome::Queued { .. })));
        assert!(matches!(results[1], Ok(SubmitOutcome::Rejected(_))));
        assert!(matches!(results[2], Ok(SubmitOutcome::Queued { .. })));

        let queued: Vec<_> = service
            .queue()
            .entries()
            .await
            .unwrap()
            .iter()
            .map(|e| e.id())
            .collect();
        assert_eq!(queued, vec![ids[0], ids[2]]);
    }

    #[tokio::test]
    async fn test_empty_batch_reports_zero_total() {
        let (_, service) = service();
        let mut progress = Vec::new();
        let results = service
            .submit_photos(Vec::new(), |p| progress.push(p))
            .await;
        assert!(results.is_empty());
        assert_eq!(progress, vec![BatchProgress { current: 0, total: 0 }]);
    }

    #[tokio::test]
    async fn test_geotag_attaches_fresh_position() {
        let provider = SimulatedProvider::new();
        let sampler = PositionSampler::new(provider.clone());

        let emitter = provider.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            emitter.emit(Position::new(53.5511, 9.9937, 4.0));
        });

        let options = SamplerOptions {
            timeout_ms: 2_000,
            max_age_ms: 0,
            ..SamplerOptions::default()
        };
        let tagged = geotag(jpeg(), &sampler, &options).await;
        assert_eq!(tagged.geotag.map(|p| p.lat), Some(53.5511));
    }

    #[tokio::test]
    async fn test_geotag_failure_leaves_photo_untagged() {
        let provider = SimulatedProvider::new();
        provider.set_permission(PermissionState::Denied);
        let sampler = PositionSampler::new(provider);

        let tagged = geotag(jpeg(), &sampler, &SamplerOptions::default()).await;
        assert!(tagged.geotag.is_none());
    }
}
