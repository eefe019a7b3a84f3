//! Durable FIFO queue of photos whose upload failed.
//!
//! The queue is stored as one JSON array under a well-known key of a
//! [`KeyValueStore`]. Every mutation is written back before the call returns,
//! so entries survive process restarts until they are delivered or dropped.
//!
//! All mutators run under a single async mutex. A drain keeps the lock for
//! the whole pass, so two overlapping drains run one after the other and can
//! never attempt the same entry twice. An `enqueue` issued during a drain
//! waits for the pass to finish.
//!
//! A drain rewrites the whole array, inline image data included, after each
//! entry. A pass over `n` entries therefore writes on the order of `n²`
//! photos' worth of bytes. That is fine for the handful of photos a worker
//! queues while offline, but not for large backlogs.

use std::fmt::Display;
use std::future::Future;

use tokio::sync::Mutex;
use uuid::Uuid;

use crate::models::{DrainReport, PhotoItem, PhotoStatus, QueueEntry};
use crate::services::key_value_store::{KeyValueStore, StorageError};

/// Key under which pending uploads are stored
pub const PENDING_UPLOADS_KEY: &str = "pending_photo_uploads";

/// Errors that can occur while persisting the queue
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Queue storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Queue data is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

pub struct UploadQueue {
    store: Mutex<Box<dyn KeyValueStore>>,
    key: String,
}

impl UploadQueue {
    pub fn new(store: impl KeyValueStore + 'static) -> Self {
        Self::with_key(store, PENDING_UPLOADS_KEY)
    }

    /// Queue stored under a custom key (several queues can share one store)
    pub fn with_key(store: impl KeyValueStore + 'static, key: impl Into<String>) -> Self {
        Self {
            store: Mutex::new(Box::new(store)),
            key: key.into(),
        }
    }

    /// Appends a photo to the end of the queue and persists it
    pub async fn enqueue(&self, item: PhotoItem) -> Result<QueueEntry, QueueError> {
        let mut store = self.store.lock().await;
        let mut entries = load_entries(store.as_ref(), &self.key)?;

        let entry = QueueEntry::new(item);
        entries.push(entry.clone());
        save_entries(store.as_mut(), &self.key, &entries)?;

        log::info!(
            "Queued photo {} for retry ({} pending)",
            entry.id(),
            entries.len()
        );
        Ok(entry)
    }

    /// Attempts delivery of every queued photo in FIFO order.
    ///
    /// Delivered entries are removed; failed ones stay queued with their
    /// attempt count incremented. There is no backoff and no attempt cap:
    /// every pass retries every remaining entry. `deliver` must not call back
    /// into this queue.
    pub async fn drain<F, Fut, E>(&self, mut deliver: F) -> Result<DrainReport, QueueError>
    where
        F: FnMut(PhotoItem) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: Display,
    {
        let mut store = self.store.lock().await;
        let mut entries = load_entries(store.as_ref(), &self.key)?;
        let mut report = DrainReport::default();

        if entries.is_empty() {
            return Ok(report);
        }

        log::info!("Draining {} queued photos", entries.len());

        let mut index = 0;
        while index < entries.len() {
            entries[index].mark_uploading();
            let item = entries[index].item.clone();
            let id = item.id;

            match deliver(item).await {
                Ok(()) => {
                    entries.remove(index);
                    report.delivered += 1;
                    log::info!("Delivered queued photo {}", id);
                }
                Err(e) => {
                    let entry = &mut entries[index];
                    entry.mark_failed(e.to_string());
                    report.failed += 1;
                    log::warn!(
                        "Queued photo {} failed (attempt {}): {}",
                        id,
                        entry.attempt_count,
                        e
                    );
                    index += 1;
                }
            }

            save_entries(store.as_mut(), &self.key, &entries)?;
        }

        report.remaining = entries.len();
        log::info!(
            "Drain finished: {} delivered, {} failed, {} remaining",
            report.delivered,
            report.failed,
            report.remaining
        );
        Ok(report)
    }

    /// Number of queued photos
    pub async fn size(&self) -> Result<usize, QueueError> {
        let store = self.store.lock().await;
        Ok(load_entries(store.as_ref(), &self.key)?.len())
    }

    /// Snapshot of the queue in delivery order
    pub async fn entries(&self) -> Result<Vec<QueueEntry>, QueueError> {
        let store = self.store.lock().await;
        load_entries(store.as_ref(), &self.key)
    }

    /// Drops a queued photo without delivering it
    pub async fn remove(&self, id: Uuid) -> Result<bool, QueueError> {
        let mut store = self.store.lock().await;
        let mut entries = load_entries(store.as_ref(), &self.key)?;
        let before = entries.len();
        entries.retain(|e| e.id() != id);

        if entries.len() == before {
            return Ok(false);
        }

        save_entries(store.as_mut(), &self.key, &entries)?;
        log::info!("Dropped queued photo {}", id);
        Ok(true)
    }

    /// Drops every queued photo, returning how many were removed
    pub async fn clear(&self) -> Result<usize, QueueError> {
        let mut store = self.store.lock().await;
        let count = load_entries(store.as_ref(), &self.key)?.len();
        store.remove(&self.key)?;
        Ok(count)
    }
}

fn load_entries(store: &dyn KeyValueStore, key: &str) -> Result<Vec<QueueEntry>, QueueError> {
    let Some(raw) = store.get(key)? else {
        return Ok(Vec::new());
    };

    let mut entries: Vec<QueueEntry> = serde_json::from_str(&raw)?;
    // A process that died mid-attempt leaves the entry marked as uploading
    for entry in entries.iter_mut() {
        if entry.item.status == PhotoStatus::Uploading {
            entry.item.status = PhotoStatus::Pending;
        }
    }
    Ok(entries)
}

fn save_entries(
    store: &mut dyn KeyValueStore,
    key: &str,
    entries: &[QueueEntry],
) -> Result<(), QueueError> {
    if entries.is_empty() {
        store.remove(key)?;
    } else {
        store.set(key, &serde_json::to_string(entries)?)?;
    }
    Ok(())
}
