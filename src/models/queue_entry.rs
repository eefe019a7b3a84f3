use chrono::{DateTime, Utc};
use photo_capture::{PhotoItem, PhotoStatus};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A photo waiting in the durable upload queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    #[serde(flatten)]
    pub item: PhotoItem,
    pub queued_at: DateTime<Utc>,
    #[serde(default)]
    pub attempt_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempt_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl QueueEntry {
    pub fn new(mut item: PhotoItem) -> Self {
        item.status = PhotoStatus::Pending;
        Self {
            item,
            queued_at: Utc::now(),
            attempt_count: 0,
            last_attempt_at: None,
            last_error: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.item.id
    }

    pub fn status(&self) -> PhotoStatus {
        self.item.status
    }

    pub(crate) fn mark_uploading(&mut self) {
        self.item.status = PhotoStatus::Uploading;
        self.last_attempt_at = Some(Utc::now());
    }

    pub(crate) fn mark_failed(&mut self, error: String) {
        self.item.status = PhotoStatus::Failed;
        self.attempt_count += 1;
        self.last_error = Some(error);
    }
}
