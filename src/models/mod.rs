pub mod queue_entry;
pub mod upload;

pub use photo_capture::{ImageMime, PhotoItem, PhotoSource, PhotoStatus, Position};
pub use queue_entry::QueueEntry;
pub use upload::{BatchProgress, DrainReport, UploadedPhoto};
