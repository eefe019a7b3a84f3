use crate::models::{ImageMime, PhotoItem};

/// Upload size cap for an unprocessed photo (10 MiB)
pub const MAX_PHOTO_BYTES: u64 = 10 * 1024 * 1024;

/// A reason a photo may not be uploaded
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("unsupported image type '{mime_type}' (allowed: jpeg, png, webp)")]
    UnsupportedType { mime_type: String },
    #[error("photo is {size_bytes} bytes, limit is {limit} bytes")]
    TooLarge { size_bytes: u64, limit: u64 },
}

/// Checks a photo against the default limits.
///
/// An empty list means the photo may be uploaded. Failures are returned as a
/// list so callers can report every problem at once.
pub fn validate(item: &PhotoItem) -> Vec<ValidationError> {
    validate_with_limit(item, MAX_PHOTO_BYTES)
}

/// Same as [`validate`] with a caller-supplied size cap
pub fn validate_with_limit(item: &PhotoItem, max_bytes: u64) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if ImageMime::parse(&item.mime_type).is_none() {
        errors.push(ValidationError::UnsupportedType {
            mime_type: item.mime_type.clone(),
        });
    }

    if item.size_bytes > max_bytes {
        errors.push(ValidationError::TooLarge {
            size_bytes: item.size_bytes,
            limit: max_bytes,
        });
    }

    if !errors.is_empty() {
        log::debug!("Photo {} failed validation: {:?}", item.id, errors);
    }

    errors
}
