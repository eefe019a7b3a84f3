//! # Photo Capture
//!
//! Pre-flight handling for photos taken in the field before they are sent to
//! the collector.
//!
//! This crate provides:
//! - The [`PhotoItem`] record that travels through upload and retry queue
//! - Size and type validation against the upload limits
//! - Bounded recompression (downscale to a maximum edge, re-encode as JPEG)
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use photo_capture::{normalize, validate, NormalizeOptions, PhotoItem};
//!
//! let item = PhotoItem::from_file("/sdcard/DCIM/IMG_0001.jpg", "session-1", "route-7", "user-3")?;
//! if validate(&item).is_empty() {
//!     let ready = normalize(&item, &NormalizeOptions::default())?;
//! }
//! ```

pub mod models;
pub mod normalize;
pub mod validate;

pub use models::{ImageMime, PhotoItem, PhotoSource, PhotoStatus, Position};
pub use normalize::{
    calculate_resize_dimensions, dimensions, normalize, NormalizeError, NormalizeOptions,
    DEFAULT_MAX_WIDTH, DEFAULT_QUALITY,
};
pub use validate::{validate, validate_with_limit, ValidationError, MAX_PHOTO_BYTES};
