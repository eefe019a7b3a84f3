use crate::models::{ImageMime, PhotoItem, PhotoSource};
use image::codecs::jpeg::JpegEncoder;
use image::{imageops::FilterType, DynamicImage, ImageReader};
use std::io::Cursor;

/// Longest edge allowed after normalization
pub const DEFAULT_MAX_WIDTH: u32 = 1920;
/// Lossy re-encode quality in `0.0..=1.0`
pub const DEFAULT_QUALITY: f32 = 0.8;

/// Error type for normalization
#[derive(Debug, thiserror::Error)]
pub enum NormalizeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Image decode error: {0}")]
    Decode(image::ImageError),
    #[error("Image encode error: {0}")]
    Encode(image::ImageError),
    #[error("Invalid options: {0}")]
    InvalidOptions(String),
}

/// Bounds for [`normalize`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizeOptions {
    /// Maximum width and height of the output
    pub max_width: u32,
    pub quality: f32,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            max_width: DEFAULT_MAX_WIDTH,
            quality: DEFAULT_QUALITY,
        }
    }
}

impl NormalizeOptions {
    fn jpeg_quality(&self) -> u8 {
        (self.quality.clamp(0.01, 1.0) * 100.0).round() as u8
    }
}

/// Target size that fits into `max_width` x `max_height` keeping the aspect
/// ratio. Images already inside the box keep their size.
pub fn calculate_resize_dimensions(
    original_width: u32,
    original_height: u32,
    max_width: u32,
    max_height: u32,
) -> (u32, u32) {
    let ratio = (original_width as f64 / max_width as f64)
        .max(original_height as f64 / max_height as f64);

    if ratio > 1.0 {
        let new_width = ((original_width as f64 / ratio).round() as u32).clamp(1, max_width);
        let new_height = ((original_height as f64 / ratio).round() as u32).clamp(1, max_height);
        (new_width, new_height)
    } else {
        (original_width, original_height)
    }
}

/// Reads the pixel dimensions of the encoded image without decoding it fully
pub fn dimensions(item: &PhotoItem) -> Result<(u32, u32), NormalizeError> {
    let bytes = item.source.load_bytes()?;
    ImageReader::new(Cursor::new(bytes.as_ref()))
        .with_guessed_format()?
        .into_dimensions()
        .map_err(NormalizeError::Decode)
}

/// Downscales the photo if either edge exceeds `max_width` and re-encodes it
/// as JPEG at `quality`.
///
/// Returns a new item with inline bytes; the input is left untouched.
/// CPU bound, call it from a blocking thread inside async code.
pub fn normalize(item: &PhotoItem, options: &NormalizeOptions) -> Result<PhotoItem, NormalizeError> {
    if options.max_width == 0 {
        return Err(NormalizeError::InvalidOptions(
            "max_width must be greater than zero".to_string(),
        ));
    }

    let bytes = item.source.load_bytes()?;
    let img = image::load_from_memory(&bytes).map_err(NormalizeError::Decode)?;
    let (width, height) = (img.width(), img.height());
    let (target_width, target_height) =
        calculate_resize_dimensions(width, height, options.max_width, options.max_width);

    let resized = if (target_width, target_height) != (width, height) {
        log::debug!(
            "Downscaling photo {} from {}x{} to {}x{}",
            item.id,
            width,
            height,
            target_width,
            target_height
        );
        img.resize_exact(target_width, target_height, FilterType::Triangle)
    } else {
        img
    };

    // JPEG has no alpha channel
    let rgb = DynamicImage::ImageRgb8(resized.to_rgb8());
    let mut buffer = Vec::new();
    rgb.write_with_encoder(JpegEncoder::new_with_quality(
        &mut buffer,
        options.jpeg_quality(),
    ))
    .map_err(NormalizeError::Encode)?;

    log::debug!(
        "Normalized photo {}: {} -> {} bytes",
        item.id,
        item.size_bytes,
        buffer.len()
    );

    Ok(PhotoItem {
        id: item.id,
        size_bytes: buffer.len() as u64,
        source: PhotoSource::Inline { data: buffer },
        mime_type: ImageMime::Jpeg.as_str().to_string(),
        captured_at: item.captured_at,
        geotag: item.geotag.clone(),
        description: item.description.clone(),
        session_id: item.session_id.clone(),
        route_id: item.route_id.clone(),
        user_id: item.user_id.clone(),
        status: item.status,
    })
}
