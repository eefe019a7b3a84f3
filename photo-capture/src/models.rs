use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// A timestamped location sample (also used as a photo geotag)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub lat: f64,
    pub lng: f64,
    /// Horizontal accuracy radius in meters
    pub accuracy: f64,
    pub captured_at: DateTime<Utc>,
}

impl Position {
    pub fn new(lat: f64, lng: f64, accuracy: f64) -> Self {
        Self {
            lat,
            lng,
            accuracy,
            captured_at: Utc::now(),
        }
    }

    /// Age of the sample relative to `now`, zero for samples from the future
    pub fn age_millis(&self, now: DateTime<Utc>) -> u64 {
        (now - self.captured_at).num_milliseconds().max(0) as u64
    }
}

/// Delivery state of a photo
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PhotoStatus {
    #[default]
    Pending,
    Uploading,
    Delivered,
    Failed,
}

impl PhotoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhotoStatus::Pending => "pending",
            PhotoStatus::Uploading => "uploading",
            PhotoStatus::Delivered => "delivered",
            PhotoStatus::Failed => "failed",
        }
    }
}

/// Image types accepted by the collector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageMime {
    Jpeg,
    Png,
    Webp,
}

impl ImageMime {
    /// Parses a MIME type or bare subtype ("image/jpeg", "jpg", "PNG", ...)
    pub fn parse(s: &str) -> Option<Self> {
        let lower = s.trim().to_ascii_lowercase();
        let subtype = lower.strip_prefix("image/").unwrap_or(&lower);
        match subtype {
            "jpeg" | "jpg" | "pjpeg" => Some(ImageMime::Jpeg),
            "png" => Some(ImageMime::Png),
            "webp" => Some(ImageMime::Webp),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ImageMime::Jpeg => "image/jpeg",
            ImageMime::Png => "image/png",
            ImageMime::Webp => "image/webp",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ImageMime::Jpeg => "jpg",
            ImageMime::Png => "png",
            ImageMime::Webp => "webp",
        }
    }
}

/// Best-effort MIME type from the file extension; unknown types are kept
/// verbatim so validation can report them
pub fn guess_mime_from_path(path: &Path) -> String {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|s| s.to_ascii_lowercase())
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => "image/jpeg".to_string(),
        Some("png") => "image/png".to_string(),
        Some("webp") => "image/webp".to_string(),
        Some("gif") => "image/gif".to_string(),
        Some("bmp") => "image/bmp".to_string(),
        Some("heic") | Some("heif") => "image/heic".to_string(),
        Some(other) => format!("image/{}", other),
        None => "application/octet-stream".to_string(),
    }
}

/// Where the encoded image lives
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum PhotoSource {
    /// Encoded image bytes, stored as base64 when serialized
    Inline {
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
    },
    /// Reference to an encoded image on local storage
    File { path: PathBuf },
}

impl PhotoSource {
    /// Returns the encoded bytes, reading the file if necessary
    pub fn load_bytes(&self) -> std::io::Result<Cow<'_, [u8]>> {
        match self {
            PhotoSource::Inline { data } => Ok(Cow::Borrowed(data.as_slice())),
            PhotoSource::File { path } => Ok(Cow::Owned(std::fs::read(path)?)),
        }
    }
}

/// A captured photo together with the metadata the collector expects
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoItem {
    pub id: Uuid,
    pub source: PhotoSource,
    pub mime_type: String,
    pub size_bytes: u64,
    pub captured_at: DateTime<Utc>,
    pub geotag: Option<Position>,
    #[serde(default)]
    pub description: Option<String>,
    pub session_id: String,
    pub route_id: String,
    pub user_id: String,
    #[serde(default)]
    pub status: PhotoStatus,
}

impl PhotoItem {
    /// Creates an item from encoded bytes already in memory
    pub fn from_bytes(
        data: Vec<u8>,
        mime_type: impl Into<String>,
        session_id: impl Into<String>,
        route_id: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            size_bytes: data.len() as u64,
            source: PhotoSource::Inline { data },
            mime_type: mime_type.into(),
            captured_at: Utc::now(),
            geotag: None,
            description: None,
            session_id: session_id.into(),
            route_id: route_id.into(),
            user_id: user_id.into(),
            status: PhotoStatus::Pending,
        }
    }

    /// Creates an item referencing a file; size comes from the file metadata
    /// and the MIME type from its extension
    pub fn from_file(
        path: impl AsRef<Path>,
        session_id: impl Into<String>,
        route_id: impl Into<String>,
        user_id: impl Into<String>,
    ) -> std::io::Result<Self> {
        let path = path.as_ref();
        let size_bytes = std::fs::metadata(path)?.len();
        Ok(Self {
            id: Uuid::new_v4(),
            source: PhotoSource::File {
                path: path.to_path_buf(),
            },
            mime_type: guess_mime_from_path(path),
            size_bytes,
            captured_at: Utc::now(),
            geotag: None,
            description: None,
            session_id: session_id.into(),
            route_id: route_id.into(),
            user_id: user_id.into(),
            status: PhotoStatus::Pending,
        })
    }

    /// Copies a file-backed image into the item so it no longer depends on
    /// the file. Inline items are returned unchanged.
    pub fn into_inline(mut self) -> std::io::Result<Self> {
        if let PhotoSource::File { path } = &self.source {
            let data = std::fs::read(path)?;
            self.size_bytes = data.len() as u64;
            self.source = PhotoSource::Inline { data };
        }
        Ok(self)
    }

    pub fn with_geotag(mut self, geotag: Option<Position>) -> Self {
        self.geotag = geotag;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn mime(&self) -> Option<ImageMime> {
        ImageMime::parse(&self.mime_type)
    }

    /// File name used for the multipart part
    pub fn file_name(&self) -> String {
        let ext = self.mime().map(|m| m.extension()).unwrap_or("bin");
        format!("{}.{}", self.id, ext)
    }
}

mod base64_bytes {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(serde::de::Error::custom)
    }
}
