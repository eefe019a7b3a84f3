//! Transfers position pings and photos to the collector.
//!
//! Both calls authenticate with the bearer token from the configured
//! [`CredentialStore`]. Failures are classified so callers can decide what to
//! retry: only [`UploadFailure::Transport`] is worth queueing.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use photo_capture::{
    normalize, validate_with_limit, NormalizeError, NormalizeOptions, ValidationError,
    MAX_PHOTO_BYTES,
};
use reqwest::multipart::{Form, Part};
use reqwest::{Response, StatusCode};
use serde::Serialize;

use crate::models::{PhotoItem, Position, UploadedPhoto};
use crate::services::capture_service::PhotoDelivery;
use crate::services::credentials::CredentialStore;
use crate::services::position_sampler::{BoxFuture, PositionForwarder};

pub const DEFAULT_POSITION_PATH: &str = "/api/workers/current-position";
pub const DEFAULT_PHOTO_PATH: &str = "/api/photos/upload";
pub const DEFAULT_TIMEOUT_SECS: u64 = 15;

/// Transport-level failure talking to the collector
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UplinkError {
    #[error("network error: {0}")]
    Network(String),
    #[error("not authorized: {0}")]
    Auth(String),
    #[error("collector returned {status}: {body}")]
    Server { status: u16, body: String },
}

/// Why a photo was not delivered
#[derive(Debug, thiserror::Error)]
pub enum UploadFailure {
    #[error("photo rejected: {}", describe(.0))]
    Invalid(Vec<ValidationError>),
    #[error("photo could not be processed: {0}")]
    Unprocessable(NormalizeError),
    #[error(transparent)]
    Transport(#[from] UplinkError),
}

impl UploadFailure {
    /// Whether a later attempt with the same item can succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, UploadFailure::Transport(_))
    }
}

fn describe(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Clone)]
pub struct UplinkConfig {
    pub base_url: String,
    pub position_path: String,
    pub photo_path: String,
    pub timeout: Duration,
    pub normalize: NormalizeOptions,
    pub max_photo_bytes: u64,
}

impl UplinkConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            position_path: DEFAULT_POSITION_PATH.to_string(),
            photo_path: DEFAULT_PHOTO_PATH.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            normalize: NormalizeOptions::default(),
            max_photo_bytes: MAX_PHOTO_BYTES,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PositionPayload<'a> {
    worker_id: &'a str,
    location: Coordinates,
    timestamp: DateTime<Utc>,
}

#[derive(Serialize)]
struct Coordinates {
    lat: f64,
    lng: f64,
}

#[derive(Serialize)]
struct GeotagPayload {
    lat: f64,
    lng: f64,
    accuracy: f64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PhotoMetadata<'a> {
    timestamp: DateTime<Utc>,
    location: Option<GeotagPayload>,
    description: Option<&'a str>,
    work_session_id: &'a str,
    route_id: &'a str,
    user_id: &'a str,
}

impl<'a> From<&'a PhotoItem> for PhotoMetadata<'a> {
    fn from(item: &'a PhotoItem) -> Self {
        Self {
            timestamp: item.captured_at,
            location: item.geotag.as_ref().map(|p| GeotagPayload {
                lat: p.lat,
                lng: p.lng,
                accuracy: p.accuracy,
            }),
            description: item.description.as_deref(),
            work_session_id: &item.session_id,
            route_id: &item.route_id,
            user_id: &item.user_id,
        }
    }
}

/// HTTP client for the collector; clones share the connection pool
#[derive(Clone)]
pub struct Uplink {
    client: reqwest::Client,
    config: Arc<UplinkConfig>,
    credentials: Arc<dyn CredentialStore>,
}

impl Uplink {
    pub fn new(
        config: UplinkConfig,
        credentials: Arc<dyn CredentialStore>,
    ) -> Result<Self, UplinkError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| UplinkError::Network(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            config: Arc::new(config),
            credentials,
        })
    }

    pub fn config(&self) -> &UplinkConfig {
        &self.config
    }

    fn token(&self) -> Result<String, UplinkError> {
        self.credentials
            .bearer_token()
            .ok_or_else(|| UplinkError::Auth("no token stored".to_string()))
    }

    /// Pushes the current position of a worker. Callers do not retry.
    pub async fn update_position(
        &self,
        worker_id: &str,
        position: &Position,
    ) -> Result<(), UplinkError> {
        let token = self.token()?;
        let payload = PositionPayload {
            worker_id,
            location: Coordinates {
                lat: position.lat,
                lng: position.lng,
            },
            timestamp: position.captured_at,
        };

        let response = self
            .client
            .post(self.config.url(&self.config.position_path))
            .bearer_auth(token)
            .json(&payload)
            .send()
            .await
            .map_err(network_error)?;
        check_status(response).await?;

        log::debug!(
            "Pushed position {:.5},{:.5} for worker {}",
            position.lat,
            position.lng,
            worker_id
        );
        Ok(())
    }

    /// Validates, normalizes and uploads one photo
    pub async fn upload_media(&self, item: &PhotoItem) -> Result<UploadedPhoto, UploadFailure> {
        let errors = validate_with_limit(item, self.config.max_photo_bytes);
        if !errors.is_empty() {
            log::warn!("Photo {} rejected: {}", item.id, describe(&errors));
            return Err(UploadFailure::Invalid(errors));
        }

        let token = self.token()?;

        // Decoding and re-encoding is CPU bound
        let options = self.config.normalize;
        let source = item.clone();
        let normalized = tokio::task::spawn_blocking(move || normalize(&source, &options))
            .await
            .map_err(|e| UploadFailure::Unprocessable(NormalizeError::Io(e.into())))?
            .map_err(UploadFailure::Unprocessable)?;

        let bytes = normalized
            .source
            .load_bytes()
            .map_err(|e| UploadFailure::Unprocessable(NormalizeError::Io(e)))?
            .into_owned();

        let metadata = serde_json::to_value(PhotoMetadata::from(item))
            .map_err(|e| UplinkError::Network(format!("Failed to encode metadata: {}", e)))?;
        let photo = Part::bytes(bytes)
            .file_name(normalized.file_name())
            .mime_str(&normalized.mime_type)
            .map_err(network_error)?;
        let form = Form::new()
            .part("photo", photo)
            .text("metadata", metadata.to_string());

        let response = self
            .client
            .post(self.config.url(&self.config.photo_path))
            .bearer_auth(token)
            .multipart(form)
            .send()
            .await
            .map_err(network_error)?;
        let response = check_status(response).await?;
        let status = response.status().as_u16();

        let uploaded: UploadedPhoto = response.json().await.map_err(|e| UplinkError::Server {
            status,
            body: format!("unexpected response: {}", e),
        })?;

        log::info!("Uploaded photo {} as {}", item.id, uploaded.photo_id);
        Ok(uploaded)
    }
}

fn network_error(e: reqwest::Error) -> UplinkError {
    UplinkError::Network(e.to_string())
}

async fn check_status(response: Response) -> Result<Response, UplinkError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        Err(UplinkError::Auth(format!("{} {}", status.as_u16(), body)))
    } else {
        Err(UplinkError::Server {
            status: status.as_u16(),
            body,
        })
    }
}

impl PositionForwarder for Uplink {
    fn update_position(
        &self,
        worker_id: String,
        position: Position,
    ) -> BoxFuture<Result<(), UplinkError>> {
        let uplink = self.clone();
        Box::pin(async move { uplink.update_position(&worker_id, &position).await })
    }
}

impl PhotoDelivery for Uplink {
    fn deliver(
        &self,
        item: &PhotoItem,
    ) -> impl Future<Output = Result<UploadedPhoto, UploadFailure>> + Send {
        self.upload_media(item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::credentials::StaticCredentials;
    use axum::extract::{Multipart, State};
    use axum::http::HeaderMap;
    use axum::response::{IntoResponse, Response as AxumResponse};
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{json, Value};
    use std::io::Cursor;
    use std::sync::Mutex;

    #[derive(Debug, Clone)]
    struct ReceivedPart {
        name: String,
        file_name: Option<String>,
        content_type: Option<String>,
        data: Vec<u8>,
    }

    #[derive(Default)]
    struct Received {
        auth: Vec<Option<String>>,
        positions: Vec<Value>,
        uploads: Vec<Vec<ReceivedPart>>,
    }

    #[derive(Clone)]
    struct Collector {
        status: StatusCode,
        received: Arc<Mutex<Received>>,
    }

    fn auth_header(headers: &HeaderMap) -> Option<String> {
        headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }

    async fn receive_position(
        State(collector): State<Collector>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> StatusCode {
        let mut received = collector.received.lock().unwrap();
        received.auth.push(auth_header(&headers));
        received.positions.push(body);
        collector.status
    }

    async fn receive_photo(
        State(collector): State<Collector>,
        headers: HeaderMap,
        mut multipart: Multipart,
    ) -> AxumResponse {
        let mut parts = Vec::new();
        while let Some(field) = multipart.next_field().await.unwrap() {
            parts.push(ReceivedPart {
                name: field.name().unwrap_or_default().to_string(),
                file_name: field.file_name().map(str::to_string),
                content_type: field.content_type().map(str::to_string),
                data: field.bytes().await.unwrap().to_vec(),
            });
        }

        let mut received = collector.received.lock().unwrap();
        received.auth.push(auth_header(&headers));
        received.uploads.push(parts);

        if collector.status.is_success() {
            Json(json!({
                "photoId": "p-1",
                "url": "https://collector.test/p-1.jpg",
                "thumbnailUrl": "https://collector.test/p-1_t.jpg"
            }))
            .into_response()
        } else {
            (collector.status, "collector unhappy").into_response()
        }
    }

    async fn spawn_collector(status: StatusCode) -> (String, Arc<Mutex<Received>>) {
        let received = Arc::new(Mutex::new(Received::default()));
        let app = Router::new()
            .route(DEFAULT_POSITION_PATH, post(receive_position))
            .route(DEFAULT_PHOTO_PATH, post(receive_photo))
            .with_state(Collector {
                status,
                received: received.clone(),
            });

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{}", addr), received)
    }

    fn uplink(base_url: &str, token: Option<&str>) -> Uplink {
        let credentials: Arc<dyn CredentialStore> = match token {
            Some(t) => Arc::new(StaticCredentials::new(t)),
            None => Arc::new(StaticCredentials::anonymous()),
        };
        Uplink::new(UplinkConfig::new(base_url), credentials).unwrap()
    }

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let img = image::RgbImage::from_pixel(width, height, image::Rgb([90, 140, 60]));
        let mut buffer = Cursor::new(Vec::new());
        img.write_to(&mut buffer, image::ImageFormat::Png).unwrap();
        buffer.into_inner()
    }

    fn field_photo() -> PhotoItem {
        PhotoItem::from_bytes(png_bytes(2400, 1200), "image/png", "session-1", "route-2", "user-3")
            .with_geotag(Some(Position::new(53.5511, 9.9937, 4.0)))
            .with_description("north gate")
    }

    #[tokio::test]
    async fn test_position_push_wire_format() {
        let (url, received) = spawn_collector(StatusCode::OK).await;
        let position = Position::new(53.5511, 9.9937, 4.0);

        uplink(&url, Some("secret"))
            .update_position("worker-7", &position)
            .await
            .unwrap();

        let received = received.lock().unwrap();
        assert_eq!(received.auth, vec![Some("Bearer secret".to_string())]);
        let body = &received.positions[0];
        assert_eq!(body["workerId"], "worker-7");
        assert_eq!(body["location"]["lat"], 53.5511);
        assert_eq!(body["location"]["lng"], 9.9937);
        assert!(body["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_position_push_unauthorized() {
        let (url, _) = spawn_collector(StatusCode::UNAUTHORIZED).await;
        let err = uplink(&url, Some("expired"))
            .update_position("worker-7", &Position::new(0.0, 0.0, 1.0))
            .await
            .unwrap_err();
        assert!(matches!(err, UplinkError::Auth(_)));
    }

    #[tokio::test]
    async fn test_missing_token_never_hits_the_network() {
        let (url, received) = spawn_collector(StatusCode::OK).await;
        let err = uplink(&url, None)
            .update_position("worker-7", &Position::new(0.0, 0.0, 1.0))
            .await
            .unwrap_err();
        assert!(matches!(err, UplinkError::Auth(_)));
        assert!(received.lock().unwrap().positions.is_empty());
    }

    #[tokio::test]
    async fn test_upload_sends_normalized_photo_and_metadata() {
        let (url, received) = spawn_collector(StatusCode::OK).await;
        let item = field_photo();

        let uploaded = uplink(&url, Some("secret"))
            .upload_media(&item)
            .await
            .unwrap();
        assert_eq!(uploaded.photo_id, "p-1");
        assert_eq!(
            uploaded.thumbnail_url.as_deref(),
            Some("https://collector.test/p-1_t.jpg")
        );

        let received = received.lock().unwrap();
        assert_eq!(received.auth, vec![Some("Bearer secret".to_string())]);
        let parts = &received.uploads[0];

        let photo = parts.iter().find(|p| p.name == "photo").unwrap();
        assert_eq!(photo.content_type.as_deref(), Some("image/jpeg"));
        assert_eq!(photo.file_name, Some(format!("{}.jpg", item.id)));
        let decoded = image::load_from_memory(&photo.data).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (1920, 960));

        let metadata = parts.iter().find(|p| p.name == "metadata").unwrap();
        let metadata: Value = serde_json::from_slice(&metadata.data).unwrap();
        assert_eq!(metadata["workSessionId"], "session-1");
        assert_eq!(metadata["routeId"], "route-2");
        assert_eq!(metadata["userId"], "user-3");
        assert_eq!(metadata["description"], "north gate");
        assert_eq!(metadata["location"]["lat"], 53.5511);
        assert_eq!(metadata["location"]["accuracy"], 4.0);
        assert!(metadata["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_upload_without_geotag_sends_null_location() {
        let (url, received) = spawn_collector(StatusCode::OK).await;
        let item = PhotoItem::from_bytes(png_bytes(32, 32), "image/png", "s", "r", "u");

        uplink(&url, Some("secret")).upload_media(&item).await.unwrap();

        let received = received.lock().unwrap();
        let metadata = received.uploads[0]
            .iter()
            .find(|p| p.name == "metadata")
            .unwrap();
        let metadata: Value = serde_json::from_slice(&metadata.data).unwrap();
        assert!(metadata["location"].is_null());
    }

    #[tokio::test]
    async fn test_invalid_photo_is_not_sent() {
        let (url, received) = spawn_collector(StatusCode::OK).await;
        let item = PhotoItem::from_bytes(vec![0; 64], "image/gif", "s", "r", "u");

        let failure = uplink(&url, Some("secret"))
            .upload_media(&item)
            .await
            .unwrap_err();
        assert!(matches!(failure, UploadFailure::Invalid(ref errors) if errors.len() == 1));
        assert!(!failure.is_retryable());
        assert!(received.lock().unwrap().uploads.is_empty());
    }

    #[tokio::test]
    async fn test_undecodable_photo_is_unprocessable() {
        let (url, _) = spawn_collector(StatusCode::OK).await;
        let item = PhotoItem::from_bytes(b"definitely not a jpeg".to_vec(), "image/jpeg", "s", "r", "u");

        let failure = uplink(&url, Some("secret"))
            .upload_media(&item)
            .await
            .unwrap_err();
        assert!(matches!(failure, UploadFailure::Unprocessable(_)));
        assert!(!failure.is_retryable());
    }

    #[tokio::test]
    async fn test_server_error_is_retryable() {
        let (url, _) = spawn_collector(StatusCode::INTERNAL_SERVER_ERROR).await;
        let failure = uplink(&url, Some("secret"))
            .upload_media(&field_photo())
            .await
            .unwrap_err();

        match &failure {
            UploadFailure::Transport(UplinkError::Server { status, body }) => {
                assert_eq!(*status, 500);
                assert_eq!(body, "collector unhappy");
            }
            other => panic!("unexpected failure: {:?}", other),
        }
        assert!(failure.is_retryable());
    }

    #[tokio::test]
    async fn test_forbidden_upload_is_auth_error() {
        let (url, _) = spawn_collector(StatusCode::FORBIDDEN).await;
        let failure = uplink(&url, Some("secret"))
            .upload_media(&field_photo())
            .await
            .unwrap_err();
        assert!(matches!(
            failure,
            UploadFailure::Transport(UplinkError::Auth(_))
        ));
    }

    #[tokio::test]
    async fn test_unreachable_collector_is_network_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = uplink(&format!("http://{}", addr), Some("secret"))
            .update_position("worker-7", &Position::new(0.0, 0.0, 1.0))
            .await
            .unwrap_err();
        assert!(matches!(err, UplinkError::Network(_)));
    }

    #[test]
    fn test_url_joins_without_double_slash() {
        let config = UplinkConfig::new("https://collector.test/");
        assert_eq!(
            config.url(DEFAULT_PHOTO_PATH),
            "https://collector.test/api/photos/upload"
        );
    }
}
