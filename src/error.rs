use photo_capture::{NormalizeError, ValidationError};

use crate::services::key_value_store::StorageError;
use crate::services::position_sampler::SamplerError;
use crate::services::upload_queue::QueueError;
use crate::services::uplink::UplinkError;

/// Central error type for the fieldtrack binary and orchestration code
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Database error (rusqlite)
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
    /// Filesystem error
    #[error("Filesystem error: {0}")]
    Filesystem(#[from] std::io::Error),
    /// Configuration file could not be read or parsed
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
    /// Location sampling failed
    #[error("Location error: {0}")]
    Sampler(#[from] SamplerError),
    #[error("Uplink error: {0}")]
    Uplink(#[from] UplinkError),
    /// Photo failed pre-flight checks
    #[error("Validation error: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
    /// Image processing error
    #[error("Image processing error: {0}")]
    ImageProcessing(#[from] NormalizeError),
    /// Invalid command line input
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// User-friendly error messages for the command line
impl AppError {
    pub fn user_message(&self) -> String {
        match self {
            AppError::Database(_) | AppError::Storage(_) | AppError::Queue(_) => {
                "Local storage error. The pending uploads are kept; please try again.".to_string()
            }
            AppError::Filesystem(e) => format!("Error accessing files: {}", e),
            AppError::Config(msg) => format!("Invalid configuration: {}", msg),
            AppError::Sampler(e) => format!("Location unavailable: {}", e),
            AppError::Uplink(UplinkError::Auth(_)) => {
                "Not logged in or session expired. Run `fieldtrack login`.".to_string()
            }
            AppError::Uplink(e) => format!("Could not reach the collector: {}", e),
            AppError::Validation(errors) => join_errors(errors),
            AppError::ImageProcessing(_) => "Error processing image.".to_string(),
            AppError::InvalidInput(msg) => msg.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_message_lists_all_errors() {
        let err = AppError::Validation(vec![
            ValidationError::UnsupportedType {
                mime_type: "image/gif".to_string(),
            },
            ValidationError::TooLarge {
                size_bytes: 20,
                limit: 10,
            },
        ]);
        let msg = err.to_string();
        assert!(msg.contains("image/gif"));
        assert!(msg.contains("limit is 10"));
    }

    #[test]
    fn test_auth_error_suggests_login() {
        let err = AppError::Uplink(UplinkError::Auth("401".to_string()));
        assert!(err.user_message().contains("login"));
    }
}
