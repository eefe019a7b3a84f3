use serde::{Deserialize, Deserializer, Serialize};

/// Collector response for a stored photo
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedPhoto {
    #[serde(alias = "id", deserialize_with = "string_or_number")]
    pub photo_id: String,
    pub url: String,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
}

/// Summary of one drain pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct DrainReport {
    pub delivered: usize,
    pub failed: usize,
    pub remaining: usize,
}

/// Progress of a sequential batch upload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchProgress {
    /// Items finished so far (delivered, queued or rejected)
    pub current: usize,
    pub total: usize,
}

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(i64),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Text(s) => s,
        Id::Number(n) => n.to_string(),
    })
}
