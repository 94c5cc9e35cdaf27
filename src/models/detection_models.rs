use serde::{Deserialize, Deserializer, Serialize};
use std::path::Path;

/// Detection as returned by the sequence detections endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    #[serde(default)]
    pub id: Option<i64>,
    pub camera_id: i64,
    pub created_at: String,
    pub bucket_key: String,
    pub url: String,
    /// Label payload, kept as the exact text to write to disk
    #[serde(deserialize_with = "bbox_text", default)]
    pub bboxes: String,
}

impl Detection {
    /// Image file name, the last component of the bucket key.
    ///
    /// `None` when the key has no usable final component (empty, `.` or `..`).
    pub fn image_file_name(&self) -> Option<String> {
        let name = Path::new(self.bucket_key.trim()).file_name()?;
        let name = name.to_string_lossy();
        if name.trim().is_empty() {
            return None;
        }
        Some(name.into_owned())
    }

    /// Label file name, the image name with a `.txt` extension
    pub fn label_file_name(&self) -> Option<String> {
        let image = self.image_file_name()?;
        Some(
            Path::new(&image)
                .with_extension("txt")
                .to_string_lossy()
                .into_owned(),
        )
    }
}

/// Older API versions send the payload as a string, newer ones as JSON.
fn bbox_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::String(text) => text,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    })
}
