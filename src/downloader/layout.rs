use anyhow::Result;
use chrono::{DateTime, NaiveDateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const IMAGES_DIR: &str = "images";
pub const LABELS_DIR: &str = "labels_predictions";
pub const MANIFEST_FILE: &str = "sequence.json";

const FOLDER_TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// `{camera_id}_{camera_name}_{YYYY-MM-DD_HH-MM-SS}`
pub fn sequence_folder_name(camera_id: i64, camera_name: &str, created_at: &str) -> String {
    format!(
        "{}_{}_{}",
        camera_id,
        path_safe(camera_name),
        folder_timestamp(created_at)
    )
}

/// Creation time truncated to the second, with `:` and `T` swapped for
/// characters that are safe in file names.
pub fn folder_timestamp(created_at: &str) -> String {
    match parse_created_at(created_at) {
        Some(ts) => ts.format(FOLDER_TIMESTAMP_FORMAT).to_string(),
        None => {
            debug!("Unrecognized timestamp {}, truncating as text", created_at);
            created_at
                .chars()
                .take(19)
                .collect::<String>()
                .replace(':', "-")
                .replace('T', "_")
        }
    }
}

/// Wall-clock time as written by the API, offset ignored
fn parse_created_at(value: &str) -> Option<NaiveDateTime> {
    let value = value.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.naive_local());
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
}

fn path_safe(name: &str) -> String {
    name.replace(['/', '\\'], "-")
}

/// Written last into a sequence folder once every detection was processed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceManifest {
    pub sequence_id: i64,
    pub camera_id: i64,
    pub camera_name: String,
    pub created_at: String,
    pub detections: usize,
    pub images_written: usize,
    pub images_failed: usize,
    pub downloaded_at: DateTime<Utc>,
}

impl SequenceManifest {
    pub async fn write(&self, folder: &Path) -> Result<()> {
        let data = serde_json::to_vec_pretty(self)?;
        tokio::fs::write(folder.join(MANIFEST_FILE), data).await?;
        Ok(())
    }
}

/// Manifests of the sequence folders directly under `target_dir`, by sequence id.
/// Unreadable manifests are skipped.
pub fn index_manifests(target_dir: &Path) -> HashMap<i64, (PathBuf, SequenceManifest)> {
    let mut index = HashMap::new();

    let entries = match std::fs::read_dir(target_dir) {
        Ok(entries) => entries,
        Err(_) => return index,
    };

    for entry in entries.flatten() {
        let folder = entry.path();
        let manifest_path = folder.join(MANIFEST_FILE);
        if !manifest_path.is_file() {
            continue;
        }

        let manifest = std::fs::read(&manifest_path)
            .map_err(anyhow::Error::from)
            .and_then(|data| Ok(serde_json::from_slice::<SequenceManifest>(&data)?));
        match manifest {
            Ok(manifest) => {
                index.insert(manifest.sequence_id, (folder, manifest));
            }
            Err(e) => warn!("Ignoring manifest {}: {}", manifest_path.display(), e),
        }
    }

    index
}
