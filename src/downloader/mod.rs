//! Sequence downloader.
//!
//! Fetches the detections of remote sequences and mirrors them on disk, one
//! folder per sequence:
//!
//! ```text
//! {target_dir}/{camera_id}_{camera_name}_{YYYY-MM-DD_HH-MM-SS}/
//!     images/<bucket key name>
//!     labels_predictions/<bucket key stem>.txt
//!     sequence.json
//! ```
//!
//! Sequences are processed one after the other. A sequence that cannot be
//! resolved (no detections, unknown camera, API error) is reported and
//! skipped; a failed image download only skips that image. Once every
//! sequence was handled, the camera ledger is reconciled with the cameras
//! seen.

use crate::api::SequenceApi;
use crate::config::DownloadConfig;
use crate::error::Error;
use crate::ledger::{self, ReconcileOutcome};
use crate::models::RemoteCamera;
use anyhow::Result;
use chrono::Utc;
use futures_util::StreamExt;
use log::{debug, error, info, warn};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

pub mod layout;


pub use layout::{sequence_folder_name, SequenceManifest, IMAGES_DIR, LABELS_DIR, MANIFEST_FILE};

/// Per-run download settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadOptions {
    /// Detections fetched per sequence
    pub limit: u32,
    /// Newest detections first
    pub descending: bool,
    /// Re-download sequences whose folder already exists
    pub force: bool,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            limit: 10,
            descending: false,
            force: false,
        }
    }
}

impl From<&DownloadConfig> for DownloadOptions {
    fn from(config: &DownloadConfig) -> Self {
        Self {
            limit: config.limit,
            descending: config.descending,
            force: config.force,
        }
    }
}

/// What happened to one requested sequence
#[derive(Debug, Clone, PartialEq)]
pub enum SequenceOutcome {
    Downloaded {
        folder: PathBuf,
        labels_written: usize,
        images_written: usize,
        images_failed: usize,
    },
    AlreadyPresent {
        folder: PathBuf,
    },
    Failed {
        reason: String,
    },
}

/// Summary of a [`SequenceDownloader::download_sequences`] run
#[derive(Debug, Clone, Default)]
pub struct DownloadReport {
    /// One entry per requested sequence id, in request order
    pub outcomes: Vec<(i64, SequenceOutcome)>,
    /// Cameras of every resolved sequence
    pub camera_ids: BTreeSet<i64>,
    /// Ledger reconciliation, absent when no camera was resolved
    pub ledger: Option<ReconcileOutcome>,
}

impl DownloadReport {
    pub fn downloaded(&self) -> usize {
        self.count(|o| matches!(o, SequenceOutcome::Downloaded { .. }))
    }

    pub fn already_present(&self) -> usize {
        self.count(|o| matches!(o, SequenceOutcome::AlreadyPresent { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, SequenceOutcome::Failed { .. }))
    }

    pub fn outcome(&self, sequence_id: i64) -> Option<&SequenceOutcome> {
        self.outcomes
            .iter()
            .find(|(id, _)| *id == sequence_id)
            .map(|(_, outcome)| outcome)
    }

    fn count<F: Fn(&SequenceOutcome) -> bool>(&self, predicate: F) -> usize {
        self.outcomes.iter().filter(|(_, o)| predicate(o)).count()
    }
}

/// Result of processing one sequence: the outcome and the camera it belongs to
type Processed = (SequenceOutcome, Option<i64>);

pub struct SequenceDownloader<A> {
    api: A,
    http: reqwest::Client,
    options: DownloadOptions,
}

impl<A: SequenceApi> SequenceDownloader<A> {
    /// `http` is used for the image URLs, which are fetched without API credentials
    pub fn new(api: A, http: reqwest::Client, options: DownloadOptions) -> Self {
        Self { api, http, options }
    }

    pub fn options(&self) -> &DownloadOptions {
        &self.options
    }

    /// Download every sequence in `sequence_ids`, then reconcile the ledger at
    /// `csv_path` with the cameras encountered.
    ///
    /// Only authentication failures and ledger errors abort the run.
    pub async fn download_sequences(
        &self,
        sequence_ids: &[i64],
        target_dir: &Path,
        remote_cameras: &[RemoteCamera],
        csv_path: &Path,
    ) -> Result<DownloadReport> {
        info!(
            "Downloading {} sequences into {}",
            sequence_ids.len(),
            target_dir.display()
        );

        let manifests = if self.options.force {
            HashMap::new()
        } else {
            layout::index_manifests(target_dir)
        };
        let camera_names: HashMap<i64, &str> = remote_cameras
            .iter()
            .map(|camera| (camera.id, camera.display_name()))
            .collect();

        let mut report = DownloadReport::default();

        for &sequence_id in sequence_ids {
            if let Some((folder, manifest)) = manifests.get(&sequence_id) {
                info!(
                    "Sequence {} already downloaded in {}, skipping",
                    sequence_id,
                    folder.display()
                );
                report.camera_ids.insert(manifest.camera_id);
                report.outcomes.push((
                    sequence_id,
                    SequenceOutcome::AlreadyPresent {
                        folder: folder.clone(),
                    },
                ));
                continue;
            }

            let (outcome, camera_id) = match self
                .download_sequence(sequence_id, target_dir, &camera_names)
                .await
            {
                Ok(processed) => processed,
                Err(e) => {
                    if e.downcast_ref::<Error>().map_or(false, Error::is_fatal) {
                        error!("Aborting downloads at sequence {}: {:#}", sequence_id, e);
                        return Err(e);
                    }
                    warn!("Skipping sequence {}: {:#}", sequence_id, e);
                    (
                        SequenceOutcome::Failed {
                            reason: format!("{:#}", e),
                        },
                        None,
                    )
                }
            };

            if let Some(camera_id) = camera_id {
                report.camera_ids.insert(camera_id);
            }
            report.outcomes.push((sequence_id, outcome));
        }

        info!(
            "Sequences downloaded: {}, already present: {}, failed: {}",
            report.downloaded(),
            report.already_present(),
            report.failed()
        );

        if !report.camera_ids.is_empty() {
            let used: HashSet<i64> = report.camera_ids.iter().copied().collect();
            report.ledger = Some(ledger::reconcile(&used, remote_cameras, csv_path)?);
        }

        Ok(report)
    }

    async fn download_sequence(
        &self,
        sequence_id: i64,
        target_dir: &Path,
        camera_names: &HashMap<i64, &str>,
    ) -> Result<Processed> {
        let detections = self
            .api
            .fetch_sequence_detections(sequence_id, self.options.limit, self.options.descending)
            .await?;

        let first = match detections.first() {
            Some(first) => first,
            None => {
                warn!("Sequence {} has no detections", sequence_id);
                return Ok((
                    SequenceOutcome::Failed {
                        reason: "no detections".to_string(),
                    },
                    None,
                ));
            }
        };

        let camera_id = first.camera_id;
        let camera_name = match camera_names.get(&camera_id) {
            Some(name) => *name,
            None => {
                warn!(
                    "Camera {} of sequence {} is not in the remote camera list",
                    camera_id, sequence_id
                );
                return Ok((
                    SequenceOutcome::Failed {
                        reason: format!("unknown camera {}", camera_id),
                    },
                    None,
                ));
            }
        };

        let folder = target_dir.join(sequence_folder_name(
            camera_id,
            camera_name,
            &first.created_at,
        ));

        if folder.exists() && !self.options.force {
            if !folder.join(MANIFEST_FILE).exists() {
                warn!(
                    "{} exists without {}, it may be incomplete; use force to download it again",
                    folder.display(),
                    MANIFEST_FILE
                );
            } else {
                info!("{} already exists, skipping", folder.display());
            }
            return Ok((SequenceOutcome::AlreadyPresent { folder }, Some(camera_id)));
        }

        let images_dir = folder.join(IMAGES_DIR);
        let labels_dir = folder.join(LABELS_DIR);
        if self.options.force && folder.exists() {
            clear_previous_download(&folder).await?;
        }
        tokio::fs::create_dir_all(&images_dir).await?;
        tokio::fs::create_dir_all(&labels_dir).await?;

        let mut labels_written = 0;
        let mut images_written = 0;
        let mut images_failed = 0;

        for detection in &detections {
            let (image_name, label_name) =
                match (detection.image_file_name(), detection.label_file_name()) {
                    (Some(image), Some(label)) => (image, label),
                    _ => {
                        warn!(
                            "Skipping detection with unusable bucket key {:?} in sequence {}",
                            detection.bucket_key, sequence_id
                        );
                        images_failed += 1;
                        continue;
                    }
                };

            tokio::fs::write(labels_dir.join(label_name), detection.bboxes.as_bytes()).await?;
            labels_written += 1;

            let image_path = images_dir.join(image_name);
            match self.download_image(&detection.url, &image_path).await {
                Ok(bytes) => {
                    debug!("Saved {} ({} bytes)", image_path.display(), bytes);
                    images_written += 1;
                }
                Err(e) => {
                    warn!("Failed to download image {}: {:#}", detection.bucket_key, e);
                    images_failed += 1;
                }
            }
        }

        SequenceManifest {
            sequence_id,
            camera_id,
            camera_name: camera_name.to_string(),
            created_at: first.created_at.clone(),
            detections: detections.len(),
            images_written,
            images_failed,
            downloaded_at: Utc::now(),
        }
        .write(&folder)
        .await?;

        info!(
            "Sequence {} saved to {} ({} images, {} failed)",
            sequence_id,
            folder.display(),
            images_written,
            images_failed
        );

        Ok((
            SequenceOutcome::Downloaded {
                folder,
                labels_written,
                images_written,
                images_failed,
            },
            Some(camera_id),
        ))
    }

    /// Stream an image to `dest` through a `.part` file renamed on success
    async fn download_image(&self, url: &str, dest: &Path) -> Result<u64> {
        let response = self.http.get(url).send().await.map_err(Error::from)?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::from_status(status.as_u16(), url.to_string()).into());
        }

        let part = part_path(dest);
        match stream_to_file(response, &part).await {
            Ok(written) => {
                tokio::fs::rename(&part, dest).await?;
                Ok(written)
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&part).await;
                Err(e)
            }
        }
    }
}

pub(crate) async fn stream_to_file(response: reqwest::Response, path: &Path) -> Result<u64> {
    let mut file = tokio::fs::File::create(path).await?;
    let mut stream = response.bytes_stream();
    let mut written = 0u64;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(Error::from)?;
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;

    Ok(written)
}

pub(crate) fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_os_string();
    name.push(".part");
    PathBuf::from(name)
}

/// Forced downloads replace the folder contents instead of merging into them
async fn clear_previous_download(folder: &Path) -> Result<()> {
    for dir in [IMAGES_DIR, LABELS_DIR] {
        let path = folder.join(dir);
        if path.exists() {
            tokio::fs::remove_dir_all(&path).await?;
        }
    }
    let manifest = folder.join(MANIFEST_FILE);
    if manifest.exists() {
        tokio::fs::remove_file(&manifest).await?;
    }
    debug!("Cleared previous download in {}", folder.display());
    Ok(())
}
