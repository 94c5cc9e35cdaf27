//! Sample dataset of true-positive sequences, published as a zip archive.

use crate::config::DatasetConfig;
use crate::downloader::{part_path, stream_to_file};
use crate::error::Error;
use anyhow::{Context, Result};
use log::info;
use std::fs::File;
use std::path::{Path, PathBuf};

/// Download and extract the sample dataset, returns the extraction directory.
///
/// Nothing is fetched when the directory already exists.
pub async fn fetch_sample_dataset(http: &reqwest::Client, config: &DatasetConfig) -> Result<PathBuf> {
    if config.extract_dir.exists() {
        info!(
            "Sample dataset already present in {}",
            config.extract_dir.display()
        );
        return Ok(config.extract_dir.clone());
    }

    if !config.archive_path.exists() {
        download_archive(http, &config.url, &config.archive_path).await?;
    } else {
        info!("Reusing archive {}", config.archive_path.display());
    }

    let archive = config.archive_path.clone();
    let target = config.extract_dir.clone();
    let files = tokio::task::spawn_blocking(move || extract_archive(&archive, &target))
        .await
        .map_err(|e| Error::Io(format!("Extraction task failed: {}", e)))??;

    info!(
        "Extracted {} entries into {}",
        files,
        config.extract_dir.display()
    );
    Ok(config.extract_dir.clone())
}

async fn download_archive(http: &reqwest::Client, url: &str, dest: &Path) -> Result<()> {
    info!("Downloading {} to {}", url, dest.display());

    let response = http.get(url).send().await.map_err(Error::from)?;
    let status = response.status();
    if !status.is_success() {
        return Err(Error::Api {
            status: status.as_u16(),
            message: format!("Failed to download {}", url),
        }
        .into());
    }

    if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }

    let part = part_path(dest);
    match stream_to_file(response, &part).await {
        Ok(bytes) => {
            tokio::fs::rename(&part, dest).await?;
            info!("Saved {} ({} bytes)", dest.display(), bytes);
            Ok(())
        }
        Err(e) => {
            let _ = tokio::fs::remove_file(&part).await;
            Err(e)
        }
    }
}

/// Extract next to `target` and rename into place, so an interrupted
/// extraction never looks complete.
fn extract_archive(archive_path: &Path, target: &Path) -> Result<usize> {
    let file = File::open(archive_path)
        .with_context(|| format!("Failed to open {}", archive_path.display()))?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|e| Error::Parse(format!("{} is not a zip archive: {}", archive_path.display(), e)))?;

    let parent = match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;

    let staging = tempfile::Builder::new()
        .prefix(".extract-")
        .tempdir_in(parent)?;
    archive
        .extract(staging.path())
        .map_err(|e| Error::Io(format!("Failed to extract {}: {}", archive_path.display(), e)))?;

    std::fs::rename(staging.path(), target)
        .with_context(|| format!("Failed to move extracted files to {}", target.display()))?;

    Ok(archive.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::spawn_server;
    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use axum::routing::get;
    use axum::Router;
    use std::io::{Cursor, Write};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use zip::write::SimpleFileOptions;

    fn sample_zip() -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        writer
            .start_file("seq_1/images/a.jpg", options)
            .unwrap();
        writer.write_all(b"jpeg").unwrap();
        writer
            .start_file("seq_1/labels/a.txt", options)
            .unwrap();
        writer.write_all(b"0 0.5 0.5 0.1 0.1").unwrap();
        writer.finish().unwrap().into_inner()
    }

    async fn archive(State(hits): State<Arc<AtomicUsize>>) -> impl IntoResponse {
        hits.fetch_add(1, Ordering::SeqCst);
        sample_zip()
    }

    async fn server() -> (String, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let router = Router::new()
            .route("/dataset.zip", get(archive))
            .route("/gone.zip", get(|| async { StatusCode::NOT_FOUND }))
            .with_state(hits.clone());
        (spawn_server(router).await, hits)
    }

    fn config(url: String, dir: &Path) -> DatasetConfig {
        DatasetConfig {
            url,
            archive_path: dir.join("archive").join("dataset.zip"),
            extract_dir: dir.join("dataset"),
        }
    }

    #[tokio::test]
    async fn test_fetch_and_extract() -> Result<()> {
        let (url, hits) = server().await;
        let dir = tempfile::tempdir()?;
        let config = config(format!("{}/dataset.zip", url), dir.path());
        let http = reqwest::Client::new();

        let extracted = fetch_sample_dataset(&http, &config).await?;
        assert_eq!(extracted, config.extract_dir);
        assert_eq!(
            std::fs::read_to_string(extracted.join("seq_1/labels/a.txt"))?,
            "0 0.5 0.5 0.1 0.1"
        );
        assert!(config.archive_path.is_file());

        // Already extracted
        fetch_sample_dataset(&http, &config).await?;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_archive_is_an_api_error() -> Result<()> {
        let (url, _) = server().await;
        let dir = tempfile::tempdir()?;
        let config = config(format!("{}/gone.zip", url), dir.path());

        let err = fetch_sample_dataset(&reqwest::Client::new(), &config)
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::Api { status: 404, .. })
        ));
        assert!(!config.archive_path.exists());
        assert!(!config.extract_dir.exists());
        Ok(())
    }

    #[test]
    fn test_corrupt_archive() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let archive = dir.path().join("broken.zip");
        std::fs::write(&archive, b"not a zip")?;

        let err = extract_archive(&archive, &dir.path().join("out")).unwrap_err();
        assert!(matches!(err.downcast_ref::<Error>(), Some(Error::Parse(_))));
        assert!(!dir.path().join("out").exists());
        Ok(())
    }
}
