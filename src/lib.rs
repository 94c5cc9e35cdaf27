pub mod api;
pub mod config;
pub mod dataset;
pub mod downloader;
pub mod error;
pub mod ledger;
pub mod models;
pub mod utils;

#[cfg(test)]
mod test_support;

// Re-export main components for easier use
pub use api::{ApiClient, SequenceApi};
pub use config::{load_config, Config};
pub use downloader::{DownloadOptions, DownloadReport, SequenceDownloader, SequenceOutcome};
pub use error::Error;
pub use ledger::{reconcile, CameraLedger, ReconcileOutcome};
pub use models::{Detection, LocalCameraRow, RemoteCamera};
