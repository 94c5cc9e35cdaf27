use crate::models::{Detection, RemoteCamera};
use anyhow::Result;
use async_trait::async_trait;

pub mod client;

pub use client::ApiClient;

/// Remote calls the sequence downloader depends on
#[async_trait]
pub trait SequenceApi: Send + Sync {
    /// Detections of one sequence, at most `limit`, ordered by creation time
    async fn fetch_sequence_detections(
        &self,
        sequence_id: i64,
        limit: u32,
        descending: bool,
    ) -> Result<Vec<Detection>>;

    /// Every camera visible to the authenticated user
    async fn fetch_cameras(&self) -> Result<Vec<RemoteCamera>>;
}
