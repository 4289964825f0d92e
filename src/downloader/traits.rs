// Resolver, source and merge seams

use async_trait::async_trait;

use super::errors::DownloadError;
use super::models::{FormatDescriptor, MediaSet, VideoMetadata};

/// Turns a platform URL into deliverable media.
///
/// An empty `MediaSet` means "nothing found" and is not an error.
#[async_trait]
pub trait PlatformResolver: Send + Sync {
    /// Name of the resolver (for logging)
    fn name(&self) -> &'static str;

    async fn resolve(&self, url: &str) -> Result<MediaSet, DownloadError>;
}

/// Metadata and raw stream access for a video platform.
#[async_trait]
pub trait VideoSource: Send + Sync {
    /// Look up a video by URL or bare id. One attempt, no retry.
    async fn fetch_metadata(&self, url_or_id: &str) -> Result<VideoMetadata, DownloadError>;

    /// Download one stream completely. One attempt, no retry.
    async fn fetch_stream(
        &self,
        video: &VideoMetadata,
        format: &FormatDescriptor,
    ) -> Result<Vec<u8>, DownloadError>;
}

/// Combines separate video and audio streams into one container.
#[async_trait]
pub trait MediaMerger: Send + Sync {
    async fn merge(&self, video: Vec<u8>, audio: Vec<u8>) -> Result<Vec<u8>, DownloadError>;
}
