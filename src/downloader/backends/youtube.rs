// YouTube backend
//
// Two entry points:
// * `preview` / `fetch` drive the button-triggered deferred download
// * `PlatformResolver::resolve` handles Shorts links inline

use std::sync::Arc;

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use tracing::{debug, info};

use crate::downloader::cache::{DeliveryCache, Variant};
use crate::downloader::errors::DownloadError;
use crate::downloader::extractors::{CliInfoExtractor, ExtractorConfig};
use crate::downloader::format_selector::FormatSelector;
use crate::downloader::models::{
    FormatDescriptor, MediaItem, MediaKind, MediaPayload, MediaSet, VideoMetadata,
};
use crate::downloader::retry::RetryPolicy;
use crate::downloader::token::{DeferredJob, JobAction};
use crate::downloader::traits::{MediaMerger, PlatformResolver, VideoSource};
use crate::downloader::utils::{build_http_client, fetch_bytes, sanitize_filename};

/// Range size used when pulling a stream in pieces.
const SEGMENT_BYTES: u64 = 10 * 1024 * 1024;

lazy_static! {
    static ref VIDEO_ID: Regex =
        Regex::new(r"(?:shorts/|[?&]v=|youtu\.be/|embed/)([A-Za-z0-9_-]{11})").unwrap();
}

/// Extract the 11 character video id from a YouTube URL.
pub fn video_id_from_url(url: &str) -> Option<String> {
    VIDEO_ID
        .captures(url)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// `VideoSource` backed by yt-dlp metadata and plain HTTP stream transfers.
pub struct YtDlpVideoSource {
    extractor: CliInfoExtractor,
    client: reqwest::Client,
}

impl YtDlpVideoSource {
    pub fn new(config: ExtractorConfig) -> Result<Self, DownloadError> {
        let client = build_http_client(&config.network)?;
        Ok(Self {
            extractor: CliInfoExtractor::new(config),
            client,
        })
    }

    /// Pull `url` in ranged pieces. The listed size is only a hint; the real
    /// length comes from the server's `Content-Range` header.
    async fn fetch_segmented(&self, url: &str, size_hint: u64) -> Result<Vec<u8>, DownloadError> {
        let mut data = Vec::with_capacity(size_hint as usize);
        let mut total: Option<u64> = None;
        loop {
            let start = data.len() as u64;
            if total.map_or(false, |total| start >= total) {
                break;
            }
            let end = match total {
                Some(total) => (start + SEGMENT_BYTES).min(total) - 1,
                None => start + SEGMENT_BYTES - 1,
            };

            let response = self
                .client
                .get(url)
                .header(reqwest::header::RANGE, format!("bytes={}-{}", start, end))
                .send()
                .await?;
            let status = response.status();

            // Length unknown and the previous piece ended exactly on the boundary
            if status == StatusCode::RANGE_NOT_SATISFIABLE && total.is_none() && start > 0 {
                break;
            }
            if status == StatusCode::OK {
                if start > 0 {
                    return Err(DownloadError::NetworkError(format!(
                        "server ignored range request at offset {}",
                        start
                    )));
                }
                return Ok(response.bytes().await?.to_vec());
            }
            if status != StatusCode::PARTIAL_CONTENT {
                return Err(DownloadError::NetworkError(format!(
                    "HTTP {} for range {}-{}",
                    status, start, end
                )));
            }

            if total.is_none() {
                total = content_range_total(response.headers());
            }
            let chunk = response.bytes().await?;
            if chunk.is_empty() {
                if total.is_none() {
                    break;
                }
                return Err(DownloadError::NetworkError(format!(
                    "empty segment at offset {}",
                    start
                )));
            }
            let short = (chunk.len() as u64) < end - start + 1;
            data.extend_from_slice(&chunk);
            if short && total.is_none() {
                break;
            }
        }

        if let Some(total) = total {
            if data.len() as u64 != total {
                return Err(DownloadError::NetworkError(format!(
                    "stream length mismatch: got {} of {} bytes",
                    data.len(),
                    total
                )));
            }
        }
        if data.len() as u64 != size_hint {
            debug!(listed = size_hint, actual = data.len(), "stream size differs from listing");
        }
        Ok(data)
    }
}

/// Complete length from a `Content-Range: bytes a-b/TOTAL` header.
fn content_range_total(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(reqwest::header::CONTENT_RANGE)?
        .to_str()
        .ok()?
        .rsplit_once('/')?
        .1
        .trim()
        .parse()
        .ok()
}

#[async_trait]
impl VideoSource for YtDlpVideoSource {
    async fn fetch_metadata(&self, url_or_id: &str) -> Result<VideoMetadata, DownloadError> {
        self.extractor.extract(url_or_id).await
    }

    async fn fetch_stream(
        &self,
        video: &VideoMetadata,
        format: &FormatDescriptor,
    ) -> Result<Vec<u8>, DownloadError> {
        let url = format
            .url
            .as_deref()
            .ok_or_else(|| DownloadError::FormatNotFound(format!("{} has no URL", format.id)))?;
        debug!(id = %video.id, format = %format.id, bytes = format.content_length, "fetching stream");

        if format.content_length > SEGMENT_BYTES {
            self.fetch_segmented(url, format.content_length).await
        } else {
            fetch_bytes(&self.client, url).await
        }
    }
}

/// Outcome of the preview stage: what the user gets to choose from.
#[derive(Debug, Clone)]
pub struct YouTubePreview {
    pub metadata: VideoMetadata,
    pub audio: FormatDescriptor,
    pub video: FormatDescriptor,
    pub audio_job: DeferredJob,
    pub video_job: DeferredJob,
}

impl YouTubePreview {
    pub fn audio_size_mib(&self) -> f64 {
        bytes_to_mib(self.audio_job.expected_size_bytes)
    }

    pub fn video_size_mib(&self) -> f64 {
        bytes_to_mib(self.video_job.expected_size_bytes)
    }
}

fn bytes_to_mib(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}

/// Downloaded media ready for upload.
#[derive(Debug, Clone)]
pub struct FetchedMedia {
    pub metadata: VideoMetadata,
    pub format: FormatDescriptor,
    pub data: Vec<u8>,
    pub filename: String,
}

pub struct YouTubeResolver {
    source: Arc<dyn VideoSource>,
    merger: Arc<dyn MediaMerger>,
    cache: DeliveryCache,
    file_prefix: String,
    preview_policy: RetryPolicy,
    fetch_policy: RetryPolicy,
    stream_policy: RetryPolicy,
}

impl YouTubeResolver {
    pub fn new(
        source: Arc<dyn VideoSource>,
        merger: Arc<dyn MediaMerger>,
        cache: DeliveryCache,
        file_prefix: impl Into<String>,
    ) -> Self {
        Self {
            source,
            merger,
            cache,
            file_prefix: file_prefix.into(),
            preview_policy: RetryPolicy::PREVIEW_METADATA,
            fetch_policy: RetryPolicy::FETCH_METADATA,
            stream_policy: RetryPolicy::STREAM,
        }
    }

    /// Override retry policies (metadata preview, metadata fetch, stream).
    pub fn with_policies(
        mut self,
        preview_policy: RetryPolicy,
        fetch_policy: RetryPolicy,
        stream_policy: RetryPolicy,
    ) -> Self {
        self.preview_policy = preview_policy;
        self.fetch_policy = fetch_policy;
        self.stream_policy = stream_policy;
        self
    }

    pub fn upload_filename(&self, metadata: &VideoMetadata) -> String {
        sanitize_filename(&format!(
            "{}-{}_{}",
            self.file_prefix, metadata.author, metadata.title
        ))
    }

    /// Stage A: look the video up and describe the two download actions.
    pub async fn preview(
        &self,
        url: &str,
        requester_user_id: i64,
        origin_message_id: i32,
    ) -> Result<YouTubePreview, DownloadError> {
        let metadata = self
            .preview_policy
            .run("youtube metadata", || self.source.fetch_metadata(url))
            .await?;

        let video = FormatSelector::select_video(&metadata.formats)
            .cloned()
            .ok_or_else(|| DownloadError::FormatNotFound("no supported video quality".into()))?;
        let audio = FormatSelector::select_audio(&metadata.formats)
            .cloned()
            .ok_or_else(|| DownloadError::FormatNotFound("no mp4 audio stream".into()))?;

        let job = |action, format: &FormatDescriptor, expected_size_bytes| DeferredJob {
            action,
            source_id: metadata.id.clone(),
            format_id: format.id.clone(),
            expected_size_bytes,
            origin_message_id,
            requester_user_id,
        };
        let audio_job = job(JobAction::FetchAudio, &audio, audio.content_length);
        let video_job = job(
            JobAction::FetchVideo,
            &video,
            video.content_length + audio.content_length,
        );

        info!(
            id = %metadata.id,
            video_format = %video.id,
            quality = %video.quality_label,
            audio_format = %audio.id,
            "youtube preview ready"
        );

        Ok(YouTubePreview {
            metadata,
            audio,
            video,
            audio_job,
            video_job,
        })
    }

    /// Stage B: download the chosen stream, merging audio in for video jobs.
    pub async fn fetch(&self, job: &DeferredJob) -> Result<FetchedMedia, DownloadError> {
        let metadata = self
            .fetch_policy
            .run("youtube metadata", || self.source.fetch_metadata(&job.source_id))
            .await?;

        let format = metadata
            .format(&job.format_id)
            .cloned()
            .ok_or_else(|| DownloadError::FormatNotFound(job.format_id.clone()))?;

        let data = match job.action {
            JobAction::FetchAudio => self.download(&metadata, &format).await?,
            JobAction::FetchVideo => {
                let audio = FormatSelector::select_audio(&metadata.formats)
                    .cloned()
                    .ok_or_else(|| DownloadError::FormatNotFound("no mp4 audio stream".into()))?;
                self.download_merged(&metadata, &format, &audio).await?
            }
        };

        let filename = self.upload_filename(&metadata);
        Ok(FetchedMedia {
            metadata,
            format,
            data,
            filename,
        })
    }

    async fn download(
        &self,
        metadata: &VideoMetadata,
        format: &FormatDescriptor,
    ) -> Result<Vec<u8>, DownloadError> {
        self.stream_policy
            .run("youtube stream", || self.source.fetch_stream(metadata, format))
            .await
    }

    async fn download_merged(
        &self,
        metadata: &VideoMetadata,
        video: &FormatDescriptor,
        audio: &FormatDescriptor,
    ) -> Result<Vec<u8>, DownloadError> {
        let video_bytes = self.download(metadata, video).await?;
        let audio_bytes = self.download(metadata, audio).await?;
        self.merger.merge(video_bytes, audio_bytes).await
    }
}

#[async_trait]
impl PlatformResolver for YouTubeResolver {
    fn name(&self) -> &'static str {
        "youtube"
    }

    /// Shorts: download and merge straight away, short-circuiting on cache.
    async fn resolve(&self, url: &str) -> Result<MediaSet, DownloadError> {
        let id = video_id_from_url(url).ok_or_else(|| DownloadError::InvalidUrl(url.to_string()))?;

        if let Some(hit) = self.cache.get(&id, &Variant::Video).await {
            debug!(id = %id, "shorts served from cache");
            let item = MediaItem::new(MediaKind::Video, MediaPayload::FileRef(hit.file_ref));
            return Ok(MediaSet::new(vec![item], hit.caption, id));
        }

        let metadata = self
            .fetch_policy
            .run("youtube metadata", || self.source.fetch_metadata(&id))
            .await?;
        let video = FormatSelector::select_video(&metadata.formats)
            .cloned()
            .ok_or_else(|| DownloadError::FormatNotFound("no supported video quality".into()))?;
        let audio = FormatSelector::select_audio(&metadata.formats)
            .cloned()
            .ok_or_else(|| DownloadError::FormatNotFound("no mp4 audio stream".into()))?;

        let data = self.download_merged(&metadata, &video, &audio).await?;
        let item = MediaItem::new(
            MediaKind::Video,
            MediaPayload::Bytes {
                data,
                filename: format!("{}.mp4", self.upload_filename(&metadata)),
            },
        )
        .with_dimensions(video.width, video.height);

        Ok(MediaSet::new(vec![item], metadata.caption(), metadata.id.clone()))
    }
}
