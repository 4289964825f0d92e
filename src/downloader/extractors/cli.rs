// CLI InfoExtractor - uses native `yt-dlp` binary
//
// Runs `yt-dlp --dump-json` and maps the result onto our metadata model.
// For YouTube several player clients are tried in turn; the android client
// is least likely to be challenged.

use serde_json::Value;
use tracing::{debug, warn};

use super::ExtractorConfig;
use crate::downloader::errors::DownloadError;
use crate::downloader::models::{FormatDescriptor, VideoMetadata};
use crate::downloader::tools::{ToolManager, ToolType};
use crate::downloader::utils::{get_proxy_args, get_timeout_args, run_output_with_timeout};

/// Extra seconds the process gets on top of the socket timeout.
const PROCESS_GRACE_SECS: u64 = 30;

/// CLI-based info extractor using yt-dlp binary
pub struct CliInfoExtractor {
    ytdlp_path: String,
    config: ExtractorConfig,
}

impl CliInfoExtractor {
    pub fn new(config: ExtractorConfig) -> Self {
        Self {
            ytdlp_path: ToolManager::new().resolve_path(ToolType::YtDlp),
            config,
        }
    }

    /// Use a specific yt-dlp binary instead of searching for one.
    pub fn with_path(ytdlp_path: impl Into<String>, config: ExtractorConfig) -> Self {
        Self {
            ytdlp_path: ytdlp_path.into(),
            config,
        }
    }

    pub fn is_youtube(url: &str) -> bool {
        let lower = url.to_lowercase();
        lower.contains("youtube.com") || lower.contains("youtu.be")
    }

    /// Accept bare YouTube ids as well as URLs.
    pub fn normalize_target(url_or_id: &str) -> String {
        if url_or_id.contains("://") || url_or_id.contains('.') {
            url_or_id.to_string()
        } else {
            format!("https://www.youtube.com/watch?v={}", url_or_id)
        }
    }

    /// Build command arguments
    fn build_args(&self, url: &str, client: Option<&str>, whole_post: bool) -> Vec<String> {
        let mut args = if whole_post {
            // Multi-item posts come back as one playlist document
            vec!["--dump-single-json".to_string()]
        } else {
            vec!["--dump-json".to_string(), "--no-playlist".to_string()]
        };
        args.extend([
            "--no-warnings".to_string(),
            "--retries".to_string(),
            "2".to_string(),
        ]);
        args.extend(get_timeout_args(&self.config.network));

        // Player client for YouTube
        if let Some(client) = client {
            args.push("--extractor-args".to_string());
            args.push(format!("youtube:player_client={}", client));
        }

        // Cookies
        if let Some(path) = &self.config.cookies_path {
            args.push("--cookies".to_string());
            args.push(path.clone());
        }

        args.extend(get_proxy_args(&self.config.network));

        args.push(url.to_string());
        args
    }

    fn player_clients(&self, url: &str) -> Vec<Option<String>> {
        if !Self::is_youtube(url) {
            return vec![None];
        }
        match &self.config.player_client {
            Some(client) => vec![Some(client.clone())],
            None => vec![Some("android".to_string()), Some("web".to_string())],
        }
    }

    /// Raw yt-dlp JSON for a single video
    pub async fn dump_json(&self, url: &str) -> Result<Value, DownloadError> {
        self.run_json(url, false).await
    }

    /// Raw yt-dlp JSON for a post, with `entries` when it holds several items
    pub async fn dump_post(&self, url: &str) -> Result<Value, DownloadError> {
        self.run_json(url, true).await
    }

    async fn run_json(&self, url: &str, whole_post: bool) -> Result<Value, DownloadError> {
        let target = Self::normalize_target(url);
        let timeout_secs =
            self.config.network.timeout.unwrap_or(60) as u64 + PROCESS_GRACE_SECS;
        let mut last_error = DownloadError::Unknown("No clients to try".to_string());

        for client in self.player_clients(&target) {
            let args = self.build_args(&target, client.as_deref(), whole_post);
            debug!(client = ?client, url = %target, "running yt-dlp");

            match run_output_with_timeout(&self.ytdlp_path, args, timeout_secs).await {
                Ok(out) if out.status.success() => {
                    return serde_json::from_slice(&out.stdout)
                        .map_err(|e| DownloadError::ParseError(format!("Invalid JSON: {}", e)));
                }
                Ok(out) => {
                    let stderr = String::from_utf8_lossy(&out.stderr).trim().to_string();
                    warn!(client = ?client, url = %target, stderr = %stderr, "yt-dlp failed");
                    last_error = DownloadError::from(stderr);
                }
                Err(e) => {
                    warn!(client = ?client, url = %target, error = %e, "yt-dlp did not run");
                    last_error = if e.starts_with("Failed to start") {
                        DownloadError::ToolNotFound(e)
                    } else {
                        DownloadError::from(e)
                    };
                }
            }
        }

        Err(last_error)
    }

    /// Video metadata with formats
    pub async fn extract(&self, url: &str) -> Result<VideoMetadata, DownloadError> {
        let json = self.dump_json(url).await?;
        Self::parse_metadata(&json)
    }

    pub fn parse_metadata(json: &Value) -> Result<VideoMetadata, DownloadError> {
        let id = json["id"]
            .as_str()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| DownloadError::ParseError("No id in JSON".to_string()))?;

        let mut thumbnails: Vec<String> = json["thumbnails"]
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|t| t["url"].as_str().map(|s| s.to_string()))
                    .collect()
            })
            .unwrap_or_default();
        if thumbnails.is_empty() {
            if let Some(thumb) = json["thumbnail"].as_str() {
                thumbnails.push(thumb.to_string());
            }
        }

        Ok(VideoMetadata {
            id: id.to_string(),
            title: json["title"].as_str().unwrap_or("Unknown").to_string(),
            author: json["uploader"]
                .as_str()
                .or_else(|| json["channel"].as_str())
                .unwrap_or("Unknown")
                .to_string(),
            duration_seconds: json["duration"].as_f64().unwrap_or(0.0) as u64,
            thumbnails,
            formats: Self::parse_formats(json)?,
        })
    }

    pub fn parse_formats(json: &Value) -> Result<Vec<FormatDescriptor>, DownloadError> {
        let formats_array = json["formats"]
            .as_array()
            .ok_or_else(|| DownloadError::ParseError("No formats array in JSON".to_string()))?;

        Ok(formats_array.iter().map(Self::parse_format).collect())
    }

    fn parse_format(f: &Value) -> FormatDescriptor {
        let vcodec = f["vcodec"].as_str();
        let acodec = f["acodec"].as_str();
        let height = f["height"].as_u64().map(|h| h as u32);

        let has_video = match vcodec {
            Some(v) => v != "none",
            None => height.is_some(),
        };
        let has_audio = acodec.map_or(false, |a| a != "none");

        let ext = f["ext"].as_str().unwrap_or("");
        let mime_type = match (has_video, ext) {
            (true, e) => format!("video/{}", e),
            (false, "m4a") | (false, "mp4") => "audio/mp4".to_string(),
            (false, e) => format!("audio/{}", e),
        };

        let quality_label = f["format_note"]
            .as_str()
            .map(|s| s.to_string())
            .or_else(|| height.map(|h| format!("{}p", h)))
            .unwrap_or_default();

        FormatDescriptor {
            id: f["format_id"].as_str().unwrap_or("").to_string(),
            bitrate: f["tbr"].as_f64().map(|kbps| (kbps * 1000.0) as u64).unwrap_or(0),
            quality_label,
            content_length: f["filesize"]
                .as_u64()
                .or_else(|| f["filesize_approx"].as_u64())
                .unwrap_or(0),
            width: f["width"].as_u64().map(|w| w as u32),
            height,
            mime_type,
            audio_channels: f["audio_channels"].as_u64().map(|c| c as u32),
            has_video,
            has_audio,
            url: f["url"].as_str().map(|s| s.to_string()),
        }
    }
}
