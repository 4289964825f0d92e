// Audio + video merge through ffmpeg

use async_trait::async_trait;
use tracing::{debug, error};

use super::errors::DownloadError;
use super::tools::{ToolManager, ToolType};
use super::traits::MediaMerger;
use super::utils::run_output_with_timeout;

/// Stream-copies a video-only and an audio-only input into one mp4.
pub struct FfmpegMerger {
    ffmpeg_path: String,
    timeout_secs: u64,
}

impl FfmpegMerger {
    pub fn new() -> Self {
        Self::with_path(ToolManager::new().resolve_path(ToolType::Ffmpeg))
    }

    pub fn with_path(ffmpeg_path: impl Into<String>) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            timeout_secs: 300,
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    fn build_args(video: &str, audio: &str, output: &str) -> Vec<String> {
        [
            "-hide_banner",
            "-loglevel",
            "error",
            "-y",
            "-i",
            video,
            "-i",
            audio,
            "-map",
            "0:v:0",
            "-map",
            "1:a:0",
            "-c",
            "copy",
            "-movflags",
            "+faststart",
            output,
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }
}

impl Default for FfmpegMerger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaMerger for FfmpegMerger {
    async fn merge(&self, video: Vec<u8>, audio: Vec<u8>) -> Result<Vec<u8>, DownloadError> {
        let work_dir = tempfile::Builder::new()
            .prefix("media-relay-merge")
            .tempdir()
            .map_err(|e| DownloadError::MergeFailed(format!("couldn't create work dir: {}", e)))?;

        let video_path = work_dir.path().join("video.mp4");
        let audio_path = work_dir.path().join("audio.m4a");
        let output_path = work_dir.path().join("merged.mp4");

        tokio::fs::write(&video_path, &video)
            .await
            .map_err(|e| DownloadError::MergeFailed(format!("couldn't write video input: {}", e)))?;
        tokio::fs::write(&audio_path, &audio)
            .await
            .map_err(|e| DownloadError::MergeFailed(format!("couldn't write audio input: {}", e)))?;

        let args = Self::build_args(
            &video_path.to_string_lossy(),
            &audio_path.to_string_lossy(),
            &output_path.to_string_lossy(),
        );
        debug!(video_bytes = video.len(), audio_bytes = audio.len(), "merging streams");

        let output = run_output_with_timeout(&self.ffmpeg_path, args, self.timeout_secs)
            .await
            .map_err(DownloadError::MergeFailed)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            error!(code = ?output.status.code(), stderr = %stderr, "ffmpeg merge failed");
            return Err(DownloadError::MergeFailed(stderr));
        }

        tokio::fs::read(&output_path)
            .await
            .map_err(|e| DownloadError::MergeFailed(format!("couldn't read merged output: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_args_copy_streams() {
        let args = FfmpegMerger::build_args("v.mp4", "a.m4a", "out.mp4");
        let joined = args.join(" ");
        assert!(joined.contains("-i v.mp4 -i a.m4a"));
        assert!(joined.contains("-c copy -movflags +faststart"));
        assert_eq!(args.last().map(String::as_str), Some("out.mp4"));
    }

    #[tokio::test]
    async fn test_missing_binary_is_merge_failure() {
        let merger = FfmpegMerger::with_path("/nonexistent/ffmpeg-binary");
        let err = merger.merge(vec![1], vec![2]).await.unwrap_err();
        assert!(matches!(err, DownloadError::MergeFailed(_)));
    }
}
