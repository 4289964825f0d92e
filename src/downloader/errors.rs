// Error types for resolvers, fetchers and the merge step

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum DownloadError {
    /// Network timeout while talking to the platform
    #[error("Network timeout: the platform is not responding")]
    NetworkTimeout,

    /// Platform blocked the request (429, bot detection, etc.)
    #[error("Request blocked by the platform: {0}")]
    Blocked(String),

    /// yt-dlp or ffmpeg not found in system
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// URL or video id the platform does not recognise
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Failed to parse extractor output
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Requested format id is not offered by the source
    #[error("Format {0} not available")]
    FormatNotFound(String),

    /// HTTP transfer of a stream failed
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Audio and video could not be combined
    #[error("Merge failed: {0}")]
    MergeFailed(String),

    /// Command execution failed
    #[error("Execution error: {0}")]
    ExecutionError(String),

    /// Unknown error with details
    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl DownloadError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::ToolNotFound(_) | Self::InvalidUrl(_) | Self::FormatNotFound(_)
        )
    }
}

// Classify raw stderr text from yt-dlp / ffmpeg
impl From<String> for DownloadError {
    fn from(s: String) -> Self {
        let lower = s.to_lowercase();

        if lower.contains("timeout") || lower.contains("timed out") {
            return Self::NetworkTimeout;
        }

        if lower.contains("429")
            || lower.contains("sign in to confirm")
            || lower.contains("blocked")
        {
            return Self::Blocked(s);
        }

        if lower.contains("command not found") || lower.contains("no such file") {
            return Self::ToolNotFound(s);
        }

        if lower.contains("unsupported url")
            || lower.contains("invalid url")
            || lower.contains("is not a valid url")
            || lower.contains("video unavailable")
        {
            return Self::InvalidUrl(s);
        }

        if lower.contains("json") || lower.contains("parse") {
            return Self::ParseError(s);
        }

        Self::Unknown(s)
    }
}

impl From<reqwest::Error> for DownloadError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::NetworkTimeout
        } else {
            Self::NetworkError(e.to_string())
        }
    }
}
