// Common data models for the media pipeline

/// Host transport limit for a single media group.
pub const MAX_GROUP_ITEMS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Photo,
    Video,
    Audio,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Photo => "photo",
            Self::Video => "video",
            Self::Audio => "audio",
        }
    }
}

/// Where the bytes of a media item live. Exactly one representation at a time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaPayload {
    /// Raw bytes uploaded under the given filename
    Bytes { data: Vec<u8>, filename: String },
    /// Remote URL the host fetches by itself
    Url(String),
    /// Reference to a file the host already stores
    FileRef(String),
}

/// One deliverable unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaItem {
    pub kind: MediaKind,
    pub payload: MediaPayload,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Only ever set on the first item of a set
    pub caption: Option<String>,
}

impl MediaItem {
    pub fn new(kind: MediaKind, payload: MediaPayload) -> Self {
        Self {
            kind,
            payload,
            width: None,
            height: None,
            caption: None,
        }
    }

    pub fn photo_url(url: impl Into<String>) -> Self {
        Self::new(MediaKind::Photo, MediaPayload::Url(url.into()))
    }

    pub fn video_url(url: impl Into<String>) -> Self {
        Self::new(MediaKind::Video, MediaPayload::Url(url.into()))
    }

    pub fn with_dimensions(mut self, width: Option<u32>, height: Option<u32>) -> Self {
        // Dimensions are meaningless for audio
        if self.kind != MediaKind::Audio {
            self.width = width;
            self.height = height;
        }
        self
    }
}

/// Caption text and source identity reported by a resolver.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultMeta {
    pub caption: String,
    pub source_id: String,
}

/// Ordered media returned by a resolver.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaSet {
    pub items: Vec<MediaItem>,
    pub meta: ResultMeta,
}

impl MediaSet {
    pub fn new(items: Vec<MediaItem>, caption: impl Into<String>, source_id: impl Into<String>) -> Self {
        Self {
            items,
            meta: ResultMeta {
                caption: caption.into(),
                source_id: source_id.into(),
            },
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Empty sets mean "resolution failed" and are never delivered.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Keep at most `MAX_GROUP_ITEMS`, preserving order.
    pub fn truncate_to_group_limit(&mut self) {
        self.items.truncate(MAX_GROUP_ITEMS);
    }

    pub fn is_single_photo(&self) -> bool {
        self.items.len() == 1 && self.items[0].kind == MediaKind::Photo
    }
}

/// Stream format offered by a video source
#[derive(Debug, Clone, PartialEq)]
pub struct FormatDescriptor {
    /// Platform format tag (e.g. "137", "140")
    pub id: String,
    /// Bitrate in bits per second
    pub bitrate: u64,
    /// Human readable resolution tag (e.g. "720p", "1080p60")
    pub quality_label: String,
    /// Size of the stream in bytes (0 when unknown)
    pub content_length: u64,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// e.g. "video/mp4", "audio/mp4", "video/webm"
    pub mime_type: String,
    pub audio_channels: Option<u32>,
    pub has_video: bool,
    pub has_audio: bool,
    /// Direct download URL of the stream
    pub url: Option<String>,
}

impl FormatDescriptor {
    pub fn is_video_only(&self) -> bool {
        self.has_video && !self.has_audio
    }

    pub fn is_audio_only(&self) -> bool {
        self.has_audio && !self.has_video
    }

    pub fn matches_type(&self, mime: &str) -> bool {
        self.mime_type.starts_with(mime)
    }
}

/// Video metadata with all offered formats
#[derive(Debug, Clone, PartialEq)]
pub struct VideoMetadata {
    pub id: String,
    pub title: String,
    pub author: String,
    pub duration_seconds: u64,
    /// Thumbnail URLs, lowest quality first
    pub thumbnails: Vec<String>,
    pub formats: Vec<FormatDescriptor>,
}

impl VideoMetadata {
    pub fn format(&self, id: &str) -> Option<&FormatDescriptor> {
        self.formats.iter().find(|f| f.id == id)
    }

    /// Highest listed thumbnail, upgraded to the max resolution variant.
    pub fn best_thumbnail(&self) -> Option<String> {
        self.thumbnails
            .last()
            .map(|url| url.replacen("sddefault", "maxresdefault", 1))
    }

    /// Duration rendered like "1h2m3s", "4m5s" or "42s".
    pub fn duration_label(&self) -> String {
        let total = self.duration_seconds;
        let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
        if h > 0 {
            format!("{}h{}m{}s", h, m, s)
        } else if m > 0 {
            format!("{}m{}s", m, s)
        } else {
            format!("{}s", s)
        }
    }

    /// Caption used for every delivery of this video.
    pub fn caption(&self) -> String {
        format!("<b>{}:</b> {}", self.author, self.title)
    }
}

/// Network configuration for fetchers
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// SOCKS5 proxy URL (e.g., "socks5://127.0.0.1:1080")
    pub proxy: Option<String>,

    /// Timeout in seconds
    pub timeout: Option<u32>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            proxy: None,
            timeout: Some(120),
        }
    }
}
