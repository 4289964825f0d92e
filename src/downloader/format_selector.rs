// FormatSelector - picks the video and audio streams for a download
//
// Video: highest bitrate among video-only streams of the target container
// whose quality label names one of the supported resolutions.
// Audio: the well-known AAC stream id, else the first stereo stream of the
// target container, else any stream of that container with audio channels.

use super::models::FormatDescriptor;

/// Quality labels we are willing to deliver (substring match).
pub const SUPPORTED_QUALITIES: [&str; 6] = ["1080p", "720p", "480p", "360p", "240p", "144p"];

/// Format id of the 128 kbps AAC stream.
pub const PREFERRED_AUDIO_FORMAT: &str = "140";

pub const VIDEO_CONTAINER: &str = "video/mp4";
pub const AUDIO_CONTAINER: &str = "audio/mp4";

pub struct FormatSelector;

impl FormatSelector {
    pub fn is_supported_quality(quality_label: &str) -> bool {
        SUPPORTED_QUALITIES
            .iter()
            .any(|supported| quality_label.contains(supported))
    }

    /// Highest-bitrate recognised quality among `formats`.
    ///
    /// Unrecognised labels are skipped even when their bitrate is higher.
    pub fn best_quality<'a>(formats: &[&'a FormatDescriptor]) -> Option<&'a FormatDescriptor> {
        let mut best: Option<&'a FormatDescriptor> = None;
        for &format in formats {
            if !Self::is_supported_quality(&format.quality_label) {
                continue;
            }
            if best.map_or(true, |b| format.bitrate > b.bitrate) {
                best = Some(format);
            }
        }
        best
    }

    /// Best video-only stream in the mp4 container.
    pub fn select_video(formats: &[FormatDescriptor]) -> Option<&FormatDescriptor> {
        let candidates: Vec<&FormatDescriptor> = formats
            .iter()
            .filter(|f| f.is_video_only() && f.matches_type(VIDEO_CONTAINER))
            .collect();
        Self::best_quality(&candidates)
    }

    pub fn select_audio(formats: &[FormatDescriptor]) -> Option<&FormatDescriptor> {
        if let Some(preferred) = formats.iter().find(|f| f.id == PREFERRED_AUDIO_FORMAT) {
            return Some(preferred);
        }

        let in_container = || {
            formats
                .iter()
                .filter(|f| f.has_audio && f.matches_type(AUDIO_CONTAINER))
        };

        in_container()
            .find(|f| f.audio_channels.map_or(false, |c| c > 1))
            .or_else(|| in_container().find(|f| f.audio_channels.map_or(false, |c| c > 0)))
    }
}
