// Platform backends

pub mod generic;
pub mod youtube;

pub use generic::GenericResolver;
pub use youtube::{FetchedMedia, YouTubePreview, YouTubeResolver, YtDlpVideoSource};
