// Downloader module - media resolution, download and delivery

pub mod backends;
pub mod cache;
pub mod errors;
pub mod extractors;
pub mod format_selector;
pub mod merge;
pub mod models;
pub mod orchestrator;
pub mod registry;
pub mod retry;
pub mod token;
pub mod tools;
pub mod traits;
pub mod utils;

pub use cache::{DeliveryCache, Variant};
pub use errors::DownloadError;
pub use models::{MediaItem, MediaKind, MediaPayload, MediaSet, NetworkConfig};
pub use orchestrator::DownloadOrchestrator;
pub use registry::ResolverRegistry;
pub use token::{DeferredJob, JobAction};
pub use traits::{MediaMerger, PlatformResolver, VideoSource};
