pub mod config;
pub mod downloader;
pub mod host;
pub mod logging;

use std::sync::Arc;

use tracing::info;

use config::AppConfig;
use downloader::backends::{YouTubeResolver, YtDlpVideoSource};
use downloader::cache::{DeliveryCache, JsonFileStore};
use downloader::extractors::ExtractorConfig;
use downloader::merge::FfmpegMerger;
use downloader::registry::ResolverRegistry;
use downloader::tools::ToolManager;
use downloader::utils::build_http_client;
use downloader::{DownloadError, DownloadOrchestrator};
use host::{ChatHost, EnglishStrings, MemorySettings};

/// Wire the production pipeline: yt-dlp resolvers, ffmpeg merge, JSON file cache.
pub fn build_orchestrator(
    config: &AppConfig,
    host: Arc<dyn ChatHost>,
) -> Result<DownloadOrchestrator, DownloadError> {
    ToolManager::new().log_status();

    let network = config.network_config();
    let extractor_config = ExtractorConfig::default().with_network(network.clone());

    let cache_file = config.cache_file();
    info!(path = %cache_file.display(), "using delivery cache");
    let cache = DeliveryCache::new(Arc::new(JsonFileStore::new(cache_file)));

    let youtube = Arc::new(YouTubeResolver::new(
        Arc::new(YtDlpVideoSource::new(extractor_config.clone())?),
        Arc::new(FfmpegMerger::new()),
        cache.clone(),
        config.bot_name.clone(),
    ));
    let registry = ResolverRegistry::with_default_bindings(&extractor_config, &cache, youtube.clone());

    let settings = Arc::new(MemorySettings::new(
        config.defaults.auto_resolve_media,
        config.defaults.show_caption,
    ));
    let admission = config.admission_limit();
    info!(limit_bytes = admission.bytes(), "upload limit");

    Ok(DownloadOrchestrator::new(
        registry,
        youtube,
        cache,
        host,
        settings,
        Arc::new(EnglishStrings),
        admission,
    )
    .with_thumbnail_client(build_http_client(&network)?))
}
