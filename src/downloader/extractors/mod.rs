// InfoExtractor module - video info extraction through yt-dlp

mod cli;

pub use cli::CliInfoExtractor;

use crate::downloader::models::NetworkConfig;

/// Configuration for info extraction
#[derive(Debug, Clone, Default)]
pub struct ExtractorConfig {
    pub network: NetworkConfig,
    /// Path to cookies.txt file
    pub cookies_path: Option<String>,
    /// YouTube player client (android, web, tv); None tries several
    pub player_client: Option<String>,
}

impl ExtractorConfig {
    pub fn with_network(mut self, network: NetworkConfig) -> Self {
        self.network = network;
        self
    }

    pub fn with_cookies_path(mut self, path: Option<String>) -> Self {
        self.cookies_path = path;
        self
    }

    pub fn with_player_client(mut self, client: Option<String>) -> Self {
        self.player_client = client;
        self
    }
}
