// Generic backend - any platform yt-dlp knows how to read
//
// Returns remote URLs; the chat host pulls the files itself. Posts already
// delivered once come back as host file references without touching yt-dlp.

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::downloader::cache::{DeliveryCache, Variant};
use crate::downloader::errors::DownloadError;
use crate::downloader::extractors::{CliInfoExtractor, ExtractorConfig};
use crate::downloader::models::{MediaItem, MediaKind, MediaPayload, MediaSet, MAX_GROUP_ITEMS};
use crate::downloader::traits::PlatformResolver;

const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "webp", "heic"];

pub struct GenericResolver {
    name: &'static str,
    extractor: CliInfoExtractor,
    cache: DeliveryCache,
}

impl GenericResolver {
    pub fn new(name: &'static str, config: ExtractorConfig, cache: DeliveryCache) -> Self {
        Self::with_extractor(name, CliInfoExtractor::new(config), cache)
    }

    pub fn with_extractor(name: &'static str, extractor: CliInfoExtractor, cache: DeliveryCache) -> Self {
        Self {
            name,
            extractor,
            cache,
        }
    }

    /// Cache identity of a post, derived from its link alone:
    /// scheme, `www.`, query and fragment are dropped.
    pub fn source_key(&self, url: &str) -> String {
        let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
        let rest = rest.split(|c: char| c == '?' || c == '#').next().unwrap_or(rest).trim_end_matches('/');
        let (host, path) = rest.split_once('/').unwrap_or((rest, ""));
        let host = host.to_lowercase();
        let host = host.strip_prefix("www.").unwrap_or(&host);
        format!("{}:{}/{}", self.name, host, path)
    }

    /// Rebuild a previously delivered post from cached file references.
    ///
    /// Lookups mirror how deliveries are recorded: one keyed entry for a
    /// single item, `photo#N`/`video#N` slots for multi-item posts.
    async fn cached_set(&self, key: &str) -> Option<MediaSet> {
        for kind in [MediaKind::Photo, MediaKind::Video] {
            if let Some(hit) = self.cache.get(key, &Variant::for_kind(kind)).await {
                let item = MediaItem::new(kind, MediaPayload::FileRef(hit.file_ref));
                return Some(MediaSet::new(vec![item], hit.caption, key));
            }
        }

        let mut items = Vec::new();
        let mut caption = String::new();
        'slots: for index in 0..MAX_GROUP_ITEMS {
            for kind in [MediaKind::Photo, MediaKind::Video] {
                let variant = Variant::Native(format!("{}#{}", kind.as_str(), index));
                if let Some(hit) = self.cache.get(key, &variant).await {
                    if index == 0 {
                        caption = hit.caption;
                    }
                    items.push(MediaItem::new(kind, MediaPayload::FileRef(hit.file_ref)));
                    continue 'slots;
                }
            }
            break;
        }

        if items.is_empty() {
            None
        } else {
            Some(MediaSet::new(items, caption, key))
        }
    }

    /// Map a yt-dlp post document onto a MediaSet.
    pub fn media_set_from_json(json: &Value) -> MediaSet {
        let entries: Vec<&Value> = match json["entries"].as_array() {
            Some(entries) => entries.iter().collect(),
            None => vec![json],
        };

        let items: Vec<MediaItem> = entries.into_iter().filter_map(Self::item_from_entry).collect();
        if items.is_empty() {
            return MediaSet::empty();
        }

        let author = json["uploader"]
            .as_str()
            .or_else(|| json["channel"].as_str())
            .unwrap_or_default();
        let text = json["description"]
            .as_str()
            .filter(|d| !d.trim().is_empty())
            .or_else(|| json["title"].as_str())
            .unwrap_or_default();
        let caption = if author.is_empty() {
            text.to_string()
        } else {
            format!("<b>{}:</b> {}", author, text)
        };
        let source_id = json["id"].as_str().unwrap_or_default();

        MediaSet::new(items, caption, source_id)
    }

    fn item_from_entry(entry: &Value) -> Option<MediaItem> {
        let width = entry["width"].as_u64().map(|w| w as u32);
        let height = entry["height"].as_u64().map(|h| h as u32);
        let ext = entry["ext"].as_str().unwrap_or_default().to_lowercase();

        // Direct URL is present when yt-dlp settled on a single format
        let url = entry["url"]
            .as_str()
            .map(|s| s.to_string())
            .or_else(|| Self::best_muxed_url(entry))?;

        let item = if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            MediaItem::photo_url(url)
        } else {
            MediaItem::video_url(url)
        };
        Some(item.with_dimensions(width, height))
    }

    /// Last listed format carrying both audio and video; yt-dlp sorts worst to best.
    fn best_muxed_url(entry: &Value) -> Option<String> {
        entry["formats"]
            .as_array()?
            .iter()
            .rev()
            .find(|f| {
                let has = |key: &str| f[key].as_str().map_or(false, |c| c != "none");
                has("vcodec") && has("acodec")
            })
            .and_then(|f| f["url"].as_str())
            .map(|s| s.to_string())
    }
}

#[async_trait]
impl PlatformResolver for GenericResolver {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn resolve(&self, url: &str) -> Result<MediaSet, DownloadError> {
        let key = self.source_key(url);
        if let Some(set) = self.cached_set(&key).await {
            debug!(platform = self.name, url, items = set.len(), "post served from cache");
            return Ok(set);
        }

        let json = self.extractor.dump_post(url).await?;
        let mut set = Self::media_set_from_json(&json);
        // Deliveries are recorded under the link-derived key so the next lookup can find them
        set.meta.source_id = key;
        debug!(platform = self.name, url, items = set.len(), "resolved post");
        Ok(set)
    }
}
