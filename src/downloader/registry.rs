// Resolver registry - ordered (pattern, resolver) bindings, first match wins

use std::fmt;
use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;

use super::backends::GenericResolver;
use super::cache::DeliveryCache;
use super::extractors::ExtractorConfig;
use super::traits::PlatformResolver;

/// URL pattern for links on any of `hosts` (a regex alternation fragment).
pub fn host_pattern(hosts: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!(r"(?i)(?:https?://)?\b(?:[\w-]+\.)*(?:{})/\S*", hosts))
}

struct DefaultBinding {
    name: &'static str,
    pattern: Regex,
    force_delivery: bool,
}

lazy_static! {
    // Platforms whose link previews carry no media get force_delivery
    static ref DEFAULT_BINDINGS: Vec<DefaultBinding> = [
        ("bluesky", r"bsky\.app", false),
        ("instagram", r"instagram\.com", false),
        ("reddit", r"reddit\.com", true),
        ("threads", r"threads\.net", false),
        ("tiktok", r"tiktok\.com", true),
        ("twitter", r"(?:twitter|x)\.com", false),
        ("xiaohongshu", r"(?:xiaohongshu|xhslink)\.com", false),
    ]
    .into_iter()
    .map(|(name, hosts, force_delivery)| DefaultBinding {
        name,
        pattern: host_pattern(hosts).unwrap(),
        force_delivery,
    })
    .collect();

    static ref SHORTS_PATTERN: Regex = host_pattern(r"youtube\.com/shorts").unwrap();
}

struct Binding {
    pattern: Regex,
    resolver: Arc<dyn PlatformResolver>,
    force_delivery: bool,
}

/// A link found in message text together with the resolver that serves it.
#[derive(Clone)]
pub struct ResolverMatch {
    pub url: String,
    pub resolver: Arc<dyn PlatformResolver>,
    pub force_delivery: bool,
}

impl fmt::Debug for ResolverMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolverMatch")
            .field("url", &self.url)
            .field("resolver", &self.resolver.name())
            .field("force_delivery", &self.force_delivery)
            .finish()
    }
}

#[derive(Default)]
pub struct ResolverRegistry {
    bindings: Vec<Binding>,
}

impl ResolverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Standard platform set: yt-dlp for social platforms, `youtube` for Shorts.
    pub fn with_default_bindings(
        config: &ExtractorConfig,
        cache: &DeliveryCache,
        youtube: Arc<dyn PlatformResolver>,
    ) -> Self {
        let mut registry = Self::new();
        for binding in DEFAULT_BINDINGS.iter() {
            registry.bind(
                binding.pattern.clone(),
                Arc::new(GenericResolver::new(binding.name, config.clone(), cache.clone())),
                binding.force_delivery,
            );
        }
        registry.bind(SHORTS_PATTERN.clone(), youtube, false);
        registry
    }

    pub fn bind(
        &mut self,
        pattern: Regex,
        resolver: Arc<dyn PlatformResolver>,
        force_delivery: bool,
    ) -> &mut Self {
        self.bindings.push(Binding {
            pattern,
            resolver,
            force_delivery,
        });
        self
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// First binding whose pattern occurs in `text`.
    pub fn match_text(&self, text: &str) -> Option<ResolverMatch> {
        self.bindings.iter().find_map(|binding| {
            binding.pattern.find(text).map(|m| ResolverMatch {
                url: m.as_str().to_string(),
                resolver: binding.resolver.clone(),
                force_delivery: binding.force_delivery,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::downloader::errors::DownloadError;
    use crate::downloader::models::MediaSet;
    use async_trait::async_trait;

    struct Named(&'static str);

    #[async_trait]
    impl PlatformResolver for Named {
        fn name(&self) -> &'static str {
            self.0
        }

        async fn resolve(&self, _url: &str) -> Result<MediaSet, DownloadError> {
            Ok(MediaSet::empty())
        }
    }

    fn defaults() -> ResolverRegistry {
        ResolverRegistry::with_default_bindings(
            &ExtractorConfig::default(),
            &DeliveryCache::in_memory(),
            Arc::new(Named("youtube")),
        )
    }

    #[test]
    fn test_default_bindings_dispatch() {
        let registry = defaults();
        assert_eq!(registry.len(), 8);

        let m = registry
            .match_text("look https://vm.tiktok.com/ZMabc/ lol")
            .unwrap();
        assert_eq!(m.resolver.name(), "tiktok");
        assert_eq!(m.url, "https://vm.tiktok.com/ZMabc/");
        assert!(m.force_delivery);

        let m = registry.match_text("https://x.com/user/status/1").unwrap();
        assert_eq!(m.resolver.name(), "twitter");
        assert!(!m.force_delivery);

        let m = registry.match_text("youtube.com/shorts/abcdefghijk").unwrap();
        assert_eq!(m.resolver.name(), "youtube");
    }

    #[test]
    fn test_no_match_for_unsupported_links() {
        let registry = defaults();
        assert!(registry.match_text("https://netflix.com/title/1").is_none());
        assert!(registry.match_text("https://www.youtube.com/watch?v=abc").is_none());
        assert!(registry.match_text("no links here").is_none());
    }

    #[test]
    fn test_first_binding_wins() {
        let mut registry = ResolverRegistry::new();
        registry
            .bind(host_pattern(r"example\.com").unwrap(), Arc::new(Named("first")), false)
            .bind(host_pattern(r"example\.com").unwrap(), Arc::new(Named("second")), true);

        let m = registry.match_text("https://example.com/a").unwrap();
        assert_eq!(m.resolver.name(), "first");
        assert!(!m.force_delivery);
    }
}
