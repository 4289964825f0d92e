use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use media_relay_lib::config::AdmissionLimit;
use media_relay_lib::downloader::backends::{GenericResolver, YouTubeResolver};
use media_relay_lib::downloader::cache::{DeliveryCache, Variant};
use media_relay_lib::downloader::extractors::{CliInfoExtractor, ExtractorConfig};
use media_relay_lib::downloader::models::{
    FormatDescriptor, MediaItem, MediaKind, MediaPayload, MediaSet, VideoMetadata,
};
use media_relay_lib::downloader::registry::{host_pattern, ResolverRegistry};
use media_relay_lib::downloader::retry::RetryPolicy;
use media_relay_lib::downloader::utils::{link_caption, MAX_CAPTION_CHARS};
use media_relay_lib::downloader::{
    DownloadError, DownloadOrchestrator, MediaMerger, PlatformResolver, VideoSource,
};
use media_relay_lib::host::{
    CallbackQuery, Chat, ChatAction, ChatHost, ChatKind, ChatMessage, ChatSettings,
    DeliveredMedia, EnglishStrings, HostError, InlineButton, Localizer, MemorySettings, Upload,
};

const USER: i64 = 42;
const CHAT: i64 = 7;

#[derive(Debug, Clone)]
enum Call {
    Message { text: String, keyboard: Vec<InlineButton> },
    Edit { message_id: i32, text: String },
    Delete { message_id: i32 },
    Group(Vec<MediaItem>),
    Audio(Upload),
    Video(Upload),
    Answer { text: Option<String>, alert: bool },
    Action(ChatAction),
}

#[derive(Default)]
struct RecordingHost {
    calls: Mutex<Vec<Call>>,
    next_id: Mutex<i32>,
    /// Audio/video sends of cached file references to reject
    reject_file_refs: Mutex<usize>,
    /// Audio/video sends of fresh bytes to reject
    reject_uploads: Mutex<usize>,
}

impl RecordingHost {
    /// Consume a scripted rejection matching `payload`, if any is left.
    fn check_upload(&self, payload: &MediaPayload) -> Result<(), HostError> {
        let counter = match payload {
            MediaPayload::FileRef(_) => &self.reject_file_refs,
            _ => &self.reject_uploads,
        };
        let mut left = counter.lock();
        if *left > 0 {
            *left -= 1;
            return Err(HostError::Rejected("upload refused".into()));
        }
        Ok(())
    }

    fn videos(&self) -> Vec<Upload> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Video(upload) => Some(upload),
                _ => None,
            })
            .collect()
    }

    fn edits(&self, message_id: i32) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Edit { message_id: id, text } if id == message_id => Some(text),
                _ => None,
            })
            .collect()
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    fn next_id(&self) -> i32 {
        let mut id = self.next_id.lock();
        *id += 1;
        1000 + *id
    }

    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }

    fn groups(&self) -> Vec<Vec<MediaItem>> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Group(items) => Some(items),
                _ => None,
            })
            .collect()
    }

    fn keyboards(&self) -> Vec<Vec<InlineButton>> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Message { keyboard, .. } if !keyboard.is_empty() => Some(keyboard),
                _ => None,
            })
            .collect()
    }

    fn answers(&self) -> Vec<(Option<String>, bool)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Answer { text, alert } => Some((text, alert)),
                _ => None,
            })
            .collect()
    }

    fn messages(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Message { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl ChatHost for RecordingHost {
    async fn send_message(
        &self,
        _chat_id: i64,
        text: &str,
        _reply_to: Option<i32>,
        keyboard: &[InlineButton],
    ) -> Result<i32, HostError> {
        self.record(Call::Message {
            text: text.to_string(),
            keyboard: keyboard.to_vec(),
        });
        Ok(self.next_id())
    }

    async fn edit_message(&self, _chat_id: i64, message_id: i32, text: &str) -> Result<(), HostError> {
        self.record(Call::Edit {
            message_id,
            text: text.to_string(),
        });
        Ok(())
    }

    async fn delete_message(&self, _chat_id: i64, message_id: i32) -> Result<(), HostError> {
        self.record(Call::Delete { message_id });
        Ok(())
    }

    async fn send_media_group(
        &self,
        _chat_id: i64,
        items: &[MediaItem],
        _reply_to: Option<i32>,
    ) -> Result<Vec<DeliveredMedia>, HostError> {
        self.record(Call::Group(items.to_vec()));
        Ok(items
            .iter()
            .map(|item| {
                let message_id = self.next_id();
                DeliveredMedia {
                    message_id,
                    kind: item.kind,
                    file_ref: Some(format!("file-{}", message_id)),
                }
            })
            .collect())
    }

    async fn send_audio(&self, _chat_id: i64, upload: Upload) -> Result<DeliveredMedia, HostError> {
        let checked = self.check_upload(&upload.payload);
        self.record(Call::Audio(upload));
        checked?;
        let message_id = self.next_id();
        Ok(DeliveredMedia {
            message_id,
            kind: MediaKind::Audio,
            file_ref: Some(format!("audio-file-{}", message_id)),
        })
    }

    async fn send_video(&self, _chat_id: i64, upload: Upload) -> Result<DeliveredMedia, HostError> {
        let checked = self.check_upload(&upload.payload);
        self.record(Call::Video(upload));
        checked?;
        let message_id = self.next_id();
        Ok(DeliveredMedia {
            message_id,
            kind: MediaKind::Video,
            file_ref: Some(format!("video-file-{}", message_id)),
        })
    }

    async fn answer_callback(
        &self,
        _callback_id: &str,
        text: Option<&str>,
        show_alert: bool,
    ) -> Result<(), HostError> {
        self.record(Call::Answer {
            text: text.map(|t| t.to_string()),
            alert: show_alert,
        });
        Ok(())
    }

    async fn send_chat_action(&self, _chat_id: i64, action: ChatAction) -> Result<(), HostError> {
        self.record(Call::Action(action));
        Ok(())
    }
}

fn format(id: &str, mime: &str, label: &str, bitrate: u64, size: u64, video: bool) -> FormatDescriptor {
    FormatDescriptor {
        id: id.to_string(),
        bitrate,
        quality_label: label.to_string(),
        content_length: size,
        width: video.then_some(1280),
        height: video.then_some(720),
        mime_type: mime.to_string(),
        audio_channels: (!video).then_some(2),
        has_video: video,
        has_audio: !video,
        url: Some(format!("https://streams.example/{}", id)),
    }
}

/// Video source with per-format failure scripts and call counters.
#[derive(Default)]
struct ScriptedSource {
    metadata_calls: Mutex<usize>,
    metadata_failures: Mutex<usize>,
    stream_calls: Mutex<HashMap<String, usize>>,
    stream_failures: Mutex<HashMap<String, usize>>,
}

impl ScriptedSource {
    fn metadata_calls(&self) -> usize {
        *self.metadata_calls.lock()
    }

    fn stream_calls(&self, format_id: &str) -> usize {
        self.stream_calls.lock().get(format_id).copied().unwrap_or(0)
    }

    fn total_stream_calls(&self) -> usize {
        self.stream_calls.lock().values().sum()
    }

    fn fail_metadata(&self, times: usize) {
        *self.metadata_failures.lock() = times;
    }

    fn fail_stream(&self, format_id: &str, times: usize) {
        self.stream_failures.lock().insert(format_id.to_string(), times);
    }
}

#[async_trait]
impl VideoSource for ScriptedSource {
    async fn fetch_metadata(&self, _url_or_id: &str) -> Result<VideoMetadata, DownloadError> {
        *self.metadata_calls.lock() += 1;
        {
            let mut failures = self.metadata_failures.lock();
            if *failures > 0 {
                *failures -= 1;
                return Err(DownloadError::NetworkTimeout);
            }
        }
        Ok(VideoMetadata {
            id: "abc".to_string(),
            title: "Title".to_string(),
            author: "Author".to_string(),
            duration_seconds: 245,
            thumbnails: Vec::new(),
            formats: vec![
                format("140", "audio/mp4", "", 128_000, 3 * 1024 * 1024, false),
                format("160", "video/mp4", "144p", 100_000, 1024 * 1024, true),
                format("136", "video/mp4", "720p", 2_000_000, 20 * 1024 * 1024, true),
                format("313", "video/mp4", "2160p", 5_000_000, 90 * 1024 * 1024, true),
            ],
        })
    }

    async fn fetch_stream(
        &self,
        _video: &VideoMetadata,
        format: &FormatDescriptor,
    ) -> Result<Vec<u8>, DownloadError> {
        *self.stream_calls.lock().entry(format.id.clone()).or_insert(0) += 1;
        let mut failures = self.stream_failures.lock();
        if let Some(left) = failures.get_mut(&format.id) {
            if *left > 0 {
                *left -= 1;
                return Err(DownloadError::NetworkError("connection reset".into()));
            }
        }
        Ok(format!("bytes-{}", format.id).into_bytes())
    }
}

struct JoinMerger;

struct BrokenMerger;

#[async_trait]
impl MediaMerger for BrokenMerger {
    async fn merge(&self, _video: Vec<u8>, _audio: Vec<u8>) -> Result<Vec<u8>, DownloadError> {
        Err(DownloadError::MergeFailed("ffmpeg exited with status 1".into()))
    }
}

#[async_trait]
impl MediaMerger for JoinMerger {
    async fn merge(&self, mut video: Vec<u8>, audio: Vec<u8>) -> Result<Vec<u8>, DownloadError> {
        video.extend(audio);
        Ok(video)
    }
}

/// Resolver returning a fixed set and counting calls.
struct StaticResolver {
    set: MediaSet,
    calls: Mutex<usize>,
}

impl StaticResolver {
    fn new(set: MediaSet) -> Arc<Self> {
        Arc::new(Self {
            set,
            calls: Mutex::new(0),
        })
    }

    fn calls(&self) -> usize {
        *self.calls.lock()
    }
}

#[async_trait]
impl PlatformResolver for StaticResolver {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn resolve(&self, _url: &str) -> Result<MediaSet, DownloadError> {
        *self.calls.lock() += 1;
        Ok(self.set.clone())
    }
}

fn binding(
    hosts: &'static str,
    resolver: Arc<StaticResolver>,
    force_delivery: bool,
) -> (&'static str, Arc<dyn PlatformResolver>, bool) {
    (hosts, resolver, force_delivery)
}

struct Harness {
    host: Arc<RecordingHost>,
    source: Arc<ScriptedSource>,
    settings: Arc<MemorySettings>,
    cache: DeliveryCache,
    orchestrator: DownloadOrchestrator,
}

fn harness(resolvers: Vec<(&'static str, Arc<dyn PlatformResolver>, bool)>, limit: AdmissionLimit) -> Harness {
    harness_with(DeliveryCache::in_memory(), Arc::new(JoinMerger), resolvers, limit)
}

fn harness_with(
    cache: DeliveryCache,
    merger: Arc<dyn MediaMerger>,
    resolvers: Vec<(&'static str, Arc<dyn PlatformResolver>, bool)>,
    limit: AdmissionLimit,
) -> Harness {
    let host = Arc::new(RecordingHost::default());
    let source = Arc::new(ScriptedSource::default());
    let settings = Arc::new(MemorySettings::new(true, true));

    let quick = |n| RetryPolicy::new(n, Duration::ZERO);
    let youtube = Arc::new(
        YouTubeResolver::new(source.clone(), merger, cache.clone(), "Relay")
            .with_policies(quick(10), quick(5), quick(5)),
    );

    let mut registry = ResolverRegistry::new();
    for (hosts, resolver, force) in resolvers {
        registry.bind(host_pattern(hosts).unwrap(), resolver, force);
    }

    let orchestrator = DownloadOrchestrator::new(
        registry,
        youtube,
        cache.clone(),
        host.clone(),
        settings.clone(),
        Arc::new(EnglishStrings),
        limit,
    );

    Harness {
        host,
        source,
        settings,
        cache,
        orchestrator,
    }
}

fn message(text: &str, kind: ChatKind) -> ChatMessage {
    ChatMessage {
        chat: Chat { id: CHAT, kind },
        message_id: 10,
        from_user_id: USER,
        text: text.to_string(),
        reply_to_text: None,
        link_preview_enabled: true,
        language: "en".to_string(),
    }
}

fn press(data: &str, user: i64) -> CallbackQuery {
    CallbackQuery {
        id: "cb".to_string(),
        from_user_id: user,
        chat_id: CHAT,
        message_id: 500,
        data: data.to_string(),
        language: "en".to_string(),
    }
}

fn text(key: &str) -> String {
    EnglishStrings.text("en", key, &[])
}

fn photos(n: usize, caption: &str) -> MediaSet {
    let items = (0..n)
        .map(|i| MediaItem::photo_url(format!("https://cdn.example/{}.jpg", i)))
        .collect();
    MediaSet::new(items, caption, "post-1")
}

/// Run Stage A and return the (audio, video) tokens.
async fn preview(h: &Harness) -> (String, String) {
    h.orchestrator
        .handle_message(&message(
            "/ytdl https://video-platform.example/watch?id=abc",
            ChatKind::Private,
        ))
        .await;
    let keyboards = h.host.keyboards();
    assert_eq!(keyboards.len(), 1);
    let keyboard = &keyboards[0];
    (keyboard[0].callback_data.clone(), keyboard[1].callback_data.clone())
}

#[tokio::test]
async fn youtube_audio_download_end_to_end() {
    let h = harness(Vec::new(), AdmissionLimit::HOSTED);
    let (audio, video) = preview(&h).await;

    let audio_job: media_relay_lib::downloader::DeferredJob = audio.parse().unwrap();
    let video_job: media_relay_lib::downloader::DeferredJob = video.parse().unwrap();
    assert_ne!(audio_job.format_id, video_job.format_id);
    assert_eq!(audio_job.format_id, "140");
    assert_eq!(video_job.format_id, "136");
    assert_eq!(audio_job.expected_size_bytes, 3 * 1024 * 1024);
    assert_eq!(video_job.expected_size_bytes, 23 * 1024 * 1024);
    assert_eq!(audio_job.requester_user_id, USER);
    assert_eq!(audio_job.origin_message_id, 10);

    let info = &h.host.messages()[0];
    assert!(info.contains("3.00"));
    assert!(info.contains("23.00"));
    assert!(info.contains("4m5s"));

    h.source.fail_stream("140", 2);
    h.orchestrator.handle_callback(&press(&audio, USER)).await;

    assert_eq!(h.source.stream_calls("140"), 3);
    assert_eq!(h.source.total_stream_calls(), 3);

    let calls = h.host.calls();
    let upload = calls
        .iter()
        .find_map(|c| match c {
            Call::Audio(upload) => Some(upload.clone()),
            _ => None,
        })
        .expect("audio upload");
    assert_eq!(upload.caption, "<b>Author:</b> Title");
    assert_eq!(upload.title.as_deref(), Some("Title"));
    assert_eq!(upload.performer.as_deref(), Some("Author"));
    assert_eq!(upload.reply_to, Some(10));
    assert!(matches!(
        &upload.payload,
        MediaPayload::Bytes { data, filename } if data == b"bytes-140" && filename == "Relay-Author_Title.m4a"
    ));

    let edits: Vec<String> = calls
        .iter()
        .filter_map(|c| match c {
            Call::Edit { message_id: 500, text } => Some(text.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(edits, vec![text("downloading"), text("uploading")]);
    assert!(calls.iter().any(|c| matches!(c, Call::Delete { message_id: 500 })));
    assert!(calls.iter().any(|c| matches!(c, Call::Action(ChatAction::UploadVoice))));

    let cached = h.cache.get("abc", &Variant::Audio).await.expect("cache entry");
    assert!(cached.file_ref.starts_with("audio-file-"));
    assert_eq!(cached.caption, "<b>Author:</b> Title");
}

#[tokio::test]
async fn youtube_video_merges_and_second_press_uses_cache() {
    let h = harness(Vec::new(), AdmissionLimit::HOSTED);
    let (_, video) = preview(&h).await;

    h.orchestrator.handle_callback(&press(&video, USER)).await;
    assert_eq!(h.source.stream_calls("136"), 1);
    assert_eq!(h.source.stream_calls("140"), 1);

    let upload = h
        .host
        .calls()
        .into_iter()
        .find_map(|c| match c {
            Call::Video(upload) => Some(upload),
            _ => None,
        })
        .expect("video upload");
    assert_eq!(upload.height, Some(720));
    assert!(matches!(&upload.payload, MediaPayload::Bytes { data, .. } if data == b"bytes-136bytes-140"));

    let metadata_before = h.source.metadata_calls();
    h.orchestrator.handle_callback(&press(&video, USER)).await;
    assert_eq!(h.source.metadata_calls(), metadata_before);
    assert_eq!(h.source.total_stream_calls(), 2);

    let last_video = h
        .host
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            Call::Video(upload) => Some(upload),
            _ => None,
        })
        .last()
        .unwrap();
    assert!(matches!(last_video.payload, MediaPayload::FileRef(ref f) if f.starts_with("video-file-")));
}

#[tokio::test]
async fn oversized_job_never_fetches() {
    let h = harness(Vec::new(), AdmissionLimit::new(10 * 1024 * 1024));
    let (_, video) = preview(&h).await;
    h.cache.set("abc", &Variant::Video, "video-file-old", "").await;
    let metadata_before = h.source.metadata_calls();

    h.orchestrator.handle_callback(&press(&video, USER)).await;

    assert_eq!(h.source.metadata_calls(), metadata_before);
    assert_eq!(h.source.total_stream_calls(), 0);
    let expected = EnglishStrings.text("en", "video-exceeds-limit", &[("size", (10 * 1024 * 1024).to_string())]);
    assert_eq!(h.host.answers(), vec![(Some(expected), true)]);
    assert!(!h.host.calls().iter().any(|c| matches!(c, Call::Video(_) | Call::Edit { .. })));
}

#[tokio::test]
async fn other_user_cannot_trigger_download() {
    let h = harness(Vec::new(), AdmissionLimit::new(1));
    let (audio, _) = preview(&h).await;
    let metadata_before = h.source.metadata_calls();

    h.orchestrator.handle_callback(&press(&audio, USER + 1)).await;

    assert_eq!(h.source.metadata_calls(), metadata_before);
    assert_eq!(h.source.total_stream_calls(), 0);
    // Denied before admission control runs, even though the job is too large
    assert_eq!(h.host.answers(), vec![(Some(text("denied-button-alert")), true)]);
}

#[tokio::test]
async fn malformed_token_is_rejected() {
    let h = harness(Vec::new(), AdmissionLimit::HOSTED);
    h.orchestrator
        .handle_callback(&press("_yt1|aud|abc|140|1|42", USER))
        .await;

    assert_eq!(h.source.metadata_calls(), 0);
    assert_eq!(h.host.answers(), vec![(Some(text("youtube-error")), true)]);
}

#[tokio::test]
async fn ytdl_without_url_or_reply() {
    let h = harness(Vec::new(), AdmissionLimit::HOSTED);
    h.orchestrator.handle_message(&message("/ytdl", ChatKind::Private)).await;
    assert_eq!(h.host.messages(), vec![text("youtube-no-url")]);

    let mut reply = message("/ytdl", ChatKind::Group);
    reply.reply_to_text = Some("https://www.youtube.com/watch?v=abc".to_string());
    h.orchestrator.handle_message(&reply).await;
    assert_eq!(h.host.keyboards().len(), 1);
}

#[tokio::test]
async fn group_is_truncated_to_ten_in_order() {
    let resolver = StaticResolver::new(photos(13, "<b>user:</b> hi"));
    let h = harness(vec![binding(r"pics\.example", resolver.clone(), false)], AdmissionLimit::HOSTED);

    h.orchestrator
        .handle_message(&message("look https://pics.example/p/1", ChatKind::Private))
        .await;

    let groups = h.host.groups();
    assert_eq!(groups.len(), 1);
    let items = &groups[0];
    assert_eq!(items.len(), 10);
    assert_eq!(items[0].payload, MediaPayload::Url("https://cdn.example/0.jpg".into()));
    assert_eq!(items[9].payload, MediaPayload::Url("https://cdn.example/9.jpg".into()));
    assert_eq!(items[0].caption.as_deref(), Some("<b>user:</b> hi"));
    assert!(items[1].caption.is_none());
    assert!(h.host.calls().iter().any(|c| matches!(c, Call::Action(ChatAction::UploadDocument))));

    let slot = h.cache.get("post-1", &Variant::Native("photo#3".into())).await;
    assert!(slot.is_some());
}

#[tokio::test]
async fn single_photo_left_to_link_preview_unless_forced() {
    let plain = StaticResolver::new(photos(1, "c"));
    let forced = StaticResolver::new(photos(1, "c"));
    let h = harness(
        vec![
            binding(r"pics\.example", plain.clone(), false),
            binding(r"forced\.example", forced.clone(), true),
        ],
        AdmissionLimit::HOSTED,
    );

    h.orchestrator
        .handle_message(&message("https://pics.example/p/1", ChatKind::Private))
        .await;
    assert_eq!(plain.calls(), 1);
    assert!(h.host.groups().is_empty());

    let mut no_preview = message("https://pics.example/p/1", ChatKind::Private);
    no_preview.link_preview_enabled = false;
    h.orchestrator.handle_message(&no_preview).await;
    assert_eq!(h.host.groups().len(), 1);

    h.orchestrator
        .handle_message(&message("https://forced.example/p/1", ChatKind::Private))
        .await;
    assert_eq!(h.host.groups().len(), 2);
    assert!(h.cache.get("post-1", &Variant::Image).await.is_some());
}

#[tokio::test]
async fn long_caption_is_capped_with_link_back() {
    let long = "x".repeat(MAX_CAPTION_CHARS * 2);
    let resolver = StaticResolver::new(photos(2, &long));
    let h = harness(vec![binding(r"pics\.example", resolver, false)], AdmissionLimit::HOSTED);
    let url = "https://pics.example/p/1";

    h.orchestrator.handle_message(&message(url, ChatKind::Private)).await;

    let caption = h.host.groups()[0][0].caption.clone().unwrap();
    assert!(caption.chars().count() <= MAX_CAPTION_CHARS);
    assert!(caption.ends_with(&link_caption(url)));
}

#[tokio::test]
async fn hidden_captions_become_link() {
    let resolver = StaticResolver::new(photos(2, "<b>user:</b> hi"));
    let h = harness(vec![binding(r"pics\.example", resolver, false)], AdmissionLimit::HOSTED);
    h.settings.set_show_caption(CHAT, false).await;
    let url = "https://pics.example/p/1";

    h.orchestrator.handle_message(&message(url, ChatKind::Group)).await;

    assert_eq!(h.host.groups()[0][0].caption, Some(link_caption(url)));
}

#[tokio::test]
async fn group_gate_and_explicit_command() {
    let resolver = StaticResolver::new(photos(2, "c"));
    let h = harness(vec![binding(r"pics\.example", resolver.clone(), false)], AdmissionLimit::HOSTED);
    h.settings.set_auto_resolve_media(CHAT, false).await;

    h.orchestrator
        .handle_message(&message("https://pics.example/p/1", ChatKind::Group))
        .await;
    assert_eq!(resolver.calls(), 0);

    h.orchestrator
        .handle_message(&message("/dl https://pics.example/p/1", ChatKind::Group))
        .await;
    assert_eq!(resolver.calls(), 1);
    assert_eq!(h.host.groups().len(), 1);

    // Private chats ignore the flag
    h.settings.set_auto_resolve_media(CHAT, false).await;
    h.orchestrator
        .handle_message(&message("https://pics.example/p/1", ChatKind::Private))
        .await;
    assert_eq!(resolver.calls(), 2);
}

#[tokio::test]
async fn missing_link_reported_only_for_commands() {
    let h = harness(Vec::new(), AdmissionLimit::HOSTED);

    h.orchestrator
        .handle_message(&message("just chatting", ChatKind::Private))
        .await;
    assert!(h.host.calls().is_empty());

    h.orchestrator
        .handle_message(&message("/sdl nothing here", ChatKind::Private))
        .await;
    assert_eq!(h.host.messages(), vec![text("no-link-provided")]);
}

#[tokio::test]
async fn empty_result_is_silent() {
    let resolver = StaticResolver::new(MediaSet::empty());
    let h = harness(vec![binding(r"pics\.example", resolver.clone(), false)], AdmissionLimit::HOSTED);

    h.orchestrator
        .handle_message(&message("/dl https://pics.example/p/1", ChatKind::Private))
        .await;

    assert_eq!(resolver.calls(), 1);
    assert!(h.host.calls().is_empty());
}

/// Stage B ended in the error status without delivering or caching anything.
async fn assert_failed_cleanly(h: &Harness) {
    assert_eq!(h.host.edits(500).last(), Some(&text("youtube-error")));
    assert!(!h.host.calls().iter().any(|c| matches!(c, Call::Delete { message_id: 500 })));
    assert!(h.cache.get("abc", &Variant::Video).await.is_none());
}

#[tokio::test]
async fn stream_failures_exhaust_retries() {
    let h = harness(Vec::new(), AdmissionLimit::HOSTED);
    let (_, video) = preview(&h).await;
    h.source.fail_stream("136", 5);

    h.orchestrator.handle_callback(&press(&video, USER)).await;

    assert_eq!(h.source.stream_calls("136"), 5);
    assert_eq!(h.source.stream_calls("140"), 0);
    assert!(h.host.videos().is_empty());
    assert_eq!(h.host.edits(500), vec![text("downloading"), text("youtube-error")]);
    assert_failed_cleanly(&h).await;
}

#[tokio::test]
async fn merge_failure_reports_error() {
    let h = harness_with(
        DeliveryCache::in_memory(),
        Arc::new(BrokenMerger),
        Vec::new(),
        AdmissionLimit::HOSTED,
    );
    let (_, video) = preview(&h).await;

    h.orchestrator.handle_callback(&press(&video, USER)).await;

    assert_eq!(h.source.stream_calls("136"), 1);
    assert_eq!(h.source.stream_calls("140"), 1);
    assert!(h.host.videos().is_empty());
    assert_failed_cleanly(&h).await;
}

#[tokio::test]
async fn metadata_failure_reports_error() {
    let h = harness(Vec::new(), AdmissionLimit::HOSTED);
    let (_, video) = preview(&h).await;
    let metadata_before = h.source.metadata_calls();
    h.source.fail_metadata(100);

    h.orchestrator.handle_callback(&press(&video, USER)).await;

    assert_eq!(h.source.metadata_calls(), metadata_before + 5);
    assert_eq!(h.source.total_stream_calls(), 0);
    assert!(h.host.videos().is_empty());
    assert_failed_cleanly(&h).await;
}

#[tokio::test]
async fn upload_failure_reports_error() {
    let h = harness(Vec::new(), AdmissionLimit::HOSTED);
    let (_, video) = preview(&h).await;
    *h.host.reject_uploads.lock() = 1;

    h.orchestrator.handle_callback(&press(&video, USER)).await;

    assert_eq!(h.host.videos().len(), 1);
    assert_eq!(
        h.host.edits(500),
        vec![text("downloading"), text("uploading"), text("youtube-error")]
    );
    assert_failed_cleanly(&h).await;
}

#[tokio::test]
async fn stale_cached_reference_falls_back_to_download() {
    let h = harness(Vec::new(), AdmissionLimit::HOSTED);
    let (_, video) = preview(&h).await;
    h.cache
        .set("abc", &Variant::Video, "video-file-stale", "<b>Author:</b> Title")
        .await;
    *h.host.reject_file_refs.lock() = 1;
    let metadata_before = h.source.metadata_calls();

    h.orchestrator.handle_callback(&press(&video, USER)).await;

    assert_eq!(h.source.metadata_calls(), metadata_before + 1);
    assert_eq!(h.source.stream_calls("136"), 1);
    let videos = h.host.videos();
    assert_eq!(videos.len(), 2);
    assert_eq!(videos[0].payload, MediaPayload::FileRef("video-file-stale".into()));
    assert!(matches!(videos[1].payload, MediaPayload::Bytes { .. }));

    let cached = h.cache.get("abc", &Variant::Video).await.expect("cache entry");
    assert_ne!(cached.file_ref, "video-file-stale");
    assert!(cached.file_ref.starts_with("video-file-"));
}

/// Stand-in yt-dlp: logs each run next to itself and prints a two-item post.
#[cfg(unix)]
const FAKE_YTDLP: &str = r#"#!/bin/sh
echo run >> "$(dirname "$0")/runs"
cat <<'JSON'
{"id": "p1", "uploader": "user", "title": "hi", "entries": [
  {"ext": "jpg", "url": "https://cdn.example/1.jpg"},
  {"ext": "mp4", "url": "https://cdn.example/2.mp4"}
]}
JSON
"#;

#[cfg(unix)]
#[tokio::test]
async fn repeated_post_link_skips_extraction() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("yt-dlp");
    std::fs::write(&script, FAKE_YTDLP).unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

    let cache = DeliveryCache::in_memory();
    let resolver: Arc<dyn PlatformResolver> = Arc::new(GenericResolver::with_extractor(
        "pics",
        CliInfoExtractor::with_path(script.to_string_lossy(), ExtractorConfig::default()),
        cache.clone(),
    ));
    let h = harness_with(
        cache,
        Arc::new(JoinMerger),
        vec![(r"pics\.example", resolver, false)],
        AdmissionLimit::HOSTED,
    );

    h.orchestrator
        .handle_message(&message("https://pics.example/p/1", ChatKind::Private))
        .await;
    h.orchestrator
        .handle_message(&message(
            "again https://www.pics.example/p/1?utm_source=share",
            ChatKind::Private,
        ))
        .await;

    let runs = std::fs::read_to_string(dir.path().join("runs")).unwrap();
    assert_eq!(runs.lines().count(), 1);

    let groups = h.host.groups();
    assert_eq!(groups.len(), 2);
    assert_eq!(groups[0][0].payload, MediaPayload::Url("https://cdn.example/1.jpg".into()));
    let replay = &groups[1];
    assert_eq!(
        replay.iter().map(|item| item.kind).collect::<Vec<_>>(),
        vec![MediaKind::Photo, MediaKind::Video]
    );
    assert!(replay
        .iter()
        .all(|item| matches!(&item.payload, MediaPayload::FileRef(f) if f.starts_with("file-"))));
    assert_eq!(replay[0].caption.as_deref(), Some("<b>user:</b> hi"));
}
