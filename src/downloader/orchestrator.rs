// Orchestrator - turns chat events into delivered media
//
// Message path: gate -> registry -> resolver -> policy -> group delivery -> cache.
// Callback path (YouTube Stage B): authorize -> admit -> cache -> fetch -> upload -> cache.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::backends::youtube::{FetchedMedia, YouTubePreview, YouTubeResolver};
use super::cache::{DeliveryCache, Variant};
use super::models::{MediaKind, MediaPayload, MediaSet};
use super::registry::ResolverRegistry;
use super::token::{DeferredJob, JobAction, TokenError};
use super::utils::{fetch_bytes, link_caption, truncate_caption, MAX_CAPTION_CHARS};
use crate::config::AdmissionLimit;
use crate::host::{
    CallbackQuery, ChatAction, ChatEvent, ChatHost, ChatKind, ChatMessage, ChatSettings,
    DeliveredMedia, HostError, InlineButton, Localizer, Upload,
};

/// Commands the orchestrator reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    /// `/dl` or `/sdl`: resolve regardless of chat settings
    Download,
    /// `/ytdl`: YouTube preview
    YouTube,
    Other,
}

/// Split a leading `/command[@bot]` off `text`.
fn parse_command(text: &str) -> Option<(Command, &str)> {
    let text = text.trim_start();
    let rest = text.strip_prefix('/')?;
    let (word, args) = match rest.find(char::is_whitespace) {
        Some(pos) => (&rest[..pos], rest[pos..].trim_start()),
        None => (rest, ""),
    };
    let name = word.split('@').next().unwrap_or(word).to_lowercase();
    let command = match name.as_str() {
        "dl" | "sdl" => Command::Download,
        "ytdl" => Command::YouTube,
        _ => Command::Other,
    };
    Some((command, args))
}

fn job_variant(action: JobAction) -> Variant {
    match action {
        JobAction::FetchAudio => Variant::Audio,
        JobAction::FetchVideo => Variant::Video,
    }
}

/// Cache sub-key for item `index` of a delivered group of `total`.
fn group_variant(kind: MediaKind, index: usize, total: usize) -> Variant {
    if total == 1 {
        Variant::for_kind(kind)
    } else {
        Variant::Native(format!("{}#{}", kind.as_str(), index))
    }
}

/// Log a failed host call that the flow can live without.
fn log_host_failure<T>(result: Result<T, HostError>, call: &str) {
    if let Err(e) = result {
        warn!(call, error = %e, "host call failed");
    }
}

pub struct DownloadOrchestrator {
    registry: ResolverRegistry,
    youtube: Arc<YouTubeResolver>,
    cache: DeliveryCache,
    host: Arc<dyn ChatHost>,
    settings: Arc<dyn ChatSettings>,
    localizer: Arc<dyn Localizer>,
    admission: AdmissionLimit,
    thumbnail_client: Option<reqwest::Client>,
}

impl DownloadOrchestrator {
    pub fn new(
        registry: ResolverRegistry,
        youtube: Arc<YouTubeResolver>,
        cache: DeliveryCache,
        host: Arc<dyn ChatHost>,
        settings: Arc<dyn ChatSettings>,
        localizer: Arc<dyn Localizer>,
        admission: AdmissionLimit,
    ) -> Self {
        Self {
            registry,
            youtube,
            cache,
            host,
            settings,
            localizer,
            admission,
            thumbnail_client: None,
        }
    }

    /// Attach thumbnails to YouTube uploads, fetched with `client`.
    pub fn with_thumbnail_client(mut self, client: reqwest::Client) -> Self {
        self.thumbnail_client = Some(client);
        self
    }

    pub fn cache(&self) -> &DeliveryCache {
        &self.cache
    }

    fn text(&self, language: &str, key: &str) -> String {
        self.localizer.text(language, key, &[])
    }

    pub async fn handle_event(&self, event: ChatEvent) {
        match event {
            ChatEvent::Message(message) => self.handle_message(&message).await,
            ChatEvent::Callback(query) => {
                if DeferredJob::is_token(&query.data) {
                    self.handle_callback(&query).await;
                } else {
                    debug!(data = %query.data, "ignoring foreign callback data");
                }
            }
        }
    }

    /// Resolve links in a message and deliver what they point at.
    pub async fn handle_message(&self, message: &ChatMessage) {
        let explicit = match parse_command(&message.text) {
            Some((Command::YouTube, args)) => {
                self.handle_youtube_command(message, args).await;
                return;
            }
            Some((Command::Download, _)) => true,
            Some((Command::Other, _)) => return,
            None => false,
        };

        if !explicit
            && message.chat.kind != ChatKind::Private
            && !self.settings.auto_resolve_media(message.chat.id).await
        {
            debug!(chat_id = message.chat.id, "auto resolution disabled for chat");
            return;
        }

        let Some(found) = self.registry.match_text(&message.text) else {
            debug!(chat_id = message.chat.id, "no supported link in message");
            if explicit {
                let text = self.text(&message.language, "no-link-provided");
                log_host_failure(
                    self.host
                        .send_message(message.chat.id, &text, Some(message.message_id), &[])
                        .await,
                    "send_message",
                );
            }
            return;
        };

        let mut set = match found.resolver.resolve(&found.url).await {
            Ok(set) => set,
            Err(e) => {
                warn!(resolver = found.resolver.name(), url = %found.url, error = %e, "resolver failed");
                return;
            }
        };
        if set.is_empty() {
            debug!(resolver = found.resolver.name(), url = %found.url, "resolver found nothing");
            return;
        }

        if set.is_single_photo() && message.link_preview_enabled && !found.force_delivery {
            debug!(url = %found.url, "single photo left to the host's link preview");
            return;
        }

        set.truncate_to_group_limit();
        let caption = self
            .delivery_caption(message.chat.id, &set.meta.caption, &found.url)
            .await;
        if let Some(first) = set.items.first_mut() {
            first.caption = Some(caption.clone());
        }

        self.deliver_group(message, set, &caption).await;
    }

    /// Caption policy: cap the length, honour the chat's caption toggle,
    /// fall back to a bare link.
    pub async fn delivery_caption(&self, chat_id: i64, caption: &str, url: &str) -> String {
        let mut caption = if caption.chars().count() > MAX_CAPTION_CHARS {
            truncate_caption(caption, url)
        } else {
            caption.to_string()
        };
        if !self.settings.show_caption(chat_id).await {
            caption.clear();
        }
        if caption.is_empty() {
            caption = link_caption(url);
        }
        caption
    }

    async fn deliver_group(&self, message: &ChatMessage, set: MediaSet, caption: &str) {
        let chat_id = message.chat.id;
        log_host_failure(
            self.host.send_chat_action(chat_id, ChatAction::UploadDocument).await,
            "send_chat_action",
        );

        let delivered = match self
            .host
            .send_media_group(chat_id, &set.items, Some(message.message_id))
            .await
        {
            Ok(delivered) => delivered,
            Err(e) => {
                error!(chat_id, source_id = %set.meta.source_id, error = %e, "media group delivery failed");
                return;
            }
        };
        info!(chat_id, source_id = %set.meta.source_id, items = delivered.len(), "media delivered");

        if set.meta.source_id.is_empty() {
            return;
        }
        let total = delivered.len();
        for (index, item) in delivered.iter().enumerate() {
            if let Some(file_ref) = &item.file_ref {
                let variant = group_variant(item.kind, index, total);
                self.cache
                    .set(&set.meta.source_id, &variant, file_ref, caption)
                    .await;
            }
        }
    }

    /// Stage A: look up the video and offer audio/video buttons.
    pub async fn handle_youtube_command(&self, message: &ChatMessage, args: &str) {
        let chat_id = message.chat.id;
        let reply_url = message
            .reply_to_text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty());
        let Some(url) = reply_url.or_else(|| args.split_whitespace().next()) else {
            let text = self.text(&message.language, "youtube-no-url");
            log_host_failure(
                self.host
                    .send_message(chat_id, &text, Some(message.message_id), &[])
                    .await,
                "send_message",
            );
            return;
        };

        let preview = match self
            .youtube
            .preview(url, message.from_user_id, message.message_id)
            .await
        {
            Ok(preview) => preview,
            Err(e) => {
                error!(url, error = %e, "youtube metadata lookup failed");
                let text = self.text(&message.language, "youtube-invalid-url");
                log_host_failure(
                    self.host
                        .send_message(chat_id, &text, Some(message.message_id), &[])
                        .await,
                    "send_message",
                );
                return;
            }
        };

        let keyboard = match self.preview_keyboard(&message.language, &preview) {
            Ok(keyboard) => keyboard,
            Err(e) => {
                error!(id = %preview.metadata.id, error = %e, "couldn't encode download buttons");
                let text = self.text(&message.language, "youtube-error");
                log_host_failure(
                    self.host
                        .send_message(chat_id, &text, Some(message.message_id), &[])
                        .await,
                    "send_message",
                );
                return;
            }
        };

        let info = self.preview_text(&message.language, &preview);
        log_host_failure(
            self.host
                .send_message(chat_id, &info, Some(message.message_id), &keyboard)
                .await,
            "send_message",
        );
    }

    fn preview_text(&self, language: &str, preview: &YouTubePreview) -> String {
        let metadata = &preview.metadata;
        self.localizer.text(
            language,
            "youtube-video-info",
            &[
                ("title", metadata.title.clone()),
                ("author", metadata.author.clone()),
                ("audioSize", format!("{:.2}", preview.audio_size_mib())),
                ("videoSize", format!("{:.2}", preview.video_size_mib())),
                ("duration", metadata.duration_label()),
            ],
        )
    }

    fn preview_keyboard(
        &self,
        language: &str,
        preview: &YouTubePreview,
    ) -> Result<Vec<InlineButton>, TokenError> {
        Ok(vec![
            InlineButton {
                text: self.text(language, "youtube-download-audio-button"),
                callback_data: preview.audio_job.encode()?,
            },
            InlineButton {
                text: self.text(language, "youtube-download-video-button"),
                callback_data: preview.video_job.encode()?,
            },
        ])
    }

    /// Stage B: run a deferred download chosen from the preview buttons.
    pub async fn handle_callback(&self, query: &CallbackQuery) {
        let job: DeferredJob = match query.data.parse() {
            Ok(job) => job,
            Err(e) => {
                warn!(data = %query.data, error = %e, "rejecting malformed download token");
                let text = self.text(&query.language, "youtube-error");
                log_host_failure(
                    self.host.answer_callback(&query.id, Some(&text), true).await,
                    "answer_callback",
                );
                return;
            }
        };

        if query.from_user_id != job.requester_user_id {
            debug!(user = query.from_user_id, requester = job.requester_user_id, "download button pressed by another user");
            let text = self.text(&query.language, "denied-button-alert");
            log_host_failure(
                self.host.answer_callback(&query.id, Some(&text), true).await,
                "answer_callback",
            );
            return;
        }

        if !self.admission.admits(job.expected_size_bytes) {
            debug!(id = %job.source_id, size = job.expected_size_bytes, limit = self.admission.bytes(), "download exceeds upload limit");
            let text = self.localizer.text(
                &query.language,
                "video-exceeds-limit",
                &[("size", self.admission.bytes().to_string())],
            );
            log_host_failure(
                self.host.answer_callback(&query.id, Some(&text), true).await,
                "answer_callback",
            );
            return;
        }

        log_host_failure(
            self.host.answer_callback(&query.id, None, false).await,
            "answer_callback",
        );
        let chat_id = query.chat_id;
        let status_id = query.message_id;
        self.set_status(chat_id, status_id, &query.language, "downloading").await;

        let variant = job_variant(job.action);
        if self.send_cached(chat_id, &job, &variant).await {
            log_host_failure(self.host.delete_message(chat_id, status_id).await, "delete_message");
            return;
        }

        let fetched = match self.youtube.fetch(&job).await {
            Ok(fetched) => fetched,
            Err(e) => {
                error!(id = %job.source_id, format = %job.format_id, action = ?job.action, error = %e, "youtube download failed");
                self.set_status(chat_id, status_id, &query.language, "youtube-error").await;
                return;
            }
        };

        self.set_status(chat_id, status_id, &query.language, "uploading").await;
        let action = match job.action {
            JobAction::FetchAudio => ChatAction::UploadVoice,
            JobAction::FetchVideo => ChatAction::UploadVideo,
        };
        log_host_failure(self.host.send_chat_action(chat_id, action).await, "send_chat_action");

        let caption = fetched.metadata.caption();
        let thumbnail = self.fetch_thumbnail(&fetched).await;
        let upload = Self::upload_for(&job, fetched, caption.clone(), thumbnail);

        let sent = match job.action {
            JobAction::FetchAudio => self.host.send_audio(chat_id, upload).await,
            JobAction::FetchVideo => self.host.send_video(chat_id, upload).await,
        };
        let delivered = match sent {
            Ok(delivered) => delivered,
            Err(e) => {
                error!(id = %job.source_id, error = %e, "youtube upload failed");
                self.set_status(chat_id, status_id, &query.language, "youtube-error").await;
                return;
            }
        };

        log_host_failure(self.host.delete_message(chat_id, status_id).await, "delete_message");
        info!(id = %job.source_id, variant = %variant, "youtube media delivered");
        if let Some(file_ref) = &delivered.file_ref {
            self.cache.set(&job.source_id, &variant, file_ref, &caption).await;
        }
    }

    async fn set_status(&self, chat_id: i64, message_id: i32, language: &str, key: &str) {
        let text = self.text(language, key);
        log_host_failure(
            self.host.edit_message(chat_id, message_id, &text).await,
            "edit_message",
        );
    }

    /// Re-send a previously delivered file. False when nothing was sent.
    async fn send_cached(&self, chat_id: i64, job: &DeferredJob, variant: &Variant) -> bool {
        let Some(hit) = self.cache.get(&job.source_id, variant).await else {
            return false;
        };
        let upload = Upload::new(MediaPayload::FileRef(hit.file_ref), hit.caption)
            .reply_to(job.origin_message_id);
        let sent: Result<DeliveredMedia, HostError> = match job.action {
            JobAction::FetchAudio => self.host.send_audio(chat_id, upload).await,
            JobAction::FetchVideo => self.host.send_video(chat_id, upload).await,
        };
        match sent {
            Ok(_) => {
                info!(id = %job.source_id, variant = %variant, "served from cache");
                true
            }
            Err(e) => {
                warn!(id = %job.source_id, error = %e, "cached re-send failed, downloading again");
                false
            }
        }
    }

    async fn fetch_thumbnail(&self, fetched: &FetchedMedia) -> Option<Vec<u8>> {
        let client = self.thumbnail_client.as_ref()?;
        let url = fetched.metadata.best_thumbnail()?;
        match fetch_bytes(client, &url).await {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                debug!(url = %url, error = %e, "thumbnail unavailable");
                None
            }
        }
    }

    fn upload_for(
        job: &DeferredJob,
        fetched: FetchedMedia,
        caption: String,
        thumbnail: Option<Vec<u8>>,
    ) -> Upload {
        let extension = match job.action {
            JobAction::FetchAudio => "m4a",
            JobAction::FetchVideo => "mp4",
        };
        let payload = MediaPayload::Bytes {
            data: fetched.data,
            filename: format!("{}.{}", fetched.filename, extension),
        };

        let mut upload = Upload::new(payload, caption).reply_to(job.origin_message_id);
        upload.thumbnail = thumbnail;
        match job.action {
            JobAction::FetchAudio => {
                upload.title = Some(fetched.metadata.title);
                upload.performer = Some(fetched.metadata.author);
            }
            JobAction::FetchVideo => {
                upload.width = fetched.format.width;
                upload.height = fetched.format.height;
            }
        }
        upload
    }
}
