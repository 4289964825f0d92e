//! Chat host boundary.
//!
//! The pipeline only talks to the outside world through these traits:
//! `ChatHost` for outbound calls, `ChatSettings` for per-chat toggles and
//! `Localizer` for user-facing text.

pub mod console;

use std::collections::HashMap;

use async_trait::async_trait;
use lazy_static::lazy_static;
use parking_lot::RwLock;
use thiserror::Error;

use crate::downloader::models::{MediaItem, MediaKind, MediaPayload};

#[derive(Debug, Error)]
pub enum HostError {
    #[error("host request failed: {0}")]
    Transport(String),
    #[error("host rejected the request: {0}")]
    Rejected(String),
    #[error("host io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatKind {
    Private,
    Group,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chat {
    pub id: i64,
    pub kind: ChatKind,
}

/// Inbound text message.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub chat: Chat,
    pub message_id: i32,
    pub from_user_id: i64,
    pub text: String,
    /// Text of the message this one replies to, if any
    pub reply_to_text: Option<String>,
    /// Whether the host will render its own preview for links in `text`
    pub link_preview_enabled: bool,
    pub language: String,
}

/// Inline button press.
#[derive(Debug, Clone)]
pub struct CallbackQuery {
    pub id: String,
    pub from_user_id: i64,
    pub chat_id: i64,
    /// Message carrying the button
    pub message_id: i32,
    pub data: String,
    pub language: String,
}

#[derive(Debug, Clone)]
pub enum ChatEvent {
    Message(ChatMessage),
    Callback(CallbackQuery),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatAction {
    Typing,
    UploadDocument,
    UploadVideo,
    UploadVoice,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineButton {
    pub text: String,
    pub callback_data: String,
}

/// Single audio or video upload.
#[derive(Debug, Clone)]
pub struct Upload {
    pub payload: MediaPayload,
    pub caption: String,
    pub title: Option<String>,
    pub performer: Option<String>,
    pub thumbnail: Option<Vec<u8>>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub reply_to: Option<i32>,
}

impl Upload {
    pub fn new(payload: MediaPayload, caption: impl Into<String>) -> Self {
        Self {
            payload,
            caption: caption.into(),
            title: None,
            performer: None,
            thumbnail: None,
            width: None,
            height: None,
            reply_to: None,
        }
    }

    pub fn reply_to(mut self, message_id: i32) -> Self {
        self.reply_to = Some(message_id);
        self
    }
}

/// What the host reports back for each delivered item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveredMedia {
    pub message_id: i32,
    pub kind: MediaKind,
    /// Reusable reference, when the host hands one out
    pub file_ref: Option<String>,
}

#[async_trait]
pub trait ChatHost: Send + Sync {
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        reply_to: Option<i32>,
        keyboard: &[InlineButton],
    ) -> Result<i32, HostError>;

    async fn edit_message(&self, chat_id: i64, message_id: i32, text: &str) -> Result<(), HostError>;

    async fn delete_message(&self, chat_id: i64, message_id: i32) -> Result<(), HostError>;

    /// Deliver up to ten items as one group; the caption rides on the first item.
    async fn send_media_group(
        &self,
        chat_id: i64,
        items: &[MediaItem],
        reply_to: Option<i32>,
    ) -> Result<Vec<DeliveredMedia>, HostError>;

    async fn send_audio(&self, chat_id: i64, upload: Upload) -> Result<DeliveredMedia, HostError>;

    async fn send_video(&self, chat_id: i64, upload: Upload) -> Result<DeliveredMedia, HostError>;

    /// Visible only to the user who pressed the button.
    async fn answer_callback(
        &self,
        callback_id: &str,
        text: Option<&str>,
        show_alert: bool,
    ) -> Result<(), HostError>;

    async fn send_chat_action(&self, chat_id: i64, action: ChatAction) -> Result<(), HostError>;
}

/// Per-chat feature toggles.
#[async_trait]
pub trait ChatSettings: Send + Sync {
    async fn auto_resolve_media(&self, chat_id: i64) -> bool;
    async fn show_caption(&self, chat_id: i64) -> bool;
    async fn set_auto_resolve_media(&self, chat_id: i64, enabled: bool);
    async fn set_show_caption(&self, chat_id: i64, enabled: bool);
}

#[derive(Debug, Clone, Copy)]
struct ChatFlags {
    auto_resolve_media: bool,
    show_caption: bool,
}

/// In-process settings with configurable defaults for unknown chats.
pub struct MemorySettings {
    defaults: ChatFlags,
    chats: RwLock<HashMap<i64, ChatFlags>>,
}

impl MemorySettings {
    pub fn new(auto_resolve_media: bool, show_caption: bool) -> Self {
        Self {
            defaults: ChatFlags {
                auto_resolve_media,
                show_caption,
            },
            chats: RwLock::new(HashMap::new()),
        }
    }

    fn flags(&self, chat_id: i64) -> ChatFlags {
        self.chats.read().get(&chat_id).copied().unwrap_or(self.defaults)
    }

    fn update(&self, chat_id: i64, f: impl FnOnce(&mut ChatFlags)) {
        let mut chats = self.chats.write();
        f(chats.entry(chat_id).or_insert(self.defaults));
    }
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self::new(true, true)
    }
}

#[async_trait]
impl ChatSettings for MemorySettings {
    async fn auto_resolve_media(&self, chat_id: i64) -> bool {
        self.flags(chat_id).auto_resolve_media
    }

    async fn show_caption(&self, chat_id: i64) -> bool {
        self.flags(chat_id).show_caption
    }

    async fn set_auto_resolve_media(&self, chat_id: i64, enabled: bool) {
        self.update(chat_id, |f| f.auto_resolve_media = enabled);
    }

    async fn set_show_caption(&self, chat_id: i64, enabled: bool) {
        self.update(chat_id, |f| f.show_caption = enabled);
    }
}

/// Renders user-facing strings. Arguments replace `{name}` placeholders.
pub trait Localizer: Send + Sync {
    fn text(&self, language: &str, key: &str, args: &[(&str, String)]) -> String;
}

lazy_static! {
    static ref ENGLISH: HashMap<&'static str, &'static str> = HashMap::from([
        ("no-link-provided", "No supported link found in your message."),
        ("youtube-no-url", "Send a YouTube link after the command, or reply to a message containing one."),
        ("youtube-invalid-url", "Couldn't load that YouTube video. Check the link and try again."),
        (
            "youtube-video-info",
            "<b>Title:</b> {title}\n<b>Author:</b> {author}\n<b>Audio size:</b> {audioSize} MB\n<b>Video size:</b> {videoSize} MB\n<b>Duration:</b> {duration}",
        ),
        ("youtube-download-audio-button", "💿 Audio"),
        ("youtube-download-video-button", "📹 Video"),
        ("denied-button-alert", "This button is not for you."),
        ("video-exceeds-limit", "This file is larger than the {size} byte upload limit."),
        ("downloading", "Downloading..."),
        ("uploading", "Uploading..."),
        ("youtube-error", "Something went wrong while downloading this video."),
    ]);
}

/// Built-in English table. Unknown keys render as the key itself.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnglishStrings;

impl Localizer for EnglishStrings {
    fn text(&self, _language: &str, key: &str, args: &[(&str, String)]) -> String {
        let mut out = ENGLISH.get(key).copied().unwrap_or(key).to_string();
        for (name, value) in args {
            out = out.replace(&format!("{{{}}}", name), value);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_settings_defaults_and_overrides() {
        let settings = MemorySettings::new(false, true);
        assert!(!settings.auto_resolve_media(-100).await);

        settings.set_auto_resolve_media(-100, true).await;
        assert!(settings.auto_resolve_media(-100).await);
        assert!(settings.show_caption(-100).await);
        assert!(!settings.auto_resolve_media(-200).await);
    }

    #[test]
    fn test_english_placeholders() {
        let text = EnglishStrings.text("en", "video-exceeds-limit", &[("size", "52428800".into())]);
        assert_eq!(text, "This file is larger than the 52428800 byte upload limit.");
        assert_eq!(EnglishStrings.text("en", "missing-key", &[]), "missing-key");
    }
}
