//! Line-oriented console chat host.
//!
//! Input lines become chat events:
//!
//! ```text
//! https://x.com/a/status/1        private message from user 1
//! @group /dl https://x.com/...    message in a group chat
//! @nopreview https://...          private message with link previews off
//! @reply https://... | /ytdl      message replying to one with the given text
//! !press _yt1|aud|...             button press by user 1
//! !press-as 2 _yt1|aud|...        button press by user 2
//! ```
//!
//! Prefixes combine, e.g. `@group @reply <text> | /ytdl`. Button presses
//! target the chat and message the bot wrote to last.
//!
//! Outbound calls are written to the output sink, uploads land in a spool
//! directory and are referenced by their path afterwards.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI32, AtomicI64, AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::debug;

use super::{
    CallbackQuery, Chat, ChatAction, ChatEvent, ChatHost, ChatKind, ChatMessage, DeliveredMedia,
    HostError, InlineButton, Upload,
};
use crate::downloader::models::{MediaItem, MediaKind, MediaPayload};
use crate::downloader::utils::sanitize_filename;

pub const CONSOLE_USER_ID: i64 = 1;
pub const PRIVATE_CHAT_ID: i64 = 1;
pub const GROUP_CHAT_ID: i64 = -100;

pub struct ConsoleHost {
    spool_dir: PathBuf,
    out: Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
    next_message_id: AtomicI32,
    next_callback_id: AtomicU64,
    /// Last message the bot sent, used as the origin of button presses
    last_bot_message: AtomicI32,
    last_bot_chat: AtomicI64,
}

impl ConsoleHost {
    pub fn new(spool_dir: impl Into<PathBuf>) -> Self {
        Self::with_writer(spool_dir, Box::new(tokio::io::stdout()))
    }

    pub fn with_writer(spool_dir: impl Into<PathBuf>, out: Box<dyn AsyncWrite + Send + Unpin>) -> Self {
        Self {
            spool_dir: spool_dir.into(),
            out: Mutex::new(out),
            next_message_id: AtomicI32::new(1),
            next_callback_id: AtomicU64::new(1),
            last_bot_message: AtomicI32::new(0),
            last_bot_chat: AtomicI64::new(PRIVATE_CHAT_ID),
        }
    }

    pub fn spool_dir(&self) -> &Path {
        &self.spool_dir
    }

    fn next_id(&self) -> i32 {
        self.next_message_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Turn one input line into an event. Blank lines yield nothing.
    pub fn parse_line(&self, line: &str) -> Option<ChatEvent> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        if let Some(rest) = line.strip_prefix("!press-as ") {
            let (user, data) = rest.trim().split_once(' ')?;
            return Some(self.callback(user.parse().ok()?, data.trim()));
        }
        if let Some(data) = line.strip_prefix("!press ") {
            return Some(self.callback(CONSOLE_USER_ID, data.trim()));
        }

        let mut chat = Chat { id: PRIVATE_CHAT_ID, kind: ChatKind::Private };
        let mut preview = true;
        let mut reply_to_text = None;
        let mut text = line;
        loop {
            if let Some(rest) = text.strip_prefix("@group ") {
                chat = Chat { id: GROUP_CHAT_ID, kind: ChatKind::Group };
                text = rest.trim_start();
            } else if let Some(rest) = text.strip_prefix("@nopreview ") {
                preview = false;
                text = rest.trim_start();
            } else if let Some(rest) = text.strip_prefix("@reply ") {
                let (quoted, message) = rest.split_once('|')?;
                reply_to_text = Some(quoted.trim().to_string());
                text = message.trim_start();
            } else {
                break;
            }
        }

        Some(ChatEvent::Message(ChatMessage {
            chat,
            message_id: self.next_id(),
            from_user_id: CONSOLE_USER_ID,
            text: text.trim().to_string(),
            reply_to_text,
            link_preview_enabled: preview,
            language: "en".to_string(),
        }))
    }

    fn callback(&self, user: i64, data: &str) -> ChatEvent {
        ChatEvent::Callback(CallbackQuery {
            id: self.next_callback_id.fetch_add(1, Ordering::SeqCst).to_string(),
            from_user_id: user,
            chat_id: self.last_bot_chat.load(Ordering::SeqCst),
            message_id: self.last_bot_message.load(Ordering::SeqCst),
            data: data.to_string(),
            language: "en".to_string(),
        })
    }

    async fn emit(&self, line: String) -> Result<(), HostError> {
        let mut out = self.out.lock().await;
        out.write_all(line.as_bytes()).await?;
        out.write_all(b"\n").await?;
        out.flush().await?;
        Ok(())
    }

    /// Store the payload and return the reference later sends can reuse.
    async fn store(&self, payload: &MediaPayload) -> Result<String, HostError> {
        match payload {
            MediaPayload::Bytes { data, filename } => {
                tokio::fs::create_dir_all(&self.spool_dir).await?;
                let name = format!("{}-{}", self.next_id(), sanitize_filename(filename));
                let path = self.spool_dir.join(name);
                tokio::fs::write(&path, data).await?;
                debug!(path = %path.display(), bytes = data.len(), "spooled upload");
                Ok(path.to_string_lossy().into_owned())
            }
            MediaPayload::Url(url) => Ok(url.clone()),
            MediaPayload::FileRef(file_ref) => Ok(file_ref.clone()),
        }
    }

    async fn upload(&self, chat_id: i64, kind: MediaKind, upload: Upload) -> Result<DeliveredMedia, HostError> {
        let file_ref = self.store(&upload.payload).await?;
        let message_id = self.next_id();
        let mut line = format!("[chat {}] #{} {} {}", chat_id, message_id, kind.as_str(), file_ref);
        if let (Some(title), Some(performer)) = (&upload.title, &upload.performer) {
            line.push_str(&format!(" ({} - {})", performer, title));
        }
        if let (Some(w), Some(h)) = (upload.width, upload.height) {
            line.push_str(&format!(" {}x{}", w, h));
        }
        if upload.thumbnail.is_some() {
            line.push_str(" +thumb");
        }
        line.push_str(&format!("\n    {}", upload.caption));
        self.emit(line).await?;

        Ok(DeliveredMedia {
            message_id,
            kind,
            file_ref: Some(file_ref),
        })
    }
}

#[async_trait]
impl ChatHost for ConsoleHost {
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        _reply_to: Option<i32>,
        keyboard: &[InlineButton],
    ) -> Result<i32, HostError> {
        let message_id = self.next_id();
        self.last_bot_message.store(message_id, Ordering::SeqCst);
        self.last_bot_chat.store(chat_id, Ordering::SeqCst);

        let mut line = format!("[chat {}] #{} {}", chat_id, message_id, text);
        for button in keyboard {
            line.push_str(&format!("\n    [{}] !press {}", button.text, button.callback_data));
        }
        self.emit(line).await?;
        Ok(message_id)
    }

    async fn edit_message(&self, chat_id: i64, message_id: i32, text: &str) -> Result<(), HostError> {
        self.emit(format!("[chat {}] #{} edited: {}", chat_id, message_id, text)).await
    }

    async fn delete_message(&self, chat_id: i64, message_id: i32) -> Result<(), HostError> {
        self.emit(format!("[chat {}] #{} deleted", chat_id, message_id)).await
    }

    async fn send_media_group(
        &self,
        chat_id: i64,
        items: &[MediaItem],
        _reply_to: Option<i32>,
    ) -> Result<Vec<DeliveredMedia>, HostError> {
        if items.is_empty() || items.len() > 10 {
            return Err(HostError::Rejected(format!("media group of {} items", items.len())));
        }

        let mut delivered = Vec::with_capacity(items.len());
        let mut lines = vec![format!("[chat {}] media group of {}", chat_id, items.len())];
        for item in items {
            let file_ref = self.store(&item.payload).await?;
            let message_id = self.next_id();
            lines.push(format!("    #{} {} {}", message_id, item.kind.as_str(), file_ref));
            if let Some(caption) = &item.caption {
                lines.push(format!("      {}", caption));
            }
            delivered.push(DeliveredMedia {
                message_id,
                kind: item.kind,
                file_ref: Some(file_ref),
            });
        }
        self.emit(lines.join("\n")).await?;
        Ok(delivered)
    }

    async fn send_audio(&self, chat_id: i64, upload: Upload) -> Result<DeliveredMedia, HostError> {
        self.upload(chat_id, MediaKind::Audio, upload).await
    }

    async fn send_video(&self, chat_id: i64, upload: Upload) -> Result<DeliveredMedia, HostError> {
        self.upload(chat_id, MediaKind::Video, upload).await
    }

    async fn answer_callback(
        &self,
        callback_id: &str,
        text: Option<&str>,
        show_alert: bool,
    ) -> Result<(), HostError> {
        match text {
            Some(text) if show_alert => self.emit(format!("[callback {}] alert: {}", callback_id, text)).await,
            Some(text) => self.emit(format!("[callback {}] {}", callback_id, text)).await,
            None => Ok(()),
        }
    }

    async fn send_chat_action(&self, chat_id: i64, action: ChatAction) -> Result<(), HostError> {
        debug!(chat_id, action = ?action, "chat action");
        Ok(())
    }
}
