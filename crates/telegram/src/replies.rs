//! [`ReplySink`] over the Bot API.

use std::sync::Arc;

use async_trait::async_trait;

use sdbot_core::reply::{ReplyError, ReplySink};
use sdbot_core::types::{ChatId, ImageFile, MessageRef, OutputFormat};

use crate::api::{MediaKind, TelegramApi};
use crate::error::TelegramError;

/// Largest album `sendMediaGroup` accepts.
const MAX_ALBUM_SIZE: usize = 10;

/// Sends replies and images into Telegram chats.
#[derive(Clone)]
pub struct TelegramReplies {
    api: Arc<TelegramApi>,
}

impl TelegramReplies {
    pub fn new(api: Arc<TelegramApi>) -> Self {
        Self { api }
    }

    /// Send a standalone message (not a reply), e.g. an admin notice.
    pub async fn send_text(&self, chat_id: ChatId, html: &str) -> Result<(), TelegramError> {
        self.api.send_message(chat_id, html, None).await?;
        Ok(())
    }
}

#[async_trait]
impl ReplySink for TelegramReplies {
    async fn send_reply(&self, target: MessageRef, html: &str) -> Result<MessageRef, ReplyError> {
        let sent = self
            .api
            .send_message(target.chat_id, html, Some(target.message_id))
            .await
            .map_err(reply_error)?;
        Ok(sent.reference())
    }

    async fn edit_reply(&self, message: MessageRef, html: &str) -> Result<(), ReplyError> {
        match self
            .api
            .edit_message_text(message.chat_id, message.message_id, html)
            .await
        {
            Err(e) if !e.is_not_modified() => Err(reply_error(e)),
            _ => Ok(()),
        }
    }

    async fn send_images(
        &self,
        target: MessageRef,
        images: &[ImageFile],
        format: OutputFormat,
        caption: &str,
    ) -> Result<(), ReplyError> {
        let kind = media_kind(format);
        for chunk in album_chunks(images) {
            let sent = match chunk {
                [image] => self
                    .api
                    .send_media(target.chat_id, Some(target.message_id), kind, image, caption)
                    .await
                    .map(|_| ()),
                _ => self
                    .api
                    .send_media_group(target.chat_id, Some(target.message_id), kind, chunk, caption)
                    .await
                    .map(|_| ()),
            };
            sent.map_err(reply_error)?;
        }
        Ok(())
    }
}

fn media_kind(format: OutputFormat) -> MediaKind {
    match format {
        OutputFormat::Photo => MediaKind::Photo,
        OutputFormat::Png => MediaKind::Document,
    }
}

/// Split into albums of at most ten. A lone image is sent on its own.
fn album_chunks(images: &[ImageFile]) -> std::slice::Chunks<'_, ImageFile> {
    images.chunks(MAX_ALBUM_SIZE)
}

fn reply_error(e: TelegramError) -> ReplyError {
    ReplyError(e.to_string())
}
