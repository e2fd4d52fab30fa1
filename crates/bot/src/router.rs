//! Routes incoming chat updates to commands and the job queue.

use std::sync::Arc;

use async_trait::async_trait;

use sdbot_core::backend::GenerationBackend;
use sdbot_core::defaults::DefaultGenerationParameters;
use sdbot_core::error::ParamsError;
use sdbot_core::job::JobSpec;
use sdbot_core::reply::{escape_html, ReplySink, DONE_PREFIX, ERROR_PREFIX, PROCESSING_PREFIX};
use sdbot_core::request::{build_render_job, build_upscale_job};
use sdbot_core::types::{ImageFile, MessageRef};
use sdbot_queue::{Enqueued, JobQueue, QueueRequest};
use sdbot_telegram::types::{ChatKind, Message, Update};
use sdbot_telegram::{TelegramApi, UpdateHandler};

use crate::access::AccessPolicy;
use crate::commands::{self, Command, ParsedCommand, WELCOME_TEXT};

/// Where attached files are downloaded from.
#[async_trait]
pub trait FileSource: Send + Sync {
    async fn download(&self, file_id: &str) -> Result<Vec<u8>, String>;
}

#[async_trait]
impl FileSource for TelegramApi {
    async fn download(&self, file_id: &str) -> Result<Vec<u8>, String> {
        self.download_file(file_id).await.map_err(|e| e.to_string())
    }
}

/// The bot's update handler.
pub struct Bot {
    queue: Arc<JobQueue>,
    backend: Arc<dyn GenerationBackend>,
    replies: Arc<dyn ReplySink>,
    files: Arc<dyn FileSource>,
    access: AccessPolicy,
    defaults: DefaultGenerationParameters,
    username: String,
}

impl Bot {
    pub fn new(
        queue: Arc<JobQueue>,
        backend: Arc<dyn GenerationBackend>,
        replies: Arc<dyn ReplySink>,
        files: Arc<dyn FileSource>,
        access: AccessPolicy,
        defaults: DefaultGenerationParameters,
        username: impl Into<String>,
    ) -> Self {
        Self {
            queue,
            backend,
            replies,
            files,
            access,
            defaults,
            username: username.into(),
        }
    }

    async fn handle_text(&self, message: &Message, text: &str) {
        let private = message.chat.kind == ChatKind::Private;
        match commands::parse_command(text) {
            Some(cmd) if cmd.is_for(&self.username) => self.dispatch(message, cmd).await,
            Some(cmd) => {
                tracing::debug!(addressee = ?cmd.addressee, "Ignoring command for another bot");
            }
            None if private => self.render(message, text).await,
            None => {}
        }
    }

    async fn dispatch(&self, message: &Message, cmd: ParsedCommand<'_>) {
        let private = message.chat.kind == ChatKind::Private;
        tracing::debug!(
            chat_id = message.chat.id,
            user_id = ?message.sender_id(),
            command = ?cmd.command,
            "Command received",
        );

        match cmd.command {
            Command::Sd => self.render(message, cmd.args).await,
            Command::Upscale => self.upscale(message, cmd.args, None).await,
            Command::Cancel => {
                if let Err(e) = self.queue.cancel_current().await {
                    self.reply(message, &error_text(&e.to_string())).await;
                }
            }
            Command::List(kind) => {
                let text = commands::catalog_listing(self.backend.as_ref(), &self.defaults, kind)
                    .await
                    .unwrap_or_else(|e| {
                        tracing::warn!(%kind, error = %e, "Listing catalog failed");
                        error_text(&e.to_string())
                    });
                self.reply(message, &text).await;
            }
            Command::Smi => {
                let text = commands::smi_output().await.unwrap_or_else(|e| {
                    tracing::warn!(error = %e, "nvidia-smi failed");
                    error_text(&e.to_string())
                });
                self.reply(message, &text).await;
            }
            Command::Help => self.reply(message, &commands::help_text(cmd.cmd_char)).await,
            Command::Start if private => self.reply(message, WELCOME_TEXT).await,
            Command::Start => {}
            Command::Unknown(_) if private => {
                self.reply(message, &error_text("invalid command")).await;
            }
            Command::Unknown(name) => {
                tracing::debug!(command = %name, "Ignoring unknown command in group");
            }
        }
    }

    async fn render(&self, message: &Message, text: &str) {
        match build_render_job(self.backend.as_ref(), &self.defaults, text).await {
            Ok(spec) => self.enqueue(message, spec, None).await,
            Err(e) => self.reply(message, &params_error_text(&e)).await,
        }
    }

    async fn upscale(&self, message: &Message, args: &str, image: Option<ImageFile>) {
        match build_upscale_job(self.backend.as_ref(), &self.defaults, args).await {
            Ok(spec) => self.enqueue(message, spec, image).await,
            Err(e) => self.reply(message, &params_error_text(&e)).await,
        }
    }

    async fn enqueue(&self, message: &Message, spec: JobSpec, image: Option<ImageFile>) {
        let Some(user_id) = message.sender_id() else {
            tracing::debug!(chat_id = message.chat.id, "Ignoring request without a sender");
            return;
        };

        let mut request = QueueRequest::new(spec, user_id, message.reference());
        if let Some(image) = image {
            request = request.with_image(image);
        }
        let Enqueued { ahead, .. } = self.queue.add(request).await;
        if ahead > 0 {
            self.reply(message, &queued_text(ahead)).await;
        }
    }

    /// A photo or document either starts an upscale (when captioned with
    /// the command) or answers the image request of the running entry.
    async fn handle_image(&self, message: &Message, file_id: &str, filename: String) {
        let Some(user_id) = message.sender_id() else {
            return;
        };

        let upscale = message
            .text_or_caption()
            .and_then(commands::parse_command)
            .filter(|cmd| cmd.command == Command::Upscale && cmd.is_for(&self.username));
        if let Some(cmd) = upscale {
            if let Some(image) = self.download(message, file_id, filename).await {
                self.upscale(message, cmd.args, Some(image)).await;
            }
            return;
        }

        if !self.queue.awaiting_image_from(user_id).await {
            tracing::debug!(user_id, "Ignoring unexpected image");
            return;
        }
        let Some(image) = self.download(message, file_id, filename).await else {
            return;
        };
        if self.queue.deliver_image(user_id, message.reference(), image).await {
            self.reply(message, &format!("{DONE_PREFIX} downloading")).await;
        } else {
            tracing::info!(user_id, "Image arrived after the entry stopped waiting");
            self.reply(message, &error_text("the image is no longer expected"))
                .await;
        }
    }

    async fn download(
        &self,
        message: &Message,
        file_id: &str,
        filename: String,
    ) -> Option<ImageFile> {
        match self.files.download(file_id).await {
            Ok(data) => {
                tracing::debug!(file_id, filename = %filename, len = data.len(), "File downloaded");
                Some(ImageFile::new(data, filename))
            }
            Err(e) => {
                tracing::warn!(file_id, error = %e, "File download failed");
                self.reply(message, &error_text(&format!("can't get file: {e}")))
                    .await;
                None
            }
        }
    }

    async fn reply(&self, message: &Message, html: &str) {
        let target: MessageRef = message.reference();
        if let Err(e) = self.replies.send_reply(target, html).await {
            tracing::warn!(chat_id = target.chat_id, error = %e, "Reply failed");
        }
    }
}

#[async_trait]
impl UpdateHandler for Bot {
    async fn handle(&self, update: Update) {
        let Some(message) = update.message else {
            return;
        };
        if !self.access.allows(&message) {
            tracing::debug!(
                chat_id = message.chat.id,
                user_id = ?message.sender_id(),
                "Ignoring message from chat without access",
            );
            return;
        }

        if let Some((file_id, filename)) = message.attached_image() {
            self.handle_image(&message, file_id, filename).await;
        } else if let Some(text) = message.text.as_deref() {
            self.handle_text(&message, text).await;
        }
    }
}

fn error_text(detail: &str) -> String {
    format!("{ERROR_PREFIX}: {}", escape_html(detail))
}

fn params_error_text(err: &ParamsError) -> String {
    match err {
        ParamsError::MissingPrompt => error_text(&err.to_string()),
        other => error_text(&format!("can't parse render params: {other}")),
    }
}

fn queued_text(ahead: usize) -> String {
    format!("{PROCESSING_PREFIX} Request queued, {ahead} ahead")
}

#[cfg(test)]
mod tests {
    use sdbot_core::backend::CatalogKind;

    use super::*;

    #[test]
    fn params_errors_are_prefixed() {
        assert_eq!(params_error_text(&ParamsError::MissingPrompt), "❌ Error: missing prompt");
        assert_eq!(
            params_error_text(&ParamsError::NotInCatalog {
                kind: CatalogKind::Samplers,
                value: "<x>".into(),
            }),
            "❌ Error: can't parse render params: invalid sampler: &lt;x&gt;"
        );
    }

    #[test]
    fn queued_text_counts_entries_ahead() {
        assert_eq!(queued_text(2), "⏳ Request queued, 2 ahead");
    }
}
