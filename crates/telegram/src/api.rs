//! HTTP client for the Telegram Bot API.

use std::time::Duration;

use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use serde::Serialize;

use sdbot_core::types::{ChatId, ImageFile, MessageId};

use crate::error::TelegramError;
use crate::types::{
    ApiResponse, EditMessageText, File, GetFile, GetUpdates, InputMedia, LinkPreviewOptions,
    Message, ReplyParameters, SendMessage, Update, User,
};

pub const DEFAULT_API_URL: &str = "https://api.telegram.org";

const PARSE_MODE: &str = "HTML";

/// Extra time granted to a long poll on top of its server-side timeout.
const LONG_POLL_GRACE: Duration = Duration::from_secs(10);

/// Kind of upload used for images.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    /// Recompressed by Telegram.
    Photo,
    /// Sent as-is.
    Document,
}

impl MediaKind {
    fn method(self) -> &'static str {
        match self {
            Self::Photo => "sendPhoto",
            Self::Document => "sendDocument",
        }
    }

    /// Form field and `InputMedia` type name.
    fn field(self) -> &'static str {
        match self {
            Self::Photo => "photo",
            Self::Document => "document",
        }
    }
}

/// Bot API client bound to one bot token.
pub struct TelegramApi {
    client: reqwest::Client,
    api_url: String,
    token: String,
}

impl TelegramApi {
    pub fn new(token: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), DEFAULT_API_URL, token)
    }

    /// Create a client for a custom API server, reusing `client`.
    pub fn with_client(
        client: reqwest::Client,
        api_url: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        let api_url = api_url.into().trim_end_matches('/').to_string();
        Self {
            client,
            api_url,
            token: token.into(),
        }
    }

    pub async fn get_me(&self) -> Result<User, TelegramError> {
        self.call("getMe", &serde_json::json!({})).await
    }

    /// Long-poll for updates newer than `offset`.
    pub async fn get_updates(
        &self,
        offset: Option<i64>,
        timeout: Duration,
    ) -> Result<Vec<Update>, TelegramError> {
        let body = GetUpdates {
            offset,
            timeout: timeout.as_secs(),
            allowed_updates: &["message"],
        };
        let response = self
            .client
            .post(self.method_url("getUpdates"))
            .timeout(timeout + LONG_POLL_GRACE)
            .json(&body)
            .send()
            .await?;
        Self::parse_response(response, "getUpdates").await
    }

    /// Send an HTML message, as a reply when `reply_to` is given.
    pub async fn send_message(
        &self,
        chat_id: ChatId,
        html: &str,
        reply_to: Option<MessageId>,
    ) -> Result<Message, TelegramError> {
        let body = SendMessage {
            chat_id,
            text: html,
            parse_mode: PARSE_MODE,
            reply_parameters: reply_to.map(ReplyParameters::to),
            link_preview_options: LinkPreviewOptions { is_disabled: true },
        };
        self.call("sendMessage", &body).await
    }

    pub async fn edit_message_text(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        html: &str,
    ) -> Result<(), TelegramError> {
        let body = EditMessageText {
            chat_id,
            message_id,
            text: html,
            parse_mode: PARSE_MODE,
        };
        // The result is the edited message, or `true` for inline messages.
        let _: serde_json::Value = self.call("editMessageText", &body).await?;
        Ok(())
    }

    /// Upload a single image.
    pub async fn send_media(
        &self,
        chat_id: ChatId,
        reply_to: Option<MessageId>,
        kind: MediaKind,
        image: &ImageFile,
        caption: &str,
    ) -> Result<Message, TelegramError> {
        let form = Self::base_form(chat_id, reply_to)?
            .text("caption", caption.to_string())
            .text("parse_mode", PARSE_MODE)
            .part(kind.field(), Self::image_part(image)?);
        self.call_multipart(kind.method(), form).await
    }

    /// Upload 2 to 10 images as one album, captioned on the first item.
    pub async fn send_media_group(
        &self,
        chat_id: ChatId,
        reply_to: Option<MessageId>,
        kind: MediaKind,
        images: &[ImageFile],
        caption: &str,
    ) -> Result<Vec<Message>, TelegramError> {
        let media: Vec<InputMedia> = (0..images.len())
            .map(|i| InputMedia {
                kind: kind.field(),
                media: format!("attach://file{i}"),
                caption: (i == 0).then(|| caption.to_string()),
                parse_mode: (i == 0).then_some(PARSE_MODE),
            })
            .collect();
        let media = serde_json::to_string(&media)?;

        let mut form = Self::base_form(chat_id, reply_to)?.text("media", media);
        for (i, image) in images.iter().enumerate() {
            form = form.part(format!("file{i}"), Self::image_part(image)?);
        }
        self.call_multipart("sendMediaGroup", form).await
    }

    /// Download the contents of an uploaded file.
    pub async fn download_file(&self, file_id: &str) -> Result<Vec<u8>, TelegramError> {
        let file: File = self.call("getFile", &GetFile { file_id }).await?;
        let path = file.file_path.ok_or(TelegramError::MissingResult("getFile"))?;

        let response = self
            .client
            .get(format!("{}/file/bot{}/{}", self.api_url, self.token, path))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }

    // ---- private helpers ----

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_url, self.token, method)
    }

    async fn call<B: Serialize, T: DeserializeOwned>(
        &self,
        method: &'static str,
        body: &B,
    ) -> Result<T, TelegramError> {
        let response = self
            .client
            .post(self.method_url(method))
            .json(body)
            .send()
            .await?;
        Self::parse_response(response, method).await
    }

    async fn call_multipart<T: DeserializeOwned>(
        &self,
        method: &'static str,
        form: Form,
    ) -> Result<T, TelegramError> {
        let response = self
            .client
            .post(self.method_url(method))
            .multipart(form)
            .send()
            .await?;
        Self::parse_response(response, method).await
    }

    /// Bot API errors carry a JSON envelope even on non-2xx statuses.
    async fn parse_response<T: DeserializeOwned>(
        response: reqwest::Response,
        method: &'static str,
    ) -> Result<T, TelegramError> {
        let envelope: ApiResponse<T> = response.json().await?;
        envelope.into_result(method)
    }

    fn base_form(chat_id: ChatId, reply_to: Option<MessageId>) -> Result<Form, TelegramError> {
        let mut form = Form::new().text("chat_id", chat_id.to_string());
        if let Some(message_id) = reply_to {
            let reply = serde_json::to_string(&ReplyParameters::to(message_id))?;
            form = form.text("reply_parameters", reply);
        }
        Ok(form)
    }

    fn image_part(image: &ImageFile) -> Result<Part, TelegramError> {
        Ok(Part::bytes(image.data.clone())
            .file_name(image.filename.clone())
            .mime_str(mime_for(&image.filename))?)
    }
}

fn mime_for(filename: &str) -> &'static str {
    let ext = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase());
    match ext.as_deref() {
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("png") => "image/png",
        _ => "application/octet-stream",
    }
}
