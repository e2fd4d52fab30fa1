//! Outbound reply seam.

use async_trait::async_trait;

use crate::types::{ImageFile, MessageRef, OutputFormat};

pub const ERROR_PREFIX: &str = "❌ Error";
pub const DONE_PREFIX: &str = "✅ Done";
pub const CANCELED_PREFIX: &str = "❌ Canceled";
pub const PROCESSING_PREFIX: &str = "⏳";

/// Reply delivery failed on the transport side.
#[derive(Debug, thiserror::Error)]
#[error("reply delivery failed: {0}")]
pub struct ReplyError(pub String);

/// Delivers text and images back to the conversation a job came from.
///
/// Text is HTML-formatted.
#[async_trait]
pub trait ReplySink: Send + Sync {
    /// Send `html` as a reply to `target`. Returns the sent message so it
    /// can be edited later.
    async fn send_reply(&self, target: MessageRef, html: &str) -> Result<MessageRef, ReplyError>;

    /// Replace the text of a previously sent reply.
    async fn edit_reply(&self, message: MessageRef, html: &str) -> Result<(), ReplyError>;

    /// Send `images` as replies to `target`, captioned with `caption`.
    async fn send_images(
        &self,
        target: MessageRef,
        images: &[ImageFile],
        format: OutputFormat,
        caption: &str,
    ) -> Result<(), ReplyError>;
}

/// Escape the characters that are significant in chat HTML.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}
