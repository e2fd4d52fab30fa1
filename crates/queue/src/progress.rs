//! The single status reply kept up to date while an entry runs.

use sdbot_core::reply::ReplySink;
use sdbot_core::types::MessageRef;

/// Status message attached to one reply target.
///
/// The first update sends a reply; later updates edit it in place.
/// Delivery failures are logged and never abort the entry.
pub(crate) struct StatusReply<'a> {
    replies: &'a dyn ReplySink,
    target: MessageRef,
    sent: Option<MessageRef>,
    last_text: String,
}

impl<'a> StatusReply<'a> {
    pub fn new(replies: &'a dyn ReplySink, target: MessageRef) -> Self {
        Self {
            replies,
            target,
            sent: None,
            last_text: String::new(),
        }
    }

    pub fn target(&self) -> MessageRef {
        self.target
    }

    /// Attach further status to `target`; the next update sends a new reply.
    pub fn repoint(&mut self, target: MessageRef) {
        self.target = target;
        self.sent = None;
        self.last_text.clear();
    }

    pub async fn update(&mut self, html: String) {
        if self.sent.is_some() && html == self.last_text {
            return;
        }

        match self.sent {
            Some(message) => {
                if let Err(e) = self.replies.edit_reply(message, &html).await {
                    tracing::warn!(
                        chat_id = message.chat_id,
                        message_id = message.message_id,
                        error = %e,
                        "Failed to edit status reply",
                    );
                }
            }
            None => match self.replies.send_reply(self.target, &html).await {
                Ok(message) => self.sent = Some(message),
                Err(e) => {
                    tracing::warn!(
                        chat_id = self.target.chat_id,
                        error = %e,
                        "Failed to send status reply",
                    );
                }
            },
        }
        self.last_text = html;
    }
}
