use std::time::Duration;

/// Errors from the Bot API layer.
#[derive(Debug, thiserror::Error)]
pub enum TelegramError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The Bot API answered with `ok: false`.
    #[error("Telegram API error ({code}): {description}")]
    Api {
        code: i32,
        description: String,
        /// Set on flood-control errors.
        retry_after: Option<Duration>,
    },

    /// A request field could not be encoded.
    #[error("cannot encode request: {0}")]
    Encode(#[from] serde_json::Error),

    /// `ok: true` without a `result` field.
    #[error("Telegram API response for {0} has no result")]
    MissingResult(&'static str),
}

impl TelegramError {
    /// Whether an edit failed only because the text did not change.
    pub fn is_not_modified(&self) -> bool {
        matches!(self, Self::Api { description, .. } if description.contains("message is not modified"))
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Api { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}
