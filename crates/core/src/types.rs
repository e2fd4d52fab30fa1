use std::fmt;

/// Chat platform user id.
pub type UserId = i64;

/// Chat id. Private chats are positive, groups are negative.
pub type ChatId = i64;

pub type MessageId = i64;

/// A message in a conversation that replies can be attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageRef {
    pub chat_id: ChatId,
    pub message_id: MessageId,
}

impl MessageRef {
    pub fn new(chat_id: ChatId, message_id: MessageId) -> Self {
        Self {
            chat_id,
            message_id,
        }
    }
}

/// Raw image bytes plus the file name they arrived (or will leave) with.
#[derive(Clone, PartialEq, Eq)]
pub struct ImageFile {
    pub data: Vec<u8>,
    pub filename: String,
}

impl ImageFile {
    pub fn new(data: Vec<u8>, filename: impl Into<String>) -> Self {
        Self {
            data,
            filename: filename.into(),
        }
    }
}

impl fmt::Debug for ImageFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageFile")
            .field("filename", &self.filename)
            .field("len", &self.data.len())
            .finish()
    }
}

/// How finished images are delivered to the chat.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Sent as a chat photo; the platform recompresses it.
    #[default]
    Photo,
    /// Sent as an uncompressed PNG file.
    Png,
}

impl OutputFormat {
    pub fn from_png_flag(png: bool) -> Self {
        if png {
            Self::Png
        } else {
            Self::Photo
        }
    }
}
