//! Queue entries.

use sdbot_core::job::JobSpec;
use sdbot_core::types::{ImageFile, MessageRef, UserId};

/// Identifier assigned to each entry when it is added.
pub type EntryId = u64;

/// A parsed job plus where it came from.
#[derive(Debug, Clone)]
pub struct QueueRequest {
    pub spec: JobSpec,
    /// Sender of the originating message. Only this user can supply the
    /// image of an upscale request.
    pub user_id: UserId,
    /// The message the request arrived in; replies attach to it.
    pub message: MessageRef,
    /// Image bytes that arrived together with the request.
    pub image: Option<ImageFile>,
}

impl QueueRequest {
    pub fn new(spec: JobSpec, user_id: UserId, message: MessageRef) -> Self {
        Self {
            spec,
            user_id,
            message,
            image: None,
        }
    }

    pub fn with_image(mut self, image: ImageFile) -> Self {
        self.image = Some(image);
        self
    }
}

/// A request waiting in (or taken from) the pending queue.
#[derive(Debug)]
pub(crate) struct QueueEntry {
    pub id: EntryId,
    pub request: QueueRequest,
}
