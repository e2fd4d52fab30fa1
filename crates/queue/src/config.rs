use std::time::Duration;

/// Default interval between backend progress polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default time an upscale request waits for its image.
pub const DEFAULT_IMAGE_WAIT_TIMEOUT: Duration = Duration::from_secs(300);

/// Worker timing.
#[derive(Debug, Clone, Copy)]
pub struct QueueConfig {
    /// How often a running backend job is polled.
    pub poll_interval: Duration,
    /// How long an image-less upscale entry waits for an upload before
    /// it fails.
    pub image_wait_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            image_wait_timeout: DEFAULT_IMAGE_WAIT_TIMEOUT,
        }
    }
}
