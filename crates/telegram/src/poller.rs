//! `getUpdates` long polling with exponential backoff on failure.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::api::TelegramApi;
use crate::types::Update;

/// Receives every update the poller fetches. Each call runs in its own
/// task so a slow handler never delays polling.
#[async_trait]
pub trait UpdateHandler: Send + Sync + 'static {
    async fn handle(&self, update: Update);
}

/// Tunable parameters of the polling loop.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Server-side long-poll timeout.
    pub long_poll_timeout: Duration,
    /// Delay after the first failed poll.
    pub initial_delay: Duration,
    /// Upper bound on the delay between failed polls.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            long_poll_timeout: Duration::from_secs(30),
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

/// Calculate the next backoff delay from the current delay and config.
///
/// The result is clamped to [`PollerConfig::max_delay`].
pub fn next_delay(current: Duration, config: &PollerConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}

pub struct UpdatePoller {
    api: Arc<TelegramApi>,
    config: PollerConfig,
}

impl UpdatePoller {
    pub fn new(api: Arc<TelegramApi>, config: PollerConfig) -> Self {
        Self { api, config }
    }

    /// Poll until `cancel` is triggered.
    pub async fn run(&self, handler: Arc<dyn UpdateHandler>, cancel: CancellationToken) {
        let mut offset: Option<i64> = None;
        let mut delay = self.config.initial_delay;
        let mut failures = 0u32;

        tracing::info!(
            long_poll_timeout_secs = self.config.long_poll_timeout.as_secs(),
            "Update poller started",
        );

        loop {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                result = self.api.get_updates(offset, self.config.long_poll_timeout) => result,
            };

            match result {
                Ok(updates) => {
                    if failures > 0 {
                        tracing::info!(failures, "Update polling recovered");
                    }
                    failures = 0;
                    delay = self.config.initial_delay;

                    for update in updates {
                        offset = Some(update.update_id + 1);
                        let handler = Arc::clone(&handler);
                        tokio::spawn(async move { handler.handle(update).await });
                    }
                }
                Err(e) => {
                    failures += 1;
                    let wait = e.retry_after().unwrap_or(delay);
                    tracing::warn!(
                        failures,
                        delay_ms = wait.as_millis() as u64,
                        error = %e,
                        "Polling updates failed",
                    );

                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(wait) => {}
                    }
                    delay = next_delay(delay, &self.config);
                }
            }
        }

        tracing::info!("Update poller stopped");
    }
}
