//! The job queue and its worker.
//!
//! Producers call [`JobQueue::add`], [`JobQueue::cancel_current`] and
//! [`JobQueue::deliver_image`] concurrently; a single worker task drains
//! the pending queue in FIFO order so the backend never has more than one
//! job in flight.
//!
//! Shared state is the pending queue and the current-entry slot. Both are
//! locked only for short sections that never await anything else, always
//! in the order pending, then current.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, oneshot, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use sdbot_core::backend::{GenerationBackend, JobHandle, JobPoll};
use sdbot_core::error::BackendError;
use sdbot_core::job::JobSpec;
use sdbot_core::reply::{
    escape_html, ReplySink, CANCELED_PREFIX, DONE_PREFIX, ERROR_PREFIX, PROCESSING_PREFIX,
};
use sdbot_core::types::{ImageFile, MessageRef, UserId};

use crate::config::QueueConfig;
use crate::entry::{EntryId, QueueEntry, QueueRequest};
use crate::events::{EntryState, QueueEvent};
use crate::progress::StatusReply;

/// Broadcast channel capacity for lifecycle events.
const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// Cancellation was requested while no entry was executing.
    #[error("no running job to cancel")]
    NothingRunning,
}

/// Position of a freshly added entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Enqueued {
    pub id: EntryId,
    /// Entries ahead of it, the current entry included.
    pub ahead: usize,
}

/// Image bytes handed to an entry waiting for them, plus the message
/// they arrived in.
struct ImageDelivery {
    message: MessageRef,
    image: ImageFile,
}

/// Bookkeeping for the entry the worker is executing.
struct CurrentEntry {
    id: EntryId,
    user_id: UserId,
    cancel: CancellationToken,
    /// Present only while an upscale entry waits for its image.
    image_tx: Option<oneshot::Sender<ImageDelivery>>,
}

enum Outcome {
    Completed(usize),
    Cancelled,
    Failed(String),
}

/// Sequential scheduler for generation jobs.
///
/// Created once via [`JobQueue::start`] and shared as `Arc<JobQueue>`.
pub struct JobQueue {
    backend: Arc<dyn GenerationBackend>,
    replies: Arc<dyn ReplySink>,
    config: QueueConfig,
    pending: Mutex<VecDeque<QueueEntry>>,
    wake: Notify,
    current: Mutex<Option<CurrentEntry>>,
    next_id: AtomicU64,
    event_tx: broadcast::Sender<QueueEvent>,
}

impl JobQueue {
    /// Create the queue and spawn its worker.
    ///
    /// The worker stops once `shutdown` is cancelled; a running entry is
    /// cancelled with it.
    pub fn start(
        backend: Arc<dyn GenerationBackend>,
        replies: Arc<dyn ReplySink>,
        config: QueueConfig,
        shutdown: CancellationToken,
    ) -> (Arc<Self>, JoinHandle<()>) {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let queue = Arc::new(Self {
            backend,
            replies,
            config,
            pending: Mutex::new(VecDeque::new()),
            wake: Notify::new(),
            current: Mutex::new(None),
            next_id: AtomicU64::new(1),
            event_tx,
        });

        let worker = tokio::spawn(Arc::clone(&queue).run(shutdown));
        (queue, worker)
    }

    /// Subscribe to entry lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.event_tx.subscribe()
    }

    /// Append `request` to the tail of the queue.
    pub async fn add(&self, request: QueueRequest) -> Enqueued {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let user_id = request.user_id;
        let kind = request.spec.kind();

        let ahead = {
            let mut pending = self.pending.lock().await;
            let running = usize::from(self.current.lock().await.is_some());
            let ahead = pending.len() + running;
            pending.push_back(QueueEntry { id, request });
            // Published under the lock so it always precedes `Running`.
            self.emit(id, EntryState::Queued { ahead });
            ahead
        };
        self.wake.notify_one();

        tracing::info!(entry_id = id, user_id, kind, ahead, "Entry queued");
        Enqueued { id, ahead }
    }

    /// Signal cancellation to the entry currently executing.
    pub async fn cancel_current(&self) -> Result<(), QueueError> {
        let current = self.current.lock().await;
        let current = current.as_ref().ok_or(QueueError::NothingRunning)?;
        tracing::info!(entry_id = current.id, "Cancelling current entry");
        current.cancel.cancel();
        Ok(())
    }

    /// Whether the current entry waits for an image from `user_id`.
    pub async fn awaiting_image_from(&self, user_id: UserId) -> bool {
        self.current
            .lock()
            .await
            .as_ref()
            .is_some_and(|c| c.user_id == user_id && c.image_tx.is_some())
    }

    /// Hand `image` to the current entry if it waits for one from
    /// `user_id`. Further replies for the entry attach to `message`.
    ///
    /// Returns `false` when nothing took the image.
    pub async fn deliver_image(
        &self,
        user_id: UserId,
        message: MessageRef,
        image: ImageFile,
    ) -> bool {
        let (entry_id, tx) = {
            let mut current = self.current.lock().await;
            match current.as_mut() {
                Some(c) if c.user_id == user_id => (c.id, c.image_tx.take()),
                _ => return false,
            }
        };

        let Some(tx) = tx else {
            tracing::debug!(entry_id, user_id, "Ignoring image, entry is not waiting for one");
            return false;
        };
        if tx.send(ImageDelivery { message, image }).is_err() {
            tracing::warn!(entry_id, user_id, "Entry stopped waiting before the image arrived");
            return false;
        }

        tracing::info!(entry_id, user_id, "Image delivered");
        true
    }

    // ---- worker ----

    async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        tracing::info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            image_wait_timeout_secs = self.config.image_wait_timeout.as_secs(),
            "Job queue worker started",
        );

        loop {
            let (entry, cancel) = tokio::select! {
                _ = shutdown.cancelled() => break,
                next = self.next_entry(&shutdown) => next,
            };
            self.process(entry, cancel).await;
        }

        tracing::info!("Job queue worker shutting down");
    }

    /// Pop the head of the queue and make it current, sleeping while the
    /// queue is empty.
    async fn next_entry(&self, shutdown: &CancellationToken) -> (QueueEntry, CancellationToken) {
        loop {
            {
                let mut pending = self.pending.lock().await;
                if let Some(entry) = pending.pop_front() {
                    let cancel = shutdown.child_token();
                    *self.current.lock().await = Some(CurrentEntry {
                        id: entry.id,
                        user_id: entry.request.user_id,
                        cancel: cancel.clone(),
                        image_tx: None,
                    });
                    return (entry, cancel);
                }
            }
            self.wake.notified().await;
        }
    }

    async fn process(&self, entry: QueueEntry, cancel: CancellationToken) {
        let QueueEntry { id, request } = entry;
        tracing::info!(
            entry_id = id,
            user_id = request.user_id,
            kind = request.spec.kind(),
            "Entry started",
        );
        self.emit(id, EntryState::Running);

        let summary = request.spec.to_string();
        let mut status = StatusReply::new(self.replies.as_ref(), request.message);
        let outcome = self.execute(id, request, &cancel, &mut status, &summary).await;

        let state = match outcome {
            Outcome::Completed(images) => {
                status.update(format!("{DONE_PREFIX} {summary}")).await;
                tracing::info!(entry_id = id, images, "Entry completed");
                EntryState::Completed { images }
            }
            Outcome::Cancelled => {
                status.update(format!("{CANCELED_PREFIX} {summary}")).await;
                tracing::info!(entry_id = id, "Entry cancelled");
                EntryState::Cancelled
            }
            Outcome::Failed(error) => {
                status
                    .update(format!("{ERROR_PREFIX}: {}", escape_html(&error)))
                    .await;
                tracing::error!(entry_id = id, error = %error, "Entry failed");
                EntryState::Failed { error }
            }
        };

        *self.current.lock().await = None;
        self.emit(id, state);
    }

    async fn execute(
        &self,
        id: EntryId,
        request: QueueRequest,
        cancel: &CancellationToken,
        status: &mut StatusReply<'_>,
        summary: &str,
    ) -> Outcome {
        let QueueRequest { spec, image, .. } = request;

        let submitted = match &spec {
            JobSpec::Render(params) => {
                status.update(format!("{PROCESSING_PREFIX} {summary}")).await;
                self.backend.submit_render(params).await
            }
            JobSpec::Upscale(params) => {
                let image = match image {
                    Some(image) => image,
                    None => match self.wait_for_image(id, cancel, status, summary).await {
                        Ok(image) => image,
                        Err(outcome) => return outcome,
                    },
                };
                status.update(format!("{PROCESSING_PREFIX} {summary}")).await;
                self.backend.submit_upscale(params, image).await
            }
        };

        let job = match submitted {
            Ok(job) => job,
            Err(e) => return Outcome::Failed(e.to_string()),
        };
        tracing::debug!(entry_id = id, job = %job, "Backend job submitted");

        let images = match self.track(job, cancel, status, summary).await {
            Ok(images) => images,
            Err(outcome) => return outcome,
        };
        if images.is_empty() {
            return Outcome::Failed("backend returned no images".to_string());
        }

        if let Err(e) = self
            .replies
            .send_images(status.target(), &images, spec.output_format(), summary)
            .await
        {
            return Outcome::Failed(e.to_string());
        }
        Outcome::Completed(images.len())
    }

    /// Poll `job` until it finishes, editing the status reply when the
    /// percentage moves. Cancellation wins over a pending poll tick. A
    /// failed poll cancels the job so it cannot overlap the next entry.
    async fn track(
        &self,
        job: JobHandle,
        cancel: &CancellationToken,
        status: &mut StatusReply<'_>,
        summary: &str,
    ) -> Result<Vec<ImageFile>, Outcome> {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_percent = None;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    if let Err(e) = self.backend.cancel(job).await {
                        tracing::warn!(job = %job, error = %e, "Backend cancel failed");
                    }
                    return Err(Outcome::Cancelled);
                }
                _ = ticker.tick() => {}
            }

            match self.backend.poll(job).await {
                Ok(JobPoll::Running { percent, eta_secs }) => {
                    if last_percent != Some(percent) {
                        last_percent = Some(percent);
                        status.update(progress_text(percent, eta_secs, summary)).await;
                    }
                }
                Ok(JobPoll::Done(images)) => return Ok(images),
                Err(e) => {
                    match self.backend.cancel(job).await {
                        Ok(()) | Err(BackendError::UnknownJob(_)) => {}
                        Err(cancel_err) => {
                            tracing::warn!(job = %job, error = %cancel_err, "Backend cancel failed");
                        }
                    }
                    return Err(Outcome::Failed(e.to_string()));
                }
            }
        }
    }

    /// Ask the sender for an image and wait until it arrives, the entry is
    /// cancelled, or the wait times out.
    async fn wait_for_image(
        &self,
        id: EntryId,
        cancel: &CancellationToken,
        status: &mut StatusReply<'_>,
        summary: &str,
    ) -> Result<ImageFile, Outcome> {
        let (tx, rx) = oneshot::channel();
        if let Some(current) = self.current.lock().await.as_mut() {
            current.image_tx = Some(tx);
        }
        self.emit(id, EntryState::AwaitingImage);
        status
            .update(format!("{PROCESSING_PREFIX} Send the image to upscale {summary}"))
            .await;

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Outcome::Cancelled),
            delivery = rx => match delivery {
                Ok(ImageDelivery { message, image }) => {
                    status.repoint(message);
                    Ok(image)
                }
                Err(_) => Err(Outcome::Failed("image upload was abandoned".to_string())),
            },
            _ = tokio::time::sleep(self.config.image_wait_timeout) => {
                Err(Outcome::Failed("timed out waiting for image".to_string()))
            }
        }
    }

    fn emit(&self, entry_id: EntryId, state: EntryState) {
        // A send error only means nobody is subscribed.
        let _ = self.event_tx.send(QueueEvent::new(entry_id, state));
    }
}

fn progress_text(percent: u8, eta_secs: Option<f64>, summary: &str) -> String {
    match eta_secs {
        Some(eta) => format!("{PROCESSING_PREFIX} {percent}% ETA {eta:.0}s {summary}"),
        None => format!("{PROCESSING_PREFIX} {percent}% {summary}"),
    }
}
