//! Integration tests for update routing.
//!
//! A real `JobQueue` runs behind the bot, against an in-memory backend that
//! finishes every job on its first poll.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use sdbot_bot::access::AccessPolicy;
use sdbot_bot::router::{Bot, FileSource};
use sdbot_core::backend::{Catalog, CatalogKind, GenerationBackend, JobHandle, JobPoll};
use sdbot_core::defaults::DefaultGenerationParameters;
use sdbot_core::error::BackendError;
use sdbot_core::job::{RenderParams, UpscaleParams};
use sdbot_core::reply::{ReplyError, ReplySink};
use sdbot_core::types::{ImageFile, MessageRef, OutputFormat};
use sdbot_queue::{EntryState, JobQueue, QueueConfig, QueueEvent};
use sdbot_telegram::types::Update;
use sdbot_telegram::UpdateHandler;

const USER: i64 = 10;
const STRANGER: i64 = 30;
const GROUP: i64 = -100;

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

#[derive(Default)]
struct FakeBackend {
    log: Mutex<Vec<String>>,
    finished: Mutex<Vec<(u64, Vec<ImageFile>)>>,
}

impl FakeBackend {
    fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn start(&self, label: String, images: Vec<ImageFile>) -> JobHandle {
        let mut log = self.log.lock().unwrap();
        let id = log.len() as u64;
        log.push(label);
        self.finished.lock().unwrap().push((id, images));
        JobHandle(id)
    }
}

#[async_trait]
impl Catalog for FakeBackend {
    async fn list(&self, kind: CatalogKind) -> Result<Vec<String>, BackendError> {
        Ok(match kind {
            CatalogKind::Models => vec!["v1-5".to_string(), "sd_xl_base".to_string()],
            CatalogKind::Upscalers => vec!["LDSR".to_string(), "ESRGAN_4x".to_string()],
            _ => Vec::new(),
        })
    }
}

#[async_trait]
impl GenerationBackend for FakeBackend {
    async fn submit_render(&self, params: &RenderParams) -> Result<JobHandle, BackendError> {
        let image = ImageFile::new(vec![1], "out.png");
        Ok(self.start(format!("render:{}", params.prompt), vec![image]))
    }

    async fn submit_upscale(
        &self,
        params: &UpscaleParams,
        image: ImageFile,
    ) -> Result<JobHandle, BackendError> {
        let label = format!("upscale:{}x{}:{}", params.upscaler, params.scale, image.filename);
        Ok(self.start(label, vec![image]))
    }

    async fn poll(&self, job: JobHandle) -> Result<JobPoll, BackendError> {
        let mut finished = self.finished.lock().unwrap();
        let at = finished
            .iter()
            .position(|(id, _)| *id == job.0)
            .ok_or(BackendError::UnknownJob(job.0))?;
        Ok(JobPoll::Done(finished.remove(at).1))
    }

    async fn cancel(&self, job: JobHandle) -> Result<(), BackendError> {
        self.finished.lock().unwrap().retain(|(id, _)| *id != job.0);
        Ok(())
    }
}

#[derive(Default)]
struct RecordingReplies {
    texts: Mutex<Vec<(MessageRef, String)>>,
}

impl RecordingReplies {
    fn texts(&self) -> Vec<String> {
        self.texts.lock().unwrap().iter().map(|(_, t)| t.clone()).collect()
    }
}

#[async_trait]
impl ReplySink for RecordingReplies {
    async fn send_reply(&self, target: MessageRef, html: &str) -> Result<MessageRef, ReplyError> {
        let mut texts = self.texts.lock().unwrap();
        texts.push((target, html.to_string()));
        Ok(MessageRef::new(target.chat_id, 1000 + texts.len() as i64))
    }

    async fn edit_reply(&self, _message: MessageRef, _html: &str) -> Result<(), ReplyError> {
        Ok(())
    }

    async fn send_images(
        &self,
        _target: MessageRef,
        _images: &[ImageFile],
        _format: OutputFormat,
        _caption: &str,
    ) -> Result<(), ReplyError> {
        Ok(())
    }
}

/// Serves every file id except `broken`. `slow` takes a while.
struct FakeFiles;

#[async_trait]
impl FileSource for FakeFiles {
    async fn download(&self, file_id: &str) -> Result<Vec<u8>, String> {
        match file_id {
            "broken" => Err("file is too big".to_string()),
            "slow" => {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(b"slow".to_vec())
            }
            other => Ok(other.as_bytes().to_vec()),
        }
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    bot: Bot,
    backend: Arc<FakeBackend>,
    replies: Arc<RecordingReplies>,
    events: broadcast::Receiver<QueueEvent>,
    shutdown: CancellationToken,
}

impl Harness {
    fn new() -> Self {
        let backend = Arc::new(FakeBackend::default());
        let replies = Arc::new(RecordingReplies::default());
        let shutdown = CancellationToken::new();
        let config = QueueConfig {
            poll_interval: Duration::from_millis(5),
            image_wait_timeout: Duration::from_secs(5),
        };
        let (queue, _worker) =
            JobQueue::start(backend.clone(), replies.clone(), config, shutdown.clone());
        let events = queue.subscribe();

        let defaults = DefaultGenerationParameters {
            model: "v1-5".to_string(),
            ..DefaultGenerationParameters::default()
        };
        let bot = Bot::new(
            queue,
            backend.clone(),
            replies.clone(),
            Arc::new(FakeFiles),
            AccessPolicy::new(vec![USER], vec![], vec![GROUP]),
            defaults,
            "sdbot",
        );
        Self {
            bot,
            backend,
            replies,
            events,
            shutdown,
        }
    }

    async fn send(&self, message: serde_json::Value) {
        let update: Update =
            serde_json::from_value(serde_json::json!({"update_id": 1, "message": message}))
                .unwrap();
        self.bot.handle(update).await;
    }

    async fn wait_for(&mut self, pred: impl Fn(&EntryState) -> bool) -> EntryState {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let event = self.events.recv().await.unwrap();
                if pred(&event.state) {
                    return event.state;
                }
            }
        })
        .await
        .expect("timed out waiting for queue event")
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn text(chat_id: i64, kind: &str, from: i64, text: &str) -> serde_json::Value {
    serde_json::json!({
        "message_id": 7,
        "from": {"id": from, "first_name": "x"},
        "chat": {"id": chat_id, "type": kind},
        "text": text,
    })
}

fn photo(from: i64, file_id: &str, caption: Option<&str>) -> serde_json::Value {
    let mut message = serde_json::json!({
        "message_id": 8,
        "from": {"id": from, "first_name": "x"},
        "chat": {"id": from, "type": "private"},
        "photo": [{"file_id": file_id, "width": 512, "height": 512}],
    });
    if let Some(caption) = caption {
        message["caption"] = caption.into();
    }
    message
}

// ---------------------------------------------------------------------------
// Text routing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn private_plain_text_renders() {
    let mut h = Harness::new();
    h.send(text(USER, "private", USER, "a cat -s 5")).await;

    let state = h.wait_for(EntryState::is_terminal).await;
    assert_matches!(state, EntryState::Completed { images } if images.len() == 1);
    assert_eq!(h.backend.log(), vec!["render:a cat".to_string()]);
}

#[tokio::test]
async fn group_plain_text_is_ignored() {
    let h = Harness::new();
    h.send(text(GROUP, "supergroup", STRANGER, "a cat")).await;
    h.send(text(GROUP, "supergroup", STRANGER, "/bogus")).await;

    assert!(h.backend.log().is_empty());
    assert!(h.replies.texts().is_empty());
}

#[tokio::test]
async fn group_sd_command_renders() {
    let mut h = Harness::new();
    h.send(text(GROUP, "supergroup", STRANGER, "/sd@sdbot castle")).await;

    h.wait_for(EntryState::is_terminal).await;
    assert_eq!(h.backend.log(), vec!["render:castle".to_string()]);
}

#[tokio::test]
async fn strangers_are_ignored() {
    let h = Harness::new();
    h.send(text(STRANGER, "private", STRANGER, "/sd a cat")).await;
    h.send(text(-555, "group", USER, "/sd a cat")).await;

    assert!(h.backend.log().is_empty());
    assert!(h.replies.texts().is_empty());
}

#[tokio::test]
async fn commands_for_other_bots_are_ignored() {
    let h = Harness::new();
    h.send(text(USER, "private", USER, "/models@otherbot")).await;
    assert!(h.replies.texts().is_empty());
}

#[tokio::test]
async fn models_listing_marks_default() {
    let h = Harness::new();
    h.send(text(USER, "private", USER, "!models")).await;
    assert_eq!(
        h.replies.texts(),
        vec!["🧩 Available models:\n- <b>v1-5</b> (default)\n- <code>sd_xl_base</code>".to_string()]
    );
}

#[tokio::test]
async fn help_echoes_command_char() {
    let h = Harness::new();
    h.send(text(USER, "private", USER, "!help")).await;
    let texts = h.replies.texts();
    assert_eq!(texts.len(), 1);
    assert!(texts[0].contains("!upscale - upscale image"));
}

#[tokio::test]
async fn user_errors_are_replied() {
    let h = Harness::new();
    h.send(text(USER, "private", USER, "/cancel")).await;
    h.send(text(USER, "private", USER, "/nope")).await;
    h.send(text(USER, "private", USER, "-s 1")).await;
    h.send(text(USER, "private", USER, "a cat -model missing")).await;

    assert_eq!(
        h.replies.texts(),
        vec![
            "❌ Error: no running job to cancel".to_string(),
            "❌ Error: invalid command".to_string(),
            "❌ Error: missing prompt".to_string(),
            "❌ Error: can't parse render params: invalid model: missing".to_string(),
        ]
    );
    assert!(h.backend.log().is_empty());
}

#[tokio::test]
async fn start_welcomes_private_chats_only() {
    let h = Harness::new();
    h.send(text(GROUP, "group", USER, "/start")).await;
    h.send(text(USER, "private", USER, "/start")).await;

    let texts = h.replies.texts();
    assert_eq!(texts.len(), 1);
    assert!(texts[0].starts_with("🤖 Welcome!"));
}

// ---------------------------------------------------------------------------
// Images
// ---------------------------------------------------------------------------

#[tokio::test]
async fn captioned_photo_upscales_directly() {
    let mut h = Harness::new();
    h.send(photo(USER, "pic", Some("/upscale -u 2 -upscaler ESRGAN_4x"))).await;

    h.wait_for(EntryState::is_terminal).await;
    assert_eq!(h.backend.log(), vec!["upscale:ESRGAN_4xx2:image.jpg".to_string()]);
}

#[tokio::test]
async fn photo_answers_pending_upscale() {
    let mut h = Harness::new();
    h.send(text(USER, "private", USER, "/upscale")).await;
    h.wait_for(|s| matches!(s, EntryState::AwaitingImage)).await;

    h.send(photo(USER, "pic", None)).await;
    let state = h.wait_for(EntryState::is_terminal).await;

    assert_matches!(state, EntryState::Completed { .. });
    assert_eq!(h.backend.log(), vec!["upscale:LDSRx4:image.jpg".to_string()]);
    assert!(h.replies.texts().contains(&"✅ Done downloading".to_string()));
}

#[tokio::test]
async fn photo_after_cancel_is_not_acknowledged() {
    let mut h = Harness::new();
    h.send(text(USER, "private", USER, "/upscale")).await;
    h.wait_for(|s| matches!(s, EntryState::AwaitingImage)).await;

    // The upscale is cancelled while the upload is still downloading.
    tokio::join!(h.send(photo(USER, "slow", None)), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        h.send(text(USER, "private", USER, "/cancel")).await;
    });
    assert_eq!(h.wait_for(EntryState::is_terminal).await, EntryState::Cancelled);

    let texts = h.replies.texts();
    assert!(!texts.contains(&"✅ Done downloading".to_string()), "{texts:?}");
    assert!(texts.contains(&"❌ Error: the image is no longer expected".to_string()));
    assert!(h.backend.log().is_empty());
}

#[tokio::test]
async fn unexpected_photo_is_ignored() {
    let h = Harness::new();
    h.send(photo(USER, "pic", None)).await;
    assert!(h.replies.texts().is_empty());
    assert!(h.backend.log().is_empty());
}

#[tokio::test]
async fn failed_download_is_reported() {
    let h = Harness::new();
    h.send(photo(USER, "broken", Some("/upscale"))).await;

    assert_eq!(
        h.replies.texts(),
        vec!["❌ Error: can't get file: file is too big".to_string()]
    );
    assert!(h.backend.log().is_empty());
}
