//! [`GenerationBackend`] implementation over [`SdApi`].
//!
//! The web UI serves txt2img and extras as blocking HTTP calls, so each
//! submission runs in its own task and is tracked by a locally assigned
//! [`JobHandle`]. Polling checks whether that task has finished and
//! otherwise asks `/progress` how far the current execution is.
//! Cancelling aborts the task and interrupts the web UI.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use sdbot_core::backend::{Catalog, CatalogKind, GenerationBackend, JobHandle, JobPoll};
use sdbot_core::error::BackendError;
use sdbot_core::job::{RenderParams, UpscaleParams};
use sdbot_core::types::ImageFile;

use crate::api::{encode_image, SdApi, SdApiError};
use crate::messages::{ExtraSingleImageRequest, Txt2ImgRequest};

type JobTask = JoinHandle<Result<Vec<ImageFile>, SdApiError>>;

/// Stable Diffusion web UI backend.
pub struct SdBackend {
    api: Arc<SdApi>,
    next_id: AtomicU64,
    /// In-flight submissions indexed by handle.
    jobs: Mutex<HashMap<u64, JobTask>>,
}

impl SdBackend {
    pub fn new(api: SdApi) -> Self {
        Self {
            api: Arc::new(api),
            next_id: AtomicU64::new(1),
            jobs: Mutex::new(HashMap::new()),
        }
    }

    async fn track(&self, task: JobTask) -> JobHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.jobs.lock().await.insert(id, task);
        JobHandle(id)
    }
}

#[async_trait]
impl Catalog for SdBackend {
    async fn list(&self, kind: CatalogKind) -> Result<Vec<String>, BackendError> {
        Ok(self.api.catalog(kind).await?)
    }
}

#[async_trait]
impl GenerationBackend for SdBackend {
    async fn submit_render(&self, params: &RenderParams) -> Result<JobHandle, BackendError> {
        let api = Arc::clone(&self.api);
        let request = Txt2ImgRequest::from(params);
        let upscale = params.upscale_enabled().then(|| params.upscale.clone());
        let seed = params.seed;

        let task = tokio::spawn(async move {
            let images = api.txt2img(&request).await?;
            let mut out = Vec::with_capacity(images.len());
            for (i, data) in images.into_iter().enumerate() {
                let data = match &upscale {
                    Some(upscale) => {
                        let req = ExtraSingleImageRequest::new(encode_image(&data), upscale);
                        api.extra_single_image(&req).await?
                    }
                    None => data,
                };
                out.push(ImageFile::new(data, format!("sd-{seed}-{i}.png")));
            }
            Ok(out)
        });

        let handle = self.track(task).await;
        tracing::debug!(job = %handle, seed, "Render submitted");
        Ok(handle)
    }

    async fn submit_upscale(
        &self,
        params: &UpscaleParams,
        image: ImageFile,
    ) -> Result<JobHandle, BackendError> {
        let api = Arc::clone(&self.api);
        let request = ExtraSingleImageRequest::new(encode_image(&image.data), params);
        let filename = upscaled_filename(&image.filename);

        let task = tokio::spawn(async move {
            let data = api.extra_single_image(&request).await?;
            Ok(vec![ImageFile::new(data, filename)])
        });

        let handle = self.track(task).await;
        tracing::debug!(job = %handle, upscaler = %params.upscaler, "Upscale submitted");
        Ok(handle)
    }

    async fn poll(&self, job: JobHandle) -> Result<JobPoll, BackendError> {
        let finished = {
            let mut jobs = self.jobs.lock().await;
            match jobs.get(&job.0) {
                None => return Err(BackendError::UnknownJob(job.0)),
                Some(task) if task.is_finished() => jobs.remove(&job.0),
                Some(_) => None,
            }
        };

        if let Some(task) = finished {
            return match task.await {
                Ok(Ok(images)) => Ok(JobPoll::Done(images)),
                Ok(Err(e)) => Err(e.into()),
                Err(e) => Err(BackendError::Request(format!("job task failed: {e}"))),
            };
        }

        let progress = self.api.progress().await?;
        Ok(JobPoll::Running {
            percent: progress.percent(),
            eta_secs: progress.eta_secs(),
        })
    }

    async fn cancel(&self, job: JobHandle) -> Result<(), BackendError> {
        let task = self
            .jobs
            .lock()
            .await
            .remove(&job.0)
            .ok_or(BackendError::UnknownJob(job.0))?;
        if task.is_finished() {
            return Ok(());
        }

        // Abort first so no follow-up request (e.g. the upscale pass) is
        // sent after the interrupt.
        task.abort();
        self.api.interrupt().await?;
        tracing::info!(job = %job, "Backend job interrupted");
        Ok(())
    }
}

/// `photo.jpg` becomes `photo-upscaled.png`.
fn upscaled_filename(source: &str) -> String {
    let stem = source
        .rsplit_once('.')
        .map_or(source, |(stem, _)| stem)
        .trim();
    if stem.is_empty() {
        "upscaled.png".to_string()
    } else {
        format!("{stem}-upscaled.png")
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn upscaled_filename_replaces_extension() {
        assert_eq!(upscaled_filename("photo.jpg"), "photo-upscaled.png");
        assert_eq!(upscaled_filename("a.b.webp"), "a.b-upscaled.png");
        assert_eq!(upscaled_filename("noext"), "noext-upscaled.png");
        assert_eq!(upscaled_filename(""), "upscaled.png");
    }

    #[tokio::test]
    async fn unknown_handles_are_rejected() {
        // Port 9 (discard) is never contacted: both calls fail before any I/O.
        let backend = SdBackend::new(SdApi::new("http://127.0.0.1:9"));
        assert_matches!(
            backend.poll(JobHandle(42)).await,
            Err(BackendError::UnknownJob(42))
        );
        assert_matches!(
            backend.cancel(JobHandle(7)).await,
            Err(BackendError::UnknownJob(7))
        );
    }

    #[tokio::test]
    async fn cancel_aborts_the_tracked_task() {
        let backend = SdBackend::new(SdApi::new("http://127.0.0.1:9"));
        let ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&ran);
        let task: JobTask = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            flag.store(true, Ordering::SeqCst);
            Ok(Vec::new())
        });
        let handle = backend.track(task).await;

        // The interrupt cannot reach the web UI, but the task is gone anyway.
        assert_matches!(backend.cancel(handle).await, Err(BackendError::Request(_)));
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert!(!ran.load(Ordering::SeqCst));
        assert!(backend.jobs.lock().await.is_empty());
        assert_matches!(
            backend.poll(handle).await,
            Err(BackendError::UnknownJob(_))
        );
    }

    #[tokio::test]
    async fn finished_task_is_reported_once() {
        let backend = SdBackend::new(SdApi::new("http://127.0.0.1:9"));
        let task: JobTask = tokio::spawn(async { Ok(vec![ImageFile::new(vec![1], "x.png")]) });
        let handle = backend.track(task).await;
        while !backend.jobs.lock().await[&handle.0].is_finished() {
            tokio::task::yield_now().await;
        }

        assert_matches!(backend.poll(handle).await, Ok(JobPoll::Done(images)) => {
            assert_eq!(images.len(), 1);
        });
        assert_matches!(
            backend.poll(handle).await,
            Err(BackendError::UnknownJob(_))
        );
    }
}
