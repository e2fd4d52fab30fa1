//! The generation backend seam.
//!
//! [`Catalog`] covers the read-only name lists the parser validates
//! against; [`GenerationBackend`] adds job submission, polling and
//! cancellation for the scheduler.

use std::fmt;

use async_trait::async_trait;

use crate::error::BackendError;
use crate::job::{RenderParams, UpscaleParams};
use crate::types::ImageFile;

/// The name lists a backend reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CatalogKind {
    Models,
    Samplers,
    Embeddings,
    Loras,
    Upscalers,
    Vaes,
}

impl CatalogKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Models => "models",
            Self::Samplers => "samplers",
            Self::Embeddings => "embeddings",
            Self::Loras => "loras",
            Self::Upscalers => "upscalers",
            Self::Vaes => "vaes",
        }
    }

    /// Name of a single catalog member, used in validation messages.
    pub fn singular(&self) -> &'static str {
        match self {
            Self::Models => "model",
            Self::Samplers => "sampler",
            Self::Embeddings => "embedding",
            Self::Loras => "LoRA",
            Self::Upscalers => "upscaler",
            Self::Vaes => "VAE",
        }
    }
}

impl fmt::Display for CatalogKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque reference to a job submitted to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobHandle(pub u64);

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Result of polling a submitted job.
#[derive(Debug, Clone, PartialEq)]
pub enum JobPoll {
    /// Still executing.
    Running {
        /// Completion percentage (0-100).
        percent: u8,
        /// Estimated seconds remaining, if the backend reports it.
        eta_secs: Option<f64>,
    },
    /// Finished; carries every produced image in output order.
    Done(Vec<ImageFile>),
}

/// Live name catalogs of a backend.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Fetch the current list of names for `kind`, in backend order.
    async fn list(&self, kind: CatalogKind) -> Result<Vec<String>, BackendError>;

    async fn models(&self) -> Result<Vec<String>, BackendError> {
        self.list(CatalogKind::Models).await
    }

    async fn samplers(&self) -> Result<Vec<String>, BackendError> {
        self.list(CatalogKind::Samplers).await
    }

    async fn embeddings(&self) -> Result<Vec<String>, BackendError> {
        self.list(CatalogKind::Embeddings).await
    }

    async fn loras(&self) -> Result<Vec<String>, BackendError> {
        self.list(CatalogKind::Loras).await
    }

    async fn upscalers(&self) -> Result<Vec<String>, BackendError> {
        self.list(CatalogKind::Upscalers).await
    }

    async fn vaes(&self) -> Result<Vec<String>, BackendError> {
        self.list(CatalogKind::Vaes).await
    }
}

/// A single-capacity image generation backend.
///
/// The scheduler guarantees at most one submitted job is in flight.
#[async_trait]
pub trait GenerationBackend: Catalog {
    /// Start a text-to-image job.
    async fn submit_render(&self, params: &RenderParams) -> Result<JobHandle, BackendError>;

    /// Start an upscale job for `image`.
    async fn submit_upscale(
        &self,
        params: &UpscaleParams,
        image: ImageFile,
    ) -> Result<JobHandle, BackendError>;

    /// Report progress, or the produced images once the job finished.
    ///
    /// After `Done` (or an error) the handle is released.
    async fn poll(&self, job: JobHandle) -> Result<JobPoll, BackendError>;

    /// Ask the backend to abort the job. The handle is released.
    async fn cancel(&self, job: JobHandle) -> Result<(), BackendError>;
}
