//! Stable Diffusion web UI (AUTOMATIC1111) REST client.
//!
//! Provides typed request/response messages, a thin HTTP wrapper over the
//! `/sdapi/v1` endpoints, and [`backend::SdBackend`], which implements the
//! generation backend seam on top of them.

pub mod api;
pub mod backend;
pub mod messages;

pub use api::{SdApi, SdApiError};
pub use backend::SdBackend;
