//! Sequential job scheduler.
//!
//! [`JobQueue`] owns a FIFO of pending requests and a single worker task
//! that runs them one at a time against a [`GenerationBackend`], reporting
//! progress and results through a [`ReplySink`].
//!
//! [`GenerationBackend`]: sdbot_core::backend::GenerationBackend
//! [`ReplySink`]: sdbot_core::reply::ReplySink

pub mod config;
pub mod entry;
pub mod events;
pub mod queue;

mod progress;

pub use config::QueueConfig;
pub use entry::{EntryId, QueueRequest};
pub use events::{EntryState, QueueEvent};
pub use queue::{Enqueued, JobQueue, QueueError};
