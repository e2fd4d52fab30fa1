//! Telegram Bot API transport.
//!
//! [`TelegramApi`] wraps the HTTP methods the bot needs,
//! [`TelegramReplies`] adapts them to the core [`ReplySink`] seam, and
//! [`UpdatePoller`] long-polls `getUpdates` and hands each update to an
//! [`UpdateHandler`].
//!
//! [`ReplySink`]: sdbot_core::reply::ReplySink

pub mod api;
pub mod error;
pub mod poller;
pub mod replies;
pub mod types;

pub use api::TelegramApi;
pub use error::TelegramError;
pub use poller::{PollerConfig, UpdateHandler, UpdatePoller};
pub use replies::TelegramReplies;
