//! Domain types shared by every `sdbot` crate.
//!
//! Holds the job specification ([`job::JobSpec`]), the flag parser that
//! builds it from chat text ([`params`]), deployment defaults, and the
//! two seams the scheduler talks through: [`backend::GenerationBackend`]
//! and [`reply::ReplySink`].

pub mod backend;
pub mod defaults;
pub mod error;
pub mod job;
pub mod params;
pub mod reply;
pub mod request;
pub mod types;
