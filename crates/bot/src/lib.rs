//! Chat front end: configuration, access control and command routing.

pub mod access;
pub mod commands;
pub mod config;
pub mod router;
