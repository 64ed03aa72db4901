//! Graphrest HTTP transport
//!
//! A [`graphrest_core::Transport`] backed by `reqwest`:
//!
//! - paths are resolved against a configured base URL
//! - request and response bodies are JSON
//! - `404` and `204` resolve to `None` (soft not-found)
//! - other non-2xx statuses become [`graphrest_core::TransportError::Status`]
//!
//! Timeouts are enforced here; nothing is retried.

pub mod client;
pub mod config;

pub use client::{HttpSetupError, HttpTransport};
pub use config::HttpConfig;
