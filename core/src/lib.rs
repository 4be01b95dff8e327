/// Parley - message cache and optimistic send engine for chat clients
///
/// Keeps per-conversation message lists and a latest-message projection in
/// step while sends are applied locally first and reconciled with (or
/// rolled back against) the server afterwards.

pub mod error;
pub mod config;
pub mod chat_types;
pub mod ids;
pub mod timeline;
pub mod gateway;
pub mod fake_gateway;
pub mod message_cache;
pub mod projection;
pub mod coordinator;
pub mod directory;
pub mod blocklist;
pub mod client;
pub mod cli_app;

pub use error::{ChatError, Result};
pub use config::Config;
pub use client::ChatClient;
