//! # parley-server
//!
//! Message persistence and abuse control for one-to-one chat.
//!
//! - **Conversation logs** in SQLite with a write-through cache, bounded by
//!   age and count
//! - **Attachment area** on disk, kept consistent with the logs by ghost and
//!   orphan sweeps
//! - **Rate limiting** with escalating, durable mutes
//! - **Upload quotas** per tier with per-category cooldowns
//!
//! [`service::ChatService`] is the entry point; transports call into it and
//! register live connections through [`connections::ConnectionRegistry`].

pub mod abuse;
pub mod attachments;
pub mod config;
pub mod connections;
pub mod conversations;
pub mod db;
pub mod directory;
pub mod error;
pub mod locks;
pub mod maintenance;
pub mod mutes;
pub mod quota;
pub mod reconcile;
pub mod service;

pub use config::ServerConfig;
pub use error::{Denial, ServiceError};
pub use service::ChatService;
