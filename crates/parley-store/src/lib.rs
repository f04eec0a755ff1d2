//! # parley-store
//!
//! Durable state for the parley chat service, backed by SQLite.
//!
//! The crate exposes a synchronous [`Database`] handle that wraps a
//! `rusqlite::Connection` and provides typed helpers for conversation logs,
//! mute records and the upload quota ledger.  Conversation logs are always
//! rewritten inside a single transaction so a failed write never leaves a
//! partially replaced log behind.

pub mod conversations;
pub mod database;
pub mod migrations;
pub mod models;
pub mod mutes;
pub mod quotas;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;
