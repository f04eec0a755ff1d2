//! # parley-shared
//!
//! Identifiers, domain enums and limits shared by the parley store and
//! server crates.

pub mod constants;
pub mod error;
pub mod types;

pub use error::IdError;
pub use types::*;
