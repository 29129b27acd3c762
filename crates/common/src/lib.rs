//! Shared error definitions used across all botgate crates.

pub mod error;

pub use error::{Error, FromMessage, Result};
