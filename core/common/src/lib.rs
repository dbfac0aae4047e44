//! Common utilities and types shared across Cardsafe crates.
//!
//! This module provides the error taxonomy every layer reports through and
//! the small value types (record identifiers, secret buffers) that cross
//! crate boundaries.

pub mod error;
pub mod types;

pub use error::{Error, RemoteReason, Result};
pub use types::{RecordId, SecretBytes};
