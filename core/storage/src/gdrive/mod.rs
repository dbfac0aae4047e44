//! Google Drive backend.
//!
//! - [`DriveClient`] implements [`BlobStore`](crate::BlobStore) over Drive v3
//! - Credentials come from a [`TokenSource`]; sign-in and refresh are external
//! - [`check_granted_scopes`] rejects tokens whose scope list is unknown

pub mod client;
pub mod token;

pub use client::{DriveClient, DriveConfig, DriveFile};
pub use token::{check_granted_scopes, StaticToken, TokenSource, DRIVE_FILE_SCOPE, DRIVE_SCOPE};
