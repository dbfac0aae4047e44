//! Object store access for Cardsafe.
//!
//! This crate provides a trait-based interface over a remote object store
//! and the vault's persistence conventions on top of it.
//!
//! # Design Principles
//! - Store isolation: no vendor-specific logic outside `gdrive`
//! - Explicit layout: resolved folder ids are a value the caller holds
//! - Async operations: all I/O is async
//! - Unified error semantics: `NotFound` or `RemoteUnavailable` with a reason

pub mod adapter;
pub mod batch;
pub mod gdrive;
pub mod layout;
pub mod memory;
pub mod naming;
pub mod provider;
pub mod retry;

pub use adapter::BlobStoreAdapter;
pub use batch::{BatchReport, DeleteOutcome};
pub use gdrive::{check_granted_scopes, DriveClient, DriveConfig, StaticToken, TokenSource};
pub use layout::{FolderLayout, FolderNames};
pub use memory::MemoryBlobStore;
pub use naming::{AttachmentSlot, FolderKind, ObjectKey};
pub use provider::{BlobStore, ObjectMeta, ObjectQuery};
pub use retry::RetryPolicy;
