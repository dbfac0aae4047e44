//! Encrypted card vault for Cardsafe.
//!
//! This module provides:
//! - The record model and its canonical encoding
//! - A listing index and free-form preferences, both encrypted
//! - A time-bounded passphrase session
//! - The [`Vault`] facade over a remote object store
//!
//! # Architecture
//! The vault sits between the caller and a [`cardsafe_storage::BlobStore`].
//! Everything leaving the process is an envelope from `cardsafe-crypto`;
//! the store only ever sees ciphertext and object names.

pub mod codec;
pub mod config;
pub mod fingerprint;
pub mod index;
pub mod preferences;
pub mod record;
pub mod session;
pub mod vault;

pub use codec::RecordCodec;
pub use config::VaultSettings;
pub use fingerprint::{fingerprint, verify as verify_fingerprint, Fingerprint};
pub use index::{Index, IndexDiff, IndexEntry, INDEX_VERSION};
pub use preferences::Preferences;
pub use record::{AttachmentRef, Category, Record};
pub use session::{Clock, ManualClock, SessionCache, SessionState, SystemClock, DEFAULT_TTL};
pub use vault::{AttachmentState, LoadedRecord, RecordListing, Vault};
