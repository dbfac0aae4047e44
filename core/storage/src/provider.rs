//! Object store trait definition.
//!
//! `BlobStore` is the capability set the vault needs from a remote
//! authenticated object store: folders containing named files with a MIME
//! type and opaque bytes. It is deliberately not shaped after any one
//! vendor's API.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cardsafe_common::Result;

/// MIME type used for folders.
pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

/// Metadata for a stored object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    /// Unique identifier for the object (store-specific).
    pub id: String,
    /// Name of the object within its folder.
    pub name: String,
    /// MIME type.
    pub mime_type: String,
    /// Parent folder IDs.
    pub parents: Vec<String>,
    /// Size in bytes (None for folders).
    pub size: Option<u64>,
    /// Last modification time.
    pub modified: Option<DateTime<Utc>>,
    /// Whether the object sits in the store's trash.
    pub trashed: bool,
}

impl ObjectMeta {
    /// Check if this is a folder.
    pub fn is_folder(&self) -> bool {
        self.mime_type == FOLDER_MIME_TYPE
    }
}

/// Filter for [`BlobStore::query`].
///
/// All set conditions must hold. Trashed objects are excluded unless
/// `include_trashed` is set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectQuery {
    /// Exact name match.
    pub name: Option<String>,
    /// Name prefix match.
    pub name_prefix: Option<String>,
    /// Direct parent folder. `None` means anywhere.
    pub parent: Option<String>,
    /// Only objects at the top level of the store. Objects without parents
    /// count as top level here; stores with a named root folder translate
    /// this themselves.
    pub top_level: bool,
    /// Only folders (`Some(true)`), only files (`Some(false)`) or both.
    pub folders: Option<bool>,
    /// Include trashed objects.
    pub include_trashed: bool,
}

impl ObjectQuery {
    /// Query everything directly inside `parent`.
    pub fn in_folder(parent: impl Into<String>) -> Self {
        Self {
            parent: Some(parent.into()),
            ..Self::default()
        }
    }

    /// Restrict to an exact name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Restrict to a name prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_prefix = Some(prefix.into());
        self
    }

    /// Query everything at the top level of the store.
    pub fn at_top_level() -> Self {
        Self {
            top_level: true,
            ..Self::default()
        }
    }

    /// Restrict to folders only.
    pub fn folders_only(mut self) -> Self {
        self.folders = Some(true);
        self
    }

    /// Restrict to files only.
    pub fn files_only(mut self) -> Self {
        self.folders = Some(false);
        self
    }

    /// Check whether `meta` satisfies this query.
    ///
    /// Stores whose native query language is looser than ours (e.g. token
    /// matching instead of true prefix matching) run this over their results.
    pub fn matches(&self, meta: &ObjectMeta) -> bool {
        if meta.trashed && !self.include_trashed {
            return false;
        }
        if let Some(name) = &self.name {
            if &meta.name != name {
                return false;
            }
        }
        if let Some(prefix) = &self.name_prefix {
            if !meta.name.starts_with(prefix.as_str()) {
                return false;
            }
        }
        if let Some(parent) = &self.parent {
            if !meta.parents.iter().any(|p| p == parent) {
                return false;
            }
        }
        if self.top_level && !meta.parents.is_empty() {
            return false;
        }
        if let Some(folders) = self.folders {
            if meta.is_folder() != folders {
                return false;
            }
        }
        true
    }
}

/// Remote object store used for persistence.
///
/// Implementations attach their own credentials and must surface failures
/// as `RemoteUnavailable` (with a reason) or `NotFound`; they never retry on
/// their own. Timeouts are whatever the transport enforces.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Get the store name (e.g., "gdrive", "memory").
    fn name(&self) -> &str;

    /// Create a folder.
    ///
    /// `parent` of `None` places the folder at the top level of the store.
    async fn create_folder(&self, name: &str, parent: Option<&str>) -> Result<ObjectMeta>;

    /// Create a file with the given body.
    ///
    /// # Errors
    /// - `NotFound` if the parent folder does not exist
    async fn create_file(
        &self,
        name: &str,
        parent: &str,
        mime_type: &str,
        data: Vec<u8>,
    ) -> Result<ObjectMeta>;

    /// Replace the body of an existing file.
    ///
    /// # Errors
    /// - `NotFound` if the file does not exist
    async fn update_file(&self, id: &str, data: Vec<u8>) -> Result<ObjectMeta>;

    /// Download the body of a file.
    async fn read_file(&self, id: &str) -> Result<Vec<u8>>;

    /// Get metadata for an object (trashed objects included).
    async fn get(&self, id: &str) -> Result<ObjectMeta>;

    /// Permanently delete an object.
    ///
    /// # Errors
    /// - `NotFound` if the object is already gone
    async fn delete(&self, id: &str) -> Result<()>;

    /// List objects matching `query`. Zero matches is `Ok(vec![])`.
    async fn query(&self, query: &ObjectQuery) -> Result<Vec<ObjectMeta>>;
}
