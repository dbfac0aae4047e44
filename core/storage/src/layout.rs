//! Folder layout resolution.
//!
//! A vault lives in one root folder with three fixed subfolders. The
//! resolved identifiers are returned as an explicit [`FolderLayout`] value
//! that callers hold on to and pass back in, instead of a process-wide cache.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::naming::FolderKind;
use crate::provider::{BlobStore, ObjectMeta, ObjectQuery};
use cardsafe_common::{Error, Result};

/// Names of the vault folders in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FolderNames {
    pub root: String,
    pub records: String,
    pub index: String,
    pub preferences: String,
}

impl Default for FolderNames {
    fn default() -> Self {
        Self {
            root: "Cardsafe".to_string(),
            records: "records".to_string(),
            index: "metadata".to_string(),
            preferences: "preferences".to_string(),
        }
    }
}

impl FolderNames {
    /// Check that all names are usable folder names.
    pub fn validate(&self) -> Result<()> {
        for (field, name) in [
            ("root", &self.root),
            ("records", &self.records),
            ("index", &self.index),
            ("preferences", &self.preferences),
        ] {
            if name.trim().is_empty() {
                return Err(Error::InvalidInput(format!(
                    "Folder name '{}' cannot be empty",
                    field
                )));
            }
            if name.contains('/') {
                return Err(Error::InvalidInput(format!(
                    "Folder name '{}' cannot contain '/'",
                    field
                )));
            }
        }
        Ok(())
    }
}

/// Resolved folder identifiers of one vault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderLayout {
    pub root: String,
    pub records: String,
    pub index: String,
    pub preferences: String,
}

impl FolderLayout {
    /// Folder id for a kind of object.
    pub fn folder(&self, kind: FolderKind) -> &str {
        match kind {
            FolderKind::Records => &self.records,
            FolderKind::Index => &self.index,
            FolderKind::Preferences => &self.preferences,
        }
    }

    /// All four folder ids, root first.
    pub fn ids(&self) -> [&str; 4] {
        [
            self.root.as_str(),
            self.records.as_str(),
            self.index.as_str(),
            self.preferences.as_str(),
        ]
    }
}

/// Find a folder by name under `parent`, creating it if absent.
///
/// A `parent` of `None` means the top level of the store; folders of the
/// same name nested elsewhere are not considered.
///
/// If the store already holds duplicates (e.g. from two devices racing on
/// first use) the earliest listed one wins.
pub async fn find_or_create_folder(
    store: &dyn BlobStore,
    name: &str,
    parent: Option<&str>,
) -> Result<ObjectMeta> {
    let query = match parent {
        Some(parent) => ObjectQuery::in_folder(parent),
        None => ObjectQuery::at_top_level(),
    }
    .named(name)
    .folders_only();

    let mut found = store.query(&query).await?;
    if found.len() > 1 {
        warn!(folder = name, count = found.len(), "Duplicate folders found, using the first");
    }
    if !found.is_empty() {
        let folder = found.swap_remove(0);
        debug!(folder = name, id = %folder.id, "Folder found");
        return Ok(folder);
    }

    let folder = store.create_folder(name, parent).await?;
    info!(folder = name, id = %folder.id, "Folder created");
    Ok(folder)
}

/// Resolve the vault's folder layout, creating missing folders.
///
/// # Postconditions
/// - Calling this twice in a row returns the same identifiers and creates
///   nothing the second time
pub async fn resolve(store: &dyn BlobStore, names: &FolderNames) -> Result<FolderLayout> {
    let root = find_or_create_folder(store, &names.root, None).await?;
    let records = find_or_create_folder(store, &names.records, Some(&root.id)).await?;
    let index = find_or_create_folder(store, &names.index, Some(&root.id)).await?;
    let preferences = find_or_create_folder(store, &names.preferences, Some(&root.id)).await?;

    Ok(FolderLayout {
        root: root.id,
        records: records.id,
        index: index.id,
        preferences: preferences.id,
    })
}

/// Check whether any folder of `layout` is gone or trashed.
pub async fn is_stale(store: &dyn BlobStore, layout: &FolderLayout) -> Result<bool> {
    for id in layout.ids() {
        match store.get(id).await {
            Ok(meta) if meta.trashed => return Ok(true),
            Ok(_) => {}
            Err(Error::NotFound(_)) => return Ok(true),
            Err(e) => return Err(e),
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBlobStore;

    #[tokio::test]
    async fn test_resolve_is_idempotent() {
        let store = MemoryBlobStore::new();
        let names = FolderNames::default();

        let first = resolve(&store, &names).await.unwrap();
        assert_eq!(store.folders_created(), 4);

        let second = resolve(&store, &names).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(store.folders_created(), 4);
    }

    #[tokio::test]
    async fn test_nested_folder_with_root_name_is_ignored() {
        let store = MemoryBlobStore::new();
        let personal = store.create_folder("Personal", None).await.unwrap();
        let nested = store.create_folder("Cardsafe", Some(&personal.id)).await.unwrap();

        let layout = resolve(&store, &FolderNames::default()).await.unwrap();

        assert_ne!(layout.root, nested.id);
        assert!(store.get(&layout.root).await.unwrap().parents.is_empty());
    }

    #[tokio::test]
    async fn test_subfolders_are_distinct_children_of_root() {
        let store = MemoryBlobStore::new();
        let layout = resolve(&store, &FolderNames::default()).await.unwrap();

        for id in [&layout.records, &layout.index, &layout.preferences] {
            let meta = store.get(id).await.unwrap();
            assert!(meta.is_folder());
            assert_eq!(meta.parents, vec![layout.root.clone()]);
        }
        assert_ne!(layout.records, layout.index);
        assert_ne!(layout.index, layout.preferences);
    }

    #[tokio::test]
    async fn test_stale_after_remote_delete() {
        let store = MemoryBlobStore::new();
        let names = FolderNames::default();
        let layout = resolve(&store, &names).await.unwrap();
        assert!(!is_stale(&store, &layout).await.unwrap());

        store.remove_behind_back(&layout.records).await;
        assert!(is_stale(&store, &layout).await.unwrap());

        let fresh = resolve(&store, &names).await.unwrap();
        assert_eq!(fresh.root, layout.root);
        assert_ne!(fresh.records, layout.records);
        assert!(!is_stale(&store, &fresh).await.unwrap());
    }

    #[tokio::test]
    async fn test_trashed_root_is_recreated() {
        let store = MemoryBlobStore::new();
        let names = FolderNames::default();
        let layout = resolve(&store, &names).await.unwrap();

        store.trash(&layout.root).await.unwrap();
        assert!(is_stale(&store, &layout).await.unwrap());

        let fresh = resolve(&store, &names).await.unwrap();
        assert_ne!(fresh.root, layout.root);
    }

    #[test]
    fn test_folder_names_validation() {
        assert!(FolderNames::default().validate().is_ok());
        let bad = FolderNames {
            records: " ".to_string(),
            ..FolderNames::default()
        };
        assert!(bad.validate().is_err());
    }
}
