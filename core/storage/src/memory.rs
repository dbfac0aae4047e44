//! In-memory object store for testing.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::provider::{BlobStore, ObjectMeta, ObjectQuery, FOLDER_MIME_TYPE};
use cardsafe_common::{Error, RemoteReason, Result};

/// In-memory storage entry.
#[derive(Debug, Clone)]
struct Entry {
    meta: ObjectMeta,
    data: Vec<u8>,
}

/// In-memory object store.
///
/// Useful for testing and development. All data is stored in memory and
/// lost on drop. Besides the [`BlobStore`] operations it exposes hooks to
/// simulate things that happen behind the vault's back: objects being
/// trashed or removed remotely, and transient outages.
pub struct MemoryBlobStore {
    entries: RwLock<HashMap<String, Entry>>,
    /// Insertion order, so listings are deterministic.
    order: RwLock<Vec<String>>,
    folders_created: AtomicUsize,
    pending_failures: AtomicUsize,
    /// Names whose writes are refused.
    read_only_names: RwLock<HashSet<String>>,
}

impl MemoryBlobStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            order: RwLock::new(Vec::new()),
            folders_created: AtomicUsize::new(0),
            pending_failures: AtomicUsize::new(0),
            read_only_names: RwLock::new(HashSet::new()),
        }
    }

    /// Number of folders created so far.
    pub fn folders_created(&self) -> usize {
        self.folders_created.load(Ordering::SeqCst)
    }

    /// Number of live (non-trashed) objects with the given name.
    pub async fn count_named(&self, name: &str) -> usize {
        self.entries
            .read()
            .await
            .values()
            .filter(|e| e.meta.name == name && !e.meta.trashed)
            .count()
    }

    /// Total number of objects, trashed ones included.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Check if the store holds no objects.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Move an object to the trash, as a user would from the store's UI.
    pub async fn trash(&self, id: &str) -> Result<()> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("Object not found: {}", id)))?;
        entry.meta.trashed = true;
        Ok(())
    }

    /// Remove an object without going through the vault.
    pub async fn remove_behind_back(&self, id: &str) {
        self.entries.write().await.remove(id);
        self.order.write().await.retain(|k| k != id);
    }

    /// Overwrite an object's body without going through the vault.
    pub async fn overwrite_raw(&self, id: &str, data: Vec<u8>) -> Result<()> {
        let mut entries = self.entries.write().await;
        let entry = entries
            .get_mut(id)
            .ok_or_else(|| Error::NotFound(format!("Object not found: {}", id)))?;
        entry.meta.size = Some(data.len() as u64);
        entry.data = data;
        Ok(())
    }

    /// Make the next `count` operations fail with a transient server error.
    pub fn fail_next(&self, count: usize) {
        self.pending_failures.store(count, Ordering::SeqCst);
    }

    /// Refuse every create or update of a file called `name`.
    pub async fn reject_writes_to(&self, name: &str) {
        self.read_only_names.write().await.insert(name.to_string());
    }

    async fn check_writable(&self, name: &str) -> Result<()> {
        if self.read_only_names.read().await.contains(name) {
            return Err(Error::remote(
                RemoteReason::PermissionDenied,
                format!("Write refused: {}", name),
            ));
        }
        Ok(())
    }

    fn check_outage(&self) -> Result<()> {
        let injected = self
            .pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(Error::remote(RemoteReason::Server, "injected outage"));
        }
        Ok(())
    }

    async fn require_folder(&self, id: &str) -> Result<()> {
        match self.entries.read().await.get(id) {
            Some(entry) if entry.meta.is_folder() && !entry.meta.trashed => Ok(()),
            Some(entry) if !entry.meta.is_folder() => {
                Err(Error::InvalidInput(format!("Parent is not a folder: {}", id)))
            }
            _ => Err(Error::NotFound(format!("Parent folder not found: {}", id))),
        }
    }

    async fn insert(&self, meta: ObjectMeta, data: Vec<u8>) -> ObjectMeta {
        let id = meta.id.clone();
        self.entries.write().await.insert(
            id.clone(),
            Entry {
                meta: meta.clone(),
                data,
            },
        );
        self.order.write().await.push(id);
        meta
    }
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn create_folder(&self, name: &str, parent: Option<&str>) -> Result<ObjectMeta> {
        self.check_outage()?;
        if let Some(parent) = parent {
            self.require_folder(parent).await?;
        }

        let meta = ObjectMeta {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            mime_type: FOLDER_MIME_TYPE.to_string(),
            parents: parent.map(|p| vec![p.to_string()]).unwrap_or_default(),
            size: None,
            modified: Some(Utc::now()),
            trashed: false,
        };
        self.folders_created.fetch_add(1, Ordering::SeqCst);
        Ok(self.insert(meta, Vec::new()).await)
    }

    async fn create_file(
        &self,
        name: &str,
        parent: &str,
        mime_type: &str,
        data: Vec<u8>,
    ) -> Result<ObjectMeta> {
        self.check_outage()?;
        self.check_writable(name).await?;
        self.require_folder(parent).await?;

        let meta = ObjectMeta {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            mime_type: mime_type.to_string(),
            parents: vec![parent.to_string()],
            size: Some(data.len() as u64),
            modified: Some(Utc::now()),
            trashed: false,
        };
        Ok(self.insert(meta, data).await)
    }

    async fn update_file(&self, id: &str, data: Vec<u8>) -> Result<ObjectMeta> {
        self.check_outage()?;
        let name = self.entries.read().await.get(id).map(|e| e.meta.name.clone());
        if let Some(name) = name {
            self.check_writable(&name).await?;
        }
        let mut entries = self.entries.write().await;
        match entries.get_mut(id) {
            Some(entry) if entry.meta.is_folder() => {
                Err(Error::InvalidInput("Cannot write to a folder".to_string()))
            }
            Some(entry) => {
                entry.meta.size = Some(data.len() as u64);
                entry.meta.modified = Some(Utc::now());
                entry.data = data;
                Ok(entry.meta.clone())
            }
            None => Err(Error::NotFound(format!("File not found: {}", id))),
        }
    }

    async fn read_file(&self, id: &str) -> Result<Vec<u8>> {
        self.check_outage()?;
        match self.entries.read().await.get(id) {
            Some(entry) if entry.meta.is_folder() => {
                Err(Error::InvalidInput("Cannot download a folder".to_string()))
            }
            Some(entry) => Ok(entry.data.clone()),
            None => Err(Error::NotFound(format!("File not found: {}", id))),
        }
    }

    async fn get(&self, id: &str) -> Result<ObjectMeta> {
        self.check_outage()?;
        self.entries
            .read()
            .await
            .get(id)
            .map(|e| e.meta.clone())
            .ok_or_else(|| Error::NotFound(format!("Object not found: {}", id)))
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.check_outage()?;
        let removed = self.entries.write().await.remove(id);
        match removed {
            Some(_) => {
                self.order.write().await.retain(|k| k != id);
                Ok(())
            }
            None => Err(Error::NotFound(format!("Object not found: {}", id))),
        }
    }

    async fn query(&self, query: &ObjectQuery) -> Result<Vec<ObjectMeta>> {
        self.check_outage()?;
        let entries = self.entries.read().await;
        let order = self.order.read().await;
        Ok(order
            .iter()
            .filter_map(|id| entries.get(id))
            .filter(|e| query.matches(&e.meta))
            .map(|e| e.meta.clone())
            .collect())
    }
}
