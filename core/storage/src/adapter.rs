//! Envelope persistence on top of a [`BlobStore`].
//!
//! The adapter knows the folder layout and the naming convention; it does
//! not know what is inside an envelope. Every remote call goes through the
//! adapter's [`RetryPolicy`], so only transient failures are retried.

use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::batch::{BatchReport, DeleteOutcome};
use crate::layout::{is_stale, resolve, FolderLayout, FolderNames};
use crate::naming::{record_prefix, FolderKind, ObjectKey};
use crate::provider::{BlobStore, ObjectMeta, ObjectQuery};
use crate::retry::RetryPolicy;
use cardsafe_common::{Error, RecordId, Result};
use cardsafe_crypto::Envelope;

/// Reads and writes envelopes under the vault's folder layout.
#[derive(Clone)]
pub struct BlobStoreAdapter {
    store: Arc<dyn BlobStore>,
    names: FolderNames,
    retry: RetryPolicy,
}

impl BlobStoreAdapter {
    /// Create an adapter with the default retry policy.
    pub fn new(store: Arc<dyn BlobStore>, names: FolderNames) -> Self {
        Self {
            store,
            names,
            retry: RetryPolicy::default(),
        }
    }

    /// Replace the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<dyn BlobStore> {
        &self.store
    }

    /// Configured folder names.
    pub fn names(&self) -> &FolderNames {
        &self.names
    }

    /// Resolve the folder layout, creating missing folders.
    pub async fn resolve(&self) -> Result<FolderLayout> {
        let store = self.store.as_ref();
        let names = &self.names;
        let layout = self
            .retry
            .run("resolve", move || resolve(store, names))
            .await?;
        debug!(root = %layout.root, "Folder layout resolved");
        Ok(layout)
    }

    /// Check whether `layout` refers to folders that are gone or trashed.
    pub async fn is_stale(&self, layout: &FolderLayout) -> Result<bool> {
        let store = self.store.as_ref();
        self.retry
            .run("is_stale", move || is_stale(store, layout))
            .await
    }

    /// Write `envelope` as a new object.
    ///
    /// Does not check for an existing object of the same name; use
    /// [`upsert`](Self::upsert) for that.
    pub async fn create(
        &self,
        layout: &FolderLayout,
        key: &ObjectKey,
        envelope: &Envelope,
    ) -> Result<ObjectMeta> {
        let data = envelope.to_bytes()?;
        self.create_bytes(layout, key, data).await
    }

    /// Replace the body of object `id` with `envelope`.
    pub async fn update(&self, id: &str, envelope: &Envelope) -> Result<ObjectMeta> {
        let data = envelope.to_bytes()?;
        let store = self.store.as_ref();
        let meta = self
            .retry
            .run("update", move || store.update_file(id, data.clone()))
            .await?;
        debug!(id, bytes = meta.size.unwrap_or_default(), "Object updated");
        Ok(meta)
    }

    /// Write `envelope` under `key`, overwriting an existing object of the
    /// same name or creating one.
    pub async fn upsert(
        &self,
        layout: &FolderLayout,
        key: &ObjectKey,
        envelope: &Envelope,
    ) -> Result<ObjectMeta> {
        let data = envelope.to_bytes()?;

        if let Some(existing) = self.find(layout, key).await? {
            let store = self.store.as_ref();
            let id = existing.id.as_str();
            let body = &data;
            match self
                .retry
                .run("upsert", move || store.update_file(id, body.clone()))
                .await
            {
                Ok(meta) => {
                    debug!(object = %key, id, "Object overwritten");
                    return Ok(meta);
                }
                // Removed between lookup and write.
                Err(Error::NotFound(_)) => {
                    debug!(object = %key, id, "Object vanished during upsert, recreating");
                }
                Err(e) => return Err(e),
            }
        }

        self.create_bytes(layout, key, data).await
    }

    /// Read and parse the envelope stored in object `id`.
    pub async fn read(&self, id: &str) -> Result<Envelope> {
        let store = self.store.as_ref();
        let data = self
            .retry
            .run("read", move || store.read_file(id))
            .await?;
        debug!(id, bytes = data.len(), "Object read");
        Envelope::from_bytes(&data)
    }

    /// Look up the object stored under `key`.
    ///
    /// When duplicates exist the earliest listed one is returned.
    pub async fn find(&self, layout: &FolderLayout, key: &ObjectKey) -> Result<Option<ObjectMeta>> {
        let query = ObjectQuery::in_folder(layout.folder(key.folder()))
            .named(key.file_name())
            .files_only();
        let found = self.query(&query).await?;
        if found.len() > 1 {
            warn!(object = %key, count = found.len(), "Duplicate objects found, using the first");
        }
        Ok(found.into_iter().next())
    }

    /// Read the envelope stored under `key`.
    ///
    /// # Errors
    /// - `NotFound` if no such object exists
    pub async fn read_named(&self, layout: &FolderLayout, key: &ObjectKey) -> Result<Envelope> {
        let meta = self
            .find(layout, key)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Object not found: {}", key)))?;
        self.read(&meta.id).await
    }

    /// Permanently delete object `id`.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let store = self.store.as_ref();
        self.retry.run("delete", move || store.delete(id)).await?;
        debug!(id, "Object deleted");
        Ok(())
    }

    /// List files in one subfolder, optionally restricted to a name prefix.
    pub async fn list(
        &self,
        layout: &FolderLayout,
        kind: FolderKind,
        prefix: Option<&str>,
    ) -> Result<Vec<ObjectMeta>> {
        let mut query = ObjectQuery::in_folder(layout.folder(kind)).files_only();
        if let Some(prefix) = prefix {
            query = query.with_prefix(prefix);
        }
        self.query(&query).await
    }

    /// List record objects, attachments excluded.
    pub async fn list_records(&self, layout: &FolderLayout) -> Result<Vec<(RecordId, ObjectMeta)>> {
        let objects = self.list(layout, FolderKind::Records, None).await?;
        Ok(objects
            .into_iter()
            .filter_map(|meta| match ObjectKey::parse(&meta.name) {
                Some(ObjectKey::Record(id)) => Some((id, meta)),
                _ => None,
            })
            .collect())
    }

    /// Every object belonging to record `id`: the record and its attachments.
    pub async fn find_record_objects(
        &self,
        layout: &FolderLayout,
        id: &RecordId,
    ) -> Result<Vec<ObjectMeta>> {
        let prefix = record_prefix(id);
        self.list(layout, FolderKind::Records, Some(&prefix)).await
    }

    /// Delete many objects concurrently.
    ///
    /// Every delete runs to completion; one failure does not stop the
    /// others. Outcomes are reported in the order of `ids`.
    pub async fn delete_many(&self, ids: Vec<String>) -> BatchReport<String> {
        let outcomes = join_all(ids.iter().map(|id| self.delete(id))).await;
        let report = BatchReport::new(
            ids.into_iter()
                .zip(outcomes.into_iter().map(DeleteOutcome::from_result))
                .collect(),
        );
        debug!(
            deleted = report.succeeded(),
            not_found = report.not_found(),
            failed = report.failed(),
            "Batch delete finished"
        );
        report
    }

    async fn create_bytes(
        &self,
        layout: &FolderLayout,
        key: &ObjectKey,
        data: Vec<u8>,
    ) -> Result<ObjectMeta> {
        let store = self.store.as_ref();
        let name = key.file_name();
        let name = name.as_str();
        let parent = layout.folder(key.folder());
        let mime_type = key.mime_type();
        let body = &data;
        let meta = self
            .retry
            .run("create", move || {
                store.create_file(name, parent, mime_type, body.clone())
            })
            .await?;
        debug!(object = %key, id = %meta.id, bytes = data.len(), "Object created");
        Ok(meta)
    }

    async fn query(&self, query: &ObjectQuery) -> Result<Vec<ObjectMeta>> {
        let store = self.store.as_ref();
        self.retry.run("query", move || store.query(query)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBlobStore;
    use crate::naming::AttachmentSlot;
    use cardsafe_crypto::{Iv, Salt};
    use std::time::Duration;

    fn envelope(byte: u8) -> Envelope {
        Envelope {
            iv: Iv::generate(),
            salt: Salt::generate(),
            ciphertext: vec![byte; 8],
            auth_tag: [byte; 16],
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::new(2)
            .with_initial_delay(Duration::from_millis(1))
            .with_jitter(false)
    }

    async fn setup() -> (Arc<MemoryBlobStore>, BlobStoreAdapter, FolderLayout) {
        let store = Arc::new(MemoryBlobStore::new());
        let adapter =
            BlobStoreAdapter::new(store.clone(), FolderNames::default()).with_retry(fast_retry());
        let layout = adapter.resolve().await.unwrap();
        (store, adapter, layout)
    }

    #[tokio::test]
    async fn test_create_then_read() {
        let (_, adapter, layout) = setup().await;
        let key = ObjectKey::Record(RecordId::new());
        let env = envelope(1);

        let meta = adapter.create(&layout, &key, &env).await.unwrap();
        assert_eq!(meta.name, key.file_name());
        assert_eq!(meta.parents, vec![layout.records.clone()]);
        assert_eq!(adapter.read(&meta.id).await.unwrap(), env);
    }

    #[tokio::test]
    async fn test_upsert_overwrites_singleton() {
        let (store, adapter, layout) = setup().await;

        let first = adapter.upsert(&layout, &ObjectKey::Preferences, &envelope(1)).await.unwrap();
        let second = adapter.upsert(&layout, &ObjectKey::Preferences, &envelope(2)).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(store.count_named("preferences.json").await, 1);
        let stored = adapter.read_named(&layout, &ObjectKey::Preferences).await.unwrap();
        assert_eq!(stored.ciphertext, vec![2; 8]);
    }

    #[tokio::test]
    async fn test_read_named_missing_is_not_found() {
        let (_, adapter, layout) = setup().await;
        let result = adapter.read_named(&layout, &ObjectKey::Index).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_read_garbage_is_malformed() {
        let (store, adapter, layout) = setup().await;
        let meta = adapter.create(&layout, &ObjectKey::Index, &envelope(1)).await.unwrap();
        store.overwrite_raw(&meta.id, b"not an envelope".to_vec()).await.unwrap();

        assert!(matches!(
            adapter.read(&meta.id).await,
            Err(Error::MalformedEnvelope(_))
        ));
    }

    #[tokio::test]
    async fn test_list_empty_folder() {
        let (_, adapter, layout) = setup().await;
        let listed = adapter.list(&layout, FolderKind::Records, None).await.unwrap();
        assert!(listed.is_empty());
    }

    #[tokio::test]
    async fn test_record_objects_share_prefix() {
        let (_, adapter, layout) = setup().await;
        let id = RecordId::new();
        let other = RecordId::new();

        adapter.create(&layout, &ObjectKey::Record(id), &envelope(1)).await.unwrap();
        adapter
            .create(&layout, &ObjectKey::Attachment(id, AttachmentSlot::Primary), &envelope(2))
            .await
            .unwrap();
        adapter
            .create(
                &layout,
                &ObjectKey::Attachment(id, AttachmentSlot::Thumbnail { size: 128 }),
                &envelope(3),
            )
            .await
            .unwrap();
        adapter.create(&layout, &ObjectKey::Record(other), &envelope(4)).await.unwrap();

        assert_eq!(adapter.find_record_objects(&layout, &id).await.unwrap().len(), 3);

        let records: Vec<RecordId> = adapter
            .list_records(&layout)
            .await
            .unwrap()
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(records, vec![id, other]);
    }

    #[tokio::test]
    async fn test_batch_delete_reports_every_outcome() {
        let (store, adapter, layout) = setup().await;
        let mut ids = Vec::new();
        for byte in 0..3 {
            let key = ObjectKey::Record(RecordId::new());
            ids.push(adapter.create(&layout, &key, &envelope(byte)).await.unwrap().id);
        }
        store.remove_behind_back(&ids[1]).await;

        let report = adapter.delete_many(ids.clone()).await;

        assert_eq!(report.succeeded(), 2);
        assert_eq!(report.not_found(), 1);
        assert_eq!(report.failed(), 0);
        assert!(matches!(report.outcome(&ids[1]), Some(DeleteOutcome::NotFound)));
        let order: Vec<&String> = report.outcomes.iter().map(|(id, _)| id).collect();
        assert_eq!(order, ids.iter().collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_batch_delete_does_not_short_circuit() {
        let (store, adapter, layout) = setup().await;
        let adapter = adapter.with_retry(RetryPolicy::none());
        let mut ids = Vec::new();
        for byte in 0..3 {
            let key = ObjectKey::Record(RecordId::new());
            ids.push(adapter.create(&layout, &key, &envelope(byte)).await.unwrap().id);
        }

        store.fail_next(1);
        let report = adapter.delete_many(ids).await;

        assert_eq!(report.failed(), 1);
        assert_eq!(report.succeeded(), 2);
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let (store, adapter, layout) = setup().await;
        let meta = adapter.create(&layout, &ObjectKey::Index, &envelope(7)).await.unwrap();

        store.fail_next(2);
        assert_eq!(adapter.read(&meta.id).await.unwrap().ciphertext, vec![7; 8]);
    }

    #[tokio::test]
    async fn test_write_into_deleted_folder_is_not_found() {
        let (store, adapter, layout) = setup().await;
        store.remove_behind_back(&layout.records).await;

        let result = adapter
            .create(&layout, &ObjectKey::Record(RecordId::new()), &envelope(1))
            .await;
        assert!(matches!(result, Err(Error::NotFound(_))));
        assert!(adapter.is_stale(&layout).await.unwrap());
    }
}
