//! The vault: encrypted records in a remote object store.
//!
//! [`Vault`] wires the storage adapter, the codec and the session cache
//! together. Every operation that touches plaintext needs an unlocked
//! session; the passphrase is taken from the lease for the duration of the
//! call and dropped afterwards.

use futures::future::join_all;
use futures::stream::{self, StreamExt};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio::task;
use tracing::{debug, info, warn};

use crate::codec::RecordCodec;
use crate::config::VaultSettings;
use crate::index::{Index, IndexDiff};
use crate::preferences::Preferences;
use crate::record::Record;
use crate::session::{Clock, SessionCache, SystemClock};
use cardsafe_common::{Error, RecordId, Result, SecretBytes};
use cardsafe_crypto::Envelope;
use cardsafe_storage::{
    AttachmentSlot, BatchReport, BlobStore, BlobStoreAdapter, DeleteOutcome, FolderKind,
    FolderLayout, ObjectKey, ObjectMeta,
};

/// Minimum number of records refusing a passphrase before unlock rejects it.
const VERIFY_ATTEMPTS: usize = 3;

/// State of one attachment after a record load.
#[derive(Debug)]
pub enum AttachmentState {
    /// Decrypted attachment bytes.
    Available(Vec<u8>),
    /// The attachment could not be fetched or decrypted.
    Unavailable(Error),
}

impl AttachmentState {
    pub fn is_available(&self) -> bool {
        matches!(self, AttachmentState::Available(_))
    }

    pub fn bytes(&self) -> Option<&[u8]> {
        match self {
            AttachmentState::Available(data) => Some(data),
            AttachmentState::Unavailable(_) => None,
        }
    }
}

/// A record together with its attachments.
#[derive(Debug)]
pub struct LoadedRecord {
    pub record: Record,
    pub attachments: Vec<(AttachmentSlot, AttachmentState)>,
}

impl LoadedRecord {
    pub fn attachment(&self, slot: AttachmentSlot) -> Option<&AttachmentState> {
        self.attachments
            .iter()
            .find(|(s, _)| *s == slot)
            .map(|(_, state)| state)
    }
}

/// Result of listing all records.
///
/// Records that failed to load are reported next to the ones that did.
#[derive(Debug, Default)]
pub struct RecordListing {
    /// Loaded records, in store listing order.
    pub records: Vec<Record>,
    pub failures: Vec<(RecordId, Error)>,
}

/// An encrypted record vault.
pub struct Vault {
    adapter: BlobStoreAdapter,
    codec: RecordCodec,
    session: SessionCache,
    layout: RwLock<Option<FolderLayout>>,
    /// Held across every read-modify-write of the index object.
    index_lock: Mutex<()>,
    max_concurrency: usize,
}

impl Vault {
    /// Create a vault over `store`.
    ///
    /// Nothing is contacted until the first operation.
    pub fn new(store: Arc<dyn BlobStore>, settings: VaultSettings) -> Result<Self> {
        Self::with_clock(store, settings, Arc::new(SystemClock))
    }

    /// Create a vault whose session lease runs on `clock`.
    pub fn with_clock(
        store: Arc<dyn BlobStore>,
        settings: VaultSettings,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        settings.validate()?;

        let adapter = BlobStoreAdapter::new(store, settings.folders.clone())
            .with_retry(settings.retry.clone());
        let codec = RecordCodec::new(settings.kdf.clone())?;
        let session = SessionCache::with_clock(settings.session_ttl(), clock);

        Ok(Self {
            adapter,
            codec,
            session,
            layout: RwLock::new(None),
            index_lock: Mutex::new(()),
            max_concurrency: settings.max_concurrency,
        })
    }

    /// Start from an already known layout instead of resolving one.
    pub fn with_layout(mut self, layout: FolderLayout) -> Self {
        self.layout = RwLock::new(Some(layout));
        self
    }

    pub fn adapter(&self) -> &BlobStoreAdapter {
        &self.adapter
    }

    pub fn codec(&self) -> &RecordCodec {
        &self.codec
    }

    pub fn session(&self) -> &SessionCache {
        &self.session
    }

    /// Unlock with `passphrase`.
    ///
    /// The passphrase is checked against the index. When the index is
    /// missing or damaged it is checked against stored records instead, then
    /// preferences; a damaged index is rebuilt once the passphrase is
    /// confirmed. Only a vault with nothing stored accepts any passphrase.
    ///
    /// # Errors
    /// - `InvalidInput` for an empty passphrase
    /// - `Decryption` if the passphrase does not open the vault's objects
    pub async fn unlock(&self, passphrase: SecretBytes) -> Result<()> {
        if passphrase.is_empty() {
            return Err(Error::InvalidInput("Passphrase cannot be empty".to_string()));
        }

        let index_damaged = match self.read_index(&passphrase).await {
            Ok(index) => {
                debug!(entries = index.len(), "Passphrase verified against index");
                false
            }
            // Decoding only runs after authentication passed.
            Err(e @ Error::Serialization(_)) => {
                warn!(error = %e, "Index decrypted but not decodable");
                false
            }
            Err(Error::NotFound(_)) => {
                self.verify_against_objects(&passphrase).await?;
                false
            }
            Err(e @ (Error::Decryption | Error::MalformedEnvelope(_))) => {
                warn!(error = %e, "Index unusable, checking passphrase against records");
                self.verify_against_objects(&passphrase).await?;
                true
            }
            Err(e) => return Err(e),
        };

        if index_damaged {
            let _guard = self.index_lock.lock().await;
            if let Err(e) = self.rebuild_index_with(&passphrase).await {
                warn!(error = %e, "Damaged index could not be rebuilt");
            }
        }

        self.session.store(passphrase).await;
        info!("Vault unlocked");
        Ok(())
    }

    /// Forget the passphrase.
    pub async fn lock(&self) {
        self.session.clear().await;
        info!("Vault locked");
    }

    /// The folder layout, resolving it on first use.
    pub async fn layout(&self) -> Result<FolderLayout> {
        if let Some(layout) = self.layout.read().await.as_ref() {
            return Ok(layout.clone());
        }

        let mut slot = self.layout.write().await;
        if let Some(layout) = slot.as_ref() {
            return Ok(layout.clone());
        }
        let layout = self.adapter.resolve().await?;
        *slot = Some(layout.clone());
        Ok(layout)
    }

    /// Store `record`, overwriting a previous version.
    ///
    /// The index is updated afterwards; failing to do so is logged and does
    /// not fail the save.
    pub async fn save_record(&self, record: &Record) -> Result<ObjectMeta> {
        let passphrase = self.passphrase().await?;
        let sealed = record.clone();
        let envelope = self
            .crypto(&passphrase, move |codec, p| codec.encrypt_record(&sealed, p))
            .await?;
        let key = ObjectKey::Record(record.id);

        let envelope = &envelope;
        let meta = self
            .on_layout(|layout| async move { self.adapter.upsert(&layout, &key, envelope).await })
            .await?;
        info!(record = %record.id, category = %record.category, "Record saved");

        if let Err(e) = self.update_index(&passphrase, |index| index.upsert(record)).await {
            warn!(record = %record.id, error = %e, "Index update failed after save");
        }
        Ok(meta)
    }

    /// Load and decrypt one record.
    pub async fn load_record(&self, id: &RecordId) -> Result<Record> {
        let passphrase = self.passphrase().await?;
        self.read_record(id, &passphrase).await
    }

    /// Load a record and all the attachments it links.
    ///
    /// An attachment that cannot be read or decrypted is reported as
    /// [`AttachmentState::Unavailable`]; the record itself still loads.
    pub async fn load_record_with_attachments(&self, id: &RecordId) -> Result<LoadedRecord> {
        let passphrase = self.passphrase().await?;
        let record = self.read_record(id, &passphrase).await?;
        let passphrase = &passphrase;

        let loads = record.attachments.iter().map(|link| async move {
            let read = self
                .read_attachment(id, link.slot, link.object_id.as_deref(), passphrase)
                .await;
            let state = match read {
                Ok(data) => AttachmentState::Available(data),
                Err(e) => {
                    warn!(record = %id, slot = ?link.slot, error = %e, "Attachment unavailable");
                    AttachmentState::Unavailable(e)
                }
            };
            (link.slot, state)
        });
        let attachments = join_all(loads).await;

        Ok(LoadedRecord {
            record,
            attachments,
        })
    }

    /// Encrypt and store an attachment, then link it from `record` and save
    /// the record.
    pub async fn save_attachment(
        &self,
        record: &mut Record,
        slot: AttachmentSlot,
        data: &[u8],
    ) -> Result<ObjectMeta> {
        let passphrase = self.passphrase().await?;
        let plaintext = data.to_vec();
        let envelope = self
            .crypto(&passphrase, move |codec, p| codec.encrypt_attachment(&plaintext, p))
            .await?;
        let key = ObjectKey::Attachment(record.id, slot);

        let envelope = &envelope;
        let meta = self
            .on_layout(|layout| async move { self.adapter.upsert(&layout, &key, envelope).await })
            .await?;
        debug!(record = %record.id, slot = ?slot, bytes = data.len(), "Attachment stored");

        record.set_attachment(slot, meta.id.clone());
        record.touch();
        self.save_record(record).await?;
        Ok(meta)
    }

    /// Delete a record and every attachment object it owns.
    ///
    /// # Errors
    /// - `NotFound` if no object of the record exists
    pub async fn delete_record(&self, id: &RecordId) -> Result<()> {
        let mut report = self.delete_records(&[*id]).await?;
        match report.outcomes.pop().map(|(_, outcome)| outcome) {
            Some(DeleteOutcome::Deleted) => Ok(()),
            Some(DeleteOutcome::NotFound) | None => {
                Err(Error::NotFound(format!("Record not found: {}", id)))
            }
            Some(DeleteOutcome::Failed(e)) => Err(e),
        }
    }

    /// Delete several records concurrently.
    ///
    /// Each record gets its own outcome; one failure does not stop the rest.
    /// Entries of deleted or already missing records are removed from the
    /// index.
    pub async fn delete_records(&self, ids: &[RecordId]) -> Result<BatchReport<RecordId>> {
        let passphrase = self.passphrase().await?;
        let layout = self.layout().await?;
        let layout = &layout;

        let outcomes = join_all(ids.iter().map(|id| async move {
            (*id, self.delete_record_objects(layout, id).await)
        }))
        .await;
        let report = BatchReport::new(outcomes);

        let gone: Vec<RecordId> = report
            .outcomes
            .iter()
            .filter(|(_, outcome)| outcome.is_settled())
            .map(|(id, _)| *id)
            .collect();
        if !gone.is_empty() {
            let result = self
                .update_index(&passphrase, |index| {
                    for id in &gone {
                        index.remove(id);
                    }
                })
                .await;
            if let Err(e) = result {
                warn!(error = %e, "Index update failed after delete");
            }
        }

        info!(
            deleted = report.succeeded(),
            not_found = report.not_found(),
            failed = report.failed(),
            "Records deleted"
        );
        Ok(report)
    }

    /// Load every record in the store.
    ///
    /// Up to `max_concurrency` records are fetched and decrypted at once.
    pub async fn list_records(&self) -> Result<RecordListing> {
        let passphrase = self.passphrase().await?;
        let layout = self.layout().await?;
        let objects = self.adapter.list_records(&layout).await?;
        let passphrase = &passphrase;

        let mut loaded: Vec<(usize, RecordId, Result<Record>)> =
            stream::iter(objects.into_iter().enumerate())
                .map(|(position, (id, meta))| async move {
                    let result = match self.adapter.read(&meta.id).await {
                        Ok(envelope) => self
                            .open_record(envelope, passphrase)
                            .await
                            .and_then(|record| check_record_id(&id, record)),
                        Err(e) => Err(e),
                    };
                    (position, id, result)
                })
                .buffer_unordered(self.max_concurrency)
                .collect()
                .await;
        loaded.sort_by_key(|(position, _, _)| *position);

        let mut listing = RecordListing::default();
        for (_, id, result) in loaded {
            match result {
                Ok(record) => listing.records.push(record),
                Err(e) => {
                    warn!(record = %id, error = %e, "Record could not be loaded");
                    listing.failures.push((id, e));
                }
            }
        }
        debug!(
            loaded = listing.records.len(),
            failed = listing.failures.len(),
            "Records listed"
        );
        Ok(listing)
    }

    /// Load the index, `None` if it has never been written.
    pub async fn load_index(&self) -> Result<Option<Index>> {
        let passphrase = self.passphrase().await?;
        match self.read_index(&passphrase).await {
            Ok(index) => Ok(Some(index)),
            Err(Error::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Rebuild the index from the records in the store and save it.
    ///
    /// Records that fail to load, or whose content does not match their
    /// object name, are left out.
    ///
    /// # Errors
    /// - `Decryption` if no record opens and at least one refuses the
    ///   passphrase; nothing is written then
    pub async fn rebuild_index(&self) -> Result<Index> {
        let passphrase = self.passphrase().await?;
        let _guard = self.index_lock.lock().await;
        self.rebuild_index_with(&passphrase).await
    }

    /// Compare the index with the records actually stored.
    ///
    /// A missing index reports every stored record as missing.
    pub async fn index_diff(&self) -> Result<IndexDiff> {
        let index = self.load_index().await?.unwrap_or_default();
        let layout = self.layout().await?;
        let live: Vec<RecordId> = self
            .adapter
            .list_records(&layout)
            .await?
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        Ok(index.reconcile(&live))
    }

    /// Store preferences, overwriting the previous ones.
    pub async fn save_preferences(&self, preferences: &Preferences) -> Result<()> {
        let passphrase = self.passphrase().await?;
        let sealed = preferences.clone();
        let envelope = self
            .crypto(&passphrase, move |codec, p| codec.encrypt_preferences(&sealed, p))
            .await?;

        let envelope = &envelope;
        self.on_layout(|layout| async move {
            self.adapter
                .upsert(&layout, &ObjectKey::Preferences, envelope)
                .await
        })
        .await?;
        info!(keys = preferences.len(), "Preferences saved");
        Ok(())
    }

    /// Load preferences, `None` if none were ever saved.
    pub async fn load_preferences(&self) -> Result<Option<Preferences>> {
        let passphrase = self.passphrase().await?;
        let read = self
            .on_layout(|layout| async move {
                self.adapter.read_named(&layout, &ObjectKey::Preferences).await
            })
            .await;

        match read {
            Ok(envelope) => {
                let preferences = self
                    .crypto(&passphrase, move |codec, p| codec.decrypt_preferences(&envelope, p))
                    .await?;
                Ok(Some(preferences))
            }
            Err(Error::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Delete every record, attachment, index and preferences object.
    ///
    /// The folders themselves are kept.
    pub async fn reset(&self) -> Result<BatchReport<String>> {
        self.passphrase().await?;
        let layout = self.layout().await?;

        let mut ids = Vec::new();
        for kind in [FolderKind::Records, FolderKind::Index, FolderKind::Preferences] {
            ids.extend(
                self.adapter
                    .list(&layout, kind, None)
                    .await?
                    .into_iter()
                    .map(|meta| meta.id),
            );
        }

        let report = self.adapter.delete_many(ids).await;
        info!(
            deleted = report.succeeded(),
            not_found = report.not_found(),
            failed = report.failed(),
            "Vault reset"
        );
        Ok(report)
    }

    async fn passphrase(&self) -> Result<SecretBytes> {
        self.session.retrieve().await.ok_or(Error::Locked)
    }

    /// Run `job` on the blocking pool; every codec call derives a key.
    async fn crypto<T, F>(&self, passphrase: &SecretBytes, job: F) -> Result<T>
    where
        F: FnOnce(&RecordCodec, &SecretBytes) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let codec = self.codec.clone();
        let passphrase = passphrase.duplicate();
        task::spawn_blocking(move || job(&codec, &passphrase))
            .await
            .map_err(|e| Error::KeyDerivation(format!("Crypto task failed: {}", e)))?
    }

    async fn open_record(&self, envelope: Envelope, passphrase: &SecretBytes) -> Result<Record> {
        self.crypto(passphrase, move |codec, p| codec.decrypt_record(&envelope, p))
            .await
    }

    /// Check `passphrase` against stored records, or preferences when there
    /// are no records.
    ///
    /// One record that opens accepts the passphrase. It is rejected once at
    /// least [`VERIFY_ATTEMPTS`] records, and more than half of all stored
    /// records, refuse it, so a few tampered records cannot lock out the
    /// right passphrase. With nothing stored the check passes.
    async fn verify_against_objects(&self, passphrase: &SecretBytes) -> Result<()> {
        let layout = self.layout().await?;
        let objects = self.adapter.list_records(&layout).await?;
        let total = objects.len();

        let mut rejected = 0;
        for (id, meta) in objects {
            if rejected >= VERIFY_ATTEMPTS && rejected * 2 > total {
                break;
            }
            let opened = match self.adapter.read(&meta.id).await {
                Ok(envelope) => self.open_record(envelope, passphrase).await.map(|_| ()),
                Err(e) => Err(e),
            };
            match opened {
                Ok(()) | Err(Error::Serialization(_)) => {
                    debug!(record = %id, "Passphrase verified against record");
                    return Ok(());
                }
                Err(Error::Decryption) => rejected += 1,
                Err(e @ (Error::MalformedEnvelope(_) | Error::NotFound(_))) => {
                    warn!(record = %id, error = %e, "Record skipped in passphrase check");
                }
                Err(e) => return Err(e),
            }
        }
        if rejected > 0 {
            return Err(Error::Decryption);
        }

        let read = self
            .on_layout(|layout| async move {
                self.adapter.read_named(&layout, &ObjectKey::Preferences).await
            })
            .await;
        match read {
            Ok(envelope) => {
                let opened = self
                    .crypto(passphrase, move |codec, p| codec.decrypt_preferences(&envelope, p))
                    .await;
                match opened {
                    Ok(_) | Err(Error::Serialization(_)) => {
                        debug!("Passphrase verified against preferences");
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
            }
            Err(Error::NotFound(_)) | Err(Error::MalformedEnvelope(_)) => {
                debug!("Nothing stored yet, passphrase not verified");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Run `op` against the layout, re-resolving once if it fails with
    /// `NotFound` because folders went missing.
    async fn on_layout<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: Fn(FolderLayout) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let layout = self.layout().await?;
        match op(layout.clone()).await {
            Err(Error::NotFound(message)) => {
                if !self.adapter.is_stale(&layout).await? {
                    return Err(Error::NotFound(message));
                }
                warn!(root = %layout.root, "Folder layout is stale, re-resolving");
                let fresh = self.refresh_layout(&layout).await?;
                op(fresh).await
            }
            other => other,
        }
    }

    async fn refresh_layout(&self, stale: &FolderLayout) -> Result<FolderLayout> {
        let mut slot = self.layout.write().await;
        if let Some(current) = slot.as_ref() {
            // Someone else already re-resolved.
            if current != stale {
                return Ok(current.clone());
            }
        }
        let layout = self.adapter.resolve().await?;
        info!(root = %layout.root, "Folder layout re-resolved");
        *slot = Some(layout.clone());
        Ok(layout)
    }

    async fn read_record(&self, id: &RecordId, passphrase: &SecretBytes) -> Result<Record> {
        let key = ObjectKey::Record(*id);
        let envelope = self
            .on_layout(|layout| async move { self.adapter.read_named(&layout, &key).await })
            .await?;
        let record = self.open_record(envelope, passphrase).await?;
        check_record_id(id, record)
    }

    async fn read_attachment(
        &self,
        id: &RecordId,
        slot: AttachmentSlot,
        object_id: Option<&str>,
        passphrase: &SecretBytes,
    ) -> Result<Vec<u8>> {
        let envelope = match object_id {
            Some(object_id) => self.adapter.read(object_id).await?,
            None => {
                let key = ObjectKey::Attachment(*id, slot);
                self.on_layout(|layout| async move { self.adapter.read_named(&layout, &key).await })
                    .await?
            }
        };
        self.crypto(passphrase, move |codec, p| codec.decrypt_attachment(&envelope, p))
            .await
    }

    async fn read_index(&self, passphrase: &SecretBytes) -> Result<Index> {
        let envelope = self
            .on_layout(|layout| async move {
                self.adapter.read_named(&layout, &ObjectKey::Index).await
            })
            .await?;
        self.crypto(passphrase, move |codec, p| codec.decrypt_index(&envelope, p))
            .await
    }

    async fn write_index(&self, index: &Index, passphrase: &SecretBytes) -> Result<()> {
        let sealed = index.clone();
        let envelope = self
            .crypto(passphrase, move |codec, p| codec.encrypt_index(&sealed, p))
            .await?;
        let envelope = &envelope;
        self.on_layout(|layout| async move {
            self.adapter.upsert(&layout, &ObjectKey::Index, envelope).await
        })
        .await?;
        debug!(entries = index.len(), "Index written");
        Ok(())
    }

    /// Apply `change` to the stored index.
    ///
    /// A missing, unreadable or damaged index is rebuilt from the store
    /// instead, which already reflects the change. Saves of different records
    /// may run concurrently, so updates are serialized on `index_lock`.
    async fn update_index<F>(&self, passphrase: &SecretBytes, change: F) -> Result<()>
    where
        F: FnOnce(&mut Index),
    {
        let _guard = self.index_lock.lock().await;
        match self.read_index(passphrase).await {
            Ok(mut index) => {
                change(&mut index);
                self.write_index(&index, passphrase).await
            }
            Err(
                e @ (Error::NotFound(_)
                | Error::Serialization(_)
                | Error::MalformedEnvelope(_)
                | Error::Decryption),
            ) => {
                debug!(reason = %e, "Index missing or unreadable, rebuilding");
                self.rebuild_index_with(passphrase).await.map(|_| ())
            }
            Err(e) => Err(e),
        }
    }

    async fn rebuild_index_with(&self, passphrase: &SecretBytes) -> Result<Index> {
        let layout = self.layout().await?;
        let objects = self.adapter.list_records(&layout).await?;

        let mut records = Vec::with_capacity(objects.len());
        let mut rejected = 0usize;
        for (id, meta) in objects {
            let loaded = match self.adapter.read(&meta.id).await {
                Ok(envelope) => self
                    .open_record(envelope, passphrase)
                    .await
                    .and_then(|record| check_record_id(&id, record)),
                Err(e) => Err(e),
            };
            match loaded {
                Ok(record) => records.push(record),
                Err(e) => {
                    if matches!(e, Error::Decryption) {
                        rejected += 1;
                    }
                    warn!(record = %id, error = %e, "Record left out of rebuilt index");
                }
            }
        }
        // No record opening at all means the passphrase is not this vault's.
        if records.is_empty() && rejected > 0 {
            return Err(Error::Decryption);
        }

        let index = Index::from_records(&records);
        self.write_index(&index, passphrase).await?;
        info!(entries = index.len(), "Index rebuilt");
        Ok(index)
    }

    async fn delete_record_objects(&self, layout: &FolderLayout, id: &RecordId) -> DeleteOutcome {
        let objects = match self.adapter.find_record_objects(layout, id).await {
            Ok(objects) => objects,
            Err(e) => return DeleteOutcome::Failed(e),
        };
        if objects.is_empty() {
            return DeleteOutcome::NotFound;
        }

        let report = self
            .adapter
            .delete_many(objects.into_iter().map(|meta| meta.id).collect())
            .await;
        if report.succeeded() == 0 && report.failed() == 0 {
            return DeleteOutcome::NotFound;
        }
        match report
            .outcomes
            .into_iter()
            .find(|(_, outcome)| !outcome.is_settled())
        {
            Some((_, failed)) => failed,
            None => DeleteOutcome::Deleted,
        }
    }
}

fn check_record_id(expected: &RecordId, record: Record) -> Result<Record> {
    if &record.id != expected {
        return Err(Error::Serialization(format!(
            "Record object {} holds record {}",
            expected, record.id
        )));
    }
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Category;
    use crate::session::{ManualClock, SessionState};
    use cardsafe_crypto::KdfParams;
    use cardsafe_storage::{MemoryBlobStore, RetryPolicy};
    use std::time::Duration;

    const PASSPHRASE: &str = "correct-horse-battery";

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    fn settings() -> VaultSettings {
        VaultSettings {
            kdf: KdfParams::minimum(),
            max_concurrency: 2,
            retry: RetryPolicy::new(2)
                .with_initial_delay(Duration::from_millis(1))
                .with_jitter(false),
            ..VaultSettings::default()
        }
    }

    async fn unlocked() -> (Arc<MemoryBlobStore>, Vault) {
        init_tracing();
        let store = Arc::new(MemoryBlobStore::new());
        let vault = Vault::new(store.clone(), settings()).unwrap();
        vault.unlock(SecretBytes::from(PASSPHRASE)).await.unwrap();
        (store, vault)
    }

    fn visa() -> Record {
        Record::new(Category::PaymentCard, "Test Visa")
            .number("4111111111111111")
            .expiry("12/29")
    }

    #[tokio::test]
    async fn test_locked_vault_refuses_operations() {
        init_tracing();
        let vault = Vault::new(Arc::new(MemoryBlobStore::new()), settings()).unwrap();

        assert!(matches!(vault.save_record(&visa()).await, Err(Error::Locked)));
        assert!(matches!(vault.load_preferences().await, Err(Error::Locked)));
        assert!(matches!(vault.list_records().await, Err(Error::Locked)));
        assert!(matches!(
            vault.unlock(SecretBytes::from("")).await,
            Err(Error::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_save_and_load_record() {
        let (store, vault) = unlocked().await;
        let mut record = visa();

        vault.save_record(&record).await.unwrap();
        assert_eq!(vault.load_record(&record.id).await.unwrap(), record);

        record.label = "Test Visa (work)".to_string();
        record.touch();
        vault.save_record(&record).await.unwrap();

        assert_eq!(vault.load_record(&record.id).await.unwrap(), record);
        assert_eq!(store.count_named(&format!("record_{}.json", record.id)).await, 1);
    }

    #[tokio::test]
    async fn test_unlock_verifies_against_index() {
        let (store, vault) = unlocked().await;
        vault.save_record(&visa()).await.unwrap();
        vault.lock().await;

        let result = vault.unlock(SecretBytes::from("wrong-horse")).await;
        assert!(matches!(result, Err(Error::Decryption)));
        assert_eq!(vault.session().state().await, SessionState::Empty);

        vault.unlock(SecretBytes::from(PASSPHRASE)).await.unwrap();
        assert_eq!(vault.session().state().await, SessionState::Leased);

        // A second instance against the same store sees the same index.
        let other = Vault::new(store, settings()).unwrap();
        assert!(other.unlock(SecretBytes::from("wrong-horse")).await.is_err());
    }

    async fn index_object(vault: &Vault) -> ObjectMeta {
        let layout = vault.layout().await.unwrap();
        vault
            .adapter()
            .find(&layout, &ObjectKey::Index)
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_unlock_without_index_checks_records() {
        let (store, vault) = unlocked().await;
        let first = visa();
        vault.save_record(&first).await.unwrap();
        store.remove_behind_back(&index_object(&vault).await.id).await;
        vault.lock().await;

        let mistyped = vault.unlock(SecretBytes::from("correct-horse-batterz")).await;
        assert!(matches!(mistyped, Err(Error::Decryption)));
        assert_eq!(vault.session().state().await, SessionState::Empty);

        vault.unlock(SecretBytes::from(PASSPHRASE)).await.unwrap();
        let second = Record::new(Category::Loyalty, "Coffee Club");
        vault.save_record(&second).await.unwrap();
        vault.lock().await;

        vault.unlock(SecretBytes::from(PASSPHRASE)).await.unwrap();
        let index = vault.load_index().await.unwrap().unwrap();
        assert!(index.get(&first.id).is_some());
        assert!(index.get(&second.id).is_some());
    }

    #[tokio::test]
    async fn test_rebuild_refuses_unknown_passphrase() {
        let (store, vault) = unlocked().await;
        vault.save_record(&visa()).await.unwrap();
        store.remove_behind_back(&index_object(&vault).await.id).await;

        vault.session().store(SecretBytes::from("correct-horse-batterz")).await;
        assert!(matches!(vault.rebuild_index().await, Err(Error::Decryption)));
        assert_eq!(store.count_named("index.json").await, 0);

        vault.lock().await;
        vault.unlock(SecretBytes::from(PASSPHRASE)).await.unwrap();
        assert_eq!(vault.rebuild_index().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_damaged_index_is_replaced_at_unlock() {
        let (store, vault) = unlocked().await;
        let record = visa();
        vault.save_record(&record).await.unwrap();

        let index_meta = index_object(&vault).await;
        let mut envelope = vault.adapter().read(&index_meta.id).await.unwrap();
        envelope.ciphertext[0] ^= 0x01;
        store
            .overwrite_raw(&index_meta.id, envelope.to_bytes().unwrap())
            .await
            .unwrap();
        vault.lock().await;

        assert!(matches!(
            vault.unlock(SecretBytes::from("wrong-horse")).await,
            Err(Error::Decryption)
        ));

        vault.unlock(SecretBytes::from(PASSPHRASE)).await.unwrap();
        let index = vault.load_index().await.unwrap().unwrap();
        assert_eq!(index.entries.iter().map(|e| e.id).collect::<Vec<_>>(), vec![record.id]);
        assert_eq!(store.count_named("index.json").await, 1);
    }

    #[tokio::test]
    async fn test_unlock_checks_preferences_when_no_records() {
        let (_, vault) = unlocked().await;
        vault.save_preferences(&Preferences::new()).await.unwrap();
        vault.lock().await;

        assert!(matches!(
            vault.unlock(SecretBytes::from("wrong-horse")).await,
            Err(Error::Decryption)
        ));
        vault.unlock(SecretBytes::from(PASSPHRASE)).await.unwrap();
    }

    #[tokio::test]
    async fn test_rebuild_skips_record_under_wrong_name() {
        let (store, vault) = unlocked().await;
        let first = visa();
        let second = Record::new(Category::Identity, "Passport");
        let first_object = vault.save_record(&first).await.unwrap().id;
        let second_object = vault.save_record(&second).await.unwrap().id;

        let second_body = vault.adapter().read(&second_object).await.unwrap();
        store
            .overwrite_raw(&first_object, second_body.to_bytes().unwrap())
            .await
            .unwrap();

        let rebuilt = vault.rebuild_index().await.unwrap();
        assert_eq!(rebuilt.entries.iter().map(|e| e.id).collect::<Vec<_>>(), vec![second.id]);

        let diff = vault.index_diff().await.unwrap();
        assert_eq!(diff.missing, vec![first.id]);
        assert!(diff.stale.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_saves_keep_every_index_entry() {
        let (_, vault) = unlocked().await;
        vault.save_record(&visa()).await.unwrap();

        let records: Vec<Record> = (0..4)
            .map(|i| Record::new(Category::Loyalty, format!("Card {}", i)))
            .collect();
        let saves = join_all(records.iter().map(|record| vault.save_record(record))).await;
        assert!(saves.iter().all(|saved| saved.is_ok()));

        let index = vault.load_index().await.unwrap().unwrap();
        assert_eq!(index.len(), 5);
        for record in &records {
            assert!(index.get(&record.id).is_some());
        }
    }

    #[tokio::test]
    async fn test_tampered_records_do_not_lock_out_passphrase() {
        let (store, vault) = unlocked().await;
        for i in 0..8 {
            let record = Record::new(Category::Other, format!("Entry {}", i));
            vault.save_record(&record).await.unwrap();
        }
        store.remove_behind_back(&index_object(&vault).await.id).await;

        let layout = vault.layout().await.unwrap();
        let listed = vault.adapter().list_records(&layout).await.unwrap();
        for (_, meta) in listed.iter().take(3) {
            let mut envelope = vault.adapter().read(&meta.id).await.unwrap();
            envelope.auth_tag[0] ^= 0x01;
            store.overwrite_raw(&meta.id, envelope.to_bytes().unwrap()).await.unwrap();
        }
        vault.lock().await;

        assert!(matches!(
            vault.unlock(SecretBytes::from("wrong-horse")).await,
            Err(Error::Decryption)
        ));
        vault.unlock(SecretBytes::from(PASSPHRASE)).await.unwrap();
        assert_eq!(vault.session().state().await, SessionState::Leased);
    }

    #[tokio::test]
    async fn test_changed_kdf_settings_cannot_open_vault() {
        let (store, vault) = unlocked().await;
        vault.save_record(&visa()).await.unwrap();

        let changed = VaultSettings {
            kdf: KdfParams {
                iterations: KdfParams::minimum().iterations + 1,
                ..KdfParams::minimum()
            },
            ..settings()
        };
        let reopened = Vault::new(store.clone(), changed).unwrap();
        assert!(matches!(
            reopened.unlock(SecretBytes::from(PASSPHRASE)).await,
            Err(Error::Decryption)
        ));

        let original = Vault::new(store, settings()).unwrap();
        original.unlock(SecretBytes::from(PASSPHRASE)).await.unwrap();
        assert_eq!(original.load_index().await.unwrap().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_key_derivation_runs_off_the_async_worker() {
        let (_, vault) = unlocked().await;
        let caller = std::thread::current().id();

        let worker = vault
            .crypto(&SecretBytes::from(PASSPHRASE), |_, _| Ok(std::thread::current().id()))
            .await
            .unwrap();
        assert_ne!(worker, caller);
    }

    #[tokio::test]
    async fn test_index_follows_saves_in_order() {
        let (_, vault) = unlocked().await;
        let first = visa();
        let mut second = Record::new(Category::Loyalty, "Coffee Club").number("9876 5432");

        vault.save_record(&first).await.unwrap();
        vault.save_record(&second).await.unwrap();
        second.label = "Coffee Club Gold".to_string();
        vault.save_record(&second).await.unwrap();

        let index = vault.load_index().await.unwrap().unwrap();
        let labels: Vec<&str> = index.entries.iter().map(|e| e.label.as_str()).collect();
        assert_eq!(labels, ["Test Visa", "Coffee Club Gold"]);
        assert_eq!(index.entries[0].last_four.as_deref(), Some("1111"));
    }

    #[tokio::test]
    async fn test_index_write_failure_does_not_fail_save() {
        let (store, vault) = unlocked().await;
        store.reject_writes_to("index.json").await;

        let record = visa();
        vault.save_record(&record).await.unwrap();

        assert_eq!(vault.load_record(&record.id).await.unwrap(), record);
        assert!(vault.load_index().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_stale_layout_is_re_resolved() {
        let (store, vault) = unlocked().await;
        let layout = vault.layout().await.unwrap();
        store.remove_behind_back(&layout.records).await;

        let record = visa();
        vault.save_record(&record).await.unwrap();

        let fresh = vault.layout().await.unwrap();
        assert_ne!(fresh.records, layout.records);
        assert_eq!(fresh.root, layout.root);
        assert_eq!(vault.load_record(&record.id).await.unwrap(), record);
    }

    #[tokio::test]
    async fn test_injected_layout_that_no_longer_exists() {
        init_tracing();
        let store = Arc::new(MemoryBlobStore::new());
        let fake = FolderLayout {
            root: "gone-root".to_string(),
            records: "gone-records".to_string(),
            index: "gone-index".to_string(),
            preferences: "gone-preferences".to_string(),
        };
        let vault = Vault::new(store.clone(), settings()).unwrap().with_layout(fake.clone());
        vault.unlock(SecretBytes::from(PASSPHRASE)).await.unwrap();

        vault.save_record(&visa()).await.unwrap();
        assert_ne!(vault.layout().await.unwrap(), fake);
        assert_eq!(store.folders_created(), 4);
    }

    #[tokio::test]
    async fn test_missing_record_is_not_found() {
        let (_, vault) = unlocked().await;
        let result = vault.load_record(&RecordId::new()).await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_attachments_degrade_independently() {
        let (store, vault) = unlocked().await;
        let mut record = visa();
        vault.save_record(&record).await.unwrap();

        vault
            .save_attachment(&mut record, AttachmentSlot::Primary, b"front photo")
            .await
            .unwrap();
        let thumb = vault
            .save_attachment(&mut record, AttachmentSlot::Thumbnail { size: 128 }, b"thumb")
            .await
            .unwrap();
        assert_eq!(record.attachments.len(), 2);

        let loaded = vault.load_record_with_attachments(&record.id).await.unwrap();
        assert_eq!(loaded.record, record);
        assert_eq!(
            loaded.attachment(AttachmentSlot::Primary).and_then(|a| a.bytes()),
            Some(&b"front photo"[..])
        );

        store.overwrite_raw(&thumb.id, b"garbage".to_vec()).await.unwrap();
        let loaded = vault.load_record_with_attachments(&record.id).await.unwrap();
        assert_eq!(loaded.record, record);
        assert!(loaded.attachment(AttachmentSlot::Primary).unwrap().is_available());
        assert!(matches!(
            loaded.attachment(AttachmentSlot::Thumbnail { size: 128 }),
            Some(AttachmentState::Unavailable(Error::MalformedEnvelope(_)))
        ));
    }

    #[tokio::test]
    async fn test_delete_record_cascades() {
        let (store, vault) = unlocked().await;
        let mut record = visa();
        let keep = Record::new(Category::Identity, "Passport");
        vault.save_record(&record).await.unwrap();
        vault.save_record(&keep).await.unwrap();
        vault
            .save_attachment(&mut record, AttachmentSlot::Primary, b"photo")
            .await
            .unwrap();

        vault.delete_record(&record.id).await.unwrap();

        let layout = vault.layout().await.unwrap();
        assert!(vault
            .adapter()
            .find_record_objects(&layout, &record.id)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(store.count_named(&format!("record_{}.json", keep.id)).await, 1);

        let index = vault.load_index().await.unwrap().unwrap();
        assert!(index.get(&record.id).is_none());
        assert!(index.get(&keep.id).is_some());

        assert!(matches!(
            vault.delete_record(&record.id).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_batch_delete_with_one_missing() {
        let (store, vault) = unlocked().await;
        let records: Vec<Record> = (0..3)
            .map(|i| Record::new(Category::Other, format!("Entry {}", i)))
            .collect();
        let mut object_ids = Vec::new();
        for record in &records {
            object_ids.push(vault.save_record(record).await.unwrap().id);
        }
        store.remove_behind_back(&object_ids[1]).await;

        let ids: Vec<RecordId> = records.iter().map(|r| r.id).collect();
        let report = vault.delete_records(&ids).await.unwrap();

        assert_eq!(report.succeeded(), 2);
        assert_eq!(report.not_found(), 1);
        assert_eq!(report.failed(), 0);
        assert!(matches!(report.outcome(&ids[1]), Some(DeleteOutcome::NotFound)));
        assert!(vault.load_index().await.unwrap().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_records_collects_failures() {
        let (store, vault) = unlocked().await;
        let mut records = Vec::new();
        let mut damaged = None;
        for i in 0..5 {
            let record = Record::new(Category::Loyalty, format!("Card {}", i));
            let meta = vault.save_record(&record).await.unwrap();
            if i == 2 {
                damaged = Some((record.id, meta.id));
            } else {
                records.push(record);
            }
        }
        let (damaged_id, object_id) = damaged.unwrap();
        let mut envelope = vault.adapter().read(&object_id).await.unwrap();
        envelope.auth_tag[0] ^= 0x01;
        store.overwrite_raw(&object_id, envelope.to_bytes().unwrap()).await.unwrap();

        let listing = vault.list_records().await.unwrap();

        assert_eq!(listing.records, records);
        assert_eq!(listing.failures.len(), 1);
        assert_eq!(listing.failures[0].0, damaged_id);
        assert!(matches!(listing.failures[0].1, Error::Decryption));
    }

    #[tokio::test]
    async fn test_index_is_tolerant_of_stale_entries() {
        let (store, vault) = unlocked().await;
        let gone = visa();
        let kept = Record::new(Category::Identity, "Licence");
        let gone_object = vault.save_record(&gone).await.unwrap().id;
        vault.save_record(&kept).await.unwrap();

        store.remove_behind_back(&gone_object).await;

        let index = vault.load_index().await.unwrap().unwrap();
        assert_eq!(index.len(), 2);

        let diff = vault.index_diff().await.unwrap();
        assert_eq!(diff.stale, vec![gone.id]);
        assert!(diff.missing.is_empty());

        let rebuilt = vault.rebuild_index().await.unwrap();
        assert_eq!(rebuilt.entries.iter().map(|e| e.id).collect::<Vec<_>>(), vec![kept.id]);
        assert!(vault.index_diff().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_preferences_overwrite_in_place() {
        let (store, vault) = unlocked().await;
        assert!(vault.load_preferences().await.unwrap().is_none());

        let mut prefs = Preferences::new();
        prefs.set("theme", "dark");
        vault.save_preferences(&prefs).await.unwrap();

        prefs.set("theme", "light");
        prefs.set("auto_lock_minutes", 5);
        vault.save_preferences(&prefs).await.unwrap();

        assert_eq!(store.count_named("preferences.json").await, 1);
        assert_eq!(vault.load_preferences().await.unwrap(), Some(prefs));
    }

    #[tokio::test]
    async fn test_reset_removes_everything() {
        let (_, vault) = unlocked().await;
        let mut record = visa();
        vault.save_record(&record).await.unwrap();
        vault
            .save_attachment(&mut record, AttachmentSlot::Primary, b"photo")
            .await
            .unwrap();
        vault.save_preferences(&Preferences::new()).await.unwrap();

        let report = vault.reset().await.unwrap();

        // record, attachment, index, preferences
        assert_eq!(report.succeeded(), 4);
        assert!(report.is_complete());
        assert!(vault.list_records().await.unwrap().records.is_empty());
        assert!(vault.load_index().await.unwrap().is_none());
        assert!(vault.load_preferences().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lease_expiry_locks_vault() {
        init_tracing();
        let clock = Arc::new(ManualClock::new());
        let vault = Vault::with_clock(Arc::new(MemoryBlobStore::new()), settings(), clock.clone())
            .unwrap();
        vault.unlock(SecretBytes::from(PASSPHRASE)).await.unwrap();
        vault.save_record(&visa()).await.unwrap();

        clock.advance(Duration::from_secs(301));
        assert!(matches!(vault.save_record(&visa()).await, Err(Error::Locked)));
        assert_eq!(vault.session().state().await, SessionState::Empty);
    }

    #[tokio::test]
    async fn test_transient_outage_is_retried() {
        let (store, vault) = unlocked().await;
        let record = visa();
        vault.save_record(&record).await.unwrap();

        store.fail_next(2);
        assert_eq!(vault.load_record(&record.id).await.unwrap(), record);
    }
}
