//! Encoding and encryption of vault objects.
//!
//! Plain encodings are canonical JSON: fields in declaration order, custom
//! fields sorted by name, absent optionals omitted, timestamps fixed-width.
//! Encrypted forms are envelopes over those bytes.

use serde::Deserialize;
use zeroize::Zeroizing;

use crate::index::{Index, INDEX_VERSION};
use crate::preferences::Preferences;
use crate::record::Record;
use cardsafe_common::{Error, Result, SecretBytes};
use cardsafe_crypto::{Envelope, EnvelopeCipher, KdfParams};

/// Serialize a record to its canonical bytes.
pub fn encode_record(record: &Record) -> Result<Vec<u8>> {
    serde_json::to_vec(record).map_err(|e| Error::Serialization(format!("Failed to encode record: {}", e)))
}

/// Parse canonical record bytes.
pub fn decode_record(bytes: &[u8]) -> Result<Record> {
    serde_json::from_slice(bytes).map_err(|e| Error::Serialization(format!("Failed to decode record: {}", e)))
}

/// Build and serialize an index of `records`, keeping their order.
pub fn encode_index(records: &[Record]) -> Result<Vec<u8>> {
    encode_index_value(&Index::from_records(records))
}

/// Serialize an existing index.
pub fn encode_index_value(index: &Index) -> Result<Vec<u8>> {
    serde_json::to_vec(index).map_err(|e| Error::Serialization(format!("Failed to encode index: {}", e)))
}

#[derive(Deserialize)]
struct VersionProbe {
    version: u32,
}

/// Parse index bytes.
///
/// Entries are not checked against the records in the store; use
/// [`Index::reconcile`] for that.
///
/// # Errors
/// - `Serialization` if the bytes are not an index or the format version is
///   not supported
pub fn decode_index(bytes: &[u8]) -> Result<Index> {
    let probe: VersionProbe = serde_json::from_slice(bytes)
        .map_err(|e| Error::Serialization(format!("Failed to decode index: {}", e)))?;
    if probe.version != INDEX_VERSION {
        return Err(Error::Serialization(format!(
            "Unsupported index version: {} (expected {})",
            probe.version, INDEX_VERSION
        )));
    }
    serde_json::from_slice(bytes).map_err(|e| Error::Serialization(format!("Failed to decode index: {}", e)))
}

pub fn encode_preferences(preferences: &Preferences) -> Result<Vec<u8>> {
    serde_json::to_vec(preferences)
        .map_err(|e| Error::Serialization(format!("Failed to encode preferences: {}", e)))
}

pub fn decode_preferences(bytes: &[u8]) -> Result<Preferences> {
    serde_json::from_slice(bytes)
        .map_err(|e| Error::Serialization(format!("Failed to decode preferences: {}", e)))
}

/// Encrypts and decrypts vault objects with one set of KDF parameters.
#[derive(Debug, Clone)]
pub struct RecordCodec {
    cipher: EnvelopeCipher,
}

impl RecordCodec {
    /// Create a codec; fails if `params` are below the KDF floor.
    pub fn new(params: KdfParams) -> Result<Self> {
        Ok(Self {
            cipher: EnvelopeCipher::new(params)?,
        })
    }

    pub fn cipher(&self) -> &EnvelopeCipher {
        &self.cipher
    }

    pub fn encrypt_record(&self, record: &Record, passphrase: &SecretBytes) -> Result<Envelope> {
        let plaintext = Zeroizing::new(encode_record(record)?);
        self.cipher.encrypt(&plaintext, passphrase)
    }

    pub fn decrypt_record(&self, envelope: &Envelope, passphrase: &SecretBytes) -> Result<Record> {
        let plaintext = Zeroizing::new(self.cipher.decrypt(envelope, passphrase)?);
        decode_record(&plaintext)
    }

    /// Encrypt attachment bytes as-is.
    pub fn encrypt_attachment(&self, data: &[u8], passphrase: &SecretBytes) -> Result<Envelope> {
        self.cipher.encrypt(data, passphrase)
    }

    pub fn decrypt_attachment(&self, envelope: &Envelope, passphrase: &SecretBytes) -> Result<Vec<u8>> {
        self.cipher.decrypt(envelope, passphrase)
    }

    pub fn encrypt_index(&self, index: &Index, passphrase: &SecretBytes) -> Result<Envelope> {
        let plaintext = Zeroizing::new(encode_index_value(index)?);
        self.cipher.encrypt(&plaintext, passphrase)
    }

    pub fn decrypt_index(&self, envelope: &Envelope, passphrase: &SecretBytes) -> Result<Index> {
        let plaintext = Zeroizing::new(self.cipher.decrypt(envelope, passphrase)?);
        decode_index(&plaintext)
    }

    pub fn encrypt_preferences(
        &self,
        preferences: &Preferences,
        passphrase: &SecretBytes,
    ) -> Result<Envelope> {
        let plaintext = Zeroizing::new(encode_preferences(preferences)?);
        self.cipher.encrypt(&plaintext, passphrase)
    }

    pub fn decrypt_preferences(
        &self,
        envelope: &Envelope,
        passphrase: &SecretBytes,
    ) -> Result<Preferences> {
        let plaintext = Zeroizing::new(self.cipher.decrypt(envelope, passphrase)?);
        decode_preferences(&plaintext)
    }
}
