//! The envelope: the unit of ciphertext at rest.
//!
//! Wire format (the persisted contract), values standard base64:
//!
//! ```json
//! {"iv": "...", "salt": "...", "ciphertext": "...", "authTag": "..."}
//! ```

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::aead::{open, seal};
use crate::kdf::{derive_key, KdfParams};
use crate::keys::{Iv, Salt, TAG_LENGTH};
use cardsafe_common::{Error, Result, SecretBytes};

/// Encrypted payload with everything needed to decrypt it except the
/// passphrase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Nonce, unique per encryption.
    pub iv: Iv,
    /// KDF salt, unique per encryption unless pinned.
    pub salt: Salt,
    /// AES-GCM ciphertext without the tag.
    pub ciphertext: Vec<u8>,
    /// Detached authentication tag.
    pub auth_tag: [u8; TAG_LENGTH],
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEnvelope {
    iv: String,
    salt: String,
    ciphertext: String,
    auth_tag: String,
}

fn decode_field(name: &str, value: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(value)
        .map_err(|e| Error::MalformedEnvelope(format!("{} is not valid base64: {}", name, e)))
}

impl Envelope {
    /// Serialize to the JSON wire format.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(&self.to_wire()).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Serialize to JSON bytes for storage.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(&self.to_wire()).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Parse the JSON wire format.
    ///
    /// # Errors
    /// - `MalformedEnvelope` if a field is missing, not base64, or has the
    ///   wrong length
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let wire: WireEnvelope = serde_json::from_slice(bytes)
            .map_err(|e| Error::MalformedEnvelope(format!("invalid envelope JSON: {}", e)))?;
        Self::from_wire(wire)
    }

    /// Parse the JSON wire format from a string.
    pub fn from_json(json: &str) -> Result<Self> {
        Self::from_bytes(json.as_bytes())
    }

    fn to_wire(&self) -> WireEnvelope {
        WireEnvelope {
            iv: STANDARD.encode(self.iv.as_bytes()),
            salt: STANDARD.encode(self.salt.as_bytes()),
            ciphertext: STANDARD.encode(&self.ciphertext),
            auth_tag: STANDARD.encode(self.auth_tag),
        }
    }

    fn from_wire(wire: WireEnvelope) -> Result<Self> {
        let iv = Iv::from_slice(&decode_field("iv", &wire.iv)?)?;
        let salt = Salt::from_slice(&decode_field("salt", &wire.salt)?)?;
        let ciphertext = decode_field("ciphertext", &wire.ciphertext)?;
        let tag = decode_field("authTag", &wire.auth_tag)?;
        let auth_tag: [u8; TAG_LENGTH] = tag.as_slice().try_into().map_err(|_| {
            Error::MalformedEnvelope(format!(
                "authTag must be {} bytes, got {}",
                TAG_LENGTH,
                tag.len()
            ))
        })?;

        Ok(Self {
            iv,
            salt,
            ciphertext,
            auth_tag,
        })
    }
}

/// Passphrase-based encrypt/decrypt of opaque byte payloads.
///
/// Holds only the KDF parameters; keys are derived per call and dropped
/// (zeroized) before the call returns.
#[derive(Debug, Clone)]
pub struct EnvelopeCipher {
    params: KdfParams,
}

impl EnvelopeCipher {
    /// Create a cipher, validating the KDF parameters up front.
    pub fn new(params: KdfParams) -> Result<Self> {
        params.validate()?;
        Ok(Self { params })
    }

    /// Get the KDF parameters.
    pub fn params(&self) -> &KdfParams {
        &self.params
    }

    /// Encrypt with a fresh salt and IV.
    ///
    /// # Postconditions
    /// - Two calls with identical inputs produce envelopes with different
    ///   `iv` and `salt`
    pub fn encrypt(&self, plaintext: &[u8], passphrase: &SecretBytes) -> Result<Envelope> {
        self.encrypt_with_salt(plaintext, passphrase, Salt::generate())
    }

    /// Encrypt with a pinned salt. The IV is still fresh.
    pub fn encrypt_with_salt(
        &self,
        plaintext: &[u8],
        passphrase: &SecretBytes,
        salt: Salt,
    ) -> Result<Envelope> {
        let iv = Iv::generate();
        let key = derive_key(passphrase.as_bytes(), &salt, &self.params)?;
        let (ciphertext, auth_tag) = seal(&key, &iv, plaintext)?;

        debug!(size = plaintext.len(), "Payload encrypted");
        Ok(Envelope {
            iv,
            salt,
            ciphertext,
            auth_tag,
        })
    }

    /// Decrypt an envelope.
    ///
    /// Uses this cipher's parameters; see [`KdfParams`] on why they must
    /// match the ones the envelope was sealed with.
    ///
    /// # Errors
    /// - `Decryption` for a wrong passphrase, corruption or tampering
    /// - `KeyDerivation` / `InvalidInput` from the KDF
    pub fn decrypt(&self, envelope: &Envelope, passphrase: &SecretBytes) -> Result<Vec<u8>> {
        let key = derive_key(passphrase.as_bytes(), &envelope.salt, &self.params)?;
        open(&key, &envelope.iv, &envelope.ciphertext, &envelope.auth_tag)
    }
}
