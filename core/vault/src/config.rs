//! Vault settings.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use cardsafe_common::{Error, Result};
use cardsafe_crypto::KdfParams;
use cardsafe_storage::{FolderNames, RetryPolicy};

/// Tunables of a vault instance.
///
/// Every field has a default, so a partial JSON document (or `{}`) is a
/// valid configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultSettings {
    /// Key derivation parameters for every envelope this vault reads and
    /// writes. Fixed once the vault holds data: changing them makes every
    /// existing envelope fail as `Decryption`.
    pub kdf: KdfParams,
    /// Passphrase lease length in seconds.
    pub session_ttl_secs: u64,
    /// Folder names in the store.
    pub folders: FolderNames,
    /// Upper bound on concurrent record loads.
    pub max_concurrency: usize,
    /// Retry policy for transient remote failures.
    pub retry: RetryPolicy,
}

impl Default for VaultSettings {
    fn default() -> Self {
        Self {
            kdf: KdfParams::default(),
            session_ttl_secs: 300,
            folders: FolderNames::default(),
            max_concurrency: 8,
            retry: RetryPolicy::default(),
        }
    }
}

impl VaultSettings {
    /// Check that the settings are usable.
    ///
    /// # Errors
    /// - `KeyDerivation` if the KDF parameters are below the floor
    /// - `InvalidInput` for a zero TTL or concurrency, or bad folder names
    pub fn validate(&self) -> Result<()> {
        self.kdf.validate()?;
        self.folders.validate()?;
        if self.session_ttl_secs == 0 {
            return Err(Error::InvalidInput(
                "session_ttl_secs must be positive".to_string(),
            ));
        }
        if self.max_concurrency == 0 {
            return Err(Error::InvalidInput(
                "max_concurrency must be positive".to_string(),
            ));
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(Error::InvalidInput(
                "retry.backoff_multiplier must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Passphrase lease length.
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    /// Deserialize and validate settings from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let settings: Self =
            serde_json::from_str(json).map_err(|e| Error::Serialization(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Serialize settings to JSON.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Serialization(e.to_string()))
    }
}
