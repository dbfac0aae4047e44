//! Two-stage key derivation.
//!
//! Stage one is PBKDF2-HMAC-SHA256 over the low-entropy passphrase and pays
//! the brute-force cost. Stage two is HKDF-SHA256 over the stage-one secret
//! with a fixed domain-separation label, so the final key is bound to an
//! application/version label and can be rotated by changing only the label.

use hkdf::Hkdf;
use pbkdf2::pbkdf2_hmac;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::keys::{DerivedKey, Salt, KEY_LENGTH};
use cardsafe_common::{Error, Result};

/// Lowest PBKDF2 iteration count accepted.
pub const MIN_ITERATIONS: u32 = 100_000;

/// Iteration count used unless configured otherwise.
pub const DEFAULT_ITERATIONS: u32 = 310_000;

/// Domain-separation label for the HKDF stage.
pub const DEFAULT_LABEL: &str = "cardsafe/envelope/v1";

/// Parameters for the key derivation pipeline.
///
/// Envelopes do not record the parameters they were sealed with. Decryption
/// must use the same iterations and label as encryption, so the parameters
/// are fixed for the life of a vault; different ones fail as `Decryption`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// PBKDF2 iteration count (at least [`MIN_ITERATIONS`]).
    pub iterations: u32,
    /// HKDF info label.
    pub label: String,
}

impl KdfParams {
    /// Create parameters suitable for interactive use.
    pub fn interactive() -> Self {
        Self {
            iterations: DEFAULT_ITERATIONS,
            label: DEFAULT_LABEL.to_string(),
        }
    }

    /// Create parameters for high-value vaults.
    ///
    /// Roughly twice the derivation time of [`interactive`](Self::interactive).
    pub fn hardened() -> Self {
        Self {
            iterations: 600_000,
            label: DEFAULT_LABEL.to_string(),
        }
    }

    /// The cheapest parameters the pipeline accepts.
    pub fn minimum() -> Self {
        Self {
            iterations: MIN_ITERATIONS,
            label: DEFAULT_LABEL.to_string(),
        }
    }

    /// Check the parameters against the enforced floor.
    pub fn validate(&self) -> Result<()> {
        if self.iterations < MIN_ITERATIONS {
            return Err(Error::KeyDerivation(format!(
                "PBKDF2 iterations must be at least {} (got {})",
                MIN_ITERATIONS, self.iterations
            )));
        }
        if self.label.is_empty() {
            return Err(Error::KeyDerivation(
                "Key derivation label cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for KdfParams {
    fn default() -> Self {
        Self::interactive()
    }
}

/// Derive a symmetric key from a passphrase and salt.
///
/// # Preconditions
/// - `passphrase` must not be empty
/// - `params` must pass [`KdfParams::validate`]
///
/// # Postconditions
/// - The derived key is deterministic given the same inputs
/// - The intermediate PBKDF2 output is zeroized before returning
///
/// # Errors
/// - `InvalidInput` if the passphrase is empty
/// - `KeyDerivation` if the parameters are below the floor or HKDF fails
pub fn derive_key(passphrase: &[u8], salt: &Salt, params: &KdfParams) -> Result<DerivedKey> {
    if passphrase.is_empty() {
        return Err(Error::InvalidInput("Passphrase cannot be empty".to_string()));
    }
    params.validate()?;

    let mut intermediate = Zeroizing::new([0u8; KEY_LENGTH]);
    pbkdf2_hmac::<Sha256>(
        passphrase,
        salt.as_bytes(),
        params.iterations,
        &mut intermediate[..],
    );

    let hk = Hkdf::<Sha256>::new(None, &intermediate[..]);
    let mut okm = [0u8; KEY_LENGTH];
    hk.expand(params.label.as_bytes(), &mut okm)
        .map_err(|e| Error::KeyDerivation(format!("HKDF expand failed: {}", e)))?;

    Ok(DerivedKey::from_bytes(okm))
}
