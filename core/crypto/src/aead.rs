//! Authenticated encryption using AES-256-GCM.
//!
//! The authentication tag is kept detached from the ciphertext because the
//! envelope wire format stores it as its own field.

use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce, Tag};

use crate::keys::{DerivedKey, Iv, TAG_LENGTH};
use cardsafe_common::{Error, Result};

/// Encrypt plaintext under `key` with the caller-supplied `iv`.
///
/// # Preconditions
/// - `iv` must never have been used with `key` before
///
/// # Postconditions
/// - Returns `(ciphertext, tag)`; the ciphertext has the plaintext's length
///
/// # Errors
/// - `Encryption` if the cipher rejects the input (e.g. oversized payload)
pub fn seal(key: &DerivedKey, iv: &Iv, plaintext: &[u8]) -> Result<(Vec<u8>, [u8; TAG_LENGTH])> {
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
        .map_err(|e| Error::Encryption(format!("Invalid key length: {}", e)))?;

    let mut buffer = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(Nonce::from_slice(iv.as_bytes()), b"", &mut buffer)
        .map_err(|e| Error::Encryption(format!("Encryption failed: {}", e)))?;

    let mut tag_bytes = [0u8; TAG_LENGTH];
    tag_bytes.copy_from_slice(&tag);
    Ok((buffer, tag_bytes))
}

/// Verify and decrypt a ciphertext produced by [`seal`].
///
/// # Postconditions
/// - Returns the original plaintext only if the tag verifies
///
/// # Errors
/// - `Decryption` on any authentication failure; no partial plaintext is
///   ever returned
pub fn open(
    key: &DerivedKey,
    iv: &Iv,
    ciphertext: &[u8],
    tag: &[u8; TAG_LENGTH],
) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(key.as_bytes()).map_err(|_| Error::Decryption)?;

    let mut buffer = ciphertext.to_vec();
    cipher
        .decrypt_in_place_detached(
            Nonce::from_slice(iv.as_bytes()),
            b"",
            &mut buffer,
            Tag::from_slice(tag),
        )
        .map_err(|_| Error::Decryption)?;

    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::KEY_LENGTH;

    fn key(byte: u8) -> DerivedKey {
        DerivedKey::from_bytes([byte; KEY_LENGTH])
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let iv = Iv::generate();
        let (ct, tag) = seal(&key(42), &iv, b"Hello, World!").unwrap();
        assert_eq!(ct.len(), 13);
        assert_eq!(open(&key(42), &iv, &ct, &tag).unwrap(), b"Hello, World!");
    }

    #[test]
    fn test_wrong_key_fails() {
        let iv = Iv::generate();
        let (ct, tag) = seal(&key(1), &iv, b"Secret data").unwrap();
        assert!(matches!(open(&key(2), &iv, &ct, &tag), Err(Error::Decryption)));
    }

    #[test]
    fn test_wrong_iv_fails() {
        let (ct, tag) = seal(&key(1), &Iv::from_bytes([1; 12]), b"data").unwrap();
        let result = open(&key(1), &Iv::from_bytes([2; 12]), &ct, &tag);
        assert!(matches!(result, Err(Error::Decryption)));
    }

    #[test]
    fn test_tampered_tag_fails() {
        let iv = Iv::generate();
        let (ct, mut tag) = seal(&key(42), &iv, b"Important data").unwrap();
        tag[0] ^= 0x01;
        assert!(matches!(open(&key(42), &iv, &ct, &tag), Err(Error::Decryption)));
    }

    #[test]
    fn test_empty_plaintext() {
        let iv = Iv::generate();
        let (ct, tag) = seal(&key(42), &iv, b"").unwrap();
        assert!(ct.is_empty());
        assert!(open(&key(42), &iv, &ct, &tag).unwrap().is_empty());
    }
}
