//! Record fingerprints for cheap staleness and tamper checks.
//!
//! A fingerprint is BLAKE2b-256 over a length-prefixed projection of the
//! record (id, label, category, last four, modification time), rendered as
//! unpadded URL-safe base64. It changes whenever any projected field does and
//! can be compared without decrypting both sides.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use serde::{Deserialize, Serialize};
use std::fmt;
use subtle::ConstantTimeEq;

use crate::record::{timestamp, Record};

const DOMAIN: &[u8] = b"cardsafe/fingerprint/v1";

/// Encoded record fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Wrap an encoded fingerprint received from elsewhere.
    pub fn from_encoded(encoded: impl Into<String>) -> Self {
        Self(encoded.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn digest(record: &Record) -> [u8; 32] {
    let mut hasher = Blake2b::<U32>::new();
    let id = record.id.to_string();
    let last_four = record.last_four().unwrap_or_default();
    let modified = timestamp::format(&record.modified_at);

    for field in [
        DOMAIN,
        id.as_bytes(),
        record.label.as_bytes(),
        record.category.as_str().as_bytes(),
        last_four.as_bytes(),
        modified.as_bytes(),
    ] {
        hasher.update((field.len() as u64).to_be_bytes());
        hasher.update(field);
    }

    hasher.finalize().into()
}

/// Compute the fingerprint of `record`.
pub fn fingerprint(record: &Record) -> Fingerprint {
    Fingerprint(URL_SAFE_NO_PAD.encode(digest(record)))
}

/// Check `record` against a fingerprint in constant time.
///
/// A fingerprint that does not decode is a mismatch.
pub fn verify(record: &Record, expected: &Fingerprint) -> bool {
    let Ok(expected) = URL_SAFE_NO_PAD.decode(expected.as_str()) else {
        return false;
    };
    let actual = digest(record);
    actual.as_slice().ct_eq(expected.as_slice()).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Category;
    use chrono::Duration;

    fn card() -> Record {
        Record::new(Category::PaymentCard, "Test Visa").number("4111111111111111")
    }

    #[test]
    fn test_verify_matches_own_fingerprint() {
        let record = card();
        let fp = fingerprint(&record);
        assert_eq!(fp.as_str().len(), 43);
        assert!(verify(&record, &fp));
    }

    #[test]
    fn test_projection_changes_fingerprint() {
        let record = card();
        let fp = fingerprint(&record);

        let mut relabeled = record.clone();
        relabeled.label = "Test Visa 2".to_string();
        assert!(!verify(&relabeled, &fp));

        let mut modified = record.clone();
        modified.modified_at = modified.modified_at + Duration::nanoseconds(1);
        assert!(!verify(&modified, &fp));

        let mut recategorized = record.clone();
        recategorized.category = Category::Other;
        assert!(!verify(&recategorized, &fp));
    }

    #[test]
    fn test_fields_outside_projection_do_not_matter() {
        let record = card();
        let fp = fingerprint(&record);
        let annotated = record.clone().notes("kept in wallet");
        assert!(verify(&annotated, &fp));
    }

    #[test]
    fn test_garbage_fingerprint_is_mismatch() {
        let record = card();
        assert!(!verify(&record, &Fingerprint::from_encoded("!!not base64!!")));
        assert!(!verify(&record, &Fingerprint::from_encoded("AAAA")));
    }
}
