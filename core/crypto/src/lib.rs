//! Envelope cipher for Cardsafe.
//!
//! This module provides:
//! - Two-stage key derivation (PBKDF2-HMAC-SHA256, then HKDF-SHA256)
//! - Authenticated encryption using AES-256-GCM with a detached tag
//! - The four-field envelope wire format
//! - An advisory passphrase strength estimate
//!
//! # Security Guarantees
//! - Derived keys are move-only and zeroized on drop
//! - Every encryption uses a fresh random IV, and a fresh salt unless pinned
//! - No plaintext, passphrase or key material is ever logged

pub mod aead;
pub mod envelope;
pub mod kdf;
pub mod keys;
pub mod strength;

pub use envelope::{Envelope, EnvelopeCipher};
pub use kdf::{derive_key, KdfParams, DEFAULT_ITERATIONS, DEFAULT_LABEL, MIN_ITERATIONS};
pub use keys::{DerivedKey, Iv, Salt, IV_LENGTH, KEY_LENGTH, SALT_LENGTH, TAG_LENGTH};
pub use strength::{assess_passphrase, StrengthLevel, StrengthReport};
