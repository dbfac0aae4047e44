//! Vault records.
//!
//! A record is one card-like entry. It is stored as a single envelope; its
//! attachments live in their own objects and are linked by [`AttachmentRef`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use cardsafe_common::RecordId;
use cardsafe_storage::AttachmentSlot;

/// Kind of entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    PaymentCard,
    Identity,
    Loyalty,
    Other,
}

impl Category {
    /// Stable name used in encodings.
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::PaymentCard => "payment_card",
            Category::Identity => "identity",
            Category::Loyalty => "loyalty",
            Category::Other => "other",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Link from a record to one of its attachments.
///
/// `object_id` is the store id of the attachment object once it has been
/// uploaded. The object name is derived from the record id and slot, so a
/// missing id only costs a lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub slot: AttachmentSlot,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_id: Option<String>,
}

/// A vault entry.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    pub category: Category,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Extra fields such as holder name or CVV, keyed by field name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom_fields: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<AttachmentRef>,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "timestamp")]
    pub modified_at: DateTime<Utc>,
}

impl Record {
    /// Create a record with a fresh id and both timestamps set to now.
    pub fn new(category: Category, label: impl Into<String>) -> Self {
        Self::with_id(RecordId::new(), category, label)
    }

    /// Create a record with a caller-assigned id.
    pub fn with_id(id: RecordId, category: Category, label: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            category,
            label: label.into(),
            number: None,
            expiry: None,
            issuer_code: None,
            notes: None,
            custom_fields: BTreeMap::new(),
            attachments: Vec::new(),
            created_at: now,
            modified_at: now,
        }
    }

    pub fn number(mut self, number: impl Into<String>) -> Self {
        self.number = Some(number.into());
        self
    }

    pub fn expiry(mut self, expiry: impl Into<String>) -> Self {
        self.expiry = Some(expiry.into());
        self
    }

    pub fn issuer_code(mut self, code: impl Into<String>) -> Self {
        self.issuer_code = Some(code.into());
        self
    }

    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn custom_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_fields.insert(name.into(), value.into());
        self
    }

    /// Last four digits of the number, ignoring separators.
    ///
    /// `None` when there is no number or it has fewer than four digits.
    pub fn last_four(&self) -> Option<String> {
        let digits: Vec<char> = self
            .number
            .as_deref()?
            .chars()
            .filter(char::is_ascii_digit)
            .collect();
        if digits.len() < 4 {
            return None;
        }
        Some(digits[digits.len() - 4..].iter().collect())
    }

    /// Mark the record as modified now.
    pub fn touch(&mut self) {
        self.modified_at = Utc::now();
    }

    /// The attachment link for `slot`, if any.
    pub fn attachment(&self, slot: AttachmentSlot) -> Option<&AttachmentRef> {
        self.attachments.iter().find(|a| a.slot == slot)
    }

    /// Link `slot` to a stored object, replacing an existing link.
    pub fn set_attachment(&mut self, slot: AttachmentSlot, object_id: impl Into<String>) {
        let object_id = Some(object_id.into());
        match self.attachments.iter_mut().find(|a| a.slot == slot) {
            Some(existing) => existing.object_id = object_id,
            None => self.attachments.push(AttachmentRef { slot, object_id }),
        }
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("id", &self.id)
            .field("category", &self.category)
            .field("label", &self.label)
            .field("last_four", &self.last_four())
            .field("attachments", &self.attachments.len())
            .field("modified_at", &self.modified_at)
            .finish_non_exhaustive()
    }
}

/// Fixed-width RFC 3339 timestamps: `YYYY-MM-DDTHH:MM:SS.nnnnnnnnnZ`.
pub mod timestamp {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    /// Render a timestamp in the canonical form.
    pub fn format(value: &DateTime<Utc>) -> String {
        value.to_rfc3339_opts(SecondsFormat::Nanos, true)
    }

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format(value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let s = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}
