//! Object naming convention.
//!
//! Object names are the on-disk contract:
//!
//! | Object                 | Name                           | Folder      |
//! |------------------------|--------------------------------|-------------|
//! | record envelope        | `record_<id>.json`             | records     |
//! | primary attachment     | `record_<id>_image.enc`        | records     |
//! | size-variant attachment| `record_<id>_thumb_<size>.enc` | records     |
//! | index                  | `index.json`                   | index       |
//! | preferences            | `preferences.json`             | preferences |
//!
//! Every object belonging to a record starts with `record_<id>`, which is
//! what cascading deletes match on. Record ids are fixed-length UUIDs, so one
//! record's prefix never matches another record's objects.

use serde::{Deserialize, Serialize};
use std::fmt;

use cardsafe_common::RecordId;

/// Name of the index object.
pub const INDEX_OBJECT_NAME: &str = "index.json";

/// Name of the preferences object.
pub const PREFERENCES_OBJECT_NAME: &str = "preferences.json";

const RECORD_PREFIX: &str = "record_";
const JSON_MIME_TYPE: &str = "application/json";
const BINARY_MIME_TYPE: &str = "application/octet-stream";

/// Which subfolder of the layout an object lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FolderKind {
    Records,
    Index,
    Preferences,
}

/// Attachment slot of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum AttachmentSlot {
    /// The full-size image.
    Primary,
    /// A size variant, `size` pixels on its long edge.
    Thumbnail { size: u32 },
}

/// A logical object of the vault, addressable by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKey {
    Record(RecordId),
    Attachment(RecordId, AttachmentSlot),
    Index,
    Preferences,
}

impl ObjectKey {
    /// The object name in the store.
    pub fn file_name(&self) -> String {
        match self {
            ObjectKey::Record(id) => format!("{}{}.json", RECORD_PREFIX, id),
            ObjectKey::Attachment(id, AttachmentSlot::Primary) => {
                format!("{}{}_image.enc", RECORD_PREFIX, id)
            }
            ObjectKey::Attachment(id, AttachmentSlot::Thumbnail { size }) => {
                format!("{}{}_thumb_{}.enc", RECORD_PREFIX, id, size)
            }
            ObjectKey::Index => INDEX_OBJECT_NAME.to_string(),
            ObjectKey::Preferences => PREFERENCES_OBJECT_NAME.to_string(),
        }
    }

    /// The subfolder holding this object.
    pub fn folder(&self) -> FolderKind {
        match self {
            ObjectKey::Record(_) | ObjectKey::Attachment(..) => FolderKind::Records,
            ObjectKey::Index => FolderKind::Index,
            ObjectKey::Preferences => FolderKind::Preferences,
        }
    }

    /// MIME type the object is stored with.
    pub fn mime_type(&self) -> &'static str {
        match self {
            ObjectKey::Attachment(..) => BINARY_MIME_TYPE,
            _ => JSON_MIME_TYPE,
        }
    }

    /// The record this object belongs to, if any.
    pub fn record_id(&self) -> Option<RecordId> {
        match self {
            ObjectKey::Record(id) | ObjectKey::Attachment(id, _) => Some(*id),
            _ => None,
        }
    }

    /// Parse an object name back into its key.
    ///
    /// Returns `None` for names outside the convention.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            INDEX_OBJECT_NAME => return Some(ObjectKey::Index),
            PREFERENCES_OBJECT_NAME => return Some(ObjectKey::Preferences),
            _ => {}
        }

        let rest = name.strip_prefix(RECORD_PREFIX)?;
        if let Some(id) = rest.strip_suffix(".json") {
            return RecordId::parse(id).ok().map(ObjectKey::Record);
        }

        let stem = rest.strip_suffix(".enc")?;
        if let Some(id) = stem.strip_suffix("_image") {
            let id = RecordId::parse(id).ok()?;
            return Some(ObjectKey::Attachment(id, AttachmentSlot::Primary));
        }

        let (id, size) = stem.rsplit_once("_thumb_")?;
        let id = RecordId::parse(id).ok()?;
        let size = size.parse().ok()?;
        Some(ObjectKey::Attachment(id, AttachmentSlot::Thumbnail { size }))
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file_name())
    }
}

/// Name prefix shared by a record and all of its attachments.
pub fn record_prefix(id: &RecordId) -> String {
    format!("{}{}", RECORD_PREFIX, id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id() -> RecordId {
        RecordId::parse("0b7c8a3e-1f2d-4c5b-9a6e-7d8f9e0a1b2c").unwrap()
    }

    #[test]
    fn test_file_names() {
        let id = id();
        assert_eq!(
            ObjectKey::Record(id).file_name(),
            "record_0b7c8a3e-1f2d-4c5b-9a6e-7d8f9e0a1b2c.json"
        );
        assert_eq!(
            ObjectKey::Attachment(id, AttachmentSlot::Primary).file_name(),
            "record_0b7c8a3e-1f2d-4c5b-9a6e-7d8f9e0a1b2c_image.enc"
        );
        assert_eq!(
            ObjectKey::Attachment(id, AttachmentSlot::Thumbnail { size: 256 }).file_name(),
            "record_0b7c8a3e-1f2d-4c5b-9a6e-7d8f9e0a1b2c_thumb_256.enc"
        );
        assert_eq!(ObjectKey::Index.file_name(), "index.json");
        assert_eq!(ObjectKey::Preferences.file_name(), "preferences.json");
    }

    #[test]
    fn test_parse_inverts_file_name() {
        let id = id();
        for key in [
            ObjectKey::Record(id),
            ObjectKey::Attachment(id, AttachmentSlot::Primary),
            ObjectKey::Attachment(id, AttachmentSlot::Thumbnail { size: 64 }),
            ObjectKey::Index,
            ObjectKey::Preferences,
        ] {
            assert_eq!(ObjectKey::parse(&key.file_name()), Some(key));
        }
    }

    #[test]
    fn test_parse_rejects_foreign_names() {
        assert_eq!(ObjectKey::parse("notes.txt"), None);
        assert_eq!(ObjectKey::parse("record_123.json"), None);
        assert_eq!(ObjectKey::parse(&format!("record_{}_thumb_x.enc", id())), None);
        assert_eq!(ObjectKey::parse(&format!("record_{}.enc", id())), None);
    }

    #[test]
    fn test_prefix_covers_all_record_objects() {
        let id = id();
        let prefix = record_prefix(&id);
        assert!(ObjectKey::Record(id).file_name().starts_with(&prefix));
        assert!(ObjectKey::Attachment(id, AttachmentSlot::Primary)
            .file_name()
            .starts_with(&prefix));
        assert!(!ObjectKey::Record(RecordId::new()).file_name().starts_with(&prefix));
    }

    #[test]
    fn test_folder_and_mime() {
        let id = id();
        assert_eq!(ObjectKey::Record(id).folder(), FolderKind::Records);
        assert_eq!(ObjectKey::Index.folder(), FolderKind::Index);
        assert_eq!(ObjectKey::Preferences.folder(), FolderKind::Preferences);
        assert_eq!(
            ObjectKey::Attachment(id, AttachmentSlot::Primary).mime_type(),
            "application/octet-stream"
        );
        assert_eq!(ObjectKey::Index.mime_type(), "application/json");
    }
}
