//! User-editable descriptive metadata.
//!
//! The metadata store holds one [`IdentityMetadata`] per record id, in a
//! TOML file intended to be edited by hand between runs: a display name
//! plus three named lists of external handles. Reconciliation at registry
//! open folds hand-added chat handles back onto the records.

use serde::{Deserialize, Serialize};

use crate::record::IdentityRecord;

/// Descriptive metadata for one identity.
///
/// All fields are optional in the on-disk form; missing fields
/// deserialize as empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityMetadata {
    /// Free-text display name, possibly empty.
    pub display_name: String,

    /// Contact email addresses.
    pub email: Vec<String>,

    /// Chat handles. These participate in alias resolution.
    pub chat: Vec<String>,

    /// Wiki user identifiers.
    pub wiki: Vec<String>,
}

impl IdentityMetadata {
    /// Synthesizes a metadata entry for a record that has none: empty
    /// display name, chat handles copied from the record's aliases.
    #[must_use]
    pub fn from_record(record: &IdentityRecord) -> Self {
        Self {
            chat: record.aliases.clone(),
            ..Self::default()
        }
    }

    /// Returns true if every field is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.display_name.is_empty()
            && self.email.is_empty()
            && self.chat.is_empty()
            && self.wiki.is_empty()
    }
}
