//! Data models for Quire
//!
//! Notes and folders share one document shape, discriminated by the `type`
//! field. The tag map is a singleton document mapping hashtags to note ids.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::storage::StoreResult;

/// Reserved id of the tag index document
pub const TAG_MAP_ID: &str = "tagMap";

/// A note or a folder
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    /// Store-assigned id; `None` until first written
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Current revision; required to update or remove
    #[serde(rename = "_rev", default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    /// Containing folder; `None` at the root
    #[serde(rename = "parentFolderID", default)]
    pub parent_folder_id: Option<String>,
    #[serde(flatten)]
    pub kind: DocumentKind,
}

/// Variant-specific fields
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DocumentKind {
    Note {
        #[serde(default)]
        title: String,
        /// Free text, may contain hashtags
        #[serde(rename = "note", default)]
        body: String,
    },
    Folder {
        #[serde(default, alias = "title")]
        name: String,
    },
}

impl Document {
    /// Create a new, unsaved note
    pub fn note(
        title: impl Into<String>,
        body: impl Into<String>,
        parent_folder_id: Option<String>,
    ) -> Self {
        Self {
            id: None,
            rev: None,
            parent_folder_id,
            kind: DocumentKind::Note {
                title: title.into(),
                body: body.into(),
            },
        }
    }

    /// Create a new, unsaved folder
    pub fn folder(name: impl Into<String>, parent_folder_id: Option<String>) -> Self {
        Self {
            id: None,
            rev: None,
            parent_folder_id,
            kind: DocumentKind::Folder { name: name.into() },
        }
    }

    /// Set an explicit id (for documents created with `put`)
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Parent folder id; empty strings count as root
    pub fn parent(&self) -> Option<&str> {
        self.parent_folder_id.as_deref().filter(|id| !id.is_empty())
    }

    pub fn is_note(&self) -> bool {
        matches!(self.kind, DocumentKind::Note { .. })
    }

    pub fn is_folder(&self) -> bool {
        matches!(self.kind, DocumentKind::Folder { .. })
    }

    /// `"note"` or `"folder"`
    pub fn type_name(&self) -> &'static str {
        match self.kind {
            DocumentKind::Note { .. } => "note",
            DocumentKind::Folder { .. } => "folder",
        }
    }

    /// Note body, or `None` for folders
    pub fn body(&self) -> Option<&str> {
        match &self.kind {
            DocumentKind::Note { body, .. } => Some(body),
            DocumentKind::Folder { .. } => None,
        }
    }

    /// Note title or folder name
    pub fn display_name(&self) -> &str {
        match &self.kind {
            DocumentKind::Note { title, .. } => title,
            DocumentKind::Folder { name } => name,
        }
    }

    /// Replace the body of a note; no effect on folders
    pub fn set_body(&mut self, new_body: impl Into<String>) {
        if let DocumentKind::Note { body, .. } = &mut self.kind {
            *body = new_body.into();
        }
    }

    /// Replace the title of a note or the name of a folder
    pub fn set_display_name(&mut self, value: impl Into<String>) {
        match &mut self.kind {
            DocumentKind::Note { title, .. } => *title = value.into(),
            DocumentKind::Folder { name } => *name = value.into(),
        }
    }

    pub fn to_value(&self) -> StoreResult<Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn from_value(value: Value) -> StoreResult<Self> {
        Ok(serde_json::from_value(value)?)
    }
}

/// The inverted tag index: hashtag to the ids of notes containing it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TagMap {
    #[serde(rename = "_id", default = "tag_map_id")]
    pub id: String,
    #[serde(rename = "_rev", default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    #[serde(default)]
    pub tags: BTreeMap<String, Vec<String>>,
}

fn tag_map_id() -> String {
    TAG_MAP_ID.to_string()
}

impl Default for TagMap {
    fn default() -> Self {
        Self {
            id: tag_map_id(),
            rev: None,
            tags: BTreeMap::new(),
        }
    }
}

impl TagMap {
    /// Remove a note id from every entry, dropping entries left empty
    ///
    /// Returns true if anything changed.
    pub fn remove_id(&mut self, note_id: &str) -> bool {
        let mut changed = false;
        self.tags.retain(|_, ids| {
            let before = ids.len();
            ids.retain(|id| id != note_id);
            changed |= ids.len() != before;
            !ids.is_empty()
        });
        changed
    }

    /// Remove a set of note ids in one pass
    ///
    /// Returns true if anything changed.
    pub fn remove_ids(&mut self, note_ids: &[String]) -> bool {
        let doomed: BTreeSet<&str> = note_ids.iter().map(String::as_str).collect();
        let mut changed = false;
        self.tags.retain(|_, ids| {
            let before = ids.len();
            ids.retain(|id| !doomed.contains(id.as_str()));
            changed |= ids.len() != before;
            !ids.is_empty()
        });
        changed
    }

    /// Add a note id under each tag, creating entries as needed
    ///
    /// A note is listed at most once per tag. Returns true if anything changed.
    pub fn add(&mut self, note_id: &str, tags: &[String]) -> bool {
        let mut changed = false;
        for tag in tags {
            let ids = self.tags.entry(tag.clone()).or_default();
            if !ids.iter().any(|id| id == note_id) {
                ids.push(note_id.to_string());
                changed = true;
            }
        }
        changed
    }

    /// Notes listed under a tag
    pub fn notes_for(&self, tag: &str) -> &[String] {
        self.tags.get(tag).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains(&self, tag: &str, note_id: &str) -> bool {
        self.notes_for(tag).iter().any(|id| id == note_id)
    }
}
