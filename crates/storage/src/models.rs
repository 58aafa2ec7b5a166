//! Storage models.
//!
//! [`Metadata`] is what every listing and `stat` returns. It is derived from
//! a Drive object each time and never stored.

use std::collections::BTreeMap;

use serde_json::Value;
use time::OffsetDateTime;

use crate::path::PathKey;
use crate::visibility::Visibility;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    File,
    Directory,
}

/// Normalized metadata for one object.
#[derive(Debug, Clone, PartialEq)]
pub struct Metadata {
    pub kind: EntryKind,
    /// Drive object id
    pub id: String,
    /// Path relative to the adapter root (and prefix)
    pub path: PathKey,
    /// Display name as stored in Drive
    pub name: String,
    /// Name without the last extension
    pub filename: String,
    pub extension: String,
    /// Size in bytes; zero for directories and native Google Apps documents
    pub size: u64,
    /// MIME type, files only
    pub mime_type: Option<String>,
    pub modified: Option<OffsetDateTime>,
    pub visibility: Visibility,
    /// Whether a directory contains sub-directories, when probed
    pub has_dir: Option<bool>,
    /// Additional fields requested through configuration
    pub extra: BTreeMap<String, Value>,
}

impl Metadata {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }
}
