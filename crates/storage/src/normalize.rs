//! Drive object to [`Metadata`] conversion.

use std::collections::BTreeMap;

use drivefs_api::DriveFile;
use drivefs_config::Addressing;
use serde_json::Value;

use crate::error::Result;
use crate::models::{EntryKind, Metadata};
use crate::path::PathKey;
use crate::visibility::PublishTemplate;

/// Split a name on its last `.` into `(filename, extension)`.
///
/// ```
/// use drivefs_storage::normalize::split_file_extension;
///
/// assert_eq!(split_file_extension("archive.tar.gz"), ("archive.tar", "gz"));
/// assert_eq!(split_file_extension("README"), ("README", ""));
/// assert_eq!(split_file_extension(".bashrc"), ("", "bashrc"));
/// ```
pub fn split_file_extension(name: &str) -> (&str, &str) {
    name.rsplit_once('.').unwrap_or((name, ""))
}

#[derive(Debug, Clone)]
pub struct Normalizer {
    addressing: Addressing,
    template: PublishTemplate,
    additional_fields: Vec<String>,
}

impl Normalizer {
    pub fn new(addressing: Addressing, template: PublishTemplate) -> Self {
        Self {
            addressing,
            template,
            additional_fields: Vec::new(),
        }
    }

    pub fn with_additional_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.additional_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// The path segment that addresses `file` below its parent.
    pub fn segment<'a>(&self, file: &'a DriveFile) -> &'a str {
        match self.addressing {
            Addressing::Identifier => &file.id,
            Addressing::Name => &file.name,
        }
    }

    /// Build metadata for `file` found directly below `parent`.
    pub fn normalize(&self, file: &DriveFile, parent: &PathKey, has_dir: Option<bool>) -> Result<Metadata> {
        Ok(self.build(file, parent.join(self.segment(file))?, has_dir))
    }

    /// Build metadata for `file` at an already known path.
    pub fn normalize_at(&self, file: &DriveFile, path: PathKey, has_dir: Option<bool>) -> Metadata {
        self.build(file, path, has_dir)
    }

    fn build(&self, file: &DriveFile, path: PathKey, has_dir: Option<bool>) -> Metadata {
        let (filename, extension) = split_file_extension(&file.name);
        let kind = match file.is_folder() {
            true => EntryKind::Directory,
            false => EntryKind::File,
        };
        Metadata {
            kind,
            id: file.id.clone(),
            path,
            name: file.name.clone(),
            filename: filename.to_string(),
            extension: extension.to_string(),
            size: match kind {
                EntryKind::Directory => 0,
                EntryKind::File => file.size.unwrap_or(0),
            },
            mime_type: (kind == EntryKind::File).then(|| file.mime_type.clone()),
            modified: file.modified_time,
            visibility: self.template.visibility_of(file),
            has_dir: has_dir.filter(|_| kind == EntryKind::Directory),
            extra: self.extra(file),
        }
    }

    fn extra(&self, file: &DriveFile) -> BTreeMap<String, Value> {
        if self.additional_fields.is_empty() {
            return BTreeMap::new();
        }
        let Ok(Value::Object(all)) = serde_json::to_value(file) else {
            return BTreeMap::new();
        };
        self.additional_fields
            .iter()
            // `owners(emailAddress)` and `capabilities/canEdit` surface their top-level key
            .map(|field| field.split(['(', '/']).next().unwrap_or(field).trim())
            .filter_map(|key| all.get(key).map(|value| (key.to_string(), value.clone())))
            .collect()
    }
}
