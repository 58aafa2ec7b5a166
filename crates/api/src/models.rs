//! Wire models for the subset of Drive v3 resources the adapter touches.

use bytes::Bytes;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

/// MIME type Drive uses to mark an object as a folder.
pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";
/// Prefix shared by every native Google Apps document type.
pub const GOOGLE_APPS_PREFIX: &str = "application/vnd.google-apps.";

/// A Drive `files` resource.
///
/// Only the fields named in the request's field mask are populated; anything
/// Drive sends that is not modelled explicitly lands in [`extra`](Self::extra)
/// so additional fetch fields survive the round trip.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parents: Vec<String>,
    /// Drive serialises `int64` values as decimal strings.
    #[serde(default, deserialize_with = "lenient_u64", skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, with = "time::serde::rfc3339::option", skip_serializing_if = "Option::is_none")]
    pub modified_time: Option<OffsetDateTime>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub permissions: Vec<Permission>,
    #[serde(default)]
    pub trashed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_content_link: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_view_link: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DriveFile {
    pub fn is_folder(&self) -> bool {
        self.mime_type == FOLDER_MIME_TYPE
    }

    /// Native Docs/Sheets/Slides objects have no binary content and must be
    /// exported instead of downloaded.
    pub fn is_google_apps(&self) -> bool {
        self.mime_type.starts_with(GOOGLE_APPS_PREFIX) && !self.is_folder()
    }

    pub fn has_parent(&self, parent_id: &str) -> bool {
        self.parents.iter().any(|p| p == parent_id)
    }
}

/// A Drive `permissions` resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Permission {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Principal type: `user`, `group`, `domain` or `anyone`.
    #[serde(rename = "type")]
    pub kind: String,
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_file_discovery: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
}

impl Permission {
    pub fn new(kind: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            role: role.into(),
            ..Default::default()
        }
    }
}

/// One page of a `files.list` response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileList {
    #[serde(default)]
    pub files: Vec<DriveFile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionList {
    #[serde(default)]
    pub permissions: Vec<Permission>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
}

/// Writable metadata sent with create, update and copy requests.
///
/// Unset fields are left out of the request body, so an update only touches
/// what was set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parents: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trashed: Option<bool>,
}

impl FileMetadata {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn folder(name: impl Into<String>, parent: impl Into<String>) -> Self {
        Self::named(name).with_mime_type(FOLDER_MIME_TYPE).with_parent(parent)
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parents = Some(vec![parent.into()]);
        self
    }

    pub fn trashed(mut self) -> Self {
        self.trashed = Some(true);
        self
    }
}

/// Parent edges to add or remove in a `files.update` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateOptions {
    pub add_parents: Vec<String>,
    pub remove_parents: Vec<String>,
}

impl UpdateOptions {
    pub fn remove_parent(parent: impl Into<String>) -> Self {
        Self {
            remove_parents: vec![parent.into()],
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.add_parents.is_empty() && self.remove_parents.is_empty()
    }
}

/// Body for a single-shot (non-resumable) upload.
#[derive(Debug, Clone)]
pub struct Media {
    pub mime_type: String,
    pub data: Bytes,
}

impl Media {
    pub fn new(mime_type: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: data.into(),
        }
    }
}

fn lenient_u64<'de, D>(deserializer: D) -> std::result::Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }
    match Option::<Raw>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Raw::Number(n)) => Ok(Some(n)),
        Some(Raw::Text(s)) => s.parse().map(Some).map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_file() {
        let json = r#"{
            "kind": "drive#file",
            "id": "1abc",
            "name": "report.pdf",
            "mimeType": "application/pdf",
            "parents": ["0root"],
            "size": "2048",
            "modifiedTime": "2024-03-01T12:30:00.000Z",
            "permissions": [{"id": "p1", "type": "anyone", "role": "reader", "allowFileDiscovery": false}],
            "starred": true
        }"#;
        let file: DriveFile = serde_json::from_str(json).unwrap();
        assert_eq!(file.id, "1abc");
        assert_eq!(file.size, Some(2048));
        assert_eq!(file.parents, vec!["0root"]);
        assert_eq!(file.permissions[0].kind, "anyone");
        assert_eq!(file.permissions[0].allow_file_discovery, Some(false));
        assert_eq!(file.modified_time.map(|t| t.unix_timestamp()), Some(1_709_296_200));
        assert_eq!(file.extra.get("starred"), Some(&Value::Bool(true)));
        assert!(!file.is_folder());
        assert!(!file.trashed);
    }

    #[test]
    fn test_numeric_size_and_missing_fields() {
        let file: DriveFile = serde_json::from_str(r#"{"id": "x", "size": 12}"#).unwrap();
        assert_eq!(file.size, Some(12));
        assert!(file.modified_time.is_none());
        assert!(file.parents.is_empty());
    }

    #[test]
    fn test_google_apps_detection() {
        let mut file = DriveFile {
            mime_type: "application/vnd.google-apps.document".into(),
            ..Default::default()
        };
        assert!(file.is_google_apps());
        file.mime_type = FOLDER_MIME_TYPE.into();
        assert!(file.is_folder());
        assert!(!file.is_google_apps());
    }

    #[test]
    fn test_metadata_skips_unset_fields() {
        let body = serde_json::to_value(FileMetadata::named("a.txt").trashed()).unwrap();
        assert_eq!(body, serde_json::json!({"name": "a.txt", "trashed": true}));
        let folder = serde_json::to_value(FileMetadata::folder("docs", "root")).unwrap();
        assert_eq!(folder["mimeType"], FOLDER_MIME_TYPE);
        assert_eq!(folder["parents"], serde_json::json!(["root"]));
    }
}
