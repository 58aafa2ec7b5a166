//! drivefs configuration.
//!
//! Configuration is layered with `figment`: built-in defaults first, then an
//! optional file (TOML, YAML or JSON, picked by extension), then environment
//! variables prefixed with `DRIVEFS_`. Nested keys are separated with a
//! double underscore, e.g. `DRIVEFS_UPLOAD__MEMORY_LIMIT=512M`.

pub mod error;
mod size;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use exn::ResultExt;
use figment::Figment;
use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use serde::{Deserialize, Serialize};

pub use crate::error::{Error, ErrorKind, Result};
pub use crate::size::ByteSize;

pub const ENV_PREFIX: &str = "DRIVEFS_";
pub const MAX_PAGE_SIZE: u32 = 1000;
/// Export format when the map has neither the document type nor `default`.
pub const FALLBACK_EXPORT_MIME_TYPE: &str = "application/pdf";

/// How path segments below the root are interpreted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Addressing {
    /// Every segment is a Drive object id.
    #[default]
    Identifier,
    /// Every segment is a display name.
    Name,
}

/// What deleting a single-parent object does.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeleteAction {
    #[default]
    Trash,
    Delete,
}

/// The permission that makes an object "public".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishPermission {
    #[serde(rename = "type")]
    pub kind: String,
    pub role: String,
    /// Reachable by link only, not discoverable through search.
    pub with_link: bool,
}

impl Default for PublishPermission {
    fn default() -> Self {
        Self {
            kind: "anyone".into(),
            role: "reader".into(),
            with_link: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Memory ceiling used to size upload chunks. Falls back to the memory
    /// currently available on the host.
    pub memory_limit: Option<ByteSize>,
    /// Extra attempts for a chunk that failed with a retryable error.
    pub chunk_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            memory_limit: None,
            chunk_retries: 0,
            retry_backoff_ms: 500,
        }
    }
}

impl UploadConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListConfig {
    pub page_size: u32,
    /// Stop following continuation tokens after this many pages per folder.
    pub max_pages: Option<u32>,
}

impl Default for ListConfig {
    fn default() -> Self {
        Self {
            page_size: MAX_PAGE_SIZE,
            max_pages: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { timeout_secs: 300 }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root folder id, or the `root` alias for "My Drive".
    pub root: String,
    /// Path prefix applied beneath the root.
    pub prefix: Option<String>,
    pub addressing: Addressing,
    pub spaces: String,
    /// Report whether folders contain sub-folders in listings and metadata.
    pub use_has_dir: bool,
    /// Extra Drive fields requested and surfaced in metadata.
    pub additional_fetch_fields: Vec<String>,
    pub publish_permission: PublishPermission,
    /// Google Apps MIME type to export MIME type; `default` is the fallback.
    pub apps_export_map: BTreeMap<String, String>,
    /// Command name (e.g. `files.list`) to default query parameters.
    pub default_params: BTreeMap<String, BTreeMap<String, String>>,
    pub team_drive_id: Option<String>,
    /// `files.list` corpora when a shared drive is configured.
    pub corpora: String,
    pub delete_action: DeleteAction,
    pub upload: UploadConfig,
    pub list: ListConfig,
    pub http: HttpConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root: "root".into(),
            prefix: None,
            addressing: Addressing::default(),
            spaces: "drive".into(),
            use_has_dir: false,
            additional_fetch_fields: Vec::new(),
            publish_permission: PublishPermission::default(),
            apps_export_map: default_export_map(),
            default_params: BTreeMap::new(),
            team_drive_id: None,
            corpora: "drive".into(),
            delete_action: DeleteAction::default(),
            upload: UploadConfig::default(),
            list: ListConfig::default(),
            http: HttpConfig::default(),
        }
    }
}

fn default_export_map() -> BTreeMap<String, String> {
    [
        (
            "application/vnd.google-apps.document",
            "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        ),
        (
            "application/vnd.google-apps.spreadsheet",
            "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        ),
        ("application/vnd.google-apps.drawing", "application/pdf"),
        (
            "application/vnd.google-apps.presentation",
            "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        ),
        ("application/vnd.google-apps.script", "application/vnd.google-apps.script+json"),
        ("default", "application/pdf"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

impl Config {
    /// Default configuration file location, e.g.
    /// `~/.config/drivefs/config.toml` on Linux.
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "drivefs").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Layered figment: defaults, then `path` (if any), then environment.
    pub fn figment(path: Option<&Path>) -> Result<Figment> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            let extension = path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase);
            figment = match extension.as_deref() {
                Some("toml") => figment.merge(Toml::file(path)),
                Some("yaml" | "yml") => figment.merge(Yaml::file(path)),
                Some("json") => figment.merge(Json::file(path)),
                _ => exn::bail!(ErrorKind::UnsupportedFormat(path.to_path_buf())),
            };
        }
        Ok(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    /// Load and validate configuration.
    ///
    /// An explicit `path` must exist. Without one, the default location is
    /// used when a file is present there.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) if !path.exists() => exn::bail!(ErrorKind::NotFound(path.to_path_buf())),
            Some(path) => Some(path.to_path_buf()),
            None => Self::default_path().filter(|path| path.exists()),
        };
        match &path {
            Some(path) => tracing::debug!(path = %path.display(), "loading configuration file"),
            None => tracing::debug!("no configuration file, using defaults and environment"),
        }
        Self::from_figment(Self::figment(path.as_deref())?)
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: Config = figment.extract().or_raise(|| ErrorKind::Malformed)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.root.trim().is_empty() {
            exn::bail!(ErrorKind::Invalid("root must not be empty".into()));
        }
        if self.publish_permission.kind.is_empty() || self.publish_permission.role.is_empty() {
            exn::bail!(ErrorKind::Invalid("publish_permission needs both type and role".into()));
        }
        if !(1..=MAX_PAGE_SIZE).contains(&self.list.page_size) {
            exn::bail!(ErrorKind::Invalid(format!(
                "list.page_size must be between 1 and {MAX_PAGE_SIZE}, got {}",
                self.list.page_size
            )));
        }
        if self.list.max_pages == Some(0) {
            exn::bail!(ErrorKind::Invalid("list.max_pages must be at least 1".into()));
        }
        if self.http.timeout_secs == 0 {
            exn::bail!(ErrorKind::Invalid("http.timeout_secs must be positive".into()));
        }
        Ok(())
    }

    /// Export MIME type for a Google Apps document type.
    pub fn export_mime_for(&self, apps_mime: &str) -> &str {
        self.apps_export_map
            .get(apps_mime)
            .or_else(|| self.apps_export_map.get("default"))
            .map_or(FALLBACK_EXPORT_MIME_TYPE, String::as_str)
    }
}
