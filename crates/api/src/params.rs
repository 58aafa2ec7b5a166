//! Per-command default query parameters.
//!
//! Every request the REST client sends is tagged with a [`Command`]. Defaults
//! registered for that command are applied first and explicit parameters
//! replace them key by key.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use derive_more::Display;

use crate::error::{ErrorKind, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum Command {
    #[display("files.copy")]
    FilesCopy,
    #[display("files.create")]
    FilesCreate,
    #[display("files.delete")]
    FilesDelete,
    #[display("files.export")]
    FilesExport,
    #[display("files.get")]
    FilesGet,
    #[display("files.list")]
    FilesList,
    #[display("files.update")]
    FilesUpdate,
    #[display("permissions.create")]
    PermissionsCreate,
    #[display("permissions.delete")]
    PermissionsDelete,
    #[display("permissions.list")]
    PermissionsList,
}

impl Command {
    pub const ALL: [Command; 10] = [
        Self::FilesCopy,
        Self::FilesCreate,
        Self::FilesDelete,
        Self::FilesExport,
        Self::FilesGet,
        Self::FilesList,
        Self::FilesUpdate,
        Self::PermissionsCreate,
        Self::PermissionsDelete,
        Self::PermissionsList,
    ];

    /// Commands that accept `supportsAllDrives`.
    fn supports_all_drives(self) -> bool {
        !matches!(self, Self::FilesExport)
    }
}

impl FromStr for Command {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|command| command.to_string() == s)
            .ok_or_else(|| exn::Exn::from(ErrorKind::InvalidRequest(format!("unknown command {s}"))))
    }
}

pub type Params = BTreeMap<String, String>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestDefaults {
    by_command: HashMap<Command, Params>,
}

impl RequestDefaults {
    /// Build defaults from a `command name -> parameters` map, as found in
    /// configuration files.
    pub fn from_map(map: &BTreeMap<String, BTreeMap<String, String>>) -> Result<Self> {
        let mut defaults = Self::default();
        for (name, params) in map {
            let command: Command = name.parse()?;
            for (key, value) in params {
                defaults.set(command, key.clone(), value.clone());
            }
        }
        Ok(defaults)
    }

    pub fn set(&mut self, command: Command, key: impl Into<String>, value: impl Into<String>) {
        self.by_command.entry(command).or_default().insert(key.into(), value.into());
    }

    /// Apply defaults for `command` underneath the explicit parameters.
    pub fn apply(&self, command: Command, explicit: Params) -> Params {
        match self.by_command.get(&command) {
            Some(defaults) => {
                let mut merged = defaults.clone();
                merged.extend(explicit);
                merged
            },
            None => explicit,
        }
    }

    /// Enable shared drive support for every command and scope `files.list`
    /// to one shared drive. Previously configured values win.
    pub fn with_shared_drive(mut self, drive_id: &str, corpora: &str) -> Self {
        for command in Command::ALL.into_iter().filter(|c| c.supports_all_drives()) {
            self.set_if_absent(command, "supportsAllDrives", "true");
        }
        self.set_if_absent(Command::FilesList, "corpora", corpora);
        self.set_if_absent(Command::FilesList, "includeItemsFromAllDrives", "true");
        self.set_if_absent(Command::FilesList, "driveId", drive_id);
        self
    }

    fn set_if_absent(&mut self, command: Command, key: &str, value: &str) {
        self.by_command
            .entry(command)
            .or_default()
            .entry(key.to_string())
            .or_insert_with(|| value.to_string());
    }

    pub fn get(&self, command: Command, key: &str) -> Option<&str> {
        self.by_command.get(&command)?.get(key).map(String::as_str)
    }
}

/// Field masks requested for single objects and for list pages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMask {
    fields: Vec<String>,
}

impl FieldMask {
    pub const BASE: [&'static str; 10] = [
        "id",
        "name",
        "mimeType",
        "modifiedTime",
        "parents",
        "permissions",
        "size",
        "trashed",
        "webContentLink",
        "webViewLink",
    ];

    pub fn new<I, S>(additional: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut fields: Vec<String> = Self::BASE.iter().map(|f| f.to_string()).collect();
        for field in additional {
            let field = field.as_ref().trim();
            if !field.is_empty() && !fields.iter().any(|f| f == field) {
                fields.push(field.to_string());
            }
        }
        Self { fields }
    }

    /// Mask for `files.get`, `files.create` and friends.
    pub fn object(&self) -> String {
        self.fields.join(",")
    }

    /// Mask for `files.list`.
    pub fn list(&self) -> String {
        format!("files({}),nextPageToken", self.object())
    }
}

impl Default for FieldMask {
    fn default() -> Self {
        Self::new::<_, &str>([])
    }
}

impl fmt::Display for FieldMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.object())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pairs: &[(&str, &str)]) -> Params {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_explicit_params_override_defaults() {
        let mut defaults = RequestDefaults::default();
        defaults.set(Command::FilesList, "spaces", "appDataFolder");
        defaults.set(Command::FilesList, "orderBy", "name");
        let merged = defaults.apply(Command::FilesList, params(&[("spaces", "drive")]));
        assert_eq!(merged, params(&[("orderBy", "name"), ("spaces", "drive")]));
        assert_eq!(defaults.apply(Command::FilesGet, Params::new()), Params::new());
    }

    #[test]
    fn test_shared_drive_defaults() {
        let mut defaults = RequestDefaults::default();
        defaults.set(Command::FilesList, "corpora", "allDrives");
        let defaults = defaults.with_shared_drive("0AShared", "drive");
        assert_eq!(defaults.get(Command::FilesGet, "supportsAllDrives"), Some("true"));
        assert_eq!(defaults.get(Command::PermissionsCreate, "supportsAllDrives"), Some("true"));
        assert_eq!(defaults.get(Command::FilesExport, "supportsAllDrives"), None);
        assert_eq!(defaults.get(Command::FilesList, "driveId"), Some("0AShared"));
        assert_eq!(defaults.get(Command::FilesList, "corpora"), Some("allDrives"));
    }

    #[test]
    fn test_from_map() {
        let mut raw: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
        raw.entry("files.get".into()).or_default().insert("acknowledgeAbuse".into(), "true".into());
        let defaults = RequestDefaults::from_map(&raw).unwrap();
        assert_eq!(defaults.get(Command::FilesGet, "acknowledgeAbuse"), Some("true"));

        raw.entry("files.watch".into()).or_default();
        assert!(RequestDefaults::from_map(&raw).is_err());
    }

    #[test]
    fn test_field_mask() {
        let mask = FieldMask::new(["description", "id", " "]);
        assert!(mask.object().ends_with(",webViewLink,description"));
        assert_eq!(mask.object().matches("id,").count(), 1);
        assert!(mask.list().starts_with("files(id,name,"));
        assert!(mask.list().ends_with("),nextPageToken"));
    }
}
