//! Object memo tables.
//!
//! Two indices over the same objects: by id, and by `(parent id, leaf)`.
//! The by-name index also holds negative entries so repeated `exists` checks
//! for a missing path cost one remote lookup, not one per call. Entries never
//! expire; mutations invalidate what they touch and composite operations
//! clear everything.

use std::collections::HashMap;
use std::sync::Arc;

use drivefs_api::DriveFile;
use tokio::sync::Mutex;

/// Shared handle to the cache owned by one adapter instance.
pub type SharedCache = Arc<Mutex<ObjectCache>>;

#[derive(Debug, Clone, PartialEq)]
pub enum CacheEntry {
    Found(DriveFile),
    /// Known not to exist.
    Missing,
}

type NameKey = (String, String);

#[derive(Debug, Default)]
pub struct ObjectCache {
    by_id: HashMap<String, DriveFile>,
    by_name: HashMap<NameKey, CacheEntry>,
    /// Reverse of `by_name`: the name keys each object id is cached under.
    names: HashMap<String, Vec<NameKey>>,
    has_dir: HashMap<String, bool>,
}

impl ObjectCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedCache {
        Arc::new(Mutex::new(Self::new()))
    }

    pub fn get_by_id(&self, id: &str) -> Option<&DriveFile> {
        self.by_id.get(id)
    }

    pub fn get_by_name(&self, parent_id: &str, leaf: &str) -> Option<&CacheEntry> {
        self.by_name.get(&(parent_id.to_string(), leaf.to_string()))
    }

    /// Store an object, optionally also under `(parent, leaf)`.
    ///
    /// Every by-name entry already pointing at the same id is refreshed too,
    /// so both indices agree about the object.
    pub fn put(&mut self, key: Option<(&str, &str)>, file: DriveFile) {
        if let Some(keys) = self.names.get(&file.id) {
            for name in keys {
                if let Some(CacheEntry::Found(existing)) = self.by_name.get_mut(name) {
                    *existing = file.clone();
                }
            }
        }
        if let Some((parent_id, leaf)) = key {
            let name = (parent_id.to_string(), leaf.to_string());
            self.set_name(name.clone(), CacheEntry::Found(file.clone()));
            let keys = self.names.entry(file.id.clone()).or_default();
            if !keys.contains(&name) {
                keys.push(name);
            }
        }
        self.by_id.insert(file.id.clone(), file);
    }

    /// Remember that nothing exists at `(parent, leaf)`.
    pub fn put_missing(&mut self, parent_id: &str, leaf: &str) {
        self.set_name((parent_id.to_string(), leaf.to_string()), CacheEntry::Missing);
    }

    /// Forget an object and every by-name entry pointing at it.
    pub fn invalidate(&mut self, id: &str) {
        self.by_id.remove(id);
        self.has_dir.remove(id);
        for name in self.names.remove(id).unwrap_or_default() {
            if matches!(self.by_name.get(&name), Some(CacheEntry::Found(file)) if file.id == id) {
                self.by_name.remove(&name);
            }
        }
    }

    /// Forget a single by-name entry (positive or negative).
    pub fn invalidate_name(&mut self, parent_id: &str, leaf: &str) {
        let name = (parent_id.to_string(), leaf.to_string());
        if let Some(CacheEntry::Found(previous)) = self.by_name.remove(&name) {
            self.unindex(&previous.id, &name);
        }
    }

    /// Replace the entry at `name`, dropping the reverse link of whatever
    /// object held it before.
    fn set_name(&mut self, name: NameKey, entry: CacheEntry) {
        let new_id = match &entry {
            CacheEntry::Found(file) => Some(file.id.clone()),
            CacheEntry::Missing => None,
        };
        if let Some(CacheEntry::Found(previous)) = self.by_name.insert(name.clone(), entry)
            && new_id.as_deref() != Some(previous.id.as_str())
        {
            self.unindex(&previous.id, &name);
        }
    }

    fn unindex(&mut self, id: &str, name: &NameKey) {
        if let Some(keys) = self.names.get_mut(id) {
            keys.retain(|key| key != name);
            if keys.is_empty() {
                self.names.remove(id);
            }
        }
    }

    pub fn has_dir(&self, id: &str) -> Option<bool> {
        self.has_dir.get(id).copied()
    }

    pub fn set_has_dir(&mut self, id: &str, has_dir: bool) {
        self.has_dir.insert(id.to_string(), has_dir);
    }

    pub fn clear(&mut self) {
        self.by_id.clear();
        self.by_name.clear();
        self.names.clear();
        self.has_dir.clear();
    }

    /// Number of objects known by id.
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty() && self.by_name.is_empty()
    }
}
