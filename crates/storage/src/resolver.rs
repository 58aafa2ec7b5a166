//! Path to object resolution.
//!
//! Paths are walked one segment at a time from the root. Each step consults
//! the [`ObjectCache`](crate::cache::ObjectCache) first and only falls back
//! to Drive on a miss. A remote miss is cached too, so asking about the same
//! missing path twice costs one request.

use drivefs_api::{ApiHandle, DriveFile, FieldMask, FileMetadata, ListRequest, Query};
use drivefs_config::Addressing;
use tokio::sync::OnceCell;
use tracing::instrument;

use crate::cache::{CacheEntry, SharedCache};
use crate::error::{ApiResultExt, ErrorKind, Operation, Result, is_api_not_found};
use crate::path::{PathKey, SplitMode, split};

/// A resolved object together with the parent it was reached through.
#[derive(Debug, Clone, PartialEq)]
pub struct Located {
    pub file: DriveFile,
    /// `None` for the root.
    pub parent_id: Option<String>,
}

pub struct Resolver {
    api: ApiHandle,
    cache: SharedCache,
    /// Configured root: a folder id, a shared drive id or the `root` alias.
    root_id: String,
    root: OnceCell<DriveFile>,
    addressing: Addressing,
    fields: FieldMask,
    spaces: String,
    use_has_dir: bool,
}

impl Resolver {
    pub fn new(api: ApiHandle, cache: SharedCache, root_id: impl Into<String>, addressing: Addressing) -> Self {
        Self {
            api,
            cache,
            root_id: root_id.into(),
            root: OnceCell::new(),
            addressing,
            fields: FieldMask::default(),
            spaces: "drive".to_string(),
            use_has_dir: false,
        }
    }

    pub fn with_fields(mut self, fields: FieldMask) -> Self {
        self.fields = fields;
        self
    }

    pub fn with_spaces(mut self, spaces: impl Into<String>) -> Self {
        self.spaces = spaces.into();
        self
    }

    pub fn with_has_dir(mut self, enabled: bool) -> Self {
        self.use_has_dir = enabled;
        self
    }

    pub fn api(&self) -> &ApiHandle {
        &self.api
    }

    pub fn cache(&self) -> &SharedCache {
        &self.cache
    }

    pub fn fields(&self) -> &FieldMask {
        &self.fields
    }

    pub fn spaces(&self) -> &str {
        &self.spaces
    }

    pub fn addressing(&self) -> Addressing {
        self.addressing
    }

    pub fn uses_has_dir(&self) -> bool {
        self.use_has_dir
    }

    /// The root folder, fetched once per resolver.
    pub async fn root(&self) -> Result<DriveFile> {
        let root = self
            .root
            .get_or_try_init(|| async {
                let file = self
                    .api
                    .get_file(&self.root_id, &self.fields.object())
                    .await
                    .or_fail(Operation::Resolve, "/")?;
                tracing::debug!(alias = %self.root_id, id = %file.id, "resolved root folder");
                Ok::<_, crate::error::Error>(file)
            })
            .await?;
        Ok(root.clone())
    }

    /// Whether `id` names the root, either by alias or by its real id.
    pub fn is_root_id(&self, id: &str) -> bool {
        id == self.root_id || self.root.get().is_some_and(|root| root.id == id)
    }

    fn is_child(&self, file: &DriveFile, parent_id: &str) -> bool {
        file.has_parent(parent_id) || (self.is_root_id(parent_id) && file.parents.iter().any(|p| self.is_root_id(p)))
    }

    /// Resolve a path, returning `None` when any segment is missing.
    #[instrument(level = "debug", skip_all, fields(path = %key))]
    pub async fn resolve(&self, key: &PathKey) -> Result<Option<Located>> {
        let mut current = self.root().await?;
        if let Some(located) = self.cached_by_id(key, &current.id).await {
            return Ok(Some(located));
        }
        let mut parent_id = None;
        let mut walked = PathKey::root();
        for segment in key.segments() {
            walked = walked.join(segment)?;
            if !current.is_folder() {
                return Ok(None);
            }
            match self.lookup_child(&current.id, segment, &walked).await? {
                Some(child) => {
                    parent_id = Some(current.id.clone());
                    current = child;
                },
                None => return Ok(None),
            }
        }
        Ok(Some(Located {
            file: current,
            parent_id,
        }))
    }

    /// Resolve a path, also answering whether a folder has sub-folders when
    /// the child-directory probe is enabled.
    pub async fn resolve_checked(&self, key: &PathKey, check_has_children: bool) -> Result<Option<(Located, Option<bool>)>> {
        let Some(located) = self.resolve(key).await? else {
            return Ok(None);
        };
        let has_dir = match check_has_children && self.use_has_dir && located.file.is_folder() {
            true => Some(self.has_dir(&located.file.id, key).await?),
            false => None,
        };
        Ok(Some((located, has_dir)))
    }

    /// Resolve a path that must exist.
    pub async fn require(&self, key: &PathKey) -> Result<Located> {
        match self.resolve(key).await? {
            Some(located) => Ok(located),
            None => exn::bail!(ErrorKind::NotFound(key.to_string())),
        }
    }

    /// In identifier mode the last two segments are the parent id and the
    /// object id, so a cached object linked under that parent answers the
    /// path without walking it.
    async fn cached_by_id(&self, key: &PathKey, root_id: &str) -> Option<Located> {
        if self.addressing != Addressing::Identifier || key.is_root() {
            return None;
        }
        let (parent_id, id) = split(key.as_str(), root_id, SplitMode::ImmediateParent);
        let cache = self.cache.lock().await;
        let file = cache.get_by_id(id).filter(|file| !file.trashed && self.is_child(file, parent_id))?;
        tracing::debug!(path = %key, "cache hit by id");
        Some(Located {
            file: file.clone(),
            parent_id: Some(parent_id.to_string()),
        })
    }

    async fn lookup_child(&self, parent_id: &str, leaf: &str, path: &PathKey) -> Result<Option<DriveFile>> {
        {
            let cache = self.cache.lock().await;
            if self.addressing == Addressing::Identifier
                && let Some(file) = cache.get_by_id(leaf)
                && self.is_child(file, parent_id)
                && !file.trashed
            {
                tracing::debug!(%path, "cache hit by id");
                return Ok(Some(file.clone()));
            }
            match cache.get_by_name(parent_id, leaf) {
                Some(CacheEntry::Found(file)) => {
                    tracing::debug!(%path, "cache hit by name");
                    return Ok(Some(file.clone()));
                },
                Some(CacheEntry::Missing) => {
                    tracing::debug!(%path, "cached miss");
                    return Ok(None);
                },
                None => {},
            }
        }
        tracing::debug!(%path, "cache miss");
        let found = match self.addressing {
            Addressing::Identifier => self.fetch_by_id(parent_id, leaf, path).await?,
            Addressing::Name => self.search_by_name(parent_id, leaf, path).await?,
        };
        let mut cache = self.cache.lock().await;
        match &found {
            Some(file) => cache.put(Some((parent_id, leaf)), file.clone()),
            None => cache.put_missing(parent_id, leaf),
        }
        Ok(found)
    }

    async fn fetch_by_id(&self, parent_id: &str, id: &str, path: &PathKey) -> Result<Option<DriveFile>> {
        match self.api.get_file(id, &self.fields.object()).await {
            Ok(file) if !file.trashed && self.is_child(&file, parent_id) => Ok(Some(file)),
            Ok(file) => {
                tracing::debug!(%path, trashed = file.trashed, "object exists but not at this path");
                Ok(None)
            },
            Err(err) if is_api_not_found(&err) => Ok(None),
            Err(err) => Err(err).or_fail(Operation::Resolve, path.as_str()),
        }
    }

    async fn search_by_name(&self, parent_id: &str, name: &str, path: &PathKey) -> Result<Option<DriveFile>> {
        let request = ListRequest::new(Query::named_child(parent_id, name))
            .page_size(2)
            .order_by("createdTime")
            .fields(self.fields.list())
            .spaces(self.spaces.as_str());
        let page = self.api.list_files(&request).await.or_fail(Operation::Resolve, path.as_str())?;
        let mut matches = page.files.into_iter();
        let first = matches.next();
        if let Some(first) = &first
            && matches.len() > 0
        {
            tracing::debug!(%path, chosen = %first.id, "duplicate names under one parent, using the oldest");
        }
        Ok(first)
    }

    /// Whether a folder contains at least one non-trashed sub-folder.
    pub async fn has_dir(&self, id: &str, path: &PathKey) -> Result<bool> {
        if let Some(known) = self.cache.lock().await.has_dir(id) {
            return Ok(known);
        }
        let request = ListRequest::new(Query::folders_in(id))
            .page_size(1)
            .fields("files(id)")
            .spaces(self.spaces.as_str());
        let page = self.api.list_files(&request).await.or_fail(Operation::Metadata, path.as_str())?;
        let has_dir = !page.files.is_empty();
        self.cache.lock().await.set_has_dir(id, has_dir);
        Ok(has_dir)
    }

    /// Resolve a directory path, creating every missing segment.
    #[instrument(level = "debug", skip_all, fields(path = %key))]
    pub async fn ensure_directory(&self, key: &PathKey) -> Result<DriveFile> {
        let mut current = self.root().await?;
        let mut walked = PathKey::root();
        for segment in key.segments() {
            walked = walked.join(segment)?;
            current = match self.lookup_child(&current.id, segment, &walked).await? {
                Some(child) if child.is_folder() => child,
                Some(_) => exn::bail!(ErrorKind::CreateDirectoryFailure(walked.to_string())),
                None => self.create_folder(&current.id, segment, &walked).await?,
            };
        }
        Ok(current)
    }

    async fn create_folder(&self, parent_id: &str, name: &str, path: &PathKey) -> Result<DriveFile> {
        let folder = self
            .api
            .create_file(&FileMetadata::folder(name, parent_id), None, &self.fields.object())
            .await
            .or_fail(Operation::CreateDirectory, path.as_str())?;
        tracing::info!(%path, id = %folder.id, "created directory");
        let mut cache = self.cache.lock().await;
        cache.put(Some((parent_id, name)), folder.clone());
        cache.set_has_dir(&folder.id, false);
        cache.set_has_dir(parent_id, true);
        Ok(folder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ObjectCache;
    use drivefs_api::{MOCK_ROOT_ID, MockDrive, Op};
    use std::sync::Arc;

    fn resolver(drive: &Arc<MockDrive>, addressing: Addressing) -> Resolver {
        Resolver::new(drive.clone(), ObjectCache::shared(), "root", addressing).with_has_dir(true)
    }

    fn key(path: &str) -> PathKey {
        PathKey::parse(path).unwrap()
    }

    #[tokio::test]
    async fn test_root_resolves_once() {
        let drive = Arc::new(MockDrive::new());
        let resolver = resolver(&drive, Addressing::Identifier);
        let root = resolver.require(&PathKey::root()).await.unwrap();
        assert_eq!(root.file.id, MOCK_ROOT_ID);
        assert!(root.parent_id.is_none());
        resolver.root().await.unwrap();
        assert_eq!(drive.call_count(Op::Get).await, 1);
        assert!(resolver.is_root_id("root"));
        assert!(resolver.is_root_id(MOCK_ROOT_ID));
    }

    #[tokio::test]
    async fn test_identifier_walk_is_cached() {
        let drive = Arc::new(MockDrive::new());
        let docs = drive.insert_folder("docs", MOCK_ROOT_ID).await;
        let file = drive.insert_file("a.txt", &docs.id, "text/plain", "a").await;
        let resolver = resolver(&drive, Addressing::Identifier);
        let path = key(&format!("{}/{}", docs.id, file.id));

        let located = resolver.require(&path).await.unwrap();
        assert_eq!(located.file.id, file.id);
        assert_eq!(located.parent_id.as_deref(), Some(docs.id.as_str()));
        let calls = drive.call_count(Op::Get).await;
        resolver.require(&path).await.unwrap();
        assert_eq!(drive.call_count(Op::Get).await, calls);
    }

    #[tokio::test]
    async fn test_identifier_cached_object_skips_the_walk() {
        let drive = Arc::new(MockDrive::new());
        let a = drive.insert_folder("a", MOCK_ROOT_ID).await;
        let b = drive.insert_folder("b", &a.id).await;
        let file = drive.insert_file("x", &b.id, "text/plain", "x").await;
        let resolver = resolver(&drive, Addressing::Identifier);
        resolver.root().await.unwrap();
        resolver.cache().lock().await.put(None, file.clone());

        let gets = drive.call_count(Op::Get).await;
        let located = resolver.require(&key(&format!("{}/{}/{}", a.id, b.id, file.id))).await.unwrap();
        assert_eq!(located.file.id, file.id);
        assert_eq!(located.parent_id.as_deref(), Some(b.id.as_str()));
        assert_eq!(drive.call_count(Op::Get).await, gets);

        // Linked under another parent than the one named: walk, and miss.
        assert!(resolver.resolve(&key(&format!("{}/{}", a.id, file.id))).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_identifier_rejects_wrong_parent_and_trash() {
        let drive = Arc::new(MockDrive::new());
        let a = drive.insert_folder("a", MOCK_ROOT_ID).await;
        let b = drive.insert_folder("b", MOCK_ROOT_ID).await;
        let file = drive.insert_file("x", &a.id, "text/plain", "x").await;
        let resolver = resolver(&drive, Addressing::Identifier);
        assert!(resolver.resolve(&key(&format!("{}/{}", b.id, file.id))).await.unwrap().is_none());
        assert!(resolver.resolve(&key("not-an-id")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_name_walk_and_negative_cache() {
        let drive = Arc::new(MockDrive::new());
        let docs = drive.insert_folder("docs", MOCK_ROOT_ID).await;
        drive.insert_file("a.txt", &docs.id, "text/plain", "a").await;
        let resolver = resolver(&drive, Addressing::Name);

        assert_eq!(resolver.require(&key("docs/a.txt")).await.unwrap().file.name, "a.txt");
        assert!(resolver.resolve(&key("docs/missing.txt")).await.unwrap().is_none());
        let lists = drive.call_count(Op::List).await;
        assert!(resolver.resolve(&key("docs/missing.txt")).await.unwrap().is_none());
        assert_eq!(drive.call_count(Op::List).await, lists);
    }

    #[tokio::test]
    async fn test_file_segment_in_the_middle_is_missing() {
        let drive = Arc::new(MockDrive::new());
        drive.insert_file("a.txt", MOCK_ROOT_ID, "text/plain", "a").await;
        let resolver = resolver(&drive, Addressing::Name);
        assert!(resolver.resolve(&key("a.txt/b")).await.unwrap().is_none());
        let err = resolver.ensure_directory(&key("a.txt/b")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::CreateDirectoryFailure(path) if path == "a.txt"));
    }

    #[tokio::test]
    async fn test_ensure_directory_is_idempotent() {
        let drive = Arc::new(MockDrive::new());
        let resolver = resolver(&drive, Addressing::Name);
        let first = resolver.ensure_directory(&key("a/b/c")).await.unwrap();
        let second = resolver.ensure_directory(&key("a/b/c")).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(drive.call_count(Op::Create).await, 3);
        assert_eq!(drive.object_count().await, 4);

        // A second resolver with a cold cache finds the same folders remotely.
        let cold = Resolver::new(drive.clone(), ObjectCache::shared(), "root", Addressing::Name);
        assert_eq!(cold.ensure_directory(&key("a/b/c")).await.unwrap().id, first.id);
        assert_eq!(drive.call_count(Op::Create).await, 3);
    }

    #[tokio::test]
    async fn test_has_dir_probe() {
        let drive = Arc::new(MockDrive::new());
        let parent = drive.insert_folder("parent", MOCK_ROOT_ID).await;
        drive.insert_folder("child", &parent.id).await;
        let leaf = drive.insert_folder("leaf", MOCK_ROOT_ID).await;
        let resolver = resolver(&drive, Addressing::Identifier);

        let (_, has_dir) = resolver.resolve_checked(&key(&parent.id), true).await.unwrap().unwrap();
        assert_eq!(has_dir, Some(true));
        let (_, has_dir) = resolver.resolve_checked(&key(&leaf.id), true).await.unwrap().unwrap();
        assert_eq!(has_dir, Some(false));
        let (_, has_dir) = resolver.resolve_checked(&key(&leaf.id), false).await.unwrap().unwrap();
        assert_eq!(has_dir, None);
    }

    #[tokio::test]
    async fn test_transport_errors_propagate() {
        let drive = Arc::new(MockDrive::new());
        let resolver = resolver(&drive, Addressing::Name);
        resolver.root().await.unwrap();
        drive
            .fail_next(Op::List, 1, drivefs_api::error::ErrorKind::Network("timeout".into()))
            .await;
        let err = resolver.resolve(&key("docs")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Transport { operation: Operation::Resolve, .. }));
    }
}
