use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use drivefs_api::{
    ApiHandle, DriveFile, FieldMask, FileMetadata, RequestDefaults, RestDrive, TokenSource, UpdateOptions,
};
use drivefs_config::{Config, DeleteAction};
use exn::ResultExt;
use futures::TryStreamExt;
use tokio_util::io::StreamReader;
use tracing::instrument;

use super::{StorageBackend, WriteOptions};
use crate::cache::{ObjectCache, SharedCache};
use crate::error::{ApiResultExt, ErrorKind, Operation, Result};
use crate::listing::{Listing, MetadataStream};
use crate::models::Metadata;
use crate::normalize::Normalizer;
use crate::path::PathKey;
use crate::resolver::{Located, Resolver};
use crate::upload::{BoxAsyncRead, Contents, MemoryProbe, ProcessMemory, RetryPolicy, UploadPlan, Uploader};
use crate::visibility::{PublishTemplate, Visibility, VisibilityManager};

const ROOT_ALIAS: &str = "root";

/// Google Drive, addressed as a filesystem.
///
/// Paths below the configured root (and prefix) are resolved segment by
/// segment, either as object ids or as names depending on the configured
/// addressing. Resolved objects are memoized for the lifetime of the adapter;
/// call [`clear_cache()`](Self::clear_cache) when other writers touch the
/// same folders.
pub struct GoogleDriveAdapter {
    name: String,
    api: ApiHandle,
    cache: SharedCache,
    resolver: Resolver,
    normalizer: Normalizer,
    visibility: VisibilityManager,
    uploader: Uploader,
    prefix: PathKey,
    config: Config,
}

impl GoogleDriveAdapter {
    /// Build an adapter over any Drive collaborator.
    pub fn new(name: impl Into<String>, api: ApiHandle, config: &Config) -> Result<Self> {
        let prefix = PathKey::parse(config.prefix.as_deref().unwrap_or_default())?;
        let fields = FieldMask::new(&config.additional_fetch_fields);
        let cache = ObjectCache::shared();
        let template = PublishTemplate::from(&config.publish_permission);
        let resolver = Resolver::new(api.clone(), cache.clone(), configured_root(config), config.addressing)
            .with_fields(fields.clone())
            .with_spaces(config.spaces.as_str())
            .with_has_dir(config.use_has_dir);
        let normalizer = Normalizer::new(config.addressing, template.clone())
            .with_additional_fields(config.additional_fetch_fields.iter().cloned());
        let memory = ProcessMemory::new(config.upload.memory_limit.map(|limit| limit.0));
        let uploader = Uploader::new(api.clone(), Arc::new(memory))
            .with_fields(fields)
            .with_retry(RetryPolicy {
                attempts: config.upload.chunk_retries,
                backoff: config.upload.retry_backoff(),
            });
        Ok(Self {
            name: name.into(),
            visibility: VisibilityManager::new(api.clone(), cache.clone(), template),
            api,
            cache,
            resolver,
            normalizer,
            uploader,
            prefix,
            config: config.clone(),
        })
    }

    /// Build an adapter talking to the Drive REST API.
    pub fn connect(name: impl Into<String>, config: &Config, tokens: Arc<dyn TokenSource>) -> Result<Self> {
        let mut defaults = RequestDefaults::from_map(&config.default_params)
            .or_raise(|| ErrorKind::Configuration("default_params".into()))?;
        if let Some(drive_id) = &config.team_drive_id {
            defaults = defaults.with_shared_drive(drive_id, &config.corpora);
        }
        let api = RestDrive::new(tokens, defaults, config.http.timeout())
            .or_raise(|| ErrorKind::Configuration("http client".into()))?;
        Self::new(name, Arc::new(api), config)
    }

    /// Replace how available memory is measured when sizing upload chunks.
    pub fn with_memory_probe(mut self, probe: Arc<dyn MemoryProbe>) -> Self {
        self.uploader = self.uploader.with_memory(probe);
        self
    }

    /// Forget every resolved object.
    pub async fn clear_cache(&self) {
        self.cache.lock().await.clear();
        tracing::debug!(backend = %self.name, "cache cleared");
    }

    /// The caller's path and the same path below the configured prefix.
    fn keys(&self, path: &str) -> Result<(PathKey, PathKey)> {
        let visible = PathKey::parse(path)?;
        let key = visible.under(&self.prefix);
        Ok((visible, key))
    }

    async fn locate(&self, visible: &PathKey, key: &PathKey) -> Result<Located> {
        match self.resolver.resolve(key).await? {
            Some(located) => Ok(located),
            None => exn::bail!(ErrorKind::NotFound(visible.to_string())),
        }
    }

    /// Metadata for `file` reached through the caller's path `visible`.
    fn describe(&self, file: &DriveFile, visible: &PathKey, has_dir: Option<bool>) -> Result<Metadata> {
        match visible.is_root() {
            true => Ok(self.normalizer.normalize_at(file, PathKey::root(), has_dir)),
            false => self.normalizer.normalize(file, &visible.parent(), has_dir),
        }
    }

    /// Latest cached copy of `file`, which visibility changes keep current.
    async fn refreshed(&self, file: DriveFile) -> DriveFile {
        self.cache.lock().await.get_by_id(&file.id).cloned().unwrap_or(file)
    }

    fn export_mime_type(&self, file: &DriveFile, visible: &PathKey) -> Result<Option<&str>> {
        if file.is_folder() {
            exn::bail!(ErrorKind::ReadFailure(visible.to_string()));
        }
        if !file.is_google_apps() {
            return Ok(None);
        }
        let export = self.config.export_mime_for(&file.mime_type);
        tracing::debug!(path = %visible, from = %file.mime_type, to = export, "exporting Google Apps document");
        Ok(Some(export))
    }

    async fn put(&self, path: &str, contents: Contents, options: WriteOptions) -> Result<Metadata> {
        let (visible, key) = self.keys(path)?;
        let Some(leaf) = key.leaf() else {
            exn::bail!(ErrorKind::WriteFailure(visible.to_string()));
        };
        let parent = self.resolver.ensure_directory(&key.parent()).await?;
        let existing = match self.resolver.resolve(&key).await? {
            Some(located) if located.file.is_folder() => exn::bail!(ErrorKind::WriteFailure(visible.to_string())),
            Some(located) => Some(located.file),
            None => None,
        };
        let plan = UploadPlan {
            path: &visible,
            parent_id: &parent.id,
            name: leaf,
            existing: existing.as_ref(),
            mime_type: options.mime_type.as_deref(),
        };
        let file = self.uploader.upload(plan, contents, options.cancel.as_ref()).await?;
        tracing::info!(backend = %self.name, path = %visible, id = %file.id, updated = existing.is_some(), "wrote file");
        {
            let mut cache = self.cache.lock().await;
            cache.put(Some((&parent.id, leaf)), file.clone());
        }
        let file = self.apply_visibility(file, options.visibility, || ErrorKind::WriteFailure(visible.to_string())).await?;
        self.describe(&file, &visible, None)
    }

    async fn apply_visibility(
        &self,
        file: DriveFile,
        visibility: Option<Visibility>,
        failure: impl FnOnce() -> ErrorKind,
    ) -> Result<DriveFile> {
        let Some(visibility) = visibility else {
            return Ok(file);
        };
        if !self.visibility.apply(&file, visibility).await {
            exn::bail!(failure());
        }
        Ok(self.refreshed(file).await)
    }

    /// Remove the object at a resolved path. An object linked under several
    /// folders only loses the link for this path.
    async fn remove(&self, visible: &PathKey, located: &Located) -> Result<()> {
        let file = &located.file;
        let Some(parent_id) = located.parent_id.as_deref() else {
            exn::bail!(ErrorKind::DeleteFailure(visible.to_string()));
        };
        let fields = self.resolver.fields().object();
        if file.parents.len() > 1 {
            self.api
                .update_file(&file.id, &FileMetadata::default(), &UpdateOptions::remove_parent(parent_id), None, &fields)
                .await
                .or_fail(Operation::Delete, visible.as_str())?;
            {
                let mut cache = self.cache.lock().await;
                match file.is_folder() {
                    // Paths through the folder and the parent's sub-folder memo are stale.
                    true => cache.clear(),
                    false => cache.invalidate(&file.id),
                }
            }
            tracing::info!(backend = %self.name, path = %visible, id = %file.id, "removed parent link");
            return Ok(());
        }
        let result = match self.config.delete_action {
            DeleteAction::Trash => self
                .api
                .update_file(&file.id, &FileMetadata::default().trashed(), &UpdateOptions::default(), None, &fields)
                .await
                .map(drop),
            DeleteAction::Delete => self.api.delete_file(&file.id).await,
        };
        result.or_fail(Operation::Delete, visible.as_str())?;
        // Everything below the object went with it.
        self.cache.lock().await.clear();
        tracing::info!(backend = %self.name, path = %visible, id = %file.id, action = ?self.config.delete_action, "deleted");
        Ok(())
    }
}

/// The root folder to resolve from. A shared drive replaces the "My Drive"
/// alias.
fn configured_root(config: &Config) -> String {
    match &config.team_drive_id {
        Some(drive_id) if config.root == ROOT_ALIAS => drive_id.clone(),
        _ => config.root.clone(),
    }
}

#[async_trait]
impl StorageBackend for GoogleDriveAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(level = "debug", skip(self), fields(backend = %self.name))]
    async fn exists(&self, path: &str) -> Result<bool> {
        let (_, key) = self.keys(path)?;
        Ok(self.resolver.resolve(&key).await?.is_some())
    }

    #[instrument(level = "debug", skip(self), fields(backend = %self.name))]
    async fn file_exists(&self, path: &str) -> Result<bool> {
        let (_, key) = self.keys(path)?;
        Ok(self.resolver.resolve(&key).await?.is_some_and(|located| !located.file.is_folder()))
    }

    #[instrument(level = "debug", skip(self), fields(backend = %self.name))]
    async fn directory_exists(&self, path: &str) -> Result<bool> {
        let (_, key) = self.keys(path)?;
        Ok(self.resolver.resolve(&key).await?.is_some_and(|located| located.file.is_folder()))
    }

    #[instrument(skip(self), fields(backend = %self.name))]
    async fn read(&self, path: &str) -> Result<Bytes> {
        let (visible, key) = self.keys(path)?;
        let file = self.locate(&visible, &key).await?.file;
        let export = self.export_mime_type(&file, &visible)?;
        self.api
            .download_bytes(&file.id, export)
            .await
            .or_fail(Operation::Read, visible.as_str())
    }

    #[instrument(skip(self), fields(backend = %self.name))]
    async fn reader(&self, path: &str) -> Result<BoxAsyncRead> {
        let (visible, key) = self.keys(path)?;
        let file = self.locate(&visible, &key).await?.file;
        let export = self.export_mime_type(&file, &visible)?;
        let stream = self
            .api
            .download(&file.id, export)
            .await
            .or_fail(Operation::Read, visible.as_str())?
            .map_err(|err| std::io::Error::other((*err).clone()));
        Ok(Box::pin(StreamReader::new(stream)))
    }

    #[instrument(skip(self, data, options), fields(backend = %self.name, bytes = data.len()))]
    async fn write(&self, path: &str, data: Bytes, options: WriteOptions) -> Result<Metadata> {
        self.put(path, Contents::Buffer(data), options).await
    }

    #[instrument(skip(self, reader, options), fields(backend = %self.name))]
    async fn write_stream(
        &self,
        path: &str,
        reader: BoxAsyncRead,
        size: Option<u64>,
        options: WriteOptions,
    ) -> Result<Metadata> {
        self.put(path, Contents::Stream { reader, size }, options).await
    }

    #[instrument(skip(self), fields(backend = %self.name))]
    async fn delete(&self, path: &str) -> Result<()> {
        let (visible, key) = self.keys(path)?;
        if visible.is_root() {
            exn::bail!(ErrorKind::DeleteFailure(visible.to_string()));
        }
        let located = self.locate(&visible, &key).await?;
        self.remove(&visible, &located).await
    }

    async fn delete_directory(&self, path: &str) -> Result<()> {
        self.delete(path).await
    }

    #[instrument(skip(self, options), fields(backend = %self.name))]
    async fn create_directory(&self, path: &str, options: WriteOptions) -> Result<Metadata> {
        let (visible, key) = self.keys(path)?;
        let folder = self.resolver.ensure_directory(&key).await?;
        let folder = self
            .apply_visibility(folder, options.visibility, || ErrorKind::VisibilityFailure(visible.to_string()))
            .await?;
        self.describe(&folder, &visible, None)
    }

    #[instrument(skip(self), fields(backend = %self.name))]
    async fn move_file(&self, from: &str, to: &str) -> Result<Metadata> {
        let (from_visible, from_key) = self.keys(from)?;
        let located = self.locate(&from_visible, &from_key).await?;
        let moved = self.copy(from, to).await.or_raise(|| ErrorKind::MoveFailure {
            from: from.to_string(),
            to: to.to_string(),
        })?;
        if let Err(err) = self.remove(&from_visible, &located).await {
            tracing::warn!(backend = %self.name, %from, %to, "copied but the source could not be removed");
            return Err(err).or_raise(|| ErrorKind::MoveIncomplete {
                from: from.to_string(),
                to: to.to_string(),
            });
        }
        Ok(moved)
    }

    #[instrument(skip(self), fields(backend = %self.name))]
    async fn copy(&self, from: &str, to: &str) -> Result<Metadata> {
        let failure = || ErrorKind::CopyFailure {
            from: from.to_string(),
            to: to.to_string(),
        };
        let (from_visible, from_key) = self.keys(from)?;
        let (to_visible, to_key) = self.keys(to)?;
        let source = self.locate(&from_visible, &from_key).await?.file;
        let Some(leaf) = to_key.leaf() else {
            exn::bail!(failure());
        };
        if source.is_folder() {
            exn::bail!(failure());
        }
        let parent = self.resolver.ensure_directory(&to_key.parent()).await?;
        let target = match self.resolver.resolve(&to_key).await? {
            Some(located) if located.file.is_folder() || located.file.id == source.id => exn::bail!(failure()),
            target => target,
        };
        let name = target.as_ref().map_or(leaf, |located| located.file.name.as_str());
        let metadata = FileMetadata::named(name).with_parent(&parent.id);
        let copied = self
            .api
            .copy_file(&source.id, &metadata, &self.resolver.fields().object())
            .await
            .or_fail_with(Operation::Copy, to_visible.as_str(), failure)?;
        // The copy takes the place of whatever was there.
        if let Some(target) = &target {
            self.remove(&to_visible, target).await?;
        }
        {
            let mut cache = self.cache.lock().await;
            match target {
                Some(_) => cache.put(None, copied.clone()),
                None => cache.put(Some((&parent.id, leaf)), copied.clone()),
            }
        }
        // A private source also unpublishes the copy, which may have inherited
        // a public grant from its new folder.
        let visibility = self.visibility.visibility(&source);
        let copied = self.apply_visibility(copied, Some(visibility), failure).await?;
        tracing::info!(backend = %self.name, %from, %to, id = %copied.id, "copied");
        self.describe(&copied, &to_visible, None)
    }

    fn list_stream<'a>(&'a self, path: &'a str, deep: bool) -> MetadataStream<'a> {
        let (visible, key) = match self.keys(path) {
            Ok(keys) => keys,
            Err(err) => return Box::pin(futures::stream::once(async { Result::Err(err) })),
        };
        Listing::new(&self.resolver, &self.normalizer)
            .with_page_size(self.config.list.page_size)
            .with_max_pages(self.config.list.max_pages)
            .walk(key, visible, deep)
    }

    #[instrument(level = "debug", skip(self), fields(backend = %self.name))]
    async fn stat(&self, path: &str) -> Result<Metadata> {
        let (visible, key) = self.keys(path)?;
        match self.resolver.resolve_checked(&key, true).await? {
            Some((located, has_dir)) => self.describe(&located.file, &visible, has_dir),
            None => exn::bail!(ErrorKind::NotFound(visible.to_string())),
        }
    }

    #[instrument(level = "debug", skip(self), fields(backend = %self.name))]
    async fn visibility(&self, path: &str) -> Result<Visibility> {
        let (visible, key) = self.keys(path)?;
        let file = self.locate(&visible, &key).await?.file;
        Ok(self.visibility.visibility(&file))
    }

    #[instrument(skip(self), fields(backend = %self.name))]
    async fn set_visibility(&self, path: &str, visibility: Visibility) -> Result<()> {
        let (visible, key) = self.keys(path)?;
        let file = self.locate(&visible, &key).await?.file;
        if !self.visibility.apply(&file, visibility).await {
            exn::bail!(ErrorKind::VisibilityFailure(visible.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upload::FixedMemory;
    use drivefs_api::error::ErrorKind as ApiErrorKind;
    use drivefs_api::{MOCK_ROOT_ID, MockDrive, Op, Permission};
    use drivefs_config::Addressing;
    use std::io::Cursor;
    use tokio::io::AsyncReadExt;
    use tokio_util::sync::CancellationToken;

    const CHUNK: usize = 256 * 1024;

    fn named() -> Config {
        Config {
            addressing: Addressing::Name,
            ..Config::default()
        }
    }

    fn adapter(drive: &Arc<MockDrive>, config: Config) -> GoogleDriveAdapter {
        GoogleDriveAdapter::new("test", drive.clone(), &config)
            .unwrap()
            .with_memory_probe(Arc::new(FixedMemory::new(Some(4 * CHUNK as u64), 0)))
    }

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 241) as u8).collect()
    }

    fn rejected(status: u16) -> ApiErrorKind {
        ApiErrorKind::Rejected {
            status,
            message: "insufficient permissions".into(),
        }
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let drive = Arc::new(MockDrive::new());
        let fs = adapter(&drive, named());
        let cases: Vec<(&str, Vec<u8>, bool)> = vec![
            ("a/b/buffer.txt", b"hello world".to_vec(), false),
            ("a/b/small.txt", b"streamed".to_vec(), true),
            ("a/chunked.bin", payload(2 * CHUNK + 100), true),
            ("a/boundary.bin", payload(2 * CHUNK), true),
            ("empty.txt", Vec::new(), false),
        ];
        for (path, content, streamed) in cases {
            let written = match streamed {
                true => fs.write_stream(path, Box::pin(Cursor::new(content.clone())), None, WriteOptions::default()).await,
                false => fs.write(path, Bytes::from(content.clone()), WriteOptions::default()).await,
            }
            .unwrap();
            assert_eq!(written.path.as_str(), path);
            assert_eq!(written.size, content.len() as u64);
            assert_eq!(fs.read(path).await.unwrap(), Bytes::from(content), "{path}");
        }
        assert!(fs.directory_exists("a/b").await.unwrap());
        assert!(fs.file_exists("a/b/buffer.txt").await.unwrap());
        assert!(!fs.file_exists("a/b").await.unwrap());
    }

    #[tokio::test]
    async fn test_overwrite_updates_in_place() {
        let drive = Arc::new(MockDrive::new());
        let fs = adapter(&drive, named());
        let first = fs.write("notes.md", Bytes::from_static(b"v1"), WriteOptions::default()).await.unwrap();
        let second = fs.write("notes.md", Bytes::from_static(b"v2"), WriteOptions::default()).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(fs.read("notes.md").await.unwrap(), Bytes::from_static(b"v2"));
        assert_eq!(second.mime_type.as_deref(), Some("text/markdown"));
    }

    #[tokio::test]
    async fn test_write_over_directory_or_below_file_fails() {
        let drive = Arc::new(MockDrive::new());
        let fs = adapter(&drive, named());
        fs.create_directory("dir", WriteOptions::default()).await.unwrap();
        fs.write("file.txt", Bytes::from_static(b"x"), WriteOptions::default()).await.unwrap();

        let err = fs.write("dir", Bytes::from_static(b"x"), WriteOptions::default()).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::WriteFailure(p) if p == "dir"));
        let err = fs
            .write("file.txt/nested.txt", Bytes::from_static(b"x"), WriteOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(&*err, ErrorKind::CreateDirectoryFailure(p) if p == "file.txt"));
        let err = fs.write("/", Bytes::from_static(b"x"), WriteOptions::default()).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::WriteFailure(_)));
    }

    #[tokio::test]
    async fn test_identifier_addressing() {
        let drive = Arc::new(MockDrive::new());
        let fs = adapter(&drive, Config::default());
        let written = fs.write("report.pdf", Bytes::from_static(b"%PDF-1.4"), WriteOptions::default()).await.unwrap();
        assert_eq!(written.path.as_str(), written.id);
        assert_eq!(written.name, "report.pdf");
        assert_eq!(written.mime_type.as_deref(), Some("application/pdf"));
        assert_eq!(fs.read(&written.id).await.unwrap(), Bytes::from_static(b"%PDF-1.4"));

        // A fresh adapter only knows the object by its id.
        let cold = adapter(&drive, Config::default());
        assert!(cold.file_exists(&written.id).await.unwrap());
        assert!(!cold.exists("report.pdf").await.unwrap());
    }

    #[tokio::test]
    async fn test_create_directory_is_idempotent() {
        let drive = Arc::new(MockDrive::new());
        let fs = adapter(&drive, named());
        let first = fs.create_directory("x/y", WriteOptions::default()).await.unwrap();
        let second = fs.create_directory("x/y", WriteOptions::default()).await.unwrap();
        assert!(first.is_dir());
        assert_eq!(first.id, second.id);
        assert_eq!(first.path.as_str(), "x/y");
        let root = fs.create_directory("", WriteOptions::default()).await.unwrap();
        assert_eq!(root.id, MOCK_ROOT_ID);
    }

    #[tokio::test]
    async fn test_delete_trashes_and_forgets() {
        let drive = Arc::new(MockDrive::new());
        let fs = adapter(&drive, named());
        let written = fs.write("a/b.txt", Bytes::from_static(b"b"), WriteOptions::default()).await.unwrap();
        assert!(fs.exists("a/b.txt").await.unwrap());
        fs.delete("a/b.txt").await.unwrap();
        assert!(!fs.exists("a/b.txt").await.unwrap());
        assert!(drive.file(&written.id).await.unwrap().trashed);

        let err = fs.delete("a/b.txt").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_delete_permanently() {
        let drive = Arc::new(MockDrive::new());
        let config = Config {
            delete_action: DeleteAction::Delete,
            ..named()
        };
        let fs = adapter(&drive, config);
        fs.write("dir/one.txt", Bytes::from_static(b"1"), WriteOptions::default()).await.unwrap();
        fs.delete_directory("dir").await.unwrap();
        assert!(!fs.exists("dir/one.txt").await.unwrap());
        assert_eq!(drive.object_count().await, 1);
    }

    #[tokio::test]
    async fn test_delete_root_is_refused() {
        let drive = Arc::new(MockDrive::new());
        let fs = adapter(&drive, named());
        let err = fs.delete("/").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::DeleteFailure(_)));
        assert_eq!(drive.call_count(Op::Delete).await, 0);
    }

    #[tokio::test]
    async fn test_delete_with_multiple_parents_unlinks() {
        let drive = Arc::new(MockDrive::new());
        let x = drive.insert_folder("x", MOCK_ROOT_ID).await;
        let y = drive.insert_folder("y", MOCK_ROOT_ID).await;
        let shared = drive.insert_file("shared.txt", &x.id, "text/plain", "s").await;
        drive.add_parent(&shared.id, &y.id).await;
        let fs = adapter(&drive, named());
        assert!(fs.exists("y/shared.txt").await.unwrap());

        fs.delete("x/shared.txt").await.unwrap();
        assert!(!fs.exists("x/shared.txt").await.unwrap());
        assert!(fs.exists("y/shared.txt").await.unwrap());
        let remaining = drive.file(&shared.id).await.unwrap();
        assert_eq!(remaining.parents, vec![y.id]);
        assert!(!remaining.trashed);
    }

    #[tokio::test]
    async fn test_unlinking_a_folder_refreshes_has_dir() {
        let drive = Arc::new(MockDrive::new());
        let p = drive.insert_folder("p", MOCK_ROOT_ID).await;
        let q = drive.insert_folder("q", MOCK_ROOT_ID).await;
        let c = drive.insert_folder("c", &p.id).await;
        drive.add_parent(&c.id, &q.id).await;
        let config = Config {
            use_has_dir: true,
            ..named()
        };
        let fs = adapter(&drive, config);
        assert_eq!(fs.stat("p").await.unwrap().has_dir, Some(true));

        fs.delete("p/c").await.unwrap();
        assert_eq!(fs.stat("p").await.unwrap().has_dir, Some(false));
        assert!(!fs.exists("p/c").await.unwrap());
        assert!(fs.directory_exists("q/c").await.unwrap());
        assert_eq!(fs.stat("q").await.unwrap().has_dir, Some(true));
    }

    #[tokio::test]
    async fn test_move() {
        let drive = Arc::new(MockDrive::new());
        let fs = adapter(&drive, named());
        fs.write("a.txt", Bytes::from_static(b"content"), WriteOptions::default()).await.unwrap();
        let moved = fs.move_file("a.txt", "archive/b.txt").await.unwrap();
        assert_eq!(moved.path.as_str(), "archive/b.txt");
        assert!(!fs.exists("a.txt").await.unwrap());
        assert!(fs.exists("archive/b.txt").await.unwrap());
        assert_eq!(fs.read("archive/b.txt").await.unwrap(), Bytes::from_static(b"content"));

        let err = fs.move_file("a.txt", "c.txt").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_move_with_failed_delete_is_incomplete() {
        let drive = Arc::new(MockDrive::new());
        let fs = adapter(&drive, named());
        fs.write("a.txt", Bytes::from_static(b"content"), WriteOptions::default()).await.unwrap();
        drive.fail_next(Op::Update, 1, rejected(403)).await;
        let err = fs.move_file("a.txt", "b.txt").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::MoveIncomplete { from, to } if from == "a.txt" && to == "b.txt"));
        assert!(fs.exists("a.txt").await.unwrap());
        assert!(fs.exists("b.txt").await.unwrap());
    }

    #[tokio::test]
    async fn test_copy_keeps_visibility_and_replaces_target() {
        let drive = Arc::new(MockDrive::new());
        let fs = adapter(&drive, named());
        let public = WriteOptions::default().with_visibility(Visibility::Public);
        let source = fs.write("src.txt", Bytes::from_static(b"new"), public).await.unwrap();
        let old = fs.write("dst.txt", Bytes::from_static(b"old"), WriteOptions::default()).await.unwrap();

        let copied = fs.copy("src.txt", "dst.txt").await.unwrap();
        assert_ne!(copied.id, source.id);
        assert_ne!(copied.id, old.id);
        assert_eq!(copied.visibility, Visibility::Public);
        assert_eq!(fs.read("dst.txt").await.unwrap(), Bytes::from_static(b"new"));
        assert_eq!(fs.visibility("dst.txt").await.unwrap(), Visibility::Public);
        assert!(fs.exists("src.txt").await.unwrap());
    }

    #[tokio::test]
    async fn test_copy_of_private_source_is_unpublished() {
        let drive = Arc::new(MockDrive::new());
        let fs = adapter(&drive, named());
        fs.write("src.txt", Bytes::from_static(b"s"), WriteOptions::default()).await.unwrap();
        drive.reset_calls().await;

        let copied = fs.copy("src.txt", "dst.txt").await.unwrap();
        assert_eq!(copied.visibility, Visibility::Private);
        assert_eq!(drive.call_count(Op::ListPermissions).await, 1);
        assert_eq!(drive.call_count(Op::CreatePermission).await, 0);

        drive.fail_next(Op::ListPermissions, 1, rejected(403)).await;
        let err = fs.copy("src.txt", "other.txt").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::CopyFailure { from, to } if from == "src.txt" && to == "other.txt"));
    }

    #[tokio::test]
    async fn test_copy_refusals() {
        let drive = Arc::new(MockDrive::new());
        let fs = adapter(&drive, named());
        fs.create_directory("dir", WriteOptions::default()).await.unwrap();
        let err = fs.copy("dir", "dir2").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::CopyFailure { from, to } if from == "dir" && to == "dir2"));

        fs.write("a.txt", Bytes::from_static(b"a"), WriteOptions::default()).await.unwrap();
        drive.fail_next(Op::Copy, 1, rejected(403)).await;
        let err = fs.copy("a.txt", "b.txt").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::CopyFailure { .. }));
        assert!(!fs.exists("b.txt").await.unwrap());
    }

    #[tokio::test]
    async fn test_read_exports_google_apps_documents() {
        let drive = Arc::new(MockDrive::new());
        drive
            .insert_file("Plan", MOCK_ROOT_ID, "application/vnd.google-apps.document", Bytes::new())
            .await;
        drive
            .insert_file("Form", MOCK_ROOT_ID, "application/vnd.google-apps.form", Bytes::new())
            .await;
        let fs = adapter(&drive, named());
        let docx = fs.read("Plan").await.unwrap();
        assert_eq!(
            docx,
            Bytes::from("Plan exported as application/vnd.openxmlformats-officedocument.wordprocessingml.document")
        );
        assert_eq!(fs.read("Form").await.unwrap(), Bytes::from("Form exported as application/pdf"));
        assert_eq!(fs.file_size("Plan").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_read_failures() {
        let drive = Arc::new(MockDrive::new());
        let fs = adapter(&drive, named());
        fs.create_directory("dir", WriteOptions::default()).await.unwrap();
        let err = fs.read("dir").await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::ReadFailure(p) if p == "dir"));
        assert!(fs.read("missing").await.unwrap_err().is_not_found());
        assert!(matches!(&*fs.read("../etc").await.unwrap_err(), ErrorKind::InvalidPath(_)));
    }

    #[tokio::test]
    async fn test_reader_streams_content() {
        let drive = Arc::new(MockDrive::new());
        let fs = adapter(&drive, named());
        let content = payload(10_000);
        fs.write("data.bin", Bytes::from(content.clone()), WriteOptions::default()).await.unwrap();
        let mut reader = fs.reader("data.bin").await.unwrap();
        let mut buffer = Vec::new();
        reader.read_to_end(&mut buffer).await.unwrap();
        assert_eq!(buffer, content);
    }

    #[tokio::test]
    async fn test_visibility_round_trip() {
        let drive = Arc::new(MockDrive::new());
        let fs = adapter(&drive, named());
        fs.write("page.html", Bytes::from_static(b"<p>hi</p>"), WriteOptions::default()).await.unwrap();
        assert_eq!(fs.visibility("page.html").await.unwrap(), Visibility::Private);

        fs.set_visibility("page.html", Visibility::Public).await.unwrap();
        fs.set_visibility("page.html", Visibility::Public).await.unwrap();
        assert_eq!(fs.visibility("page.html").await.unwrap(), Visibility::Public);
        assert_eq!(drive.call_count(Op::CreatePermission).await, 1);

        fs.set_visibility("page.html", Visibility::Private).await.unwrap();
        assert_eq!(fs.visibility("page.html").await.unwrap(), Visibility::Private);
        assert_eq!(fs.stat("page.html").await.unwrap().visibility, Visibility::Private);
    }

    #[tokio::test]
    async fn test_visibility_failure() {
        let drive = Arc::new(MockDrive::new());
        let fs = adapter(&drive, named());
        fs.write("page.html", Bytes::from_static(b"x"), WriteOptions::default()).await.unwrap();
        drive.fail_next(Op::CreatePermission, 1, rejected(403)).await;
        let err = fs.set_visibility("page.html", Visibility::Public).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::VisibilityFailure(p) if p == "page.html"));

        drive.fail_next(Op::CreatePermission, 1, rejected(403)).await;
        let options = WriteOptions::default().with_visibility(Visibility::Public);
        let err = fs.write("other.html", Bytes::from_static(b"x"), options).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::WriteFailure(p) if p == "other.html"));
    }

    #[tokio::test]
    async fn test_stat_and_derived_attributes() {
        let drive = Arc::new(MockDrive::new());
        let config = Config {
            use_has_dir: true,
            ..named()
        };
        let fs = adapter(&drive, config);
        fs.write("docs/inner/a.csv", Bytes::from_static(b"a,b\n"), WriteOptions::default()).await.unwrap();

        let file = fs.stat("docs/inner/a.csv").await.unwrap();
        assert_eq!(file.filename, "a");
        assert_eq!(file.extension, "csv");
        assert_eq!(fs.mime_type("docs/inner/a.csv").await.unwrap(), "text/csv");
        assert_eq!(fs.file_size("docs/inner/a.csv").await.unwrap(), 4);
        assert!(fs.last_modified("docs/inner/a.csv").await.is_ok());

        let dir = fs.stat("docs").await.unwrap();
        assert!(dir.is_dir());
        assert_eq!(dir.has_dir, Some(true));
        assert!(matches!(&*fs.mime_type("docs").await.unwrap_err(), ErrorKind::MetadataFailure(_)));
        assert!(matches!(&*fs.file_size("docs").await.unwrap_err(), ErrorKind::MetadataFailure(_)));
        assert!(fs.stat("nope").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_list_through_prefix() {
        let drive = Arc::new(MockDrive::new());
        let config = Config {
            prefix: Some("/sites/main/".into()),
            ..named()
        };
        let fs = adapter(&drive, config);
        fs.write("index.html", Bytes::from_static(b"<p>"), WriteOptions::default()).await.unwrap();
        fs.write("css/site.css", Bytes::from_static(b"p{}"), WriteOptions::default()).await.unwrap();

        let mut listed: Vec<String> = fs.list("", true).await.unwrap().into_iter().map(|m| m.path.to_string()).collect();
        listed.sort();
        assert_eq!(listed, vec!["css", "css/site.css", "index.html"]);
        let shallow = fs.list("css", false).await.unwrap();
        assert_eq!(shallow.len(), 1);
        assert_eq!(shallow[0].path.as_str(), "css/site.css");
        assert!(fs.list("missing", true).await.unwrap().is_empty());

        // Everything lives below the prefix folders.
        let unprefixed = adapter(&drive, named());
        assert!(unprefixed.file_exists("sites/main/index.html").await.unwrap());
        assert!(!unprefixed.exists("index.html").await.unwrap());
    }

    #[tokio::test]
    async fn test_cancelled_upload() {
        let drive = Arc::new(MockDrive::new());
        let fs = adapter(&drive, named());
        let token = CancellationToken::new();
        token.cancel();
        let options = WriteOptions::default().with_cancel(token);
        let reader = Box::pin(Cursor::new(payload(3 * CHUNK)));
        let err = fs.write_stream("big.bin", reader, None, options).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Cancelled(p) if p == "big.bin"));
        assert!(!fs.exists("big.bin").await.unwrap());
    }

    #[tokio::test]
    async fn test_clear_cache() {
        let drive = Arc::new(MockDrive::new());
        let fs = adapter(&drive, named());
        drive.insert_file("a.txt", MOCK_ROOT_ID, "text/plain", "a").await;
        assert!(fs.exists("a.txt").await.unwrap());
        let lists = drive.call_count(Op::List).await;
        assert!(fs.exists("a.txt").await.unwrap());
        assert_eq!(drive.call_count(Op::List).await, lists);
        fs.clear_cache().await;
        assert!(fs.exists("a.txt").await.unwrap());
        assert_eq!(drive.call_count(Op::List).await, lists + 1);
    }

    #[tokio::test]
    async fn test_public_permission_from_elsewhere() {
        let drive = Arc::new(MockDrive::new());
        let file = drive.insert_file("a.txt", MOCK_ROOT_ID, "text/plain", "a").await;
        drive.insert_permission(&file.id, Permission::new("anyone", "reader")).await;
        let fs = adapter(&drive, named());
        assert_eq!(fs.visibility("a.txt").await.unwrap(), Visibility::Public);
        fs.set_visibility("a.txt", Visibility::Private).await.unwrap();
        assert!(drive.file(&file.id).await.unwrap().permissions.is_empty());
    }

    #[tokio::test]
    async fn test_split_path_resolves_same_object() {
        use crate::path::{SplitMode, split};

        let drive = Arc::new(MockDrive::new());
        let fs = adapter(&drive, named());
        let written = fs.write("a/b/c.txt", Bytes::from_static(b"c"), WriteOptions::default()).await.unwrap();
        let (parent, leaf) = split("a/b/c.txt", ROOT_ALIAS, SplitMode::FullParent);
        assert_eq!((parent, leaf), ("a/b", "c.txt"));
        let rejoined = fs.stat(&format!("{parent}/{leaf}")).await.unwrap();
        assert_eq!(rejoined.id, written.id);
    }

    #[test]
    fn test_configured_root() {
        let mut config = Config::default();
        assert_eq!(configured_root(&config), "root");
        config.team_drive_id = Some("0AbCdEf".into());
        assert_eq!(configured_root(&config), "0AbCdEf");
        config.root = "1FolderId".into();
        assert_eq!(configured_root(&config), "1FolderId");
    }
}
