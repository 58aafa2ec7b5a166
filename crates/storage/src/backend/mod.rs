//! Storage backend trait and implementations.
//!
//! This module defines the `StorageBackend` trait, the filesystem-shaped
//! interface the Drive adapter exposes: paths in, bytes and metadata out.
//!

mod gdrive;

pub use self::gdrive::GoogleDriveAdapter;
use crate::error::{ErrorKind, Result};
use crate::listing::MetadataStream;
use crate::models::Metadata;
use crate::upload::BoxAsyncRead;
use crate::visibility::Visibility;
use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;

/// Per-call options for writes and directory creation.
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    /// Visibility applied after the object is written.
    pub visibility: Option<Visibility>,
    /// Skips MIME detection when set.
    pub mime_type: Option<String>,
    /// Aborts a chunked upload between (or during) chunk pushes.
    pub cancel: Option<CancellationToken>,
}

impl WriteOptions {
    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = Some(visibility);
        self
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// Unified interface for path-addressed storage.
///
/// All operations are asynchronous; every one of them may need several
/// round trips to resolve a path before doing any work.
///
/// # Path Handling
/// Paths are `/`-separated and relative to the backend's root. Leading and
/// trailing slashes are ignored, and `..` segments are rejected with
/// [`InvalidPath`](crate::error::ErrorKind::InvalidPath).
///
/// # Examples
///
/// ```
/// use drivefs_storage::{backend::StorageBackend, error::Result};
///
/// async fn size_of_hardcoded_file(backend: &dyn StorageBackend) -> Result<u64> {
///     let path = "reports/2024/q1.pdf";
///     if backend.file_exists(path).await? {
///         let data = backend.read(path).await?;
///         Ok(data.len() as u64)
///     } else {
///         Ok(0)
///     }
/// }
/// ```
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Name of the configured backend, used for logging only.
    fn name(&self) -> &str;

    /// Check whether anything exists at `path`.
    ///
    /// A path that does not resolve is `false`, never an error.
    async fn exists(&self, path: &str) -> Result<bool>;

    async fn file_exists(&self, path: &str) -> Result<bool>;

    async fn directory_exists(&self, path: &str) -> Result<bool>;

    /// Read file contents.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if nothing
    /// exists at `path` and [`ReadFailure`](crate::error::ErrorKind::ReadFailure)
    /// for directories.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use drivefs_storage::{backend::StorageBackend, error::Result};
    /// # async fn example(backend: &dyn StorageBackend) -> Result<()> {
    /// let data = backend.read("notes/todo.md").await?;
    /// println!("Read {} bytes", data.len());
    /// # Ok(())
    /// # }
    /// ```
    async fn read(&self, path: &str) -> Result<Bytes>;

    /// Open a file for streaming reads.
    ///
    /// The download is started before returning, so a missing file fails
    /// here rather than on the first read.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use tokio::io::AsyncReadExt;
    /// # use drivefs_storage::{backend::StorageBackend, error::Result};
    /// # async fn example(backend: &dyn StorageBackend) -> Result<()> {
    /// let mut reader = backend.reader("videos/launch.mp4").await?;
    /// let mut head = [0u8; 12];
    /// let _ = reader.read_exact(&mut head).await;
    /// # Ok(())
    /// # }
    /// ```
    async fn reader(&self, path: &str) -> Result<BoxAsyncRead>;

    /// Write file contents, creating parent directories as needed and
    /// overwriting whatever file is already at `path`.
    ///
    /// ```no_run
    /// use bytes::Bytes;
    /// use drivefs_storage::{Visibility, backend::WriteOptions};
    /// # use drivefs_storage::{backend::StorageBackend, error::Result};
    /// # async fn example(backend: &dyn StorageBackend) -> Result<()> {
    /// let options = WriteOptions::default().with_visibility(Visibility::Public);
    /// let written = backend.write("site/index.html", Bytes::from_static(b"<html></html>"), options).await?;
    /// println!("{} is {}", written.path, written.visibility);
    /// # Ok(())
    /// # }
    /// ```
    async fn write(&self, path: &str, data: Bytes, options: WriteOptions) -> Result<Metadata>;

    /// Write from a reader. `size` is the total length when the caller
    /// knows it; large or unsized content is uploaded in chunks.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use drivefs_storage::backend::WriteOptions;
    /// # use drivefs_storage::{backend::StorageBackend, error::Result};
    /// # async fn example(backend: &dyn StorageBackend) -> Result<()> {
    /// let dump = std::io::Cursor::new(vec![0u8; 64 * 1024 * 1024]);
    /// backend.write_stream("backups/db.dump", Box::pin(dump), None, WriteOptions::default()).await?;
    /// # Ok(())
    /// # }
    /// ```
    async fn write_stream(&self, path: &str, reader: BoxAsyncRead, size: Option<u64>, options: WriteOptions)
    -> Result<Metadata>;

    /// Delete the object at `path`.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if nothing
    /// exists there. The root cannot be deleted.
    async fn delete(&self, path: &str) -> Result<()>;

    /// Delete a directory and everything beneath it.
    async fn delete_directory(&self, path: &str) -> Result<()>;

    /// Create a directory and any missing parents. Creating a directory
    /// that already exists returns the existing one.
    async fn create_directory(&self, path: &str, options: WriteOptions) -> Result<Metadata>;

    /// Move a file within the same backend.
    ///
    /// # Notes
    /// - Implementations should create parent directories as needed
    /// - Backends without an atomic move report a source that could not be
    ///   removed as [`MoveIncomplete`](crate::error::ErrorKind::MoveIncomplete)
    async fn move_file(&self, from: &str, to: &str) -> Result<Metadata>;

    /// Copy a file, keeping its visibility.
    async fn copy(&self, from: &str, to: &str) -> Result<Metadata>;

    /// Stream the contents of a directory.
    ///
    /// Entries arrive as pages are fetched. With `deep`, sub-directories are
    /// walked depth-first after they are yielded. A directory that does not
    /// exist lists as empty.
    ///
    /// # Examples
    ///
    /// ```
    /// use futures::TryStreamExt;
    /// # use drivefs_storage::{backend::StorageBackend, error::Result};
    /// # async fn example(backend: &dyn StorageBackend) -> Result<()> {
    ///
    /// // Process entries one at a time
    /// let mut stream = backend.list_stream("photos", true);
    /// while let Some(entry) = stream.try_next().await? {
    ///     println!("{}: {} bytes", entry.path, entry.size);
    /// }
    ///
    /// // Only the files, up to 4 at once
    /// backend.list_stream("photos", true)
    ///     .try_filter(|entry| std::future::ready(entry.is_file()))
    ///     .try_for_each_concurrent(4, |entry| async move {
    ///         println!("{}", entry.path);
    ///         Ok(())
    ///     })
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    fn list_stream<'a>(&'a self, path: &'a str, deep: bool) -> MetadataStream<'a>;

    /// Collect [`list_stream()`](Self::list_stream) into a [`Vec`].
    async fn list(&self, path: &str, deep: bool) -> Result<Vec<Metadata>> {
        self.list_stream(path, deep).try_collect().await
    }

    /// Get metadata without reading contents.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if nothing
    /// exists at `path`.
    async fn stat(&self, path: &str) -> Result<Metadata>;

    async fn mime_type(&self, path: &str) -> Result<String> {
        match self.stat(path).await?.mime_type {
            Some(mime_type) => Ok(mime_type),
            None => exn::bail!(ErrorKind::MetadataFailure(path.to_string())),
        }
    }

    async fn last_modified(&self, path: &str) -> Result<OffsetDateTime> {
        match self.stat(path).await?.modified {
            Some(modified) => Ok(modified),
            None => exn::bail!(ErrorKind::MetadataFailure(path.to_string())),
        }
    }

    /// Size of a file in bytes. Directories have no size.
    async fn file_size(&self, path: &str) -> Result<u64> {
        let metadata = self.stat(path).await?;
        if metadata.is_dir() {
            exn::bail!(ErrorKind::MetadataFailure(path.to_string()));
        }
        Ok(metadata.size)
    }

    async fn visibility(&self, path: &str) -> Result<Visibility>;

    /// Publish or unpublish the object at `path`.
    async fn set_visibility(&self, path: &str, visibility: Visibility) -> Result<()>;
}
