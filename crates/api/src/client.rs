//! The Drive collaborator contract.
//!
//! [`DriveApi`] is the only way the storage layer talks to Drive. The REST
//! client implements it over HTTP and the mock implements it in memory, so
//! everything above this trait can be exercised without a network.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{Stream, TryStreamExt};

use crate::error::Result;
use crate::models::{DriveFile, FileList, FileMetadata, Media, Permission, UpdateOptions};
use crate::query::ListRequest;

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send + 'static>>;
pub type ApiHandle = Arc<dyn DriveApi>;

/// What a resumable upload session is opened against.
#[derive(Debug, Clone, Default)]
pub struct UploadTarget {
    /// Existing object to overwrite; `None` creates a new object.
    pub file_id: Option<String>,
    pub metadata: FileMetadata,
    pub mime_type: String,
    /// Total content length, when known up front.
    pub total_size: Option<u64>,
}

/// Continuation handle for a resumable upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSession {
    pub uri: String,
    pub total_size: Option<u64>,
}

/// One contiguous slice of a resumable upload.
#[derive(Debug, Clone)]
pub struct UploadChunk {
    pub offset: u64,
    pub data: Bytes,
    /// Set on the final chunk (or from the start when the size is known).
    pub total_size: Option<u64>,
}

impl UploadChunk {
    /// Inclusive byte range for `Content-Range`, `None` for an empty chunk.
    pub fn range(&self) -> Option<(u64, u64)> {
        match self.data.is_empty() {
            true => None,
            false => Some((self.offset, self.offset + self.data.len() as u64 - 1)),
        }
    }

    pub fn is_final(&self) -> bool {
        self.total_size.is_some_and(|total| self.offset + self.data.len() as u64 >= total)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChunkStatus {
    /// Drive has persisted `received` bytes and expects more.
    Incomplete { received: u64 },
    /// The upload is finished and the object exists.
    Complete(Box<DriveFile>),
}

#[async_trait]
pub trait DriveApi: Send + Sync {
    async fn get_file(&self, id: &str, fields: &str) -> Result<DriveFile>;

    async fn list_files(&self, request: &ListRequest) -> Result<FileList>;

    async fn create_file(&self, metadata: &FileMetadata, media: Option<Media>, fields: &str) -> Result<DriveFile>;

    async fn update_file(
        &self,
        id: &str,
        metadata: &FileMetadata,
        options: &UpdateOptions,
        media: Option<Media>,
        fields: &str,
    ) -> Result<DriveFile>;

    /// Permanently delete, bypassing the trash.
    async fn delete_file(&self, id: &str) -> Result<()>;

    async fn copy_file(&self, id: &str, metadata: &FileMetadata, fields: &str) -> Result<DriveFile>;

    /// Stream the object's content, or an export of it when `export_mime`
    /// is set.
    async fn download(&self, id: &str, export_mime: Option<&str>) -> Result<ByteStream>;

    async fn download_bytes(&self, id: &str, export_mime: Option<&str>) -> Result<Bytes> {
        let buffer = self
            .download(id, export_mime)
            .await?
            .try_fold(BytesMut::new(), |mut buffer, chunk| async move {
                buffer.extend_from_slice(&chunk);
                Ok(buffer)
            })
            .await?;
        Ok(buffer.freeze())
    }

    async fn create_permission(&self, file_id: &str, permission: &Permission) -> Result<Permission>;

    async fn list_permissions(&self, file_id: &str) -> Result<Vec<Permission>>;

    async fn delete_permission(&self, file_id: &str, permission_id: &str) -> Result<()>;

    async fn start_upload(&self, target: &UploadTarget, fields: &str) -> Result<UploadSession>;

    async fn upload_chunk(&self, session: &UploadSession, chunk: UploadChunk) -> Result<ChunkStatus>;
}
