//! Upload engine.
//!
//! Content that fits in one chunk goes up in a single multipart request.
//! Anything larger is sent through a resumable session, one chunk at a time,
//! so at most one chunk is held in memory.

mod chunk;

pub use self::chunk::{
    CHUNK_ALIGNMENT, FixedMemory, MAX_CHUNK_SIZE, MIN_CHUNK_SIZE, MemoryProbe, MemorySnapshot, ProcessMemory,
    detect_chunk_size,
};

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use drivefs_api::{ApiHandle, ChunkStatus, DriveFile, FieldMask, FileMetadata, Media, UpdateOptions, UploadChunk, UploadSession, UploadTarget};
use exn::ResultExt;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;

use crate::error::{ApiResultExt, ErrorKind, Operation, Result};
use crate::mime::guess_mime_type;
use crate::path::PathKey;

pub type BoxAsyncRead = Pin<Box<dyn AsyncRead + Send + 'static>>;

/// What to upload.
pub enum Contents {
    Buffer(Bytes),
    /// A reader and, when known, its total length.
    Stream { reader: BoxAsyncRead, size: Option<u64> },
}

impl Contents {
    pub fn stream(reader: impl AsyncRead + Send + 'static, size: Option<u64>) -> Self {
        Self::Stream {
            reader: Box::pin(reader),
            size,
        }
    }
}

impl fmt::Debug for Contents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buffer(data) => f.debug_tuple("Buffer").field(&data.len()).finish(),
            Self::Stream { size, .. } => f.debug_struct("Stream").field("size", size).finish_non_exhaustive(),
        }
    }
}

/// Where an upload lands.
#[derive(Debug, Clone, Copy)]
pub struct UploadPlan<'a> {
    pub path: &'a PathKey,
    pub parent_id: &'a str,
    /// Name for a newly created object.
    pub name: &'a str,
    /// Object to overwrite, if the path already resolves.
    pub existing: Option<&'a DriveFile>,
    pub mime_type: Option<&'a str>,
}

impl UploadPlan<'_> {
    /// Name used for MIME detection by extension.
    fn file_name(&self) -> &str {
        self.existing.map_or(self.name, |file| file.name.as_str())
    }

    fn metadata(&self, mime_type: Option<&str>) -> FileMetadata {
        match self.existing {
            Some(_) => FileMetadata::default(),
            None => {
                let metadata = FileMetadata::named(self.name).with_parent(self.parent_id);
                match mime_type {
                    Some(mime_type) => metadata.with_mime_type(mime_type),
                    None => metadata,
                }
            },
        }
    }
}

/// Retry policy for pushing a single chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 0,
            backoff: Duration::from_millis(500),
        }
    }
}

pub struct Uploader {
    api: ApiHandle,
    fields: FieldMask,
    memory: Arc<dyn MemoryProbe>,
    retry: RetryPolicy,
}

impl Uploader {
    pub fn new(api: ApiHandle, memory: Arc<dyn MemoryProbe>) -> Self {
        Self {
            api,
            fields: FieldMask::default(),
            memory,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_fields(mut self, fields: FieldMask) -> Self {
        self.fields = fields;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_memory(mut self, memory: Arc<dyn MemoryProbe>) -> Self {
        self.memory = memory;
        self
    }

    pub fn chunk_size(&self) -> u64 {
        self.memory.snapshot().chunk_size()
    }

    #[tracing::instrument(skip_all, fields(path = %plan.path))]
    pub async fn upload(&self, plan: UploadPlan<'_>, contents: Contents, cancel: Option<&CancellationToken>) -> Result<DriveFile> {
        check_cancelled(cancel, plan.path)?;
        let (mut reader, size) = match contents {
            Contents::Buffer(data) => return self.single_shot(&plan, data).await,
            Contents::Stream { reader, size } => (reader, size),
        };
        let chunk_size = self.chunk_size();
        let first = read_chunk(&mut reader, chunk_size, plan.path).await?;
        let length = first.len() as u64;
        if length < chunk_size || size.is_some_and(|size| length >= size) {
            return self.single_shot(&plan, first).await;
        }
        tracing::debug!(chunk_size, size, "starting resumable upload");
        let mime_type = match plan.mime_type {
            Some(mime_type) => mime_type.to_string(),
            None => guess_mime_type(plan.file_name(), Some(&first)),
        };
        let target = UploadTarget {
            file_id: plan.existing.map(|file| file.id.clone()),
            metadata: plan.metadata(Some(&mime_type)),
            mime_type,
            total_size: size,
        };
        let session = self
            .api
            .start_upload(&target, &self.fields.object())
            .await
            .or_fail(Operation::Write, plan.path.as_str())?;
        self.push_chunks(&session, reader, first, size, chunk_size, plan.path, cancel).await
    }

    async fn single_shot(&self, plan: &UploadPlan<'_>, data: Bytes) -> Result<DriveFile> {
        let path = plan.path.as_str();
        let mime_type = match plan.mime_type {
            Some(mime_type) => mime_type.to_string(),
            None => guess_mime_type(plan.file_name(), Some(&data)),
        };
        tracing::debug!(bytes = data.len(), %mime_type, "single-shot upload");
        let media = Media::new(mime_type, data);
        let fields = self.fields.object();
        let result = match plan.existing {
            Some(existing) => {
                self.api
                    .update_file(&existing.id, &plan.metadata(None), &UpdateOptions::default(), Some(media), &fields)
                    .await
            },
            None => self.api.create_file(&plan.metadata(None), Some(media), &fields).await,
        };
        result.or_fail_with(Operation::Write, path, || ErrorKind::WriteFailure(path.to_string()))
    }

    #[allow(clippy::too_many_arguments)]
    async fn push_chunks(
        &self,
        session: &UploadSession,
        mut reader: BoxAsyncRead,
        first: Bytes,
        size: Option<u64>,
        chunk_size: u64,
        path: &PathKey,
        cancel: Option<&CancellationToken>,
    ) -> Result<DriveFile> {
        let mut offset = 0u64;
        let mut data = first;
        loop {
            check_cancelled(cancel, path)?;
            let length = data.len() as u64;
            // A stream of unknown length is finalized with an empty chunk
            // once the reader runs dry.
            let total_size = match (size, length) {
                (Some(size), _) => Some(size),
                (None, 0) => Some(offset),
                (None, _) => None,
            };
            let chunk = UploadChunk {
                offset,
                data,
                total_size,
            };
            let status = self.push(session, chunk, path, cancel).await?;
            offset += length;
            match status {
                ChunkStatus::Complete(file) => {
                    tracing::debug!(bytes = offset, id = %file.id, "resumable upload complete");
                    return Ok(*file);
                },
                ChunkStatus::Incomplete { received } if received != offset => {
                    tracing::warn!(received, sent = offset, "upload session out of step");
                    exn::bail!(ErrorKind::WriteFailure(path.to_string()));
                },
                ChunkStatus::Incomplete { .. } if length == 0 => {
                    exn::bail!(ErrorKind::WriteFailure(path.to_string()));
                },
                ChunkStatus::Incomplete { .. } => {},
            }
            data = read_chunk(&mut reader, chunk_size, path).await?;
            if data.is_empty()
                && let Some(size) = size
            {
                tracing::warn!(sent = offset, declared = size, "stream ended before its declared size");
                exn::bail!(ErrorKind::WriteFailure(path.to_string()));
            }
        }
    }

    /// Push one chunk, racing cancellation and retrying retryable failures.
    async fn push(
        &self,
        session: &UploadSession,
        chunk: UploadChunk,
        path: &PathKey,
        cancel: Option<&CancellationToken>,
    ) -> Result<ChunkStatus> {
        let mut attempt = 0;
        let mut backoff = self.retry.backoff;
        loop {
            let call = self.api.upload_chunk(session, chunk.clone());
            let result = match cancel {
                Some(token) => tokio::select! {
                    _ = token.cancelled() => exn::bail!(ErrorKind::Cancelled(path.to_string())),
                    result = call => result,
                },
                None => call.await,
            };
            match result {
                Ok(status) => return Ok(status),
                Err(err) if err.is_retryable() && attempt < self.retry.attempts => {
                    attempt += 1;
                    tracing::warn!(%path, offset = chunk.offset, attempt, error = %err, "retrying chunk");
                    match cancel {
                        Some(token) => tokio::select! {
                            _ = token.cancelled() => exn::bail!(ErrorKind::Cancelled(path.to_string())),
                            _ = tokio::time::sleep(backoff) => {},
                        },
                        None => tokio::time::sleep(backoff).await,
                    }
                    backoff = backoff.saturating_mul(2);
                },
                Err(err) => return Err(err).or_fail(Operation::Write, path.as_str()),
            }
        }
    }
}

fn check_cancelled(cancel: Option<&CancellationToken>, path: &PathKey) -> Result<()> {
    if cancel.is_some_and(CancellationToken::is_cancelled) {
        exn::bail!(ErrorKind::Cancelled(path.to_string()));
    }
    Ok(())
}

/// Read up to `limit` bytes, accumulating across short reads.
async fn read_chunk(reader: &mut BoxAsyncRead, limit: u64, path: &PathKey) -> Result<Bytes> {
    let mut buffer = Vec::with_capacity(limit.min(8 * 1024 * 1024) as usize);
    reader
        .take(limit)
        .read_to_end(&mut buffer)
        .await
        .or_raise(|| ErrorKind::WriteFailure(path.to_string()))?;
    Ok(Bytes::from(buffer))
}
