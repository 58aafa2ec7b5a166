pub mod auth;
pub mod batch;
pub mod client;
pub mod error;
#[cfg(any(test, feature = "mock"))]
mod mock;
pub mod models;
pub mod params;
pub mod query;
mod rest;

pub use crate::auth::{AccessToken, StaticToken, TokenSource};
pub use crate::batch::{Batch, BatchRequest, BatchResponse};
pub use crate::client::{ApiHandle, ByteStream, ChunkStatus, DriveApi, UploadChunk, UploadSession, UploadTarget};
#[cfg(any(test, feature = "mock"))]
pub use crate::mock::{MOCK_ROOT_ID, MockDrive, Op};
pub use crate::models::{DriveFile, FOLDER_MIME_TYPE, FileList, FileMetadata, Media, Permission, UpdateOptions};
pub use crate::params::{Command, FieldMask, RequestDefaults};
pub use crate::query::{ListRequest, Query};
pub use crate::rest::RestDrive;
