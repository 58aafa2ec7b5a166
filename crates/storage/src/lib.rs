//! Google Drive as a path-addressed filesystem.
//!
//! [`GoogleDriveAdapter`] implements [`StorageBackend`] on top of any
//! [`DriveApi`](drivefs_api::DriveApi): the REST client in production, the
//! in-memory mock in tests.

pub mod backend;
pub mod cache;
pub mod error;
pub mod listing;
pub mod mime;
mod models;
pub mod normalize;
pub mod path;
pub mod resolver;
pub mod upload;
pub mod visibility;

pub use crate::backend::{GoogleDriveAdapter, StorageBackend, WriteOptions};
pub use crate::models::{EntryKind, Metadata};
pub use crate::path::PathKey;
pub use crate::visibility::Visibility;
use std::sync::Arc;

pub type BackendHandle = Arc<dyn StorageBackend + Send + Sync>;
