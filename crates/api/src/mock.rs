//! In-memory Drive for testing.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use time::OffsetDateTime;
use tokio::sync::Mutex;

use crate::client::{ByteStream, ChunkStatus, DriveApi, UploadChunk, UploadSession, UploadTarget};
use crate::error::{ErrorKind, Result};
use crate::models::{DriveFile, FOLDER_MIME_TYPE, FileList, FileMetadata, Media, Permission, UpdateOptions};
use crate::query::{ListRequest, Query};

/// Real id of the mock's root folder. `"root"` is accepted as an alias.
pub const MOCK_ROOT_ID: &str = "mock-root";
const ROOT_ALIAS: &str = "root";
const DEFAULT_PAGE_SIZE: usize = 100;
const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Operations counted (and failable) by [`MockDrive`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Get,
    List,
    Create,
    Update,
    Delete,
    Copy,
    Download,
    CreatePermission,
    ListPermissions,
    DeletePermission,
    StartUpload,
    UploadChunk,
}

struct Stored {
    file: DriveFile,
    content: Bytes,
}

struct Pending {
    target: UploadTarget,
    received: BytesMut,
}

#[derive(Default)]
struct State {
    objects: BTreeMap<String, Stored>,
    next_id: u64,
    next_permission: u64,
    next_session: u64,
    sessions: HashMap<String, Pending>,
    calls: HashMap<Op, usize>,
    failures: HashMap<Op, (usize, ErrorKind)>,
}

impl State {
    fn canonical<'a>(&self, id: &'a str) -> &'a str {
        match id {
            ROOT_ALIAS => MOCK_ROOT_ID,
            other => other,
        }
    }

    fn record(&mut self, op: Op) -> Result<()> {
        *self.calls.entry(op).or_default() += 1;
        if let Some((remaining, kind)) = self.failures.get_mut(&op)
            && *remaining > 0
        {
            *remaining -= 1;
            let kind = kind.clone();
            if *remaining == 0 {
                self.failures.remove(&op);
            }
            exn::bail!(kind);
        }
        Ok(())
    }

    fn get(&self, id: &str) -> Result<&Stored> {
        let id = self.canonical(id);
        self.objects
            .get(id)
            .ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(id.to_string())))
    }

    fn get_mut(&mut self, id: &str) -> Result<&mut Stored> {
        let id = self.canonical(id).to_string();
        self.objects
            .get_mut(&id)
            .ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(id)))
    }

    fn ensure_folder(&self, id: &str) -> Result<String> {
        let stored = self.get(id)?;
        if !stored.file.is_folder() {
            exn::bail!(ErrorKind::Rejected {
                status: 400,
                message: format!("parent {id} is not a folder"),
            });
        }
        Ok(stored.file.id.clone())
    }

    fn allocate_id(&mut self) -> String {
        self.next_id += 1;
        format!("mock{:06}", self.next_id)
    }

    fn insert(&mut self, metadata: &FileMetadata, mime_type: Option<&str>, content: Bytes) -> Result<DriveFile> {
        let parents = match &metadata.parents {
            Some(parents) if !parents.is_empty() => parents
                .iter()
                .map(|p| self.ensure_folder(p))
                .collect::<Result<Vec<_>>>()?,
            _ => vec![MOCK_ROOT_ID.to_string()],
        };
        let mime_type = metadata
            .mime_type
            .clone()
            .or_else(|| mime_type.map(str::to_string))
            .unwrap_or_else(|| DEFAULT_MIME_TYPE.to_string());
        let id = self.allocate_id();
        let file = DriveFile {
            id: id.clone(),
            name: metadata.name.clone().unwrap_or_else(|| "Untitled".to_string()),
            size: sized(&mime_type, &content),
            mime_type,
            parents,
            modified_time: Some(OffsetDateTime::now_utc()),
            trashed: metadata.trashed.unwrap_or(false),
            ..Default::default()
        };
        self.objects.insert(id, Stored {
            file: file.clone(),
            content,
        });
        Ok(file)
    }

    fn remove_tree(&mut self, id: &str) {
        if self.objects.remove(id).is_none() {
            return;
        }
        let children: Vec<String> = self
            .objects
            .values()
            .filter(|stored| stored.file.has_parent(id))
            .map(|stored| stored.file.id.clone())
            .collect();
        for child in children {
            let orphaned = match self.objects.get_mut(&child) {
                Some(stored) => {
                    stored.file.parents.retain(|p| p != id);
                    stored.file.parents.is_empty()
                },
                None => false,
            };
            if orphaned {
                self.remove_tree(&child);
            }
        }
    }

    fn matches(&self, file: &DriveFile, query: &Query) -> bool {
        match query {
            Query::Trashed(trashed) => file.trashed == *trashed,
            Query::NameEquals(name) => &file.name == name,
            Query::InParents(parent) => file.has_parent(self.canonical(parent)),
            Query::MimeTypeEquals(mime) => &file.mime_type == mime,
            Query::MimeTypeNotEquals(mime) => &file.mime_type != mime,
            Query::And(terms) => terms.iter().all(|term| self.matches(file, term)),
            Query::Or(terms) => terms.iter().any(|term| self.matches(file, term)),
        }
    }
}

fn sized(mime_type: &str, content: &Bytes) -> Option<u64> {
    match mime_type.starts_with("application/vnd.google-apps.") {
        true => None,
        false => Some(content.len() as u64),
    }
}

/// In-memory implementation of [`DriveApi`].
///
/// Models the parts of Drive the adapter depends on: multiple parents per
/// object, trash, permissions, paginated queries and resumable upload
/// sessions. Every call is counted per [`Op`], and failures can be queued
/// with [`fail_next`](Self::fail_next).
///
/// # Examples
///
/// ```
/// use drivefs_api::{DriveApi, MockDrive, MOCK_ROOT_ID};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let drive = MockDrive::new();
/// let docs = drive.insert_folder("docs", MOCK_ROOT_ID).await;
/// let file = drive.insert_file("a.txt", &docs.id, "text/plain", "hello").await;
/// assert_eq!(drive.get_file(&file.id, "id").await.unwrap().parents, vec![docs.id]);
/// # }
/// ```
pub struct MockDrive {
    state: Mutex<State>,
}

impl Default for MockDrive {
    fn default() -> Self {
        let mut state = State::default();
        state.objects.insert(MOCK_ROOT_ID.to_string(), Stored {
            file: DriveFile {
                id: MOCK_ROOT_ID.to_string(),
                name: "My Drive".to_string(),
                mime_type: FOLDER_MIME_TYPE.to_string(),
                modified_time: Some(OffsetDateTime::now_utc()),
                ..Default::default()
            },
            content: Bytes::new(),
        });
        Self { state: Mutex::new(state) }
    }
}

impl MockDrive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a folder directly, bypassing call counting.
    ///
    /// Panics on an unknown parent. If test setup is wrong, then test
    /// should not pass.
    pub async fn insert_folder(&self, name: &str, parent: &str) -> DriveFile {
        let mut state = self.state.lock().await;
        match state.insert(&FileMetadata::folder(name, parent), None, Bytes::new()) {
            Ok(file) => file,
            Err(err) => panic!("MockDrive::insert_folder: {err}"),
        }
    }

    /// Create a file directly, bypassing call counting.
    pub async fn insert_file(&self, name: &str, parent: &str, mime_type: &str, content: impl Into<Bytes>) -> DriveFile {
        let mut state = self.state.lock().await;
        let metadata = FileMetadata::named(name).with_mime_type(mime_type).with_parent(parent);
        match state.insert(&metadata, None, content.into()) {
            Ok(file) => file,
            Err(err) => panic!("MockDrive::insert_file: {err}"),
        }
    }

    /// Link an existing object under an additional parent.
    pub async fn add_parent(&self, id: &str, parent: &str) {
        let mut state = self.state.lock().await;
        let parent = state.canonical(parent).to_string();
        match state.get_mut(id) {
            Ok(stored) if !stored.file.has_parent(&parent) => stored.file.parents.push(parent),
            Ok(_) => {},
            Err(err) => panic!("MockDrive::add_parent: {err}"),
        }
    }

    /// Attach a permission directly, bypassing call counting.
    pub async fn insert_permission(&self, id: &str, mut permission: Permission) -> Permission {
        let mut state = self.state.lock().await;
        state.next_permission += 1;
        permission.id = Some(format!("perm{}", state.next_permission));
        match state.get_mut(id) {
            Ok(stored) => stored.file.permissions.push(permission.clone()),
            Err(err) => panic!("MockDrive::insert_permission: {err}"),
        }
        permission
    }

    /// Snapshot of an object, including trashed ones.
    pub async fn file(&self, id: &str) -> Option<DriveFile> {
        self.state.lock().await.get(id).ok().map(|stored| stored.file.clone())
    }

    pub async fn content(&self, id: &str) -> Option<Bytes> {
        self.state.lock().await.get(id).ok().map(|stored| stored.content.clone())
    }

    /// Number of stored objects, root included.
    pub async fn object_count(&self) -> usize {
        self.state.lock().await.objects.len()
    }

    pub async fn call_count(&self, op: Op) -> usize {
        self.state.lock().await.calls.get(&op).copied().unwrap_or(0)
    }

    pub async fn reset_calls(&self) {
        self.state.lock().await.calls.clear();
    }

    /// Make the next `times` calls of `op` fail with `kind`.
    pub async fn fail_next(&self, op: Op, times: usize, kind: ErrorKind) {
        self.state.lock().await.failures.insert(op, (times, kind));
    }
}

#[async_trait]
impl DriveApi for MockDrive {
    async fn get_file(&self, id: &str, _fields: &str) -> Result<DriveFile> {
        let mut state = self.state.lock().await;
        state.record(Op::Get)?;
        Ok(state.get(id)?.file.clone())
    }

    async fn list_files(&self, request: &ListRequest) -> Result<FileList> {
        let mut state = self.state.lock().await;
        state.record(Op::List)?;
        let mut matching: Vec<DriveFile> = state
            .objects
            .values()
            .filter(|stored| stored.file.id != MOCK_ROOT_ID)
            .filter(|stored| request.query.as_ref().is_none_or(|query| state.matches(&stored.file, query)))
            .map(|stored| stored.file.clone())
            .collect();
        match request.order_by.as_deref() {
            // Ids are handed out in creation order.
            Some("createdTime") => {},
            Some("name") => matching.sort_by(|a, b| a.name.cmp(&b.name)),
            // Unordered listings come back newest first.
            _ => matching.reverse(),
        }
        let offset = match &request.page_token {
            Some(token) => token.parse::<usize>().map_err(|_| {
                exn::Exn::from(ErrorKind::Rejected {
                    status: 400,
                    message: format!("invalid page token {token}"),
                })
            })?,
            None => 0,
        };
        let page_size = request.page_size.map_or(DEFAULT_PAGE_SIZE, |size| size.max(1) as usize);
        let end = (offset + page_size).min(matching.len());
        let files = matching.get(offset..end).map(<[DriveFile]>::to_vec).unwrap_or_default();
        let next_page_token = (end < matching.len()).then(|| end.to_string());
        Ok(FileList { files, next_page_token })
    }

    async fn create_file(&self, metadata: &FileMetadata, media: Option<Media>, _fields: &str) -> Result<DriveFile> {
        let mut state = self.state.lock().await;
        state.record(Op::Create)?;
        let (mime_type, content) = match media {
            Some(media) => (Some(media.mime_type), media.data),
            None => (None, Bytes::new()),
        };
        state.insert(metadata, mime_type.as_deref(), content)
    }

    async fn update_file(
        &self,
        id: &str,
        metadata: &FileMetadata,
        options: &UpdateOptions,
        media: Option<Media>,
        _fields: &str,
    ) -> Result<DriveFile> {
        let mut state = self.state.lock().await;
        state.record(Op::Update)?;
        let added = options
            .add_parents
            .iter()
            .map(|p| state.ensure_folder(p))
            .collect::<Result<Vec<_>>>()?;
        let removed: Vec<String> = options.remove_parents.iter().map(|p| state.canonical(p).to_string()).collect();
        let stored = state.get_mut(id)?;
        for parent in &removed {
            if !stored.file.has_parent(parent) {
                exn::bail!(ErrorKind::Rejected {
                    status: 400,
                    message: format!("{parent} is not a parent of {id}"),
                });
            }
        }
        stored.file.parents.retain(|p| !removed.contains(p));
        for parent in added {
            if !stored.file.has_parent(&parent) {
                stored.file.parents.push(parent);
            }
        }
        if let Some(name) = &metadata.name {
            stored.file.name = name.clone();
        }
        if let Some(mime_type) = &metadata.mime_type {
            stored.file.mime_type = mime_type.clone();
        }
        if let Some(trashed) = metadata.trashed {
            stored.file.trashed = trashed;
        }
        if let Some(media) = media {
            if metadata.mime_type.is_none() {
                stored.file.mime_type = media.mime_type;
            }
            stored.content = media.data;
        }
        stored.file.size = sized(&stored.file.mime_type, &stored.content);
        stored.file.modified_time = Some(OffsetDateTime::now_utc());
        Ok(stored.file.clone())
    }

    async fn delete_file(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.record(Op::Delete)?;
        let id = state.get(id)?.file.id.clone();
        if id == MOCK_ROOT_ID {
            exn::bail!(ErrorKind::PermissionDenied("the root folder cannot be deleted".into()));
        }
        state.remove_tree(&id);
        Ok(())
    }

    async fn copy_file(&self, id: &str, metadata: &FileMetadata, _fields: &str) -> Result<DriveFile> {
        let mut state = self.state.lock().await;
        state.record(Op::Copy)?;
        let source = state.get(id)?;
        if source.file.is_folder() {
            exn::bail!(ErrorKind::Rejected {
                status: 403,
                message: "folders cannot be copied".into(),
            });
        }
        let content = source.content.clone();
        let mut copy = metadata.clone();
        copy.name = copy.name.or_else(|| Some(source.file.name.clone()));
        copy.mime_type = Some(source.file.mime_type.clone());
        if copy.parents.is_none() {
            copy.parents = Some(source.file.parents.clone());
        }
        state.insert(&copy, None, content)
    }

    async fn download(&self, id: &str, export_mime: Option<&str>) -> Result<ByteStream> {
        let mut state = self.state.lock().await;
        state.record(Op::Download)?;
        let stored = state.get(id)?;
        let is_apps = stored.file.is_google_apps();
        let data = match (export_mime, is_apps) {
            _ if stored.file.is_folder() => exn::bail!(ErrorKind::Rejected {
                status: 403,
                message: "folders have no content".into(),
            }),
            (Some(mime), true) => Bytes::from(format!("{} exported as {mime}", stored.file.name)),
            (None, false) => stored.content.clone(),
            (Some(_), false) => exn::bail!(ErrorKind::Rejected {
                status: 403,
                message: "only Google Apps documents can be exported".into(),
            }),
            (None, true) => exn::bail!(ErrorKind::Rejected {
                status: 403,
                message: "Google Apps documents must be exported".into(),
            }),
        };
        // Split into two frames so readers see more than one chunk.
        let middle = data.len() / 2;
        let frames = vec![Ok(data.slice(..middle)), Ok(data.slice(middle..))];
        Ok(Box::pin(futures::stream::iter(frames)))
    }

    async fn create_permission(&self, file_id: &str, permission: &Permission) -> Result<Permission> {
        let mut state = self.state.lock().await;
        state.record(Op::CreatePermission)?;
        state.get(file_id)?;
        state.next_permission += 1;
        let mut created = permission.clone();
        created.id = Some(format!("perm{}", state.next_permission));
        state.get_mut(file_id)?.file.permissions.push(created.clone());
        Ok(created)
    }

    async fn list_permissions(&self, file_id: &str) -> Result<Vec<Permission>> {
        let mut state = self.state.lock().await;
        state.record(Op::ListPermissions)?;
        Ok(state.get(file_id)?.file.permissions.clone())
    }

    async fn delete_permission(&self, file_id: &str, permission_id: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        state.record(Op::DeletePermission)?;
        let stored = state.get_mut(file_id)?;
        let before = stored.file.permissions.len();
        stored.file.permissions.retain(|p| p.id.as_deref() != Some(permission_id));
        if stored.file.permissions.len() == before {
            exn::bail!(ErrorKind::NotFound(format!("permission {permission_id}")));
        }
        Ok(())
    }

    async fn start_upload(&self, target: &UploadTarget, _fields: &str) -> Result<UploadSession> {
        let mut state = self.state.lock().await;
        state.record(Op::StartUpload)?;
        if let Some(id) = &target.file_id {
            state.get(id)?;
        }
        if let Some(parents) = &target.metadata.parents {
            for parent in parents {
                state.ensure_folder(parent)?;
            }
        }
        state.next_session += 1;
        let uri = format!("mock://upload/{}", state.next_session);
        state.sessions.insert(uri.clone(), Pending {
            target: target.clone(),
            received: BytesMut::new(),
        });
        Ok(UploadSession {
            uri,
            total_size: target.total_size,
        })
    }

    async fn upload_chunk(&self, session: &UploadSession, chunk: UploadChunk) -> Result<ChunkStatus> {
        let mut state = self.state.lock().await;
        state.record(Op::UploadChunk)?;
        let pending = state
            .sessions
            .get_mut(&session.uri)
            .ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(session.uri.clone())))?;
        let offset = chunk.offset as usize;
        if offset > pending.received.len() {
            exn::bail!(ErrorKind::Rejected {
                status: 400,
                message: format!("chunk at {offset} leaves a gap after {}", pending.received.len()),
            });
        }
        // Re-sending an already persisted range overwrites it.
        pending.received.truncate(offset);
        pending.received.extend_from_slice(&chunk.data);
        let received = pending.received.len() as u64;
        let total = chunk.total_size.or(pending.target.total_size);
        match total {
            Some(total) if received > total => exn::bail!(ErrorKind::Rejected {
                status: 400,
                message: format!("received {received} bytes, declared {total}"),
            }),
            Some(total) if received == total => {},
            _ => return Ok(ChunkStatus::Incomplete { received }),
        }
        let Some(pending) = state.sessions.remove(&session.uri) else {
            exn::bail!(ErrorKind::NotFound(session.uri.clone()));
        };
        let content = pending.received.freeze();
        let target = pending.target;
        let file = match &target.file_id {
            Some(id) => {
                let stored = state.get_mut(id)?;
                stored.content = content;
                stored.file.mime_type = target.mime_type.clone();
                stored.file.size = sized(&stored.file.mime_type, &stored.content);
                stored.file.modified_time = Some(OffsetDateTime::now_utc());
                stored.file.clone()
            },
            None => state.insert(&target.metadata, Some(&target.mime_type), content)?,
        };
        Ok(ChunkStatus::Complete(Box::new(file)))
    }
}
