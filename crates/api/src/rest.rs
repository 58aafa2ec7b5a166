//! Drive v3 over HTTPS.
//!
//! A thin `reqwest` client: every method maps to one REST call (or one
//! paginated sequence of calls), applies the per-command defaults, attaches
//! a fresh bearer token and classifies the response status into an
//! [`ErrorKind`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use exn::ResultExt;
use futures::TryStreamExt;
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, LOCATION, RANGE};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode, redirect};
use serde::de::DeserializeOwned;
use time::OffsetDateTime;

use crate::auth::{TokenSource, fresh_token};
use crate::client::{ByteStream, ChunkStatus, DriveApi, UploadChunk, UploadSession, UploadTarget};
use crate::error::{Error, ErrorKind, Result};
use crate::models::{DriveFile, FileList, FileMetadata, Media, Permission, PermissionList, UpdateOptions};
use crate::params::{Command, Params, RequestDefaults};
use crate::query::ListRequest;

pub const API_BASE: &str = "https://www.googleapis.com/drive/v3";
pub const UPLOAD_BASE: &str = "https://www.googleapis.com/upload/drive/v3";
const MAX_REDIRECTS: usize = 5;
const PERMISSION_FIELDS: &str = "id,type,role,allowFileDiscovery,emailAddress,domain";

#[derive(Clone)]
pub struct RestDrive {
    http: Client,
    /// Resumable uploads answer `308 Resume Incomplete`, which must never be
    /// followed as a redirect.
    uploads: Client,
    api_base: String,
    upload_base: String,
    tokens: Arc<dyn TokenSource>,
    defaults: RequestDefaults,
}

impl RestDrive {
    pub fn new(tokens: Arc<dyn TokenSource>, defaults: RequestDefaults, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .redirect(redirect::Policy::limited(MAX_REDIRECTS))
            .build()
            .or_raise(|| ErrorKind::InvalidRequest("cannot build HTTP client".into()))?;
        let uploads = Client::builder()
            .timeout(timeout)
            .redirect(redirect::Policy::none())
            .build()
            .or_raise(|| ErrorKind::InvalidRequest("cannot build HTTP client".into()))?;
        Ok(Self {
            http,
            uploads,
            api_base: API_BASE.to_string(),
            upload_base: UPLOAD_BASE.to_string(),
            tokens,
            defaults,
        })
    }

    /// Point the client at a different host (Drive emulators, proxies).
    pub fn with_base_urls(mut self, api_base: impl Into<String>, upload_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self.upload_base = upload_base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn defaults(&self) -> &RequestDefaults {
        &self.defaults
    }

    async fn request(&self, command: Command, method: Method, url: String, params: Params) -> Result<RequestBuilder> {
        let token = fresh_token(self.tokens.as_ref()).await?;
        let params: Vec<(String, String)> = self.defaults.apply(command, params).into_iter().collect();
        tracing::trace!(%command, %url, "drive request");
        Ok(self.http.request(method, url).query(&params).bearer_auth(token.secret()))
    }

    async fn send(&self, command: Command, builder: RequestBuilder, context: &str) -> Result<Response> {
        let response = builder
            .send()
            .await
            .or_raise(|| ErrorKind::Network(format!("{command} {context}")))?;
        check_status(response, context).await
    }

    async fn send_json<T: DeserializeOwned>(&self, command: Command, builder: RequestBuilder, context: &str) -> Result<T> {
        let response = self.send(command, builder, context).await?;
        response
            .json::<T>()
            .await
            .or_raise(|| ErrorKind::InvalidResponse(format!("{command} {context}")))
    }

    fn file_url(&self, id: &str) -> String {
        format!("{}/files/{}", self.api_base, id)
    }
}

#[async_trait]
impl DriveApi for RestDrive {
    async fn get_file(&self, id: &str, fields: &str) -> Result<DriveFile> {
        let params = params([("fields", fields)]);
        let builder = self.request(Command::FilesGet, Method::GET, self.file_url(id), params).await?;
        self.send_json(Command::FilesGet, builder, id).await
    }

    async fn list_files(&self, request: &ListRequest) -> Result<FileList> {
        let mut params = Params::new();
        if let Some(query) = &request.query {
            params.insert("q".into(), query.to_string());
        }
        if let Some(size) = request.page_size {
            params.insert("pageSize".into(), size.to_string());
        }
        for (key, value) in [
            ("pageToken", &request.page_token),
            ("fields", &request.fields),
            ("spaces", &request.spaces),
            ("orderBy", &request.order_by),
        ] {
            if let Some(value) = value {
                params.insert(key.into(), value.clone());
            }
        }
        let url = format!("{}/files", self.api_base);
        let builder = self.request(Command::FilesList, Method::GET, url, params).await?;
        self.send_json(Command::FilesList, builder, "files").await
    }

    async fn create_file(&self, metadata: &FileMetadata, media: Option<Media>, fields: &str) -> Result<DriveFile> {
        let context = metadata.name.as_deref().unwrap_or("(unnamed)");
        let builder = match media {
            None => {
                let url = format!("{}/files", self.api_base);
                let params = params([("fields", fields)]);
                self.request(Command::FilesCreate, Method::POST, url, params).await?.json(metadata)
            },
            Some(media) => {
                let url = format!("{}/files", self.upload_base);
                let params = params([("fields", fields), ("uploadType", "multipart")]);
                let (content_type, body) = multipart_related(metadata, &media)?;
                self.request(Command::FilesCreate, Method::POST, url, params)
                    .await?
                    .header(CONTENT_TYPE, content_type)
                    .body(body)
            },
        };
        self.send_json(Command::FilesCreate, builder, context).await
    }

    async fn update_file(
        &self,
        id: &str,
        metadata: &FileMetadata,
        options: &UpdateOptions,
        media: Option<Media>,
        fields: &str,
    ) -> Result<DriveFile> {
        let mut params = params([("fields", fields)]);
        if !options.add_parents.is_empty() {
            params.insert("addParents".into(), options.add_parents.join(","));
        }
        if !options.remove_parents.is_empty() {
            params.insert("removeParents".into(), options.remove_parents.join(","));
        }
        let builder = match media {
            None => self.request(Command::FilesUpdate, Method::PATCH, self.file_url(id), params).await?.json(metadata),
            Some(media) => {
                params.insert("uploadType".into(), "multipart".into());
                let url = format!("{}/files/{}", self.upload_base, id);
                let (content_type, body) = multipart_related(metadata, &media)?;
                self.request(Command::FilesUpdate, Method::PATCH, url, params)
                    .await?
                    .header(CONTENT_TYPE, content_type)
                    .body(body)
            },
        };
        self.send_json(Command::FilesUpdate, builder, id).await
    }

    async fn delete_file(&self, id: &str) -> Result<()> {
        let builder = self.request(Command::FilesDelete, Method::DELETE, self.file_url(id), Params::new()).await?;
        self.send(Command::FilesDelete, builder, id).await?;
        Ok(())
    }

    async fn copy_file(&self, id: &str, metadata: &FileMetadata, fields: &str) -> Result<DriveFile> {
        let url = format!("{}/copy", self.file_url(id));
        let builder = self.request(Command::FilesCopy, Method::POST, url, params([("fields", fields)])).await?;
        self.send_json(Command::FilesCopy, builder.json(metadata), id).await
    }

    async fn download(&self, id: &str, export_mime: Option<&str>) -> Result<ByteStream> {
        let (command, builder) = match export_mime {
            Some(mime) => {
                let url = format!("{}/export", self.file_url(id));
                let builder = self.request(Command::FilesExport, Method::GET, url, params([("mimeType", mime)])).await?;
                (Command::FilesExport, builder)
            },
            None => {
                let builder = self.request(Command::FilesGet, Method::GET, self.file_url(id), params([("alt", "media")])).await?;
                (Command::FilesGet, builder)
            },
        };
        let response = self.send(command, builder, id).await?;
        let id = id.to_string();
        let stream = response
            .bytes_stream()
            .map_err(move |err| Error::from(ErrorKind::Network(format!("download {id}: {err}"))));
        Ok(Box::pin(stream))
    }

    async fn create_permission(&self, file_id: &str, permission: &Permission) -> Result<Permission> {
        let url = format!("{}/permissions", self.file_url(file_id));
        let builder = self
            .request(Command::PermissionsCreate, Method::POST, url, params([("fields", PERMISSION_FIELDS)]))
            .await?;
        self.send_json(Command::PermissionsCreate, builder.json(permission), file_id).await
    }

    async fn list_permissions(&self, file_id: &str) -> Result<Vec<Permission>> {
        let url = format!("{}/permissions", self.file_url(file_id));
        let fields = format!("permissions({PERMISSION_FIELDS}),nextPageToken");
        let mut permissions = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut params = params([("fields", fields.as_str())]);
            if let Some(token) = page_token.take() {
                params.insert("pageToken".into(), token);
            }
            let builder = self.request(Command::PermissionsList, Method::GET, url.clone(), params).await?;
            let page: PermissionList = self.send_json(Command::PermissionsList, builder, file_id).await?;
            permissions.extend(page.permissions);
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }
        Ok(permissions)
    }

    async fn delete_permission(&self, file_id: &str, permission_id: &str) -> Result<()> {
        let url = format!("{}/permissions/{}", self.file_url(file_id), permission_id);
        let builder = self.request(Command::PermissionsDelete, Method::DELETE, url, Params::new()).await?;
        self.send(Command::PermissionsDelete, builder, file_id).await?;
        Ok(())
    }

    async fn start_upload(&self, target: &UploadTarget, fields: &str) -> Result<UploadSession> {
        let params = params([("fields", fields), ("uploadType", "resumable")]);
        let (command, method, url) = match &target.file_id {
            Some(id) => (Command::FilesUpdate, Method::PATCH, format!("{}/files/{}", self.upload_base, id)),
            None => (Command::FilesCreate, Method::POST, format!("{}/files", self.upload_base)),
        };
        let mut builder = self
            .request(command, method, url, params)
            .await?
            .header("X-Upload-Content-Type", target.mime_type.as_str())
            .json(&target.metadata);
        if let Some(total) = target.total_size {
            builder = builder.header("X-Upload-Content-Length", total);
        }
        let context = target.metadata.name.as_deref().or(target.file_id.as_deref()).unwrap_or("(upload)");
        let response = self.send(command, builder, context).await?;
        let uri = response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| Error::from(ErrorKind::InvalidResponse(format!("no session location for {context}"))))?;
        tracing::debug!(context, "resumable upload session opened");
        Ok(UploadSession {
            uri: uri.to_string(),
            total_size: target.total_size,
        })
    }

    async fn upload_chunk(&self, session: &UploadSession, chunk: UploadChunk) -> Result<ChunkStatus> {
        let token = fresh_token(self.tokens.as_ref()).await?;
        let length = chunk.data.len();
        let range = content_range(&chunk);
        let response = self
            .uploads
            .put(&session.uri)
            .bearer_auth(token.secret())
            .header(CONTENT_LENGTH, length)
            .header(CONTENT_RANGE, range.as_str())
            .body(chunk.data)
            .send()
            .await
            .or_raise(|| ErrorKind::Network(format!("upload chunk {range}")))?;
        if response.status() == StatusCode::PERMANENT_REDIRECT {
            let received = response
                .headers()
                .get(RANGE)
                .and_then(|value| value.to_str().ok())
                .and_then(parse_received)
                .unwrap_or(0);
            return Ok(ChunkStatus::Incomplete { received });
        }
        let response = check_status(response, &range).await?;
        let file = response
            .json::<DriveFile>()
            .await
            .or_raise(|| ErrorKind::InvalidResponse(format!("upload chunk {range}")))?;
        Ok(ChunkStatus::Complete(Box::new(file)))
    }
}

fn params<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Params {
    pairs.into_iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

async fn check_status(response: Response, context: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    exn::bail!(classify(status.as_u16(), context, &body))
}

/// Map a non-success status and Drive's JSON error body to an error kind.
fn classify(status: u16, context: &str, body: &str) -> ErrorKind {
    let message = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| value.pointer("/error/message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string());
    match status {
        404 => ErrorKind::NotFound(context.to_string()),
        401 | 403 if !message.to_ascii_lowercase().contains("rate limit") => {
            ErrorKind::PermissionDenied(format!("{context}: {message}"))
        },
        _ => ErrorKind::Rejected { status, message },
    }
}

/// `Content-Range` for a chunk, e.g. `bytes 0-262143/*`.
fn content_range(chunk: &UploadChunk) -> String {
    let total = chunk.total_size.map_or_else(|| "*".to_string(), |t| t.to_string());
    match chunk.range() {
        Some((first, last)) => format!("bytes {first}-{last}/{total}"),
        None => format!("bytes */{total}"),
    }
}

/// Parse the `Range: bytes=0-N` header of a `308` into the number of bytes
/// Drive has persisted.
fn parse_received(header: &str) -> Option<u64> {
    let (_, last) = header.strip_prefix("bytes=")?.split_once('-')?;
    last.trim().parse::<u64>().ok().map(|last| last + 1)
}

/// Build a `multipart/related` body with JSON metadata and the media part.
fn multipart_related(metadata: &FileMetadata, media: &Media) -> Result<(String, Vec<u8>)> {
    let boundary = format!("drivefs-{:x}", OffsetDateTime::now_utc().unix_timestamp_nanos());
    let json = serde_json::to_vec(metadata).or_raise(|| ErrorKind::InvalidRequest("metadata".into()))?;
    let mut body = Vec::with_capacity(json.len() + media.data.len() + 256);
    body.extend_from_slice(format!("--{boundary}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n").as_bytes());
    body.extend_from_slice(&json);
    body.extend_from_slice(format!("\r\n--{boundary}\r\nContent-Type: {}\r\n\r\n", media.mime_type).as_bytes());
    body.extend_from_slice(&media.data);
    body.extend_from_slice(format!("\r\n--{boundary}--").as_bytes());
    Ok((format!("multipart/related; boundary={boundary}"), body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use rstest::rstest;

    #[rstest]
    #[case(404, "", "not found")]
    #[case(403, r#"{"error":{"code":403,"message":"The user does not have sufficient permissions"}}"#, "permission denied")]
    #[case(403, r#"{"error":{"code":403,"message":"User Rate Limit Exceeded"}}"#, "rejected")]
    #[case(500, "backend error", "rejected")]
    fn test_classify(#[case] status: u16, #[case] body: &str, #[case] expected: &str) {
        let kind = classify(status, "abc", body);
        let actual = match kind {
            ErrorKind::NotFound(_) => "not found",
            ErrorKind::PermissionDenied(_) => "permission denied",
            ErrorKind::Rejected { .. } => "rejected",
            _ => "other",
        };
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_classify_extracts_message() {
        let kind = classify(400, "abc", r#"{"error":{"code":400,"message":"Invalid Value"}}"#);
        assert_eq!(kind.to_string(), "request rejected with status 400: Invalid Value");
    }

    #[rstest]
    #[case(0, 4, None, "bytes 0-3/*")]
    #[case(4, 2, Some(6), "bytes 4-5/6")]
    #[case(6, 0, Some(6), "bytes */6")]
    fn test_content_range(#[case] offset: u64, #[case] len: usize, #[case] total: Option<u64>, #[case] expected: &str) {
        let chunk = UploadChunk {
            offset,
            data: Bytes::from(vec![0u8; len]),
            total_size: total,
        };
        assert_eq!(content_range(&chunk), expected);
    }

    #[rstest]
    #[case("bytes=0-262143", Some(262_144))]
    #[case("bytes=0-0", Some(1))]
    #[case("garbage", None)]
    fn test_parse_received(#[case] header: &str, #[case] expected: Option<u64>) {
        assert_eq!(parse_received(header), expected);
    }

    #[test]
    fn test_multipart_body() {
        let metadata = FileMetadata::named("a.txt").with_parent("root");
        let (content_type, body) = multipart_related(&metadata, &Media::new("text/plain", "hello")).unwrap();
        let boundary = content_type.strip_prefix("multipart/related; boundary=").unwrap();
        let body = String::from_utf8(body).unwrap();
        assert!(body.starts_with(&format!("--{boundary}\r\n")));
        assert!(body.contains(r#"{"name":"a.txt","parents":["root"]}"#));
        assert!(body.contains("Content-Type: text/plain\r\n\r\nhello\r\n"));
        assert!(body.ends_with(&format!("--{boundary}--")));
    }
}
