//! Deferred request batches.
//!
//! Requests are collected under caller-chosen keys and executed together.
//! Each key gets its own typed result back, in insertion order, so one failed
//! request never hides the others.

use futures::{StreamExt, stream};

use crate::client::DriveApi;
use crate::error::Result;
use crate::models::{DriveFile, FileList};
use crate::query::ListRequest;

const DEFAULT_CONCURRENCY: usize = 8;

#[derive(Debug, Clone, PartialEq)]
pub enum BatchRequest {
    Get { id: String, fields: String },
    List(ListRequest),
}

#[derive(Debug, Clone, PartialEq)]
pub enum BatchResponse {
    File(DriveFile),
    List(FileList),
}

impl BatchResponse {
    pub fn into_list(self) -> Option<FileList> {
        match self {
            Self::List(list) => Some(list),
            Self::File(_) => None,
        }
    }

    pub fn into_file(self) -> Option<DriveFile> {
        match self {
            Self::File(file) => Some(file),
            Self::List(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Batch<K> {
    requests: Vec<(K, BatchRequest)>,
    concurrency: usize,
}

impl<K> Default for Batch<K> {
    fn default() -> Self {
        Self {
            requests: Vec::new(),
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

impl<K: Send> Batch<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn push(&mut self, key: K, request: BatchRequest) -> &mut Self {
        self.requests.push((key, request));
        self
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    #[tracing::instrument(skip_all, fields(requests = self.requests.len()))]
    pub async fn execute(self, api: &dyn DriveApi) -> Vec<(K, Result<BatchResponse>)> {
        stream::iter(self.requests)
            .map(|(key, request)| async move {
                let response = match request {
                    BatchRequest::Get { id, fields } => api.get_file(&id, &fields).await.map(BatchResponse::File),
                    BatchRequest::List(list) => api.list_files(&list).await.map(BatchResponse::List),
                };
                (key, response)
            })
            .buffered(self.concurrency)
            .collect()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_accessors() {
        let list = FileList {
            files: vec![DriveFile::default()],
            next_page_token: Some("2".into()),
        };
        let response = BatchResponse::List(list.clone());
        assert_eq!(response, BatchResponse::List(list.clone()));
        assert_ne!(response, BatchResponse::File(DriveFile::default()));
        assert_eq!(response.into_list(), Some(list));
        assert_eq!(BatchResponse::File(DriveFile::default()).into_list(), None);
    }

    #[test]
    fn test_push_keeps_order() {
        let mut batch = Batch::new().with_concurrency(0);
        assert!(batch.is_empty());
        batch
            .push("b", BatchRequest::Get { id: "b".into(), fields: "id".into() })
            .push("a", BatchRequest::Get { id: "a".into(), fields: "id".into() });
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.concurrency, 1);
        assert_eq!(batch.requests[0].0, "b");
    }
}
