//! Lazy directory listing.
//!
//! Folders are walked depth-first with an explicit stack. Each page of
//! children is cached as it arrives, so stat calls for listed paths are
//! answered without another request.

use std::collections::HashMap;
use std::pin::Pin;

use async_stream::stream;
use drivefs_api::{Batch, BatchRequest, DriveFile, ListRequest, Query};
use futures::Stream;

use crate::cache::CacheEntry;
use crate::error::{ApiResultExt, Operation, Result};
use crate::models::Metadata;
use crate::normalize::Normalizer;
use crate::path::PathKey;
use crate::resolver::Resolver;

pub type MetadataStream<'a> = Pin<Box<dyn Stream<Item = Result<Metadata>> + Send + 'a>>;

pub struct Listing<'a> {
    resolver: &'a Resolver,
    normalizer: &'a Normalizer,
    page_size: u32,
    max_pages: Option<u32>,
}

impl<'a> Listing<'a> {
    pub fn new(resolver: &'a Resolver, normalizer: &'a Normalizer) -> Self {
        Self {
            resolver,
            normalizer,
            page_size: drivefs_config::MAX_PAGE_SIZE,
            max_pages: None,
        }
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_max_pages(mut self, max_pages: Option<u32>) -> Self {
        self.max_pages = max_pages;
        self
    }

    /// Stream the contents of the folder at `key`, reporting paths relative
    /// to `visible`. A missing folder, or a file, lists as empty.
    pub fn walk(self, key: PathKey, visible: PathKey, deep: bool) -> MetadataStream<'a> {
        Box::pin(stream! {
            let start = match self.resolver.resolve(&key).await {
                Ok(Some(located)) if located.file.is_folder() => Some(located.file.id),
                Ok(_) => {
                    tracing::debug!(path = %visible, "nothing to list");
                    None
                },
                Err(err) => {
                    yield Err(err);
                    None
                },
            };
            let mut stack: Vec<(String, PathKey)> = start.map(|id| (id, visible)).into_iter().collect();

            'dirs: while let Some((folder_id, folder_path)) = stack.pop() {
                let mut page_token = None;
                let mut pages = 0u32;
                loop {
                    let request = ListRequest::new(Query::children_of(folder_id.as_str()))
                        .page_size(self.page_size)
                        .page_token(page_token.take())
                        .order_by("createdTime")
                        .fields(self.resolver.fields().list())
                        .spaces(self.resolver.spaces());
                    let page = match self
                        .resolver
                        .api()
                        .list_files(&request)
                        .await
                        .or_fail(Operation::List, folder_path.as_str())
                    {
                        Ok(page) => page,
                        Err(err) => {
                            yield Err(err);
                            continue 'dirs;
                        },
                    };
                    pages += 1;
                    self.remember(&folder_id, &page.files).await;
                    let has_dirs = self.probe_children(&page.files).await;

                    for file in page.files {
                        match self.normalizer.normalize(&file, &folder_path, has_dirs.get(&file.id).copied()) {
                            Ok(metadata) => {
                                if deep && metadata.is_dir() {
                                    stack.push((file.id.clone(), metadata.path.clone()));
                                }
                                yield Ok(metadata);
                            },
                            Err(err) => tracing::warn!(parent = %folder_path, id = %file.id, error = %err, "skipping unaddressable object"),
                        }
                    }

                    page_token = page.next_page_token;
                    if page_token.is_none() {
                        break;
                    }
                    if self.max_pages.is_some_and(|max| pages >= max) {
                        tracing::warn!(path = %folder_path, pages, "page limit reached, listing truncated");
                        break;
                    }
                }
            }
        })
    }

    /// Cache a page of children under their parent. An object already
    /// cached under the same name keeps the slot.
    async fn remember(&self, parent_id: &str, files: &[DriveFile]) {
        let mut cache = self.resolver.cache().lock().await;
        for file in files {
            let segment = self.normalizer.segment(file);
            let taken = matches!(cache.get_by_name(parent_id, segment), Some(CacheEntry::Found(other)) if other.id != file.id);
            match taken {
                true => cache.put(None, file.clone()),
                false => cache.put(Some((parent_id, segment)), file.clone()),
            }
        }
    }

    /// Answer the child-directory probe for every folder on a page, batching
    /// the queries that the cache cannot answer.
    async fn probe_children(&self, files: &[DriveFile]) -> HashMap<String, bool> {
        let mut answers = HashMap::new();
        if !self.resolver.uses_has_dir() {
            return answers;
        }
        let mut batch = Batch::new();
        {
            let cache = self.resolver.cache().lock().await;
            for folder in files.iter().filter(|file| file.is_folder()) {
                match cache.has_dir(&folder.id) {
                    Some(known) => {
                        answers.insert(folder.id.clone(), known);
                    },
                    None => {
                        let request = ListRequest::new(Query::folders_in(folder.id.as_str()))
                            .page_size(1)
                            .fields("files(id)")
                            .spaces(self.resolver.spaces());
                        batch.push(folder.id.clone(), BatchRequest::List(request));
                    },
                }
            }
        }
        if batch.is_empty() {
            return answers;
        }
        let responses = batch.execute(self.resolver.api().as_ref()).await;
        let mut cache = self.resolver.cache().lock().await;
        for (id, response) in responses {
            match response {
                Ok(response) => {
                    let has_dir = response.into_list().is_some_and(|list| !list.files.is_empty());
                    cache.set_has_dir(&id, has_dir);
                    answers.insert(id, has_dir);
                },
                Err(err) => tracing::warn!(%id, error = %err, "child directory probe failed"),
            }
        }
        answers
    }
}
