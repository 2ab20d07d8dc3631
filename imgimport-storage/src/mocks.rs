// Copyright 2024 The imgimport Authors. All rights reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use core::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use imgimport_error::{Code, Error, make_err};
use tokio::sync::RwLock;

use crate::operations::StorageOperations;
use crate::streams::{ByteStream, UploadStream};
use crate::types::{
    BucketAttrs, BucketAttrsToUpdate, DEFAULT_CONTENT_TYPE, ObjectAttrs, ObjectPath, Page,
};

const DEFAULT_PAGE_SIZE: usize = 1000;
const DEFAULT_READ_CHUNK_SIZE: usize = 64 * 1024;

/// A mock implementation of `StorageOperations` for testing
#[derive(Debug)]
pub struct MockStorageOperations {
    // Buckets with the project that owns them
    buckets: RwLock<HashMap<String, MockBucket>>,
    objects: RwLock<BTreeMap<ObjectPath, MockObject>>,
    // Buckets that exist but belong to a project the caller can't see
    foreign_buckets: RwLock<HashSet<String>>,
    generation: AtomicI64,
    page_size: AtomicUsize,
    read_chunk_size: AtomicUsize,
    closed: AtomicBool,
    // Flag to simulate failures
    should_fail: AtomicBool,
    // Flag to simulate specific failure modes
    failure_mode: RwLock<FailureMode>,
    call_counts: CallCounts,
    // For capturing requests to verify correct parameter passing
    requests: RwLock<Vec<MockRequest>>,
}

#[derive(Debug, Clone)]
struct MockBucket {
    project: String,
    attrs: BucketAttrs,
}

#[derive(Debug, Clone)]
struct MockObject {
    attrs: ObjectAttrs,
    content: Bytes,
}

#[derive(Debug, Default)]
pub struct CallCounts {
    pub bucket_calls: AtomicUsize,
    pub list_calls: AtomicUsize,
    pub metadata_calls: AtomicUsize,
    pub read_calls: AtomicUsize,
    pub write_calls: AtomicUsize,
    pub delete_calls: AtomicUsize,
    pub compose_calls: AtomicUsize,
    pub copy_calls: AtomicUsize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockRequest {
    CreateBucket {
        project: String,
        attrs: BucketAttrs,
    },
    UpdateBucket {
        bucket: String,
        update: BucketAttrsToUpdate,
    },
    GetBucketAttrs {
        bucket: String,
    },
    ListBuckets {
        project: String,
        page_token: Option<String>,
    },
    GetObjectAttrs {
        object_path: ObjectPath,
    },
    ListObjects {
        bucket: String,
        prefix: String,
        page_token: Option<String>,
    },
    Read {
        object_path: ObjectPath,
    },
    Write {
        object_path: ObjectPath,
        content_type: String,
    },
    Delete {
        object_path: ObjectPath,
    },
    Compose {
        destination: ObjectPath,
        sources: Vec<ObjectPath>,
    },
    Copy {
        source: ObjectPath,
        destination: ObjectPath,
    },
}

#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    #[default]
    None,
    NotFound,
    PermissionDenied,
    NetworkError,
    ServerError,
}

impl Default for MockStorageOperations {
    fn default() -> Self {
        Self::new()
    }
}

impl MockStorageOperations {
    /// Create a new empty mock storage backend
    pub fn new() -> Self {
        Self {
            buckets: RwLock::new(HashMap::new()),
            objects: RwLock::new(BTreeMap::new()),
            foreign_buckets: RwLock::new(HashSet::new()),
            generation: AtomicI64::new(0),
            page_size: AtomicUsize::new(DEFAULT_PAGE_SIZE),
            read_chunk_size: AtomicUsize::new(DEFAULT_READ_CHUNK_SIZE),
            closed: AtomicBool::new(false),
            should_fail: AtomicBool::new(false),
            failure_mode: RwLock::new(FailureMode::None),
            call_counts: CallCounts::default(),
            requests: RwLock::new(Vec::new()),
        }
    }

    /// Set whether operations should fail or not
    pub fn set_should_fail(&self, should_fail: bool) {
        self.should_fail.store(should_fail, Ordering::Relaxed);
    }

    /// Set the specific failure mode to simulate
    pub async fn set_failure_mode(&self, mode: FailureMode) {
        *self.failure_mode.write().await = mode;
    }

    /// Number of items returned per listing page
    pub fn set_page_size(&self, page_size: usize) {
        self.page_size.store(page_size.max(1), Ordering::Relaxed);
    }

    /// Size of the chunks `read_object` streams content in
    pub fn set_read_chunk_size(&self, chunk_size: usize) {
        self.read_chunk_size
            .store(chunk_size.max(1), Ordering::Relaxed);
    }

    /// Add a bucket owned by `project`
    pub async fn add_bucket(&self, project: &str, attrs: BucketAttrs) {
        self.buckets.write().await.insert(
            attrs.name.clone(),
            MockBucket {
                project: project.to_string(),
                attrs,
            },
        );
    }

    /// Add a bucket whose attributes can't be read, as if it belonged to
    /// someone else
    pub async fn add_foreign_bucket(&self, name: &str) {
        self.foreign_buckets.write().await.insert(name.to_string());
    }

    /// Add a mock object. The bucket does not need to exist.
    pub async fn add_object(&self, path: &ObjectPath, content: impl Into<Bytes>) {
        let content = content.into();
        let attrs = self.new_attrs(path, DEFAULT_CONTENT_TYPE, &content);
        self.objects
            .write()
            .await
            .insert(path.clone(), MockObject { attrs, content });
    }

    /// Content of an object, if it exists
    pub async fn get_content(&self, path: &ObjectPath) -> Option<Bytes> {
        self.objects
            .read()
            .await
            .get(path)
            .map(|object| object.content.clone())
    }

    /// Names of all objects in `bucket`, sorted
    pub async fn object_names(&self, bucket: &str) -> Vec<String> {
        self.objects
            .read()
            .await
            .keys()
            .filter(|path| path.bucket == bucket)
            .map(|path| path.path.clone())
            .collect()
    }

    pub async fn bucket_project(&self, bucket: &str) -> Option<String> {
        self.buckets
            .read()
            .await
            .get(bucket)
            .map(|bucket| bucket.project.clone())
    }

    pub const fn call_counts(&self) -> &CallCounts {
        &self.call_counts
    }

    /// Get all recorded requests
    pub async fn get_requests(&self) -> Vec<MockRequest> {
        self.requests.read().await.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    fn new_attrs(&self, path: &ObjectPath, content_type: &str, content: &Bytes) -> ObjectAttrs {
        ObjectAttrs {
            bucket: path.bucket.clone(),
            name: path.path.clone(),
            size: content.len() as u64,
            content_type: content_type.to_string(),
            generation: self.generation.fetch_add(1, Ordering::Relaxed) + 1,
            updated: None,
        }
    }

    /// Records the request and applies the closed flag and failure
    /// injection.
    async fn begin(&self, counter: &AtomicUsize, request: MockRequest) -> Result<(), Error> {
        counter.fetch_add(1, Ordering::Relaxed);
        self.requests.write().await.push(request);
        if self.closed.load(Ordering::Relaxed) {
            return Err(make_err!(
                Code::FailedPrecondition,
                "Storage client is closed"
            ));
        }
        if !self.should_fail.load(Ordering::Relaxed) {
            return Ok(());
        }
        match *self.failure_mode.read().await {
            FailureMode::None => Err(make_err!(Code::Internal, "Simulated generic failure")),
            FailureMode::NotFound => Err(make_err!(Code::NotFound, "Simulated not found error")),
            FailureMode::PermissionDenied => Err(make_err!(
                Code::PermissionDenied,
                "Simulated permission denied"
            )),
            FailureMode::NetworkError => {
                Err(make_err!(Code::Unavailable, "Simulated network error"))
            }
            FailureMode::ServerError => Err(make_err!(Code::Internal, "Simulated server error")),
        }
    }

    fn page<T: Clone>(&self, items: &[T], page_token: Option<&str>) -> Result<Page<T>, Error> {
        let start = match page_token {
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| make_err!(Code::InvalidArgument, "Invalid page token {token}"))?,
            None => 0,
        };
        let end = items
            .len()
            .min(start.saturating_add(self.page_size.load(Ordering::Relaxed)));
        let page_items = items.get(start..end).unwrap_or_default().to_vec();
        Ok(Page {
            items: page_items,
            next_page_token: (end < items.len()).then(|| end.to_string()),
        })
    }

    async fn require_object(&self, path: &ObjectPath) -> Result<MockObject, Error> {
        self.objects
            .read()
            .await
            .get(path)
            .cloned()
            .ok_or_else(|| make_err!(Code::NotFound, "Object {path} not found"))
    }

    async fn store(&self, path: &ObjectPath, content_type: &str, content: Bytes) -> ObjectAttrs {
        let attrs = self.new_attrs(path, content_type, &content);
        self.objects.write().await.insert(
            path.clone(),
            MockObject {
                attrs: attrs.clone(),
                content,
            },
        );
        attrs
    }
}

#[async_trait]
impl StorageOperations for MockStorageOperations {
    async fn create_bucket(
        &self,
        project: &str,
        attrs: &BucketAttrs,
    ) -> Result<BucketAttrs, Error> {
        self.begin(
            &self.call_counts.bucket_calls,
            MockRequest::CreateBucket {
                project: project.to_string(),
                attrs: attrs.clone(),
            },
        )
        .await?;
        if self.foreign_buckets.read().await.contains(&attrs.name) {
            return Err(make_err!(
                Code::AlreadyExists,
                "Bucket {} already exists",
                attrs.name
            ));
        }
        let mut buckets = self.buckets.write().await;
        if buckets.contains_key(&attrs.name) {
            return Err(make_err!(
                Code::AlreadyExists,
                "Bucket {} already exists",
                attrs.name
            ));
        }
        let mut stored = attrs.clone();
        stored.location = stored.location.to_uppercase();
        buckets.insert(
            attrs.name.clone(),
            MockBucket {
                project: project.to_string(),
                attrs: stored.clone(),
            },
        );
        Ok(stored)
    }

    async fn update_bucket(
        &self,
        bucket: &str,
        update: &BucketAttrsToUpdate,
    ) -> Result<BucketAttrs, Error> {
        self.begin(
            &self.call_counts.bucket_calls,
            MockRequest::UpdateBucket {
                bucket: bucket.to_string(),
                update: update.clone(),
            },
        )
        .await?;
        let mut buckets = self.buckets.write().await;
        let stored = buckets
            .get_mut(bucket)
            .ok_or_else(|| make_err!(Code::NotFound, "Bucket {bucket} not found"))?;
        if let Some(uniform) = update.uniform_bucket_level_access {
            stored.attrs.uniform_bucket_level_access = uniform;
        }
        if let Some(labels) = &update.labels {
            stored.attrs.labels.extend(labels.clone());
        }
        Ok(stored.attrs.clone())
    }

    async fn get_bucket_attrs(&self, bucket: &str) -> Result<BucketAttrs, Error> {
        self.begin(
            &self.call_counts.bucket_calls,
            MockRequest::GetBucketAttrs {
                bucket: bucket.to_string(),
            },
        )
        .await?;
        if self.foreign_buckets.read().await.contains(bucket) {
            return Err(make_err!(
                Code::PermissionDenied,
                "No access to bucket {bucket}"
            ));
        }
        self.buckets
            .read()
            .await
            .get(bucket)
            .map(|stored| stored.attrs.clone())
            .ok_or_else(|| make_err!(Code::NotFound, "Bucket {bucket} not found"))
    }

    async fn list_buckets(
        &self,
        project: &str,
        page_token: Option<String>,
    ) -> Result<Page<BucketAttrs>, Error> {
        self.begin(
            &self.call_counts.list_calls,
            MockRequest::ListBuckets {
                project: project.to_string(),
                page_token: page_token.clone(),
            },
        )
        .await?;
        let mut owned: Vec<BucketAttrs> = self
            .buckets
            .read()
            .await
            .values()
            .filter(|stored| stored.project == project)
            .map(|stored| stored.attrs.clone())
            .collect();
        owned.sort_by(|a, b| a.name.cmp(&b.name));
        self.page(&owned, page_token.as_deref())
    }

    async fn get_object_attrs(&self, path: &ObjectPath) -> Result<ObjectAttrs, Error> {
        self.begin(
            &self.call_counts.metadata_calls,
            MockRequest::GetObjectAttrs {
                object_path: path.clone(),
            },
        )
        .await?;
        Ok(self.require_object(path).await?.attrs)
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        page_token: Option<String>,
    ) -> Result<Page<ObjectAttrs>, Error> {
        self.begin(
            &self.call_counts.list_calls,
            MockRequest::ListObjects {
                bucket: bucket.to_string(),
                prefix: prefix.to_string(),
                page_token: page_token.clone(),
            },
        )
        .await?;
        let matching: Vec<ObjectAttrs> = self
            .objects
            .read()
            .await
            .iter()
            .filter(|(path, _)| path.bucket == bucket && path.path.starts_with(prefix))
            .map(|(_, object)| object.attrs.clone())
            .collect();
        self.page(&matching, page_token.as_deref())
    }

    async fn read_object(&self, path: &ObjectPath) -> Result<ByteStream, Error> {
        self.begin(
            &self.call_counts.read_calls,
            MockRequest::Read {
                object_path: path.clone(),
            },
        )
        .await?;
        let content = self.require_object(path).await?.content;
        let chunk_size = self.read_chunk_size.load(Ordering::Relaxed);
        let chunks: Vec<Result<Bytes, Error>> = content
            .chunks(chunk_size)
            .map(|chunk| Ok(content.slice_ref(chunk)))
            .collect();
        Ok(Box::pin(stream::iter(chunks)))
    }

    async fn write_object(
        &self,
        path: &ObjectPath,
        content_type: &str,
        data: UploadStream,
    ) -> Result<ObjectAttrs, Error> {
        self.begin(
            &self.call_counts.write_calls,
            MockRequest::Write {
                object_path: path.clone(),
                content_type: content_type.to_string(),
            },
        )
        .await?;
        // Nothing is stored unless the writer finished cleanly.
        let content = data.collect_bytes().await?;
        Ok(self.store(path, content_type, content).await)
    }

    async fn delete_object(&self, path: &ObjectPath) -> Result<(), Error> {
        self.begin(
            &self.call_counts.delete_calls,
            MockRequest::Delete {
                object_path: path.clone(),
            },
        )
        .await?;
        self.objects
            .write()
            .await
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| make_err!(Code::NotFound, "Object {path} not found"))
    }

    async fn compose_object(
        &self,
        destination: &ObjectPath,
        sources: &[ObjectPath],
    ) -> Result<ObjectAttrs, Error> {
        self.begin(
            &self.call_counts.compose_calls,
            MockRequest::Compose {
                destination: destination.clone(),
                sources: sources.to_vec(),
            },
        )
        .await?;
        let mut content = Vec::new();
        let mut content_type = None;
        for source in sources {
            let object = self.require_object(source).await?;
            content_type.get_or_insert(object.attrs.content_type);
            content.extend_from_slice(&object.content);
        }
        let content_type =
            content_type.unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());
        Ok(self
            .store(destination, &content_type, content.into())
            .await)
    }

    async fn copy_object(
        &self,
        source: &ObjectPath,
        destination: &ObjectPath,
    ) -> Result<ObjectAttrs, Error> {
        self.begin(
            &self.call_counts.copy_calls,
            MockRequest::Copy {
                source: source.clone(),
                destination: destination.clone(),
            },
        )
        .await?;
        let object = self.require_object(source).await?;
        Ok(self
            .store(destination, &object.attrs.content_type, object.content)
            .await)
    }

    async fn close(&self) -> Result<(), Error> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}
