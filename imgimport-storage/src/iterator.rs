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

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use imgimport_error::Error;

use crate::operations::StorageOperations;
use crate::types::{BucketAttrs, ObjectAttrs, Page};

/// Buckets of a project, one at a time.
#[async_trait]
pub trait BucketIterator: Send {
    /// The next bucket, or `None` once the listing is exhausted.
    async fn next(&mut self) -> Result<Option<BucketAttrs>, Error>;
}

/// Objects under a prefix, one at a time.
#[async_trait]
pub trait ObjectIterator: Send {
    /// The next object, or `None` once the listing is exhausted.
    async fn next(&mut self) -> Result<Option<ObjectAttrs>, Error>;

    /// Drain the remaining objects.
    async fn collect_all(&mut self) -> Result<Vec<ObjectAttrs>, Error> {
        let mut objects = Vec::new();
        while let Some(object) = self.next().await? {
            objects.push(object);
        }
        Ok(objects)
    }
}

/// Buffer and page token bookkeeping shared by the listing iterators.
/// A failed page fetch is sticky: the same error is returned from then on.
#[derive(Debug)]
struct PageCursor<T> {
    buffer: VecDeque<T>,
    next_page_token: Option<String>,
    started: bool,
    error: Option<Error>,
}

impl<T> PageCursor<T> {
    const fn new() -> Self {
        Self {
            buffer: VecDeque::new(),
            next_page_token: None,
            started: false,
            error: None,
        }
    }

    /// Page token to fetch next, `None` when nothing is left to fetch.
    fn pending_fetch(&self) -> Option<Option<String>> {
        if !self.buffer.is_empty() {
            return None;
        }
        if !self.started {
            return Some(None);
        }
        self.next_page_token.clone().map(Some)
    }

    fn accept(&mut self, result: Result<Page<T>, Error>) -> Result<(), Error> {
        self.started = true;
        match result {
            Ok(page) => {
                self.buffer.extend(page.items);
                self.next_page_token = page.next_page_token.filter(|token| !token.is_empty());
                Ok(())
            }
            Err(err) => {
                self.error = Some(err.clone());
                Err(err)
            }
        }
    }
}

#[derive(Debug)]
pub struct PagedBucketIterator {
    ops: Arc<dyn StorageOperations>,
    project: String,
    cursor: PageCursor<BucketAttrs>,
}

impl PagedBucketIterator {
    pub const fn new(ops: Arc<dyn StorageOperations>, project: String) -> Self {
        Self {
            ops,
            project,
            cursor: PageCursor::new(),
        }
    }
}

#[async_trait]
impl BucketIterator for PagedBucketIterator {
    async fn next(&mut self) -> Result<Option<BucketAttrs>, Error> {
        if let Some(err) = &self.cursor.error {
            return Err(err.clone());
        }
        // Pages may come back empty with a token for more.
        while let Some(page_token) = self.cursor.pending_fetch() {
            let page = self.ops.list_buckets(&self.project, page_token).await;
            self.cursor.accept(page)?;
        }
        Ok(self.cursor.buffer.pop_front())
    }
}

#[derive(Debug)]
pub struct PagedObjectIterator {
    ops: Arc<dyn StorageOperations>,
    bucket: String,
    prefix: String,
    cursor: PageCursor<ObjectAttrs>,
}

impl PagedObjectIterator {
    pub const fn new(ops: Arc<dyn StorageOperations>, bucket: String, prefix: String) -> Self {
        Self {
            ops,
            bucket,
            prefix,
            cursor: PageCursor::new(),
        }
    }
}

#[async_trait]
impl ObjectIterator for PagedObjectIterator {
    async fn next(&mut self) -> Result<Option<ObjectAttrs>, Error> {
        if let Some(err) = &self.cursor.error {
            return Err(err.clone());
        }
        while let Some(page_token) = self.cursor.pending_fetch() {
            let page = self
                .ops
                .list_objects(&self.bucket, &self.prefix, page_token)
                .await;
            self.cursor.accept(page)?;
        }
        Ok(self.cursor.buffer.pop_front())
    }
}
