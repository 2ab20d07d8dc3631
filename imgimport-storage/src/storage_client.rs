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

use std::sync::Arc;

use bytes::Bytes;
use imgimport_config::gateway::StorageSpec;
use imgimport_error::{Code, Error, ResultExt, error_if, make_err};
use tokio::io::AsyncRead;
use tracing::{Level, event};

use crate::iterator::{ObjectIterator, PagedBucketIterator, PagedObjectIterator};
use crate::object::{ObjectHandle, StorageObject};
use crate::operations::StorageOperations;
use crate::types::{BucketAttrs, BucketAttrsToUpdate, ObjectAttrs, ObjectPath};

const DEFAULT_WRITE_QUEUE_DEPTH: usize = 16;
const DEFAULT_COPY_CHUNK_SIZE: usize = 256 * 1024;

/// One bucket, bound to the client it was obtained from.
#[derive(Debug, Clone)]
pub struct BucketHandle {
    client: StorageClient,
    name: String,
}

impl BucketHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn attrs(&self) -> Result<BucketAttrs, Error> {
        self.client.get_bucket_attrs(&self.name).await
    }

    pub async fn update(&self, update: &BucketAttrsToUpdate) -> Result<BucketAttrs, Error> {
        self.client.update_bucket(&self.name, update).await
    }

    pub fn object(&self, object_path: &str) -> ObjectHandle {
        self.client.get_object(&self.name, object_path)
    }

    /// Objects whose name starts with `prefix`.
    pub fn objects(&self, prefix: &str) -> PagedObjectIterator {
        self.client.get_objects(&self.name, prefix)
    }
}

/// Bucket and object level entry point on top of `StorageOperations`.
#[derive(Debug, Clone)]
pub struct StorageClient {
    ops: Arc<dyn StorageOperations>,
    write_queue_depth: usize,
    copy_chunk_size: usize,
}

impl StorageClient {
    pub fn new(ops: Arc<dyn StorageOperations>, spec: &StorageSpec) -> Self {
        Self {
            ops,
            write_queue_depth: if spec.write_queue_depth == 0 {
                DEFAULT_WRITE_QUEUE_DEPTH
            } else {
                spec.write_queue_depth
            },
            copy_chunk_size: if spec.copy_chunk_size == 0 {
                DEFAULT_COPY_CHUNK_SIZE
            } else {
                spec.copy_chunk_size
            },
        }
    }

    pub const fn operations(&self) -> &Arc<dyn StorageOperations> {
        &self.ops
    }

    pub const fn copy_chunk_size(&self) -> usize {
        self.copy_chunk_size
    }

    pub async fn create_bucket(
        &self,
        project: &str,
        attrs: &BucketAttrs,
    ) -> Result<BucketAttrs, Error> {
        self.ops.create_bucket(project, attrs).await
    }

    pub async fn update_bucket(
        &self,
        bucket: &str,
        update: &BucketAttrsToUpdate,
    ) -> Result<BucketAttrs, Error> {
        self.ops.update_bucket(bucket, update).await
    }

    /// Buckets owned by `project`. Pages are fetched as the iterator is
    /// advanced.
    pub fn buckets(&self, project: &str) -> PagedBucketIterator {
        PagedBucketIterator::new(self.ops.clone(), project.to_string())
    }

    pub async fn get_bucket_attrs(&self, bucket: &str) -> Result<BucketAttrs, Error> {
        self.ops.get_bucket_attrs(bucket).await
    }

    /// Handle on `bucket`. No request is made until one of its methods is
    /// called.
    pub fn get_bucket(&self, bucket: &str) -> BucketHandle {
        BucketHandle {
            client: self.clone(),
            name: bucket.to_string(),
        }
    }

    pub fn get_object(&self, bucket: &str, object_path: &str) -> ObjectHandle {
        ObjectHandle::new(self.ops.clone(), ObjectPath::new(bucket, object_path))
            .with_write_queue_depth(self.write_queue_depth)
    }

    /// Objects whose name starts with `object_path`.
    pub fn get_objects(&self, bucket: &str, object_path: &str) -> PagedObjectIterator {
        PagedObjectIterator::new(
            self.ops.clone(),
            bucket.to_string(),
            object_path.to_string(),
        )
    }

    pub async fn get_object_attrs(
        &self,
        bucket: &str,
        object_path: &str,
    ) -> Result<ObjectAttrs, Error> {
        self.ops
            .get_object_attrs(&ObjectPath::new(bucket, object_path))
            .await
    }

    /// First object below `gcs_directory_path` whose name ends with
    /// `file_extension`, at any depth.
    pub async fn find_gcs_file(
        &self,
        gcs_directory_path: &str,
        file_extension: &str,
    ) -> Result<ObjectHandle, Error> {
        self.find_file(gcs_directory_path, file_extension, None)
            .await
    }

    /// Like `find_gcs_file` but only looks `lookup_depth` directories deep.
    /// Depth 0 is the directory itself.
    pub async fn find_gcs_file_depth_limited(
        &self,
        gcs_directory_path: &str,
        file_extension: &str,
        lookup_depth: usize,
    ) -> Result<ObjectHandle, Error> {
        self.find_file(gcs_directory_path, file_extension, Some(lookup_depth))
            .await
    }

    async fn find_file(
        &self,
        gcs_directory_path: &str,
        file_extension: &str,
        lookup_depth: Option<usize>,
    ) -> Result<ObjectHandle, Error> {
        let directory = ObjectPath::parse(gcs_directory_path)?;
        let prefix = directory.directory_prefix();
        let mut objects = self.get_objects(&directory.bucket, &prefix);
        while let Some(object) = objects
            .next()
            .await
            .err_tip(|| format!("While searching {gcs_directory_path}"))?
        {
            let Some(relative) = object.name.strip_prefix(&prefix) else {
                continue;
            };
            if relative.is_empty() || relative.ends_with('/') {
                continue;
            }
            let depth = relative.matches('/').count();
            if lookup_depth.is_some_and(|limit| depth > limit) {
                continue;
            }
            if relative.ends_with(file_extension) {
                return Ok(self.get_object(&object.bucket, &object.name));
            }
        }
        Err(make_err!(
            Code::NotFound,
            "No {file_extension} file found in {gcs_directory_path}"
        ))
    }

    /// Whole content of `object`.
    pub async fn get_gcs_file_content(&self, object: &dyn StorageObject) -> Result<Bytes, Error> {
        object.new_reader().await?.read_all().await
    }

    /// Upload everything `reader` yields to the destination object.
    pub async fn write_to_gcs<R>(
        &self,
        destination_bucket_name: &str,
        destination_object_path: &str,
        reader: &mut R,
    ) -> Result<ObjectAttrs, Error>
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        let object = self.get_object(destination_bucket_name, destination_object_path);
        let mut writer = object.new_writer();
        writer
            .copy_from_reader(reader, self.copy_chunk_size)
            .await?;
        writer.close().await
    }

    /// Delete the object named by `gcs_path` and every object under it
    /// as a directory. `gs://b/tmp` leaves `gs://b/tmp-keep` alone.
    pub async fn delete_gcs_path(&self, gcs_path: &str) -> Result<(), Error> {
        let path = ObjectPath::parse(gcs_path)?;
        let directory = path.directory_prefix();
        // List first so deletions don't shift the pages being read.
        let objects: Vec<_> = self
            .get_objects(&path.bucket, &path.path)
            .collect_all()
            .await
            .err_tip(|| format!("While listing {gcs_path} for deletion"))?
            .into_iter()
            .filter(|object| object.name == path.path || object.name.starts_with(&directory))
            .collect();
        for object in &objects {
            self.ops
                .delete_object(&object.object_path())
                .await
                .err_tip(|| format!("While deleting {gcs_path}"))?;
        }
        event!(Level::INFO, gcs_path, count = objects.len(), "Deleted objects");
        Ok(())
    }

    /// Delete the single object named by `gcs_path`.
    pub async fn delete_object(&self, gcs_path: &str) -> Result<(), Error> {
        let path = ObjectPath::parse(gcs_path)?;
        error_if!(path.path.is_empty(), "{gcs_path} does not name an object");
        self.ops.delete_object(&path).await
    }

    pub async fn close(&self) -> Result<(), Error> {
        self.ops.close().await
    }
}
