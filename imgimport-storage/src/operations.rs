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

use core::fmt::Debug;

use async_trait::async_trait;
use imgimport_error::Error;

use crate::streams::{ByteStream, UploadStream};
use crate::types::{BucketAttrs, BucketAttrsToUpdate, ObjectAttrs, ObjectPath, Page};

/// The Cloud Storage primitives the rest of the crate is built on.
/// This abstraction allows for easier testing by mocking storage responses.
#[async_trait]
pub trait StorageOperations: Send + Sync + Debug {
    /// Create a bucket owned by `project`
    async fn create_bucket(&self, project: &str, attrs: &BucketAttrs)
    -> Result<BucketAttrs, Error>;

    /// Patch the attributes of an existing bucket
    async fn update_bucket(
        &self,
        bucket: &str,
        update: &BucketAttrsToUpdate,
    ) -> Result<BucketAttrs, Error>;

    /// Read bucket attributes, `NotFound` if the bucket does not exist
    async fn get_bucket_attrs(&self, bucket: &str) -> Result<BucketAttrs, Error>;

    /// List one page of the buckets owned by `project`
    async fn list_buckets(
        &self,
        project: &str,
        page_token: Option<String>,
    ) -> Result<Page<BucketAttrs>, Error>;

    /// Read object attributes, `NotFound` if the object does not exist
    async fn get_object_attrs(&self, path: &ObjectPath) -> Result<ObjectAttrs, Error>;

    /// List one page of the objects whose name starts with `prefix`
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        page_token: Option<String>,
    ) -> Result<Page<ObjectAttrs>, Error>;

    /// Stream the content of an object
    async fn read_object(&self, path: &ObjectPath) -> Result<ByteStream, Error>;

    /// Upload `data` as the new content of `path`. Nothing is committed
    /// unless the stream ends with its finish marker.
    async fn write_object(
        &self,
        path: &ObjectPath,
        content_type: &str,
        data: UploadStream,
    ) -> Result<ObjectAttrs, Error>;

    /// Delete an object
    async fn delete_object(&self, path: &ObjectPath) -> Result<(), Error>;

    /// Concatenate `sources`, in order, into `destination`
    async fn compose_object(
        &self,
        destination: &ObjectPath,
        sources: &[ObjectPath],
    ) -> Result<ObjectAttrs, Error>;

    /// Replace the content of `destination` with the content of `source`
    async fn copy_object(
        &self,
        source: &ObjectPath,
        destination: &ObjectPath,
    ) -> Result<ObjectAttrs, Error>;

    /// Release the connection. Every later call fails with
    /// `FailedPrecondition`.
    async fn close(&self) -> Result<(), Error>;
}
