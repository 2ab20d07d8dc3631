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
use std::sync::Arc;

use async_trait::async_trait;
use imgimport_error::{Error, ResultExt, error_if, make_input_err};

use crate::operations::StorageOperations;
use crate::streams::{ObjectReader, ObjectWriter};
use crate::types::{DEFAULT_CONTENT_TYPE, MAX_COMPOSE_COMPONENTS, ObjectAttrs, ObjectPath};

const DEFAULT_WRITE_QUEUE_DEPTH: usize = 16;

/// One addressable object.
#[async_trait]
pub trait StorageObject: Send + Sync + Debug {
    async fn delete(&self) -> Result<(), Error>;

    /// Bucket and name of the object, for calls made directly against
    /// `StorageOperations`.
    fn object_path(&self) -> &ObjectPath;

    async fn new_reader(&self) -> Result<ObjectReader, Error>;

    /// Nothing is committed until `ObjectWriter::close` succeeds.
    fn new_writer(&self) -> ObjectWriter;

    /// `gs://bucket/path`
    fn object_name(&self) -> String;

    /// Replace this object with the concatenation of `sources`.
    async fn compose(&self, sources: &[&dyn StorageObject]) -> Result<ObjectAttrs, Error>;

    /// Replace this object with the content of `source`.
    async fn copy_from(&self, source: &dyn StorageObject) -> Result<ObjectAttrs, Error>;
}

#[derive(Debug, Clone)]
pub struct ObjectHandle {
    ops: Arc<dyn StorageOperations>,
    path: ObjectPath,
    write_queue_depth: usize,
    content_type: String,
}

impl ObjectHandle {
    pub fn new(ops: Arc<dyn StorageOperations>, path: ObjectPath) -> Self {
        Self {
            ops,
            path,
            write_queue_depth: DEFAULT_WRITE_QUEUE_DEPTH,
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
        }
    }

    #[must_use]
    pub const fn with_write_queue_depth(mut self, depth: usize) -> Self {
        self.write_queue_depth = depth;
        self
    }

    #[must_use]
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    pub async fn attrs(&self) -> Result<ObjectAttrs, Error> {
        self.ops.get_object_attrs(&self.path).await
    }
}

#[async_trait]
impl StorageObject for ObjectHandle {
    async fn delete(&self) -> Result<(), Error> {
        self.ops.delete_object(&self.path).await
    }

    fn object_path(&self) -> &ObjectPath {
        &self.path
    }

    async fn new_reader(&self) -> Result<ObjectReader, Error> {
        let stream = self
            .ops
            .read_object(&self.path)
            .await
            .err_tip(|| format!("While opening reader for {}", self.path))?;
        Ok(ObjectReader::new(self.path.clone(), stream))
    }

    fn new_writer(&self) -> ObjectWriter {
        ObjectWriter::spawn(
            self.ops.clone(),
            self.path.clone(),
            self.content_type.clone(),
            self.write_queue_depth,
        )
    }

    fn object_name(&self) -> String {
        self.path.gcs_url()
    }

    async fn compose(&self, sources: &[&dyn StorageObject]) -> Result<ObjectAttrs, Error> {
        error_if!(
            sources.is_empty() || sources.len() > MAX_COMPOSE_COMPONENTS,
            "Compose needs between 1 and {MAX_COMPOSE_COMPONENTS} sources, got {}",
            sources.len()
        );
        let source_paths: Vec<ObjectPath> = sources
            .iter()
            .map(|source| source.object_path().clone())
            .collect();
        if let Some(foreign) = source_paths
            .iter()
            .find(|source| source.bucket != self.path.bucket)
        {
            return Err(make_input_err!(
                "Compose source {foreign} is not in the bucket of {}",
                self.path
            ));
        }
        self.ops
            .compose_object(&self.path, &source_paths)
            .await
            .err_tip(|| format!("While composing {} sources into {}", sources.len(), self.path))
    }

    async fn copy_from(&self, source: &dyn StorageObject) -> Result<ObjectAttrs, Error> {
        self.ops
            .copy_object(source.object_path(), &self.path)
            .await
    }
}
