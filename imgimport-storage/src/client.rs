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

use core::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{StreamExt, TryStreamExt};
use google_cloud_storage::client::{Client, ClientConfig};
use google_cloud_storage::http::buckets::get::GetBucketRequest;
use google_cloud_storage::http::buckets::insert::{
    BucketCreationConfig, InsertBucketParam, InsertBucketRequest,
};
use google_cloud_storage::http::buckets::list::ListBucketsRequest;
use google_cloud_storage::http::buckets::patch::{BucketPatchConfig, PatchBucketRequest};
use google_cloud_storage::http::buckets::iam_configuration::UniformBucketLevelAccess;
use google_cloud_storage::http::buckets::{Bucket, IamConfiguration};
use google_cloud_storage::http::objects::compose::{ComposeObjectRequest, ComposingTargets};
use google_cloud_storage::http::objects::{Object, SourceObjects};
use google_cloud_storage::http::objects::delete::DeleteObjectRequest;
use google_cloud_storage::http::objects::download::Range;
use google_cloud_storage::http::objects::get::GetObjectRequest;
use google_cloud_storage::http::objects::list::ListObjectsRequest;
use google_cloud_storage::http::objects::rewrite::RewriteObjectRequest;
use google_cloud_storage::http::objects::upload::{Media, UploadObjectRequest, UploadType};
use google_cloud_storage::http::resumable_upload_client::{
    ChunkSize, ResumableUploadClient, UploadStatus,
};
use imgimport_config::gateway::StorageSpec;
use imgimport_error::{Code, Error, ResultExt, make_err};
use tracing::{Level, event};

use crate::operations::StorageOperations;
use crate::streams::{ByteStream, UploadStream};
use crate::types::{
    BucketAttrs, BucketAttrsToUpdate, DEFAULT_CONTENT_TYPE, DEFAULT_RESUMABLE_CHUNK_SIZE,
    ObjectAttrs, ObjectPath, Page, RESUMABLE_CHUNK_ALIGNMENT,
};

/// Environment variable overriding the storage endpoint.
pub const ENV_STORAGE_ENDPOINT: &str = "GOOGLE_STORAGE_ENDPOINT";

fn iam_configuration(uniform_bucket_level_access: bool) -> IamConfiguration {
    IamConfiguration {
        uniform_bucket_level_access: Some(UniformBucketLevelAccess {
            enabled: uniform_bucket_level_access,
            locked_time: None,
        }),
        public_access_prevention: None,
    }
}

fn bucket_attrs(bucket: Bucket) -> BucketAttrs {
    let uniform_bucket_level_access = bucket
        .iam_configuration
        .as_ref()
        .and_then(|iam| iam.uniform_bucket_level_access.as_ref())
        .is_some_and(|uniform| uniform.enabled);
    BucketAttrs {
        name: bucket.name,
        location: bucket.location.to_uppercase(),
        uniform_bucket_level_access,
        labels: bucket.labels.unwrap_or_default(),
    }
}

fn object_attrs(object: Object) -> ObjectAttrs {
    ObjectAttrs {
        bucket: object.bucket,
        name: object.name,
        size: u64::try_from(object.size).unwrap_or_default(),
        content_type: object
            .content_type
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
        generation: object.generation,
        updated: object.updated.map(|updated| updated.to_string()),
    }
}

fn upload_target(
    path: &ObjectPath,
    content_type: &str,
    length: Option<u64>,
) -> (UploadObjectRequest, UploadType) {
    let request = UploadObjectRequest {
        bucket: path.bucket.clone(),
        ..Default::default()
    };
    let mut media = Media::new(path.path.clone());
    media.content_type = content_type.to_string().into();
    media.content_length = length;
    (request, UploadType::Simple(media))
}

/// Send everything in `buffer` and the rest of `data` through `session`.
/// `buffer` must not be empty; one chunk is always held back so the final
/// request carries data.
async fn upload_chunks(
    session: &ResumableUploadClient,
    chunk_size: usize,
    mut buffer: BytesMut,
    data: &mut UploadStream,
) -> Result<ObjectAttrs, Error> {
    let mut offset = 0u64;
    loop {
        while buffer.len() > chunk_size {
            let chunk = buffer.split_to(chunk_size).freeze();
            let last = offset + chunk.len() as u64 - 1;
            session
                .upload_multiple_chunk(chunk, &ChunkSize::new(offset, last, None))
                .await
                .err_tip(|| format!("While uploading bytes {offset}-{last}"))?;
            offset = last + 1;
        }
        match data.next().await {
            Some(chunk) => buffer.extend_from_slice(&chunk?),
            None => break,
        }
    }
    let total = offset + buffer.len() as u64;
    let status = session
        .upload_multiple_chunk(
            buffer.freeze(),
            &ChunkSize::new(offset, total - 1, Some(total)),
        )
        .await
        .err_tip(|| format!("While uploading final bytes {offset}-{}", total - 1))?;
    match status {
        UploadStatus::Ok(object) => Ok(object_attrs(object)),
        _ => Err(make_err!(
            Code::Internal,
            "Upload of {total} bytes was not committed by its final chunk"
        )),
    }
}

/// `StorageOperations` over the Cloud Storage JSON API.
pub struct GcsClient {
    client: Client,
    closed: AtomicBool,
    resumable_chunk_size: usize,
}

impl core::fmt::Debug for GcsClient {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("GcsClient")
            .field("closed", &self.closed)
            .field("resumable_chunk_size", &self.resumable_chunk_size)
            .finish_non_exhaustive()
    }
}

impl GcsClient {
    /// Build a client from the configuration, authenticating with the
    /// application default credentials unless `anonymous` is set.
    pub async fn new(spec: &StorageSpec) -> Result<Self, Error> {
        let mut config = if spec.anonymous {
            ClientConfig::default().anonymous()
        } else {
            ClientConfig::default().with_auth().await.map_err(|e| {
                make_err!(
                    Code::Unauthenticated,
                    "Failed to load storage credentials: {e}"
                )
            })?
        };
        if let Some(endpoint) = spec
            .endpoint
            .clone()
            .or_else(|| std::env::var(ENV_STORAGE_ENDPOINT).ok())
        {
            config.storage_endpoint = endpoint;
        }
        let client = Self::from_client(Client::new(config));
        Ok(if spec.resumable_chunk_size == 0 {
            client
        } else {
            client.with_resumable_chunk_size(spec.resumable_chunk_size)
        })
    }

    pub const fn from_client(client: Client) -> Self {
        Self {
            client,
            closed: AtomicBool::new(false),
            resumable_chunk_size: DEFAULT_RESUMABLE_CHUNK_SIZE,
        }
    }

    /// Rounded up to a multiple of `RESUMABLE_CHUNK_ALIGNMENT`.
    #[must_use]
    pub const fn with_resumable_chunk_size(mut self, chunk_size: usize) -> Self {
        let mut chunks = chunk_size.div_ceil(RESUMABLE_CHUNK_ALIGNMENT);
        if chunks == 0 {
            chunks = 1;
        }
        self.resumable_chunk_size = chunks * RESUMABLE_CHUNK_ALIGNMENT;
        self
    }

    async fn simple_upload(
        &self,
        path: &ObjectPath,
        content_type: &str,
        content: Bytes,
    ) -> Result<ObjectAttrs, Error> {
        let (request, upload_type) = upload_target(path, content_type, Some(content.len() as u64));
        let object = self
            .client
            .upload_object(&request, content, &upload_type)
            .await
            .err_tip(|| format!("While uploading {path}"))?;
        Ok(object_attrs(object))
    }

    /// The session is cancelled if `data` ends in an error, so an aborted
    /// writer leaves no object behind.
    async fn resumable_upload(
        &self,
        path: &ObjectPath,
        content_type: &str,
        buffer: BytesMut,
        mut data: UploadStream,
    ) -> Result<ObjectAttrs, Error> {
        let (request, upload_type) = upload_target(path, content_type, None);
        let session = self
            .client
            .prepare_resumable_upload(&request, &upload_type)
            .await
            .err_tip(|| format!("While starting resumable upload of {path}"))?;
        event!(Level::DEBUG, %path, chunk_size = self.resumable_chunk_size, "Started resumable upload");
        match upload_chunks(&session, self.resumable_chunk_size, buffer, &mut data).await {
            Ok(attrs) => Ok(attrs),
            Err(err) => {
                if let Err(cancel_err) = session.cancel().await {
                    event!(Level::WARN, %path, ?cancel_err, "Failed to cancel resumable upload");
                }
                Err(err.append(format!("While uploading {path}")))
            }
        }
    }

    fn ensure_open(&self) -> Result<(), Error> {
        if self.closed.load(Ordering::Acquire) {
            return Err(make_err!(
                Code::FailedPrecondition,
                "Storage client is closed"
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl StorageOperations for GcsClient {
    async fn create_bucket(
        &self,
        project: &str,
        attrs: &BucketAttrs,
    ) -> Result<BucketAttrs, Error> {
        self.ensure_open()?;
        let request = InsertBucketRequest {
            name: attrs.name.clone(),
            param: InsertBucketParam {
                project: project.to_string(),
                ..Default::default()
            },
            bucket: BucketCreationConfig {
                location: attrs.location.clone(),
                iam_configuration: Some(iam_configuration(attrs.uniform_bucket_level_access)),
                labels: (!attrs.labels.is_empty()).then(|| attrs.labels.clone()),
                ..Default::default()
            },
        };
        let bucket = self
            .client
            .insert_bucket(&request)
            .await
            .err_tip(|| format!("While creating bucket {}", attrs.name))?;
        event!(Level::INFO, bucket = %bucket.name, project, "Created bucket");
        Ok(bucket_attrs(bucket))
    }

    async fn update_bucket(
        &self,
        bucket: &str,
        update: &BucketAttrsToUpdate,
    ) -> Result<BucketAttrs, Error> {
        self.ensure_open()?;
        let request = PatchBucketRequest {
            bucket: bucket.to_string(),
            metadata: Some(BucketPatchConfig {
                iam_configuration: update.uniform_bucket_level_access.map(iam_configuration),
                labels: update.labels.clone(),
                ..Default::default()
            }),
            ..Default::default()
        };
        let bucket = self
            .client
            .patch_bucket(&request)
            .await
            .err_tip(|| format!("While updating bucket {bucket}"))?;
        Ok(bucket_attrs(bucket))
    }

    async fn get_bucket_attrs(&self, bucket: &str) -> Result<BucketAttrs, Error> {
        self.ensure_open()?;
        let request = GetBucketRequest {
            bucket: bucket.to_string(),
            ..Default::default()
        };
        self.client
            .get_bucket(&request)
            .await
            .map(bucket_attrs)
            .err_tip(|| format!("While reading attributes of bucket {bucket}"))
    }

    async fn list_buckets(
        &self,
        project: &str,
        page_token: Option<String>,
    ) -> Result<Page<BucketAttrs>, Error> {
        self.ensure_open()?;
        let request = ListBucketsRequest {
            project: project.to_string(),
            page_token,
            ..Default::default()
        };
        let response = self
            .client
            .list_buckets(&request)
            .await
            .err_tip(|| format!("While listing buckets of {project}"))?;
        Ok(Page {
            items: response.items.into_iter().map(bucket_attrs).collect(),
            next_page_token: response.next_page_token,
        })
    }

    async fn get_object_attrs(&self, path: &ObjectPath) -> Result<ObjectAttrs, Error> {
        self.ensure_open()?;
        let request = GetObjectRequest {
            bucket: path.bucket.clone(),
            object: path.path.clone(),
            ..Default::default()
        };
        self.client
            .get_object(&request)
            .await
            .map(object_attrs)
            .err_tip(|| format!("While reading attributes of {path}"))
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        page_token: Option<String>,
    ) -> Result<Page<ObjectAttrs>, Error> {
        self.ensure_open()?;
        let request = ListObjectsRequest {
            bucket: bucket.to_string(),
            prefix: (!prefix.is_empty()).then(|| prefix.to_string()),
            page_token,
            ..Default::default()
        };
        let response = self
            .client
            .list_objects(&request)
            .await
            .err_tip(|| format!("While listing gs://{bucket}/{prefix}"))?;
        Ok(Page {
            items: response
                .items
                .unwrap_or_default()
                .into_iter()
                .map(object_attrs)
                .collect(),
            next_page_token: response.next_page_token,
        })
    }

    async fn read_object(&self, path: &ObjectPath) -> Result<ByteStream, Error> {
        self.ensure_open()?;
        let request = GetObjectRequest {
            bucket: path.bucket.clone(),
            object: path.path.clone(),
            ..Default::default()
        };
        let stream = self
            .client
            .download_streamed_object(&request, &Range::default())
            .await
            .err_tip(|| format!("While opening {path} for reading"))?;
        Ok(Box::pin(stream.map_err(Error::from)))
    }

    async fn write_object(
        &self,
        path: &ObjectPath,
        content_type: &str,
        mut data: UploadStream,
    ) -> Result<ObjectAttrs, Error> {
        self.ensure_open()?;
        let mut buffer = BytesMut::new();
        // Nothing is sent until the whole object fits in one request or it
        // outgrows a chunk.
        while buffer.len() <= self.resumable_chunk_size {
            match data.next().await {
                Some(chunk) => {
                    buffer.extend_from_slice(&chunk.err_tip(|| format!("While uploading {path}"))?);
                }
                None => return self.simple_upload(path, content_type, buffer.freeze()).await,
            }
        }
        self.resumable_upload(path, content_type, buffer, data).await
    }

    async fn delete_object(&self, path: &ObjectPath) -> Result<(), Error> {
        self.ensure_open()?;
        let request = DeleteObjectRequest {
            bucket: path.bucket.clone(),
            object: path.path.clone(),
            ..Default::default()
        };
        self.client
            .delete_object(&request)
            .await
            .err_tip(|| format!("While deleting {path}"))
    }

    async fn compose_object(
        &self,
        destination: &ObjectPath,
        sources: &[ObjectPath],
    ) -> Result<ObjectAttrs, Error> {
        self.ensure_open()?;
        let request = ComposeObjectRequest {
            bucket: destination.bucket.clone(),
            destination_object: destination.path.clone(),
            composing_targets: ComposingTargets {
                source_objects: sources
                    .iter()
                    .map(|source| SourceObjects {
                        name: source.path.clone(),
                        ..Default::default()
                    })
                    .collect(),
                ..Default::default()
            },
            ..Default::default()
        };
        self.client
            .compose_object(&request)
            .await
            .map(object_attrs)
            .err_tip(|| format!("While composing {destination}"))
    }

    async fn copy_object(
        &self,
        source: &ObjectPath,
        destination: &ObjectPath,
    ) -> Result<ObjectAttrs, Error> {
        self.ensure_open()?;
        let mut request = RewriteObjectRequest {
            source_bucket: source.bucket.clone(),
            source_object: source.path.clone(),
            destination_bucket: destination.bucket.clone(),
            destination_object: destination.path.clone(),
            ..Default::default()
        };
        // Large or cross-location copies take several calls, each resuming
        // from the token of the previous one.
        loop {
            let response = self
                .client
                .rewrite_object(&request)
                .await
                .err_tip(|| format!("While copying {source} to {destination}"))?;
            if response.done {
                return response.resource.map(object_attrs).err_tip_with_code(|_| {
                    (
                        Code::Internal,
                        format!("Copy of {source} to {destination} finished without an object"),
                    )
                });
            }
            event!(
                Level::DEBUG,
                %source,
                %destination,
                rewritten = response.total_bytes_rewritten,
                size = response.object_size,
                "Copy in progress"
            );
            request.rewrite_token = response.rewrite_token;
        }
    }

    async fn close(&self) -> Result<(), Error> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
