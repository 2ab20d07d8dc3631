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
use imgimport_compute::types::zone_to_region;
use imgimport_compute::zone_validator::ZoneValidator;
use imgimport_config::gateway::ScratchBucketSpec;
use imgimport_error::{Code, Error, ResultExt, make_err, make_input_err};
use tracing::{Level, event};

use crate::iterator::BucketIterator;
use crate::storage_client::StorageClient;
use crate::types::{BucketAttrs, ObjectPath, validate_bucket_name};

pub const DEFAULT_NAME_SUFFIX: &str = "daisy-bkt";

/// Bucket picked for temporary artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScratchBucket {
    pub name: String,
    /// Storage location of the bucket, e.g. `US` or `US-CENTRAL1`.
    pub location: String,
}

#[async_trait]
pub trait ScratchBucketCreator: Send + Sync + Debug {
    /// Reuse the bucket of `source_file` when it belongs to `project`,
    /// otherwise find or create the project's scratch bucket in the
    /// location of `source_file`, or in the region of `fallback_zone`.
    async fn create_scratch_bucket(
        &self,
        source_file: &str,
        project: &str,
        fallback_zone: &str,
        enable_uniform_bucket_level_access: bool,
    ) -> Result<ScratchBucket, Error>;

    /// True iff `bucket_name` exists and is owned by `project`.
    async fn is_bucket_in_project(&self, project: &str, bucket_name: &str) -> Result<bool, Error>;
}

/// Bucket names may not contain "google".
pub fn scratch_bucket_name(project: &str, suffix: &str, location: &str) -> String {
    format!("{project}-{suffix}-{location}")
        .replace(':', "-")
        .to_lowercase()
        .replace("google", "elgoog")
}

#[derive(Debug)]
pub struct StorageScratchBucketCreator {
    storage: StorageClient,
    zone_validator: Arc<dyn ZoneValidator>,
    name_suffix: String,
}

impl StorageScratchBucketCreator {
    pub fn new(
        storage: StorageClient,
        zone_validator: Arc<dyn ZoneValidator>,
        spec: &ScratchBucketSpec,
    ) -> Self {
        let name_suffix = if spec.name_suffix.is_empty() {
            DEFAULT_NAME_SUFFIX.to_string()
        } else {
            spec.name_suffix.clone()
        };
        Self {
            storage,
            zone_validator,
            name_suffix,
        }
    }

    /// `fallback_zone` has already been validated.
    fn location_from_zone(project: &str, fallback_zone: &str) -> Result<String, Error> {
        if fallback_zone.is_empty() {
            return Err(make_input_err!(
                "Can't determine a location for the scratch bucket of {project}: no source bucket and no zone"
            ));
        }
        Ok(zone_to_region(fallback_zone)?.to_uppercase())
    }
}

#[async_trait]
impl ScratchBucketCreator for StorageScratchBucketCreator {
    async fn create_scratch_bucket(
        &self,
        source_file: &str,
        project: &str,
        fallback_zone: &str,
        enable_uniform_bucket_level_access: bool,
    ) -> Result<ScratchBucket, Error> {
        if !fallback_zone.is_empty() {
            self.zone_validator
                .zone_valid(project, fallback_zone)
                .await
                .err_tip(|| format!("While checking zone for the scratch bucket of {project}"))?;
        }
        let hint_bucket = if source_file.is_empty() {
            None
        } else {
            match ObjectPath::parse(source_file) {
                Ok(path) => Some(path.bucket),
                Err(err) => {
                    event!(Level::DEBUG, source_file, ?err, "Source is not a bucket path");
                    None
                }
            }
        };

        let mut location = None;
        if let Some(bucket) = &hint_bucket {
            if self.is_bucket_in_project(project, bucket).await? {
                let attrs = self
                    .storage
                    .get_bucket_attrs(bucket)
                    .await
                    .err_tip(|| format!("While reading attributes of {bucket}"))?;
                return Ok(ScratchBucket {
                    name: attrs.name,
                    location: attrs.location,
                });
            }
            // A foreign bucket we can read still tells us where the data is.
            match self.storage.get_bucket_attrs(bucket).await {
                Ok(attrs) => location = Some(attrs.location),
                Err(err) => {
                    event!(Level::DEBUG, %bucket, ?err, "Can't read source bucket");
                }
            }
        }
        let location = match location {
            Some(location) => location,
            None => Self::location_from_zone(project, fallback_zone)?,
        };

        let name = scratch_bucket_name(project, &self.name_suffix, &location);
        validate_bucket_name(&name)
            .err_tip(|| format!("Scratch bucket name for project {project}"))?;
        if self.is_bucket_in_project(project, &name).await? {
            return Ok(ScratchBucket { name, location });
        }
        if self.storage.get_bucket_attrs(&name).await.is_ok() {
            return Err(make_err!(
                Code::FailedPrecondition,
                "Scratch bucket {name} already exists in a project other than {project}"
            ));
        }

        let attrs = BucketAttrs::new(name.clone(), location.clone())
            .with_uniform_bucket_level_access(enable_uniform_bucket_level_access);
        match self.storage.create_bucket(project, &attrs).await {
            Ok(_) => {
                event!(
                    Level::INFO,
                    bucket = %name,
                    %location,
                    project,
                    "Created scratch bucket"
                );
                Ok(ScratchBucket { name, location })
            }
            Err(err) if err.code == Code::AlreadyExists => Err(err
                .set_code(Code::FailedPrecondition)
                .append(format!(
                    "Scratch bucket {name} is owned by a project other than {project}"
                ))),
            Err(err) => Err(err.append(format!("While creating scratch bucket {name}"))),
        }
    }

    async fn is_bucket_in_project(&self, project: &str, bucket_name: &str) -> Result<bool, Error> {
        if bucket_name.is_empty() {
            return Ok(false);
        }
        let mut buckets = self.storage.buckets(project);
        while let Some(bucket) = buckets
            .next()
            .await
            .err_tip(|| format!("While listing buckets of {project}"))?
        {
            if bucket.name == bucket_name {
                return Ok(true);
            }
        }
        Ok(false)
    }
}
