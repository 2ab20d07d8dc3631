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
use futures::future::join_all;
use imgimport_error::{Code, Error, ResultExt};
use tracing::{Level, event};

use crate::operations::ComputeOperations;
use crate::types::{Disk, Image};

/// Best-effort cleanup of images and disks.
#[async_trait]
pub trait ResourceDeleter: Send + Sync + Debug {
    /// Delete every image in `images` that exists. Missing images are
    /// skipped, every deletion is attempted and failures are merged.
    async fn delete_images_if_exist(&self, images: &[Image]) -> Result<(), Error>;

    /// Same as `delete_images_if_exist` for disks.
    async fn delete_disks_if_exist(&self, disks: &[Disk]) -> Result<(), Error>;
}

#[derive(Debug)]
pub struct ComputeResourceDeleter {
    compute: Arc<dyn ComputeOperations>,
}

impl ComputeResourceDeleter {
    pub const fn new(compute: Arc<dyn ComputeOperations>) -> Self {
        Self { compute }
    }

    async fn delete_image_if_exists(&self, image: &Image) -> Result<(), Error> {
        if !self
            .compute
            .image_exists(image)
            .await
            .err_tip(|| format!("While checking image {image}"))?
        {
            return Ok(());
        }
        event!(Level::INFO, %image, "Deleting image");
        not_found_is_ok(self.compute.delete_image(image).await)
            .err_tip(|| format!("While deleting image {image}"))
    }

    async fn delete_disk_if_exists(&self, disk: &Disk) -> Result<(), Error> {
        if !self
            .compute
            .disk_exists(disk)
            .await
            .err_tip(|| format!("While checking disk {disk}"))?
        {
            return Ok(());
        }
        event!(Level::INFO, %disk, "Deleting disk");
        not_found_is_ok(self.compute.delete_disk(disk).await)
            .err_tip(|| format!("While deleting disk {disk}"))
    }
}

/// A resource removed between the existence check and the delete call is
/// already gone.
fn not_found_is_ok(result: Result<(), Error>) -> Result<(), Error> {
    match result {
        Err(err) if err.code == Code::NotFound => Ok(()),
        other => other,
    }
}

fn merge_results(results: Vec<Result<(), Error>>) -> Result<(), Error> {
    results
        .into_iter()
        .filter_map(Result::err)
        .reduce(|acc, err| acc.merge(err))
        .map_or(Ok(()), Err)
}

#[async_trait]
impl ResourceDeleter for ComputeResourceDeleter {
    async fn delete_images_if_exist(&self, images: &[Image]) -> Result<(), Error> {
        merge_results(
            join_all(images.iter().map(|image| self.delete_image_if_exists(image))).await,
        )
    }

    async fn delete_disks_if_exist(&self, disks: &[Disk]) -> Result<(), Error> {
        merge_results(join_all(disks.iter().map(|disk| self.delete_disk_if_exists(disk))).await)
    }
}
