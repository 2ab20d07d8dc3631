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

use crate::types::{Disk, Image, Zone};

/// The Compute Engine operations the import tooling relies on.
/// This abstraction allows for easier testing by mocking compute responses.
#[async_trait]
pub trait ComputeOperations: Send + Sync + Debug {
    /// Check if an image exists
    async fn image_exists(&self, image: &Image) -> Result<bool, Error>;

    /// Delete an image and wait for the operation to finish
    async fn delete_image(&self, image: &Image) -> Result<(), Error>;

    /// Check if a disk exists
    async fn disk_exists(&self, disk: &Disk) -> Result<bool, Error>;

    /// Delete a disk and wait for the operation to finish
    async fn delete_disk(&self, disk: &Disk) -> Result<(), Error>;

    /// List all zones available to a project
    async fn list_zones(&self, project: &str) -> Result<Vec<Zone>, Error>;
}
