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

use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use imgimport_error::{Code, Error, make_err};
use tokio::sync::RwLock;

use crate::metadata::MetadataGce;
use crate::operations::ComputeOperations;
use crate::types::{Disk, Image, ZONE_STATUS_UP, Zone};

/// A mock implementation of `ComputeOperations` for testing
#[derive(Debug, Default)]
pub struct MockComputeOperations {
    images: RwLock<HashSet<Image>>,
    disks: RwLock<HashSet<Disk>>,
    // Zones keyed by project
    zones: RwLock<HashMap<String, Vec<Zone>>>,
    // Resource URIs whose deletion fails with the given code
    delete_failures: RwLock<HashMap<String, Code>>,
    should_fail: AtomicBool,
    failure_mode: RwLock<FailureMode>,
    call_counts: CallCounts,
    requests: RwLock<Vec<MockComputeRequest>>,
}

#[derive(Debug, Default)]
pub struct CallCounts {
    pub exists_calls: AtomicUsize,
    pub delete_calls: AtomicUsize,
    pub list_zones_calls: AtomicUsize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockComputeRequest {
    ImageExists { image: Image },
    DeleteImage { image: Image },
    DiskExists { disk: Disk },
    DeleteDisk { disk: Disk },
    ListZones { project: String },
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

impl MockComputeOperations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set whether operations should fail or not
    pub fn set_should_fail(&self, should_fail: bool) {
        self.should_fail.store(should_fail, Ordering::Relaxed);
    }

    /// Set the specific failure mode to simulate
    pub async fn set_failure_mode(&self, mode: FailureMode) {
        *self.failure_mode.write().await = mode;
    }

    pub async fn add_image(&self, image: Image) {
        self.images.write().await.insert(image);
    }

    pub async fn add_disk(&self, disk: Disk) {
        self.disks.write().await.insert(disk);
    }

    /// Register an `UP` zone of `project` in `region`.
    pub async fn add_zone(&self, project: &str, name: &str, region: &str) {
        self.add_zone_with_status(project, name, region, ZONE_STATUS_UP)
            .await;
    }

    pub async fn add_zone_with_status(&self, project: &str, name: &str, region: &str, status: &str) {
        self.zones
            .write()
            .await
            .entry(project.to_string())
            .or_default()
            .push(Zone {
                name: name.to_string(),
                region: format!(
                    "https://www.googleapis.com/compute/v1/projects/{project}/regions/{region}"
                ),
                status: status.to_string(),
            });
    }

    /// Make deleting the resource with `uri` fail with `code`.
    pub async fn fail_delete(&self, uri: &str, code: Code) {
        self.delete_failures
            .write()
            .await
            .insert(uri.to_string(), code);
    }

    pub async fn has_image(&self, image: &Image) -> bool {
        self.images.read().await.contains(image)
    }

    pub async fn has_disk(&self, disk: &Disk) -> bool {
        self.disks.read().await.contains(disk)
    }

    pub const fn call_counts(&self) -> &CallCounts {
        &self.call_counts
    }

    /// Get all recorded requests
    pub async fn get_requests(&self) -> Vec<MockComputeRequest> {
        self.requests.read().await.clone()
    }

    async fn record(&self, request: MockComputeRequest) {
        self.requests.write().await.push(request);
    }

    async fn handle_failure(&self) -> Result<(), Error> {
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

    async fn injected_delete_failure(&self, uri: &str) -> Result<(), Error> {
        match self.delete_failures.read().await.get(uri) {
            Some(code) => Err(make_err!(*code, "Simulated failure deleting {uri}")),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ComputeOperations for MockComputeOperations {
    async fn image_exists(&self, image: &Image) -> Result<bool, Error> {
        self.call_counts.exists_calls.fetch_add(1, Ordering::Relaxed);
        self.record(MockComputeRequest::ImageExists {
            image: image.clone(),
        })
        .await;
        self.handle_failure().await?;
        Ok(self.images.read().await.contains(image))
    }

    async fn delete_image(&self, image: &Image) -> Result<(), Error> {
        self.call_counts.delete_calls.fetch_add(1, Ordering::Relaxed);
        self.record(MockComputeRequest::DeleteImage {
            image: image.clone(),
        })
        .await;
        self.handle_failure().await?;
        self.injected_delete_failure(&image.uri()).await?;
        if self.images.write().await.remove(image) {
            Ok(())
        } else {
            Err(make_err!(Code::NotFound, "Image {image} not found"))
        }
    }

    async fn disk_exists(&self, disk: &Disk) -> Result<bool, Error> {
        self.call_counts.exists_calls.fetch_add(1, Ordering::Relaxed);
        self.record(MockComputeRequest::DiskExists { disk: disk.clone() })
            .await;
        self.handle_failure().await?;
        Ok(self.disks.read().await.contains(disk))
    }

    async fn delete_disk(&self, disk: &Disk) -> Result<(), Error> {
        self.call_counts.delete_calls.fetch_add(1, Ordering::Relaxed);
        self.record(MockComputeRequest::DeleteDisk { disk: disk.clone() })
            .await;
        self.handle_failure().await?;
        self.injected_delete_failure(&disk.uri()).await?;
        if self.disks.write().await.remove(disk) {
            Ok(())
        } else {
            Err(make_err!(Code::NotFound, "Disk {disk} not found"))
        }
    }

    async fn list_zones(&self, project: &str) -> Result<Vec<Zone>, Error> {
        self.call_counts
            .list_zones_calls
            .fetch_add(1, Ordering::Relaxed);
        self.record(MockComputeRequest::ListZones {
            project: project.to_string(),
        })
        .await;
        self.handle_failure().await?;
        Ok(self
            .zones
            .read()
            .await
            .get(project)
            .cloned()
            .unwrap_or_default())
    }
}

/// A mock `MetadataGce`. When `on_gce` is false every lookup fails with
/// `Unavailable`.
#[derive(Debug, Default, Clone)]
pub struct MockMetadataGce {
    pub on_gce: bool,
    pub zone: String,
    pub project_id: String,
}

impl MockMetadataGce {
    pub fn running_on_gce(zone: &str, project_id: &str) -> Self {
        Self {
            on_gce: true,
            zone: zone.to_string(),
            project_id: project_id.to_string(),
        }
    }

    pub fn not_on_gce() -> Self {
        Self::default()
    }

    fn require_gce(&self) -> Result<(), Error> {
        if self.on_gce {
            Ok(())
        } else {
            Err(make_err!(Code::Unavailable, "Not running on GCE"))
        }
    }
}

#[async_trait]
impl MetadataGce for MockMetadataGce {
    async fn on_gce(&self) -> bool {
        self.on_gce
    }

    async fn zone(&self) -> Result<String, Error> {
        self.require_gce()?;
        Ok(self.zone.clone())
    }

    async fn project_id(&self) -> Result<String, Error> {
        self.require_gce()?;
        Ok(self.project_id.clone())
    }
}
