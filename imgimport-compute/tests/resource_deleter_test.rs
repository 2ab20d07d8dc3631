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

use core::sync::atomic::Ordering;
use std::sync::Arc;

use imgimport_compute::mocks::{FailureMode, MockComputeOperations};
use imgimport_compute::resource_deleter::{ComputeResourceDeleter, ResourceDeleter};
use imgimport_compute::types::{Disk, Image};
use imgimport_error::{Code, Error};
use imgimport_macro::imgimport_test;
use pretty_assertions::assert_eq;

#[imgimport_test]
async fn deletes_existing_images_and_skips_missing() -> Result<(), Error> {
    let compute = Arc::new(MockComputeOperations::new());
    let existing = Image::new("proj", "img-1");
    let also_existing = Image::new("proj", "img-3");
    let missing = Image::new("proj", "img-2");
    compute.add_image(existing.clone()).await;
    compute.add_image(also_existing.clone()).await;

    let deleter = ComputeResourceDeleter::new(compute.clone());
    deleter
        .delete_images_if_exist(&[existing.clone(), missing.clone(), also_existing.clone()])
        .await?;

    assert!(!compute.has_image(&existing).await);
    assert!(!compute.has_image(&also_existing).await);
    assert_eq!(compute.call_counts().delete_calls.load(Ordering::Relaxed), 2);
    Ok(())
}

#[imgimport_test]
async fn deleting_images_twice_is_a_no_op() -> Result<(), Error> {
    let compute = Arc::new(MockComputeOperations::new());
    let image = Image::new("proj", "img");
    compute.add_image(image.clone()).await;
    let deleter = ComputeResourceDeleter::new(compute.clone());

    deleter.delete_images_if_exist(&[image.clone()]).await?;
    deleter.delete_images_if_exist(&[image.clone()]).await?;

    assert_eq!(compute.call_counts().delete_calls.load(Ordering::Relaxed), 1);
    assert_eq!(compute.call_counts().exists_calls.load(Ordering::Relaxed), 2);
    Ok(())
}

#[imgimport_test]
async fn failures_are_merged_and_all_deletions_attempted() -> Result<(), Error> {
    let compute = Arc::new(MockComputeOperations::new());
    let first = Disk::new("proj", "us-central1-a", "d1");
    let second = Disk::new("proj", "us-central1-a", "d2");
    let third = Disk::new("proj", "us-central1-b", "d3");
    for disk in [&first, &second, &third] {
        compute.add_disk(disk.clone()).await;
    }
    compute.fail_delete(&first.uri(), Code::PermissionDenied).await;
    compute.fail_delete(&third.uri(), Code::Internal).await;

    let deleter = ComputeResourceDeleter::new(compute.clone());
    let err = deleter
        .delete_disks_if_exist(&[first.clone(), second.clone(), third.clone()])
        .await
        .unwrap_err();

    assert_eq!(err.code, Code::PermissionDenied);
    let message = err.message_string();
    assert!(message.contains(&first.uri()), "{message}");
    assert!(message.contains(&third.uri()), "{message}");
    assert!(compute.has_disk(&first).await);
    assert!(!compute.has_disk(&second).await);
    assert!(compute.has_disk(&third).await);
    assert_eq!(compute.call_counts().delete_calls.load(Ordering::Relaxed), 3);
    Ok(())
}

#[imgimport_test]
async fn not_found_on_delete_is_ignored() -> Result<(), Error> {
    let compute = Arc::new(MockComputeOperations::new());
    let disk = Disk::new("proj", "europe-west1-b", "gone");
    compute.add_disk(disk.clone()).await;
    compute.fail_delete(&disk.uri(), Code::NotFound).await;

    ComputeResourceDeleter::new(compute)
        .delete_disks_if_exist(&[disk])
        .await
}

#[imgimport_test]
async fn existence_check_failure_is_surfaced() -> Result<(), Error> {
    let compute = Arc::new(MockComputeOperations::new());
    compute.set_should_fail(true);
    compute.set_failure_mode(FailureMode::NetworkError).await;

    let err = ComputeResourceDeleter::new(compute)
        .delete_images_if_exist(&[Image::new("proj", "img")])
        .await
        .unwrap_err();
    assert_eq!(err.code, Code::Unavailable);
    Ok(())
}

#[imgimport_test]
async fn empty_lists_succeed() -> Result<(), Error> {
    let compute = Arc::new(MockComputeOperations::new());
    let deleter = ComputeResourceDeleter::new(compute.clone());
    deleter.delete_images_if_exist(&[]).await?;
    deleter.delete_disks_if_exist(&[]).await?;
    assert!(compute.get_requests().await.is_empty());
    Ok(())
}
