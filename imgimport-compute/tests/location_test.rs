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

use imgimport_compute::location::{
    GceResourceLocationRetriever, ResourceLocationRetriever, largest_storage_location,
};
use imgimport_compute::mocks::{FailureMode, MockComputeOperations, MockMetadataGce};
use imgimport_error::{Code, Error};
use imgimport_macro::imgimport_test;
use pretty_assertions::assert_eq;

#[test]
fn largest_location_of_regions_and_multi_regions() {
    assert_eq!(largest_storage_location("US-CENTRAL1"), "US");
    assert_eq!(largest_storage_location("us-east4"), "US");
    assert_eq!(largest_storage_location("europe-west2"), "EU");
    assert_eq!(largest_storage_location("asia-northeast1"), "ASIA");
    assert_eq!(largest_storage_location("us"), "US");
    assert_eq!(largest_storage_location("EU"), "EU");
    assert_eq!(largest_storage_location("nam4"), "US");
    assert_eq!(largest_storage_location("EUR4"), "EU");
    assert_eq!(largest_storage_location("asia1"), "ASIA");
    assert_eq!(largest_storage_location("southamerica-east1"), "SOUTHAMERICA-EAST1");
}

async fn compute_with_zones() -> Arc<MockComputeOperations> {
    let compute = Arc::new(MockComputeOperations::new());
    compute.add_zone("proj", "us-central1-c", "us-central1").await;
    compute.add_zone("proj", "us-central1-a", "us-central1").await;
    compute
        .add_zone_with_status("proj", "europe-west1-b", "europe-west1", "DOWN")
        .await;
    compute
}

#[imgimport_test]
async fn zone_in_storage_region_is_preferred() -> Result<(), Error> {
    let retriever = GceResourceLocationRetriever::new(
        compute_with_zones().await,
        Arc::new(MockMetadataGce::running_on_gce("asia-east1-a", "proj")),
    );
    assert_eq!(retriever.get_zone("US-CENTRAL1", "proj").await?, "us-central1-a");
    Ok(())
}

#[imgimport_test]
async fn falls_back_to_metadata_zone() -> Result<(), Error> {
    let retriever = GceResourceLocationRetriever::new(
        compute_with_zones().await,
        Arc::new(MockMetadataGce::running_on_gce("asia-east1-a", "proj")),
    );
    // The only europe-west1 zone is down.
    assert_eq!(retriever.get_zone("europe-west1", "proj").await?, "asia-east1-a");
    assert_eq!(retriever.get_zone("", "proj").await?, "asia-east1-a");
    Ok(())
}

#[imgimport_test]
async fn no_zone_off_gce_is_invalid_argument() -> Result<(), Error> {
    let retriever = GceResourceLocationRetriever::new(
        compute_with_zones().await,
        Arc::new(MockMetadataGce::not_on_gce()),
    );
    let err = retriever.get_zone("EU", "proj").await.unwrap_err();
    assert_eq!(err.code, Code::InvalidArgument);
    Ok(())
}

#[imgimport_test]
async fn zone_listing_failure_is_surfaced() -> Result<(), Error> {
    let compute = compute_with_zones().await;
    compute.set_should_fail(true);
    compute.set_failure_mode(FailureMode::PermissionDenied).await;
    let retriever =
        GceResourceLocationRetriever::new(compute, Arc::new(MockMetadataGce::not_on_gce()));
    let err = retriever.get_zone("us-central1", "proj").await.unwrap_err();
    assert_eq!(err.code, Code::PermissionDenied);
    Ok(())
}
