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

use imgimport_compute::types::{Disk, Image, Zone, zone_to_region};
use imgimport_error::{Code, Error};
use pretty_assertions::assert_eq;

#[test]
fn image_uri_parses_back() -> Result<(), Error> {
    let image = Image::new("my-project", "my-image");
    assert_eq!(image.uri(), "projects/my-project/global/images/my-image");
    assert_eq!(image.uri().parse::<Image>()?, image);
    assert_eq!(
        "https://www.googleapis.com/compute/v1/projects/my-project/global/images/my-image"
            .parse::<Image>()?,
        image
    );
    Ok(())
}

#[test]
fn disk_uri_parses_back() -> Result<(), Error> {
    let disk = Disk::new("p", "us-east1-b", "d");
    assert_eq!(disk.to_string(), "projects/p/zones/us-east1-b/disks/d");
    assert_eq!(disk.uri().parse::<Disk>()?, disk);
    Ok(())
}

#[test]
fn malformed_uris_are_rejected() {
    assert_eq!(
        "projects/p/zones/z/disks/d".parse::<Image>().unwrap_err().code,
        Code::InvalidArgument
    );
    assert_eq!(
        "projects/p/global/images/i".parse::<Disk>().unwrap_err().code,
        Code::InvalidArgument
    );
    assert!("".parse::<Image>().is_err());
}

#[test]
fn zone_region_helpers() -> Result<(), Error> {
    assert_eq!(zone_to_region("us-central1-a")?, "us-central1");
    assert_eq!(zone_to_region("europe-west4-c")?, "europe-west4");
    assert!(zone_to_region("uscentral1").is_err());
    assert!(zone_to_region("us-").is_err());

    let zone = Zone {
        name: "us-central1-a".to_string(),
        region: "https://www.googleapis.com/compute/v1/projects/p/regions/us-central1"
            .to_string(),
        status: "UP".to_string(),
    };
    assert_eq!(zone.region_name(), "us-central1");
    assert!(zone.is_up());
    Ok(())
}
