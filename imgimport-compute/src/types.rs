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

use core::fmt;
use core::str::FromStr;

use imgimport_error::{Error, make_input_err};
use serde::Deserialize;

/// Status reported by the compute API for zones that accept new resources.
pub const ZONE_STATUS_UP: &str = "UP";

/// A GCE disk image.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Image {
    pub project: String,
    pub name: String,
}

impl Image {
    pub fn new(project: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            name: name.into(),
        }
    }

    pub fn uri(&self) -> String {
        format!("projects/{}/global/images/{}", self.project, self.name)
    }
}

impl fmt::Display for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uri())
    }
}

impl FromStr for Image {
    type Err = Error;

    /// Accepts `projects/{project}/global/images/{name}`, optionally
    /// prefixed by an API base URL.
    fn from_str(uri: &str) -> Result<Self, Self::Err> {
        match resource_segments(uri).as_slice() {
            ["projects", project, "global", "images", name] => Ok(Self::new(*project, *name)),
            _ => Err(make_input_err!(
                "{uri} is not an image URI (projects/PROJECT/global/images/NAME)"
            )),
        }
    }
}

/// A GCE persistent disk.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Disk {
    pub project: String,
    pub zone: String,
    pub name: String,
}

impl Disk {
    pub fn new(project: impl Into<String>, zone: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            zone: zone.into(),
            name: name.into(),
        }
    }

    pub fn uri(&self) -> String {
        format!(
            "projects/{}/zones/{}/disks/{}",
            self.project, self.zone, self.name
        )
    }
}

impl fmt::Display for Disk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uri())
    }
}

impl FromStr for Disk {
    type Err = Error;

    /// Accepts `projects/{project}/zones/{zone}/disks/{name}`, optionally
    /// prefixed by an API base URL.
    fn from_str(uri: &str) -> Result<Self, Self::Err> {
        match resource_segments(uri).as_slice() {
            ["projects", project, "zones", zone, "disks", name] => {
                Ok(Self::new(*project, *zone, *name))
            }
            _ => Err(make_input_err!(
                "{uri} is not a disk URI (projects/PROJECT/zones/ZONE/disks/NAME)"
            )),
        }
    }
}

/// Path segments of a resource URI starting at `projects`.
fn resource_segments(uri: &str) -> Vec<&str> {
    let start = uri.find("projects/").unwrap_or(0);
    uri[start..]
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect()
}

/// A compute zone as returned by `zones.list`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Zone {
    pub name: String,
    /// Full URL of the region the zone belongs to.
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub status: String,
}

impl Zone {
    /// Bare region name, e.g. `us-central1`.
    pub fn region_name(&self) -> &str {
        self.region.rsplit('/').next().unwrap_or_default()
    }

    pub fn is_up(&self) -> bool {
        self.status == ZONE_STATUS_UP
    }
}

/// Region a zone belongs to: `us-central1-a` -> `us-central1`.
pub fn zone_to_region(zone: &str) -> Result<String, Error> {
    match zone.rsplit_once('-') {
        Some((region, suffix)) if !region.is_empty() && !suffix.is_empty() && region.contains('-') => {
            Ok(region.to_string())
        }
        _ => Err(make_input_err!("{zone} is not a valid zone")),
    }
}
