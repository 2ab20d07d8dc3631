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
use imgimport_error::{Error, ResultExt, make_input_err};
use tracing::{Level, event};

use crate::metadata::MetadataGce;
use crate::operations::ComputeOperations;
use crate::types::Zone;

pub const MULTI_REGION_US: &str = "US";
pub const MULTI_REGION_EU: &str = "EU";
pub const MULTI_REGION_ASIA: &str = "ASIA";

/// Maps storage locations onto zones and multi-regions.
#[async_trait]
pub trait ResourceLocationRetriever: Send + Sync + Debug {
    /// A zone to run in for data stored in `storage_region`.
    async fn get_zone(&self, storage_region: &str, project: &str) -> Result<String, Error>;

    /// The multi-region containing `storage_location`.
    fn get_largest_storage_location(&self, storage_location: &str) -> String;
}

/// Most general storage location containing `storage_location`, e.g.
/// `us-central1` -> `US` and `EUR4` -> `EU`. Unknown locations come back
/// upper-cased.
pub fn largest_storage_location(storage_location: &str) -> String {
    let location = storage_location.to_uppercase();
    match location.as_str() {
        MULTI_REGION_US | "NAM4" => MULTI_REGION_US.to_string(),
        MULTI_REGION_EU | "EUR4" => MULTI_REGION_EU.to_string(),
        MULTI_REGION_ASIA | "ASIA1" => MULTI_REGION_ASIA.to_string(),
        region if region.starts_with("US-") => MULTI_REGION_US.to_string(),
        region if region.starts_with("EUROPE-") => MULTI_REGION_EU.to_string(),
        region if region.starts_with("ASIA-") => MULTI_REGION_ASIA.to_string(),
        _ => location,
    }
}

#[derive(Debug)]
pub struct GceResourceLocationRetriever {
    compute: Arc<dyn ComputeOperations>,
    metadata: Arc<dyn MetadataGce>,
}

impl GceResourceLocationRetriever {
    pub const fn new(compute: Arc<dyn ComputeOperations>, metadata: Arc<dyn MetadataGce>) -> Self {
        Self { compute, metadata }
    }
}

#[async_trait]
impl ResourceLocationRetriever for GceResourceLocationRetriever {
    async fn get_zone(&self, storage_region: &str, project: &str) -> Result<String, Error> {
        if !storage_region.is_empty() {
            let mut zones: Vec<Zone> = self
                .compute
                .list_zones(project)
                .await
                .err_tip(|| format!("While looking up zones of {project}"))?
                .into_iter()
                .filter(|zone| {
                    zone.is_up() && zone.region_name().eq_ignore_ascii_case(storage_region)
                })
                .collect();
            zones.sort_by(|a, b| a.name.cmp(&b.name));
            if let Some(zone) = zones.into_iter().next() {
                return Ok(zone.name);
            }
        }

        if self.metadata.on_gce().await {
            let zone = self
                .metadata
                .zone()
                .await
                .err_tip(|| "While reading zone from metadata server")?;
            event!(
                Level::INFO,
                %zone,
                storage_region,
                "No zone in storage region, using the zone of this instance"
            );
            return Ok(zone);
        }

        Err(make_input_err!(
            "Can't determine a zone for project {project} and storage region {storage_region:?}"
        ))
    }

    fn get_largest_storage_location(&self, storage_location: &str) -> String {
        largest_storage_location(storage_location)
    }
}
