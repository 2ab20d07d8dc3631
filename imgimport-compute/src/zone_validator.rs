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
use imgimport_error::{Error, ResultExt, error_if, make_input_err};

use crate::operations::ComputeOperations;

#[async_trait]
pub trait ZoneValidator: Send + Sync + Debug {
    /// `Ok` iff `zone` is one of the zones listed for `project`.
    async fn zone_valid(&self, project: &str, zone: &str) -> Result<(), Error>;
}

#[derive(Debug)]
pub struct ComputeZoneValidator {
    compute: Arc<dyn ComputeOperations>,
}

impl ComputeZoneValidator {
    pub const fn new(compute: Arc<dyn ComputeOperations>) -> Self {
        Self { compute }
    }
}

#[async_trait]
impl ZoneValidator for ComputeZoneValidator {
    async fn zone_valid(&self, project: &str, zone: &str) -> Result<(), Error> {
        error_if!(zone.is_empty(), "Zone must not be empty");
        let zones = self
            .compute
            .list_zones(project)
            .await
            .err_tip(|| format!("While validating zone {zone} for project {project}"))?;
        if zones.iter().any(|candidate| candidate.name == zone) {
            return Ok(());
        }
        Err(make_input_err!(
            "{zone} is not a valid zone for project {project}"
        ))
    }
}
