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

use serde::{Deserialize, Serialize};

use crate::serde_utils::{
    convert_numeric_with_shellexpand, convert_optional_string_with_shellexpand,
    convert_string_with_shellexpand,
};

/// Root of the configuration file. Every section is optional; an empty
/// json5 object yields a configuration that talks to the public Google
/// endpoints.
#[derive(Serialize, Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// Cloud Storage client settings.
    #[serde(default)]
    pub storage: StorageSpec,

    /// Compute Engine API settings.
    #[serde(default)]
    pub compute: ComputeSpec,

    /// GCE metadata server settings.
    #[serde(default)]
    pub metadata: MetadataSpec,

    /// Settings for the generic HTTP client.
    #[serde(default)]
    pub http: HttpClientSpec,

    /// Scratch bucket naming.
    #[serde(default)]
    pub scratch_bucket: ScratchBucketSpec,
}

#[derive(Serialize, Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields)]
pub struct StorageSpec {
    /// Storage JSON API endpoint, e.g. a local emulator.
    ///
    /// Default: <https://storage.googleapis.com>
    #[serde(default, deserialize_with = "convert_optional_string_with_shellexpand")]
    pub endpoint: Option<String>,

    /// Send requests without credentials. Only useful against emulators
    /// or public buckets.
    ///
    /// Default: false
    #[serde(default)]
    pub anonymous: bool,

    /// Number of chunks an object writer may queue before `write` waits
    /// for the upload to drain them.
    ///
    /// Default: 16
    #[serde(default, deserialize_with = "convert_numeric_with_shellexpand")]
    pub write_queue_depth: usize,

    /// Size of the chunks copied from a reader into an object writer.
    ///
    /// Default: 256KiB
    #[serde(default, deserialize_with = "convert_numeric_with_shellexpand")]
    pub copy_chunk_size: usize,

    /// Chunk size for resumable uploads. Objects no larger than one chunk
    /// are sent in a single request. Rounded up to a multiple of 256KiB.
    ///
    /// Default: 8MiB
    #[serde(default, deserialize_with = "convert_numeric_with_shellexpand")]
    pub resumable_chunk_size: usize,
}

#[derive(Serialize, Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields)]
pub struct ComputeSpec {
    /// Compute Engine API base URL.
    ///
    /// Default: <https://compute.googleapis.com/compute/v1>
    #[serde(default, deserialize_with = "convert_optional_string_with_shellexpand")]
    pub endpoint: Option<String>,

    /// How long to wait for a delete operation to reach `DONE`.
    ///
    /// Default: 300
    #[serde(default, deserialize_with = "convert_numeric_with_shellexpand")]
    pub operation_timeout_s: u64,
}

#[derive(Serialize, Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields)]
pub struct MetadataSpec {
    /// Host (and optional port) of the metadata server. Falls back to the
    /// `GCE_METADATA_HOST` environment variable, then to
    /// `metadata.google.internal`.
    #[serde(default, deserialize_with = "convert_optional_string_with_shellexpand")]
    pub host: Option<String>,

    /// Timeout for a single metadata request, in milliseconds.
    ///
    /// Default: 1000
    #[serde(default, deserialize_with = "convert_numeric_with_shellexpand")]
    pub timeout_ms: u64,
}

#[derive(Serialize, Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields)]
pub struct HttpClientSpec {
    /// Whole-request timeout in seconds. Zero disables the timeout.
    ///
    /// Default: 0
    #[serde(default, deserialize_with = "convert_numeric_with_shellexpand")]
    pub timeout_s: u64,

    /// Value of the `User-Agent` header.
    ///
    /// Default: "imgimport/<version>"
    #[serde(default, deserialize_with = "convert_optional_string_with_shellexpand")]
    pub user_agent: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Default, Clone)]
#[serde(deny_unknown_fields)]
pub struct ScratchBucketSpec {
    /// Inserted between the project and the location when a scratch bucket
    /// name is synthesized.
    ///
    /// Default: "daisy-bkt"
    #[serde(default, deserialize_with = "convert_string_with_shellexpand")]
    pub name_suffix: String,
}
