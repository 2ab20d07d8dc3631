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
use std::collections::HashMap;
use std::sync::LazyLock;

use imgimport_error::{Error, error_if, make_input_err};
use regex::Regex;

/// Upper bound on the number of sources of a single compose request.
pub const MAX_COMPOSE_COMPONENTS: usize = 32;
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";
pub const DEFAULT_RESUMABLE_CHUNK_SIZE: usize = 8 * 1024 * 1024;
/// Every chunk of a resumable upload but the last must be a multiple of
/// this.
pub const RESUMABLE_CHUNK_ALIGNMENT: usize = 256 * 1024;
pub const GCS_SCHEME: &str = "gs://";

const HTTPS_PREFIXES: [&str; 2] = [
    "https://storage.cloud.google.com/",
    "https://storage.googleapis.com/",
];

/// Longest bucket name without dots, and longest part of a dotted name.
/// Dotted names may reach 222 characters in total.
pub const MAX_BUCKET_NAME_COMPONENT_LEN: usize = 63;

static BUCKET_NAME_REGEX: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9][-_.a-z0-9]{1,220}[a-z0-9]$"));

/// Check a bucket name against the naming rules of Cloud Storage.
pub fn validate_bucket_name(name: &str) -> Result<(), Error> {
    let regex = BUCKET_NAME_REGEX
        .as_ref()
        .map_err(|e| make_input_err!("Invalid bucket name pattern: {e}"))?;
    error_if!(
        !regex.is_match(name),
        "{name:?} is not a valid bucket name"
    );
    if name.contains('.') {
        error_if!(
            name.split('.').any(|component| {
                component.is_empty() || component.len() > MAX_BUCKET_NAME_COMPONENT_LEN
            }),
            "Each dot-separated part of bucket name {name:?} must be 1 to {MAX_BUCKET_NAME_COMPONENT_LEN} characters long"
        );
    } else {
        error_if!(
            name.len() > MAX_BUCKET_NAME_COMPONENT_LEN,
            "Bucket name {name:?} is longer than {MAX_BUCKET_NAME_COMPONENT_LEN} characters"
        );
    }
    Ok(())
}

/// Location of an object (or of an object prefix when `path` names a
/// directory).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectPath {
    pub bucket: String,
    pub path: String,
}

impl ObjectPath {
    pub fn new(bucket: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            path: path.into(),
        }
    }

    /// Parse `gs://bucket/path` or one of the `https://` storage URLs.
    /// The path may be empty.
    pub fn parse(path: &str) -> Result<Self, Error> {
        let rest = path
            .strip_prefix(GCS_SCHEME)
            .or_else(|| {
                HTTPS_PREFIXES
                    .iter()
                    .find_map(|prefix| path.strip_prefix(prefix))
            })
            .ok_or_else(|| make_input_err!("{path:?} is not a Cloud Storage path"))?;
        let (bucket, object) = rest.split_once('/').unwrap_or((rest, ""));
        validate_bucket_name(bucket)?;
        Ok(Self::new(bucket, object))
    }

    /// Fully qualified name, `gs://bucket/path`.
    pub fn gcs_url(&self) -> String {
        format!("{GCS_SCHEME}{}/{}", self.bucket, self.path)
    }

    /// `path` with exactly one trailing `/`, or empty for the bucket root.
    pub fn directory_prefix(&self) -> String {
        let trimmed = self.path.trim_end_matches('/');
        if trimmed.is_empty() {
            String::new()
        } else {
            format!("{trimmed}/")
        }
    }

    /// Object below this path treated as a directory.
    pub fn join(&self, relative: &str) -> Self {
        Self::new(
            self.bucket.clone(),
            format!("{}{relative}", self.directory_prefix()),
        )
    }
}

impl fmt::Display for ObjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.gcs_url())
    }
}

impl FromStr for ObjectPath {
    type Err = Error;

    fn from_str(path: &str) -> Result<Self, Self::Err> {
        Self::parse(path)
    }
}

/// Attributes of a bucket, used both to describe and to create one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BucketAttrs {
    pub name: String,
    /// Upper-case location, e.g. `US` or `US-CENTRAL1`.
    pub location: String,
    pub uniform_bucket_level_access: bool,
    pub labels: HashMap<String, String>,
}

impl BucketAttrs {
    pub fn new(name: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            location: location.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub const fn with_uniform_bucket_level_access(mut self, enabled: bool) -> Self {
        self.uniform_bucket_level_access = enabled;
        self
    }
}

/// Patch applied by `update_bucket`. `None` leaves a field untouched and
/// labels are merged into the existing ones.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BucketAttrsToUpdate {
    pub uniform_bucket_level_access: Option<bool>,
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectAttrs {
    pub bucket: String,
    pub name: String,
    pub size: u64,
    pub content_type: String,
    pub generation: i64,
    /// Last modification time as reported by the backend (RFC 3339).
    pub updated: Option<String>,
}

impl ObjectAttrs {
    pub fn object_path(&self) -> ObjectPath {
        ObjectPath::new(self.bucket.clone(), self.name.clone())
    }
}

/// One page of a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_page_token: Option<String>,
}
