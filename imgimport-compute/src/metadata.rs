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
use core::time::Duration;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, HeaderValue, Response, StatusCode};
use imgimport_config::gateway::MetadataSpec;
use imgimport_error::{Code, Error, ResultExt, make_err};
use imgimport_util::http_client::HttpClient;
use tokio::sync::OnceCell;
use tracing::{Level, event};

/// Environment variable overriding the metadata server host.
pub const ENV_METADATA_HOST: &str = "GCE_METADATA_HOST";
pub const DEFAULT_METADATA_HOST: &str = "metadata.google.internal";
pub const METADATA_FLAVOR_HEADER: &str = "metadata-flavor";
pub const METADATA_FLAVOR_GOOGLE: &str = "Google";
const DEFAULT_METADATA_TIMEOUT: Duration = Duration::from_millis(1000);

/// Answers "am I running on GCE" and "where am I".
#[async_trait]
pub trait MetadataGce: Send + Sync + Debug {
    async fn on_gce(&self) -> bool;

    /// Zone of the current instance, e.g. `us-central1-a`.
    async fn zone(&self) -> Result<String, Error>;

    async fn project_id(&self) -> Result<String, Error>;
}

/// Host of the metadata server: the config, then `GCE_METADATA_HOST`,
/// then the well known name.
pub fn metadata_host(spec: &MetadataSpec) -> String {
    spec.host
        .clone()
        .or_else(|| std::env::var(ENV_METADATA_HOST).ok())
        .filter(|host| !host.is_empty())
        .unwrap_or_else(|| DEFAULT_METADATA_HOST.to_string())
}

pub(crate) fn metadata_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        METADATA_FLAVOR_HEADER,
        HeaderValue::from_static(METADATA_FLAVOR_GOOGLE),
    );
    headers
}

/// `MetadataGce` backed by the metadata HTTP endpoint.
#[derive(Debug)]
pub struct MetadataClient {
    http_client: Arc<dyn HttpClient>,
    host: String,
    timeout: Duration,
    on_gce: OnceCell<bool>,
}

impl MetadataClient {
    pub fn new(spec: &MetadataSpec, http_client: Arc<dyn HttpClient>) -> Self {
        let timeout = if spec.timeout_ms == 0 {
            DEFAULT_METADATA_TIMEOUT
        } else {
            Duration::from_millis(spec.timeout_ms)
        };
        Self {
            http_client,
            host: metadata_host(spec),
            timeout,
            on_gce: OnceCell::new(),
        }
    }

    async fn request(&self, url: &str) -> Result<Response<Bytes>, Error> {
        tokio::time::timeout(
            self.timeout,
            self.http_client.get_with_headers(url, &metadata_headers()),
        )
        .await
        .map_err(|_| {
            make_err!(
                Code::DeadlineExceeded,
                "Metadata request to {url} timed out after {:?}",
                self.timeout
            )
        })?
    }

    /// Fetch a value below `computeMetadata/v1/`.
    pub async fn get_metadata(&self, suffix: &str) -> Result<String, Error> {
        let url = format!("http://{}/computeMetadata/v1/{suffix}", self.host);
        let response = self
            .request(&url)
            .await
            .err_tip(|| format!("While querying metadata {suffix}"))?;
        match response.status() {
            StatusCode::OK => {
                let value = core::str::from_utf8(response.body())
                    .err_tip(|| format!("Metadata {suffix} is not valid UTF-8"))?;
                Ok(value.trim().to_string())
            }
            StatusCode::NOT_FOUND => Err(make_err!(
                Code::NotFound,
                "Metadata {suffix} is not defined"
            )),
            status => Err(make_err!(
                Code::from_http_status(status.as_u16()),
                "Metadata server returned {status} for {suffix}"
            )),
        }
    }
}

#[async_trait]
impl MetadataGce for MetadataClient {
    async fn on_gce(&self) -> bool {
        *self
            .on_gce
            .get_or_init(|| async {
                let url = format!("http://{}/", self.host);
                match self.request(&url).await {
                    Ok(response) => response
                        .headers()
                        .get(METADATA_FLAVOR_HEADER)
                        .is_some_and(|flavor| flavor == METADATA_FLAVOR_GOOGLE),
                    Err(err) => {
                        event!(Level::DEBUG, ?err, "Metadata server not reachable");
                        false
                    }
                }
            })
            .await
    }

    async fn zone(&self) -> Result<String, Error> {
        // Returned as projects/<project number>/zones/<zone>.
        let zone_path = self.get_metadata("instance/zone").await?;
        match zone_path.rsplit('/').next() {
            Some(zone) if !zone.is_empty() => Ok(zone.to_string()),
            _ => Err(make_err!(
                Code::Internal,
                "Unexpected zone format from metadata server: {zone_path}"
            )),
        }
    }

    async fn project_id(&self) -> Result<String, Error> {
        self.get_metadata("project/project-id").await
    }
}
