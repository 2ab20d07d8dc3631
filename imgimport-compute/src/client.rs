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

use core::time::Duration;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use imgimport_config::gateway::ComputeSpec;
use imgimport_error::{Code, Error, ResultExt, make_err};
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{Level, event};

use crate::auth::TokenProvider;
use crate::operations::ComputeOperations;
use crate::types::{Disk, Image, Zone};

pub const DEFAULT_COMPUTE_ENDPOINT: &str = "https://compute.googleapis.com/compute/v1";
const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(300);
const OPERATION_DONE: &str = "DONE";

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct Operation {
    name: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    zone: Option<String>,
    #[serde(default)]
    error: Option<OperationError>,
}

#[derive(Deserialize, Debug, Default)]
struct OperationError {
    #[serde(default)]
    errors: Vec<OperationErrorItem>,
}

#[derive(Deserialize, Debug, Default)]
struct OperationErrorItem {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
struct ZoneList {
    #[serde(default)]
    items: Vec<Zone>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
struct ApiErrorBody {
    error: ApiError,
}

#[derive(Deserialize, Debug, Default)]
struct ApiError {
    #[serde(default)]
    message: String,
}

/// Compute Engine v1 REST client.
#[derive(Debug)]
pub struct ComputeClient {
    client: reqwest::Client,
    endpoint: String,
    token_provider: Arc<dyn TokenProvider>,
    operation_timeout: Duration,
}

impl ComputeClient {
    pub fn new(
        spec: &ComputeSpec,
        client: reqwest::Client,
        token_provider: Arc<dyn TokenProvider>,
    ) -> Self {
        let endpoint = spec
            .endpoint
            .as_deref()
            .unwrap_or(DEFAULT_COMPUTE_ENDPOINT)
            .trim_end_matches('/')
            .to_string();
        let operation_timeout = if spec.operation_timeout_s == 0 {
            DEFAULT_OPERATION_TIMEOUT
        } else {
            Duration::from_secs(spec.operation_timeout_s)
        };
        Self {
            client,
            endpoint,
            token_provider,
            operation_timeout,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.endpoint)
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<reqwest::Response, Error> {
        let token = self
            .token_provider
            .get_token()
            .await
            .err_tip(|| "While obtaining compute access token")?;
        event!(Level::DEBUG, %method, url, "Sending compute request");
        self.client
            .request(method.clone(), url)
            .bearer_auth(token)
            .query(query)
            .send()
            .await
            .err_tip(|| format!("While sending {method} {url}"))
    }

    /// Decode a successful response, or turn an error status into an
    /// `Error` carrying the API's message.
    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, Error> {
        let status = response.status();
        let url = response.url().to_string();
        let body = response
            .bytes()
            .await
            .err_tip(|| format!("While reading response of {url}"))?;
        if !status.is_success() {
            let message = serde_json::from_slice::<ApiErrorBody>(&body)
                .map(|parsed| parsed.error.message)
                .unwrap_or_else(|_| String::from_utf8_lossy(&body).to_string());
            return Err(make_err!(
                Code::from_http_status(status.as_u16()),
                "{url} returned {status}: {message}"
            ));
        }
        serde_json::from_slice(&body)
            .map_err(|e| make_err!(Code::Internal, "Could not decode response of {url}: {e}"))
    }

    async fn exists(&self, path: &str) -> Result<bool, Error> {
        let response = self.send(Method::GET, &self.url(path), &[]).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        Self::decode::<serde_json::Value>(response)
            .await
            .err_tip(|| format!("While checking existence of {path}"))?;
        Ok(true)
    }

    async fn delete_and_wait(&self, path: &str, operations_path: &str) -> Result<(), Error> {
        let response = self.send(Method::DELETE, &self.url(path), &[]).await?;
        let mut operation: Operation = Self::decode(response)
            .await
            .err_tip(|| format!("While deleting {path}"))?;

        let deadline = Instant::now() + self.operation_timeout;
        while operation.status != OPERATION_DONE {
            if Instant::now() >= deadline {
                return Err(make_err!(
                    Code::DeadlineExceeded,
                    "Operation {} deleting {path} did not finish within {:?}",
                    operation.name,
                    self.operation_timeout
                ));
            }
            // `wait` blocks server side for up to two minutes per call.
            let url = self.url(&format!("{operations_path}/{}/wait", operation.name));
            let response = self.send(Method::POST, &url, &[]).await?;
            operation = Self::decode(response)
                .await
                .err_tip(|| format!("While waiting for deletion of {path}"))?;
        }

        if let Some(error) = operation.error {
            let mut errors = error.errors.into_iter().map(|item| {
                make_err!(Code::Internal, "{}: {}", item.code, item.message)
            });
            let first = errors
                .next()
                .unwrap_or_else(|| make_err!(Code::Internal, "Operation failed without details"));
            return Err(errors
                .fold(first, |acc, err| acc.merge(err))
                .append(format!("While deleting {path}")));
        }
        event!(
            Level::INFO,
            path,
            zone = ?operation.zone,
            "Deleted compute resource"
        );
        Ok(())
    }
}

#[async_trait]
impl ComputeOperations for ComputeClient {
    async fn image_exists(&self, image: &Image) -> Result<bool, Error> {
        self.exists(&image.uri()).await
    }

    async fn delete_image(&self, image: &Image) -> Result<(), Error> {
        self.delete_and_wait(
            &image.uri(),
            &format!("projects/{}/global/operations", image.project),
        )
        .await
    }

    async fn disk_exists(&self, disk: &Disk) -> Result<bool, Error> {
        self.exists(&disk.uri()).await
    }

    async fn delete_disk(&self, disk: &Disk) -> Result<(), Error> {
        self.delete_and_wait(
            &disk.uri(),
            &format!("projects/{}/zones/{}/operations", disk.project, disk.zone),
        )
        .await
    }

    async fn list_zones(&self, project: &str) -> Result<Vec<Zone>, Error> {
        let url = self.url(&format!("projects/{project}/zones"));
        let mut zones = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let query: Vec<(&str, &str)> = page_token
                .as_deref()
                .map(|token| vec![("pageToken", token)])
                .unwrap_or_default();
            let response = self.send(Method::GET, &url, &query).await?;
            let page: ZoneList = Self::decode(response)
                .await
                .err_tip(|| format!("While listing zones of {project}"))?;
            zones.extend(page.items);
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }
        Ok(zones)
    }
}
