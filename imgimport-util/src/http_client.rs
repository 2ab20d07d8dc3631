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

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, Response};
use imgimport_config::gateway::HttpClientSpec;
use imgimport_error::{Code, Error, ResultExt, make_err};
use tracing::{Level, event};

const DEFAULT_USER_AGENT: &str = concat!("imgimport/", env!("CARGO_PKG_VERSION"));

/// A minimal HTTP GET capability. Non-2xx responses are returned as
/// responses, only transport failures are errors.
#[async_trait]
pub trait HttpClient: Send + Sync + Debug {
    /// GET `url` with additional request headers.
    async fn get_with_headers(&self, url: &str, headers: &HeaderMap)
    -> Result<Response<Bytes>, Error>;

    /// GET `url`.
    async fn get(&self, url: &str) -> Result<Response<Bytes>, Error> {
        self.get_with_headers(url, &HeaderMap::new()).await
    }
}

#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    pub fn new(spec: &HttpClientSpec) -> Result<Self, Error> {
        let mut builder = reqwest::Client::builder().user_agent(
            spec.user_agent
                .clone()
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
        );
        if spec.timeout_s > 0 {
            builder = builder.timeout(Duration::from_secs(spec.timeout_s));
        }
        let client = builder
            .build()
            .map_err(|e| make_err!(Code::Internal, "Failed to build HTTP client: {e}"))?;
        Ok(Self { client })
    }

    pub const fn from_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn get_with_headers(
        &self,
        url: &str,
        headers: &HeaderMap,
    ) -> Result<Response<Bytes>, Error> {
        event!(Level::DEBUG, url, "Sending GET request");
        let response = self
            .client
            .get(url)
            .headers(headers.clone())
            .send()
            .await
            .err_tip(|| format!("While sending GET {url}"))?;

        let status = response.status();
        let response_headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .err_tip(|| format!("While reading body of GET {url}"))?;

        let mut result = Response::new(body);
        *result.status_mut() = status;
        *result.headers_mut() = response_headers;
        Ok(result)
    }
}
