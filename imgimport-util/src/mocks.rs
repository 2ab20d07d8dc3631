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

use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Response, StatusCode};
use imgimport_error::{Code, Error, make_err};
use tokio::sync::RwLock;

use crate::http_client::HttpClient;

#[derive(Debug, Clone)]
struct MockResponse {
    status: StatusCode,
    headers: Vec<(HeaderName, HeaderValue)>,
    body: Bytes,
}

/// A request captured by `MockHttpClient`.
#[derive(Debug, Clone)]
pub struct MockHttpRequest {
    pub url: String,
    pub headers: HeaderMap,
}

/// Serves canned responses keyed by exact URL. Unknown URLs fail with
/// `Unavailable` the way an unreachable host would.
#[derive(Debug, Default)]
pub struct MockHttpClient {
    responses: RwLock<HashMap<String, MockResponse>>,
    requests: RwLock<Vec<MockHttpRequest>>,
}

impl MockHttpClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the response served for `url`.
    pub async fn add_response(
        &self,
        url: &str,
        status: StatusCode,
        headers: &[(&'static str, &'static str)],
        body: impl Into<Bytes>,
    ) {
        let headers = headers
            .iter()
            .map(|(name, value)| {
                (
                    HeaderName::from_static(name),
                    HeaderValue::from_static(value),
                )
            })
            .collect();
        self.responses.write().await.insert(
            url.to_string(),
            MockResponse {
                status,
                headers,
                body: body.into(),
            },
        );
    }

    /// All requests made so far, in order.
    pub async fn get_requests(&self) -> Vec<MockHttpRequest> {
        self.requests.read().await.clone()
    }
}

#[async_trait]
impl HttpClient for MockHttpClient {
    async fn get_with_headers(
        &self,
        url: &str,
        headers: &HeaderMap,
    ) -> Result<Response<Bytes>, Error> {
        self.requests.write().await.push(MockHttpRequest {
            url: url.to_string(),
            headers: headers.clone(),
        });

        let responses = self.responses.read().await;
        let Some(mock) = responses.get(url) else {
            return Err(make_err!(Code::Unavailable, "No route to {url}"));
        };

        let mut response = Response::new(mock.body.clone());
        *response.status_mut() = mock.status;
        for (name, value) in &mock.headers {
            response.headers_mut().insert(name.clone(), value.clone());
        }
        Ok(response)
    }
}
