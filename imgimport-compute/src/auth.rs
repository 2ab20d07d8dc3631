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
use std::time::Instant;

use async_trait::async_trait;
use http::StatusCode;
use imgimport_config::gateway::MetadataSpec;
use imgimport_error::{Code, Error, ResultExt, make_err};
use imgimport_util::http_client::HttpClient;
use serde::Deserialize;
use tokio::sync::{Mutex, RwLock};

use crate::metadata::{metadata_headers, metadata_host};

/// Environment variable holding a ready-to-use OAuth access token.
pub const ENV_ACCESS_TOKEN: &str = "GOOGLE_OAUTH_ACCESS_TOKEN";
/// Tokens are refreshed this long before they expire.
const REFRESH_WINDOW: Duration = Duration::from_secs(60);

#[derive(Clone, Debug)]
struct TokenInfo {
    token: String,
    refresh_at: Instant,
}

#[derive(Deserialize, Debug)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

/// Source of bearer tokens for Google API requests.
#[async_trait]
pub trait TokenProvider: Send + Sync + Debug {
    async fn get_token(&self) -> Result<String, Error>;
}

/// A fixed token, e.g. from `GOOGLE_OAUTH_ACCESS_TOKEN`.
#[derive(Debug)]
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub const fn new(token: String) -> Self {
        Self { token }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn get_token(&self) -> Result<String, Error> {
        Ok(self.token.clone())
    }
}

/// Tokens of the instance's default service account, cached until shortly
/// before they expire.
#[derive(Debug)]
pub struct MetadataTokenProvider {
    http_client: Arc<dyn HttpClient>,
    token_url: String,
    token_cache: RwLock<Option<TokenInfo>>,
    refresh_lock: Mutex<()>,
}

impl MetadataTokenProvider {
    pub fn new(spec: &MetadataSpec, http_client: Arc<dyn HttpClient>) -> Self {
        Self {
            http_client,
            token_url: format!(
                "http://{}/computeMetadata/v1/instance/service-accounts/default/token",
                metadata_host(spec)
            ),
            token_cache: RwLock::new(None),
            refresh_lock: Mutex::new(()),
        }
    }

    async fn cached_token(&self) -> Option<String> {
        let cache = self.token_cache.read().await;
        cache
            .as_ref()
            .filter(|info| Instant::now() < info.refresh_at)
            .map(|info| info.token.clone())
    }

    async fn fetch_token(&self) -> Result<TokenInfo, Error> {
        let response = self
            .http_client
            .get_with_headers(&self.token_url, &metadata_headers())
            .await
            .err_tip(|| "While fetching access token from metadata server")?;
        if response.status() != StatusCode::OK {
            return Err(make_err!(
                Code::Unauthenticated,
                "Metadata server returned {} for access token",
                response.status()
            ));
        }
        let token: TokenResponse = serde_json::from_slice(response.body()).map_err(|e| {
            make_err!(Code::Unauthenticated, "Invalid token response: {e}")
        })?;
        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(REFRESH_WINDOW);
        Ok(TokenInfo {
            token: token.access_token,
            refresh_at: Instant::now() + lifetime,
        })
    }
}

#[async_trait]
impl TokenProvider for MetadataTokenProvider {
    async fn get_token(&self) -> Result<String, Error> {
        if let Some(token) = self.cached_token().await {
            return Ok(token);
        }

        let _guard = self.refresh_lock.lock().await;
        // Another caller may have refreshed while we waited for the lock.
        if let Some(token) = self.cached_token().await {
            return Ok(token);
        }

        let info = self.fetch_token().await?;
        let token = info.token.clone();
        *self.token_cache.write().await = Some(info);
        Ok(token)
    }
}

/// `GOOGLE_OAUTH_ACCESS_TOKEN` when set, otherwise the metadata server.
pub fn default_token_provider(
    spec: &MetadataSpec,
    http_client: Arc<dyn HttpClient>,
) -> Arc<dyn TokenProvider> {
    match std::env::var(ENV_ACCESS_TOKEN) {
        Ok(token) if !token.is_empty() => Arc::new(StaticTokenProvider::new(token)),
        _ => Arc::new(MetadataTokenProvider::new(spec, http_client)),
    }
}
