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

use http::{HeaderMap, HeaderValue, StatusCode};
use imgimport_config::gateway::HttpClientSpec;
use imgimport_error::{Code, Error};
use imgimport_macro::imgimport_test;
use imgimport_util::http_client::{HttpClient, ReqwestHttpClient};
use imgimport_util::mocks::MockHttpClient;
use pretty_assertions::assert_eq;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Serves a single canned HTTP/1.1 response and returns the raw request.
async fn serve_once(response: &'static str) -> Result<(String, tokio::task::JoinHandle<String>), Error> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let handle = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = Vec::new();
        let mut buf = [0u8; 1024];
        loop {
            let n = socket.read(&mut buf).await.unwrap();
            request.extend_from_slice(&buf[..n]);
            if n == 0 || request.windows(4).any(|w| w == b"\r\n\r\n") {
                break;
            }
        }
        socket.write_all(response.as_bytes()).await.unwrap();
        socket.shutdown().await.unwrap();
        String::from_utf8_lossy(&request).to_string()
    });
    Ok((format!("http://{addr}/path"), handle))
}

#[imgimport_test]
async fn get_returns_status_headers_and_body() -> Result<(), Error> {
    let (url, server) = serve_once(
        "HTTP/1.1 200 OK\r\nContent-Length: 5\r\nX-Served-By: test\r\nConnection: close\r\n\r\nhello",
    )
    .await?;
    let client = ReqwestHttpClient::new(&HttpClientSpec {
        timeout_s: 5,
        user_agent: Some("http-client-test".to_string()),
    })?;

    let response = client.get(&url).await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("x-served-by"),
        Some(&HeaderValue::from_static("test"))
    );
    assert_eq!(response.body().as_ref(), b"hello");

    let request = server.await?;
    assert!(request.starts_with("GET /path HTTP/1.1"), "{request}");
    assert!(
        request.to_lowercase().contains("user-agent: http-client-test"),
        "{request}"
    );
    Ok(())
}

#[imgimport_test]
async fn non_success_status_is_not_an_error() -> Result<(), Error> {
    let (url, server) = serve_once(
        "HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
    )
    .await?;
    let client = ReqwestHttpClient::new(&HttpClientSpec::default())?;

    let response = client.get(&url).await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(response.body().is_empty());
    server.await?;
    Ok(())
}

#[imgimport_test]
async fn unreachable_host_is_unavailable() -> Result<(), Error> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    drop(listener);

    let client = ReqwestHttpClient::new(&HttpClientSpec::default())?;
    let err = client.get(&format!("http://{addr}/")).await.unwrap_err();
    assert_eq!(err.code, Code::Unavailable);
    Ok(())
}

#[imgimport_test]
async fn mock_client_records_requests() -> Result<(), Error> {
    let client = MockHttpClient::new();
    client
        .add_response(
            "http://example.test/a",
            StatusCode::OK,
            &[("x-kind", "mock")],
            "body",
        )
        .await;

    let mut headers = HeaderMap::new();
    headers.insert("metadata-flavor", HeaderValue::from_static("Google"));
    let response = client
        .get_with_headers("http://example.test/a", &headers)
        .await?;
    assert_eq!(response.body().as_ref(), b"body");

    let err = client.get("http://example.test/missing").await.unwrap_err();
    assert_eq!(err.code, Code::Unavailable);

    let requests = client.get_requests().await;
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].url, "http://example.test/a");
    assert_eq!(
        requests[0].headers.get("metadata-flavor"),
        Some(&HeaderValue::from_static("Google"))
    );
    Ok(())
}
