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

use std::sync::Arc;

use bytes::Bytes;
use imgimport_config::gateway::StorageSpec;
use imgimport_error::{Code, Error};
use imgimport_macro::imgimport_test;
use imgimport_storage::client::GcsClient;
use imgimport_storage::iterator::BucketIterator;
use imgimport_storage::operations::StorageOperations;
use imgimport_storage::storage_client::StorageClient;
use imgimport_storage::streams::{UploadChunk, UploadStream};
use imgimport_storage::types::{BucketAttrs, ObjectPath};
use pretty_assertions::assert_eq;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

const BUCKET_JSON: &str = r#"{
    "kind": "storage#bucket",
    "selfLink": "https://www.googleapis.com/storage/v1/b/images",
    "id": "images",
    "name": "images",
    "projectNumber": "123456789",
    "metageneration": "1",
    "location": "us-central1",
    "locationType": "region",
    "storageClass": "STANDARD",
    "etag": "CAE=",
    "defaultEventBasedHold": false,
    "timeCreated": "2024-05-01T10:00:00.000Z",
    "updated": "2024-05-01T10:00:00.000Z",
    "iamConfiguration": {
        "bucketPolicyOnly": { "enabled": true },
        "uniformBucketLevelAccess": { "enabled": true },
        "publicAccessPrevention": "inherited"
    },
    "labels": { "team": "images" }
}"#;

const NOT_FOUND_JSON: &str = r#"{"error":{"code":404,"message":"The specified bucket does not exist.","errors":[{"message":"The specified bucket does not exist.","domain":"global","reason":"notFound"}]}}"#;

const CONFLICT_JSON: &str = r#"{"error":{"code":409,"message":"Your previous request to create the named bucket succeeded and you already own it.","errors":[{"message":"Your previous request to create the named bucket succeeded and you already own it.","domain":"global","reason":"conflict"}]}}"#;

fn object_json(name: &str, size: usize, content_type: &str) -> String {
    format!(
        r#"{{
            "kind": "storage#object",
            "id": "images/{name}/1714557600000000",
            "selfLink": "https://www.googleapis.com/storage/v1/b/images/o/{name}",
            "mediaLink": "https://storage.googleapis.com/download/storage/v1/b/images/o/{name}?alt=media",
            "name": "{name}",
            "bucket": "images",
            "generation": "1714557600000000",
            "metageneration": "1",
            "contentType": "{content_type}",
            "storageClass": "STANDARD",
            "size": "{size}",
            "md5Hash": "XrY7u+Ae7tCTyyK7j1rNww==",
            "crc32c": "yZRlqg==",
            "etag": "CIDE6f3N8oUDEAE=",
            "timeCreated": "2024-05-01T10:00:00.000Z",
            "updated": "2024-05-01T10:00:00.000Z",
            "timeStorageClassUpdated": "2024-05-01T10:00:00.000Z"
        }}"#
    )
}

/// One canned HTTP/1.1 response. `{addr}` in `headers` is replaced with
/// the address of the server.
struct Reply {
    status: u16,
    headers: &'static str,
    body: String,
}

impl Reply {
    fn json(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: "",
            body: body.into(),
        }
    }

    fn with_headers(status: u16, headers: &'static str) -> Self {
        Self {
            status,
            headers,
            body: String::new(),
        }
    }
}

/// What the server saw of one request.
#[derive(Debug)]
struct Received {
    line: String,
    /// Lowercased header block.
    headers: String,
    body_len: usize,
}

fn header_end(request: &[u8]) -> Option<usize> {
    request.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4)
}

fn body_complete(headers: &str, body: &[u8]) -> bool {
    if let Some(length) = headers
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
    {
        return body.len() >= length.trim().parse::<usize>().unwrap();
    }
    if headers.contains("transfer-encoding: chunked") {
        return body.ends_with(b"0\r\n\r\n");
    }
    true
}

/// Answers one connection per reply, in order, and returns what each
/// request looked like.
async fn serve(replies: Vec<Reply>) -> Result<(String, JoinHandle<Vec<Received>>), Error> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let handle = tokio::spawn(async move {
        let mut received = Vec::new();
        for reply in replies {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = vec![0u8; 64 * 1024];
            loop {
                if let Some(end) = header_end(&request) {
                    let headers = String::from_utf8_lossy(&request[..end]).to_lowercase();
                    if body_complete(&headers, &request[end..]) {
                        break;
                    }
                }
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            let end = header_end(&request).unwrap_or(request.len());
            let head = String::from_utf8_lossy(&request[..end]).to_string();
            received.push(Received {
                line: head.lines().next().unwrap_or_default().to_string(),
                headers: head.to_lowercase(),
                body_len: request.len() - end,
            });
            let response = format!(
                "HTTP/1.1 {} X\r\nContent-Type: application/json\r\n{}Content-Length: {}\r\nConnection: close\r\n\r\n{}",
                reply.status,
                reply.headers.replace("{addr}", &addr.to_string()),
                reply.body.len(),
                reply.body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.unwrap();
        }
        received
    });
    Ok((format!("http://{addr}"), handle))
}

async fn gcs_client(endpoint: String, resumable_chunk_size: usize) -> Result<GcsClient, Error> {
    GcsClient::new(&StorageSpec {
        endpoint: Some(endpoint),
        anonymous: true,
        resumable_chunk_size,
        ..Default::default()
    })
    .await
}

/// `pieces` are queued before the upload starts; `finish` decides whether
/// the writer closed cleanly.
async fn upload_stream(pieces: Vec<Bytes>, finish: bool) -> UploadStream {
    let (tx, stream) = UploadStream::channel(pieces.len() + 1);
    for piece in pieces {
        tx.send(UploadChunk::Data(piece)).await.unwrap();
    }
    if finish {
        tx.send(UploadChunk::Finish).await.unwrap();
    }
    stream
}

#[imgimport_test]
async fn bucket_attrs_are_mapped() -> Result<(), Error> {
    let (endpoint, server) = serve(vec![
        Reply::json(200, BUCKET_JSON),
        Reply::json(404, NOT_FOUND_JSON),
    ])
    .await?;
    let client = gcs_client(endpoint, 0).await?;

    let attrs = client.get_bucket_attrs("images").await?;
    assert_eq!(attrs.name, "images");
    assert_eq!(attrs.location, "US-CENTRAL1");
    assert!(attrs.uniform_bucket_level_access);
    assert_eq!(attrs.labels.get("team").map(String::as_str), Some("images"));

    let err = client.get_bucket_attrs("missing").await.unwrap_err();
    assert_eq!(err.code, Code::NotFound);

    let received = server.await?;
    assert!(received[0].line.starts_with("GET "), "{:?}", received[0]);
    assert!(received[0].line.contains("/storage/v1/b/images"), "{:?}", received[0]);
    assert!(received[1].line.contains("/b/missing"), "{:?}", received[1]);
    assert!(!received[0].headers.contains("authorization:"));
    Ok(())
}

#[imgimport_test]
async fn bucket_listing_follows_page_tokens() -> Result<(), Error> {
    let page_one = format!(
        r#"{{"kind":"storage#buckets","items":[{BUCKET_JSON}],"nextPageToken":"page-2"}}"#
    );
    let page_two = format!(
        r#"{{"kind":"storage#buckets","items":[{}]}}"#,
        BUCKET_JSON.replace("\"images\"", "\"logs\"")
    );
    let (endpoint, server) = serve(vec![Reply::json(200, page_one), Reply::json(200, page_two)]).await?;
    let storage = StorageClient::new(Arc::new(gcs_client(endpoint, 0).await?), &StorageSpec::default());

    let mut buckets = storage.buckets("proj");
    let mut names = Vec::new();
    while let Some(bucket) = buckets.next().await? {
        names.push(bucket.name);
    }
    assert_eq!(names, vec!["images", "logs"]);

    let received = server.await?;
    assert!(received[0].line.contains("project=proj"), "{:?}", received[0]);
    assert!(!received[0].line.contains("pageToken"), "{:?}", received[0]);
    assert!(received[1].line.contains("pageToken=page-2"), "{:?}", received[1]);
    Ok(())
}

#[imgimport_test]
async fn bucket_creation_reports_conflicts() -> Result<(), Error> {
    let (endpoint, server) = serve(vec![
        Reply::json(200, BUCKET_JSON),
        Reply::json(409, CONFLICT_JSON),
    ])
    .await?;
    let client = gcs_client(endpoint, 0).await?;
    let attrs = BucketAttrs::new("images", "us-central1").with_uniform_bucket_level_access(true);

    let created = client.create_bucket("proj", &attrs).await?;
    assert_eq!(created.name, "images");
    assert_eq!(created.location, "US-CENTRAL1");

    let err = client.create_bucket("proj", &attrs).await.unwrap_err();
    assert_eq!(err.code, Code::AlreadyExists);

    let received = server.await?;
    assert!(received[0].line.starts_with("POST "), "{:?}", received[0]);
    assert!(received[0].line.contains("project=proj"), "{:?}", received[0]);
    assert!(received[0].body_len > 0);
    Ok(())
}

#[imgimport_test]
async fn copy_resumes_until_done() -> Result<(), Error> {
    let in_progress = r#"{"kind":"storage#rewriteResponse","totalBytesRewritten":"1048576","objectSize":"4194304","done":false,"rewriteToken":"tok-1"}"#;
    let done = format!(
        r#"{{"kind":"storage#rewriteResponse","totalBytesRewritten":"4194304","objectSize":"4194304","done":true,"resource":{}}}"#,
        object_json("copy.vmdk", 4_194_304, "application/octet-stream")
    );
    let (endpoint, server) = serve(vec![Reply::json(200, in_progress), Reply::json(200, done)]).await?;
    let client = gcs_client(endpoint, 0).await?;

    let attrs = client
        .copy_object(
            &ObjectPath::new("source", "disk.vmdk"),
            &ObjectPath::new("images", "copy.vmdk"),
        )
        .await?;
    assert_eq!(attrs.name, "copy.vmdk");
    assert_eq!(attrs.size, 4_194_304);

    let received = server.await?;
    assert_eq!(received.len(), 2);
    assert!(received[0].line.contains("rewriteTo"), "{:?}", received[0]);
    assert!(!received[0].line.contains("rewriteToken"), "{:?}", received[0]);
    assert!(received[1].line.contains("rewriteToken=tok-1"), "{:?}", received[1]);
    Ok(())
}

#[imgimport_test]
async fn small_objects_use_one_request() -> Result<(), Error> {
    let (endpoint, server) = serve(vec![Reply::json(
        200,
        object_json("notes.txt", 11, "text/plain"),
    )])
    .await?;
    let client = gcs_client(endpoint, 0).await?;
    let path = ObjectPath::new("images", "notes.txt");

    let data = upload_stream(
        vec![Bytes::from_static(b"hello "), Bytes::from_static(b"world")],
        true,
    )
    .await;
    let attrs = client.write_object(&path, "text/plain", data).await?;
    assert_eq!(attrs.size, 11);
    assert_eq!(attrs.content_type, "text/plain");

    // A writer that went away sends nothing at all.
    let data = upload_stream(vec![Bytes::from_static(b"partial")], false).await;
    let err = client.write_object(&path, "text/plain", data).await.unwrap_err();
    assert_eq!(err.code, Code::Aborted);

    let received = server.await?;
    assert_eq!(received.len(), 1);
    assert!(received[0].line.starts_with("POST "), "{:?}", received[0]);
    assert!(received[0].line.contains("uploadType=media"), "{:?}", received[0]);
    assert_eq!(received[0].body_len, 11);
    Ok(())
}

#[imgimport_test]
async fn large_objects_upload_in_chunks() -> Result<(), Error> {
    let (endpoint, server) = serve(vec![
        Reply::with_headers(200, "Location: http://{addr}/upload/storage/v1/b/images/o?uploadType=resumable&upload_id=session-1\r\n"),
        Reply::with_headers(308, "Range: bytes=0-262143\r\n"),
        Reply::with_headers(308, "Range: bytes=0-524287\r\n"),
        Reply::json(200, object_json("disk.raw", 600_000, "application/octet-stream")),
    ])
    .await?;
    // Rounded up to 256KiB.
    let client = gcs_client(endpoint, 1).await?;

    let pieces = (0..6).map(|_| Bytes::from(vec![7u8; 100_000])).collect();
    let data = upload_stream(pieces, true).await;
    let attrs = client
        .write_object(
            &ObjectPath::new("images", "disk.raw"),
            "application/octet-stream",
            data,
        )
        .await?;
    assert_eq!(attrs.size, 600_000);

    let received = server.await?;
    assert_eq!(received.len(), 4);
    assert!(received[0].line.contains("uploadType=resumable"), "{:?}", received[0]);
    assert!(received[1].line.starts_with("PUT "), "{:?}", received[1]);
    assert!(received[1].line.contains("upload_id=session-1"), "{:?}", received[1]);
    assert!(received[1].headers.contains("content-range: bytes 0-262143/*"), "{:?}", received[1]);
    assert_eq!(received[1].body_len, 262_144);
    assert!(received[2].headers.contains("content-range: bytes 262144-524287/*"), "{:?}", received[2]);
    assert!(
        received[3].headers.contains("content-range: bytes 524288-599999/600000"),
        "{:?}",
        received[3]
    );
    assert_eq!(received[3].body_len, 75_712);
    Ok(())
}

#[imgimport_test]
async fn aborted_large_upload_cancels_its_session() -> Result<(), Error> {
    let (endpoint, server) = serve(vec![
        Reply::with_headers(200, "Location: http://{addr}/upload/storage/v1/b/images/o?uploadType=resumable&upload_id=session-2\r\n"),
        Reply::with_headers(308, "Range: bytes=0-262143\r\n"),
        Reply::json(499, ""),
    ])
    .await?;
    let client = gcs_client(endpoint, 256 * 1024).await?;

    let pieces = (0..3).map(|_| Bytes::from(vec![1u8; 100_000])).collect();
    let data = upload_stream(pieces, false).await;
    let err = client
        .write_object(
            &ObjectPath::new("images", "disk.raw"),
            "application/octet-stream",
            data,
        )
        .await
        .unwrap_err();
    assert_eq!(err.code, Code::Aborted);

    let received = server.await?;
    assert_eq!(received.len(), 3);
    assert!(received[1].line.starts_with("PUT "), "{:?}", received[1]);
    assert!(received[2].line.starts_with("DELETE "), "{:?}", received[2]);
    assert!(received[2].line.contains("upload_id=session-2"), "{:?}", received[2]);
    Ok(())
}

#[imgimport_test]
async fn closed_client_rejects_calls() -> Result<(), Error> {
    let client = gcs_client("http://127.0.0.1:9".to_string(), 0).await?;
    client.close().await?;
    assert_eq!(
        client.get_bucket_attrs("images").await.unwrap_err().code,
        Code::FailedPrecondition
    );
    Ok(())
}
