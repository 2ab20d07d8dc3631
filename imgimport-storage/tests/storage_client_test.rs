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
use std::sync::Arc;

use imgimport_config::gateway::StorageSpec;
use imgimport_error::{Code, Error};
use imgimport_macro::imgimport_test;
use imgimport_storage::iterator::ObjectIterator;
use imgimport_storage::mocks::{FailureMode, MockStorageOperations};
use imgimport_storage::object::StorageObject;
use imgimport_storage::storage_client::StorageClient;
use imgimport_storage::types::{BucketAttrs, BucketAttrsToUpdate, ObjectPath};
use pretty_assertions::assert_eq;

async fn client_with_objects(names: &[&str]) -> (Arc<MockStorageOperations>, StorageClient) {
    let ops = Arc::new(MockStorageOperations::new());
    for name in names {
        ops.add_object(&ObjectPath::new("bucket", *name), name.as_bytes().to_vec())
            .await;
    }
    let client = StorageClient::new(ops.clone(), &StorageSpec::default());
    (ops, client)
}

#[imgimport_test]
async fn create_and_update_bucket() -> Result<(), Error> {
    let ops = Arc::new(MockStorageOperations::new());
    let client = StorageClient::new(ops.clone(), &StorageSpec::default());

    let created = client
        .create_bucket(
            "proj",
            &BucketAttrs::new("scratch", "us-central1").with_uniform_bucket_level_access(true),
        )
        .await?;
    assert_eq!(created.location, "US-CENTRAL1");
    assert_eq!(ops.bucket_project("scratch").await.as_deref(), Some("proj"));

    let updated = client
        .update_bucket(
            "scratch",
            &BucketAttrsToUpdate {
                uniform_bucket_level_access: Some(false),
                labels: Some(HashMap::from([("team".to_string(), "images".to_string())])),
            },
        )
        .await?;
    assert!(!updated.uniform_bucket_level_access);
    assert_eq!(client.get_bucket_attrs("scratch").await?, updated);

    let err = client
        .create_bucket("proj", &BucketAttrs::new("scratch", "US"))
        .await
        .unwrap_err();
    assert_eq!(err.code, Code::AlreadyExists);
    assert_eq!(
        client
            .update_bucket("missing", &BucketAttrsToUpdate::default())
            .await
            .unwrap_err()
            .code,
        Code::NotFound
    );
    Ok(())
}

#[imgimport_test]
async fn bucket_handle_scopes_calls_to_its_bucket() -> Result<(), Error> {
    let (ops, client) = client_with_objects(&["images/a.vmdk", "images/b.vmdk", "logs/c"]).await;
    ops.add_bucket("proj", BucketAttrs::new("bucket", "EU")).await;

    let bucket = client.get_bucket("bucket");
    assert_eq!(bucket.name(), "bucket");
    assert_eq!(bucket.attrs().await?.location, "EU");

    let names: Vec<String> = bucket
        .objects("images/")
        .collect_all()
        .await?
        .into_iter()
        .map(|object| object.name)
        .collect();
    assert_eq!(names, vec!["images/a.vmdk", "images/b.vmdk"]);

    let object = bucket.object("logs/c");
    assert_eq!(object.object_name(), "gs://bucket/logs/c");
    assert_eq!(object.attrs().await?.size, 6);

    let updated = bucket
        .update(&BucketAttrsToUpdate {
            uniform_bucket_level_access: Some(true),
            labels: None,
        })
        .await?;
    assert!(updated.uniform_bucket_level_access);

    assert_eq!(
        client.get_bucket("missing").attrs().await.unwrap_err().code,
        Code::NotFound
    );
    Ok(())
}

#[imgimport_test]
async fn find_file_respects_depth() -> Result<(), Error> {
    let (_, client) = client_with_objects(&[
        "dir/readme.txt",
        "dir/a/b/disk.vmdk",
        "dir/a/c/disk.ovf",
        "dir2/top.ovf",
    ])
    .await;

    let found = client.find_gcs_file("gs://bucket/dir", ".ovf").await?;
    assert_eq!(found.object_name(), "gs://bucket/dir/a/c/disk.ovf");

    let found = client
        .find_gcs_file_depth_limited("gs://bucket/dir/", ".ovf", 2)
        .await?;
    assert_eq!(found.object_path().path, "dir/a/c/disk.ovf");

    let err = client
        .find_gcs_file_depth_limited("gs://bucket/dir", ".ovf", 1)
        .await
        .unwrap_err();
    assert_eq!(err.code, Code::NotFound);

    let found = client
        .find_gcs_file_depth_limited("gs://bucket/dir", ".txt", 0)
        .await?;
    assert_eq!(found.object_path().path, "dir/readme.txt");
    Ok(())
}

#[imgimport_test]
async fn find_file_does_not_match_sibling_directories() -> Result<(), Error> {
    let (_, client) = client_with_objects(&["dir2/x.ovf"]).await;
    let err = client
        .find_gcs_file("gs://bucket/dir", ".ovf")
        .await
        .unwrap_err();
    assert_eq!(err.code, Code::NotFound);
    Ok(())
}

#[imgimport_test]
async fn reads_and_writes_content() -> Result<(), Error> {
    let (ops, client) = client_with_objects(&["hello.txt"]).await;

    let object = client.get_object("bucket", "hello.txt");
    assert_eq!(client.get_gcs_file_content(&object).await?.as_ref(), b"hello.txt");

    let mut source: &[u8] = b"streamed content";
    let attrs = client.write_to_gcs("bucket", "out/copy.txt", &mut source).await?;
    assert_eq!(attrs.size, 16);
    assert_eq!(
        ops.get_content(&ObjectPath::new("bucket", "out/copy.txt"))
            .await
            .as_deref(),
        Some(b"streamed content".as_slice())
    );
    assert_eq!(client.get_object_attrs("bucket", "out/copy.txt").await?, attrs);

    let missing = client.get_object("bucket", "missing");
    assert_eq!(
        client.get_gcs_file_content(&missing).await.unwrap_err().code,
        Code::NotFound
    );
    Ok(())
}

#[imgimport_test]
async fn delete_path_removes_every_page() -> Result<(), Error> {
    let (ops, client) =
        client_with_objects(&["tmp/1", "tmp/2", "tmp/3", "tmp/sub/4", "tmp-keep/important", "keep/5"])
            .await;
    ops.set_page_size(2);

    client.delete_gcs_path("gs://bucket/tmp/").await?;
    assert_eq!(
        ops.object_names("bucket").await,
        vec!["keep/5", "tmp-keep/important"]
    );

    client.delete_gcs_path("gs://bucket/tmp-keep/important").await?;
    assert_eq!(ops.object_names("bucket").await, vec!["keep/5"]);

    client.delete_object("gs://bucket/keep/5").await?;
    assert!(ops.object_names("bucket").await.is_empty());
    assert_eq!(
        client.delete_object("gs://bucket/keep/5").await.unwrap_err().code,
        Code::NotFound
    );
    assert_eq!(
        client.delete_object("gs://bucket").await.unwrap_err().code,
        Code::InvalidArgument
    );
    Ok(())
}

#[imgimport_test]
async fn delete_path_spares_prefix_siblings() -> Result<(), Error> {
    let (ops, client) =
        client_with_objects(&["tmp", "tmp/1", "tmp/sub/2", "tmp-keep/important", "tmpfile"]).await;

    client.delete_gcs_path("gs://bucket/tmp").await?;
    assert_eq!(
        ops.object_names("bucket").await,
        vec!["tmp-keep/important", "tmpfile"]
    );
    Ok(())
}

#[imgimport_test]
async fn backend_errors_keep_their_code() -> Result<(), Error> {
    let (ops, client) = client_with_objects(&["a"]).await;
    ops.set_should_fail(true);
    ops.set_failure_mode(FailureMode::PermissionDenied).await;
    assert_eq!(
        client.get_object_attrs("bucket", "a").await.unwrap_err().code,
        Code::PermissionDenied
    );
    ops.set_failure_mode(FailureMode::NetworkError).await;
    assert_eq!(
        client.get_bucket_attrs("bucket").await.unwrap_err().code,
        Code::Unavailable
    );
    Ok(())
}

#[imgimport_test]
async fn closed_client_fails_with_failed_precondition() -> Result<(), Error> {
    let (ops, client) = client_with_objects(&["a"]).await;
    client.close().await?;
    assert!(ops.is_closed());
    assert_eq!(
        client.get_object_attrs("bucket", "a").await.unwrap_err().code,
        Code::FailedPrecondition
    );
    Ok(())
}
