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

use imgimport_error::{Code, Error};
use imgimport_storage::types::{ObjectPath, validate_bucket_name};
use pretty_assertions::assert_eq;

#[test]
fn parses_gs_and_https_paths() -> Result<(), Error> {
    assert_eq!(
        ObjectPath::parse("gs://bucket/dir/file.tar")?,
        ObjectPath::new("bucket", "dir/file.tar")
    );
    assert_eq!(
        ObjectPath::parse("https://storage.cloud.google.com/bucket/a/b")?,
        ObjectPath::new("bucket", "a/b")
    );
    assert_eq!(
        ObjectPath::parse("https://storage.googleapis.com/bucket/a")?,
        ObjectPath::new("bucket", "a")
    );
    assert_eq!(ObjectPath::parse("gs://bucket")?, ObjectPath::new("bucket", ""));
    assert_eq!(ObjectPath::parse("gs://bucket/")?, ObjectPath::new("bucket", ""));
    Ok(())
}

#[test]
fn rejects_non_storage_paths_and_bad_buckets() {
    for path in [
        "/local/file.tar",
        "s3://bucket/key",
        "gs://",
        "gs://AB/x",
        "gs://-bucket/x",
        "gs://bucket-/x",
        "gs://b/x",
    ] {
        assert_eq!(
            ObjectPath::parse(path).unwrap_err().code,
            Code::InvalidArgument,
            "{path}"
        );
    }
}

#[test]
fn bucket_name_rules() {
    assert!(validate_bucket_name("abc").is_ok());
    assert!(validate_bucket_name("my_bucket.with-dots1").is_ok());
    assert!(validate_bucket_name(&"a".repeat(63)).is_ok());
    assert!(validate_bucket_name(&"a".repeat(64)).is_err());
    let dotted = ["a".repeat(63), "b".repeat(63), "c".repeat(63), "d".repeat(30)].join(".");
    assert_eq!(dotted.len(), 222);
    assert!(validate_bucket_name(&dotted).is_ok());
    assert!(validate_bucket_name(&format!("{dotted}e")).is_err());
    assert!(validate_bucket_name(&format!("{}.abc", "a".repeat(64))).is_err());
    assert!(validate_bucket_name("a..b").is_err());
    assert!(validate_bucket_name("ab").is_err());
    assert!(validate_bucket_name("has space").is_err());
}

#[test]
fn directory_helpers() -> Result<(), Error> {
    let path = ObjectPath::parse("gs://bucket/dest")?;
    assert_eq!(path.directory_prefix(), "dest/");
    assert_eq!(path.join("sub/b.txt"), ObjectPath::new("bucket", "dest/sub/b.txt"));
    assert_eq!(
        ObjectPath::parse("gs://bucket/dest/")?.join("a.txt").gcs_url(),
        "gs://bucket/dest/a.txt"
    );
    assert_eq!(
        ObjectPath::new("bucket", "").join("a.txt"),
        ObjectPath::new("bucket", "a.txt")
    );
    assert_eq!(path.to_string(), "gs://bucket/dest");
    Ok(())
}
