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

use async_trait::async_trait;
use imgimport_error::{Error, ResultExt, error_if};
use tracing::{Level, event};

use crate::object::StorageObject;
use crate::storage_client::StorageClient;
use crate::tar_reader::{EntryType, TarReader};
use crate::types::ObjectPath;

/// Unpacks a TAR archive stored in Cloud Storage into individual objects.
#[async_trait]
pub trait TarGcsExtractor: Send + Sync + Debug {
    /// Write every regular file of the archive at `tar_gcs_path` below
    /// `destination_gcs_path`, keeping the paths inside the archive.
    /// Returns the objects written. Objects written before a failure are
    /// left in place.
    async fn extract_tar_to_gcs(
        &self,
        tar_gcs_path: &str,
        destination_gcs_path: &str,
    ) -> Result<Vec<ObjectPath>, Error>;
}

/// Streams the archive entry by entry: one entry is read, copied to its
/// own writer and committed before the next one is looked at.
#[derive(Debug, Clone)]
pub struct StorageTarExtractor {
    storage: StorageClient,
}

impl StorageTarExtractor {
    pub const fn new(storage: StorageClient) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl TarGcsExtractor for StorageTarExtractor {
    async fn extract_tar_to_gcs(
        &self,
        tar_gcs_path: &str,
        destination_gcs_path: &str,
    ) -> Result<Vec<ObjectPath>, Error> {
        let source = ObjectPath::parse(tar_gcs_path)?;
        error_if!(
            source.path.is_empty(),
            "{tar_gcs_path} does not name a tar archive"
        );
        let destination = ObjectPath::parse(destination_gcs_path)?;

        let reader = self
            .storage
            .get_object(&source.bucket, &source.path)
            .new_reader()
            .await
            .err_tip(|| format!("While opening tar archive {tar_gcs_path}"))?;
        let mut archive = TarReader::new(reader);
        let mut written = Vec::new();

        while let Some(entry) = archive
            .next_entry()
            .await
            .err_tip(|| format!("While reading tar archive {tar_gcs_path}"))?
        {
            match entry.entry_type {
                EntryType::Regular => {}
                EntryType::Directory => continue,
                entry_type => {
                    event!(
                        Level::WARN,
                        path = %entry.path,
                        ?entry_type,
                        "Skipping tar entry that is not a regular file"
                    );
                    continue;
                }
            }
            error_if!(
                entry.path.is_empty(),
                "Tar archive {tar_gcs_path} contains a file without a name"
            );

            let target = destination.join(&entry.path);
            let mut writer = self
                .storage
                .get_object(&target.bucket, &target.path)
                .new_writer();
            writer
                .copy_from_reader(&mut archive, self.storage.copy_chunk_size())
                .await
                .err_tip(|| format!("While extracting {} to {target}", entry.path))?;
            writer
                .close()
                .await
                .err_tip(|| format!("While extracting {} to {target}", entry.path))?;
            event!(Level::DEBUG, %target, size = entry.size, "Extracted tar entry");
            written.push(target);
        }

        event!(
            Level::INFO,
            tar_gcs_path,
            destination_gcs_path,
            count = written.len(),
            "Extracted tar archive"
        );
        Ok(written)
    }
}
