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

use clap::{Parser, Subcommand};
use imgimport_compute::auth::default_token_provider;
use imgimport_compute::client::ComputeClient;
use imgimport_compute::location::{GceResourceLocationRetriever, ResourceLocationRetriever};
use imgimport_compute::metadata::{MetadataClient, MetadataGce};
use imgimport_compute::resource_deleter::{ComputeResourceDeleter, ResourceDeleter};
use imgimport_compute::types::{Disk, Image};
use imgimport_compute::zone_validator::ComputeZoneValidator;
use imgimport_config::gateway::GatewayConfig;
use imgimport_error::{Code, Error, ResultExt, make_err};
use imgimport_storage::client::GcsClient;
use imgimport_storage::object::StorageObject;
use imgimport_storage::scratch_bucket::{ScratchBucketCreator, StorageScratchBucketCreator};
use imgimport_storage::storage_client::StorageClient;
use imgimport_storage::tar_extractor::{StorageTarExtractor, TarGcsExtractor};
use imgimport_storage::types::ObjectPath;
use imgimport_util::http_client::{HttpClient, ReqwestHttpClient};
use imgimport_util::init_tracing;
use mimalloc::MiMalloc;
use tokio::io::AsyncWriteExt;
use tracing::{Level, event};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// Cloud Storage and Compute Engine helpers for image import workflows.
#[derive(Parser, Debug)]
#[clap(version, about, long_about = None)]
struct Args {
    /// json5 config file. Built-in defaults are used when omitted.
    #[clap(long, value_parser)]
    config: Option<String>,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Unpack a TAR archive stored in Cloud Storage into a directory.
    ExtractTar {
        /// gs://bucket/archive.tar
        source: String,
        /// gs://bucket/directory/
        destination: String,
    },
    /// Find or create the scratch bucket of a project.
    ScratchBucket {
        #[clap(long)]
        project: String,
        /// Object whose bucket is reused or whose location is followed.
        #[clap(long, default_value = "")]
        source_file: String,
        /// Zone whose region is used when the source gives no location.
        #[clap(long, default_value = "")]
        zone: String,
        #[clap(long)]
        uniform_bucket_level_access: bool,
    },
    /// Print the first object below a directory with the given extension.
    Find {
        directory: String,
        extension: String,
        /// Directories to descend below `directory`. Unlimited if omitted.
        #[clap(long)]
        depth: Option<usize>,
    },
    /// Write an object to stdout.
    Cat { path: String },
    /// Delete every object below a path.
    DeletePath { path: String },
    /// Delete images and disks that still exist.
    Cleanup {
        /// projects/PROJECT/global/images/NAME, repeatable.
        #[clap(long = "image")]
        images: Vec<String>,
        /// projects/PROJECT/zones/ZONE/disks/NAME, repeatable.
        #[clap(long = "disk")]
        disks: Vec<String>,
    },
    /// Pick a zone to run next to data stored in a given location.
    Zone {
        /// Defaults to the project of the current instance.
        #[clap(long)]
        project: Option<String>,
        /// Storage location such as `US-CENTRAL1`. Empty uses the zone of
        /// the current instance.
        #[clap(long, default_value = "")]
        storage_region: String,
    },
}

fn load_config(path: Option<&str>) -> Result<GatewayConfig, Error> {
    let Some(path) = path else {
        return Ok(GatewayConfig::default());
    };
    let json_contents = String::from_utf8(
        std::fs::read(path).err_tip(|| format!("Could not open config file {path}"))?,
    )
    .map_err(|e| make_err!(Code::InvalidArgument, "Config file {path} is not UTF-8: {e}"))?;
    serde_json5::from_str(&json_contents)
        .map_err(Error::from)
        .err_tip(|| format!("Could not parse config file {path}"))
}

async fn storage_client(cfg: &GatewayConfig) -> Result<StorageClient, Error> {
    let gcs = GcsClient::new(&cfg.storage)
        .await
        .err_tip(|| "While creating storage client")?;
    Ok(StorageClient::new(Arc::new(gcs), &cfg.storage))
}

/// Compute and metadata clients sharing one token source.
fn compute_clients(
    cfg: &GatewayConfig,
) -> Result<(Arc<ComputeClient>, Arc<MetadataClient>), Error> {
    let http: Arc<dyn HttpClient> = Arc::new(ReqwestHttpClient::new(&cfg.http)?);
    let mut builder = reqwest::Client::builder();
    if cfg.http.timeout_s > 0 {
        builder = builder.timeout(Duration::from_secs(cfg.http.timeout_s));
    }
    let reqwest_client = builder
        .build()
        .map_err(|e| make_err!(Code::Internal, "Failed to build compute HTTP client: {e}"))?;
    let compute = ComputeClient::new(
        &cfg.compute,
        reqwest_client,
        default_token_provider(&cfg.metadata, http.clone()),
    );
    let metadata = MetadataClient::new(&cfg.metadata, http);
    Ok((Arc::new(compute), Arc::new(metadata)))
}

async fn write_line(line: &str) -> Result<(), Error> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await?;
    Ok(())
}

async fn run(args: Args) -> Result<(), Error> {
    let cfg = load_config(args.config.as_deref())?;
    match args.command {
        Command::ExtractTar {
            source,
            destination,
        } => {
            let storage = storage_client(&cfg).await?;
            let written = StorageTarExtractor::new(storage.clone())
                .extract_tar_to_gcs(&source, &destination)
                .await;
            storage.close().await?;
            for path in written? {
                write_line(&path.gcs_url()).await?;
            }
        }
        Command::ScratchBucket {
            project,
            source_file,
            zone,
            uniform_bucket_level_access,
        } => {
            let storage = storage_client(&cfg).await?;
            let (compute, _) = compute_clients(&cfg)?;
            let creator = StorageScratchBucketCreator::new(
                storage.clone(),
                Arc::new(ComputeZoneValidator::new(compute)),
                &cfg.scratch_bucket,
            );
            let bucket = creator
                .create_scratch_bucket(&source_file, &project, &zone, uniform_bucket_level_access)
                .await;
            storage.close().await?;
            let bucket = bucket?;
            write_line(&format!("{} {}", bucket.name, bucket.location)).await?;
        }
        Command::Find {
            directory,
            extension,
            depth,
        } => {
            let storage = storage_client(&cfg).await?;
            let found = match depth {
                Some(depth) => {
                    storage
                        .find_gcs_file_depth_limited(&directory, &extension, depth)
                        .await
                }
                None => storage.find_gcs_file(&directory, &extension).await,
            };
            storage.close().await?;
            write_line(&found?.object_name()).await?;
        }
        Command::Cat { path } => {
            let storage = storage_client(&cfg).await?;
            let path = ObjectPath::parse(&path)?;
            let mut reader = storage
                .get_object(&path.bucket, &path.path)
                .new_reader()
                .await?;
            let mut stdout = tokio::io::stdout();
            let copied = tokio::io::copy(&mut reader, &mut stdout)
                .await
                .err_tip(|| format!("While copying {path} to stdout"))?;
            stdout.flush().await?;
            event!(Level::DEBUG, %path, copied, "Wrote object to stdout");
            storage.close().await?;
        }
        Command::DeletePath { path } => {
            let storage = storage_client(&cfg).await?;
            let deleted = storage.delete_gcs_path(&path).await;
            storage.close().await?;
            deleted?;
        }
        Command::Cleanup { images, disks } => {
            let images = images
                .iter()
                .map(|uri| uri.parse::<Image>())
                .collect::<Result<Vec<_>, _>>()?;
            let disks = disks
                .iter()
                .map(|uri| uri.parse::<Disk>())
                .collect::<Result<Vec<_>, _>>()?;
            let (compute, _) = compute_clients(&cfg)?;
            let deleter = ComputeResourceDeleter::new(compute);
            let image_result = deleter.delete_images_if_exist(&images).await;
            let disk_result = deleter.delete_disks_if_exist(&disks).await;
            match (image_result, disk_result) {
                (Ok(()), Ok(())) => {}
                (Err(err), Ok(())) | (Ok(()), Err(err)) => return Err(err),
                (Err(image_err), Err(disk_err)) => return Err(image_err.merge(disk_err)),
            }
        }
        Command::Zone {
            project,
            storage_region,
        } => {
            let (compute, metadata) = compute_clients(&cfg)?;
            let project = match project {
                Some(project) => project,
                None => metadata
                    .project_id()
                    .await
                    .err_tip(|| "Pass --project when not running on GCE")?,
            };
            let retriever = GceResourceLocationRetriever::new(compute, metadata);
            let zone = retriever.get_zone(&storage_region, &project).await?;
            write_line(&zone).await?;
        }
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn core::error::Error>> {
    init_tracing()?;
    let args = Args::parse();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run(args))?;
    Ok(())
}
