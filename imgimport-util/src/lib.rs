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

use std::sync::OnceLock;

use imgimport_error::{Code, Error, make_err};

pub mod http_client;
pub mod mocks;

// Re-export tracing mostly for use in macros.
pub use tracing as __tracing;

/// Initialize tracing.
///
/// Filtering follows `RUST_LOG` and defaults to `WARN`. Returns an error if
/// tracing was already initialized by this function.
pub fn init_tracing() -> Result<(), Error> {
    static INITIALIZED: OnceLock<()> = OnceLock::new();

    if INITIALIZED.set(()).is_err() {
        return Err(make_err!(Code::Internal, "Logging already initialized"));
    }

    let env_filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(tracing::metadata::LevelFilter::WARN.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .pretty()
        .with_timer(tracing_subscriber::fmt::time::time())
        .with_env_filter(env_filter)
        .try_init()
        .map_err(|e| make_err!(Code::Internal, "Failed to install tracing subscriber: {e}"))
}
