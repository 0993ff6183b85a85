// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Last-known location lookup.

use anyhow::{Context, Result};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::PathBuf;
use tracing::debug;

/// A latitude/longitude pair in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

/// Best-effort source of the wearer's last known position.
///
/// `Ok(None)` means the provider answered but has no fix; `Err` means the
/// lookup itself failed.
pub trait LocationProvider: Send + Sync {
    fn last_known(&self) -> BoxFuture<'_, Result<Option<Coordinates>>>;
}

/// Reads the last fix from a JSON file kept up to date by another process.
pub struct FileLocationProvider {
    path: PathBuf,
}

impl FileLocationProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl LocationProvider for FileLocationProvider {
    fn last_known(&self) -> BoxFuture<'_, Result<Option<Coordinates>>> {
        Box::pin(async move {
            let content = match tokio::fs::read_to_string(&self.path).await {
                Ok(content) => content,
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    debug!("No location file at {:?}", self.path);
                    return Ok(None);
                }
                Err(e) => {
                    return Err(e).with_context(|| format!("reading {:?}", self.path));
                }
            };

            let coords: Coordinates = serde_json::from_str(&content)
                .with_context(|| format!("parsing location from {:?}", self.path))?;
            Ok(Some(coords))
        })
    }
}

/// Fixed coordinates from configuration.
pub struct FixedLocation(pub Option<Coordinates>);

impl LocationProvider for FixedLocation {
    fn last_known(&self) -> BoxFuture<'_, Result<Option<Coordinates>>> {
        let coords = self.0;
        Box::pin(async move { Ok(coords) })
    }
}
