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

//! Emergency message text.

use anyhow::Result;
use tracing::error;

use crate::notify::Coordinates;

/// Body of the first alert.
pub const INITIAL_ALERT: &str = "URGENT: A potential fall has been detected for the wearer.";

/// Body of the second alert.
pub const FOLLOW_UP_ALERT: &str =
    "FOLLOW-UP: This is a second alert. A fall was detected 1 minute ago. Please respond.";

/// What the location lookup produced.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LocationOutcome {
    Found(Coordinates),
    /// The provider answered without a fix.
    Unavailable,
    /// The lookup failed.
    Failed,
}

impl LocationOutcome {
    pub fn from_lookup(result: Result<Option<Coordinates>>) -> Self {
        match result {
            Ok(Some(coords)) => Self::Found(coords),
            Ok(None) => Self::Unavailable,
            Err(e) => {
                error!("Failed to get location: {:#}", e);
                Self::Failed
            }
        }
    }

    /// Text appended to an alert body.
    pub fn block(&self) -> String {
        match self {
            Self::Found(Coordinates {
                latitude,
                longitude,
            }) => format!(
                "\n\nLast known location:\nLat: {lat}\nLong: {long}\n\nView on map: https://maps.google.com/?q={lat},{long}",
                lat = latitude,
                long = longitude
            ),
            Self::Unavailable => "\n\nLocation data was not available.".to_string(),
            Self::Failed => "\n\nCould not retrieve location.".to_string(),
        }
    }
}

/// Append the location block to an alert body.
pub fn compose(base: &str, outcome: &LocationOutcome) -> String {
    format!("{}{}", base, outcome.block())
}
