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

//! Band line protocol definitions.
//!
//! The band sends one event per line. Events are matched by substring so
//! that firmware-side prefixes (timestamps, log tags) are tolerated.

/// Marker sent by the band when an impact following a free fall is detected.
pub const FALL_DETECTED: &str = "FALL DETECTED";

/// Marker sent by the band when the wearer cancelled the alarm.
pub const CANCELLED: &str = "CANCELLED";

/// Marker sent by the band when it sees free fall but no impact yet.
pub const POSSIBLE_FREE_FALL: &str = "POSSIBLE FREE FALL";

/// Events decoded from a single protocol line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceEvent {
    /// A fall was detected; escalation should begin.
    FallDetected,
    /// The wearer cancelled the alarm on the band.
    Cancelled,
    /// Pre-alert; display only.
    PossibleFreeFall,
    /// Anything else the firmware prints.
    Other,
}

impl DeviceEvent {
    /// Classify a decoded line.
    ///
    /// Checks run in priority order, so a line carrying several markers
    /// resolves to the first one listed here.
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.contains(FALL_DETECTED) {
            Self::FallDetected
        } else if line.contains(CANCELLED) {
            Self::Cancelled
        } else if line.contains(POSSIBLE_FREE_FALL) {
            Self::PossibleFreeFall
        } else {
            Self::Other
        }
    }
}

/// Commands the app can send to the band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceCommand {
    /// Ask the band to abort its local alarm.
    CancelAlarm,
}

impl DeviceCommand {
    /// Wire form of the command, newline terminated.
    pub fn to_line(&self) -> &'static str {
        match self {
            Self::CancelAlarm => "CANCEL_ALARM\n",
        }
    }
}
