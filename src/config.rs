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

//! Configuration module.
//!
//! Handles loading application settings, writing defaults on first run.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::alarm::EscalationTiming;

const APP_DIR: &str = "fallband";

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
}

fn config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
        .join("config.toml")
}

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Data directory for contacts and the alert log.
    #[serde(skip)]
    pub data_dir: PathBuf,

    /// Band connection settings.
    pub device: DeviceConfig,

    /// Escalation delays.
    pub escalation: EscalationConfig,

    /// SMS gateway settings.
    pub sms: SmsConfig,

    /// Location source.
    pub location: LocationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Paired name (or alias) of the band.
    pub name: String,

    /// RFCOMM channel the band listens on.
    pub rfcomm_channel: u8,

    /// Connect on startup.
    pub auto_connect: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: "ESP32-FallBand".to_string(),
            rfcomm_channel: 1,
            auto_connect: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationConfig {
    /// Seconds from fall detection to the first alert.
    pub initial_delay_secs: u64,

    /// Seconds from the first alert to the follow-up.
    pub follow_up_delay_secs: u64,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            initial_delay_secs: 10,
            follow_up_delay_secs: 60,
        }
    }
}

/// External SMS gateway.
///
/// `command` is run once per message part with the part text on stdin.
/// Every `{number}` in `args` is replaced with the recipient. Without a
/// command, alerts are only logged.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmsConfig {
    pub command: Option<String>,
    pub args: Vec<String>,
}

impl Default for SmsConfig {
    fn default() -> Self {
        Self {
            command: None,
            args: vec!["{number}".to_string()],
        }
    }
}

/// Where the last known location comes from.
///
/// Fixed coordinates win when both are set; otherwise `file` is read as
/// `{"latitude": .., "longitude": ..}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocationConfig {
    pub file: PathBuf,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            file: default_data_dir().join("last_location.json"),
            latitude: None,
            longitude: None,
        }
    }
}

impl Config {
    /// Load configuration from file or create default.
    pub fn load() -> Result<Self> {
        let config_path = config_path();
        if let Some(dir) = config_path.parent() {
            std::fs::create_dir_all(dir)?;
        }

        let mut config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str(&content)
                .with_context(|| format!("Invalid config file {:?}", config_path))?
        } else {
            let config = Self::default();
            let content = toml::to_string_pretty(&config)?;
            std::fs::write(&config_path, content)?;
            config
        };

        config.data_dir = default_data_dir();
        std::fs::create_dir_all(&config.data_dir)?;

        Ok(config)
    }

    pub fn timing(&self) -> EscalationTiming {
        EscalationTiming {
            initial_delay: Duration::from_secs(self.escalation.initial_delay_secs),
            follow_up_delay: Duration::from_secs(self.escalation.follow_up_delay_secs),
        }
    }
}
