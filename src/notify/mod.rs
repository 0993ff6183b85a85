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

//! Outbound alerting: location lookup and SMS dispatch.

pub mod fanout;
pub mod location;
pub mod sms;

use std::sync::Arc;
use tracing::info;

use crate::config::{LocationConfig, SmsConfig};

pub use fanout::{fan_out, FanOutReport};
pub use location::{Coordinates, FileLocationProvider, FixedLocation, LocationProvider};
pub use sms::{
    split_message, CommandDispatcher, DeliveryStatus, LogDispatcher, MessageDispatcher, PartAck,
    SentStatus,
};

/// Build the configured location provider.
pub fn create_location_provider(config: &LocationConfig) -> Arc<dyn LocationProvider> {
    match (config.latitude, config.longitude) {
        (Some(latitude), Some(longitude)) => {
            info!("Location: fixed at {}, {}", latitude, longitude);
            Arc::new(FixedLocation(Some(Coordinates {
                latitude,
                longitude,
            })))
        }
        _ => {
            info!("Location: reading {:?}", config.file);
            Arc::new(FileLocationProvider::new(&config.file))
        }
    }
}

/// Build the configured SMS dispatcher.
pub fn create_dispatcher(config: &SmsConfig) -> Arc<dyn MessageDispatcher> {
    match config.command.as_deref().map(str::trim) {
        Some(program) if !program.is_empty() => {
            info!("SMS dispatcher: {} {:?}", program, config.args);
            Arc::new(CommandDispatcher::new(program, config.args.clone()))
        }
        _ => {
            info!("SMS dispatcher: none configured, alerts will only be logged");
            Arc::new(LogDispatcher)
        }
    }
}
