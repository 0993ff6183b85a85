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

//! Bluetooth RFCOMM client for the band.

use anyhow::{anyhow, Result};
use bluer::rfcomm::{SocketAddr, Stream};
use bluer::{Adapter, Address};
use futures::future::BoxFuture;
use tracing::{debug, info};
use uuid::Uuid;

use super::link::{LinkConnector, LinkReader, LinkWriter};

/// Standard SPP UUID advertised by the band.
pub const SPP_UUID: Uuid = Uuid::from_u128(0x00001101_0000_1000_8000_00805F9B34FB);

/// Connects to a paired band over RFCOMM.
pub struct RfcommConnector {
    device_name: String,
    channel: u8,
}

impl RfcommConnector {
    pub fn new(device_name: impl Into<String>, channel: u8) -> Self {
        Self {
            device_name: device_name.into(),
            channel,
        }
    }
}

impl LinkConnector for RfcommConnector {
    fn target(&self) -> String {
        self.device_name.clone()
    }

    fn connect(&self) -> BoxFuture<'static, Result<(LinkReader, LinkWriter)>> {
        let device_name = self.device_name.clone();
        let channel = self.channel;

        Box::pin(async move {
            let session = bluer::Session::new().await?;
            let adapter = session.default_adapter().await?;
            info!("Using Bluetooth adapter: {}", adapter.name());

            if !adapter.is_powered().await? {
                return Err(anyhow!("Please enable Bluetooth"));
            }

            let address = find_paired_device(&adapter, &device_name)
                .await?
                .ok_or_else(|| anyhow!("{} not found in paired devices.", device_name))?;

            info!(
                "Connecting to {} ({}) on RFCOMM channel {} (SPP {})",
                device_name, address, channel, SPP_UUID
            );
            let stream = Stream::connect(SocketAddr::new(address, channel)).await?;
            let (reader, writer) = stream.into_split();

            Ok((Box::new(reader) as LinkReader, Box::new(writer) as LinkWriter))
        })
    }
}

/// Find a paired device by name or alias.
async fn find_paired_device(adapter: &Adapter, device_name: &str) -> Result<Option<Address>> {
    for addr in adapter.device_addresses().await? {
        let device = adapter.device(addr)?;
        if !device.is_paired().await? {
            continue;
        }

        let name = device.name().await?.unwrap_or_default();
        let alias = device.alias().await.unwrap_or_else(|_| addr.to_string());
        debug!("Paired device {}: name={:?} alias={:?}", addr, name, alias);

        if name == device_name || alias == device_name {
            return Ok(Some(addr));
        }
    }

    Ok(None)
}
