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

//! Application state management.

use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

use crate::alarm::AlarmPhase;

pub const STATUS_IDLE: &str = "Status: -";
pub const STATUS_MONITORING: &str = "Status: Monitoring...";
pub const STATUS_FALL_DETECTED: &str = "Status: Fall Detected! Awaiting cancellation...";
pub const STATUS_CANCELLED: &str = "Status: Alarm Cancelled by User.";
pub const STATUS_FREE_FALL: &str = "Status: Possible fall detected, monitoring impact...";
pub const STATUS_ALERT_SENT: &str = "Status: Emergency alert sent.";
pub const STATUS_FOLLOW_UP_SENT: &str = "Status: Follow-up alert sent.";

/// Connection status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Disconnected => "Disconnected",
            ConnectionStatus::Connecting => "Connecting...",
            ConnectionStatus::Connected => "Connected",
        }
    }
}

/// Published view of the alarm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlarmView {
    pub phase: AlarmPhase,
    pub alerts_sent: u32,
    pub pending_timers: usize,
    pub epoch: u64,
}

impl Default for AlarmView {
    fn default() -> Self {
        Self {
            phase: AlarmPhase::Idle,
            alerts_sent: 0,
            pending_timers: 0,
            epoch: 0,
        }
    }
}

/// Shared application state.
///
/// Written only by the escalation engine; everyone else reads.
#[derive(Debug)]
pub struct AppState {
    /// Current connection status.
    pub connection_status: RwLock<ConnectionStatus>,

    /// Connected device name.
    pub connected_device: RwLock<Option<String>>,

    /// Status line shown to the operator.
    pub status_line: RwLock<String>,

    /// Current alarm.
    pub alarm: RwLock<AlarmView>,

    /// Last line received from the band.
    pub last_line: RwLock<Option<String>>,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            connection_status: RwLock::new(ConnectionStatus::Disconnected),
            connected_device: RwLock::new(None),
            status_line: RwLock::new(STATUS_IDLE.to_string()),
            alarm: RwLock::new(AlarmView::default()),
            last_line: RwLock::new(None),
        }
    }
}

impl AppState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_connecting(&self) {
        *self.connection_status.write() = ConnectionStatus::Connecting;
    }

    pub fn set_connected(&self, device_name: String) {
        *self.connection_status.write() = ConnectionStatus::Connected;
        *self.connected_device.write() = Some(device_name);
    }

    pub fn set_disconnected(&self) {
        *self.connection_status.write() = ConnectionStatus::Disconnected;
        *self.connected_device.write() = None;
    }

    pub fn get_status(&self) -> ConnectionStatus {
        *self.connection_status.read()
    }

    pub fn get_device_name(&self) -> Option<String> {
        self.connected_device.read().clone()
    }

    pub fn set_status_line(&self, line: &str) {
        *self.status_line.write() = line.to_string();
    }

    pub fn get_status_line(&self) -> String {
        self.status_line.read().clone()
    }

    pub fn set_alarm(&self, view: AlarmView) {
        *self.alarm.write() = view;
    }

    pub fn get_alarm(&self) -> AlarmView {
        *self.alarm.read()
    }

    pub fn set_last_line(&self, line: String) {
        *self.last_line.write() = Some(line);
    }

    pub fn get_last_line(&self) -> Option<String> {
        self.last_line.read().clone()
    }
}

/// Transient user-facing notifications.
#[derive(Debug, Clone, Default)]
pub struct Notifier {
    tx: Option<mpsc::UnboundedSender<String>>,
}

impl Notifier {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn notify(&self, message: impl Into<String>) {
        let message = message.into();
        info!("Notice: {}", message);
        if let Some(tx) = &self.tx {
            let _ = tx.send(message);
        }
    }
}
