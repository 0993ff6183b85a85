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

//! Escalation engine actor.
//!
//! The engine owns the link, the alarm machine and every timer. All other
//! tasks (connect worker, link read/write loops, timers, location lookups)
//! talk to it through one ordered queue of [`EngineInput`]s, so state is
//! only ever touched from the engine task.

use anyhow::{anyhow, Result};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::machine::{AlarmMachine, AlertRound, Effect, EscalationTiming};
use super::message::LocationOutcome;
use crate::bluetooth::{
    ConnectionEvent, DeviceCommand, DeviceEvent, LinkConnector, LinkHandle, LinkReader, LinkWriter,
};
use crate::notify::{fan_out, LocationProvider, MessageDispatcher};
use crate::state::{AlarmView, AppState, Notifier, STATUS_IDLE, STATUS_MONITORING};
use crate::storage::{AlertKind, AlertLog, Contact};

const QUEUE_DEPTH: usize = 64;

/// Messages accepted by the engine.
pub enum EngineInput {
    /// Output of the current (or a previous) link.
    Connection(ConnectionEvent),
    /// Operator asked to connect.
    Connect,
    /// Operator asked to disconnect.
    Disconnect,
    /// Operator asked the band to stop its alarm.
    CancelAlarm,
    /// Fresh copy of the contact list.
    ContactsUpdated(Vec<Contact>),
    /// The connect worker finished.
    Connected {
        link_id: u64,
        result: Result<(LinkReader, LinkWriter), String>,
    },
    /// An escalation timer expired.
    TimerFired { epoch: u64, round: AlertRound },
    /// A location lookup finished.
    LocationResolved {
        epoch: u64,
        round: AlertRound,
        outcome: LocationOutcome,
    },
    Shutdown,
}

impl From<ConnectionEvent> for EngineInput {
    fn from(event: ConnectionEvent) -> Self {
        EngineInput::Connection(event)
    }
}

/// External services the engine depends on.
#[derive(Clone)]
pub struct Collaborators {
    pub connector: Arc<dyn LinkConnector>,
    pub location: Arc<dyn LocationProvider>,
    pub dispatcher: Arc<dyn MessageDispatcher>,
    pub alert_log: Option<AlertLog>,
}

/// Cloneable sender side of the engine queue.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineInput>,
}

impl EngineHandle {
    async fn send(&self, input: EngineInput) -> Result<()> {
        self.tx
            .send(input)
            .await
            .map_err(|_| anyhow!("Escalation engine has stopped"))
    }

    pub async fn connect(&self) -> Result<()> {
        self.send(EngineInput::Connect).await
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.send(EngineInput::Disconnect).await
    }

    pub async fn cancel_alarm(&self) -> Result<()> {
        self.send(EngineInput::CancelAlarm).await
    }

    pub async fn update_contacts(&self, contacts: Vec<Contact>) -> Result<()> {
        self.send(EngineInput::ContactsUpdated(contacts)).await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.send(EngineInput::Shutdown).await
    }
}

enum LinkSlot {
    Down,
    Connecting(u64),
    Up(LinkHandle),
}

/// The escalation engine. Create with [`EscalationEngine::new`] and drive
/// with [`EscalationEngine::run`].
pub struct EscalationEngine {
    machine: AlarmMachine,
    collaborators: Collaborators,
    state: Arc<AppState>,
    notifier: Notifier,
    contacts: Vec<Contact>,
    link: LinkSlot,
    next_link_id: u64,
    /// Timer and lookup tasks of the current epoch.
    tasks: Vec<JoinHandle<()>>,
    tx: mpsc::Sender<EngineInput>,
    rx: mpsc::Receiver<EngineInput>,
}

impl EscalationEngine {
    pub fn new(
        timing: EscalationTiming,
        collaborators: Collaborators,
        state: Arc<AppState>,
        notifier: Notifier,
    ) -> (Self, EngineHandle) {
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        let handle = EngineHandle { tx: tx.clone() };
        let engine = Self {
            machine: AlarmMachine::new(timing),
            collaborators,
            state,
            notifier,
            contacts: Vec::new(),
            link: LinkSlot::Down,
            next_link_id: 0,
            tasks: Vec::new(),
            tx,
            rx,
        };
        (engine, handle)
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Process inputs until shutdown.
    pub async fn run(mut self) {
        info!("Escalation engine started");

        while let Some(input) = self.rx.recv().await {
            if let EngineInput::Shutdown = input {
                break;
            }
            self.handle(input);
            self.publish();
        }

        self.cancel_tasks();
        if let LinkSlot::Up(link) = std::mem::replace(&mut self.link, LinkSlot::Down) {
            link.close();
        }
        self.state.set_disconnected();
        info!("Escalation engine stopped");
    }

    fn handle(&mut self, input: EngineInput) {
        match input {
            EngineInput::Connection(event) => self.handle_connection_event(event),
            EngineInput::Connect => self.start_connect(),
            EngineInput::Disconnect => self.handle_disconnect(),
            EngineInput::CancelAlarm => self.send_cancel(),
            EngineInput::ContactsUpdated(contacts) => {
                debug!("Contact list updated: {} contact(s)", contacts.len());
                self.contacts = contacts;
            }
            EngineInput::Connected { link_id, result } => self.handle_connected(link_id, result),
            EngineInput::TimerFired { epoch, round } => {
                let effects = self.machine.on_timer(epoch, round);
                self.apply(effects);
            }
            EngineInput::LocationResolved {
                epoch,
                round,
                outcome,
            } => {
                let effects = self.machine.on_location(epoch, round, outcome);
                self.apply(effects);
            }
            EngineInput::Shutdown => {}
        }
    }

    fn current_link_id(&self) -> Option<u64> {
        match &self.link {
            LinkSlot::Up(link) => Some(link.id()),
            _ => None,
        }
    }

    fn start_connect(&mut self) {
        match self.link {
            LinkSlot::Down => {}
            LinkSlot::Connecting(_) => {
                debug!("Connect ignored, attempt already running");
                return;
            }
            LinkSlot::Up(_) => {
                debug!("Connect ignored, already connected");
                return;
            }
        }

        self.next_link_id += 1;
        let link_id = self.next_link_id;
        self.link = LinkSlot::Connecting(link_id);
        self.state.set_connecting();

        let connector = self.collaborators.connector.clone();
        let tx = self.tx.clone();
        info!("Connecting to {} (link {})", connector.target(), link_id);

        tokio::spawn(async move {
            let result = connector.connect().await.map_err(|e| format!("{:#}", e));
            let _ = tx.send(EngineInput::Connected { link_id, result }).await;
        });
    }

    fn handle_connected(&mut self, link_id: u64, result: Result<(LinkReader, LinkWriter), String>) {
        if !matches!(self.link, LinkSlot::Connecting(id) if id == link_id) {
            debug!("Dropping result of abandoned connect attempt {}", link_id);
            return;
        }

        let target = self.collaborators.connector.target();
        match result {
            Ok((reader, writer)) => {
                let link = LinkHandle::spawn(link_id, reader, writer, self.tx.clone());
                self.link = LinkSlot::Up(link);
                self.state.set_connected(target.clone());
                self.state.set_status_line(STATUS_MONITORING);
                self.notifier.notify(format!("Connected to {}", target));
            }
            Err(e) => {
                error!("Connection to {} failed: {}", target, e);
                self.link = LinkSlot::Down;
                self.state.set_disconnected();
                self.notifier.notify(format!("Connection failed: {}", e));
            }
        }
    }

    fn handle_connection_event(&mut self, event: ConnectionEvent) {
        if self.current_link_id() != Some(event.link_id()) {
            debug!("Dropping event from stale link {}", event.link_id());
            return;
        }

        match event {
            ConnectionEvent::LineReceived { line, .. } => {
                info!("Received: {}", line);
                let device_event = DeviceEvent::parse(&line);
                self.state.set_last_line(line);
                if device_event != DeviceEvent::Other {
                    let effects = self.machine.on_device_event(device_event);
                    self.apply(effects);
                }
            }
            ConnectionEvent::CommandWritten { result, .. } => match result {
                Ok(()) => self.notifier.notify("Cancel command sent."),
                Err(e) => {
                    error!("Cancel command write failed: {}", e);
                    self.notifier.notify("Failed to send cancel command.");
                    self.link_down();
                }
            },
            ConnectionEvent::Closed { error, .. } => {
                if let Some(e) = error {
                    warn!("Link closed with error: {}", e);
                }
                self.link_down();
            }
        }
    }

    fn handle_disconnect(&mut self) {
        if let LinkSlot::Down = self.link {
            self.notifier.notify("Not connected.");
            return;
        }
        self.link_down();
    }

    fn send_cancel(&mut self) {
        let LinkSlot::Up(link) = &self.link else {
            self.notifier.notify("Not connected.");
            return;
        };

        match link.send_line(DeviceCommand::CancelAlarm.to_line()) {
            Ok(()) => {}
            // The writer is behind; the link itself is still up.
            Err(TrySendError::Full(_)) => {
                warn!("Link {} write queue full, cancel command dropped", link.id());
                self.notifier.notify("Failed to send cancel command.");
            }
            Err(TrySendError::Closed(_)) => {
                error!("Link {} writer is gone, cannot send cancel command", link.id());
                self.notifier.notify("Failed to send cancel command.");
                self.link_down();
            }
        }
    }

    /// Drop the link and force the alarm back to idle.
    fn link_down(&mut self) {
        match std::mem::replace(&mut self.link, LinkSlot::Down) {
            LinkSlot::Up(link) => link.close(),
            LinkSlot::Connecting(id) => debug!("Abandoning connect attempt {}", id),
            LinkSlot::Down => {}
        }

        self.state.set_disconnected();
        self.state.set_status_line(STATUS_IDLE);
        self.notifier.notify("Disconnected");

        let effects = self.machine.on_link_lost();
        self.apply(effects);
    }

    fn cancel_tasks(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }

    fn track(&mut self, task: JoinHandle<()>) {
        self.tasks.retain(|t| !t.is_finished());
        self.tasks.push(task);
    }

    fn apply(&mut self, effects: Vec<Effect>) {
        let mut queue: VecDeque<Effect> = effects.into();

        while let Some(effect) = queue.pop_front() {
            match effect {
                Effect::ArmTimer {
                    round,
                    epoch,
                    delay,
                } => {
                    debug!("Arming {} timer for {:?}", round.as_str(), delay);
                    let tx = self.tx.clone();
                    let task = tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let _ = tx.send(EngineInput::TimerFired { epoch, round }).await;
                    });
                    self.track(task);
                }
                Effect::CancelTimers => self.cancel_tasks(),
                Effect::LookupLocation { round, epoch } => {
                    let location = self.collaborators.location.clone();
                    let tx = self.tx.clone();
                    let task = tokio::spawn(async move {
                        let outcome = LocationOutcome::from_lookup(location.last_known().await);
                        let input = EngineInput::LocationResolved {
                            epoch,
                            round,
                            outcome,
                        };
                        let _ = tx.send(input).await;
                    });
                    self.track(task);
                }
                Effect::Dispatch {
                    round,
                    epoch,
                    message,
                } => {
                    info!("Dispatching {} alert", round.as_str());
                    let report = fan_out(
                        self.collaborators.dispatcher.as_ref(),
                        &self.contacts,
                        &message,
                        &self.notifier,
                    );
                    queue.extend(self.machine.on_round_finished(
                        epoch,
                        round,
                        report.accepted_count(),
                        report.attempted(),
                    ));
                }
                Effect::Status(line) => self.state.set_status_line(line),
                Effect::Record(kind, detail) => self.record(kind, &detail),
            }
        }
    }

    fn record(&self, kind: AlertKind, detail: &str) {
        if let Some(log) = &self.collaborators.alert_log {
            if let Err(e) = log.record(kind, detail) {
                error!("Failed to record {} in alert log: {:#}", kind.as_str(), e);
            }
        }
    }

    fn publish(&self) {
        self.state.set_alarm(AlarmView {
            phase: self.machine.phase(),
            alerts_sent: self.machine.alerts_sent(),
            pending_timers: self.machine.pending_timers(),
            epoch: self.machine.epoch(),
        });
    }
}
