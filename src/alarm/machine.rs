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

//! Alarm escalation state machine.
//!
//! Pure transition logic: every method takes an input, updates the alarm
//! and returns the [`Effect`]s the engine must carry out. Nothing here
//! sleeps or performs I/O.
//!
//! ```text
//!            FALL DETECTED                 initial timer + round ok
//!   Idle ─────────────────► Active(0) ─────────────────────────► Active(1)
//!    ▲                          │                                    │
//!    │   CANCELLED / link lost  │                                    │ follow-up
//!    └──────────────────────────┴────────────────────────────────────┘ timer + round
//! ```
//!
//! Every entry into `Active` and every return to `Idle` bumps the epoch.
//! Timer firings, location results and round results carry the epoch they
//! were started in; anything from an older epoch is dropped. On top of the
//! epoch, each step re-checks that the alarm is still `Active` with the
//! alert count the step was scheduled for.

use std::time::Duration;
use tracing::{debug, info, warn};

use super::message::{compose, LocationOutcome, FOLLOW_UP_ALERT, INITIAL_ALERT};
use crate::bluetooth::DeviceEvent;
use crate::state::{
    STATUS_ALERT_SENT, STATUS_CANCELLED, STATUS_FALL_DETECTED, STATUS_FOLLOW_UP_SENT,
    STATUS_FREE_FALL,
};
use crate::storage::AlertKind;

/// Alarm phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmPhase {
    Idle,
    Active,
}

impl AlarmPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlarmPhase::Idle => "Idle",
            AlarmPhase::Active => "Active",
        }
    }
}

/// One rung of the escalation ladder. Each round has its own timer slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertRound {
    Initial,
    FollowUp,
}

impl AlertRound {
    /// Alerts that must already be out before this round may run.
    fn required_alerts(self) -> u32 {
        match self {
            AlertRound::Initial => 0,
            AlertRound::FollowUp => 1,
        }
    }

    pub fn base_message(self) -> &'static str {
        match self {
            AlertRound::Initial => INITIAL_ALERT,
            AlertRound::FollowUp => FOLLOW_UP_ALERT,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertRound::Initial => "initial",
            AlertRound::FollowUp => "follow-up",
        }
    }
}

/// Delays between escalation steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EscalationTiming {
    /// From fall detection to the first alert.
    pub initial_delay: Duration,
    /// From a successful first alert to the follow-up.
    pub follow_up_delay: Duration,
}

impl Default for EscalationTiming {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(10),
            follow_up_delay: Duration::from_secs(60),
        }
    }
}

/// Work requested by a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Start the timer for `round`.
    ArmTimer {
        round: AlertRound,
        epoch: u64,
        delay: Duration,
    },
    /// Abort every outstanding timer.
    CancelTimers,
    /// Look up the last known location for `round`.
    LookupLocation { round: AlertRound, epoch: u64 },
    /// Send `message` to every contact.
    Dispatch {
        round: AlertRound,
        epoch: u64,
        message: String,
    },
    /// Replace the operator status line.
    Status(&'static str),
    /// Append to the alert log.
    Record(AlertKind, String),
}

/// Alarm state and its escalation bookkeeping.
#[derive(Debug)]
pub struct AlarmMachine {
    timing: EscalationTiming,
    phase: AlarmPhase,
    alerts_sent: u32,
    epoch: u64,
    /// Timer slots armed in the current epoch that have not fired yet.
    armed: Vec<AlertRound>,
}

impl AlarmMachine {
    pub fn new(timing: EscalationTiming) -> Self {
        Self {
            timing,
            phase: AlarmPhase::Idle,
            alerts_sent: 0,
            epoch: 0,
            armed: Vec::new(),
        }
    }

    pub fn phase(&self) -> AlarmPhase {
        self.phase
    }

    pub fn alerts_sent(&self) -> u32 {
        self.alerts_sent
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn pending_timers(&self) -> usize {
        self.armed.len()
    }

    pub fn is_active(&self) -> bool {
        self.phase == AlarmPhase::Active
    }

    /// Apply a decoded line from the band.
    pub fn on_device_event(&mut self, event: DeviceEvent) -> Vec<Effect> {
        match event {
            DeviceEvent::FallDetected => {
                if self.is_active() {
                    debug!("Fall signal ignored, alarm already active");
                    return Vec::new();
                }

                self.epoch += 1;
                self.phase = AlarmPhase::Active;
                self.alerts_sent = 0;
                info!("Fall detected, alarm epoch {}", self.epoch);

                vec![
                    Effect::Status(STATUS_FALL_DETECTED),
                    Effect::Record(AlertKind::FallDetected, format!("epoch {}", self.epoch)),
                    self.arm(AlertRound::Initial),
                ]
            }
            DeviceEvent::Cancelled => {
                if !self.is_active() {
                    debug!("Cancellation while idle, nothing to do");
                    return Vec::new();
                }

                let detail = format!(
                    "epoch {} after {} alert(s)",
                    self.epoch, self.alerts_sent
                );
                self.enter_idle();
                info!("Alarm cancelled by wearer");

                vec![
                    Effect::CancelTimers,
                    Effect::Status(STATUS_CANCELLED),
                    Effect::Record(AlertKind::Cancelled, detail),
                ]
            }
            DeviceEvent::PossibleFreeFall => vec![Effect::Status(STATUS_FREE_FALL)],
            DeviceEvent::Other => Vec::new(),
        }
    }

    /// A timer started in `epoch` for `round` expired.
    pub fn on_timer(&mut self, epoch: u64, round: AlertRound) -> Vec<Effect> {
        if epoch != self.epoch {
            debug!(
                "Dropping {} timer from epoch {} (current {})",
                round.as_str(),
                epoch,
                self.epoch
            );
            return Vec::new();
        }
        self.armed.retain(|r| *r != round);

        if !self.awaiting(round) {
            debug!("{} timer fired but alarm moved on", round.as_str());
            return Vec::new();
        }

        vec![Effect::LookupLocation { round, epoch }]
    }

    /// The location lookup for `round` finished.
    pub fn on_location(
        &mut self,
        epoch: u64,
        round: AlertRound,
        outcome: LocationOutcome,
    ) -> Vec<Effect> {
        if epoch != self.epoch || !self.awaiting(round) {
            debug!(
                "Dropping stale location result for {} round (epoch {})",
                round.as_str(),
                epoch
            );
            return Vec::new();
        }

        vec![Effect::Dispatch {
            round,
            epoch,
            message: compose(round.base_message(), &outcome),
        }]
    }

    /// The fan-out for `round` finished with `accepted` of `attempted`
    /// sends accepted.
    pub fn on_round_finished(
        &mut self,
        epoch: u64,
        round: AlertRound,
        accepted: usize,
        attempted: usize,
    ) -> Vec<Effect> {
        if epoch != self.epoch || !self.awaiting(round) {
            debug!(
                "Dropping stale {} round result (epoch {})",
                round.as_str(),
                epoch
            );
            return Vec::new();
        }

        let detail = format!(
            "{} alert: {} of {} contact(s)",
            round.as_str(),
            accepted,
            attempted
        );

        if accepted == 0 {
            warn!("No {} alert was sent; alarm stays armed", round.as_str());
            return vec![Effect::Record(AlertKind::AlertFailed, detail)];
        }

        match round {
            AlertRound::Initial => {
                self.alerts_sent = 1;
                vec![
                    Effect::Status(STATUS_ALERT_SENT),
                    Effect::Record(AlertKind::AlertSent, detail),
                    self.arm(AlertRound::FollowUp),
                ]
            }
            // Last rung: nothing further is scheduled.
            AlertRound::FollowUp => vec![
                Effect::Status(STATUS_FOLLOW_UP_SENT),
                Effect::Record(AlertKind::AlertSent, detail),
            ],
        }
    }

    /// The link dropped; force the alarm back to idle.
    pub fn on_link_lost(&mut self) -> Vec<Effect> {
        let was_active = self.is_active();
        let detail = format!("epoch {} after {} alert(s)", self.epoch, self.alerts_sent);
        self.enter_idle();

        let mut effects = vec![Effect::CancelTimers];
        if was_active {
            warn!("Link lost during an active alarm");
            effects.push(Effect::Record(AlertKind::LinkLost, detail));
        }
        effects
    }

    fn awaiting(&self, round: AlertRound) -> bool {
        self.is_active() && self.alerts_sent == round.required_alerts()
    }

    fn arm(&mut self, round: AlertRound) -> Effect {
        self.armed.retain(|r| *r != round);
        self.armed.push(round);

        let delay = match round {
            AlertRound::Initial => self.timing.initial_delay,
            AlertRound::FollowUp => self.timing.follow_up_delay,
        };
        Effect::ArmTimer {
            round,
            epoch: self.epoch,
            delay,
        }
    }

    fn enter_idle(&mut self) {
        self.phase = AlarmPhase::Idle;
        self.alerts_sent = 0;
        self.epoch += 1;
        self.armed.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::Coordinates;

    fn machine() -> AlarmMachine {
        AlarmMachine::new(EscalationTiming::default())
    }

    fn timers(effects: &[Effect]) -> Vec<(AlertRound, u64, Duration)> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::ArmTimer {
                    round,
                    epoch,
                    delay,
                } => Some((*round, *epoch, *delay)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_fall_arms_initial_timer() {
        let mut m = machine();
        let effects = m.on_device_event(DeviceEvent::FallDetected);

        assert_eq!(m.phase(), AlarmPhase::Active);
        assert_eq!(m.alerts_sent(), 0);
        assert_eq!(m.pending_timers(), 1);
        assert_eq!(
            timers(&effects),
            vec![(AlertRound::Initial, 1, Duration::from_secs(10))]
        );
        assert!(effects.contains(&Effect::Status(STATUS_FALL_DETECTED)));
    }

    #[test]
    fn test_repeated_fall_is_ignored() {
        let mut m = machine();
        m.on_device_event(DeviceEvent::FallDetected);

        for _ in 0..5 {
            assert!(m.on_device_event(DeviceEvent::FallDetected).is_empty());
        }
        assert_eq!(m.phase(), AlarmPhase::Active);
        assert_eq!(m.alerts_sent(), 0);
        assert_eq!(m.pending_timers(), 1);
        assert_eq!(m.epoch(), 1);
    }

    #[test]
    fn test_cancel_invalidates_initial_timer() {
        let mut m = machine();
        m.on_device_event(DeviceEvent::FallDetected);
        let effects = m.on_device_event(DeviceEvent::Cancelled);

        assert_eq!(effects[0], Effect::CancelTimers);
        assert_eq!(m.phase(), AlarmPhase::Idle);
        assert_eq!(m.pending_timers(), 0);

        // The timer from epoch 1 still fires at its scheduled time.
        assert!(m.on_timer(1, AlertRound::Initial).is_empty());
    }

    #[test]
    fn test_cancel_while_idle_is_noop() {
        let mut m = machine();
        assert!(m.on_device_event(DeviceEvent::Cancelled).is_empty());
        assert_eq!(m.epoch(), 0);
    }

    #[test]
    fn test_free_fall_only_updates_status() {
        let mut m = machine();
        assert_eq!(
            m.on_device_event(DeviceEvent::PossibleFreeFall),
            vec![Effect::Status(STATUS_FREE_FALL)]
        );
        assert_eq!(m.phase(), AlarmPhase::Idle);

        m.on_device_event(DeviceEvent::FallDetected);
        m.on_device_event(DeviceEvent::PossibleFreeFall);
        assert_eq!(m.phase(), AlarmPhase::Active);
        assert_eq!(m.pending_timers(), 1);
    }

    #[test]
    fn test_epoch_isolation() {
        let mut m = machine();
        m.on_device_event(DeviceEvent::FallDetected);
        m.on_device_event(DeviceEvent::Cancelled);
        let effects = m.on_device_event(DeviceEvent::FallDetected);
        let (_, epoch, _) = timers(&effects)[0];
        assert_eq!(epoch, 3);

        assert!(m.on_timer(1, AlertRound::Initial).is_empty());
        assert_eq!(
            m.on_timer(epoch, AlertRound::Initial),
            vec![Effect::LookupLocation {
                round: AlertRound::Initial,
                epoch,
            }]
        );
    }

    #[test]
    fn test_full_ladder() {
        let mut m = machine();
        m.on_device_event(DeviceEvent::FallDetected);
        let epoch = m.epoch();

        m.on_timer(epoch, AlertRound::Initial);
        assert_eq!(m.pending_timers(), 0);

        let coords = Coordinates {
            latitude: 1.5,
            longitude: 2.5,
        };
        let effects = m.on_location(epoch, AlertRound::Initial, LocationOutcome::Found(coords));
        match &effects[..] {
            [Effect::Dispatch { message, .. }] => {
                assert!(message.starts_with(INITIAL_ALERT));
                assert!(message.contains("https://maps.google.com/?q=1.5,2.5"));
            }
            other => panic!("unexpected effects: {:?}", other),
        }

        let effects = m.on_round_finished(epoch, AlertRound::Initial, 2, 3);
        assert_eq!(m.alerts_sent(), 1);
        assert_eq!(
            timers(&effects),
            vec![(AlertRound::FollowUp, epoch, Duration::from_secs(60))]
        );

        assert_eq!(
            m.on_timer(epoch, AlertRound::FollowUp),
            vec![Effect::LookupLocation {
                round: AlertRound::FollowUp,
                epoch,
            }]
        );
        let effects = m.on_location(epoch, AlertRound::FollowUp, LocationOutcome::Failed);
        match &effects[..] {
            [Effect::Dispatch { message, .. }] => {
                assert!(message.starts_with(FOLLOW_UP_ALERT));
                assert!(message.ends_with("Could not retrieve location."));
            }
            other => panic!("unexpected effects: {:?}", other),
        }

        let effects = m.on_round_finished(epoch, AlertRound::FollowUp, 1, 1);
        assert!(timers(&effects).is_empty());
        assert_eq!(m.phase(), AlarmPhase::Active);
        assert_eq!(m.alerts_sent(), 1);
        assert_eq!(m.pending_timers(), 0);
    }

    #[test]
    fn test_failed_round_does_not_advance() {
        let mut m = machine();
        m.on_device_event(DeviceEvent::FallDetected);
        let epoch = m.epoch();
        m.on_timer(epoch, AlertRound::Initial);

        let effects = m.on_round_finished(epoch, AlertRound::Initial, 0, 2);
        assert!(matches!(
            &effects[..],
            [Effect::Record(AlertKind::AlertFailed, _)]
        ));
        assert_eq!(m.alerts_sent(), 0);
        assert_eq!(m.pending_timers(), 0);
        assert_eq!(m.phase(), AlarmPhase::Active);
    }

    #[test]
    fn test_cancel_during_lookup_suppresses_dispatch() {
        let mut m = machine();
        m.on_device_event(DeviceEvent::FallDetected);
        let epoch = m.epoch();
        m.on_timer(epoch, AlertRound::Initial);
        m.on_device_event(DeviceEvent::Cancelled);

        assert!(m
            .on_location(epoch, AlertRound::Initial, LocationOutcome::Unavailable)
            .is_empty());
        assert!(m.on_round_finished(epoch, AlertRound::Initial, 3, 3).is_empty());
        assert_eq!(m.alerts_sent(), 0);
    }

    #[test]
    fn test_follow_up_timer_ignored_if_count_changed() {
        let mut m = machine();
        m.on_device_event(DeviceEvent::FallDetected);
        let epoch = m.epoch();
        // Follow-up may not run before the initial alert went out.
        assert!(m.on_timer(epoch, AlertRound::FollowUp).is_empty());
    }

    #[test]
    fn test_link_lost_forces_idle() {
        let mut m = machine();
        m.on_device_event(DeviceEvent::FallDetected);
        let effects = m.on_link_lost();

        assert_eq!(effects[0], Effect::CancelTimers);
        assert!(matches!(effects[1], Effect::Record(AlertKind::LinkLost, _)));
        assert_eq!(m.phase(), AlarmPhase::Idle);
        assert_eq!(m.pending_timers(), 0);

        let effects = m.on_link_lost();
        assert_eq!(effects, vec![Effect::CancelTimers]);
    }

    #[test]
    fn test_new_epoch_resets_count() {
        let mut m = machine();
        m.on_device_event(DeviceEvent::FallDetected);
        let epoch = m.epoch();
        m.on_timer(epoch, AlertRound::Initial);
        m.on_round_finished(epoch, AlertRound::Initial, 1, 1);
        assert_eq!(m.alerts_sent(), 1);

        m.on_device_event(DeviceEvent::Cancelled);
        m.on_device_event(DeviceEvent::FallDetected);
        assert_eq!(m.alerts_sent(), 0);
        assert_eq!(m.pending_timers(), 1);
    }
}
