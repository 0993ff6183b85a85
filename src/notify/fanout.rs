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

//! Best-effort delivery of one alert to every contact.

use tracing::{debug, error, info, warn};

use super::sms::{split_message, DeliveryStatus, MessageDispatcher, PartAck, SentStatus};
use crate::state::Notifier;
use crate::storage::Contact;

/// Outcome of one fan-out round.
#[derive(Debug, Clone, Default)]
pub struct FanOutReport {
    /// Contacts whose send was accepted by the dispatcher.
    pub accepted: Vec<Contact>,
    /// Contacts whose send was rejected.
    pub failed: Vec<Contact>,
}

impl FanOutReport {
    pub fn accepted_count(&self) -> usize {
        self.accepted.len()
    }

    pub fn attempted(&self) -> usize {
        self.accepted.len() + self.failed.len()
    }
}

/// Send `message` to every contact.
///
/// A rejected send is reported and skipped; it never stops the remaining
/// contacts. Per-part acknowledgements are watched on background tasks and
/// only surface as notices.
pub fn fan_out(
    dispatcher: &dyn MessageDispatcher,
    contacts: &[Contact],
    message: &str,
    notifier: &Notifier,
) -> FanOutReport {
    let mut report = FanOutReport::default();

    if contacts.is_empty() {
        notifier.notify("No emergency contacts to notify!");
        return report;
    }

    let parts = split_message(message);
    debug!(
        "Fanning out {} part(s) to {} contact(s) via {}",
        parts.len(),
        contacts.len(),
        dispatcher.name()
    );

    for contact in contacts {
        info!("Sending multipart SMS to: {}", contact);
        notifier.notify(format!("Sending alert to: {}", contact.name));

        match dispatcher.send_multipart(&contact.number, &parts) {
            Ok(acks) => {
                tokio::spawn(watch_acks(contact.clone(), acks, notifier.clone()));
                report.accepted.push(contact.clone());
            }
            Err(e) => {
                error!("Failed to send SMS to {}: {:#}", contact.name, e);
                notifier.notify(format!(
                    "Failed to send to {}. Check number format.",
                    contact.name
                ));
                report.failed.push(contact.clone());
            }
        }
    }

    info!(
        "Alert accepted for {} of {} contact(s)",
        report.accepted_count(),
        report.attempted()
    );
    report
}

async fn watch_acks(contact: Contact, acks: Vec<PartAck>, notifier: Notifier) {
    for ack in acks {
        match ack.sent.await {
            Ok(SentStatus::Sent) => {
                info!("SMS part {} to {} sent successfully.", ack.index, contact.name);
            }
            Ok(SentStatus::Failed(reason)) => {
                error!("SMS part {} to {} send failed: {}", ack.index, contact.name, reason);
            }
            Err(_) => debug!("No sent report for part {} to {}", ack.index, contact.name),
        }

        match ack.delivered.await {
            Ok(DeliveryStatus::Delivered) => notifier.notify("SMS delivered."),
            Ok(DeliveryStatus::NotDelivered) => {
                warn!("SMS part {} to {} not delivered", ack.index, contact.name);
                notifier.notify("SMS not delivered.");
            }
            Err(_) => debug!("No delivery report for part {} to {}", ack.index, contact.name),
        }
    }
}
