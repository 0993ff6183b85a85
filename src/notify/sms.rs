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

//! SMS dispatch.
//!
//! A dispatcher accepts a message already split into parts and returns one
//! [`PartAck`] per part. Acceptance is synchronous; the sent and delivered
//! reports arrive later on the ack's one-shot channels. A dropped sender
//! means the dispatcher cannot report that stage.

use anyhow::{anyhow, bail, Result};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

/// Septets in a single-part GSM-7 message.
pub const GSM7_SINGLE: usize = 160;
/// Septets per part of a concatenated GSM-7 message.
pub const GSM7_MULTI: usize = 153;
/// UTF-16 units in a single-part UCS-2 message.
pub const UCS2_SINGLE: usize = 70;
/// UTF-16 units per part of a concatenated UCS-2 message.
pub const UCS2_MULTI: usize = 67;

const GSM7_BASIC: &str = "@£$¥èéùìòÇ\nØø\rÅåΔ_ΦΓΛΩΠΨΣΘΞÆæßÉ !\"#¤%&'()*+,-./0123456789:;<=>?\
¡ABCDEFGHIJKLMNOPQRSTUVWXYZÄÖÑÜ§¿abcdefghijklmnopqrstuvwxyzäöñüà";
const GSM7_EXTENSION: &str = "\u{000C}^{}\\[~]|€";

/// Provider-side send result for one part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentStatus {
    Sent,
    Failed(String),
}

/// Network delivery report for one part.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    Delivered,
    NotDelivered,
}

/// Receiving side of the reports for one message part.
pub struct PartAck {
    pub index: usize,
    pub sent: oneshot::Receiver<SentStatus>,
    pub delivered: oneshot::Receiver<DeliveryStatus>,
}

/// Dispatcher side of the reports for one message part.
pub struct PartReporter {
    pub index: usize,
    sent: Option<oneshot::Sender<SentStatus>>,
    delivered: Option<oneshot::Sender<DeliveryStatus>>,
}

impl PartReporter {
    pub fn sent(&mut self, status: SentStatus) {
        if let Some(tx) = self.sent.take() {
            let _ = tx.send(status);
        }
    }

    pub fn delivered(&mut self, status: DeliveryStatus) {
        if let Some(tx) = self.delivered.take() {
            let _ = tx.send(status);
        }
    }
}

/// Create the report channels for a message of `count` parts.
pub fn part_channels(count: usize) -> (Vec<PartReporter>, Vec<PartAck>) {
    (0..count)
        .map(|index| {
            let (sent_tx, sent_rx) = oneshot::channel();
            let (delivered_tx, delivered_rx) = oneshot::channel();
            (
                PartReporter {
                    index,
                    sent: Some(sent_tx),
                    delivered: Some(delivered_tx),
                },
                PartAck {
                    index,
                    sent: sent_rx,
                    delivered: delivered_rx,
                },
            )
        })
        .unzip()
}

/// Sends text messages to a single recipient.
pub trait MessageDispatcher: Send + Sync {
    fn name(&self) -> &'static str;

    /// Hand a multipart message to the provider.
    ///
    /// `Ok` means the provider accepted it; delivery is reported through
    /// the returned acks.
    fn send_multipart(&self, number: &str, parts: &[String]) -> Result<Vec<PartAck>>;
}

fn gsm7_septets(c: char) -> Option<usize> {
    if GSM7_BASIC.contains(c) {
        Some(1)
    } else if GSM7_EXTENSION.contains(c) {
        Some(2)
    } else {
        None
    }
}

/// Split a message into the parts a carrier will accept.
///
/// Text fully in the GSM-7 alphabet is measured in septets, anything else
/// in UCS-2 code units. Characters are never split across parts.
pub fn split_message(text: &str) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }

    let gsm: Option<Vec<usize>> = text.chars().map(gsm7_septets).collect();
    let (weights, single, multi) = match gsm {
        Some(weights) => (weights, GSM7_SINGLE, GSM7_MULTI),
        None => (
            text.chars().map(char::len_utf16).collect(),
            UCS2_SINGLE,
            UCS2_MULTI,
        ),
    };

    if weights.iter().sum::<usize>() <= single {
        return vec![text.to_string()];
    }

    let mut parts = Vec::new();
    let mut current = String::new();
    let mut used = 0;

    for (c, weight) in text.chars().zip(weights) {
        if used + weight > multi {
            parts.push(std::mem::take(&mut current));
            used = 0;
        }
        current.push(c);
        used += weight;
    }
    if !current.is_empty() {
        parts.push(current);
    }

    parts
}

fn validate_number(number: &str) -> Result<()> {
    let digits = number.strip_prefix('+').unwrap_or(number);
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        bail!("Invalid destination number: {:?}", number);
    }
    Ok(())
}

/// Sends each part by running an external program.
///
/// `{number}` in the arguments is replaced by the recipient and the part
/// text is written to the program's stdin. Exit status 0 counts as sent.
pub struct CommandDispatcher {
    program: String,
    args: Vec<String>,
}

impl CommandDispatcher {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

impl MessageDispatcher for CommandDispatcher {
    fn name(&self) -> &'static str {
        "command"
    }

    fn send_multipart(&self, number: &str, parts: &[String]) -> Result<Vec<PartAck>> {
        validate_number(number)?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| anyhow!("Cannot run {}: {}", self.program, e))?;

        let program = self.program.clone();
        let args: Vec<String> = self
            .args
            .iter()
            .map(|arg| arg.replace("{number}", number))
            .collect();
        let parts = parts.to_vec();
        let (reporters, acks) = part_channels(parts.len());

        runtime.spawn(async move {
            for (mut reporter, part) in reporters.into_iter().zip(parts) {
                let status = run_command(&program, &args, &part).await;
                if let SentStatus::Failed(ref reason) = status {
                    error!("Part {} via {} failed: {}", reporter.index, program, reason);
                }
                reporter.sent(status);
                // Delivery cannot be observed through a command.
            }
        });

        Ok(acks)
    }
}

async fn run_command(program: &str, args: &[String], text: &str) -> SentStatus {
    debug!("Running: {} {:?}", program, args);

    let mut child = match Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
    {
        Ok(child) => child,
        Err(e) => return SentStatus::Failed(format!("Failed to run {}: {}", program, e)),
    };

    if let Some(mut stdin) = child.stdin.take() {
        if let Err(e) = stdin.write_all(text.as_bytes()).await {
            return SentStatus::Failed(format!("Failed to write message: {}", e));
        }
    }

    match child.wait_with_output().await {
        Ok(output) if output.status.success() => SentStatus::Sent,
        Ok(output) => SentStatus::Failed(format!(
            "{} exited with {}: {}",
            program,
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )),
        Err(e) => SentStatus::Failed(e.to_string()),
    }
}

/// Logs messages instead of sending them.
pub struct LogDispatcher;

impl MessageDispatcher for LogDispatcher {
    fn name(&self) -> &'static str {
        "log"
    }

    fn send_multipart(&self, number: &str, parts: &[String]) -> Result<Vec<PartAck>> {
        validate_number(number)?;
        let (reporters, acks) = part_channels(parts.len());

        for (mut reporter, part) in reporters.into_iter().zip(parts) {
            warn!(
                "[dry run] SMS to {} part {}/{}: {}",
                number,
                reporter.index + 1,
                parts.len(),
                part
            );
            reporter.sent(SentStatus::Sent);
        }

        Ok(acks)
    }
}
