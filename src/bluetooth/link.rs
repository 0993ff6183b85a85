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

//! Serial link to the band.
//!
//! A link is a read task and a write task over the two halves of one
//! stream. Both tasks report back through [`ConnectionEvent`]s tagged with
//! the link id, so the owner can drop events from a link it already closed.

use anyhow::Result;
use futures::future::BoxFuture;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::decoder::LineDecoder;

/// Commands that may wait for the write task.
pub const COMMAND_QUEUE: usize = 8;

/// How long a closed link's writer may keep draining.
pub const CLOSE_DRAIN: Duration = Duration::from_secs(2);

/// Read half of a link stream.
pub type LinkReader = Box<dyn AsyncRead + Send + Unpin>;

/// Write half of a link stream.
pub type LinkWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Opens the underlying stream to the band.
pub trait LinkConnector: Send + Sync {
    /// Human-readable target, used in notices.
    fn target(&self) -> String;

    /// Open a new stream. Runs on a background task.
    fn connect(&self) -> BoxFuture<'static, Result<(LinkReader, LinkWriter)>>;
}

/// Events emitted by a link.
#[derive(Debug)]
pub enum ConnectionEvent {
    /// A decoded protocol line.
    LineReceived { link_id: u64, line: String },
    /// A queued command finished writing.
    CommandWritten {
        link_id: u64,
        result: Result<(), String>,
    },
    /// The stream reached EOF or failed.
    Closed {
        link_id: u64,
        error: Option<String>,
    },
}

impl ConnectionEvent {
    pub fn link_id(&self) -> u64 {
        match self {
            Self::LineReceived { link_id, .. }
            | Self::CommandWritten { link_id, .. }
            | Self::Closed { link_id, .. } => *link_id,
        }
    }
}

/// Handle to a running link.
pub struct LinkHandle {
    id: u64,
    commands: mpsc::Sender<String>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl LinkHandle {
    /// Spawn the read and write tasks for a freshly opened stream.
    pub fn spawn<E>(
        id: u64,
        reader: LinkReader,
        writer: LinkWriter,
        event_tx: mpsc::Sender<E>,
    ) -> Self
    where
        E: From<ConnectionEvent> + Send + 'static,
    {
        let (commands, command_rx) = mpsc::channel(COMMAND_QUEUE);
        let reader = tokio::spawn(read_loop(id, reader, event_tx.clone()));
        let writer = tokio::spawn(write_loop(id, writer, command_rx, event_tx));

        info!("Link {} started", id);
        Self {
            id,
            commands,
            reader,
            writer,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Queue a line for the write task.
    ///
    /// `Full` means the writer is behind and the line was not queued;
    /// `Closed` means the write task is gone.
    pub fn send_line(&self, line: &str) -> Result<(), TrySendError<String>> {
        self.commands.try_send(line.to_string())
    }

    /// Tear the link down.
    ///
    /// The read task is aborted. The write task gets [`CLOSE_DRAIN`] to
    /// flush what is queued and shut its half down, then it is aborted.
    pub fn close(self) {
        info!("Closing link {}", self.id);
        self.reader.abort();
        drop(self.commands);

        let id = self.id;
        let mut writer = self.writer;
        tokio::spawn(async move {
            if tokio::time::timeout(CLOSE_DRAIN, &mut writer).await.is_err() {
                warn!("Link {} writer stalled, aborting", id);
                writer.abort();
            }
        });
    }
}

async fn emit<E: From<ConnectionEvent>>(tx: &mpsc::Sender<E>, event: ConnectionEvent) -> bool {
    tx.send(E::from(event)).await.is_ok()
}

async fn read_loop<E: From<ConnectionEvent>>(
    link_id: u64,
    mut reader: LinkReader,
    event_tx: mpsc::Sender<E>,
) {
    let mut decoder = LineDecoder::new();
    let mut buf = [0u8; 1024];

    loop {
        match reader.read(&mut buf).await {
            Ok(0) => {
                if decoder.pending() > 0 {
                    warn!(
                        "Link {} closed with {} byte(s) of an unterminated line",
                        link_id,
                        decoder.pending()
                    );
                }
                info!("Link {} closed by remote", link_id);
                emit(&event_tx, ConnectionEvent::Closed { link_id, error: None }).await;
                break;
            }
            Ok(n) => {
                for line in decoder.push(&buf[..n]) {
                    debug!("Received: {}", line);
                    let event = ConnectionEvent::LineReceived { link_id, line };
                    if !emit(&event_tx, event).await {
                        return;
                    }
                }
            }
            Err(e) => {
                error!("Error reading from link {}: {}", link_id, e);
                let event = ConnectionEvent::Closed {
                    link_id,
                    error: Some(e.to_string()),
                };
                emit(&event_tx, event).await;
                break;
            }
        }
    }
}

async fn write_loop<E: From<ConnectionEvent>>(
    link_id: u64,
    mut writer: LinkWriter,
    mut commands: mpsc::Receiver<String>,
    event_tx: mpsc::Sender<E>,
) {
    while let Some(line) = commands.recv().await {
        debug!("Sending: {}", line.trim());
        let result = async {
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await
        }
        .await
        .map_err(|e| {
            error!("Failed to write to link {}: {}", link_id, e);
            e.to_string()
        });

        let event = ConnectionEvent::CommandWritten { link_id, result };
        if !emit(&event_tx, event).await {
            break;
        }
    }

    if let Err(e) = writer.shutdown().await {
        warn!("Link {} writer shutdown: {}", link_id, e);
    }
}
