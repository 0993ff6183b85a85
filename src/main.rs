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

//! FallBand companion daemon.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fallband_companion::alarm::{Collaborators, EngineHandle, EscalationEngine};
use fallband_companion::bluetooth::RfcommConnector;
use fallband_companion::config::Config;
use fallband_companion::notify::{create_dispatcher, create_location_provider};
use fallband_companion::state::{AppState, Notifier};
use fallband_companion::storage::{AddOutcome, AlertLog, ContactStore, Preferences};

#[derive(Parser)]
#[command(name = "fallband")]
#[command(about = "Companion daemon for the FallBand fall-detection wristband")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the band and monitor it (default)
    Run,
    /// Manage emergency contacts
    Contacts {
        #[command(subcommand)]
        action: ContactAction,
    },
    /// Show recent alarm history
    History {
        /// Number of entries to show
        #[arg(short, long, default_value = "20")]
        limit: u32,
    },
}

#[derive(Subcommand)]
enum ContactAction {
    /// List contacts
    List,
    /// Add a contact
    Add {
        /// Display name
        name: String,
        /// Phone number
        number: String,
    },
    /// Remove the contact with this number
    Remove {
        /// Phone number
        number: String,
    },
}

/// A line typed by the operator while monitoring.
#[derive(Debug, PartialEq)]
enum OperatorCommand {
    Connect,
    Disconnect,
    Cancel,
    Status,
    Contacts,
    Add { name: String, number: String },
    Remove(String),
    Help,
    Quit,
}

impl OperatorCommand {
    fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };

        match word.to_lowercase().as_str() {
            "connect" => Some(Self::Connect),
            "disconnect" => Some(Self::Disconnect),
            "cancel" => Some(Self::Cancel),
            "status" => Some(Self::Status),
            "contacts" => Some(Self::Contacts),
            "add" => {
                // The number is the last word; everything before it is the name.
                let (name, number) = rest.rsplit_once(char::is_whitespace)?;
                Some(Self::Add {
                    name: name.trim().to_string(),
                    number: number.to_string(),
                })
            }
            "remove" if !rest.is_empty() => Some(Self::Remove(rest.to_string())),
            "help" | "?" => Some(Self::Help),
            "quit" | "exit" => Some(Self::Quit),
            _ => None,
        }
    }
}

const HELP: &str = "Commands:
  connect              connect to the band
  disconnect           drop the connection
  cancel               ask the band to cancel its alarm
  status               show connection and alarm state
  contacts             list emergency contacts
  add <name> <number>  add an emergency contact
  remove <number>      remove an emergency contact
  quit                 exit";

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("fallband_companion=info".parse()?)
                .add_directive("fallband=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    // Load configuration
    let config = Config::load()?;
    info!("Configuration loaded");

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(config).await,
        Commands::Contacts { action } => manage_contacts(&config, action),
        Commands::History { limit } => show_history(&config, limit),
    }
}

fn open_contacts(config: &Config) -> Result<ContactStore> {
    let prefs = Preferences::open(&config.data_dir)?;
    ContactStore::load(prefs)
}

fn print_contacts(store: &ContactStore) {
    if store.is_empty() {
        println!("No emergency contacts.");
        return;
    }
    for contact in store.contacts() {
        println!("  {}", contact);
    }
}

fn manage_contacts(config: &Config, action: ContactAction) -> Result<()> {
    let mut store = open_contacts(config)?;
    if store.load_failed() {
        println!("Error parsing saved contacts.");
    }

    match action {
        ContactAction::List => print_contacts(&store),
        ContactAction::Add { name, number } => println!("{}", store.add(&name, &number)?.notice()),
        ContactAction::Remove { number } => {
            if store.remove(&number)? {
                println!("Contact deleted.");
            } else {
                println!("No contact with number {}", number);
            }
        }
    }
    Ok(())
}

fn show_history(config: &Config, limit: u32) -> Result<()> {
    let log = AlertLog::new(&config.data_dir)?;
    let entries = log.recent(limit)?;
    if entries.is_empty() {
        println!("No alarm history.");
        return Ok(());
    }

    println!("Showing {} of {} entries", entries.len(), log.count()?);
    for entry in entries {
        println!(
            "#{:<5} {}  {:<13} {}",
            entry.id,
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            entry.kind.as_str(),
            entry.detail
        );
    }
    Ok(())
}

async fn run(config: Config) -> Result<()> {
    info!("Starting FallBand companion v{}...", env!("CARGO_PKG_VERSION"));

    // Initialize storage
    let mut contacts = open_contacts(&config)?;
    let alert_log = AlertLog::new(&config.data_dir)?;
    info!("Storage initialized");

    let (notifier, mut notices) = Notifier::channel();
    if contacts.load_failed() {
        notifier.notify("Error parsing saved contacts.");
    }

    let state = AppState::new();
    let collaborators = Collaborators {
        connector: Arc::new(RfcommConnector::new(
            config.device.name.clone(),
            config.device.rfcomm_channel,
        )),
        location: create_location_provider(&config.location),
        dispatcher: create_dispatcher(&config.sms),
        alert_log: Some(alert_log),
    };

    let (engine, handle) =
        EscalationEngine::new(config.timing(), collaborators, state.clone(), notifier.clone());
    let engine_task = engine.spawn();

    handle.update_contacts(contacts.contacts().to_vec()).await?;
    if config.device.auto_connect {
        handle.connect().await?;
    }

    info!("Ready. Type 'help' for commands.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => {
                        info!("Input closed");
                        break;
                    }
                    Err(e) => {
                        error!("Failed to read input: {}", e);
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                match OperatorCommand::parse(&line) {
                    Some(OperatorCommand::Quit) => break,
                    Some(command) => {
                        let result =
                            handle_command(command, &handle, &state, &mut contacts, &notifier).await;
                        if let Err(e) = result {
                            error!("Command failed: {:#}", e);
                            notifier.notify(format!("Command failed: {:#}", e));
                        }
                    }
                    None => println!("Unknown command: {} (try 'help')", line.trim()),
                }
            }
            Some(notice) = notices.recv() => {
                println!("{}", notice);
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    if let Err(e) = handle.shutdown().await {
        warn!("{:#}", e);
    }
    if let Err(e) = engine_task.await {
        error!("Escalation engine task failed: {}", e);
    }

    info!("FallBand companion stopped");
    Ok(())
}

async fn handle_command(
    command: OperatorCommand,
    handle: &EngineHandle,
    state: &AppState,
    contacts: &mut ContactStore,
    notifier: &Notifier,
) -> Result<()> {
    match command {
        OperatorCommand::Connect => handle.connect().await?,
        OperatorCommand::Disconnect => handle.disconnect().await?,
        OperatorCommand::Cancel => handle.cancel_alarm().await?,
        OperatorCommand::Status => {
            let alarm = state.get_alarm();
            println!(
                "{} ({})",
                state.get_status().as_str(),
                state.get_device_name().unwrap_or_else(|| "-".to_string())
            );
            println!("{}", state.get_status_line());
            println!(
                "Alarm: {} | alerts sent: {} | pending timers: {}",
                alarm.phase.as_str(),
                alarm.alerts_sent,
                alarm.pending_timers
            );
            if let Some(line) = state.get_last_line() {
                println!("Last message: {}", line);
            }
            println!("Emergency contacts: {}", contacts.len());
        }
        OperatorCommand::Contacts => print_contacts(contacts),
        OperatorCommand::Add { name, number } => match contacts.add(&name, &number) {
            Ok(outcome) => {
                notifier.notify(outcome.notice());
                if let AddOutcome::Added(_) = outcome {
                    handle.update_contacts(contacts.contacts().to_vec()).await?;
                }
            }
            Err(e) => {
                error!("Failed to save contact: {:#}", e);
                notifier.notify("Failed to save contact.");
            }
        },
        OperatorCommand::Remove(number) => match contacts.remove(&number) {
            Ok(true) => {
                notifier.notify("Contact deleted.");
                handle.update_contacts(contacts.contacts().to_vec()).await?;
            }
            Ok(false) => notifier.notify(format!("No contact with number {}", number)),
            Err(e) => {
                error!("Failed to delete contact: {:#}", e);
                notifier.notify("Failed to delete contact.");
            }
        },
        OperatorCommand::Help => println!("{}", HELP),
        OperatorCommand::Quit => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_operator_commands() {
        assert_eq!(OperatorCommand::parse("cancel"), Some(OperatorCommand::Cancel));
        assert_eq!(OperatorCommand::parse("  STATUS "), Some(OperatorCommand::Status));
        assert_eq!(
            OperatorCommand::parse("add Aunt May +15550100"),
            Some(OperatorCommand::Add {
                name: "Aunt May".to_string(),
                number: "+15550100".to_string(),
            })
        );
        assert_eq!(
            OperatorCommand::parse("add Alice +15551234567"),
            Some(OperatorCommand::Add {
                name: "Alice".to_string(),
                number: "+15551234567".to_string(),
            })
        );
        assert_eq!(OperatorCommand::parse("add Alice"), None);
        assert_eq!(
            OperatorCommand::parse("remove +15551234567"),
            Some(OperatorCommand::Remove("+15551234567".to_string()))
        );
        assert_eq!(OperatorCommand::parse("remove"), None);
        assert_eq!(OperatorCommand::parse("dance"), None);
    }
}
