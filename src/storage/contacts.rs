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

//! Emergency contact storage.
//!
//! The whole list is kept as one JSON array under [`CONTACTS_KEY`] and
//! rewritten on every change.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{error, info};

use super::preferences::Preferences;

/// Preference key holding the serialized contact list.
pub const CONTACTS_KEY: &str = "EmergencyContacts";

/// An emergency contact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub name: String,
    pub number: String,
}

impl Contact {
    /// Build a contact from picked details, sanitizing the number.
    ///
    /// Returns `None` when the name is blank or nothing dialable remains.
    pub fn from_picked(name: &str, raw_number: &str) -> Option<Self> {
        let name = name.trim();
        let number = sanitize_number(raw_number);
        if name.is_empty() || number.is_empty() {
            return None;
        }
        Some(Self {
            name: name.to_string(),
            number,
        })
    }
}

impl fmt::Display for Contact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.number)
    }
}

/// Strip everything but digits and `+` from a phone number.
pub fn sanitize_number(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_digit() || *c == '+')
        .collect()
}

/// Result of adding a contact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
    Added(Contact),
    Duplicate,
    Invalid,
}

impl AddOutcome {
    /// User-facing notice for this outcome.
    pub fn notice(&self) -> String {
        match self {
            Self::Added(contact) => format!("Contact added: {}", contact.name),
            Self::Duplicate => "A contact with this number already exists.".to_string(),
            Self::Invalid => "Could not retrieve contact details.".to_string(),
        }
    }
}

/// In-session contact list mirrored to preferences.
pub struct ContactStore {
    prefs: Preferences,
    contacts: Vec<Contact>,
    load_failed: bool,
}

impl ContactStore {
    /// Load the stored list.
    ///
    /// Unreadable data is logged and replaced by an empty list; check
    /// [`ContactStore::load_failed`] to tell the user.
    pub fn load(prefs: Preferences) -> Result<Self> {
        let mut load_failed = false;
        let contacts = match prefs.get(CONTACTS_KEY)? {
            Some(json) if !json.is_empty() => match serde_json::from_str::<Vec<Contact>>(&json) {
                Ok(contacts) => contacts,
                Err(e) => {
                    error!("Error parsing saved contacts: {}", e);
                    load_failed = true;
                    Vec::new()
                }
            },
            _ => Vec::new(),
        };

        info!("Loaded {} emergency contact(s)", contacts.len());
        Ok(Self {
            prefs,
            contacts,
            load_failed,
        })
    }

    /// Whether the stored list had to be discarded on load.
    pub fn load_failed(&self) -> bool {
        self.load_failed
    }

    pub fn contacts(&self) -> &[Contact] {
        &self.contacts
    }

    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }

    /// Add a picked contact unless its number is already present.
    pub fn add(&mut self, name: &str, raw_number: &str) -> Result<AddOutcome> {
        let Some(contact) = Contact::from_picked(name, raw_number) else {
            return Ok(AddOutcome::Invalid);
        };

        if self.contacts.iter().any(|c| c.number == contact.number) {
            return Ok(AddOutcome::Duplicate);
        }

        self.contacts.push(contact.clone());
        if let Err(e) = self.save() {
            self.contacts.pop();
            return Err(e);
        }
        info!("Contact added: {}", contact);
        Ok(AddOutcome::Added(contact))
    }

    /// Remove the contact with this number. Returns whether one was removed.
    pub fn remove(&mut self, raw_number: &str) -> Result<bool> {
        let number = sanitize_number(raw_number);
        let Some(index) = self.contacts.iter().position(|c| c.number == number) else {
            return Ok(false);
        };

        let removed = self.contacts.remove(index);
        if let Err(e) = self.save() {
            self.contacts.insert(index, removed);
            return Err(e);
        }
        info!("Contact deleted: {}", number);
        Ok(true)
    }

    fn save(&self) -> Result<()> {
        let json = serde_json::to_string(&self.contacts)?;
        self.prefs.put(CONTACTS_KEY, &json)
    }
}
