use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A required field of the lead record. Declaration order is collection order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Slot {
    Name,
    Email,
    Platform,
}

impl Slot {
    pub const ALL: [Slot; 3] = [Slot::Name, Slot::Email, Slot::Platform];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Name => "name",
            Self::Email => "email",
            Self::Platform => "platform",
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validated slot values collected so far.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotValues(BTreeMap<Slot, String>);

impl SlotValues {
    pub fn get(&self, slot: Slot) -> Option<&str> {
        self.0.get(&slot).map(String::as_str)
    }

    pub fn is_filled(&self, slot: Slot) -> bool {
        self.0.contains_key(&slot)
    }

    /// Stores `value` and returns the value it replaced, if any.
    pub fn fill(&mut self, slot: Slot, value: impl Into<String>) -> Option<String> {
        self.0.insert(slot, value.into())
    }

    pub fn missing(&self) -> Vec<Slot> {
        Slot::ALL.into_iter().filter(|slot| !self.is_filled(*slot)).collect()
    }

    pub fn next_missing(&self) -> Option<Slot> {
        Slot::ALL.into_iter().find(|slot| !self.is_filled(*slot))
    }

    pub fn is_complete(&self) -> bool {
        self.next_missing().is_none()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadRecord {
    pub name: String,
    pub email: String,
    pub platform: String,
}

impl LeadRecord {
    pub fn from_slots(slots: &SlotValues) -> Option<Self> {
        Some(Self {
            name: slots.get(Slot::Name)?.to_string(),
            email: slots.get(Slot::Email)?.to_string(),
            platform: slots.get(Slot::Platform)?.to_string(),
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeadId(pub String);

/// Acknowledgement returned by a lead capture backend.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadAck {
    pub lead_id: LeadId,
    pub captured_at: DateTime<Utc>,
}

impl LeadAck {
    pub fn issue() -> Self {
        Self { lead_id: LeadId(Uuid::new_v4().to_string()), captured_at: Utc::now() }
    }
}
