use autostream_core::config::{AgentConfig, SlotOverwritePolicy};
use autostream_core::domain::lead::Slot;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CollectionIntent<'a> {
    /// The awaited slot failed extraction for the `attempts`-th time in a row.
    RetrySlot { slot: Slot, attempts: u32 },
    /// A later turn restated an already filled slot.
    OverwriteSlot { slot: Slot, existing: &'a str, proposed: &'a str },
}

/// `Deny` refuses the change and keeps the conversation where it is;
/// `Degrade` refuses it and sends the conversation to its fallback phase.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GuardrailDecision {
    Allow,
    Deny { reason_code: &'static str, user_message: String },
    Degrade { reason_code: &'static str, user_message: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CollectionPolicy {
    pub max_slot_retries: u32,
    pub slot_overwrite: SlotOverwritePolicy,
}

impl Default for CollectionPolicy {
    fn default() -> Self {
        Self { max_slot_retries: 3, slot_overwrite: SlotOverwritePolicy::Overwrite }
    }
}

impl From<&AgentConfig> for CollectionPolicy {
    fn from(config: &AgentConfig) -> Self {
        Self { max_slot_retries: config.max_slot_retries, slot_overwrite: config.slot_overwrite }
    }
}

impl CollectionPolicy {
    pub fn evaluate(&self, intent: &CollectionIntent<'_>) -> GuardrailDecision {
        match intent {
            CollectionIntent::RetrySlot { attempts, .. } if *attempts < self.max_slot_retries => {
                GuardrailDecision::Allow
            }
            CollectionIntent::RetrySlot { slot, .. } => GuardrailDecision::Degrade {
                reason_code: "slot_retries_exhausted",
                user_message: format!(
                    "I'm having trouble getting your {slot}. Please contact our support team, \
                     or say \"sign up\" whenever you'd like to try again."
                ),
            },
            CollectionIntent::OverwriteSlot { existing, proposed, .. } if existing == proposed => {
                GuardrailDecision::Deny {
                    reason_code: "slot_value_unchanged",
                    user_message: String::new(),
                }
            }
            CollectionIntent::OverwriteSlot { slot, .. } => match self.slot_overwrite {
                SlotOverwritePolicy::Overwrite => GuardrailDecision::Allow,
                SlotOverwritePolicy::Ignore => GuardrailDecision::Deny {
                    reason_code: "slot_overwrite_disabled",
                    user_message: format!("I'll keep the {slot} you gave me earlier."),
                },
            },
        }
    }
}
