use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::lead::Slot;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Greeting,
    Qualifying,
    CollectingName,
    CollectingEmail,
    CollectingPlatform,
    Completed,
}

impl Phase {
    pub fn collecting(slot: Slot) -> Self {
        match slot {
            Slot::Name => Self::CollectingName,
            Slot::Email => Self::CollectingEmail,
            Slot::Platform => Self::CollectingPlatform,
        }
    }

    /// The slot this phase is waiting on, if it is a collecting phase.
    pub fn awaiting_slot(&self) -> Option<Slot> {
        match self {
            Self::CollectingName => Some(Slot::Name),
            Self::CollectingEmail => Some(Slot::Email),
            Self::CollectingPlatform => Some(Slot::Platform),
            Self::Greeting | Self::Qualifying | Self::Completed => None,
        }
    }

    pub fn is_conversational(&self) -> bool {
        matches!(self, Self::Greeting | Self::Qualifying)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Greeting => "greeting",
            Self::Qualifying => "qualifying",
            Self::CollectingName => "collecting_name",
            Self::CollectingEmail => "collecting_email",
            Self::CollectingPlatform => "collecting_platform",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DialogueEvent {
    Greeted,
    QuestionAsked,
    HighIntentDetected,
    Unclear,
    SlotAccepted(Slot),
    SlotRejected(Slot),
    RetriesExhausted(Slot),
    LeadCaptured,
    CaptureFailed,
    MessageAfterCompletion,
}

/// Slot bookkeeping the transition table needs. `missing_slots` reflects the
/// slots still empty after the current turn's value was stored.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DialogueContext {
    pub missing_slots: Vec<Slot>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DialogueAction {
    SendWelcome,
    AnswerFromKnowledge,
    SendGetStarted,
    PromptForSlot(Slot),
    RepromptSlot(Slot),
    SendSupportFallback,
    SendClarification,
    ConfirmLead,
    ApologizeCaptureFailure,
    SendAlreadyCaptured,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: Phase,
    pub to: Phase,
    pub event: DialogueEvent,
    pub actions: Vec<DialogueAction>,
}
