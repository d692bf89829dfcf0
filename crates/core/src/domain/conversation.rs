use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::lead::{LeadAck, LeadRecord, Slot, SlotValues};
use crate::errors::DomainError;
use crate::flows::states::{DialogueContext, Phase, TransitionOutcome};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    User,
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub speaker: Speaker,
    pub text: String,
}

/// Per-conversation dialogue state. Owned by the caller and handed to the
/// runtime by `&mut` for exactly one turn at a time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationState {
    id: ConversationId,
    phase: Phase,
    turn_count: u32,
    slots: SlotValues,
    history: Vec<Turn>,
    slot_retries: u32,
    capture: Option<LeadAck>,
}

impl Default for ConversationState {
    fn default() -> Self {
        Self::new(ConversationId::generate())
    }
}

impl ConversationState {
    pub fn new(id: ConversationId) -> Self {
        Self {
            id,
            phase: Phase::Greeting,
            turn_count: 0,
            slots: SlotValues::default(),
            history: Vec::new(),
            slot_retries: 0,
            capture: None,
        }
    }

    pub fn id(&self) -> &ConversationId {
        &self.id
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn turn_count(&self) -> u32 {
        self.turn_count
    }

    pub fn slots(&self) -> &SlotValues {
        &self.slots
    }

    pub fn history(&self) -> &[Turn] {
        &self.history
    }

    pub fn slot_retries(&self) -> u32 {
        self.slot_retries
    }

    pub fn capture(&self) -> Option<&LeadAck> {
        self.capture.as_ref()
    }

    pub fn lead_record(&self) -> Option<LeadRecord> {
        LeadRecord::from_slots(&self.slots)
    }

    pub fn dialogue_context(&self) -> DialogueContext {
        DialogueContext { missing_slots: self.slots.missing() }
    }

    pub fn record_user_turn(&mut self, text: impl Into<String>) {
        self.turn_count = self.turn_count.saturating_add(1);
        self.history.push(Turn { speaker: Speaker::User, text: text.into() });
    }

    pub fn record_assistant_turn(&mut self, text: impl Into<String>) {
        self.history.push(Turn { speaker: Speaker::Assistant, text: text.into() });
    }

    /// Stores a validated slot value. Returns the replaced value, if any.
    pub fn fill_slot(&mut self, slot: Slot, value: impl Into<String>) -> Option<String> {
        self.slots.fill(slot, value)
    }

    /// Counts one more failed extraction for the awaited slot and returns the total.
    pub fn register_slot_failure(&mut self) -> u32 {
        self.slot_retries = self.slot_retries.saturating_add(1);
        self.slot_retries
    }

    pub fn record_capture(&mut self, ack: LeadAck) -> Result<(), DomainError> {
        if self.capture.is_some() {
            return Err(DomainError::InvariantViolation(
                "lead already captured for this conversation".to_string(),
            ));
        }
        if !self.slots.is_complete() {
            return Err(DomainError::InvariantViolation(format!(
                "cannot record capture with missing slots: {:?}",
                self.slots.missing()
            )));
        }
        self.capture = Some(ack);
        Ok(())
    }

    /// Moves to `outcome.to`, checking that the outcome was computed from the
    /// current phase and that completion is backed by a full, captured record.
    pub fn apply_transition(&mut self, outcome: &TransitionOutcome) -> Result<(), DomainError> {
        if outcome.from != self.phase {
            return Err(DomainError::InvalidPhaseTransition { from: self.phase, to: outcome.to });
        }

        if outcome.to == Phase::Completed && (!self.slots.is_complete() || self.capture.is_none())
        {
            return Err(DomainError::InvariantViolation(
                "completed phase requires every slot and a recorded capture".to_string(),
            ));
        }

        if outcome.to != self.phase {
            self.slot_retries = 0;
        }
        self.phase = outcome.to;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::lead::{LeadAck, Slot};
    use crate::errors::DomainError;
    use crate::flows::states::{DialogueEvent, Phase, TransitionOutcome};

    use super::{ConversationId, ConversationState, Speaker};

    fn outcome(from: Phase, to: Phase, event: DialogueEvent) -> TransitionOutcome {
        TransitionOutcome { from, to, event, actions: Vec::new() }
    }

    #[test]
    fn new_state_starts_in_greeting_with_empty_slots() {
        let state = ConversationState::new(ConversationId("conv-1".to_string()));
        assert_eq!(state.phase(), Phase::Greeting);
        assert_eq!(state.turn_count(), 0);
        assert_eq!(state.slots().missing().len(), 3);
        assert!(state.history().is_empty());
        assert!(state.capture().is_none());
    }

    #[test]
    fn turns_are_appended_in_order_and_counted() {
        let mut state = ConversationState::default();
        state.record_user_turn("Hi");
        state.record_assistant_turn("Hello!");
        state.record_user_turn("pricing");

        assert_eq!(state.turn_count(), 2);
        assert_eq!(state.history().len(), 3);
        assert_eq!(state.history()[1].speaker, Speaker::Assistant);
        assert_eq!(state.history()[2].text, "pricing");
    }

    #[test]
    fn stale_outcome_is_rejected() {
        let mut state = ConversationState::default();
        let error = state
            .apply_transition(&outcome(
                Phase::CollectingEmail,
                Phase::CollectingPlatform,
                DialogueEvent::SlotAccepted(Slot::Email),
            ))
            .expect_err("outcome was computed from another phase");
        assert!(matches!(error, DomainError::InvalidPhaseTransition { .. }));
        assert_eq!(state.phase(), Phase::Greeting);
    }

    #[test]
    fn completion_requires_capture() {
        let mut state = ConversationState::default();
        state
            .apply_transition(&outcome(
                Phase::Greeting,
                Phase::CollectingPlatform,
                DialogueEvent::HighIntentDetected,
            ))
            .expect("move to platform");
        state.fill_slot(Slot::Name, "Nithya");
        state.fill_slot(Slot::Email, "nithya@gmail.com");
        state.fill_slot(Slot::Platform, "YouTube");

        let completed =
            outcome(Phase::CollectingPlatform, Phase::Completed, DialogueEvent::LeadCaptured);
        assert!(state.apply_transition(&completed).is_err());

        state.record_capture(LeadAck::issue()).expect("first capture");
        state.apply_transition(&completed).expect("completion with capture");
        assert_eq!(state.phase(), Phase::Completed);
        assert!(state.record_capture(LeadAck::issue()).is_err());
    }

    #[test]
    fn retries_reset_when_phase_changes() {
        let mut state = ConversationState::default();
        state
            .apply_transition(&outcome(
                Phase::Greeting,
                Phase::CollectingEmail,
                DialogueEvent::HighIntentDetected,
            ))
            .expect("collect email");
        assert_eq!(state.register_slot_failure(), 1);
        assert_eq!(state.register_slot_failure(), 2);

        state
            .apply_transition(&outcome(
                Phase::CollectingEmail,
                Phase::CollectingEmail,
                DialogueEvent::SlotRejected(Slot::Email),
            ))
            .expect("same phase");
        assert_eq!(state.slot_retries(), 2);

        state
            .apply_transition(&outcome(
                Phase::CollectingEmail,
                Phase::Qualifying,
                DialogueEvent::RetriesExhausted(Slot::Email),
            ))
            .expect("fallback");
        assert_eq!(state.slot_retries(), 0);
    }
}
