use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::domain::lead::Slot;
use crate::flows::states::{
    DialogueAction, DialogueContext, DialogueEvent, Phase, TransitionOutcome,
};

pub trait FlowDefinition {
    fn initial_state(&self) -> Phase;
    fn transition(
        &self,
        current: &Phase,
        event: &DialogueEvent,
        context: &DialogueContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>;
}

#[derive(Clone, Debug, Default)]
pub struct LeadCaptureFlow;

impl FlowDefinition for LeadCaptureFlow {
    fn initial_state(&self) -> Phase {
        Phase::Greeting
    }

    fn transition(
        &self,
        current: &Phase,
        event: &DialogueEvent,
        context: &DialogueContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        transition_lead_capture(current, event, context)
    }
}

pub struct FlowEngine<F> {
    flow: F,
}

impl<F> FlowEngine<F>
where
    F: FlowDefinition,
{
    pub fn new(flow: F) -> Self {
        Self { flow }
    }

    pub fn initial_state(&self) -> Phase {
        self.flow.initial_state()
    }

    pub fn apply(
        &self,
        current: &Phase,
        event: &DialogueEvent,
        context: &DialogueContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        self.flow.transition(current, event, context)
    }

    pub fn apply_with_audit<S>(
        &self,
        current: &Phase,
        event: &DialogueEvent,
        context: &DialogueContext,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.apply(current, event, context);
        match &result {
            Ok(outcome) => {
                sink.emit(
                    AuditEvent::new(
                        audit,
                        "dialogue.transition_applied",
                        AuditCategory::Dialogue,
                        AuditOutcome::Success,
                    )
                    .with_metadata("from", outcome.from.as_str())
                    .with_metadata("to", outcome.to.as_str())
                    .with_metadata("event", format!("{:?}", outcome.event)),
                );
            }
            Err(error) => {
                sink.emit(
                    AuditEvent::new(
                        audit,
                        "dialogue.transition_rejected",
                        AuditCategory::Dialogue,
                        AuditOutcome::Rejected,
                    )
                    .with_metadata("error", error.to_string()),
                );
            }
        }
        result
    }
}

impl Default for FlowEngine<LeadCaptureFlow> {
    fn default() -> Self {
        Self::new(LeadCaptureFlow)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("missing required slots before transition from {state:?}: {missing_slots:?}")]
    MissingRequiredSlots { state: Phase, missing_slots: Vec<Slot> },
    #[error("invalid transition from {state:?} using event {event:?}")]
    InvalidTransition { state: Phase, event: DialogueEvent },
}

fn transition_lead_capture(
    current: &Phase,
    event: &DialogueEvent,
    context: &DialogueContext,
) -> Result<TransitionOutcome, FlowTransitionError> {
    use DialogueAction::{
        AnswerFromKnowledge, ApologizeCaptureFailure, ConfirmLead, PromptForSlot, RepromptSlot,
        SendAlreadyCaptured, SendClarification, SendGetStarted, SendSupportFallback, SendWelcome,
    };
    use DialogueEvent::{
        CaptureFailed, Greeted, HighIntentDetected, LeadCaptured, QuestionAsked, RetriesExhausted,
        SlotAccepted, SlotRejected, Unclear,
    };

    let invalid = || FlowTransitionError::InvalidTransition { state: *current, event: event.clone() };
    let awaiting = current.awaiting_slot();

    let (to, actions) = match (current, event) {
        (Phase::Completed, _) => (Phase::Completed, vec![SendAlreadyCaptured]),
        (phase, Greeted) if phase.is_conversational() => (*phase, vec![SendWelcome]),
        (phase, QuestionAsked) if phase.is_conversational() => (*phase, vec![AnswerFromKnowledge]),
        (phase, Unclear) if phase.is_conversational() => (*phase, vec![SendClarification]),
        (phase, HighIntentDetected) if phase.is_conversational() => {
            let next = context.missing_slots.first().copied().ok_or_else(invalid)?;
            (Phase::collecting(next), vec![SendGetStarted, PromptForSlot(next)])
        }
        (_, SlotAccepted(slot)) if awaiting == Some(*slot) => {
            let next = context.missing_slots.first().copied().ok_or_else(invalid)?;
            (Phase::collecting(next), vec![PromptForSlot(next)])
        }
        (phase, SlotRejected(slot)) if awaiting == Some(*slot) => (*phase, vec![RepromptSlot(*slot)]),
        (_, RetriesExhausted(slot)) if awaiting == Some(*slot) => {
            (Phase::Qualifying, vec![SendSupportFallback])
        }
        (_, LeadCaptured) if awaiting.is_some() => {
            if !context.missing_slots.is_empty() {
                return Err(FlowTransitionError::MissingRequiredSlots {
                    state: *current,
                    missing_slots: context.missing_slots.clone(),
                });
            }
            (Phase::Completed, vec![ConfirmLead])
        }
        (phase, CaptureFailed) if awaiting.is_some() => (*phase, vec![ApologizeCaptureFailure]),
        _ => return Err(invalid()),
    };

    Ok(TransitionOutcome { from: *current, to, event: event.clone(), actions })
}
