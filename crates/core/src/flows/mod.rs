pub mod engine;
pub mod states;

pub use engine::{FlowDefinition, FlowEngine, FlowTransitionError, LeadCaptureFlow};
pub use states::{
    DialogueAction, DialogueContext, DialogueEvent, Phase, TransitionOutcome,
};
