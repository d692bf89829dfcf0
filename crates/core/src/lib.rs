pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod flows;
pub mod knowledge;

pub use audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
pub use config::{AppConfig, ConfigError, ConfigOverrides, LlmProvider, LoadOptions};
pub use domain::conversation::{ConversationId, ConversationState, Speaker, Turn};
pub use domain::lead::{LeadAck, LeadId, LeadRecord, Slot, SlotValues};
pub use errors::DomainError;
pub use flows::{DialogueAction, DialogueEvent, FlowEngine, LeadCaptureFlow, Phase};
pub use knowledge::{KnowledgeBase, KnowledgeEntry, KnowledgeError};
