//! Agent runtime for the AutoStream lead assistant.
//!
//! Each user turn flows through a fixed pipeline:
//! 1. **Intent classification** (`intent`): an oracle labels the message,
//!    parsed into a closed `Intent` enum with an `Unknown` fallback.
//! 2. **Knowledge lookup** for pricing and policy questions (core `knowledge`).
//! 3. **Slot extraction** (`slots`) while a lead field is awaited.
//! 4. **Collection policy** (`guardrails`): retry caps and overwrite rules.
//! 5. **Lead capture** (`capture`) once every slot is filled.
//!
//! The language model only labels messages and, optionally, phrases
//! free-form replies. Phase changes are decided by the core flow table.

pub mod audit;
pub mod capture;
pub mod guardrails;
pub mod intent;
pub mod llm;
pub mod runtime;
pub mod slots;

pub use capture::{ConsoleLeadCapture, InMemoryLeadCapture, LeadCaptureGateway};
pub use intent::{Intent, IntentClassifier, IntentOracle, KeywordIntentOracle, LlmIntentOracle};
pub use llm::{GeminiClient, LlmClient};
pub use runtime::{AgentRuntime, TurnReply};
