use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use autostream_core::audit::{
    AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink, NoopAuditSink,
};
use autostream_core::domain::conversation::{ConversationState, Turn};
use autostream_core::domain::lead::{LeadAck, LeadRecord, Slot};
use autostream_core::flows::{
    DialogueAction, DialogueContext, DialogueEvent, FlowEngine, LeadCaptureFlow, Phase,
};
use autostream_core::knowledge::KnowledgeBase;
use tracing::{debug, info, warn};

use crate::capture::LeadCaptureGateway;
use crate::guardrails::{CollectionIntent, CollectionPolicy, GuardrailDecision};
use crate::intent::{Intent, IntentClassifier};
use crate::llm::LlmClient;
use crate::slots::{known_platforms, SlotExtractor};

pub const WELCOME_MESSAGE: &str = "Hi! I can tell you about pricing or help you sign up for Pro.";
pub const GET_STARTED_MESSAGE: &str = "Awesome, I can help get you started.";
pub const NO_ANSWER_MESSAGE: &str =
    "I don't have that info. I can tell you about our plans, refunds or support.";
pub const CLARIFICATION_MESSAGE: &str =
    "I can help with pricing or sign-up. Ask 'Tell me about pricing' or 'I want to sign up for Pro'.";
pub const ALREADY_CAPTURED_MESSAGE: &str =
    "Your details are already captured. Our team will reach out soon.";

const FREEFORM_INSTRUCTION: &str = "You are the assistant for AutoStream, a video editing SaaS \
     for content creators. Reply in at most two short sentences. If you are unsure, suggest \
     asking about pricing or signing up for the Pro plan.";

/// The first few recognised platforms, as shown in prompts.
fn platform_examples() -> String {
    known_platforms().into_iter().take(3).collect::<Vec<_>>().join(", ")
}

fn slot_prompt(slot: Slot) -> String {
    match slot {
        Slot::Name => "What's your full name?".to_string(),
        Slot::Email => "What's your email address?".to_string(),
        Slot::Platform => {
            format!("Which creator platform do you use? ({}, etc.)", platform_examples())
        }
    }
}

fn slot_reprompt(slot: Slot) -> String {
    match slot {
        Slot::Name => "Sorry, I didn't catch your name. What's your full name?".to_string(),
        Slot::Email => {
            "That doesn't look like a valid email. Please provide a valid email address."
                .to_string()
        }
        Slot::Platform => format!(
            "I don't recognize that platform. Which creator platform do you use? ({}, etc.)",
            platform_examples()
        ),
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TurnReply {
    pub text: String,
    pub phase: Phase,
    pub intent: Option<Intent>,
    pub captured: Option<LeadAck>,
}

impl TurnReply {
    pub fn is_complete(&self) -> bool {
        self.phase.is_terminal()
    }
}

/// What a turn wants to do before the flow table has approved it.
struct TurnPlan {
    event: DialogueEvent,
    context: DialogueContext,
    intent: Option<Intent>,
    commit: Option<(Slot, String)>,
    capture: Option<LeadAck>,
    notes: Vec<String>,
    fallback_message: Option<String>,
}

impl TurnPlan {
    fn new(event: DialogueEvent, context: DialogueContext) -> Self {
        Self {
            event,
            context,
            intent: None,
            commit: None,
            capture: None,
            notes: Vec::new(),
            fallback_message: None,
        }
    }
}

/// Drives one conversation turn at a time. Holds only shared, read-only
/// collaborators, so a single runtime can serve many conversations.
pub struct AgentRuntime {
    classifier: IntentClassifier,
    knowledge: Arc<KnowledgeBase>,
    extractor: SlotExtractor,
    policy: CollectionPolicy,
    gateway: Arc<dyn LeadCaptureGateway>,
    responder: Option<(Arc<dyn LlmClient>, Duration)>,
    audit: Arc<dyn AuditSink>,
    engine: FlowEngine<LeadCaptureFlow>,
}

impl AgentRuntime {
    pub fn new(
        classifier: IntentClassifier,
        knowledge: Arc<KnowledgeBase>,
        gateway: Arc<dyn LeadCaptureGateway>,
    ) -> Result<Self> {
        Ok(Self {
            classifier,
            knowledge,
            extractor: SlotExtractor::new().context("failed to compile slot patterns")?,
            policy: CollectionPolicy::default(),
            gateway,
            responder: None,
            audit: Arc::new(NoopAuditSink),
            engine: FlowEngine::default(),
        })
    }

    pub fn with_policy(mut self, policy: CollectionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    /// Lets unclassifiable messages get a free-form model reply instead of
    /// the canned clarification.
    pub fn with_freeform_responder(mut self, client: Arc<dyn LlmClient>, timeout: Duration) -> Self {
        self.responder = Some((client, timeout));
        self
    }

    pub fn knowledge(&self) -> &KnowledgeBase {
        &self.knowledge
    }

    pub fn oracle_name(&self) -> &'static str {
        self.classifier.oracle_name()
    }

    pub async fn handle_turn(&self, state: &mut ConversationState, text: &str) -> Result<TurnReply> {
        let text = text.trim();
        let prior_history = state.history().to_vec();
        state.record_user_turn(text);

        let audit = AuditContext::new(state.id().clone(), state.turn_count(), "agent");
        let phase = state.phase();
        debug!(
            event_name = "agent.turn_received",
            conversation_id = %state.id().0,
            correlation_id = %audit.correlation_id,
            phase = %phase,
            "user turn received"
        );

        let plan = if phase.is_terminal() {
            TurnPlan::new(DialogueEvent::MessageAfterCompletion, state.dialogue_context())
        } else if let Some(slot) = phase.awaiting_slot() {
            let mut plan = self.plan_slot_turn(state, slot, text, &audit).await?;
            plan.intent = Some(Intent::SlotResponse);
            plan
        } else {
            self.plan_conversational_turn(state, text, &prior_history).await
        };

        let outcome = match self.engine.apply_with_audit(
            &phase,
            &plan.event,
            &plan.context,
            self.audit.as_ref(),
            &audit,
        ) {
            Ok(outcome) => outcome,
            Err(error) => {
                warn!(
                    event_name = "agent.transition_rejected",
                    conversation_id = %state.id().0,
                    correlation_id = %audit.correlation_id,
                    error = %error,
                    "flow rejected turn, replying with clarification"
                );
                state.record_assistant_turn(CLARIFICATION_MESSAGE);
                return Ok(TurnReply {
                    text: CLARIFICATION_MESSAGE.to_string(),
                    phase: state.phase(),
                    intent: plan.intent,
                    captured: None,
                });
            }
        };

        if let Some((slot, value)) = &plan.commit {
            state.fill_slot(*slot, value.clone());
        }
        if let Some(ack) = &plan.capture {
            state.record_capture(ack.clone())?;
        }
        state.apply_transition(&outcome)?;

        let mut parts = plan.notes.clone();
        for action in &outcome.actions {
            parts.push(self.render(action, &outcome.event, &plan, state, text, &audit).await);
        }
        let reply_text = parts.join(" ");
        state.record_assistant_turn(reply_text.clone());

        info!(
            event_name = "agent.turn_completed",
            conversation_id = %state.id().0,
            correlation_id = %audit.correlation_id,
            from = %outcome.from,
            to = %outcome.to,
            intent = plan.intent.map(|intent| intent.label()),
            "turn processed"
        );

        Ok(TurnReply {
            text: reply_text,
            phase: state.phase(),
            intent: plan.intent,
            captured: plan.capture,
        })
    }

    async fn plan_conversational_turn(
        &self,
        state: &ConversationState,
        text: &str,
        history: &[Turn],
    ) -> TurnPlan {
        let intent = self.classifier.classify(text, history).await;
        let event = match intent {
            Intent::Greeting => DialogueEvent::Greeted,
            Intent::PricingInquiry | Intent::KnowledgeQuestion => DialogueEvent::QuestionAsked,
            Intent::HighIntentLead => DialogueEvent::HighIntentDetected,
            Intent::SlotResponse | Intent::Unknown => DialogueEvent::Unclear,
        };
        let mut plan = TurnPlan::new(event, state.dialogue_context());
        plan.intent = Some(intent);
        plan
    }

    async fn plan_slot_turn(
        &self,
        state: &mut ConversationState,
        awaited: Slot,
        text: &str,
        audit: &AuditContext,
    ) -> Result<TurnPlan> {
        let (notes, restated) = self.apply_restatements(state, awaited, text, audit);

        let Some(value) = self.extractor.extract(awaited, text) else {
            if restated {
                let mut plan =
                    TurnPlan::new(DialogueEvent::SlotRejected(awaited), state.dialogue_context());
                plan.notes = notes;
                return Ok(plan);
            }

            let attempts = state.register_slot_failure();
            let decision =
                self.policy.evaluate(&CollectionIntent::RetrySlot { slot: awaited, attempts });
            let mut plan = match decision {
                GuardrailDecision::Allow => {
                    TurnPlan::new(DialogueEvent::SlotRejected(awaited), state.dialogue_context())
                }
                GuardrailDecision::Deny { user_message, .. } => {
                    let mut plan = TurnPlan::new(
                        DialogueEvent::SlotRejected(awaited),
                        state.dialogue_context(),
                    );
                    if !user_message.is_empty() {
                        plan.notes.push(user_message);
                    }
                    plan
                }
                GuardrailDecision::Degrade { user_message, reason_code } => {
                    info!(
                        event_name = "agent.slot_retries_exhausted",
                        conversation_id = %audit.conversation_id.0,
                        correlation_id = %audit.correlation_id,
                        slot = %awaited,
                        attempts,
                        reason_code,
                        "falling back after repeated extraction failures"
                    );
                    let mut plan = TurnPlan::new(
                        DialogueEvent::RetriesExhausted(awaited),
                        state.dialogue_context(),
                    );
                    plan.fallback_message = Some(user_message);
                    plan
                }
            };
            let mut all_notes = notes;
            all_notes.append(&mut plan.notes);
            plan.notes = all_notes;
            return Ok(plan);
        };

        let mut pending = state.slots().clone();
        pending.fill(awaited, value.clone());
        let context = DialogueContext { missing_slots: pending.missing() };

        let mut plan = if let Some(record) = LeadRecord::from_slots(&pending) {
            match self.gateway.capture(&record).await {
                Ok(ack) => {
                    self.audit.emit(
                        AuditEvent::new(
                            audit,
                            "lead.capture_succeeded",
                            AuditCategory::Capture,
                            AuditOutcome::Success,
                        )
                        .with_metadata("gateway", self.gateway.name())
                        .with_metadata("lead_id", ack.lead_id.0.clone()),
                    );
                    let mut plan = TurnPlan::new(DialogueEvent::LeadCaptured, context);
                    plan.commit = Some((awaited, value));
                    plan.capture = Some(ack);
                    plan
                }
                Err(error) => {
                    warn!(
                        event_name = "agent.lead_capture_failed",
                        conversation_id = %audit.conversation_id.0,
                        correlation_id = %audit.correlation_id,
                        gateway = self.gateway.name(),
                        error = %error,
                        "lead capture failed, final slot left uncommitted"
                    );
                    self.audit.emit(
                        AuditEvent::new(
                            audit,
                            "lead.capture_failed",
                            AuditCategory::Capture,
                            AuditOutcome::Failed,
                        )
                        .with_metadata("gateway", self.gateway.name())
                        .with_metadata("error", error.to_string()),
                    );
                    TurnPlan::new(DialogueEvent::CaptureFailed, state.dialogue_context())
                }
            }
        } else {
            let mut plan = TurnPlan::new(DialogueEvent::SlotAccepted(awaited), context);
            plan.commit = Some((awaited, value));
            plan
        };
        plan.notes = notes;
        Ok(plan)
    }

    /// Re-reads already filled slots (other than the awaited one) from `text`
    /// and applies the overwrite policy. Returns notes for the reply and
    /// whether any filled slot was restated, even with an identical value.
    fn apply_restatements(
        &self,
        state: &mut ConversationState,
        awaited: Slot,
        text: &str,
        audit: &AuditContext,
    ) -> (Vec<String>, bool) {
        let mut notes = Vec::new();
        let mut restated = false;
        for slot in [Slot::Email, Slot::Platform] {
            if slot == awaited {
                continue;
            }
            let Some(existing) = state.slots().get(slot).map(str::to_string) else {
                continue;
            };
            let Some(proposed) = self.extractor.extract(slot, text) else {
                continue;
            };
            restated = true;

            let decision = self.policy.evaluate(&CollectionIntent::OverwriteSlot {
                slot,
                existing: &existing,
                proposed: &proposed,
            });
            match decision {
                GuardrailDecision::Allow => {
                    state.fill_slot(slot, proposed);
                    info!(
                        event_name = "agent.slot_overwritten",
                        conversation_id = %audit.conversation_id.0,
                        correlation_id = %audit.correlation_id,
                        slot = %slot,
                        "restated slot replaced the earlier value"
                    );
                    notes.push(format!("Got it, I've updated your {slot}."));
                }
                // A restatement has no fallback phase, so both refusals keep the old value.
                GuardrailDecision::Deny { reason_code, user_message }
                | GuardrailDecision::Degrade { reason_code, user_message } => {
                    debug!(
                        event_name = "agent.slot_overwrite_skipped",
                        conversation_id = %audit.conversation_id.0,
                        correlation_id = %audit.correlation_id,
                        slot = %slot,
                        reason_code,
                        "restated slot left unchanged"
                    );
                    if !user_message.is_empty() {
                        notes.push(user_message);
                    }
                }
            }
        }
        (notes, restated)
    }

    async fn render(
        &self,
        action: &DialogueAction,
        event: &DialogueEvent,
        plan: &TurnPlan,
        state: &ConversationState,
        text: &str,
        audit: &AuditContext,
    ) -> String {
        match action {
            DialogueAction::SendWelcome => WELCOME_MESSAGE.to_string(),
            DialogueAction::AnswerFromKnowledge => self.answer_from_knowledge(text, audit),
            DialogueAction::SendGetStarted => GET_STARTED_MESSAGE.to_string(),
            DialogueAction::PromptForSlot(slot) => match event {
                DialogueEvent::SlotAccepted(Slot::Name) => format!(
                    "Nice to meet you, {}! {}",
                    state.slots().get(Slot::Name).unwrap_or_default(),
                    slot_prompt(*slot)
                ),
                DialogueEvent::SlotAccepted(_) => format!("Thanks. {}", slot_prompt(*slot)),
                _ => slot_prompt(*slot),
            },
            DialogueAction::RepromptSlot(slot) => slot_reprompt(*slot),
            DialogueAction::SendSupportFallback => plan.fallback_message.clone().unwrap_or_else(|| {
                "I'm having trouble collecting your details. Please contact our support team."
                    .to_string()
            }),
            DialogueAction::SendClarification => self.clarify(plan.intent, text, audit).await,
            DialogueAction::ConfirmLead => format!(
                "Thanks {}! Your details are in and our team will reach out soon.",
                state.slots().get(Slot::Name).unwrap_or_default()
            ),
            DialogueAction::ApologizeCaptureFailure => {
                let slot = state.phase().awaiting_slot().unwrap_or(Slot::Platform);
                format!(
                    "Sorry, I couldn't submit your details just now. Please send your {slot} \
                     again to retry."
                )
            }
            DialogueAction::SendAlreadyCaptured => ALREADY_CAPTURED_MESSAGE.to_string(),
        }
    }

    fn answer_from_knowledge(&self, text: &str, audit: &AuditContext) -> String {
        match self.knowledge.best_match(text) {
            Some(found) => {
                self.audit.emit(
                    AuditEvent::new(
                        audit,
                        "knowledge.answered",
                        AuditCategory::Knowledge,
                        AuditOutcome::Success,
                    )
                    .with_metadata("topic", found.entry.topic.clone())
                    .with_metadata("score", found.score.to_string()),
                );
                found.entry.answer.clone()
            }
            None => {
                self.audit.emit(AuditEvent::new(
                    audit,
                    "knowledge.no_match",
                    AuditCategory::Knowledge,
                    AuditOutcome::Rejected,
                ));
                NO_ANSWER_MESSAGE.to_string()
            }
        }
    }

    async fn clarify(&self, intent: Option<Intent>, text: &str, audit: &AuditContext) -> String {
        let Some((client, timeout)) = &self.responder else {
            return CLARIFICATION_MESSAGE.to_string();
        };
        if intent != Some(Intent::Unknown) {
            return CLARIFICATION_MESSAGE.to_string();
        }

        let prompt = format!("{FREEFORM_INSTRUCTION}\n\nUser: {text}\nAssistant:");
        match tokio::time::timeout(*timeout, client.complete(&prompt)).await {
            Ok(Ok(reply)) if !reply.trim().is_empty() => reply.trim().to_string(),
            Ok(Ok(_)) => CLARIFICATION_MESSAGE.to_string(),
            Ok(Err(error)) => {
                warn!(
                    event_name = "agent.freeform_failed",
                    correlation_id = %audit.correlation_id,
                    error = %error,
                    "free-form reply failed, using clarification"
                );
                CLARIFICATION_MESSAGE.to_string()
            }
            Err(_) => {
                warn!(
                    event_name = "agent.freeform_timeout",
                    correlation_id = %audit.correlation_id,
                    "free-form reply timed out, using clarification"
                );
                CLARIFICATION_MESSAGE.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use anyhow::Result;
    use async_trait::async_trait;
    use autostream_core::audit::InMemoryAuditSink;
    use autostream_core::config::SlotOverwritePolicy;
    use autostream_core::domain::conversation::{ConversationState, Turn};
    use autostream_core::domain::lead::{LeadRecord, Slot};
    use autostream_core::flows::Phase;
    use autostream_core::knowledge::{KnowledgeBase, KnowledgeEntry};

    use super::{
        AgentRuntime, ALREADY_CAPTURED_MESSAGE, CLARIFICATION_MESSAGE, NO_ANSWER_MESSAGE,
        WELCOME_MESSAGE,
    };
    use crate::capture::InMemoryLeadCapture;
    use crate::guardrails::CollectionPolicy;
    use crate::intent::{Intent, IntentClassifier, IntentOracle, KeywordIntentOracle};
    use crate::llm::LlmClient;

    const PRICING_ANSWER: &str = "Basic Plan: $29/month, 10 videos/month, 720p. \
         Pro Plan: $79/month, unlimited videos, 4K, AI captions.";

    struct CannedLlm(&'static str);

    #[async_trait]
    impl LlmClient for CannedLlm {
        async fn complete(&self, _prompt: &str) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    /// Says high intent once, then insists everything is a greeting.
    #[derive(Default)]
    struct CountingOracle {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl IntentOracle for CountingOracle {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn label(&self, _text: &str, _history: &[Turn]) -> Result<String> {
            let previous = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(if previous == 0 { "HIGH_INTENT_LEAD" } else { "GREETING" }.to_string())
        }
    }

    fn knowledge() -> Arc<KnowledgeBase> {
        let entry = |topic: &str, question: &str, answer: &str| KnowledgeEntry {
            topic: topic.to_string(),
            question: question.to_string(),
            answer: answer.to_string(),
        };
        Arc::new(KnowledgeBase::new(
            vec![
                entry("pricing", "What is the pricing and cost of each plan?", PRICING_ANSWER),
                entry("refunds", "What is the refund policy?", "No refunds after 7 days."),
                entry("support", "Is 24/7 support available?", "24/7 support is Pro only."),
            ],
            1,
        ))
    }

    fn runtime_with(
        gateway: &InMemoryLeadCapture,
        sink: &InMemoryAuditSink,
        policy: CollectionPolicy,
    ) -> AgentRuntime {
        let classifier =
            IntentClassifier::new(Arc::new(KeywordIntentOracle), Duration::from_secs(1), 6);
        AgentRuntime::new(classifier, knowledge(), Arc::new(gateway.clone()))
            .expect("runtime builds")
            .with_policy(policy)
            .with_audit_sink(Arc::new(sink.clone()))
    }

    fn runtime(gateway: &InMemoryLeadCapture, sink: &InMemoryAuditSink) -> AgentRuntime {
        runtime_with(gateway, sink, CollectionPolicy::default())
    }

    async fn drive(runtime: &AgentRuntime, state: &mut ConversationState, lines: &[&str]) {
        for line in lines {
            runtime.handle_turn(state, line).await.expect("turn succeeds");
        }
    }

    fn nithya() -> LeadRecord {
        LeadRecord {
            name: "Nithya".to_string(),
            email: "nithya@gmail.com".to_string(),
            platform: "YouTube".to_string(),
        }
    }

    #[tokio::test]
    async fn scripted_signup_reaches_completed_with_one_capture() {
        let gateway = InMemoryLeadCapture::default();
        let sink = InMemoryAuditSink::default();
        let runtime = runtime(&gateway, &sink);
        let mut state = ConversationState::default();

        let hi = runtime.handle_turn(&mut state, "Hi").await.expect("hi");
        assert_eq!(hi.text, WELCOME_MESSAGE);
        assert_eq!(hi.intent, Some(Intent::Greeting));
        assert_eq!(hi.phase, Phase::Greeting);

        let pricing = runtime.handle_turn(&mut state, "pricing").await.expect("pricing");
        assert_eq!(pricing.text, PRICING_ANSWER);
        assert_eq!(pricing.phase, Phase::Greeting);

        let signup =
            runtime.handle_turn(&mut state, "I want to sign up for Pro").await.expect("signup");
        assert_eq!(signup.phase, Phase::CollectingName);
        assert!(signup.text.contains("What's your full name?"));

        let name = runtime.handle_turn(&mut state, "Nithya").await.expect("name");
        assert_eq!(name.phase, Phase::CollectingEmail);
        assert!(name.text.contains("Nithya"));

        let email = runtime.handle_turn(&mut state, "nithya@gmail.com").await.expect("email");
        assert_eq!(email.phase, Phase::CollectingPlatform);

        let platform = runtime.handle_turn(&mut state, "YouTube").await.expect("platform");
        assert_eq!(platform.phase, Phase::Completed);
        assert!(platform.is_complete());
        assert!(platform.captured.is_some());
        assert!(platform.text.starts_with("Thanks Nithya!"));

        assert_eq!(state.lead_record(), Some(nithya()));
        assert_eq!(gateway.captured(), vec![nithya()]);
        assert_eq!(state.turn_count(), 6);
        assert_eq!(state.history().len(), 12);
        assert_eq!(sink.events_of_type("lead.capture_succeeded").len(), 1);
        assert_eq!(sink.events_of_type("dialogue.transition_applied").len(), 6);
        assert_eq!(sink.events_of_type("knowledge.answered").len(), 1);
    }

    #[tokio::test]
    async fn replaying_the_script_is_deterministic() {
        for _ in 0..3 {
            let gateway = InMemoryLeadCapture::default();
            let runtime = runtime(&gateway, &InMemoryAuditSink::default());
            let mut state = ConversationState::default();
            drive(
                &runtime,
                &mut state,
                &["Hi", "pricing", "I want to sign up for Pro", "Nithya", "nithya@gmail.com", "YouTube"],
            )
            .await;
            assert_eq!(state.phase(), Phase::Completed);
            assert_eq!(state.lead_record(), Some(nithya()));
            assert_eq!(gateway.attempts(), 1);
        }
    }

    #[tokio::test]
    async fn invalid_email_keeps_phase_and_slots() {
        let gateway = InMemoryLeadCapture::default();
        let runtime = runtime(&gateway, &InMemoryAuditSink::default());
        let mut state = ConversationState::default();
        drive(&runtime, &mut state, &["I want to sign up", "Nithya"]).await;

        let reply = runtime.handle_turn(&mut state, "not-an-email").await.expect("turn");
        assert_eq!(reply.phase, Phase::CollectingEmail);
        assert!(reply.text.contains("valid email"));
        assert_eq!(state.slots().get(Slot::Name), Some("Nithya"));
        assert_eq!(state.slot_retries(), 1);
        assert_eq!(gateway.attempts(), 0);
    }

    #[tokio::test]
    async fn questions_keep_greeting_phase() {
        let runtime = runtime(&InMemoryLeadCapture::default(), &InMemoryAuditSink::default());
        let mut state = ConversationState::default();

        let refund =
            runtime.handle_turn(&mut state, "What is your refund policy?").await.expect("turn");
        assert_eq!(refund.intent, Some(Intent::KnowledgeQuestion));
        assert_eq!(refund.text, "No refunds after 7 days.");
        assert_eq!(refund.phase, Phase::Greeting);

        let cost =
            runtime.handle_turn(&mut state, "Which plan has a cost in yen?").await.expect("turn");
        assert_eq!(cost.phase, Phase::Greeting);
        assert_eq!(cost.text, PRICING_ANSWER);

        let unknown = runtime.handle_turn(&mut state, "tell me a joke").await.expect("turn");
        assert_eq!(unknown.intent, Some(Intent::Unknown));
        assert_eq!(unknown.text, CLARIFICATION_MESSAGE);
        assert_eq!(unknown.phase, Phase::Greeting);
    }

    #[tokio::test]
    async fn knowledge_miss_replies_with_no_answer() {
        let sink = InMemoryAuditSink::default();
        let runtime = runtime(&InMemoryLeadCapture::default(), &sink);
        let mut state = ConversationState::default();

        let reply = runtime.handle_turn(&mut state, "do you support cancel?").await.expect("turn");
        assert_eq!(reply.intent, Some(Intent::KnowledgeQuestion));
        assert_eq!(reply.text, "24/7 support is Pro only.");

        let miss = runtime.handle_turn(&mut state, "cancel anytime?").await.expect("turn");
        assert_eq!(miss.text, NO_ANSWER_MESSAGE);
        assert_eq!(sink.events_of_type("knowledge.no_match").len(), 1);
    }

    #[tokio::test]
    async fn completed_is_terminal() {
        let gateway = InMemoryLeadCapture::default();
        let runtime = runtime(&gateway, &InMemoryAuditSink::default());
        let mut state = ConversationState::default();
        drive(&runtime, &mut state, &["sign up", "Nithya", "nithya@gmail.com", "YouTube"]).await;

        for line in ["Hi", "I want to sign up again", "other@example.com"] {
            let reply = runtime.handle_turn(&mut state, line).await.expect("turn");
            assert_eq!(reply.text, ALREADY_CAPTURED_MESSAGE);
            assert_eq!(reply.phase, Phase::Completed);
        }
        assert_eq!(gateway.attempts(), 1);
        assert_eq!(state.lead_record(), Some(nithya()));
    }

    #[tokio::test]
    async fn exhausted_retries_fall_back_and_resume_later() {
        let gateway = InMemoryLeadCapture::default();
        let sink = InMemoryAuditSink::default();
        let runtime = runtime(&gateway, &sink);
        let mut state = ConversationState::default();
        drive(&runtime, &mut state, &["sign up", "Nithya", "nope", "still no"]).await;
        assert_eq!(state.phase(), Phase::CollectingEmail);

        let fallback = runtime.handle_turn(&mut state, "whatever").await.expect("turn");
        assert_eq!(fallback.phase, Phase::Qualifying);
        assert!(fallback.text.contains("support"));
        assert_eq!(state.slots().get(Slot::Name), Some("Nithya"));
        assert_eq!(state.slot_retries(), 0);

        let pricing = runtime.handle_turn(&mut state, "pricing").await.expect("turn");
        assert_eq!(pricing.phase, Phase::Qualifying);

        let resume = runtime.handle_turn(&mut state, "ok, sign up").await.expect("turn");
        assert_eq!(resume.phase, Phase::CollectingEmail);
        assert!(resume.text.contains("email"));

        drive(&runtime, &mut state, &["nithya@gmail.com", "youtube"]).await;
        assert_eq!(state.phase(), Phase::Completed);
        assert_eq!(gateway.captured(), vec![nithya()]);
    }

    #[tokio::test]
    async fn gateway_failure_keeps_collecting_and_retry_completes() {
        let gateway = InMemoryLeadCapture::failing(1);
        let sink = InMemoryAuditSink::default();
        let runtime = runtime(&gateway, &sink);
        let mut state = ConversationState::default();
        drive(&runtime, &mut state, &["sign up", "Nithya", "nithya@gmail.com"]).await;

        let failed = runtime.handle_turn(&mut state, "YouTube").await.expect("turn");
        assert_eq!(failed.phase, Phase::CollectingPlatform);
        assert!(failed.text.contains("couldn't submit"));
        assert!(failed.captured.is_none());
        assert_eq!(state.slots().get(Slot::Platform), None);
        assert!(state.capture().is_none());
        assert_eq!(sink.events_of_type("lead.capture_failed").len(), 1);

        let retried = runtime.handle_turn(&mut state, "YouTube").await.expect("turn");
        assert_eq!(retried.phase, Phase::Completed);
        assert_eq!(gateway.captured(), vec![nithya()]);
        assert_eq!(gateway.attempts(), 2);
    }

    #[tokio::test]
    async fn restated_email_overwrites_by_default() {
        let runtime = runtime(&InMemoryLeadCapture::default(), &InMemoryAuditSink::default());
        let mut state = ConversationState::default();
        drive(&runtime, &mut state, &["sign up", "Nithya", "old@example.com"]).await;

        let reply = runtime
            .handle_turn(&mut state, "sorry, use nithya@gmail.com instead")
            .await
            .expect("turn");
        assert_eq!(reply.phase, Phase::CollectingPlatform);
        assert!(reply.text.starts_with("Got it, I've updated your email."));
        assert_eq!(state.slots().get(Slot::Email), Some("nithya@gmail.com"));
        assert_eq!(state.slot_retries(), 0);

        runtime.handle_turn(&mut state, "YouTube").await.expect("turn");
        assert_eq!(state.lead_record(), Some(nithya()));
    }

    #[tokio::test]
    async fn restated_email_is_ignored_under_ignore_policy() {
        let policy = CollectionPolicy {
            slot_overwrite: SlotOverwritePolicy::Ignore,
            ..CollectionPolicy::default()
        };
        let runtime =
            runtime_with(&InMemoryLeadCapture::default(), &InMemoryAuditSink::default(), policy);
        let mut state = ConversationState::default();
        drive(&runtime, &mut state, &["sign up", "Nithya", "nithya@gmail.com"]).await;

        let reply = runtime.handle_turn(&mut state, "other@example.com").await.expect("turn");
        assert_eq!(reply.phase, Phase::CollectingPlatform);
        assert!(reply.text.contains("keep the email"));
        assert_eq!(state.slots().get(Slot::Email), Some("nithya@gmail.com"));
    }

    #[tokio::test]
    async fn failed_extraction_never_clears_other_slots() {
        let runtime = runtime(&InMemoryLeadCapture::default(), &InMemoryAuditSink::default());
        let mut state = ConversationState::default();
        drive(&runtime, &mut state, &["sign up", "Nithya", "nithya@gmail.com", "my blog", "???"])
            .await;

        assert_eq!(state.phase(), Phase::CollectingPlatform);
        assert_eq!(state.slots().get(Slot::Name), Some("Nithya"));
        assert_eq!(state.slots().get(Slot::Email), Some("nithya@gmail.com"));
        assert_eq!(state.slots().get(Slot::Platform), None);
    }

    #[tokio::test]
    async fn freeform_responder_answers_unknown_messages() {
        let classifier =
            IntentClassifier::new(Arc::new(KeywordIntentOracle), Duration::from_secs(1), 6);
        let runtime = AgentRuntime::new(
            classifier,
            knowledge(),
            Arc::new(InMemoryLeadCapture::default()),
        )
        .expect("runtime builds")
        .with_freeform_responder(
            Arc::new(CannedLlm("AutoStream edits your videos for you.")),
            Duration::from_secs(1),
        );
        let mut state = ConversationState::default();

        let reply = runtime.handle_turn(&mut state, "what do you do").await.expect("turn");
        assert_eq!(reply.text, "AutoStream edits your videos for you.");
        assert_eq!(reply.phase, Phase::Greeting);
    }

    #[tokio::test]
    async fn collecting_turns_skip_the_oracle_and_report_slot_responses() {
        let oracle = Arc::new(CountingOracle::default());
        let classifier = IntentClassifier::new(oracle.clone(), Duration::from_secs(1), 6);
        let gateway = InMemoryLeadCapture::default();
        let runtime = AgentRuntime::new(classifier, knowledge(), Arc::new(gateway.clone()))
            .expect("runtime builds");
        let mut state = ConversationState::default();

        let start = runtime.handle_turn(&mut state, "sign me").await.expect("turn");
        assert_eq!(start.intent, Some(Intent::HighIntentLead));
        assert_eq!(start.phase, Phase::CollectingName);

        for line in ["Nithya", "nithya@gmail.com", "YouTube"] {
            let reply = runtime.handle_turn(&mut state, line).await.expect("turn");
            assert_eq!(reply.intent, Some(Intent::SlotResponse));
        }

        assert_eq!(oracle.calls.load(Ordering::SeqCst), 1);
        assert_eq!(state.phase(), Phase::Completed);
        assert_eq!(gateway.captured(), vec![nithya()]);
    }

    #[tokio::test]
    async fn identical_restatements_do_not_count_as_retries() {
        let runtime = runtime(&InMemoryLeadCapture::default(), &InMemoryAuditSink::default());
        let mut state = ConversationState::default();
        drive(&runtime, &mut state, &["sign up", "Nithya", "nithya@gmail.com"]).await;

        for _ in 0..4 {
            let reply = runtime.handle_turn(&mut state, "nithya@gmail.com").await.expect("turn");
            assert_eq!(reply.phase, Phase::CollectingPlatform);
            assert!(reply.text.starts_with("I don't recognize that platform."));
        }
        assert_eq!(state.slot_retries(), 0);
        assert_eq!(state.slots().get(Slot::Email), Some("nithya@gmail.com"));
    }

    #[tokio::test]
    async fn platform_prompt_lists_recognised_platforms() {
        let runtime = runtime(&InMemoryLeadCapture::default(), &InMemoryAuditSink::default());
        let mut state = ConversationState::default();
        drive(&runtime, &mut state, &["sign up", "Nithya"]).await;

        let reply = runtime.handle_turn(&mut state, "nithya@gmail.com").await.expect("turn");
        assert_eq!(
            reply.text,
            "Thanks. Which creator platform do you use? (YouTube, Instagram, TikTok, etc.)"
        );
    }
}
