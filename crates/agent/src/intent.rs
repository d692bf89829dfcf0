use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use autostream_core::domain::conversation::{Speaker, Turn};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::llm::LlmClient;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Intent {
    Greeting,
    PricingInquiry,
    HighIntentLead,
    KnowledgeQuestion,
    SlotResponse,
    Unknown,
}

impl Intent {
    pub const ALL: [Intent; 6] = [
        Intent::Greeting,
        Intent::PricingInquiry,
        Intent::HighIntentLead,
        Intent::KnowledgeQuestion,
        Intent::SlotResponse,
        Intent::Unknown,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Self::Greeting => "GREETING",
            Self::PricingInquiry => "PRICING_INQUIRY",
            Self::HighIntentLead => "HIGH_INTENT_LEAD",
            Self::KnowledgeQuestion => "KNOWLEDGE_QUESTION",
            Self::SlotResponse => "SLOT_RESPONSE",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Maps raw oracle output onto the closed intent set. Never fails.
pub fn parse_intent_label(raw: &str) -> Intent {
    let normalized = raw
        .trim()
        .chars()
        .map(|character| match character {
            ' ' | '-' => '_',
            other => other.to_ascii_uppercase(),
        })
        .collect::<String>();

    if let Some(exact) = Intent::ALL.into_iter().find(|intent| intent.label() == normalized) {
        return exact;
    }

    Intent::ALL
        .into_iter()
        .filter_map(|intent| normalized.find(intent.label()).map(|position| (position, intent)))
        .min_by_key(|(position, _)| *position)
        .map(|(_, intent)| intent)
        .unwrap_or(Intent::Unknown)
}

/// Black-box labeller behind the classifier.
#[async_trait]
pub trait IntentOracle: Send + Sync {
    fn name(&self) -> &'static str;
    async fn label(&self, text: &str, history: &[Turn]) -> Result<String>;
}

pub struct LlmIntentOracle {
    client: Arc<dyn LlmClient>,
}

impl LlmIntentOracle {
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl IntentOracle for LlmIntentOracle {
    fn name(&self) -> &'static str {
        "llm"
    }

    async fn label(&self, text: &str, history: &[Turn]) -> Result<String> {
        self.client.complete(&classification_prompt(text, history)).await
    }
}

pub fn classification_prompt(text: &str, history: &[Turn]) -> String {
    let mut prompt = String::from(
        "You classify messages sent to AutoStream, a video editing SaaS for content creators.\n\
         Reply with exactly one label and nothing else:\n\
         GREETING - a hello or small talk\n\
         PRICING_INQUIRY - questions about prices, plans or what a plan includes\n\
         HIGH_INTENT_LEAD - the user wants to sign up, subscribe, buy or start a trial\n\
         KNOWLEDGE_QUESTION - questions about refunds, support or other policies\n\
         SLOT_RESPONSE - the message only contains a name, an email or a platform\n\
         UNKNOWN - anything else\n",
    );

    if !history.is_empty() {
        prompt.push_str("\nRecent conversation:\n");
        for turn in history {
            let speaker = match turn.speaker {
                Speaker::User => "User",
                Speaker::Assistant => "Assistant",
            };
            prompt.push_str(&format!("{speaker}: {}\n", turn.text));
        }
    }

    prompt.push_str(&format!("\nMessage: {text}\nLabel:"));
    prompt
}

const HIGH_INTENT_PHRASES: &[&str] = &[
    "sign up",
    "sign me up",
    "signup",
    "i want to sign",
    "i want to try",
    "i'll take",
    "i will take",
    "subscribe",
    "buy",
    "get started",
    "get pro",
    "start trial",
    "start a trial",
    "i want the pro",
    "i want pro",
];

const PRICING_WORDS: &[&str] =
    &["price", "prices", "pricing", "cost", "costs", "plan", "plans"];

const POLICY_WORDS: &[&str] = &[
    "refund",
    "refunds",
    "support",
    "policy",
    "policies",
    "cancel",
    "cancellation",
    "feature",
    "features",
    "resolution",
    "caption",
    "captions",
    "4k",
    "720p",
];

const GREETING_WORDS: &[&str] = &["hi", "hello", "hey", "hiya"];
const GREETING_PHRASES: &[&str] = &["good morning", "good afternoon", "good evening"];

/// Deterministic offline oracle. High intent wins over pricing, pricing over
/// policy questions, and those over greetings. Keywords and phrases only match
/// whole words, so "unsubscribe" is not "subscribe".
#[derive(Clone, Copy, Debug, Default)]
pub struct KeywordIntentOracle;

impl KeywordIntentOracle {
    pub fn classify(&self, text: &str) -> Intent {
        let lowered = text.to_lowercase().replace('\u{2019}', "'");
        let words = lowered
            .split(|character: char| !character.is_alphanumeric() && character != '\'')
            .map(|word| word.trim_matches('\''))
            .filter(|word| !word.is_empty())
            .collect::<Vec<_>>();
        let mentions = |phrases: &[&str]| phrases.iter().any(|phrase| contains_phrase(&words, phrase));

        if mentions(HIGH_INTENT_PHRASES) {
            Intent::HighIntentLead
        } else if mentions(PRICING_WORDS) {
            Intent::PricingInquiry
        } else if mentions(POLICY_WORDS) {
            Intent::KnowledgeQuestion
        } else if mentions(GREETING_WORDS) || mentions(GREETING_PHRASES) {
            Intent::Greeting
        } else {
            Intent::Unknown
        }
    }
}

fn contains_phrase(words: &[&str], phrase: &str) -> bool {
    let needle = phrase.split_whitespace().collect::<Vec<_>>();
    !needle.is_empty() && words.windows(needle.len()).any(|window| window == needle.as_slice())
}

#[async_trait]
impl IntentOracle for KeywordIntentOracle {
    fn name(&self) -> &'static str {
        "rules"
    }

    async fn label(&self, text: &str, _history: &[Turn]) -> Result<String> {
        Ok(self.classify(text).label().to_string())
    }
}

pub struct IntentClassifier {
    oracle: Arc<dyn IntentOracle>,
    timeout: Duration,
    history_turns: usize,
}

impl IntentClassifier {
    pub fn new(oracle: Arc<dyn IntentOracle>, timeout: Duration, history_turns: usize) -> Self {
        Self { oracle, timeout, history_turns }
    }

    pub fn oracle_name(&self) -> &'static str {
        self.oracle.name()
    }

    /// Labels `text` using at most the last `history_turns` turns as context.
    /// Oracle errors and timeouts classify as `Unknown`.
    pub async fn classify(&self, text: &str, history: &[Turn]) -> Intent {
        let start = history.len().saturating_sub(self.history_turns);
        let context = &history[start..];

        match tokio::time::timeout(self.timeout, self.oracle.label(text, context)).await {
            Ok(Ok(raw)) => parse_intent_label(&raw),
            Ok(Err(error)) => {
                warn!(
                    event_name = "intent.oracle_failed",
                    oracle = self.oracle.name(),
                    error = %error,
                    "intent oracle failed, treating message as unknown"
                );
                Intent::Unknown
            }
            Err(_) => {
                warn!(
                    event_name = "intent.oracle_timeout",
                    oracle = self.oracle.name(),
                    timeout_ms = self.timeout.as_millis() as u64,
                    "intent oracle timed out, treating message as unknown"
                );
                Intent::Unknown
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use anyhow::Result;
    use async_trait::async_trait;
    use autostream_core::domain::conversation::{Speaker, Turn};

    use super::{
        classification_prompt, parse_intent_label, Intent, IntentClassifier, IntentOracle,
        KeywordIntentOracle, LlmIntentOracle,
    };
    use crate::llm::LlmClient;

    struct FixedOracle(&'static str);

    #[async_trait]
    impl IntentOracle for FixedOracle {
        fn name(&self) -> &'static str {
            "fixed"
        }

        async fn label(&self, _text: &str, _history: &[Turn]) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    struct FailingOracle;

    #[async_trait]
    impl IntentOracle for FailingOracle {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn label(&self, _text: &str, _history: &[Turn]) -> Result<String> {
            anyhow::bail!("quota exceeded")
        }
    }

    struct SlowOracle;

    #[async_trait]
    impl IntentOracle for SlowOracle {
        fn name(&self) -> &'static str {
            "slow"
        }

        async fn label(&self, _text: &str, _history: &[Turn]) -> Result<String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("GREETING".to_string())
        }
    }

    #[derive(Default)]
    struct RecordingLlm {
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LlmClient for RecordingLlm {
        async fn complete(&self, prompt: &str) -> Result<String> {
            self.prompts.lock().expect("prompt lock").push(prompt.to_string());
            Ok("pricing inquiry".to_string())
        }
    }

    fn turn(speaker: Speaker, text: &str) -> Turn {
        Turn { speaker, text: text.to_string() }
    }

    #[test]
    fn labels_parse_exactly_and_leniently() {
        assert_eq!(parse_intent_label("GREETING"), Intent::Greeting);
        assert_eq!(parse_intent_label("  high-intent lead \n"), Intent::HighIntentLead);
        assert_eq!(parse_intent_label("pricing_inquiry"), Intent::PricingInquiry);
        assert_eq!(parse_intent_label("Label: KNOWLEDGE_QUESTION."), Intent::KnowledgeQuestion);
        assert_eq!(parse_intent_label("I think it is SLOT_RESPONSE"), Intent::SlotResponse);
    }

    #[test]
    fn earliest_label_wins_when_several_appear() {
        assert_eq!(
            parse_intent_label("GREETING, maybe PRICING_INQUIRY"),
            Intent::Greeting
        );
        assert_eq!(
            parse_intent_label("PRICING_INQUIRY or GREETING"),
            Intent::PricingInquiry
        );
    }

    #[test]
    fn unparseable_output_is_unknown() {
        assert_eq!(parse_intent_label(""), Intent::Unknown);
        assert_eq!(parse_intent_label("the user seems happy"), Intent::Unknown);
        assert_eq!(parse_intent_label("{\"intent\": 3}"), Intent::Unknown);
    }

    #[test]
    fn keyword_rules_follow_priority_order() {
        let oracle = KeywordIntentOracle;
        assert_eq!(oracle.classify("Hi"), Intent::Greeting);
        assert_eq!(oracle.classify("good evening!"), Intent::Greeting);
        assert_eq!(oracle.classify("pricing"), Intent::PricingInquiry);
        assert_eq!(oracle.classify("Tell me about your plans"), Intent::PricingInquiry);
        assert_eq!(oracle.classify("I want to sign up for Pro"), Intent::HighIntentLead);
        assert_eq!(oracle.classify("hi, what does the pro plan cost? I'll take it"), Intent::HighIntentLead);
        assert_eq!(oracle.classify("What is your refund policy?"), Intent::KnowledgeQuestion);
        assert_eq!(oracle.classify("this is nothing"), Intent::Unknown);
    }

    #[test]
    fn greeting_words_match_whole_tokens_only() {
        let oracle = KeywordIntentOracle;
        assert_eq!(oracle.classify("think about it"), Intent::Unknown);
        assert_eq!(oracle.classify("they said so"), Intent::Unknown);
    }

    #[test]
    fn keywords_do_not_match_inside_longer_words() {
        let oracle = KeywordIntentOracle;
        assert_eq!(oracle.classify("unsubscribe me"), Intent::Unknown);
        assert_eq!(oracle.classify("can you explain"), Intent::Unknown);
        assert_eq!(oracle.classify("the airplane was late"), Intent::Unknown);
        assert_eq!(oracle.classify("please subscribe me"), Intent::HighIntentLead);
        assert_eq!(oracle.classify("Sign me up!"), Intent::HighIntentLead);
        assert_eq!(oracle.classify("I\u{2019}ll take the Pro plan"), Intent::HighIntentLead);
        assert_eq!(oracle.classify("what are your prices?"), Intent::PricingInquiry);
        assert_eq!(oracle.classify("any cancellation fees"), Intent::KnowledgeQuestion);
    }

    #[test]
    fn prompt_lists_labels_history_and_message() {
        let history =
            vec![turn(Speaker::User, "Hi"), turn(Speaker::Assistant, "Hello! How can I help?")];
        let prompt = classification_prompt("pricing", &history);

        for intent in Intent::ALL {
            assert!(prompt.contains(intent.label()));
        }
        assert!(prompt.contains("User: Hi"));
        assert!(prompt.contains("Assistant: Hello! How can I help?"));
        assert!(prompt.ends_with("Message: pricing\nLabel:"));
    }

    #[tokio::test]
    async fn classifier_trims_history_for_llm_oracle() {
        let llm = Arc::new(RecordingLlm::default());
        let classifier = IntentClassifier::new(
            Arc::new(LlmIntentOracle::new(llm.clone())),
            Duration::from_secs(1),
            2,
        );
        let history = vec![
            turn(Speaker::User, "first message"),
            turn(Speaker::Assistant, "second message"),
            turn(Speaker::User, "third message"),
        ];

        let intent = classifier.classify("how much?", &history).await;
        assert_eq!(intent, Intent::PricingInquiry);

        let prompts = llm.prompts.lock().expect("prompt lock");
        assert_eq!(prompts.len(), 1);
        assert!(!prompts[0].contains("first message"));
        assert!(prompts[0].contains("third message"));
    }

    #[tokio::test]
    async fn oracle_failure_and_garbage_map_to_unknown() {
        let failing = IntentClassifier::new(Arc::new(FailingOracle), Duration::from_secs(1), 6);
        assert_eq!(failing.classify("hello", &[]).await, Intent::Unknown);

        let garbage =
            IntentClassifier::new(Arc::new(FixedOracle("banana")), Duration::from_secs(1), 6);
        assert_eq!(garbage.classify("hello", &[]).await, Intent::Unknown);
    }

    #[tokio::test(start_paused = true)]
    async fn oracle_timeout_maps_to_unknown() {
        let classifier =
            IntentClassifier::new(Arc::new(SlowOracle), Duration::from_millis(50), 6);
        assert_eq!(classifier.classify("hello", &[]).await, Intent::Unknown);
    }
}
