use std::sync::Arc;
use std::time::Duration;

use autostream_agent::audit::TracingAuditSink;
use autostream_agent::guardrails::CollectionPolicy;
use autostream_agent::intent::{IntentClassifier, IntentOracle, KeywordIntentOracle, LlmIntentOracle};
use autostream_agent::llm::{GeminiClient, LlmClient};
use autostream_agent::{AgentRuntime, LeadCaptureGateway};
use autostream_core::config::{AppConfig, ConfigError, LlmProvider, LoadOptions};
use autostream_core::knowledge::{KnowledgeBase, KnowledgeError};
use thiserror::Error;
use tracing::{info, warn};

pub struct Application {
    pub config: AppConfig,
    pub runtime: AgentRuntime,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Knowledge(#[from] KnowledgeError),
    #[error("language model client setup failed: {0}")]
    LlmClient(#[source] anyhow::Error),
    #[error("agent runtime setup failed: {0}")]
    Runtime(#[source] anyhow::Error),
}

pub fn bootstrap(
    options: LoadOptions,
    gateway: Arc<dyn LeadCaptureGateway>,
) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config, gateway)
}

pub fn bootstrap_with_config(
    config: AppConfig,
    gateway: Arc<dyn LeadCaptureGateway>,
) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        provider = ?config.llm.provider,
        "starting application bootstrap"
    );

    let loaded = KnowledgeBase::load(&config.knowledge.path, config.knowledge.min_score)?;
    for skipped in &loaded.skipped {
        warn!(
            event_name = "system.bootstrap.knowledge_entry_skipped",
            correlation_id = "bootstrap",
            index = skipped.index,
            reason = %skipped.reason,
            "skipping malformed knowledge entry"
        );
    }
    info!(
        event_name = "system.bootstrap.knowledge_loaded",
        correlation_id = "bootstrap",
        path = %config.knowledge.path.display(),
        entries = loaded.base.len(),
        skipped = loaded.skipped.len(),
        "knowledge base loaded"
    );

    let timeout = Duration::from_secs(config.llm.timeout_secs);
    let llm_client: Option<Arc<dyn LlmClient>> = match config.llm.provider {
        LlmProvider::Gemini => {
            let client = GeminiClient::from_config(&config.llm).map_err(BootstrapError::LlmClient)?;
            info!(
                event_name = "system.bootstrap.llm_client",
                correlation_id = "bootstrap",
                model = client.model(),
                freeform_replies = config.llm.freeform_replies,
                "gemini client configured"
            );
            Some(Arc::new(client))
        }
        LlmProvider::Rules => None,
    };
    let oracle: Arc<dyn IntentOracle> = match &llm_client {
        Some(client) => Arc::new(LlmIntentOracle::new(client.clone())),
        None => Arc::new(KeywordIntentOracle),
    };
    let classifier = IntentClassifier::new(oracle, timeout, config.agent.history_turns);

    let mut runtime = AgentRuntime::new(classifier, Arc::new(loaded.base), gateway)
        .map_err(BootstrapError::Runtime)?
        .with_policy(CollectionPolicy::from(&config.agent))
        .with_audit_sink(Arc::new(TracingAuditSink));
    if let Some(client) = llm_client.filter(|_| config.llm.freeform_replies) {
        runtime = runtime.with_freeform_responder(client, timeout);
    }

    info!(
        event_name = "system.bootstrap.ready",
        correlation_id = "bootstrap",
        oracle = runtime.oracle_name(),
        "agent runtime ready"
    );

    Ok(Application { config, runtime })
}
