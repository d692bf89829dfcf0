use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use autostream_core::config::{resolve_config_path, AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

use crate::commands::CommandResult;

struct FieldRow {
    key: &'static str,
    value: String,
    env_keys: &'static [&'static str],
}

pub fn run(config_path: Option<PathBuf>) -> CommandResult {
    let options = LoadOptions {
        require_file: config_path.is_some(),
        config_path: config_path.clone(),
        ..LoadOptions::default()
    };
    let config = match AppConfig::load(options) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "config",
                "config_validation",
                format!("config validation failed: {error}"),
                2,
            );
        }
    };

    let config_file_path = resolve_config_path(config_path.as_deref());
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let rows = vec![
        FieldRow {
            key: "llm.provider",
            value: format!("{:?}", config.llm.provider).to_lowercase(),
            env_keys: &["AUTOSTREAM_LLM_PROVIDER"],
        },
        FieldRow {
            key: "llm.api_key",
            value: config
                .llm
                .api_key
                .as_ref()
                .map(|key| redact_secret(key.expose_secret()))
                .unwrap_or_else(|| "<unset>".to_string()),
            env_keys: &["AUTOSTREAM_LLM_API_KEY", "GEMINI_API_KEY"],
        },
        FieldRow {
            key: "llm.base_url",
            value: config.llm.base_url.clone().unwrap_or_else(|| "<unset>".to_string()),
            env_keys: &["AUTOSTREAM_LLM_BASE_URL"],
        },
        FieldRow {
            key: "llm.model",
            value: config.llm.model.clone(),
            env_keys: &["AUTOSTREAM_LLM_MODEL"],
        },
        FieldRow {
            key: "llm.timeout_secs",
            value: config.llm.timeout_secs.to_string(),
            env_keys: &["AUTOSTREAM_LLM_TIMEOUT_SECS"],
        },
        FieldRow {
            key: "llm.max_retries",
            value: config.llm.max_retries.to_string(),
            env_keys: &["AUTOSTREAM_LLM_MAX_RETRIES"],
        },
        FieldRow {
            key: "llm.freeform_replies",
            value: config.llm.freeform_replies.to_string(),
            env_keys: &["AUTOSTREAM_LLM_FREEFORM_REPLIES"],
        },
        FieldRow {
            key: "knowledge.path",
            value: config.knowledge.path.display().to_string(),
            env_keys: &["AUTOSTREAM_KNOWLEDGE_PATH"],
        },
        FieldRow {
            key: "knowledge.min_score",
            value: config.knowledge.min_score.to_string(),
            env_keys: &["AUTOSTREAM_KNOWLEDGE_MIN_SCORE"],
        },
        FieldRow {
            key: "agent.max_slot_retries",
            value: config.agent.max_slot_retries.to_string(),
            env_keys: &["AUTOSTREAM_AGENT_MAX_SLOT_RETRIES"],
        },
        FieldRow {
            key: "agent.history_turns",
            value: config.agent.history_turns.to_string(),
            env_keys: &["AUTOSTREAM_AGENT_HISTORY_TURNS"],
        },
        FieldRow {
            key: "agent.slot_overwrite",
            value: format!("{:?}", config.agent.slot_overwrite).to_lowercase(),
            env_keys: &["AUTOSTREAM_AGENT_SLOT_OVERWRITE"],
        },
        FieldRow {
            key: "logging.level",
            value: config.logging.level.clone(),
            env_keys: &["AUTOSTREAM_LOGGING_LEVEL", "AUTOSTREAM_LOG_LEVEL"],
        },
        FieldRow {
            key: "logging.format",
            value: format!("{:?}", config.logging.format).to_lowercase(),
            env_keys: &["AUTOSTREAM_LOGGING_FORMAT", "AUTOSTREAM_LOG_FORMAT"],
        },
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for row in rows {
        let source = field_source(
            row.key,
            row.env_keys,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(row.key, &row.value, source));
    }

    CommandResult::text(0, lines.join("\n"))
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    let set_env =
        env_keys.iter().find(|key| env::var(key).is_ok_and(|value| !value.trim().is_empty()));
    if let Some(env_key) = set_env {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

fn redact_secret(secret: &str) -> String {
    let trimmed = secret.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    let prefix = trimmed.chars().take(4).collect::<String>();
    if trimmed.chars().count() > 12 {
        return format!("{prefix}***");
    }

    "<redacted>".to_string()
}
