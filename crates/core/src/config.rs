use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_CONFIG_PATHS: [&str; 2] = ["autostream.toml", "config/autostream.toml"];

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub knowledge: KnowledgeConfig,
    pub agent: AgentConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct LlmConfig {
    pub provider: LlmProvider,
    pub api_key: Option<SecretString>,
    pub base_url: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub freeform_replies: bool,
}

#[derive(Clone, Debug)]
pub struct KnowledgeConfig {
    pub path: PathBuf,
    pub min_score: usize,
}

#[derive(Clone, Debug)]
pub struct AgentConfig {
    pub max_slot_retries: u32,
    pub history_turns: usize,
    pub slot_overwrite: SlotOverwritePolicy,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmProvider {
    Gemini,
    Rules,
}

/// What to do when a user restates a slot that is already filled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotOverwritePolicy {
    Overwrite,
    Ignore,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub log_level: Option<String>,
    pub llm_provider: Option<LlmProvider>,
    pub llm_api_key: Option<String>,
    pub llm_model: Option<String>,
    pub knowledge_path: Option<PathBuf>,
    pub max_slot_retries: Option<u32>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            llm: LlmConfig {
                provider: LlmProvider::Gemini,
                api_key: None,
                base_url: Some("https://generativelanguage.googleapis.com/v1beta".to_string()),
                model: "gemini-2.5-flash".to_string(),
                timeout_secs: 20,
                max_retries: 1,
                freeform_replies: true,
            },
            knowledge: KnowledgeConfig {
                path: PathBuf::from("knowledge/autostream.json"),
                min_score: 1,
            },
            agent: AgentConfig {
                max_slot_retries: 3,
                history_turns: 6,
                slot_overwrite: SlotOverwritePolicy::Overwrite,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LlmProvider {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "gemini" => Ok(Self::Gemini),
            "rules" => Ok(Self::Rules),
            other => Err(ConfigError::Validation(format!(
                "unsupported llm provider `{other}` (expected gemini|rules)"
            ))),
        }
    }
}

impl std::str::FromStr for SlotOverwritePolicy {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "overwrite" => Ok(Self::Overwrite),
            "ignore" => Ok(Self::Ignore),
            other => Err(ConfigError::Validation(format!(
                "unsupported slot overwrite policy `{other}` (expected overwrite|ignore)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATHS[0]));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(llm) = patch.llm {
            if let Some(provider) = llm.provider {
                self.llm.provider = provider;
            }
            if let Some(llm_api_key_value) = llm.api_key {
                self.llm.api_key = Some(secret_value(llm_api_key_value));
            }
            if let Some(base_url) = llm.base_url {
                self.llm.base_url = Some(base_url);
            }
            if let Some(model) = llm.model {
                self.llm.model = model;
            }
            if let Some(timeout_secs) = llm.timeout_secs {
                self.llm.timeout_secs = timeout_secs;
            }
            if let Some(max_retries) = llm.max_retries {
                self.llm.max_retries = max_retries;
            }
            if let Some(freeform_replies) = llm.freeform_replies {
                self.llm.freeform_replies = freeform_replies;
            }
        }

        if let Some(knowledge) = patch.knowledge {
            if let Some(path) = knowledge.path {
                self.knowledge.path = path;
            }
            if let Some(min_score) = knowledge.min_score {
                self.knowledge.min_score = min_score;
            }
        }

        if let Some(agent) = patch.agent {
            if let Some(max_slot_retries) = agent.max_slot_retries {
                self.agent.max_slot_retries = max_slot_retries;
            }
            if let Some(history_turns) = agent.history_turns {
                self.agent.history_turns = history_turns;
            }
            if let Some(slot_overwrite) = agent.slot_overwrite {
                self.agent.slot_overwrite = slot_overwrite;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("AUTOSTREAM_LLM_PROVIDER") {
            self.llm.provider = value.parse()?;
        }
        let api_key = read_env("AUTOSTREAM_LLM_API_KEY").or_else(|| read_env("GEMINI_API_KEY"));
        if let Some(value) = api_key {
            self.llm.api_key = Some(secret_value(value));
        }
        if let Some(value) = read_env("AUTOSTREAM_LLM_BASE_URL") {
            self.llm.base_url = Some(value);
        }
        if let Some(value) = read_env("AUTOSTREAM_LLM_MODEL") {
            self.llm.model = value;
        }
        if let Some(value) = read_env("AUTOSTREAM_LLM_TIMEOUT_SECS") {
            self.llm.timeout_secs = parse_u64("AUTOSTREAM_LLM_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("AUTOSTREAM_LLM_MAX_RETRIES") {
            self.llm.max_retries = parse_u32("AUTOSTREAM_LLM_MAX_RETRIES", &value)?;
        }
        if let Some(value) = read_env("AUTOSTREAM_LLM_FREEFORM_REPLIES") {
            self.llm.freeform_replies = parse_bool("AUTOSTREAM_LLM_FREEFORM_REPLIES", &value)?;
        }

        if let Some(value) = read_env("AUTOSTREAM_KNOWLEDGE_PATH") {
            self.knowledge.path = PathBuf::from(value);
        }
        if let Some(value) = read_env("AUTOSTREAM_KNOWLEDGE_MIN_SCORE") {
            self.knowledge.min_score = parse_usize("AUTOSTREAM_KNOWLEDGE_MIN_SCORE", &value)?;
        }

        if let Some(value) = read_env("AUTOSTREAM_AGENT_MAX_SLOT_RETRIES") {
            self.agent.max_slot_retries = parse_u32("AUTOSTREAM_AGENT_MAX_SLOT_RETRIES", &value)?;
        }
        if let Some(value) = read_env("AUTOSTREAM_AGENT_HISTORY_TURNS") {
            self.agent.history_turns = parse_usize("AUTOSTREAM_AGENT_HISTORY_TURNS", &value)?;
        }
        if let Some(value) = read_env("AUTOSTREAM_AGENT_SLOT_OVERWRITE") {
            self.agent.slot_overwrite = value.parse()?;
        }

        let log_level =
            read_env("AUTOSTREAM_LOGGING_LEVEL").or_else(|| read_env("AUTOSTREAM_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("AUTOSTREAM_LOGGING_FORMAT").or_else(|| read_env("AUTOSTREAM_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(llm_provider) = overrides.llm_provider {
            self.llm.provider = llm_provider;
        }
        if let Some(llm_api_key) = overrides.llm_api_key {
            self.llm.api_key = Some(secret_value(llm_api_key));
        }
        if let Some(llm_model) = overrides.llm_model {
            self.llm.model = llm_model;
        }
        if let Some(knowledge_path) = overrides.knowledge_path {
            self.knowledge.path = knowledge_path;
        }
        if let Some(max_slot_retries) = overrides.max_slot_retries {
            self.agent.max_slot_retries = max_slot_retries;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_llm(&self.llm)?;
        validate_knowledge(&self.knowledge)?;
        validate_agent(&self.agent)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

pub fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    DEFAULT_CONFIG_PATHS.into_iter().map(PathBuf::from).find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_llm(llm: &LlmConfig) -> Result<(), ConfigError> {
    if llm.timeout_secs == 0 || llm.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "llm.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    match llm.provider {
        LlmProvider::Gemini => {
            let missing = llm
                .api_key
                .as_ref()
                .map(|value| value.expose_secret().trim().is_empty())
                .unwrap_or(true);
            if missing {
                return Err(ConfigError::Validation(
                    "llm.api_key is required for the gemini provider. Set AUTOSTREAM_LLM_API_KEY \
                     or GEMINI_API_KEY, or run with `--offline` to use the rules provider"
                        .to_string(),
                ));
            }

            let base_url = llm.base_url.as_deref().map(str::trim).unwrap_or_default();
            if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
                return Err(ConfigError::Validation(
                    "llm.base_url must start with http:// or https://".to_string(),
                ));
            }

            if llm.model.trim().is_empty() {
                return Err(ConfigError::Validation("llm.model must not be empty".to_string()));
            }
        }
        LlmProvider::Rules => {}
    }

    Ok(())
}

fn validate_knowledge(knowledge: &KnowledgeConfig) -> Result<(), ConfigError> {
    if knowledge.path.as_os_str().is_empty() {
        return Err(ConfigError::Validation("knowledge.path must not be empty".to_string()));
    }
    if knowledge.min_score == 0 {
        return Err(ConfigError::Validation(
            "knowledge.min_score must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

fn validate_agent(agent: &AgentConfig) -> Result<(), ConfigError> {
    if agent.max_slot_retries == 0 {
        return Err(ConfigError::Validation(
            "agent.max_slot_retries must be greater than zero".to_string(),
        ));
    }
    if agent.history_turns > 50 {
        return Err(ConfigError::Validation(
            "agent.history_turns must be in range 0..=50".to_string(),
        ));
    }
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_usize(key: &str, value: &str) -> Result<usize, ConfigError> {
    value.parse::<usize>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    value.parse::<bool>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    llm: Option<LlmPatch>,
    knowledge: Option<KnowledgePatch>,
    agent: Option<AgentPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct LlmPatch {
    provider: Option<LlmProvider>,
    api_key: Option<String>,
    base_url: Option<String>,
    model: Option<String>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
    freeform_replies: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct KnowledgePatch {
    path: Option<PathBuf>,
    min_score: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct AgentPatch {
    max_slot_retries: Option<u32>,
    history_turns: Option<usize>,
    slot_overwrite: Option<SlotOverwritePolicy>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
