use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use autostream_agent::{AgentRuntime, ConsoleLeadCapture};
use autostream_core::config::{AppConfig, ConfigOverrides, LlmProvider, LoadOptions};
use autostream_core::domain::conversation::ConversationState;
use autostream_core::flows::Phase;
use tracing::info;

use crate::bootstrap::bootstrap_with_config;
use crate::commands::CommandResult;
use crate::{init_logging, warn_env_file_problem};

#[derive(Clone, Debug, Default)]
pub struct ChatArgs {
    pub config_path: Option<PathBuf>,
    pub knowledge_path: Option<PathBuf>,
    pub offline: bool,
    /// Why `.env` failed to load, logged once the subscriber is installed.
    pub env_file_error: Option<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionEnd {
    Completed,
    UserExit,
    EndOfInput,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionSummary {
    pub end: SessionEnd,
    pub phase: Phase,
    pub turns: u32,
}

pub fn run(args: ChatArgs) -> CommandResult {
    let options = LoadOptions {
        require_file: args.config_path.is_some(),
        config_path: args.config_path,
        overrides: ConfigOverrides {
            knowledge_path: args.knowledge_path,
            llm_provider: args.offline.then_some(LlmProvider::Rules),
            ..ConfigOverrides::default()
        },
    };

    let config = match AppConfig::load(options) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "chat",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };
    init_logging(&config);
    warn_env_file_problem(args.env_file_error.as_deref());

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "chat",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    let app = match bootstrap_with_config(config, Arc::new(ConsoleLeadCapture)) {
        Ok(app) => app,
        Err(error) => {
            return CommandResult::failure("chat", "bootstrap", error.to_string(), 4);
        }
    };

    let stdin = io::stdin();
    let stdout = io::stdout();
    match runtime.block_on(run_session(&app.runtime, stdin.lock(), stdout.lock())) {
        Ok(_) => CommandResult::text(0, ""),
        Err(error) => CommandResult::failure("chat", "session", error.to_string(), 5),
    }
}

/// Line-oriented chat loop. Ends when the lead is captured, the user types
/// `exit`/`quit`, or input runs out. Blank lines are ignored.
pub async fn run_session<R, W>(runtime: &AgentRuntime, input: R, mut output: W) -> Result<SessionSummary>
where
    R: BufRead,
    W: Write,
{
    writeln!(output, "AutoStream assistant. Type 'exit' to quit.")?;

    let mut state = ConversationState::default();
    let mut lines = input.lines();
    let end = loop {
        write!(output, "You: ")?;
        output.flush()?;

        let Some(line) = lines.next() else {
            writeln!(output)?;
            break SessionEnd::EndOfInput;
        };
        let line = line?;
        let message = line.trim();
        if message.is_empty() {
            continue;
        }
        if message.eq_ignore_ascii_case("exit") || message.eq_ignore_ascii_case("quit") {
            break SessionEnd::UserExit;
        }

        let reply = runtime.handle_turn(&mut state, message).await?;
        writeln!(output, "AutoStream: {}", reply.text)?;
        if reply.is_complete() {
            break SessionEnd::Completed;
        }
    };

    writeln!(output, "Bye.")?;
    output.flush()?;

    info!(
        event_name = "chat.session_ended",
        conversation_id = %state.id().0,
        end = ?end,
        phase = %state.phase(),
        turns = state.turn_count(),
        "chat session ended"
    );

    Ok(SessionSummary { end, phase: state.phase(), turns: state.turn_count() })
}
