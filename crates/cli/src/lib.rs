pub mod bootstrap;
pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use autostream_core::config::{AppConfig, LogFormat};
use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "autostream",
    about = "AutoStream lead assistant",
    long_about = "Chat with the AutoStream assistant, inspect configuration, and run preflight checks.",
    after_help = "Examples:\n  autostream chat\n  autostream chat --offline\n  autostream doctor --json\n  autostream config"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Start an interactive chat session on stdin/stdout")]
    Chat {
        #[arg(long, help = "Path to an autostream.toml config file")]
        config: Option<PathBuf>,
        #[arg(long, help = "Path to the knowledge base JSON file")]
        knowledge: Option<PathBuf>,
        #[arg(long, help = "Use the keyword rules instead of the language model")]
        offline: bool,
    },
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config {
        #[arg(long, help = "Path to an autostream.toml config file")]
        config: Option<PathBuf>,
    },
    #[command(about = "Validate config, credentials, and the knowledge base")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
        #[arg(long, help = "Path to an autostream.toml config file")]
        config: Option<PathBuf>,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let env_file_error = env_file_problem(dotenvy::dotenv());

    let result = match cli.command {
        Command::Chat { config, knowledge, offline } => {
            commands::chat::run(commands::chat::ChatArgs {
                config_path: config,
                knowledge_path: knowledge,
                offline,
                env_file_error,
            })
        }
        Command::Config { config } => {
            warn_with_default_logging(env_file_error.as_deref());
            commands::config::run(config)
        }
        Command::Doctor { json, config } => {
            warn_with_default_logging(env_file_error.as_deref());
            commands::doctor::run(json, config)
        }
    };

    if result.exit_code == 0 {
        if !result.output.is_empty() {
            println!("{}", result.output);
        }
    } else {
        eprintln!("{}", result.output);
    }
    ExitCode::from(result.exit_code)
}

/// A missing `.env` is normal. Anything else (unreadable file, bad line) is
/// returned as a message so it can be logged once logging is up.
fn env_file_problem(loaded: Result<PathBuf, dotenvy::Error>) -> Option<String> {
    match loaded {
        Ok(_) => None,
        Err(error) if error.not_found() => None,
        Err(error) => Some(error.to_string()),
    }
}

pub(crate) fn warn_env_file_problem(problem: Option<&str>) {
    if let Some(problem) = problem {
        tracing::warn!(
            event_name = "system.env_file_invalid",
            correlation_id = "bootstrap",
            error = problem,
            ".env file could not be loaded; continuing with process environment"
        );
    }
}

fn warn_with_default_logging(problem: Option<&str>) {
    if problem.is_some() {
        init_logging(&AppConfig::default());
        warn_env_file_problem(problem);
    }
}

/// Installs the global subscriber. Logs go to stderr so the chat transcript
/// on stdout stays readable.
pub fn init_logging(config: &AppConfig) {
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);
    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(log_level)
        .with_writer(std::io::stderr);

    let _ = match config.logging.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
}
