//! OllamaChat - streaming chat with a local Ollama server
//!
//! CLI entry point.

use std::fs;
use std::path::PathBuf;

use clap::{CommandFactory, Parser};
use eyre::{Context, Result};
use tracing::info;

use ollamachat::cli::{Cli, CodeArgs, Command, OutputFormat, SessionArgs};
use ollamachat::config::Config;
use ollamachat::prompt::{CodeContext, compose_prompt};
use ollamachat::repl::{self, ChatOptions};
use ollamachat::transcript::TranscriptStore;

fn setup_logging(verbose: bool) -> Result<()> {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ollamachat")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Write to log file; stdout carries the streamed reply
    let level = if verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    let log_file = fs::File::create(log_dir.join("ollamachat.log")).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (verbose: {})", verbose);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    info!(
        "OllamaChat loaded config: base_url={}, model={}",
        config.backend.effective_base_url(),
        config.backend.model
    );

    match cli.command {
        Some(Command::Ask { prompt, code, session }) => cmd_ask(&config, &prompt, &code, session).await,
        Some(Command::Repl { code, session }) => cmd_repl(&config, &code, session).await,
        Some(Command::Compose { prompt, code }) => cmd_compose(&prompt, &code),
        Some(Command::History { user, limit, format }) => cmd_history(&config, user, limit, format),
        None => {
            Cli::command().print_help()?;
            println!();
            Ok(())
        }
    }
}

fn load_context(code: &CodeArgs) -> Result<Option<CodeContext>> {
    match &code.code_file {
        Some(path) => {
            let ctx = CodeContext::from_file(path, code.language.clone())
                .with_context(|| format!("Failed to read code file {}", path.display()))?;
            Ok(Some(ctx))
        }
        None => Ok(None),
    }
}

fn chat_options(code: &CodeArgs, session: SessionArgs) -> Result<ChatOptions> {
    Ok(ChatOptions {
        user_id: session.user,
        model: session.model,
        context: load_context(code)?,
    })
}

/// Send one prompt
async fn cmd_ask(config: &Config, prompt: &str, code: &CodeArgs, session: SessionArgs) -> Result<()> {
    let options = chat_options(code, session)?;
    repl::run_ask(config, prompt, options).await
}

/// Interactive chat
async fn cmd_repl(config: &Config, code: &CodeArgs, session: SessionArgs) -> Result<()> {
    let options = chat_options(code, session)?;
    repl::run_interactive(config, options).await
}

/// Print the composed prompt
fn cmd_compose(prompt: &str, code: &CodeArgs) -> Result<()> {
    let context = load_context(code)?;
    println!("{}", compose_prompt(prompt, context.as_ref()));
    Ok(())
}

/// Show saved history
fn cmd_history(config: &Config, user: Option<String>, limit: usize, format: OutputFormat) -> Result<()> {
    let user_id = user.unwrap_or_else(|| config.session.user_id.clone());
    let store = TranscriptStore::open(&config.transcript.dir).context("Failed to open transcript store")?;
    let messages = store.tail(&user_id, limit)?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&messages)?);
        }
        OutputFormat::Text => {
            if messages.is_empty() {
                println!("No history for user {}", user_id);
                return Ok(());
            }
            for msg in &messages {
                println!("[{}] {}:", msg.created_at.format("%Y-%m-%d %H:%M:%S"), msg.sender);
                println!("{}", msg.content);
                println!();
            }
        }
    }

    Ok(())
}
