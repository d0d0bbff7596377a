//! CLI command definitions and subcommands

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// OllamaChat - streaming chat with a local Ollama server
#[derive(Parser)]
#[command(
    name = "oc",
    about = "Streaming chat with a local Ollama server",
    version,
    after_help = "Logs are written to: ~/.local/share/ollamachat/logs/ollamachat.log"
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// CLI subcommands
#[derive(Subcommand)]
pub enum Command {
    /// Send one prompt and stream the reply
    Ask {
        /// Question to ask
        prompt: String,

        #[command(flatten)]
        code: CodeArgs,

        #[command(flatten)]
        session: SessionArgs,
    },

    /// Start an interactive chat
    Repl {
        #[command(flatten)]
        code: CodeArgs,

        #[command(flatten)]
        session: SessionArgs,
    },

    /// Print the prompt that would be sent, without contacting the backend
    Compose {
        /// Question to ask
        prompt: String,

        #[command(flatten)]
        code: CodeArgs,
    },

    /// Show saved conversation history
    History {
        /// User whose history to show (defaults to the configured user)
        #[arg(short, long)]
        user: Option<String>,

        /// Number of most recent messages to show
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },
}

/// Code attached to a prompt
#[derive(Args, Clone, Debug, Default)]
pub struct CodeArgs {
    /// File whose contents accompany the prompt
    #[arg(short = 'f', long = "code-file", value_name = "PATH")]
    pub code_file: Option<PathBuf>,

    /// Language of the attached code (inferred from the extension if omitted)
    #[arg(short, long)]
    pub language: Option<String>,
}

/// Per-invocation session overrides
#[derive(Args, Clone, Debug, Default)]
pub struct SessionArgs {
    /// User identifier sent with the prompt
    #[arg(short, long)]
    pub user: Option<String>,

    /// Model to use instead of the configured one
    #[arg(short, long)]
    pub model: Option<String>,
}

/// Output format for history
#[derive(Clone, Debug, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown format: {}. Use: text or json", s)),
        }
    }
}
