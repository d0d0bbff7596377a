//! Terminal front-ends for the session controller
//!
//! `oc repl` runs an interactive loop; `oc ask` sends a single prompt. Both
//! stream the reply to stdout as it arrives.

mod session;

pub use session::{ChatSession, ReplyOutcome, stream_reply};

use std::sync::Arc;

use eyre::{Context, Result};
use tracing::info;

use crate::backend::{InferenceBackend, OllamaBackend};
use crate::config::Config;
use crate::controller::SessionController;
use crate::events::EventBus;
use crate::prompt::CodeContext;
use crate::transcript::TranscriptStore;

/// Options shared by `ask` and `repl`
#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    pub user_id: Option<String>,
    pub model: Option<String>,
    pub context: Option<CodeContext>,
}

/// Wire bus, backend and controller together into a ready session
pub fn build_session(config: &Config, options: ChatOptions) -> Result<ChatSession> {
    config.validate().context("Invalid configuration")?;
    let bus = Arc::new(EventBus::new(config.session.channel_capacity));
    let backend: Arc<dyn InferenceBackend> = Arc::new(
        OllamaBackend::from_config(&config.backend, bus.clone())
            .map_err(|e| eyre::eyre!("Failed to create Ollama client: {}", e))?,
    );

    let model = options.model.unwrap_or_else(|| config.backend.model.clone());
    let user_id = options.user_id.unwrap_or_else(|| config.session.user_id.clone());
    info!(%model, %user_id, base_url = %config.backend.effective_base_url(), "Starting chat session");

    let controller = SessionController::new(backend, model);
    controller.activate(&bus)?;

    let transcript = if config.transcript.enabled {
        Some(TranscriptStore::open(&config.transcript.dir).context("Failed to open transcript store")?)
    } else {
        None
    };

    Ok(ChatSession::new(controller, bus, user_id, options.context, transcript))
}

/// Run the interactive REPL
///
/// This is the main entry point for `oc repl`.
pub async fn run_interactive(config: &Config, options: ChatOptions) -> Result<()> {
    let mut session = build_session(config, options)?;
    session.run().await
}

/// Send one prompt and stream the reply
///
/// This is the main entry point for `oc ask`. A rejected prompt is an error.
pub async fn run_ask(config: &Config, prompt: &str, options: ChatOptions) -> Result<()> {
    let mut session = build_session(config, options)?;
    match session.ask(prompt).await? {
        ReplyOutcome::Failed(message) => Err(eyre::eyre!("Prompt failed: {}", message)),
        ReplyOutcome::Skipped => Err(eyre::eyre!("Prompt is empty")),
        ReplyOutcome::Completed(_) | ReplyOutcome::Cancelled => Ok(()),
    }
}
