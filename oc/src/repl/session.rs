//! Chat session driving a `SessionController` from the terminal

use std::io::{self, Write};
use std::sync::Arc;

use colored::Colorize;
use eyre::Result;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::controller::{SendOutcome, SessionController};
use crate::events::EventBus;
use crate::prompt::CodeContext;
use crate::session::{ChatMessage, SessionId, SessionState};
use crate::transcript::TranscriptStore;

/// How a streamed reply ended
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyOutcome {
    /// Reply committed
    Completed(ChatMessage),
    /// Prompt was blank
    Skipped,
    /// Backend rejected the prompt
    Failed(String),
    /// Cancelled before any text arrived
    Cancelled,
}

/// Interactive chat session
pub struct ChatSession {
    controller: SessionController,
    // Keeps the feeds alive for the controller's subscription
    _bus: Arc<EventBus>,
    user_id: String,
    context: Option<CodeContext>,
    transcript: Option<TranscriptStore>,
}

impl ChatSession {
    /// Create a session; the controller must already be activated on `bus`
    pub fn new(
        controller: SessionController,
        bus: Arc<EventBus>,
        user_id: String,
        context: Option<CodeContext>,
        transcript: Option<TranscriptStore>,
    ) -> Self {
        debug!(%user_id, has_context = context.is_some(), "ChatSession::new: called");
        Self {
            controller,
            _bus: bus,
            user_id,
            context,
            transcript,
        }
    }

    /// Run the interactive loop
    pub async fn run(&mut self) -> Result<()> {
        self.print_welcome();

        let mut rl = DefaultEditor::new().map_err(|e| eyre::eyre!("Failed to initialize readline: {}", e))?;

        loop {
            let readline = rl.readline(&format!("{} ", ">".bright_green()));

            match readline {
                Ok(line) => {
                    let input = line.trim();
                    if input.is_empty() {
                        continue;
                    }

                    let _ = rl.add_history_entry(input);

                    if input.starts_with('/') {
                        match self.handle_slash_command(input) {
                            SlashResult::Continue => continue,
                            SlashResult::Quit => break,
                        }
                    } else {
                        self.ask(input).await?;
                        println!();
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    println!("^C");
                    continue;
                }
                Err(ReadlineError::Eof) => {
                    println!();
                    break;
                }
                Err(err) => {
                    return Err(eyre::eyre!("Readline error: {}", err));
                }
            }
        }

        self.controller.release();
        println!("Goodbye!");
        Ok(())
    }

    /// Send one prompt and print the reply as it streams in
    ///
    /// Ctrl+C while streaming cancels the exchange; text received so far is
    /// kept.
    pub async fn ask(&mut self, prompt: &str) -> Result<ReplyOutcome> {
        let mut rx = self.controller.watch_state();
        rx.borrow_and_update();

        let outcome = self.controller.send(prompt, &self.user_id, self.context.as_ref()).await;
        let session = match outcome {
            SendOutcome::Skipped | SendOutcome::Released => return Ok(ReplyOutcome::Skipped),
            SendOutcome::Failed(session) => {
                let state = self.controller.snapshot();
                // Text received before the failure was committed; keep it visible
                if let Some(partial) = state.last_message().filter(|m| m.session == session) {
                    println!("{}", partial.content);
                    self.save_exchange(session, prompt, partial);
                }
                let message = state
                    .last_error
                    .unwrap_or_else(|| crate::backend::UNKNOWN_FAILURE_MESSAGE.to_string());
                eprintln!("{} {}", "Error:".red(), message);
                return Ok(ReplyOutcome::Failed(message));
            }
            SendOutcome::Dispatched(session) => session,
        };

        let Some(reply) = stream_reply(&self.controller, &mut rx, session).await? else {
            println!("{}", "[cancelled]".dimmed());
            return Ok(ReplyOutcome::Cancelled);
        };
        println!();
        self.save_exchange(session, prompt, &reply);

        Ok(ReplyOutcome::Completed(reply))
    }

    fn save_exchange(&self, session: SessionId, prompt: &str, reply: &ChatMessage) {
        if let Some(store) = &self.transcript
            && let Err(e) = store.append(&self.user_id, &[ChatMessage::user(session, prompt), reply.clone()])
        {
            warn!(error = %e, "ChatSession::save_exchange: failed to save transcript");
        }
    }

    fn print_welcome(&self) {
        println!();
        println!("{}", "OllamaChat".bright_cyan().bold());
        println!("Model: {}  User: {}", self.controller.model(), self.user_id);
        if let Some(store) = &self.transcript {
            println!("Transcript: {}", store.dir().display());
        }
        if let Some(ctx) = &self.context {
            println!(
                "Attached code: {} lines ({})",
                ctx.content.lines().count(),
                ctx.language.as_deref().unwrap_or(crate::prompt::UNSPECIFIED_LANGUAGE)
            );
        }
        println!("Type {} for help, {} to quit", "/help".yellow(), "/quit".yellow());
        println!();
    }

    fn handle_slash_command(&mut self, input: &str) -> SlashResult {
        let parts: Vec<&str> = input.split_whitespace().collect();
        let cmd = parts.first().copied().unwrap_or("");

        match cmd {
            "/help" | "/h" => {
                self.print_help();
                SlashResult::Continue
            }
            "/quit" | "/q" | "/exit" => SlashResult::Quit,
            "/history" => {
                self.print_history();
                SlashResult::Continue
            }
            "/code" => {
                match parts.get(1) {
                    Some(path) => {
                        let language = parts.get(2).map(|l| l.to_string());
                        match CodeContext::from_file(path, language) {
                            Ok(ctx) => {
                                println!(
                                    "{} {} ({})",
                                    "Attached".dimmed(),
                                    path,
                                    ctx.language.as_deref().unwrap_or(crate::prompt::UNSPECIFIED_LANGUAGE)
                                );
                                self.context = Some(ctx);
                            }
                            Err(e) => println!("{} Cannot read {}: {}", "!".red(), path, e),
                        }
                    }
                    None => println!("Usage: /code <path> [language]"),
                }
                SlashResult::Continue
            }
            "/nocode" => {
                self.context = None;
                println!("{}", "Code detached.".dimmed());
                SlashResult::Continue
            }
            _ => {
                println!("{} Unknown command: {}", "?".yellow(), cmd);
                println!("Type {} for available commands", "/help".yellow());
                SlashResult::Continue
            }
        }
    }

    fn print_help(&self) {
        println!();
        println!("{}", "Available Commands:".bright_cyan());
        println!("  {:22} Show this help", "/help".yellow());
        println!("  {:22} Exit", "/quit".yellow());
        println!("  {:22} Show this session's replies", "/history".yellow());
        println!("  {:22} Attach code to following prompts", "/code <path> [lang]".yellow());
        println!("  {:22} Stop attaching code", "/nocode".yellow());
        println!();
        println!("Press {} while a reply streams to cancel it.", "Ctrl+C".yellow());
        println!();
    }

    fn print_history(&self) {
        let state = self.controller.snapshot();
        if state.messages.is_empty() {
            println!("{}", "No replies yet.".dimmed());
            return;
        }

        println!();
        for (i, msg) in state.messages.iter().enumerate() {
            let preview: String = msg.content.chars().take(60).collect();
            let preview = if msg.content.chars().count() > 60 {
                format!("{}...", preview)
            } else {
                preview
            };
            println!("  {}. {}: {}", i + 1, msg.sender.to_string().bright_blue(), preview);
        }
        println!();
    }
}

enum SlashResult {
    Continue,
    Quit,
}

/// Print the reply of `session` as it grows, until the exchange ends
///
/// Returns the committed message, or `None` if the exchange ended with
/// nothing to commit (cancelled before any text arrived).
pub async fn stream_reply(
    controller: &SessionController,
    rx: &mut watch::Receiver<SessionState>,
    session: SessionId,
) -> Result<Option<ChatMessage>> {
    let mut printed = 0usize;

    loop {
        let state = rx.borrow_and_update().clone();

        if let Some(message) = state.messages.iter().rev().find(|m| m.session == session) {
            print_from(&message.content, printed);
            return Ok(Some(message.clone()));
        }
        if !state.is_active(session) {
            debug!(%session, "stream_reply: exchange ended without a reply");
            return Ok(None);
        }
        print_from(&state.buffer, printed);
        printed = state.buffer.len();

        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    return Err(eyre::eyre!("Session closed while streaming"));
                }
            }
            _ = tokio::signal::ctrl_c() => {
                debug!(%session, "stream_reply: interrupted");
                controller.cancel();
            }
        }
    }
}

fn print_from(text: &str, offset: usize) {
    if let Some(rest) = text.get(offset..)
        && !rest.is_empty()
    {
        print!("{}", rest);
        let _ = io::stdout().flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::time::Duration;

    use async_trait::async_trait;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    use crate::backend::{DispatchError, DispatchRequest, InferenceBackend};
    use crate::session::Sender;

    /// Streams some text, then reports a failure instead of completing
    struct BreaksMidStream {
        bus: Arc<EventBus>,
        text: Option<&'static str>,
    }

    #[async_trait]
    impl InferenceBackend for BreaksMidStream {
        async fn dispatch(&self, request: DispatchRequest, _cancel: CancellationToken) -> Result<(), DispatchError> {
            if let Some(text) = self.text {
                self.bus.emitter_for(request.session).partial(text);
                // Let the subscription task fold the text into the buffer
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            Err(DispatchError::InvalidResponse("stream broke".to_string()))
        }
    }

    fn chat_with(text: Option<&'static str>, dir: &Path) -> (ChatSession, TranscriptStore) {
        let bus = Arc::new(EventBus::new(16));
        let backend = Arc::new(BreaksMidStream { bus: bus.clone(), text });
        let controller = SessionController::new(backend, "llama3:8b");
        controller.activate(&bus).unwrap();
        let store = TranscriptStore::open(dir).unwrap();
        let chat = ChatSession::new(controller, bus, "u1".to_string(), None, Some(store.clone()));
        (chat, store)
    }

    #[tokio::test]
    async fn test_failure_after_text_saves_received_text() {
        let temp = TempDir::new().unwrap();
        let (mut chat, store) = chat_with(Some("partial answer"), temp.path());

        let outcome = chat.ask("explain").await.unwrap();
        match outcome {
            ReplyOutcome::Failed(message) => assert!(message.contains("stream broke")),
            other => panic!("Expected Failed, got {:?}", other),
        }

        let saved = store.read("u1").unwrap();
        assert_eq!(saved.len(), 2);
        assert_eq!(saved[0].sender, Sender::User);
        assert_eq!(saved[0].content, "explain");
        assert_eq!(saved[1].sender, Sender::Ai);
        assert_eq!(saved[1].content, "partial answer");
    }

    #[tokio::test]
    async fn test_failure_without_text_saves_nothing() {
        let temp = TempDir::new().unwrap();
        let (mut chat, store) = chat_with(None, temp.path());

        let outcome = chat.ask("explain").await.unwrap();
        assert!(matches!(outcome, ReplyOutcome::Failed(_)));
        assert!(store.read("u1").unwrap().is_empty());
    }
}
