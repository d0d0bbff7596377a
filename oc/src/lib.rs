//! OllamaChat - streaming chat sessions against a local Ollama server
//!
//! The core is [`SessionController`]: it turns a prompt into one exchange
//! with the inference backend and folds the backend's streamed notifications
//! into a committed message.
//!
//! # Core Concepts
//!
//! - **One exchange at a time**: every `send` opens a new generation; older
//!   generations can no longer touch state
//! - **Two feeds**: partial text and completion arrive on separate broadcast
//!   channels of the [`EventBus`]
//! - **Failures are state**: dispatch errors land in `last_error`, never in
//!   the caller's `Result`
//!
//! # Modules
//!
//! - [`controller`] - session lifecycle and subscription scoping
//! - [`session`] - observable state and message types
//! - [`events`] - notification bus
//! - [`backend`] - backend trait and the Ollama client
//! - [`prompt`] - prompt composition with attached code
//! - [`transcript`] - JSONL message history
//! - [`config`] - configuration types and loading
//! - [`cli`] / [`repl`] - command-line front-end

pub mod backend;
pub mod cli;
pub mod config;
pub mod controller;
pub mod events;
pub mod prompt;
pub mod repl;
pub mod session;
pub mod transcript;

// Re-export commonly used types
pub use backend::{DispatchError, DispatchRequest, InferenceBackend, OllamaBackend};
pub use config::Config;
pub use controller::{ControllerError, SendOutcome, SessionController};
pub use events::{Completion, EventBus, PartialText, SessionEmitter};
pub use prompt::{CodeContext, compose_prompt};
pub use session::{ChatMessage, Phase, Sender, SessionId, SessionState};
pub use transcript::TranscriptStore;
