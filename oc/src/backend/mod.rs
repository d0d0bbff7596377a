//! Inference backend abstraction
//!
//! A backend accepts a composed prompt and later reports the response
//! through the [`EventBus`](crate::events::EventBus) feeds. `dispatch` only
//! covers the hand-off: it resolves once the backend has accepted (or
//! rejected) the prompt, never with response text.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

mod error;
mod ollama;

pub use error::{DispatchError, UNKNOWN_FAILURE_MESSAGE};
pub use ollama::{GenerateChunk, OllamaBackend, parse_chunk};

use crate::session::SessionId;

/// A prompt ready to hand to the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchRequest {
    /// Exchange the backend must tag its notifications with
    pub session: SessionId,
    pub model: String,
    pub prompt: String,
    pub user_id: String,
}

/// External inference service
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Hand a prompt to the backend
    ///
    /// Returns once the backend acknowledged receipt. Response text arrives
    /// afterwards (or concurrently) on the notification feeds. Once `cancel`
    /// fires the backend stops emitting for this exchange.
    async fn dispatch(&self, request: DispatchRequest, cancel: CancellationToken) -> Result<(), DispatchError>;
}

#[cfg(test)]
pub mod mock {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use tokio::sync::Notify;
    use tracing::debug;

    use crate::events::EventBus;

    /// Scripted backend for unit tests
    ///
    /// Records every request. Each dispatch pops the next scripted outcome
    /// (defaulting to success) and, when a bus is attached, emits the
    /// scripted chunks before acknowledging. A gated backend holds every
    /// dispatch until the gate is notified.
    #[derive(Default)]
    pub struct MockBackend {
        outcomes: Mutex<VecDeque<Result<(), DispatchError>>>,
        requests: Mutex<Vec<DispatchRequest>>,
        emit: Option<(Arc<EventBus>, Vec<String>)>,
        gate: Option<Arc<Notify>>,
    }

    impl MockBackend {
        pub fn new() -> Self {
            Self::default()
        }

        /// Emit `chunks` and a completion on `bus` during every dispatch
        pub fn emitting(bus: Arc<EventBus>, chunks: &[&str]) -> Self {
            Self {
                emit: Some((bus, chunks.iter().map(|c| c.to_string()).collect())),
                ..Self::default()
            }
        }

        /// Hold each dispatch until `gate` is notified
        pub fn gated(gate: Arc<Notify>) -> Self {
            Self {
                gate: Some(gate),
                ..Self::default()
            }
        }

        /// Queue the outcome of a future dispatch
        pub fn push_outcome(&self, outcome: Result<(), DispatchError>) {
            self.outcomes.lock().unwrap().push_back(outcome);
        }

        pub fn requests(&self) -> Vec<DispatchRequest> {
            self.requests.lock().unwrap().clone()
        }

        pub fn call_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl InferenceBackend for MockBackend {
        async fn dispatch(&self, request: DispatchRequest, _cancel: CancellationToken) -> Result<(), DispatchError> {
            debug!(session = %request.session, "MockBackend::dispatch: called");
            let session = request.session;
            self.requests.lock().unwrap().push(request);

            if let Some((bus, chunks)) = &self.emit {
                let emitter = bus.emitter_for(session);
                for chunk in chunks {
                    emitter.partial(chunk);
                }
                emitter.complete();
            }

            if let Some(gate) = &self.gate {
                gate.notified().await;
            }

            self.outcomes.lock().unwrap().pop_front().unwrap_or(Ok(()))
        }
    }
}
