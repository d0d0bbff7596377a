//! Streaming session controller
//!
//! Owns the lifecycle of one prompt/response exchange at a time:
//!
//! ```text
//!            send                 ack ok
//!   Idle ──────────▶ Sending ──────────────▶ Streaming
//!    ▲                  │  ack failed            │ on_partial (append)
//!    │                  ▼                        │
//!    │                Error ── next send ──▶ Sending
//!    └───────────────── on_complete (commit) ────┘
//! ```
//!
//! Every exchange gets a fresh [`SessionId`]. Notifications tagged with any
//! other id are dropped, so a superseded or cancelled exchange can never
//! write into the buffer of the current one.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::backend::{DispatchError, DispatchRequest, InferenceBackend};
use crate::events::{Completion, EventBus, PartialText};
use crate::prompt::{CodeContext, compose_prompt};
use crate::session::{ChatMessage, Phase, SessionId, SessionState};

/// Result of a `send` call
///
/// Failures are reported here and in [`SessionState::last_error`]; `send`
/// itself never returns an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Blank prompt, nothing happened
    Skipped,
    /// Controller already released, nothing happened
    Released,
    /// Backend acknowledged the prompt
    Dispatched(SessionId),
    /// Backend rejected the prompt or could not be reached
    Failed(SessionId),
}

/// Errors from subscription management
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ControllerError {
    #[error("Controller has been released")]
    Released,

    #[error("Controller is already subscribed to the notification feeds")]
    AlreadyActive,
}

/// Mutable core guarded by the controller's mutex
#[derive(Default)]
struct Core {
    state: SessionState,
    /// Cancellation token of the active exchange
    cancel: Option<CancellationToken>,
    /// Exchange whose dispatch call has not returned yet
    sending: Option<SessionId>,
    next_session: u64,
    released: bool,
}

impl Core {
    /// End the active exchange early, committing any text already received
    fn abandon_active(&mut self) -> Option<SessionId> {
        let session = self.state.active?;
        if let Some(token) = self.cancel.take() {
            token.cancel();
        }
        if self.state.abandon(session) {
            debug!(%session, "Core::abandon_active: committed partial text");
        }
        Some(session)
    }
}

/// State shared between the controller and its subscription task
struct Shared {
    core: Mutex<Core>,
    updates: watch::Sender<SessionState>,
}

impl Shared {
    fn new() -> Self {
        let (updates, _) = watch::channel(SessionState::default());
        Self {
            core: Mutex::new(Core::default()),
            updates,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Core> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, core: &Core) {
        self.updates.send_replace(core.state.clone());
    }

    fn on_partial(&self, session: SessionId, text: &str) {
        let mut core = self.lock();
        if core.released {
            return;
        }
        if !core.state.is_active(session) {
            debug!(%session, active = ?core.state.active, "Shared::on_partial: dropping stale notification");
            return;
        }
        core.state.buffer.push_str(text);
        core.state.is_streaming = true;
        self.publish(&core);
    }

    fn on_complete(&self, session: SessionId) -> Option<ChatMessage> {
        let mut core = self.lock();
        if core.released {
            return None;
        }
        if !core.state.is_active(session) {
            debug!(%session, active = ?core.state.active, "Shared::on_complete: dropping stale notification");
            return None;
        }
        core.cancel = None;
        let message = core.state.commit(session).clone();
        debug!(%session, len = message.content.len(), "Shared::on_complete: committed");
        self.publish(&core);
        Some(message)
    }

    fn acknowledge(&self, session: SessionId) {
        let mut core = self.lock();
        if core.state.is_active(session) && core.state.phase == Phase::Sending {
            core.state.phase = Phase::Streaming;
            self.publish(&core);
        }
    }

    fn fail(&self, session: SessionId, message: String) {
        let mut core = self.lock();
        if core.released || !core.state.is_active(session) {
            debug!(%session, "Shared::fail: exchange no longer active");
            return;
        }
        core.abandon_active();
        core.state.is_streaming = false;
        core.state.last_error = Some(message);
        core.state.phase = Phase::Error;
        self.publish(&core);
    }

    /// Clear the sending flag if `session` still owns it
    fn finish_sending(&self, session: SessionId) {
        let mut core = self.lock();
        if core.sending == Some(session) {
            core.sending = None;
            core.state.is_sending = false;
            self.publish(&core);
        }
    }
}

/// Clears `is_sending` when the dispatch scope ends, however it ends
struct SendingGuard<'a> {
    shared: &'a Shared,
    session: SessionId,
}

impl Drop for SendingGuard<'_> {
    fn drop(&mut self) {
        self.shared.finish_sending(self.session);
    }
}

/// Live subscription to both notification feeds
///
/// The task owns one receiver per feed; aborting it releases both.
struct Subscription {
    task: JoinHandle<()>,
}

/// Controller for a streamed prompt/response exchange
pub struct SessionController {
    shared: Arc<Shared>,
    backend: Arc<dyn InferenceBackend>,
    model: String,
    subscription: Mutex<Option<Subscription>>,
}

impl SessionController {
    /// Create a controller dispatching to `backend` with model `model`
    pub fn new(backend: Arc<dyn InferenceBackend>, model: impl Into<String>) -> Self {
        let model = model.into();
        debug!(%model, "SessionController::new: called");
        Self {
            shared: Arc::new(Shared::new()),
            backend,
            model,
            subscription: Mutex::new(None),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Copy of the current state
    pub fn snapshot(&self) -> SessionState {
        self.shared.lock().state.clone()
    }

    /// Receiver that observes a fresh snapshot after every mutation
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.shared.updates.subscribe()
    }

    pub fn is_released(&self) -> bool {
        self.shared.lock().released
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Subscribe to the partial-text and completion feeds of `bus`
    ///
    /// Must be called from within a tokio runtime.
    pub fn activate(&self, bus: &EventBus) -> Result<(), ControllerError> {
        debug!("SessionController::activate: called");
        let mut subscription = self.subscription.lock().unwrap_or_else(PoisonError::into_inner);
        if self.shared.lock().released {
            return Err(ControllerError::Released);
        }
        if subscription.is_some() {
            return Err(ControllerError::AlreadyActive);
        }

        let partials = bus.subscribe_partial();
        let completions = bus.subscribe_complete();
        let task = tokio::spawn(drain_feeds(self.shared.clone(), partials, completions));
        *subscription = Some(Subscription { task });
        info!("Subscribed to backend notifications");
        Ok(())
    }

    /// Release both feeds and stop accepting mutations
    ///
    /// Idempotent, and safe to call without a prior `activate`. An exchange
    /// still in flight is cancelled at the backend; the message log is left
    /// as it is.
    pub fn release(&self) {
        let was_released = {
            let mut core = self.shared.lock();
            let was = core.released;
            core.released = true;
            if let Some(token) = core.cancel.take() {
                token.cancel();
            }
            was
        };

        let subscription = self
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(subscription) = subscription {
            subscription.task.abort();
            info!("Released backend notification subscription");
        } else if !was_released {
            debug!("SessionController::release: no subscription held");
        }
    }

    /// Submit a prompt
    ///
    /// A blank prompt is ignored. Otherwise the controller starts a new
    /// exchange (superseding any active one), dispatches the composed prompt,
    /// and records the outcome in state. Suspends only at the dispatch call.
    pub async fn send(&self, prompt: &str, user_id: &str, context: Option<&CodeContext>) -> SendOutcome {
        if prompt.trim().is_empty() {
            debug!("SessionController::send: blank prompt, skipping");
            return SendOutcome::Skipped;
        }

        let (session, cancel) = {
            let mut core = self.shared.lock();
            if core.released {
                debug!("SessionController::send: released, skipping");
                return SendOutcome::Released;
            }
            if let Some(previous) = core.abandon_active() {
                warn!(%previous, "New prompt supersedes an unfinished exchange");
            }
            core.next_session += 1;
            let session = SessionId(core.next_session);
            let cancel = CancellationToken::new();
            core.cancel = Some(cancel.clone());
            core.sending = Some(session);
            core.state.begin(session);
            self.shared.publish(&core);
            (session, cancel)
        };

        let request = DispatchRequest {
            session,
            model: self.model.clone(),
            prompt: compose_prompt(prompt, context),
            user_id: user_id.to_string(),
        };
        debug!(%session, %user_id, "SessionController::send: dispatching");

        let _sending = SendingGuard {
            shared: &self.shared,
            session,
        };
        match self.backend.dispatch(request, cancel).await {
            Ok(()) => {
                info!("Prompt sent successfully");
                self.shared.acknowledge(session);
                SendOutcome::Dispatched(session)
            }
            Err(DispatchError::Cancelled) => {
                debug!(%session, "SessionController::send: dispatch cancelled");
                SendOutcome::Failed(session)
            }
            Err(e) => {
                if e.is_unknown() {
                    error!("An unknown error occurred while sending prompt to Ollama");
                } else {
                    error!(retryable = e.is_retryable(), "Failed to send prompt to Ollama: {}", e);
                }
                self.shared.fail(session, e.user_message());
                SendOutcome::Failed(session)
            }
        }
    }

    /// Append a chunk of response text for `session`
    pub fn on_partial(&self, session: SessionId, text: &str) {
        self.shared.on_partial(session, text);
    }

    /// Commit the buffer of `session` as an AI message
    ///
    /// An empty buffer commits an empty message. Returns the committed
    /// message, or `None` if the notification was stale.
    pub fn on_complete(&self, session: SessionId) -> Option<ChatMessage> {
        self.shared.on_complete(session)
    }

    /// Cancel the active exchange
    ///
    /// Text received so far is committed. Returns the cancelled exchange, if
    /// there was one.
    pub fn cancel(&self) -> Option<SessionId> {
        let mut core = self.shared.lock();
        if core.released {
            return None;
        }
        let session = core.abandon_active()?;
        info!(%session, "Cancelled exchange");
        self.shared.publish(&core);
        Some(session)
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.release();
    }
}

/// Drain both feeds into the controller
///
/// The partial feed is polled first: the backend emits a completion only
/// after its partials, so any partial sent before a completion is already
/// queued when the completion becomes visible.
async fn drain_feeds(
    shared: Arc<Shared>,
    mut partials: broadcast::Receiver<PartialText>,
    mut completions: broadcast::Receiver<Completion>,
) {
    debug!("drain_feeds: started");
    let mut partials_open = true;
    let mut completions_open = true;

    loop {
        tokio::select! {
            biased;
            received = partials.recv(), if partials_open => match received {
                Ok(partial) => shared.on_partial(partial.session, &partial.text),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(missed = n, "drain_feeds: partial feed lagged, text lost");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("drain_feeds: partial feed closed");
                    partials_open = false;
                }
            },
            received = completions.recv(), if completions_open => match received {
                Ok(completion) => {
                    shared.on_complete(completion.session);
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(missed = n, "drain_feeds: completion feed lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("drain_feeds: completion feed closed");
                    completions_open = false;
                }
            },
            else => break,
        }
    }
    debug!("drain_feeds: stopped");
}
