//! Event Bus - the two notification feeds between backend and controller
//!
//! Each feed is a tokio broadcast channel. The backend emits through a
//! [`SessionEmitter`]; the controller subscribes to both feeds on activation.

use tokio::sync::broadcast;
use tracing::debug;

use super::types::{Completion, PartialText};
use crate::session::SessionId;

/// Default channel capacity (notifications per feed)
pub const DEFAULT_CHANNEL_CAPACITY: usize = 4_096;

/// Carrier for backend notifications
pub struct EventBus {
    partial_tx: broadcast::Sender<PartialText>,
    complete_tx: broadcast::Sender<Completion>,
}

impl EventBus {
    /// Create a new event bus with the given per-feed capacity
    pub fn new(capacity: usize) -> Self {
        debug!(capacity, "EventBus::new: creating event bus");
        let (partial_tx, _) = broadcast::channel(capacity);
        let (complete_tx, _) = broadcast::channel(capacity);
        Self { partial_tx, complete_tx }
    }

    /// Create a new event bus with default capacity
    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Subscribe to the partial-text feed
    ///
    /// Notifications emitted before subscription are not received.
    pub fn subscribe_partial(&self) -> broadcast::Receiver<PartialText> {
        debug!("EventBus::subscribe_partial: new subscriber");
        self.partial_tx.subscribe()
    }

    /// Subscribe to the completion feed
    pub fn subscribe_complete(&self) -> broadcast::Receiver<Completion> {
        debug!("EventBus::subscribe_complete: new subscriber");
        self.complete_tx.subscribe()
    }

    /// Create an emitter bound to one exchange
    pub fn emitter_for(&self, session: SessionId) -> SessionEmitter {
        debug!(%session, "EventBus::emitter_for: creating emitter");
        SessionEmitter {
            partial_tx: self.partial_tx.clone(),
            complete_tx: self.complete_tx.clone(),
            session,
        }
    }

    /// Number of live subscribers as (partial, completion)
    pub fn subscriber_count(&self) -> (usize, usize) {
        (self.partial_tx.receiver_count(), self.complete_tx.receiver_count())
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

/// Handle for a backend to emit notifications for one exchange
///
/// Cheap to clone. Sends are fire-and-forget: with no subscribers the
/// notification is dropped.
#[derive(Clone)]
pub struct SessionEmitter {
    partial_tx: broadcast::Sender<PartialText>,
    complete_tx: broadcast::Sender<Completion>,
    session: SessionId,
}

impl SessionEmitter {
    /// Exchange this emitter is bound to
    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Emit a partial-text notification
    pub fn partial(&self, text: &str) {
        debug!(session = %self.session, len = text.len(), "SessionEmitter::partial");
        let _ = self.partial_tx.send(PartialText {
            session: self.session,
            text: text.to_string(),
        });
    }

    /// Emit the completion notification
    pub fn complete(&self) {
        debug!(session = %self.session, "SessionEmitter::complete");
        let _ = self.complete_tx.send(Completion { session: self.session });
    }
}
