//! Backend notification feeds
//!
//! ```text
//!   OllamaBackend ──SessionEmitter──▶ EventBus ──┬─ partial feed ───┐
//!                                                └─ completion feed ┴─▶ SessionController
//! ```
//!
//! The controller drains both feeds from one task and prefers the partial
//! feed, so a completion is never handled ahead of text emitted before it.

mod bus;
mod types;

pub use bus::{DEFAULT_CHANNEL_CAPACITY, EventBus, SessionEmitter};
pub use types::{Completion, PartialText};
