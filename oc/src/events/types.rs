//! Backend notification types
//!
//! The backend produces two feeds per exchange:
//! - partial text, zero or more times, in emission order
//! - completion, exactly once, terminal

use serde::{Deserialize, Serialize};

use crate::session::SessionId;

/// An incremental chunk of the backend's response
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialText {
    pub session: SessionId,
    pub text: String,
}

/// End of an exchange's streamed output
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completion {
    pub session: SessionId,
}
