use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::SessionState;

/// Broad error category used for user-facing handling.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChatErrorCategory {
    /// Input rejected locally before anything was emitted.
    Validation,
    /// Negative acknowledgement from the server.
    Rejected,
    /// History or profile fetch failed.
    Fetch,
    /// Operation not allowed in the current session state.
    Session,
    /// Realtime channel closed or unavailable.
    Transport,
    /// Internal bug or invariant break.
    Internal,
}

/// Stable error payload produced by chat operations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{category:?}:{code}: {message}")]
pub struct ChatError {
    /// High-level error category.
    pub category: ChatErrorCategory,
    /// Stable machine-readable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

impl ChatError {
    /// Construct a new chat error.
    pub fn new(
        category: ChatErrorCategory,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
        }
    }

    /// Local validation failure; nothing was emitted.
    pub fn validation(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ChatErrorCategory::Validation, code, message)
    }

    /// Negative acknowledgement received from the server.
    pub fn rejected(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ChatErrorCategory::Rejected, code, message)
    }

    /// Build a standard invalid-session-transition error.
    pub fn invalid_state(current: SessionState, action: impl Into<String>) -> Self {
        let action = action.into();
        Self::new(
            ChatErrorCategory::Session,
            "invalid_session_state",
            format!("cannot run '{action}' while session is {current:?}"),
        )
    }

    /// Operation referenced a room that is not in the registry.
    pub fn unknown_room(room_id: &str) -> Self {
        Self::new(
            ChatErrorCategory::Validation,
            "unknown_room",
            format!("room '{room_id}' is not known locally"),
        )
    }

    /// Operation needs an active room but none is selected.
    pub fn no_active_room(action: &str) -> Self {
        Self::new(
            ChatErrorCategory::Validation,
            "no_active_room",
            format!("select a room before '{action}'"),
        )
    }
}
