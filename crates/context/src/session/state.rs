//! Analysis session lifecycle

use memctx_common::errors::{AppError, Result};
use serde::{Deserialize, Serialize};

/// Session state
///
/// `Created -> ContextRetrieved -> Analyzing -> Completed`. `Errored` and
/// `Cancelled` can be entered from any non-terminal state; a session with no
/// context completes straight from `ContextRetrieved`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Created,
    ContextRetrieved,
    Analyzing,
    Completed,
    Errored,
    Cancelled,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Errored | SessionState::Cancelled)
    }

    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;

        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, next),
            (_, Errored)
                | (_, Cancelled)
                | (Created, ContextRetrieved)
                | (ContextRetrieved, Analyzing)
                | (ContextRetrieved, Completed)
                | (Analyzing, Completed)
        )
    }

    /// Validated transition
    pub fn transition(self, next: SessionState) -> Result<SessionState> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(AppError::InvalidTransition {
                from: self.as_str().to_string(),
                to: next.as_str().to_string(),
            })
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Created => "created",
            SessionState::ContextRetrieved => "context_retrieved",
            SessionState::Analyzing => "analyzing",
            SessionState::Completed => "completed",
            SessionState::Errored => "errored",
            SessionState::Cancelled => "cancelled",
        }
    }
}
