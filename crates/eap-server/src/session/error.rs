//! Error types for session store operations

use std::fmt;

use super::SessionId;

/// Errors returned by a [`SessionStore`](super::SessionStore)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No session with this id
    NotFound(SessionId),

    /// The session changed (or vanished) since the caller read it
    StaleSession {
        session_id: SessionId,
        expected: u64,
        found: Option<u64>,
    },

    /// The store already holds its maximum number of sessions
    CapacityExceeded(usize),

    /// The id generator produced an id that is already in use
    IdCollision(SessionId),
}

impl StoreError {
    /// Lost a concurrent update race
    pub fn is_stale(&self) -> bool {
        matches!(self, StoreError::StaleSession { .. })
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::NotFound(id) => write!(f, "Session not found: {}", id),
            StoreError::StaleSession {
                session_id,
                expected,
                found: Some(found),
            } => write!(
                f,
                "Stale session {}: expected version {}, found {}",
                session_id, expected, found
            ),
            StoreError::StaleSession {
                session_id,
                expected,
                found: None,
            } => write!(
                f,
                "Stale session {}: expected version {}, session no longer exists",
                session_id, expected
            ),
            StoreError::CapacityExceeded(max) => {
                write!(f, "Session capacity exceeded ({} sessions)", max)
            }
            StoreError::IdCollision(id) => write!(f, "Session id already in use: {}", id),
        }
    }
}

impl std::error::Error for StoreError {}
