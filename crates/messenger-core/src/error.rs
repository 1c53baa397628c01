//! Error taxonomy surfaced to the UI layer.

use thiserror::Error;

use crate::traits::BackendError;

/// Messaging error.
///
/// `InvalidArgument` is always raised locally, before anything reaches a
/// backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Handle not found: {0}")]
    NotFound(String),
    #[error("Wrong credential for {0}")]
    WrongCredential(String),
    #[error("Handle already exists: {0}")]
    AlreadyExists(String),
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("Not signed in")]
    NotSignedIn,
    #[error("No conversation is open")]
    NoConversation,
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

impl ChatError {
    /// Build an `InvalidArgument` error.
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidArgument(reason.into())
    }

    /// Whether the caller may retry the same operation later.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::BackendUnavailable(_))
    }
}

impl From<BackendError> for ChatError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Unavailable(reason) | BackendError::Internal(reason) => {
                Self::BackendUnavailable(reason)
            }
            BackendError::Conflict(precondition) => Self::BackendUnavailable(format!(
                "unexpected conflict at {}",
                precondition.path()
            )),
            BackendError::InvalidPath(path) => Self::InvalidArgument(format!("path {path}")),
            BackendError::Corrupt(reason) => Self::Corrupt(reason),
        }
    }
}
