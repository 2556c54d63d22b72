//! Error types for noticebus.
//!
//! All errors are strongly typed using thiserror. This enables pattern
//! matching on specific error conditions and provides clear error messages.

use thiserror::Error;

use crate::registry::NoticeKind;

/// Errors raised while declaring or querying the notice kind hierarchy.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Unknown parent kind {parent:?} while declaring '{name}'")]
    UnknownParentKind {
        name: String,
        parent: NoticeKind,
    },

    #[error("Unknown parent kind '{parent}' while declaring '{name}'")]
    UnknownParentName {
        name: String,
        parent: String,
    },

    #[error("Kind '{name}' is already declared")]
    DuplicateKind {
        name: String,
    },

    #[error("Kind {kind:?} is not declared in this registry")]
    UnknownKind {
        kind: NoticeKind,
    },

    #[error("Invalid kind declaration document: {reason}")]
    InvalidDeclaration {
        reason: String,
    },
}

/// Errors raised on the dispatch and stream-consumption paths.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Channel disconnected: {path}")]
    Disconnected {
        path: String,
    },

    #[error("Operation timed out after {duration_ms}ms")]
    Timeout {
        duration_ms: u64,
    },
}

/// Top-level error type for noticebus.
///
/// Subscription callbacks return this type as well: a callback that fails
/// aborts the remainder of the dispatch walk and the error propagates out
/// of `Dispatcher::notify` unchanged.
#[derive(Debug, Error)]
pub enum NoticeError {
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl NoticeError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a registry error.
    #[must_use]
    pub const fn is_registry(&self) -> bool {
        matches!(self, Self::Registry(_))
    }

    /// Returns true if this is a dispatch error.
    #[must_use]
    pub const fn is_dispatch(&self) -> bool {
        matches!(self, Self::Dispatch(_))
    }

    /// Returns true if this is an internal error.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }
}

/// Result type alias for noticebus operations.
pub type NoticeResult<T> = Result<T, NoticeError>;
