use std::fmt;

use crate::types::{ChannelKind, NotificationId, NotificationStatus};

/// Errors surfaced by `submit()` when a notification is malformed.
///
/// This is the only error type that crosses the boundary to callers;
/// everything on the dispatch path is captured into the notification's
/// error field and delivery log instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The channel kind requires a subject and none was provided.
    MissingSubject { channel: ChannelKind },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::MissingSubject { channel } =>
                write!(f, "{} notifications require a non-empty subject", channel),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Errors returned by explicit lifecycle requests (cancel, manual retry).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    /// The notification is not in a state the operation accepts.
    InvalidState {
        operation: &'static str,
        status: NotificationStatus,
    },

    /// No notification with this ID exists.
    NotFound { id: NotificationId },
}

impl fmt::Display for StateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateError::InvalidState { operation, status } =>
                write!(f, "cannot {} a {} notification", operation, status),
            StateError::NotFound { id } =>
                write!(f, "notification not found: {}", id),
        }
    }
}

impl std::error::Error for StateError {}

/// Failure reported by a channel adapter for a single send attempt.
///
/// Transient failures drive the retry policy; permanent failures bypass
/// retry and move the notification straight to `Failed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendFailure {
    Transient(TransientError),
    Permanent(PermanentError),
}

impl SendFailure {
    pub fn is_permanent(&self) -> bool {
        matches!(self, SendFailure::Permanent(_))
    }
}

impl fmt::Display for SendFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendFailure::Transient(reason) => write!(f, "transient: {}", reason),
            SendFailure::Permanent(reason) => write!(f, "permanent: {}", reason),
        }
    }
}

impl std::error::Error for SendFailure {}

/// Retryable transport failures (timeout, 5xx-equivalent, network).
///
/// Unknown failures during an attempt are classified transient by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransientError {
    Timeout,
    Network,
    RemoteError,
    Unknown,
}

impl fmt::Display for TransientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransientError::Timeout => write!(f, "send attempt timed out"),
            TransientError::Network => write!(f, "network error"),
            TransientError::RemoteError => write!(f, "provider returned error"),
            TransientError::Unknown => write!(f, "unknown failure"),
        }
    }
}

/// Non-retryable failures (bad destination, rejected by provider).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermanentError {
    InvalidDestination,
    Rejected,
}

impl fmt::Display for PermanentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PermanentError::InvalidDestination => write!(f, "invalid destination"),
            PermanentError::Rejected => write!(f, "rejected by provider"),
        }
    }
}
