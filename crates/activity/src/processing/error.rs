//! Item-level errors

use super::request::PermanentErrorKind;
use super::strategy::ErrorCategory;

/// Failure of one item
///
/// Absorbed by the coordinator into statistics according to the error
/// handling strategy; never propagated out of an activity execution.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ItemError {
    /// May succeed when retried (e.g. a resource is temporarily unreachable)
    #[error("transient error: {0}")]
    Transient(String),

    /// Will not succeed when retried
    #[error("permanent error ({kind:?}): {message}")]
    Permanent {
        kind: PermanentErrorKind,
        message: String,
    },

    /// Misconfiguration; always stops the activity
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl ItemError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent {
            kind: PermanentErrorKind::Other,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::Permanent {
            kind: PermanentErrorKind::NotFound,
            message: message.into(),
        }
    }

    pub fn schema(message: impl Into<String>) -> Self {
        Self::Permanent {
            kind: PermanentErrorKind::Schema,
            message: message.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Transient(_) => ErrorCategory::Transient,
            Self::Permanent {
                kind: PermanentErrorKind::NotFound,
                ..
            } => ErrorCategory::NotFound,
            Self::Permanent {
                kind: PermanentErrorKind::Schema,
                ..
            } => ErrorCategory::Schema,
            Self::Permanent { .. } => ErrorCategory::Permanent,
            Self::Configuration(_) => ErrorCategory::Configuration,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.category() == ErrorCategory::NotFound
    }
}
