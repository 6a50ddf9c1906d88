//! Item processing requests

use serde::{Deserialize, Serialize};

use super::error::ItemError;
use crate::definition::ActivityPath;

/// Kind of a permanent error attached to an item by its source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermanentErrorKind {
    /// The object the item refers to no longer exists
    NotFound,
    /// The item does not conform to the expected schema
    Schema,
    Other,
}

/// Error state an item arrives with (e.g. a change the connector could not fully fetch)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ErrorState {
    #[default]
    Success,
    Transient {
        message: String,
    },
    Permanent {
        kind: PermanentErrorKind,
        message: String,
    },
}

impl ErrorState {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

/// One input item on its way through the coordinator
#[derive(Debug, Clone)]
pub struct ItemProcessingRequest<T> {
    /// Sequence number within the activity run
    pub sequence: u64,
    pub item: T,
    pub error_state: ErrorState,
    /// Bucket the item belongs to
    pub bucket: Option<u32>,
    /// Human-readable identification for logs
    pub key: Option<String>,
    /// Path of the activity that produced the item
    pub owner: ActivityPath,
    /// Processing attempt, 1-based
    pub attempt: u32,
}

impl<T> ItemProcessingRequest<T> {
    pub fn new(sequence: u64, item: T, owner: ActivityPath) -> Self {
        Self {
            sequence,
            item,
            error_state: ErrorState::Success,
            bucket: None,
            key: None,
            owner,
            attempt: 1,
        }
    }

    pub fn with_error_state(mut self, error_state: ErrorState) -> Self {
        self.error_state = error_state;
        self
    }

    pub fn in_bucket(mut self, bucket: u32) -> Self {
        self.bucket = Some(bucket);
        self
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Convert a non-success error state into the matching item error
    ///
    /// Processors call this first so that items the source already marked
    /// as failed go through the error handling strategy.
    pub fn check_error_state(&self) -> Result<(), ItemError> {
        match &self.error_state {
            ErrorState::Success => Ok(()),
            ErrorState::Transient { message } => Err(ItemError::Transient(message.clone())),
            ErrorState::Permanent { kind, message } => Err(ItemError::Permanent {
                kind: *kind,
                message: message.clone(),
            }),
        }
    }

    /// Name used in logs: the key when present, the sequence number otherwise
    pub fn display_key(&self) -> String {
        self.key
            .clone()
            .unwrap_or_else(|| format!("#{}", self.sequence))
    }
}
