//! Correlation errors

use govrun_activity::processing::ItemError;
use govrun_activity::StoreError;

/// Errors raised while correlating a subject or resolving its case
#[derive(Debug, thiserror::Error)]
pub enum CorrelationError {
    /// Invalid correlator configuration; never retried
    #[error("correlator configuration error: {0}")]
    Configuration(String),

    /// Malformed data, e.g. an unsupported case outcome
    #[error("schema error: {0}")]
    Schema(String),

    /// The subject or another required object does not exist
    #[error("{object_type} '{id}' not found")]
    NotFound { object_type: String, id: String },

    /// The external match service could not be reached or answered with an error
    #[error("match service error: {message}")]
    MatchService {
        message: String,
        /// HTTP status, when the service answered
        status: Option<u16>,
    },

    #[error("case manager error: {0}")]
    CaseManager(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl CorrelationError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema(message.into())
    }

    pub fn not_found(object_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            object_type: object_type.into(),
            id: id.into(),
        }
    }

    /// Whether retrying the same call may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Self::MatchService { status, .. } => status.map_or(true, |s| s >= 500 || s == 429),
            Self::Store(StoreError::Database(_)) => true,
            Self::Store(StoreError::ConcurrencyConflict { .. }) => true,
            Self::CaseManager(_) => true,
            _ => false,
        }
    }
}

impl From<CorrelationError> for ItemError {
    fn from(error: CorrelationError) -> Self {
        match &error {
            CorrelationError::Configuration(_) => ItemError::configuration(error.to_string()),
            CorrelationError::Schema(_) => ItemError::schema(error.to_string()),
            CorrelationError::NotFound { .. } => ItemError::not_found(error.to_string()),
            CorrelationError::Store(e) if e.is_not_found() => ItemError::not_found(error.to_string()),
            _ if error.is_transient() => ItemError::transient(error.to_string()),
            _ => ItemError::permanent(error.to_string()),
        }
    }
}
