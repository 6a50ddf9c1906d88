//! Error handling strategy

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::ItemError;
use crate::reliability::RetryPolicy;

/// Error category an entry of the strategy can match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Transient,
    /// Permanent error: the referenced object does not exist
    NotFound,
    /// Permanent error: malformed data
    Schema,
    /// Any other permanent error
    Permanent,
    Configuration,
    /// Every category except `NotFound` and `Configuration`
    Any,
}

impl ErrorCategory {
    /// Whether an entry listing `self` applies to an error of `actual` category
    fn covers(self, actual: ErrorCategory) -> bool {
        match self {
            Self::Any => !matches!(actual, Self::NotFound | Self::Configuration),
            Self::Permanent => matches!(actual, Self::Permanent | Self::Schema),
            other => other == actual,
        }
    }
}

/// What to do when retries are exhausted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustedAction {
    Continue,
    Stop,
}

/// Reaction to a failed item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorReaction {
    /// Count the item as failed and go on
    Continue,
    /// Stop dispatching items; the activity fails
    Stop,
    /// Re-enqueue the item after a backoff
    RetryLater {
        #[serde(default)]
        retry: RetryPolicy,
        /// Falls back to the strategy's default reaction when absent
        #[serde(default, skip_serializing_if = "Option::is_none")]
        on_exhausted: Option<ExhaustedAction>,
    },
}

impl ErrorReaction {
    pub fn retry_later(retry: RetryPolicy, on_exhausted: ExhaustedAction) -> Self {
        Self::RetryLater {
            retry,
            on_exhausted: Some(on_exhausted),
        }
    }
}

/// Set of error categories an entry applies to
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorSituation {
    pub categories: Vec<ErrorCategory>,
}

impl ErrorSituation {
    pub fn of(categories: impl IntoIterator<Item = ErrorCategory>) -> Self {
        Self {
            categories: categories.into_iter().collect(),
        }
    }

    pub fn matches(&self, category: ErrorCategory) -> bool {
        self.categories.iter().any(|c| c.covers(category))
    }
}

/// One rule of the strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorHandlingEntry {
    pub situation: ErrorSituation,
    pub reaction: ErrorReaction,
    /// Stop the activity once this entry has matched this many times
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_after: Option<u32>,
}

impl ErrorHandlingEntry {
    pub fn new(situation: ErrorSituation, reaction: ErrorReaction) -> Self {
        Self {
            situation,
            reaction,
            stop_after: None,
        }
    }

    pub fn with_stop_after(mut self, limit: u32) -> Self {
        self.stop_after = Some(limit);
        self
    }
}

/// Ordered error handling rules of an activity
///
/// # Example
///
/// ```
/// use govrun_activity::processing::{
///     ErrorCategory, ErrorHandlingEntry, ErrorHandlingStrategy, ErrorReaction, ErrorSituation,
///     ExhaustedAction,
/// };
/// use govrun_activity::RetryPolicy;
///
/// let strategy = ErrorHandlingStrategy::new()
///     .with_entry(ErrorHandlingEntry::new(
///         ErrorSituation::of([ErrorCategory::Transient]),
///         ErrorReaction::retry_later(RetryPolicy::exponential(), ExhaustedAction::Continue),
///     ))
///     .with_default_reaction(ErrorReaction::Stop);
///
/// assert_eq!(strategy.entries.len(), 1);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorHandlingStrategy {
    #[serde(default)]
    pub entries: Vec<ErrorHandlingEntry>,
    /// Reaction when no entry matches; the handler's default when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_reaction: Option<ErrorReaction>,
}

impl ErrorHandlingStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Strategy whose only rule is the given default reaction
    pub fn always(reaction: ErrorReaction) -> Self {
        Self {
            entries: Vec::new(),
            default_reaction: Some(reaction),
        }
    }

    pub fn with_entry(mut self, entry: ErrorHandlingEntry) -> Self {
        self.entries.push(entry);
        self
    }

    pub fn with_default_reaction(mut self, reaction: ErrorReaction) -> Self {
        self.default_reaction = Some(reaction);
        self
    }
}

/// Decision for one failed item
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Count as failed, keep going
    Continue,
    /// Count as skipped, keep going
    Skip,
    /// Count as failed and halt the activity
    Stop { reason: String },
    /// Re-enqueue after the delay
    RetryAfter(Duration),
}

/// Applies a strategy to item errors, tracking per-entry match counts
///
/// Shared by all workers of one activity execution.
pub struct ErrorHandlingStrategyExecutor {
    strategy: ErrorHandlingStrategy,
    fallback: ErrorReaction,
    matches: Vec<AtomicU32>,
}

impl ErrorHandlingStrategyExecutor {
    /// `default_action` applies when the strategy has no default reaction of its own
    pub fn new(strategy: Option<ErrorHandlingStrategy>, default_action: ErrorReaction) -> Self {
        let strategy = strategy.unwrap_or_default();
        let fallback = strategy.default_reaction.clone().unwrap_or(default_action);
        let matches = strategy.entries.iter().map(|_| AtomicU32::new(0)).collect();
        Self {
            strategy,
            fallback,
            matches,
        }
    }

    /// Decide what to do with an item that failed on `attempt` (1-based)
    pub fn decide(&self, error: &ItemError, attempt: u32) -> Decision {
        let category = error.category();

        if category == ErrorCategory::Configuration {
            return Decision::Stop {
                reason: error.to_string(),
            };
        }

        let matched = self
            .strategy
            .entries
            .iter()
            .enumerate()
            .find(|(_, entry)| entry.situation.matches(category));

        let Some((index, entry)) = matched else {
            if category == ErrorCategory::NotFound {
                return Decision::Skip;
            }
            return self.react(&self.fallback, error, attempt);
        };

        if let Some(limit) = entry.stop_after {
            let count = self.matches[index].fetch_add(1, Ordering::Relaxed) + 1;
            if count >= limit {
                return Decision::Stop {
                    reason: format!("error limit of {} reached: {}", limit, error),
                };
            }
        }

        self.react(&entry.reaction, error, attempt)
    }

    fn react(&self, reaction: &ErrorReaction, error: &ItemError, attempt: u32) -> Decision {
        match reaction {
            ErrorReaction::Continue => Decision::Continue,
            ErrorReaction::Stop => Decision::Stop {
                reason: error.to_string(),
            },
            ErrorReaction::RetryLater {
                retry,
                on_exhausted,
            } => {
                if retry.has_attempts_remaining(attempt) {
                    return Decision::RetryAfter(retry.delay_for_attempt(attempt + 1));
                }
                let exhausted = on_exhausted.unwrap_or(match self.fallback {
                    ErrorReaction::Continue => ExhaustedAction::Continue,
                    _ => ExhaustedAction::Stop,
                });
                match exhausted {
                    ExhaustedAction::Continue => Decision::Continue,
                    ExhaustedAction::Stop => Decision::Stop {
                        reason: format!("retries exhausted after {} attempts: {}", attempt, error),
                    },
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn retry_transient(on_exhausted: Option<ExhaustedAction>) -> ErrorHandlingStrategy {
        ErrorHandlingStrategy::new().with_entry(ErrorHandlingEntry::new(
            ErrorSituation::of([ErrorCategory::Transient]),
            ErrorReaction::RetryLater {
                retry: RetryPolicy::fixed(Duration::from_millis(10), 3),
                on_exhausted,
            },
        ))
    }

    #[test]
    fn test_not_found_is_skipped_by_default() {
        let executor = ErrorHandlingStrategyExecutor::new(None, ErrorReaction::Stop);
        assert_eq!(
            executor.decide(&ItemError::not_found("gone"), 1),
            Decision::Skip
        );
    }

    #[test]
    fn test_not_found_follows_explicit_entry() {
        let strategy = ErrorHandlingStrategy::new().with_entry(ErrorHandlingEntry::new(
            ErrorSituation::of([ErrorCategory::NotFound]),
            ErrorReaction::Stop,
        ));
        let executor = ErrorHandlingStrategyExecutor::new(Some(strategy), ErrorReaction::Continue);
        assert!(matches!(
            executor.decide(&ItemError::not_found("gone"), 1),
            Decision::Stop { .. }
        ));
    }

    #[test]
    fn test_configuration_always_stops() {
        let executor = ErrorHandlingStrategyExecutor::new(
            Some(ErrorHandlingStrategy::always(ErrorReaction::Continue)),
            ErrorReaction::Continue,
        );
        assert!(matches!(
            executor.decide(&ItemError::configuration("no follow-on"), 1),
            Decision::Stop { .. }
        ));
    }

    #[test]
    fn test_retry_then_exhausted() {
        let executor = ErrorHandlingStrategyExecutor::new(
            Some(retry_transient(Some(ExhaustedAction::Continue))),
            ErrorReaction::Stop,
        );
        let error = ItemError::transient("timeout");

        assert_eq!(
            executor.decide(&error, 1),
            Decision::RetryAfter(Duration::from_millis(10))
        );
        assert_eq!(
            executor.decide(&error, 2),
            Decision::RetryAfter(Duration::from_millis(10))
        );
        assert_eq!(executor.decide(&error, 3), Decision::Continue);
    }

    #[test]
    fn test_exhausted_falls_back_to_default() {
        let stop = ErrorHandlingStrategyExecutor::new(Some(retry_transient(None)), ErrorReaction::Stop);
        assert!(matches!(
            stop.decide(&ItemError::transient("t"), 3),
            Decision::Stop { .. }
        ));

        let cont =
            ErrorHandlingStrategyExecutor::new(Some(retry_transient(None)), ErrorReaction::Continue);
        assert_eq!(cont.decide(&ItemError::transient("t"), 3), Decision::Continue);
    }

    #[test]
    fn test_stop_after_limit() {
        let strategy = ErrorHandlingStrategy::new().with_entry(
            ErrorHandlingEntry::new(ErrorSituation::of([ErrorCategory::Any]), ErrorReaction::Continue)
                .with_stop_after(3),
        );
        let executor = ErrorHandlingStrategyExecutor::new(Some(strategy), ErrorReaction::Continue);
        let error = ItemError::permanent("bad");

        assert_eq!(executor.decide(&error, 1), Decision::Continue);
        assert_eq!(executor.decide(&error, 1), Decision::Continue);
        assert!(matches!(executor.decide(&error, 1), Decision::Stop { .. }));
    }

    #[test]
    fn test_permanent_covers_schema_but_not_not_found() {
        let situation = ErrorSituation::of([ErrorCategory::Permanent]);
        assert!(situation.matches(ErrorCategory::Schema));
        assert!(situation.matches(ErrorCategory::Permanent));
        assert!(!situation.matches(ErrorCategory::NotFound));
        assert!(!ErrorSituation::of([ErrorCategory::Any]).matches(ErrorCategory::NotFound));
    }

    #[test]
    fn test_strategy_from_json() {
        let strategy: ErrorHandlingStrategy = serde_json::from_value(serde_json::json!({
            "entries": [{
                "situation": {"categories": ["transient"]},
                "reaction": {"retry_later": {"retry": {
                    "max_attempts": 2, "initial_interval": 100, "max_interval": 100,
                    "backoff_coefficient": 1.0, "jitter": 0.0
                }, "on_exhausted": "stop"}},
                "stop_after": 10
            }],
            "default_reaction": "continue"
        }))
        .unwrap();

        assert_eq!(strategy.entries[0].stop_after, Some(10));
        assert_eq!(strategy.default_reaction, Some(ErrorReaction::Continue));
    }
}
