//! # Engine Error Types
//!
//! The error funnel every service call resolves into.
//!
//! ## Taxonomy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     EngineError Taxonomy                                │
//! │                                                                         │
//! │  Validation   malformed external payload    → recoverable, per-item    │
//! │  Domain       sale draft rule violation     → recoverable              │
//! │  Invariant    closing a closed session,     → recoverable, carries     │
//! │               premature end-of-session RAZ    the earliest valid date  │
//! │  NothingToCancel  no matching active sale   → recoverable              │
//! │  Storage      store unavailable / write     → aborts the whole         │
//! │               not durably committed           multi-step operation     │
//! │                                                                         │
//! │  Reconciliation anomalies (duplicate open session, clamped stock) are  │
//! │  NOT errors: they self-heal and are logged via tracing::warn!.         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::NaiveDate;
use thiserror::Error;

use till_core::{CoreError, ValidationError};
use till_db::DbError;

/// Ledger service errors.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed or incomplete external payload, rejected pre-persistence.
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Domain rule violation in a sale draft.
    #[error("{0}")]
    Domain(#[from] CoreError),

    /// A business invariant forbids the operation right now.
    ///
    /// `earliest` carries the first date the operation becomes legal, when
    /// the rule is date-gated (end-of-session reset before the event end).
    #[error("Invariant violation: {reason}")]
    Invariant {
        reason: String,
        earliest: Option<NaiveDate>,
    },

    /// Cancellation found no matching non-canceled sale.
    #[error("Nothing to cancel{}", id.as_deref().map(|i| format!(": {i}")).unwrap_or_default())]
    NothingToCancel { id: Option<String> },

    /// Record store failure. Multi-step operations abort before any
    /// destructive step.
    #[error("Storage failure: {0}")]
    Storage(#[from] DbError),
}

impl EngineError {
    /// Creates an Invariant error with no date gate.
    pub fn invariant(reason: impl Into<String>) -> Self {
        EngineError::Invariant {
            reason: reason.into(),
            earliest: None,
        }
    }

    /// Creates a date-gated Invariant error.
    pub fn invariant_until(reason: impl Into<String>, earliest: NaiveDate) -> Self {
        EngineError::Invariant {
            reason: reason.into(),
            earliest: Some(earliest),
        }
    }
}

/// Result type for ledger service operations.
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invariant_messages() {
        let err = EngineError::invariant("session already closed");
        assert_eq!(err.to_string(), "Invariant violation: session already closed");

        let gated = EngineError::invariant_until(
            "event has not ended",
            NaiveDate::from_ymd_opt(2026, 4, 4).unwrap(),
        );
        match gated {
            EngineError::Invariant { earliest, .. } => {
                assert_eq!(earliest, NaiveDate::from_ymd_opt(2026, 4, 4));
            }
            _ => panic!("expected invariant"),
        }
    }

    #[test]
    fn test_nothing_to_cancel_messages() {
        assert_eq!(
            EngineError::NothingToCancel { id: None }.to_string(),
            "Nothing to cancel"
        );
        assert_eq!(
            EngineError::NothingToCancel {
                id: Some("s1".into())
            }
            .to_string(),
            "Nothing to cancel: s1"
        );
    }
}
