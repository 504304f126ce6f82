//! # Error Types
//!
//! Domain-specific error types for till-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  till-core errors (this file)                                          │
//! │  ├── CoreError        - Domain rule violations                         │
//! │  └── ValidationError  - Malformed / incomplete input                   │
//! │                                                                         │
//! │  till-db errors (separate crate)                                       │
//! │  └── DbError          - Record store failures                          │
//! │                                                                         │
//! │  till-engine errors (separate crate)                                   │
//! │  └── EngineError      - Validation | Invariant | Storage funnel        │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → EngineError → caller              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Domain rule violations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A sale draft carries no line items.
    #[error("Sale has no line items")]
    EmptySale,

    /// A sale draft's declared total disagrees with its line totals.
    ///
    /// The total-equals-sum-of-lines invariant is checked at creation time,
    /// before anything is persisted.
    #[error("Sale total {declared} cents does not match line totals {computed} cents")]
    TotalMismatch { declared: i64, computed: i64 },

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Malformed or incomplete input, rejected before anything is persisted.
///
/// External invoice payloads are the main producer; batch ingestion reports
/// these per item.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Invalid format (e.g. an unparseable date).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Value must be strictly positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },
}

impl ValidationError {
    /// Creates a Required error for the given field.
    pub fn required(field: impl Into<String>) -> Self {
        ValidationError::Required {
            field: field.into(),
        }
    }

    /// Creates an InvalidFormat error.
    pub fn invalid_format(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ValidationError::InvalidFormat {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================
