//! # Error Types
//!
//! Fatal error types for vendops-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  vendops-core errors (this file)                                       │
//! │  ├── CoreError        - Fatal for the call that raised it              │
//! │  └── ValidationError  - Field-level input validation failures          │
//! │                                                                         │
//! │  vendops-core warnings (warning.rs)                                    │
//! │  └── Warning          - Non-fatal, attached to result objects          │
//! │                                                                         │
//! │  settle-cli errors (app)                                               │
//! │  └── CliError / ConfigError                                            │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → CliError → exit code              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Fatal vs Non-Fatal
//! A `CoreError` aborts the whole call. Problems confined to one record
//! (a malformed transaction, a machine with no fee rule) are reported as
//! [`crate::warning::Warning`]s instead, so unaffected groups still compute.

use chrono::{DateTime, Utc};
use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Fatal engine errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A reporting period whose start is not strictly before its end.
    ///
    /// ## When This Occurs
    /// - Zero-length period (start == end)
    /// - Inverted period (start > end)
    #[error("Invalid period: start {start} must be before end {end}")]
    InvalidPeriod {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    /// A commission policy record carries a model tag we do not know.
    #[error("Unknown commission model: '{0}'. Valid options: none, percent_gross, flat_month, hybrid")]
    UnknownPolicyModel(String),

    /// A cost allocation record carries a level tag we do not know.
    #[error("Unknown allocation level: '{0}'. Valid options: global, location, machine")]
    UnknownAllocationLevel(String),

    /// A cost allocation record carries a method tag we do not know.
    #[error("Unknown allocation method: '{0}'. Valid options: percentage, flat")]
    UnknownAllocationMethod(String),

    /// A location- or machine-level allocation without a target id.
    #[error("Allocation {allocation_id} is {level}-level but has no target_id")]
    MissingAllocationTarget {
        allocation_id: String,
        level: String,
    },

    /// The requested cost policy does not exist in the snapshot.
    #[error("Cost policy not found: {0}")]
    UnknownCostPolicy(String),

    /// A sum or product left the i64 cent range.
    ///
    /// We never truncate: the whole call is rejected and the caller must
    /// fix or split the input.
    #[error("Arithmetic overflow in {context}")]
    ArithmeticOverflow { context: String },

    /// The snapshot holds more transactions than the caller allowed.
    #[error("Transaction budget exceeded: {count} transactions, limit {max}")]
    TooManyTransactions { count: usize, max: usize },

    /// The computation ran past the caller-supplied time budget.
    #[error("Time budget of {limit_ms}ms exceeded")]
    TimeBudgetExceeded { limit_ms: u128 },

    /// The input snapshot could not be parsed.
    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(String),

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl CoreError {
    /// Shorthand for [`CoreError::ArithmeticOverflow`].
    pub fn overflow(context: impl Into<String>) -> Self {
        CoreError::ArithmeticOverflow {
            context: context.into(),
        }
    }
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// Raised while converting wire records into engine types, before any
/// calculation runs.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must be positive.
    #[error("{field} must be positive")]
    MustBePositive { field: String },

    /// Invalid format (e.g., whitespace in an id, inverted window).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================
