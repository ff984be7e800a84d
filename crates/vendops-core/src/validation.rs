//! # Validation Module
//!
//! Field-level checks applied when wire records become engine types.
//!
//! ## Validation Strategy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: Deserialization (serde)                                      │
//! │  ├── Types, timestamps, required fields                                │
//! │  └── Closed enums for model / level / method tags                      │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: Record construction (THIS MODULE)                            │
//! │  ├── Rates within 0..=10000 bps                                        │
//! │  ├── Non-negative money amounts                                        │
//! │  └── Well-formed effective windows                                     │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: Per-record checks during folds                               │
//! │  └── Bad transactions are excluded with a warning, not fatal           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};

use crate::error::ValidationError;
use crate::money::BPS_DENOMINATOR;
use crate::reconciliation::UNMAPPED_PROCESSOR;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Maximum length of any record identifier.
pub const MAX_ID_LEN: usize = 128;

// =============================================================================
// Identifier Validators
// =============================================================================

/// Validates a record identifier.
///
/// ## Rules
/// - Must not be empty
/// - At most [`MAX_ID_LEN`] characters
/// - No whitespace or control characters
///
/// ## Example
/// ```rust
/// use vendops_core::validation::validate_id;
///
/// assert!(validate_id("machine_id", "vm-0042").is_ok());
/// assert!(validate_id("machine_id", "").is_err());
/// assert!(validate_id("machine_id", "vm 0042").is_err());
/// ```
pub fn validate_id(field: &str, id: &str) -> ValidationResult<()> {
    if id.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    if id.chars().count() > MAX_ID_LEN {
        return Err(ValidationError::InvalidFormat {
            field: field.to_string(),
            reason: format!("must be at most {} characters", MAX_ID_LEN),
        });
    }

    if id.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(ValidationError::InvalidFormat {
            field: field.to_string(),
            reason: "must not contain whitespace".to_string(),
        });
    }

    Ok(())
}

/// Validates a processor identifier.
///
/// Same rules as [`validate_id`], and the id must not be
/// [`UNMAPPED_PROCESSOR`], the row that collects transactions with no
/// processor.
///
/// ## Example
/// ```rust
/// use vendops_core::validation::validate_processor_id;
///
/// assert!(validate_processor_id("processor_id", "square").is_ok());
/// assert!(validate_processor_id("processor_id", "(unmapped)").is_err());
/// ```
pub fn validate_processor_id(field: &str, id: &str) -> ValidationResult<()> {
    validate_id(field, id)?;

    if id == UNMAPPED_PROCESSOR {
        return Err(ValidationError::InvalidFormat {
            field: field.to_string(),
            reason: format!("'{}' is reserved for transactions without a processor", id),
        });
    }

    Ok(())
}

// =============================================================================
// Numeric Validators
// =============================================================================

/// Validates a rate in basis points.
///
/// ## Rules
/// - Must be between 0 and 10000 (0% to 100%)
///
/// ## Example
/// ```rust
/// use vendops_core::validation::validate_bps;
///
/// assert!(validate_bps("percent_bps", 290).is_ok());
/// assert!(validate_bps("percent_bps", 10_001).is_err());
/// ```
pub fn validate_bps(field: &str, bps: u32) -> ValidationResult<()> {
    if i64::from(bps) > BPS_DENOMINATOR {
        return Err(ValidationError::OutOfRange {
            field: field.to_string(),
            min: 0,
            max: BPS_DENOMINATOR,
        });
    }

    Ok(())
}

/// Validates a non-negative amount in cents.
///
/// Zero is allowed (free vend, no flat fee, no floor).
pub fn validate_non_negative_cents(field: &str, cents: i64) -> ValidationResult<()> {
    if cents < 0 {
        return Err(ValidationError::OutOfRange {
            field: field.to_string(),
            min: 0,
            max: i64::MAX,
        });
    }

    Ok(())
}

/// Validates a sale quantity.
///
/// ## Rules
/// - Must be positive (> 0)
pub fn validate_quantity(qty: i64) -> ValidationResult<()> {
    if qty <= 0 {
        return Err(ValidationError::MustBePositive {
            field: "qty".to_string(),
        });
    }

    Ok(())
}

// =============================================================================
// Window Validators
// =============================================================================

/// Validates an effective window `[start, end)`.
///
/// An open-ended window (`end = None`) is always valid; a closed one must
/// have `start < end`.
pub fn validate_window(
    field: &str,
    start: DateTime<Utc>,
    end: Option<DateTime<Utc>>,
) -> ValidationResult<()> {
    match end {
        Some(end) if end <= start => Err(ValidationError::InvalidFormat {
            field: field.to_string(),
            reason: format!("effective_end {} is not after effective_start {}", end, start),
        }),
        _ => Ok(()),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
