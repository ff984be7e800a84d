//! # Run Budget
//!
//! Caller-supplied limits on how much work one engine call may do.
//!
//! The engine is a pure fold, so there is nothing to cancel mid-way; instead
//! the transaction count is checked up front and the time limit is checked
//! between aggregation chunks.

use std::time::{Duration, Instant};

use crate::error::{CoreError, CoreResult};

/// Limits for a single engine call. `None` means unlimited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Budget {
    pub max_transactions: Option<usize>,
    pub time_limit: Option<Duration>,
}

impl Budget {
    /// A budget with no limits.
    pub fn unlimited() -> Self {
        Budget::default()
    }
}

/// A started budget: remembers when the call began.
#[derive(Debug, Clone, Copy)]
pub struct BudgetGuard {
    budget: Budget,
    started: Instant,
}

impl BudgetGuard {
    /// Starts the clock for `budget`.
    pub fn start(budget: Budget) -> Self {
        BudgetGuard {
            budget,
            started: Instant::now(),
        }
    }

    /// A guard that never trips.
    pub fn unlimited() -> Self {
        BudgetGuard::start(Budget::unlimited())
    }

    /// Fails when `count` transactions exceed the size limit.
    pub fn check_size(&self, count: usize) -> CoreResult<()> {
        match self.budget.max_transactions {
            Some(max) if count > max => Err(CoreError::TooManyTransactions { count, max }),
            _ => Ok(()),
        }
    }

    /// Fails when the time limit has elapsed.
    pub fn check_time(&self) -> CoreResult<()> {
        match self.budget.time_limit {
            Some(limit) if self.started.elapsed() > limit => Err(CoreError::TimeBudgetExceeded {
                limit_ms: limit.as_millis(),
            }),
            _ => Ok(()),
        }
    }
}
