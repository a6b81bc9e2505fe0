//! Per-owner spend window.
//!
//! ## Accounting
//! - **Admission** reserves each task's `estimated_cost` up front, so a plan
//!   can never be admitted past the allowance.
//! - **First attempt** replaces the reservation with the actual cost
//!   (`Task::record_cost` returns the difference).
//! - **Retries** are charged in full on top.
//! - **Cancellation or rollback** of a task that never ran gives its
//!   reservation back.
//!
//! `spent <= allowance` holds after every admission; later actual costs may
//! overrun it, since work already done cannot be refused.
//!
//! Windows are fixed-length and roll lazily: the ledger checks
//! `is_expired` on access and calls `roll` instead of running a timer.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::ids::OwnerId;

/// Slack for float comparisons on money.
const EPSILON: f64 = 1e-9;

/// Allowance and spend of one owner within the current window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetWindow {
    pub owner_id: OwnerId,
    pub window_start: DateTime<Utc>,
    /// Spend ceiling for the window.
    pub allowance: f64,
    /// Reservations plus actual-cost adjustments so far.
    pub spent: f64,
}

impl BudgetWindow {
    pub fn new(owner_id: OwnerId, allowance: f64, window_start: DateTime<Utc>) -> Self {
        Self {
            owner_id,
            window_start,
            allowance,
            spent: 0.0,
        }
    }

    /// Allowance left, never negative.
    pub fn remaining(&self) -> f64 {
        (self.allowance - self.spent).max(0.0)
    }

    /// Would admitting `cost` keep `spent <= allowance`?
    pub fn can_admit(&self, cost: f64) -> bool {
        self.spent + cost <= self.allowance + EPSILON
    }

    pub fn is_expired(&self, now: DateTime<Utc>, length: Duration) -> bool {
        now >= self.window_start + length
    }

    /// Start a fresh window at `now`, keeping the allowance.
    pub fn roll(&mut self, now: DateTime<Utc>) {
        self.window_start = now;
        self.spent = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admission_checks_remaining_allowance() {
        let mut w = BudgetWindow::new(OwnerId::new("o"), 9.0, Utc::now());
        w.spent = 1.0;

        assert_eq!(w.remaining(), 8.0);
        assert!(w.can_admit(2.0 + 3.0));
        assert!(w.can_admit(8.0));
        assert!(!w.can_admit(2.0 + 3.0 + 4.0));
    }

    #[test]
    fn window_expires_and_rolls() {
        let start = Utc::now();
        let mut w = BudgetWindow::new(OwnerId::new("o"), 5.0, start);
        w.spent = 4.0;

        let length = Duration::hours(24);
        assert!(!w.is_expired(start + Duration::hours(23), length));
        assert!(w.is_expired(start + Duration::hours(24), length));

        w.roll(start + Duration::hours(24));
        assert_eq!(w.spent, 0.0);
        assert_eq!(w.allowance, 5.0);
    }
}
