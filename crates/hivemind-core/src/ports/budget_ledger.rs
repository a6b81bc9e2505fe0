//! BudgetLedger port.
//!
//! Spend per owner inside a rolling window. Admission goes through
//! `try_reserve`, a single check-and-increment, so concurrent decomposers
//! can never overshoot the allowance between them.

use async_trait::async_trait;

use crate::domain::budget::BudgetWindow;
use crate::domain::errors::SwarmError;
use crate::domain::ids::OwnerId;

#[async_trait]
pub trait BudgetLedger: Send + Sync {
    /// Current window, rolled first if it has expired.
    async fn window(&self, owner: &OwnerId) -> Result<BudgetWindow, SwarmError>;

    /// Reserve `amount` if it fits, else `BudgetExceeded` with nothing spent.
    async fn try_reserve(&self, owner: &OwnerId, amount: f64) -> Result<BudgetWindow, SwarmError>;

    /// Correct spend after the fact (actual vs estimated, refunds).
    /// Never refused; spend does not go below zero.
    async fn adjust(&self, owner: &OwnerId, delta: f64) -> Result<BudgetWindow, SwarmError>;

    async fn set_allowance(&self, owner: &OwnerId, allowance: f64)
    -> Result<BudgetWindow, SwarmError>;
}
