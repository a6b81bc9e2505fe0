//! In-memory BudgetLedger.
//!
//! Windows are created lazily with the default allowance and rolled on
//! access once `window_length` has passed.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use tokio::sync::Mutex;

use crate::domain::budget::BudgetWindow;
use crate::domain::errors::SwarmError;
use crate::domain::ids::OwnerId;
use crate::ports::{BudgetLedger, Clock};

pub struct InMemoryBudgetLedger {
    windows: Mutex<HashMap<OwnerId, BudgetWindow>>,
    clock: Arc<dyn Clock>,
    default_allowance: f64,
    window_length: Duration,
}

impl InMemoryBudgetLedger {
    pub fn new(clock: Arc<dyn Clock>, default_allowance: f64, window_length: Duration) -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
            clock,
            default_allowance,
            window_length,
        }
    }
}

/// Fetch the owner's window, creating or rolling it as needed.
fn current<'a>(
    windows: &'a mut HashMap<OwnerId, BudgetWindow>,
    owner: &OwnerId,
    ledger: &InMemoryBudgetLedger,
) -> &'a mut BudgetWindow {
    let now = ledger.clock.now();
    let window = windows
        .entry(owner.clone())
        .or_insert_with(|| BudgetWindow::new(owner.clone(), ledger.default_allowance, now));
    if window.is_expired(now, ledger.window_length) {
        tracing::debug!(owner = %owner, spent = window.spent, "budget window rolled");
        window.roll(now);
    }
    window
}

#[async_trait]
impl BudgetLedger for InMemoryBudgetLedger {
    async fn window(&self, owner: &OwnerId) -> Result<BudgetWindow, SwarmError> {
        let mut windows = self.windows.lock().await;
        Ok(current(&mut windows, owner, self).clone())
    }

    async fn try_reserve(&self, owner: &OwnerId, amount: f64) -> Result<BudgetWindow, SwarmError> {
        let mut windows = self.windows.lock().await;
        let window = current(&mut windows, owner, self);
        if !window.can_admit(amount) {
            return Err(SwarmError::BudgetExceeded {
                owner: owner.clone(),
                requested: amount,
                remaining: window.remaining(),
            });
        }
        window.spent += amount.max(0.0);
        Ok(window.clone())
    }

    async fn adjust(&self, owner: &OwnerId, delta: f64) -> Result<BudgetWindow, SwarmError> {
        let mut windows = self.windows.lock().await;
        let window = current(&mut windows, owner, self);
        window.spent = (window.spent + delta).max(0.0);
        Ok(window.clone())
    }

    async fn set_allowance(
        &self,
        owner: &OwnerId,
        allowance: f64,
    ) -> Result<BudgetWindow, SwarmError> {
        let mut windows = self.windows.lock().await;
        let window = current(&mut windows, owner, self);
        window.allowance = allowance.max(0.0);
        Ok(window.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::FixedClock;
    use chrono::{TimeZone, Utc};

    fn ledger(clock: Arc<FixedClock>) -> InMemoryBudgetLedger {
        InMemoryBudgetLedger::new(clock, 10.0, Duration::hours(24))
    }

    fn clock() -> Arc<FixedClock> {
        Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap(),
        ))
    }

    #[tokio::test]
    async fn reserve_refuses_what_does_not_fit() {
        let ledger = ledger(clock());
        let owner = OwnerId::new("o");
        ledger.set_allowance(&owner, 9.0).await.unwrap();
        ledger.try_reserve(&owner, 1.0).await.unwrap();

        ledger.try_reserve(&owner, 2.0).await.unwrap();
        ledger.try_reserve(&owner, 3.0).await.unwrap();
        let err = ledger.try_reserve(&owner, 4.0).await.unwrap_err();
        assert!(matches!(
            err,
            SwarmError::BudgetExceeded { requested, remaining, .. }
                if requested == 4.0 && (remaining - 3.0).abs() < 1e-9
        ));

        // refused reservation spends nothing
        assert!((ledger.window(&owner).await.unwrap().spent - 6.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn concurrent_reservations_never_overshoot() {
        let ledger = Arc::new(ledger(clock()));
        let owner = OwnerId::new("o");

        let mut joins = Vec::new();
        for _ in 0..50 {
            let ledger = Arc::clone(&ledger);
            let owner = owner.clone();
            joins.push(tokio::spawn(async move {
                ledger.try_reserve(&owner, 0.5).await.is_ok()
            }));
        }
        let mut admitted = 0;
        for j in joins {
            if j.await.unwrap() {
                admitted += 1;
            }
        }

        assert_eq!(admitted, 20);
        let w = ledger.window(&owner).await.unwrap();
        assert!(w.spent <= w.allowance + 1e-9);
    }

    #[tokio::test]
    async fn adjust_never_goes_negative() {
        let ledger = ledger(clock());
        let owner = OwnerId::new("o");
        ledger.try_reserve(&owner, 1.0).await.unwrap();
        let w = ledger.adjust(&owner, -5.0).await.unwrap();
        assert_eq!(w.spent, 0.0);
    }

    #[tokio::test]
    async fn window_rolls_after_length() {
        let clock = clock();
        let ledger = ledger(Arc::clone(&clock));
        let owner = OwnerId::new("o");
        ledger.try_reserve(&owner, 8.0).await.unwrap();
        assert!(ledger.try_reserve(&owner, 8.0).await.is_err());

        clock.advance(Duration::hours(24));
        let w = ledger.try_reserve(&owner, 8.0).await.unwrap();
        assert_eq!(w.window_start, clock.now());
        assert_eq!(w.spent, 8.0);
    }
}
