//! Shared pool and its monthly spending quota.
//!
//! The pool may hold plenty of funds and still decline a charge: the quota
//! caps how much of it may be spent per calendar month (UTC). Both the
//! quota check and the balance check must pass.
//!
//! ## Cycles
//!
//! ```text
//! cycle_id = year * 12 + (month - 1)
//! ```
//!
//! There is no background timer. Every pool-path charge (and every read)
//! first calls [`QuotaLedger::rollover_if_needed`], which resets `used` to 0
//! and adopts the configured total when the wall clock has moved into a new
//! cycle. The pool balance and the cycle live behind one lock, so rollover
//! happens exactly once per boundary.

use std::sync::Arc;

use cairn_types::{Balance, Clock, QuotaCycle, QuotaSnapshot};
use chrono::{DateTime, Datelike, NaiveDate};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::{FundingError, Result};

/// Cycle id for a Unix timestamp.
pub fn cycle_for(unix_secs: u64) -> u32 {
    let secs = i64::try_from(unix_secs).unwrap_or(i64::MAX);
    match DateTime::from_timestamp(secs, 0) {
        Some(dt) => u32::try_from(dt.year()).unwrap_or(0) * 12 + dt.month0(),
        None => 0,
    }
}

/// Unix timestamp at which a cycle starts.
pub fn cycle_start(cycle_id: u32) -> u64 {
    let year = i32::try_from(cycle_id / 12).unwrap_or(i32::MAX);
    let month = cycle_id % 12 + 1;
    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|dt| u64::try_from(dt.and_utc().timestamp()).unwrap_or(0))
        .unwrap_or(0)
}

/// Why the pool declined a charge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolDecline {
    /// The cycle's remaining quota is below the amount.
    QuotaExhausted { remaining: Balance },
    /// The pool balance is below the amount.
    InsufficientBalance { balance: Balance },
}

/// A successful pool debit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolDebit {
    pub cycle_id: u32,
    pub balance_after: Balance,
    pub used_after: Balance,
}

#[derive(Debug)]
struct PoolState {
    cycle: QuotaCycle,
    balance: Balance,
}

/// Pool balance plus the quota cycle it is spent against.
pub struct QuotaLedger {
    state: Mutex<PoolState>,
    /// Total adopted at each rollover.
    configured_total: Balance,
    clock: Arc<dyn Clock>,
}

impl QuotaLedger {
    /// Create a ledger starting in the current cycle with nothing used.
    pub fn new(configured_total: Balance, pool_balance: Balance, clock: Arc<dyn Clock>) -> Self {
        let cycle = QuotaCycle::new(cycle_for(clock.now_secs()), configured_total);
        Self::restore(cycle, pool_balance, configured_total, clock)
    }

    /// Rehydrate from persisted state.
    ///
    /// A stored cycle keeps its own total until the next rollover.
    pub fn restore(
        cycle: QuotaCycle,
        pool_balance: Balance,
        configured_total: Balance,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let cycle = QuotaCycle {
            used: cycle.used.min(cycle.total),
            ..cycle
        };
        Self {
            state: Mutex::new(PoolState {
                cycle,
                balance: pool_balance,
            }),
            configured_total,
            clock,
        }
    }

    /// Reset `used` if the clock has entered a new cycle.
    ///
    /// Returns the cycle that was closed, if any.
    pub fn rollover_if_needed(&self) -> Option<QuotaCycle> {
        let mut state = self.state.lock();
        self.roll(&mut state)
    }

    fn roll(&self, state: &mut PoolState) -> Option<QuotaCycle> {
        let now_cycle = cycle_for(self.clock.now_secs());
        if now_cycle == state.cycle.cycle_id {
            return None;
        }
        let closed = state.cycle;
        state.cycle = QuotaCycle::new(now_cycle, self.configured_total);
        info!(
            closed_cycle = closed.cycle_id,
            closed_used = %closed.used,
            cycle = now_cycle,
            total = %self.configured_total,
            "quota cycle rolled over"
        );
        Some(closed)
    }

    /// The current cycle, after any pending rollover.
    pub fn current_cycle(&self) -> QuotaCycle {
        let mut state = self.state.lock();
        self.roll(&mut state);
        state.cycle
    }

    /// Quota left in the current cycle.
    pub fn remaining(&self) -> Balance {
        self.current_cycle().remaining()
    }

    pub fn pool_balance(&self) -> Balance {
        self.state.lock().balance
    }

    pub fn snapshot(&self) -> QuotaSnapshot {
        let mut state = self.state.lock();
        self.roll(&mut state);
        QuotaSnapshot {
            cycle: state.cycle,
            remaining: state.cycle.remaining(),
            pool_balance: state.balance,
            resets_at: cycle_start(state.cycle.cycle_id + 1),
        }
    }

    /// Check quota and balance, then debit, as one critical section.
    pub fn try_charge(&self, amount: Balance) -> std::result::Result<PoolDebit, PoolDecline> {
        let mut state = self.state.lock();
        self.roll(&mut state);

        let remaining = state.cycle.remaining();
        if remaining < amount {
            debug!(%amount, %remaining, "pool quota exhausted");
            return Err(PoolDecline::QuotaExhausted { remaining });
        }
        if state.balance < amount {
            debug!(%amount, balance = %state.balance, "pool balance too low");
            return Err(PoolDecline::InsufficientBalance {
                balance: state.balance,
            });
        }

        state.balance -= amount;
        state.cycle.used += amount;
        Ok(PoolDebit {
            cycle_id: state.cycle.cycle_id,
            balance_after: state.balance,
            used_after: state.cycle.used,
        })
    }

    /// Return a pool charge whose record was never committed.
    ///
    /// Quota usage is given back only while `cycle_id` is still current.
    pub fn refund(&self, amount: Balance, cycle_id: u32) -> Result<Balance> {
        let mut state = self.state.lock();
        state.balance = state
            .balance
            .checked_add(amount)
            .ok_or(FundingError::Overflow)?;
        if state.cycle.cycle_id == cycle_id {
            state.cycle.used = state.cycle.used.saturating_sub(amount);
        }
        Ok(state.balance)
    }

    /// Add funds to the pool. Called by the fee-routing collaborator only.
    pub fn credit_pool(&self, amount: Balance) -> Result<Balance> {
        let mut state = self.state.lock();
        state.balance = state
            .balance
            .checked_add(amount)
            .ok_or(FundingError::Overflow)?;
        Ok(state.balance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cairn_types::ManualClock;

    /// 2024-03-15 00:00:00 UTC.
    const MID_MARCH_2024: u64 = 1_710_460_800;
    /// 2024-04-01 00:00:00 UTC.
    const APRIL_2024: u64 = 1_711_929_600;

    fn ledger(total: Balance, balance: Balance) -> (QuotaLedger, ManualClock) {
        let clock = ManualClock::new(MID_MARCH_2024);
        let ledger = QuotaLedger::new(total, balance, Arc::new(clock.clone()));
        (ledger, clock)
    }

    #[test]
    fn test_cycle_for_boundaries() {
        assert_eq!(cycle_for(MID_MARCH_2024), 2024 * 12 + 2);
        assert_eq!(cycle_for(APRIL_2024 - 1), 24_290);
        assert_eq!(cycle_for(APRIL_2024), 24_291);
        // 2024-12-31 23:59:59 and 2025-01-01 00:00:00
        assert_eq!(cycle_for(1_735_689_599), 24_299);
        assert_eq!(cycle_for(1_735_689_600), 24_300);
    }

    #[test]
    fn test_cycle_start() {
        assert_eq!(cycle_start(24_291), APRIL_2024);
        assert_eq!(cycle_start(24_300), 1_735_689_600);
    }

    #[test]
    fn test_charge_within_quota() {
        let (ledger, _) = ledger(100, 1_000);
        let debit = ledger.try_charge(40).expect("charge");
        assert_eq!(debit.used_after, 40);
        assert_eq!(debit.balance_after, 960);
        assert_eq!(ledger.remaining(), 60);
    }

    #[test]
    fn test_quota_limits_well_funded_pool() {
        let (ledger, _) = ledger(100, 1_000_000);
        ledger.try_charge(90).expect("first charge");
        let decline = ledger.try_charge(20).expect_err("quota exhausted");
        assert_eq!(decline, PoolDecline::QuotaExhausted { remaining: 10 });
        assert_eq!(ledger.current_cycle().used, 90);
        assert_eq!(ledger.pool_balance(), 999_910);
    }

    #[test]
    fn test_balance_limits_generous_quota() {
        let (ledger, _) = ledger(1_000, 15);
        let decline = ledger.try_charge(20).expect_err("balance too low");
        assert_eq!(decline, PoolDecline::InsufficientBalance { balance: 15 });
        assert_eq!(ledger.current_cycle().used, 0);
    }

    #[test]
    fn test_used_never_exceeds_total() {
        let (ledger, _) = ledger(100, 10_000);
        for _ in 0..50 {
            let _ = ledger.try_charge(7);
            let cycle = ledger.current_cycle();
            assert!(cycle.used <= cycle.total);
        }
        assert_eq!(ledger.current_cycle().used, 98);
    }

    #[test]
    fn test_rollover_resets_used_once() {
        let (ledger, clock) = ledger(100, 10_000);
        ledger.try_charge(80).expect("charge");

        clock.set(APRIL_2024 + 10);
        let closed = ledger.rollover_if_needed().expect("rolled over");
        assert_eq!(closed.cycle_id, 24_290);
        assert_eq!(closed.used, 80);
        assert!(ledger.rollover_if_needed().is_none());

        let cycle = ledger.current_cycle();
        assert_eq!(cycle.cycle_id, 24_291);
        assert_eq!(cycle.used, 0);
        ledger.try_charge(100).expect("full quota available again");
    }

    #[test]
    fn test_charge_rolls_over_lazily() {
        let (ledger, clock) = ledger(50, 10_000);
        ledger.try_charge(50).expect("charge");
        assert!(ledger.try_charge(1).is_err());

        clock.set(APRIL_2024);
        let debit = ledger.try_charge(30).expect("new cycle");
        assert_eq!(debit.cycle_id, 24_291);
        assert_eq!(debit.used_after, 30);
    }

    #[test]
    fn test_restore_keeps_stored_total_until_rollover() {
        let clock = ManualClock::new(MID_MARCH_2024);
        let stored = QuotaCycle {
            cycle_id: 24_290,
            total: 100,
            used: 90,
        };
        let ledger = QuotaLedger::restore(stored, 500, 200, Arc::new(clock.clone()));
        assert_eq!(ledger.remaining(), 10);

        clock.set(APRIL_2024);
        assert_eq!(ledger.current_cycle().total, 200);
        assert_eq!(ledger.remaining(), 200);
    }

    #[test]
    fn test_snapshot_reports_reset_time() {
        let (ledger, _) = ledger(100, 7);
        let snapshot = ledger.snapshot();
        assert_eq!(snapshot.pool_balance, 7);
        assert_eq!(snapshot.remaining, 100);
        assert_eq!(snapshot.resets_at, APRIL_2024);
    }

    #[test]
    fn test_refund_after_rollover_keeps_new_usage() {
        let (ledger, clock) = ledger(100, 1_000);
        let debit = ledger.try_charge(40).expect("charge");

        ledger.refund(40, debit.cycle_id).expect("refund");
        assert_eq!(ledger.current_cycle().used, 0);
        assert_eq!(ledger.pool_balance(), 1_000);

        let debit = ledger.try_charge(40).expect("charge");
        clock.set(APRIL_2024);
        ledger.try_charge(10).expect("april charge");
        ledger.refund(40, debit.cycle_id).expect("refund");
        assert_eq!(ledger.current_cycle().used, 10);
        assert_eq!(ledger.pool_balance(), 990);
    }

    #[test]
    fn test_credit_pool_overflow() {
        let (ledger, _) = ledger(100, Balance::MAX);
        assert_eq!(ledger.credit_pool(1), Err(FundingError::Overflow));
        assert_eq!(ledger.pool_balance(), Balance::MAX);
    }
}
