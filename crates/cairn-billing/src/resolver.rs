//! The funding cascade: pool, then subject account, then caller account.
//!
//! The first source that can cover the whole amount pays. Each source's
//! check-then-debit is atomic on its own; the scan across sources is not,
//! since only one source is ever touched.

use std::sync::Arc;

use cairn_types::{Balance, CallerId, FundingSource, Payer, QuotaCycle, SubjectId};
use tracing::{debug, info};

use crate::quota::PoolDecline;
use crate::{AccountBook, FundingError, QuotaLedger, Result};

/// Outcome of a successful resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub payer: Payer,
    pub amount: Balance,
    /// Quota cycle charged (pool only).
    pub cycle_id: Option<u32>,
    /// Cycle closed by the lazy rollover preceding this charge.
    pub closed_cycle: Option<QuotaCycle>,
}

impl Resolution {
    pub fn source(&self) -> FundingSource {
        self.payer.source()
    }
}

/// Picks and debits the funding source for a charge.
#[derive(Clone)]
pub struct FundingResolver {
    quota: Arc<QuotaLedger>,
    accounts: Arc<AccountBook>,
}

impl FundingResolver {
    pub fn new(quota: Arc<QuotaLedger>, accounts: Arc<AccountBook>) -> Self {
        Self { quota, accounts }
    }

    pub fn quota(&self) -> &Arc<QuotaLedger> {
        &self.quota
    }

    pub fn accounts(&self) -> &Arc<AccountBook> {
        &self.accounts
    }

    /// Charge `amount` to the first source able to cover it.
    ///
    /// # Errors
    ///
    /// - [`FundingError::ZeroAmount`] if `amount` is zero
    /// - [`FundingError::InsufficientFunds`] if no source can cover it; no
    ///   source is debited in that case
    pub fn resolve_and_charge(
        &self,
        subject_id: SubjectId,
        caller: &CallerId,
        amount: Balance,
    ) -> Result<Resolution> {
        if amount == 0 {
            return Err(FundingError::ZeroAmount);
        }

        let closed_cycle = self.quota.rollover_if_needed();

        match self.quota.try_charge(amount) {
            Ok(debit) => {
                info!(subject_id, %amount, cycle = debit.cycle_id, "charged pool");
                return Ok(Resolution {
                    payer: Payer::Pool,
                    amount,
                    cycle_id: Some(debit.cycle_id),
                    closed_cycle,
                });
            }
            Err(PoolDecline::QuotaExhausted { remaining }) => {
                debug!(subject_id, %amount, %remaining, "pool skipped: quota");
            }
            Err(PoolDecline::InsufficientBalance { balance }) => {
                debug!(subject_id, %amount, %balance, "pool skipped: balance");
            }
        }

        if let Some(left) = self.accounts.try_debit_subject(subject_id, amount) {
            info!(subject_id, %amount, balance = %left, "charged subject account");
            return Ok(Resolution {
                payer: Payer::Subject(subject_id),
                amount,
                cycle_id: None,
                closed_cycle,
            });
        }

        if let Some(left) = self.accounts.try_debit_caller(caller, amount) {
            info!(subject_id, %caller, %amount, balance = %left, "charged caller account");
            return Ok(Resolution {
                payer: Payer::Caller(caller.clone()),
                amount,
                cycle_id: None,
                closed_cycle,
            });
        }

        info!(subject_id, %caller, %amount, "no funding source can cover charge");
        Err(FundingError::InsufficientFunds { amount })
    }

    /// Undo a resolution whose charge was never committed.
    pub fn refund(&self, resolution: &Resolution) -> Result<()> {
        let amount = resolution.amount;
        match (&resolution.payer, resolution.cycle_id) {
            (Payer::Pool, Some(cycle_id)) => {
                self.quota.refund(amount, cycle_id)?;
            }
            (Payer::Pool, None) => {
                self.quota.credit_pool(amount)?;
            }
            (Payer::Subject(subject_id), _) => {
                self.accounts.credit_subject(*subject_id, amount)?;
            }
            (Payer::Caller(caller), _) => {
                self.accounts.credit_caller(caller, amount)?;
            }
        }
        info!(payer = ?resolution.payer, %amount, "charge refunded");
        Ok(())
    }
}
