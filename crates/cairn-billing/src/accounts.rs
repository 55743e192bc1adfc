//! Subject and caller funding accounts.
//!
//! Each balance lives in a sharded concurrent map. A debit holds the key's
//! entry guard across the sufficiency check and the subtraction, so two
//! concurrent charges against one nearly empty account cannot both pass.
//! Missing accounts have a balance of zero.

use cairn_types::{Balance, CallerId, SubjectId};
use dashmap::DashMap;

use crate::{FundingError, Result};

/// Balances for subject and caller accounts.
#[derive(Debug, Default)]
pub struct AccountBook {
    subjects: DashMap<SubjectId, Balance>,
    callers: DashMap<CallerId, Balance>,
}

impl AccountBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subject_balance(&self, subject_id: SubjectId) -> Balance {
        self.subjects.get(&subject_id).map(|b| *b).unwrap_or(0)
    }

    pub fn caller_balance(&self, caller: &CallerId) -> Balance {
        self.callers.get(caller).map(|b| *b).unwrap_or(0)
    }

    /// Debit `amount` if the subject can cover it. Returns the new balance.
    pub fn try_debit_subject(&self, subject_id: SubjectId, amount: Balance) -> Option<Balance> {
        let mut balance = self.subjects.get_mut(&subject_id)?;
        if *balance < amount {
            return None;
        }
        *balance -= amount;
        Some(*balance)
    }

    /// Debit `amount` if the caller can cover it. Returns the new balance.
    pub fn try_debit_caller(&self, caller: &CallerId, amount: Balance) -> Option<Balance> {
        let mut balance = self.callers.get_mut(caller)?;
        if *balance < amount {
            return None;
        }
        *balance -= amount;
        Some(*balance)
    }

    /// Fee-routing entry point. Not used by the funding cascade.
    pub fn credit_subject(&self, subject_id: SubjectId, amount: Balance) -> Result<Balance> {
        let mut balance = self.subjects.entry(subject_id).or_insert(0);
        *balance = balance.checked_add(amount).ok_or(FundingError::Overflow)?;
        Ok(*balance)
    }

    /// Fee-routing entry point. Not used by the funding cascade.
    pub fn credit_caller(&self, caller: &CallerId, amount: Balance) -> Result<Balance> {
        let mut balance = self.callers.entry(caller.clone()).or_insert(0);
        *balance = balance.checked_add(amount).ok_or(FundingError::Overflow)?;
        Ok(*balance)
    }

    /// Load a persisted subject balance, replacing any in-memory value.
    pub fn restore_subject(&self, subject_id: SubjectId, balance: Balance) {
        self.subjects.insert(subject_id, balance);
    }

    /// Load a persisted caller balance, replacing any in-memory value.
    pub fn restore_caller(&self, caller: CallerId, balance: Balance) {
        self.callers.insert(caller, balance);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn alice() -> CallerId {
        CallerId::new("alice").expect("caller")
    }

    #[test]
    fn test_missing_account_is_empty() {
        let book = AccountBook::new();
        assert_eq!(book.subject_balance(1), 0);
        assert_eq!(book.caller_balance(&alice()), 0);
        assert_eq!(book.try_debit_subject(1, 1), None);
        assert_eq!(book.try_debit_caller(&alice(), 1), None);
    }

    #[test]
    fn test_debit_exact_balance() {
        let book = AccountBook::new();
        book.credit_subject(7, 50).expect("credit");
        assert_eq!(book.try_debit_subject(7, 50), Some(0));
        assert_eq!(book.try_debit_subject(7, 1), None);
    }

    #[test]
    fn test_insufficient_debit_leaves_balance() {
        let book = AccountBook::new();
        book.credit_caller(&alice(), 10).expect("credit");
        assert_eq!(book.try_debit_caller(&alice(), 11), None);
        assert_eq!(book.caller_balance(&alice()), 10);
    }

    #[test]
    fn test_credit_overflow_rejected() {
        let book = AccountBook::new();
        book.restore_subject(3, Balance::MAX);
        assert_eq!(book.credit_subject(3, 1), Err(FundingError::Overflow));
        assert_eq!(book.subject_balance(3), Balance::MAX);
    }

    #[test]
    fn test_concurrent_debits_never_overdraw() {
        let book = Arc::new(AccountBook::new());
        book.credit_subject(1, 100).expect("credit");

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let book = book.clone();
                std::thread::spawn(move || {
                    (0..10).filter(|_| book.try_debit_subject(1, 3).is_some()).count()
                })
            })
            .collect();

        let successes: usize = handles
            .into_iter()
            .map(|h| h.join().expect("thread"))
            .sum();
        assert_eq!(successes, 33);
        assert_eq!(book.subject_balance(1), 1);
    }
}
