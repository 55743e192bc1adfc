//! # cairn-billing
//!
//! Funding for pin requests. Every charge is paid by exactly one of three
//! sources, evaluated in a fixed priority order:
//!
//! 1. the shared **pool**, capped per calendar month by a spending quota,
//! 2. the **subject** funding account,
//! 3. the **caller**'s own account.
//!
//! Amounts are never split across sources. Accounts are only debited here;
//! crediting belongs to the fee-routing collaborator.
//!
//! ## Modules
//!
//! - [`quota`] - Pool balance and monthly quota cycle with lazy rollover
//! - [`accounts`] - Subject and caller balances with per-key atomic debits
//! - [`resolver`] - The funding cascade

pub mod accounts;
pub mod quota;
pub mod resolver;

pub use accounts::AccountBook;
pub use quota::QuotaLedger;
pub use resolver::{FundingResolver, Resolution};

use cairn_types::Balance;

/// Error types for funding operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FundingError {
    /// No source could cover the amount. Nothing was charged.
    #[error("insufficient funds: no source can cover {amount}")]
    InsufficientFunds {
        /// The requested amount.
        amount: Balance,
    },

    /// Amount is zero.
    #[error("charge amount is zero")]
    ZeroAmount,

    /// Arithmetic overflow while crediting.
    #[error("arithmetic overflow in balance calculation")]
    Overflow,
}

/// Convenience result type for funding operations.
pub type Result<T> = std::result::Result<T, FundingError>;
