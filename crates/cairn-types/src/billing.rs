//! Funding sources, quota cycles and charge records.

use serde::{Deserialize, Serialize};

use crate::{Balance, CallerId, Cid, PinId, SubjectId};

/// Which account paid for a pin.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ts_rs::TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum FundingSource {
    /// Shared pool, capped by the monthly quota.
    Pool,
    SubjectAccount,
    CallerAccount,
}

impl FundingSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            FundingSource::Pool => "pool",
            FundingSource::SubjectAccount => "subject_account",
            FundingSource::CallerAccount => "caller_account",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pool" => Some(FundingSource::Pool),
            "subject_account" => Some(FundingSource::SubjectAccount),
            "caller_account" => Some(FundingSource::CallerAccount),
            _ => None,
        }
    }
}

/// The concrete account debited by a charge.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ts_rs::TS)]
#[ts(export)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Payer {
    Pool,
    Subject(SubjectId),
    Caller(CallerId),
}

impl Payer {
    pub fn source(&self) -> FundingSource {
        match self {
            Payer::Pool => FundingSource::Pool,
            Payer::Subject(_) => FundingSource::SubjectAccount,
            Payer::Caller(_) => FundingSource::CallerAccount,
        }
    }

    /// Storage key of the debited account ("" for the pool).
    pub fn account_key(&self) -> String {
        match self {
            Payer::Pool => String::new(),
            Payer::Subject(id) => id.to_string(),
            Payer::Caller(caller) => caller.to_string(),
        }
    }
}

/// Spending accounting for one quota cycle of the shared pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ts_rs::TS)]
#[ts(export)]
pub struct QuotaCycle {
    /// `year * 12 + (month - 1)`, UTC.
    pub cycle_id: u32,
    pub total: Balance,
    /// Never exceeds `total`.
    pub used: Balance,
}

impl QuotaCycle {
    pub fn new(cycle_id: u32, total: Balance) -> Self {
        Self {
            cycle_id,
            total,
            used: 0,
        }
    }

    pub fn remaining(&self) -> Balance {
        self.total.saturating_sub(self.used)
    }
}

/// Operator view of the shared pool.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ts_rs::TS)]
#[ts(export)]
pub struct QuotaSnapshot {
    pub cycle: QuotaCycle,
    pub remaining: Balance,
    pub pool_balance: Balance,
    /// Unix time at which the next cycle starts.
    pub resets_at: u64,
}

/// Audit record of one debit. Exactly one exists per pin record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ts_rs::TS)]
#[ts(export)]
pub struct Charge {
    pub charge_id: String,
    pub pin_id: PinId,
    pub cid: Cid,
    pub payer: Payer,
    pub amount: Balance,
    /// Quota cycle the amount counted against (pool charges only).
    pub cycle_id: Option<u32>,
    pub charged_at: u64,
}

impl Charge {
    pub fn source(&self) -> FundingSource {
        self.payer.source()
    }
}
