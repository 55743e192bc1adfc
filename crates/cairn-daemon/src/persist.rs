//! Write-through to SQLite and rehydration at startup.
//!
//! Each write runs in one transaction. Pin rows only move forward (see
//! [`cairn_db::queries::pins::upsert`]) and balances change by deltas, so
//! writes from concurrent requests may land in any order.

use std::sync::Arc;

use cairn_billing::{AccountBook, FundingResolver, QuotaLedger};
use cairn_db::queries::{accounts, charges, pins, quota, settings};
use cairn_db::{Delta, Result};
use cairn_pins::{EventBus, PinRegistry, Submitted};
use cairn_types::{Balance, CallerId, Clock, Payer, PinRequest, SubjectId};
use rusqlite::Connection;
use tracing::info;

use crate::config::DaemonConfig;

/// An account credited by the fee-routing collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreditTarget {
    Pool,
    Subject(SubjectId),
    Caller(CallerId),
}

/// State rebuilt from the database.
pub struct Loaded {
    pub registry: PinRegistry,
    pub auto_pin_enabled: bool,
}

/// Rebuild ledgers and the registry from `conn`.
///
/// Seeds the pool with `billing.initial_pool_balance` if it was never
/// seeded. A stored quota cycle is restored as is and rolls over lazily.
pub fn load(
    conn: &Connection,
    config: &DaemonConfig,
    clock: Arc<dyn Clock>,
    events: EventBus,
) -> Result<Loaded> {
    let now = clock.now_secs();
    if accounts::seed_pool(conn, Balance::from(config.billing.initial_pool_balance), now)? {
        info!(balance = config.billing.initial_pool_balance, "seeded pool");
    }
    let pool = accounts::pool_balance(conn)?.unwrap_or(0);

    let ledger = match quota::latest(conn)? {
        Some(cycle) => QuotaLedger::restore(cycle, pool, config.quota_total(), clock.clone()),
        None => QuotaLedger::new(config.quota_total(), pool, clock.clone()),
    };

    let book = AccountBook::new();
    let subjects = accounts::list_subjects(conn)?;
    let callers = accounts::list_callers(conn)?;
    let account_count = subjects.len() + callers.len();
    for (subject_id, balance) in subjects {
        book.restore_subject(subject_id, balance);
    }
    for (caller, balance) in callers {
        book.restore_caller(caller, balance);
    }

    let resolver = FundingResolver::new(Arc::new(ledger), Arc::new(book));
    let registry = PinRegistry::new(resolver, config.registry_config(), clock, events);

    let current = pins::list_all(conn)?;
    let pin_count = current.len();
    for pin in current {
        registry.restore(pin);
    }
    for pin in pins::list_history(conn)? {
        registry.restore_history(pin);
    }
    for charge in charges::list_all(conn)? {
        registry.restore_charge(charge);
    }

    let auto_pin_enabled =
        settings::get_bool(conn, settings::AUTO_PIN_ENABLED, config.ingest.auto_pin_enabled)?;

    info!(
        pins = pin_count,
        accounts = account_count,
        %pool,
        auto_pin_enabled,
        "state rehydrated"
    );
    Ok(Loaded {
        registry,
        auto_pin_enabled,
    })
}

/// Persist a new record together with its charge and debit.
///
/// `cycle_total` opens the quota cycle row when a pool charge is the first
/// one counted against that cycle.
pub fn record_submission(
    conn: &Connection,
    submitted: &Submitted,
    cycle_total: Balance,
) -> Result<()> {
    let charge = &submitted.charge;
    let now = charge.charged_at;
    let tx = conn.unchecked_transaction()?;

    if let Some(old) = &submitted.superseded {
        pins::archive(&tx, old, now)?;
    }
    pins::upsert(&tx, &submitted.record)?;
    charges::insert(&tx, charge)?;

    let debit = Delta::Debit(charge.amount);
    match &charge.payer {
        Payer::Pool => {
            accounts::adjust_pool(&tx, debit, now)?;
            if let Some(cycle_id) = charge.cycle_id {
                quota::add_used(&tx, cycle_id, cycle_total, charge.amount, now)?;
            }
        }
        Payer::Subject(subject_id) => {
            accounts::adjust_subject(&tx, *subject_id, debit, now)?;
        }
        Payer::Caller(caller) => {
            accounts::adjust_caller(&tx, caller, debit, now)?;
        }
    }

    tx.commit()?;
    Ok(())
}

/// Persist a replica or failure transition.
pub fn record_transition(conn: &Connection, pin: &PinRequest) -> Result<bool> {
    pins::upsert(conn, pin)
}

/// Persist a credit before it is applied in memory.
pub fn record_credit(conn: &Connection, target: &CreditTarget, amount: Balance, now: u64) -> Result<()> {
    adjust(conn, target, Delta::Credit(amount), now)
}

/// Undo a persisted credit that could not be applied in memory.
pub fn revert_credit(conn: &Connection, target: &CreditTarget, amount: Balance, now: u64) -> Result<()> {
    adjust(conn, target, Delta::Debit(amount), now)
}

fn adjust(conn: &Connection, target: &CreditTarget, delta: Delta, now: u64) -> Result<()> {
    match target {
        CreditTarget::Pool => accounts::adjust_pool(conn, delta, now)?,
        CreditTarget::Subject(subject_id) => accounts::adjust_subject(conn, *subject_id, delta, now)?,
        CreditTarget::Caller(caller) => accounts::adjust_caller(conn, caller, delta, now)?,
    };
    Ok(())
}

pub fn record_auto_pin(conn: &Connection, enabled: bool) -> Result<()> {
    settings::set_bool(conn, settings::AUTO_PIN_ENABLED, enabled)
}
