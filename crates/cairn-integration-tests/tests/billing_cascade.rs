//! Integration test: funding cascade and pin lifecycle against the registry.
//!
//! 1. Pool, subject and caller are tried in order; one source pays in full
//! 2. Replica reports drive Pending -> Active and convergence
//! 3. Failure and retry produce a fresh funded record
//! 4. Auto-pin ingestion forwards each (subject, cid) once
//! 5. Concurrent submissions for one CID fund exactly one record

use std::sync::Arc;

use cairn_integration_tests::{caller, cid, registry, Funding, ManualClock, MID_MARCH_2024};
use cairn_pins::{AutoPinIngestor, ContentSaved, IngestConfig, IngestOutcome, PinError, PinSpec, PinView};
use cairn_types::{FundingSource, Payer, PinStatus};

fn spec(raw_cid: &str, replicas: u32, price: u128) -> PinSpec {
    PinSpec {
        subject_id: 7,
        caller: caller("0xalice"),
        cid: cid(raw_cid),
        size_bytes: 10,
        target_replicas: replicas,
        price,
    }
}

#[test]
fn subject_pays_when_quota_is_short() {
    let clock = ManualClock::new(MID_MARCH_2024);
    let reg = registry(
        Funding {
            quota_total: 100,
            quota_used: 90,
            pool_balance: 1_000,
        },
        &clock,
    );
    reg.resolver().accounts().credit_subject(7, 50).expect("credit");

    let submitted = reg.submit(spec("bafyA", 1, 20)).expect("submit");
    assert_eq!(submitted.record.funding_source, FundingSource::SubjectAccount);
    assert_eq!(submitted.charge.payer, Payer::Subject(7));

    let quota = reg.resolver().quota();
    assert_eq!(quota.current_cycle().used, 90);
    assert_eq!(quota.pool_balance(), 1_000);
    assert_eq!(reg.resolver().accounts().subject_balance(7), 30);
}

#[test]
fn caller_pays_last_and_nothing_is_split() {
    let clock = ManualClock::new(MID_MARCH_2024);
    let reg = registry(
        Funding {
            quota_total: 100,
            quota_used: 95,
            pool_balance: 1_000,
        },
        &clock,
    );
    let accounts = reg.resolver().accounts();
    accounts.credit_subject(7, 15).expect("credit");
    accounts.credit_caller(&caller("0xalice"), 25).expect("credit");

    let submitted = reg.submit(spec("bafyB", 1, 20)).expect("submit");
    assert_eq!(submitted.record.funding_source, FundingSource::CallerAccount);
    assert_eq!(accounts.subject_balance(7), 15);
    assert_eq!(accounts.caller_balance(&caller("0xalice")), 5);
    assert_eq!(reg.resolver().quota().current_cycle().used, 95);
}

#[test]
fn insufficient_funds_leaves_no_trace() {
    let clock = ManualClock::new(MID_MARCH_2024);
    let reg = registry(
        Funding {
            quota_total: 100,
            quota_used: 100,
            pool_balance: 1_000,
        },
        &clock,
    );

    let err = reg.submit(spec("bafyC", 1, 20)).expect_err("unfunded");
    assert_eq!(err, PinError::InsufficientFunds { amount: 20 });
    assert!(reg.get(&cid("bafyC")).is_none());
    assert!(reg.charges(&cid("bafyC")).is_empty());

    // Once funded the same CID goes through.
    reg.resolver().accounts().credit_subject(7, 20).expect("credit");
    reg.submit(spec("bafyC", 1, 20)).expect("funded");
}

#[test]
fn replica_reports_activate_then_converge() {
    let clock = ManualClock::new(MID_MARCH_2024);
    let reg = registry(Funding::default(), &clock);
    let qm1 = cid("Qm1");
    reg.submit_pin(7, caller("0xalice"), qm1.clone(), 10, 3, 5).expect("submit");
    assert_eq!(reg.get(&qm1).map(|p| p.status), Some(PinStatus::Pending));

    let active = reg.report_replica(&qm1, 1).expect("report");
    assert_eq!(active.status, PinStatus::Active);
    assert_eq!(active.current_replicas, 1);
    assert!(!PinView::project(active).converged);

    let full = reg.report_replica(&qm1, 3).expect("report");
    assert_eq!(full.status, PinStatus::Active);
    assert_eq!(full.current_replicas, 3);
    assert!(PinView::project(full).converged);
}

#[test]
fn failure_then_retry_charges_again() {
    let clock = ManualClock::new(MID_MARCH_2024);
    let reg = registry(Funding::default(), &clock);
    let qm2 = cid("Qm2");
    let first = reg.submit(spec("Qm2", 2, 5)).expect("submit");

    let failed = reg.report_failure(&qm2, 42).expect("fail");
    assert_eq!(failed.status, PinStatus::Failed);
    assert_eq!(failed.error_code, Some(42));

    clock.advance(60);
    let retried = reg.retry(&qm2).expect("retry");
    assert_eq!(retried.record.status, PinStatus::Pending);
    assert!(retried.record.pin_id > first.record.pin_id);
    assert_ne!(retried.record.charge_id, first.record.charge_id);
    assert_eq!(retried.superseded.as_ref().map(|r| r.pin_id), Some(first.record.pin_id));

    assert_eq!(reg.history(&qm2), vec![failed]);
    assert_eq!(reg.charges(&qm2).len(), 2);
    assert_eq!(reg.resolver().quota().current_cycle().used, 10);
}

#[test]
fn retry_requires_failed_record() {
    let clock = ManualClock::new(MID_MARCH_2024);
    let reg = registry(Funding::default(), &clock);
    assert!(matches!(reg.retry(&cid("bafyNone")), Err(PinError::NotFound { .. })));

    reg.submit(spec("bafyD", 1, 5)).expect("submit");
    assert!(matches!(
        reg.retry(&cid("bafyD")),
        Err(PinError::InvalidTransition { .. })
    ));
}

#[test]
fn auto_pin_forwards_once_per_subject_and_cid() {
    let clock = ManualClock::new(MID_MARCH_2024);
    let reg = registry(Funding::default(), &clock);
    let ingestor = AutoPinIngestor::new(IngestConfig::default(), Arc::new(clock.clone()));
    let event = ContentSaved {
        subject_id: 7,
        caller: caller("0xalice"),
        cid: cid("Qm3"),
        size_bytes: 10,
        target_replicas: 1,
        price: 5,
    };

    assert!(matches!(
        ingestor.on_content_saved(event.clone(), &reg),
        IngestOutcome::Forwarded(Ok(_))
    ));
    assert!(matches!(ingestor.on_content_saved(event, &reg), IngestOutcome::Duplicate));
    assert_eq!(reg.charges(&cid("Qm3")).len(), 1);
    assert_eq!(reg.resolver().quota().current_cycle().used, 5);
}

#[test]
fn concurrent_submissions_fund_one_record() {
    let clock = ManualClock::new(MID_MARCH_2024);
    let reg = Arc::new(registry(Funding::default(), &clock));

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let reg = reg.clone();
            std::thread::spawn(move || reg.submit(spec("bafyRace", 1, 7)).is_ok())
        })
        .collect();
    let wins = handles
        .into_iter()
        .map(|h| h.join().expect("thread"))
        .filter(|ok| *ok)
        .count();

    assert_eq!(wins, 1);
    assert_eq!(reg.charges(&cid("bafyRace")).len(), 1);
    assert_eq!(reg.resolver().quota().current_cycle().used, 7);
}

#[test]
fn concurrent_submissions_never_overdraw_quota() {
    let clock = ManualClock::new(MID_MARCH_2024);
    let reg = Arc::new(registry(
        Funding {
            quota_total: 50,
            quota_used: 0,
            pool_balance: 1_000,
        },
        &clock,
    ));

    let handles: Vec<_> = (0..20)
        .map(|i| {
            let reg = reg.clone();
            std::thread::spawn(move || reg.submit(spec(&format!("bafy{i}"), 1, 10)).is_ok())
        })
        .collect();
    let funded = handles
        .into_iter()
        .map(|h| h.join().expect("thread"))
        .filter(|ok| *ok)
        .count();

    assert_eq!(funded, 5);
    assert_eq!(reg.resolver().quota().current_cycle().used, 50);
    assert_eq!(reg.resolver().quota().pool_balance(), 950);
}
