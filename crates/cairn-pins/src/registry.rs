//! Pin registry and lifecycle state machine.
//!
//! ```text
//!            report_replica(n >= 1)
//!  Pending ─────────────────────────► Active ──┐ report_replica (never lowers)
//!     │                                 │  ◄───┘
//!     │ report_failure                  │ report_failure
//!     ▼                                 ▼
//!   Failed ◄────────────────────────────┘
//!     │
//!     └── retry (new charge) ──► Pending (new record)
//! ```
//!
//! One current record exists per CID. Every mutation of a CID runs under
//! that CID's map entry, so reports apply in receipt order and a submission
//! holds the entry across charge and insert: two concurrent submissions
//! for one CID cannot both be charged.
//!
//! Lock order is pin entry, then pool, then subject account, then caller
//! account, with the history entry last. Nothing takes them in the other
//! direction.
//!
//! Records are never deleted. A failed record replaced by a resubmission or
//! a retry moves to the CID's history. Every committed debit leaves exactly
//! one [`Charge`] in the CID's charge log; a debit whose commit fails is
//! refunded.

use std::convert::Infallible;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use cairn_billing::{FundingError, FundingResolver, Resolution};
use cairn_types::events::PinEventKind;
use cairn_types::{
    Balance, CallerId, Charge, Cid, Clock, PinId, PinRequest, PinStatus, SubjectId,
    DEFAULT_MAX_REPLICAS, DEFAULT_MAX_SIZE_BYTES,
};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, error, info, warn};

use crate::{EventBus, PinError, Result};

/// Limits consumed from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryConfig {
    pub max_size_bytes: u64,
    pub max_replicas: u32,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: DEFAULT_MAX_SIZE_BYTES,
            max_replicas: DEFAULT_MAX_REPLICAS,
        }
    }
}

/// Parameters of a pin submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinSpec {
    pub subject_id: SubjectId,
    pub caller: CallerId,
    pub cid: Cid,
    pub size_bytes: u64,
    pub target_replicas: u32,
    pub price: Balance,
}

/// A newly funded record with the charge backing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submitted {
    pub record: PinRequest,
    pub charge: Charge,
    /// The failed record this one replaced, now in history.
    pub superseded: Option<PinRequest>,
}

/// Anything that accepts pin submissions.
pub trait PinSubmitter {
    fn submit(&self, spec: PinSpec) -> Result<Submitted>;
}

/// Authoritative store of pin records.
pub struct PinRegistry {
    pins: DashMap<Cid, PinRequest>,
    history: DashMap<Cid, Vec<PinRequest>>,
    charges: DashMap<Cid, Vec<Charge>>,
    next_pin_id: AtomicU64,
    resolver: FundingResolver,
    config: RegistryConfig,
    clock: Arc<dyn Clock>,
    events: EventBus,
}

impl PinRegistry {
    pub fn new(
        resolver: FundingResolver,
        config: RegistryConfig,
        clock: Arc<dyn Clock>,
        events: EventBus,
    ) -> Self {
        Self {
            pins: DashMap::new(),
            history: DashMap::new(),
            charges: DashMap::new(),
            next_pin_id: AtomicU64::new(1),
            resolver,
            config,
            clock,
            events,
        }
    }

    pub fn resolver(&self) -> &FundingResolver {
        &self.resolver
    }

    pub fn config(&self) -> RegistryConfig {
        self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Create and fund a pin.
    ///
    /// # Errors
    ///
    /// - [`PinError::InvalidSize`] / [`PinError::SizeTooLarge`] on a bad size
    /// - [`PinError::InvalidReplicaCount`] outside `[1, max_replicas]`
    /// - [`PinError::InvalidPrice`] on a zero price
    /// - [`PinError::AlreadyPending`] if a non-failed record exists
    /// - [`PinError::InsufficientFunds`] if no source can pay; no record is created
    pub fn submit_pin(
        &self,
        subject_id: SubjectId,
        caller: CallerId,
        cid: Cid,
        size_bytes: u64,
        target_replicas: u32,
        price: Balance,
    ) -> Result<PinId> {
        let spec = PinSpec {
            subject_id,
            caller,
            cid,
            size_bytes,
            target_replicas,
            price,
        };
        self.submit(spec).map(|s| s.record.pin_id)
    }

    /// Create and fund a pin, returning the record and its charge.
    pub fn submit(&self, spec: PinSpec) -> Result<Submitted> {
        self.submit_with(spec, |_| Ok::<(), Infallible>(()))
    }

    /// Create and fund a pin, running `commit` before the record becomes
    /// visible.
    ///
    /// `commit` runs under the CID's entry, after the charge. If it fails the
    /// charge is refunded, nothing is recorded and the error comes back as
    /// [`PinError::CommitFailed`].
    pub fn submit_with<E, F>(&self, spec: PinSpec, commit: F) -> Result<Submitted>
    where
        E: fmt::Display,
        F: FnOnce(&Submitted) -> std::result::Result<(), E>,
    {
        self.validate(&spec)?;
        let now = self.clock.now_secs();

        let submitted = match self.pins.entry(spec.cid.clone()) {
            Entry::Occupied(mut entry) => {
                if entry.get().blocks_resubmission() {
                    debug!(cid = %spec.cid, status = ?entry.get().status, "rejecting duplicate pin");
                    return Err(PinError::AlreadyPending { cid: spec.cid });
                }
                let submitted = self.fund_and_commit(&spec, Some(entry.get().clone()), now, commit)?;
                *entry.get_mut() = submitted.record.clone();
                if let Some(old) = &submitted.superseded {
                    self.archive(old.clone());
                }
                submitted
            }
            Entry::Vacant(entry) => {
                let submitted = self.fund_and_commit(&spec, None, now, commit)?;
                entry.insert(submitted.record.clone());
                submitted
            }
        };

        info!(
            pin_id = submitted.record.pin_id,
            cid = %submitted.record.cid,
            subject_id = submitted.record.subject_id,
            source = submitted.record.funding_source.as_str(),
            price = %submitted.record.price_charged,
            "pin requested"
        );
        self.events.publish(
            PinEventKind::PinRequested,
            Some(&submitted.record),
            now,
            serde_json::json!({
                "funding_source": submitted.record.funding_source,
                "price_charged": submitted.record.price_charged.to_string(),
                "target_replicas": submitted.record.target_replicas,
            }),
        );
        Ok(submitted)
    }

    /// Start a new paid attempt for a failed pin.
    ///
    /// The original subject, caller, size, replica target and price are
    /// reused; the failed record moves to history.
    ///
    /// # Errors
    ///
    /// - [`PinError::NotFound`] if the CID is unknown
    /// - [`PinError::InvalidTransition`] unless the pin is `Failed`
    /// - [`PinError::InsufficientFunds`] if no source can pay; the failed
    ///   record stays current
    pub fn retry(&self, cid: &Cid) -> Result<Submitted> {
        self.retry_with(cid, |_| Ok::<(), Infallible>(()))
    }

    /// [`retry`](Self::retry) with a commit step, as in
    /// [`submit_with`](Self::submit_with). A failed commit leaves the failed
    /// record current.
    pub fn retry_with<E, F>(&self, cid: &Cid, commit: F) -> Result<Submitted>
    where
        E: fmt::Display,
        F: FnOnce(&Submitted) -> std::result::Result<(), E>,
    {
        let now = self.clock.now_secs();
        let mut entry = self.pins.get_mut(cid).ok_or_else(|| PinError::NotFound {
            cid: cid.clone(),
        })?;

        if entry.status != PinStatus::Failed {
            warn!(%cid, status = ?entry.status, "retry on pin that has not failed");
            return Err(PinError::InvalidTransition {
                cid: cid.clone(),
                from: entry.status,
                operation: "retry",
            });
        }

        let spec = PinSpec {
            subject_id: entry.subject_id,
            caller: entry.caller.clone(),
            cid: cid.clone(),
            size_bytes: entry.size_bytes,
            target_replicas: entry.target_replicas,
            price: entry.price_charged,
        };
        let previous = entry.pin_id;
        let submitted = self.fund_and_commit(&spec, Some(entry.value().clone()), now, commit)?;
        *entry.value_mut() = submitted.record.clone();
        if let Some(old) = &submitted.superseded {
            self.archive(old.clone());
        }
        drop(entry);

        let record = &submitted.record;
        info!(
            pin_id = record.pin_id,
            previous_pin_id = previous,
            %cid,
            source = record.funding_source.as_str(),
            "pin retried"
        );
        self.events.publish(
            PinEventKind::PinRetried,
            Some(record),
            now,
            serde_json::json!({
                "previous_pin_id": previous,
                "funding_source": record.funding_source,
                "price_charged": record.price_charged.to_string(),
            }),
        );
        Ok(submitted)
    }

    /// `retry` returning only the new pin id.
    pub fn retry_pin(&self, cid: &Cid) -> Result<PinId> {
        self.retry(cid).map(|s| s.record.pin_id)
    }

    /// Apply a replica count reported by the replicator.
    ///
    /// Counts lower than the stored one are ignored. Returns the record as
    /// it stands after the report.
    ///
    /// # Errors
    ///
    /// - [`PinError::NotFound`] if the CID is unknown
    /// - [`PinError::InvalidTransition`] if the pin is `Failed`
    pub fn report_replica(&self, cid: &Cid, current_replicas: u32) -> Result<PinRequest> {
        let now = self.clock.now_secs();
        let mut entry = self.pins.get_mut(cid).ok_or_else(|| {
            warn!(%cid, current_replicas, "replica report for unknown pin");
            PinError::NotFound { cid: cid.clone() }
        })?;
        let record = entry.value_mut();

        if record.status == PinStatus::Failed {
            warn!(%cid, current_replicas, "replica report for failed pin");
            return Err(PinError::InvalidTransition {
                cid: cid.clone(),
                from: PinStatus::Failed,
                operation: "report replicas for",
            });
        }

        let was_converged = record.is_converged();
        let previous = record.current_replicas;
        let mut fired = Vec::new();

        if current_replicas > previous {
            record.current_replicas = current_replicas;
            fired.push(PinEventKind::ReplicaCountChanged);
        } else if current_replicas < previous {
            debug!(%cid, reported = current_replicas, stored = previous, "ignoring lower replica count");
        }

        if record.status == PinStatus::Pending && record.current_replicas >= 1 {
            record.status = PinStatus::Active;
            fired.push(PinEventKind::PinActivated);
        }

        if !was_converged && record.is_converged() {
            fired.push(PinEventKind::PinConverged);
        }

        if !fired.is_empty() {
            record.updated_at = now;
            record.revision += 1;
        }
        let snapshot = record.clone();
        drop(entry);

        for kind in fired {
            if kind == PinEventKind::PinConverged {
                info!(pin_id = snapshot.pin_id, %cid, replicas = snapshot.current_replicas, "pin converged");
            }
            self.events.publish(
                kind,
                Some(&snapshot),
                now,
                serde_json::json!({
                    "previous_replicas": previous,
                    "current_replicas": snapshot.current_replicas,
                    "target_replicas": snapshot.target_replicas,
                }),
            );
        }
        Ok(snapshot)
    }

    /// Mark a pin as failed with the replicator's error code.
    ///
    /// `current_replicas` is kept as it was for audit.
    ///
    /// # Errors
    ///
    /// - [`PinError::NotFound`] if the CID is unknown
    /// - [`PinError::InvalidTransition`] if the pin is already `Failed`
    pub fn report_failure(&self, cid: &Cid, error_code: u32) -> Result<PinRequest> {
        let now = self.clock.now_secs();
        let mut entry = self.pins.get_mut(cid).ok_or_else(|| {
            warn!(%cid, error_code, "failure report for unknown pin");
            PinError::NotFound { cid: cid.clone() }
        })?;
        let record = entry.value_mut();

        if record.status == PinStatus::Failed {
            warn!(%cid, error_code, "failure report for failed pin");
            return Err(PinError::InvalidTransition {
                cid: cid.clone(),
                from: PinStatus::Failed,
                operation: "fail",
            });
        }

        let from = record.status;
        record.status = PinStatus::Failed;
        record.error_code = Some(error_code);
        record.updated_at = now;
        record.revision += 1;
        let snapshot = record.clone();
        drop(entry);

        info!(pin_id = snapshot.pin_id, %cid, error_code, from = from.as_str(), "pin failed");
        self.events.publish(
            PinEventKind::PinFailed,
            Some(&snapshot),
            now,
            serde_json::json!({
                "error_code": error_code,
                "previous_status": from,
            }),
        );
        Ok(snapshot)
    }

    /// Current record for a CID.
    pub fn get(&self, cid: &Cid) -> Option<PinRequest> {
        self.pins.get(cid).map(|r| r.clone())
    }

    /// Superseded records for a CID, oldest first.
    pub fn history(&self, cid: &Cid) -> Vec<PinRequest> {
        self.history.get(cid).map(|h| h.clone()).unwrap_or_default()
    }

    /// Every charge made for a CID, oldest first.
    pub fn charges(&self, cid: &Cid) -> Vec<Charge> {
        self.charges.get(cid).map(|c| c.clone()).unwrap_or_default()
    }

    /// Current records owned by a subject, by pin id.
    pub fn list_by_subject(&self, subject_id: SubjectId) -> Vec<PinRequest> {
        let mut records: Vec<PinRequest> = self
            .pins
            .iter()
            .filter(|r| r.subject_id == subject_id)
            .map(|r| r.clone())
            .collect();
        records.sort_by_key(|r| r.pin_id);
        records
    }

    /// Number of current records.
    pub fn len(&self) -> usize {
        self.pins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pins.is_empty()
    }

    /// Load a persisted current record.
    pub fn restore(&self, record: PinRequest) {
        self.bump_next_id(record.pin_id);
        self.pins.insert(record.cid.clone(), record);
    }

    /// Load a persisted superseded record.
    pub fn restore_history(&self, record: PinRequest) {
        self.bump_next_id(record.pin_id);
        let mut list = self.history.entry(record.cid.clone()).or_default();
        list.push(record);
        list.sort_by_key(|r| r.pin_id);
    }

    /// Load a persisted charge.
    pub fn restore_charge(&self, charge: Charge) {
        let mut list = self.charges.entry(charge.cid.clone()).or_default();
        list.push(charge);
        list.sort_by_key(|c| c.pin_id);
    }

    fn bump_next_id(&self, seen: PinId) {
        self.next_pin_id.fetch_max(seen + 1, Ordering::SeqCst);
    }

    fn validate(&self, spec: &PinSpec) -> Result<()> {
        if spec.size_bytes == 0 {
            return Err(PinError::InvalidSize);
        }
        if spec.size_bytes > self.config.max_size_bytes {
            return Err(PinError::SizeTooLarge {
                size: spec.size_bytes,
                max: self.config.max_size_bytes,
            });
        }
        if spec.target_replicas == 0 || spec.target_replicas > self.config.max_replicas {
            return Err(PinError::InvalidReplicaCount {
                requested: spec.target_replicas,
                max: self.config.max_replicas,
            });
        }
        if spec.price == 0 {
            return Err(PinError::InvalidPrice);
        }
        Ok(())
    }

    /// Charge for `spec`, commit the result and log the charge.
    ///
    /// Runs under the CID's entry. A failed commit refunds the charge.
    fn fund_and_commit<E, F>(
        &self,
        spec: &PinSpec,
        superseded: Option<PinRequest>,
        now: u64,
        commit: F,
    ) -> Result<Submitted>
    where
        E: fmt::Display,
        F: FnOnce(&Submitted) -> std::result::Result<(), E>,
    {
        let resolution = self
            .resolver
            .resolve_and_charge(spec.subject_id, &spec.caller, spec.price)
            .map_err(|e| match e {
                FundingError::ZeroAmount => PinError::InvalidPrice,
                FundingError::InsufficientFunds { amount } => PinError::InsufficientFunds { amount },
                FundingError::Overflow => PinError::InsufficientFunds { amount: spec.price },
            })?;
        self.emit_rollover(resolution.closed_cycle, now);

        let pin_id = self.next_pin_id.fetch_add(1, Ordering::SeqCst);
        let charge = build_charge(pin_id, &spec.cid, &resolution, now);
        let record = PinRequest {
            pin_id,
            cid: spec.cid.clone(),
            subject_id: spec.subject_id,
            caller: spec.caller.clone(),
            size_bytes: spec.size_bytes,
            target_replicas: spec.target_replicas,
            current_replicas: 0,
            funding_source: resolution.source(),
            price_charged: resolution.amount,
            charge_id: charge.charge_id.clone(),
            status: PinStatus::Pending,
            error_code: None,
            created_at: now,
            updated_at: now,
            revision: 1,
        };
        let submitted = Submitted {
            record,
            charge,
            superseded,
        };

        if let Err(e) = commit(&submitted) {
            let detail = e.to_string();
            warn!(pin_id, cid = %spec.cid, error = %detail, "commit failed, refunding charge");
            if let Err(refund) = self.resolver.refund(&resolution) {
                error!(pin_id, cid = %spec.cid, error = %refund, "refund failed");
            }
            return Err(PinError::CommitFailed(detail));
        }

        self.charges
            .entry(spec.cid.clone())
            .or_default()
            .push(submitted.charge.clone());
        Ok(submitted)
    }

    fn archive(&self, record: PinRequest) {
        self.history.entry(record.cid.clone()).or_default().push(record);
    }

    fn emit_rollover(&self, closed: Option<cairn_types::QuotaCycle>, now: u64) {
        if let Some(cycle) = closed {
            self.events.publish(
                PinEventKind::QuotaRolledOver,
                None,
                now,
                serde_json::json!({
                    "closed_cycle": cycle.cycle_id,
                    "closed_used": cycle.used.to_string(),
                    "closed_total": cycle.total.to_string(),
                }),
            );
        }
    }
}

impl PinSubmitter for PinRegistry {
    fn submit(&self, spec: PinSpec) -> Result<Submitted> {
        PinRegistry::submit(self, spec)
    }
}

/// Derive the charge id and audit record for a resolution.
fn build_charge(pin_id: PinId, cid: &Cid, resolution: &Resolution, now: u64) -> Charge {
    let preimage = format!(
        "cairn-charge:{pin_id}:{cid}:{}:{}:{}:{now}",
        resolution.source().as_str(),
        resolution.payer.account_key(),
        resolution.amount,
    );
    Charge {
        charge_id: blake3::hash(preimage.as_bytes()).to_hex().to_string(),
        pin_id,
        cid: cid.clone(),
        payer: resolution.payer.clone(),
        amount: resolution.amount,
        cycle_id: resolution.cycle_id,
        charged_at: now,
    }
}
