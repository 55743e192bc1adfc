//! Auto-pin ingestion of content-saved notifications.
//!
//! The ingestor forwards each notification to the registry at most once per
//! `(subject, cid)` while the pair is remembered. Pairs are forgotten after
//! `dedup_ttl_secs`, or oldest-first once `dedup_capacity` pairs are held;
//! the registry's own `AlreadyPending` check still guards forgotten pairs.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cairn_types::{Balance, CallerId, Cid, Clock, SubjectId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::registry::{PinSpec, PinSubmitter, Submitted};
use crate::{PinError, Result};

/// A content-saved notification from the upload path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentSaved {
    pub subject_id: SubjectId,
    pub caller: CallerId,
    pub cid: Cid,
    pub size_bytes: u64,
    pub target_replicas: u32,
    pub price: Balance,
}

impl From<ContentSaved> for PinSpec {
    fn from(event: ContentSaved) -> Self {
        PinSpec {
            subject_id: event.subject_id,
            caller: event.caller,
            cid: event.cid,
            size_bytes: event.size_bytes,
            target_replicas: event.target_replicas,
            price: event.price,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestConfig {
    pub enabled: bool,
    pub dedup_ttl_secs: u64,
    pub dedup_capacity: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dedup_ttl_secs: 86_400,
            dedup_capacity: 65_536,
        }
    }
}

/// What happened to a notification.
#[derive(Debug)]
pub enum IngestOutcome {
    /// Forwarded to the registry, with its answer.
    Forwarded(Result<Submitted>),
    /// Already forwarded for this `(subject, cid)`.
    Duplicate,
    /// Auto-pinning is off.
    Disabled,
}

impl IngestOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestOutcome::Forwarded(Ok(_)) => "submitted",
            IngestOutcome::Forwarded(Err(_)) => "rejected",
            IngestOutcome::Duplicate => "duplicate",
            IngestOutcome::Disabled => "disabled",
        }
    }
}

type DedupKey = (SubjectId, Cid);

/// Remembered pairs with insertion order for eviction.
#[derive(Default)]
struct DedupSet {
    seen: HashMap<DedupKey, u64>,
    order: VecDeque<(DedupKey, u64)>,
}

impl DedupSet {
    /// Record `key` at `now` unless it is already live. Returns whether it
    /// was newly recorded.
    fn insert(&mut self, key: DedupKey, now: u64, ttl: u64, capacity: usize) -> bool {
        self.expire(now, ttl);
        if self.seen.contains_key(&key) {
            return false;
        }
        while self.seen.len() >= capacity.max(1) {
            let Some((old, at)) = self.order.pop_front() else {
                break;
            };
            if self.seen.get(&old) == Some(&at) {
                self.seen.remove(&old);
            }
        }
        self.seen.insert(key.clone(), now);
        self.order.push_back((key, now));
        true
    }

    fn expire(&mut self, now: u64, ttl: u64) {
        while let Some((key, at)) = self.order.front() {
            if now.saturating_sub(*at) < ttl {
                break;
            }
            if self.seen.get(key) == Some(at) {
                self.seen.remove(key);
            }
            self.order.pop_front();
        }
    }

    fn forget(&mut self, key: &DedupKey) {
        self.seen.remove(key);
    }

    fn len(&self) -> usize {
        self.seen.len()
    }
}

/// Deduplicating front door to a [`PinSubmitter`].
pub struct AutoPinIngestor {
    enabled: AtomicBool,
    ttl_secs: u64,
    capacity: usize,
    dedup: Mutex<DedupSet>,
    clock: Arc<dyn Clock>,
}

impl AutoPinIngestor {
    pub fn new(config: IngestConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            enabled: AtomicBool::new(config.enabled),
            ttl_secs: config.dedup_ttl_secs,
            capacity: config.dedup_capacity,
            dedup: Mutex::new(DedupSet::default()),
            clock,
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        let was = self.enabled.swap(enabled, Ordering::SeqCst);
        if was != enabled {
            info!(enabled, "auto-pin toggled");
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Number of remembered `(subject, cid)` pairs.
    pub fn remembered(&self) -> usize {
        self.dedup.lock().len()
    }

    /// Handle one content-saved notification, forwarding it to `submitter`.
    ///
    /// Forwarding is best effort: a rejection is returned in the outcome and
    /// the pair stays remembered.
    pub fn on_content_saved<S>(&self, event: ContentSaved, submitter: &S) -> IngestOutcome
    where
        S: PinSubmitter + ?Sized,
    {
        if !self.is_enabled() {
            debug!(cid = %event.cid, subject_id = event.subject_id, "auto-pin disabled, dropping");
            return IngestOutcome::Disabled;
        }

        let now = self.clock.now_secs();
        let key = (event.subject_id, event.cid.clone());
        let fresh = self
            .dedup
            .lock()
            .insert(key.clone(), now, self.ttl_secs, self.capacity);
        if !fresh {
            debug!(cid = %event.cid, subject_id = event.subject_id, "duplicate content-saved");
            return IngestOutcome::Duplicate;
        }

        let cid = event.cid.clone();
        let subject_id = event.subject_id;
        let result = submitter.submit(event.into());
        match &result {
            Ok(s) => info!(pin_id = s.record.pin_id, %cid, subject_id, "auto-pin submitted"),
            Err(PinError::CommitFailed(_)) => {
                // Nothing was recorded, so a redelivery must be forwarded again.
                self.dedup.lock().forget(&key);
                info!(%cid, subject_id, "auto-pin not committed");
            }
            Err(e) => info!(%cid, subject_id, error = %e, "auto-pin rejected"),
        }
        IngestOutcome::Forwarded(result)
    }
}
