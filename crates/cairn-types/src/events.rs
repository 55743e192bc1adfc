//! Pin lifecycle events pushed to subscribers.

use serde::{Deserialize, Serialize};

use crate::{Cid, PinId, SubjectId};

/// Envelope for all pin events.
#[derive(Clone, Debug, Serialize, Deserialize, ts_rs::TS)]
#[ts(export)]
pub struct PinEvent {
    pub kind: PinEventKind,
    /// Absent for pool-level events.
    pub cid: Option<Cid>,
    pub pin_id: Option<PinId>,
    pub subject_id: Option<SubjectId>,
    pub timestamp: u64,
    pub payload: serde_json::Value,
}

/// All event kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ts_rs::TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum PinEventKind {
    // Billing events
    PinRequested,
    PinRetried,
    QuotaRolledOver,

    // Replication events
    PinActivated,
    ReplicaCountChanged,
    PinConverged,
    PinFailed,
}

impl PinEventKind {
    /// Coarse category used for subscription filters.
    pub fn category(&self) -> &'static str {
        match self {
            PinEventKind::PinRequested | PinEventKind::PinRetried | PinEventKind::QuotaRolledOver => {
                "billing"
            }
            PinEventKind::PinActivated
            | PinEventKind::ReplicaCountChanged
            | PinEventKind::PinConverged
            | PinEventKind::PinFailed => "replication",
        }
    }
}
