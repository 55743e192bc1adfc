//! Pin records and their lifecycle status.

use serde::{Deserialize, Serialize};

use crate::{Balance, CallerId, Cid, FundingSource, PinId, SubjectId};

/// Lifecycle status of a pin.
///
/// There is no separate converged state: an `Active` pin whose
/// `current_replicas` has reached `target_replicas` is converged.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ts_rs::TS)]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum PinStatus {
    Pending,
    Active,
    Failed,
}

impl PinStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PinStatus::Pending => "pending",
            PinStatus::Active => "active",
            PinStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(PinStatus::Pending),
            "active" => Some(PinStatus::Active),
            "failed" => Some(PinStatus::Failed),
            _ => None,
        }
    }
}

/// A funded pin commitment for one CID.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ts_rs::TS)]
#[ts(export)]
pub struct PinRequest {
    pub pin_id: PinId,
    pub cid: Cid,
    pub subject_id: SubjectId,
    pub caller: CallerId,
    pub size_bytes: u64,
    pub target_replicas: u32,
    pub current_replicas: u32,
    /// Set once at creation.
    pub funding_source: FundingSource,
    pub price_charged: Balance,
    /// Hex digest of the debit backing this record.
    pub charge_id: String,
    pub status: PinStatus,
    /// Present only when `status` is `Failed`.
    pub error_code: Option<u32>,
    pub created_at: u64,
    pub updated_at: u64,
    /// Bumped on every mutation.
    pub revision: u64,
}

impl PinRequest {
    /// Whether the pin reached its target replica count.
    pub fn is_converged(&self) -> bool {
        self.status == PinStatus::Active && self.current_replicas >= self.target_replicas
    }

    /// Whether a new submission for the same CID must be rejected.
    pub fn blocks_resubmission(&self) -> bool {
        self.status != PinStatus::Failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(status: PinStatus, current: u32) -> PinRequest {
        PinRequest {
            pin_id: 1,
            cid: Cid::new("Qm1").expect("cid"),
            subject_id: 7,
            caller: CallerId::new("alice").expect("caller"),
            size_bytes: 10,
            target_replicas: 3,
            current_replicas: current,
            funding_source: FundingSource::Pool,
            price_charged: 5,
            charge_id: "00".to_string(),
            status,
            error_code: None,
            created_at: 1,
            updated_at: 1,
            revision: 1,
        }
    }

    #[test]
    fn test_status_str_roundtrip() {
        for status in [PinStatus::Pending, PinStatus::Active, PinStatus::Failed] {
            assert_eq!(PinStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(PinStatus::parse("converged"), None);
    }

    #[test]
    fn test_converged_only_when_active() {
        assert!(!sample(PinStatus::Pending, 3).is_converged());
        assert!(!sample(PinStatus::Active, 2).is_converged());
        assert!(sample(PinStatus::Active, 3).is_converged());
        assert!(!sample(PinStatus::Failed, 3).is_converged());
    }

    #[test]
    fn test_only_failed_allows_resubmission() {
        assert!(sample(PinStatus::Pending, 0).blocks_resubmission());
        assert!(sample(PinStatus::Active, 1).blocks_resubmission());
        assert!(!sample(PinStatus::Failed, 0).blocks_resubmission());
    }
}
