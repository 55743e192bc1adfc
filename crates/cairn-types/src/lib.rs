//! # cairn-types
//!
//! Shared domain types used across the Cairn workspace: pin records, funding
//! sources, quota cycles, charges and the pin event envelope.

pub mod billing;
pub mod clock;
pub mod events;
pub mod ids;
pub mod pin;

pub use billing::{Charge, FundingSource, Payer, QuotaCycle, QuotaSnapshot};
pub use clock::{Clock, ManualClock, SystemClock};
pub use ids::{CallerId, Cid, IdError};
pub use pin::{PinRequest, PinStatus};

/// Owning subject identifier (e.g. a memorial record).
pub type SubjectId = u64;

/// Registry-assigned pin identifier.
pub type PinId = u64;

/// Monetary amount in the smallest billing unit.
pub type Balance = u128;

/// Default upper bound on replicas per pin.
pub const DEFAULT_MAX_REPLICAS: u32 = 3;

/// Default upper bound on declared pin size (32 GiB).
pub const DEFAULT_MAX_SIZE_BYTES: u64 = 32 * 1024 * 1024 * 1024;

/// Maximum CID length in bytes.
pub const MAX_CID_LEN: usize = 256;
