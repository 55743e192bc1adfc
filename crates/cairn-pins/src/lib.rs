//! # cairn-pins
//!
//! Pin lifecycle tracking on top of the funding cascade.
//!
//! A pin is created `Pending` once its charge succeeds, becomes `Active` when
//! the replicator reports its first replica, and may become `Failed`. A
//! failed pin is only revived by [`registry::PinRegistry::retry`], which
//! charges again: the original charge is neither refunded nor reused.
//!
//! There is no converged state. Callers compare `current_replicas` with
//! `target_replicas`, or read the derived `converged` flag from the status
//! projection.
//!
//! ## Modules
//!
//! - [`registry`] - Authoritative pin records and the state machine
//! - [`ingest`] - Deduplicating auto-pin front door
//! - [`status`] - Point reads and cancellable polling
//! - [`failure`] - Replicator error code decoding
//! - [`events`] - Broadcast of lifecycle events

pub mod events;
pub mod failure;
pub mod ingest;
pub mod registry;
pub mod status;

pub use events::{EventBus, EventFilter};
pub use ingest::{AutoPinIngestor, ContentSaved, IngestConfig, IngestOutcome};
pub use registry::{PinRegistry, PinSpec, PinSubmitter, RegistryConfig, Submitted};
pub use status::{PollConfig, PollEvent, PinView, StatusProjection, StatusSource};

use cairn_types::{Balance, Cid, IdError, PinStatus};

/// Error types for pin operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PinError {
    /// The CID failed validation.
    #[error("invalid cid: {0}")]
    InvalidCid(#[from] IdError),

    /// Declared size is zero.
    #[error("declared size must be greater than zero")]
    InvalidSize,

    /// Declared size exceeds the configured maximum.
    #[error("size {size} exceeds maximum {max}")]
    SizeTooLarge { size: u64, max: u64 },

    /// Replica count outside `[1, max]`.
    #[error("replica count {requested} outside 1..={max}")]
    InvalidReplicaCount { requested: u32, max: u32 },

    /// Offered price is zero.
    #[error("price must be greater than zero")]
    InvalidPrice,

    /// A non-failed record already exists for the CID.
    #[error("pin already pending or active for {cid}")]
    AlreadyPending { cid: Cid },

    /// No funding source could cover the price.
    #[error("insufficient funds for {amount}")]
    InsufficientFunds { amount: Balance },

    /// No record for the CID.
    #[error("no pin for {cid}")]
    NotFound { cid: Cid },

    /// Writing the new record failed; its charge was refunded.
    #[error("commit failed: {0}")]
    CommitFailed(String),

    /// The operation is not valid in the record's current status.
    #[error("cannot {operation} pin {cid} in status {from:?}")]
    InvalidTransition {
        cid: Cid,
        from: PinStatus,
        operation: &'static str,
    },
}

/// Convenience result type for pin operations.
pub type Result<T> = std::result::Result<T, PinError>;

/// A status read failed. Polling keeps going after these.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, thiserror::Error)]
#[error("status read failed: {0}")]
pub struct StatusError(pub String);
