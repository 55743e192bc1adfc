//! Decoding of replicator error codes into user-facing suggestions.
//!
//! The registry stores failure codes verbatim. Only this table gives them
//! meaning, and unknown codes still decode to a generic suggestion.

use serde::Serialize;

/// Storage node could not be reached.
pub const NODE_UNREACHABLE: u32 = 1;
/// Content could not be fetched from its source.
pub const CONTENT_UNAVAILABLE: u32 = 2;
/// Replication did not finish in time.
pub const REPLICATION_TIMEOUT: u32 = 3;
/// Fewer storage nodes than requested replicas.
pub const INSUFFICIENT_NODES: u32 = 4;
/// Storage provider refused for lack of space.
pub const PROVIDER_OVER_CAPACITY: u32 = 5;
/// The replicator could not parse the CID.
pub const MALFORMED_CID: u32 = 6;

/// Broad class of a replication failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    NodeUnreachable,
    ContentUnavailable,
    ReplicationTimeout,
    InsufficientNodes,
    ProviderOverCapacity,
    MalformedCid,
    Unknown,
}

/// What the client should do about a failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Remedy {
    RetryLater,
    Reupload,
    LowerReplicas,
    ContactSupport,
}

/// Decoded failure, ready for display.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FailureInfo {
    pub code: u32,
    pub kind: FailureKind,
    pub remedy: Remedy,
    pub message: &'static str,
    pub suggestion: &'static str,
}

impl FailureInfo {
    /// Whether `retry_pin` alone can plausibly fix this failure.
    pub fn retryable(&self) -> bool {
        self.remedy == Remedy::RetryLater
    }
}

/// Decode a replicator error code.
pub fn decode(code: u32) -> FailureInfo {
    let (kind, remedy, message, suggestion) = match code {
        NODE_UNREACHABLE => (
            FailureKind::NodeUnreachable,
            Remedy::RetryLater,
            "storage node unreachable",
            "The storage network could not be reached. Retry later.",
        ),
        CONTENT_UNAVAILABLE => (
            FailureKind::ContentUnavailable,
            Remedy::Reupload,
            "content unavailable at source",
            "The content could not be fetched. Upload it again.",
        ),
        REPLICATION_TIMEOUT => (
            FailureKind::ReplicationTimeout,
            Remedy::RetryLater,
            "replication timed out",
            "Replication took too long. Retry later.",
        ),
        INSUFFICIENT_NODES => (
            FailureKind::InsufficientNodes,
            Remedy::LowerReplicas,
            "not enough storage nodes",
            "Not enough storage nodes are available. Request fewer replicas.",
        ),
        PROVIDER_OVER_CAPACITY => (
            FailureKind::ProviderOverCapacity,
            Remedy::RetryLater,
            "storage provider over capacity",
            "Storage providers are full right now. Retry later.",
        ),
        MALFORMED_CID => (
            FailureKind::MalformedCid,
            Remedy::Reupload,
            "malformed content identifier",
            "The content identifier was rejected. Upload the content again.",
        ),
        _ => (
            FailureKind::Unknown,
            Remedy::ContactSupport,
            "unknown replication failure",
            "Pinning failed for an unknown reason. Contact support if it persists.",
        ),
    };

    FailureInfo {
        code,
        kind,
        remedy,
        message,
        suggestion,
    }
}
