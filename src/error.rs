//! Relay error types.

use crate::storage::StorageError;
use alloy::primitives::ChainId;

/// Admission payload failures. Nothing is written when one of these fires.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// The request id is empty.
    #[error("request id must not be empty")]
    EmptyRequestId,
    /// The request id exceeds the storage limit.
    #[error("request id must be at most {0} characters")]
    RequestIdTooLong(usize),
    /// The chain id is not one of the bridged chains.
    #[error("unknown chain id: {0}")]
    UnknownChain(ChainId),
    /// Source and destination name the same chain.
    #[error("source and destination chains must differ")]
    SameChain,
    /// The amount is zero.
    #[error("amount must be greater than zero")]
    ZeroAmount,
}

/// Errors returned by the bridge service.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// The admission payload failed validation.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// A swap with this request id already exists.
    #[error("swap request {0} already exists")]
    DuplicateRequest(String),

    /// No swap with this request id.
    #[error("swap request {0} not found")]
    SwapNotFound(String),

    /// A storage failure.
    #[error(transparent)]
    Storage(#[from] StorageError),
}
