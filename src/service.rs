//! The bridge service: admission, status and queue queries.

use crate::{
    batch::BatchProcessorHandle,
    error::{BridgeError, ValidationError},
    storage::{Storage, StorageError},
    types::{
        QueueStatus, Swap, SwapRequest, SwapState, SwapStatistics, SwapStatus, WalletPerformance,
    },
};
use alloy::primitives::ChainId;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::instrument;

/// Longest request id the service admits.
const MAX_REQUEST_ID_LEN: usize = 128;

/// Orchestrates admissions and queries over the batching pipeline.
#[derive(Debug)]
pub struct BridgeService {
    storage: Storage,
    processor: BatchProcessorHandle,
    known_chains: BTreeSet<ChainId>,
}

impl BridgeService {
    /// Creates a service over the given storage and processor.
    pub fn new(
        storage: Storage,
        processor: BatchProcessorHandle,
        known_chains: impl IntoIterator<Item = ChainId>,
    ) -> Self {
        Self { storage, processor, known_chains: known_chains.into_iter().collect() }
    }

    /// Validates and admits a swap request.
    ///
    /// On success the swap is persisted as `pending` and owned by the
    /// pipeline: it will reach a terminal state regardless of the caller.
    #[instrument(skip_all, fields(request_id = %request.request_id))]
    pub async fn initiate_swap(&self, request: SwapRequest) -> Result<SwapStatus, BridgeError> {
        self.validate(&request)?;

        let now = Utc::now();
        let swap = Swap {
            request_id: request.request_id.clone(),
            from_chain_id: request.from_chain_id,
            to_chain_id: request.to_chain_id,
            token_address: request.token_address,
            amount: request.amount,
            recipient: request.recipient,
            status: SwapState::Pending,
            error_message: None,
            created_at: now,
            updated_at: now,
        };

        match self.storage.create_swap(&swap).await {
            Ok(()) => {}
            Err(StorageError::Conflict(_)) => {
                return Err(BridgeError::DuplicateRequest(request.request_id));
            }
            Err(err) => return Err(err.into()),
        }

        self.processor.admit(request);

        Ok(SwapStatus {
            request_id: swap.request_id,
            status: SwapState::Pending,
            from_chain_id: swap.from_chain_id,
            to_chain_id: swap.to_chain_id,
            source_tx_hash: None,
            target_tx_hash: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        })
    }

    fn validate(&self, request: &SwapRequest) -> Result<(), ValidationError> {
        if request.request_id.is_empty() {
            return Err(ValidationError::EmptyRequestId);
        }
        if request.request_id.len() > MAX_REQUEST_ID_LEN {
            return Err(ValidationError::RequestIdTooLong(MAX_REQUEST_ID_LEN));
        }
        if !self.known_chains.contains(&request.from_chain_id) {
            return Err(ValidationError::UnknownChain(request.from_chain_id));
        }
        if !self.known_chains.contains(&request.to_chain_id) {
            return Err(ValidationError::UnknownChain(request.to_chain_id));
        }
        if request.from_chain_id == request.to_chain_id {
            return Err(ValidationError::SameChain);
        }
        if request.amount.is_zero() {
            return Err(ValidationError::ZeroAmount);
        }
        Ok(())
    }

    /// Reads the status of a swap.
    pub async fn swap_status(&self, request_id: &str) -> Result<SwapStatus, BridgeError> {
        self.storage
            .get_swap_status(request_id)
            .await?
            .ok_or_else(|| BridgeError::SwapNotFound(request_id.to_string()))
    }

    /// Snapshot of the aggregator queue.
    pub fn queue_status(&self) -> QueueStatus {
        self.processor.queue_status()
    }

    /// Aggregate counters for the last 24 hours plus per-wallet throughput.
    pub async fn statistics(&self) -> Result<BridgeStatistics, BridgeError> {
        let since = Utc::now() - Duration::hours(24);
        Ok(BridgeStatistics {
            swaps: self.storage.swap_statistics(since).await?,
            wallets: self.storage.wallet_performance().await?,
        })
    }

    /// Checks that the storage backend is reachable.
    pub async fn ping(&self) -> Result<(), BridgeError> {
        Ok(self.storage.ping().await?)
    }
}

/// Response of the statistics endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeStatistics {
    /// Swap counters over the window.
    pub swaps: SwapStatistics,
    /// Per-wallet throughput.
    pub wallets: Vec<WalletPerformance>,
}
