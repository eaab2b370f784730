//! Storage api of the bridge relay.

use crate::{
    storage::StorageError,
    types::{
        Batch, BatchState, ChainConfig, HotWallet, Swap, SwapState, SwapStatistics, SwapStatus,
        WalletPerformance,
    },
};
use alloy::primitives::{Address, B256, ChainId, U256};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt::Debug;

/// Type alias for `Result<T, StorageError>`.
pub type Result<T> = core::result::Result<T, StorageError>;

/// Durable state behind the batching pipeline.
///
/// Single-statement operations execute in auto-commit; multi-step operations
/// are transactional. Status-transition validity is the caller's concern, with
/// one exception: [`add_swaps_to_batch`](Self::add_swaps_to_batch) only
/// advances swaps that are currently `pending`, so the membership insert and
/// the advance to `queued` form a single durable event.
#[async_trait]
pub trait StorageApi: Debug + Send + Sync {
    /// Inserts a swap with status `pending`.
    ///
    /// Fails with [`StorageError::Conflict`] if the request id already exists.
    async fn create_swap(&self, swap: &Swap) -> Result<()>;

    /// Reads a swap by request id.
    async fn get_swap(&self, request_id: &str) -> Result<Option<Swap>>;

    /// Reads a swap joined with its owning non-failed batch, as reported to
    /// clients.
    async fn get_swap_status(&self, request_id: &str) -> Result<Option<SwapStatus>>;

    /// Updates a single swap's status.
    ///
    /// Fails with [`StorageError::NotFound`] if no row matched.
    async fn update_swap_status(
        &self,
        request_id: &str,
        status: SwapState,
        error_message: Option<&str>,
    ) -> Result<()>;

    /// Creates a batch with status `submitting` and returns it.
    async fn create_batch(&self, wallet_address: Address, chain_id: ChainId) -> Result<Batch>;

    /// Assigns swaps to a batch in one transaction: inserts the membership
    /// rows and advances each named swap `pending -> queued`.
    ///
    /// Rolls back entirely and fails with [`StorageError::Conflict`] if any
    /// named swap is not currently `pending`.
    async fn add_swaps_to_batch(&self, batch_id: i64, request_ids: &[String]) -> Result<()>;

    /// Updates a batch's status and submission metadata.
    async fn update_batch_status(&self, update: &BatchUpdate) -> Result<()>;

    /// Advances every member swap of a batch in a single statement.
    async fn update_swaps_in_batch(
        &self,
        batch_id: i64,
        status: SwapState,
        error_message: Option<&str>,
    ) -> Result<()>;

    /// Marks a batch failed, returns its members to `pending` and releases
    /// their membership rows, all in one transaction. Used by recovery for
    /// batches that never reached the chain.
    async fn fail_batch_release_swaps(&self, batch_id: i64, error_message: &str) -> Result<()>;

    /// Atomically picks the least-recently-used, least-loaded active wallet
    /// for a chain, stamps `last_used_at`, and returns it.
    ///
    /// The selection must not block on or collide with concurrent acquirers
    /// (skip-locked or equivalent). Returns `None` when the chain has no
    /// active wallet.
    async fn acquire_wallet(&self, chain_id: ChainId) -> Result<Option<HotWallet>>;

    /// Persists a wallet's next nonce.
    async fn update_wallet_nonce(&self, wallet_id: i64, nonce: u64) -> Result<()>;

    /// Bumps a wallet's processed-batch counter and adds `volume` to its
    /// processed-volume total.
    async fn record_wallet_batch(&self, wallet_id: i64, volume: U256) -> Result<()>;

    /// Inserts a wallet row if the `(address, chain_id)` pair is new.
    async fn upsert_wallet(&self, address: Address, chain_id: ChainId) -> Result<()>;

    /// Reads the active configuration row for a chain.
    async fn get_chain_config(&self, chain_id: ChainId) -> Result<Option<ChainConfig>>;

    /// Inserts or replaces a chain configuration row.
    async fn upsert_chain_config(&self, config: &ChainConfig) -> Result<()>;

    /// Reads all batches in a non-terminal state, oldest first.
    async fn unfinished_batches(&self) -> Result<Vec<Batch>>;

    /// Reads the request ids of a batch's members.
    async fn swaps_in_batch(&self, batch_id: i64) -> Result<Vec<String>>;

    /// Aggregate swap counters since `since`.
    async fn swap_statistics(&self, since: DateTime<Utc>) -> Result<SwapStatistics>;

    /// Per-wallet throughput counters across active wallets.
    async fn wallet_performance(&self) -> Result<Vec<WalletPerformance>>;

    /// Checks that the backend is reachable.
    async fn ping(&self) -> Result<()>;
}

/// Mutation applied to a batch row by [`StorageApi::update_batch_status`].
#[derive(Debug, Clone)]
pub struct BatchUpdate {
    /// Opaque id of the batch to update.
    pub batch_id: B256,
    /// New lifecycle state.
    pub status: BatchState,
    /// Source-chain transaction hash, once known.
    pub source_tx_hash: Option<B256>,
    /// Gas price the batch was submitted with.
    pub gas_price: Option<u128>,
    /// Gas consumed by the confirmed transaction.
    pub gas_used: Option<i64>,
    /// Block the transaction was included in.
    pub block_number: Option<i64>,
    /// Failure detail, if any.
    pub error_message: Option<String>,
}

impl BatchUpdate {
    /// Starts an update that only moves `batch_id` to `status`.
    pub fn new(batch_id: B256, status: BatchState) -> Self {
        Self {
            batch_id,
            status,
            source_tx_hash: None,
            gas_price: None,
            gas_used: None,
            block_number: None,
            error_message: None,
        }
    }

    /// Attaches the source transaction hash.
    pub fn with_tx_hash(mut self, hash: B256) -> Self {
        self.source_tx_hash = Some(hash);
        self
    }

    /// Attaches the submission gas price.
    pub fn with_gas_price(mut self, gas_price: u128) -> Self {
        self.gas_price = Some(gas_price);
        self
    }

    /// Attaches receipt data.
    pub fn with_receipt(mut self, gas_used: i64, block_number: i64) -> Self {
        self.gas_used = Some(gas_used);
        self.block_number = Some(block_number);
        self
    }

    /// Attaches a failure message.
    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }
}
