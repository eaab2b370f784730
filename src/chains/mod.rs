//! Chain clients used to reach the bridged networks.

mod evm;
pub use evm::EvmChainClient;
mod mock;
pub use mock::{MockChainClient, MockSubmission};

use crate::{types::SwapRequest, wallet::BridgeSigner};
use alloy::{
    primitives::{Address, B256, ChainId},
    transports::{RpcError, TransportErrorKind},
};
use async_trait::async_trait;
use std::{collections::HashMap, fmt::Debug, sync::Arc, time::Duration};

/// Errors surfaced by a [`ChainClient`].
///
/// Internal retries and connection management stay inside the client; the
/// dispatcher only distinguishes the outcomes below.
#[derive(Debug, thiserror::Error)]
pub enum ChainClientError {
    /// The node refused the transaction. Permanent for this batch.
    #[error("rejected by node: {0}")]
    RejectedByNode(String),

    /// The gas price is below what the node accepts. Retryable with a higher
    /// price.
    #[error("transaction underpriced")]
    InsufficientGas,

    /// The confirmation deadline elapsed without the transaction reaching the
    /// required depth.
    #[error("timed out waiting for receipt of {0}")]
    ReceiptTimeout(B256),

    /// Signing failed.
    #[error(transparent)]
    Sign(#[from] alloy::signers::Error),

    /// Transport-level RPC failure.
    #[error(transparent)]
    Rpc(#[from] RpcError<TransportErrorKind>),
}

impl ChainClientError {
    /// Whether resubmitting with a higher gas price can succeed.
    pub const fn is_underpriced(&self) -> bool {
        matches!(self, Self::InsufficientGas)
    }
}

/// Receipt of a confirmed batch transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchReceipt {
    /// Block the transaction was included in.
    pub block_number: u64,
    /// Gas consumed by the transaction.
    pub gas_used: u64,
    /// Whether the transaction executed without reverting.
    pub success: bool,
}

/// Capability over a single blockchain.
#[async_trait]
pub trait ChainClient: Debug + Send + Sync {
    /// Fetches the next nonce for an address from the node, including pending
    /// transactions.
    async fn current_nonce(&self, address: Address) -> Result<u64, ChainClientError>;

    /// Fetches the node's current gas-price estimate.
    async fn gas_price(&self) -> Result<u128, ChainClientError>;

    /// Signs and broadcasts one bridge transaction carrying all `swaps`.
    ///
    /// Returns the transaction hash on acceptance by the node.
    async fn submit_batch(
        &self,
        signer: &BridgeSigner,
        bridge_address: Address,
        swaps: &[SwapRequest],
        nonce: u64,
        gas_price: u128,
    ) -> Result<B256, ChainClientError>;

    /// Polls until the transaction is `required_confirmations` blocks deep or
    /// `deadline` elapses.
    async fn await_receipt(
        &self,
        tx_hash: B256,
        required_confirmations: u64,
        deadline: Duration,
    ) -> Result<BatchReceipt, ChainClientError>;
}

/// A collection of chain clients keyed by chain id.
#[derive(Clone, Default)]
pub struct ChainClients {
    clients: HashMap<ChainId, Arc<dyn ChainClient>>,
}

impl ChainClients {
    /// Creates a collection from already-built clients.
    pub fn new(clients: HashMap<ChainId, Arc<dyn ChainClient>>) -> Self {
        Self { clients }
    }

    /// Returns the client for a chain, if the chain is known.
    pub fn get(&self, chain_id: ChainId) -> Option<Arc<dyn ChainClient>> {
        self.clients.get(&chain_id).cloned()
    }

    /// Chain ids this collection can reach.
    pub fn chain_ids(&self) -> impl Iterator<Item = ChainId> + '_ {
        self.clients.keys().copied()
    }
}

impl std::fmt::Debug for ChainClients {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainClients").field("chains", &self.clients.keys()).finish()
    }
}
