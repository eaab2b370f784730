//! EVM chain client backed by an alloy provider.

use super::{BatchReceipt, ChainClient, ChainClientError};
use crate::{types::SwapRequest, wallet::BridgeSigner};
use alloy::{
    consensus::TxLegacy,
    eips::Encodable2718,
    network::{Ethereum, EthereumWallet, NetworkWallet},
    primitives::{Address, B256, Bytes, ChainId, U256},
    providers::{DynProvider, Provider, ProviderBuilder},
    sol_types::SolCall,
    transports::{RpcError, TransportErrorKind},
};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

alloy::sol! {
    interface IBridge {
        struct BridgeSwap {
            address token;
            uint256 amount;
            address recipient;
            uint64 targetChainId;
            string sourceRequestId;
        }

        function executeBatch(BridgeSwap[] calldata swaps) external;
    }
}

/// Base cost of an `executeBatch` call.
const BATCH_BASE_GAS: u64 = 150_000;

/// Marginal cost per member swap. The bridge touches one token transfer and
/// emits one event per member.
const PER_SWAP_GAS: u64 = 120_000;

/// How often the receipt poller asks the node for progress.
const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// [`ChainClient`] over an EVM JSON-RPC endpoint.
#[derive(Debug)]
pub struct EvmChainClient {
    provider: DynProvider,
    chain_id: ChainId,
}

impl EvmChainClient {
    /// Creates a client over a long-lived HTTP provider.
    pub fn connect(rpc_url: Url, chain_id: ChainId) -> Self {
        let provider = ProviderBuilder::new().connect_http(rpc_url).erased();
        Self { provider, chain_id }
    }

    /// Creates a client over an existing provider.
    pub fn new(provider: DynProvider, chain_id: ChainId) -> Self {
        Self { provider, chain_id }
    }

    fn batch_calldata(swaps: &[SwapRequest]) -> Bytes {
        let entries = swaps
            .iter()
            .map(|swap| IBridge::BridgeSwap {
                token: swap.token_address,
                amount: swap.amount,
                recipient: swap.recipient,
                targetChainId: swap.to_chain_id,
                sourceRequestId: swap.request_id.clone(),
            })
            .collect();

        IBridge::executeBatchCall { swaps: entries }.abi_encode().into()
    }
}

fn classify_send_error(err: RpcError<TransportErrorKind>) -> ChainClientError {
    if let RpcError::ErrorResp(payload) = &err {
        let message = payload.message.to_ascii_lowercase();
        if message.contains("underpriced")
            || message.contains("fee too low")
            || message.contains("gas price below")
        {
            return ChainClientError::InsufficientGas;
        }
        return ChainClientError::RejectedByNode(payload.message.to_string());
    }
    ChainClientError::Rpc(err)
}

#[async_trait]
impl ChainClient for EvmChainClient {
    async fn current_nonce(&self, address: Address) -> Result<u64, ChainClientError> {
        Ok(self.provider.get_transaction_count(address).pending().await?)
    }

    async fn gas_price(&self) -> Result<u128, ChainClientError> {
        Ok(self.provider.get_gas_price().await?)
    }

    #[instrument(skip(self, signer, swaps), fields(chain_id = self.chain_id, swaps = swaps.len()))]
    async fn submit_batch(
        &self,
        signer: &BridgeSigner,
        bridge_address: Address,
        swaps: &[SwapRequest],
        nonce: u64,
        gas_price: u128,
    ) -> Result<B256, ChainClientError> {
        let tx = TxLegacy {
            chain_id: Some(self.chain_id),
            nonce,
            gas_price,
            gas_limit: BATCH_BASE_GAS + PER_SWAP_GAS * swaps.len() as u64,
            to: bridge_address.into(),
            value: U256::ZERO,
            input: Self::batch_calldata(swaps),
        };

        let wallet = EthereumWallet::from(signer.key().clone());
        let signed =
            NetworkWallet::<Ethereum>::sign_transaction_from(&wallet, signer.address(), tx.into())
                .await?;

        let _ = self
            .provider
            .send_raw_transaction(&signed.encoded_2718())
            .await
            .map_err(classify_send_error)?;

        debug!(tx_hash = %signed.tx_hash(), nonce, gas_price, "broadcast batch transaction");
        Ok(*signed.tx_hash())
    }

    #[instrument(skip(self), fields(chain_id = self.chain_id))]
    async fn await_receipt(
        &self,
        tx_hash: B256,
        required_confirmations: u64,
        deadline: Duration,
    ) -> Result<BatchReceipt, ChainClientError> {
        let required = required_confirmations.max(1);
        let started = tokio::time::Instant::now();

        loop {
            if let Some(receipt) = self.provider.get_transaction_receipt(tx_hash).await? {
                if let Some(block_number) = receipt.block_number {
                    let head = self.provider.get_block_number().await?;
                    // Inclusion in the head block counts as one confirmation.
                    if head.saturating_sub(block_number) + 1 >= required {
                        return Ok(BatchReceipt {
                            block_number,
                            gas_used: receipt.gas_used as u64,
                            success: receipt.status(),
                        });
                    }
                }
            }

            if started.elapsed() >= deadline {
                return Err(ChainClientError::ReceiptTimeout(tx_hash));
            }
            tokio::time::sleep(RECEIPT_POLL_INTERVAL).await;
        }
    }
}
