//! Scriptable chain client for tests.

use super::{BatchReceipt, ChainClient, ChainClientError};
use crate::{types::SwapRequest, wallet::BridgeSigner};
use alloy::primitives::{Address, B256, keccak256};
use async_trait::async_trait;
use std::{
    collections::{HashMap, VecDeque},
    sync::Mutex,
    time::Duration,
};

/// A batch broadcast recorded by [`MockChainClient`].
#[derive(Debug, Clone)]
pub struct MockSubmission {
    /// Address that signed the batch.
    pub wallet: Address,
    /// Bridge contract the batch targeted.
    pub bridge_address: Address,
    /// Nonce the batch was submitted with.
    pub nonce: u64,
    /// Gas price the batch was submitted with.
    pub gas_price: u128,
    /// Members of the batch, in submission order.
    pub request_ids: Vec<String>,
}

/// [`ChainClient`] whose outcomes are scripted by the test.
///
/// Unscripted calls succeed: submissions are accepted with a deterministic
/// hash and the simulated node nonce advances, receipts confirm immediately.
#[derive(Debug, Default)]
pub struct MockChainClient {
    nonces: Mutex<HashMap<Address, u64>>,
    gas_price: Mutex<u128>,
    submit_failures: Mutex<VecDeque<ChainClientError>>,
    receipt_outcomes: Mutex<VecDeque<Result<BatchReceipt, ChainClientError>>>,
    submissions: Mutex<Vec<MockSubmission>>,
}

impl MockChainClient {
    /// Creates a mock with a 1 gwei gas price.
    pub fn new() -> Self {
        let mock = Self::default();
        *mock.gas_price.lock().unwrap() = 1_000_000_000;
        mock
    }

    /// Sets the nonce the simulated node reports for `address`.
    pub fn set_node_nonce(&self, address: Address, nonce: u64) {
        self.nonces.lock().unwrap().insert(address, nonce);
    }

    /// Sets the gas price the simulated node reports.
    pub fn set_gas_price(&self, gas_price: u128) {
        *self.gas_price.lock().unwrap() = gas_price;
    }

    /// Scripts the next `submit_batch` call to fail.
    pub fn fail_next_submit(&self, error: ChainClientError) {
        self.submit_failures.lock().unwrap().push_back(error);
    }

    /// Scripts the next `await_receipt` outcome.
    pub fn push_receipt(&self, outcome: Result<BatchReceipt, ChainClientError>) {
        self.receipt_outcomes.lock().unwrap().push_back(outcome);
    }

    /// Broadcasts recorded so far.
    pub fn submissions(&self) -> Vec<MockSubmission> {
        self.submissions.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    async fn current_nonce(&self, address: Address) -> Result<u64, ChainClientError> {
        Ok(self.nonces.lock().unwrap().get(&address).copied().unwrap_or_default())
    }

    async fn gas_price(&self) -> Result<u128, ChainClientError> {
        Ok(*self.gas_price.lock().unwrap())
    }

    async fn submit_batch(
        &self,
        signer: &BridgeSigner,
        bridge_address: Address,
        swaps: &[SwapRequest],
        nonce: u64,
        gas_price: u128,
    ) -> Result<B256, ChainClientError> {
        if let Some(error) = self.submit_failures.lock().unwrap().pop_front() {
            return Err(error);
        }

        let wallet = signer.address();
        self.submissions.lock().unwrap().push(MockSubmission {
            wallet,
            bridge_address,
            nonce,
            gas_price,
            request_ids: swaps.iter().map(|s| s.request_id.clone()).collect(),
        });
        self.nonces.lock().unwrap().insert(wallet, nonce + 1);

        let mut seed = wallet.to_vec();
        seed.extend_from_slice(&nonce.to_be_bytes());
        Ok(keccak256(seed))
    }

    async fn await_receipt(
        &self,
        _tx_hash: B256,
        _required_confirmations: u64,
        _deadline: Duration,
    ) -> Result<BatchReceipt, ChainClientError> {
        if let Some(outcome) = self.receipt_outcomes.lock().unwrap().pop_front() {
            return outcome;
        }
        Ok(BatchReceipt { block_number: 1, gas_used: 210_000, success: true })
    }
}
