//! Relay configuration.

use crate::types::ChainConfig;
use alloy::primitives::{Address, ChainId};
use serde::{Deserialize, Serialize};
use std::{
    net::{IpAddr, Ipv4Addr},
    time::Duration,
};
use url::Url;

/// Relay configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Server configuration.
    pub server: ServerConfig,
    /// Database URL.
    pub database_url: String,
    /// The bridged chains.
    pub chains: Vec<ChainEntry>,
    /// Batch pipeline configuration.
    #[serde(default)]
    pub batch: BatchConfig,
    /// Hot-wallet private keys.
    #[serde(skip_serializing, default)]
    pub wallet_keys: Vec<String>,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// The address to serve the API on.
    pub address: IpAddr,
    /// The port to serve the API on.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { address: IpAddr::V4(Ipv4Addr::UNSPECIFIED), port: 8080 }
    }
}

/// One bridged chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainEntry {
    /// Chain identifier.
    pub chain_id: ChainId,
    /// Chain family tag.
    #[serde(default = "default_chain_type")]
    pub chain_type: String,
    /// JSON-RPC endpoint.
    pub rpc_url: Url,
    /// Bridge contract to submit batches to.
    pub bridge_address: Address,
    /// Confirmation depth required before a batch is final.
    #[serde(default = "default_confirmations")]
    pub required_confirmations: u64,
    /// Ceiling for gas-price escalation, in wei.
    #[serde(default)]
    pub max_gas_price: Option<u128>,
}

impl ChainEntry {
    /// The persisted form of this entry.
    pub fn to_chain_config(&self) -> ChainConfig {
        ChainConfig {
            chain_id: self.chain_id,
            chain_type: self.chain_type.clone(),
            rpc_url: self.rpc_url.to_string(),
            bridge_address: self.bridge_address,
            required_confirmations: self.required_confirmations,
            max_gas_price: self.max_gas_price,
            is_active: true,
        }
    }
}

/// Batch pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchConfig {
    /// Swaps at which the open batch closes immediately.
    #[serde(default = "default_max_size")]
    pub max_size: usize,
    /// Seconds before an open batch closes regardless of size.
    #[serde(with = "crate::serde::duration", default = "default_timeout")]
    pub timeout: Duration,
    /// Closed partitions the dispatch queue buffers before the aggregator
    /// waits.
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
    /// Seconds to wait for a batch transaction to confirm.
    #[serde(with = "crate::serde::duration", default = "default_receipt_deadline")]
    pub receipt_deadline: Duration,
    /// Resubmissions allowed when the node calls a batch underpriced.
    #[serde(default = "default_max_gas_retries")]
    pub max_gas_retries: u32,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_size: default_max_size(),
            timeout: default_timeout(),
            queue_depth: default_queue_depth(),
            receipt_deadline: default_receipt_deadline(),
            max_gas_retries: default_max_gas_retries(),
        }
    }
}

fn default_chain_type() -> String {
    "evm".to_string()
}

const fn default_confirmations() -> u64 {
    12
}

const fn default_max_size() -> usize {
    50
}

const fn default_timeout() -> Duration {
    Duration::from_secs(30)
}

const fn default_queue_depth() -> usize {
    8
}

const fn default_receipt_deadline() -> Duration {
    Duration::from_secs(300)
}

const fn default_max_gas_retries() -> u32 {
    3
}
