//! # Relay CLI

use crate::{
    config::{BatchConfig, BridgeConfig, ChainEntry, ServerConfig},
    spawn::try_spawn,
};
use alloy::primitives::{Address, ChainId};
use clap::Parser;
use std::{
    net::{IpAddr, Ipv4Addr},
    time::Duration,
};
use url::Url;

/// The bridge relay batches cross-chain token swaps and submits them through
/// a pool of hot wallets.
#[derive(Debug, Parser)]
#[command(author, about = "Bridge relay", long_about = None)]
pub struct Args {
    /// The database to persist swaps, batches and wallets in.
    #[arg(long, value_name = "URL", env = "DATABASE_URL")]
    pub database_url: String,
    /// The address to serve the API on.
    #[arg(long = "http.addr", value_name = "ADDR", default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub address: IpAddr,
    /// The port to serve the API on.
    #[arg(long = "http.port", value_name = "PORT", env = "PORT", default_value_t = 8080)]
    pub port: u16,
    /// JSON-RPC endpoint of the first bridged chain.
    #[arg(long, value_name = "RPC_ENDPOINT", env = "CHAIN1_RPC")]
    pub chain1_rpc: Url,
    /// JSON-RPC endpoint of the second bridged chain.
    #[arg(long, value_name = "RPC_ENDPOINT", env = "CHAIN2_RPC")]
    pub chain2_rpc: Url,
    /// Bridge contract on the first chain.
    #[arg(long, value_name = "ADDRESS", env = "BRIDGE_ADDR1")]
    pub bridge_addr1: Address,
    /// Bridge contract on the second chain.
    #[arg(long, value_name = "ADDRESS", env = "BRIDGE_ADDR2")]
    pub bridge_addr2: Address,
    /// Chain id of the first chain.
    #[arg(long, value_name = "CHAIN_ID", default_value_t = 1)]
    pub chain1_id: ChainId,
    /// Chain id of the second chain.
    #[arg(long, value_name = "CHAIN_ID", default_value_t = 56)]
    pub chain2_id: ChainId,
    /// Hot-wallet private keys, comma separated.
    #[arg(
        long,
        value_name = "KEYS",
        env = "HOT_WALLET_PRIVATE_KEYS",
        value_delimiter = ',',
        hide_env_values = true
    )]
    pub hot_wallet_private_keys: Vec<String>,
    /// Swaps at which the open batch closes immediately.
    #[arg(long, value_name = "NUM", default_value_t = 50)]
    pub batch_size: usize,
    /// Seconds before an open batch closes regardless of size.
    #[arg(long, value_name = "SECONDS", default_value_t = 30)]
    pub batch_timeout: u64,
    /// Confirmation depth required before a batch is final.
    #[arg(long, value_name = "NUM", default_value_t = 12)]
    pub required_confirmations: u64,
    /// Ceiling for gas-price escalation, in wei.
    #[arg(long, value_name = "WEI")]
    pub max_gas_price: Option<u128>,
}

impl Args {
    /// Runs the relay service.
    pub async fn run(self) -> eyre::Result<()> {
        try_spawn(self.into_config()).await
    }

    /// Builds the [`BridgeConfig`] from CLI values.
    pub fn into_config(self) -> BridgeConfig {
        let required_confirmations = self.required_confirmations;
        let max_gas_price = self.max_gas_price;
        let chain = move |chain_id, rpc_url, bridge_address| ChainEntry {
            chain_id,
            chain_type: "evm".to_string(),
            rpc_url,
            bridge_address,
            required_confirmations,
            max_gas_price,
        };

        BridgeConfig {
            server: ServerConfig { address: self.address, port: self.port },
            database_url: self.database_url,
            chains: vec![
                chain(self.chain1_id, self.chain1_rpc, self.bridge_addr1),
                chain(self.chain2_id, self.chain2_rpc, self.bridge_addr2),
            ],
            batch: BatchConfig {
                max_size: self.batch_size,
                timeout: Duration::from_secs(self.batch_timeout),
                ..Default::default()
            },
            wallet_keys: self.hot_wallet_private_keys,
        }
    }
}
