//! Relay spawn utilities.

use crate::{
    batch::{BatchProcessor, DispatchContext, recover_unfinished},
    chains::{ChainClient, ChainClients, EvmChainClient},
    config::BridgeConfig,
    http,
    service::BridgeService,
    storage::Storage,
    wallet::{BridgeSigner, WalletPool},
};
use alloy::primitives::ChainId;
use eyre::{Context, ensure};
use itertools::Itertools as _;
use sqlx::postgres::PgPoolOptions;
use std::{collections::HashMap, sync::Arc};
use tracing::info;

/// Spawns the relay service using the provided [`BridgeConfig`] and serves
/// the API until the process stops.
pub async fn try_spawn(config: BridgeConfig) -> eyre::Result<()> {
    let pool = PgPoolOptions::new()
        .max_connections(25)
        .connect(&config.database_url)
        .await
        .wrap_err("failed to connect to database")?;
    sqlx::migrate!().run(&pool).await.wrap_err("failed to run migrations")?;
    let storage = Storage::pg(pool);

    // Seed the per-chain rows the pipeline reads at dispatch time.
    for chain in &config.chains {
        storage.upsert_chain_config(&chain.to_chain_config()).await?;
    }

    // Load signers and make sure each has a wallet row per chain.
    let signers = config
        .wallet_keys
        .iter()
        .map(|key| BridgeSigner::from_signing_key(key))
        .collect::<eyre::Result<Vec<_>>>()
        .wrap_err("invalid hot-wallet key")?;
    ensure!(!signers.is_empty(), "at least one hot-wallet key is required");
    for signer in &signers {
        for chain in &config.chains {
            storage.upsert_wallet(signer.address(), chain.chain_id).await?;
        }
    }
    info!("Hot wallets: {}", signers.iter().map(BridgeSigner::address).join(", "));

    let clients: HashMap<ChainId, Arc<dyn ChainClient>> = config
        .chains
        .iter()
        .map(|chain| {
            let client = EvmChainClient::connect(chain.rpc_url.clone(), chain.chain_id);
            (chain.chain_id, Arc::new(client) as Arc<dyn ChainClient>)
        })
        .collect();
    let chains = ChainClients::new(clients);
    info!("Configured chains: {}", chains.chain_ids().join(", "));
    let wallets = Arc::new(WalletPool::new(signers, storage.clone()));

    let ctx = DispatchContext { storage: storage.clone(), chains, wallets };

    // Settle whatever a previous run left behind before accepting new work.
    recover_unfinished(&ctx, &config.batch).await?;

    let handle = BatchProcessor::spawn(config.batch.clone(), ctx);

    let known_chains: Vec<ChainId> = config.chains.iter().map(|c| c.chain_id).collect();
    let service = Arc::new(BridgeService::new(storage, handle, known_chains));

    let listener =
        tokio::net::TcpListener::bind((config.server.address, config.server.port)).await?;
    info!(addr = %listener.local_addr()?, "Started bridge relay");
    axum::serve(listener, http::router(service)).await?;

    Ok(())
}
