//! The dispatcher: drives one closed partition through a leased wallet to a
//! terminal state.

use super::{BatchMetrics, Partition};
use crate::{
    chains::{BatchReceipt, ChainClientError, ChainClients},
    config::BatchConfig,
    storage::{BatchUpdate, Storage},
    types::{Batch, BatchState, SwapState},
    wallet::WalletPool,
};
use alloy::primitives::U256;
use eyre::eyre;
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};
use tokio::sync::mpsc;
use tracing::{error, info, instrument, warn};

/// Multiplier applied to the gas price on each underpriced retry, in percent.
const GAS_BUMP_PERCENT: u128 = 25;

/// Everything a dispatcher task needs.
#[derive(Debug, Clone)]
pub struct DispatchContext {
    /// Durable state.
    pub storage: Storage,
    /// Per-chain clients.
    pub chains: ChainClients,
    /// Hot-wallet pool.
    pub wallets: Arc<WalletPool>,
}

/// Consumes closed partitions and spawns one dispatcher task per partition.
///
/// Dispatchers run concurrently across chains; per-wallet sequencing comes
/// from the lease exclusion, not from this loop.
pub(crate) async fn run_dispatch_loop(
    mut dispatch_rx: mpsc::Receiver<Partition>,
    ctx: DispatchContext,
    config: BatchConfig,
    active: Arc<AtomicUsize>,
) {
    let metrics = Arc::new(BatchMetrics::default());

    while let Some(partition) = dispatch_rx.recv().await {
        let ctx = ctx.clone();
        let config = config.clone();
        let active = active.clone();
        let metrics = metrics.clone();

        active.fetch_add(1, Ordering::Relaxed);
        metrics.active.increment(1.0);
        metrics.dispatched.increment(1);

        tokio::spawn(async move {
            if let Err(err) = dispatch_partition(&ctx, &config, &metrics, partition).await {
                error!(?err, "partition dispatch failed");
            }
            active.fetch_sub(1, Ordering::Relaxed);
            metrics.active.decrement(1.0);
        });
    }
}

/// Drives one partition: lease, persist, submit, confirm.
#[instrument(skip_all, fields(chain_id = partition.chain_id, swaps = partition.requests.len()))]
async fn dispatch_partition(
    ctx: &DispatchContext,
    config: &BatchConfig,
    metrics: &BatchMetrics,
    partition: Partition,
) -> eyre::Result<()> {
    let Partition { chain_id, requests } = partition;
    let request_ids: Vec<String> = requests.iter().map(|r| r.request_id.clone()).collect();

    let Some(chain) = ctx.storage.get_chain_config(chain_id).await? else {
        fail_swaps(&ctx.storage, &request_ids, "source chain is not configured").await;
        return Err(eyre!("no active chain config for chain {chain_id}"));
    };
    let Some(client) = ctx.chains.get(chain_id) else {
        fail_swaps(&ctx.storage, &request_ids, "source chain is not reachable").await;
        return Err(eyre!("no chain client for chain {chain_id}"));
    };

    // 1. Lease a wallet. Without one the members fail and no batch record is
    //    created.
    let Some(lease) = ctx.wallets.lease(chain_id).await? else {
        warn!(chain_id, "no wallet available");
        fail_swaps(&ctx.storage, &request_ids, "no wallet available for source chain").await;
        metrics.failed.increment(1);
        return Ok(());
    };

    // 2. The batch record must exist before any member is advanced to queued.
    let batch = ctx.storage.create_batch(lease.address(), chain_id).await?;

    // 3. Membership and the advance to queued are one durable event.
    if let Err(err) = ctx.storage.add_swaps_to_batch(batch.id, &request_ids).await {
        let update = BatchUpdate::new(batch.batch_id, BatchState::Failed)
            .with_error(format!("failed to assign swaps: {err}"));
        ctx.storage.update_batch_status(&update).await?;
        metrics.failed.increment(1);
        return Err(err.into());
    }

    // 4. Reconcile the nonce. The persisted value is authoritative across the
    //    fleet, the node view catches external submissions, and the local
    //    cache survives a failed nonce persist.
    let node_nonce = match client.current_nonce(lease.address()).await {
        Ok(nonce) => nonce,
        Err(err) => {
            fail_batch(ctx, &batch, &format!("nonce fetch failed: {err}")).await?;
            metrics.failed.increment(1);
            return Ok(());
        }
    };
    let nonce = lease.record.nonce.max(node_nonce).max(lease.cached_nonce().unwrap_or(0));

    // 5. Submit, escalating the gas price while the node calls us underpriced.
    let price_ceiling = chain.max_gas_price.unwrap_or(u128::MAX);
    let mut gas_price = match client.gas_price().await {
        Ok(price) => price.min(price_ceiling),
        Err(err) => {
            fail_batch(ctx, &batch, &format!("gas price fetch failed: {err}")).await?;
            metrics.failed.increment(1);
            return Ok(());
        }
    };

    let mut attempts = 0;
    let tx_hash = loop {
        match client
            .submit_batch(lease.signer(), chain.bridge_address, &requests, nonce, gas_price)
            .await
        {
            Ok(hash) => break hash,
            Err(err)
                if err.is_underpriced()
                    && attempts < config.max_gas_retries
                    && gas_price < price_ceiling =>
            {
                attempts += 1;
                gas_price = escalate_gas_price(gas_price, price_ceiling);
                warn!(attempts, gas_price, "batch underpriced, retrying");
            }
            Err(err) => {
                fail_batch(ctx, &batch, &format!("submission failed: {err}")).await?;
                metrics.failed.increment(1);
                return Ok(());
            }
        }
    };

    // 6. The broadcast happened-before its persistence; only then do member
    //    swaps observe it.
    let update = BatchUpdate::new(batch.batch_id, BatchState::PendingConfirm)
        .with_tx_hash(tx_hash)
        .with_gas_price(gas_price);
    ctx.storage.update_batch_status(&update).await?;
    lease.store_nonce(nonce + 1);
    ctx.storage.update_wallet_nonce(lease.record.id, nonce + 1).await?;
    ctx.storage.update_swaps_in_batch(batch.id, SwapState::Submitting, None).await?;
    info!(batch_id = %batch.batch_id, %tx_hash, nonce, "batch broadcast");

    // 7. Wait out the confirmations.
    let submitted_at = tokio::time::Instant::now();
    let outcome =
        client.await_receipt(tx_hash, chain.required_confirmations, config.receipt_deadline).await;

    if finalize_batch(ctx, &batch, outcome).await? {
        let volume = requests.iter().fold(U256::ZERO, |acc, r| acc.saturating_add(r.amount));
        ctx.storage.record_wallet_batch(lease.record.id, volume).await?;
        metrics.completed.increment(1);
        metrics.confirmation_time.record(submitted_at.elapsed().as_secs_f64());
        info!(batch_id = %batch.batch_id, "batch completed");
    } else {
        metrics.failed.increment(1);
    }

    // 8. The lease guard releases the wallet on drop, on every exit path.
    Ok(())
}

/// Applies a confirmation outcome to the batch and its members.
///
/// Returns whether the batch completed.
async fn finalize_batch(
    ctx: &DispatchContext,
    batch: &Batch,
    outcome: Result<BatchReceipt, ChainClientError>,
) -> eyre::Result<bool> {
    match outcome {
        Ok(receipt) if receipt.success => {
            let update = BatchUpdate::new(batch.batch_id, BatchState::Completed)
                .with_receipt(receipt.gas_used as i64, receipt.block_number as i64);
            ctx.storage.update_batch_status(&update).await?;
            ctx.storage.update_swaps_in_batch(batch.id, SwapState::Completed, None).await?;
            Ok(true)
        }
        Ok(_) => {
            fail_batch(ctx, batch, "batch transaction reverted").await?;
            Ok(false)
        }
        Err(err) => {
            fail_batch(ctx, batch, &format!("confirmation failed: {err}")).await?;
            Ok(false)
        }
    }
}

async fn fail_batch(ctx: &DispatchContext, batch: &Batch, reason: &str) -> eyre::Result<()> {
    warn!(batch_id = %batch.batch_id, reason, "batch failed");
    let update = BatchUpdate::new(batch.batch_id, BatchState::Failed).with_error(reason);
    ctx.storage.update_batch_status(&update).await?;
    ctx.storage.update_swaps_in_batch(batch.id, SwapState::Failed, Some(reason)).await?;
    Ok(())
}

/// Marks unbatched swaps failed, one row at a time. The store does not
/// validate transitions, so each advance is guarded here: a swap already in a
/// terminal state is left alone. A member that cannot be read or updated is
/// logged and skipped.
async fn fail_swaps(storage: &Storage, request_ids: &[String], reason: &str) {
    for request_id in request_ids {
        match storage.get_swap(request_id).await {
            Ok(Some(swap)) if swap.status.can_transition(SwapState::Failed) => {
                if let Err(err) =
                    storage.update_swap_status(request_id, SwapState::Failed, Some(reason)).await
                {
                    error!(request_id, ?err, "failed to mark swap failed");
                }
            }
            Ok(Some(swap)) => {
                warn!(request_id, status = %swap.status, "swap is terminal, not marking failed");
            }
            Ok(None) => error!(request_id, "swap missing while failing batch members"),
            Err(err) => error!(request_id, ?err, "failed to read swap"),
        }
    }
}

fn escalate_gas_price(gas_price: u128, ceiling: u128) -> u128 {
    (gas_price * (100 + GAS_BUMP_PERCENT) / 100).min(ceiling)
}

/// Settles batches left over from a previous run.
///
/// A batch with a broadcast transaction resumes its confirmation watch; a
/// batch that never reached the chain is failed and its members return to
/// `pending`.
pub async fn recover_unfinished(
    ctx: &DispatchContext,
    config: &BatchConfig,
) -> eyre::Result<()> {
    for batch in ctx.storage.unfinished_batches().await? {
        match batch.source_tx_hash {
            Some(tx_hash) => {
                info!(batch_id = %batch.batch_id, %tx_hash, "resuming confirmation watch");
                let ctx = ctx.clone();
                let config = config.clone();
                tokio::spawn(async move {
                    if let Err(err) = resume_confirmation(&ctx, &config, batch, tx_hash).await {
                        error!(?err, "recovery failed");
                    }
                });
            }
            None => {
                warn!(batch_id = %batch.batch_id, "failing batch interrupted before broadcast");
                ctx.storage
                    .fail_batch_release_swaps(batch.id, "interrupted before broadcast")
                    .await?;
            }
        }
    }
    Ok(())
}

async fn resume_confirmation(
    ctx: &DispatchContext,
    config: &BatchConfig,
    batch: Batch,
    tx_hash: alloy::primitives::B256,
) -> eyre::Result<()> {
    let Some(client) = ctx.chains.get(batch.chain_id) else {
        fail_batch(ctx, &batch, "source chain is not reachable").await?;
        return Ok(());
    };
    let confirmations = ctx
        .storage
        .get_chain_config(batch.chain_id)
        .await?
        .map_or(1, |chain| chain.required_confirmations);

    let outcome = client.await_receipt(tx_hash, confirmations, config.receipt_deadline).await;
    finalize_batch(ctx, &batch, outcome).await?;
    Ok(())
}
