//! Storage implementation in-memory. For testing only.

use super::{StorageApi, api::{BatchUpdate, Result}};
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
use std::{
    collections::HashMap,
    sync::Mutex,
};

/// [`StorageApi`] implementation in-memory. Used for testing.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    swaps: HashMap<String, Swap>,
    batches: Vec<Batch>,
    memberships: HashMap<i64, Vec<String>>,
    wallets: Vec<HotWallet>,
    chain_configs: HashMap<ChainId, ChainConfig>,
    next_batch_id: i64,
    next_wallet_id: i64,
}

impl Inner {
    fn batch_mut(&mut self, batch_id: B256) -> Result<&mut Batch> {
        self.batches
            .iter_mut()
            .find(|b| b.batch_id == batch_id)
            .ok_or_else(|| StorageError::NotFound(format!("batch {batch_id}")))
    }
}

#[async_trait]
impl StorageApi for InMemoryStorage {
    async fn create_swap(&self, swap: &Swap) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.swaps.contains_key(&swap.request_id) {
            return Err(StorageError::Conflict(format!(
                "swap {} already exists",
                swap.request_id
            )));
        }
        inner.swaps.insert(swap.request_id.clone(), swap.clone());
        Ok(())
    }

    async fn get_swap(&self, request_id: &str) -> Result<Option<Swap>> {
        Ok(self.inner.lock().unwrap().swaps.get(request_id).cloned())
    }

    async fn get_swap_status(&self, request_id: &str) -> Result<Option<SwapStatus>> {
        let inner = self.inner.lock().unwrap();
        let Some(swap) = inner.swaps.get(request_id) else { return Ok(None) };

        let batch = inner
            .memberships
            .iter()
            .find(|(_, members)| members.iter().any(|id| id == request_id))
            .and_then(|(batch_id, _)| inner.batches.iter().find(|b| b.id == *batch_id))
            .filter(|b| b.status != BatchState::Failed);

        Ok(Some(SwapStatus {
            request_id: swap.request_id.clone(),
            status: swap.status,
            from_chain_id: swap.from_chain_id,
            to_chain_id: swap.to_chain_id,
            source_tx_hash: batch.and_then(|b| b.source_tx_hash),
            target_tx_hash: batch.and_then(|b| b.target_tx_hash),
            error_message: swap.error_message.clone(),
            created_at: swap.created_at,
            updated_at: swap.updated_at,
        }))
    }

    async fn update_swap_status(
        &self,
        request_id: &str,
        status: SwapState,
        error_message: Option<&str>,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let swap = inner
            .swaps
            .get_mut(request_id)
            .ok_or_else(|| StorageError::NotFound(format!("swap {request_id}")))?;
        swap.status = status;
        swap.error_message = error_message.map(Into::into);
        swap.updated_at = Utc::now();
        Ok(())
    }

    async fn create_batch(&self, wallet_address: Address, chain_id: ChainId) -> Result<Batch> {
        let mut inner = self.inner.lock().unwrap();
        inner.next_batch_id += 1;
        let now = Utc::now();
        let batch = Batch {
            id: inner.next_batch_id,
            batch_id: B256::random(),
            wallet_address,
            chain_id,
            source_tx_hash: None,
            target_tx_hash: None,
            status: BatchState::Submitting,
            gas_price: None,
            gas_used: None,
            block_number: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        };
        inner.batches.push(batch.clone());
        Ok(batch)
    }

    async fn add_swaps_to_batch(&self, batch_id: i64, request_ids: &[String]) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();

        // All-or-nothing: verify every member before mutating anything.
        for id in request_ids {
            let already_assigned = inner
                .memberships
                .values()
                .any(|members| members.iter().any(|m| m == id));
            if already_assigned {
                return Err(StorageError::Conflict(format!("swap {id} already in a batch")));
            }
            match inner.swaps.get(id) {
                Some(swap) if swap.status == SwapState::Pending => {}
                Some(swap) => {
                    return Err(StorageError::Conflict(format!(
                        "swap {id} is {}, not pending",
                        swap.status
                    )));
                }
                None => return Err(StorageError::NotFound(format!("swap {id}"))),
            }
        }

        inner.memberships.entry(batch_id).or_default().extend(request_ids.iter().cloned());
        for id in request_ids {
            let swap = inner.swaps.get_mut(id).expect("verified above");
            swap.status = SwapState::Queued;
            swap.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn update_batch_status(&self, update: &BatchUpdate) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let batch = inner.batch_mut(update.batch_id)?;
        batch.status = update.status;
        if update.source_tx_hash.is_some() {
            batch.source_tx_hash = update.source_tx_hash;
        }
        if update.gas_price.is_some() {
            batch.gas_price = update.gas_price;
        }
        if update.gas_used.is_some() {
            batch.gas_used = update.gas_used;
        }
        if update.block_number.is_some() {
            batch.block_number = update.block_number;
        }
        if update.error_message.is_some() {
            batch.error_message = update.error_message.clone();
        }
        batch.updated_at = Utc::now();
        Ok(())
    }

    async fn update_swaps_in_batch(
        &self,
        batch_id: i64,
        status: SwapState,
        error_message: Option<&str>,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let members = inner.memberships.get(&batch_id).cloned().unwrap_or_default();
        for id in members {
            if let Some(swap) = inner.swaps.get_mut(&id) {
                swap.status = status;
                if let Some(message) = error_message {
                    swap.error_message = Some(message.to_string());
                }
                swap.updated_at = Utc::now();
            }
        }
        Ok(())
    }

    async fn fail_batch_release_swaps(&self, batch_id: i64, error_message: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(batch) = inner.batches.iter_mut().find(|b| b.id == batch_id) {
            batch.status = BatchState::Failed;
            batch.error_message = Some(error_message.to_string());
            batch.updated_at = Utc::now();
        }
        let members = inner.memberships.remove(&batch_id).unwrap_or_default();
        for id in members {
            if let Some(swap) = inner.swaps.get_mut(&id) {
                swap.status = SwapState::Pending;
                swap.error_message = None;
                swap.updated_at = Utc::now();
            }
        }
        Ok(())
    }

    async fn acquire_wallet(&self, chain_id: ChainId) -> Result<Option<HotWallet>> {
        let mut inner = self.inner.lock().unwrap();
        let picked = inner
            .wallets
            .iter_mut()
            .filter(|w| w.chain_id == chain_id && w.is_active)
            .min_by_key(|w| (w.last_used_at, w.total_processed_batches));

        Ok(picked.map(|wallet| {
            wallet.last_used_at = Some(Utc::now());
            wallet.clone()
        }))
    }

    async fn update_wallet_nonce(&self, wallet_id: i64, nonce: u64) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let wallet = inner
            .wallets
            .iter_mut()
            .find(|w| w.id == wallet_id)
            .ok_or_else(|| StorageError::NotFound(format!("wallet {wallet_id}")))?;
        wallet.nonce = nonce;
        Ok(())
    }

    async fn record_wallet_batch(&self, wallet_id: i64, volume: U256) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(wallet) = inner.wallets.iter_mut().find(|w| w.id == wallet_id) {
            wallet.total_processed_batches += 1;
            wallet.total_processed_volume = wallet.total_processed_volume.saturating_add(volume);
        }
        Ok(())
    }

    async fn upsert_wallet(&self, address: Address, chain_id: ChainId) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.wallets.iter().any(|w| w.address == address && w.chain_id == chain_id) {
            return Ok(());
        }
        inner.next_wallet_id += 1;
        let wallet = HotWallet {
            id: inner.next_wallet_id,
            address,
            chain_id,
            nonce: 0,
            last_used_at: None,
            is_active: true,
            total_processed_batches: 0,
            total_processed_volume: U256::ZERO,
        };
        inner.wallets.push(wallet);
        Ok(())
    }

    async fn get_chain_config(&self, chain_id: ChainId) -> Result<Option<ChainConfig>> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .chain_configs
            .get(&chain_id)
            .filter(|c| c.is_active)
            .cloned())
    }

    async fn upsert_chain_config(&self, config: &ChainConfig) -> Result<()> {
        self.inner.lock().unwrap().chain_configs.insert(config.chain_id, config.clone());
        Ok(())
    }

    async fn unfinished_batches(&self) -> Result<Vec<Batch>> {
        let inner = self.inner.lock().unwrap();
        let mut batches: Vec<_> =
            inner.batches.iter().filter(|b| !b.status.is_terminal()).cloned().collect();
        batches.sort_by_key(|b| b.created_at);
        Ok(batches)
    }

    async fn swaps_in_batch(&self, batch_id: i64) -> Result<Vec<String>> {
        Ok(self.inner.lock().unwrap().memberships.get(&batch_id).cloned().unwrap_or_default())
    }

    async fn swap_statistics(&self, since: DateTime<Utc>) -> Result<SwapStatistics> {
        let inner = self.inner.lock().unwrap();
        let window: Vec<_> = inner.swaps.values().filter(|s| s.created_at >= since).collect();
        let completed = window.iter().filter(|s| s.status == SwapState::Completed).count() as i64;
        let failed = window.iter().filter(|s| s.status == SwapState::Failed).count() as i64;
        let avg = (!window.is_empty()).then(|| {
            let total: f64 = window
                .iter()
                .map(|s| (s.updated_at - s.created_at).num_milliseconds() as f64 / 1000.0)
                .sum();
            total / window.len() as f64
        });
        Ok(SwapStatistics {
            total_swaps: window.len() as i64,
            completed_swaps: completed,
            failed_swaps: failed,
            avg_processing_time_seconds: avg,
        })
    }

    async fn wallet_performance(&self) -> Result<Vec<WalletPerformance>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .wallets
            .iter()
            .filter(|w| w.is_active)
            .map(|wallet| {
                let batches: Vec<_> = inner
                    .batches
                    .iter()
                    .filter(|b| {
                        b.wallet_address == wallet.address && b.chain_id == wallet.chain_id
                    })
                    .collect();
                let total_swaps = batches
                    .iter()
                    .map(|b| inner.memberships.get(&b.id).map_or(0, Vec::len) as i64)
                    .sum();
                WalletPerformance {
                    address: wallet.address,
                    chain_id: wallet.chain_id,
                    total_batches: batches.len() as i64,
                    total_swaps,
                    total_gas_used: batches.iter().filter_map(|b| b.gas_used).sum(),
                }
            })
            .collect())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Storage;

    fn swap(request_id: &str, from: ChainId, to: ChainId) -> Swap {
        let now = Utc::now();
        Swap {
            request_id: request_id.to_string(),
            from_chain_id: from,
            to_chain_id: to,
            token_address: Address::repeat_byte(0x11),
            amount: U256::from(1000u64),
            recipient: Address::repeat_byte(0x22),
            status: SwapState::Pending,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn duplicate_request_id_conflicts() {
        let storage = Storage::in_memory();
        storage.create_swap(&swap("r1", 1, 56)).await.unwrap();
        let err = storage.create_swap(&swap("r1", 1, 56)).await.unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));
    }

    #[tokio::test]
    async fn batch_assignment_is_all_or_nothing() {
        let storage = Storage::in_memory();
        storage.create_swap(&swap("r1", 1, 56)).await.unwrap();
        storage.create_swap(&swap("r2", 1, 56)).await.unwrap();
        storage.update_swap_status("r2", SwapState::Failed, None).await.unwrap();

        let batch = storage.create_batch(Address::repeat_byte(0xaa), 1).await.unwrap();
        let err = storage
            .add_swaps_to_batch(batch.id, &["r1".to_string(), "r2".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));

        // The non-terminal member must be untouched by the failed assignment.
        let r1 = storage.get_swap("r1").await.unwrap().unwrap();
        assert_eq!(r1.status, SwapState::Pending);
        assert!(storage.swaps_in_batch(batch.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn swap_cannot_join_two_batches() {
        let storage = Storage::in_memory();
        storage.create_swap(&swap("r1", 1, 56)).await.unwrap();

        let first = storage.create_batch(Address::repeat_byte(0xaa), 1).await.unwrap();
        storage.add_swaps_to_batch(first.id, &["r1".to_string()]).await.unwrap();

        let second = storage.create_batch(Address::repeat_byte(0xbb), 1).await.unwrap();
        let err =
            storage.add_swaps_to_batch(second.id, &["r1".to_string()]).await.unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));
    }

    #[tokio::test]
    async fn acquire_prefers_least_recently_used() {
        let storage = Storage::in_memory();
        storage.upsert_wallet(Address::repeat_byte(0x01), 1).await.unwrap();
        storage.upsert_wallet(Address::repeat_byte(0x02), 1).await.unwrap();

        let first = storage.acquire_wallet(1).await.unwrap().unwrap();
        let second = storage.acquire_wallet(1).await.unwrap().unwrap();
        assert_ne!(first.address, second.address);

        // Both stamped; the next acquisition wraps around to the first.
        let third = storage.acquire_wallet(1).await.unwrap().unwrap();
        assert_eq!(third.address, first.address);
    }

    #[tokio::test]
    async fn acquire_on_unknown_chain_is_unavailable() {
        let storage = Storage::in_memory();
        assert!(storage.acquire_wallet(999).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn fail_batch_releases_members_for_readmission() {
        let storage = Storage::in_memory();
        storage.create_swap(&swap("r1", 1, 56)).await.unwrap();
        let batch = storage.create_batch(Address::repeat_byte(0xaa), 1).await.unwrap();
        storage.add_swaps_to_batch(batch.id, &["r1".to_string()]).await.unwrap();

        storage.fail_batch_release_swaps(batch.id, "stale batch").await.unwrap();

        let swap = storage.get_swap("r1").await.unwrap().unwrap();
        assert_eq!(swap.status, SwapState::Pending);

        // Released members can be assigned again.
        let retry = storage.create_batch(Address::repeat_byte(0xbb), 1).await.unwrap();
        storage.add_swaps_to_batch(retry.id, &["r1".to_string()]).await.unwrap();
    }
}
