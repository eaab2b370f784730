//! Hot-wallet pool.
//!
//! One signing key serves every configured chain; the persistent
//! `hot_wallets` rows (one per `(address, chain)`) carry the authoritative
//! nonce and selection order, while this module only enforces local lease
//! exclusion and caches nonces.

use crate::{
    storage::{Storage, StorageError},
    types::HotWallet,
};
use alloy::{
    primitives::{Address, ChainId},
    signers::local::PrivateKeySigner,
};
use dashmap::DashMap;
use std::{
    fmt,
    sync::{Arc, Mutex},
    time::Instant,
};

/// A local signing key with its derived address.
#[derive(Clone)]
pub struct BridgeSigner {
    key: PrivateKeySigner,
}

impl fmt::Debug for BridgeSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("BridgeSigner").field(&self.address()).finish()
    }
}

impl BridgeSigner {
    /// Loads a private key from its hex encoding.
    pub fn from_signing_key(key: &str) -> eyre::Result<Self> {
        Ok(Self { key: key.trim().parse()? })
    }

    /// Generates a fresh random key. Used for testing.
    pub fn random() -> Self {
        Self { key: PrivateKeySigner::random() }
    }

    /// The signer's address.
    pub fn address(&self) -> Address {
        self.key.address()
    }

    /// The underlying key.
    pub fn key(&self) -> &PrivateKeySigner {
        &self.key
    }
}

#[derive(Debug)]
struct LeaseState {
    in_use: bool,
    last_used: Instant,
}

/// A pool wallet: one signing key plus its local lease flag.
#[derive(Debug)]
pub struct PoolWallet {
    signer: BridgeSigner,
    state: Mutex<LeaseState>,
}

impl PoolWallet {
    fn new(signer: BridgeSigner) -> Self {
        Self { signer, state: Mutex::new(LeaseState { in_use: false, last_used: Instant::now() }) }
    }

    /// The wallet's address.
    pub fn address(&self) -> Address {
        self.signer.address()
    }

    fn try_reserve(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.in_use {
            return false;
        }
        state.in_use = true;
        state.last_used = Instant::now();
        true
    }

    fn release(&self) {
        self.state.lock().unwrap().in_use = false;
    }
}

/// In-memory index of the signing wallets.
#[derive(Debug)]
pub struct WalletPool {
    wallets: Vec<Arc<PoolWallet>>,
    nonces: DashMap<(ChainId, Address), u64>,
    storage: Storage,
}

impl WalletPool {
    /// Creates a pool over the given signers.
    pub fn new(signers: Vec<BridgeSigner>, storage: Storage) -> Self {
        Self {
            wallets: signers.into_iter().map(|s| Arc::new(PoolWallet::new(s))).collect(),
            nonces: DashMap::new(),
            storage,
        }
    }

    /// Number of wallets in the pool.
    pub fn len(&self) -> usize {
        self.wallets.len()
    }

    /// Whether the pool holds no wallets.
    pub fn is_empty(&self) -> bool {
        self.wallets.is_empty()
    }

    /// Leases a wallet for one batch on `chain_id`.
    ///
    /// The persisted `acquire_wallet` row pick (least-recently-used,
    /// least-loaded) decides the order; locally held wallets are skipped. The
    /// acquire stamp moves a skipped wallet to the back of the order, so each
    /// loop turn sees a different candidate. Returns `None` when every wallet
    /// is busy or the chain has none.
    pub async fn lease(&self, chain_id: ChainId) -> Result<Option<WalletLease<'_>>, StorageError> {
        for _ in 0..=self.wallets.len() {
            let Some(record) = self.storage.acquire_wallet(chain_id).await? else {
                return Ok(None);
            };

            // A row without a loaded key, or a wallet another local task
            // holds, sends us back for the next candidate.
            if let Some(wallet) = self.wallets.iter().find(|w| w.address() == record.address) {
                if wallet.try_reserve() {
                    return Ok(Some(WalletLease { pool: self, wallet: wallet.clone(), record }));
                }
            }
        }
        Ok(None)
    }

    /// Last nonce this process recorded for `(chain_id, address)`.
    pub fn cached_nonce(&self, chain_id: ChainId, address: Address) -> Option<u64> {
        self.nonces.get(&(chain_id, address)).map(|n| *n)
    }

    /// Records the next nonce for `(chain_id, address)`.
    pub fn store_nonce(&self, chain_id: ChainId, address: Address, nonce: u64) {
        self.nonces.insert((chain_id, address), nonce);
    }
}

/// An exclusive lease on one wallet.
///
/// Holds the persisted record read at acquisition time. The local exclusion
/// flag is cleared when the lease is dropped, on every exit path.
#[derive(Debug)]
pub struct WalletLease<'a> {
    pool: &'a WalletPool,
    wallet: Arc<PoolWallet>,
    /// Persisted wallet record at acquisition time.
    pub record: HotWallet,
}

impl WalletLease<'_> {
    /// The leased wallet's address.
    pub fn address(&self) -> Address {
        self.wallet.address()
    }

    /// The leased wallet's signer.
    pub fn signer(&self) -> &BridgeSigner {
        &self.wallet.signer
    }

    /// Nonce cache of the owning pool.
    pub fn cached_nonce(&self) -> Option<u64> {
        self.pool.cached_nonce(self.record.chain_id, self.address())
    }

    /// Records the next nonce in the owning pool's cache.
    pub fn store_nonce(&self, nonce: u64) {
        self.pool.store_nonce(self.record.chain_id, self.address(), nonce);
    }
}

impl Drop for WalletLease<'_> {
    fn drop(&mut self) {
        self.wallet.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn pool_with(keys: usize, chain_id: ChainId) -> WalletPool {
        let storage = Storage::in_memory();
        let signers: Vec<_> = (0..keys).map(|_| BridgeSigner::random()).collect();
        for signer in &signers {
            storage.upsert_wallet(signer.address(), chain_id).await.unwrap();
        }
        WalletPool::new(signers, storage)
    }

    #[tokio::test]
    async fn lease_is_exclusive() {
        let pool = pool_with(1, 1).await;

        let lease = pool.lease(1).await.unwrap().expect("one wallet free");
        assert!(pool.lease(1).await.unwrap().is_none());

        drop(lease);
        assert!(pool.lease(1).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn leases_rotate_through_the_pool() {
        let pool = pool_with(2, 1).await;

        let first = pool.lease(1).await.unwrap().unwrap();
        let second = pool.lease(1).await.unwrap().unwrap();
        assert_ne!(first.address(), second.address());
        assert!(pool.lease(1).await.unwrap().is_none());

        let first_address = first.address();
        drop(first);
        let third = pool.lease(1).await.unwrap().unwrap();
        assert_eq!(third.address(), first_address);
    }

    #[tokio::test]
    async fn lease_on_unknown_chain_is_none() {
        let pool = pool_with(1, 1).await;
        assert!(pool.lease(999).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn nonce_cache_round_trips() {
        let pool = pool_with(1, 1).await;
        let lease = pool.lease(1).await.unwrap().unwrap();

        assert_eq!(lease.cached_nonce(), None);
        lease.store_nonce(7);
        assert_eq!(lease.cached_nonce(), Some(7));
    }
}
