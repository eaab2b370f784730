//! Storage implementation backed by a PostgreSQL database.

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
use eyre::WrapErr;
use sqlx::{FromRow, PgPool};
use tracing::instrument;

/// PostgreSQL storage.
#[derive(Debug)]
pub struct PgStorage {
    pool: PgPool,
}

impl PgStorage {
    /// Creates a new PostgreSQL storage instance.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Hex form used for addresses and hashes in TEXT columns.
fn fmt_address(address: Address) -> String {
    format!("{address:#x}")
}

fn fmt_hash(hash: B256) -> String {
    format!("{hash:#x}")
}

fn parse_address(text: &str) -> Result<Address> {
    text.parse().wrap_err_with(|| format!("bad address in storage: {text}")).map_err(Into::into)
}

fn parse_hash(text: &str) -> Result<B256> {
    text.parse().wrap_err_with(|| format!("bad hash in storage: {text}")).map_err(Into::into)
}

fn parse_u256(text: &str) -> Result<U256> {
    text.parse().wrap_err_with(|| format!("bad amount in storage: {text}")).map_err(Into::into)
}

fn parse_u128(text: &str) -> Result<u128> {
    text.parse().wrap_err_with(|| format!("bad gas price in storage: {text}")).map_err(Into::into)
}

#[derive(Debug, FromRow)]
struct SwapRow {
    request_id: String,
    from_chain_id: i64,
    to_chain_id: i64,
    token_address: String,
    amount: String,
    recipient: String,
    status: String,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<SwapRow> for Swap {
    type Error = StorageError;

    fn try_from(row: SwapRow) -> Result<Self> {
        Ok(Swap {
            from_chain_id: row.from_chain_id as ChainId,
            to_chain_id: row.to_chain_id as ChainId,
            token_address: parse_address(&row.token_address)?,
            amount: parse_u256(&row.amount)?,
            recipient: parse_address(&row.recipient)?,
            status: row.status.parse().map_err(eyre::Error::from)?,
            request_id: row.request_id,
            error_message: row.error_message,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct SwapStatusRow {
    request_id: String,
    status: String,
    from_chain_id: i64,
    to_chain_id: i64,
    source_tx_hash: Option<String>,
    target_tx_hash: Option<String>,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<SwapStatusRow> for SwapStatus {
    type Error = StorageError;

    fn try_from(row: SwapStatusRow) -> Result<Self> {
        Ok(SwapStatus {
            status: row.status.parse().map_err(eyre::Error::from)?,
            from_chain_id: row.from_chain_id as ChainId,
            to_chain_id: row.to_chain_id as ChainId,
            source_tx_hash: row.source_tx_hash.as_deref().map(parse_hash).transpose()?,
            target_tx_hash: row.target_tx_hash.as_deref().map(parse_hash).transpose()?,
            request_id: row.request_id,
            error_message: row.error_message,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct BatchRow {
    id: i64,
    batch_id: String,
    wallet_address: String,
    chain_id: i64,
    source_tx_hash: Option<String>,
    target_tx_hash: Option<String>,
    status: String,
    gas_price: Option<String>,
    gas_used: Option<i64>,
    block_number: Option<i64>,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<BatchRow> for Batch {
    type Error = StorageError;

    fn try_from(row: BatchRow) -> Result<Self> {
        Ok(Batch {
            id: row.id,
            batch_id: parse_hash(&row.batch_id)?,
            wallet_address: parse_address(&row.wallet_address)?,
            chain_id: row.chain_id as ChainId,
            source_tx_hash: row.source_tx_hash.as_deref().map(parse_hash).transpose()?,
            target_tx_hash: row.target_tx_hash.as_deref().map(parse_hash).transpose()?,
            status: row.status.parse().map_err(eyre::Error::from)?,
            gas_price: row.gas_price.as_deref().map(parse_u128).transpose()?,
            gas_used: row.gas_used,
            block_number: row.block_number,
            error_message: row.error_message,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct WalletRow {
    id: i64,
    address: String,
    chain_id: i64,
    nonce: i64,
    last_used_at: Option<DateTime<Utc>>,
    is_active: bool,
    total_processed_batches: i64,
    total_processed_volume: String,
}

impl TryFrom<WalletRow> for HotWallet {
    type Error = StorageError;

    fn try_from(row: WalletRow) -> Result<Self> {
        Ok(HotWallet {
            id: row.id,
            address: parse_address(&row.address)?,
            chain_id: row.chain_id as ChainId,
            nonce: row.nonce as u64,
            last_used_at: row.last_used_at,
            is_active: row.is_active,
            total_processed_batches: row.total_processed_batches,
            total_processed_volume: parse_u256(&row.total_processed_volume)?,
        })
    }
}

#[derive(Debug, FromRow)]
struct ChainConfigRow {
    chain_id: i64,
    chain_type: String,
    rpc_url: String,
    bridge_address: String,
    required_confirmations: i32,
    max_gas_price: Option<String>,
    is_active: bool,
}

impl TryFrom<ChainConfigRow> for ChainConfig {
    type Error = StorageError;

    fn try_from(row: ChainConfigRow) -> Result<Self> {
        Ok(ChainConfig {
            chain_id: row.chain_id as ChainId,
            chain_type: row.chain_type,
            rpc_url: row.rpc_url,
            bridge_address: parse_address(&row.bridge_address)?,
            required_confirmations: row.required_confirmations as u64,
            max_gas_price: row.max_gas_price.as_deref().map(parse_u128).transpose()?,
            is_active: row.is_active,
        })
    }
}

const BATCH_COLUMNS: &str = "id, batch_id, wallet_address, chain_id, source_tx_hash, \
     target_tx_hash, status, gas_price, gas_used, block_number, error_message, created_at, \
     updated_at";

#[async_trait]
impl StorageApi for PgStorage {
    #[instrument(skip_all, fields(request_id = %swap.request_id))]
    async fn create_swap(&self, swap: &Swap) -> Result<()> {
        sqlx::query(
            "INSERT INTO swaps (request_id, from_chain_id, to_chain_id, token_address, amount, \
             recipient, status) VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(&swap.request_id)
        .bind(swap.from_chain_id as i64)
        .bind(swap.to_chain_id as i64)
        .bind(fmt_address(swap.token_address))
        .bind(swap.amount.to_string())
        .bind(fmt_address(swap.recipient))
        .bind(swap.status.as_str())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_swap(&self, request_id: &str) -> Result<Option<Swap>> {
        sqlx::query_as::<_, SwapRow>(
            "SELECT request_id, from_chain_id, to_chain_id, token_address, amount, recipient, \
             status, error_message, created_at, updated_at FROM swaps WHERE request_id = $1",
        )
        .bind(request_id)
        .fetch_optional(&self.pool)
        .await?
        .map(TryInto::try_into)
        .transpose()
    }

    async fn get_swap_status(&self, request_id: &str) -> Result<Option<SwapStatus>> {
        sqlx::query_as::<_, SwapStatusRow>(
            "SELECT s.request_id, s.status, s.from_chain_id, s.to_chain_id, b.source_tx_hash, \
             b.target_tx_hash, s.error_message, s.created_at, s.updated_at \
             FROM swaps s \
             LEFT JOIN batch_swaps bs ON bs.swap_id = s.request_id \
             LEFT JOIN batches b ON b.id = bs.batch_id AND b.status != 'failed' \
             WHERE s.request_id = $1",
        )
        .bind(request_id)
        .fetch_optional(&self.pool)
        .await?
        .map(TryInto::try_into)
        .transpose()
    }

    #[instrument(skip(self))]
    async fn update_swap_status(
        &self,
        request_id: &str,
        status: SwapState,
        error_message: Option<&str>,
    ) -> Result<()> {
        let affected = sqlx::query(
            "UPDATE swaps SET status = $2, error_message = $3, updated_at = NOW() \
             WHERE request_id = $1",
        )
        .bind(request_id)
        .bind(status.as_str())
        .bind(error_message)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if affected == 0 {
            return Err(StorageError::NotFound(format!("swap {request_id}")));
        }

        Ok(())
    }

    #[instrument(skip(self))]
    async fn create_batch(&self, wallet_address: Address, chain_id: ChainId) -> Result<Batch> {
        sqlx::query_as::<_, BatchRow>(&format!(
            "INSERT INTO batches (batch_id, wallet_address, chain_id, status) \
             VALUES ($1, $2, $3, 'submitting') RETURNING {BATCH_COLUMNS}"
        ))
        .bind(fmt_hash(B256::random()))
        .bind(fmt_address(wallet_address))
        .bind(chain_id as i64)
        .fetch_one(&self.pool)
        .await?
        .try_into()
    }

    #[instrument(skip(self, request_ids), fields(swaps = request_ids.len()))]
    async fn add_swaps_to_batch(&self, batch_id: i64, request_ids: &[String]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("INSERT INTO batch_swaps (batch_id, swap_id) SELECT $1, UNNEST($2::text[])")
            .bind(batch_id)
            .bind(request_ids)
            .execute(&mut *tx)
            .await?;

        let advanced = sqlx::query(
            "UPDATE swaps SET status = 'queued', updated_at = NOW() \
             WHERE request_id = ANY($1) AND status = 'pending'",
        )
        .bind(request_ids)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if advanced != request_ids.len() as u64 {
            // Implicit rollback when the transaction is dropped.
            return Err(StorageError::Conflict(format!(
                "only {advanced} of {} swaps were still pending",
                request_ids.len()
            )));
        }

        tx.commit().await?;
        Ok(())
    }

    #[instrument(skip(self, update), fields(batch_id = %update.batch_id, status = %update.status))]
    async fn update_batch_status(&self, update: &BatchUpdate) -> Result<()> {
        let affected = sqlx::query(
            "UPDATE batches SET status = $2, \
             source_tx_hash = COALESCE($3, source_tx_hash), \
             gas_price = COALESCE($4, gas_price), \
             gas_used = COALESCE($5, gas_used), \
             block_number = COALESCE($6, block_number), \
             error_message = COALESCE($7, error_message), \
             updated_at = NOW() \
             WHERE batch_id = $1",
        )
        .bind(fmt_hash(update.batch_id))
        .bind(update.status.as_str())
        .bind(update.source_tx_hash.map(fmt_hash))
        .bind(update.gas_price.map(|p| p.to_string()))
        .bind(update.gas_used)
        .bind(update.block_number)
        .bind(update.error_message.as_deref())
        .execute(&self.pool)
        .await?
        .rows_affected();

        if affected == 0 {
            return Err(StorageError::NotFound(format!("batch {}", update.batch_id)));
        }

        Ok(())
    }

    #[instrument(skip(self))]
    async fn update_swaps_in_batch(
        &self,
        batch_id: i64,
        status: SwapState,
        error_message: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE swaps SET status = $2, error_message = COALESCE($3, error_message), \
             updated_at = NOW() \
             WHERE request_id IN (SELECT swap_id FROM batch_swaps WHERE batch_id = $1)",
        )
        .bind(batch_id)
        .bind(status.as_str())
        .bind(error_message)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn fail_batch_release_swaps(&self, batch_id: i64, error_message: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "UPDATE batches SET status = 'failed', error_message = $2, updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(batch_id)
        .bind(error_message)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE swaps SET status = 'pending', error_message = NULL, updated_at = NOW() \
             WHERE request_id IN (SELECT swap_id FROM batch_swaps WHERE batch_id = $1)",
        )
        .bind(batch_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM batch_swaps WHERE batch_id = $1")
            .bind(batch_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn acquire_wallet(&self, chain_id: ChainId) -> Result<Option<HotWallet>> {
        sqlx::query_as::<_, WalletRow>(
            "UPDATE hot_wallets SET last_used_at = NOW(), updated_at = NOW() \
             WHERE id = ( \
                 SELECT id FROM hot_wallets \
                 WHERE chain_id = $1 AND is_active = TRUE \
                 ORDER BY last_used_at NULLS FIRST, total_processed_batches \
                 LIMIT 1 \
                 FOR UPDATE SKIP LOCKED \
             ) \
             RETURNING id, address, chain_id, nonce, last_used_at, is_active, \
                       total_processed_batches, total_processed_volume::text AS \
                       total_processed_volume",
        )
        .bind(chain_id as i64)
        .fetch_optional(&self.pool)
        .await?
        .map(TryInto::try_into)
        .transpose()
    }

    #[instrument(skip(self))]
    async fn update_wallet_nonce(&self, wallet_id: i64, nonce: u64) -> Result<()> {
        let affected =
            sqlx::query("UPDATE hot_wallets SET nonce = $2, updated_at = NOW() WHERE id = $1")
                .bind(wallet_id)
                .bind(nonce as i64)
                .execute(&self.pool)
                .await?
                .rows_affected();

        if affected == 0 {
            return Err(StorageError::NotFound(format!("wallet {wallet_id}")));
        }

        Ok(())
    }

    async fn record_wallet_batch(&self, wallet_id: i64, volume: U256) -> Result<()> {
        sqlx::query(
            "UPDATE hot_wallets SET total_processed_batches = total_processed_batches + 1, \
             total_processed_volume = total_processed_volume + $2::numeric, updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(wallet_id)
        .bind(volume.to_string())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn upsert_wallet(&self, address: Address, chain_id: ChainId) -> Result<()> {
        sqlx::query(
            "INSERT INTO hot_wallets (address, chain_id) VALUES ($1, $2) \
             ON CONFLICT (address, chain_id) DO NOTHING",
        )
        .bind(fmt_address(address))
        .bind(chain_id as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_chain_config(&self, chain_id: ChainId) -> Result<Option<ChainConfig>> {
        sqlx::query_as::<_, ChainConfigRow>(
            "SELECT chain_id, chain_type, rpc_url, bridge_address, required_confirmations, \
             max_gas_price, is_active FROM chain_configs \
             WHERE chain_id = $1 AND is_active = TRUE",
        )
        .bind(chain_id as i64)
        .fetch_optional(&self.pool)
        .await?
        .map(TryInto::try_into)
        .transpose()
    }

    async fn upsert_chain_config(&self, config: &ChainConfig) -> Result<()> {
        sqlx::query(
            "INSERT INTO chain_configs (chain_id, chain_type, rpc_url, bridge_address, \
             required_confirmations, max_gas_price, is_active) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (chain_id) DO UPDATE SET \
             chain_type = EXCLUDED.chain_type, rpc_url = EXCLUDED.rpc_url, \
             bridge_address = EXCLUDED.bridge_address, \
             required_confirmations = EXCLUDED.required_confirmations, \
             max_gas_price = EXCLUDED.max_gas_price, is_active = EXCLUDED.is_active, \
             updated_at = NOW()",
        )
        .bind(config.chain_id as i64)
        .bind(&config.chain_type)
        .bind(&config.rpc_url)
        .bind(fmt_address(config.bridge_address))
        .bind(config.required_confirmations as i32)
        .bind(config.max_gas_price.map(|p| p.to_string()))
        .bind(config.is_active)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn unfinished_batches(&self) -> Result<Vec<Batch>> {
        sqlx::query_as::<_, BatchRow>(&format!(
            "SELECT {BATCH_COLUMNS} FROM batches \
             WHERE status IN ('submitting', 'pending_confirm') ORDER BY created_at"
        ))
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(TryInto::try_into)
        .collect()
    }

    async fn swaps_in_batch(&self, batch_id: i64) -> Result<Vec<String>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT swap_id FROM batch_swaps WHERE batch_id = $1 ORDER BY swap_id")
                .bind(batch_id)
                .fetch_all(&self.pool)
                .await?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn swap_statistics(&self, since: DateTime<Utc>) -> Result<SwapStatistics> {
        #[derive(FromRow)]
        struct StatsRow {
            total_swaps: i64,
            completed_swaps: i64,
            failed_swaps: i64,
            avg_processing_time_seconds: Option<f64>,
        }

        let row = sqlx::query_as::<_, StatsRow>(
            "SELECT COUNT(*) AS total_swaps, \
             COUNT(*) FILTER (WHERE status = 'completed') AS completed_swaps, \
             COUNT(*) FILTER (WHERE status = 'failed') AS failed_swaps, \
             AVG(EXTRACT(EPOCH FROM (updated_at - created_at)))::double precision \
             AS avg_processing_time_seconds \
             FROM swaps WHERE created_at >= $1",
        )
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        Ok(SwapStatistics {
            total_swaps: row.total_swaps,
            completed_swaps: row.completed_swaps,
            failed_swaps: row.failed_swaps,
            avg_processing_time_seconds: row.avg_processing_time_seconds,
        })
    }

    async fn wallet_performance(&self) -> Result<Vec<WalletPerformance>> {
        #[derive(FromRow)]
        struct PerfRow {
            address: String,
            chain_id: i64,
            total_batches: i64,
            total_swaps: i64,
            total_gas_used: i64,
        }

        let rows = sqlx::query_as::<_, PerfRow>(
            "SELECT w.address, w.chain_id, \
             COUNT(DISTINCT b.id) AS total_batches, \
             COUNT(DISTINCT bs.swap_id) AS total_swaps, \
             COALESCE(SUM(b.gas_used), 0)::bigint AS total_gas_used \
             FROM hot_wallets w \
             LEFT JOIN batches b ON b.wallet_address = w.address AND b.chain_id = w.chain_id \
             LEFT JOIN batch_swaps bs ON bs.batch_id = b.id \
             WHERE w.is_active = TRUE \
             GROUP BY w.address, w.chain_id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(WalletPerformance {
                    address: parse_address(&row.address)?,
                    chain_id: row.chain_id as ChainId,
                    total_batches: row.total_batches,
                    total_swaps: row.total_swaps,
                    total_gas_used: row.total_gas_used,
                })
            })
            .collect()
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
