//! Core types of the bridge relay.

use alloy::primitives::{Address, B256, ChainId, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user-submitted instruction to move tokens from a source chain to a
/// destination chain.
///
/// This is the wire shape accepted on admission as well as the unit of work
/// carried through the batching pipeline. The `amount` travels as a [`U256`]
/// end to end and is persisted as a decimal string, so no intermediate
/// conversion can lose precision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapRequest {
    /// Client-supplied unique identifier.
    pub request_id: String,
    /// Source chain.
    pub from_chain_id: ChainId,
    /// Destination chain.
    pub to_chain_id: ChainId,
    /// Token contract on the source chain.
    pub token_address: Address,
    /// Amount of tokens to move.
    pub amount: U256,
    /// Recipient on the destination chain.
    pub recipient: Address,
}

/// Lifecycle state of a swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapState {
    /// Persisted, not yet assigned to a batch.
    Pending,
    /// Assigned to a batch that has not been broadcast yet.
    Queued,
    /// The owning batch has been broadcast.
    Submitting,
    /// The owning batch confirmed.
    Completed,
    /// The swap will not execute.
    Failed,
}

impl SwapState {
    /// String form used in storage and API responses.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Queued => "queued",
            Self::Submitting => "submitting",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Whether the state is terminal.
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Whether advancing `self -> next` is an allowed transition.
    ///
    /// `queued -> pending` is the batch-creation-failure rollback; everything
    /// else follows the forward path.
    pub fn can_transition(&self, next: SwapState) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Queued)
                | (Self::Queued, Self::Submitting)
                | (Self::Queued, Self::Pending)
                | (Self::Queued, Self::Failed)
                | (Self::Submitting, Self::Completed)
                | (Self::Submitting, Self::Failed)
                | (Self::Pending, Self::Failed)
        )
    }
}

impl std::fmt::Display for SwapState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SwapState {
    type Err = UnknownState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "queued" => Ok(Self::Queued),
            "submitting" => Ok(Self::Submitting),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(UnknownState(other.to_string())),
        }
    }
}

/// Lifecycle state of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchState {
    /// Created, not yet broadcast.
    Submitting,
    /// Broadcast, awaiting confirmations.
    PendingConfirm,
    /// Confirmed at the required depth.
    Completed,
    /// Rejected, reverted or timed out.
    Failed,
}

impl BatchState {
    /// String form used in storage.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Submitting => "submitting",
            Self::PendingConfirm => "pending_confirm",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Whether the state is terminal.
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for BatchState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BatchState {
    type Err = UnknownState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "submitting" => Ok(Self::Submitting),
            "pending_confirm" => Ok(Self::PendingConfirm),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(UnknownState(other.to_string())),
        }
    }
}

/// A state string in storage that the relay does not recognize.
#[derive(Debug, thiserror::Error)]
#[error("unknown state: {0}")]
pub struct UnknownState(pub String);

/// A persisted swap record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Swap {
    /// Client-supplied unique identifier.
    pub request_id: String,
    /// Source chain.
    pub from_chain_id: ChainId,
    /// Destination chain.
    pub to_chain_id: ChainId,
    /// Token contract on the source chain.
    pub token_address: Address,
    /// Amount of tokens to move.
    pub amount: U256,
    /// Recipient on the destination chain.
    pub recipient: Address,
    /// Lifecycle state.
    pub status: SwapState,
    /// Failure detail, if any.
    pub error_message: Option<String>,
    /// Insertion time.
    pub created_at: DateTime<Utc>,
    /// Last status change.
    pub updated_at: DateTime<Utc>,
}

/// A persisted batch record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// Dense identifier used for joins.
    pub id: i64,
    /// Opaque identifier exposed outside the store.
    pub batch_id: B256,
    /// Address of the wallet leased to submit the batch.
    pub wallet_address: Address,
    /// Source chain of every member swap.
    pub chain_id: ChainId,
    /// Hash of the source-chain batch transaction, once broadcast.
    pub source_tx_hash: Option<B256>,
    /// Hash of the target-chain transaction. The relay never writes this.
    pub target_tx_hash: Option<B256>,
    /// Lifecycle state.
    pub status: BatchState,
    /// Gas price the batch was submitted with.
    pub gas_price: Option<u128>,
    /// Gas consumed by the confirmed transaction.
    pub gas_used: Option<i64>,
    /// Block the transaction was included in.
    pub block_number: Option<i64>,
    /// Failure detail, if any.
    pub error_message: Option<String>,
    /// Insertion time.
    pub created_at: DateTime<Utc>,
    /// Last status change.
    pub updated_at: DateTime<Utc>,
}

/// A persisted hot-wallet record.
///
/// `nonce` is the next nonce to submit with; every successful submission
/// advances it by exactly one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HotWallet {
    /// Dense identifier.
    pub id: i64,
    /// Signing address.
    pub address: Address,
    /// Chain the record tracks.
    pub chain_id: ChainId,
    /// Next nonce to submit with.
    pub nonce: u64,
    /// Time of the last acquisition.
    pub last_used_at: Option<DateTime<Utc>>,
    /// Whether the wallet may be leased.
    pub is_active: bool,
    /// Number of batches this wallet completed.
    pub total_processed_batches: i64,
    /// Sum of the amounts this wallet moved, as a decimal string.
    pub total_processed_volume: U256,
}

/// Per-chain configuration row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainConfig {
    /// Chain identifier.
    pub chain_id: ChainId,
    /// Free-form chain family tag, e.g. `evm`.
    pub chain_type: String,
    /// JSON-RPC endpoint.
    pub rpc_url: String,
    /// Bridge contract to submit batches to.
    pub bridge_address: Address,
    /// Confirmation depth required before a batch is final.
    pub required_confirmations: u64,
    /// Ceiling for gas-price escalation.
    pub max_gas_price: Option<u128>,
    /// Whether the chain accepts new batches.
    pub is_active: bool,
}

/// Status of a swap as reported to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapStatus {
    /// Client-supplied unique identifier.
    pub request_id: String,
    /// Lifecycle state.
    pub status: SwapState,
    /// Source chain.
    pub from_chain_id: ChainId,
    /// Destination chain.
    pub to_chain_id: ChainId,
    /// Source-chain batch transaction, once broadcast.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_tx_hash: Option<B256>,
    /// Target-chain transaction, if ever recorded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_tx_hash: Option<B256>,
    /// Failure detail, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Insertion time.
    pub created_at: DateTime<Utc>,
    /// Last status change.
    pub updated_at: DateTime<Utc>,
}

/// Snapshot of the aggregator queue.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    /// Swaps in the open batch.
    pub length: usize,
    /// Size at which the open batch closes.
    pub max_size: usize,
    /// Dispatcher tasks currently running.
    pub active_batches: usize,
}

/// Aggregate swap counters over a time window.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapStatistics {
    /// Swaps admitted in the window.
    pub total_swaps: i64,
    /// Swaps that reached `completed`.
    pub completed_swaps: i64,
    /// Swaps that reached `failed`.
    pub failed_swaps: i64,
    /// Mean seconds between insertion and the last status change.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_processing_time_seconds: Option<f64>,
}

/// Per-wallet throughput counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletPerformance {
    /// Signing address.
    pub address: Address,
    /// Chain the record tracks.
    pub chain_id: ChainId,
    /// Batches attributed to the wallet.
    pub total_batches: i64,
    /// Swaps attributed to the wallet.
    pub total_swaps: i64,
    /// Gas consumed across confirmed batches.
    pub total_gas_used: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swap_states_round_trip() {
        for state in [
            SwapState::Pending,
            SwapState::Queued,
            SwapState::Submitting,
            SwapState::Completed,
            SwapState::Failed,
        ] {
            assert_eq!(state.as_str().parse::<SwapState>().unwrap(), state);
        }
        assert!("confirmed".parse::<SwapState>().is_err());
    }

    #[test]
    fn batch_states_round_trip() {
        for state in [
            BatchState::Submitting,
            BatchState::PendingConfirm,
            BatchState::Completed,
            BatchState::Failed,
        ] {
            assert_eq!(state.as_str().parse::<BatchState>().unwrap(), state);
        }
    }

    #[test]
    fn terminal_states_are_absorbing() {
        for terminal in [SwapState::Completed, SwapState::Failed] {
            for next in [
                SwapState::Pending,
                SwapState::Queued,
                SwapState::Submitting,
                SwapState::Completed,
                SwapState::Failed,
            ] {
                assert!(!terminal.can_transition(next));
            }
        }
    }

    #[test]
    fn forward_path_is_allowed() {
        assert!(SwapState::Pending.can_transition(SwapState::Queued));
        assert!(SwapState::Queued.can_transition(SwapState::Submitting));
        assert!(SwapState::Submitting.can_transition(SwapState::Completed));
        assert!(SwapState::Queued.can_transition(SwapState::Pending));
        assert!(!SwapState::Pending.can_transition(SwapState::Completed));
        assert!(!SwapState::Submitting.can_transition(SwapState::Queued));
    }

    #[test]
    fn amount_text_round_trip_is_lossless() {
        let raw = "115792089237316195423570985008687907853269984665640564039457";
        let amount = U256::from_str_radix(raw, 10).unwrap();
        let text = amount.to_string();
        assert_eq!(text.parse::<U256>().unwrap(), amount);
    }
}
