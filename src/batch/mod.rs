//! The batch formation and dispatch pipeline.
//!
//! The aggregator owns the open batch exclusively and publishes closed,
//! chain-partitioned batches onto a bounded queue; a consumer loop spawns one
//! dispatcher task per partition. Admission latency stays independent of
//! dispatch latency, and the bounded queue makes back-pressure explicit.

mod aggregator;
pub use aggregator::{BatchProcessor, BatchProcessorHandle};
mod dispatcher;
pub use dispatcher::{DispatchContext, recover_unfinished};
mod metrics;
pub use metrics::BatchMetrics;

use crate::types::SwapRequest;
use alloy::primitives::ChainId;

/// A chain-scoped dispatch unit produced by closing the open batch.
///
/// Every member shares `chain_id` as its source chain; admission order is
/// preserved within the partition.
#[derive(Debug)]
pub struct Partition {
    /// Source chain of every member.
    pub chain_id: ChainId,
    /// Members, in admission order.
    pub requests: Vec<SwapRequest>,
}

/// Splits a closed batch into per-source-chain partitions.
pub(crate) fn partition_by_chain(requests: Vec<SwapRequest>) -> Vec<Partition> {
    let mut partitions: Vec<Partition> = Vec::new();
    for request in requests {
        match partitions.iter_mut().find(|p| p.chain_id == request.from_chain_id) {
            Some(partition) => partition.requests.push(request),
            None => partitions
                .push(Partition { chain_id: request.from_chain_id, requests: vec![request] }),
        }
    }
    partitions
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{Address, U256};

    fn request(id: &str, from: ChainId) -> SwapRequest {
        SwapRequest {
            request_id: id.to_string(),
            from_chain_id: from,
            to_chain_id: if from == 1 { 56 } else { 1 },
            token_address: Address::repeat_byte(0x11),
            amount: U256::from(1u64),
            recipient: Address::repeat_byte(0x22),
        }
    }

    #[test]
    fn partitions_are_chain_scoped_and_ordered() {
        let partitions = partition_by_chain(vec![
            request("a", 1),
            request("b", 56),
            request("c", 1),
            request("d", 56),
            request("e", 1),
        ]);

        assert_eq!(partitions.len(), 2);
        let chain1 = partitions.iter().find(|p| p.chain_id == 1).unwrap();
        let ids: Vec<_> = chain1.requests.iter().map(|r| r.request_id.as_str()).collect();
        assert_eq!(ids, ["a", "c", "e"]);

        let chain56 = partitions.iter().find(|p| p.chain_id == 56).unwrap();
        let ids: Vec<_> = chain56.requests.iter().map(|r| r.request_id.as_str()).collect();
        assert_eq!(ids, ["b", "d"]);
    }

    #[test]
    fn empty_batch_yields_no_partitions() {
        assert!(partition_by_chain(Vec::new()).is_empty());
    }
}
