//! End-to-end tests of the batching pipeline over in-memory storage and
//! scripted chain clients.

use alloy::primitives::{Address, B256, ChainId, U256, keccak256};
use bridge_relay::{
    batch::{BatchProcessor, DispatchContext, recover_unfinished},
    chains::{BatchReceipt, ChainClient, ChainClientError, ChainClients, MockChainClient},
    config::BatchConfig,
    error::{BridgeError, ValidationError},
    service::BridgeService,
    storage::{BatchUpdate, Storage},
    types::{BatchState, ChainConfig, SwapRequest, SwapState},
    wallet::{BridgeSigner, WalletPool},
};
use std::{collections::HashMap, sync::Arc, time::Duration};

const CHAIN_A: ChainId = 1;
const CHAIN_B: ChainId = 56;

struct Harness {
    storage: Storage,
    service: BridgeService,
    wallets: Arc<WalletPool>,
    chain_a: Arc<MockChainClient>,
    chain_b: Arc<MockChainClient>,
}

fn chain_config(chain_id: ChainId, max_gas_price: Option<u128>) -> ChainConfig {
    ChainConfig {
        chain_id,
        chain_type: "evm".to_string(),
        rpc_url: "http://localhost:8545".to_string(),
        bridge_address: Address::repeat_byte(chain_id as u8),
        required_confirmations: 1,
        max_gas_price,
        is_active: true,
    }
}

fn request(id: &str, from: ChainId, to: ChainId, amount: u64) -> SwapRequest {
    SwapRequest {
        request_id: id.to_string(),
        from_chain_id: from,
        to_chain_id: to,
        token_address: Address::repeat_byte(0x11),
        amount: U256::from(amount),
        recipient: Address::repeat_byte(0x22),
    }
}

async fn harness(config: BatchConfig) -> Harness {
    harness_with_wallets(config, 1).await
}

async fn harness_with_wallets(config: BatchConfig, num_wallets: usize) -> Harness {
    let storage = Storage::in_memory();
    for chain_id in [CHAIN_A, CHAIN_B] {
        storage.upsert_chain_config(&chain_config(chain_id, None)).await.unwrap();
    }

    let signers: Vec<_> = (0..num_wallets).map(|_| BridgeSigner::random()).collect();
    for signer in &signers {
        for chain_id in [CHAIN_A, CHAIN_B] {
            storage.upsert_wallet(signer.address(), chain_id).await.unwrap();
        }
    }

    let chain_a = Arc::new(MockChainClient::new());
    let chain_b = Arc::new(MockChainClient::new());
    let chains = ChainClients::new(HashMap::from([
        (CHAIN_A, chain_a.clone() as Arc<dyn ChainClient>),
        (CHAIN_B, chain_b.clone() as Arc<dyn ChainClient>),
    ]));

    let wallets = Arc::new(WalletPool::new(signers, storage.clone()));
    let ctx =
        DispatchContext { storage: storage.clone(), chains, wallets: wallets.clone() };
    let handle = BatchProcessor::spawn(config, ctx);
    let service = BridgeService::new(storage.clone(), handle, [CHAIN_A, CHAIN_B]);

    Harness { storage, service, wallets, chain_a, chain_b }
}

async fn wait_for_state(storage: &Storage, request_id: &str, state: SwapState) {
    tokio::time::timeout(Duration::from_secs(60), async {
        loop {
            if let Some(swap) = storage.get_swap(request_id).await.unwrap() {
                if swap.status == state {
                    return;
                }
                assert!(
                    !swap.status.is_terminal(),
                    "swap {request_id} reached {} while waiting for {}",
                    swap.status,
                    state
                );
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {request_id} to reach {state:?}"));
}

/// Reads the persisted nonce of the single harness wallet without disturbing
/// LRU order beyond a stamp.
async fn wallet_nonce(storage: &Storage, chain_id: ChainId) -> u64 {
    storage.acquire_wallet(chain_id).await.unwrap().unwrap().nonce
}

fn size_close_config(max_size: usize) -> BatchConfig {
    BatchConfig { max_size, timeout: Duration::from_secs(600), ..Default::default() }
}

#[tokio::test(start_paused = true)]
async fn batch_closes_on_size() {
    let h = harness(size_close_config(3)).await;

    for id in ["r1", "r2", "r3"] {
        h.service.initiate_swap(request(id, CHAIN_A, CHAIN_B, 1000)).await.unwrap();
    }
    for id in ["r1", "r2", "r3"] {
        wait_for_state(&h.storage, id, SwapState::Completed).await;
    }

    // One batch, one broadcast, members in admission order.
    let submissions = h.chain_a.submissions();
    assert_eq!(submissions.len(), 1);
    assert_eq!(submissions[0].request_ids, ["r1", "r2", "r3"]);
    assert_eq!(submissions[0].nonce, 0);

    // Exactly one nonce increment, and nothing left unfinished.
    assert_eq!(wallet_nonce(&h.storage, CHAIN_A).await, 1);
    assert!(h.storage.unfinished_batches().await.unwrap().is_empty());

    let status = h.service.swap_status("r1").await.unwrap();
    assert!(status.source_tx_hash.is_some());
}

#[tokio::test(start_paused = true)]
async fn batch_closes_on_timeout() {
    let h = harness(BatchConfig {
        max_size: 50,
        timeout: Duration::from_secs(1),
        ..Default::default()
    })
    .await;

    h.service.initiate_swap(request("r1", CHAIN_A, CHAIN_B, 5)).await.unwrap();
    wait_for_state(&h.storage, "r1", SwapState::Completed).await;

    assert_eq!(h.chain_a.submissions().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn partitions_dispatch_per_chain() {
    // Two wallets so both partitions can hold a lease at the same time.
    let h = harness_with_wallets(size_close_config(4), 2).await;

    h.service.initiate_swap(request("a1", CHAIN_A, CHAIN_B, 10)).await.unwrap();
    h.service.initiate_swap(request("b1", CHAIN_B, CHAIN_A, 10)).await.unwrap();
    h.service.initiate_swap(request("a2", CHAIN_A, CHAIN_B, 10)).await.unwrap();
    h.service.initiate_swap(request("b2", CHAIN_B, CHAIN_A, 10)).await.unwrap();

    for id in ["a1", "a2", "b1", "b2"] {
        wait_for_state(&h.storage, id, SwapState::Completed).await;
    }

    let on_a = h.chain_a.submissions();
    assert_eq!(on_a.len(), 1);
    assert_eq!(on_a[0].request_ids, ["a1", "a2"]);

    let on_b = h.chain_b.submissions();
    assert_eq!(on_b.len(), 1);
    assert_eq!(on_b[0].request_ids, ["b1", "b2"]);

    // Independent nonce sequences per chain.
    assert_eq!(on_a[0].nonce, 0);
    assert_eq!(on_b[0].nonce, 0);
}

#[tokio::test(start_paused = true)]
async fn nonces_are_contiguous_across_batches() {
    let h = harness(size_close_config(1)).await;

    h.service.initiate_swap(request("r1", CHAIN_A, CHAIN_B, 1)).await.unwrap();
    wait_for_state(&h.storage, "r1", SwapState::Completed).await;
    h.service.initiate_swap(request("r2", CHAIN_A, CHAIN_B, 1)).await.unwrap();
    wait_for_state(&h.storage, "r2", SwapState::Completed).await;

    let nonces: Vec<_> = h.chain_a.submissions().iter().map(|s| s.nonce).collect();
    assert_eq!(nonces, [0, 1]);
    assert_eq!(wallet_nonce(&h.storage, CHAIN_A).await, 2);
}

#[tokio::test(start_paused = true)]
async fn node_rejection_fails_batch_and_releases_wallet() {
    let h = harness(size_close_config(1)).await;
    h.chain_a.fail_next_submit(ChainClientError::RejectedByNode("nonce too low".to_string()));

    h.service.initiate_swap(request("r1", CHAIN_A, CHAIN_B, 7)).await.unwrap();
    wait_for_state(&h.storage, "r1", SwapState::Failed).await;

    let swap = h.storage.get_swap("r1").await.unwrap().unwrap();
    assert!(swap.error_message.unwrap().contains("submission failed"));

    // Nothing reached the chain and the nonce did not move.
    assert!(h.chain_a.submissions().is_empty());
    assert_eq!(wallet_nonce(&h.storage, CHAIN_A).await, 0);

    // The batch is terminal and the wallet can be leased again once the
    // dispatcher task unwinds.
    assert!(h.storage.unfinished_batches().await.unwrap().is_empty());
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if h.wallets.lease(CHAIN_A).await.unwrap().is_some() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("wallet was never released");
}

#[tokio::test(start_paused = true)]
async fn reverted_batch_fails_members() {
    let h = harness(size_close_config(1)).await;
    h.chain_a.push_receipt(Ok(BatchReceipt { block_number: 9, gas_used: 100_000, success: false }));

    h.service.initiate_swap(request("r1", CHAIN_A, CHAIN_B, 7)).await.unwrap();
    wait_for_state(&h.storage, "r1", SwapState::Failed).await;

    let swap = h.storage.get_swap("r1").await.unwrap().unwrap();
    assert!(swap.error_message.unwrap().contains("reverted"));

    // The broadcast happened, so the nonce advanced despite the failure.
    assert_eq!(h.chain_a.submissions().len(), 1);
    assert_eq!(wallet_nonce(&h.storage, CHAIN_A).await, 1);
}

#[tokio::test(start_paused = true)]
async fn confirmation_timeout_fails_batch() {
    let h = harness(size_close_config(1)).await;
    h.chain_a.push_receipt(Err(ChainClientError::ReceiptTimeout(B256::ZERO)));

    h.service.initiate_swap(request("r1", CHAIN_A, CHAIN_B, 7)).await.unwrap();
    wait_for_state(&h.storage, "r1", SwapState::Failed).await;

    let swap = h.storage.get_swap("r1").await.unwrap().unwrap();
    assert!(swap.error_message.unwrap().contains("confirmation failed"));
}

#[tokio::test(start_paused = true)]
async fn underpriced_batches_escalate_gas_price() {
    let h = harness(size_close_config(1)).await;
    h.chain_a.fail_next_submit(ChainClientError::InsufficientGas);
    h.chain_a.fail_next_submit(ChainClientError::InsufficientGas);

    h.service.initiate_swap(request("r1", CHAIN_A, CHAIN_B, 7)).await.unwrap();
    wait_for_state(&h.storage, "r1", SwapState::Completed).await;

    // 1 gwei bumped by 25% twice.
    let submissions = h.chain_a.submissions();
    assert_eq!(submissions.len(), 1);
    assert_eq!(submissions[0].gas_price, 1_562_500_000);
}

#[tokio::test(start_paused = true)]
async fn gas_escalation_respects_the_ceiling() {
    let h = harness(size_close_config(1)).await;
    // Ceiling below the second bump: the first retry caps at the ceiling and
    // a further underpriced response is permanent.
    h.storage
        .upsert_chain_config(&chain_config(CHAIN_A, Some(1_100_000_000)))
        .await
        .unwrap();
    h.chain_a.fail_next_submit(ChainClientError::InsufficientGas);
    h.chain_a.fail_next_submit(ChainClientError::InsufficientGas);

    h.service.initiate_swap(request("r1", CHAIN_A, CHAIN_B, 7)).await.unwrap();
    wait_for_state(&h.storage, "r1", SwapState::Failed).await;

    assert!(h.chain_a.submissions().is_empty());
    assert_eq!(wallet_nonce(&h.storage, CHAIN_A).await, 0);
}

#[tokio::test(start_paused = true)]
async fn validation_failures_write_nothing() {
    let h = harness(size_close_config(1)).await;

    let cases = [
        (request("", CHAIN_A, CHAIN_B, 1), ValidationError::EmptyRequestId),
        (request("same", CHAIN_A, CHAIN_A, 1), ValidationError::SameChain),
        (request("zero", CHAIN_A, CHAIN_B, 0), ValidationError::ZeroAmount),
        (request("unknown", 777, CHAIN_B, 1), ValidationError::UnknownChain(777)),
    ];

    for (req, expected) in cases {
        let id = req.request_id.clone();
        match h.service.initiate_swap(req).await {
            Err(BridgeError::Validation(err)) => assert_eq!(err, expected),
            other => panic!("expected validation error, got {other:?}"),
        }
        assert!(h.storage.get_swap(&id).await.unwrap().is_none());
    }
}

#[tokio::test(start_paused = true)]
async fn duplicate_request_ids_conflict() {
    let h = harness(size_close_config(50)).await;

    h.service.initiate_swap(request("r1", CHAIN_A, CHAIN_B, 1)).await.unwrap();
    match h.service.initiate_swap(request("r1", CHAIN_A, CHAIN_B, 1)).await {
        Err(BridgeError::DuplicateRequest(id)) => assert_eq!(id, "r1"),
        other => panic!("expected duplicate error, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn queue_status_tracks_the_open_batch() {
    let h = harness(BatchConfig {
        max_size: 50,
        timeout: Duration::from_secs(600),
        ..Default::default()
    })
    .await;

    assert_eq!(h.service.queue_status().length, 0);
    assert_eq!(h.service.queue_status().max_size, 50);

    h.service.initiate_swap(request("r1", CHAIN_A, CHAIN_B, 1)).await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        while h.service.queue_status().length != 1 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("admission never reached the open batch");
    assert_eq!(h.service.queue_status().active_batches, 0);
}

#[tokio::test(start_paused = true)]
async fn status_reads_never_move_backward() {
    let h = harness(size_close_config(1)).await;

    h.service.initiate_swap(request("r1", CHAIN_A, CHAIN_B, 9)).await.unwrap();
    wait_for_state(&h.storage, "r1", SwapState::Completed).await;

    for _ in 0..3 {
        let status = h.service.swap_status("r1").await.unwrap();
        assert_eq!(status.status, SwapState::Completed);
    }
}

/// Builds a context with no running processor, for recovery tests.
async fn recovery_ctx() -> (DispatchContext, Arc<MockChainClient>) {
    let storage = Storage::in_memory();
    storage.upsert_chain_config(&chain_config(CHAIN_A, None)).await.unwrap();
    let signer = BridgeSigner::random();
    storage.upsert_wallet(signer.address(), CHAIN_A).await.unwrap();

    let chain_a = Arc::new(MockChainClient::new());
    let chains =
        ChainClients::new(HashMap::from([(CHAIN_A, chain_a.clone() as Arc<dyn ChainClient>)]));
    let wallets = Arc::new(WalletPool::new(vec![signer], storage.clone()));

    (DispatchContext { storage, chains, wallets }, chain_a)
}

#[tokio::test(start_paused = true)]
async fn recovery_resumes_broadcast_batches() {
    let (ctx, _chain_a) = recovery_ctx().await;
    let storage = &ctx.storage;

    // A batch that was broadcast before the restart.
    let now = chrono::Utc::now();
    storage
        .create_swap(&bridge_relay::types::Swap {
            request_id: "r1".to_string(),
            from_chain_id: CHAIN_A,
            to_chain_id: CHAIN_B,
            token_address: Address::repeat_byte(0x11),
            amount: U256::from(100u64),
            recipient: Address::repeat_byte(0x22),
            status: SwapState::Pending,
            error_message: None,
            created_at: now,
            updated_at: now,
        })
        .await
        .unwrap();
    let batch = storage.create_batch(Address::repeat_byte(0x33), CHAIN_A).await.unwrap();
    storage.add_swaps_to_batch(batch.id, &["r1".to_string()]).await.unwrap();
    let tx_hash = keccak256(b"in-flight");
    storage
        .update_batch_status(
            &BatchUpdate::new(batch.batch_id, BatchState::PendingConfirm).with_tx_hash(tx_hash),
        )
        .await
        .unwrap();
    storage.update_swaps_in_batch(batch.id, SwapState::Submitting, None).await.unwrap();

    recover_unfinished(&ctx, &BatchConfig::default()).await.unwrap();
    wait_for_state(storage, "r1", SwapState::Completed).await;
    assert!(storage.unfinished_batches().await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn recovery_fails_batches_that_never_broadcast() {
    let (ctx, chain_a) = recovery_ctx().await;
    let storage = &ctx.storage;

    let now = chrono::Utc::now();
    storage
        .create_swap(&bridge_relay::types::Swap {
            request_id: "r1".to_string(),
            from_chain_id: CHAIN_A,
            to_chain_id: CHAIN_B,
            token_address: Address::repeat_byte(0x11),
            amount: U256::from(100u64),
            recipient: Address::repeat_byte(0x22),
            status: SwapState::Pending,
            error_message: None,
            created_at: now,
            updated_at: now,
        })
        .await
        .unwrap();
    let batch = storage.create_batch(Address::repeat_byte(0x33), CHAIN_A).await.unwrap();
    storage.add_swaps_to_batch(batch.id, &["r1".to_string()]).await.unwrap();

    recover_unfinished(&ctx, &BatchConfig::default()).await.unwrap();

    // The batch is failed, its member is pending again and free to join a new
    // batch.
    let swap = storage.get_swap("r1").await.unwrap().unwrap();
    assert_eq!(swap.status, SwapState::Pending);
    assert!(storage.unfinished_batches().await.unwrap().is_empty());
    assert!(chain_a.submissions().is_empty());

    let retry = storage.create_batch(Address::repeat_byte(0x44), CHAIN_A).await.unwrap();
    storage.add_swaps_to_batch(retry.id, &["r1".to_string()]).await.unwrap();
}
