//! Fetch pipeline against an in-memory chain

mod common;

use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

use hodl_evm::collections::{BLOCKS, INTERNAL_TXS, RECEIPTS, TXS};
use hodl_evm::fetch::Origin;
use hodl_evm::{fetch_all, FetchPipeline, FetchSettings, TokenMetadataCache};
use hodl_provider::{InternalTransfer, ProviderError};
use hodl_store::FileDb;
use hodl_testing::{flaky, Handler};

use common::*;

fn pipeline(
    connector: &hodl_testing::MockConnector,
    history: Option<Arc<ScriptedHistory>>,
    db: &FileDb,
    settings: FetchSettings,
) -> FetchPipeline {
    let mut client = client(connector, Arc::new(TokenMetadataCache::in_memory()));
    if let Some(history) = history {
        client = client.with_history(history);
    }
    FetchPipeline::new(Arc::new(client), db, settings).unwrap()
}

fn hashes(bytes: impl IntoIterator<Item = u8>) -> BTreeSet<String> {
    bytes.into_iter().map(hash).collect()
}

#[tokio::test]
async fn test_second_run_is_served_from_cache() {
    let dir = TempDir::new().unwrap();
    let db = FileDb::open(dir.path()).unwrap();
    let connector = connector(chain(1..=3).handler());
    let mut scripted = ScriptedHistory::default();
    scripted.internal.insert(
        hash(2),
        vec![InternalTransfer {
            from: "0x00000000000000000000000000000000000000bb".into(),
            to: "0x00000000000000000000000000000000000000aa".into(),
            value: "1000".into(),
            kind: "call".into(),
            ..InternalTransfer::default()
        }],
    );
    let history = Arc::new(scripted);
    let pipeline = pipeline(&connector, Some(history.clone()), &db, FetchSettings::default());

    let first = pipeline.run(hashes(1..=3)).await;
    assert_eq!(first.rounds, 1);
    assert_eq!(first.fetched, 3);
    assert!(first.is_complete());

    let calls = connector.total_calls();
    let internal_calls = history.internal_calls();
    let files = snapshot(dir.path());
    assert_eq!(internal_calls, 3);
    assert_eq!(files.len(), 12);

    let second = pipeline.run(hashes(1..=3)).await;
    assert_eq!(second, first);
    assert_eq!(connector.total_calls(), calls);
    assert_eq!(history.internal_calls(), internal_calls);
    assert_eq!(snapshot(dir.path()), files);

    let key = format!("optimism-{}", hash(2));
    let cached = pipeline.internal_transfers(hash(2).parse().unwrap()).await.unwrap();
    assert_eq!(cached.origin, Origin::Cached);
    assert_eq!(cached.transfers.len(), 1);
    assert!(db.collection(INTERNAL_TXS).unwrap().contains(&key));
}

#[tokio::test(start_paused = true)]
async fn test_failed_part_retries_whole_item_from_cache() {
    let dir = TempDir::new().unwrap();
    let db = FileDb::open(dir.path()).unwrap();
    let fixture = chain([7]);
    let block_calls = Arc::new(AtomicUsize::new(0));
    let counter = block_calls.clone();
    // Three endpoints over five attempts: the whole first round's block fetch fails
    let handler: Handler = Arc::new(move |method: &str, params: &Value| {
        if method == "eth_getBlockByHash" && counter.fetch_add(1, Ordering::SeqCst) < 15 {
            return Err(ProviderError::ConnectionFailed("timeout".into()));
        }
        fixture.answer(method, params)
    });
    let connector = connector(handler);
    let pipeline = pipeline(&connector, None, &db, FetchSettings::default());

    let report = pipeline.run(hashes([7])).await;
    assert_eq!(report.rounds, 2);
    assert_eq!(report.fetched, 1);
    assert!(report.is_complete());

    assert_eq!(connector.calls_for("eth_getTransactionByHash"), 2);
    assert_eq!(connector.calls_for("eth_getTransactionReceipt"), 2);
    assert_eq!(block_calls.load(Ordering::SeqCst), 17);
    assert!(db
        .collection(BLOCKS)
        .unwrap()
        .contains(&format!("optimism-{}", block_hash(7))));
}

#[tokio::test(start_paused = true)]
async fn test_flaky_endpoints_converge() {
    let dir = TempDir::new().unwrap();
    let db = FileDb::open(dir.path()).unwrap();
    let connector = connector(flaky(0.3, chain(1..=20).handler()));
    let pipeline = pipeline(
        &connector,
        Some(Arc::new(ScriptedHistory::default())),
        &db,
        FetchSettings::default(),
    );

    let report = pipeline.run(hashes(1..=20)).await;
    assert!(report.is_complete(), "{report}");
    assert_eq!(report.fetched, 20);

    let txs = db.collection(TXS).unwrap();
    let receipts = db.collection(RECEIPTS).unwrap();
    for byte in 1..=20u8 {
        let key = format!("optimism-{}", hash(byte));
        assert!(txs.contains(&key));
        assert!(receipts.contains(&key));
    }
    assert_eq!(db.collection(BLOCKS).unwrap().list().unwrap().len(), 20);
}

#[tokio::test]
async fn test_round_cap_reports_unresolved() {
    let dir = TempDir::new().unwrap();
    let db = FileDb::open(dir.path()).unwrap();
    let connector = connector(chain([1]).handler());
    let settings = FetchSettings {
        max_rounds: 3,
        concurrency: 2,
    };
    let pipeline = pipeline(&connector, None, &db, settings);

    let mut wanted = hashes([1, 9]);
    wanted.insert("0xnot-a-hash".into());
    let report = pipeline.run(wanted).await;

    assert_eq!(report.rounds, 3);
    assert_eq!(report.fetched, 1);
    assert_eq!(
        report.unresolved,
        BTreeSet::from([hash(9), "0xnot-a-hash".to_string()])
    );
    // Unknown transactions are agreed on as null, then rejected without retries
    assert_eq!(connector.calls_for("eth_getTransactionByHash"), 2 + 3 * 2);
    assert!(!db
        .collection(TXS)
        .unwrap()
        .contains(&format!("optimism-{}", hash(9))));
}

#[tokio::test]
async fn test_deposit_transaction_is_rebuilt() {
    let dir = TempDir::new().unwrap();
    let db = FileDb::open(dir.path()).unwrap();
    let (mut tx, receipt, block) = bundle(5);
    tx["type"] = json!("0x7e");
    tx["from"] = json!("0xDeaDDEaDDeAdDeAdDEAdDEaddeAddEAdDEAd0001");
    tx["sourceHash"] = json!(hash(0x33));
    tx["mint"] = json!("0x0");
    let fixture = hodl_testing::ChainFixture::new().with_bundle(tx, receipt, block);
    let connector = connector(fixture.handler());
    let pipeline = pipeline(&connector, None, &db, FetchSettings::default());

    assert!(pipeline.run(hashes([5])).await.is_complete());

    let raw = db
        .collection(TXS)
        .unwrap()
        .read_raw(&format!("optimism-{}", hash(5)))
        .unwrap()
        .unwrap();
    let stored: Value = serde_json::from_slice(&raw).unwrap();
    assert_eq!(stored["type"], "0x7e");
    assert_eq!(stored["hash"], hash(5));
    assert_eq!(stored["from"], "0xdeaddeaddeaddeaddeaddeaddeaddeaddead0001");
    assert_eq!(stored["sourceHash"], hash(0x33));
    assert_eq!(stored["r"], "0x0");
    assert!(stored.get("mint").is_none());

    let cached = pipeline.transaction(hash(5).parse().unwrap()).await.unwrap();
    assert!(cached.is_deposit());
}

#[tokio::test]
async fn test_corrupt_entry_is_refetched() {
    let dir = TempDir::new().unwrap();
    let db = FileDb::open(dir.path()).unwrap();
    let key = format!("optimism-{}", hash(4));
    db.collection(RECEIPTS)
        .unwrap()
        .write_raw(&key, b"{\"transactionHash\":")
        .unwrap();
    let connector = connector(chain([4]).handler());
    let pipeline = pipeline(&connector, None, &db, FetchSettings::default());

    assert!(pipeline.run(hashes([4])).await.is_complete());
    assert_eq!(connector.calls_for("eth_getTransactionReceipt"), 2);
    let receipt = pipeline.receipt(hash(4).parse().unwrap()).await.unwrap();
    assert_eq!(format!("{:#x}", receipt.block_hash), block_hash(4));
}

#[tokio::test]
async fn test_suspicious_documents_pass_through() {
    let dir = TempDir::new().unwrap();
    let db = FileDb::open(dir.path()).unwrap();
    let (tx, mut receipt, block) = bundle(6);
    receipt["gasUsed"] = json!("0x0");
    let fixture = hodl_testing::ChainFixture::new().with_bundle(tx, receipt, block);
    let connector = connector(fixture.handler());
    let pipeline = pipeline(&connector, None, &db, FetchSettings::default());

    let report = pipeline.run(hashes([6])).await;
    assert_eq!(report.rounds, 1);
    assert!(report.is_complete());
    let receipt = pipeline.receipt(hash(6).parse().unwrap()).await.unwrap();
    assert!(receipt.is_suspicious());
}

#[tokio::test]
async fn test_internal_transfers_skipped_without_explorer() {
    let dir = TempDir::new().unwrap();
    let db = FileDb::open(dir.path()).unwrap();
    let connector = connector(chain([8]).handler());
    let pipeline = pipeline(&connector, None, &db, FetchSettings::default());

    assert!(pipeline.run(hashes([8])).await.is_complete());
    let internal = pipeline.internal_transfers(hash(8).parse().unwrap()).await.unwrap();
    assert_eq!(internal.origin, Origin::Unavailable);
    assert!(db.collection(INTERNAL_TXS).unwrap().list().unwrap().is_empty());
}

#[tokio::test]
async fn test_fetch_all_isolates_networks() {
    let dir = TempDir::new().unwrap();
    let db = FileDb::open(dir.path()).unwrap();
    let tokens = Arc::new(TokenMetadataCache::in_memory());

    let healthy = connector(chain(1..=2).handler());
    let healthy_client = Arc::new(client(&healthy, tokens.clone()));

    // Every endpoint reports the wrong chain, so the pool never reaches quorum
    let broken = hodl_testing::uniform_connector("base", 8453, 3, chain([1]).handler());
    let broken_client = Arc::new(hodl_evm::EvmClient::with_connector(
        hodl_testing::mock_network("base", CHAIN_ID, &broken),
        Arc::new(broken.clone()),
        tokens,
    ));

    let wanted = [
        ("optimism".to_string(), hashes(1..=2)),
        ("base".to_string(), hashes([1])),
        ("gnosis".to_string(), hashes([1])),
    ]
    .into_iter()
    .collect();
    let reports = fetch_all(
        &db,
        &[healthy_client, broken_client],
        wanted,
        FetchSettings::default(),
    )
    .await;

    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].network, "optimism");
    assert_eq!(reports[0].fetched, 2);
    assert_eq!(broken.total_calls(), 0);
}

#[tokio::test]
async fn test_fetch_all_skips_deprecated_networks() {
    let dir = TempDir::new().unwrap();
    let db = FileDb::open(dir.path()).unwrap();

    let fantom = hodl_testing::uniform_connector("fantom", 250, 3, chain([1]).handler());
    let mut network = hodl_testing::mock_network("fantom", 250, &fantom);
    network.deprecated = true;
    let history = Arc::new(ScriptedHistory::default());
    let client = hodl_evm::EvmClient::with_connector(
        network,
        Arc::new(fantom.clone()),
        Arc::new(TokenMetadataCache::in_memory()),
    )
    .with_history(history.clone());

    let wanted = [("fantom".to_string(), hashes([1]))].into_iter().collect();
    let reports = fetch_all(&db, &[Arc::new(client)], wanted, FetchSettings::default()).await;

    assert!(reports.is_empty());
    assert_eq!(fantom.calls_for("eth_chainId"), 0);
    assert_eq!(fantom.total_calls(), 0);
    assert_eq!(history.internal_calls(), 0);
    assert!(db.collection(TXS).unwrap().list().unwrap().is_empty());
}
