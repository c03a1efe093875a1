//! End-to-end crawl loop behaviour against scripted chain clients.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use chaincrawl_core::{
    CheckpointStore, CrawlError, CrawlerConfig, CrawlerEvent, EventType, MemoryCheckpointStore,
    NetworkDescriptor, ReindexTask,
};
use chaincrawl_evm::events::{keccak256_signature, signature};
use chaincrawl_evm::{
    ChainClient, CrawlLoop, CrawlerBuilder, RawLog, ScanOutcome, StopSignal, Supervisor,
    TransactionReceipt,
};
use chaincrawl_storage::InMemoryStorage;

// ─── Scripted client ─────────────────────────────────────────────────────────

#[derive(Default)]
struct Script {
    height: Option<u64>,
    /// Remaining `get_logs` calls that fail before calls start succeeding.
    failures_left: u32,
    logs: Vec<RawLog>,
    receipts: HashMap<String, TransactionReceipt>,
    log_requests: Vec<(u64, u64)>,
    receipt_requests: Vec<String>,
}

#[derive(Clone)]
struct ScriptedClient {
    url: String,
    script: Arc<Mutex<Script>>,
}

impl ScriptedClient {
    fn new(url: &str, height: Option<u64>) -> Self {
        Self {
            url: url.into(),
            script: Arc::new(Mutex::new(Script {
                height,
                ..Script::default()
            })),
        }
    }

    fn with(self, f: impl FnOnce(&mut Script)) -> Self {
        f(&mut self.script.lock().unwrap());
        self
    }

    fn log_requests(&self) -> Vec<(u64, u64)> {
        self.script.lock().unwrap().log_requests.clone()
    }

    fn receipt_requests(&self) -> Vec<String> {
        self.script.lock().unwrap().receipt_requests.clone()
    }
}

#[async_trait]
impl ChainClient for ScriptedClient {
    async fn get_height(&self) -> Result<u64, CrawlError> {
        self.script
            .lock()
            .unwrap()
            .height
            .ok_or_else(|| CrawlError::Rpc("connection refused".into()))
    }

    async fn get_logs(&self, from: u64, to: u64) -> Result<Vec<RawLog>, CrawlError> {
        let mut s = self.script.lock().unwrap();
        s.log_requests.push((from, to));
        if s.failures_left > 0 {
            s.failures_left -= 1;
            return Err(CrawlError::Rpc("query returned more than 10000 results".into()));
        }
        Ok(s.logs
            .iter()
            .filter(|l| l.block_number_u64().map_or(false, |b| b >= from && b <= to))
            .cloned()
            .collect())
    }

    async fn get_transaction_receipt(
        &self,
        tx_hash: &str,
    ) -> Result<Option<TransactionReceipt>, CrawlError> {
        let mut s = self.script.lock().unwrap();
        s.receipt_requests.push(tx_hash.to_string());
        if tx_hash == "0xbroken" {
            return Err(CrawlError::Rpc("internal error".into()));
        }
        Ok(s.receipts.get(tx_hash).cloned())
    }

    fn endpoint(&self) -> &str {
        &self.url
    }
}

fn log(event_type: EventType, tx: &str, block: u64, index: u64) -> RawLog {
    RawLog {
        address: "0xnft".into(),
        topics: vec![keccak256_signature(signature(event_type))],
        data: "0x".into(),
        block_number: Some(format!("0x{block:x}")),
        block_hash: None,
        tx_hash: Some(tx.into()),
        log_index: Some(format!("0x{index:x}")),
        removed: None,
    }
}

fn descriptor(chunk_size: u64, deployed_block: Option<u64>) -> NetworkDescriptor {
    NetworkDescriptor {
        chain_id: 137,
        network: "polygon".into(),
        rpc: "mock://primary".into(),
        fallback_rpcs: vec![],
        chunk_size,
        deployed_block,
    }
}

struct Harness {
    crawl_loop: CrawlLoop,
    storage: Arc<InMemoryStorage>,
    events: mpsc::UnboundedReceiver<CrawlerEvent>,
}

fn harness(descriptor: NetworkDescriptor, clients: Vec<ScriptedClient>) -> Harness {
    let storage = Arc::new(InMemoryStorage::new());
    let (tx, events) = mpsc::unbounded_channel();
    let crawl_loop = CrawlerBuilder::new(descriptor)
        .checkpoint_store(storage.clone())
        .handler(storage.clone())
        .clients(clients.into_iter().map(|c| Arc::new(c) as Arc<dyn ChainClient>).collect())
        .build(tx)
        .unwrap();
    Harness {
        crawl_loop,
        storage,
        events,
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn one_cycle_advances_by_one_chunk() {
    let client = ScriptedClient::new("mock://primary", Some(1000)).with(|s| {
        s.logs = vec![
            log(EventType::MetadataCreated, "0xa", 910, 0),
            log(EventType::OrderStarted, "0xb", 930, 0),
            log(EventType::MetadataCreated, "0xc", 990, 0),
        ];
    });
    let mut h = harness(descriptor(50, Some(100)), vec![client.clone()]);

    assert_eq!(h.crawl_loop.resolve_start(Some(900)).await.unwrap(), 900);
    let report = h.crawl_loop.run_cycle(&StopSignal::never()).await.unwrap();

    assert_eq!(
        report.scan,
        ScanOutcome::Scanned {
            from: 901,
            to: 950,
            events: 2,
        }
    );
    assert_eq!(client.log_requests(), vec![(901, 950)]);
    assert_eq!(h.crawl_loop.state().last_indexed_block, Some(950));
    assert_eq!(h.storage.get_last_indexed_block(137).await.unwrap(), Some(950));
    assert_eq!(h.storage.event_count(), 2);

    let msg = h.events.try_recv().unwrap();
    assert_eq!(msg.method, EventType::MetadataCreated);
    assert_eq!(msg.network, 137);
    assert_eq!(msg.data.len(), 1);
    assert!(h.events.try_recv().is_err(), "only MetadataCreated is forwarded");

    let metrics = h.crawl_loop.metrics().snapshot();
    assert_eq!(metrics.scans_ok, 1);
    assert_eq!(metrics.events_found, 2);
    assert_eq!(metrics.events_notified, 1);
    assert_eq!(metrics.last_indexed_block, Some(950));
}

#[tokio::test]
async fn checkpoint_never_passes_height() {
    let client = ScriptedClient::new("mock://primary", Some(1000));
    let mut h = harness(descriptor(500, Some(0)), vec![client.clone()]);
    h.crawl_loop.resolve_start(Some(900)).await.unwrap();

    let report = h.crawl_loop.run_cycle(&StopSignal::never()).await.unwrap();
    assert_eq!(
        report.scan,
        ScanOutcome::Scanned {
            from: 901,
            to: 1000,
            events: 0,
        }
    );

    let report = h.crawl_loop.run_cycle(&StopSignal::never()).await.unwrap();
    assert_eq!(report.scan, ScanOutcome::UpToDate { height: 1000 });
    assert_eq!(client.log_requests().len(), 1);
    assert_eq!(h.crawl_loop.state().last_indexed_block, Some(1000));
}

#[tokio::test]
async fn boundary_block_is_processed_once() {
    let client = ScriptedClient::new("mock://primary", Some(1000))
        .with(|s| s.logs = vec![log(EventType::MetadataCreated, "0xedge", 950, 0)]);
    let mut h = harness(descriptor(50, Some(100)), vec![client.clone()]);
    h.crawl_loop.resolve_start(Some(900)).await.unwrap();

    let first = h.crawl_loop.run_cycle(&StopSignal::never()).await.unwrap();
    let second = h.crawl_loop.run_cycle(&StopSignal::never()).await.unwrap();
    assert_eq!((first.notified, second.notified), (1, 0));
    assert_eq!(
        second.scan,
        ScanOutcome::Scanned {
            from: 951,
            to: 1000,
            events: 0,
        }
    );
    assert_eq!(client.log_requests(), vec![(901, 950), (951, 1000)]);

    let mut created = 0;
    while let Ok(msg) = h.events.try_recv() {
        assert_eq!(msg.method, EventType::MetadataCreated);
        created += msg.data.len();
    }
    assert_eq!(created, 1);
    assert_eq!(h.crawl_loop.metrics().snapshot().events_found, 1);
}

#[tokio::test]
async fn first_scan_includes_the_deployment_block() {
    let client = ScriptedClient::new("mock://primary", Some(1000))
        .with(|s| s.logs = vec![log(EventType::MetadataCreated, "0xgenesis", 500, 0)]);
    let mut h = harness(descriptor(50, Some(500)), vec![client.clone()]);
    assert_eq!(h.crawl_loop.resolve_start(None).await.unwrap(), 500);

    let report = h.crawl_loop.run_cycle(&StopSignal::never()).await.unwrap();
    assert_eq!(
        report.scan,
        ScanOutcome::Scanned {
            from: 500,
            to: 550,
            events: 1,
        }
    );
    h.crawl_loop.run_cycle(&StopSignal::never()).await.unwrap();
    assert_eq!(client.log_requests(), vec![(500, 550), (551, 600)]);
    assert_eq!(h.storage.get_last_indexed_block(137).await.unwrap(), Some(600));
}

#[tokio::test]
async fn failed_scan_halves_chunk_and_keeps_checkpoint() {
    let client = ScriptedClient::new("mock://primary", Some(10_000)).with(|s| s.failures_left = 2);
    let mut h = harness(descriptor(100, Some(0)), vec![client.clone()]);
    h.crawl_loop.resolve_start(Some(900)).await.unwrap();

    let report = h.crawl_loop.run_cycle(&StopSignal::never()).await.unwrap();
    assert_eq!(
        report.scan,
        ScanOutcome::Failed {
            from: 901,
            chunk_size: 50,
        }
    );
    assert_eq!(h.crawl_loop.state().last_indexed_block, Some(900));

    let report = h.crawl_loop.run_cycle(&StopSignal::never()).await.unwrap();
    assert_eq!(
        report.scan,
        ScanOutcome::Failed {
            from: 901,
            chunk_size: 25,
        }
    );

    let report = h.crawl_loop.run_cycle(&StopSignal::never()).await.unwrap();
    assert_eq!(
        report.scan,
        ScanOutcome::Scanned {
            from: 901,
            to: 925,
            events: 0,
        }
    );
    assert_eq!(
        client.log_requests(),
        vec![(901, 1000), (901, 950), (901, 925)]
    );

    // the shrunk window persists
    let report = h.crawl_loop.run_cycle(&StopSignal::never()).await.unwrap();
    assert_eq!(
        report.scan,
        ScanOutcome::Scanned {
            from: 926,
            to: 950,
            events: 0,
        }
    );
    assert_eq!(h.crawl_loop.metrics().snapshot().scans_failed, 2);
}

#[tokio::test]
async fn reindex_drains_lifo_and_isolates_failures() {
    let receipt = |tx: &str, logs: Vec<RawLog>| TransactionReceipt {
        transaction_hash: tx.into(),
        block_number: Some("0x10".into()),
        status: Some("0x1".into()),
        logs,
    };
    let client = ScriptedClient::new("mock://primary", Some(1000)).with(|s| {
        s.receipts.insert(
            "0xa".into(),
            receipt("0xa", vec![log(EventType::MetadataCreated, "0xa", 16, 0)]),
        );
        s.receipts.insert(
            "0xc".into(),
            receipt(
                "0xc",
                vec![
                    log(EventType::MetadataUpdated, "0xc", 16, 1),
                    log(EventType::MetadataState, "0xc", 16, 2),
                ],
            ),
        );
    });
    let mut h = harness(descriptor(50, Some(0)), vec![client.clone()]);
    h.crawl_loop.resolve_start(Some(1000)).await.unwrap();

    let queue = h.crawl_loop.reindex_queue();
    queue.enqueue(ReindexTask::new("0xa", 137));
    queue.enqueue(ReindexTask::new("0xbroken", 137));
    queue.enqueue(ReindexTask::new("0xpending", 137));
    queue.enqueue(ReindexTask::new("0xc", 137).with_event_index(1));

    let report = h.crawl_loop.run_cycle(&StopSignal::never()).await.unwrap();
    assert_eq!(report.scan, ScanOutcome::UpToDate { height: 1000 });
    assert_eq!(client.receipt_requests(), vec!["0xc", "0xpending", "0xbroken", "0xa"]);
    assert_eq!((report.reindex_processed, report.reindex_failed), (3, 1));
    assert!(queue.is_empty());

    // event_index 1 selects only the MetadataState log
    assert_eq!(h.storage.events_by_type(137, EventType::MetadataState).len(), 1);
    assert!(h.storage.events_by_type(137, EventType::MetadataUpdated).is_empty());
    assert_eq!(h.storage.events_by_type(137, EventType::MetadataCreated).len(), 1);
    // reindexing never moves the checkpoint
    assert_eq!(h.crawl_loop.state().last_indexed_block, Some(1000));
}

#[tokio::test]
async fn missing_receipt_changes_nothing() {
    let client = ScriptedClient::new("mock://primary", Some(1000));
    let mut h = harness(descriptor(50, Some(0)), vec![client]);
    h.crawl_loop.resolve_start(Some(1000)).await.unwrap();
    h.crawl_loop.reindex_queue().enqueue(ReindexTask::new("0xunknown", 137));

    let report = h.crawl_loop.run_cycle(&StopSignal::never()).await.unwrap();
    assert_eq!((report.reindex_processed, report.reindex_failed), (1, 0));
    assert_eq!(h.storage.event_count(), 0);
    assert!(h.events.try_recv().is_err());
}

#[tokio::test]
async fn unreachable_network_skips_scan_but_drains_reindex() {
    let bad = ScriptedClient::new("mock://bad", None);
    let worse = ScriptedClient::new("mock://worse", None);
    let mut h = harness(descriptor(50, Some(0)), vec![bad.clone(), worse]);
    h.crawl_loop.resolve_start(Some(900)).await.unwrap();
    h.crawl_loop.reindex_queue().enqueue(ReindexTask::new("0xa", 137));

    let report = h.crawl_loop.run_cycle(&StopSignal::never()).await.unwrap();
    assert_eq!(report.scan, ScanOutcome::NotReady);
    assert!(bad.log_requests().is_empty());
    assert_eq!(bad.receipt_requests(), vec!["0xa"]);
    assert_eq!(h.crawl_loop.connection().active_endpoint(), "mock://bad");
    assert_eq!(h.storage.get_last_indexed_block(137).await.unwrap(), None);
}

#[tokio::test]
async fn falls_back_to_a_healthy_endpoint() {
    let bad = ScriptedClient::new("mock://bad", None);
    let good = ScriptedClient::new("mock://good", Some(1000));
    let mut h = harness(descriptor(50, Some(0)), vec![bad, good.clone()]);
    h.crawl_loop.resolve_start(Some(900)).await.unwrap();

    let report = h.crawl_loop.run_cycle(&StopSignal::never()).await.unwrap();
    assert_eq!(
        report.scan,
        ScanOutcome::Scanned {
            from: 901,
            to: 950,
            events: 0,
        }
    );
    assert_eq!(good.log_requests(), vec![(901, 950)]);
    assert_eq!(h.crawl_loop.connection().active_endpoint(), "mock://good");
    assert_eq!(h.crawl_loop.metrics().snapshot().fallback_rotations, 1);
}

#[tokio::test]
async fn start_block_comes_from_store_or_deployment() {
    let store = Arc::new(MemoryCheckpointStore::with_checkpoint(137, 700));
    let (tx, _rx) = mpsc::unbounded_channel();
    let mut crawl_loop = CrawlerBuilder::new(descriptor(50, Some(500)))
        .checkpoint_store(store)
        .clients(vec![Arc::new(ScriptedClient::new("mock://primary", Some(1000)))])
        .build(tx)
        .unwrap();
    assert_eq!(crawl_loop.resolve_start(None).await.unwrap(), 700);

    let mut h = harness(
        descriptor(50, Some(500)),
        vec![ScriptedClient::new("mock://primary", Some(1000))],
    );
    assert_eq!(h.crawl_loop.resolve_start(None).await.unwrap(), 500);
}

#[tokio::test]
async fn missing_anchor_is_fatal() {
    let mut h = harness(
        descriptor(50, None),
        vec![ScriptedClient::new("mock://primary", Some(1000))],
    );
    let err = h.crawl_loop.resolve_start(None).await.unwrap_err();
    assert_eq!(err, CrawlError::MissingAnchor { chain_id: 137 });
}

#[tokio::test]
async fn stop_before_scan_cancels_the_cycle() {
    let client = ScriptedClient::new("mock://primary", Some(1000));
    let mut h = harness(descriptor(50, Some(0)), vec![client.clone()]);
    h.crawl_loop.resolve_start(Some(900)).await.unwrap();

    let (stop_tx, stop) = StopSignal::new();
    stop_tx.send_replace(true);
    let report = h.crawl_loop.run_cycle(&stop).await.unwrap();
    assert_eq!(report.scan, ScanOutcome::Cancelled);
    assert!(client.log_requests().is_empty());
}

// ─── Worker / supervisor ─────────────────────────────────────────────────────

fn supervisor() -> Supervisor {
    let mut config = CrawlerConfig::default();
    config.crawl_interval_ms = 1_000;
    Supervisor::new(config, Arc::new(MemoryCheckpointStore::new()), Default::default())
}

fn loop_for(
    supervisor: &Supervisor,
    descriptor: NetworkDescriptor,
    client: ScriptedClient,
) -> CrawlLoop {
    CrawlerBuilder::new(descriptor)
        .crawl_interval_ms(1_000)
        .clients(vec![Arc::new(client)])
        .build(supervisor.event_sender())
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn supervisor_starts_crawls_and_stops_workers() {
    let client = ScriptedClient::new("mock://primary", Some(1000))
        .with(|s| s.logs = vec![log(EventType::MetadataCreated, "0xa", 920, 0)]);
    let mut sup = supervisor();
    let crawl_loop = loop_for(&sup, descriptor(50, Some(0)), client.clone());
    sup.spawn_loop(crawl_loop, Some(900)).unwrap();
    let mut events = sup.events().unwrap();
    assert!(sup.events().is_none());

    // idle until started
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(client.log_requests().is_empty());

    sup.start_crawling(137).unwrap();
    let msg = events.recv().await.unwrap();
    assert_eq!(msg.method, EventType::MetadataCreated);
    assert_eq!(msg.data[0].block_number, 920);

    // let a few more cycles run
    tokio::time::sleep(Duration::from_millis(2_500)).await;
    // the third cycle finds the network up to date and fetches nothing
    assert_eq!(client.log_requests(), vec![(901, 950), (951, 1000)]);
    assert_eq!(sup.metrics(137).unwrap().last_indexed_block, Some(1000));

    let exits = sup.shutdown().await;
    assert_eq!(exits.len(), 1);
    assert!(exits[0].1.is_ok());
}

#[tokio::test(start_paused = true)]
async fn reindex_tasks_are_routed_by_chain() {
    let polygon = ScriptedClient::new("mock://polygon", Some(1000));
    let mut other = descriptor(50, Some(0));
    other.chain_id = 8996;
    let dev = ScriptedClient::new("mock://dev", Some(1000));

    let mut sup = supervisor();
    let l1 = loop_for(&sup, descriptor(50, Some(0)), polygon.clone());
    let l2 = loop_for(&sup, other, dev.clone());
    sup.spawn_loop(l1, Some(1000)).unwrap();
    sup.spawn_loop(l2, Some(1000)).unwrap();
    assert_eq!(sup.chain_ids(), vec![137, 8996]);

    sup.add_reindex_task(ReindexTask::new("0xdev", 8996)).unwrap();
    assert!(matches!(
        sup.add_reindex_task(ReindexTask::new("0xnope", 1)),
        Err(CrawlError::Config(_))
    ));
    sup.start_all();
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(dev.receipt_requests(), vec!["0xdev"]);
    assert!(polygon.receipt_requests().is_empty());
    sup.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn fatal_worker_does_not_affect_others() {
    let healthy = ScriptedClient::new("mock://healthy", Some(1000));
    let mut anchorless = descriptor(50, None);
    anchorless.chain_id = 8996;

    let mut sup = supervisor();
    let ok = loop_for(&sup, descriptor(50, Some(0)), healthy.clone());
    let doomed = loop_for(&sup, anchorless, ScriptedClient::new("mock://doomed", Some(1000)));
    sup.spawn_loop(ok, Some(900)).unwrap();
    sup.spawn_loop(doomed, None).unwrap();
    sup.start_all();
    tokio::time::sleep(Duration::from_millis(1_500)).await;

    assert!(!healthy.log_requests().is_empty());
    let exits: HashMap<_, _> = sup.shutdown().await.into_iter().collect();
    assert!(exits[&137].is_ok());
    assert_eq!(exits[&8996], Err(CrawlError::MissingAnchor { chain_id: 8996 }));
}
