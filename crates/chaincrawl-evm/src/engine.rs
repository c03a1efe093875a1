//! The crawl loop: one instance per network.
//!
//! ```text
//! RESOLVING_START (once) → FETCHING_HEIGHT → SCANNING → CHECKPOINTING
//!                        → DRAINING_REINDEX → SLEEPING → FETCHING_HEIGHT …
//! ```
//!
//! Each window begins one block past the checkpoint, so a block is scanned
//! once per pass. A failed scan halves the window and leaves the checkpoint
//! where it was, so the next cycle retries from the same block. Only a missing start anchor
//! ends the loop with an error.

use std::time::Duration;
use tokio::sync::watch;

use chaincrawl_core::checkpoint::CheckpointCoordinator;
use chaincrawl_core::error::CrawlError;
use chaincrawl_core::metrics::{CrawlMetrics, MetricsHandle};
use chaincrawl_core::notifier::EventNotifier;
use chaincrawl_core::reindex::ReindexQueue;
use chaincrawl_core::state::CrawlState;
use chaincrawl_core::types::ReindexTask;

use crate::connection::ConnectionManager;
use crate::scanner::RangeScanner;

/// Cooperative stop flag observed at loop boundaries.
#[derive(Debug, Clone)]
pub struct StopSignal {
    rx: watch::Receiver<bool>,
}

impl StopSignal {
    pub fn new() -> (watch::Sender<bool>, Self) {
        let (tx, rx) = watch::channel(false);
        (tx, Self { rx })
    }

    /// A signal that never fires.
    pub fn never() -> Self {
        Self::new().1
    }

    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once a stop has been requested. Pending forever if the
    /// sender went away without requesting one.
    pub async fn stopped(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// What the scan phase of one cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    /// No endpoint was ready or the height query failed.
    NotReady,
    /// Height is not above the start block.
    UpToDate { height: u64 },
    Scanned { from: u64, to: u64, events: usize },
    Failed { from: u64, chunk_size: u64 },
    /// Stop was requested before scanning.
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub scan: ScanOutcome,
    pub notified: usize,
    pub reindex_processed: usize,
    pub reindex_failed: usize,
}

pub struct CrawlLoop {
    pub(crate) state: CrawlState,
    pub(crate) connection: ConnectionManager,
    pub(crate) scanner: RangeScanner,
    pub(crate) checkpoint: CheckpointCoordinator,
    pub(crate) reindex: ReindexQueue,
    pub(crate) notifier: EventNotifier,
    pub(crate) metrics: MetricsHandle,
    pub(crate) interval: Duration,
}

impl CrawlLoop {
    pub fn chain_id(&self) -> u64 {
        self.state.chain_id
    }

    pub fn state(&self) -> &CrawlState {
        &self.state
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    /// Handle for pushing work from outside the loop.
    pub fn reindex_queue(&self) -> ReindexQueue {
        self.reindex.clone()
    }

    pub fn metrics(&self) -> MetricsHandle {
        self.metrics.clone()
    }

    /// Establish the starting checkpoint and validate that a start block
    /// exists. `initial` wins over the store when supplied.
    pub async fn resolve_start(&mut self, initial: Option<u64>) -> Result<u64, CrawlError> {
        self.state.last_indexed_block = match initial {
            Some(block) => Some(block),
            None => self.checkpoint.load().await,
        };
        let start = self.state.start_block().map_err(|e| {
            tracing::error!(chain_id = self.chain_id(), error = %e, "cannot start crawler");
            e
        })?;
        tracing::info!(
            chain_id = self.chain_id(),
            last_indexed_block = ?self.state.last_indexed_block,
            deployed_block = ?self.state.deployed_block,
            start_block = start,
            chunk_size = self.state.chunk_size,
            endpoint = self.connection.active_endpoint(),
            "crawler starting"
        );
        self.sync_metrics();
        Ok(start)
    }

    /// Run cycles until `stop` fires. Call [`CrawlLoop::resolve_start`] first.
    pub async fn run(&mut self, mut stop: StopSignal) -> Result<(), CrawlError> {
        loop {
            if stop.is_stopped() {
                break;
            }
            let report = self.run_cycle(&stop).await?;
            if report.scan == ScanOutcome::Cancelled {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = stop.stopped() => break,
            }
        }
        tracing::info!(
            chain_id = self.chain_id(),
            last_indexed_block = ?self.state.last_indexed_block,
            "crawler stopped"
        );
        Ok(())
    }

    /// One pass: readiness, height, scan, checkpoint, reindex drain. No sleep.
    pub async fn run_cycle(&mut self, stop: &StopSignal) -> Result<CycleReport, CrawlError> {
        self.metrics.update(|m| m.cycles += 1);
        self.state.start_block()?;

        let mut notified = 0;
        let scan = match self.network_height().await {
            None => ScanOutcome::NotReady,
            Some(_) if stop.is_stopped() => ScanOutcome::Cancelled,
            Some(height) => match self.state.next_window(height)? {
                None => ScanOutcome::UpToDate { height },
                Some((from, to)) => {
                    let (outcome, sent) = self.scan(from, to, height).await;
                    notified = sent;
                    outcome
                }
            },
        };

        if matches!(
            scan,
            ScanOutcome::UpToDate { .. } | ScanOutcome::Scanned { .. } | ScanOutcome::Failed { .. }
        ) {
            self.persist_checkpoint().await;
        }

        let (reindex_processed, reindex_failed) = if scan == ScanOutcome::Cancelled {
            (0, 0)
        } else {
            self.drain_reindex().await
        };

        self.sync_metrics();
        Ok(CycleReport {
            scan,
            notified,
            reindex_processed,
            reindex_failed,
        })
    }

    async fn network_height(&mut self) -> Option<u64> {
        let ready =
            self.connection.is_network_ready().await || self.connection.try_fallback_rpcs().await;
        if !ready {
            tracing::warn!(chain_id = self.chain_id(), "network not ready, skipping scan");
            return None;
        }
        match self.connection.height().await {
            Ok(height) => Some(height),
            Err(e) => {
                tracing::warn!(
                    chain_id = self.chain_id(),
                    error = %e,
                    "failed to fetch network height, skipping scan"
                );
                None
            }
        }
    }

    async fn scan(&mut self, from: u64, to: u64, height: u64) -> (ScanOutcome, usize) {
        let client = self.connection.client();
        tracing::info!(
            chain_id = self.chain_id(),
            from,
            to,
            height,
            chunk_size = self.state.chunk_size,
            "processing block range"
        );
        match self.scanner.scan_window(client.as_ref(), from, to).await {
            Ok(result) => {
                self.state.advance(result.last_block);
                let found = result.event_count();
                let sent = self.notifier.notify(&result.found_events);
                self.metrics.update(|m| {
                    m.scans_ok += 1;
                    m.events_found += found as u64;
                    m.events_notified += sent as u64;
                });
                let outcome = ScanOutcome::Scanned {
                    from,
                    to: result.last_block,
                    events: found,
                };
                (outcome, sent)
            }
            Err(e) => {
                let previous = self.state.chunk_size;
                let chunk_size = self.state.shrink_chunk();
                tracing::warn!(
                    chain_id = self.chain_id(),
                    from,
                    error = %e,
                    previous_chunk_size = previous,
                    chunk_size,
                    "block range failed, shrinking chunk"
                );
                self.metrics.update(|m| m.scans_failed += 1);
                (ScanOutcome::Failed { from, chunk_size }, 0)
            }
        }
    }

    async fn persist_checkpoint(&mut self) {
        let Some(block) = self.state.last_indexed_block else {
            return;
        };
        if !self.checkpoint.is_pending(block) {
            return;
        }
        if let Err(e) = self.checkpoint.persist(block).await {
            tracing::error!(
                chain_id = self.chain_id(),
                block,
                error = %e,
                "failed to persist checkpoint"
            );
            self.metrics.update(|m| m.checkpoint_failures += 1);
        }
    }

    /// Pop every queued task, newest first. Returns `(processed, failed)`.
    async fn drain_reindex(&mut self) -> (usize, usize) {
        let (mut processed, mut failed) = (0, 0);
        while let Some(task) = self.reindex.pop() {
            match self.reindex_one(&task).await {
                Ok(()) => processed += 1,
                Err(e) => {
                    failed += 1;
                    tracing::error!(
                        chain_id = self.chain_id(),
                        tx = %task.transaction_id,
                        error = %e,
                        "reindex task failed"
                    );
                }
            }
        }
        if processed + failed > 0 {
            self.metrics.update(|m| {
                m.reindex_processed += processed as u64;
                m.reindex_failed += failed as u64;
            });
        }
        (processed, failed)
    }

    async fn reindex_one(&self, task: &ReindexTask) -> Result<(), CrawlError> {
        let client = self.connection.client();
        let Some(receipt) = client.get_transaction_receipt(&task.transaction_id).await? else {
            tracing::debug!(
                chain_id = self.chain_id(),
                tx = %task.transaction_id,
                "no receipt yet, skipping reindex"
            );
            return Ok(());
        };
        let single = task.event_index.and_then(|i| receipt.logs.get(i));
        let logs = match single {
            Some(log) => std::slice::from_ref(log),
            None => receipt.logs.as_slice(),
        };
        let found = self.scanner.process_logs(logs).await?;
        tracing::info!(
            chain_id = self.chain_id(),
            tx = %task.transaction_id,
            event_index = ?task.event_index,
            logs = logs.len(),
            events = found.values().map(Vec::len).sum::<usize>(),
            "reindexed transaction"
        );
        Ok(())
    }

    fn sync_metrics(&self) {
        let rotations = self.connection.rotations();
        let chunk_size = self.state.chunk_size;
        let last = self.state.last_indexed_block;
        self.metrics.update(|m: &mut CrawlMetrics| {
            m.fallback_rotations = rotations;
            m.chunk_size = chunk_size;
            m.last_indexed_block = last;
        });
    }
}
