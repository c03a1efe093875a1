//! Per-network worker: a spawned task owning one [`CrawlLoop`].
//!
//! The worker starts idle. A small command pump forwards supervisor messages:
//! `start-crawling` releases the loop, `add-reindex-task` goes straight onto
//! the network's reindex queue, and `stop` (or dropping the handle) requests
//! a stop at the next loop boundary.

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use chaincrawl_core::error::CrawlError;
use chaincrawl_core::message::CrawlerCommand;
use chaincrawl_core::metrics::{CrawlMetrics, MetricsHandle};
use chaincrawl_core::reindex::ReindexQueue;
use chaincrawl_core::types::ReindexTask;

use crate::engine::{CrawlLoop, StopSignal};

/// Supervisor-side handle to a running worker.
pub struct CrawlerHandle {
    chain_id: u64,
    commands: mpsc::UnboundedSender<CrawlerCommand>,
    metrics: MetricsHandle,
    task: JoinHandle<Result<(), CrawlError>>,
}

impl CrawlerHandle {
    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn send(&self, command: CrawlerCommand) -> Result<(), CrawlError> {
        self.commands
            .send(command)
            .map_err(|_| {
                CrawlError::Channel(format!("crawler for chain {} has exited", self.chain_id))
            })
    }

    pub fn start(&self) -> Result<(), CrawlError> {
        self.send(CrawlerCommand::StartCrawling)
    }

    pub fn add_reindex_task(&self, task: ReindexTask) -> Result<(), CrawlError> {
        self.send(CrawlerCommand::AddReindexTask {
            reindex_task: Some(task),
        })
    }

    pub fn stop(&self) -> Result<(), CrawlError> {
        self.send(CrawlerCommand::Stop)
    }

    pub fn metrics(&self) -> CrawlMetrics {
        self.metrics.snapshot()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the worker to exit.
    pub async fn join(self) -> Result<(), CrawlError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(CrawlError::Other(format!(
                "crawler for chain {} panicked: {e}",
                self.chain_id
            ))),
        }
    }
}

/// Spawn the worker for `crawl_loop`. `initial_checkpoint` overrides the
/// store's value when supplied.
pub fn spawn_crawler(crawl_loop: CrawlLoop, initial_checkpoint: Option<u64>) -> CrawlerHandle {
    let chain_id = crawl_loop.chain_id();
    let metrics = crawl_loop.metrics();
    let queue = crawl_loop.reindex_queue();
    let (commands, rx) = mpsc::unbounded_channel();
    let (start_tx, start_rx) = watch::channel(false);
    let (stop_tx, stop) = StopSignal::new();

    let task = tokio::spawn(async move {
        let pump = tokio::spawn(pump_commands(chain_id, rx, queue, start_tx, stop_tx));
        let result = drive(crawl_loop, initial_checkpoint, start_rx, stop).await;
        pump.abort();
        if let Err(e) = &result {
            tracing::error!(chain_id, error = %e, fatal = e.is_fatal(), "crawler exited");
        }
        result
    });

    CrawlerHandle {
        chain_id,
        commands,
        metrics,
        task,
    }
}

async fn pump_commands(
    chain_id: u64,
    mut rx: mpsc::UnboundedReceiver<CrawlerCommand>,
    queue: ReindexQueue,
    start_tx: watch::Sender<bool>,
    stop_tx: watch::Sender<bool>,
) {
    while let Some(command) = rx.recv().await {
        match command {
            CrawlerCommand::StartCrawling => {
                start_tx.send_replace(true);
            }
            CrawlerCommand::AddReindexTask { reindex_task: Some(task) } => {
                tracing::debug!(
                    chain_id,
                    tx = %task.transaction_id,
                    queued = queue.len() + 1,
                    "reindex task queued"
                );
                queue.enqueue(task);
            }
            CrawlerCommand::AddReindexTask { reindex_task: None } => {
                tracing::debug!(chain_id, "add-reindex-task without a task ignored");
            }
            CrawlerCommand::Stop => break,
        }
    }
    stop_tx.send_replace(true);
}

async fn drive(
    mut crawl_loop: CrawlLoop,
    initial_checkpoint: Option<u64>,
    mut start_rx: watch::Receiver<bool>,
    mut stop: StopSignal,
) -> Result<(), CrawlError> {
    while !*start_rx.borrow_and_update() {
        tokio::select! {
            changed = start_rx.changed() => {
                if changed.is_err() {
                    return Ok(());
                }
            }
            _ = stop.stopped() => return Ok(()),
        }
    }
    if stop.is_stopped() {
        return Ok(());
    }
    crawl_loop.resolve_start(initial_checkpoint).await?;
    crawl_loop.run(stop).await
}
