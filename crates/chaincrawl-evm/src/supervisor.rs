//! Supervisor: owns one worker per configured network.

use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;

use chaincrawl_core::checkpoint::CheckpointStore;
use chaincrawl_core::config::CrawlerConfig;
use chaincrawl_core::error::CrawlError;
use chaincrawl_core::handler::HandlerRegistry;
use chaincrawl_core::message::CrawlerEvent;
use chaincrawl_core::metrics::CrawlMetrics;
use chaincrawl_core::types::{NetworkDescriptor, ReindexTask};

use crate::builder::CrawlerBuilder;
use crate::engine::CrawlLoop;
use crate::worker::{spawn_crawler, CrawlerHandle};

pub struct Supervisor {
    config: CrawlerConfig,
    store: Arc<dyn CheckpointStore>,
    handlers: HandlerRegistry,
    workers: BTreeMap<u64, CrawlerHandle>,
    events_tx: mpsc::UnboundedSender<CrawlerEvent>,
    events_rx: Option<mpsc::UnboundedReceiver<CrawlerEvent>>,
}

impl Supervisor {
    /// Workers spawned through [`Supervisor::spawn`] share `store` and
    /// `handlers` and take their global settings from `config`.
    pub fn new(
        config: CrawlerConfig,
        store: Arc<dyn CheckpointStore>,
        handlers: HandlerRegistry,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            config,
            store,
            handlers,
            workers: BTreeMap::new(),
            events_tx,
            events_rx: Some(events_rx),
        }
    }

    /// Sender workers forward their events on. Needed to build a custom
    /// [`CrawlLoop`] for [`Supervisor::spawn_loop`].
    pub fn event_sender(&self) -> mpsc::UnboundedSender<CrawlerEvent> {
        self.events_tx.clone()
    }

    /// Spawn an idle worker for `descriptor` using HTTP endpoints.
    pub fn spawn(&mut self, descriptor: NetworkDescriptor) -> Result<(), CrawlError> {
        let crawl_loop = CrawlerBuilder::new(descriptor)
            .with_config(&self.config)
            .checkpoint_store(Arc::clone(&self.store))
            .handlers(self.handlers.clone())
            .build(self.event_sender())?;
        self.spawn_loop(crawl_loop, None)
    }

    /// Spawn an idle worker for every configured network.
    pub fn spawn_all(&mut self) -> Result<(), CrawlError> {
        for descriptor in self.config.descriptors() {
            self.spawn(descriptor)?;
        }
        Ok(())
    }

    /// Spawn an idle worker around a prepared loop.
    pub fn spawn_loop(
        &mut self,
        crawl_loop: CrawlLoop,
        initial_checkpoint: Option<u64>,
    ) -> Result<(), CrawlError> {
        let chain_id = crawl_loop.chain_id();
        if self.workers.contains_key(&chain_id) {
            return Err(CrawlError::Config(format!(
                "chain {chain_id} already has a crawler"
            )));
        }
        tracing::info!(chain_id, "spawning crawler");
        self.workers.insert(chain_id, spawn_crawler(crawl_loop, initial_checkpoint));
        Ok(())
    }

    fn worker(&self, chain_id: u64) -> Result<&CrawlerHandle, CrawlError> {
        self.workers
            .get(&chain_id)
            .ok_or_else(|| CrawlError::Config(format!("no crawler for chain {chain_id}")))
    }

    pub fn chain_ids(&self) -> Vec<u64> {
        self.workers.keys().copied().collect()
    }

    pub fn start_crawling(&self, chain_id: u64) -> Result<(), CrawlError> {
        self.worker(chain_id)?.start()
    }

    /// Start every worker. Workers that already exited are logged and skipped.
    pub fn start_all(&self) {
        for (chain_id, worker) in &self.workers {
            if let Err(e) = worker.start() {
                tracing::warn!(chain_id, error = %e, "could not start crawler");
            }
        }
    }

    /// Route `task` to the worker for its chain.
    pub fn add_reindex_task(&self, task: ReindexTask) -> Result<(), CrawlError> {
        self.worker(task.chain_id)?.add_reindex_task(task)
    }

    /// Events from all workers. Returns `None` after the first call.
    pub fn events(&mut self) -> Option<mpsc::UnboundedReceiver<CrawlerEvent>> {
        self.events_rx.take()
    }

    pub fn metrics(&self, chain_id: u64) -> Option<CrawlMetrics> {
        self.workers.get(&chain_id).map(CrawlerHandle::metrics)
    }

    /// Stop every worker and wait for all of them. Returns each worker's exit.
    pub async fn shutdown(self) -> Vec<(u64, Result<(), CrawlError>)> {
        for worker in self.workers.values() {
            // a worker that already exited has nothing to stop
            let _ = worker.stop();
        }
        let mut exits = Vec::with_capacity(self.workers.len());
        for (chain_id, worker) in self.workers {
            let result = worker.join().await;
            match &result {
                Ok(()) => tracing::info!(chain_id, "crawler shut down"),
                Err(e) if e.is_fatal() => {
                    tracing::error!(chain_id, error = %e, "crawler had stopped on a fatal error")
                }
                Err(e) => tracing::warn!(chain_id, error = %e, "crawler exited with error"),
            }
            exits.push((chain_id, result));
        }
        exits
    }
}
