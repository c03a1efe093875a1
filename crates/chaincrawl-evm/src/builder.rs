//! Fluent builder for a network's [`CrawlLoop`].
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use chaincrawl_core::{MemoryCheckpointStore, NetworkDescriptor};
//! use chaincrawl_evm::CrawlerBuilder;
//!
//! # fn example(descriptor: NetworkDescriptor) -> Result<(), chaincrawl_core::CrawlError> {
//! let (events_tx, _events_rx) = tokio::sync::mpsc::unbounded_channel();
//! let crawl_loop = CrawlerBuilder::new(descriptor)
//!     .crawl_interval_ms(5_000)
//!     .min_chunk_size(10)
//!     .checkpoint_store(Arc::new(MemoryCheckpointStore::new()))
//!     .build(events_tx)?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use chaincrawl_core::checkpoint::{CheckpointCoordinator, CheckpointStore, MemoryCheckpointStore};
use chaincrawl_core::config::CrawlerConfig;
use chaincrawl_core::error::CrawlError;
use chaincrawl_core::handler::{EventHandler, HandlerRegistry};
use chaincrawl_core::message::CrawlerEvent;
use chaincrawl_core::metrics::MetricsHandle;
use chaincrawl_core::notifier::EventNotifier;
use chaincrawl_core::reindex::ReindexQueue;
use chaincrawl_core::state::CrawlState;
use chaincrawl_core::types::{EventType, NetworkDescriptor};

use chaincrawl_rpc::{HttpClientConfig, RetryConfig};

use crate::connection::{ConnectionConfig, ConnectionManager};
use crate::engine::CrawlLoop;
use crate::fetcher::ChainClient;
use crate::scanner::RangeScanner;

fn connection_settings(config: &CrawlerConfig) -> ConnectionConfig {
    ConnectionConfig {
        probe_timeout: config.probe_timeout(),
        height_tolerance: config.height_tolerance,
        http: HttpClientConfig {
            retry: RetryConfig {
                max_retries: config.max_retries,
                ..RetryConfig::default()
            },
            request_timeout: config.request_timeout(),
        },
    }
}

pub struct CrawlerBuilder {
    descriptor: NetworkDescriptor,
    crawl_interval: Duration,
    min_chunk_size: u64,
    connection: ConnectionConfig,
    notify_events: Vec<EventType>,
    handlers: HandlerRegistry,
    store: Option<Arc<dyn CheckpointStore>>,
    clients: Option<Vec<Arc<dyn ChainClient>>>,
}

impl CrawlerBuilder {
    pub fn new(descriptor: NetworkDescriptor) -> Self {
        let defaults = CrawlerConfig::default();
        Self {
            descriptor,
            crawl_interval: defaults.crawl_interval(),
            min_chunk_size: defaults.min_chunk_size,
            connection: connection_settings(&defaults),
            notify_events: defaults.notify_events,
            handlers: HandlerRegistry::new(),
            store: None,
            clients: None,
        }
    }

    /// Take the global settings from `config`.
    pub fn with_config(mut self, config: &CrawlerConfig) -> Self {
        self.crawl_interval = config.crawl_interval();
        self.min_chunk_size = config.min_chunk_size;
        self.connection = connection_settings(config);
        self.notify_events = config.notify_events.clone();
        self
    }

    /// Pause between crawl cycles.
    pub fn crawl_interval_ms(mut self, ms: u64) -> Self {
        self.crawl_interval = Duration::from_millis(ms);
        self
    }

    /// Floor for the adaptive scan window.
    pub fn min_chunk_size(mut self, size: u64) -> Self {
        self.min_chunk_size = size;
        self
    }

    pub fn connection_config(mut self, config: ConnectionConfig) -> Self {
        self.connection = config;
        self
    }

    /// Event types forwarded to the supervisor.
    pub fn notify_events(mut self, events: impl IntoIterator<Item = EventType>) -> Self {
        self.notify_events = events.into_iter().collect();
        self
    }

    pub fn handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.handlers.on_event(handler);
        self
    }

    pub fn handlers(mut self, handlers: HandlerRegistry) -> Self {
        self.handlers = handlers;
        self
    }

    /// Defaults to an in-memory store.
    pub fn checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Use these clients (primary first) instead of HTTP clients for the
    /// descriptor's endpoints.
    pub fn clients(mut self, clients: Vec<Arc<dyn ChainClient>>) -> Self {
        self.clients = Some(clients);
        self
    }

    pub fn build(
        self,
        events: mpsc::UnboundedSender<CrawlerEvent>,
    ) -> Result<CrawlLoop, CrawlError> {
        let chain_id = self.descriptor.chain_id;
        if self.descriptor.chunk_size == 0 {
            return Err(CrawlError::Config(format!("chain {chain_id}: chunkSize must be > 0")));
        }
        let connection = match self.clients {
            Some(clients) => ConnectionManager::new(chain_id, clients, self.connection)?,
            None => ConnectionManager::from_descriptor(&self.descriptor, self.connection)?,
        };
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryCheckpointStore::new()));
        let state = CrawlState::new(
            chain_id,
            None,
            self.descriptor.deployed_block,
            self.descriptor.chunk_size,
            self.min_chunk_size,
        );

        Ok(CrawlLoop {
            state,
            connection,
            scanner: RangeScanner::new(chain_id, self.handlers),
            checkpoint: CheckpointCoordinator::new(store, chain_id),
            reindex: ReindexQueue::new(),
            notifier: EventNotifier::new(chain_id, self.notify_events, events),
            metrics: MetricsHandle::new(),
            interval: self.crawl_interval,
        })
    }
}
