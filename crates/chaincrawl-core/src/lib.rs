//! chaincrawl-core: building blocks for the per-network crawl loop.
//!
//! # Architecture
//!
//! ```text
//! Supervisor ──CrawlerCommand──▶ Crawler (one per network)
//!                                   ├── CrawlState           (start block, chunk window)
//!                                   ├── CheckpointCoordinator (durable progress)
//!                                   ├── ReindexQueue          (LIFO ad-hoc work)
//!                                   ├── HandlerRegistry       (event processing)
//!                                   └── EventNotifier ──CrawlerEvent──▶ Supervisor
//! ```
//!
//! Chain access lives in `chaincrawl-evm`; persistent stores in
//! `chaincrawl-storage`.

pub mod checkpoint;
pub mod config;
pub mod error;
pub mod handler;
pub mod message;
pub mod metrics;
pub mod notifier;
pub mod reindex;
pub mod state;
pub mod types;

pub use checkpoint::{
    resolve_start_block, CheckpointCoordinator, CheckpointStore, MemoryCheckpointStore,
};
pub use config::{CrawlerConfig, LogConfig};
pub use error::CrawlError;
pub use handler::{EventHandler, HandlerRegistry};
pub use message::{CrawlerCommand, CrawlerEvent};
pub use metrics::{CrawlMetrics, MetricsHandle};
pub use notifier::EventNotifier;
pub use reindex::ReindexQueue;
pub use state::CrawlState;
pub use types::{
    BlockRangeResult, EventType, FoundEvents, IndexedEvent, NetworkDescriptor, ReindexTask,
};
