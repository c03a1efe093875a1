//! chaincrawl-evm: EVM chain access and the per-network crawl engine.

pub mod builder;
pub mod connection;
pub mod engine;
pub mod events;
pub mod fetcher;
pub mod scanner;
pub mod supervisor;
pub mod worker;

pub use builder::CrawlerBuilder;
pub use connection::{ConnectionConfig, ConnectionManager};
pub use engine::{CrawlLoop, CycleReport, ScanOutcome, StopSignal};
pub use fetcher::{ChainClient, EvmClient, RawLog, TransactionReceipt};
pub use scanner::RangeScanner;
pub use supervisor::Supervisor;
pub use worker::{spawn_crawler, CrawlerHandle};
