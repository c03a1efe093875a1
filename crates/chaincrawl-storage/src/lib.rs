//! chaincrawl-storage: checkpoint and event stores.
//!
//! Backends:
//! - [`memory`]: in-memory (dev/testing, no persistence)
//! - [`sqlite`]: SQLite via `sqlx` (embedded, single-file persistence)
//!
//! Every backend is both a [`CheckpointStore`](chaincrawl_core::CheckpointStore)
//! and an [`EventHandler`](chaincrawl_core::EventHandler). Events are upserted
//! on `(chain_id, tx_hash, log_index)`, so re-scanning a window never
//! duplicates rows.

pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::InMemoryStorage;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStorage;
