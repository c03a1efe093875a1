//! In-memory storage backend.
//!
//! Stores checkpoints and indexed events in RAM. Useful for testing and
//! short-lived crawlers that don't need persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use chaincrawl_core::checkpoint::CheckpointStore;
use chaincrawl_core::error::CrawlError;
use chaincrawl_core::handler::EventHandler;
use chaincrawl_core::types::{EventType, IndexedEvent};

type EventKey = (u64, String, u64);

#[derive(Debug, Clone, Copy)]
struct CheckpointRow {
    block: u64,
    updated_at: DateTime<Utc>,
}

/// In-memory crawler storage.
///
/// All data is lost when the process exits.
#[derive(Default)]
pub struct InMemoryStorage {
    checkpoints: Mutex<HashMap<u64, CheckpointRow>>,
    events: Mutex<BTreeMap<EventKey, IndexedEvent>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the event at `(chain_id, tx_hash, log_index)`.
    /// Returns `true` if the key was new.
    pub fn upsert_event(&self, event: IndexedEvent) -> bool {
        let key = (event.chain_id, event.tx_hash.clone(), event.log_index);
        lock(&self.events).insert(key, event).is_none()
    }

    /// Events of one type on one chain, ordered by transaction and log index.
    pub fn events_by_type(&self, chain_id: u64, event_type: EventType) -> Vec<IndexedEvent> {
        lock(&self.events)
            .values()
            .filter(|e| e.chain_id == chain_id && e.event_type == event_type)
            .cloned()
            .collect()
    }

    pub fn event_count(&self) -> usize {
        lock(&self.events).len()
    }

    /// When the checkpoint for `chain_id` was last written.
    pub fn checkpoint_updated_at(&self, chain_id: u64) -> Option<DateTime<Utc>> {
        lock(&self.checkpoints).get(&chain_id).map(|row| row.updated_at)
    }
}

#[async_trait]
impl CheckpointStore for InMemoryStorage {
    async fn get_last_indexed_block(&self, chain_id: u64) -> Result<Option<u64>, CrawlError> {
        Ok(lock(&self.checkpoints).get(&chain_id).map(|row| row.block))
    }

    async fn set_last_indexed_block(&self, chain_id: u64, block: u64) -> Result<u64, CrawlError> {
        lock(&self.checkpoints).insert(chain_id, CheckpointRow {
            block,
            updated_at: Utc::now(),
        });
        Ok(block)
    }
}

#[async_trait]
impl EventHandler for InMemoryStorage {
    async fn handle(&self, event: &IndexedEvent) -> Result<(), CrawlError> {
        if !self.upsert_event(event.clone()) {
            tracing::debug!(
                chain_id = event.chain_id,
                tx = %event.tx_hash,
                log_index = event.log_index,
                "event re-indexed"
            );
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "memory-store"
    }
}
