//! Checkpoint coordination: where a network resumes from, and recording
//! progress after each scan.
//!
//! The durable store is an external collaborator reached through
//! [`CheckpointStore`]. Writes are best-effort: a failed write is logged and
//! retried on the next cycle, while the in-memory progress keeps advancing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::CrawlError;

/// Narrow contract of the external checkpoint store, partitioned by chain id.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn get_last_indexed_block(&self, chain_id: u64) -> Result<Option<u64>, CrawlError>;

    /// Idempotent upsert. Returns the stored value.
    async fn set_last_indexed_block(&self, chain_id: u64, block: u64) -> Result<u64, CrawlError>;
}

/// Pick the block a scan starts from.
///
/// The checkpoint wins only when it is past the deployment block. `None`
/// means there is no anchor at all, which is fatal for the network.
pub fn resolve_start_block(
    last_indexed_block: Option<u64>,
    deployed_block: Option<u64>,
) -> Option<u64> {
    match (last_indexed_block, deployed_block) {
        (Some(last), Some(deployed)) if last > deployed => Some(last),
        (_, Some(deployed)) => Some(deployed),
        (Some(last), None) => Some(last),
        (None, None) => None,
    }
}

/// Persists one network's checkpoints and remembers what is durable.
pub struct CheckpointCoordinator {
    store: Arc<dyn CheckpointStore>,
    chain_id: u64,
    durable: Option<u64>,
}

impl CheckpointCoordinator {
    pub fn new(store: Arc<dyn CheckpointStore>, chain_id: u64) -> Self {
        Self {
            store,
            chain_id,
            durable: None,
        }
    }

    /// Load the durable checkpoint. A read failure is logged and treated as
    /// "no checkpoint" so a flaky store cannot keep a network from starting.
    pub async fn load(&mut self) -> Option<u64> {
        match self.store.get_last_indexed_block(self.chain_id).await {
            Ok(block) => {
                self.durable = block;
                block
            }
            Err(e) => {
                tracing::error!(
                    chain_id = self.chain_id,
                    error = %e,
                    "failed to load last indexed block"
                );
                None
            }
        }
    }

    /// Last block known to be durably recorded.
    pub fn durable(&self) -> Option<u64> {
        self.durable
    }

    /// Returns `true` if `block` is ahead of the durable checkpoint.
    pub fn is_pending(&self, block: u64) -> bool {
        self.durable.map_or(true, |d| block > d)
    }

    /// Write `block` if it is ahead of what is durable.
    pub async fn persist(&mut self, block: u64) -> Result<(), CrawlError> {
        if !self.is_pending(block) {
            return Ok(());
        }
        let stored = self.store.set_last_indexed_block(self.chain_id, block).await?;
        tracing::info!(chain_id = self.chain_id, block = stored, "new last indexed block");
        self.durable = Some(stored);
        Ok(())
    }
}

// ─── In-memory store (for testing) ────────────────────────────────────────────

/// In-memory checkpoint store for tests and ephemeral crawlers.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    data: Mutex<HashMap<u64, u64>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_checkpoint(chain_id: u64, block: u64) -> Self {
        let store = Self::default();
        store
            .data
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(chain_id, block);
        store
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn get_last_indexed_block(&self, chain_id: u64) -> Result<Option<u64>, CrawlError> {
        Ok(self.data.lock().unwrap_or_else(|e| e.into_inner()).get(&chain_id).copied())
    }

    async fn set_last_indexed_block(&self, chain_id: u64, block: u64) -> Result<u64, CrawlError> {
        self.data.lock().unwrap_or_else(|e| e.into_inner()).insert(chain_id, block);
        Ok(block)
    }
}
