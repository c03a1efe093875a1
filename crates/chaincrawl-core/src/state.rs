//! Crawl state: the single-owner progress record of one network's loop.

use serde::{Deserialize, Serialize};

use crate::checkpoint::resolve_start_block;
use crate::error::CrawlError;

/// Mutable progress of one network's crawl loop.
///
/// Owned exclusively by the loop. `last_indexed_block` only moves forward;
/// `chunk_size` only moves down, never below `min_chunk_size`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlState {
    pub chain_id: u64,
    /// Absent until the first checkpoint.
    pub last_indexed_block: Option<u64>,
    /// Contract deployment block, resolved once at startup.
    pub deployed_block: Option<u64>,
    pub chunk_size: u64,
    pub min_chunk_size: u64,
}

impl CrawlState {
    pub fn new(
        chain_id: u64,
        last_indexed_block: Option<u64>,
        deployed_block: Option<u64>,
        chunk_size: u64,
        min_chunk_size: u64,
    ) -> Self {
        let min_chunk_size = min_chunk_size.max(1);
        Self {
            chain_id,
            last_indexed_block,
            deployed_block,
            chunk_size: chunk_size.max(min_chunk_size),
            min_chunk_size,
        }
    }

    /// Block the next scan starts from.
    pub fn start_block(&self) -> Result<u64, CrawlError> {
        let anchor = resolve_start_block(self.last_indexed_block, self.deployed_block);
        anchor.ok_or(CrawlError::MissingAnchor {
            chain_id: self.chain_id,
        })
    }

    /// `min(chunk_size, height - start)`, or `None` when there is nothing to scan.
    pub fn requested_block_count(&self, start_block: u64, network_height: u64) -> Option<u64> {
        if network_height <= start_block {
            return None;
        }
        Some(self.chunk_size.min(network_height - start_block))
    }

    /// Inclusive window the next scan covers, or `None` when `network_height`
    /// is not above the start block.
    ///
    /// A checkpointed block is already processed, so a window resumed from
    /// the checkpoint begins one block past it: checkpoint 900 with 50 blocks
    /// requested covers `901..=950`. Starting from the deployment block, that
    /// block is included: `[deployed, deployed + count]`.
    pub fn next_window(&self, network_height: u64) -> Result<Option<(u64, u64)>, CrawlError> {
        let start = self.start_block()?;
        let Some(count) = self.requested_block_count(start, network_height) else {
            return Ok(None);
        };
        let to = start.saturating_add(count);
        if self.last_indexed_block == Some(start) {
            Ok(Some((start + 1, to)))
        } else {
            Ok(Some((start, to)))
        }
    }

    /// Record a successful scan. Never moves the checkpoint backwards.
    pub fn advance(&mut self, last_block: u64) {
        self.last_indexed_block = Some(match self.last_indexed_block {
            Some(current) => current.max(last_block),
            None => last_block,
        });
    }

    /// Halve the scan window after a failed scan and return the new size.
    pub fn shrink_chunk(&mut self) -> u64 {
        self.chunk_size = (self.chunk_size / 2).max(self.min_chunk_size);
        self.chunk_size
    }
}
