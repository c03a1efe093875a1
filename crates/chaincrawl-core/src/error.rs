//! Error types for the crawl pipeline.

use thiserror::Error;

/// Errors that can occur while crawling a network.
///
/// Only [`CrawlError::MissingAnchor`] stops a crawler; every other variant is
/// logged and absorbed by the loop.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CrawlError {
    /// Endpoint unreachable, timed out, or answered with garbage.
    #[error("RPC error: {0}")]
    Rpc(String),

    /// A scan chunk could not be fetched or decoded in full.
    #[error("failed to fetch blocks {from}..={to}: {reason}")]
    RangeFetch { from: u64, to: u64, reason: String },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Handler error in '{handler}': {reason}")]
    Handler { handler: String, reason: String },

    /// Neither a deployment block nor a checkpoint is known for the chain.
    #[error("chain {chain_id}: both deployed block and last indexed block are unknown")]
    MissingAnchor { chain_id: u64 },

    #[error("Configuration error: {0}")]
    Config(String),

    /// The peer end of a supervisor/worker channel is gone.
    #[error("Channel closed: {0}")]
    Channel(String),

    #[error("{0}")]
    Other(String),
}

impl CrawlError {
    /// Returns `true` if the crawler for the affected network must stop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::MissingAnchor { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_missing_anchor_is_fatal() {
        assert!(CrawlError::MissingAnchor { chain_id: 1 }.is_fatal());
        assert!(!CrawlError::Rpc("timeout".into()).is_fatal());
        assert!(!CrawlError::RangeFetch { from: 1, to: 2, reason: "x".into() }.is_fatal());
        assert!(!CrawlError::Storage("down".into()).is_fatal());
    }

    #[test]
    fn range_fetch_message() {
        let e = CrawlError::RangeFetch {
            from: 900,
            to: 950,
            reason: "503".into(),
        };
        assert_eq!(e.to_string(), "failed to fetch blocks 900..=950: 503");
    }
}
