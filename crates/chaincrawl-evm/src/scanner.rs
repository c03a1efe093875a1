//! Range scanner: fetch, classify and process one block window.

use chaincrawl_core::error::CrawlError;
use chaincrawl_core::handler::HandlerRegistry;
use chaincrawl_core::types::{BlockRangeResult, FoundEvents, IndexedEvent};

use crate::events::classify;
use crate::fetcher::{ChainClient, RawLog};

/// Scans block windows for one network.
///
/// A window is all-or-nothing: any fetch, decode or handler failure inside
/// it fails the whole call with [`CrawlError::RangeFetch`] and no partial
/// result is returned.
pub struct RangeScanner {
    chain_id: u64,
    handlers: HandlerRegistry,
}

impl RangeScanner {
    pub fn new(chain_id: u64, handlers: HandlerRegistry) -> Self {
        Self { chain_id, handlers }
    }

    /// Scan `[start_block, start_block + requested_block_count]`.
    ///
    /// On success the returned `last_block` is the upper bound of the window.
    pub async fn process_blocks(
        &self,
        client: &dyn ChainClient,
        start_block: u64,
        requested_block_count: u64,
    ) -> Result<BlockRangeResult, CrawlError> {
        let to = start_block.saturating_add(requested_block_count);
        self.scan_window(client, start_block, to).await
    }

    /// Scan the inclusive window `from..=to`.
    pub async fn scan_window(
        &self,
        client: &dyn ChainClient,
        from: u64,
        to: u64,
    ) -> Result<BlockRangeResult, CrawlError> {
        let fail = |reason: String| CrawlError::RangeFetch { from, to, reason };

        let logs = client
            .get_logs(from, to)
            .await
            .map_err(|e| fail(e.to_string()))?;

        let events = self.decode(&logs).map_err(fail)?;
        if let Some(stray) = events
            .iter()
            .find(|e| e.block_number < from || e.block_number > to)
        {
            return Err(fail(format!(
                "endpoint returned a log from block {} outside the requested window",
                stray.block_number
            )));
        }

        tracing::debug!(
            chain_id = self.chain_id,
            from,
            to,
            logs = logs.len(),
            classified = events.len(),
            "fetched block window"
        );

        let found_events = self
            .dispatch(events)
            .await
            .map_err(|e| fail(e.to_string()))?;
        Ok(BlockRangeResult {
            last_block: to,
            found_events,
        })
    }

    /// Classify and process an arbitrary set of logs, e.g. a receipt's.
    pub async fn process_logs(&self, logs: &[RawLog]) -> Result<FoundEvents, CrawlError> {
        let events = self.decode(logs).map_err(CrawlError::Other)?;
        self.dispatch(events).await
    }

    fn decode(&self, logs: &[RawLog]) -> Result<Vec<IndexedEvent>, String> {
        let mut events = Vec::new();
        for log in logs {
            if let Some(event) = classify(self.chain_id, log)? {
                events.push(event);
            }
        }
        Ok(events)
    }

    async fn dispatch(&self, events: Vec<IndexedEvent>) -> Result<FoundEvents, CrawlError> {
        let mut found = FoundEvents::new();
        for event in events {
            self.handlers.dispatch_event(&event).await?;
            found.entry(event.event_type).or_default().push(event);
        }
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chaincrawl_core::handler::EventHandler;
    use chaincrawl_core::types::EventType;
    use std::sync::{Arc, Mutex};

    use crate::events::{keccak256_signature, signature};
    use crate::fetcher::TransactionReceipt;

    fn log(event_type: EventType, block: u64, index: u64) -> RawLog {
        RawLog {
            address: "0xnft".into(),
            topics: vec![keccak256_signature(signature(event_type))],
            data: "0x".into(),
            block_number: Some(format!("0x{block:x}")),
            block_hash: None,
            tx_hash: Some(format!("0x{block:x}{index:x}")),
            log_index: Some(format!("0x{index:x}")),
            removed: None,
        }
    }

    struct Logs {
        logs: Vec<RawLog>,
        fail: bool,
        requested: Mutex<Vec<(u64, u64)>>,
    }

    #[async_trait]
    impl ChainClient for Logs {
        async fn get_height(&self) -> Result<u64, CrawlError> {
            Ok(1000)
        }
        async fn get_logs(&self, from: u64, to: u64) -> Result<Vec<RawLog>, CrawlError> {
            self.requested.lock().unwrap().push((from, to));
            if self.fail {
                return Err(CrawlError::Rpc("response size exceeded".into()));
            }
            Ok(self.logs.clone())
        }
        async fn get_transaction_receipt(
            &self,
            _tx: &str,
        ) -> Result<Option<TransactionReceipt>, CrawlError> {
            Ok(None)
        }
        fn endpoint(&self) -> &str {
            "mock://logs"
        }
    }

    fn client(logs: Vec<RawLog>, fail: bool) -> Logs {
        Logs {
            logs,
            fail,
            requested: Mutex::new(vec![]),
        }
    }

    struct Collect(Arc<Mutex<Vec<IndexedEvent>>>);

    #[async_trait]
    impl EventHandler for Collect {
        async fn handle(&self, event: &IndexedEvent) -> Result<(), CrawlError> {
            self.0.lock().unwrap().push(event.clone());
            Ok(())
        }
        fn name(&self) -> &str {
            "collect"
        }
    }

    #[tokio::test]
    async fn groups_events_and_reports_window_end() {
        let seen = Arc::new(Mutex::new(vec![]));
        let mut handlers = HandlerRegistry::new();
        handlers.on_event(Arc::new(Collect(seen.clone())));
        let scanner = RangeScanner::new(137, handlers);

        let mut unrelated = log(EventType::MetadataCreated, 905, 9);
        unrelated.topics = vec!["0x1234".into()];
        let c = client(
            vec![
                log(EventType::MetadataCreated, 901, 0),
                log(EventType::OrderStarted, 920, 1),
                log(EventType::MetadataCreated, 950, 2),
                unrelated,
            ],
            false,
        );

        let result = scanner.process_blocks(&c, 900, 50).await.unwrap();
        assert_eq!(*c.requested.lock().unwrap(), vec![(900, 950)]);
        assert_eq!(result.last_block, 950);
        assert_eq!(result.found_events[&EventType::MetadataCreated].len(), 2);
        assert_eq!(result.found_events[&EventType::OrderStarted].len(), 1);
        assert_eq!(result.event_count(), 3);
        assert_eq!(seen.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn fetch_failure_is_a_range_error() {
        let scanner = RangeScanner::new(1, HandlerRegistry::new());
        let err = scanner
            .process_blocks(&client(vec![], true), 10, 5)
            .await
            .unwrap_err();
        assert!(matches!(err, CrawlError::RangeFetch { from: 10, to: 15, .. }));
    }

    #[tokio::test]
    async fn malformed_or_stray_logs_fail_the_whole_window() {
        let scanner = RangeScanner::new(1, HandlerRegistry::new());

        let mut broken = log(EventType::MetadataUpdated, 12, 0);
        broken.log_index = None;
        let c = client(vec![log(EventType::MetadataUpdated, 11, 0), broken], false);
        assert!(matches!(
            scanner.process_blocks(&c, 10, 5).await,
            Err(CrawlError::RangeFetch { .. })
        ));

        let c = client(vec![log(EventType::MetadataUpdated, 99, 0)], false);
        assert!(matches!(
            scanner.process_blocks(&c, 10, 5).await,
            Err(CrawlError::RangeFetch { .. })
        ));
    }

    #[tokio::test]
    async fn window_bounds_are_inclusive() {
        let scanner = RangeScanner::new(1, HandlerRegistry::new());
        let c = client(
            vec![
                log(EventType::MetadataCreated, 901, 0),
                log(EventType::MetadataCreated, 950, 0),
            ],
            false,
        );
        let result = scanner.scan_window(&c, 901, 950).await.unwrap();
        assert_eq!(*c.requested.lock().unwrap(), vec![(901, 950)]);
        assert_eq!(result.last_block, 950);
        assert_eq!(result.event_count(), 2);

        let c = client(vec![log(EventType::MetadataCreated, 900, 0)], false);
        assert!(matches!(
            scanner.scan_window(&c, 901, 950).await,
            Err(CrawlError::RangeFetch { from: 901, to: 950, .. })
        ));
    }

    #[tokio::test]
    async fn process_logs_for_a_receipt() {
        let scanner = RangeScanner::new(1, HandlerRegistry::new());
        let found = scanner
            .process_logs(&[
                log(EventType::DispenserCreated, 5, 0),
                log(EventType::DispenserActivated, 5, 1),
            ])
            .await
            .unwrap();
        assert_eq!(found.len(), 2);
    }
}
