//! Event notifier: forwards interesting events to the supervisor.

use std::collections::HashSet;
use tokio::sync::mpsc;

use crate::message::CrawlerEvent;
use crate::types::{EventType, FoundEvents};

/// Fire-and-forget forwarder for one network.
///
/// Sends one [`CrawlerEvent`] per interesting event type present in a scan.
/// A closed channel is logged and otherwise ignored.
#[derive(Debug, Clone)]
pub struct EventNotifier {
    chain_id: u64,
    interesting: HashSet<EventType>,
    tx: mpsc::UnboundedSender<CrawlerEvent>,
}

impl EventNotifier {
    pub fn new(
        chain_id: u64,
        interesting: impl IntoIterator<Item = EventType>,
        tx: mpsc::UnboundedSender<CrawlerEvent>,
    ) -> Self {
        Self {
            chain_id,
            interesting: interesting.into_iter().collect(),
            tx,
        }
    }

    pub fn is_interesting(&self, event_type: EventType) -> bool {
        self.interesting.contains(&event_type)
    }

    /// Forward `events`. Returns the number of messages sent.
    pub fn notify(&self, events: &FoundEvents) -> usize {
        let mut sent = 0;
        for (event_type, list) in events {
            if list.is_empty() || !self.is_interesting(*event_type) {
                continue;
            }
            let msg = CrawlerEvent {
                method: *event_type,
                network: self.chain_id,
                data: list.clone(),
            };
            match self.tx.send(msg) {
                Ok(()) => sent += 1,
                Err(_) => {
                    tracing::warn!(
                        chain_id = self.chain_id,
                        %event_type,
                        "supervisor channel closed, event dropped"
                    );
                }
            }
        }
        sent
    }
}
