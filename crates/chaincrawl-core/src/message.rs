//! Messages exchanged between the supervisor and a network's crawler.
//!
//! ```text
//! supervisor → crawler   { "method": "start-crawling" }
//!                        { "method": "add-reindex-task", "reindexTask": { … } }
//!                        { "method": "stop" }
//! crawler → supervisor   { "method": "MetadataCreated", "network": 137, "data": [ … ] }
//! ```

use serde::{Deserialize, Serialize};

use crate::types::{EventType, IndexedEvent, ReindexTask};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "kebab-case")]
pub enum CrawlerCommand {
    StartCrawling,
    /// A missing task is accepted on the wire and ignored by the crawler.
    AddReindexTask {
        #[serde(default, rename = "reindexTask", skip_serializing_if = "Option::is_none")]
        reindex_task: Option<ReindexTask>,
    },
    Stop,
}

/// One interesting event type found by a scan, forwarded upward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlerEvent {
    pub method: EventType,
    /// Chain id of the network the events come from.
    pub network: u64,
    pub data: Vec<IndexedEvent>,
}
