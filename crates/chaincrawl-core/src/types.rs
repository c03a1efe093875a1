//! Shared types for the crawl pipeline.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

// ─── NetworkDescriptor ───────────────────────────────────────────────────────

/// Static description of one network, built once at crawler startup.
///
/// Only `chunk_size` is ever changed after construction, and only by the
/// crawl loop that owns the descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkDescriptor {
    #[serde(deserialize_with = "chain_id_from_any")]
    pub chain_id: u64,
    /// Human-readable name (e.g. `"polygon"`).
    pub network: String,
    /// Primary RPC endpoint.
    pub rpc: String,
    /// Fallback endpoints, tried in order when the active one fails.
    #[serde(default, rename = "fallbackRPCs")]
    pub fallback_rpcs: Vec<String>,
    /// Initial scan window, in blocks.
    pub chunk_size: u64,
    /// Block at which the contracts of interest were deployed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployed_block: Option<u64>,
}

impl NetworkDescriptor {
    /// Primary followed by fallbacks, in configuration order.
    pub fn endpoints(&self) -> Vec<String> {
        std::iter::once(self.rpc.clone())
            .chain(self.fallback_rpcs.iter().cloned())
            .collect()
    }
}

// ─── ReindexTask ─────────────────────────────────────────────────────────────

/// An ad-hoc request to re-process one transaction, optionally one log of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReindexTask {
    #[serde(alias = "txId")]
    pub transaction_id: String,
    #[serde(deserialize_with = "chain_id_from_any")]
    pub chain_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_index: Option<usize>,
}

impl ReindexTask {
    pub fn new(transaction_id: impl Into<String>, chain_id: u64) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            chain_id,
            event_index: None,
        }
    }

    pub fn with_event_index(mut self, index: usize) -> Self {
        self.event_index = Some(index);
        self
    }
}

/// Chain ids arrive both as JSON numbers and as decimal strings.
pub fn chain_id_from_any<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumOrStr {
        Num(u64),
        Str(String),
    }

    match NumOrStr::deserialize(deserializer)? {
        NumOrStr::Num(n) => Ok(n),
        NumOrStr::Str(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

// ─── EventType ───────────────────────────────────────────────────────────────

/// Contract events the crawler recognises. Anything else is discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventType {
    MetadataCreated,
    MetadataUpdated,
    MetadataState,
    OrderStarted,
    OrderReused,
    DispenserCreated,
    DispenserActivated,
    DispenserDeactivated,
    ExchangeCreated,
    ExchangeActivated,
    ExchangeDeactivated,
    ExchangeRateChanged,
}

impl EventType {
    pub const ALL: [EventType; 12] = [
        Self::MetadataCreated,
        Self::MetadataUpdated,
        Self::MetadataState,
        Self::OrderStarted,
        Self::OrderReused,
        Self::DispenserCreated,
        Self::DispenserActivated,
        Self::DispenserDeactivated,
        Self::ExchangeCreated,
        Self::ExchangeActivated,
        Self::ExchangeDeactivated,
        Self::ExchangeRateChanged,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MetadataCreated => "MetadataCreated",
            Self::MetadataUpdated => "MetadataUpdated",
            Self::MetadataState => "MetadataState",
            Self::OrderStarted => "OrderStarted",
            Self::OrderReused => "OrderReused",
            Self::DispenserCreated => "DispenserCreated",
            Self::DispenserActivated => "DispenserActivated",
            Self::DispenserDeactivated => "DispenserDeactivated",
            Self::ExchangeCreated => "ExchangeCreated",
            Self::ExchangeActivated => "ExchangeActivated",
            Self::ExchangeDeactivated => "ExchangeDeactivated",
            Self::ExchangeRateChanged => "ExchangeRateChanged",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown event type '{s}'"))
    }
}

// ─── IndexedEvent ────────────────────────────────────────────────────────────

/// A classified contract log.
///
/// `(chain_id, tx_hash, log_index)` identifies the log uniquely, which is the
/// key stores and consumers de-duplicate on when a range is scanned twice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexedEvent {
    pub event_type: EventType,
    pub chain_id: u64,
    /// Emitting contract.
    pub address: String,
    pub tx_hash: String,
    pub block_number: u64,
    pub log_index: u64,
    pub topics: Vec<String>,
    /// Undecoded ABI payload (`0x…`).
    pub data: String,
}

/// Events found in one scan or one reindex task, grouped by type.
pub type FoundEvents = BTreeMap<EventType, Vec<IndexedEvent>>;

// ─── BlockRangeResult ────────────────────────────────────────────────────────

/// Output of one successful range scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockRangeResult {
    /// Highest block covered by the scan.
    pub last_block: u64,
    pub found_events: FoundEvents,
}

impl BlockRangeResult {
    pub fn event_count(&self) -> usize {
        self.found_events.values().map(Vec::len).sum()
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
