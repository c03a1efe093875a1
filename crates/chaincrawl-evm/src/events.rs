//! Event classification by `topics[0]`.

use std::collections::HashMap;
use std::sync::OnceLock;
use tiny_keccak::{Hasher, Keccak};

use chaincrawl_core::types::{EventType, IndexedEvent};

use crate::fetcher::RawLog;

/// Canonical ABI signature of each recognised event.
pub fn signature(event_type: EventType) -> &'static str {
    match event_type {
        EventType::MetadataCreated => {
            "MetadataCreated(address,uint8,string,bytes,bytes,bytes32,uint256,uint256)"
        }
        EventType::MetadataUpdated => {
            "MetadataUpdated(address,uint8,string,bytes,bytes,bytes32,uint256,uint256)"
        }
        EventType::MetadataState => "MetadataState(address,uint8,uint256,uint256)",
        EventType::OrderStarted => {
            "OrderStarted(address,address,uint256,uint256,uint256,address,uint256)"
        }
        EventType::OrderReused => "OrderReused(bytes32,address,uint256,uint256)",
        EventType::DispenserCreated => "DispenserCreated(address,address,uint256,uint256,address)",
        EventType::DispenserActivated => "DispenserActivated(address)",
        EventType::DispenserDeactivated => "DispenserDeactivated(address)",
        EventType::ExchangeCreated => "ExchangeCreated(bytes32,address,address,address,uint256)",
        EventType::ExchangeActivated => "ExchangeActivated(bytes32,address)",
        EventType::ExchangeDeactivated => "ExchangeDeactivated(bytes32,address)",
        EventType::ExchangeRateChanged => "ExchangeRateChanged(bytes32,address,uint256)",
    }
}

/// `0x`-prefixed keccak256 of an event signature.
pub fn keccak256_signature(signature: &str) -> String {
    let mut hasher = Keccak::v256();
    let mut output = [0u8; 32];
    hasher.update(signature.as_bytes());
    hasher.finalize(&mut output);
    format!("0x{}", hex::encode(output))
}

fn topic_table() -> &'static HashMap<String, EventType> {
    static TABLE: OnceLock<HashMap<String, EventType>> = OnceLock::new();
    TABLE.get_or_init(|| {
        EventType::ALL
            .iter()
            .map(|t| (keccak256_signature(signature(*t)), *t))
            .collect()
    })
}

/// topic0 of every recognised event, for `eth_getLogs` filtering.
pub fn known_topics() -> Vec<String> {
    EventType::ALL.iter().map(|t| keccak256_signature(signature(*t))).collect()
}

/// Event type for a topic0 hash, case-insensitive.
pub fn event_type_for_topic(topic0: &str) -> Option<EventType> {
    topic_table().get(&topic0.to_ascii_lowercase()).copied()
}

/// Classify one log.
///
/// `Ok(None)` means the log is unrelated (no topic, unknown topic or removed)
/// and is discarded. `Err` means a recognised log is missing the fields
/// needed to index it.
pub fn classify(chain_id: u64, log: &RawLog) -> Result<Option<IndexedEvent>, String> {
    if log.is_removed() {
        return Ok(None);
    }
    let Some(event_type) = log.topics.first().and_then(|t| event_type_for_topic(t)) else {
        return Ok(None);
    };
    let tx_hash = log
        .tx_hash
        .clone()
        .ok_or_else(|| format!("{event_type} log at {} has no transaction hash", log.address))?;
    let block_number = log
        .block_number_u64()
        .ok_or_else(|| format!("{event_type} log in {tx_hash} has no block number"))?;
    let log_index = log
        .log_index_u64()
        .ok_or_else(|| format!("{event_type} log in {tx_hash} has no log index"))?;

    Ok(Some(IndexedEvent {
        event_type,
        chain_id,
        address: log.address.to_ascii_lowercase(),
        tx_hash,
        block_number,
        log_index,
        topics: log.topics.clone(),
        data: log.data.clone(),
    }))
}
