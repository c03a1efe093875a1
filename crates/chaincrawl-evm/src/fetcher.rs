//! EVM chain access.
//!
//! [`ChainClient`] is the narrow endpoint contract the crawler consumes:
//! `eth_blockNumber`, `eth_getLogs` over an inclusive range, and
//! `eth_getTransactionReceipt`. [`EvmClient`] implements it on top of one
//! [`RpcTransport`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chaincrawl_core::error::CrawlError;
use chaincrawl_rpc::{
    call, hex_quantity, parse_hex_quantity, HttpClientConfig, HttpRpcClient, RpcTransport,
    TransportError,
};

/// A raw EVM log as returned by `eth_getLogs` or inside a receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLog {
    pub address: String,
    #[serde(default)]
    pub topics: Vec<String>,
    #[serde(default)]
    pub data: String,
    #[serde(rename = "blockNumber", default)]
    pub block_number: Option<String>,
    #[serde(rename = "blockHash", default)]
    pub block_hash: Option<String>,
    #[serde(rename = "transactionHash", default)]
    pub tx_hash: Option<String>,
    #[serde(rename = "logIndex", default)]
    pub log_index: Option<String>,
    #[serde(default)]
    pub removed: Option<bool>,
}

impl RawLog {
    /// Block number, or `None` for a pending log.
    pub fn block_number_u64(&self) -> Option<u64> {
        self.block_number.as_deref().and_then(parse_hex_quantity)
    }

    pub fn log_index_u64(&self) -> Option<u64> {
        self.log_index.as_deref().and_then(parse_hex_quantity)
    }

    /// Returns `true` if this log was removed by a reorg.
    pub fn is_removed(&self) -> bool {
        self.removed.unwrap_or(false)
    }
}

/// The subset of `eth_getTransactionReceipt` the crawler needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionReceipt {
    pub transaction_hash: String,
    #[serde(default)]
    pub block_number: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub logs: Vec<RawLog>,
}

/// Endpoint contract consumed by the connection manager and range scanner.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Latest block number the endpoint reports.
    async fn get_height(&self) -> Result<u64, CrawlError>;

    /// Logs in the inclusive range `[from, to]`.
    async fn get_logs(&self, from: u64, to: u64) -> Result<Vec<RawLog>, CrawlError>;

    /// `Ok(None)` while the transaction is unknown or unconfirmed.
    async fn get_transaction_receipt(
        &self,
        tx_hash: &str,
    ) -> Result<Option<TransactionReceipt>, CrawlError>;

    /// Endpoint URL, used in logs.
    fn endpoint(&self) -> &str;
}

/// [`ChainClient`] over a JSON-RPC transport.
pub struct EvmClient {
    transport: Arc<dyn RpcTransport>,
    next_id: AtomicU64,
    topics: Vec<String>,
}

impl EvmClient {
    pub fn new(transport: Arc<dyn RpcTransport>) -> Self {
        Self {
            transport,
            next_id: AtomicU64::new(1),
            topics: Vec::new(),
        }
    }

    /// HTTP client for `url` with the given timeout and retry settings.
    pub fn http(url: impl Into<String>, config: HttpClientConfig) -> Result<Self, CrawlError> {
        let transport = HttpRpcClient::new(url, config).map_err(rpc_err)?;
        Ok(Self::new(Arc::new(transport)))
    }

    /// Restrict `eth_getLogs` to logs whose topic0 is one of `topics`.
    pub fn with_topic_filter(mut self, topics: Vec<String>) -> Self {
        self.topics = topics;
        self
    }

    async fn request<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        call(self.transport.as_ref(), id, method, params).await
    }
}

fn rpc_err(e: TransportError) -> CrawlError {
    CrawlError::Rpc(e.to_string())
}

#[async_trait]
impl ChainClient for EvmClient {
    async fn get_height(&self) -> Result<u64, CrawlError> {
        let raw: String = self.request("eth_blockNumber", vec![]).await.map_err(rpc_err)?;
        parse_hex_quantity(&raw)
            .ok_or_else(|| CrawlError::Rpc(format!("malformed block number '{raw}'")))
    }

    async fn get_logs(&self, from: u64, to: u64) -> Result<Vec<RawLog>, CrawlError> {
        let mut filter = json!({
            "fromBlock": hex_quantity(from),
            "toBlock": hex_quantity(to),
        });
        if !self.topics.is_empty() {
            filter["topics"] = json!([self.topics]);
        }
        self.request("eth_getLogs", vec![filter]).await.map_err(rpc_err)
    }

    async fn get_transaction_receipt(
        &self,
        tx_hash: &str,
    ) -> Result<Option<TransactionReceipt>, CrawlError> {
        self.request("eth_getTransactionReceipt", vec![json!(tx_hash)])
            .await
            .map_err(rpc_err)
    }

    fn endpoint(&self) -> &str {
        self.transport.url()
    }
}
