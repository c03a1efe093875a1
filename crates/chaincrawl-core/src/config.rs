//! Crawler configuration.
//!
//! Sources, lowest precedence first: a JSON config file, the `RPCS`
//! environment variable (the per-network table as JSON), and the
//! `INDEXER_INTERVAL` environment variable (milliseconds). The binary layers
//! CLI flags on top.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::Duration;

use crate::error::CrawlError;
use crate::types::{EventType, NetworkDescriptor};

pub const ENV_RPCS: &str = "RPCS";
pub const ENV_INDEXER_INTERVAL: &str = "INDEXER_INTERVAL";

/// Log level per component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Global default level: "trace" | "debug" | "info" | "warn" | "error"
    #[serde(default = "default_level")]
    pub level: String,
    /// Override per component: crate name → level
    #[serde(default)]
    pub components: HashMap<String, String>,
    /// Emit JSON structured logs (true) or human-readable text (false)
    #[serde(default)]
    pub json: bool,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            components: HashMap::new(),
            json: false,
        }
    }
}

impl LogConfig {
    /// `EnvFilter` directive string: `"info,chaincrawl_evm=debug"` etc.
    pub fn directives(&self) -> String {
        let mut components: Vec<_> = self.components.iter().collect();
        components.sort();
        let mut directives = self.level.clone();
        for (component, level) in components {
            directives.push_str(&format!(",{}={}", component.replace('-', "_"), level));
        }
        directives
    }
}

/// Top-level crawler configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlerConfig {
    /// chain id (as string) → network. Same shape as the `RPCS` variable.
    #[serde(default)]
    pub networks: BTreeMap<String, NetworkDescriptor>,
    /// Pause between crawl cycles.
    #[serde(default = "default_crawl_interval_ms")]
    pub crawl_interval_ms: u64,
    /// Bound on a readiness probe against one endpoint.
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    /// Bound on one JSON-RPC request (logs, receipts) against one endpoint.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Retries of a transient RPC failure on the same endpoint.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Floor for the adaptive scan window.
    #[serde(default = "default_min_chunk_size")]
    pub min_chunk_size: u64,
    /// How far (in blocks) a reported height may fall behind the best height
    /// seen before the endpoint is considered unhealthy.
    #[serde(default = "default_height_tolerance")]
    pub height_tolerance: u64,
    /// Event types forwarded to the supervisor.
    #[serde(default = "default_notify_events")]
    pub notify_events: Vec<EventType>,
    #[serde(default)]
    pub log: LogConfig,
}

fn default_crawl_interval_ms() -> u64 {
    30_000
}

fn default_probe_timeout_ms() -> u64 {
    10_000
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_max_retries() -> u32 {
    2
}

fn default_min_chunk_size() -> u64 {
    1
}

fn default_height_tolerance() -> u64 {
    128
}

fn default_notify_events() -> Vec<EventType> {
    vec![EventType::MetadataCreated]
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            networks: BTreeMap::new(),
            crawl_interval_ms: default_crawl_interval_ms(),
            probe_timeout_ms: default_probe_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            max_retries: default_max_retries(),
            min_chunk_size: default_min_chunk_size(),
            height_tolerance: default_height_tolerance(),
            notify_events: default_notify_events(),
            log: LogConfig::default(),
        }
    }
}

impl CrawlerConfig {
    pub fn from_json_str(s: &str) -> Result<Self, CrawlError> {
        serde_json::from_str(s).map_err(|e| CrawlError::Config(format!("invalid config: {e}")))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CrawlError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| CrawlError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_json_str(&raw)
    }

    /// Parse a standalone network table (the `RPCS` document).
    pub fn networks_from_json(s: &str) -> Result<BTreeMap<String, NetworkDescriptor>, CrawlError> {
        serde_json::from_str(s).map_err(|e| CrawlError::Config(format!("invalid {ENV_RPCS}: {e}")))
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<(), CrawlError> {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`, which maps a variable name to its value.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<(), CrawlError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(rpcs) = lookup(ENV_RPCS).filter(|v| !v.trim().is_empty()) {
            self.networks = Self::networks_from_json(&rpcs)?;
        }
        if let Some(interval) = lookup(ENV_INDEXER_INTERVAL).filter(|v| !v.trim().is_empty()) {
            self.crawl_interval_ms = interval.trim().parse().map_err(|e| {
                CrawlError::Config(format!("invalid {ENV_INDEXER_INTERVAL} '{interval}': {e}"))
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), CrawlError> {
        if self.networks.is_empty() {
            return Err(CrawlError::Config("no networks configured".into()));
        }
        for (key, net) in &self.networks {
            if key.trim().parse::<u64>().ok() != Some(net.chain_id) {
                return Err(CrawlError::Config(format!(
                    "network key '{key}' does not match chainId {}",
                    net.chain_id
                )));
            }
            if net.rpc.trim().is_empty() {
                return Err(CrawlError::Config(format!("chain {}: empty rpc", net.chain_id)));
            }
            if net.chunk_size == 0 {
                return Err(CrawlError::Config(format!(
                    "chain {}: chunkSize must be > 0",
                    net.chain_id
                )));
            }
        }
        if self.crawl_interval_ms == 0 {
            return Err(CrawlError::Config("crawlIntervalMs must be > 0".into()));
        }
        if self.probe_timeout_ms == 0 {
            return Err(CrawlError::Config("probeTimeoutMs must be > 0".into()));
        }
        if self.request_timeout_ms == 0 {
            return Err(CrawlError::Config("requestTimeoutMs must be > 0".into()));
        }
        Ok(())
    }

    /// Networks ordered by chain id.
    pub fn descriptors(&self) -> Vec<NetworkDescriptor> {
        let mut nets: Vec<_> = self.networks.values().cloned().collect();
        nets.sort_by_key(|n| n.chain_id);
        nets
    }

    pub fn crawl_interval(&self) -> Duration {
        Duration::from_millis(self.crawl_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
