//! Connection manager: primary endpoint plus ordered fallbacks for one network.
//!
//! Owned by its network's crawl loop. Probe failures of any kind (timeout,
//! refused connection, malformed or implausible height) become `false`; no
//! error crosses into the loop from here. The active endpoint only changes
//! through [`ConnectionManager::try_fallback_rpcs`] and is never persisted, so
//! a restarted crawler starts again from the primary.

use std::sync::Arc;
use std::time::Duration;

use chaincrawl_core::error::CrawlError;
use chaincrawl_core::types::NetworkDescriptor;
use chaincrawl_rpc::HttpClientConfig;

use crate::events::known_topics;
use crate::fetcher::{ChainClient, EvmClient};

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Upper bound on one readiness probe.
    pub probe_timeout: Duration,
    /// A height more than this many blocks below the best height seen so far
    /// marks the endpoint as lagging.
    pub height_tolerance: u64,
    /// Transport settings for endpoints built from a descriptor.
    pub http: HttpClientConfig,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_secs(10),
            height_tolerance: 128,
            http: HttpClientConfig::default(),
        }
    }
}

pub struct ConnectionManager {
    chain_id: u64,
    clients: Vec<Arc<dyn ChainClient>>,
    active: usize,
    best_height: Option<u64>,
    rotations: u64,
    config: ConnectionConfig,
}

impl ConnectionManager {
    /// `clients` are in priority order: primary first.
    pub fn new(
        chain_id: u64,
        clients: Vec<Arc<dyn ChainClient>>,
        config: ConnectionConfig,
    ) -> Result<Self, CrawlError> {
        if clients.is_empty() {
            return Err(CrawlError::Config(format!("chain {chain_id}: no RPC endpoints")));
        }
        Ok(Self {
            chain_id,
            clients,
            active: 0,
            best_height: None,
            rotations: 0,
            config,
        })
    }

    /// HTTP clients for the descriptor's primary and fallback endpoints,
    /// built with `config.http`.
    pub fn from_descriptor(
        descriptor: &NetworkDescriptor,
        config: ConnectionConfig,
    ) -> Result<Self, CrawlError> {
        let topics = known_topics();
        let clients = descriptor
            .endpoints()
            .into_iter()
            .map(|url| {
                EvmClient::http(url, config.http.clone()).map(|c| {
                    Arc::new(c.with_topic_filter(topics.clone())) as Arc<dyn ChainClient>
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(descriptor.chain_id, clients, config)
    }

    /// Primary followed by fallbacks, in configured order.
    pub fn list_endpoints(&self) -> Vec<&str> {
        self.clients.iter().map(|c| c.endpoint()).collect()
    }

    pub fn active_index(&self) -> usize {
        self.active
    }

    pub fn active_endpoint(&self) -> &str {
        self.clients[self.active].endpoint()
    }

    /// Client for the active endpoint.
    pub fn client(&self) -> Arc<dyn ChainClient> {
        Arc::clone(&self.clients[self.active])
    }

    /// Number of fallback endpoints moved to during rotation passes.
    pub fn rotations(&self) -> u64 {
        self.rotations
    }

    /// Highest height observed since the last full failed rotation pass.
    pub fn best_height(&self) -> Option<u64> {
        self.best_height
    }

    fn is_plausible(&self, height: u64) -> bool {
        if height == 0 {
            return false;
        }
        match self.best_height {
            Some(best) => height.saturating_add(self.config.height_tolerance) >= best,
            None => true,
        }
    }

    fn observe(&mut self, height: u64) {
        self.best_height = Some(self.best_height.map_or(height, |b| b.max(height)));
    }

    async fn probe(&mut self, idx: usize) -> bool {
        let client = Arc::clone(&self.clients[idx]);
        let outcome = tokio::time::timeout(self.config.probe_timeout, client.get_height()).await;
        match outcome {
            Ok(Ok(height)) if self.is_plausible(height) => {
                self.observe(height);
                true
            }
            Ok(Ok(height)) => {
                tracing::warn!(
                    chain_id = self.chain_id,
                    endpoint = client.endpoint(),
                    height,
                    best = ?self.best_height,
                    "implausible network height"
                );
                false
            }
            Ok(Err(e)) => {
                tracing::warn!(
                    chain_id = self.chain_id,
                    endpoint = client.endpoint(),
                    error = %e,
                    "readiness probe failed"
                );
                false
            }
            Err(_) => {
                tracing::warn!(
                    chain_id = self.chain_id,
                    endpoint = client.endpoint(),
                    timeout_ms = self.config.probe_timeout.as_millis() as u64,
                    "readiness probe timed out"
                );
                false
            }
        }
    }

    /// Whether the active endpoint answers with a plausible height in time.
    pub async fn is_network_ready(&mut self) -> bool {
        self.probe(self.active).await
    }

    /// Probe every other endpoint once, in order after the active one, and
    /// make the first ready one active. On `false` the active endpoint is
    /// left as it was and the height baseline is dropped, so the next probe
    /// starts a fresh one.
    pub async fn try_fallback_rpcs(&mut self) -> bool {
        let len = self.clients.len();
        for offset in 1..len {
            let idx = (self.active + offset) % len;
            self.rotations += 1;
            tracing::info!(
                chain_id = self.chain_id,
                endpoint = self.clients[idx].endpoint(),
                "trying fallback RPC"
            );
            if self.probe(idx).await {
                self.active = idx;
                tracing::info!(
                    chain_id = self.chain_id,
                    endpoint = self.active_endpoint(),
                    "switched RPC endpoint"
                );
                return true;
            }
        }
        tracing::error!(
            chain_id = self.chain_id,
            endpoints = len,
            best_height = ?self.best_height,
            "no RPC endpoint is ready"
        );
        self.best_height = None;
        false
    }

    /// Current height from the active endpoint.
    pub async fn height(&mut self) -> Result<u64, CrawlError> {
        let client = self.client();
        let height = tokio::time::timeout(self.config.probe_timeout, client.get_height())
            .await
            .map_err(|_| {
                CrawlError::Rpc(format!("{}: height query timed out", client.endpoint()))
            })??;
        self.observe(height);
        Ok(height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    use crate::fetcher::{RawLog, TransactionReceipt};

    enum Behaviour {
        Height(u64),
        /// Successive heights; the last one repeats.
        Heights(Mutex<Vec<u64>>),
        Refuse,
        Hang,
    }

    struct Probe {
        url: String,
        behaviour: Behaviour,
    }

    #[async_trait]
    impl ChainClient for Probe {
        async fn get_height(&self) -> Result<u64, CrawlError> {
            match &self.behaviour {
                Behaviour::Height(h) => Ok(*h),
                Behaviour::Heights(heights) => {
                    let mut heights = heights.lock().unwrap();
                    if heights.len() > 1 {
                        Ok(heights.remove(0))
                    } else {
                        Ok(heights[0])
                    }
                }
                Behaviour::Refuse => Err(CrawlError::Rpc("connection refused".into())),
                Behaviour::Hang => std::future::pending().await,
            }
        }
        async fn get_logs(&self, _from: u64, _to: u64) -> Result<Vec<RawLog>, CrawlError> {
            Ok(vec![])
        }
        async fn get_transaction_receipt(
            &self,
            _tx: &str,
        ) -> Result<Option<TransactionReceipt>, CrawlError> {
            Ok(None)
        }
        fn endpoint(&self) -> &str {
            &self.url
        }
    }

    fn manager(endpoints: Vec<(&str, Behaviour)>) -> ConnectionManager {
        let clients = endpoints
            .into_iter()
            .map(|(url, behaviour)| {
                Arc::new(Probe {
                    url: url.into(),
                    behaviour,
                }) as Arc<dyn ChainClient>
            })
            .collect();
        ConnectionManager::new(8996, clients, ConnectionConfig::default()).unwrap()
    }

    #[test]
    fn lists_primary_then_fallbacks() {
        let m = manager(vec![
            ("http://primary", Behaviour::Height(1)),
            ("http://fallback-1", Behaviour::Height(1)),
            ("http://fallback-2", Behaviour::Height(1)),
        ]);
        assert_eq!(
            m.list_endpoints(),
            vec!["http://primary", "http://fallback-1", "http://fallback-2"]
        );
        assert_eq!(m.active_endpoint(), "http://primary");
    }

    #[test]
    fn empty_endpoint_list_is_rejected() {
        assert!(ConnectionManager::new(1, vec![], ConnectionConfig::default()).is_err());
    }

    #[tokio::test]
    async fn ready_on_plausible_height() {
        let mut m = manager(vec![("a", Behaviour::Height(1000))]);
        assert!(m.is_network_ready().await);
        assert_eq!(m.best_height(), Some(1000));

        let mut zero = manager(vec![("a", Behaviour::Height(0))]);
        assert!(!zero.is_network_ready().await);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_is_not_ready() {
        let mut m = manager(vec![("slow", Behaviour::Hang)]);
        assert!(!m.is_network_ready().await);
    }

    #[tokio::test]
    async fn fallback_skips_bad_endpoints() {
        let mut m = manager(vec![
            ("bad-1", Behaviour::Refuse),
            ("bad-2", Behaviour::Refuse),
            ("good", Behaviour::Height(500)),
        ]);
        assert!(!m.is_network_ready().await);
        assert!(m.try_fallback_rpcs().await);
        assert_eq!(m.rotations(), 2);
        assert_eq!(m.active_endpoint(), "good");
        assert!(m.is_network_ready().await);
    }

    #[tokio::test]
    async fn exhausted_fallbacks_keep_active_endpoint() {
        let mut m = manager(vec![("bad-1", Behaviour::Refuse), ("bad-2", Behaviour::Refuse)]);
        assert!(!m.try_fallback_rpcs().await);
        assert_eq!(m.active_index(), 0);
        assert_eq!(m.rotations(), 1);
    }

    #[tokio::test]
    async fn lagging_endpoint_is_not_ready() {
        let mut m = manager(vec![
            ("ahead", Behaviour::Height(10_000)),
            ("behind", Behaviour::Height(9_000)),
        ]);
        assert!(m.is_network_ready().await);
        assert!(!m.try_fallback_rpcs().await);
        assert_eq!(m.active_endpoint(), "ahead");
    }

    #[tokio::test]
    async fn outlier_height_does_not_block_readiness_for_good() {
        let mut m = manager(vec![
            (
                "primary",
                Behaviour::Heights(Mutex::new(vec![9_000_000, 1_000, 1_001])),
            ),
            ("fallback", Behaviour::Height(1_000)),
        ]);
        assert!(m.is_network_ready().await);
        assert_eq!(m.best_height(), Some(9_000_000));

        // every endpoint now looks far behind the outlier
        assert!(!m.is_network_ready().await);
        assert!(!m.try_fallback_rpcs().await);
        assert_eq!(m.best_height(), None);

        // the next cycle re-baselines on real heights
        assert!(m.is_network_ready().await);
        assert_eq!(m.best_height(), Some(1_001));
        assert_eq!(m.active_endpoint(), "primary");
    }

    #[test]
    fn descriptor_endpoints_use_the_configured_transport() {
        let descriptor = NetworkDescriptor {
            chain_id: 8996,
            network: "development".into(),
            rpc: "http://127.0.0.1:8545".into(),
            fallback_rpcs: vec!["http://127.0.0.1:8546".into()],
            chunk_size: 100,
            deployed_block: Some(0),
        };
        let config = ConnectionConfig {
            http: HttpClientConfig {
                request_timeout: Duration::from_secs(3),
                ..HttpClientConfig::default()
            },
            ..ConnectionConfig::default()
        };
        let m = ConnectionManager::from_descriptor(&descriptor, config).unwrap();
        assert_eq!(m.list_endpoints().len(), 2);
        assert_eq!(m.config.http.request_timeout, Duration::from_secs(3));
    }
}
