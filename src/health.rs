//! HealthController (§4.5): a singleton periodic producer that probes every
//! `Running` node's chain RPC status endpoint and writes back liveness,
//! height, and peer count, escalating a crashed node onto the Node queue.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde::Deserialize;

use crate::metadata::ResourceKey;
use crate::model::node::NodePhase;
use crate::store::Store;
use crate::workqueue::WorkQueue;

const DEFAULT_CONCURRENCY: usize = 16;

#[derive(Debug, Deserialize)]
struct StatusResponse {
    latest_block_height: u64,
    catching_up: bool,
    n_peers: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct HealthConfig {
    pub interval: Duration,
    pub probe_timeout: Duration,
    pub failure_threshold: u32,
    pub concurrency: usize,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            probe_timeout: Duration::from_secs(5),
            failure_threshold: 3,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

pub struct HealthController {
    store: Arc<dyn Store>,
    http: reqwest::Client,
    node_queue: Arc<WorkQueue<ResourceKey>>,
    config: HealthConfig,
}

impl HealthController {
    pub fn new(store: Arc<dyn Store>, node_queue: Arc<WorkQueue<ResourceKey>>, config: HealthConfig) -> Self {
        let http = reqwest::Client::builder().timeout(config.probe_timeout).build().unwrap_or_default();
        Self { store, http, node_queue, config }
    }

    /// Runs the periodic scan loop until `shutdown` resolves.
    pub async fn run(self: Arc<Self>, mut shutdown: tokio::sync::oneshot::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.config.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick().await,
                _ = &mut shutdown => {
                    tracing::info!("health controller stopping");
                    break;
                }
            }
        }
    }

    async fn tick(&self) {
        let running_nodes = match self.store.list_all_nodes().await {
            Ok(nodes) => nodes.into_iter().filter(|n| n.status.phase == NodePhase::Running).collect::<Vec<_>>(),
            Err(e) => {
                tracing::warn!(error = %e, "health scan: failed to list nodes");
                return;
            }
        };

        let concurrency = self.config.concurrency;
        stream::iter(running_nodes)
            .for_each_concurrent(concurrency, |node| async move {
                self.probe_and_record(node).await;
            })
            .await;
    }

    async fn probe_and_record(&self, node: crate::model::Node) {
        let span = tracing::debug_span!("probe", node = %node.metadata.name);
        let _entered = span.enter();

        let key = node.metadata.key();
        let endpoint = format!("http://127.0.0.1:{}/status", crate::subnet::PortOffset::for_index(node.spec.index).rpc);
        let probe = self.http.get(&endpoint).send().await;

        let mut node = match self.store.get_node(&key).await {
            Ok(n) => n,
            Err(_) => return,
        };
        if node.status.phase != NodePhase::Running {
            return;
        }

        match probe {
            Ok(resp) if resp.status().is_success() => match resp.json::<StatusResponse>().await {
                Ok(status) => {
                    node.status.block_height = status.latest_block_height;
                    node.status.peer_count = status.n_peers;
                    node.status.catching_up = status.catching_up;
                    node.status.healthy = true;
                    node.status.consecutive_probe_failures = 0;
                }
                Err(_) => self.record_failure(&mut node),
            },
            _ => self.record_failure(&mut node),
        }

        let crashed = node.status.consecutive_probe_failures >= self.config.failure_threshold && !node.status.healthy;
        if crashed {
            node.status.phase = NodePhase::Crashed;
            node.status.message = "exceeded health probe failure threshold".to_string();
        }

        if let Err(e) = self.store.update_node(node).await {
            tracing::warn!(error = %e, "failed to persist health probe result");
            return;
        }
        if crashed {
            self.node_queue.add(key);
        }
    }

    fn record_failure(&self, node: &mut crate::model::Node) {
        node.status.healthy = false;
        node.status.consecutive_probe_failures += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::Metadata;
    use crate::model::node::{DesiredRunState, NodeRole, NodeSpec};
    use crate::model::Node;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn unreachable_node_accumulates_failures_until_crashed() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let mut node = Node::new(
            Metadata::new("dev-1-0", "default"),
            NodeSpec {
                devnet_ref: ResourceKey::new("default", "dev-1"),
                index: 9999, // picks an RPC port nothing listens on
                role: NodeRole::Validator,
                binary_path: "/bin/chaind".to_string(),
                home_dir: "/tmp/home".to_string(),
                desired: DesiredRunState::Running,
            },
        );
        node.status.phase = NodePhase::Running;
        node.status.healthy = true;
        let key = node.metadata.key();
        store.create_node(node).await.unwrap();

        let controller = HealthController::new(store.clone(), WorkQueue::new(), HealthConfig::default());
        for _ in 0..3 {
            let n = store.get_node(&key).await.unwrap();
            controller.probe_and_record(n).await;
        }
        let reloaded = store.get_node(&key).await.unwrap();
        assert_eq!(reloaded.status.phase, NodePhase::Crashed);
        assert!(!reloaded.status.healthy);
    }
}
