//! NodeReconciler (§4.4.2): drives `Status.phase` toward `Spec.desired`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::Instrument;

use super::{Outcome, Reconciler};
use crate::metadata::ResourceKey;
use crate::model::node::{DesiredRunState, NodePhase};
use crate::network::{NetworkRegistry, PortSet};
use crate::runtime::{self, NodeRuntime};
use crate::store::Store;
use crate::subnet::PortOffset;
use crate::workqueue::WorkQueue;

const HEALTH_RECHECK_DELAY: Duration = Duration::from_millis(200);
const STOP_GRACE_PERIOD: Duration = Duration::from_secs(10);

pub struct NodeReconciler {
    store: Arc<dyn Store>,
    runtime: Arc<dyn NodeRuntime>,
    networks: Arc<NetworkRegistry>,
    self_queue: Arc<WorkQueue<ResourceKey>>,
    devnet_queue: Arc<WorkQueue<ResourceKey>>,
    /// Whether a `Crashed` node is allowed to auto-restart. Wired from
    /// config in production; tests can flip it to exercise the "leave
    /// crashed" branch.
    restart_on_crash: bool,
}

impl NodeReconciler {
    pub fn new(
        store: Arc<dyn Store>,
        runtime: Arc<dyn NodeRuntime>,
        networks: Arc<NetworkRegistry>,
        self_queue: Arc<WorkQueue<ResourceKey>>,
        devnet_queue: Arc<WorkQueue<ResourceKey>>,
        restart_on_crash: bool,
    ) -> Self {
        Self { store, runtime, networks, self_queue, devnet_queue, restart_on_crash }
    }
}

fn port_set_for(index: u32) -> PortSet {
    let offset = PortOffset::for_index(index);
    PortSet { rpc: offset.rpc, p2p: offset.p2p, grpc: offset.grpc, rest: offset.rest, evm: None }
}

#[async_trait]
impl Reconciler for NodeReconciler {
    async fn reconcile(&self, key: &ResourceKey) -> Outcome {
        let span = tracing::info_span!("reconcile", kind = "node", namespace = %key.namespace, name = %key.name);
        async {
            let mut node = match self.store.get_node(key).await {
                Ok(n) => n,
                Err(e) if e.is_not_found() => return Outcome::Success,
                Err(e) => return Outcome::Retry(e.to_string()),
            };

            match (node.status.phase, node.spec.desired) {
                (NodePhase::Pending | NodePhase::Stopped, DesiredRunState::Running) => {
                    let devnet = match self.store.get_devnet(&node.spec.devnet_ref).await {
                        Ok(d) => d,
                        Err(e) => return Outcome::Retry(e.to_string()),
                    };
                    let plugin = match self.networks.get(&devnet.spec.plugin) {
                        Ok(p) => p,
                        Err(e) => return Outcome::Retry(e.to_string()),
                    };
                    let ports = port_set_for(node.spec.index);
                    match self.runtime.start(&node, plugin, &ports).await {
                        Ok(instance_id) => {
                            node.status.instance_id = Some(instance_id);
                            node.status.phase = NodePhase::Starting;
                            node.status.message = "started, awaiting health check".to_string();
                        }
                        Err(e) if runtime::is_already_running(&e) => {
                            node.status.phase = NodePhase::Starting;
                            node.status.message = "adopted already-running instance".to_string();
                        }
                        Err(e) => {
                            node.status.message = e.to_string();
                            if let Err(store_err) = self.store.update_node(node).await {
                                return Outcome::Retry(store_err.to_string());
                            }
                            return Outcome::Retry(e.to_string());
                        }
                    }
                    if let Err(e) = self.store.update_node(node).await {
                        return Outcome::Retry(e.to_string());
                    }
                    self_requeue_after(&self.self_queue, key.clone(), HEALTH_RECHECK_DELAY);
                    return Outcome::Success;
                }
                (NodePhase::Starting, _) => {
                    let alive = match &node.status.instance_id {
                        Some(id) => self.runtime.is_alive(id).await,
                        None => Ok(false),
                    };
                    match alive {
                        Ok(true) => {
                            node.status.phase = NodePhase::Running;
                            node.status.message = "healthy".to_string();
                            node.status.healthy = true;
                        }
                        Ok(false) => {
                            self_requeue_after(&self.self_queue, key.clone(), HEALTH_RECHECK_DELAY);
                            return Outcome::Success;
                        }
                        Err(e) => return Outcome::Retry(e.to_string()),
                    }
                }
                (NodePhase::Running, DesiredRunState::Stopped) => {
                    node.status.phase = NodePhase::Stopping;
                    if let Err(e) = self.store.update_node(node.clone()).await {
                        return Outcome::Retry(e.to_string());
                    }
                    if let Err(e) = self.runtime.stop(&node, STOP_GRACE_PERIOD).await {
                        return Outcome::Retry(e.to_string());
                    }
                    node.status.phase = NodePhase::Stopped;
                    node.status.instance_id = None;
                    node.status.message = "stopped".to_string();
                }
                (NodePhase::Running, DesiredRunState::Running) if node_observed_crashed(&node) => {
                    node.status.phase = NodePhase::Crashed;
                    node.status.message = "health probe reported crash".to_string();
                    if self.restart_on_crash {
                        node.status.phase = NodePhase::Pending;
                        node.status.restart_count += 1;
                    }
                }
                _ => {}
            }

            if let Err(e) = self.store.update_node(node).await {
                return Outcome::Retry(e.to_string());
            }
            self.devnet_queue.add(key.clone());
            Outcome::Success
        }
        .instrument(span)
        .await
    }
}

fn node_observed_crashed(node: &crate::model::Node) -> bool {
    !node.status.healthy && node.status.consecutive_probe_failures >= 1
}

fn self_requeue_after(queue: &Arc<WorkQueue<ResourceKey>>, key: ResourceKey, delay: Duration) {
    let queue = Arc::clone(queue);
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        queue.add(key);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::Metadata;
    use crate::model::{Node, NodeRole, NodeSpec};
    use crate::network::cosmos::CosmosSdkModule;
    use crate::store::MemoryStore;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn test_networks() -> Arc<NetworkRegistry> {
        let mut registry = NetworkRegistry::new();
        registry.register(Box::new(CosmosSdkModule::new("cosmos-sdk", "chaind", "cosmos", "uatom")));
        Arc::new(registry)
    }

    fn devnet() -> crate::model::Devnet {
        crate::model::Devnet::new(
            Metadata::new("dev-1", "default"),
            crate::model::DevnetSpec {
                plugin: "cosmos-sdk".to_string(),
                network_type: "testnet".to_string(),
                validators: 1,
                full_nodes: 0,
                mode: crate::model::DevnetMode::Local,
                binary_source: "v1.0.0".to_string(),
                genesis_source: crate::model::GenesisSource::Generate,
                genesis_overrides: crate::model::GenesisOverrides::default(),
                desired: crate::model::devnet::DevnetDesiredState::default(),
            },
        )
    }

    struct FakeRuntime {
        alive: AtomicBool,
    }

    #[async_trait]
    impl NodeRuntime for FakeRuntime {
        async fn start(
            &self,
            _node: &crate::model::Node,
            _plugin: &dyn crate::network::NetworkModule,
            _ports: &crate::network::PortSet,
        ) -> crate::error::Result<String> {
            self.alive.store(true, Ordering::SeqCst);
            Ok("fake-instance".to_string())
        }
        async fn stop(&self, _node: &crate::model::Node, _grace: Duration) -> crate::error::Result<()> {
            self.alive.store(false, Ordering::SeqCst);
            Ok(())
        }
        async fn exec(
            &self,
            _node: &crate::model::Node,
            _cmd: &[String],
            _timeout: Duration,
        ) -> crate::error::Result<crate::runtime::ExecResult> {
            Ok(crate::runtime::ExecResult { exit_code: 0, stdout: vec![], stderr: vec![] })
        }
        async fn logs(
            &self,
            _node: &crate::model::Node,
            _tail: Option<usize>,
            _follow: bool,
        ) -> crate::error::Result<tokio::sync::mpsc::Receiver<crate::runtime::LogLine>> {
            let (_tx, rx) = tokio::sync::mpsc::channel(1);
            Ok(rx)
        }
        async fn is_alive(&self, _instance_id: &str) -> crate::error::Result<bool> {
            Ok(self.alive.load(Ordering::SeqCst))
        }
    }

    fn node(name: &str) -> Node {
        Node::new(
            Metadata::new(name, "default"),
            NodeSpec {
                devnet_ref: ResourceKey::new("default", "dev-1"),
                index: 0,
                role: NodeRole::Validator,
                binary_path: "/bin/chaind".to_string(),
                home_dir: "/tmp/home".to_string(),
                desired: DesiredRunState::Running,
            },
        )
    }

    #[tokio::test]
    async fn pending_to_starting_on_start() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let runtime: Arc<dyn NodeRuntime> = Arc::new(FakeRuntime { alive: AtomicBool::new(false) });
        let self_queue = WorkQueue::new();
        let devnet_queue = WorkQueue::new();
        let reconciler = NodeReconciler::new(store.clone(), runtime, test_networks(), self_queue, devnet_queue, true);

        store.create_devnet(devnet()).await.unwrap();
        let n = node("n0");
        let key = n.metadata.key();
        store.create_node(n).await.unwrap();

        let outcome = reconciler.reconcile(&key).await;
        assert_eq!(outcome, Outcome::Success);
        let reloaded = store.get_node(&key).await.unwrap();
        assert_eq!(reloaded.status.phase, NodePhase::Starting);
    }

    #[tokio::test]
    async fn starting_to_running_once_alive() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let runtime: Arc<dyn NodeRuntime> = Arc::new(FakeRuntime { alive: AtomicBool::new(true) });
        let self_queue = WorkQueue::new();
        let devnet_queue = WorkQueue::new();
        let reconciler = NodeReconciler::new(store.clone(), runtime, test_networks(), self_queue, devnet_queue, true);

        let mut n = node("n0");
        n.status.phase = NodePhase::Starting;
        n.status.instance_id = Some("fake-instance".to_string());
        let key = n.metadata.key();
        store.create_node(n).await.unwrap();

        reconciler.reconcile(&key).await;
        let reloaded = store.get_node(&key).await.unwrap();
        assert_eq!(reloaded.status.phase, NodePhase::Running);
    }

    #[tokio::test]
    async fn missing_node_is_a_no_op_success() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let runtime: Arc<dyn NodeRuntime> = Arc::new(FakeRuntime { alive: AtomicBool::new(false) });
        let reconciler = NodeReconciler::new(store, runtime, test_networks(), WorkQueue::new(), WorkQueue::new(), true);
        let outcome = reconciler.reconcile(&ResourceKey::new("default", "ghost")).await;
        assert_eq!(outcome, Outcome::Success);
    }
}
