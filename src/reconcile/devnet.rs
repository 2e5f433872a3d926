//! DevnetReconciler (§4.4.1).

use std::sync::Arc;

use async_trait::async_trait;
use tracing::Instrument;

use super::{Outcome, Reconciler};
use crate::metadata::{Metadata, ResourceKey};
use crate::model::node::{DesiredRunState, NodePhase, NodeRole, NodeSpec};
use crate::model::{Devnet, DevnetDesiredState, DevnetPhase, Node};
use crate::network::NetworkRegistry;
use crate::orchestrator::Orchestrator;
use crate::provision_log::ProvisionLogHub;
use crate::store::Store;
use crate::subnet::SubnetAllocator;
use crate::workqueue::WorkQueue;

pub struct DevnetReconciler {
    store: Arc<dyn Store>,
    networks: Arc<NetworkRegistry>,
    subnets: Arc<SubnetAllocator>,
    orchestrator: Arc<dyn Orchestrator>,
    provision_logs: Arc<ProvisionLogHub>,
    self_queue: Arc<WorkQueue<ResourceKey>>,
    node_queue: Arc<WorkQueue<ResourceKey>>,
}

impl DevnetReconciler {
    pub fn new(
        store: Arc<dyn Store>,
        networks: Arc<NetworkRegistry>,
        subnets: Arc<SubnetAllocator>,
        orchestrator: Arc<dyn Orchestrator>,
        provision_logs: Arc<ProvisionLogHub>,
        self_queue: Arc<WorkQueue<ResourceKey>>,
        node_queue: Arc<WorkQueue<ResourceKey>>,
    ) -> Self {
        Self { store, networks, subnets, orchestrator, provision_logs, self_queue, node_queue }
    }

    async fn provision(&self, devnet: &Devnet) -> Result<(), String> {
        let key = devnet.metadata.key();
        let plugin = self.networks.get(&devnet.spec.plugin).map_err(|e| e.to_string())?;
        let subnet = self.subnets.allocate(&devnet.metadata.name).map_err(|e| e.to_string())?;
        let msg = format!("allocated subnet 127.{}.0.0/24", subnet.octet);
        tracing::info!(devnet = %devnet.metadata.name, octet = subnet.octet, "allocated subnet");
        self.provision_logs.publish(&key, msg);

        tracing::info!(devnet = %devnet.metadata.name, "building or fetching binary");
        self.provision_logs.publish(&key, "building or fetching binary");
        let binary_path =
            self.orchestrator.build_or_fetch_binary(&devnet.spec, plugin).await.map_err(|e| e.to_string())?;

        let chain_id = devnet
            .spec
            .genesis_overrides
            .chain_id
            .clone()
            .unwrap_or_else(|| plugin.default_chain_id(&devnet.spec.network_type));

        let home_root = format!("/tmp/devnetd/{}", devnet.metadata.name);
        tracing::info!(devnet = %devnet.metadata.name, "materialising genesis");
        self.provision_logs.publish(&key, "materialising genesis");
        self.orchestrator
            .materialize_genesis(&devnet.spec, plugin, &home_root)
            .await
            .map_err(|e| e.to_string())?;

        let total = devnet.spec.total_nodes();
        for index in 0..total {
            let home_dir = format!("{home_root}/node-{index}");
            let moniker = plugin.default_moniker(index);
            self.provision_logs.publish(&key, format!("initialising home directory for node {index}"));
            self.orchestrator
                .init_home_dir(plugin, &home_dir, &chain_id, &moniker)
                .await
                .map_err(|e| e.to_string())?;

            let role = if index < devnet.spec.validators { NodeRole::Validator } else { NodeRole::Fullnode };
            let node_name = format!("{}-{index}", devnet.metadata.name);
            let node_key = ResourceKey::new(devnet.metadata.namespace.clone(), node_name.clone());
            if self.store.get_node(&node_key).await.is_ok() {
                continue; // already created by a prior, interrupted pass (idempotency)
            }
            let node = Node::new(
                Metadata::new(node_name, devnet.metadata.namespace.clone()),
                NodeSpec {
                    devnet_ref: devnet.metadata.key(),
                    index,
                    role,
                    binary_path: binary_path.clone(),
                    home_dir,
                    desired: DesiredRunState::Running,
                },
            );
            let created = self.store.create_node(node).await.map_err(|e| e.to_string())?;
            self.node_queue.add(created.metadata.key());
        }

        self.provision_logs.publish(&key, format!("{total} node(s) created, awaiting startup"));
        Ok(())
    }
}

#[async_trait]
impl Reconciler for DevnetReconciler {
    async fn reconcile(&self, key: &ResourceKey) -> Outcome {
        let span = tracing::info_span!("reconcile", kind = "devnet", namespace = %key.namespace, name = %key.name);
        async {
            let mut devnet = match self.store.get_devnet(key).await {
                Ok(d) => d,
                Err(e) if e.is_not_found() => return Outcome::Success,
                Err(e) => return Outcome::Retry(e.to_string()),
            };

            match devnet.status.phase {
                DevnetPhase::Pending => {
                    if let Err(msg) = devnet.spec.validate() {
                        devnet.status.phase = DevnetPhase::Failed;
                        devnet.status.message = msg.to_string();
                        let _ = self.store.update_devnet(devnet).await;
                        return Outcome::Fatal(msg.to_string());
                    }
                    match self.provision(&devnet).await {
                        Ok(()) => {
                            devnet.status.phase = DevnetPhase::Provisioning;
                            devnet.status.message = "provisioning".to_string();
                        }
                        Err(msg) => {
                            devnet.status.message = msg.clone();
                            let _ = self.store.update_devnet(devnet).await;
                            return Outcome::Retry(msg);
                        }
                    }
                }
                DevnetPhase::Provisioning => {
                    let nodes = match self.store.list_nodes(&key.namespace, &key.name).await {
                        Ok(n) => n,
                        Err(e) => return Outcome::Retry(e.to_string()),
                    };
                    let expected = devnet.spec.total_nodes();
                    devnet.status.nodes = nodes.len() as u32;
                    let ready = nodes.iter().filter(|n| n.status.phase == NodePhase::Running).count() as u32;
                    devnet.status.ready_nodes = ready;
                    if nodes.len() as u32 == expected && ready == expected {
                        devnet.status.phase = DevnetPhase::Running;
                        devnet.status.message = "all nodes running".to_string();
                    } else {
                        for n in &nodes {
                            self.node_queue.add(n.metadata.key());
                        }
                        if let Err(e) = self.store.update_devnet(devnet).await {
                            return Outcome::Retry(e.to_string());
                        }
                        self_requeue(&self.self_queue, key.clone());
                        return Outcome::Success;
                    }
                }
                DevnetPhase::Running if devnet.spec.desired == DevnetDesiredState::Stopped => {
                    if let Err(e) = self.set_children_desired(key, DesiredRunState::Stopped).await {
                        return Outcome::Retry(e);
                    }
                    let nodes = self.store.list_nodes(&key.namespace, &key.name).await.unwrap_or_default();
                    if nodes.iter().all(|n| n.status.phase == NodePhase::Stopped) && !nodes.is_empty() {
                        devnet.status.phase = DevnetPhase::Stopped;
                        devnet.status.message = "stopped".to_string();
                    } else {
                        self_requeue(&self.self_queue, key.clone());
                    }
                }
                DevnetPhase::Stopped if devnet.spec.desired == DevnetDesiredState::Running => {
                    if let Err(e) = self.set_children_desired(key, DesiredRunState::Running).await {
                        return Outcome::Retry(e);
                    }
                    devnet.status.phase = DevnetPhase::Pending;
                    devnet.status.message = "restarting".to_string();
                }
                _ => {}
            }

            if let Err(e) = self.store.update_devnet(devnet).await {
                return Outcome::Retry(e.to_string());
            }
            Outcome::Success
        }
        .instrument(span)
        .await
    }
}

impl DevnetReconciler {
    async fn set_children_desired(&self, key: &ResourceKey, desired: DesiredRunState) -> Result<(), String> {
        let nodes = self.store.list_nodes(&key.namespace, &key.name).await.map_err(|e| e.to_string())?;
        for mut node in nodes {
            if node.spec.desired != desired {
                node.spec.desired = desired;
                let node_key = node.metadata.key();
                self.store.update_node(node).await.map_err(|e| e.to_string())?;
                self.node_queue.add(node_key);
            }
        }
        Ok(())
    }
}

fn self_requeue(queue: &Arc<WorkQueue<ResourceKey>>, key: ResourceKey) {
    let queue = Arc::clone(queue);
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        queue.add(key);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DevnetMode, DevnetSpec, GenesisOverrides, GenesisSource};
    use crate::network::{BuildConfig, GenesisOptions, NetworkModule, PortSet};
    use crate::store::MemoryStore;

    struct FakeModule;

    impl NetworkModule for FakeModule {
        fn name(&self) -> &str {
            "fake"
        }
        fn display_name(&self) -> &str {
            "Fake"
        }
        fn version(&self) -> &str {
            "0.0.0"
        }
        fn binary_name(&self) -> &str {
            "faked"
        }
        fn default_binary_version(&self) -> &str {
            "v0"
        }
        fn build_config(&self, network_type: &str) -> BuildConfig {
            BuildConfig { binary_name: "faked".to_string(), source: network_type.to_string() }
        }
        fn default_chain_id(&self, network_type: &str) -> String {
            format!("fake-{network_type}")
        }
        fn bech32_prefix(&self) -> &str {
            "fake"
        }
        fn base_denom(&self) -> &str {
            "ufake"
        }
        fn init_command(&self, _h: &str, _c: &str, _m: &str) -> Vec<String> {
            vec![]
        }
        fn start_command(&self, _h: &str) -> Vec<String> {
            vec![]
        }
        fn export_command(&self, _h: &str) -> Vec<String> {
            vec![]
        }
        fn modify_genesis(&self, genesis: Vec<u8>, _opts: &GenesisOptions) -> crate::error::Result<Vec<u8>> {
            Ok(genesis)
        }
        fn rpc_endpoint(&self, _n: &str) -> Option<String> {
            None
        }
        fn snapshot_url(&self, _n: &str) -> Option<String> {
            None
        }
        fn available_networks(&self) -> Vec<String> {
            vec!["testnet".to_string()]
        }
        fn default_ports(&self) -> PortSet {
            PortSet { rpc: 26657, p2p: 26656, grpc: 9090, rest: 1317, evm: None }
        }
        fn docker_image(&self) -> &str {
            "fake/faked"
        }
    }

    struct FakeOrchestrator;

    #[async_trait]
    impl Orchestrator for FakeOrchestrator {
        async fn build_or_fetch_binary(
            &self,
            _spec: &crate::model::DevnetSpec,
            _plugin: &dyn NetworkModule,
        ) -> crate::error::Result<String> {
            Ok("/bin/faked".to_string())
        }
        async fn materialize_genesis(
            &self,
            _spec: &crate::model::DevnetSpec,
            _plugin: &dyn NetworkModule,
            _home_dir: &str,
        ) -> crate::error::Result<String> {
            Ok("/tmp/genesis.json".to_string())
        }
        async fn init_home_dir(
            &self,
            _plugin: &dyn NetworkModule,
            _home_dir: &str,
            _chain_id: &str,
            _moniker: &str,
        ) -> crate::error::Result<()> {
            Ok(())
        }
    }

    async fn harness() -> (Arc<dyn Store>, DevnetReconciler, Arc<WorkQueue<ResourceKey>>, Arc<ProvisionLogHub>) {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let mut registry = NetworkRegistry::new();
        registry.register(Box::new(FakeModule));
        let dir = tempfile::tempdir().unwrap().into_path();
        let subnets = Arc::new(SubnetAllocator::open(&dir).await.unwrap());
        let self_queue = WorkQueue::new();
        let node_queue = WorkQueue::new();
        let provision_logs = Arc::new(ProvisionLogHub::new());
        let reconciler = DevnetReconciler::new(
            store.clone(),
            Arc::new(registry),
            subnets,
            Arc::new(FakeOrchestrator),
            provision_logs.clone(),
            self_queue,
            node_queue.clone(),
        );
        (store, reconciler, node_queue, provision_logs)
    }

    fn devnet_spec() -> DevnetSpec {
        DevnetSpec {
            plugin: "fake".to_string(),
            network_type: "testnet".to_string(),
            validators: 2,
            full_nodes: 1,
            mode: DevnetMode::Local,
            binary_source: "v1.0.0".to_string(),
            genesis_source: GenesisSource::Generate,
            genesis_overrides: GenesisOverrides::default(),
            desired: DevnetDesiredState::Running,
        }
    }

    #[tokio::test]
    async fn pending_provisions_and_creates_nodes() {
        let (store, reconciler, node_queue, _provision_logs) = harness().await;
        let devnet = Devnet::new(Metadata::new("dev-1", "default"), devnet_spec());
        let key = devnet.metadata.key();
        store.create_devnet(devnet).await.unwrap();

        let outcome = reconciler.reconcile(&key).await;
        assert_eq!(outcome, Outcome::Success);

        let reloaded = store.get_devnet(&key).await.unwrap();
        assert_eq!(reloaded.status.phase, DevnetPhase::Provisioning);
        let nodes = store.list_nodes("default", "dev-1").await.unwrap();
        assert_eq!(nodes.len(), 3);
        assert_eq!(node_queue.len(), 3);
    }

    #[tokio::test]
    async fn provisioning_flips_to_running_once_all_nodes_running() {
        let (store, reconciler, _node_queue, _provision_logs) = harness().await;
        let devnet = Devnet::new(Metadata::new("dev-1", "default"), devnet_spec());
        let key = devnet.metadata.key();
        store.create_devnet(devnet).await.unwrap();
        reconciler.reconcile(&key).await;

        for mut n in store.list_nodes("default", "dev-1").await.unwrap() {
            n.status.phase = NodePhase::Running;
            store.update_node(n).await.unwrap();
        }

        reconciler.reconcile(&key).await;
        let reloaded = store.get_devnet(&key).await.unwrap();
        assert_eq!(reloaded.status.phase, DevnetPhase::Running);
        assert_eq!(reloaded.status.ready_nodes, 3);
    }

    #[tokio::test]
    async fn missing_devnet_is_a_no_op_success() {
        let (_store, reconciler, _node_queue, _provision_logs) = harness().await;
        let outcome = reconciler.reconcile(&ResourceKey::new("default", "ghost")).await;
        assert_eq!(outcome, Outcome::Success);
    }
}
