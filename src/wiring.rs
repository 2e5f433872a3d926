//! Startup composition root (§4.10, §4.11, §9).
//!
//! Nothing here is reached for through global state: every collaborator is
//! constructed once and threaded explicitly into the pieces that need it,
//! matching the Design Notes' rejection of the global-registry
//! anti-pattern. `run` is the only thing `main` calls.

use std::sync::Arc;

use crate::apikeys::ApiKeyStore;
use crate::chain::CliChainClient;
use crate::config::Config;
use crate::controller::ControllerManager;
use crate::error::Result;
use crate::grpc::GrpcState;
use crate::health::{HealthConfig, HealthController};
use crate::model::Kind;
use crate::network::cosmos::CosmosSdkModule;
use crate::network::NetworkRegistry;
use crate::orchestrator::ShellOrchestrator;
use crate::provision_log::ProvisionLogHub;
use crate::reconcile::devnet::DevnetReconciler;
use crate::reconcile::node::NodeReconciler;
use crate::reconcile::transaction::{TendermintTxBroadcaster, TransactionReconciler};
use crate::reconcile::upgrade::UpgradeReconciler;
use crate::runtime::ProcessRuntime;
use crate::store::{DiskStore, Store};
use crate::subnet::SubnetAllocator;
use crate::workqueue::WorkQueue;

fn default_network_registry() -> NetworkRegistry {
    let mut registry = NetworkRegistry::new();
    registry.register(Box::new(CosmosSdkModule::new("gaia", "gaiad", "cosmos", "uatom")));
    registry.register(Box::new(CosmosSdkModule::new("osmosis", "osmosisd", "osmo", "uosmo")));
    registry
}

/// Builds every collaborator, starts the reconciler workers and the health
/// loop, and serves gRPC until `shutdown` resolves. Returns once every
/// worker has drained and the Store has been closed (§8 property 7).
pub async fn run(config: Config, shutdown: tokio::sync::oneshot::Receiver<()>) -> Result<()> {
    let store: Arc<dyn Store> = Arc::new(DiskStore::open(&config.data_dir).await?);
    let subnets = Arc::new(SubnetAllocator::open(&config.data_dir).await?);
    let networks = Arc::new(default_network_registry());
    let api_keys = Arc::new(ApiKeyStore::open(&config.api_keys_path).await?);
    let provision_logs = Arc::new(ProvisionLogHub::new());

    let orchestrator: Arc<dyn crate::orchestrator::Orchestrator> = Arc::new(ShellOrchestrator::new(config.data_dir.join("bin")));
    let runtime: Arc<dyn crate::runtime::NodeRuntime> = Arc::new(ProcessRuntime::new());
    let chain: Arc<dyn crate::chain::ChainClient> = Arc::new(CliChainClient::new());
    let broadcaster: Arc<dyn crate::reconcile::transaction::TxBroadcaster> = Arc::new(TendermintTxBroadcaster::new());

    let devnet_queue = WorkQueue::new();
    let node_queue = WorkQueue::new();
    let upgrade_queue = WorkQueue::new();
    let transaction_queue = WorkQueue::new();

    let mut controller = ControllerManager::new(config.workers);
    controller.register_with_queue(
        Kind::Devnet,
        Arc::new(DevnetReconciler::new(
            store.clone(),
            networks.clone(),
            subnets.clone(),
            orchestrator.clone(),
            provision_logs.clone(),
            devnet_queue.clone(),
            node_queue.clone(),
        )),
        devnet_queue.clone(),
    );
    controller.register_with_queue(
        Kind::Node,
        Arc::new(NodeReconciler::new(store.clone(), runtime.clone(), networks.clone(), node_queue.clone(), devnet_queue.clone(), true)),
        node_queue.clone(),
    );
    controller.register_with_queue(
        Kind::Upgrade,
        Arc::new(UpgradeReconciler::new(store.clone(), chain.clone(), upgrade_queue.clone(), node_queue.clone())),
        upgrade_queue.clone(),
    );
    controller.register_with_queue(
        Kind::Transaction,
        Arc::new(TransactionReconciler::new(store.clone(), broadcaster.clone(), transaction_queue.clone())),
        transaction_queue.clone(),
    );
    let controller = Arc::new(controller);
    controller.start().await;

    let health_config =
        HealthConfig { interval: config.health_interval, probe_timeout: config.health_probe_timeout, failure_threshold: config.health_failure_threshold, ..Default::default() };
    let health = Arc::new(HealthController::new(store.clone(), node_queue.clone(), health_config));
    let (health_shutdown_tx, health_shutdown_rx) = tokio::sync::oneshot::channel();
    let health_handle = tokio::spawn(health.run(health_shutdown_rx));

    tracing::debug!(plugins_dir = %config.plugins_dir.display(), "dynamic plugin loading is not implemented; using the compiled-in network registry");

    let grpc_state =
        Arc::new(GrpcState { store: store.clone(), controller: controller.clone(), runtime, chain, broadcaster, networks, subnets: subnets.clone(), provision_logs });

    let (unix_shutdown_tx, unix_shutdown_rx) = tokio::sync::oneshot::channel();
    let unix_socket_path = config.bind_socket.clone();
    let unix_state = grpc_state.clone();
    let unix_handle = tokio::spawn(async move { crate::grpc::serve_unix(&unix_socket_path, unix_state, unix_shutdown_rx).await });

    let tcp_handle = if let Some(addr) = config.bind_tcp.clone() {
        let socket_addr: std::net::SocketAddr =
            addr.parse().map_err(|e| crate::error::Error::validation(format!("invalid bind_tcp address {addr:?}: {e}")))?;
        let (tx, rx) = tokio::sync::oneshot::channel();
        let tcp_state = grpc_state.clone();
        let tcp_keys = api_keys.clone();
        let handle = tokio::spawn(async move { crate::grpc::serve_tcp(socket_addr, tcp_state, tcp_keys, rx).await });
        Some((handle, tx))
    } else {
        None
    };

    let _ = shutdown.await;
    tracing::info!("shutdown requested, draining reconciler workers");

    let _ = unix_shutdown_tx.send(());
    let _ = unix_handle.await;
    if let Some((handle, tx)) = tcp_handle {
        let _ = tx.send(());
        let _ = handle.await;
    }
    let _ = health_shutdown_tx.send(());
    let _ = health_handle.await;

    if !controller.stop(std::time::Duration::from_secs(30)).await {
        tracing::warn!("reconciler workers did not drain within the shutdown deadline");
    }
    store.close().await?;
    Ok(())
}
