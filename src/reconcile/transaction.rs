//! TransactionReconciler (§4.4.4): `Pending -> Broadcast -> Confirmed|Failed`.
//! The source's implementation of this subsystem is explicitly partial
//! (spec.md §9); this realizes the documented intended contract in full.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use tracing::Instrument;

use super::{Outcome, Reconciler};
use crate::chain::ChainClient;
use crate::metadata::ResourceKey;
use crate::model::node::NodePhase;
use crate::model::transaction::TransactionPhase;
use crate::store::Store;
use crate::workqueue::WorkQueue;

#[async_trait]
pub trait TxBroadcaster: Send + Sync {
    async fn broadcast(&self, node: &crate::model::Node, tx: &crate::model::Transaction) -> crate::error::Result<String>;
    async fn tx_status(&self, node: &crate::model::Node, tx_hash: &str) -> crate::error::Result<Option<(u64, u64)>>;
}

/// Default [`TxBroadcaster`]: speaks the Tendermint RPC JSON-RPC dialect
/// that [`crate::health::HealthController`] already probes, so signing is
/// someone else's problem (§1 excludes cryptography) and this collaborator
/// only ever forwards bytes the caller already signed.
pub struct TendermintTxBroadcaster {
    http: reqwest::Client,
}

impl TendermintTxBroadcaster {
    pub fn new() -> Self {
        Self { http: reqwest::Client::new() }
    }

    fn rpc_base(node: &crate::model::Node) -> String {
        format!("http://127.0.0.1:{}", crate::subnet::PortOffset::for_index(node.spec.index).rpc)
    }
}

impl Default for TendermintTxBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(serde::Deserialize)]
struct RpcEnvelope<T> {
    result: Option<T>,
}

#[derive(serde::Deserialize)]
struct BroadcastResult {
    hash: String,
    code: u32,
    log: String,
}

#[derive(serde::Deserialize)]
struct TxQueryResult {
    height: String,
    tx_result: TxResult,
}

#[derive(serde::Deserialize)]
struct TxResult {
    code: u32,
    gas_used: String,
    log: String,
}

#[async_trait]
impl TxBroadcaster for TendermintTxBroadcaster {
    async fn broadcast(&self, node: &crate::model::Node, tx: &crate::model::Transaction) -> crate::error::Result<String> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "broadcast_tx_sync",
            "params": { "tx": base64::engine::general_purpose::STANDARD.encode(&tx.spec.payload) },
        });
        let resp: RpcEnvelope<BroadcastResult> =
            self.http.post(format!("{}/", Self::rpc_base(node))).json(&body).send().await?.json().await?;
        let result = resp.result.ok_or_else(|| crate::error::Error::Unavailable("broadcast_tx_sync returned no result".to_string()))?;
        if result.code != 0 {
            return Err(crate::error::Error::FailedPrecondition(format!("tx rejected: code {} {}", result.code, result.log)));
        }
        Ok(result.hash)
    }

    async fn tx_status(&self, node: &crate::model::Node, tx_hash: &str) -> crate::error::Result<Option<(u64, u64)>> {
        let url = format!("{}/tx?hash=0x{tx_hash}", Self::rpc_base(node));
        let resp = self.http.get(&url).send().await?;
        if !resp.status().is_success() {
            return Ok(None);
        }
        let envelope: RpcEnvelope<TxQueryResult> = resp.json().await?;
        let Some(result) = envelope.result else { return Ok(None) };
        if result.tx_result.code != 0 {
            return Err(crate::error::Error::FailedPrecondition(format!("tx failed on-chain: {}", result.tx_result.log)));
        }
        let height: u64 = result.height.parse().unwrap_or(0);
        let gas_used: u64 = result.tx_result.gas_used.parse().unwrap_or(0);
        Ok(Some((height, gas_used)))
    }
}

pub struct TransactionReconciler {
    store: Arc<dyn Store>,
    broadcaster: Arc<dyn TxBroadcaster>,
    self_queue: Arc<WorkQueue<ResourceKey>>,
}

impl TransactionReconciler {
    pub fn new(store: Arc<dyn Store>, broadcaster: Arc<dyn TxBroadcaster>, self_queue: Arc<WorkQueue<ResourceKey>>) -> Self {
        Self { store, broadcaster, self_queue }
    }
}

#[async_trait]
impl Reconciler for TransactionReconciler {
    async fn reconcile(&self, key: &ResourceKey) -> Outcome {
        let span = tracing::info_span!("reconcile", kind = "transaction", namespace = %key.namespace, name = %key.name);
        async {
            let mut tx = match self.store.get_transaction(key).await {
                Ok(t) => t,
                Err(e) if e.is_not_found() => return Outcome::Success,
                Err(e) => return Outcome::Retry(e.to_string()),
            };
            if tx.is_terminal() {
                return Outcome::Success;
            }

            let devnet_key = tx.spec.devnet_ref.clone();
            let nodes = self.store.list_nodes(&devnet_key.namespace, &devnet_key.name).await.unwrap_or_default();
            let runner = match nodes.into_iter().find(|n| n.status.phase == NodePhase::Running) {
                Some(n) => n,
                None => {
                    requeue_after(&self.self_queue, key.clone(), Duration::from_millis(500));
                    return Outcome::Retry("no running node to broadcast through".to_string());
                }
            };

            match tx.status.phase {
                TransactionPhase::Pending => match self.broadcaster.broadcast(&runner, &tx).await {
                    Ok(hash) => {
                        tx.status.phase = TransactionPhase::Broadcast;
                        tx.status.tx_hash = Some(hash);
                    }
                    Err(e) => {
                        tx.status.error = Some(e.to_string());
                        let _ = self.store.update_transaction(tx).await;
                        return Outcome::Retry(e.to_string());
                    }
                },
                TransactionPhase::Broadcast => {
                    let hash = match tx.status.tx_hash.clone() {
                        Some(h) => h,
                        None => {
                            tx.status.phase = TransactionPhase::Pending;
                            let _ = self.store.update_transaction(tx).await;
                            return Outcome::Retry("broadcast phase with no tx hash, retrying".to_string());
                        }
                    };
                    match self.broadcaster.tx_status(&runner, &hash).await {
                        Ok(Some((height, gas_used))) => {
                            tx.status.phase = TransactionPhase::Confirmed;
                            tx.status.height = height;
                            tx.status.gas_used = gas_used;
                        }
                        Ok(None) => {
                            requeue_after(&self.self_queue, key.clone(), Duration::from_secs(1));
                            let _ = self.store.update_transaction(tx).await;
                            return Outcome::Success;
                        }
                        Err(e) => {
                            tx.status.phase = TransactionPhase::Failed;
                            tx.status.error = Some(e.to_string());
                        }
                    }
                }
                TransactionPhase::Confirmed | TransactionPhase::Failed => unreachable!("filtered above by is_terminal"),
            }

            if let Err(e) = self.store.update_transaction(tx).await {
                return Outcome::Retry(e.to_string());
            }
            Outcome::Success
        }
        .instrument(span)
        .await
    }
}

fn requeue_after(queue: &Arc<WorkQueue<ResourceKey>>, key: ResourceKey, delay: Duration) {
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
    use crate::model::node::{DesiredRunState, NodeRole, NodeSpec};
    use crate::model::{Node, Transaction, TransactionSpec};
    use crate::store::MemoryStore;

    struct FakeBroadcaster;

    #[async_trait]
    impl TxBroadcaster for FakeBroadcaster {
        async fn broadcast(&self, _node: &Node, _tx: &Transaction) -> crate::error::Result<String> {
            Ok("0xhash".to_string())
        }
        async fn tx_status(&self, _node: &Node, _tx_hash: &str) -> crate::error::Result<Option<(u64, u64)>> {
            Ok(Some((42, 21000)))
        }
    }

    async fn seed(store: &Arc<dyn Store>) -> ResourceKey {
        let mut node = Node::new(
            Metadata::new("dev-1-0", "default"),
            NodeSpec {
                devnet_ref: ResourceKey::new("default", "dev-1"),
                index: 0,
                role: NodeRole::Validator,
                binary_path: "/bin/chaind".to_string(),
                home_dir: "/tmp/home".to_string(),
                desired: DesiredRunState::Running,
            },
        );
        node.status.phase = NodePhase::Running;
        store.create_node(node).await.unwrap();

        let tx = Transaction::new(
            Metadata::new("tx-1", "default"),
            TransactionSpec {
                devnet_ref: ResourceKey::new("default", "dev-1"),
                tx_type: "bank-send".to_string(),
                signer: "alice".to_string(),
                payload: vec![1, 2, 3],
                gas_limit: 200_000,
                memo: String::new(),
            },
        );
        let key = tx.metadata.key();
        store.create_transaction(tx).await.unwrap();
        key
    }

    #[tokio::test]
    async fn pending_to_broadcast_then_confirmed() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let key = seed(&store).await;
        let reconciler = TransactionReconciler::new(store.clone(), Arc::new(FakeBroadcaster), WorkQueue::new());

        reconciler.reconcile(&key).await;
        assert_eq!(store.get_transaction(&key).await.unwrap().status.phase, TransactionPhase::Broadcast);

        reconciler.reconcile(&key).await;
        let reloaded = store.get_transaction(&key).await.unwrap();
        assert_eq!(reloaded.status.phase, TransactionPhase::Confirmed);
        assert_eq!(reloaded.status.height, 42);
    }

    #[tokio::test]
    async fn terminal_transaction_is_not_reprocessed() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let key = seed(&store).await;
        let mut tx = store.get_transaction(&key).await.unwrap();
        tx.status.phase = TransactionPhase::Failed;
        store.update_transaction(tx).await.unwrap();

        let reconciler = TransactionReconciler::new(store.clone(), Arc::new(FakeBroadcaster), WorkQueue::new());
        let outcome = reconciler.reconcile(&key).await;
        assert_eq!(outcome, Outcome::Success);
    }
}
