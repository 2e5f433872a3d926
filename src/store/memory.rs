//! In-memory [`Store`] implementation used by tests and by any reconciler
//! unit test that wants a real store without touching the filesystem.

use async_trait::async_trait;
use parking_lot::RwLock;

use super::tables::{self, Tables};
use super::Store;
use crate::error::Result;
use crate::metadata::{LabelSelector, ResourceKey};
use crate::model::{Devnet, Node, Transaction, TransactionPhase, Upgrade};

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_devnet(&self, devnet: Devnet) -> Result<Devnet> {
        let key = devnet.metadata.key();
        tables::create(&mut self.tables.write().devnets, "devnet", key, devnet)
    }

    async fn get_devnet(&self, key: &ResourceKey) -> Result<Devnet> {
        tables::get(&self.tables.read().devnets, "devnet", key)
    }

    async fn update_devnet(&self, devnet: Devnet) -> Result<Devnet> {
        let key = devnet.metadata.key();
        tables::update(&mut self.tables.write().devnets, "devnet", key, devnet)
    }

    async fn delete_devnet(&self, key: &ResourceKey) -> Result<Devnet> {
        tables::remove(&mut self.tables.write().devnets, "devnet", key)
    }

    async fn list_devnets(&self, namespace: &str, selector: &LabelSelector) -> Result<Vec<Devnet>> {
        Ok(tables::list_devnets(&self.tables.read().devnets, namespace, selector))
    }

    async fn create_node(&self, node: Node) -> Result<Node> {
        let key = node.metadata.key();
        tables::create(&mut self.tables.write().nodes, "node", key, node)
    }

    async fn get_node(&self, key: &ResourceKey) -> Result<Node> {
        tables::get(&self.tables.read().nodes, "node", key)
    }

    async fn update_node(&self, node: Node) -> Result<Node> {
        let key = node.metadata.key();
        tables::update(&mut self.tables.write().nodes, "node", key, node)
    }

    async fn delete_node(&self, key: &ResourceKey) -> Result<Node> {
        tables::remove(&mut self.tables.write().nodes, "node", key)
    }

    async fn list_nodes(&self, namespace: &str, devnet_name: &str) -> Result<Vec<Node>> {
        Ok(tables::list_nodes(&self.tables.read().nodes, namespace, devnet_name))
    }

    async fn list_all_nodes(&self) -> Result<Vec<Node>> {
        Ok(tables::list_all_nodes(&self.tables.read().nodes))
    }

    async fn delete_nodes_by_devnet(&self, namespace: &str, devnet_name: &str) -> usize {
        tables::delete_nodes_by_devnet(&mut self.tables.write().nodes, namespace, devnet_name)
    }

    async fn create_upgrade(&self, upgrade: Upgrade) -> Result<Upgrade> {
        let key = upgrade.metadata.key();
        tables::create(&mut self.tables.write().upgrades, "upgrade", key, upgrade)
    }

    async fn get_upgrade(&self, key: &ResourceKey) -> Result<Upgrade> {
        tables::get(&self.tables.read().upgrades, "upgrade", key)
    }

    async fn update_upgrade(&self, upgrade: Upgrade) -> Result<Upgrade> {
        let key = upgrade.metadata.key();
        tables::update(&mut self.tables.write().upgrades, "upgrade", key, upgrade)
    }

    async fn delete_upgrade(&self, key: &ResourceKey) -> Result<Upgrade> {
        tables::remove(&mut self.tables.write().upgrades, "upgrade", key)
    }

    async fn list_upgrades(&self, namespace: &str, devnet_name: &str) -> Result<Vec<Upgrade>> {
        Ok(tables::list_upgrades(&self.tables.read().upgrades, namespace, devnet_name))
    }

    async fn delete_upgrades_by_devnet(&self, namespace: &str, devnet_name: &str) -> usize {
        tables::delete_upgrades_by_devnet(&mut self.tables.write().upgrades, namespace, devnet_name)
    }

    async fn create_transaction(&self, tx: Transaction) -> Result<Transaction> {
        let key = tx.metadata.key();
        tables::create(&mut self.tables.write().transactions, "transaction", key, tx)
    }

    async fn get_transaction(&self, key: &ResourceKey) -> Result<Transaction> {
        tables::get(&self.tables.read().transactions, "transaction", key)
    }

    async fn update_transaction(&self, tx: Transaction) -> Result<Transaction> {
        let key = tx.metadata.key();
        tables::update(&mut self.tables.write().transactions, "transaction", key, tx)
    }

    async fn list_transactions(
        &self,
        namespace: &str,
        devnet_name: &str,
        phase_filter: Option<TransactionPhase>,
    ) -> Result<Vec<Transaction>> {
        Ok(tables::list_transactions(&self.tables.read().transactions, namespace, devnet_name, phase_filter))
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::Metadata;
    use crate::model::{DevnetMode, DevnetSpec, GenesisOverrides, GenesisSource};

    fn devnet(name: &str) -> Devnet {
        Devnet::new(
            Metadata::new(name, "default"),
            DevnetSpec {
                plugin: "cosmos-sdk".to_string(),
                network_type: "testnet".to_string(),
                validators: 1,
                full_nodes: 0,
                mode: DevnetMode::Local,
                binary_source: "v1.0.0".to_string(),
                genesis_source: GenesisSource::Generate,
                genesis_overrides: GenesisOverrides::default(),
                desired: Default::default(),
            },
        )
    }

    #[tokio::test]
    async fn create_is_rejected_on_duplicate_key() {
        let store = MemoryStore::new();
        store.create_devnet(devnet("dev-1")).await.unwrap();
        let err = store.create_devnet(devnet("dev-1")).await.unwrap_err();
        assert!(err.is_already_exists());
    }

    #[tokio::test]
    async fn get_missing_returns_not_found_sentinel() {
        let store = MemoryStore::new();
        let err = store.get_devnet(&ResourceKey::new("default", "missing")).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn delete_cascades_to_nodes() {
        let store = MemoryStore::new();
        store.create_devnet(devnet("dev-1")).await.unwrap();
        for i in 0..3 {
            let mut n = Node::new(
                Metadata::new(format!("dev-1-{i}"), "default"),
                crate::model::NodeSpec {
                    devnet_ref: ResourceKey::new("default", "dev-1"),
                    index: i,
                    role: crate::model::NodeRole::Validator,
                    binary_path: "/bin/chaind".to_string(),
                    home_dir: "/tmp/home".to_string(),
                    desired: crate::model::DesiredRunState::Running,
                },
            );
            n.metadata.name = format!("dev-1-{i}");
            store.create_node(n).await.unwrap();
        }
        assert_eq!(store.list_nodes("default", "dev-1").await.unwrap().len(), 3);
        let removed = store.delete_nodes_by_devnet("default", "dev-1").await;
        assert_eq!(removed, 3);
        assert!(store.list_nodes("default", "dev-1").await.unwrap().is_empty());
    }
}
