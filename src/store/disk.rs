//! Durable on-disk [`Store`] implementation (§6, persisted state layout).
//!
//! The whole resource table set is kept in memory behind a `parking_lot`
//! lock, same as [`super::MemoryStore`]; every mutation is additionally
//! persisted to a single `store.json` file under `$DATA_DIR` via a
//! temp-file-plus-rename so a crash mid-write never leaves a torn file.

use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use fs2::FileExt;
use parking_lot::RwLock;

use super::tables::{self, Tables};
use super::Store;
use crate::error::{Error, Result};
use crate::metadata::{LabelSelector, ResourceKey};
use crate::model::{Devnet, Node, Transaction, TransactionPhase, Upgrade};

const STORE_FILE: &str = "store.json";
const LOCK_FILE: &str = "devnetd.lock";

pub struct DiskStore {
    tables: Arc<RwLock<Tables>>,
    path: PathBuf,
    /// Held exclusively for the lifetime of the store; released when this is
    /// dropped or the process exits. Only its existence matters, never read.
    _lock: std::fs::File,
}

impl DiskStore {
    /// Loads `store.json` from `data_dir` if present, otherwise starts
    /// empty. `data_dir` is created if missing. Fails fast if another
    /// `devnetd` process already holds `data_dir`'s lock file, rather than
    /// letting two daemons race to overwrite the same `store.json`.
    pub async fn open(data_dir: impl AsRef<Path>) -> Result<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        let path = data_dir.join(STORE_FILE);
        let (loaded, lock) = tokio::task::spawn_blocking({
            let data_dir = data_dir.clone();
            let path = path.clone();
            move || -> Result<(Tables, std::fs::File)> {
                std::fs::create_dir_all(&data_dir)?;
                let lock_file = std::fs::OpenOptions::new().write(true).create(true).open(data_dir.join(LOCK_FILE))?;
                lock_file.try_lock_exclusive().map_err(|_| {
                    Error::precondition(format!("{} is already locked by another devnetd process", data_dir.display()))
                })?;
                let tables = match std::fs::read(&path) {
                    Ok(bytes) => serde_json::from_slice(&bytes)?,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Tables::default(),
                    Err(e) => return Err(Error::from(e)),
                };
                Ok((tables, lock_file))
            }
        })
        .await
        .map_err(|e| Error::Internal(format!("store load task panicked: {e}")))??;

        Ok(Self { tables: Arc::new(RwLock::new(loaded)), path, _lock: lock })
    }

    /// Writes the whole table set atomically: a sibling `.tmp` file is
    /// written and fsynced, then renamed over `store.json`. The rename is
    /// the single commit point (§4.1 atomicity).
    fn persist(&self) -> Result<()> {
        let snapshot = serde_json::to_vec_pretty(&*self.tables.read())?;
        let tmp_path = self.path.with_extension("json.tmp");
        let mut tmp = std::fs::OpenOptions::new().write(true).create(true).truncate(true).open(&tmp_path)?;
        tmp.write_all(&snapshot)?;
        tmp.sync_all()?;
        drop(tmp);
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

macro_rules! mutate_and_persist {
    ($self:expr, $body:expr) => {{
        let result = $body;
        if result.is_ok() {
            $self.persist()?;
        }
        result
    }};
}

#[async_trait]
impl Store for DiskStore {
    async fn create_devnet(&self, devnet: Devnet) -> Result<Devnet> {
        let key = devnet.metadata.key();
        mutate_and_persist!(self, tables::create(&mut self.tables.write().devnets, "devnet", key, devnet))
    }

    async fn get_devnet(&self, key: &ResourceKey) -> Result<Devnet> {
        tables::get(&self.tables.read().devnets, "devnet", key)
    }

    async fn update_devnet(&self, devnet: Devnet) -> Result<Devnet> {
        let key = devnet.metadata.key();
        mutate_and_persist!(self, tables::update(&mut self.tables.write().devnets, "devnet", key, devnet))
    }

    async fn delete_devnet(&self, key: &ResourceKey) -> Result<Devnet> {
        mutate_and_persist!(self, tables::remove(&mut self.tables.write().devnets, "devnet", key))
    }

    async fn list_devnets(&self, namespace: &str, selector: &LabelSelector) -> Result<Vec<Devnet>> {
        Ok(tables::list_devnets(&self.tables.read().devnets, namespace, selector))
    }

    async fn create_node(&self, node: Node) -> Result<Node> {
        let key = node.metadata.key();
        mutate_and_persist!(self, tables::create(&mut self.tables.write().nodes, "node", key, node))
    }

    async fn get_node(&self, key: &ResourceKey) -> Result<Node> {
        tables::get(&self.tables.read().nodes, "node", key)
    }

    async fn update_node(&self, node: Node) -> Result<Node> {
        let key = node.metadata.key();
        mutate_and_persist!(self, tables::update(&mut self.tables.write().nodes, "node", key, node))
    }

    async fn delete_node(&self, key: &ResourceKey) -> Result<Node> {
        mutate_and_persist!(self, tables::remove(&mut self.tables.write().nodes, "node", key))
    }

    async fn list_nodes(&self, namespace: &str, devnet_name: &str) -> Result<Vec<Node>> {
        Ok(tables::list_nodes(&self.tables.read().nodes, namespace, devnet_name))
    }

    async fn list_all_nodes(&self) -> Result<Vec<Node>> {
        Ok(tables::list_all_nodes(&self.tables.read().nodes))
    }

    async fn delete_nodes_by_devnet(&self, namespace: &str, devnet_name: &str) -> usize {
        let removed = tables::delete_nodes_by_devnet(&mut self.tables.write().nodes, namespace, devnet_name);
        if removed > 0 {
            if let Err(e) = self.persist() {
                tracing::warn!(error = %e, "failed to persist store after cascade delete");
            }
        }
        removed
    }

    async fn create_upgrade(&self, upgrade: Upgrade) -> Result<Upgrade> {
        let key = upgrade.metadata.key();
        mutate_and_persist!(self, tables::create(&mut self.tables.write().upgrades, "upgrade", key, upgrade))
    }

    async fn get_upgrade(&self, key: &ResourceKey) -> Result<Upgrade> {
        tables::get(&self.tables.read().upgrades, "upgrade", key)
    }

    async fn update_upgrade(&self, upgrade: Upgrade) -> Result<Upgrade> {
        let key = upgrade.metadata.key();
        mutate_and_persist!(self, tables::update(&mut self.tables.write().upgrades, "upgrade", key, upgrade))
    }

    async fn delete_upgrade(&self, key: &ResourceKey) -> Result<Upgrade> {
        mutate_and_persist!(self, tables::remove(&mut self.tables.write().upgrades, "upgrade", key))
    }

    async fn list_upgrades(&self, namespace: &str, devnet_name: &str) -> Result<Vec<Upgrade>> {
        Ok(tables::list_upgrades(&self.tables.read().upgrades, namespace, devnet_name))
    }

    async fn delete_upgrades_by_devnet(&self, namespace: &str, devnet_name: &str) -> usize {
        let removed = tables::delete_upgrades_by_devnet(&mut self.tables.write().upgrades, namespace, devnet_name);
        if removed > 0 {
            if let Err(e) = self.persist() {
                tracing::warn!(error = %e, "failed to persist store after cascade delete");
            }
        }
        removed
    }

    async fn create_transaction(&self, tx: Transaction) -> Result<Transaction> {
        let key = tx.metadata.key();
        mutate_and_persist!(self, tables::create(&mut self.tables.write().transactions, "transaction", key, tx))
    }

    async fn get_transaction(&self, key: &ResourceKey) -> Result<Transaction> {
        tables::get(&self.tables.read().transactions, "transaction", key)
    }

    async fn update_transaction(&self, tx: Transaction) -> Result<Transaction> {
        let key = tx.metadata.key();
        mutate_and_persist!(self, tables::update(&mut self.tables.write().transactions, "transaction", key, tx))
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
        self.persist()
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
    async fn survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = DiskStore::open(dir.path()).await.unwrap();
            store.create_devnet(devnet("dev-1")).await.unwrap();
        }
        let reopened = DiskStore::open(dir.path()).await.unwrap();
        let loaded = reopened.get_devnet(&ResourceKey::new("default", "dev-1")).await.unwrap();
        assert_eq!(loaded.metadata.name, "dev-1");
    }

    #[tokio::test]
    async fn opens_empty_on_fresh_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskStore::open(dir.path()).await.unwrap();
        assert!(store.list_devnets("default", &LabelSelector::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn second_open_of_same_directory_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let _first = DiskStore::open(dir.path()).await.unwrap();
        let second = DiskStore::open(dir.path()).await;
        assert!(second.is_err());
    }
}
