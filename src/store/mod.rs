//! The declarative resource store (§4.1).
//!
//! `Store` is the sole piece of shared mutable state in the daemon; every
//! reconciler and every RPC handler reaches it through this trait rather
//! than holding its own copy of resource state. Two implementations satisfy
//! the contract: [`memory::MemoryStore`] (tests) and [`disk::DiskStore`]
//! (production, durable across restarts).

mod disk;
mod memory;
mod tables;

pub use disk::DiskStore;
pub use memory::MemoryStore;

use async_trait::async_trait;

use crate::error::Result;
use crate::metadata::{LabelSelector, ResourceKey};
use crate::model::{Devnet, Node, Transaction, TransactionPhase, Upgrade};

#[async_trait]
pub trait Store: Send + Sync {
    async fn create_devnet(&self, devnet: Devnet) -> Result<Devnet>;
    async fn get_devnet(&self, key: &ResourceKey) -> Result<Devnet>;
    async fn update_devnet(&self, devnet: Devnet) -> Result<Devnet>;
    async fn delete_devnet(&self, key: &ResourceKey) -> Result<Devnet>;
    async fn list_devnets(&self, namespace: &str, selector: &LabelSelector) -> Result<Vec<Devnet>>;

    async fn create_node(&self, node: Node) -> Result<Node>;
    async fn get_node(&self, key: &ResourceKey) -> Result<Node>;
    async fn update_node(&self, node: Node) -> Result<Node>;
    async fn delete_node(&self, key: &ResourceKey) -> Result<Node>;
    async fn list_nodes(&self, namespace: &str, devnet_name: &str) -> Result<Vec<Node>>;
    /// Every node across every namespace and devnet (§4.5 step 1: the
    /// HealthController scans the whole fleet on each tick, not one devnet's
    /// worth of nodes at a time).
    async fn list_all_nodes(&self) -> Result<Vec<Node>>;
    /// Best-effort cascade helper (§4.1): callers treat partial failure as a
    /// warning and proceed with the parent delete regardless.
    async fn delete_nodes_by_devnet(&self, namespace: &str, devnet_name: &str) -> usize;

    async fn create_upgrade(&self, upgrade: Upgrade) -> Result<Upgrade>;
    async fn get_upgrade(&self, key: &ResourceKey) -> Result<Upgrade>;
    async fn update_upgrade(&self, upgrade: Upgrade) -> Result<Upgrade>;
    async fn delete_upgrade(&self, key: &ResourceKey) -> Result<Upgrade>;
    async fn list_upgrades(&self, namespace: &str, devnet_name: &str) -> Result<Vec<Upgrade>>;
    async fn delete_upgrades_by_devnet(&self, namespace: &str, devnet_name: &str) -> usize;

    async fn create_transaction(&self, tx: Transaction) -> Result<Transaction>;
    async fn get_transaction(&self, key: &ResourceKey) -> Result<Transaction>;
    async fn update_transaction(&self, tx: Transaction) -> Result<Transaction>;
    async fn list_transactions(
        &self,
        namespace: &str,
        devnet_name: &str,
        phase_filter: Option<TransactionPhase>,
    ) -> Result<Vec<Transaction>>;

    /// Must be called only after every controller worker has stopped (§4.1).
    async fn close(&self) -> Result<()>;
}
