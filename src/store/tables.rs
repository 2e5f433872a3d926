//! Shared in-memory table layout and generic CRUD helpers used by both
//! [`super::MemoryStore`] and [`super::DiskStore`]; the disk variant wraps
//! the same [`Tables`] behind a write-through persist step.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::metadata::{LabelSelector, ResourceKey, WithMetadata};
use crate::model::{Devnet, Node, Transaction, TransactionPhase, Upgrade};

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Tables {
    pub devnets: BTreeMap<ResourceKey, Devnet>,
    pub nodes: BTreeMap<ResourceKey, Node>,
    pub upgrades: BTreeMap<ResourceKey, Upgrade>,
    pub transactions: BTreeMap<ResourceKey, Transaction>,
}

pub fn create<T>(table: &mut BTreeMap<ResourceKey, T>, kind: &'static str, key: ResourceKey, value: T) -> Result<T>
where
    T: Clone,
{
    if table.contains_key(&key) {
        return Err(Error::already_exists(kind, key.namespace, key.name));
    }
    table.insert(key, value.clone());
    Ok(value)
}

pub fn get<T>(table: &BTreeMap<ResourceKey, T>, kind: &'static str, key: &ResourceKey) -> Result<T>
where
    T: Clone,
{
    table
        .get(key)
        .cloned()
        .ok_or_else(|| Error::not_found(kind, key.namespace.clone(), key.name.clone()))
}

pub fn update<T>(table: &mut BTreeMap<ResourceKey, T>, kind: &'static str, key: ResourceKey, mut value: T) -> Result<T>
where
    T: Clone + WithMetadata,
{
    if !table.contains_key(&key) {
        return Err(Error::not_found(kind, key.namespace, key.name));
    }
    value.metadata_mut().touch();
    table.insert(key, value.clone());
    Ok(value)
}

pub fn remove<T>(table: &mut BTreeMap<ResourceKey, T>, kind: &'static str, key: &ResourceKey) -> Result<T>
where
    T: Clone,
{
    table
        .remove(key)
        .ok_or_else(|| Error::not_found(kind, key.namespace.clone(), key.name.clone()))
}

/// `BTreeMap` iteration is already ordered by `(namespace, name)`, which
/// keeps list responses deterministic across calls (§4.8).
pub fn list_devnets(table: &BTreeMap<ResourceKey, Devnet>, namespace: &str, selector: &LabelSelector) -> Vec<Devnet> {
    table
        .values()
        .filter(|d| d.metadata.namespace == namespace && selector.matches(&d.metadata.labels))
        .cloned()
        .collect()
}

pub fn list_nodes(table: &BTreeMap<ResourceKey, Node>, namespace: &str, devnet_name: &str) -> Vec<Node> {
    table
        .values()
        .filter(|n| n.metadata.namespace == namespace && n.spec.devnet_ref.name == devnet_name)
        .cloned()
        .collect()
}

/// Every node across every namespace and devnet; the HealthController scans
/// the whole fleet on each tick rather than one devnet at a time (§4.5).
pub fn list_all_nodes(table: &BTreeMap<ResourceKey, Node>) -> Vec<Node> {
    table.values().cloned().collect()
}

pub fn list_upgrades(table: &BTreeMap<ResourceKey, Upgrade>, namespace: &str, devnet_name: &str) -> Vec<Upgrade> {
    table
        .values()
        .filter(|u| u.metadata.namespace == namespace && u.spec.devnet_ref.name == devnet_name)
        .cloned()
        .collect()
}

pub fn list_transactions(
    table: &BTreeMap<ResourceKey, Transaction>,
    namespace: &str,
    devnet_name: &str,
    phase_filter: Option<TransactionPhase>,
) -> Vec<Transaction> {
    table
        .values()
        .filter(|t| t.metadata.namespace == namespace && t.spec.devnet_ref.name == devnet_name)
        .filter(|t| phase_filter.map(|p| t.status.phase == p).unwrap_or(true))
        .cloned()
        .collect()
}

pub fn delete_nodes_by_devnet(table: &mut BTreeMap<ResourceKey, Node>, namespace: &str, devnet_name: &str) -> usize {
    let victims: Vec<ResourceKey> = table
        .values()
        .filter(|n| n.metadata.namespace == namespace && n.spec.devnet_ref.name == devnet_name)
        .map(|n| n.metadata.key())
        .collect();
    for key in &victims {
        table.remove(key);
    }
    victims.len()
}

pub fn delete_upgrades_by_devnet(
    table: &mut BTreeMap<ResourceKey, Upgrade>,
    namespace: &str,
    devnet_name: &str,
) -> usize {
    let victims: Vec<ResourceKey> = table
        .values()
        .filter(|u| u.metadata.namespace == namespace && u.spec.devnet_ref.name == devnet_name)
        .map(|u| u.metadata.key())
        .collect();
    for key in &victims {
        table.remove(key);
    }
    victims.len()
}
