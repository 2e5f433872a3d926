//! UpgradeReconciler / UpgradeCoordinator (§4.7) — the forward-only
//! `Pending -> Proposing -> Voting -> WaitingForHeight -> Switching ->
//! Verifying -> Completed` state machine, with `*Failed` as the only
//! backward edge and `Failed -> Pending` gated on an explicit `Retry`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::Instrument;

use super::{Outcome, Reconciler};
use crate::chain::ChainClient;
use crate::metadata::ResourceKey;
use crate::model::node::{DesiredRunState, NodePhase, NodeRole};
use crate::model::upgrade::{UpgradePhase, UpgradeStrategy};
use crate::store::Store;
use crate::workqueue::WorkQueue;

const VOTING_TIMEOUT: Duration = Duration::from_secs(600);
const VERIFY_TIMEOUT: Duration = Duration::from_secs(120);
const POLL_DELAY: Duration = Duration::from_millis(200);

pub struct UpgradeReconciler {
    store: Arc<dyn Store>,
    chain: Arc<dyn ChainClient>,
    self_queue: Arc<WorkQueue<ResourceKey>>,
    node_queue: Arc<WorkQueue<ResourceKey>>,
}

impl UpgradeReconciler {
    pub fn new(
        store: Arc<dyn Store>,
        chain: Arc<dyn ChainClient>,
        self_queue: Arc<WorkQueue<ResourceKey>>,
        node_queue: Arc<WorkQueue<ResourceKey>>,
    ) -> Self {
        Self { store, chain, self_queue, node_queue }
    }
}

#[async_trait]
impl Reconciler for UpgradeReconciler {
    async fn reconcile(&self, key: &ResourceKey) -> Outcome {
        let span = tracing::info_span!("reconcile", kind = "upgrade", namespace = %key.namespace, name = %key.name);
        async {
            let mut upgrade = match self.store.get_upgrade(key).await {
                Ok(u) => u,
                Err(e) if e.is_not_found() => return Outcome::Success,
                Err(e) => return Outcome::Retry(e.to_string()),
            };
            let devnet_key = upgrade.spec.devnet_ref.clone();

            match upgrade.status.phase {
                UpgradePhase::Pending => {
                    let devnet = match self.store.get_devnet(&devnet_key).await {
                        Ok(d) => d,
                        Err(e) => return fail(&self.store, upgrade, e.to_string()).await,
                    };
                    if devnet.status.phase != crate::model::DevnetPhase::Running {
                        return fail(&self.store, upgrade, "devnet is not running".to_string()).await;
                    }
                    let siblings = self
                        .store
                        .list_upgrades(&devnet_key.namespace, &devnet_key.name)
                        .await
                        .unwrap_or_default();
                    if siblings.iter().any(|u| u.metadata.key() != *key && !u.status.phase.is_terminal()) {
                        return fail(&self.store, upgrade, "another upgrade is already in progress".to_string()).await;
                    }
                    upgrade.status.phase = match upgrade.spec.strategy {
                        UpgradeStrategy::GovProposal => UpgradePhase::Proposing,
                        UpgradeStrategy::BinarySwap => UpgradePhase::Switching,
                    };
                }
                UpgradePhase::Proposing => {
                    let node = match self.pick_running_node(&devnet_key).await {
                        Ok(n) => n,
                        Err(e) => return Outcome::Retry(e),
                    };
                    if upgrade.status.proposal_id.is_none() {
                        match self.chain.submit_upgrade_proposal(&node, &upgrade.spec.upgrade_name, upgrade.spec.target_height).await {
                            Ok(id) => upgrade.status.proposal_id = Some(id),
                            Err(e) => return Outcome::Retry(e.to_string()),
                        }
                    }
                    upgrade.status.phase = UpgradePhase::Voting;
                    upgrade.status.phase_deadline = Some(Utc::now() + chrono::Duration::from_std(VOTING_TIMEOUT).unwrap());
                }
                UpgradePhase::Voting => {
                    let nodes = self.store.list_nodes(&devnet_key.namespace, &devnet_key.name).await.unwrap_or_default();
                    let proposal_id = match &upgrade.status.proposal_id {
                        Some(id) => id.clone(),
                        None => return fail(&self.store, upgrade, "voting with no proposal id".to_string()).await,
                    };
                    for validator in nodes.iter().filter(|n| n.spec.role == NodeRole::Validator) {
                        if let Err(e) = self.chain.vote_yes(validator, &proposal_id).await {
                            return Outcome::Retry(e.to_string());
                        }
                    }
                    let sample = match nodes.iter().find(|n| n.status.phase == NodePhase::Running) {
                        Some(n) => n.clone(),
                        None => return Outcome::Retry("no running node to check proposal status".to_string()),
                    };
                    match self.chain.proposal_passed(&sample, &proposal_id).await {
                        Ok(true) => {
                            upgrade.status.phase = UpgradePhase::WaitingForHeight;
                            upgrade.status.phase_deadline = None;
                        }
                        Ok(false) => {
                            if upgrade.status.phase_deadline.map(|d| Utc::now() > d).unwrap_or(false) {
                                return fail(&self.store, upgrade, "voting deadline exceeded".to_string()).await;
                            }
                            requeue_after(&self.self_queue, key.clone(), POLL_DELAY);
                            let _ = self.store.update_upgrade(upgrade).await;
                            return Outcome::Success;
                        }
                        Err(e) => return Outcome::Retry(e.to_string()),
                    }
                }
                UpgradePhase::WaitingForHeight => {
                    let node = match self.pick_running_node(&devnet_key).await {
                        Ok(n) => n,
                        Err(e) => return Outcome::Retry(e),
                    };
                    match self.chain.current_height(&node).await {
                        Ok(height) => {
                            upgrade.status.current_height = height;
                            if height >= upgrade.spec.target_height {
                                upgrade.status.phase = UpgradePhase::Switching;
                            } else {
                                requeue_after(&self.self_queue, key.clone(), Duration::from_secs(2));
                                let _ = self.store.update_upgrade(upgrade).await;
                                return Outcome::Success;
                            }
                        }
                        Err(e) => return Outcome::Retry(e.to_string()),
                    }
                }
                UpgradePhase::Switching => {
                    let mut nodes = self.store.list_nodes(&devnet_key.namespace, &devnet_key.name).await.unwrap_or_default();
                    nodes.sort_by_key(|n| n.spec.index);
                    let target = nodes.iter().find(|n| n.spec.binary_path != upgrade.spec.new_binary).cloned();
                    match target {
                        None => {
                            upgrade.status.phase = UpgradePhase::Verifying;
                            upgrade.status.phase_deadline = Some(Utc::now() + chrono::Duration::from_std(VERIFY_TIMEOUT).unwrap());
                        }
                        Some(mut node) => {
                            if node.status.phase != NodePhase::Stopped {
                                node.spec.desired = DesiredRunState::Stopped;
                                let node_key = node.metadata.key();
                                if let Err(e) = self.store.update_node(node).await {
                                    return Outcome::Retry(e.to_string());
                                }
                                self.node_queue.add(node_key);
                            } else {
                                node.spec.binary_path = upgrade.spec.new_binary.clone();
                                node.spec.desired = DesiredRunState::Running;
                                node.status.restart_count += 1;
                                let node_key = node.metadata.key();
                                if let Err(e) = self.store.update_node(node).await {
                                    return Outcome::Retry(e.to_string());
                                }
                                self.node_queue.add(node_key);
                            }
                            requeue_after(&self.self_queue, key.clone(), POLL_DELAY);
                            let _ = self.store.update_upgrade(upgrade).await;
                            return Outcome::Success;
                        }
                    }
                }
                UpgradePhase::Verifying => {
                    let nodes = self.store.list_nodes(&devnet_key.namespace, &devnet_key.name).await.unwrap_or_default();
                    let mut all_verified = true;
                    for node in &nodes {
                        match self.chain.app_version(node).await {
                            Ok(v) if version_matches(&v, &upgrade.spec.new_binary) => {}
                            Ok(_) => all_verified = false,
                            Err(e) => return Outcome::Retry(e.to_string()),
                        }
                    }
                    if all_verified {
                        upgrade.status.phase = UpgradePhase::Completed;
                        upgrade.status.phase_deadline = None;
                    } else if upgrade.status.phase_deadline.map(|d| Utc::now() > d).unwrap_or(false) {
                        return fail(&self.store, upgrade, "verification timed out".to_string()).await;
                    } else {
                        requeue_after(&self.self_queue, key.clone(), Duration::from_secs(2));
                        let _ = self.store.update_upgrade(upgrade).await;
                        return Outcome::Success;
                    }
                }
                UpgradePhase::Completed | UpgradePhase::Failed => return Outcome::Success,
            }

            if let Err(e) = self.store.update_upgrade(upgrade).await {
                return Outcome::Retry(e.to_string());
            }
            requeue_after(&self.self_queue, key.clone(), Duration::from_millis(10));
            Outcome::Success
        }
        .instrument(span)
        .await
    }
}

impl UpgradeReconciler {
    async fn pick_running_node(&self, devnet_key: &ResourceKey) -> Result<crate::model::Node, String> {
        let nodes = self.store.list_nodes(&devnet_key.namespace, &devnet_key.name).await.map_err(|e| e.to_string())?;
        nodes
            .into_iter()
            .find(|n| n.status.phase == NodePhase::Running)
            .ok_or_else(|| "no running node available".to_string())
    }
}

/// Cancellation (§4.7): allowed in every non-terminal phase except the
/// irreversible `Switching`/`Verifying` steps.
pub fn cancel(upgrade: &mut crate::model::Upgrade) -> Result<(), crate::error::Error> {
    if !upgrade.status.phase.cancellable() {
        return Err(crate::error::Error::precondition(format!(
            "cannot cancel upgrade in phase {:?}",
            upgrade.status.phase
        )));
    }
    upgrade.status.phase = UpgradePhase::Failed;
    upgrade.status.error = Some("cancelled".to_string());
    Ok(())
}

/// Retry (§4.7): only valid from `Failed`; resets to `Pending` but keeps
/// any already-submitted proposal id so it is not resubmitted.
pub fn retry(upgrade: &mut crate::model::Upgrade) -> Result<(), crate::error::Error> {
    if upgrade.status.phase != UpgradePhase::Failed {
        return Err(crate::error::Error::precondition("retry is only valid from the Failed phase"));
    }
    upgrade.status.phase = UpgradePhase::Pending;
    upgrade.status.error = None;
    upgrade.status.phase_deadline = None;
    Ok(())
}

async fn fail(store: &Arc<dyn Store>, mut upgrade: crate::model::Upgrade, message: String) -> Outcome {
    upgrade.status.phase = UpgradePhase::Failed;
    upgrade.status.error = Some(message.clone());
    upgrade.status.message = message.clone();
    let _ = store.update_upgrade(upgrade).await;
    Outcome::Fatal(message)
}

/// Compares a reported `app_version` against the upgrade's target. Parsed as
/// semver when both sides happen to be bare version strings; plugins whose
/// version strings aren't semver (tags, commit hashes) fall back to an exact
/// string match rather than failing verification outright.
fn version_matches(reported: &str, target: &str) -> bool {
    match (semver::Version::parse(reported.trim_start_matches('v')), semver::Version::parse(target.trim_start_matches('v'))) {
        (Ok(a), Ok(b)) => a == b,
        _ => reported == target,
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
    use crate::model::{Devnet, DevnetMode, DevnetPhase, DevnetSpec, GenesisOverrides, GenesisSource, Node, NodeSpec, Upgrade, UpgradeSpec};
    use crate::store::MemoryStore;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FakeChain {
        passed: AtomicBool,
    }

    #[async_trait]
    impl ChainClient for FakeChain {
        async fn submit_upgrade_proposal(&self, _node: &Node, _name: &str, _height: u64) -> crate::error::Result<String> {
            Ok("prop-1".to_string())
        }
        async fn vote_yes(&self, _node: &Node, _proposal_id: &str) -> crate::error::Result<()> {
            self.passed.store(true, Ordering::SeqCst);
            Ok(())
        }
        async fn proposal_passed(&self, _node: &Node, _proposal_id: &str) -> crate::error::Result<bool> {
            Ok(self.passed.load(Ordering::SeqCst))
        }
        async fn current_height(&self, _node: &Node) -> crate::error::Result<u64> {
            Ok(1000)
        }
        async fn app_version(&self, _node: &Node) -> crate::error::Result<String> {
            Ok("v2.0.0".to_string())
        }
    }

    async fn seed(store: &Arc<dyn Store>) -> ResourceKey {
        let mut devnet = Devnet::new(
            Metadata::new("dev-1", "default"),
            DevnetSpec {
                plugin: "fake".to_string(),
                network_type: "testnet".to_string(),
                validators: 1,
                full_nodes: 0,
                mode: DevnetMode::Local,
                binary_source: "v1.0.0".to_string(),
                genesis_source: GenesisSource::Generate,
                genesis_overrides: GenesisOverrides::default(),
                desired: crate::model::DevnetDesiredState::Running,
            },
        );
        devnet.status.phase = DevnetPhase::Running;
        store.create_devnet(devnet).await.unwrap();

        let mut node = Node::new(
            Metadata::new("dev-1-0", "default"),
            NodeSpec {
                devnet_ref: ResourceKey::new("default", "dev-1"),
                index: 0,
                role: NodeRole::Validator,
                binary_path: "v1.0.0".to_string(),
                home_dir: "/tmp/home".to_string(),
                desired: DesiredRunState::Running,
            },
        );
        node.status.phase = NodePhase::Running;
        store.create_node(node).await.unwrap();

        let upgrade = Upgrade::new(
            Metadata::new("up-1", "default"),
            UpgradeSpec {
                devnet_ref: ResourceKey::new("default", "dev-1"),
                upgrade_name: "v2".to_string(),
                target_height: 1000,
                new_binary: "v2.0.0".to_string(),
                strategy: UpgradeStrategy::GovProposal,
            },
        );
        let key = upgrade.metadata.key();
        store.create_upgrade(upgrade).await.unwrap();
        key
    }

    #[tokio::test]
    async fn pending_rejects_when_another_upgrade_in_flight() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let key = seed(&store).await;
        let mut sibling = Upgrade::new(
            Metadata::new("up-2", "default"),
            UpgradeSpec {
                devnet_ref: ResourceKey::new("default", "dev-1"),
                upgrade_name: "v3".to_string(),
                target_height: 2000,
                new_binary: "v3.0.0".to_string(),
                strategy: UpgradeStrategy::GovProposal,
            },
        );
        sibling.status.phase = UpgradePhase::Proposing;
        store.create_upgrade(sibling).await.unwrap();

        let chain: Arc<dyn ChainClient> = Arc::new(FakeChain { passed: AtomicBool::new(false) });
        let reconciler = UpgradeReconciler::new(store.clone(), chain, WorkQueue::new(), WorkQueue::new());
        reconciler.reconcile(&key).await;
        let reloaded = store.get_upgrade(&key).await.unwrap();
        assert_eq!(reloaded.status.phase, UpgradePhase::Failed);
    }

    #[tokio::test]
    async fn pending_to_proposing_when_devnet_running_and_clear() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let key = seed(&store).await;
        let chain: Arc<dyn ChainClient> = Arc::new(FakeChain { passed: AtomicBool::new(false) });
        let reconciler = UpgradeReconciler::new(store.clone(), chain, WorkQueue::new(), WorkQueue::new());
        reconciler.reconcile(&key).await;
        let reloaded = store.get_upgrade(&key).await.unwrap();
        assert_eq!(reloaded.status.phase, UpgradePhase::Proposing);
    }

    #[test]
    fn cancel_rejected_once_switching() {
        let mut upgrade = Upgrade::new(
            Metadata::new("up-1", "default"),
            UpgradeSpec {
                devnet_ref: ResourceKey::new("default", "dev-1"),
                upgrade_name: "v2".to_string(),
                target_height: 1000,
                new_binary: "v2.0.0".to_string(),
                strategy: UpgradeStrategy::GovProposal,
            },
        );
        upgrade.status.phase = UpgradePhase::Switching;
        assert!(cancel(&mut upgrade).is_err());
    }

    #[test]
    fn version_matches_ignores_leading_v_and_falls_back_to_string_eq() {
        assert!(version_matches("v2.0.0", "2.0.0"));
        assert!(version_matches("2.0.0", "v2.0.0"));
        assert!(!version_matches("v2.0.0", "v2.0.1"));
        assert!(version_matches("deadbeef", "deadbeef"));
        assert!(!version_matches("deadbeef", "cafefeed"));
    }

    #[test]
    fn retry_only_valid_from_failed() {
        let mut upgrade = Upgrade::new(
            Metadata::new("up-1", "default"),
            UpgradeSpec {
                devnet_ref: ResourceKey::new("default", "dev-1"),
                upgrade_name: "v2".to_string(),
                target_height: 1000,
                new_binary: "v2.0.0".to_string(),
                strategy: UpgradeStrategy::GovProposal,
            },
        );
        assert!(retry(&mut upgrade).is_err());
        upgrade.status.phase = UpgradePhase::Failed;
        upgrade.status.proposal_id = Some("prop-1".to_string());
        retry(&mut upgrade).unwrap();
        assert_eq!(upgrade.status.phase, UpgradePhase::Pending);
        assert_eq!(upgrade.status.proposal_id, Some("prop-1".to_string()));
    }
}
