//! Conversions between the wire (`pb`) and domain (`crate::model`) resource
//! representations. Domain -> wire is infallible; wire -> domain validates
//! enum discriminants and required sub-messages, surfacing anything
//! malformed as `Error::Validation` (mapped to `InvalidArgument` at the
//! service boundary).

use super::pb;
use crate::error::{Error, Result};
use crate::metadata::{Metadata, ResourceKey};
use crate::model::devnet::{DevnetMode, GenesisOverrides, GenesisSource};
use crate::model::node::{DesiredRunState, NodeRole};
use crate::model::upgrade::UpgradeStrategy;
use crate::model::{Devnet, DevnetPhase, DevnetSpec, DevnetStatus};
use crate::model::{Node, NodePhase, NodeSpec, NodeStatus};
use crate::model::{Transaction, TransactionPhase, TransactionSpec, TransactionStatus};
use crate::model::{Upgrade, UpgradePhase, UpgradeSpec, UpgradeStatus};

pub fn metadata_to_pb(m: &Metadata) -> pb::Metadata {
    pb::Metadata {
        name: m.name.clone(),
        namespace: m.namespace.clone(),
        generation: m.generation,
        created_at_unix_ms: m.created_at.timestamp_millis(),
        updated_at_unix_ms: m.updated_at.timestamp_millis(),
        labels: m.labels.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        annotations: m.annotations.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
    }
}

/// Builds a fresh `Metadata` from a request's embedded metadata; only
/// `name`/`namespace`/`labels`/`annotations` are author-controlled, the rest
/// is assigned by the store on create.
pub fn metadata_from_pb_for_create(m: &pb::Metadata) -> Result<Metadata> {
    if m.name.is_empty() {
        return Err(Error::validation("metadata.name is required"));
    }
    let mut meta = Metadata::new(m.name.clone(), m.namespace.clone());
    meta.labels = m.labels.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    meta.annotations = m.annotations.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    Ok(meta)
}

pub fn object_ref_to_key(r: &pb::ObjectRef) -> ResourceKey {
    ResourceKey::new(r.namespace.clone(), r.name.clone())
}

fn devnet_mode_to_pb(mode: DevnetMode) -> i32 {
    match mode {
        DevnetMode::Local => pb::DevnetMode::Local as i32,
        DevnetMode::Docker => pb::DevnetMode::Docker as i32,
    }
}

fn devnet_mode_from_pb(raw: i32) -> Result<DevnetMode> {
    match pb::DevnetMode::try_from(raw).unwrap_or(pb::DevnetMode::Unspecified) {
        pb::DevnetMode::Local => Ok(DevnetMode::Local),
        pb::DevnetMode::Docker => Ok(DevnetMode::Docker),
        pb::DevnetMode::Unspecified => Err(Error::validation("devnet.spec.mode is required")),
    }
}

fn genesis_source_to_pb(source: &GenesisSource) -> pb::GenesisSource {
    let (kind, location) = match source {
        GenesisSource::Rpc { endpoint } => (pb::GenesisKind::Rpc, endpoint.clone()),
        GenesisSource::Snapshot { url } => (pb::GenesisKind::Snapshot, url.clone()),
        GenesisSource::Local { path } => (pb::GenesisKind::Local, path.clone()),
        GenesisSource::Generate => (pb::GenesisKind::Generate, String::new()),
    };
    pb::GenesisSource { kind: kind as i32, location }
}

fn genesis_source_from_pb(src: Option<pb::GenesisSource>) -> Result<GenesisSource> {
    let src = src.ok_or_else(|| Error::validation("devnet.spec.genesis_source is required"))?;
    match pb::GenesisKind::try_from(src.kind).unwrap_or(pb::GenesisKind::Unspecified) {
        pb::GenesisKind::Rpc => Ok(GenesisSource::Rpc { endpoint: src.location }),
        pb::GenesisKind::Snapshot => Ok(GenesisSource::Snapshot { url: src.location }),
        pb::GenesisKind::Local => Ok(GenesisSource::Local { path: src.location }),
        pb::GenesisKind::Generate => Ok(GenesisSource::Generate),
        pb::GenesisKind::Unspecified => Err(Error::validation("devnet.spec.genesis_source.kind is required")),
    }
}

fn genesis_overrides_to_pb(o: &GenesisOverrides) -> pb::GenesisOverrides {
    pb::GenesisOverrides {
        chain_id: o.chain_id.clone().unwrap_or_default(),
        voting_period: o.voting_period.clone().unwrap_or_default(),
        unbonding_time: o.unbonding_time.clone().unwrap_or_default(),
        inflation: o.inflation.clone().unwrap_or_default(),
    }
}

fn opt_string(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

fn genesis_overrides_from_pb(o: Option<pb::GenesisOverrides>) -> GenesisOverrides {
    let o = o.unwrap_or_default();
    GenesisOverrides {
        chain_id: opt_string(o.chain_id),
        voting_period: opt_string(o.voting_period),
        unbonding_time: opt_string(o.unbonding_time),
        inflation: opt_string(o.inflation),
    }
}

fn devnet_phase_to_pb(phase: DevnetPhase) -> i32 {
    let p = match phase {
        DevnetPhase::Pending => pb::DevnetPhase::Pending,
        DevnetPhase::Provisioning => pb::DevnetPhase::Provisioning,
        DevnetPhase::Running => pb::DevnetPhase::Running,
        DevnetPhase::Stopped => pb::DevnetPhase::Stopped,
        DevnetPhase::Failed => pb::DevnetPhase::Failed,
    };
    p as i32
}

pub fn devnet_spec_from_pb(spec: pb::DevnetSpec) -> Result<DevnetSpec> {
    Ok(DevnetSpec {
        plugin: spec.plugin,
        network_type: spec.network_type,
        validators: spec.validators,
        full_nodes: spec.full_nodes,
        mode: devnet_mode_from_pb(spec.mode)?,
        binary_source: spec.binary_source,
        genesis_source: genesis_source_from_pb(spec.genesis_source)?,
        genesis_overrides: genesis_overrides_from_pb(spec.genesis_overrides),
        desired: crate::model::DevnetDesiredState::Running,
    })
}

fn devnet_spec_to_pb(spec: &DevnetSpec) -> pb::DevnetSpec {
    pb::DevnetSpec {
        plugin: spec.plugin.clone(),
        network_type: spec.network_type.clone(),
        validators: spec.validators,
        full_nodes: spec.full_nodes,
        mode: devnet_mode_to_pb(spec.mode),
        binary_source: spec.binary_source.clone(),
        genesis_source: Some(genesis_source_to_pb(&spec.genesis_source)),
        genesis_overrides: Some(genesis_overrides_to_pb(&spec.genesis_overrides)),
    }
}

fn devnet_status_to_pb(status: &DevnetStatus) -> pb::DevnetStatus {
    pb::DevnetStatus {
        phase: devnet_phase_to_pb(status.phase),
        nodes: status.nodes,
        ready_nodes: status.ready_nodes,
        current_height: status.current_height,
        message: status.message.clone(),
        last_health_check_unix_ms: status.last_health_check.map(|t| t.timestamp_millis()).unwrap_or(0),
    }
}

pub fn devnet_to_pb(devnet: &Devnet) -> pb::Devnet {
    pb::Devnet {
        metadata: Some(metadata_to_pb(&devnet.metadata)),
        spec: Some(devnet_spec_to_pb(&devnet.spec)),
        status: Some(devnet_status_to_pb(&devnet.status)),
    }
}

fn node_role_to_pb(role: NodeRole) -> i32 {
    let r = match role {
        NodeRole::Validator => pb::NodeRole::Validator,
        NodeRole::Fullnode => pb::NodeRole::Fullnode,
    };
    r as i32
}

fn desired_run_state_to_pb(desired: DesiredRunState) -> i32 {
    let d = match desired {
        DesiredRunState::Running => pb::DesiredRunState::Running,
        DesiredRunState::Stopped => pb::DesiredRunState::Stopped,
    };
    d as i32
}

fn node_phase_to_pb(phase: NodePhase) -> i32 {
    let p = match phase {
        NodePhase::Pending => pb::NodePhase::Pending,
        NodePhase::Starting => pb::NodePhase::Starting,
        NodePhase::Running => pb::NodePhase::Running,
        NodePhase::Stopping => pb::NodePhase::Stopping,
        NodePhase::Stopped => pb::NodePhase::Stopped,
        NodePhase::Crashed => pb::NodePhase::Crashed,
    };
    p as i32
}

pub fn node_spec_to_pb(spec: &NodeSpec) -> pb::NodeSpec {
    pb::NodeSpec {
        devnet_ref: Some(pb::ObjectRef { namespace: spec.devnet_ref.namespace.clone(), name: spec.devnet_ref.name.clone() }),
        index: spec.index,
        role: node_role_to_pb(spec.role),
        binary_path: spec.binary_path.clone(),
        home_dir: spec.home_dir.clone(),
        desired: desired_run_state_to_pb(spec.desired),
    }
}

fn node_status_to_pb(status: &NodeStatus) -> pb::NodeStatus {
    pb::NodeStatus {
        phase: node_phase_to_pb(status.phase),
        instance_id: status.instance_id.clone().unwrap_or_default(),
        block_height: status.block_height,
        peer_count: status.peer_count,
        catching_up: status.catching_up,
        restart_count: status.restart_count,
        message: status.message.clone(),
        healthy: status.healthy,
        consecutive_probe_failures: status.consecutive_probe_failures,
    }
}

pub fn node_to_pb(node: &Node) -> pb::Node {
    pb::Node {
        metadata: Some(metadata_to_pb(&node.metadata)),
        spec: Some(node_spec_to_pb(&node.spec)),
        status: Some(node_status_to_pb(&node.status)),
    }
}

fn upgrade_strategy_to_pb(strategy: UpgradeStrategy) -> i32 {
    let s = match strategy {
        UpgradeStrategy::GovProposal => pb::UpgradeStrategy::GovProposal,
        UpgradeStrategy::BinarySwap => pb::UpgradeStrategy::BinarySwap,
    };
    s as i32
}

fn upgrade_strategy_from_pb(raw: i32) -> Result<UpgradeStrategy> {
    match pb::UpgradeStrategy::try_from(raw).unwrap_or(pb::UpgradeStrategy::Unspecified) {
        pb::UpgradeStrategy::GovProposal => Ok(UpgradeStrategy::GovProposal),
        pb::UpgradeStrategy::BinarySwap => Ok(UpgradeStrategy::BinarySwap),
        pb::UpgradeStrategy::Unspecified => Err(Error::validation("upgrade.spec.strategy is required")),
    }
}

fn upgrade_phase_to_pb(phase: UpgradePhase) -> i32 {
    let p = match phase {
        UpgradePhase::Pending => pb::UpgradePhase::Pending,
        UpgradePhase::Proposing => pb::UpgradePhase::Proposing,
        UpgradePhase::Voting => pb::UpgradePhase::Voting,
        UpgradePhase::WaitingForHeight => pb::UpgradePhase::WaitingForHeight,
        UpgradePhase::Switching => pb::UpgradePhase::Switching,
        UpgradePhase::Verifying => pb::UpgradePhase::Verifying,
        UpgradePhase::Completed => pb::UpgradePhase::Completed,
        UpgradePhase::Failed => pb::UpgradePhase::Failed,
    };
    p as i32
}

pub fn upgrade_spec_from_pb(spec: pb::UpgradeSpec, devnet_ref: ResourceKey) -> Result<UpgradeSpec> {
    if spec.upgrade_name.is_empty() {
        return Err(Error::validation("upgrade.spec.upgrade_name is required"));
    }
    if spec.new_binary.is_empty() {
        return Err(Error::validation("upgrade.spec.new_binary is required"));
    }
    Ok(UpgradeSpec {
        devnet_ref,
        upgrade_name: spec.upgrade_name,
        target_height: spec.target_height,
        new_binary: spec.new_binary,
        strategy: upgrade_strategy_from_pb(spec.strategy)?,
    })
}

fn upgrade_spec_to_pb(spec: &UpgradeSpec) -> pb::UpgradeSpec {
    pb::UpgradeSpec {
        devnet_ref: Some(pb::ObjectRef { namespace: spec.devnet_ref.namespace.clone(), name: spec.devnet_ref.name.clone() }),
        upgrade_name: spec.upgrade_name.clone(),
        target_height: spec.target_height,
        new_binary: spec.new_binary.clone(),
        strategy: upgrade_strategy_to_pb(spec.strategy),
    }
}

fn upgrade_status_to_pb(status: &UpgradeStatus) -> pb::UpgradeStatus {
    pb::UpgradeStatus {
        phase: upgrade_phase_to_pb(status.phase),
        proposal_id: status.proposal_id.clone().unwrap_or_default(),
        current_height: status.current_height,
        error: status.error.clone().unwrap_or_default(),
        message: status.message.clone(),
    }
}

pub fn upgrade_to_pb(upgrade: &Upgrade) -> pb::Upgrade {
    pb::Upgrade {
        metadata: Some(metadata_to_pb(&upgrade.metadata)),
        spec: Some(upgrade_spec_to_pb(&upgrade.spec)),
        status: Some(upgrade_status_to_pb(&upgrade.status)),
    }
}

fn transaction_phase_to_pb(phase: TransactionPhase) -> i32 {
    let p = match phase {
        TransactionPhase::Pending => pb::TransactionPhase::Pending,
        TransactionPhase::Broadcast => pb::TransactionPhase::Broadcast,
        TransactionPhase::Confirmed => pb::TransactionPhase::Confirmed,
        TransactionPhase::Failed => pb::TransactionPhase::Failed,
    };
    p as i32
}

pub fn transaction_phase_from_pb(raw: i32) -> Option<TransactionPhase> {
    match pb::TransactionPhase::try_from(raw).unwrap_or(pb::TransactionPhase::Unspecified) {
        pb::TransactionPhase::Pending => Some(TransactionPhase::Pending),
        pb::TransactionPhase::Broadcast => Some(TransactionPhase::Broadcast),
        pb::TransactionPhase::Confirmed => Some(TransactionPhase::Confirmed),
        pb::TransactionPhase::Failed => Some(TransactionPhase::Failed),
        pb::TransactionPhase::Unspecified => None,
    }
}

pub fn transaction_spec_from_pb(spec: pb::TransactionSpec, devnet_ref: ResourceKey) -> Result<TransactionSpec> {
    if spec.tx_type.is_empty() {
        return Err(Error::validation("transaction.spec.tx_type is required"));
    }
    Ok(TransactionSpec {
        devnet_ref,
        tx_type: spec.tx_type,
        signer: spec.signer,
        payload: spec.payload,
        gas_limit: spec.gas_limit,
        memo: spec.memo,
    })
}

fn transaction_spec_to_pb(spec: &TransactionSpec) -> pb::TransactionSpec {
    pb::TransactionSpec {
        devnet_ref: Some(pb::ObjectRef { namespace: spec.devnet_ref.namespace.clone(), name: spec.devnet_ref.name.clone() }),
        tx_type: spec.tx_type.clone(),
        signer: spec.signer.clone(),
        payload: spec.payload.clone(),
        gas_limit: spec.gas_limit,
        memo: spec.memo.clone(),
    }
}

fn transaction_status_to_pb(status: &TransactionStatus) -> pb::TransactionStatus {
    pb::TransactionStatus {
        phase: transaction_phase_to_pb(status.phase),
        tx_hash: status.tx_hash.clone().unwrap_or_default(),
        height: status.height,
        gas_used: status.gas_used,
        error: status.error.clone().unwrap_or_default(),
    }
}

pub fn transaction_to_pb(tx: &Transaction) -> pb::Transaction {
    pb::Transaction {
        metadata: Some(metadata_to_pb(&tx.metadata)),
        spec: Some(transaction_spec_to_pb(&tx.spec)),
        status: Some(transaction_status_to_pb(&tx.status)),
    }
}

