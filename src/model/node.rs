use serde::{Deserialize, Serialize};

use crate::metadata::{Metadata, ResourceKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeRole {
    Validator,
    Fullnode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DesiredRunState {
    Running,
    Stopped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    pub devnet_ref: ResourceKey,
    pub index: u32,
    pub role: NodeRole,
    pub binary_path: String,
    pub home_dir: String,
    pub desired: DesiredRunState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodePhase {
    Pending,
    Starting,
    Running,
    Stopping,
    Stopped,
    Crashed,
}

impl Default for NodePhase {
    fn default() -> Self {
        NodePhase::Pending
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeStatus {
    pub phase: NodePhase,
    /// Opaque process id or container id, set once `NodeRuntime::start` succeeds.
    pub instance_id: Option<String>,
    pub block_height: u64,
    pub peer_count: u32,
    pub catching_up: bool,
    pub restart_count: u32,
    pub message: String,
    pub healthy: bool,
    pub consecutive_probe_failures: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub metadata: Metadata,
    pub spec: NodeSpec,
    pub status: NodeStatus,
}

impl Node {
    pub fn new(metadata: Metadata, spec: NodeSpec) -> Self {
        Self { metadata, spec, status: NodeStatus::default() }
    }
}
