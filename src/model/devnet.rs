use serde::{Deserialize, Serialize};

use crate::metadata::Metadata;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DevnetMode {
    Local,
    Docker,
}

/// The field RPC handlers toggle via `StartDevnet`/`StopDevnet`; the
/// reconciler drives child Nodes' own `desired` toward this value and
/// never mutates it itself ("RPC handlers never mutate Status except via
/// Spec.DesiredPhase transitions", §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DevnetDesiredState {
    Running,
    Stopped,
}

impl Default for DevnetDesiredState {
    fn default() -> Self {
        DevnetDesiredState::Running
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GenesisSource {
    Rpc { endpoint: String },
    Snapshot { url: String },
    Local { path: String },
    Generate,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisOverrides {
    pub chain_id: Option<String>,
    pub voting_period: Option<String>,
    pub unbonding_time: Option<String>,
    pub inflation: Option<String>,
}

/// Author-controlled desired state. A reconciler never mutates this.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DevnetSpec {
    pub plugin: String,
    pub network_type: String,
    pub validators: u32,
    pub full_nodes: u32,
    pub mode: DevnetMode,
    pub binary_source: String,
    pub genesis_source: GenesisSource,
    pub genesis_overrides: GenesisOverrides,
    #[serde(default)]
    pub desired: DevnetDesiredState,
}

impl DevnetSpec {
    pub fn total_nodes(&self) -> u32 {
        self.validators + self.full_nodes
    }

    /// §3.1 invariant: counts are non-negative (guaranteed by `u32`) and
    /// must sum to at least one running node.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.total_nodes() == 0 {
            return Err(crate::error::Error::validation(
                "devnet must declare at least one validator or full node",
            ));
        }
        if self.plugin.is_empty() {
            return Err(crate::error::Error::validation("devnet.spec.plugin is required"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DevnetPhase {
    Pending,
    Provisioning,
    Running,
    Stopped,
    Failed,
}

impl Default for DevnetPhase {
    fn default() -> Self {
        DevnetPhase::Pending
    }
}

/// Reconciler-controlled observed state. An RPC handler never mutates this
/// except indirectly through `Spec.desired`-style transitions (§3).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DevnetStatus {
    pub phase: DevnetPhase,
    pub nodes: u32,
    pub ready_nodes: u32,
    pub current_height: u64,
    pub message: String,
    pub last_health_check: Option<chrono::DateTime<chrono::Utc>>,
}

impl DevnetStatus {
    /// §3.1 invariant: `readyNodes <= nodes <= validators + fullNodes`.
    pub fn check_invariant(&self, spec: &DevnetSpec) -> bool {
        self.ready_nodes <= self.nodes && self.nodes <= spec.total_nodes()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Devnet {
    pub metadata: Metadata,
    pub spec: DevnetSpec,
    pub status: DevnetStatus,
}

impl Devnet {
    pub fn new(metadata: Metadata, spec: DevnetSpec) -> Self {
        Self { metadata, spec, status: DevnetStatus::default() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(validators: u32, full_nodes: u32) -> DevnetSpec {
        DevnetSpec {
            plugin: "cosmos-sdk".to_string(),
            network_type: "testnet".to_string(),
            validators,
            full_nodes,
            mode: DevnetMode::Local,
            binary_source: "v1.0.0".to_string(),
            genesis_source: GenesisSource::Generate,
            genesis_overrides: GenesisOverrides::default(),
            desired: DevnetDesiredState::Running,
        }
    }

    #[test]
    fn rejects_zero_total_nodes() {
        assert!(spec(0, 0).validate().is_err());
    }

    #[test]
    fn accepts_at_least_one_node() {
        assert!(spec(1, 0).validate().is_ok());
        assert!(spec(0, 1).validate().is_ok());
    }

    #[test]
    fn status_invariant_holds_within_bounds() {
        let s = spec(2, 1);
        let mut status = DevnetStatus { nodes: 3, ready_nodes: 3, ..Default::default() };
        assert!(status.check_invariant(&s));
        status.ready_nodes = 4;
        assert!(!status.check_invariant(&s));
        status.ready_nodes = 3;
        status.nodes = 4;
        assert!(!status.check_invariant(&s));
    }
}
